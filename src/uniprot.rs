use std::time::Duration;

use serde::Serialize;

use crate::domain::{Organism, ProteinAccession};
use crate::error::KiraError;
use crate::retry::{RetryOutcome, RetryPolicy, run_with_retry};
use crate::transport::{HttpTransport, PageRequest, TextPage};

const STREAM_URL: &str = "https://rest.uniprot.org/uniprotkb/stream";

/// What the mapper needs to know about the query protein.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ProteinEntry {
    pub accession: String,
    pub description: String,
    pub sequence: String,
    pub organism: Organism,
}

pub trait ProteinLookup: Send + Sync {
    fn lookup(&self, accession: &ProteinAccession) -> Result<ProteinEntry, KiraError>;
}

pub struct UniprotHttpClient {
    transport: HttpTransport,
    retry: RetryPolicy,
}

impl UniprotHttpClient {
    pub fn new(retry: RetryPolicy) -> Result<Self, KiraError> {
        Ok(Self {
            transport: HttpTransport::new()?,
            retry,
        })
    }
}

/// FASTA stream request for one accession.
pub fn lookup_request(accession: &ProteinAccession) -> PageRequest {
    PageRequest::new(STREAM_URL, Duration::from_secs(30))
        .with_header("Accept", "text/plain")
        .with_param("compressed", "false")
        .with_param("format", "fasta")
        .with_param("query", accession.as_str())
}

/// Turns a stream response into an entry; any non-success status is `UpstreamStatus`.
pub fn entry_from_page(
    accession: &ProteinAccession,
    page: &TextPage,
) -> Result<ProteinEntry, KiraError> {
    if !page.is_success() {
        return Err(KiraError::UpstreamStatus {
            source_name: "UniProt".to_string(),
            status: page.status,
            url: page.final_url.clone(),
        });
    }
    parse_fasta_entry(accession, &page.text)
}

impl ProteinLookup for UniprotHttpClient {
    fn lookup(&self, accession: &ProteinAccession) -> Result<ProteinEntry, KiraError> {
        let request = lookup_request(accession);
        let page = match run_with_retry(&self.retry, || self.transport.fetch_text(&request))? {
            RetryOutcome::Completed { value, .. } => value,
            RetryOutcome::Exhausted { last_error, .. } => return Err(last_error),
        };
        tracing::debug!(accession = %accession, bytes = page.text.len(), "uniprot.response");
        entry_from_page(accession, &page)
    }
}

/// Picks the record for `accession` out of a FASTA stream and reads the
/// organism from its `OS=` and `OX=` header fields.
pub fn parse_fasta_entry(
    accession: &ProteinAccession,
    fasta: &str,
) -> Result<ProteinEntry, KiraError> {
    let records = fasta
        .split('>')
        .filter(|chunk| !chunk.trim().is_empty())
        .collect::<Vec<_>>();
    let marker = format!("|{}|", accession.as_str());
    let record = records
        .iter()
        .find(|chunk| chunk.lines().next().is_some_and(|line| line.contains(&marker)))
        .or_else(|| records.first())
        .ok_or_else(|| KiraError::NotFound(format!("UniProt entry {accession}")))?;

    let mut lines = record.lines();
    let header = lines.next().unwrap_or_default().trim();
    let sequence = lines.map(str::trim).collect::<String>();

    let name = header_field(header, "OS")
        .ok_or_else(|| KiraError::NotFound(format!("organism of {accession}")))?;
    let taxonomy = header_field(header, "OX")
        .ok_or_else(|| KiraError::NotFound(format!("taxonomy of {accession}")))?;

    Ok(ProteinEntry {
        accession: accession.to_string(),
        description: header.to_string(),
        sequence,
        organism: Organism::new(name, taxonomy),
    })
}

/// Value of a `KEY=value` header field; values run until the next ` XX=` field.
fn header_field(header: &str, key: &str) -> Option<String> {
    let tag = format!(" {key}=");
    let start = header.find(&tag)? + tag.len();
    let rest = &header[start..];
    let end = rest
        .match_indices(' ')
        .map(|(pos, _)| pos)
        .find(|&pos| {
            let tail = &rest[pos + 1..];
            tail.len() > 3
                && tail.as_bytes()[2] == b'='
                && tail[..2].chars().all(|ch| ch.is_ascii_uppercase())
        })
        .unwrap_or(rest.len());
    let value = rest[..end].trim();
    (!value.is_empty()).then(|| value.to_string())
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;

    use super::*;

    const FASTA: &str = ">sp|P23950|TISD_HUMAN mRNA decay activator protein ZFP36L2 OS=Homo sapiens OX=9606 GN=ZFP36L2 PE=1 SV=3\nMSTTLLSAFYDVDFLCKTEKSLANLNLNNMLDKKAVGTPVAAAPSSGFAPGFLRRHSASN\nLHALAHPAPSPGSCSPKFPGAANGSSCGSAAAGGPTSYGTLKEPSGGGGTALLNKENKF\n";

    #[test]
    fn parses_organism_from_header() {
        let accession: ProteinAccession = "P23950".parse().unwrap();
        let entry = parse_fasta_entry(&accession, FASTA).unwrap();
        assert_eq!(entry.organism, Organism::new("Homo sapiens", "9606"));
        assert!(entry.sequence.starts_with("MSTTLLSAFYDVDF"));
        assert!(!entry.sequence.contains('\n'));
    }

    #[test]
    fn request_asks_for_uncompressed_fasta() {
        let accession: ProteinAccession = "P23950".parse().unwrap();
        let request = lookup_request(&accession);
        assert_eq!(request.param("format"), Some("fasta"));
        assert_eq!(request.param("compressed"), Some("false"));
        assert_eq!(request.param("query"), Some("P23950"));
        assert!(request.full_url().starts_with(STREAM_URL));
    }

    #[test]
    fn failed_status_is_upstream_error() {
        let accession: ProteinAccession = "P23950".parse().unwrap();
        let page = TextPage {
            status: 400,
            final_url: STREAM_URL.to_string(),
            text: "Error messages".to_string(),
        };
        assert_matches!(
            entry_from_page(&accession, &page),
            Err(KiraError::UpstreamStatus { status: 400, .. })
        );
        let page = TextPage {
            status: 200,
            final_url: STREAM_URL.to_string(),
            text: FASTA.to_string(),
        };
        assert_eq!(entry_from_page(&accession, &page).unwrap().organism.accession, "9606");
    }

    #[test]
    fn empty_stream_is_not_found() {
        let accession: ProteinAccession = "P23950".parse().unwrap();
        assert_matches!(parse_fasta_entry(&accession, ""), Err(KiraError::NotFound(_)));
    }

    #[test]
    fn header_fields_stop_at_next_key() {
        let header = "sp|Q9CWY9|X_MOUSE Something OS=Mus musculus OX=10090 GN=Foo PE=1 SV=1";
        assert_eq!(header_field(header, "OS").as_deref(), Some("Mus musculus"));
        assert_eq!(header_field(header, "OX").as_deref(), Some("10090"));
        assert_eq!(header_field(header, "XX"), None);
    }
}
