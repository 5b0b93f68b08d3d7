//! Adapters for repositories speaking the PROXI API (iProX, MassIVE).
//!
//! Both return JSON arrays and signal the end of results with an empty body.
//! Only the base URL differs between them.

use std::collections::BTreeSet;
use std::sync::Arc;

use serde_json::Value;

use crate::domain::{Database, ProjectAccession, ProteinAccession, QueryKind, normalize_peptide};
use crate::error::KiraError;
use crate::providers::{
    ProjectAdapter, ProjectMetadata, SourceAdapter, SourceEndpoint, json_string, malformed,
    step_cursor,
};
use crate::transport::{PageRequest, RawPage, Transport};
use crate::usi::{EvidenceCandidate, parse_usi, peptide_from_interpretation};

pub const IPROX_BASE_URL: &str = "https://www.iprox.cn/proxi";
pub const MASSIVE_BASE_URL: &str = "https://massive.ucsd.edu/ProteoSAFe/proxi/v0.1";

/// Shorter peptides match too many spectra for the PROXI search to answer.
pub const MIN_PEPTIDE_LENGTH: usize = 7;

/// CV term whose `name` carries the NCBI taxonomy id.
const TAXONOMY_TERM: &str = "MS:1001467";

const PAGE_PARAM: &str = "pageNumber";

/// Sends the first request and adopts the URL the server redirected to.
fn discover_redirect(
    transport: &dyn Transport,
    mut request: PageRequest,
) -> Result<PageRequest, KiraError> {
    match transport.get(&request) {
        Ok(page) if page.is_success() => {
            if let Err(err) = request.adopt_url(&page.final_url) {
                tracing::debug!("ignoring redirect target {}: {err}", page.final_url);
            }
        }
        Ok(page) => tracing::debug!(status = page.status, "PROXI discovery skipped"),
        Err(err) if err.is_transient() => return Err(err),
        Err(err) => tracing::debug!("PROXI discovery failed: {err}"),
    }
    if request.param(PAGE_PARAM).is_none() {
        request.set_param(PAGE_PARAM, "1");
    }
    Ok(request)
}

fn rows<'a>(database: Database, page: &'a RawPage) -> Result<&'a Vec<Value>, KiraError> {
    page.body
        .as_ref()
        .and_then(Value::as_array)
        .ok_or_else(|| malformed(database, "expected a JSON array of PSMs"))
}

fn page_request(endpoint: &SourceEndpoint, path: &str, timeout: std::time::Duration) -> PageRequest {
    PageRequest::new(endpoint.url(path), timeout)
        .with_param(PAGE_PARAM, "1")
        .with_param("pageSize", endpoint.page_size.to_string())
        .with_param("resultType", "compact")
}

pub struct ProxiPeptideAdapter {
    endpoint: SourceEndpoint,
    transport: Arc<dyn Transport>,
}

impl ProxiPeptideAdapter {
    pub fn new(endpoint: SourceEndpoint, transport: Arc<dyn Transport>) -> Self {
        Self {
            endpoint,
            transport,
        }
    }
}

impl SourceAdapter for ProxiPeptideAdapter {
    fn database(&self) -> Database {
        self.endpoint.database
    }

    fn kind(&self) -> QueryKind {
        QueryKind::Peptide
    }

    fn build_request(&self, word: &str) -> Result<PageRequest, KiraError> {
        let peptide = normalize_peptide(word)?;
        if peptide.len() < MIN_PEPTIDE_LENGTH {
            return Err(KiraError::InvalidPeptide(format!(
                "{word} (at least {MIN_PEPTIDE_LENGTH} residues required)"
            )));
        }
        Ok(
            page_request(&self.endpoint, "spectra", self.endpoint.peptide_timeout)
                .with_param("peptideSequence", peptide),
        )
    }

    fn discover_defaults(&self, request: PageRequest) -> Result<PageRequest, KiraError> {
        discover_redirect(self.transport.as_ref(), request)
    }

    fn send(&self, request: &PageRequest) -> Result<RawPage, KiraError> {
        self.transport.get(request)
    }

    fn is_last_page(&self, page: &RawPage) -> bool {
        page.is_empty_body()
    }

    /// The search matches substrings, so rows are kept only when the
    /// interpretation's bare sequence equals the queried peptide.
    fn extract_rows(
        &self,
        word: &str,
        page: &RawPage,
    ) -> Result<Vec<EvidenceCandidate>, KiraError> {
        let wanted = word.trim().to_ascii_uppercase();
        Ok(rows(self.database(), page)?
            .iter()
            .filter_map(|item| item.get("usi").and_then(Value::as_str))
            .filter(|usi| match parse_usi(usi) {
                Ok(parsed) => peptide_from_interpretation(&parsed.interpretation) == wanted,
                Err(_) => false,
            })
            .map(|usi| EvidenceCandidate::new(wanted.as_str(), usi))
            .collect())
    }

    fn advance(&self, request: &mut PageRequest) -> Result<(), KiraError> {
        step_cursor(self.database(), request, PAGE_PARAM, 1)
    }
}

pub struct ProxiProteinAdapter {
    endpoint: SourceEndpoint,
    transport: Arc<dyn Transport>,
}

impl ProxiProteinAdapter {
    pub fn new(endpoint: SourceEndpoint, transport: Arc<dyn Transport>) -> Self {
        Self {
            endpoint,
            transport,
        }
    }
}

impl SourceAdapter for ProxiProteinAdapter {
    fn database(&self) -> Database {
        self.endpoint.database
    }

    fn kind(&self) -> QueryKind {
        QueryKind::Protein
    }

    fn build_request(&self, word: &str) -> Result<PageRequest, KiraError> {
        let accession: ProteinAccession = word.parse()?;
        Ok(page_request(&self.endpoint, "psms", self.endpoint.timeout)
            .with_param("proteinAccession", accession.as_str()))
    }

    fn discover_defaults(&self, request: PageRequest) -> Result<PageRequest, KiraError> {
        discover_redirect(self.transport.as_ref(), request)
    }

    fn send(&self, request: &PageRequest) -> Result<RawPage, KiraError> {
        self.transport.get(request)
    }

    fn is_last_page(&self, page: &RawPage) -> bool {
        page.is_empty_body()
    }

    fn extract_rows(
        &self,
        _word: &str,
        page: &RawPage,
    ) -> Result<Vec<EvidenceCandidate>, KiraError> {
        Ok(rows(self.database(), page)?
            .iter()
            .filter_map(|item| {
                let usi = item.get("usi").and_then(Value::as_str)?;
                let peptide = match item.get("peptideSequence").and_then(Value::as_str) {
                    Some(peptide) => peptide.to_string(),
                    None => peptide_from_interpretation(&parse_usi(usi).ok()?.interpretation),
                };
                Some(EvidenceCandidate::new(peptide, usi))
            })
            .collect())
    }

    fn advance(&self, request: &mut PageRequest) -> Result<(), KiraError> {
        step_cursor(self.database(), request, PAGE_PARAM, 1)
    }
}

pub struct ProxiProjectAdapter {
    endpoint: SourceEndpoint,
    transport: Arc<dyn Transport>,
}

impl ProxiProjectAdapter {
    pub fn new(endpoint: SourceEndpoint, transport: Arc<dyn Transport>) -> Self {
        Self {
            endpoint,
            transport,
        }
    }
}

/// Collects taxonomy ids from `species`, which is a list of CV terms or a list
/// of such lists.
fn taxonomy_ids(species: &Value, out: &mut BTreeSet<String>) {
    match species {
        Value::Array(items) => items.iter().for_each(|item| taxonomy_ids(item, out)),
        Value::Object(term) => {
            let is_taxonomy = term.get("accession").and_then(Value::as_str) == Some(TAXONOMY_TERM);
            if is_taxonomy {
                if let Some(id) = json_string(term.get("name")).or(json_string(term.get("value"))) {
                    out.insert(id);
                }
            }
        }
        _ => {}
    }
}

impl ProjectAdapter for ProxiProjectAdapter {
    fn database(&self) -> Database {
        self.endpoint.database
    }

    fn build_request(&self, accession: &str) -> Result<PageRequest, KiraError> {
        let accession: ProjectAccession = accession.parse()?;
        Ok(PageRequest::new(
            self.endpoint.url(&format!("datasets/{}", accession.as_str())),
            self.endpoint.timeout,
        ))
    }

    fn send(&self, request: &PageRequest) -> Result<RawPage, KiraError> {
        self.transport.get(request)
    }

    fn parse_project(
        &self,
        accession: &str,
        page: &RawPage,
    ) -> Result<ProjectMetadata, KiraError> {
        let body = match &page.body {
            Some(body @ Value::Object(_)) => body,
            _ => {
                return Err(malformed(
                    self.database(),
                    format!("dataset {accession} is not a JSON object"),
                ));
            }
        };

        let mut organisms = BTreeSet::new();
        if let Some(species) = body.get("species") {
            taxonomy_ids(species, &mut organisms);
        }

        let reported = json_string(body.get("accession"))
            .or_else(|| json_string(body.pointer("/accession/value")));

        Ok(ProjectMetadata {
            accession: reported.unwrap_or_else(|| accession.to_string()),
            title: json_string(body.get("title")),
            summary: json_string(body.get("summary")),
            organisms,
            raw: body.clone(),
        })
    }
}
