use std::collections::BTreeSet;
use std::sync::Arc;

use serde_json::Value;

use crate::domain::{Database, ProjectAccession, ProteinAccession, QueryKind, normalize_peptide};
use crate::error::KiraError;
use crate::providers::{
    ProjectAdapter, ProjectMetadata, SourceAdapter, SourceEndpoint, json_string, malformed,
    step_cursor,
};
use crate::transport::{PageRequest, RawPage, Transport, split_url};
use crate::usi::EvidenceCandidate;

pub const PRIDE_BASE_URL: &str = "https://www.ebi.ac.uk/pride/ws/archive/v2";

const PAGE_PARAM: &str = "page";

/// Follows `_links.self.href` of a probe response so the request carries the
/// paging parameters the archive filled in.
fn discover_self_link(
    transport: &dyn Transport,
    mut request: PageRequest,
) -> Result<PageRequest, KiraError> {
    match transport.get(&request) {
        Ok(page) if page.is_success() => {
            let href = page
                .body
                .as_ref()
                .and_then(|body| body.pointer("/_links/self/href"))
                .and_then(Value::as_str);
            if let Some(href) = href {
                match request.adopt_url(href) {
                    Ok(()) => tracing::debug!(url = %request.full_url(), "PRIDE defaults"),
                    Err(err) => tracing::debug!("ignoring PRIDE self link: {err}"),
                }
            }
        }
        Ok(page) => tracing::debug!(status = page.status, "PRIDE discovery skipped"),
        Err(err) if err.is_transient() => return Err(err),
        Err(err) => tracing::debug!("PRIDE discovery failed: {err}"),
    }
    if request.param(PAGE_PARAM).is_none() {
        request.set_param(PAGE_PARAM, "0");
    }
    Ok(request)
}

fn embedded<'a>(page: &'a RawPage, container: &str) -> Option<&'a Vec<Value>> {
    page.body
        .as_ref()?
        .get("_embedded")?
        .get(container)?
        .as_array()
}

pub struct PridePeptideAdapter {
    endpoint: SourceEndpoint,
    transport: Arc<dyn Transport>,
}

impl PridePeptideAdapter {
    const CONTAINER: &'static str = "spectraevidences";

    pub fn new(endpoint: SourceEndpoint, transport: Arc<dyn Transport>) -> Self {
        Self {
            endpoint,
            transport,
        }
    }
}

impl SourceAdapter for PridePeptideAdapter {
    fn database(&self) -> Database {
        self.endpoint.database
    }

    fn kind(&self) -> QueryKind {
        QueryKind::Peptide
    }

    fn build_request(&self, word: &str) -> Result<PageRequest, KiraError> {
        let peptide = normalize_peptide(word)?;
        Ok(
            PageRequest::new(self.endpoint.url("spectra"), self.endpoint.peptide_timeout)
                .with_param("peptideSequence", peptide)
                .with_param(PAGE_PARAM, "0")
                .with_param("pageSize", self.endpoint.page_size.to_string()),
        )
    }

    fn discover_defaults(&self, request: PageRequest) -> Result<PageRequest, KiraError> {
        discover_self_link(self.transport.as_ref(), request)
    }

    fn send(&self, request: &PageRequest) -> Result<RawPage, KiraError> {
        self.transport.get(request)
    }

    fn is_last_page(&self, page: &RawPage) -> bool {
        embedded(page, Self::CONTAINER).is_none()
    }

    fn extract_rows(
        &self,
        word: &str,
        page: &RawPage,
    ) -> Result<Vec<EvidenceCandidate>, KiraError> {
        let items = embedded(page, Self::CONTAINER)
            .ok_or_else(|| malformed(self.database(), "spectraevidences is not a list"))?;
        Ok(items
            .iter()
            .filter_map(|item| {
                let usi = item.get("usi").and_then(Value::as_str)?;
                let peptide = item
                    .get("peptideSequence")
                    .and_then(Value::as_str)
                    .unwrap_or(word);
                Some(EvidenceCandidate::new(peptide, usi))
            })
            .collect())
    }

    fn advance(&self, request: &mut PageRequest) -> Result<(), KiraError> {
        step_cursor(self.database(), request, PAGE_PARAM, 0)
    }
}

pub struct PrideProteinAdapter {
    endpoint: SourceEndpoint,
    transport: Arc<dyn Transport>,
}

impl PrideProteinAdapter {
    const CONTAINER: &'static str = "peptideevidences";

    pub fn new(endpoint: SourceEndpoint, transport: Arc<dyn Transport>) -> Self {
        Self {
            endpoint,
            transport,
        }
    }
}

impl SourceAdapter for PrideProteinAdapter {
    fn database(&self) -> Database {
        self.endpoint.database
    }

    fn kind(&self) -> QueryKind {
        QueryKind::Protein
    }

    fn build_request(&self, word: &str) -> Result<PageRequest, KiraError> {
        let accession: ProteinAccession = word.parse()?;
        Ok(
            PageRequest::new(self.endpoint.url("peptideevidences"), self.endpoint.timeout)
                .with_param("proteinAccession", accession.as_str())
                .with_param(PAGE_PARAM, "0")
                .with_param("pageSize", self.endpoint.page_size.to_string()),
        )
    }

    fn discover_defaults(&self, request: PageRequest) -> Result<PageRequest, KiraError> {
        discover_self_link(self.transport.as_ref(), request)
    }

    fn send(&self, request: &PageRequest) -> Result<RawPage, KiraError> {
        self.transport.get(request)
    }

    fn is_last_page(&self, page: &RawPage) -> bool {
        embedded(page, Self::CONTAINER).is_none()
    }

    /// The USI of a peptide evidence only appears inside its `psms` link.
    fn extract_rows(
        &self,
        _word: &str,
        page: &RawPage,
    ) -> Result<Vec<EvidenceCandidate>, KiraError> {
        let items = embedded(page, Self::CONTAINER)
            .ok_or_else(|| malformed(self.database(), "peptideevidences is not a list"))?;
        Ok(items
            .iter()
            .filter_map(|item| {
                let peptide = item.get("peptideSequence").and_then(Value::as_str)?;
                let href = item.pointer("/_links/psms/href").and_then(Value::as_str)?;
                let (_, params) = split_url(href).ok()?;
                let usi = params
                    .into_iter()
                    .find(|(key, _)| key == "usi")
                    .map(|(_, value)| value)?;
                Some(EvidenceCandidate::new(peptide, usi))
            })
            .collect())
    }

    fn advance(&self, request: &mut PageRequest) -> Result<(), KiraError> {
        step_cursor(self.database(), request, PAGE_PARAM, 0)
    }
}

pub struct PrideProjectAdapter {
    endpoint: SourceEndpoint,
    transport: Arc<dyn Transport>,
}

impl PrideProjectAdapter {
    pub fn new(endpoint: SourceEndpoint, transport: Arc<dyn Transport>) -> Self {
        Self {
            endpoint,
            transport,
        }
    }
}

impl ProjectAdapter for PrideProjectAdapter {
    fn database(&self) -> Database {
        self.endpoint.database
    }

    fn build_request(&self, accession: &str) -> Result<PageRequest, KiraError> {
        let accession: ProjectAccession = accession.parse()?;
        Ok(PageRequest::new(
            self.endpoint.url(&format!("projects/{}", accession.as_str())),
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
                    format!("project {accession} is not a JSON object"),
                ));
            }
        };

        let organisms = body
            .get("organisms")
            .and_then(Value::as_array)
            .map(|items| {
                items
                    .iter()
                    .filter_map(|item| json_string(item.get("accession")))
                    .collect::<BTreeSet<_>>()
            })
            .unwrap_or_default();

        Ok(ProjectMetadata {
            accession: json_string(body.get("accession")).unwrap_or_else(|| accession.to_string()),
            title: json_string(body.get("title")),
            summary: json_string(body.get("projectDescription")),
            organisms,
            raw: body.clone(),
        })
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;
    use std::time::Duration;

    use assert_matches::assert_matches;
    use serde_json::json;

    use super::*;

    /// Answers every request with the same page and remembers the URLs asked for.
    struct FixedTransport {
        page: RawPage,
        seen: Mutex<Vec<String>>,
    }

    impl Transport for FixedTransport {
        fn get(&self, request: &PageRequest) -> Result<RawPage, KiraError> {
            self.seen.lock().unwrap().push(request.full_url());
            Ok(self.page.clone())
        }
    }

    fn endpoint() -> SourceEndpoint {
        SourceEndpoint::new(Database::Pride, PRIDE_BASE_URL)
    }

    fn fixed(body: Value) -> Arc<FixedTransport> {
        Arc::new(FixedTransport {
            page: RawPage::ok("https://stub", body),
            seen: Mutex::new(Vec::new()),
        })
    }

    #[test]
    fn peptide_rows_come_from_spectra_evidences() {
        let adapter = PridePeptideAdapter::new(endpoint(), fixed(json!({})));
        let page = RawPage::ok(
            "https://stub",
            json!({"_embedded": {"spectraevidences": [
                {"peptideSequence": "TCVADESAENCDK", "usi": "mzspec:PXD000001:run:scan:2:TCVADESAENCDK/2"},
                {"peptideSequence": "TCVADESAENCDK"}
            ]}}),
        );
        assert!(!adapter.is_last_page(&page));
        let rows = adapter.extract_rows("TCVADESAENCDK", &page).unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].usi, "mzspec:PXD000001:run:scan:2:TCVADESAENCDK/2");

        let end = RawPage::ok("https://stub", json!({"_links": {}, "page": {"number": 3}}));
        assert!(adapter.is_last_page(&end));
    }

    #[test]
    fn peptide_request_rejects_non_letters() {
        let adapter = PridePeptideAdapter::new(endpoint(), fixed(json!({})));
        assert_matches!(adapter.build_request("PEP1"), Err(KiraError::InvalidPeptide(_)));
        let request = adapter.build_request("tcvadesaencdk").unwrap();
        assert_eq!(request.param("peptideSequence"), Some("TCVADESAENCDK"));
        assert_eq!(request.param("pageSize"), Some("200"));
    }

    #[test]
    fn discovery_adopts_self_link() {
        let transport = fixed(json!({"_links": {"self": {"href":
            "https://www.ebi.ac.uk/pride/ws/archive/v2/spectra?peptideSequence=AAA&page=0&pageSize=100&sortDirection=DESC"}}}));
        let adapter = PridePeptideAdapter::new(endpoint(), transport.clone());
        let request = adapter.build_request("AAA").unwrap();
        let request = adapter.discover_defaults(request).unwrap();
        assert_eq!(request.param("sortDirection"), Some("DESC"));
        assert_eq!(request.param("pageSize"), Some("100"));
        assert_eq!(transport.seen.lock().unwrap().len(), 1);
    }

    #[test]
    fn discovery_without_link_keeps_defaults() {
        let adapter = PridePeptideAdapter::new(endpoint(), fixed(json!({"message": "nope"})));
        let request = adapter.build_request("AAA").unwrap();
        let discovered = adapter.discover_defaults(request.clone()).unwrap();
        assert_eq!(discovered, request);
    }

    #[test]
    fn protein_usi_is_read_from_psms_link() {
        let adapter = PrideProteinAdapter::new(endpoint(), fixed(json!({})));
        let page = RawPage::ok(
            "https://stub",
            json!({"_embedded": {"peptideevidences": [{
                "peptideSequence": "LLEQR",
                "_links": {"psms": {"href":
                    "https://www.ebi.ac.uk/pride/ws/archive/v2/spectra?usi=mzspec%3APXD000002%3Arun%3Ascan%3A7%3ALLEQR%2F2"}}
            }]}}),
        );
        let rows = adapter.extract_rows("P23950", &page).unwrap();
        assert_eq!(rows[0].peptide, "LLEQR");
        assert_eq!(rows[0].usi, "mzspec:PXD000002:run:scan:7:LLEQR/2");
    }

    #[test]
    fn protein_request_validates_accession() {
        let adapter = PrideProteinAdapter::new(endpoint(), fixed(json!({})));
        assert_matches!(adapter.build_request("NOTANACC"), Err(KiraError::InvalidAccession(_)));
        let request = adapter.build_request("P23950").unwrap();
        assert!(request.url.ends_with("/peptideevidences"));
        assert_eq!(request.timeout, Duration::from_secs(120));
    }

    #[test]
    fn project_record_lists_organism_accessions() {
        let adapter = PrideProjectAdapter::new(endpoint(), fixed(json!({})));
        let page = RawPage::ok(
            "https://stub",
            json!({
                "accession": "PXD000001",
                "title": "TMT spikes",
                "projectDescription": "Expected reporter ion ratios",
                "organisms": [{"name": "Homo sapiens (Human)", "accession": "9606"}]
            }),
        );
        let metadata = adapter.parse_project("PXD000001", &page).unwrap();
        assert_eq!(metadata.title.as_deref(), Some("TMT spikes"));
        assert!(metadata.organisms.contains("9606"));

        assert_matches!(
            adapter.build_request("MSV000079843"),
            Err(KiraError::InvalidProjectAccession(_))
        );
    }
}
