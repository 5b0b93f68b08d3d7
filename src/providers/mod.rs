//! Repository adapters.
//!
//! Each (database, query kind) pair is one adapter. Evidence adapters
//! ([`SourceAdapter`]) page through peptide or protein results; project adapters
//! ([`ProjectAdapter`]) fetch one dataset record per accession. Per-database
//! settings travel in a [`SourceEndpoint`] handed to every constructor.

pub mod pride;
pub mod proxi;
pub mod registry;

use std::collections::BTreeSet;
use std::time::{Duration, Instant};

use rand::Rng;
use serde::Serialize;
use serde_json::Value;

use crate::domain::{Database, QueryKind};
use crate::error::KiraError;
use crate::progress::{ProgressEvent, ProgressSink};
use crate::transport::{PageRequest, RawPage};
use crate::usi::EvidenceCandidate;

/// Connection settings shared by all adapters of one database.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceEndpoint {
    pub database: Database,
    pub base_url: String,
    pub page_size: u32,
    pub peptide_timeout: Duration,
    pub timeout: Duration,
}

impl SourceEndpoint {
    pub fn new(database: Database, base_url: impl Into<String>) -> Self {
        Self {
            database,
            base_url: base_url.into(),
            page_size: 200,
            peptide_timeout: Duration::from_secs(60),
            timeout: Duration::from_secs(120),
        }
    }

    pub fn url(&self, path: &str) -> String {
        format!("{}/{}", self.base_url.trim_end_matches('/'), path)
    }
}

pub trait SourceAdapter: Send + Sync {
    fn database(&self) -> Database;

    fn kind(&self) -> QueryKind;

    /// Validates `word` and builds the first page request. No network.
    fn build_request(&self, word: &str) -> Result<PageRequest, KiraError>;

    fn send(&self, request: &PageRequest) -> Result<RawPage, KiraError>;

    fn is_last_page(&self, page: &RawPage) -> bool;

    fn extract_rows(&self, word: &str, page: &RawPage)
    -> Result<Vec<EvidenceCandidate>, KiraError>;

    /// Moves the page cursor forward.
    fn advance(&self, request: &mut PageRequest) -> Result<(), KiraError>;

    /// Learns server-assigned defaults before the first real page.
    fn discover_defaults(&self, request: PageRequest) -> Result<PageRequest, KiraError> {
        Ok(request)
    }
}

/// Dataset record as returned by one repository.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProjectMetadata {
    pub accession: String,
    pub title: Option<String>,
    pub summary: Option<String>,
    /// Taxonomy accessions the repository lists for the dataset.
    pub organisms: BTreeSet<String>,
    pub raw: Value,
}

pub trait ProjectAdapter: Send + Sync {
    fn database(&self) -> Database;

    /// Fails with `InvalidProjectAccession` for anything that is not a ProteomeXchange id.
    fn build_request(&self, accession: &str) -> Result<PageRequest, KiraError>;

    fn send(&self, request: &PageRequest) -> Result<RawPage, KiraError>;

    fn parse_project(&self, accession: &str, page: &RawPage)
    -> Result<ProjectMetadata, KiraError>;
}

/// Sleep inserted between successive requests to the same repository.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Courtesy {
    pub delay: Duration,
}

impl Courtesy {
    pub fn new(delay: Duration) -> Self {
        Self { delay }
    }

    /// Sleeps `delay` plus up to `delay` of random jitter.
    pub fn pause(&self) {
        let base = self.delay.as_millis() as u64;
        let jitter = if base == 0 {
            0
        } else {
            rand::thread_rng().gen_range(0..=base)
        };
        std::thread::sleep(Duration::from_millis(base + jitter));
    }
}

impl Default for Courtesy {
    fn default() -> Self {
        Self::new(Duration::from_millis(300))
    }
}

/// Fetches every page for `word` and returns the raw candidates, in page order.
pub fn fetch_pages(
    adapter: &dyn SourceAdapter,
    word: &str,
    courtesy: &Courtesy,
    sink: &dyn ProgressSink,
) -> Result<Vec<EvidenceCandidate>, KiraError> {
    let request = adapter.build_request(word)?;
    let mut request = adapter.discover_defaults(request)?;
    let mut rows = Vec::new();
    let mut pages = 0usize;
    let start = Instant::now();

    loop {
        let page = adapter.send(&request)?;
        if !page.is_success() {
            return Err(upstream_error(adapter.database(), &request, &page));
        }
        if adapter.is_last_page(&page) {
            break;
        }
        rows.extend(adapter.extract_rows(word, &page)?);
        pages += 1;
        sink.event(ProgressEvent::new(format!(
            "{}.{} word={word} page={pages} completed",
            adapter.database(),
            adapter.kind()
        )));
        adapter.advance(&mut request)?;
        courtesy.pause();
    }

    sink.event(ProgressEvent::timed(
        format!(
            "{}.{} word={word} pages={pages} rows={}",
            adapter.database(),
            adapter.kind(),
            rows.len()
        ),
        start.elapsed(),
    ));
    Ok(rows)
}

/// One project request.
pub fn fetch_project(
    adapter: &dyn ProjectAdapter,
    accession: &str,
) -> Result<ProjectMetadata, KiraError> {
    let request = adapter.build_request(accession)?;
    let page = adapter.send(&request)?;
    if !page.is_success() {
        return Err(upstream_error(adapter.database(), &request, &page));
    }
    adapter.parse_project(accession, &page)
}

pub(crate) fn upstream_error(database: Database, request: &PageRequest, page: &RawPage) -> KiraError {
    KiraError::UpstreamStatus {
        source_name: database.display_name().to_string(),
        status: page.status,
        url: request.full_url(),
    }
}

pub(crate) fn malformed(database: Database, message: impl Into<String>) -> KiraError {
    KiraError::MalformedResponse {
        source_name: database.display_name().to_string(),
        message: message.into(),
    }
}

/// Increments an integer cursor parameter, starting from `start` when absent.
pub(crate) fn step_cursor(
    database: Database,
    request: &mut PageRequest,
    key: &str,
    start: u64,
) -> Result<(), KiraError> {
    let current = match request.param(key) {
        Some(value) => value
            .parse::<u64>()
            .map_err(|_| malformed(database, format!("{key}={value} is not a page number")))?,
        None => start,
    };
    request.set_param(key, (current + 1).to_string());
    Ok(())
}

pub(crate) fn json_string(value: Option<&Value>) -> Option<String> {
    match value? {
        Value::String(text) => Some(text.clone()),
        Value::Number(number) => Some(number.to_string()),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use serde_json::json;

    use super::*;

    struct NoopSink;

    impl ProgressSink for NoopSink {
        fn event(&self, _event: ProgressEvent) {}
    }

    /// Serves three pages of results and then a page without the results key.
    struct ThreePages {
        sent: Mutex<Vec<String>>,
    }

    impl SourceAdapter for ThreePages {
        fn database(&self) -> Database {
            Database::Pride
        }

        fn kind(&self) -> QueryKind {
            QueryKind::Peptide
        }

        fn build_request(&self, word: &str) -> Result<PageRequest, KiraError> {
            Ok(PageRequest::new("https://stub/spectra", Duration::from_secs(1))
                .with_param("peptideSequence", word)
                .with_param("page", "0"))
        }

        fn send(&self, request: &PageRequest) -> Result<RawPage, KiraError> {
            let page = request.param("page").unwrap_or("0").to_string();
            self.sent.lock().unwrap().push(page.clone());
            let body = if page.parse::<u32>().unwrap() < 3 {
                json!({"results": [{"usi": format!("mzspec:PXD00000{page}:index:1:PEPTIDE/2")}]})
            } else {
                json!({"_links": {}})
            };
            Ok(RawPage::ok(request.full_url(), body))
        }

        fn is_last_page(&self, page: &RawPage) -> bool {
            page.body.as_ref().and_then(|b| b.get("results")).is_none()
        }

        fn extract_rows(
            &self,
            word: &str,
            page: &RawPage,
        ) -> Result<Vec<EvidenceCandidate>, KiraError> {
            let items = page.body.as_ref().unwrap()["results"].as_array().unwrap();
            Ok(items
                .iter()
                .map(|item| EvidenceCandidate::new(word, item["usi"].as_str().unwrap()))
                .collect())
        }

        fn advance(&self, request: &mut PageRequest) -> Result<(), KiraError> {
            step_cursor(Database::Pride, request, "page", 0)
        }
    }

    #[test]
    fn pagination_stops_at_missing_container() {
        let adapter = ThreePages {
            sent: Mutex::new(Vec::new()),
        };
        let rows = fetch_pages(&adapter, "PEPTIDE", &Courtesy::new(Duration::ZERO), &NoopSink)
            .unwrap();
        assert_eq!(*adapter.sent.lock().unwrap(), vec!["0", "1", "2", "3"]);
        assert_eq!(rows.len(), 3);
        assert!(rows.iter().all(|row| !row.usi.contains("PXD000003")));
    }

    #[test]
    fn cursor_rejects_non_numeric_page() {
        let mut request =
            PageRequest::new("https://stub", Duration::from_secs(1)).with_param("page", "x");
        let err = step_cursor(Database::Pride, &mut request, "page", 0).unwrap_err();
        assert!(matches!(err, KiraError::MalformedResponse { .. }));
    }
}
