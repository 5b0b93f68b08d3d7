use std::sync::Arc;

use serde::Serialize;

use crate::config::RunSettings;
use crate::domain::{Database, QueryKind};
use crate::error::KiraError;
use crate::progress::{ProgressEvent, ProgressSink};
use crate::providers::registry::AdapterSet;
use crate::transport::{PageRequest, RawPage, Transport};

pub const SAMPLE_PEPTIDE: &str = "TCVADESAENCDK";
pub const SAMPLE_PROTEIN: &str = "P23950";
pub const SAMPLE_PROJECT: &str = "PXD000001";

#[derive(Debug, Clone, Serialize)]
pub struct EndpointStatus {
    pub kind: QueryKind,
    pub url: String,
    pub reachable: bool,
    pub attempts: u32,
    /// Last status code or error when unreachable.
    pub detail: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct SourceConnectivity {
    pub database: Database,
    pub endpoints: Vec<EndpointStatus>,
}

impl SourceConnectivity {
    pub fn is_reachable(&self) -> bool {
        self.endpoints.iter().all(|endpoint| endpoint.reachable)
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ConnectivityReport {
    pub sources: Vec<SourceConnectivity>,
}

impl ConnectivityReport {
    pub fn all_reachable(&self) -> bool {
        self.sources.iter().all(SourceConnectivity::is_reachable)
    }
}

/// Probes the peptide, protein and project endpoint of each repository with
/// known-good sample words.
pub struct Checker {
    pub threshold: u32,
}

impl Default for Checker {
    fn default() -> Self {
        Self { threshold: 3 }
    }
}

impl Checker {
    pub fn check(
        &self,
        settings: &RunSettings,
        transport: Arc<dyn Transport>,
        sink: &dyn ProgressSink,
    ) -> Result<ConnectivityReport, KiraError> {
        let mut sources = Vec::new();
        for database in &settings.databases {
            let adapters = AdapterSet::build(settings.endpoint(*database), Arc::clone(&transport));
            let probes = [
                (
                    QueryKind::Project,
                    adapters.project.build_request(SAMPLE_PROJECT)?,
                ),
                (
                    QueryKind::Protein,
                    adapters.protein.build_request(SAMPLE_PROTEIN)?,
                ),
                (
                    QueryKind::Peptide,
                    adapters.peptide.build_request(SAMPLE_PEPTIDE)?,
                ),
            ];
            let endpoints = probes
                .into_iter()
                .map(|(kind, request)| {
                    self.probe(*database, kind, &request, transport.as_ref(), sink)
                })
                .collect();
            sources.push(SourceConnectivity {
                database: *database,
                endpoints,
            });
        }
        Ok(ConnectivityReport { sources })
    }

    fn probe(
        &self,
        database: Database,
        kind: QueryKind,
        request: &PageRequest,
        transport: &dyn Transport,
        sink: &dyn ProgressSink,
    ) -> EndpointStatus {
        let threshold = self.threshold.max(1);
        let mut detail = None;
        for attempt in 1..=threshold {
            sink.event(ProgressEvent::new(format!(
                "phase=Check; {database} {kind} {attempt}/{threshold}"
            )));
            match transport.get(request) {
                Ok(page) if page.is_success() => {
                    return EndpointStatus {
                        kind,
                        url: request.full_url(),
                        reachable: true,
                        attempts: attempt,
                        detail: None,
                    };
                }
                Ok(RawPage { status, .. }) => detail = Some(format!("status {status}")),
                Err(err) => detail = Some(err.to_string()),
            }
        }
        tracing::warn!("{database} {kind} endpoint not reachable: {detail:?}");
        EndpointStatus {
            kind,
            url: request.full_url(),
            reachable: false,
            attempts: threshold,
            detail,
        }
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

    /// Project endpoints answer 200, everything else times out.
    struct HalfUp {
        calls: Mutex<u32>,
    }

    impl Transport for HalfUp {
        fn get(&self, request: &PageRequest) -> Result<RawPage, KiraError> {
            *self.calls.lock().unwrap() += 1;
            if request.url.contains(SAMPLE_PROJECT) {
                Ok(RawPage::ok(request.full_url(), json!({"accession": SAMPLE_PROJECT})))
            } else {
                Err(KiraError::TransientNetwork("timed out".to_string()))
            }
        }
    }

    #[test]
    fn unreachable_endpoints_use_full_threshold() {
        let transport = Arc::new(HalfUp {
            calls: Mutex::new(0),
        });
        let report = Checker::default()
            .check(
                &RunSettings::immediate(vec![Database::Pride]),
                transport.clone(),
                &NoopSink,
            )
            .unwrap();

        let pride = &report.sources[0];
        assert!(!pride.is_reachable());
        assert!(pride.endpoints[0].reachable);
        assert_eq!(pride.endpoints[0].attempts, 1);
        assert_eq!(pride.endpoints[1].attempts, 3);
        assert_eq!(*transport.calls.lock().unwrap(), 1 + 3 + 3);
    }
}
