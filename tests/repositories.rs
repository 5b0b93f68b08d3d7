use std::sync::Arc;

use assert_matches::assert_matches;
use camino::Utf8PathBuf;
use serde_json::json;

use kira_evidence_mapper::config::{QueryConfig, RunSettings};
use kira_evidence_mapper::domain::{Database, Organism};
use kira_evidence_mapper::error::KiraError;
use kira_evidence_mapper::progress::{ProgressEvent, ProgressSink};
use kira_evidence_mapper::providers::proxi::{IPROX_BASE_URL, MASSIVE_BASE_URL};
use kira_evidence_mapper::store::Store;
use kira_evidence_mapper::task::{TaskCoordinator, TaskState};
use kira_evidence_mapper::transport::{PageRequest, RawPage, Transport};

const PEPTIDE: &str = "TCVADESAENCDK";

struct Quiet;

impl ProgressSink for Quiet {
    fn event(&self, _event: ProgressEvent) {}
}

/// Each repository reports the peptide in its own human project: PRIDE in
/// PXD000001, iProX in PXD000002, MassIVE in PXD000003. Peptide searches
/// against `down` fail with a connection error.
struct Repositories {
    down: Option<Database>,
}

fn database_of(url: &str) -> Database {
    if url.starts_with(IPROX_BASE_URL) {
        Database::Iprox
    } else if url.starts_with(MASSIVE_BASE_URL) {
        Database::Massive
    } else {
        Database::Pride
    }
}

fn project_of(database: Database) -> &'static str {
    match database {
        Database::Pride => "PXD000001",
        Database::Iprox => "PXD000002",
        Database::Massive => "PXD000003",
    }
}

fn usi(database: Database) -> String {
    format!("mzspec:{}:index:5:{PEPTIDE}/2", project_of(database))
}

impl Transport for Repositories {
    fn get(&self, request: &PageRequest) -> Result<RawPage, KiraError> {
        let database = database_of(&request.url);
        let project = project_of(database);
        let url = request.url.as_str();
        let body = match database {
            Database::Pride if url.ends_with("/projects/PXD000001") => json!({
                "accession": project,
                "title": "PRIDE project",
                "organisms": [{"accession": "9606"}]
            }),
            Database::Pride if url.ends_with("/spectra") && request.param("page") == Some("0") => {
                json!({"_embedded": {"spectraevidences": [
                    {"peptideSequence": PEPTIDE, "usi": usi(database)}
                ]}})
            }
            Database::Pride => json!({"_links": {}}),
            _ if url.ends_with(&format!("/datasets/{project}")) => json!({
                "accession": project,
                "title": format!("{database} dataset"),
                "summary": "HeLa",
                "species": [[{"accession": "MS:1001467", "name": "9606"}]]
            }),
            _ if url.ends_with("/spectra") && request.param("pageNumber") == Some("1") => {
                json!([{"usi": usi(database)}])
            }
            _ => json!([]),
        };
        if url.ends_with("/spectra") && self.down == Some(database) {
            return Err(KiraError::Http("connection refused".to_string()));
        }
        Ok(RawPage::ok(request.full_url(), body))
    }
}

fn temp_store() -> (tempfile::TempDir, Store) {
    let temp = tempfile::tempdir().unwrap();
    let root = Utf8PathBuf::from_path_buf(temp.path().to_path_buf()).unwrap();
    let store = Store::new_with_root(root);
    store.init().unwrap();
    (temp, store)
}

fn parallel_settings() -> RunSettings {
    RunSettings {
        parallel: true,
        ..RunSettings::immediate(Database::ALL.to_vec())
    }
}

fn query() -> QueryConfig {
    QueryConfig::new(
        "P23950".parse().unwrap(),
        vec![PEPTIDE.to_string()],
        Organism::new("Homo sapiens", "9606"),
    )
    .unwrap()
}

fn journal_lines(store: &Store, task: &str) -> Vec<String> {
    let content = std::fs::read_to_string(store.resume_path(task)).unwrap();
    let mut lines = content.lines().map(str::to_string).collect::<Vec<_>>();
    lines.sort();
    lines
}

#[test]
fn parallel_mappers_report_every_repository() {
    let (_temp, store) = temp_store();
    let mut task = TaskCoordinator::new(
        store.clone(),
        query(),
        parallel_settings(),
        Arc::new(Repositories { down: None }),
        Some("all".to_string()),
    )
    .unwrap();

    let report = task.run(&Quiet).unwrap();

    assert_eq!(report.state, TaskState::Success);
    assert_eq!(report.mappers.len(), 3);
    for database in Database::ALL {
        let projects = &report.results[database.display_name()];
        assert_eq!(
            projects.keys().collect::<Vec<_>>(),
            vec![project_of(database)],
            "{database}"
        );
        assert_eq!(projects[project_of(database)].peptide, vec![usi(database)]);
    }
    assert_eq!(
        journal_lines(&store, "all"),
        vec![
            format!("MassIVE_peptide\t{PEPTIDE}\t{}", usi(Database::Massive)),
            format!("PRIDE_peptide\t{PEPTIDE}\t{}", usi(Database::Pride)),
            format!("iProX_peptide\t{PEPTIDE}\t{}", usi(Database::Iprox)),
        ]
    );
}

#[test]
fn one_failing_mapper_fails_the_task_but_keeps_the_others_journal() {
    let (_temp, store) = temp_store();
    let mut task = TaskCoordinator::new(
        store.clone(),
        query(),
        parallel_settings(),
        Arc::new(Repositories {
            down: Some(Database::Massive),
        }),
        Some("partial".to_string()),
    )
    .unwrap();

    assert_matches!(task.run(&Quiet), Err(KiraError::TaskRunning { .. }));
    assert_eq!(task.state(), TaskState::Error);
    assert_eq!(store.read_registry().unwrap()["partial"].state, TaskState::Error);
    assert_eq!(
        journal_lines(&store, "partial"),
        vec![
            format!("PRIDE_peptide\t{PEPTIDE}\t{}", usi(Database::Pride)),
            format!("iProX_peptide\t{PEPTIDE}\t{}", usi(Database::Iprox)),
        ]
    );
}
