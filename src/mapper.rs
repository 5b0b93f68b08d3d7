use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::Arc;
use std::time::Instant;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::config::{QueryConfig, RunSettings};
use crate::domain::Database;
use crate::error::KiraError;
use crate::progress::{ProgressEvent, ProgressSink};
use crate::providers::registry::AdapterSet;
use crate::providers::{Courtesy, ProjectMetadata, fetch_pages, fetch_project};
use crate::resume::{ResumeEntry, ResumeJournal};
use crate::retry::{RetryOutcome, RetryPolicy, run_with_retry};
use crate::usi::EvidenceRow;

pub const WEBSITE_PREFIX: &str = "http://proteomecentral.proteomexchange.org/cgi/GetDataset?ID=";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum MapperState {
    Idle,
    FetchingPeptides,
    FetchingProtein,
    FetchingProjects,
    Filtering,
    Exported,
}

#[derive(Debug, Clone, Copy)]
pub struct MapperSettings {
    pub retry: RetryPolicy,
    pub courtesy: Courtesy,
}

impl From<&RunSettings> for MapperSettings {
    fn from(settings: &RunSettings) -> Self {
        Self {
            retry: settings.retry,
            courtesy: settings.courtesy,
        }
    }
}

/// What happened to one searched word.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum WordOutcome {
    Found { usis: usize },
    Empty,
    /// Taken from the resume journal without a request.
    Resumed { usis: usize },
    /// Retries exhausted or the repository refused; searched again on restart.
    Unresolved { reason: String },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WordReport {
    pub word: String,
    #[serde(flatten)]
    pub outcome: WordOutcome,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MapperReport {
    pub database: Database,
    pub peptides: Vec<WordReport>,
    pub protein: Option<WordReport>,
    pub projects_discovered: usize,
    pub projects_fetched: usize,
    pub projects_kept: usize,
    pub unresolved_projects: Vec<String>,
}

impl MapperReport {
    fn new(database: Database) -> Self {
        Self {
            database,
            peptides: Vec::new(),
            protein: None,
            projects_discovered: 0,
            projects_fetched: 0,
            projects_kept: 0,
            unresolved_projects: Vec::new(),
        }
    }

    pub fn unresolved_peptides(&self) -> Vec<&str> {
        self.peptides
            .iter()
            .filter(|report| matches!(report.outcome, WordOutcome::Unresolved { .. }))
            .map(|report| report.word.as_str())
            .collect()
    }

    pub fn resumed_count(&self) -> usize {
        self.peptides
            .iter()
            .filter(|report| matches!(report.outcome, WordOutcome::Resumed { .. }))
            .count()
    }
}

/// One project found through this repository, with the USIs that led to it.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProjectRecord {
    pub accession: String,
    pub metadata: ProjectMetadata,
    pub peptide_usis: Vec<String>,
    pub protein_usis: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProjectReport {
    pub accession: String,
    pub title: String,
    pub summary: String,
    pub website: String,
    pub peptide: Vec<String>,
    pub protein: Vec<String>,
    pub organisms: Vec<String>,
    #[serde(default)]
    pub metadata: Value,
}

impl From<&ProjectRecord> for ProjectReport {
    fn from(record: &ProjectRecord) -> Self {
        Self {
            accession: record.accession.clone(),
            title: record.metadata.title.clone().unwrap_or_default(),
            summary: record.metadata.summary.clone().unwrap_or_default(),
            website: format!("{WEBSITE_PREFIX}{}", record.accession),
            peptide: record.peptide_usis.clone(),
            protein: record.protein_usis.clone(),
            organisms: record.metadata.organisms.iter().cloned().collect(),
            metadata: record.metadata.raw.clone(),
        }
    }
}

/// Errors that end the search for one word but not the mapper.
fn is_word_level(err: &KiraError) -> bool {
    matches!(
        err,
        KiraError::UpstreamStatus { .. }
            | KiraError::InvalidPeptide(_)
            | KiraError::InvalidProjectAccession(_)
    )
}

/// Peptide, protein and project pipeline for one repository.
pub struct Mapper {
    config: Arc<QueryConfig>,
    adapters: AdapterSet,
    settings: MapperSettings,
    state: MapperState,
    peptides_done: bool,
    protein_done: bool,
    peptide_rows: Vec<EvidenceRow>,
    protein_rows: Vec<EvidenceRow>,
    projects: BTreeMap<String, ProjectRecord>,
    report: MapperReport,
}

impl Mapper {
    pub fn new(config: Arc<QueryConfig>, adapters: AdapterSet, settings: MapperSettings) -> Self {
        let database = adapters.database;
        Self {
            config,
            adapters,
            settings,
            state: MapperState::Idle,
            peptides_done: false,
            protein_done: false,
            peptide_rows: Vec::new(),
            protein_rows: Vec::new(),
            projects: BTreeMap::new(),
            report: MapperReport::new(database),
        }
    }

    pub fn database(&self) -> Database {
        self.adapters.database
    }

    pub fn state(&self) -> MapperState {
        self.state
    }

    pub fn report(&self) -> &MapperReport {
        &self.report
    }

    pub fn peptide_rows(&self) -> &[EvidenceRow] {
        &self.peptide_rows
    }

    pub fn protein_rows(&self) -> &[EvidenceRow] {
        &self.protein_rows
    }

    pub fn projects(&self) -> &BTreeMap<String, ProjectRecord> {
        &self.projects
    }

    fn transition(&mut self, next: MapperState) -> Result<(), KiraError> {
        use MapperState::*;
        let allowed = match (self.state, next) {
            (Idle, FetchingPeptides) | (Idle, FetchingProtein) => true,
            (FetchingPeptides, FetchingProtein) => !self.protein_done,
            (FetchingProtein, FetchingPeptides) => !self.peptides_done,
            (FetchingPeptides | FetchingProtein, FetchingProjects) => {
                self.peptides_done && self.protein_done
            }
            (FetchingProjects, Filtering) | (Filtering, Exported) => true,
            _ => false,
        };
        if !allowed {
            return Err(KiraError::InvalidTransition {
                from: format!("{:?}", self.state),
                to: format!("{next:?}"),
            });
        }
        self.state = next;
        Ok(())
    }

    /// Searches every configured peptide not already in `resumed`.
    ///
    /// Each resolved peptide is journaled before the next one is searched.
    /// Peptides whose search was exhausted or refused are not journaled.
    pub fn map_peptides(
        &mut self,
        resumed: &[ResumeEntry],
        journal: &dyn ResumeJournal,
        sink: &dyn ProgressSink,
    ) -> Result<(), KiraError> {
        self.transition(MapperState::FetchingPeptides)?;
        let database = self.database();
        let tag = database.resume_tag();

        let mut resumed_usis: HashMap<&str, usize> = HashMap::new();
        for entry in resumed.iter().filter(|entry| entry.source_tag == tag) {
            let count = resumed_usis.entry(entry.peptide.as_str()).or_default();
            if let Some(usi) = &entry.usi {
                match EvidenceRow::from_usi(&entry.peptide, usi) {
                    Ok(row) => {
                        self.peptide_rows.push(row);
                        *count += 1;
                    }
                    Err(err) => tracing::debug!("dropping resumed row: {err}"),
                }
            }
        }

        let config = Arc::clone(&self.config);
        let total = config.peptides.len();
        let start = Instant::now();
        for (index, peptide) in config.peptides.iter().enumerate() {
            if let Some(&usis) = resumed_usis.get(peptide.as_str()) {
                self.report.peptides.push(WordReport {
                    word: peptide.clone(),
                    outcome: WordOutcome::Resumed { usis },
                });
                continue;
            }

            let adapter = self.adapters.peptide.as_ref();
            let courtesy = self.settings.courtesy;
            let outcome = run_with_retry(&self.settings.retry, || {
                fetch_pages(adapter, peptide, &courtesy, sink)
            });
            let outcome = match outcome {
                Ok(RetryOutcome::Completed { value, .. }) => {
                    let rows = EvidenceRow::from_candidates(value);
                    let usis = rows.iter().map(|row| row.usi().to_string()).collect::<Vec<_>>();
                    journal.record(&tag, peptide, &usis)?;
                    self.peptide_rows.extend(rows);
                    if usis.is_empty() {
                        WordOutcome::Empty
                    } else {
                        WordOutcome::Found { usis: usis.len() }
                    }
                }
                Ok(RetryOutcome::Exhausted {
                    attempts,
                    last_error,
                }) => {
                    tracing::warn!("{database}: giving up on {peptide} after {attempts} attempts");
                    WordOutcome::Unresolved {
                        reason: last_error.to_string(),
                    }
                }
                Err(err) if is_word_level(&err) => {
                    tracing::warn!("{database}: skipping {peptide}: {err}");
                    WordOutcome::Unresolved {
                        reason: err.to_string(),
                    }
                }
                Err(err) => return Err(err),
            };
            self.report.peptides.push(WordReport {
                word: peptide.clone(),
                outcome,
            });
            sink.event(ProgressEvent::timed(
                format!("phase=Peptides; {database} {}/{total}", index + 1),
                start.elapsed(),
            ));
        }

        self.peptides_done = true;
        Ok(())
    }

    pub fn map_protein(&mut self, sink: &dyn ProgressSink) -> Result<(), KiraError> {
        self.transition(MapperState::FetchingProtein)?;
        let database = self.database();
        let accession = self.config.identifier.to_string();
        sink.event(ProgressEvent::new(format!(
            "phase=Protein; {database} {accession}"
        )));

        let adapter = self.adapters.protein.as_ref();
        let courtesy = self.settings.courtesy;
        let outcome = run_with_retry(&self.settings.retry, || {
            fetch_pages(adapter, &accession, &courtesy, sink)
        });
        let outcome = match outcome {
            Ok(RetryOutcome::Completed { value, .. }) => {
                let rows = EvidenceRow::from_candidates(value);
                let found = rows.len();
                self.protein_rows.extend(rows);
                if found == 0 {
                    WordOutcome::Empty
                } else {
                    WordOutcome::Found { usis: found }
                }
            }
            Ok(RetryOutcome::Exhausted { last_error, .. }) => {
                tracing::warn!("{database}: protein search for {accession} exhausted");
                WordOutcome::Unresolved {
                    reason: last_error.to_string(),
                }
            }
            Err(err) if is_word_level(&err) => {
                tracing::warn!("{database}: protein search for {accession} failed: {err}");
                WordOutcome::Unresolved {
                    reason: err.to_string(),
                }
            }
            Err(err) => return Err(err),
        };
        self.report.protein = Some(WordReport {
            word: accession,
            outcome,
        });
        self.protein_done = true;
        Ok(())
    }

    /// Fetches metadata for every project referenced by a peptide or protein row.
    pub fn map_projects(&mut self, sink: &dyn ProgressSink) -> Result<(), KiraError> {
        self.transition(MapperState::FetchingProjects)?;
        let database = self.database();

        let accessions = self
            .peptide_rows
            .iter()
            .chain(&self.protein_rows)
            .map(|row| row.project_accession().to_string())
            .collect::<BTreeSet<_>>();
        self.report.projects_discovered = accessions.len();

        let total = accessions.len();
        for (index, accession) in accessions.into_iter().enumerate() {
            if index > 0 {
                self.settings.courtesy.pause();
            }
            sink.event(ProgressEvent::new(format!(
                "phase=Projects; {database} {accession} {}/{total}",
                index + 1
            )));

            let adapter = self.adapters.project.as_ref();
            let outcome =
                run_with_retry(&self.settings.retry, || fetch_project(adapter, &accession));
            match outcome {
                Ok(RetryOutcome::Completed { value, .. }) => {
                    let record = ProjectRecord {
                        peptide_usis: usis_of(&self.peptide_rows, &accession),
                        protein_usis: usis_of(&self.protein_rows, &accession),
                        accession: accession.clone(),
                        metadata: value,
                    };
                    self.projects.insert(accession, record);
                    self.report.projects_fetched += 1;
                }
                Ok(RetryOutcome::Exhausted { .. }) => {
                    tracing::warn!("{database}: project {accession} unresolved after retries");
                    self.report.unresolved_projects.push(accession);
                }
                Err(err) if is_word_level(&err) => {
                    tracing::warn!("{database}: skipping project {accession}: {err}");
                    self.report.unresolved_projects.push(accession);
                }
                Err(err) => return Err(err),
            }
        }
        Ok(())
    }

    /// Drops projects that do not list the configured organism.
    pub fn filter(&mut self, sink: &dyn ProgressSink) -> Result<(), KiraError> {
        self.transition(MapperState::Filtering)?;
        let taxonomy = self.config.organism.accession.as_str();
        let before = self.projects.len();
        self.projects
            .retain(|_, record| record.metadata.organisms.contains(taxonomy));
        self.report.projects_kept = self.projects.len();
        sink.event(ProgressEvent::new(format!(
            "phase=Filter; {} kept {}/{before} for taxonomy {taxonomy}",
            self.database(),
            self.projects.len()
        )));
        Ok(())
    }

    pub fn export(&mut self) -> Result<BTreeMap<String, ProjectReport>, KiraError> {
        self.transition(MapperState::Exported)?;
        Ok(self
            .projects
            .iter()
            .map(|(accession, record)| (accession.clone(), ProjectReport::from(record)))
            .collect())
    }

    /// Peptides, protein, projects and filtering in order.
    pub fn run(
        &mut self,
        resumed: &[ResumeEntry],
        journal: &dyn ResumeJournal,
        sink: &dyn ProgressSink,
    ) -> Result<(), KiraError> {
        self.map_peptides(resumed, journal, sink)?;
        self.map_protein(sink)?;
        self.map_projects(sink)?;
        self.filter(sink)
    }
}

fn usis_of(rows: &[EvidenceRow], accession: &str) -> Vec<String> {
    rows.iter()
        .filter(|row| row.project_accession() == accession)
        .map(|row| row.usi().to_string())
        .collect::<BTreeSet<_>>()
        .into_iter()
        .collect()
}
