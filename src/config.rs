use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::domain::{Database, Organism, ProteinAccession, normalize_peptide};
use crate::error::KiraError;
use crate::providers::registry::default_endpoint;
use crate::providers::{Courtesy, SourceEndpoint};
use crate::retry::RetryPolicy;

pub const DEFAULT_CONFIG_FILE: &str = "kira-em.json";

#[derive(Debug, Deserialize, Serialize)]
pub struct QueryFile {
    pub identifier: String,
    #[serde(default)]
    pub peptides: Vec<String>,
    /// Plain peptide list, resolved relative to the config file.
    #[serde(default)]
    pub peptide_file: Option<String>,
    pub organism: OrganismEntry,
    #[serde(default)]
    pub digestion: DigestionParams,
    #[serde(default)]
    pub proteome_source: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
}

#[derive(Debug, Deserialize, Serialize)]
#[serde(untagged)]
pub enum OrganismEntry {
    /// Bare taxonomy accession, e.g. `"9606"`.
    Shorthand(String),
    Detailed(OrganismObject),
}

#[derive(Debug, Deserialize, Serialize)]
pub struct OrganismObject {
    #[serde(default)]
    pub name: Option<String>,
    pub accession: String,
}

/// How the peptide list was produced. Recorded with the task, not interpreted.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize)]
pub struct DigestionParams {
    #[serde(default)]
    pub enzyme: Option<String>,
    #[serde(default)]
    pub missed_cleavages: Option<u32>,
    #[serde(default)]
    pub min_length: Option<u32>,
    #[serde(default)]
    pub max_length: Option<u32>,
}

/// The query every mapper of a task works on.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct QueryConfig {
    pub identifier: ProteinAccession,
    pub peptides: Vec<String>,
    pub organism: Organism,
    #[serde(default)]
    pub digestion: DigestionParams,
    #[serde(default)]
    pub proteome_source: Option<String>,
    #[serde(default)]
    pub description: String,
}

impl QueryConfig {
    /// Normalizes and deduplicates `peptides`, keeping first occurrences.
    pub fn new(
        identifier: ProteinAccession,
        peptides: impl IntoIterator<Item = String>,
        organism: Organism,
    ) -> Result<Self, KiraError> {
        Ok(Self {
            identifier,
            peptides: dedup_peptides(peptides)?,
            organism,
            digestion: DigestionParams::default(),
            proteome_source: None,
            description: String::new(),
        })
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }
}

fn dedup_peptides(peptides: impl IntoIterator<Item = String>) -> Result<Vec<String>, KiraError> {
    let mut seen = HashSet::new();
    let mut out = Vec::new();
    for peptide in peptides {
        let peptide = normalize_peptide(&peptide)?;
        if seen.insert(peptide.clone()) {
            out.push(peptide);
        }
    }
    Ok(out)
}

pub struct ConfigLoader;

impl ConfigLoader {
    pub fn resolve(path: Option<&str>) -> Result<QueryConfig, KiraError> {
        let config_path = match path {
            Some(path) => PathBuf::from(path),
            None => PathBuf::from(DEFAULT_CONFIG_FILE),
        };

        if path.is_none() && !config_path.exists() {
            return Err(KiraError::MissingConfig);
        }

        let content = fs::read_to_string(&config_path)
            .map_err(|_| KiraError::ConfigRead(config_path.clone()))?;
        let file: QueryFile = serde_json::from_str(&content)
            .map_err(|err| KiraError::ConfigParse(err.to_string()))?;

        let base = config_path.parent().unwrap_or_else(|| Path::new("."));
        Self::resolve_file(file, base)
    }

    pub fn resolve_file(file: QueryFile, base: &Path) -> Result<QueryConfig, KiraError> {
        let identifier: ProteinAccession = file.identifier.parse()?;

        let mut peptides = file.peptides;
        if let Some(list) = &file.peptide_file {
            peptides.extend(load_peptide_list(&base.join(list))?);
        }

        let organism = match file.organism {
            OrganismEntry::Shorthand(accession) => Organism::new("", accession.trim()),
            OrganismEntry::Detailed(obj) => {
                Organism::new(obj.name.unwrap_or_default(), obj.accession.trim())
            }
        };
        if organism.accession.is_empty() {
            return Err(KiraError::ConfigParse(
                "organism accession must not be empty".to_string(),
            ));
        }

        let mut config = QueryConfig::new(identifier, peptides, organism)?;
        config.digestion = file.digestion;
        config.proteome_source = file.proteome_source;
        config.description = file.description.unwrap_or_default();
        Ok(config)
    }
}

/// Reads one peptide per line; blank lines and `#` comments are ignored.
pub fn load_peptide_list(path: &Path) -> Result<Vec<String>, KiraError> {
    let content =
        fs::read_to_string(path).map_err(|_| KiraError::ConfigRead(path.to_path_buf()))?;
    let lines = content
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .map(str::to_string);
    dedup_peptides(lines)
}

/// Knobs for one run, shared by every mapper.
#[derive(Debug, Clone)]
pub struct RunSettings {
    pub retry: RetryPolicy,
    pub courtesy: Courtesy,
    pub page_size: u32,
    pub parallel: bool,
    pub databases: Vec<Database>,
}

impl Default for RunSettings {
    fn default() -> Self {
        Self {
            retry: RetryPolicy::default(),
            courtesy: Courtesy::default(),
            page_size: 200,
            parallel: false,
            databases: Database::ALL.to_vec(),
        }
    }
}

impl RunSettings {
    /// Settings for tests and offline stubs: no sleeping anywhere.
    pub fn immediate(databases: Vec<Database>) -> Self {
        Self {
            retry: RetryPolicy {
                max_attempts: 3,
                backoff: Duration::ZERO,
            },
            courtesy: Courtesy::new(Duration::ZERO),
            databases,
            ..Self::default()
        }
    }

    pub fn endpoint(&self, database: Database) -> SourceEndpoint {
        default_endpoint(database, self.page_size)
    }
}
