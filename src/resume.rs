//! Append-only journal of resolved peptides, one file per task.
//!
//! Each line is `TAG\tPEPTIDE\tUSI`, with the literal `None` standing for a
//! peptide the repository had no evidence for.

use std::collections::BTreeMap;
use std::fs::{File, OpenOptions};
use std::io::Write;
use std::sync::Mutex;

use camino::{Utf8Path, Utf8PathBuf};

use crate::error::KiraError;

const NO_EVIDENCE: &str = "None";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResumeEntry {
    pub source_tag: String,
    pub peptide: String,
    pub usi: Option<String>,
}

impl ResumeEntry {
    fn parse(line: &str) -> Option<Self> {
        let mut fields = line.splitn(3, '\t');
        let source_tag = fields.next()?.trim();
        let peptide = fields.next()?.trim();
        let usi = fields.next()?.trim();
        if source_tag.is_empty() || peptide.is_empty() {
            return None;
        }
        Some(Self {
            source_tag: source_tag.to_string(),
            peptide: peptide.to_string(),
            usi: (usi != NO_EVIDENCE && !usi.is_empty()).then(|| usi.to_string()),
        })
    }

    fn to_line(&self) -> String {
        format!(
            "{}\t{}\t{}\n",
            self.source_tag,
            self.peptide,
            self.usi.as_deref().unwrap_or(NO_EVIDENCE)
        )
    }
}

/// Entries of one journal grouped by source tag.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ResumeLog {
    entries: BTreeMap<String, Vec<ResumeEntry>>,
}

impl ResumeLog {
    pub fn partition(&self, tag: &str) -> &[ResumeEntry] {
        self.entries.get(tag).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn len(&self) -> usize {
        self.entries.values().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Where a mapper records each resolved peptide.
pub trait ResumeJournal: Sync {
    /// Records every USI found for `peptide` in one durable write. An empty
    /// `usis` records that the peptide had no evidence.
    fn record(&self, tag: &str, peptide: &str, usis: &[String]) -> Result<(), KiraError>;
}

pub struct ResumeStore {
    path: Utf8PathBuf,
    file: Mutex<Option<File>>,
}

impl ResumeStore {
    pub fn open(path: impl Into<Utf8PathBuf>) -> Self {
        Self {
            path: path.into(),
            file: Mutex::new(None),
        }
    }

    pub fn path(&self) -> &Utf8Path {
        &self.path
    }

    /// Reads the journal. A missing file is an empty log; unparseable lines are skipped.
    pub fn load(&self) -> Result<ResumeLog, KiraError> {
        if !self.path.exists() {
            return Ok(ResumeLog::default());
        }
        let content = std::fs::read_to_string(self.path.as_std_path())
            .map_err(|err| KiraError::Filesystem(format!("read {}: {err}", self.path)))?;

        let mut log = ResumeLog::default();
        for (number, line) in content.lines().enumerate() {
            if line.trim().is_empty() {
                continue;
            }
            match ResumeEntry::parse(line) {
                Some(entry) => log
                    .entries
                    .entry(entry.source_tag.clone())
                    .or_default()
                    .push(entry),
                None => tracing::warn!("skipping resume line {} in {}", number + 1, self.path),
            }
        }
        Ok(log)
    }

    fn write_entries(&self, entries: &[ResumeEntry]) -> Result<(), KiraError> {
        let buffer = entries.iter().map(ResumeEntry::to_line).collect::<String>();
        let mut guard = self
            .file
            .lock()
            .map_err(|_| KiraError::Filesystem(format!("resume journal {} poisoned", self.path)))?;
        if guard.is_none() {
            if let Some(parent) = self.path.parent() {
                std::fs::create_dir_all(parent.as_std_path())
                    .map_err(|err| KiraError::Filesystem(format!("create {parent}: {err}")))?;
            }
            let file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(self.path.as_std_path())
                .map_err(|err| KiraError::Filesystem(format!("open {}: {err}", self.path)))?;
            *guard = Some(file);
        }
        let Some(file) = guard.as_mut() else {
            return Err(KiraError::Filesystem(format!("open {}", self.path)));
        };
        file.write_all(buffer.as_bytes())
            .and_then(|()| file.sync_data())
            .map_err(|err| KiraError::Filesystem(format!("append {}: {err}", self.path)))
    }
}

impl ResumeJournal for ResumeStore {
    fn record(&self, tag: &str, peptide: &str, usis: &[String]) -> Result<(), KiraError> {
        let entries = if usis.is_empty() {
            vec![ResumeEntry {
                source_tag: tag.to_string(),
                peptide: peptide.to_string(),
                usi: None,
            }]
        } else {
            usis.iter()
                .map(|usi| ResumeEntry {
                    source_tag: tag.to_string(),
                    peptide: peptide.to_string(),
                    usi: Some(usi.clone()),
                })
                .collect()
        };
        self.write_entries(&entries)
    }
}
