//! Universal Spectrum Identifier parsing.
//!
//! A USI has the shape `mzspec:<collection>:<run>:<index-type>:<index>:<interpretation>`.
//! The run name and the index are kept together as `run_index` since repositories
//! disagree on whether the run part is present at all.

use std::fmt;
use std::str::FromStr;
use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::domain::is_proteomexchange_token;
use crate::error::KiraError;

const PREFIX: &str = "mzspec:";

static INDEX_TOKEN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?:index|scan|trace|nativeId):\d+").expect("static USI index pattern")
});

static MODIFICATION: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\[.*?\]").expect("static modification pattern"));

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Usi {
    pub collection: String,
    pub run_index: String,
    pub interpretation: String,
}

impl fmt::Display for Usi {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{PREFIX}{}:{}:{}",
            self.collection, self.run_index, self.interpretation
        )
    }
}

impl FromStr for Usi {
    type Err = KiraError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        parse_usi(value)
    }
}

pub fn parse_usi(value: &str) -> Result<Usi, KiraError> {
    let malformed = || KiraError::MalformedUsi(value.to_string());

    let rest = value.strip_prefix(PREFIX).ok_or_else(malformed)?;
    let (collection, _) = rest.split_once(':').ok_or_else(malformed)?;
    if collection.chars().any(char::is_whitespace) {
        return Err(malformed());
    }

    let run_start = PREFIX.len() + collection.len() + 1;
    let token = INDEX_TOKEN
        .find(&value[run_start..])
        .ok_or_else(malformed)?;
    let run_end = run_start + token.end();

    let interpretation = value
        .get(run_end..)
        .and_then(|tail| tail.strip_prefix(':'))
        .unwrap_or("");

    Ok(Usi {
        collection: collection.to_string(),
        run_index: value[run_start..run_end].to_string(),
        interpretation: interpretation.to_string(),
    })
}

/// The filter every evidence row passes before it can reach a project.
pub fn is_valid_usi(value: &str) -> bool {
    match parse_usi(value) {
        Ok(usi) => {
            is_proteomexchange_token(&usi.collection)
                && !usi.run_index.is_empty()
                && !usi.interpretation.is_empty()
        }
        Err(_) => false,
    }
}

/// Bare peptide sequence of an interpretation such as `LLE[+57.02]ADK/2`.
pub fn peptide_from_interpretation(interpretation: &str) -> String {
    let without_charge = match interpretation.rfind('/') {
        Some(pos) => &interpretation[..pos],
        None => interpretation,
    };
    MODIFICATION
        .replace_all(without_charge, "")
        .chars()
        .filter(|ch| ch.is_ascii_alphabetic())
        .collect::<String>()
        .to_ascii_uppercase()
}

/// A raw (peptide, usi) pair straight from an adapter, not yet validated.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EvidenceCandidate {
    pub peptide: String,
    pub usi: String,
}

impl EvidenceCandidate {
    pub fn new(peptide: impl Into<String>, usi: impl Into<String>) -> Self {
        Self {
            peptide: peptide.into(),
            usi: usi.into(),
        }
    }
}

/// One peptide-spectrum match tied to its project. Only constructible from a valid USI,
/// so the project accession always agrees with the identifier.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct EvidenceRow {
    peptide: String,
    usi: String,
    project_accession: String,
    run_index: String,
    interpretation: String,
}

impl EvidenceRow {
    pub fn from_usi(peptide: &str, usi: &str) -> Result<Self, KiraError> {
        if !is_valid_usi(usi) {
            return Err(KiraError::MalformedUsi(usi.to_string()));
        }
        let parsed = parse_usi(usi)?;
        Ok(Self {
            peptide: peptide.to_string(),
            usi: usi.to_string(),
            project_accession: parsed.collection,
            run_index: parsed.run_index,
            interpretation: parsed.interpretation,
        })
    }

    /// Keeps only candidates carrying a valid USI, dropping the rest silently.
    pub fn from_candidates(candidates: Vec<EvidenceCandidate>) -> Vec<Self> {
        candidates
            .into_iter()
            .filter_map(|candidate| Self::from_usi(&candidate.peptide, &candidate.usi).ok())
            .collect()
    }

    pub fn peptide(&self) -> &str {
        &self.peptide
    }

    pub fn usi(&self) -> &str {
        &self.usi
    }

    pub fn project_accession(&self) -> &str {
        &self.project_accession
    }

    pub fn run_index(&self) -> &str {
        &self.run_index
    }

    pub fn interpretation(&self) -> &str {
        &self.interpretation
    }
}
