use std::fmt;
use std::str::FromStr;
use std::sync::LazyLock;

use clap::ValueEnum;
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::error::KiraError;

static UNIPROT_ACCESSION: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(?:[OPQ][0-9][A-Z0-9]{3}[0-9]|[A-NR-Z][0-9](?:[A-Z][A-Z0-9]{2}[0-9]){1,2})$")
        .expect("static UniProt accession pattern")
});

/// True when `value` is a complete UniProtKB accession (6 or 10 characters).
pub fn validate_accession(value: &str) -> bool {
    UNIPROT_ACCESSION.is_match(value)
}

/// True when `value` carries a ProteomeXchange token such as `PXD000001`.
pub fn is_proteomexchange_token(value: &str) -> bool {
    value.to_ascii_uppercase().contains("PXD")
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ProteinAccession(String);

impl ProteinAccession {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ProteinAccession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for ProteinAccession {
    type Err = KiraError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let normalized = value.trim();
        if !validate_accession(normalized) {
            return Err(KiraError::InvalidAccession(value.to_string()));
        }
        Ok(Self(normalized.to_string()))
    }
}

impl TryFrom<String> for ProteinAccession {
    type Error = KiraError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<ProteinAccession> for String {
    fn from(value: ProteinAccession) -> Self {
        value.0
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ProjectAccession(String);

impl ProjectAccession {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ProjectAccession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for ProjectAccession {
    type Err = KiraError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let normalized = value.trim();
        let is_valid = is_proteomexchange_token(normalized)
            && normalized.chars().all(|ch| ch.is_ascii_alphanumeric());
        if !is_valid {
            return Err(KiraError::InvalidProjectAccession(value.to_string()));
        }
        Ok(Self(normalized.to_string()))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Organism {
    pub name: String,
    pub accession: String,
}

impl Organism {
    pub fn new(name: impl Into<String>, accession: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            accession: accession.into(),
        }
    }
}

/// Public repositories the mapper can query.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, ValueEnum,
)]
#[serde(rename_all = "lowercase")]
pub enum Database {
    Pride,
    Iprox,
    Massive,
}

impl Database {
    pub const ALL: [Database; 3] = [Database::Pride, Database::Iprox, Database::Massive];

    pub fn display_name(self) -> &'static str {
        match self {
            Database::Pride => "PRIDE",
            Database::Iprox => "iProX",
            Database::Massive => "MassIVE",
        }
    }

    /// Tag under which peptide results are journaled for resume.
    pub fn resume_tag(self) -> String {
        format!("{}_peptide", self.display_name())
    }

    pub fn from_name(value: &str) -> Result<Self, KiraError> {
        Self::ALL
            .into_iter()
            .find(|db| db.display_name().eq_ignore_ascii_case(value.trim()))
            .ok_or_else(|| KiraError::UnknownSource(value.to_string()))
    }
}

impl fmt::Display for Database {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.display_name())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum QueryKind {
    Project,
    Protein,
    Peptide,
}

impl QueryKind {
    pub const ALL: [QueryKind; 3] = [QueryKind::Project, QueryKind::Protein, QueryKind::Peptide];
}

impl fmt::Display for QueryKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            QueryKind::Project => write!(f, "project"),
            QueryKind::Protein => write!(f, "protein"),
            QueryKind::Peptide => write!(f, "peptide"),
        }
    }
}

/// Normalizes a peptide word; only uppercase amino-acid letters survive.
pub fn normalize_peptide(value: &str) -> Result<String, KiraError> {
    let normalized = value.trim().to_ascii_uppercase();
    if normalized.is_empty() || !normalized.chars().all(|ch| ch.is_ascii_uppercase()) {
        return Err(KiraError::InvalidPeptide(value.to_string()));
    }
    Ok(normalized)
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;

    use super::*;

    #[test]
    fn accepts_six_and_ten_character_accessions() {
        assert!(validate_accession("P23950"));
        assert!(validate_accession("Q9CWY9"));
        assert!(validate_accession("A0A023GPI8"));
    }

    #[test]
    fn rejects_partial_accessions() {
        assert!(!validate_accession(""));
        assert!(!validate_accession("P2395"));
        assert!(!validate_accession("P23950X"));
        assert!(!validate_accession("p23950"));
    }

    #[test]
    fn parse_protein_accession_invalid() {
        let err = "XYZ".parse::<ProteinAccession>().unwrap_err();
        assert_matches!(err, KiraError::InvalidAccession(_));
    }

    #[test]
    fn parse_project_accession() {
        let acc: ProjectAccession = "PXD000001".parse().unwrap();
        assert_eq!(acc.as_str(), "PXD000001");
        let err = "MSV000079843".parse::<ProjectAccession>().unwrap_err();
        assert_matches!(err, KiraError::InvalidProjectAccession(_));
    }

    #[test]
    fn database_names_round_trip() {
        for db in Database::ALL {
            assert_eq!(Database::from_name(db.display_name()).unwrap(), db);
        }
        assert_eq!(Database::Iprox.resume_tag(), "iProX_peptide");
        assert_matches!(Database::from_name("jpost"), Err(KiraError::UnknownSource(_)));
    }

    #[test]
    fn peptide_normalization() {
        assert_eq!(normalize_peptide(" tcvadesaencdk ").unwrap(), "TCVADESAENCDK");
        assert_matches!(normalize_peptide("TC1"), Err(KiraError::InvalidPeptide(_)));
    }
}
