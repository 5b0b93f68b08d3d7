use std::fs;

use assert_matches::assert_matches;

use kira_evidence_mapper::config::{ConfigLoader, RunSettings, load_peptide_list};
use kira_evidence_mapper::domain::Database;
use kira_evidence_mapper::error::KiraError;

#[test]
fn loads_config_with_peptide_file() {
    let temp = tempfile::tempdir().unwrap();
    fs::write(temp.path().join("digest.txt"), "# trypsin\nLLEQRAAK\n\ntcvadesaencdk\n").unwrap();
    let path = temp.path().join("kira-em.json");
    fs::write(
        &path,
        r#"{
            "identifier": "P23950",
            "peptides": ["TCVADESAENCDK"],
            "peptide_file": "digest.txt",
            "organism": {"name": "Homo sapiens", "accession": "9606"},
            "digestion": {"enzyme": "trypsin", "missed_cleavages": 1},
            "description": "ZFP36L2"
        }"#,
    )
    .unwrap();

    let config = ConfigLoader::resolve(Some(path.to_str().unwrap())).unwrap();
    assert_eq!(config.identifier.as_str(), "P23950");
    assert_eq!(config.peptides, vec!["TCVADESAENCDK", "LLEQRAAK"]);
    assert_eq!(config.organism.accession, "9606");
    assert_eq!(config.digestion.enzyme.as_deref(), Some("trypsin"));
    assert_eq!(config.description, "ZFP36L2");
}

#[test]
fn unreadable_and_malformed_configs() {
    let temp = tempfile::tempdir().unwrap();
    let missing = temp.path().join("nope.json");
    assert_matches!(
        ConfigLoader::resolve(Some(missing.to_str().unwrap())),
        Err(KiraError::ConfigRead(_))
    );

    let broken = temp.path().join("broken.json");
    fs::write(&broken, "{\"identifier\": ").unwrap();
    assert_matches!(
        ConfigLoader::resolve(Some(broken.to_str().unwrap())),
        Err(KiraError::ConfigParse(_))
    );

    let bad_peptide = temp.path().join("bad.json");
    fs::write(
        &bad_peptide,
        r#"{"identifier": "P23950", "peptides": ["PEP TIDE"], "organism": "9606"}"#,
    )
    .unwrap();
    assert_matches!(
        ConfigLoader::resolve(Some(bad_peptide.to_str().unwrap())),
        Err(KiraError::InvalidPeptide(_))
    );
}

#[test]
fn peptide_list_rejects_garbage() {
    let temp = tempfile::tempdir().unwrap();
    let path = temp.path().join("list.txt");
    fs::write(&path, "AAAK\nAA1K\n").unwrap();
    assert_matches!(load_peptide_list(&path), Err(KiraError::InvalidPeptide(_)));
}

#[test]
fn immediate_settings_never_wait() {
    let settings = RunSettings::immediate(vec![Database::Iprox]);
    assert!(settings.retry.backoff.is_zero());
    assert!(settings.courtesy.delay.is_zero());
    assert_eq!(settings.endpoint(Database::Iprox).page_size, 200);
    assert_eq!(RunSettings::default().databases, Database::ALL.to_vec());
}
