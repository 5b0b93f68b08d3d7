use assert_matches::assert_matches;

use kira_evidence_mapper::domain::{ProteinAccession, validate_accession};
use kira_evidence_mapper::error::KiraError;
use kira_evidence_mapper::usi::{EvidenceCandidate, EvidenceRow, is_valid_usi, parse_usi};

#[test]
fn every_kept_row_agrees_with_its_usi() {
    let candidates = vec![
        EvidenceCandidate::new("TCVADESAENCDK", "mzspec:PXD000001:index:5:TCVADESAENCDK/2"),
        EvidenceCandidate::new(
            "VLHPLEGAVVIIFK",
            "mzspec:PXD000561:Adult_Frontalcortex:scan:17555:VLHPLEGAVVIIFK/2",
        ),
        EvidenceCandidate::new("X", "mzspec:MSV000079843:run:scan:1:X/2"),
        EvidenceCandidate::new("Y", "mzspec:PXD000001:index:5"),
        EvidenceCandidate::new("Z", "None"),
    ];
    let rows = EvidenceRow::from_candidates(candidates);
    assert_eq!(rows.len(), 2);
    for row in &rows {
        assert!(is_valid_usi(row.usi()));
        let usi = parse_usi(row.usi()).unwrap();
        assert_eq!(usi.collection, row.project_accession());
        assert_eq!(usi.interpretation, row.interpretation());
        assert_eq!(usi.to_string(), row.usi());
    }
}

#[test]
fn invalid_usi_is_rejected_as_row() {
    assert_matches!(
        EvidenceRow::from_usi("AAAK", "mzspec:PXD000001:AAAK"),
        Err(KiraError::MalformedUsi(_))
    );
}

#[test]
fn accession_parsing_matches_validation() {
    for value in ["P23950", "A0A023GPI8", "p23950", "P2395", ""] {
        assert_eq!(
            value.parse::<ProteinAccession>().is_ok(),
            validate_accession(value),
            "{value}"
        );
    }
}
