use std::sync::Arc;

use crate::domain::Database;
use crate::error::KiraError;
use crate::providers::pride::{
    PRIDE_BASE_URL, PridePeptideAdapter, PrideProjectAdapter, PrideProteinAdapter,
};
use crate::providers::proxi::{
    IPROX_BASE_URL, MASSIVE_BASE_URL, ProxiPeptideAdapter, ProxiProjectAdapter,
    ProxiProteinAdapter,
};
use crate::providers::{ProjectAdapter, SourceAdapter, SourceEndpoint};
use crate::transport::Transport;

pub type EvidenceConstructor = fn(SourceEndpoint, Arc<dyn Transport>) -> Box<dyn SourceAdapter>;
pub type ProjectConstructor = fn(SourceEndpoint, Arc<dyn Transport>) -> Box<dyn ProjectAdapter>;

#[derive(Debug)]
pub struct RegistryEntry {
    pub database: Database,
    pub base_url: &'static str,
    pub peptide: EvidenceConstructor,
    pub protein: EvidenceConstructor,
    pub project: ProjectConstructor,
}

fn pride_peptide(endpoint: SourceEndpoint, transport: Arc<dyn Transport>) -> Box<dyn SourceAdapter> {
    Box::new(PridePeptideAdapter::new(endpoint, transport))
}

fn pride_protein(endpoint: SourceEndpoint, transport: Arc<dyn Transport>) -> Box<dyn SourceAdapter> {
    Box::new(PrideProteinAdapter::new(endpoint, transport))
}

fn pride_project(endpoint: SourceEndpoint, transport: Arc<dyn Transport>) -> Box<dyn ProjectAdapter> {
    Box::new(PrideProjectAdapter::new(endpoint, transport))
}

fn proxi_peptide(endpoint: SourceEndpoint, transport: Arc<dyn Transport>) -> Box<dyn SourceAdapter> {
    Box::new(ProxiPeptideAdapter::new(endpoint, transport))
}

fn proxi_protein(endpoint: SourceEndpoint, transport: Arc<dyn Transport>) -> Box<dyn SourceAdapter> {
    Box::new(ProxiProteinAdapter::new(endpoint, transport))
}

fn proxi_project(endpoint: SourceEndpoint, transport: Arc<dyn Transport>) -> Box<dyn ProjectAdapter> {
    Box::new(ProxiProjectAdapter::new(endpoint, transport))
}

pub static REGISTRY: [RegistryEntry; 3] = [
    RegistryEntry {
        database: Database::Pride,
        base_url: PRIDE_BASE_URL,
        peptide: pride_peptide,
        protein: pride_protein,
        project: pride_project,
    },
    RegistryEntry {
        database: Database::Iprox,
        base_url: IPROX_BASE_URL,
        peptide: proxi_peptide,
        protein: proxi_protein,
        project: proxi_project,
    },
    RegistryEntry {
        database: Database::Massive,
        base_url: MASSIVE_BASE_URL,
        peptide: proxi_peptide,
        protein: proxi_protein,
        project: proxi_project,
    },
];

pub fn entry(database: Database) -> &'static RegistryEntry {
    match database {
        Database::Pride => &REGISTRY[0],
        Database::Iprox => &REGISTRY[1],
        Database::Massive => &REGISTRY[2],
    }
}

/// Looks a repository up by its display name, case-insensitively.
pub fn entry_by_name(name: &str) -> Result<&'static RegistryEntry, KiraError> {
    Database::from_name(name).map(entry)
}

/// The three adapters the mapper of one repository needs.
pub struct AdapterSet {
    pub database: Database,
    pub peptide: Box<dyn SourceAdapter>,
    pub protein: Box<dyn SourceAdapter>,
    pub project: Box<dyn ProjectAdapter>,
}

impl AdapterSet {
    pub fn build(endpoint: SourceEndpoint, transport: Arc<dyn Transport>) -> Self {
        let entry = entry(endpoint.database);
        Self {
            database: endpoint.database,
            peptide: (entry.peptide)(endpoint.clone(), Arc::clone(&transport)),
            protein: (entry.protein)(endpoint.clone(), Arc::clone(&transport)),
            project: (entry.project)(endpoint, transport),
        }
    }
}

/// Endpoint with the registry's base URL and the given page size.
pub fn default_endpoint(database: Database, page_size: u32) -> SourceEndpoint {
    let mut endpoint = SourceEndpoint::new(database, entry(database).base_url);
    endpoint.page_size = page_size;
    endpoint
}
