use std::collections::BTreeMap;
use std::io::{self, Write};

use serde::Serialize;

use crate::checker::ConnectivityReport;
use crate::mapper::WordOutcome;
use crate::progress::{ProgressEvent, ProgressSink};
use crate::store::InitReport;
use crate::task::{TaskRecord, TaskReport};

#[derive(Debug, Clone, Copy)]
pub enum OutputMode {
    Interactive,
    NonInteractive,
}

/// Machine-readable output on stdout. Swallows progress so stdout stays valid JSON.
pub struct JsonOutput;

impl JsonOutput {
    pub fn print_init(result: &InitReport) -> io::Result<()> {
        Self::print_json(result)
    }

    pub fn print_check(result: &ConnectivityReport) -> io::Result<()> {
        Self::print_json(result)
    }

    pub fn print_report(result: &TaskReport) -> io::Result<()> {
        Self::print_json(result)
    }

    pub fn print_tasks(result: &BTreeMap<String, TaskRecord>) -> io::Result<()> {
        Self::print_json(result)
    }

    fn print_json<T: Serialize>(value: &T) -> io::Result<()> {
        let json = serde_json::to_string_pretty(value).map_err(io::Error::other)?;
        let mut stdout = io::stdout();
        stdout.write_all(json.as_bytes())?;
        stdout.write_all(b"\n")?;
        Ok(())
    }
}

impl ProgressSink for JsonOutput {
    fn event(&self, _event: ProgressEvent) {}
}

/// Short human-readable summaries.
pub struct TextOutput;

impl TextOutput {
    pub fn print_init(result: &InitReport) -> io::Result<()> {
        let mut out = io::stdout().lock();
        writeln!(out, "data root: {}", result.root)?;
        for dir in &result.created {
            writeln!(out, "  created  {dir}")?;
        }
        for dir in &result.existing {
            writeln!(out, "  exists   {dir}")?;
        }
        Ok(())
    }

    pub fn print_check(result: &ConnectivityReport) -> io::Result<()> {
        let mut out = io::stdout().lock();
        for source in &result.sources {
            for endpoint in &source.endpoints {
                let status = if endpoint.reachable {
                    "reachable".to_string()
                } else {
                    format!(
                        "NOT reachable ({})",
                        endpoint.detail.as_deref().unwrap_or("unknown")
                    )
                };
                writeln!(
                    out,
                    "{:<8} {:<8} {status} after {} attempt(s)",
                    source.database.display_name(),
                    endpoint.kind.to_string(),
                    endpoint.attempts
                )?;
            }
        }
        Ok(())
    }

    pub fn print_report(result: &TaskReport) -> io::Result<()> {
        let mut out = io::stdout().lock();
        writeln!(out, "task {} ({:?})", result.task, result.state)?;
        for mapper in &result.mappers {
            let unresolved = mapper.unresolved_peptides();
            let found = mapper
                .peptides
                .iter()
                .filter(|word| matches!(word.outcome, WordOutcome::Found { .. }))
                .count();
            writeln!(
                out,
                "  {:<8} peptides: {found} found, {} resumed, {} unresolved; projects kept {}/{}",
                mapper.database.display_name(),
                mapper.resumed_count(),
                unresolved.len(),
                mapper.projects_kept,
                mapper.projects_discovered
            )?;
        }
        for (database, projects) in &result.results {
            for (accession, project) in projects {
                writeln!(
                    out,
                    "  {database:<8} {accession}  peptide USIs {}  protein USIs {}  {}",
                    project.peptide.len(),
                    project.protein.len(),
                    project.title
                )?;
            }
        }
        if let Some(dir) = &result.result_dir {
            writeln!(out, "results written to {dir}")?;
        }
        Ok(())
    }

    pub fn print_tasks(result: &BTreeMap<String, TaskRecord>) -> io::Result<()> {
        let mut out = io::stdout().lock();
        for record in result.values() {
            writeln!(
                out,
                "{}  {:<11} {}  {} peptides  taxonomy {}  {}",
                record.task,
                format!("{:?}", record.state),
                record.identifier,
                record.peptides,
                record.organism.accession,
                record.started_at
            )?;
        }
        Ok(())
    }
}
