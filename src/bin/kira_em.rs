use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use clap::{Args, Parser, Subcommand};
use miette::IntoDiagnostic;
use tracing_subscriber::EnvFilter;

use kira_evidence_mapper::checker::Checker;
use kira_evidence_mapper::config::{ConfigLoader, QueryConfig, RunSettings, load_peptide_list};
use kira_evidence_mapper::domain::{Database, Organism, ProteinAccession};
use kira_evidence_mapper::error::KiraError;
use kira_evidence_mapper::output::{JsonOutput, OutputMode, TextOutput};
use kira_evidence_mapper::progress::{ProgressSink, TracingSink};
use kira_evidence_mapper::providers::Courtesy;
use kira_evidence_mapper::retry::RetryPolicy;
use kira_evidence_mapper::store::Store;
use kira_evidence_mapper::task::TaskCoordinator;
use kira_evidence_mapper::transport::HttpTransport;
use kira_evidence_mapper::uniprot::{ProteinLookup, UniprotHttpClient};

#[derive(Parser)]
#[command(name = "kira-em")]
#[command(about = "Map protein and peptide evidence to ProteomeXchange projects across PRIDE, iProX and MassIVE")]
#[command(version, author)]
struct Cli {
    /// Print JSON on stdout instead of progress and summaries.
    #[arg(long, global = true)]
    non_interactive: bool,

    /// Data root (defaults to $KIRA_EM_HOME, then the platform data directory).
    #[arg(long, global = true)]
    root: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    #[command(about = "Create the logs/, tmp/, result/ and proteome/ directories")]
    Init,
    #[command(about = "Probe repository endpoints")]
    Check(CheckArgs),
    #[command(about = "Run or resume a mapping task")]
    Run(RunArgs),
    #[command(about = "List registered tasks")]
    Tasks,
    #[command(about = "Show the stored result of a task")]
    Show(ShowArgs),
}

#[derive(Args)]
struct CheckArgs {
    #[arg(long = "source", value_enum)]
    sources: Vec<Database>,

    #[arg(long, default_value_t = 3)]
    threshold: u32,
}

#[derive(Args)]
struct RunArgs {
    /// Query config JSON.
    #[arg(long, conflicts_with = "accession")]
    config: Option<String>,

    /// UniProt accession to map, instead of a config file.
    #[arg(long)]
    accession: Option<String>,

    /// Peptide list, one sequence per line.
    #[arg(long)]
    peptides: Option<String>,

    /// Taxonomy accession; looked up in UniProt when omitted.
    #[arg(long)]
    organism: Option<String>,

    /// Task id; an existing id resumes that task.
    #[arg(long)]
    task: Option<String>,

    #[arg(long = "source", value_enum)]
    sources: Vec<Database>,

    /// Run one mapper per repository concurrently.
    #[arg(long)]
    parallel: bool,

    #[arg(long, default_value_t = 5)]
    retries: u32,

    #[arg(long, default_value_t = 3)]
    backoff_secs: u64,

    #[arg(long, default_value_t = 300)]
    delay_ms: u64,

    #[arg(long, default_value_t = 200)]
    page_size: u32,
}

#[derive(Args)]
struct ShowArgs {
    task: String,
}

fn main() -> ExitCode {
    if let Err(report) = run() {
        eprintln!("{report:?}");
        if let Some(kira) = report.downcast_ref::<KiraError>() {
            return ExitCode::from(map_exit_code(kira));
        }
        return ExitCode::from(1);
    }
    ExitCode::SUCCESS
}

fn map_exit_code(error: &KiraError) -> u8 {
    match error {
        KiraError::NotFound(_)
        | KiraError::MissingConfig
        | KiraError::ConfigRead(_)
        | KiraError::ConfigParse(_)
        | KiraError::InvalidAccession(_)
        | KiraError::InvalidPeptide(_)
        | KiraError::InvalidProjectAccession(_)
        | KiraError::UnknownSource(_) => 2,
        KiraError::UpstreamStatus { .. }
        | KiraError::TransientNetwork(_)
        | KiraError::Http(_)
        | KiraError::MalformedResponse { .. } => 3,
        KiraError::TaskRunning { .. } => 4,
        _ => 1,
    }
}

fn run() -> miette::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let output_mode = if cli.non_interactive {
        OutputMode::NonInteractive
    } else {
        OutputMode::Interactive
    };
    let store = Store::new(cli.root.as_deref())?;

    match cli.command {
        Commands::Init => {
            let result = store.init()?;
            match output_mode {
                OutputMode::NonInteractive => JsonOutput::print_init(&result),
                OutputMode::Interactive => TextOutput::print_init(&result),
            }
            .into_diagnostic()
        }
        Commands::Check(args) => run_check(args, output_mode),
        Commands::Run(args) => run_task(args, store, output_mode),
        Commands::Tasks => {
            let registry = store.read_registry()?;
            match output_mode {
                OutputMode::NonInteractive => JsonOutput::print_tasks(&registry),
                OutputMode::Interactive => TextOutput::print_tasks(&registry),
            }
            .into_diagnostic()
        }
        Commands::Show(args) => {
            let result = store.read_result(&args.task)?;
            match output_mode {
                OutputMode::NonInteractive => JsonOutput::print_report(&result),
                OutputMode::Interactive => TextOutput::print_report(&result),
            }
            .into_diagnostic()
        }
    }
}

fn sink_for(output_mode: OutputMode) -> &'static dyn ProgressSink {
    match output_mode {
        OutputMode::NonInteractive => &JsonOutput,
        OutputMode::Interactive => &TracingSink,
    }
}

fn selected(sources: Vec<Database>) -> Vec<Database> {
    if sources.is_empty() {
        Database::ALL.to_vec()
    } else {
        sources
    }
}

fn run_check(args: CheckArgs, output_mode: OutputMode) -> miette::Result<()> {
    let settings = RunSettings {
        databases: selected(args.sources),
        ..RunSettings::default()
    };
    let transport = Arc::new(HttpTransport::new()?);
    let checker = Checker {
        threshold: args.threshold,
    };
    let report = checker.check(&settings, transport, sink_for(output_mode))?;
    match output_mode {
        OutputMode::NonInteractive => JsonOutput::print_check(&report),
        OutputMode::Interactive => TextOutput::print_check(&report),
    }
    .into_diagnostic()
}

fn run_task(args: RunArgs, store: Store, output_mode: OutputMode) -> miette::Result<()> {
    let (query, stored_sources) = resolve_query(&args, &store)?;

    let sources = if args.sources.is_empty() {
        stored_sources.unwrap_or_else(|| Database::ALL.to_vec())
    } else {
        args.sources.clone()
    };
    let settings = RunSettings {
        retry: retry_policy(&args),
        courtesy: Courtesy::new(Duration::from_millis(args.delay_ms)),
        page_size: args.page_size,
        parallel: args.parallel,
        databases: sources,
    };

    let transport = Arc::new(HttpTransport::new()?);
    let mut coordinator =
        TaskCoordinator::new(store, query, settings, transport, args.task.clone())?;
    tracing::info!("task {}", coordinator.task_id());

    let report = coordinator.run(sink_for(output_mode))?;
    match output_mode {
        OutputMode::NonInteractive => JsonOutput::print_report(&report),
        OutputMode::Interactive => TextOutput::print_report(&report),
    }
    .into_diagnostic()
}

fn retry_policy(args: &RunArgs) -> RetryPolicy {
    RetryPolicy {
        max_attempts: args.retries,
        backoff: Duration::from_secs(args.backoff_secs),
    }
}

/// Query from `--config`, from `--accession`, or from the stored config of `--task`.
fn resolve_query(
    args: &RunArgs,
    store: &Store,
) -> Result<(QueryConfig, Option<Vec<Database>>), KiraError> {
    if let Some(accession) = &args.accession {
        let accession: ProteinAccession = accession.parse()?;
        let peptides = match &args.peptides {
            Some(path) => load_peptide_list(std::path::Path::new(path))?,
            None => Vec::new(),
        };
        let (organism, description) = match &args.organism {
            Some(taxonomy) => (Organism::new("", taxonomy.trim()), String::new()),
            None => {
                let entry = UniprotHttpClient::new(retry_policy(args))?.lookup(&accession)?;
                tracing::info!(
                    "{accession}: {} (taxonomy {})",
                    entry.organism.name,
                    entry.organism.accession
                );
                (entry.organism, entry.description)
            }
        };
        let query = QueryConfig::new(accession, peptides, organism)?.with_description(description);
        return Ok((query, None));
    }

    if args.config.is_none() {
        if let Some(task) = &args.task {
            let stored = store.read_task_config(task)?;
            return Ok((stored.query, Some(stored.databases)));
        }
    }

    let query = ConfigLoader::resolve(args.config.as_deref())?;
    let Some(path) = &args.peptides else {
        return Ok((query, None));
    };
    let extra = load_peptide_list(std::path::Path::new(path))?;
    let merged = QueryConfig::new(
        query.identifier.clone(),
        query.peptides.iter().cloned().chain(extra),
        query.organism.clone(),
    )?;
    Ok((
        QueryConfig {
            peptides: merged.peptides,
            ..query
        },
        None,
    ))
}
