use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Instant;

use camino::Utf8PathBuf;
use serde::{Deserialize, Serialize};

use crate::config::{QueryConfig, RunSettings};
use crate::domain::{Database, Organism};
use crate::error::KiraError;
use crate::mapper::{Mapper, MapperReport, MapperSettings, ProjectReport};
use crate::progress::{ProgressEvent, ProgressSink, TaskLogSink};
use crate::providers::registry::AdapterSet;
use crate::resume::{ResumeJournal, ResumeLog, ResumeStore};
use crate::store::Store;
use crate::transport::Transport;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TaskState {
    Preparation,
    Running,
    Success,
    Error,
}

impl TaskState {
    fn can_move_to(self, next: TaskState) -> bool {
        matches!(
            (self, next),
            (TaskState::Preparation, TaskState::Running)
                | (TaskState::Preparation, TaskState::Error)
                | (TaskState::Running, TaskState::Success)
                | (TaskState::Running, TaskState::Error)
        )
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, TaskState::Success | TaskState::Error)
    }
}

/// Registry snapshot of a task. Only the number of peptides is kept.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskRecord {
    pub task: String,
    pub identifier: String,
    pub peptides: usize,
    pub organism: Organism,
    pub description: String,
    pub databases: Vec<String>,
    pub state: TaskState,
    pub started_at: String,
    #[serde(default)]
    pub finished_at: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskReport {
    pub task: String,
    pub state: TaskState,
    pub generated_at: String,
    /// Repository display name to surviving projects.
    pub results: BTreeMap<String, BTreeMap<String, ProjectReport>>,
    pub mappers: Vec<MapperReport>,
    #[serde(skip)]
    pub result_dir: Option<Utf8PathBuf>,
}

impl TaskReport {
    pub fn project_count(&self) -> usize {
        self.results.values().map(BTreeMap::len).sum()
    }
}

/// Contents of `result/<task>/config.json`; enough to restart the task by id.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskConfigFile {
    pub task: String,
    pub databases: Vec<Database>,
    pub query: QueryConfig,
}

pub fn new_task_id() -> String {
    uuid::Uuid::new_v4().to_string()
}

fn validate_task_id(task: &str) -> Result<(), KiraError> {
    let ok = !task.is_empty()
        && task
            .chars()
            .all(|ch| ch.is_ascii_alphanumeric() || ch == '-' || ch == '_');
    if ok {
        Ok(())
    } else {
        Err(KiraError::ConfigParse(format!("invalid task id: {task:?}")))
    }
}

/// Owns one task: its mappers, its state and everything it persists.
pub struct TaskCoordinator {
    task: String,
    config: Arc<QueryConfig>,
    store: Store,
    settings: RunSettings,
    state: TaskState,
    mappers: Vec<Mapper>,
    started_at: String,
    finished_at: Option<String>,
}

impl std::fmt::Debug for TaskCoordinator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TaskCoordinator")
            .field("task", &self.task)
            .field("state", &self.state)
            .finish_non_exhaustive()
    }
}

impl TaskCoordinator {
    /// Registers the task. Passing the id of an earlier task resumes it from its journal.
    pub fn new(
        store: Store,
        config: QueryConfig,
        settings: RunSettings,
        transport: Arc<dyn Transport>,
        task: Option<String>,
    ) -> Result<Self, KiraError> {
        let task = task.unwrap_or_else(new_task_id);
        validate_task_id(&task)?;

        if let Some(previous) = store.read_registry()?.get(&task) {
            if previous.identifier != config.identifier.as_str() {
                return Err(KiraError::ConfigParse(format!(
                    "task {task} was created for {}, not {}",
                    previous.identifier, config.identifier
                )));
            }
            tracing::info!("resuming task {task} (last state {:?})", previous.state);
        }

        let mut databases = settings.databases.clone();
        databases.sort();
        databases.dedup();

        let config = Arc::new(config);
        let mapper_settings = MapperSettings::from(&settings);
        let mappers = databases
            .iter()
            .map(|database| {
                let adapters =
                    AdapterSet::build(settings.endpoint(*database), Arc::clone(&transport));
                Mapper::new(Arc::clone(&config), adapters, mapper_settings)
            })
            .collect();

        let coordinator = Self {
            task,
            config,
            store,
            settings,
            state: TaskState::Preparation,
            mappers,
            started_at: chrono::Utc::now().to_rfc3339(),
            finished_at: None,
        };
        coordinator.persist()?;
        coordinator
            .store
            .write_task_config(&coordinator.task, &coordinator.config_file())?;
        Ok(coordinator)
    }

    pub fn task_id(&self) -> &str {
        &self.task
    }

    pub fn state(&self) -> TaskState {
        self.state
    }

    pub fn databases(&self) -> Vec<Database> {
        self.mappers.iter().map(Mapper::database).collect()
    }

    pub fn record(&self) -> TaskRecord {
        TaskRecord {
            task: self.task.clone(),
            identifier: self.config.identifier.to_string(),
            peptides: self.config.peptides.len(),
            organism: self.config.organism.clone(),
            description: self.config.description.clone(),
            databases: self
                .mappers
                .iter()
                .map(|mapper| mapper.database().display_name().to_string())
                .collect(),
            state: self.state,
            started_at: self.started_at.clone(),
            finished_at: self.finished_at.clone(),
        }
    }

    fn config_file(&self) -> TaskConfigFile {
        TaskConfigFile {
            task: self.task.clone(),
            databases: self.databases(),
            query: self.config.as_ref().clone(),
        }
    }

    fn persist(&self) -> Result<(), KiraError> {
        self.store.upsert_registry(&self.record())
    }

    /// The only place task state changes. Every change is persisted.
    fn transition(&mut self, next: TaskState) -> Result<(), KiraError> {
        if !self.state.can_move_to(next) {
            return Err(KiraError::InvalidTaskState {
                from: format!("{:?}", self.state),
                to: format!("{next:?}"),
            });
        }
        self.state = next;
        if next.is_terminal() {
            self.finished_at = Some(chrono::Utc::now().to_rfc3339());
        }
        self.persist()
    }

    /// Runs every mapper, then writes the result files.
    ///
    /// Any error escaping a mapper moves the task to `Error` and comes back as
    /// `TaskRunning`; the journal keeps what was resolved so far.
    pub fn run(&mut self, sink: &dyn ProgressSink) -> Result<TaskReport, KiraError> {
        let log_sink = TaskLogSink::open(&self.store.task_log_path(&self.task), sink)?;
        let journal = ResumeStore::open(self.store.resume_path(&self.task));
        let start = Instant::now();

        self.transition(TaskState::Running)?;

        let outcome = journal.load().and_then(|log| {
            if !log.is_empty() {
                log_sink.event(ProgressEvent::new(format!(
                    "phase=Resume; {} journaled entries",
                    log.len()
                )));
            }
            self.run_mappers(&log, &journal, &log_sink)
        });
        let outcome = outcome.and_then(|()| self.collect());

        let mut report = match outcome {
            Ok(report) => report,
            Err(err) => return Err(self.fail(&log_sink, err)),
        };

        // Result files land before the registry says Success.
        report.state = TaskState::Success;
        let dir = match self
            .store
            .write_task_result(&self.task, &self.config_file(), &report)
        {
            Ok(dir) => dir,
            Err(err) => return Err(self.fail(&log_sink, err)),
        };
        self.transition(TaskState::Success)?;
        log_sink.event(ProgressEvent::timed(
            format!(
                "phase=Done; {} projects written to {dir}",
                report.project_count()
            ),
            start.elapsed(),
        ));
        report.result_dir = Some(dir);
        Ok(report)
    }

    /// Moves the task to `Error` and wraps `err` as `TaskRunning`.
    fn fail(&mut self, sink: &dyn ProgressSink, err: KiraError) -> KiraError {
        let message = err.to_string();
        tracing::error!("task {} failed: {message}", self.task);
        sink.event(ProgressEvent::new(format!("phase=Error; {message}")));
        if let Err(persist) = self.transition(TaskState::Error) {
            return persist;
        }
        KiraError::TaskRunning {
            task: self.task.clone(),
            message,
        }
    }

    fn run_mappers(
        &mut self,
        log: &ResumeLog,
        journal: &dyn ResumeJournal,
        sink: &dyn ProgressSink,
    ) -> Result<(), KiraError> {
        if !self.settings.parallel || self.mappers.len() < 2 {
            for mapper in &mut self.mappers {
                let resumed = log.partition(&mapper.database().resume_tag());
                mapper.run(resumed, journal, sink)?;
            }
            return Ok(());
        }

        let task = self.task.clone();
        std::thread::scope(|scope| {
            let handles = self
                .mappers
                .iter_mut()
                .map(|mapper| {
                    let resumed = log.partition(&mapper.database().resume_tag());
                    let database = mapper.database();
                    (database, scope.spawn(move || mapper.run(resumed, journal, sink)))
                })
                .collect::<Vec<_>>();

            let mut first_error = None;
            for (database, handle) in handles {
                let result = handle.join().unwrap_or_else(|_| {
                    Err(KiraError::TaskRunning {
                        task: task.clone(),
                        message: format!("{database} mapper panicked"),
                    })
                });
                if let Err(err) = result {
                    tracing::error!("{database} mapper failed: {err}");
                    first_error.get_or_insert(err);
                }
            }
            first_error.map_or(Ok(()), Err)
        })
    }

    fn collect(&mut self) -> Result<TaskReport, KiraError> {
        let mut results = BTreeMap::new();
        let mut mappers = Vec::new();
        for mapper in &mut self.mappers {
            results.insert(mapper.database().display_name().to_string(), mapper.export()?);
            mappers.push(mapper.report().clone());
        }
        Ok(TaskReport {
            task: self.task.clone(),
            state: self.state,
            generated_at: chrono::Utc::now().to_rfc3339(),
            results,
            mappers,
            result_dir: None,
        })
    }
}
