use std::collections::BTreeMap;
use std::fs;
use std::io::Write;

use camino::{Utf8Path, Utf8PathBuf};
use directories::BaseDirs;
use serde::Serialize;
use serde::de::DeserializeOwned;
use tempfile::Builder;

use crate::error::KiraError;
use crate::task::{TaskConfigFile, TaskRecord, TaskReport};

pub const ROOT_ENV: &str = "KIRA_EM_HOME";

const SUBDIRS: [&str; 4] = ["logs", "tmp", "result", "proteome"];

/// On-disk layout under one data root:
///
/// ```text
/// logs/tasks.json          task registry
/// logs/<task>.log          progress log
/// tmp/<task>.log           resume journal
/// result/<task>/           config.json, result.json, result.tsv
/// proteome/                local proteome sources
/// ```
#[derive(Debug, Clone)]
pub struct Store {
    root: Utf8PathBuf,
}

#[derive(Debug, Clone, Serialize)]
pub struct InitReport {
    pub root: String,
    pub created: Vec<String>,
    pub existing: Vec<String>,
}

impl Store {
    /// Uses `root` when given, then `KIRA_EM_HOME`, then the platform data directory.
    pub fn new(root: Option<&str>) -> Result<Self, KiraError> {
        if let Some(root) = root {
            return Ok(Self::new_with_root(Utf8PathBuf::from(root)));
        }
        if let Ok(root) = std::env::var(ROOT_ENV) {
            if !root.trim().is_empty() {
                return Ok(Self::new_with_root(Utf8PathBuf::from(root.trim())));
            }
        }
        let root = BaseDirs::new()
            .and_then(|dirs| {
                Utf8PathBuf::from_path_buf(dirs.data_dir().join("kira-evidence-mapper")).ok()
            })
            .ok_or_else(|| KiraError::Filesystem("unable to resolve data directory".to_string()))?;
        Ok(Self::new_with_root(root))
    }

    pub fn new_with_root(root: Utf8PathBuf) -> Self {
        Self { root }
    }

    pub fn root(&self) -> &Utf8Path {
        &self.root
    }

    /// Creates the working directories. Existing ones are reported, not treated as errors.
    pub fn init(&self) -> Result<InitReport, KiraError> {
        let mut report = InitReport {
            root: self.root.to_string(),
            created: Vec::new(),
            existing: Vec::new(),
        };
        for name in SUBDIRS {
            let dir = self.root.join(name);
            if dir.as_std_path().is_dir() {
                tracing::warn!("{dir} already exists");
                report.existing.push(dir.to_string());
                continue;
            }
            fs::create_dir_all(dir.as_std_path())
                .map_err(|err| KiraError::Filesystem(format!("create {dir}: {err}")))?;
            report.created.push(dir.to_string());
        }
        Ok(report)
    }

    pub fn registry_path(&self) -> Utf8PathBuf {
        self.root.join("logs").join("tasks.json")
    }

    pub fn task_log_path(&self, task: &str) -> Utf8PathBuf {
        self.root.join("logs").join(format!("{task}.log"))
    }

    pub fn resume_path(&self, task: &str) -> Utf8PathBuf {
        self.root.join("tmp").join(format!("{task}.log"))
    }

    pub fn result_dir(&self, task: &str) -> Utf8PathBuf {
        self.root.join("result").join(task)
    }

    pub fn proteome_dir(&self) -> Utf8PathBuf {
        self.root.join("proteome")
    }

    pub fn write_bytes_atomic(path: &Utf8Path, content: &[u8]) -> Result<(), KiraError> {
        let parent = path
            .parent()
            .ok_or_else(|| KiraError::Filesystem(format!("{path} has no parent directory")))?;
        fs::create_dir_all(parent.as_std_path())
            .map_err(|err| KiraError::Filesystem(err.to_string()))?;
        let mut temp = Builder::new()
            .prefix(".kira-em")
            .tempfile_in(parent.as_std_path())
            .map_err(|err| KiraError::Filesystem(err.to_string()))?;
        temp.write_all(content)
            .and_then(|()| temp.as_file().sync_all())
            .map_err(|err| KiraError::Filesystem(err.to_string()))?;
        temp.persist(path.as_std_path())
            .map_err(|err| KiraError::Filesystem(err.to_string()))?;
        Ok(())
    }

    pub fn write_json_atomic<T: Serialize + ?Sized>(
        path: &Utf8Path,
        value: &T,
    ) -> Result<(), KiraError> {
        let content = serde_json::to_vec_pretty(value)
            .map_err(|err| KiraError::Filesystem(err.to_string()))?;
        Self::write_bytes_atomic(path, &content)
    }

    fn read_json<T: DeserializeOwned>(path: &Utf8Path) -> Result<T, KiraError> {
        let content = fs::read_to_string(path.as_std_path())
            .map_err(|err| KiraError::Filesystem(format!("read {path}: {err}")))?;
        serde_json::from_str(&content)
            .map_err(|err| KiraError::Filesystem(format!("parse {path}: {err}")))
    }

    /// All known tasks keyed by id. A missing registry is empty.
    pub fn read_registry(&self) -> Result<BTreeMap<String, TaskRecord>, KiraError> {
        let path = self.registry_path();
        if !path.as_std_path().exists() {
            return Ok(BTreeMap::new());
        }
        Self::read_json(&path)
    }

    pub fn upsert_registry(&self, record: &TaskRecord) -> Result<(), KiraError> {
        let mut registry = self.read_registry()?;
        registry.insert(record.task.clone(), record.clone());
        Self::write_json_atomic(&self.registry_path(), &registry)
    }

    pub fn write_task_config(&self, task: &str, config: &TaskConfigFile) -> Result<(), KiraError> {
        Self::write_json_atomic(&self.result_dir(task).join("config.json"), config)
    }

    /// Query and repositories of an earlier task, for restarting it by id.
    pub fn read_task_config(&self, task: &str) -> Result<TaskConfigFile, KiraError> {
        let path = self.result_dir(task).join("config.json");
        if !path.as_std_path().exists() {
            return Err(KiraError::NotFound(format!("no config for task {task}")));
        }
        Self::read_json(&path)
    }

    pub fn write_task_result(
        &self,
        task: &str,
        config: &TaskConfigFile,
        report: &TaskReport,
    ) -> Result<Utf8PathBuf, KiraError> {
        let dir = self.result_dir(task);
        self.write_task_config(task, config)?;
        Self::write_json_atomic(&dir.join("result.json"), report)?;
        Self::write_bytes_atomic(&dir.join("result.tsv"), render_tsv(report).as_bytes())?;
        Ok(dir)
    }

    pub fn read_result(&self, task: &str) -> Result<TaskReport, KiraError> {
        let path = self.result_dir(task).join("result.json");
        if !path.as_std_path().exists() {
            return Err(KiraError::NotFound(format!("no result for task {task}")));
        }
        Self::read_json(&path)
    }
}

/// One `title\tsummary\twebsite` line per project; a project reported by
/// several repositories appears once.
pub fn render_tsv(report: &TaskReport) -> String {
    let mut projects = BTreeMap::new();
    for results in report.results.values() {
        for (accession, project) in results {
            projects.entry(accession.as_str()).or_insert(project);
        }
    }

    let mut out = String::from("title\tsummary\twebsite\n");
    for project in projects.values() {
        out.push_str(&format!(
            "{}\t{}\t{}\n",
            tsv_field(&project.title),
            tsv_field(&project.summary),
            project.website
        ));
    }
    out
}

fn tsv_field(value: &str) -> String {
    value
        .split(['\t', '\n', '\r'])
        .filter(|part| !part.is_empty())
        .collect::<Vec<_>>()
        .join(" ")
}
