use std::fs::{File, OpenOptions};
use std::io::Write;
use std::sync::Mutex;
use std::time::Duration;

use camino::Utf8Path;

use crate::error::KiraError;

#[derive(Debug, Clone)]
pub struct ProgressEvent {
    pub message: String,
    pub elapsed: Option<Duration>,
}

impl ProgressEvent {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            elapsed: None,
        }
    }

    pub fn timed(message: impl Into<String>, elapsed: Duration) -> Self {
        Self {
            message: message.into(),
            elapsed: Some(elapsed),
        }
    }
}

/// Receives progress events. Mappers of one task may report from several threads.
pub trait ProgressSink: Sync {
    fn event(&self, event: ProgressEvent);
}

/// Forwards events to `tracing` at info level.
pub struct TracingSink;

impl ProgressSink for TracingSink {
    fn event(&self, event: ProgressEvent) {
        match event.elapsed {
            Some(elapsed) => {
                tracing::info!(elapsed_ms = elapsed.as_millis() as u64, "{}", event.message)
            }
            None => tracing::info!("{}", event.message),
        }
    }
}

/// Appends every event to the task's log file and passes it on to `inner`.
pub struct TaskLogSink<'a> {
    file: Mutex<File>,
    inner: &'a dyn ProgressSink,
}

impl<'a> TaskLogSink<'a> {
    pub fn open(path: &Utf8Path, inner: &'a dyn ProgressSink) -> Result<Self, KiraError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent.as_std_path())
                .map_err(|err| KiraError::Filesystem(err.to_string()))?;
        }
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path.as_std_path())
            .map_err(|err| KiraError::Filesystem(format!("open {path}: {err}")))?;
        Ok(Self {
            file: Mutex::new(file),
            inner,
        })
    }
}

impl ProgressSink for TaskLogSink<'_> {
    fn event(&self, event: ProgressEvent) {
        if let Ok(mut file) = self.file.lock() {
            let line = match event.elapsed {
                Some(elapsed) => format!(
                    "{}\t{}\telapsed_ms={}\n",
                    chrono::Utc::now().to_rfc3339(),
                    event.message,
                    elapsed.as_millis()
                ),
                None => format!("{}\t{}\n", chrono::Utc::now().to_rfc3339(), event.message),
            };
            if let Err(err) = file.write_all(line.as_bytes()) {
                tracing::warn!("task log write failed: {err}");
            }
        }
        self.inner.event(event);
    }
}

#[cfg(test)]
mod tests {
    use camino::Utf8PathBuf;

    use super::*;

    struct Collect(Mutex<Vec<String>>);

    impl ProgressSink for Collect {
        fn event(&self, event: ProgressEvent) {
            self.0.lock().unwrap().push(event.message);
        }
    }

    #[test]
    fn task_log_sink_writes_and_forwards() {
        let temp = tempfile::tempdir().unwrap();
        let path = Utf8PathBuf::from_path_buf(temp.path().join("logs").join("t.log")).unwrap();
        let inner = Collect(Mutex::new(Vec::new()));
        let sink = TaskLogSink::open(&path, &inner).unwrap();
        sink.event(ProgressEvent::new("phase=Peptides; PRIDE"));
        drop(sink);

        let content = std::fs::read_to_string(path.as_std_path()).unwrap();
        assert!(content.contains("phase=Peptides; PRIDE"));
        assert_eq!(inner.0.lock().unwrap().len(), 1);
    }
}
