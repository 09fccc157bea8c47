//! Session event log (`events.jsonl`).
//!
//! Each line is one [`EventRecord`]: the session id, a UTC timestamp and a
//! [`SessionEvent`] flattened in, tagged by its `event` name.

use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use anyhow::Context;
use chrono::{SecondsFormat, Utc};
use serde::{Deserialize, Serialize};

use crate::wire::AspectRatio;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum SessionEvent {
    SessionStarted {
        mode: String,
        usage_count: u32,
        usage_reset: bool,
    },
    GenerationStarted {
        mode: String,
        count: u32,
        aspect_ratio: Option<AspectRatio>,
        has_context: bool,
    },
    GenerationCompleted {
        mode: String,
        image_ids: Vec<String>,
        usage_count: u32,
    },
    GenerationFailed {
        kind: String,
        message: String,
    },
    HistoryDeleted {
        image_id: String,
    },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventRecord {
    pub session_id: String,
    pub ts: String,
    #[serde(flatten)]
    pub event: SessionEvent,
}

/// Appends records for one session. Clones share the file and the write
/// lock, so lines from different handles never interleave.
#[derive(Debug, Clone)]
pub struct EventLog {
    shared: Arc<Shared>,
}

#[derive(Debug)]
struct Shared {
    path: PathBuf,
    session_id: String,
    write_lock: Mutex<()>,
}

impl EventLog {
    pub fn new(path: impl Into<PathBuf>, session_id: impl Into<String>) -> Self {
        Self {
            shared: Arc::new(Shared {
                path: path.into(),
                session_id: session_id.into(),
                write_lock: Mutex::new(()),
            }),
        }
    }

    /// A log for a new session with a random id.
    pub fn open(path: impl Into<PathBuf>) -> Self {
        Self::new(path, uuid::Uuid::new_v4().to_string())
    }

    pub fn session_id(&self) -> &str {
        &self.shared.session_id
    }

    pub fn emit(&self, event: SessionEvent) -> anyhow::Result<EventRecord> {
        let record = EventRecord {
            session_id: self.shared.session_id.clone(),
            ts: Utc::now().to_rfc3339_opts(SecondsFormat::Micros, true),
            event,
        };
        let mut line = serde_json::to_string(&record)?;
        line.push('\n');
        self.append(&line)
            .with_context(|| format!("failed to append to {}", self.shared.path.display()))?;
        Ok(record)
    }

    fn append(&self, line: &str) -> anyhow::Result<()> {
        let _guard = self
            .shared
            .write_lock
            .lock()
            .map_err(|_| anyhow::anyhow!("event log lock poisoned"))?;
        if let Some(dir) = self.shared.path.parent().filter(|dir| !dir.as_os_str().is_empty()) {
            fs::create_dir_all(dir)?;
        }
        OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.shared.path)?
            .write_all(line.as_bytes())?;
        Ok(())
    }
}
