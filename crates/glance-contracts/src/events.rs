use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use anyhow::Context;
use chrono::{SecondsFormat, Utc};
use serde_json::{Map, Value};

/// Session event log written as JSON lines.
///
/// Every line carries `type`, `session_id`, `seq` and `ts`. An object payload
/// is merged on top of those keys; any other payload lands under `data`.
/// The file and its parent directory are created on the first event, so a
/// session that never emits leaves nothing behind.
#[derive(Debug, Clone)]
pub struct EventWriter {
    shared: Arc<Shared>,
}

#[derive(Debug)]
struct Shared {
    path: PathBuf,
    session_id: String,
    sink: Mutex<Sink>,
}

#[derive(Debug, Default)]
struct Sink {
    file: Option<File>,
    seq: u64,
}

impl EventWriter {
    pub fn new(path: impl Into<PathBuf>, session_id: impl Into<String>) -> Self {
        Self {
            shared: Arc::new(Shared {
                path: path.into(),
                session_id: session_id.into(),
                sink: Mutex::new(Sink::default()),
            }),
        }
    }

    pub fn path(&self) -> &Path {
        &self.shared.path
    }

    pub fn session_id(&self) -> &str {
        &self.shared.session_id
    }

    /// Appends one event and returns the object that was written.
    pub fn emit(&self, event_type: &str, payload: Value) -> anyhow::Result<Value> {
        let mut sink = self
            .shared
            .sink
            .lock()
            .map_err(|_| anyhow::anyhow!("event log lock poisoned"))?;

        let mut event = Map::new();
        event.insert("type".into(), Value::from(event_type));
        event.insert("session_id".into(), Value::from(self.shared.session_id.as_str()));
        event.insert("seq".into(), Value::from(sink.seq));
        event.insert("ts".into(), Value::from(now_utc_iso()));
        match payload {
            Value::Object(fields) => event.extend(fields),
            Value::Null => {}
            other => {
                event.insert("data".into(), other);
            }
        }
        let event = Value::Object(event);

        let mut line = serde_json::to_vec(&event)?;
        line.push(b'\n');
        // A failed write drops the handle; the next event reopens the file.
        let mut file = match sink.file.take() {
            Some(file) => file,
            None => self.open()?,
        };
        file.write_all(&line)
            .with_context(|| format!("failed to append to {}", self.shared.path.display()))?;
        sink.file = Some(file);
        sink.seq += 1;

        Ok(event)
    }

    fn open(&self) -> anyhow::Result<File> {
        let path = &self.shared.path;
        if let Some(parent) = path.parent().filter(|dir| !dir.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("failed to create {}", parent.display()))?;
        }
        OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .with_context(|| format!("failed to open event log {}", path.display()))
    }
}

pub fn now_utc_iso() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Micros, false)
}
