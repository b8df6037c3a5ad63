use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use chrono::{SecondsFormat, Utc};
use serde_json::{Map, Value};

/// Append-only writer for the resolver's `events.jsonl`.
///
/// Every line carries `type`, `session_id` and `ts`; the caller payload is
/// merged last. Clones share one lock so fan-out threads never interleave
/// partial lines.
///
/// The resolver emits, per request:
/// - `resolve_started`: concept, backend selector and thinking mode.
/// - `cache_hit`: backend, served storage name, origin collection, `promoted`.
/// - `thinking_finished`: matched names, reference count, style and research
///   sources, elapsed seconds.
/// - `generation_finished`: backend, storage name, cost, cost basis, elapsed
///   seconds.
/// - `generation_failed`: backend and the error chain text.
///
/// Every resolver event also carries the display `concept`.
///
/// The file lives in the run directory beside the image collections.
#[derive(Debug, Clone)]
pub struct EventWriter {
    inner: Arc<EventWriterInner>,
}

#[derive(Debug)]
struct EventWriterInner {
    path: PathBuf,
    session_id: String,
    lock: Mutex<()>,
}

impl EventWriter {
    pub fn new(path: impl Into<PathBuf>, session_id: impl Into<String>) -> Self {
        Self {
            inner: Arc::new(EventWriterInner {
                path: path.into(),
                session_id: session_id.into(),
                lock: Mutex::new(()),
            }),
        }
    }

    pub fn path(&self) -> &Path {
        &self.inner.path
    }

    pub fn session_id(&self) -> &str {
        &self.inner.session_id
    }

    /// `payload` should be a JSON object; anything else is recorded under `value`.
    pub fn emit(&self, event_type: &str, payload: Value) -> anyhow::Result<Value> {
        let mut event = Map::new();
        event.insert("type".to_string(), Value::String(event_type.to_string()));
        event.insert(
            "session_id".to_string(),
            Value::String(self.inner.session_id.clone()),
        );
        event.insert("ts".to_string(), Value::String(now_utc_iso()));
        match payload {
            Value::Object(fields) => event.extend(fields),
            Value::Null => {}
            other => {
                event.insert("value".to_string(), other);
            }
        }

        if let Some(parent) = self.inner.path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let line = serde_json::to_string(&event)?;
        let _guard = self
            .inner
            .lock
            .lock()
            .map_err(|_| anyhow::anyhow!("event writer lock poisoned"))?;
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.inner.path)?;
        file.write_all(line.as_bytes())?;
        file.write_all(b"\n")?;

        Ok(Value::Object(event))
    }

    /// Like [`EventWriter::emit`] but a write failure is only logged.
    pub fn record(&self, event_type: &str, payload: Value) {
        if let Err(err) = self.emit(event_type, payload) {
            tracing::warn!(event = event_type, error = %err, "failed to append run event");
        }
    }
}

fn now_utc_iso() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Micros, false)
}
