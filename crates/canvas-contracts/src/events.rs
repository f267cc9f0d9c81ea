use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use serde_json::{Map, Value};

use crate::now_utc_iso;

pub type EventPayload = Map<String, Value>;

/// Append-only JSON-lines log of generation requests.
///
/// Every line carries `event`, `session_id` and `ts`; those keys are written
/// last so a payload cannot shadow them.
#[derive(Debug, Clone)]
pub struct EventLog {
    inner: Arc<EventLogInner>,
}

#[derive(Debug)]
struct EventLogInner {
    path: PathBuf,
    session_id: String,
    lock: Mutex<()>,
}

impl EventLog {
    pub fn new(path: impl Into<PathBuf>, session_id: impl Into<String>) -> Self {
        Self {
            inner: Arc::new(EventLogInner {
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

    pub fn record(&self, event: &str, payload: EventPayload) -> anyhow::Result<Value> {
        let mut line_payload = payload;
        line_payload.insert("event".to_string(), Value::String(event.to_string()));
        line_payload.insert(
            "session_id".to_string(),
            Value::String(self.inner.session_id.clone()),
        );
        line_payload.insert("ts".to_string(), Value::String(now_utc_iso()));

        if let Some(parent) = self.inner.path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let line = serde_json::to_string(&line_payload)?;
        let _guard = self
            .inner
            .lock
            .lock()
            .map_err(|_| anyhow::anyhow!("event log lock poisoned"))?;
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.inner.path)?;
        file.write_all(line.as_bytes())?;
        file.write_all(b"\n")?;

        Ok(Value::Object(line_payload))
    }
}

#[cfg(test)]
mod tests {
    use std::fs;
    use std::thread;

    use chrono::DateTime;

    use super::*;

    #[test]
    fn record_writes_one_compact_line() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let path = temp.path().join("logs").join("events.jsonl");
        let log = EventLog::new(&path, "session-1");

        let mut payload = EventPayload::new();
        payload.insert("model".to_string(), Value::String("dall-e-3".to_string()));
        let recorded = log.record("image_generated", payload)?;

        let content = fs::read_to_string(&path)?;
        let line = content.lines().next().unwrap_or("");
        let parsed: Value = serde_json::from_str(line)?;

        assert_eq!(parsed, recorded);
        assert_eq!(parsed["event"], "image_generated");
        assert_eq!(parsed["session_id"], "session-1");
        assert_eq!(parsed["model"], "dall-e-3");
        DateTime::parse_from_rfc3339(parsed["ts"].as_str().unwrap_or(""))?;
        Ok(())
    }

    #[test]
    fn payload_cannot_shadow_reserved_keys() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let log = EventLog::new(temp.path().join("events.jsonl"), "session-1");

        let mut payload = EventPayload::new();
        payload.insert("event".to_string(), Value::String("spoofed".to_string()));
        payload.insert("session_id".to_string(), Value::String("other".to_string()));
        let recorded = log.record("image_edited", payload)?;

        assert_eq!(recorded["event"], "image_edited");
        assert_eq!(recorded["session_id"], log.session_id());
        assert_eq!(log.path(), temp.path().join("events.jsonl"));
        Ok(())
    }

    #[test]
    fn concurrent_writers_keep_lines_intact() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let path = temp.path().join("events.jsonl");
        let log = EventLog::new(&path, "session-1");

        thread::scope(|scope| {
            for worker in 0..4 {
                let log = log.clone();
                scope.spawn(move || {
                    for idx in 0..10 {
                        let mut payload = EventPayload::new();
                        payload.insert("worker".to_string(), Value::from(worker));
                        payload.insert("idx".to_string(), Value::from(idx));
                        log.record("tick", payload).ok();
                    }
                });
            }
        });

        let content = fs::read_to_string(&path)?;
        let lines: Vec<&str> = content.lines().collect();
        assert_eq!(lines.len(), 40);
        for line in lines {
            let parsed: Value = serde_json::from_str(line)?;
            assert_eq!(parsed["event"], "tick");
        }
        Ok(())
    }
}
