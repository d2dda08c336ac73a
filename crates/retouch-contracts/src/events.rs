use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use chrono::{SecondsFormat, Utc};
use serde_json::{Map, Value};

use crate::codec::CanonicalImage;

pub type EventPayload = Map<String, Value>;

const RESERVED_KEYS: &[&str] = &["type", "session_id", "seq", "ts"];

/// Append-only JSONL log of session activity.
///
/// Each line is one compact JSON object. `type`, `session_id`, `seq` and `ts`
/// are owned by the writer; payload keys with those names are dropped.
#[derive(Debug, Clone)]
pub struct EventWriter {
    inner: Arc<EventWriterInner>,
}

#[derive(Debug)]
struct EventWriterInner {
    path: PathBuf,
    session_id: String,
    seq: AtomicU64,
    lock: Mutex<()>,
}

impl EventWriter {
    pub fn new(path: impl Into<PathBuf>, session_id: impl Into<String>) -> Self {
        Self {
            inner: Arc::new(EventWriterInner {
                path: path.into(),
                session_id: session_id.into(),
                seq: AtomicU64::new(0),
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

    pub fn emit(&self, event_type: &str, payload: EventPayload) -> anyhow::Result<Value> {
        if let Some(parent) = self.inner.path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let _guard = self
            .inner
            .lock
            .lock()
            .map_err(|_| anyhow::anyhow!("event writer lock poisoned"))?;
        let mut event: Map<String, Value> = payload
            .into_iter()
            .filter(|(key, _)| !RESERVED_KEYS.contains(&key.as_str()))
            .collect();
        event.insert("type".to_string(), Value::String(event_type.to_string()));
        event.insert(
            "session_id".to_string(),
            Value::String(self.inner.session_id.clone()),
        );
        // Assigned under the file lock so line order matches seq order.
        event.insert(
            "seq".to_string(),
            Value::from(self.inner.seq.fetch_add(1, Ordering::SeqCst) + 1),
        );
        event.insert("ts".to_string(), Value::String(now_utc_iso()));
        let line = serde_json::to_string(&event)?;
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.inner.path)?;
        file.write_all(line.as_bytes())?;
        file.write_all(b"\n")?;

        Ok(Value::Object(event))
    }
}

/// Describes an image by MIME and digest; payload bytes never reach the log.
pub fn image_summary(image: &CanonicalImage) -> Value {
    let mut summary = Map::new();
    summary.insert("mime".to_string(), Value::String(image.mime().to_string()));
    summary.insert("digest".to_string(), Value::String(image.digest()));
    if let Some((width, height)) = image.dimensions() {
        summary.insert("width".to_string(), Value::from(width));
        summary.insert("height".to_string(), Value::from(height));
    }
    Value::Object(summary)
}

fn now_utc_iso() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Micros, false)
}

#[cfg(test)]
mod tests {
    use std::fs;

    use chrono::DateTime;

    use crate::codec::fixtures::canonical;

    use super::*;

    #[test]
    fn emit_writes_compact_jsonl_line() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let path = temp.path().join("events.jsonl");
        let writer = EventWriter::new(&path, "session-123");

        let mut payload = EventPayload::new();
        payload.insert("preset".to_string(), Value::String("sharpen".to_string()));
        let emitted = writer.emit("transform_dispatched", payload)?;

        let content = fs::read_to_string(&path)?;
        let line = content.lines().next().unwrap_or("");
        let parsed: Value = serde_json::from_str(line)?;

        assert_eq!(parsed, emitted);
        assert_eq!(parsed["type"], Value::String("transform_dispatched".to_string()));
        assert_eq!(parsed["session_id"], Value::String("session-123".to_string()));
        assert_eq!(parsed["seq"], Value::from(1));
        assert_eq!(parsed["preset"], Value::String("sharpen".to_string()));

        let ts = parsed["ts"].as_str().unwrap_or("");
        DateTime::parse_from_rfc3339(ts)?;
        Ok(())
    }

    #[test]
    fn payload_cannot_spoof_writer_fields() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let writer = EventWriter::new(temp.path().join("events.jsonl"), "session-a");
        writer.emit("session_started", EventPayload::new())?;

        let mut payload = EventPayload::new();
        payload.insert("type".to_string(), Value::String("image_loaded".to_string()));
        payload.insert("session_id".to_string(), Value::String("session-b".to_string()));
        payload.insert("seq".to_string(), Value::from(99));
        payload.insert("ts".to_string(), Value::String("yesterday".to_string()));
        payload.insert("generation".to_string(), Value::from(3));
        let emitted = writer.emit("reset", payload)?;

        assert_eq!(emitted["type"], Value::String("reset".to_string()));
        assert_eq!(emitted["session_id"], Value::String("session-a".to_string()));
        assert_eq!(emitted["seq"], Value::from(2));
        assert_ne!(emitted["ts"], Value::String("yesterday".to_string()));
        assert_eq!(emitted["generation"], Value::from(3));
        Ok(())
    }

    #[test]
    fn image_summary_nests_under_payload_key() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let path = temp.path().join("events.jsonl");
        let writer = EventWriter::new(&path, "session-a");
        let image = canonical([4, 5, 6]);

        let mut payload = EventPayload::new();
        payload.insert("image".to_string(), image_summary(&image));
        writer.emit("image_loaded", payload)?;

        let line: Value = serde_json::from_str(fs::read_to_string(&path)?.trim())?;
        assert_eq!(line["image"]["digest"], Value::String(image.digest()));
        assert_eq!(line["image"]["height"], Value::from(4));
        assert!(line.get("digest").is_none());
        Ok(())
    }

    #[test]
    fn emit_appends_lines_with_increasing_seq() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let path = temp.path().join("nested").join("events.jsonl");
        let writer = EventWriter::new(&path, "session-123");

        writer.emit("image_loaded", EventPayload::new())?;
        writer.clone().emit("reverted", EventPayload::new())?;

        let content = fs::read_to_string(&path)?;
        let lines: Vec<Value> = content
            .lines()
            .map(serde_json::from_str::<Value>)
            .collect::<Result<_, _>>()?;
        assert_eq!(lines.len(), 2);
        assert_eq!(lines[0]["type"], Value::String("image_loaded".to_string()));
        assert_eq!(lines[1]["type"], Value::String("reverted".to_string()));
        assert_eq!(lines[1]["seq"], Value::from(2));
        Ok(())
    }

    #[test]
    fn image_summary_omits_payload() {
        let summary = image_summary(&canonical([1, 2, 3]));
        assert_eq!(summary["mime"], Value::String("image/png".to_string()));
        assert_eq!(summary["width"], Value::from(4));
        assert!(!summary.to_string().contains("base64"));
    }
}
