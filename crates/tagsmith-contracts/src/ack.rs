use std::path::{Path, PathBuf};

use serde_json::{Map, Value};

const ACK_KEY: &str = "disclaimer_acknowledged";

/// Durable store for the one-time disclaimer acknowledgement.
///
/// A small JSON object file; the flag lives under a fixed key so the
/// file can grow other session-independent flags later without a schema
/// migration. Nothing else survives a session.
#[derive(Debug, Clone)]
pub struct AckStore {
    path: PathBuf,
}

impl AckStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn is_acknowledged(&self) -> bool {
        read_json_object(&self.path)
            .and_then(|payload| payload.get(ACK_KEY).and_then(Value::as_bool))
            .unwrap_or(false)
    }

    pub fn acknowledge(&self) -> anyhow::Result<()> {
        let mut payload = read_json_object(&self.path).unwrap_or_default();
        payload.insert(ACK_KEY.to_string(), Value::Bool(true));
        write_json_object(&self.path, &payload)
    }
}

fn read_json_object(path: &Path) -> Option<Map<String, Value>> {
    let raw = std::fs::read_to_string(path).ok()?;
    let parsed: Value = serde_json::from_str(&raw).ok()?;
    parsed.as_object().cloned()
}

fn write_json_object(path: &Path, payload: &Map<String, Value>) -> anyhow::Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(
        path,
        serde_json::to_string_pretty(&Value::Object(payload.clone()))?,
    )?;
    Ok(())
}
