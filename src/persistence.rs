/// Edit Log load/save — the only two disk-touching operations in the engine.
///
/// Mirrors `sessions::append_turn`/`load_session_turns` and
/// `telemetry::append_record`/`load_all`: an `OpenOptions`-based write
/// helper and a tolerant read that never panics on a missing file. Unlike
/// those two, the whole log is one JSON document rewritten per save, not
/// an append-only JSONL stream — there is exactly one edit log per task,
/// not one record per event.
use std::path::Path;

use tracing::warn;

use crate::edit_log::EditLog;
use crate::error::EngineError;

/// Persist `log` to `path` as the on-disk document. Truncates and
/// rewrites the whole file; any I/O failure is logged and returned, but
/// never panics — the in-memory log remains authoritative.
pub fn save(path: &Path, log: &EditLog) -> Result<(), EngineError> {
    let body = log.to_json_string();
    std::fs::write(path, body).map_err(|e| {
        warn!(path = %path.display(), error = %e, "edit log save failed, in-memory state remains authoritative");
        EngineError::PersistenceIo(e)
    })
}

/// Load the Edit Log from `path`. A missing file is equivalent to an empty
/// log; a malformed document is logged and treated the same way rather
/// than aborting task open.
pub fn load(path: &Path) -> EditLog {
    let body = match std::fs::read_to_string(path) {
        Ok(body) => body,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return EditLog::new(),
        Err(e) => {
            warn!(path = %path.display(), error = %e, "edit log read failed, starting from an empty log");
            return EditLog::new();
        }
    };
    if body.trim().is_empty() {
        return EditLog::new();
    }
    match serde_json::from_str::<serde_json::Value>(&body).map_err(|e| EngineError::MalformedLogEntry(e.to_string())) {
        Ok(value) => match EditLog::deserialize(&value) {
            Ok(log) => log,
            Err(e) => {
                warn!(path = %path.display(), error = %e, "edit log document malformed, starting from an empty log");
                EditLog::new()
            }
        },
        Err(e) => {
            warn!(path = %path.display(), error = %e, "edit log is not valid JSON, starting from an empty log");
            EditLog::new()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::edit_log::EditType;
    use tempfile::tempdir;

    #[test]
    fn missing_file_loads_as_empty_log() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("missing.json");
        let log = load(&path);
        assert_eq!(log.to_json_string(), "[]");
    }

    #[test]
    fn save_then_load_round_trips() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("log.json");
        let mut log = EditLog::new();
        log.apply_text(1, 0, "notice".into(), 5, EditType::NoFileRead);
        save(&path, &log).unwrap();
        let loaded = load(&path);
        assert_eq!(loaded.to_json_string(), log.to_json_string());
    }

    #[test]
    fn malformed_document_loads_as_empty_log() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("bad.json");
        std::fs::write(&path, "{not json array").unwrap();
        let log = load(&path);
        assert_eq!(log.to_json_string(), "[]");
    }

    #[test]
    fn empty_file_loads_as_empty_log() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("empty.json");
        std::fs::write(&path, "").unwrap();
        let log = load(&path);
        assert_eq!(log.to_json_string(), "[]");
    }
}
