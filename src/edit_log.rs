/// Append-only, timestamped overlay of in-place block rewrites.
///
/// A source pattern of deep-cloning messages and mutating strings in place
/// is replaced here by an explicit time-stamped overlay applied lazily at
/// render time. Rollback becomes a log-prune instead of a
/// history rewrite.
use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::EngineError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[repr(u8)]
pub enum EditType {
    Undefined = 0,
    NoFileRead = 1,
    ReadFileTool = 2,
    AlterFileTool = 3,
    FileMention = 4,
}

/// One recorded rewrite of a single `(messageIndex, blockIndex)` block.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContextUpdate {
    pub timestamp: i64,
    pub update_type: String,
    pub content: Vec<String>,
    pub metadata: Vec<Vec<String>>,
}

impl ContextUpdate {
    pub fn text(timestamp: i64, content: String) -> Self {
        Self { timestamp, update_type: "text".to_string(), content: vec![content], metadata: Vec::new() }
    }

    pub fn text_with_metadata(timestamp: i64, content: String, metadata: Vec<Vec<String>>) -> Self {
        Self { timestamp, update_type: "text".to_string(), content: vec![content], metadata }
    }

    /// The current content string — always present by construction.
    pub fn current_text(&self) -> &str {
        self.content.first().map(String::as_str).unwrap_or("")
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct MessageEntry {
    edit_type: EditType,
    // BTreeMap keeps on-disk output deterministic (stable key order) without
    // needing an explicit sort pass on every serialize.
    blocks: BTreeMap<usize, Vec<ContextUpdate>>,
}

impl Default for EditType {
    fn default() -> Self {
        EditType::Undefined
    }
}

/// The two-level `messageIndex -> (EditType, blockIndex -> [ContextUpdate])`
/// index.
#[derive(Debug, Clone, Default)]
pub struct EditLog {
    entries: BTreeMap<usize, MessageEntry>,
}

impl EditLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append an update. Sets the outer `edit_type` for `message_index` on
    /// first use only — later calls for the same message never downgrade or
    /// change a type already recorded, matching "sets the outer editType on
    /// first use for that messageIndex".
    ///
    /// Panics only on a genuine programmer error (non-monotonic timestamp for
    /// the same block) caught in debug assertions — production callers are
    /// expected to always call with non-decreasing timestamps under the
    /// engine's single-threaded ordering guarantee.
    pub fn apply(
        &mut self,
        message_index: usize,
        block_index: usize,
        content: Vec<String>,
        metadata: Vec<Vec<String>>,
        timestamp: i64,
        edit_type: EditType,
    ) {
        let entry = self.entries.entry(message_index).or_insert_with(|| MessageEntry {
            edit_type,
            blocks: BTreeMap::new(),
        });
        let updates = entry.blocks.entry(block_index).or_default();
        debug_assert!(
            updates.last().map(|u| u.timestamp <= timestamp).unwrap_or(true),
            "ContextUpdate timestamps must be non-decreasing for a given (messageIndex, blockIndex)"
        );
        updates.push(ContextUpdate {
            timestamp,
            update_type: "text".to_string(),
            content,
            metadata,
        });
    }

    pub fn apply_text(
        &mut self,
        message_index: usize,
        block_index: usize,
        text: String,
        timestamp: i64,
        edit_type: EditType,
    ) {
        self.apply(message_index, block_index, vec![text], Vec::new(), timestamp, edit_type);
    }

    pub fn latest(&self, message_index: usize, block_index: usize) -> Option<&ContextUpdate> {
        self.entries.get(&message_index)?.blocks.get(&block_index)?.last()
    }

    pub fn edit_type(&self, message_index: usize) -> Option<EditType> {
        self.entries.get(&message_index).map(|e| e.edit_type)
    }

    pub fn has_entry(&self, message_index: usize) -> bool {
        self.entries.contains_key(&message_index)
    }

    pub fn has_block_entry(&self, message_index: usize, block_index: usize) -> bool {
        self.entries
            .get(&message_index)
            .map(|e| e.blocks.contains_key(&block_index))
            .unwrap_or(false)
    }

    /// All `(messageIndex, blockIndex)` pairs with at least one recorded
    /// update, in ascending order. Used by the Renderer to walk the overlay.
    pub fn touched_blocks(&self) -> Vec<(usize, usize)> {
        let mut out = Vec::new();
        for (&mi, entry) in &self.entries {
            for &bi in entry.blocks.keys() {
                out.push((mi, bi));
            }
        }
        out
    }

    /// Drop every update with `timestamp > cutoff`, then drop now-empty
    /// inner and outer entries.
    pub fn prune_after(&mut self, cutoff: i64) {
        let mut empty_messages = Vec::new();
        for (&mi, entry) in self.entries.iter_mut() {
            let mut empty_blocks = Vec::new();
            for (&bi, updates) in entry.blocks.iter_mut() {
                updates.retain(|u| u.timestamp <= cutoff);
                if updates.is_empty() {
                    empty_blocks.push(bi);
                }
            }
            for bi in empty_blocks {
                entry.blocks.remove(&bi);
            }
            if entry.blocks.is_empty() {
                empty_messages.push(mi);
            }
        }
        let dropped_messages = empty_messages.len();
        for mi in empty_messages {
            self.entries.remove(&mi);
        }
        debug!(cutoff, dropped_messages, "edit log pruned");
    }

    /// Serialize to the stable on-disk tuple form.
    pub fn serialize(&self) -> serde_json::Value {
        serde_json::Value::Array(
            self.entries
                .iter()
                .map(|(mi, entry)| {
                    let blocks = serde_json::Value::Array(
                        entry
                            .blocks
                            .iter()
                            .map(|(bi, updates)| {
                                let updates_json: Vec<serde_json::Value> = updates
                                    .iter()
                                    .map(|u| {
                                        serde_json::json!([
                                            u.timestamp,
                                            u.update_type,
                                            u.content,
                                            u.metadata,
                                        ])
                                    })
                                    .collect();
                                serde_json::json!([bi, updates_json])
                            })
                            .collect(),
                    );
                    serde_json::json!([mi, [entry.edit_type as u8, blocks]])
                })
                .collect(),
        )
    }

    pub fn to_json_string(&self) -> String {
        self.serialize().to_string()
    }

    /// Parse the on-disk tuple form. Tolerant of trailing empty arrays;
    /// a genuinely malformed document is reported as `EngineError` and
    /// treated as equivalent to an empty log, never as a hard failure.
    pub fn deserialize(value: &serde_json::Value) -> Result<Self, EngineError> {
        let mut log = EditLog::new();
        let Some(outer) = value.as_array() else {
            return Err(EngineError::MalformedLogEntry("edit log root is not an array".into()));
        };
        for entry in outer {
            let arr = entry
                .as_array()
                .ok_or_else(|| EngineError::MalformedLogEntry("entry is not a [messageIndex, ...] tuple".into()))?;
            if arr.len() < 2 {
                continue;
            }
            let message_index = arr[0]
                .as_u64()
                .ok_or_else(|| EngineError::MalformedLogEntry("messageIndex not an integer".into()))?
                as usize;
            let inner = arr[1]
                .as_array()
                .ok_or_else(|| EngineError::MalformedLogEntry("missing [editType, blocks] pair".into()))?;
            if inner.len() < 2 {
                continue;
            }
            let edit_type = match inner[0].as_u64() {
                Some(0) => EditType::Undefined,
                Some(1) => EditType::NoFileRead,
                Some(2) => EditType::ReadFileTool,
                Some(3) => EditType::AlterFileTool,
                Some(4) => EditType::FileMention,
                _ => EditType::Undefined,
            };
            let blocks = inner[1].as_array().cloned().unwrap_or_default();
            for block in blocks {
                let barr = match block.as_array() {
                    Some(a) if a.len() >= 2 => a,
                    _ => continue,
                };
                let block_index = barr[0].as_u64().unwrap_or(0) as usize;
                let updates = barr[1].as_array().cloned().unwrap_or_default();
                for update in updates {
                    let uarr = match update.as_array() {
                        Some(a) if a.len() >= 3 => a,
                        _ => continue,
                    };
                    let timestamp = uarr[0].as_i64().unwrap_or(0);
                    let update_type = uarr[1].as_str().unwrap_or("text").to_string();
                    let content: Vec<String> = uarr[2]
                        .as_array()
                        .map(|a| a.iter().filter_map(|v| v.as_str().map(String::from)).collect())
                        .unwrap_or_default();
                    let metadata: Vec<Vec<String>> = uarr
                        .get(3)
                        .and_then(|v| v.as_array())
                        .map(|outer| {
                            outer
                                .iter()
                                .map(|inner| {
                                    inner
                                        .as_array()
                                        .map(|a| a.iter().filter_map(|v| v.as_str().map(String::from)).collect())
                                        .unwrap_or_default()
                                })
                                .collect()
                        })
                        .unwrap_or_default();

                    let e = log.entries.entry(message_index).or_insert_with(|| MessageEntry {
                        edit_type,
                        blocks: BTreeMap::new(),
                    });
                    e.blocks.entry(block_index).or_default().push(ContextUpdate {
                        timestamp,
                        update_type,
                        content,
                        metadata,
                    });
                }
            }
        }
        Ok(log)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn apply_and_latest() {
        let mut log = EditLog::new();
        log.apply_text(3, 0, "first".into(), 100, EditType::ReadFileTool);
        log.apply_text(3, 0, "second".into(), 200, EditType::ReadFileTool);
        assert_eq!(log.latest(3, 0).unwrap().current_text(), "second");
    }

    #[test]
    fn edit_type_set_on_first_use_only() {
        let mut log = EditLog::new();
        log.apply_text(1, 0, "a".into(), 1, EditType::ReadFileTool);
        log.apply_text(1, 0, "b".into(), 2, EditType::AlterFileTool);
        assert_eq!(log.edit_type(1), Some(EditType::ReadFileTool));
    }

    #[test]
    fn latest_missing_is_none() {
        let log = EditLog::new();
        assert!(log.latest(0, 0).is_none());
    }

    #[test]
    fn prune_after_drops_newer_updates() {
        let mut log = EditLog::new();
        log.apply_text(2, 0, "a".into(), 10, EditType::ReadFileTool);
        log.apply_text(2, 0, "b".into(), 20, EditType::ReadFileTool);
        log.prune_after(10);
        assert_eq!(log.latest(2, 0).unwrap().current_text(), "a");
    }

    #[test]
    fn prune_after_drops_empty_entries_entirely() {
        let mut log = EditLog::new();
        log.apply_text(2, 0, "a".into(), 10, EditType::ReadFileTool);
        log.prune_after(5);
        assert!(!log.has_entry(2));
        assert!(log.latest(2, 0).is_none());
    }

    #[test]
    fn prune_after_idempotent() {
        let mut log = EditLog::new();
        log.apply_text(2, 0, "a".into(), 10, EditType::ReadFileTool);
        log.apply_text(2, 0, "b".into(), 20, EditType::ReadFileTool);
        log.prune_after(15);
        let once = log.to_json_string();
        log.prune_after(15);
        let twice = log.to_json_string();
        assert_eq!(once, twice);
    }

    #[test]
    fn touched_blocks_lists_all_recorded() {
        let mut log = EditLog::new();
        log.apply_text(1, 0, "a".into(), 1, EditType::FileMention);
        log.apply_text(1, 1, "b".into(), 1, EditType::FileMention);
        log.apply_text(3, 0, "c".into(), 1, EditType::ReadFileTool);
        let mut touched = log.touched_blocks();
        touched.sort();
        assert_eq!(touched, vec![(1, 0), (1, 1), (3, 0)]);
    }

    #[test]
    fn serialize_deserialize_roundtrip() {
        let mut log = EditLog::new();
        log.apply_text(1, 0, "notice".into(), 5, EditType::NoFileRead);
        log.apply(
            2,
            0,
            vec!["body".into()],
            vec![vec!["a.rs".into()], vec!["a.rs".into(), "b.rs".into()]],
            9,
            EditType::FileMention,
        );
        let json = log.serialize();
        let restored = EditLog::deserialize(&json).unwrap();
        assert_eq!(restored.to_json_string(), log.to_json_string());
        assert_eq!(restored.latest(2, 0).unwrap().metadata.len(), 2);
    }

    #[test]
    fn deserialize_tolerates_trailing_empty_arrays() {
        let value = serde_json::json!([[1, [1, [[0, []]]]]]);
        let log = EditLog::deserialize(&value).unwrap();
        assert!(!log.has_block_entry(1, 0));
    }

    #[test]
    fn deserialize_rejects_non_array_root() {
        let value = serde_json::json!({"not": "an array"});
        assert!(EditLog::deserialize(&value).is_err());
    }

    #[test]
    fn missing_file_equivalent_to_empty_log() {
        let log = EditLog::new();
        assert_eq!(log.to_json_string(), "[]");
    }
}
