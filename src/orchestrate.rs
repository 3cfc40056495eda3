/// Top-level entry point: Oracle → Optimizer → Truncator → Renderer →
/// persistence, in that order, with no yield point between the Oracle's
/// decision and the Edit Log write.
use std::path::Path;

use crate::config::EngineConfig;
use crate::edit_log::EditLog;
use crate::message::Message;
use crate::notices::NoticeProvider;
use crate::oracle::{self, LogEntry};
use crate::optimizer;
use crate::truncate::{self, DeletedRange};
use crate::{persistence, Keep};

pub struct ModelConfig {
    pub context_window: u64,
}

/// `prepare_next_context`.
///
/// `prev_req_index` mirrors the source's `prevReqIndex`: `None` (equivalent
/// to `< 0`) means there is no prior request to compare against, so no
/// compaction decision is made this call.
pub fn prepare_next_context(
    raw: &[Message],
    log_entries: &[LogEntry],
    model: &ModelConfig,
    deleted_range: Option<DeletedRange>,
    prev_req_index: Option<usize>,
    task_dir: &Path,
    auto_condense: bool,
    config: &EngineConfig,
    notices: &dyn NoticeProvider,
) -> (Option<DeletedRange>, bool, Vec<Message>) {
    let log_path = task_dir.join("edit_log.json");
    let mut edit_log = persistence::load(&log_path);

    let mut new_deleted_range = deleted_range;
    let mut updated = false;

    if !auto_condense {
        if let Some(prev_index) = prev_req_index {
            if let Some(decision) = oracle::decide(log_entries, model.context_window, config) {
                if decision.should_compact {
                    let keep = decision.keep.unwrap_or(Keep::Half);
                    let timestamp = log_entries.get(prev_index).map(LogEntry::ts).unwrap_or(0);

                    let start_of_rest = optimizer::scan_start(new_deleted_range);
                    let before = optimizer::total_in_range_chars(raw, start_of_rest);
                    let dup_notice = notices.duplicate_file_read_notice();
                    let (optimizer_changed, touched) = optimizer::optimize(raw, &mut edit_log, new_deleted_range, timestamp, &dup_notice);
                    let after = rendered_in_range_chars(raw, &edit_log, start_of_rest);
                    let saved_ratio = if before == 0 { 0.0 } else { (before.saturating_sub(after)) as f64 / before as f64 };

                    let need_to_truncate = !optimizer_changed || saved_ratio < config.saved_ratio_threshold;

                    if optimizer_changed && !touched.is_empty() {
                        updated = true;
                    }

                    if need_to_truncate {
                        let notice = notices.context_truncation_notice();
                        truncate::insert_standard_truncation_notice(&mut edit_log, timestamp, &notice);
                        if let Some(range) = truncate::next_truncation_range(raw, new_deleted_range, keep) {
                            new_deleted_range = Some(range);
                            updated = true;
                        }
                    }

                    if updated {
                        let _ = persistence::save(&log_path, &edit_log);
                    }
                }
            }
        }
    }

    let view = truncate::render(raw, &edit_log, new_deleted_range);
    (new_deleted_range, updated, view)
}

/// Character total after applying the overlay the Optimizer just wrote, used
/// only to compute the saved-ratio decision without re-rendering.
fn rendered_in_range_chars(raw: &[Message], edit_log: &EditLog, start: usize) -> usize {
    raw[start.min(raw.len())..]
        .iter()
        .enumerate()
        .map(|(offset, message)| {
            let message_index = start + offset;
            match &message.content {
                crate::message::Content::Blocks(blocks) => blocks
                    .iter()
                    .enumerate()
                    .map(|(block_index, block)| {
                        edit_log
                            .latest(message_index, block_index)
                            .map(|u| u.current_text().chars().count())
                            .unwrap_or_else(|| crate::message::block_char_len(block))
                    })
                    .sum(),
                crate::message::Content::Text(t) => t.chars().count(),
            }
        })
        .sum()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::Role;
    use crate::notices::DefaultNoticeProvider;
    use tempfile::tempdir;

    fn alternating(n: usize) -> Vec<Message> {
        (0..n)
            .map(|i| if i % 2 == 0 { Message::text(Role::User, format!("u{i}")) } else { Message::text(Role::Assistant, format!("a{i}")) })
            .collect()
    }

    #[test]
    fn no_compaction_below_threshold_returns_unmodified_view() {
        let dir = tempdir().unwrap();
        let raw = alternating(5);
        let log_entries = vec![LogEntry::ApiReqStarted { ts: 1, tokens_in: 100, tokens_out: 0, cache_writes: 0, cache_reads: 0 }];
        let model = ModelConfig { context_window: 64_000 };
        let config = EngineConfig::default();
        let notices = DefaultNoticeProvider;
        let (range, updated, view) = prepare_next_context(&raw, &log_entries, &model, None, Some(0), dir.path(), false, &config, &notices);
        assert!(range.is_none());
        assert!(!updated);
        assert_eq!(view.len(), 5);
    }

    #[test]
    fn auto_condense_true_skips_compaction_decision_entirely() {
        let dir = tempdir().unwrap();
        let raw = alternating(21);
        let log_entries = vec![LogEntry::ApiReqStarted { ts: 1, tokens_in: 40_000, tokens_out: 0, cache_writes: 0, cache_reads: 0 }];
        let model = ModelConfig { context_window: 64_000 };
        let config = EngineConfig::default();
        let notices = DefaultNoticeProvider;
        let (range, updated, view) = prepare_next_context(&raw, &log_entries, &model, None, Some(0), dir.path(), true, &config, &notices);
        assert!(range.is_none());
        assert!(!updated);
        assert_eq!(view.len(), 21);
    }

    #[test]
    fn compaction_over_threshold_truncates_and_persists() {
        let dir = tempdir().unwrap();
        let raw = alternating(21);
        let log_entries = vec![LogEntry::ApiReqStarted { ts: 1, tokens_in: 40_000, tokens_out: 0, cache_writes: 0, cache_reads: 0 }];
        let model = ModelConfig { context_window: 64_000 };
        let config = EngineConfig::default();
        let notices = DefaultNoticeProvider;
        let (range, updated, view) = prepare_next_context(&raw, &log_entries, &model, None, Some(0), dir.path(), false, &config, &notices);
        assert!(range.is_some());
        assert!(updated);
        assert!(view.len() < 21);
        let persisted = persistence::load(&dir.path().join("edit_log.json"));
        assert!(persisted.has_block_entry(1, 0));
    }

    #[test]
    fn no_prev_req_index_skips_compaction() {
        let dir = tempdir().unwrap();
        let raw = alternating(21);
        let log_entries = vec![LogEntry::ApiReqStarted { ts: 1, tokens_in: 40_000, tokens_out: 0, cache_writes: 0, cache_reads: 0 }];
        let model = ModelConfig { context_window: 64_000 };
        let config = EngineConfig::default();
        let notices = DefaultNoticeProvider;
        let (range, updated, view) = prepare_next_context(&raw, &log_entries, &model, None, None, dir.path(), false, &config, &notices);
        assert!(range.is_none());
        assert!(!updated);
        assert_eq!(view.len(), 21);
    }
}
