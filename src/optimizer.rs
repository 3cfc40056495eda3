/// Duplicate file-read collapse across the in-range window.
///
/// A cache keyed on file path can prevent a duplicate read before it
/// happens, by intercepting the tool call. This engine instead runs over
/// history that already contains the duplicates — the same problem worked
/// backwards — and collapses everything but the most recent occurrence of
/// each path to a short fixed notice, an explanatory stand-in for the
/// re-read.
use std::collections::{HashMap, HashSet};
use std::sync::LazyLock;

use regex::Regex;

use crate::edit_log::{ContextUpdate, EditLog, EditType};
use crate::message::{get_text, Block, Message, Role};

static TOOL_RESULT_HEADER: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"^\[(read_file|write_to_file|replace_in_file) for '([^']+)'\] Result:"#).unwrap()
});

static FINAL_FILE_CONTENT: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"(?s)<final_file_content path="([^"]+)">.*?</final_file_content>"#).unwrap());

static FILE_MENTION: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"(?s)<file_content path="([^"]+)">.*?</file_content>"#).unwrap());

pub fn duplicate_file_read_notice() -> &'static str {
    "[File content collapsed — a more recent read of this file is shown later in the conversation.]"
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Format {
    New,
    Legacy,
}

#[derive(Debug, Clone)]
enum Recording {
    /// A `read_file` full-block replacement.
    FullBlock { message_index: usize, block_index: usize, replacement: String },
    /// A `write_to_file`/`replace_in_file` rewrite of the `<final_file_content>` span only.
    FinalFileContent { message_index: usize, block_index: usize, matched: String, replacement: String },
    /// A `<file_content>` mention occurrence.
    Mention { message_index: usize, block_index: usize, matched: String, replacement: String },
}

struct Occurrence {
    path: String,
    recording: Recording,
}

/// `startFromIndex`: `deletedRange.end + 1`, or `2` with no deletion yet.
pub fn scan_start(deleted_range: Option<(usize, usize)>) -> usize {
    deleted_range.map(|(_, e)| e + 1).unwrap_or(2)
}

fn current_block_text(messages: &[Message], edit_log: &EditLog, message_index: usize, block_index: usize) -> Option<String> {
    if let Some(update) = edit_log.latest(message_index, block_index) {
        return Some(update.current_text().to_string());
    }
    let message = messages.get(message_index)?;
    let blocks = match &message.content {
        crate::message::Content::Blocks(b) => b,
        crate::message::Content::Text(_) => return None,
    };
    let block = blocks.get(block_index)?;
    get_text(block).map(str::to_string)
}

/// Run one optimizer pass over `[scan_start(deleted_range), messages.len())`,
/// appending rewrites to `edit_log`. Returns `(didUpdate, touchedMessageIndices)`.
pub fn optimize(
    messages: &[Message],
    edit_log: &mut EditLog,
    deleted_range: Option<(usize, usize)>,
    timestamp: i64,
    notice: &str,
) -> (bool, HashSet<usize>) {
    let start = scan_start(deleted_range);
    let mut occurrences: Vec<Occurrence> = Vec::new();

    for message_index in start..messages.len() {
        let message = &messages[message_index];
        if message.role != Role::User {
            continue;
        }
        let blocks = match &message.content {
            crate::message::Content::Blocks(b) => b,
            crate::message::Content::Text(_) => continue,
        };
        if blocks.is_empty() {
            continue;
        }

        // A message already collapsed by a prior pass (read_file full-block or
        // write_to_file/replace_in_file final-file-content rewrite) is resolved
        // for good — the notice text still matches the header/tag regexes, so
        // without this the next no-op pass would re-detect and re-record it.
        if matches!(edit_log.edit_type(message_index), Some(EditType::ReadFileTool) | Some(EditType::AlterFileTool)) {
            continue;
        }

        // Tool-result branch: only block 0 is inspected for the header.
        if let Some(text) = get_text(&blocks[0]) {
            if let Some(caps) = TOOL_RESULT_HEADER.captures(text) {
                let tool = caps.get(1).unwrap().as_str();
                let path = caps.get(2).unwrap().as_str().to_string();
                let header_end = caps.get(0).unwrap().end();
                let rest_same_block = text[header_end..].trim_start();
                let format = if !rest_same_block.is_empty() || blocks.len() == 1 {
                    Format::New
                } else {
                    Format::Legacy
                };

                if tool == "read_file" {
                    match format {
                        Format::New => {
                            let header = &text[..header_end];
                            let replacement = format!("{header}\n{}", notice);
                            occurrences.push(Occurrence {
                                path,
                                recording: Recording::FullBlock { message_index, block_index: 0, replacement },
                            });
                        }
                        Format::Legacy => {
                            occurrences.push(Occurrence {
                                path,
                                recording: Recording::FullBlock {
                                    message_index,
                                    block_index: 1,
                                    replacement: notice.to_string(),
                                },
                            });
                        }
                    }
                } else {
                    // write_to_file / replace_in_file
                    let content_block_index = if matches!(format, Format::New) { 0 } else { 1 };
                    if let Some(body) = current_block_text(messages, edit_log, message_index, content_block_index) {
                        if let Some(caps) = FINAL_FILE_CONTENT.captures(&body) {
                            let matched = caps.get(0).unwrap().as_str().to_string();
                            let fpath = caps.get(1).unwrap().as_str();
                            let replacement = format!(
                                "<final_file_content path=\"{fpath}\">{}</final_file_content>",
                                notice
                            );
                            occurrences.push(Occurrence {
                                path,
                                recording: Recording::FinalFileContent {
                                    message_index,
                                    block_index: content_block_index,
                                    matched,
                                    replacement,
                                },
                            });
                        }
                        // Absent final_file_content: user rejected the change, record nothing.
                    }
                }
                continue;
            }
        }

        // File-mention branch: blocks 0..2, only when no tool-result header matched.
        for block_index in 0..blocks.len().min(3) {
            // A mention block where every file seen has already been replaced
            // is fully resolved; rescanning it would re-match the collapsed
            // notice text and re-record a no-op rewrite.
            if let Some(update) = edit_log.latest(message_index, block_index) {
                if mention_block_is_fully_resolved(update) {
                    continue;
                }
            }
            let Some(body) = current_block_text(messages, edit_log, message_index, block_index) else {
                continue;
            };
            for caps in FILE_MENTION.captures_iter(&body) {
                let matched = caps.get(0).unwrap().as_str().to_string();
                let path = caps.get(1).unwrap().as_str().to_string();
                let replacement = format!(
                    "<file_content path=\"{path}\">{}</file_content>",
                    notice
                );
                occurrences.push(Occurrence {
                    path,
                    recording: Recording::Mention { message_index, block_index, matched, replacement },
                });
            }
        }
    }

    // Group by path, keep all but the last occurrence for rewriting.
    let mut by_path: HashMap<String, Vec<usize>> = HashMap::new();
    for (idx, occ) in occurrences.iter().enumerate() {
        by_path.entry(occ.path.clone()).or_default().push(idx);
    }

    let mut to_rewrite: HashSet<usize> = HashSet::new();
    for indices in by_path.values() {
        if indices.len() >= 2 {
            for &idx in &indices[..indices.len() - 1] {
                to_rewrite.insert(idx);
            }
        }
    }

    let mut touched = HashSet::new();
    let mut did_update = false;

    // Full-block and final-file-content rewrites apply directly.
    for &idx in &to_rewrite {
        match &occurrences[idx].recording {
            Recording::FullBlock { message_index, block_index, replacement } => {
                edit_log.apply_text(*message_index, *block_index, replacement.clone(), timestamp, EditType::ReadFileTool);
                touched.insert(*message_index);
                did_update = true;
            }
            Recording::FinalFileContent { message_index, block_index, matched, replacement } => {
                let base = current_block_text(messages, edit_log, *message_index, *block_index).unwrap_or_default();
                let new_text = base.replacen(matched.as_str(), replacement, 1);
                edit_log.apply_text(*message_index, *block_index, new_text, timestamp, EditType::AlterFileTool);
                touched.insert(*message_index);
                did_update = true;
            }
            Recording::Mention { .. } => {}
        }
    }

    // Mentions collapse multiple files per block: group rewritable mentions by
    // (messageIndex, blockIndex) and apply all substitutions in one pass,
    // seeded from the in-flight working string and carrying the
    // filesReplaced/filesSeen metadata lists.
    let mut mention_blocks: HashMap<(usize, usize), Vec<usize>> = HashMap::new();
    for &idx in &to_rewrite {
        if let Recording::Mention { message_index, block_index, .. } = &occurrences[idx].recording {
            mention_blocks.entry((*message_index, *block_index)).or_default().push(idx);
        }
    }
    // All mentions seen in a block this pass (rewritable or not), for the
    // allFilesSeenInThisBlockNow metadata entry.
    let mut all_seen_in_block: HashMap<(usize, usize), Vec<String>> = HashMap::new();
    for occ in &occurrences {
        if let Recording::Mention { message_index, block_index, .. } = &occ.recording {
            all_seen_in_block.entry((*message_index, *block_index)).or_default().push(occ.path.clone());
        }
    }

    for ((message_index, block_index), indices) in mention_blocks {
        let previous = edit_log.latest(message_index, block_index);
        let mut working = previous
            .map(|u| u.current_text().to_string())
            .unwrap_or_else(|| current_block_text(messages, edit_log, message_index, block_index).unwrap_or_default());

        let mut already_replaced: HashSet<String> = previous
            .and_then(|u| u.metadata.first())
            .map(|v| v.iter().cloned().collect())
            .unwrap_or_default();

        for &idx in &indices {
            if let Recording::Mention { matched, replacement, path, .. } = &occurrences[idx].recording {
                working = working.replacen(matched.as_str(), replacement, 1);
                already_replaced.insert(path.clone());
            }
        }

        let all_seen: Vec<String> = all_seen_in_block
            .get(&(message_index, block_index))
            .cloned()
            .unwrap_or_default();
        let mut files_replaced: Vec<String> = already_replaced.into_iter().collect();
        files_replaced.sort();
        let mut all_seen_sorted = all_seen;
        all_seen_sorted.sort();
        all_seen_sorted.dedup();

        edit_log.apply(
            message_index,
            block_index,
            vec![working],
            vec![files_replaced, all_seen_sorted],
            timestamp,
            EditType::FileMention,
        );
        touched.insert(message_index);
        did_update = true;
    }

    (did_update, touched)
}

/// Whether a previously-updated mention block can be skipped on a later pass:
/// `|filesReplacedAfterThisUpdate| == |allFilesSeenInThisBlockNow|`.
pub fn mention_block_is_fully_resolved(update: &ContextUpdate) -> bool {
    match (update.metadata.first(), update.metadata.get(1)) {
        (Some(replaced), Some(seen)) => replaced.len() == seen.len(),
        _ => false,
    }
}

/// Total characters across all in-range text blocks of `messages[start..]`,
/// counting image payloads by raw length.
pub fn total_in_range_chars(messages: &[Message], start: usize) -> usize {
    messages[start.min(messages.len())..]
        .iter()
        .map(|m| match &m.content {
            crate::message::Content::Blocks(blocks) => blocks.iter().map(crate::message::block_char_len).sum(),
            crate::message::Content::Text(t) => t.chars().count(),
        })
        .sum()
}
