/// Deletion-window selection and view materialization.
///
/// Rather than scanning forward one droppable pair at a time, this computes
/// the whole drop-eligible window in one pure arithmetic step and always
/// re-aligns the end of the window onto an assistant message, so alternation
/// never needs a second pass to fix.
use tracing::warn;

use crate::edit_log::EditLog;
use crate::message::{Block, Content, Message, Role};
use crate::oracle::Keep;

/// Inclusive `[start, end]` range of raw message indices being dropped.
pub type DeletedRange = (usize, usize);

/// `next_truncation_range(M, R, keep)`: a pure function of its
/// arguments, landing the end index on an assistant message.
pub fn next_truncation_range(messages: &[Message], deleted_range: Option<DeletedRange>, keep: Keep) -> Option<DeletedRange> {
    let n = messages.len();
    if n <= 2 {
        return None;
    }
    let start = deleted_range.map(|(_, e)| e + 1).unwrap_or(2);
    let l = n.saturating_sub(start);
    let remove_count = match keep {
        Keep::None => l,
        Keep::LastTwo => l.saturating_sub(2),
        Keep::Half => (l / 4) * 2,
        Keep::Quarter => ((l * 3 / 4) / 2) * 2,
    };
    if remove_count == 0 {
        return deleted_range;
    }
    let mut end_new = start + remove_count - 1;
    if end_new >= n {
        end_new = n - 1;
    }
    if messages[end_new].role != Role::Assistant && end_new > start {
        end_new -= 1;
    }
    Some((start, end_new))
}

pub fn context_truncation_notice() -> &'static str {
    "[Earlier parts of this conversation have been truncated to stay within the context window.]"
}

/// Insert the standard truncation notice at `(1, 0)` on first truncation,
/// once. `notice` comes from the host's [`crate::notices::NoticeProvider`].
pub fn insert_standard_truncation_notice(edit_log: &mut EditLog, timestamp: i64, notice: &str) {
    if !edit_log.has_block_entry(1, 0) {
        edit_log.apply_text(1, 0, notice.to_string(), timestamp, crate::edit_log::EditType::NoFileRead);
    }
}

/// Materialize `view = [M[0], M[1], M[startOfRest..n)]`, overlay the Edit
/// Log, strip orphan `ToolResult`s from `view[2]`, and repair
/// `ToolUse`/`ToolResult` pairing across adjacent assistant/user pairs.
pub fn render(messages: &[Message], edit_log: &EditLog, deleted_range: Option<DeletedRange>) -> Vec<Message> {
    let n = messages.len();
    if n == 0 {
        return Vec::new();
    }
    let start_of_rest = deleted_range.map(|(_, e)| e + 1).unwrap_or(2);
    let truncated = start_of_rest > 2;

    let mut view: Vec<Message> = Vec::new();
    view.push(messages[0].clone());
    if n > 1 {
        view.push(messages[1].clone());
    }
    for i in start_of_rest..n {
        view.push(messages[i].clone());
    }

    // Defensive fallback: `next_truncation_range` always
    // lands on an assistant message, so `view[2]` should always be user-role.
    // If some caller bypassed that and handed us an inconsistent range, don't
    // propagate a broken view — log and return the raw history untouched.
    if truncated && view.len() > 2 && view[2].role != Role::User {
        warn!(start_of_rest, "view[2].role != user after truncation, falling back to unmodified history");
        return messages.to_vec();
    }

    // Step 1: strip orphan ToolResult blocks from the first post-truncation message.
    if truncated && view.len() > 2 {
        if let Content::Blocks(blocks) = &view[2].content {
            if blocks.iter().any(|b| matches!(b, Block::ToolResult { .. })) {
                let filtered: Vec<Block> = blocks.iter().filter(|b| !matches!(b, Block::ToolResult { .. })).cloned().collect();
                view[2].content = Content::Blocks(filtered);
            }
        }
    }

    // Step 2: overlay the Edit Log onto the (possibly shrunk) view.
    // raw index -> view index mapping: 0->0, 1->1, [start_of_rest..n) -> 2..
    for (raw_index, block_index) in edit_log.touched_blocks() {
        let view_index = if raw_index == 0 {
            Some(0)
        } else if raw_index == 1 {
            if view.len() > 1 { Some(1) } else { None }
        } else if raw_index >= start_of_rest {
            let offset = raw_index - start_of_rest + 2;
            if offset < view.len() { Some(offset) } else { None }
        } else {
            None
        };
        let Some(vi) = view_index else { continue };
        let Some(update) = edit_log.latest(raw_index, block_index) else { continue };
        if let Content::Blocks(blocks) = &mut view[vi].content {
            if let Some(block) = blocks.get_mut(block_index) {
                crate::message::set_text(block, update.current_text());
            }
        }
    }

    // Step 3: repair ToolUse/ToolResult pairing across adjacent pairs.
    let mut i = 0;
    while i + 1 < view.len() {
        if view[i].role == Role::Assistant {
            let tool_use_ids: Vec<String> = view[i].tool_uses().iter().map(|(id, _)| id.to_string()).collect();
            if !tool_use_ids.is_empty() && view[i + 1].role == Role::User {
                repair_pairing(&mut view[i + 1], &tool_use_ids);
            }
        }
        i += 1;
    }

    view
}

fn repair_pairing(user_message: &mut Message, expected_ids: &[String]) {
    let Content::Blocks(blocks) = &user_message.content else { return };

    let mut by_id: std::collections::HashMap<&str, Block> = std::collections::HashMap::new();
    let mut others: Vec<Block> = Vec::new();
    for block in blocks {
        match block {
            Block::ToolResult { tool_use_id, .. } => {
                by_id.insert(tool_use_id.as_str(), block.clone());
            }
            other => others.push(other.clone()),
        }
    }

    let already_ordered = {
        let mut ok = true;
        let tool_result_prefix: Vec<&Block> = blocks.iter().take(expected_ids.len()).collect();
        if tool_result_prefix.len() != expected_ids.len() {
            ok = false;
        } else {
            for (b, id) in tool_result_prefix.iter().zip(expected_ids.iter()) {
                match b {
                    Block::ToolResult { tool_use_id, .. } if tool_use_id == id => {}
                    _ => { ok = false; break; }
                }
            }
        }
        ok
    };
    if already_ordered {
        return;
    }

    let mut new_blocks: Vec<Block> = Vec::with_capacity(blocks.len());
    for id in expected_ids {
        if let Some(existing) = by_id.remove(id.as_str()) {
            new_blocks.push(existing);
        } else {
            new_blocks.push(Block::ToolResult {
                tool_use_id: id.clone(),
                content: vec![Block::Text { text: "result missing".to_string() }],
            });
        }
    }
    new_blocks.extend(others);
    user_message.content = Content::Blocks(new_blocks);
}
