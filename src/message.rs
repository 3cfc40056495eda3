/// Typed representation of a conversation turn.
///
/// `M[0].role` is always `user`, and roles strictly alternate thereafter.
/// The engine receives message slices by shared reference and never
/// mutates them in place — all rewrites live in the [`crate::edit_log::EditLog`]
/// overlay.
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    User,
    Assistant,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub content: Content,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Content {
    Text(String),
    Blocks(Vec<Block>),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Block {
    Text {
        text: String,
    },
    ToolUse {
        id: String,
        name: String,
        input: serde_json::Value,
    },
    ToolResult {
        tool_use_id: String,
        /// A short block list whose first block is usually a `Text` — modern
        /// tool-calling wraps the literal output this way.
        content: Vec<Block>,
    },
    Image {
        source: String,
    },
}

impl Message {
    pub fn text(role: Role, text: impl Into<String>) -> Self {
        Self { role, content: Content::Text(text.into()) }
    }

    pub fn blocks(role: Role, blocks: Vec<Block>) -> Self {
        Self { role, content: Content::Blocks(blocks) }
    }

    /// `ToolUse` blocks carried directly by an assistant message, in order.
    pub fn tool_uses(&self) -> Vec<(&str, &str)> {
        match &self.content {
            Content::Blocks(blocks) => blocks
                .iter()
                .filter_map(|b| match b {
                    Block::ToolUse { id, name, .. } => Some((id.as_str(), name.as_str())),
                    _ => None,
                })
                .collect(),
            Content::Text(_) => Vec::new(),
        }
    }

    /// `ToolResult` blocks carried directly by a user message, in order.
    pub fn tool_results(&self) -> Vec<&str> {
        match &self.content {
            Content::Blocks(blocks) => blocks
                .iter()
                .filter_map(|b| match b {
                    Block::ToolResult { tool_use_id, .. } => Some(tool_use_id.as_str()),
                    _ => None,
                })
                .collect(),
            Content::Text(_) => Vec::new(),
        }
    }
}

/// Peel a possible `ToolResult` wrapper and return the first inner text
/// block's text. This is the one place the "ToolResult wraps a Text" rule
/// is encoded so every component benefits.
pub fn get_text(block: &Block) -> Option<&str> {
    match block {
        Block::Text { text } => Some(text.as_str()),
        Block::ToolResult { content, .. } => content.iter().find_map(get_text),
        Block::ToolUse { .. } | Block::Image { .. } => None,
    }
}

/// Rewrite the text carried by `block` in place. Rejects blocks that are not
/// text-bearing by returning `false` — a `Programmer`-class no-op, never
/// a panic or an error.
pub fn set_text(block: &mut Block, new_text: &str) -> bool {
    match block {
        Block::Text { text } => {
            *text = new_text.to_string();
            true
        }
        Block::ToolResult { content, .. } => {
            for inner in content.iter_mut() {
                if set_text(inner, new_text) {
                    return true;
                }
            }
            false
        }
        Block::ToolUse { .. } | Block::Image { .. } => false,
    }
}

/// Character length of a block's content, counting an image's opaque source
/// payload as raw length.
pub fn block_char_len(block: &Block) -> usize {
    match block {
        Block::Text { text } => text.chars().count(),
        Block::ToolResult { content, .. } => content.iter().map(block_char_len).sum(),
        Block::Image { source } => source.chars().count(),
        Block::ToolUse { input, .. } => input.to_string().chars().count(),
    }
}
