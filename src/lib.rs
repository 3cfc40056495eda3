/// Bounded, rewindable message-history engine for tool-using LLM conversations.
///
/// A host feeds raw message history plus a request-telemetry log on every
/// turn; the engine decides whether the window needs compacting, collapses
/// duplicate file reads first, truncates only if that alone isn't enough,
/// and hands back a freshly materialized view. The raw history and the
/// host's model/session state are never mutated — every rewrite lives in
/// the Edit Log overlay and the host is free to discard
/// a returned view without losing anything.
pub mod config;
pub mod edit_log;
pub mod error;
pub mod message;
pub mod notices;
pub mod optimizer;
pub mod oracle;
pub mod orchestrate;
pub mod persistence;
pub mod truncate;

pub use config::EngineConfig;
pub use edit_log::{ContextUpdate, EditLog, EditType};
pub use error::EngineError;
pub use message::{Block, Content, Message, Role};
pub use notices::{DefaultNoticeProvider, NoticeProvider};
pub use oracle::Keep;
pub use orchestrate::{prepare_next_context, ModelConfig};
pub use truncate::DeletedRange;
