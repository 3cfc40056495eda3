/// Internal failure classification.
///
/// The engine never aborts a task: public entry points return plain
/// values, never `Result<_, EngineError>`. These variants exist purely so a
/// host's `tracing` subscriber can distinguish *why* an operation fell back
/// to a no-op — the enum never leaves the crate as an actual error return.
use thiserror::Error;

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("malformed log entry: {0}")]
    MalformedLogEntry(String),

    #[error("edit log persistence failed: {0}")]
    PersistenceIo(#[from] std::io::Error),

    #[error("invariant violation: {0}")]
    InvariantViolation(String),

    #[error("no-op: {0}")]
    Programmer(String),
}
