/// Tunable policy constants.
///
/// `serde` derive plus a per-field `default_*` function so a host can
/// deserialize overrides from whatever config format it already uses,
/// without the engine itself touching a file path — loading config from
/// disk is host responsibility, out of scope for this crate.
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct EngineConfig {
    /// Fraction of in-range characters the Optimizer must save on its own
    /// before the Truncator is skipped.
    #[serde(default = "default_saved_ratio_threshold")]
    pub saved_ratio_threshold: f64,

    /// `totalTokens / quarter_divisor > maxAllowedSize` selects the `quarter`
    /// keep aggressiveness instead of `half`.
    #[serde(default = "default_quarter_divisor")]
    pub quarter_divisor: u64,
}

fn default_saved_ratio_threshold() -> f64 {
    0.30
}

fn default_quarter_divisor() -> u64 {
    2
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            saved_ratio_threshold: default_saved_ratio_threshold(),
            quarter_divisor: default_quarter_divisor(),
        }
    }
}
