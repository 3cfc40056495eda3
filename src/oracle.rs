/// Deterministic compaction policy — decides *whether* and *how hard* to
/// compact, never *what* to drop (that's the Truncator's job).
///
/// Unlike a single proportional threshold computed before each call, the
/// Oracle reads an exact reported token count off the most recent
/// `api_req_started` entry rather than estimating from character counts.
use tracing::debug;

use crate::config::EngineConfig;

/// One user-visible log entry the Oracle can observe. Only `ApiReqStarted`
/// carries the token counts the Oracle needs; other variants exist so a host
/// can feed its whole telemetry stream without pre-filtering.
#[derive(Debug, Clone, PartialEq)]
pub enum LogEntry {
    ApiReqStarted {
        ts: i64,
        tokens_in: u64,
        tokens_out: u64,
        cache_writes: u64,
        cache_reads: u64,
    },
    Other {
        ts: i64,
    },
}

impl LogEntry {
    fn total_tokens(&self) -> Option<u64> {
        match self {
            LogEntry::ApiReqStarted { tokens_in, tokens_out, cache_writes, cache_reads, .. } => {
                Some(tokens_in + tokens_out + cache_writes + cache_reads)
            }
            LogEntry::Other { .. } => None,
        }
    }

    pub fn ts(&self) -> i64 {
        match self {
            LogEntry::ApiReqStarted { ts, .. } => *ts,
            LogEntry::Other { ts } => *ts,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Keep {
    None,
    LastTwo,
    Half,
    Quarter,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CompactionDecision {
    pub total_tokens: u64,
    pub max_allowed_size: u64,
    pub should_compact: bool,
    pub keep: Option<Keep>,
}

/// `maxAllowedSize` from the fixed per-window headroom schedule.
pub fn max_allowed_size(context_window: u64) -> u64 {
    let w = context_window;
    let headroom = if w == 64_000 {
        27_000
    } else if w == 128_000 {
        30_000
    } else if w == 200_000 {
        40_000
    } else if w >= 1_000_000 {
        100_000
    } else {
        (w as f64 * 0.2).max(40_000.0) as u64
    };
    w.saturating_sub(headroom)
}

/// Find the most recent `tokens_in + tokens_out + cache_writes + cache_reads`
/// total reported by an `ApiReqStarted` entry, scanning from the tail.
pub fn total_tokens(log: &[LogEntry]) -> Option<u64> {
    log.iter().rev().find_map(LogEntry::total_tokens)
}

/// Compute whether to compact and, if so, how aggressively.
pub fn decide(log: &[LogEntry], context_window: u64, config: &EngineConfig) -> Option<CompactionDecision> {
    let total = total_tokens(log)?;
    let max_allowed = max_allowed_size(context_window);
    let should_compact = total >= max_allowed;
    let keep = if should_compact {
        let quarter_trigger = total / config.quarter_divisor > max_allowed;
        Some(if quarter_trigger { Keep::Quarter } else { Keep::Half })
    } else {
        None
    };
    debug!(total_tokens = total, max_allowed_size = max_allowed, should_compact, ?keep, "compaction decision");
    Some(CompactionDecision { total_tokens: total, max_allowed_size: max_allowed, should_compact, keep })
}

/// Pure telemetry read: tokens and window of a chosen prior request.
pub fn tokens_at(log: &[LogEntry], index: usize) -> Option<u64> {
    log.get(index).and_then(LogEntry::total_tokens)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn req(tokens_in: u64, tokens_out: u64, cache_writes: u64, cache_reads: u64) -> LogEntry {
        LogEntry::ApiReqStarted { ts: 0, tokens_in, tokens_out, cache_writes, cache_reads }
    }

    fn other() -> LogEntry {
        LogEntry::Other { ts: 0 }
    }

    #[test]
    fn max_allowed_size_fixed_windows() {
        assert_eq!(max_allowed_size(64_000), 37_000);
        assert_eq!(max_allowed_size(128_000), 98_000);
        assert_eq!(max_allowed_size(200_000), 160_000);
        assert_eq!(max_allowed_size(2_000_000), 1_900_000);
    }

    #[test]
    fn max_allowed_size_falls_back_to_proportional_headroom() {
        // 500k window: headroom = max(500k*0.2, 40k) = 100k
        assert_eq!(max_allowed_size(500_000), 400_000);
        // 100k window: headroom = max(20k, 40k) = 40k
        assert_eq!(max_allowed_size(100_000), 60_000);
    }

    #[test]
    fn total_tokens_uses_most_recent_api_req() {
        let log = vec![req(10, 5, 0, 0), other(), req(20, 10, 1, 1)];
        assert_eq!(total_tokens(&log), Some(32));
    }

    #[test]
    fn total_tokens_none_without_api_req_entry() {
        let log = vec![other(), other()];
        assert_eq!(total_tokens(&log), None);
    }

    #[test]
    fn decide_no_compaction_under_threshold() {
        let cfg = EngineConfig::default();
        let log = vec![req(1_000, 500, 0, 0)];
        let d = decide(&log, 64_000, &cfg).unwrap();
        assert!(!d.should_compact);
        assert_eq!(d.keep, None);
    }

    #[test]
    fn decide_half_at_threshold() {
        let cfg = EngineConfig::default();
        // max_allowed_size(64_000) == 37_000
        let log = vec![req(37_000, 0, 0, 0)];
        let d = decide(&log, 64_000, &cfg).unwrap();
        assert!(d.should_compact);
        assert_eq!(d.keep, Some(Keep::Half));
    }

    #[test]
    fn decide_quarter_when_double_exceeds_max() {
        let cfg = EngineConfig::default();
        // total/2 > 37_000 requires total > 74_000
        let log = vec![req(80_000, 0, 0, 0)];
        let d = decide(&log, 64_000, &cfg).unwrap();
        assert!(d.should_compact);
        assert_eq!(d.keep, Some(Keep::Quarter));
    }

    #[test]
    fn decide_honors_configured_quarter_divisor() {
        let mut cfg = EngineConfig::default();
        cfg.quarter_divisor = 4;
        // total/4 > 37_000 requires total > 148_000; 80_000 alone would not trigger quarter now
        let log = vec![req(80_000, 0, 0, 0)];
        let d = decide(&log, 64_000, &cfg).unwrap();
        assert_eq!(d.keep, Some(Keep::Half));
    }

    #[test]
    fn decide_none_without_request_log() {
        let cfg = EngineConfig::default();
        assert!(decide(&[], 64_000, &cfg).is_none());
    }

    #[test]
    fn tokens_at_reads_specific_index() {
        let log = vec![req(10, 5, 0, 0), req(20, 10, 1, 1)];
        assert_eq!(tokens_at(&log, 1), Some(32));
        assert_eq!(tokens_at(&log, 5), None);
    }
}
