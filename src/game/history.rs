//! Round History
//!
//! Append-only record of finished rounds. Keeps the full result list
//! for limit-based queries plus a short bounded window of recent crash
//! values for quick display on connect.

use std::collections::VecDeque;

use crate::game::state::RoundResult;

/// How many recent crash values are kept for the quick-display window.
pub const DISPLAY_RESULTS: usize = 10;

/// Append-only log of finalized rounds.
#[derive(Debug, Default)]
pub struct HistoryLog {
    rounds: Vec<RoundResult>,
    last_results: VecDeque<f64>,
}

impl HistoryLog {
    /// Create an empty log.
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a finalized round. Results are immutable once recorded.
    pub fn push(&mut self, result: RoundResult) {
        if self.last_results.len() >= DISPLAY_RESULTS {
            self.last_results.pop_front();
        }
        self.last_results.push_back(result.crash_value);
        self.rounds.push(result);
    }

    /// The most recent crash values, oldest first, at most
    /// [`DISPLAY_RESULTS`] entries.
    pub fn last_results(&self) -> Vec<f64> {
        self.last_results.iter().copied().collect()
    }

    /// Query retained rounds.
    ///
    /// A non-positive `limit` returns the entire retained list;
    /// otherwise the `limit` most recent results, in chronological
    /// order.
    pub fn recent(&self, limit: i64) -> Vec<RoundResult> {
        if limit <= 0 {
            return self.rounds.clone();
        }
        let skip = self.rounds.len().saturating_sub(limit as usize);
        self.rounds[skip..].to_vec()
    }

    /// Number of rounds recorded.
    pub fn len(&self) -> usize {
        self.rounds.len()
    }

    /// True if no round has finished yet.
    pub fn is_empty(&self) -> bool {
        self.rounds.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn result(round_id: u64, crash_value: f64) -> RoundResult {
        RoundResult {
            round_id,
            crash_value,
            results: Vec::new(),
            timestamp: round_id as f64,
        }
    }

    #[test]
    fn test_recent_limit_semantics() {
        let mut log = HistoryLog::new();
        for i in 1..=8 {
            log.push(result(i, 1.0 + i as f64));
        }

        // Non-positive limit returns everything
        assert_eq!(log.recent(0).len(), 8);
        assert_eq!(log.recent(-3).len(), 8);

        // Positive limit returns the most recent, chronological
        let five = log.recent(5);
        assert_eq!(five.len(), 5);
        assert_eq!(five.first().unwrap().round_id, 4);
        assert_eq!(five.last().unwrap().round_id, 8);

        // Limit beyond the retained length returns everything
        assert_eq!(log.recent(100).len(), 8);
    }

    #[test]
    fn test_last_results_bounded() {
        let mut log = HistoryLog::new();
        for i in 1..=15 {
            log.push(result(i, i as f64));
        }

        let window = log.last_results();
        assert_eq!(window.len(), DISPLAY_RESULTS);
        // Oldest entries dropped first
        assert_eq!(window[0], 6.0);
        assert_eq!(window[9], 15.0);

        // Full history is still intact
        assert_eq!(log.len(), 15);
    }
}
