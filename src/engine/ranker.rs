//! Final ordering of reconciled signals.

use crate::types::Signal;

/// Maximum signals kept per scan.
pub const MAX_SIGNALS: usize = 10;

pub struct SignalRanker;

impl SignalRanker {
    /// Sort by score descending and keep the top `MAX_SIGNALS`.
    ///
    /// Stable: equal scores keep their input order. Idempotent on its own
    /// output.
    pub fn rank(mut signals: Vec<Signal>) -> Vec<Signal> {
        signals.sort_by(|a, b| b.score.total_cmp(&a.score));
        signals.truncate(MAX_SIGNALS);
        signals
    }
}
