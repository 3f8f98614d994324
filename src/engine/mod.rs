//! Core engine: detection, reconciliation, ranking and the scan scheduler.

pub mod detector;
pub mod pipeline;
pub mod ranker;
pub mod reconciler;
pub mod scheduler;
