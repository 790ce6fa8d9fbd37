//! converge-observer: actual state for every workload.
//!
//! The [`Observer`] polls the orchestration backend for a workload's
//! instances and the metrics source for their utilization, then publishes
//! the result as an immutable [`ObservedState`](converge_state::ObservedState)
//! snapshot. Readers always get a whole snapshot; a refresh swaps in a new
//! `Arc` and never edits one in place.

pub mod observer;

pub use observer::Observer;
