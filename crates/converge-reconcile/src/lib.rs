//! converge-reconcile: drive observed replica counts toward the target.
//!
//! [`reconcile`] is pure: from `(spec, observed, decision)` it computes a
//! single [`ReconcileAction`]. The [`Reconciler`] applies an action against
//! the orchestration backend, and the [`FailureTracker`] turns repeated
//! create failures into a `Degraded` status.
//!
//! # Architecture
//!
//! ```text
//! ScalingDecision ─┐
//! WorkloadSpec ────┼─> reconcile() ─> ReconcileAction ─> Reconciler::apply()
//! ObservedState ───┘                                          │
//!                                                  ReconcileOutcome
//!                                                             │
//!                                                     FailureTracker
//! ```

pub mod action;
pub mod error;
pub mod failure;
pub mod reconciler;

pub use action::{ReconcileAction, desired_target, reconcile, select_victims};
pub use error::{ReconcileError, ReconcileResult};
pub use failure::FailureTracker;
pub use reconciler::{ReconcileOutcome, Reconciler};
