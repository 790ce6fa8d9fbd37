//! converge-controller: one control loop per workload.
//!
//! Each workload gets its own tokio task (a [`WorkloadLoop`]). Every tick
//! runs observe, decide and act as one unit:
//!
//! ```text
//! StateStore ──spec──┐
//!                    ▼
//! Observer.refresh ─> Autoscaler.decide ─> target
//!                                            │
//!                 ┌──── rollout active? ─────┤
//!                 ▼                          ▼
//!        Rollout.step (+ HealthGate)     reconcile()
//!                 └──────────┬───────────────┘
//!                            ▼
//!                   Reconciler.apply ─> FailureTracker ─> WorkloadStatus
//! ```
//!
//! Operator commands (pause, resume, rollback) and shutdown reach a loop
//! over channels and are only handled between ticks. The [`Controller`]
//! starts and stops loops as specs come and go; a [`ControllerHandle`] is
//! the non-generic view the API uses.

pub mod command;
pub mod error;
pub mod manager;
pub mod workload;

pub use command::{Command, CommandRequest};
pub use error::{ControllerError, ControllerResult};
pub use manager::{Controller, ControllerHandle, SyncReport};
pub use workload::{StatusMap, WorkloadLoop};
