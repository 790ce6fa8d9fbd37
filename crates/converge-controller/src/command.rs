//! Operator commands delivered to a workload's control loop.

use tokio::sync::oneshot;

use converge_state::{Revision, RolloutState};

use crate::error::ControllerResult;

/// Applied between ticks, never in the middle of one.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    Pause,
    Resume,
    /// Reverse the active rollout. Without an active rollout, re-apply the
    /// template of `to_revision` as a fresh rollout.
    Rollback { to_revision: Option<Revision> },
}

/// A command plus the channel its result goes back on.
#[derive(Debug)]
pub struct CommandRequest {
    pub command: Command,
    pub reply: oneshot::Sender<ControllerResult<RolloutState>>,
}
