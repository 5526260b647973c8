// Core ID and status types shared by the server and its clients.
//
// `SessionId` is assigned by the server's session registry when a control
// socket is accepted and is carried explicitly on every RPC call (the RPC
// channel has no implicit session affinity). `RunId` numbers simulation runs.
// `PermissionTier` is totally ordered so that authorization checks can be
// written as plain comparisons (`tier >= PermissionTier::SimulationAdmin`).

use std::fmt;

use serde::{Deserialize, Serialize};

/// Server-assigned session identifier. Zero is never issued.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SessionId(pub u64);

impl SessionId {
    /// Returns true for ids the registry could have issued.
    pub fn is_valid(self) -> bool {
        self.0 != 0
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Monotonically increasing simulation run number.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct RunId(pub u64);

/// Authorization level of a session, lowest first.
#[derive(
    Clone, Copy, Debug, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
pub enum PermissionTier {
    #[default]
    Unauthenticated,
    NormalUser,
    SimulationAdmin,
    Administrator,
}

/// Lifecycle state of the active simulation run.
///
/// The "waiting" condition after a bounded `start`/`resume` is a sub-state of
/// `Running` and is reported separately in [`RuntimeStatus::waiting`].
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RunStatus {
    #[default]
    Ready,
    Running,
    Paused,
    Stopped,
    Ended,
}

/// Snapshot of the controller state returned by `get_runtime_sim_status`.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct RuntimeStatus {
    pub run_id: RunId,
    pub status: RunStatus,
    /// Running, but holding at the end of a bounded interval until the caller
    /// resumes or stops the run.
    pub waiting: bool,
    pub real_time: bool,
    pub sim_time_s: f64,
}
