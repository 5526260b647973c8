// The engine interface the server drives.
//
// Every method is synchronous and assumes the caller holds exclusive access
// (the server keeps the engine behind a mutex). Methods never check
// permissions; `airspace_relay::auth` does that before calling in.

use std::io;
use std::path::Path;

use airspace_protocol::{AircraftState, EntityKind, GroundVehicleState};
use thiserror::Error;

use crate::scenario::Scenario;
use crate::trajectory::TrajectoryFiles;

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("{kind:?} `{id}` does not exist")]
    UnknownEntity { kind: EntityKind, id: String },
    #[error("`{0}` is an external entity; its state cannot be set")]
    ExternalEntity(String),
    #[error("`{id}` targets waypoint {index} but its plan has {len}")]
    InvalidIndex { id: String, index: usize, len: usize },
    #[error("invalid scenario: {0}")]
    Scenario(#[from] serde_json::Error),
    #[error(transparent)]
    Io(#[from] io::Error),
}

/// Propagation time steps for one run, in simulated seconds.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct PropagationPlan {
    pub total_period_s: f64,
    pub surface_step_s: f64,
    pub terminal_step_s: f64,
    pub airborne_step_s: f64,
}

impl PropagationPlan {
    /// Same step for every flight phase.
    pub fn uniform(total_period_s: f64, step_s: f64) -> Self {
        Self {
            total_period_s,
            surface_step_s: step_s,
            terminal_step_s: step_s,
            airborne_step_s: step_s,
        }
    }

    /// The controller ticks at the finest step so no phase is under-sampled.
    pub fn base_step_s(&self) -> f64 {
        self.surface_step_s
            .min(self.terminal_step_s)
            .min(self.airborne_step_s)
    }

    pub fn is_valid(&self) -> bool {
        let positive = |v: f64| v.is_finite() && v > 0.0;
        positive(self.total_period_s)
            && positive(self.surface_step_s)
            && positive(self.terminal_step_s)
            && positive(self.airborne_step_s)
    }
}

impl Default for PropagationPlan {
    fn default() -> Self {
        Self::uniform(3600.0, 10.0)
    }
}

pub trait Engine: Send {
    /// Replace the entity tables with a scenario's contents.
    fn load_scenario(&mut self, scenario: Scenario) -> Result<(), EngineError>;

    /// Prepare a new run: store the plan and reset simulated time to zero.
    fn setup(&mut self, plan: PropagationPlan);

    /// Advance simulated time by `dt_s` seconds.
    fn propagate(&mut self, dt_s: f64);

    fn sim_time_s(&self) -> f64;

    fn aircraft_ids(&self) -> Vec<String>;
    fn ground_vehicle_ids(&self) -> Vec<String>;

    fn select_aircraft(&self, id: &str) -> Option<AircraftState>;
    fn select_ground_vehicle(&self, id: &str) -> Option<GroundVehicleState>;

    /// Commit a full snapshot. The stored assignee is preserved.
    fn synchronize_aircraft(&mut self, state: &AircraftState) -> Result<(), EngineError>;
    fn synchronize_ground_vehicle(&mut self, state: &GroundVehicleState)
    -> Result<(), EngineError>;

    fn assignee(&self, kind: EntityKind, id: &str) -> Result<Option<String>, EngineError>;
    fn assign(&mut self, kind: EntityKind, id: &str, auth_id: &str) -> Result<(), EngineError>;
    fn assigned_ids(&self, kind: EntityKind, auth_id: &str) -> Vec<String>;

    /// Write recorded trajectories to `path` (and the ground-vehicle sibling
    /// file when there are ground vehicles).
    fn write_trajectories(&self, path: &Path) -> Result<TrajectoryFiles, EngineError>;
    fn clear_trajectories(&mut self);
}
