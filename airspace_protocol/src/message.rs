// RPC vocabulary between clients and the simulation server.
//
// `RpcRequest` is the complete, closed set of remote operations. It is a
// tagged enum so the server dispatches with one `match` (see
// `airspace_relay::service`); adding an operation means adding a variant, and
// the compiler points at every place that must handle it.
//
// Every variant carries the caller's `SessionId` explicitly. Replies are
// `RpcReply::Ok(RpcValue)` or `RpcReply::Err(RpcError)`; failures are never
// folded into sentinel values, so "denied" and "succeeded with a falsy
// result" stay distinguishable on the client.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::entity::{AircraftState, GroundVehicleState};
use crate::types::{RuntimeStatus, SessionId};

/// Messages sent by a client over the RPC channel.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "method", content = "params")]
pub enum RpcRequest {
    Login {
        session_id: SessionId,
        auth_id: String,
    },
    Logout {
        session_id: SessionId,
    },
    /// Prepare a new run with one propagation step for every flight phase.
    SetupSimulation {
        session_id: SessionId,
        total_period_s: f64,
        step_s: f64,
    },
    SetupSimulationByPhase {
        session_id: SessionId,
        total_period_s: f64,
        surface_step_s: f64,
        terminal_step_s: f64,
        airborne_step_s: f64,
    },
    /// Start the prepared run; with a duration, hold after that many
    /// simulated seconds.
    Start {
        session_id: SessionId,
        duration_s: Option<f64>,
    },
    StartRealTime {
        session_id: SessionId,
    },
    Pause {
        session_id: SessionId,
    },
    Resume {
        session_id: SessionId,
        duration_s: Option<f64>,
    },
    Stop {
        session_id: SessionId,
    },
    RuntimeStatus {
        session_id: SessionId,
    },
    SimId {
        session_id: SessionId,
    },
    CurrentSimTime {
        session_id: SessionId,
    },
    CurrentUtcTime {
        session_id: SessionId,
    },
    NextPropagationUtcTime {
        session_id: SessionId,
    },
    RealTimeStep {
        session_id: SessionId,
    },
    LoadScenario {
        session_id: SessionId,
        path: String,
    },
    WriteTrajectories {
        session_id: SessionId,
        path: String,
    },
    ClearTrajectories {
        session_id: SessionId,
    },
    RequestDownloadTrajectoryFile {
        session_id: SessionId,
    },
    AllAircraftIds {
        session_id: SessionId,
    },
    AllGroundVehicleIds {
        session_id: SessionId,
    },
    /// Ids assigned to `auth_id`, or to the caller's own identity when absent.
    AssignedAircraftIds {
        session_id: SessionId,
        auth_id: Option<String>,
    },
    AssignedGroundVehicleIds {
        session_id: SessionId,
        auth_id: Option<String>,
    },
    RequestAircraft {
        session_id: SessionId,
        aircraft_id: String,
    },
    RequestGroundVehicle {
        session_id: SessionId,
        ground_vehicle_id: String,
    },
    SelectAircraft {
        session_id: SessionId,
        aircraft_id: String,
    },
    SelectGroundVehicle {
        session_id: SessionId,
        ground_vehicle_id: String,
    },
    SynchronizeAircraft {
        session_id: SessionId,
        state: AircraftState,
    },
    SynchronizeGroundVehicle {
        session_id: SessionId,
        state: GroundVehicleState,
    },
}

impl RpcRequest {
    pub fn session_id(&self) -> SessionId {
        match self {
            RpcRequest::Login { session_id, .. }
            | RpcRequest::Logout { session_id }
            | RpcRequest::SetupSimulation { session_id, .. }
            | RpcRequest::SetupSimulationByPhase { session_id, .. }
            | RpcRequest::Start { session_id, .. }
            | RpcRequest::StartRealTime { session_id }
            | RpcRequest::Pause { session_id }
            | RpcRequest::Resume { session_id, .. }
            | RpcRequest::Stop { session_id }
            | RpcRequest::RuntimeStatus { session_id }
            | RpcRequest::SimId { session_id }
            | RpcRequest::CurrentSimTime { session_id }
            | RpcRequest::CurrentUtcTime { session_id }
            | RpcRequest::NextPropagationUtcTime { session_id }
            | RpcRequest::RealTimeStep { session_id }
            | RpcRequest::LoadScenario { session_id, .. }
            | RpcRequest::WriteTrajectories { session_id, .. }
            | RpcRequest::ClearTrajectories { session_id }
            | RpcRequest::RequestDownloadTrajectoryFile { session_id }
            | RpcRequest::AllAircraftIds { session_id }
            | RpcRequest::AllGroundVehicleIds { session_id }
            | RpcRequest::AssignedAircraftIds { session_id, .. }
            | RpcRequest::AssignedGroundVehicleIds { session_id, .. }
            | RpcRequest::RequestAircraft { session_id, .. }
            | RpcRequest::RequestGroundVehicle { session_id, .. }
            | RpcRequest::SelectAircraft { session_id, .. }
            | RpcRequest::SelectGroundVehicle { session_id, .. }
            | RpcRequest::SynchronizeAircraft { session_id, .. }
            | RpcRequest::SynchronizeGroundVehicle { session_id, .. } => *session_id,
        }
    }

    /// Short operation name for logs.
    pub fn name(&self) -> &'static str {
        match self {
            RpcRequest::Login { .. } => "login",
            RpcRequest::Logout { .. } => "logout",
            RpcRequest::SetupSimulation { .. } => "setup_simulation",
            RpcRequest::SetupSimulationByPhase { .. } => "setup_simulation_by_phase",
            RpcRequest::Start { .. } => "start",
            RpcRequest::StartRealTime { .. } => "start_real_time",
            RpcRequest::Pause { .. } => "pause",
            RpcRequest::Resume { .. } => "resume",
            RpcRequest::Stop { .. } => "stop",
            RpcRequest::RuntimeStatus { .. } => "get_runtime_sim_status",
            RpcRequest::SimId { .. } => "get_sim_id",
            RpcRequest::CurrentSimTime { .. } => "get_curr_sim_time",
            RpcRequest::CurrentUtcTime { .. } => "get_curr_utc_time",
            RpcRequest::NextPropagationUtcTime { .. } => "get_next_propagation_utc_time",
            RpcRequest::RealTimeStep { .. } => "get_real_time_simulation_time_step",
            RpcRequest::LoadScenario { .. } => "load_scenario",
            RpcRequest::WriteTrajectories { .. } => "write_trajectories",
            RpcRequest::ClearTrajectories { .. } => "clear_trajectories",
            RpcRequest::RequestDownloadTrajectoryFile { .. } => "request_download_trajectory_file",
            RpcRequest::AllAircraftIds { .. } => "all_aircraft_ids",
            RpcRequest::AllGroundVehicleIds { .. } => "all_ground_vehicle_ids",
            RpcRequest::AssignedAircraftIds { .. } => "assigned_aircraft_ids",
            RpcRequest::AssignedGroundVehicleIds { .. } => "assigned_ground_vehicle_ids",
            RpcRequest::RequestAircraft { .. } => "request_aircraft",
            RpcRequest::RequestGroundVehicle { .. } => "request_ground_vehicle",
            RpcRequest::SelectAircraft { .. } => "select_aircraft",
            RpcRequest::SelectGroundVehicle { .. } => "select_ground_vehicle",
            RpcRequest::SynchronizeAircraft { .. } => "synchronize_aircraft",
            RpcRequest::SynchronizeGroundVehicle { .. } => "synchronize_ground_vehicle",
        }
    }
}

/// Successful result of an RPC call.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value")]
pub enum RpcValue {
    Unit,
    Integer(u64),
    Float(f64),
    Status(RuntimeStatus),
    Ids(Vec<String>),
    Aircraft(AircraftState),
    GroundVehicle(GroundVehicleState),
}

/// Failure category of an RPC call; mirrors the server's error taxonomy.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ErrorKind {
    /// Malformed request or a session id the server does not know.
    Protocol,
    UnknownUser,
    AlreadyLoggedIn,
    NotAuthenticated,
    Ownership,
    Transport,
    Mode,
    NotFound,
    InvalidTransition,
    InvalidArgument,
    Engine,
}

#[derive(Clone, Debug, PartialEq, Eq, Error, Serialize, Deserialize)]
#[error("{kind:?}: {message}")]
pub struct RpcError {
    pub kind: ErrorKind,
    pub message: String,
}

/// Messages sent by the server over the RPC channel, one per request.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum RpcReply {
    Ok(RpcValue),
    Err(RpcError),
}

impl From<Result<RpcValue, RpcError>> for RpcReply {
    fn from(result: Result<RpcValue, RpcError>) -> Self {
        match result {
            Ok(value) => RpcReply::Ok(value),
            Err(err) => RpcReply::Err(err),
        }
    }
}

impl From<RpcReply> for Result<RpcValue, RpcError> {
    fn from(reply: RpcReply) -> Self {
        match reply {
            RpcReply::Ok(value) => Ok(value),
            RpcReply::Err(err) => Err(err),
        }
    }
}
