// Snapshots of live simulated entities.
//
// These are the full mutable state of an aircraft or ground vehicle as the
// engine holds it. `select_*` copies one to the client; `synchronize_*` sends
// the whole snapshot back. Field-level diffs are not part of the protocol.
//
// `assigned_user` is owned by the server: a synchronize never changes it.
// Scenario files deserialize directly into these types, so everything except
// the id has a serde default.

use serde::{Deserialize, Serialize};

/// Which entity table an id refers to.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EntityKind {
    Aircraft,
    GroundVehicle,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FlightPhase {
    #[default]
    Gate,
    Taxi,
    Takeoff,
    Climb,
    Cruise,
    Descent,
    Approach,
    Landed,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Waypoint {
    #[serde(default)]
    pub name: String,
    pub latitude_deg: f64,
    pub longitude_deg: f64,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AircraftState {
    pub id: String,
    pub assigned_user: Option<String>,
    /// State is injected from outside the engine; it cannot be written through.
    pub external: bool,

    pub latitude_deg: f64,
    pub longitude_deg: f64,
    pub altitude_ft: f64,
    pub rocd_fps: f64,
    pub tas_knots: f64,
    pub course_rad: f64,
    pub fpa_rad: f64,
    pub flight_phase: FlightPhase,

    pub departure_time_s: f64,
    pub cruise_altitude_ft: f64,
    pub cruise_tas_knots: f64,
    pub flight_plan: Vec<Waypoint>,
    pub target_waypoint_index: usize,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GroundVehicleState {
    pub id: String,
    pub airport_id: String,
    pub aircraft_in_service: Option<String>,
    pub assigned_user: Option<String>,
    pub external: bool,

    pub latitude_deg: f64,
    pub longitude_deg: f64,
    pub altitude_ft: f64,
    pub speed_knots: f64,
    pub course_deg: f64,

    pub departure_time_s: f64,
    pub drive_plan: Vec<Waypoint>,
    pub target_waypoint_index: usize,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sparse_scenario_entry_uses_defaults() {
        let ac: AircraftState =
            serde_json::from_str(r#"{"id":"AC1","tas_knots":250.0}"#).unwrap();
        assert_eq!(ac.id, "AC1");
        assert_eq!(ac.tas_knots, 250.0);
        assert_eq!(ac.flight_phase, FlightPhase::Gate);
        assert!(ac.flight_plan.is_empty());
        assert!(!ac.external);
    }
}
