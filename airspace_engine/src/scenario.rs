// Scenario files: the initial entity tables for a simulation.
//
// A scenario is a JSON document with two optional arrays, `aircraft` and
// `ground_vehicles`, whose entries deserialize straight into the protocol
// snapshot types (only `id` is required). Assignments in the file are kept;
// the server layers the user directory's assignments on top after loading.

use std::fs;
use std::path::Path;

use airspace_protocol::{AircraftState, GroundVehicleState};
use serde::{Deserialize, Serialize};

use crate::engine::EngineError;

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Scenario {
    pub aircraft: Vec<AircraftState>,
    pub ground_vehicles: Vec<GroundVehicleState>,
}

impl Scenario {
    pub fn from_json(json: &str) -> Result<Self, EngineError> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn from_file(path: &Path) -> Result<Self, EngineError> {
        let text = fs::read_to_string(path)?;
        Self::from_json(&text)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_tables_default_to_empty() {
        let s = Scenario::from_json(r#"{"aircraft":[{"id":"AC1"}]}"#).unwrap();
        assert_eq!(s.aircraft.len(), 1);
        assert!(s.ground_vehicles.is_empty());
    }

    #[test]
    fn malformed_json_is_scenario_error() {
        assert!(matches!(
            Scenario::from_json("{\"aircraft\": 3}"),
            Err(EngineError::Scenario(_))
        ));
    }
}
