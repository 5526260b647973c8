// Dead-reckoning reference engine.
//
// `KinematicEngine` keeps the entity tables in `BTreeMap`s (id order is the
// iteration order, so id listings and trajectory rows are deterministic) and
// advances each entity independently:
//
// - An entity is frozen while it is external, before its departure time, or
//   (aircraft only) once it has landed.
// - Each `propagate(dt)` is split into sub-steps no longer than the plan's
//   step for the entity's current flight phase (surface, terminal, airborne).
// - Within a sub-step the entity steers toward its target waypoint, moves
//   along its course at its current speed on a flat-earth approximation, and
//   advances the target index when the waypoint is reached. Reaching the last
//   waypoint lands an aircraft and parks a ground vehicle.
// - After the whole `dt`, one track row per active entity is recorded.

use std::collections::BTreeMap;
use std::path::Path;

use airspace_protocol::{AircraftState, EntityKind, FlightPhase, GroundVehicleState, Waypoint};
use tracing::debug;

use crate::engine::{Engine, EngineError, PropagationPlan};
use crate::scenario::Scenario;
use crate::trajectory::{TrackRow, TrajectoryFiles, ground_vehicle_sibling, remove_stale, write_csv};

const NM_PER_DEG_LAT: f64 = 60.0;
const FT_PER_NM: f64 = 6076.12;

#[derive(Debug, Default)]
pub struct KinematicEngine {
    aircraft: BTreeMap<String, AircraftState>,
    ground_vehicles: BTreeMap<String, GroundVehicleState>,
    plan: PropagationPlan,
    sim_time_s: f64,
    aircraft_tracks: Vec<TrackRow>,
    ground_vehicle_tracks: Vec<TrackRow>,
}

impl KinematicEngine {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn plan(&self) -> PropagationPlan {
        self.plan
    }

    fn phase_step_s(&self, phase: FlightPhase) -> f64 {
        match phase {
            FlightPhase::Gate | FlightPhase::Taxi | FlightPhase::Landed => {
                self.plan.surface_step_s
            }
            FlightPhase::Takeoff | FlightPhase::Approach => self.plan.terminal_step_s,
            FlightPhase::Climb | FlightPhase::Cruise | FlightPhase::Descent => {
                self.plan.airborne_step_s
            }
        }
    }

    fn propagate_aircraft(&mut self, start_s: f64, dt_s: f64) {
        let mut steps = Vec::with_capacity(self.aircraft.len());
        for (id, ac) in &self.aircraft {
            steps.push((id.clone(), self.phase_step_s(ac.flight_phase)));
        }
        for (id, step_s) in steps {
            let Some(ac) = self.aircraft.get_mut(&id) else {
                continue;
            };
            let (count, h) = substeps(dt_s, step_s);
            for i in 0..count {
                if aircraft_active(ac, start_s + i as f64 * h) {
                    advance_aircraft(ac, h);
                }
            }
            let end = start_s + dt_s;
            if !ac.external && end >= ac.departure_time_s {
                self.aircraft_tracks.push(TrackRow {
                    time_s: end,
                    id: ac.id.clone(),
                    latitude_deg: ac.latitude_deg,
                    longitude_deg: ac.longitude_deg,
                    altitude_ft: ac.altitude_ft,
                    speed_knots: ac.tas_knots,
                    course_deg: ac.course_rad.to_degrees(),
                });
            }
        }
    }

    fn propagate_ground_vehicles(&mut self, start_s: f64, dt_s: f64) {
        let (count, h) = substeps(dt_s, self.plan.surface_step_s);
        let end = start_s + dt_s;
        for gv in self.ground_vehicles.values_mut() {
            for i in 0..count {
                if !gv.external && start_s + i as f64 * h >= gv.departure_time_s {
                    advance_ground_vehicle(gv, h);
                }
            }
            if !gv.external && end >= gv.departure_time_s {
                self.ground_vehicle_tracks.push(TrackRow {
                    time_s: end,
                    id: gv.id.clone(),
                    latitude_deg: gv.latitude_deg,
                    longitude_deg: gv.longitude_deg,
                    altitude_ft: gv.altitude_ft,
                    speed_knots: gv.speed_knots,
                    course_deg: gv.course_deg,
                });
            }
        }
    }
}

/// Split `dt_s` into equal sub-steps no longer than `step_s`.
fn substeps(dt_s: f64, step_s: f64) -> (usize, f64) {
    if step_s.is_nan() || step_s <= 0.0 || step_s >= dt_s {
        return (1, dt_s);
    }
    let count = (dt_s / step_s).ceil() as usize;
    (count, dt_s / count as f64)
}

fn aircraft_active(ac: &AircraftState, t: f64) -> bool {
    !ac.external && ac.flight_phase != FlightPhase::Landed && t >= ac.departure_time_s
}

/// Initial bearing (radians, clockwise from north) and distance (nm) on a
/// flat-earth approximation, good enough at airport and sector scale.
fn bearing_and_distance(lat: f64, lon: f64, to: &Waypoint) -> (f64, f64) {
    let north_nm = (to.latitude_deg - lat) * NM_PER_DEG_LAT;
    let east_nm = (to.longitude_deg - lon) * NM_PER_DEG_LAT * lat.to_radians().cos();
    (east_nm.atan2(north_nm), north_nm.hypot(east_nm))
}

/// Move `distance_nm` along `course_rad`; returns the new (lat, lon).
fn dead_reckon(lat: f64, lon: f64, course_rad: f64, distance_nm: f64) -> (f64, f64) {
    let dlat = distance_nm * course_rad.cos() / NM_PER_DEG_LAT;
    let cos_lat = lat.to_radians().cos().max(1e-6);
    let dlon = distance_nm * course_rad.sin() / (NM_PER_DEG_LAT * cos_lat);
    (lat + dlat, lon + dlon)
}

fn advance_aircraft(ac: &mut AircraftState, h: f64) {
    let mut travel_nm = ac.tas_knots * h / 3600.0;

    while travel_nm > 0.0 {
        let Some(target) = ac.flight_plan.get(ac.target_waypoint_index) else {
            let (lat, lon) = dead_reckon(ac.latitude_deg, ac.longitude_deg, ac.course_rad, travel_nm);
            ac.latitude_deg = lat;
            ac.longitude_deg = lon;
            break;
        };
        let (bearing, distance) = bearing_and_distance(ac.latitude_deg, ac.longitude_deg, target);
        ac.course_rad = bearing;
        if distance > travel_nm {
            let (lat, lon) = dead_reckon(ac.latitude_deg, ac.longitude_deg, bearing, travel_nm);
            ac.latitude_deg = lat;
            ac.longitude_deg = lon;
            break;
        }
        ac.latitude_deg = target.latitude_deg;
        ac.longitude_deg = target.longitude_deg;
        ac.target_waypoint_index += 1;
        travel_nm -= distance;
        if ac.target_waypoint_index == ac.flight_plan.len() {
            debug!(id = %ac.id, "aircraft reached final waypoint");
            ac.flight_phase = FlightPhase::Landed;
            ac.tas_knots = 0.0;
            ac.rocd_fps = 0.0;
            ac.altitude_ft = 0.0;
            return;
        }
    }

    ac.altitude_ft = (ac.altitude_ft + ac.rocd_fps * h).max(0.0);
    if ac.cruise_altitude_ft > 0.0 && ac.rocd_fps > 0.0 && ac.altitude_ft >= ac.cruise_altitude_ft
    {
        ac.altitude_ft = ac.cruise_altitude_ft;
        ac.rocd_fps = 0.0;
        ac.flight_phase = FlightPhase::Cruise;
    }
    let horizontal_fps = ac.tas_knots * FT_PER_NM / 3600.0;
    if horizontal_fps > 0.0 {
        ac.fpa_rad = ac.rocd_fps.atan2(horizontal_fps);
    }
}

fn advance_ground_vehicle(gv: &mut GroundVehicleState, h: f64) {
    let mut travel_nm = gv.speed_knots * h / 3600.0;

    while travel_nm > 0.0 {
        let Some(target) = gv.drive_plan.get(gv.target_waypoint_index) else {
            let course = gv.course_deg.to_radians();
            let (lat, lon) = dead_reckon(gv.latitude_deg, gv.longitude_deg, course, travel_nm);
            gv.latitude_deg = lat;
            gv.longitude_deg = lon;
            return;
        };
        let (bearing, distance) = bearing_and_distance(gv.latitude_deg, gv.longitude_deg, target);
        gv.course_deg = bearing.to_degrees();
        if distance > travel_nm {
            let (lat, lon) = dead_reckon(gv.latitude_deg, gv.longitude_deg, bearing, travel_nm);
            gv.latitude_deg = lat;
            gv.longitude_deg = lon;
            return;
        }
        gv.latitude_deg = target.latitude_deg;
        gv.longitude_deg = target.longitude_deg;
        gv.target_waypoint_index += 1;
        travel_nm -= distance;
        if gv.target_waypoint_index == gv.drive_plan.len() {
            gv.speed_knots = 0.0;
            return;
        }
    }
}

fn check_index(id: &str, index: usize, len: usize) -> Result<(), EngineError> {
    // `index == len` means the plan is complete.
    if index > len {
        return Err(EngineError::InvalidIndex {
            id: id.to_string(),
            index,
            len,
        });
    }
    Ok(())
}

impl Engine for KinematicEngine {
    fn load_scenario(&mut self, scenario: Scenario) -> Result<(), EngineError> {
        for ac in &scenario.aircraft {
            check_index(&ac.id, ac.target_waypoint_index, ac.flight_plan.len())?;
        }
        for gv in &scenario.ground_vehicles {
            check_index(&gv.id, gv.target_waypoint_index, gv.drive_plan.len())?;
        }
        self.aircraft = scenario
            .aircraft
            .into_iter()
            .map(|ac| (ac.id.clone(), ac))
            .collect();
        self.ground_vehicles = scenario
            .ground_vehicles
            .into_iter()
            .map(|gv| (gv.id.clone(), gv))
            .collect();
        self.sim_time_s = 0.0;
        self.clear_trajectories();
        debug!(
            aircraft = self.aircraft.len(),
            ground_vehicles = self.ground_vehicles.len(),
            "scenario loaded"
        );
        Ok(())
    }

    fn setup(&mut self, plan: PropagationPlan) {
        self.plan = plan;
        self.sim_time_s = 0.0;
    }

    fn propagate(&mut self, dt_s: f64) {
        if dt_s.is_nan() || dt_s <= 0.0 {
            return;
        }
        let start = self.sim_time_s;
        self.propagate_aircraft(start, dt_s);
        self.propagate_ground_vehicles(start, dt_s);
        self.sim_time_s = start + dt_s;
    }

    fn sim_time_s(&self) -> f64 {
        self.sim_time_s
    }

    fn aircraft_ids(&self) -> Vec<String> {
        self.aircraft.keys().cloned().collect()
    }

    fn ground_vehicle_ids(&self) -> Vec<String> {
        self.ground_vehicles.keys().cloned().collect()
    }

    fn select_aircraft(&self, id: &str) -> Option<AircraftState> {
        self.aircraft.get(id).cloned()
    }

    fn select_ground_vehicle(&self, id: &str) -> Option<GroundVehicleState> {
        self.ground_vehicles.get(id).cloned()
    }

    fn synchronize_aircraft(&mut self, state: &AircraftState) -> Result<(), EngineError> {
        let stored = self
            .aircraft
            .get_mut(&state.id)
            .ok_or_else(|| EngineError::UnknownEntity {
                kind: EntityKind::Aircraft,
                id: state.id.clone(),
            })?;
        if stored.external {
            return Err(EngineError::ExternalEntity(state.id.clone()));
        }
        check_index(&state.id, state.target_waypoint_index, state.flight_plan.len())?;
        let assigned_user = stored.assigned_user.take();
        *stored = AircraftState {
            assigned_user,
            external: false,
            ..state.clone()
        };
        Ok(())
    }

    fn synchronize_ground_vehicle(
        &mut self,
        state: &GroundVehicleState,
    ) -> Result<(), EngineError> {
        let stored = self
            .ground_vehicles
            .get_mut(&state.id)
            .ok_or_else(|| EngineError::UnknownEntity {
                kind: EntityKind::GroundVehicle,
                id: state.id.clone(),
            })?;
        if stored.external {
            return Err(EngineError::ExternalEntity(state.id.clone()));
        }
        check_index(&state.id, state.target_waypoint_index, state.drive_plan.len())?;
        let assigned_user = stored.assigned_user.take();
        *stored = GroundVehicleState {
            assigned_user,
            external: false,
            ..state.clone()
        };
        Ok(())
    }

    fn assignee(&self, kind: EntityKind, id: &str) -> Result<Option<String>, EngineError> {
        let unknown = || EngineError::UnknownEntity {
            kind,
            id: id.to_string(),
        };
        match kind {
            EntityKind::Aircraft => Ok(self.aircraft.get(id).ok_or_else(unknown)?.assigned_user.clone()),
            EntityKind::GroundVehicle => Ok(self
                .ground_vehicles
                .get(id)
                .ok_or_else(unknown)?
                .assigned_user
                .clone()),
        }
    }

    fn assign(&mut self, kind: EntityKind, id: &str, auth_id: &str) -> Result<(), EngineError> {
        let slot = match kind {
            EntityKind::Aircraft => self.aircraft.get_mut(id).map(|ac| &mut ac.assigned_user),
            EntityKind::GroundVehicle => self
                .ground_vehicles
                .get_mut(id)
                .map(|gv| &mut gv.assigned_user),
        };
        let slot = slot.ok_or_else(|| EngineError::UnknownEntity {
            kind,
            id: id.to_string(),
        })?;
        *slot = Some(auth_id.to_string());
        Ok(())
    }

    fn assigned_ids(&self, kind: EntityKind, auth_id: &str) -> Vec<String> {
        let owned = |user: &Option<String>| user.as_deref() == Some(auth_id);
        match kind {
            EntityKind::Aircraft => self
                .aircraft
                .values()
                .filter(|ac| owned(&ac.assigned_user))
                .map(|ac| ac.id.clone())
                .collect(),
            EntityKind::GroundVehicle => self
                .ground_vehicles
                .values()
                .filter(|gv| owned(&gv.assigned_user))
                .map(|gv| gv.id.clone())
                .collect(),
        }
    }

    fn write_trajectories(&self, path: &Path) -> Result<TrajectoryFiles, EngineError> {
        write_csv(path, &self.aircraft_tracks)?;
        let sibling = ground_vehicle_sibling(path);
        let ground_vehicles = if self.ground_vehicles.is_empty() {
            remove_stale(&sibling)?;
            None
        } else {
            write_csv(&sibling, &self.ground_vehicle_tracks)?;
            Some(sibling)
        };
        Ok(TrajectoryFiles {
            aircraft: path.to_path_buf(),
            ground_vehicles,
        })
    }

    fn clear_trajectories(&mut self) {
        self.aircraft_tracks.clear();
        self.ground_vehicle_tracks.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn eastbound(id: &str) -> AircraftState {
        AircraftState {
            id: id.into(),
            latitude_deg: 0.0,
            longitude_deg: 0.0,
            altitude_ft: 10_000.0,
            tas_knots: 360.0,
            course_rad: std::f64::consts::FRAC_PI_2,
            flight_phase: FlightPhase::Cruise,
            ..Default::default()
        }
    }

    fn engine_with(aircraft: Vec<AircraftState>, ground_vehicles: Vec<GroundVehicleState>) -> KinematicEngine {
        let mut engine = KinematicEngine::new();
        engine
            .load_scenario(Scenario {
                aircraft,
                ground_vehicles,
            })
            .unwrap();
        engine.setup(PropagationPlan::uniform(3600.0, 10.0));
        engine
    }

    #[test]
    fn dead_reckoning_moves_along_course() {
        let mut engine = engine_with(vec![eastbound("AC1")], vec![]);
        // 360 kt for 60 s = 6 nm = 0.1 deg of longitude at the equator.
        engine.propagate(60.0);
        let ac = engine.select_aircraft("AC1").unwrap();
        assert!((ac.longitude_deg - 0.1).abs() < 1e-9);
        assert!(ac.latitude_deg.abs() < 1e-9);
        assert_eq!(engine.sim_time_s(), 60.0);
    }

    #[test]
    fn entity_waits_for_departure_time() {
        let mut ac = eastbound("AC1");
        ac.departure_time_s = 100.0;
        let mut engine = engine_with(vec![ac], vec![]);
        engine.propagate(60.0);
        assert_eq!(engine.select_aircraft("AC1").unwrap().longitude_deg, 0.0);
        engine.propagate(60.0);
        assert!(engine.select_aircraft("AC1").unwrap().longitude_deg > 0.0);
    }

    #[test]
    fn external_entity_is_frozen_and_refuses_writes() {
        let mut ac = eastbound("EXT");
        ac.external = true;
        let mut engine = engine_with(vec![ac.clone()], vec![]);
        engine.propagate(60.0);
        assert_eq!(engine.select_aircraft("EXT").unwrap().longitude_deg, 0.0);
        assert!(matches!(
            engine.synchronize_aircraft(&ac),
            Err(EngineError::ExternalEntity(_))
        ));
    }

    #[test]
    fn synchronize_preserves_assignee() {
        let mut engine = engine_with(vec![eastbound("AC1")], vec![]);
        engine.assign(EntityKind::Aircraft, "AC1", "alice").unwrap();

        let mut snapshot = engine.select_aircraft("AC1").unwrap();
        snapshot.tas_knots = 200.0;
        snapshot.assigned_user = Some("mallory".into());
        engine.synchronize_aircraft(&snapshot).unwrap();

        let stored = engine.select_aircraft("AC1").unwrap();
        assert_eq!(stored.tas_knots, 200.0);
        assert_eq!(stored.assigned_user.as_deref(), Some("alice"));
        assert_eq!(
            engine.assigned_ids(EntityKind::Aircraft, "alice"),
            vec!["AC1".to_string()]
        );
    }

    #[test]
    fn synchronize_unknown_or_bad_index_fails() {
        let mut engine = engine_with(vec![eastbound("AC1")], vec![]);
        assert!(matches!(
            engine.synchronize_aircraft(&eastbound("NOPE")),
            Err(EngineError::UnknownEntity { .. })
        ));
        let mut snapshot = engine.select_aircraft("AC1").unwrap();
        snapshot.target_waypoint_index = 3;
        assert!(matches!(
            engine.synchronize_aircraft(&snapshot),
            Err(EngineError::InvalidIndex { index: 3, len: 0, .. })
        ));
    }

    #[test]
    fn final_waypoint_lands_aircraft() {
        let mut ac = eastbound("AC1");
        ac.flight_plan = vec![Waypoint {
            name: "FIX".into(),
            latitude_deg: 0.0,
            longitude_deg: 0.05,
        }];
        let mut engine = engine_with(vec![ac], vec![]);
        engine.propagate(60.0);
        let ac = engine.select_aircraft("AC1").unwrap();
        assert_eq!(ac.flight_phase, FlightPhase::Landed);
        assert_eq!(ac.target_waypoint_index, 1);
        assert_eq!(ac.longitude_deg, 0.05);
    }

    #[test]
    fn ground_vehicle_follows_drive_plan() {
        let gv = GroundVehicleState {
            id: "GV1".into(),
            speed_knots: 20.0,
            drive_plan: vec![Waypoint {
                name: String::new(),
                latitude_deg: 1.0,
                longitude_deg: 0.0,
            }],
            ..Default::default()
        };
        let mut engine = engine_with(vec![], vec![gv]);
        engine.propagate(36.0);
        let gv = engine.select_ground_vehicle("GV1").unwrap();
        // 20 kt for 36 s = 0.2 nm due north.
        assert!((gv.latitude_deg - 0.2 / 60.0).abs() < 1e-9);
        assert!(gv.course_deg.abs() < 1e-9);
    }

    #[test]
    fn trajectory_sibling_only_with_ground_vehicles() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("run.csv");

        let mut engine = engine_with(vec![eastbound("AC1")], vec![]);
        engine.propagate(20.0);
        let files = engine.write_trajectories(&path).unwrap();
        assert!(files.ground_vehicles.is_none());
        assert!(!ground_vehicle_sibling(&path).exists());

        let mut engine = engine_with(
            vec![eastbound("AC1")],
            vec![GroundVehicleState {
                id: "GV1".into(),
                ..Default::default()
            }],
        );
        engine.propagate(20.0);
        let files = engine.write_trajectories(&path).unwrap();
        let sibling = files.ground_vehicles.unwrap();
        assert!(sibling.exists());
        assert_eq!(std::fs::read_to_string(&path).unwrap().lines().count(), 2);

        // Rewriting the same path without ground vehicles drops the old sibling.
        let mut engine = engine_with(vec![eastbound("AC1")], vec![]);
        engine.propagate(20.0);
        let files = engine.write_trajectories(&path).unwrap();
        assert!(files.ground_vehicles.is_none());
        assert!(!sibling.exists());
    }

    #[test]
    fn clear_trajectories_drops_rows() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("run.csv");
        let mut engine = engine_with(vec![eastbound("AC1")], vec![]);
        engine.propagate(20.0);
        engine.clear_trajectories();
        engine.write_trajectories(&path).unwrap();
        assert_eq!(std::fs::read_to_string(&path).unwrap().lines().count(), 1);
    }
}
