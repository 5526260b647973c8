// Write-through entity proxies.
//
// `AircraftProxy` and `GroundVehicleProxy` hold a client-side snapshot of one
// live entity. Every setter is remote-first: it edits a copy, sends the full
// copy with `synchronize_*`, and replaces the local snapshot only when the
// server accepts it. On any failure the setter returns the error and the
// local snapshot is untouched, so a successful setter always leaves client
// and server equal.
//
// Checks that need no server run before any RPC: external entities fail with
// `ExternalEntity`, and waypoint indices outside the plan fail with
// `InvalidArgument`.

use airspace_protocol::{AircraftState, FlightPhase, GroundVehicleState, RpcRequest, RpcValue, Waypoint};

use crate::client::{ClientError, RpcHandle};

#[derive(Clone, Copy, Debug)]
enum Axis {
    Latitude,
    Longitude,
}

/// Move one waypoint. The waypoint loses its name if the coordinate
/// actually changed, since it no longer marks the named fix.
fn set_waypoint(
    plan: &mut [Waypoint],
    index: usize,
    axis: Axis,
    value: f64,
) -> Result<(), ClientError> {
    let len = plan.len();
    let waypoint = plan.get_mut(index).ok_or_else(|| {
        ClientError::InvalidArgument(format!("waypoint index {index} out of range (plan has {len})"))
    })?;
    let slot = match axis {
        Axis::Latitude => &mut waypoint.latitude_deg,
        Axis::Longitude => &mut waypoint.longitude_deg,
    };
    if *slot != value {
        *slot = value;
        waypoint.name.clear();
    }
    Ok(())
}

/// A target index may point one past the end ("plan complete").
fn check_target_index(index: usize, len: usize) -> Result<(), ClientError> {
    if index > len {
        return Err(ClientError::InvalidArgument(format!(
            "target waypoint index {index} out of range (plan has {len})"
        )));
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Aircraft
// ---------------------------------------------------------------------------

pub struct AircraftProxy {
    rpc: RpcHandle,
    state: AircraftState,
}

impl AircraftProxy {
    pub fn new(rpc: RpcHandle, state: AircraftState) -> Self {
        Self { rpc, state }
    }

    pub fn state(&self) -> &AircraftState {
        &self.state
    }

    pub fn id(&self) -> &str {
        &self.state.id
    }

    /// Re-read the authoritative snapshot from the server.
    pub fn refresh(&mut self) -> Result<(), ClientError> {
        match self.rpc.call(RpcRequest::SelectAircraft {
            session_id: self.rpc.session_id(),
            aircraft_id: self.state.id.clone(),
        })? {
            RpcValue::Aircraft(state) => {
                self.state = state;
                Ok(())
            }
            _ => Err(ClientError::UnexpectedReply("select_aircraft")),
        }
    }

    fn write_through(
        &mut self,
        edit: impl FnOnce(&mut AircraftState) -> Result<(), ClientError>,
    ) -> Result<(), ClientError> {
        if self.state.external {
            return Err(ClientError::ExternalEntity(self.state.id.clone()));
        }
        let mut next = self.state.clone();
        edit(&mut next)?;
        self.rpc.call_unit(RpcRequest::SynchronizeAircraft {
            session_id: self.rpc.session_id(),
            state: next.clone(),
        })?;
        self.state = next;
        Ok(())
    }

    pub fn set_latitude_deg(&mut self, value: f64) -> Result<(), ClientError> {
        self.write_through(|s| {
            s.latitude_deg = value;
            Ok(())
        })
    }

    pub fn set_longitude_deg(&mut self, value: f64) -> Result<(), ClientError> {
        self.write_through(|s| {
            s.longitude_deg = value;
            Ok(())
        })
    }

    pub fn set_altitude_ft(&mut self, value: f64) -> Result<(), ClientError> {
        self.write_through(|s| {
            s.altitude_ft = value;
            Ok(())
        })
    }

    pub fn set_rocd_fps(&mut self, value: f64) -> Result<(), ClientError> {
        self.write_through(|s| {
            s.rocd_fps = value;
            Ok(())
        })
    }

    pub fn set_tas_knots(&mut self, value: f64) -> Result<(), ClientError> {
        self.write_through(|s| {
            s.tas_knots = value;
            Ok(())
        })
    }

    pub fn set_course_rad(&mut self, value: f64) -> Result<(), ClientError> {
        self.write_through(|s| {
            s.course_rad = value;
            Ok(())
        })
    }

    pub fn set_fpa_rad(&mut self, value: f64) -> Result<(), ClientError> {
        self.write_through(|s| {
            s.fpa_rad = value;
            Ok(())
        })
    }

    pub fn set_flight_phase(&mut self, phase: FlightPhase) -> Result<(), ClientError> {
        self.write_through(|s| {
            s.flight_phase = phase;
            Ok(())
        })
    }

    pub fn set_departure_time_s(&mut self, value: f64) -> Result<(), ClientError> {
        self.write_through(|s| {
            s.departure_time_s = value;
            Ok(())
        })
    }

    pub fn set_cruise_altitude_ft(&mut self, value: f64) -> Result<(), ClientError> {
        self.write_through(|s| {
            s.cruise_altitude_ft = value;
            Ok(())
        })
    }

    pub fn set_cruise_tas_knots(&mut self, value: f64) -> Result<(), ClientError> {
        self.write_through(|s| {
            s.cruise_tas_knots = value;
            Ok(())
        })
    }

    pub fn set_target_waypoint_index(&mut self, index: usize) -> Result<(), ClientError> {
        self.write_through(|s| {
            check_target_index(index, s.flight_plan.len())?;
            s.target_waypoint_index = index;
            Ok(())
        })
    }

    pub fn set_flight_plan_latitude(&mut self, index: usize, deg: f64) -> Result<(), ClientError> {
        self.write_through(|s| set_waypoint(&mut s.flight_plan, index, Axis::Latitude, deg))
    }

    pub fn set_flight_plan_longitude(&mut self, index: usize, deg: f64) -> Result<(), ClientError> {
        self.write_through(|s| set_waypoint(&mut s.flight_plan, index, Axis::Longitude, deg))
    }
}

// ---------------------------------------------------------------------------
// Ground vehicle
// ---------------------------------------------------------------------------

pub struct GroundVehicleProxy {
    rpc: RpcHandle,
    state: GroundVehicleState,
}

impl GroundVehicleProxy {
    pub fn new(rpc: RpcHandle, state: GroundVehicleState) -> Self {
        Self { rpc, state }
    }

    pub fn state(&self) -> &GroundVehicleState {
        &self.state
    }

    pub fn id(&self) -> &str {
        &self.state.id
    }

    pub fn refresh(&mut self) -> Result<(), ClientError> {
        match self.rpc.call(RpcRequest::SelectGroundVehicle {
            session_id: self.rpc.session_id(),
            ground_vehicle_id: self.state.id.clone(),
        })? {
            RpcValue::GroundVehicle(state) => {
                self.state = state;
                Ok(())
            }
            _ => Err(ClientError::UnexpectedReply("select_ground_vehicle")),
        }
    }

    fn write_through(
        &mut self,
        edit: impl FnOnce(&mut GroundVehicleState) -> Result<(), ClientError>,
    ) -> Result<(), ClientError> {
        if self.state.external {
            return Err(ClientError::ExternalEntity(self.state.id.clone()));
        }
        let mut next = self.state.clone();
        edit(&mut next)?;
        self.rpc.call_unit(RpcRequest::SynchronizeGroundVehicle {
            session_id: self.rpc.session_id(),
            state: next.clone(),
        })?;
        self.state = next;
        Ok(())
    }

    pub fn set_latitude_deg(&mut self, value: f64) -> Result<(), ClientError> {
        self.write_through(|s| {
            s.latitude_deg = value;
            Ok(())
        })
    }

    pub fn set_longitude_deg(&mut self, value: f64) -> Result<(), ClientError> {
        self.write_through(|s| {
            s.longitude_deg = value;
            Ok(())
        })
    }

    pub fn set_altitude_ft(&mut self, value: f64) -> Result<(), ClientError> {
        self.write_through(|s| {
            s.altitude_ft = value;
            Ok(())
        })
    }

    pub fn set_speed_knots(&mut self, value: f64) -> Result<(), ClientError> {
        self.write_through(|s| {
            s.speed_knots = value;
            Ok(())
        })
    }

    pub fn set_course_deg(&mut self, value: f64) -> Result<(), ClientError> {
        self.write_through(|s| {
            s.course_deg = value;
            Ok(())
        })
    }

    pub fn set_departure_time_s(&mut self, value: f64) -> Result<(), ClientError> {
        self.write_through(|s| {
            s.departure_time_s = value;
            Ok(())
        })
    }

    pub fn set_aircraft_in_service(&mut self, aircraft_id: Option<String>) -> Result<(), ClientError> {
        self.write_through(|s| {
            s.aircraft_in_service = aircraft_id;
            Ok(())
        })
    }

    pub fn set_target_waypoint_index(&mut self, index: usize) -> Result<(), ClientError> {
        self.write_through(|s| {
            check_target_index(index, s.drive_plan.len())?;
            s.target_waypoint_index = index;
            Ok(())
        })
    }

    pub fn set_drive_plan_latitude(&mut self, index: usize, deg: f64) -> Result<(), ClientError> {
        self.write_through(|s| set_waypoint(&mut s.drive_plan, index, Axis::Latitude, deg))
    }

    pub fn set_drive_plan_longitude(&mut self, index: usize, deg: f64) -> Result<(), ClientError> {
        self.write_through(|s| set_waypoint(&mut s.drive_plan, index, Axis::Longitude, deg))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    use airspace_protocol::{ErrorKind, RpcError, SessionId};

    use crate::client::RpcTransport;

    /// Records every request and answers with a fixed reply.
    struct Scripted {
        seen: Arc<Mutex<Vec<RpcRequest>>>,
        reply: Result<RpcValue, RpcError>,
    }

    impl RpcTransport for Scripted {
        fn call(&mut self, request: RpcRequest) -> Result<RpcValue, ClientError> {
            self.seen.lock().unwrap().push(request);
            self.reply.clone().map_err(ClientError::Remote)
        }
    }

    fn handle(reply: Result<RpcValue, RpcError>) -> (RpcHandle, Arc<Mutex<Vec<RpcRequest>>>) {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let transport = Scripted {
            seen: seen.clone(),
            reply,
        };
        (RpcHandle::new(Box::new(transport), SessionId(7)), seen)
    }

    fn denied() -> Result<RpcValue, RpcError> {
        Err(RpcError {
            kind: ErrorKind::Ownership,
            message: "AC1 is not assigned to bob".into(),
        })
    }

    fn aircraft() -> AircraftState {
        AircraftState {
            id: "AC1".into(),
            tas_knots: 250.0,
            flight_plan: vec![
                Waypoint {
                    name: "SFO".into(),
                    latitude_deg: 37.62,
                    longitude_deg: -122.38,
                },
                Waypoint {
                    name: "LAX".into(),
                    latitude_deg: 33.94,
                    longitude_deg: -118.41,
                },
            ],
            ..Default::default()
        }
    }

    #[test]
    fn accepted_write_commits_locally_and_sends_full_snapshot() {
        let (rpc, seen) = handle(Ok(RpcValue::Unit));
        let mut proxy = AircraftProxy::new(rpc, aircraft());
        proxy.set_tas_knots(300.0).unwrap();
        assert_eq!(proxy.state().tas_knots, 300.0);

        let seen = seen.lock().unwrap();
        match &seen[..] {
            [RpcRequest::SynchronizeAircraft { session_id, state }] => {
                assert_eq!(*session_id, SessionId(7));
                assert_eq!(state, proxy.state());
            }
            other => panic!("unexpected requests: {other:?}"),
        }
    }

    #[test]
    fn rejected_write_leaves_local_copy_unchanged() {
        let (rpc, _) = handle(denied());
        let mut proxy = AircraftProxy::new(rpc, aircraft());
        let err = proxy.set_flight_plan_latitude(0, 40.0).unwrap_err();
        assert_eq!(err.kind(), Some(ErrorKind::Ownership));
        assert_eq!(proxy.state(), &aircraft());
    }

    #[test]
    fn external_entity_fails_before_rpc() {
        let (rpc, seen) = handle(Ok(RpcValue::Unit));
        let mut state = aircraft();
        state.external = true;
        let mut proxy = AircraftProxy::new(rpc, state);
        assert!(matches!(
            proxy.set_altitude_ft(1000.0),
            Err(ClientError::ExternalEntity(id)) if id == "AC1"
        ));
        assert!(seen.lock().unwrap().is_empty());
    }

    #[test]
    fn waypoint_index_is_checked_before_rpc() {
        let (rpc, seen) = handle(Ok(RpcValue::Unit));
        let mut proxy = AircraftProxy::new(rpc, aircraft());
        let err = proxy.set_flight_plan_longitude(2, 0.0).unwrap_err();
        assert_eq!(err.kind(), Some(ErrorKind::InvalidArgument));
        assert!(proxy.set_target_waypoint_index(3).is_err());
        assert!(seen.lock().unwrap().is_empty());

        // One past the end means "plan complete" and is allowed.
        proxy.set_target_waypoint_index(2).unwrap();
        assert_eq!(proxy.state().target_waypoint_index, 2);
    }

    #[test]
    fn moving_a_waypoint_clears_its_name() {
        let (rpc, _) = handle(Ok(RpcValue::Unit));
        let mut proxy = AircraftProxy::new(rpc, aircraft());

        proxy.set_flight_plan_latitude(1, 33.94).unwrap();
        assert_eq!(proxy.state().flight_plan[1].name, "LAX");

        proxy.set_flight_plan_latitude(1, 34.0).unwrap();
        assert_eq!(proxy.state().flight_plan[1].name, "");
        assert_eq!(proxy.state().flight_plan[1].latitude_deg, 34.0);
        assert_eq!(proxy.state().flight_plan[0].name, "SFO");
    }

    #[test]
    fn ground_vehicle_drive_plan_setters() {
        let (rpc, seen) = handle(Ok(RpcValue::Unit));
        let state = GroundVehicleState {
            id: "GV1".into(),
            drive_plan: vec![Waypoint {
                name: "A1".into(),
                latitude_deg: 37.61,
                longitude_deg: -122.39,
            }],
            ..Default::default()
        };
        let mut proxy = GroundVehicleProxy::new(rpc, state);
        proxy.set_drive_plan_longitude(0, -122.40).unwrap();
        proxy.set_aircraft_in_service(Some("AC1".into())).unwrap();
        assert_eq!(proxy.state().drive_plan[0].name, "");
        assert_eq!(proxy.state().aircraft_in_service.as_deref(), Some("AC1"));
        assert_eq!(seen.lock().unwrap().len(), 2);
        assert!(proxy.set_drive_plan_latitude(1, 0.0).is_err());
    }

    #[test]
    fn refresh_replaces_snapshot() {
        let mut fresh = aircraft();
        fresh.altitude_ft = 12000.0;
        let (rpc, _) = handle(Ok(RpcValue::Aircraft(fresh.clone())));
        let mut proxy = AircraftProxy::new(rpc, aircraft());
        proxy.refresh().unwrap();
        assert_eq!(proxy.state(), &fresh);
    }
}
