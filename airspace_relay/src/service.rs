// RPC service: one entry point for every remote operation.
//
// `Service::dispatch` takes a decoded `RpcRequest`, resolves the caller's
// session, and routes the request with one `match`. Both transports call it:
// the TCP RPC server (`rpc.rs`) and the in-process embedded transport
// (`client::EmbeddedRpc`).
//
// Entity writes take a per-entity mutex for the span of the ownership check
// and the engine commit, so two authorized writers to the same entity are
// serialized and neither check runs against a state the other is replacing.
// The lock table holds exactly the entities of the loaded scenario and is
// rebuilt on every load.

use std::collections::HashMap;
use std::path::Path;
use std::sync::{Arc, Mutex, PoisonError};

use airspace_engine::{Engine, EngineError, PropagationPlan, Scenario};
use airspace_protocol::{
    AircraftState, EntityKind, GroundVehicleState, PermissionTier, RpcError, RpcReply, RpcRequest,
    RpcValue, SessionId,
};
use tracing::{debug, info, warn};

use crate::auth;
use crate::config::{Mode, RelayConfig};
use crate::controller::{SharedEngine, SimulationController, lock_engine};
use crate::error::RelayError;
use crate::registry::{Session, SessionRegistry};
use crate::users::{LOCALHOST_ADMIN, UserDirectory};

#[derive(Default)]
struct EntityLocks {
    locks: Mutex<HashMap<(EntityKind, String), Arc<Mutex<()>>>>,
}

impl EntityLocks {
    /// Replace the table with one lock per entity the engine holds.
    fn reset(&self, engine: &dyn Engine) {
        let aircraft = engine
            .aircraft_ids()
            .into_iter()
            .map(|id| (EntityKind::Aircraft, id));
        let ground_vehicles = engine
            .ground_vehicle_ids()
            .into_iter()
            .map(|id| (EntityKind::GroundVehicle, id));
        let locks: HashMap<_, Arc<Mutex<()>>> = aircraft
            .chain(ground_vehicles)
            .map(|key| (key, Arc::default()))
            .collect();
        *self.locks.lock().unwrap_or_else(PoisonError::into_inner) = locks;
    }

    fn get(&self, kind: EntityKind, id: &str) -> Result<Arc<Mutex<()>>, RelayError> {
        self.locks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&(kind, id.to_string()))
            .cloned()
            .ok_or_else(|| {
                EngineError::UnknownEntity {
                    kind,
                    id: id.to_string(),
                }
                .into()
            })
    }
}

pub struct Service {
    mode: Mode,
    registry: Arc<SessionRegistry>,
    users: UserDirectory,
    engine: SharedEngine,
    controller: SimulationController,
    entity_locks: EntityLocks,
    embedded_session: Option<SessionId>,
}

impl Service {
    /// Build the service and load the configured scenario, if any.
    pub fn new(
        config: &RelayConfig,
        users: UserDirectory,
        engine: Box<dyn Engine>,
    ) -> Result<Self, RelayError> {
        let engine: SharedEngine = Arc::new(Mutex::new(engine));
        let registry = Arc::new(SessionRegistry::new());
        let embedded_session = match config.mode {
            Mode::Networked => None,
            Mode::Embedded => {
                let id = registry.create(None, None);
                registry.update(id, |s| {
                    s.auth_id = Some(LOCALHOST_ADMIN.to_string());
                    s.tier = PermissionTier::Administrator;
                });
                Some(id)
            }
        };
        let service = Self {
            mode: config.mode,
            registry,
            users,
            controller: SimulationController::new(engine.clone()),
            engine,
            entity_locks: EntityLocks::default(),
            embedded_session,
        };
        if let Some(path) = &config.scenario {
            service.load_scenario(path)?;
        }
        Ok(service)
    }

    pub fn mode(&self) -> Mode {
        self.mode
    }

    pub fn registry(&self) -> &Arc<SessionRegistry> {
        &self.registry
    }

    pub fn users(&self) -> &UserDirectory {
        &self.users
    }

    pub fn controller(&self) -> &SimulationController {
        &self.controller
    }

    /// The permanent session of embedded mode.
    pub fn embedded_session(&self) -> Option<SessionId> {
        self.embedded_session
    }

    pub fn dispatch(&self, request: RpcRequest) -> RpcReply {
        let op = request.name();
        let session_id = request.session_id();
        let result = self.handle(request);
        if let Err(err) = &result {
            debug!(session_id = %session_id, op, error = %err, "rpc failed");
        }
        result.map_err(RpcError::from).into()
    }

    fn session(&self, id: SessionId) -> Result<Session, RelayError> {
        self.registry.get(id).ok_or(RelayError::UnknownSession(id))
    }

    fn networked_only(&self, op: &'static str) -> Result<(), RelayError> {
        match self.mode {
            Mode::Networked => Ok(()),
            Mode::Embedded => Err(RelayError::Mode(op)),
        }
    }

    fn handle(&self, request: RpcRequest) -> Result<RpcValue, RelayError> {
        let op = request.name();
        let session = self.session(request.session_id())?;
        let unit = |()| RpcValue::Unit;

        match request {
            RpcRequest::Login { auth_id, .. } => {
                self.networked_only(op)?;
                auth::login(&self.registry, &self.users, session.id, &auth_id).map(unit)
            }
            RpcRequest::Logout { .. } => {
                self.networked_only(op)?;
                auth::logout(&self.registry, session.id).map(unit)
            }
            RpcRequest::SetupSimulation {
                total_period_s,
                step_s,
                ..
            } => self
                .controller
                .setup(PropagationPlan::uniform(total_period_s, step_s))
                .map(|run| RpcValue::Integer(run.0)),
            RpcRequest::SetupSimulationByPhase {
                total_period_s,
                surface_step_s,
                terminal_step_s,
                airborne_step_s,
                ..
            } => self
                .controller
                .setup(PropagationPlan {
                    total_period_s,
                    surface_step_s,
                    terminal_step_s,
                    airborne_step_s,
                })
                .map(|run| RpcValue::Integer(run.0)),
            RpcRequest::Start { duration_s, .. } => self.controller.start(duration_s).map(unit),
            RpcRequest::StartRealTime { .. } => self.controller.start_real_time().map(unit),
            RpcRequest::Pause { .. } => self.controller.pause().map(unit),
            RpcRequest::Resume { duration_s, .. } => self.controller.resume(duration_s).map(unit),
            RpcRequest::Stop { .. } => self.controller.stop().map(unit),
            RpcRequest::RuntimeStatus { .. } => Ok(RpcValue::Status(self.controller.status())),
            RpcRequest::SimId { .. } => Ok(RpcValue::Integer(self.controller.status().run_id.0)),
            RpcRequest::CurrentSimTime { .. } => {
                Ok(RpcValue::Float(self.controller.status().sim_time_s))
            }
            RpcRequest::CurrentUtcTime { .. } => {
                Ok(RpcValue::Integer(SimulationController::current_utc_ms()))
            }
            RpcRequest::NextPropagationUtcTime { .. } => self
                .controller
                .next_propagation_utc_ms()
                .map(RpcValue::Integer),
            RpcRequest::RealTimeStep { .. } => {
                Ok(RpcValue::Float(self.controller.real_time_step_s()))
            }
            RpcRequest::LoadScenario { path, .. } => {
                self.load_scenario(Path::new(&path)).map(unit)
            }
            RpcRequest::WriteTrajectories { path, .. } => {
                let files = self.controller.write_trajectories(Path::new(&path))?;
                let mut written = vec![files.aircraft.display().to_string()];
                written.extend(files.ground_vehicles.map(|p| p.display().to_string()));
                Ok(RpcValue::Ids(written))
            }
            RpcRequest::ClearTrajectories { .. } => {
                self.controller.clear_trajectories();
                Ok(RpcValue::Unit)
            }
            RpcRequest::RequestDownloadTrajectoryFile { .. } => {
                self.networked_only(op)?;
                self.download(&session).map(RpcValue::Integer)
            }
            RpcRequest::AllAircraftIds { .. } => {
                Ok(RpcValue::Ids(lock_engine(&self.engine).aircraft_ids()))
            }
            RpcRequest::AllGroundVehicleIds { .. } => {
                Ok(RpcValue::Ids(lock_engine(&self.engine).ground_vehicle_ids()))
            }
            RpcRequest::AssignedAircraftIds { auth_id, .. } => {
                self.assigned_ids(&session, EntityKind::Aircraft, auth_id)
            }
            RpcRequest::AssignedGroundVehicleIds { auth_id, .. } => {
                self.assigned_ids(&session, EntityKind::GroundVehicle, auth_id)
            }
            RpcRequest::RequestAircraft { aircraft_id, .. } => self
                .request_entity(&session, EntityKind::Aircraft, &aircraft_id)
                .map(unit),
            RpcRequest::RequestGroundVehicle {
                ground_vehicle_id, ..
            } => self
                .request_entity(&session, EntityKind::GroundVehicle, &ground_vehicle_id)
                .map(unit),
            RpcRequest::SelectAircraft { aircraft_id, .. } => lock_engine(&self.engine)
                .select_aircraft(&aircraft_id)
                .map(RpcValue::Aircraft)
                .ok_or_else(|| RelayError::NotFound(format!("aircraft `{aircraft_id}`"))),
            RpcRequest::SelectGroundVehicle {
                ground_vehicle_id, ..
            } => lock_engine(&self.engine)
                .select_ground_vehicle(&ground_vehicle_id)
                .map(RpcValue::GroundVehicle)
                .ok_or_else(|| RelayError::NotFound(format!("ground vehicle `{ground_vehicle_id}`"))),
            RpcRequest::SynchronizeAircraft { state, .. } => {
                self.synchronize_aircraft(&session, &state).map(unit)
            }
            RpcRequest::SynchronizeGroundVehicle { state, .. } => {
                self.synchronize_ground_vehicle(&session, &state).map(unit)
            }
        }
    }

    /// Load a scenario, then apply the user directory's assignments.
    fn load_scenario(&self, path: &Path) -> Result<(), RelayError> {
        self.controller.ensure_idle("load_scenario")?;
        let scenario = Scenario::from_file(path)?;
        let mut engine = lock_engine(&self.engine);
        engine.load_scenario(scenario)?;
        self.entity_locks.reset(&**engine);
        for user in self.users.iter() {
            let entities = user
                .aircraft
                .iter()
                .map(|id| (EntityKind::Aircraft, id))
                .chain(user.ground_vehicles.iter().map(|id| (EntityKind::GroundVehicle, id)));
            for (kind, id) in entities {
                if let Err(err) = engine.assign(kind, id, &user.auth_id) {
                    warn!(auth_id = %user.auth_id, error = %err, "assignment skipped");
                }
            }
        }
        info!(path = %path.display(), "scenario loaded");
        Ok(())
    }

    fn assigned_ids(
        &self,
        session: &Session,
        kind: EntityKind,
        auth_id: Option<String>,
    ) -> Result<RpcValue, RelayError> {
        let owner = match (self.mode, auth_id) {
            (Mode::Embedded, _) => LOCALHOST_ADMIN.to_string(),
            (Mode::Networked, Some(id)) => id,
            (Mode::Networked, None) => auth::require_identity(session)?.to_string(),
        };
        Ok(RpcValue::Ids(lock_engine(&self.engine).assigned_ids(kind, &owner)))
    }

    fn request_entity(
        &self,
        session: &Session,
        kind: EntityKind,
        id: &str,
    ) -> Result<(), RelayError> {
        let caller = auth::require_identity(session)?;
        let lock = self.entity_locks.get(kind, id)?;
        let _guard = lock.lock().unwrap_or_else(PoisonError::into_inner);
        lock_engine(&self.engine).assign(kind, id, caller)?;
        info!(session_id = %session.id, auth_id = caller, entity = id, "entity assigned");
        Ok(())
    }

    fn synchronize_aircraft(
        &self,
        session: &Session,
        state: &AircraftState,
    ) -> Result<(), RelayError> {
        let lock = self.entity_locks.get(EntityKind::Aircraft, &state.id)?;
        let _guard = lock.lock().unwrap_or_else(PoisonError::into_inner);
        let assignee = lock_engine(&self.engine).assignee(EntityKind::Aircraft, &state.id)?;
        auth::authorize_write(
            session,
            &state.id,
            assignee.as_deref(),
            self.controller.is_real_time(),
        )?;
        lock_engine(&self.engine).synchronize_aircraft(state)?;
        Ok(())
    }

    fn synchronize_ground_vehicle(
        &self,
        session: &Session,
        state: &GroundVehicleState,
    ) -> Result<(), RelayError> {
        let lock = self.entity_locks.get(EntityKind::GroundVehicle, &state.id)?;
        let _guard = lock.lock().unwrap_or_else(PoisonError::into_inner);
        let assignee = lock_engine(&self.engine).assignee(EntityKind::GroundVehicle, &state.id)?;
        auth::authorize_write(
            session,
            &state.id,
            assignee.as_deref(),
            self.controller.is_real_time(),
        )?;
        lock_engine(&self.engine).synchronize_ground_vehicle(state)?;
        Ok(())
    }

    /// Stream the current trajectory file(s) over the caller's control socket.
    fn download(&self, session: &Session) -> Result<u64, RelayError> {
        let channel = session
            .channel
            .as_ref()
            .ok_or_else(|| RelayError::Transport("session has no control socket".into()))?;
        let files = self.controller.download_files()?;
        let paths: Vec<&Path> = files.iter().map(|p| p.as_path()).collect();
        let bytes = channel.stream_files(&paths)?;
        info!(session_id = %session.id, files = files.len(), bytes, "trajectory download sent");
        Ok(bytes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    use airspace_engine::KinematicEngine;
    use airspace_protocol::{ErrorKind, RunStatus};

    const USERS: &str = "[Simulation_Admin]\nsim1\n[Normal_User]\nalice:{AC1},{GV1}\nbob\n";

    const SCENARIO: &str = r#"{
        "aircraft": [
            {"id": "AC1", "tas_knots": 250.0, "flight_phase": "Cruise"},
            {"id": "AC2", "tas_knots": 250.0, "flight_phase": "Cruise"},
            {"id": "EXT", "external": true}
        ],
        "ground_vehicles": [{"id": "GV1", "speed_knots": 10.0}]
    }"#;

    struct Fixture {
        _dir: tempfile::TempDir,
        service: Service,
    }

    fn fixture(mode: Mode) -> Fixture {
        let dir = tempfile::tempdir().unwrap();
        let scenario = dir.path().join("scenario.json");
        fs::write(&scenario, SCENARIO).unwrap();
        let config = RelayConfig {
            mode,
            scenario: Some(scenario),
            ..RelayConfig::default()
        };
        let service = Service::new(
            &config,
            UserDirectory::parse(USERS),
            Box::new(KinematicEngine::new()),
        )
        .unwrap();
        Fixture { _dir: dir, service }
    }

    fn call(service: &Service, request: RpcRequest) -> Result<RpcValue, RpcError> {
        service.dispatch(request).into()
    }

    fn logged_in(service: &Service, auth_id: &str) -> SessionId {
        let id = service.registry().create(None, None);
        call(
            service,
            RpcRequest::Login {
                session_id: id,
                auth_id: auth_id.into(),
            },
        )
        .unwrap();
        id
    }

    fn selected(service: &Service, id: SessionId, aircraft_id: &str) -> AircraftState {
        match call(
            service,
            RpcRequest::SelectAircraft {
                session_id: id,
                aircraft_id: aircraft_id.into(),
            },
        ) {
            Ok(RpcValue::Aircraft(ac)) => ac,
            other => panic!("expected aircraft, got {other:?}"),
        }
    }

    #[test]
    fn unknown_session_is_protocol_error() {
        let f = fixture(Mode::Networked);
        let err = call(&f.service, RpcRequest::Pause { session_id: SessionId(77) }).unwrap_err();
        assert_eq!(err.kind, ErrorKind::Protocol);
    }

    #[test]
    fn scenario_load_applies_user_assignments() {
        let f = fixture(Mode::Networked);
        let alice = logged_in(&f.service, "alice");
        let ids = call(
            &f.service,
            RpcRequest::AssignedAircraftIds {
                session_id: alice,
                auth_id: None,
            },
        )
        .unwrap();
        assert_eq!(ids, RpcValue::Ids(vec!["AC1".into()]));
        let gvs = call(
            &f.service,
            RpcRequest::AssignedGroundVehicleIds {
                session_id: alice,
                auth_id: Some("alice".into()),
            },
        )
        .unwrap();
        assert_eq!(gvs, RpcValue::Ids(vec!["GV1".into()]));
    }

    #[test]
    fn ownership_gating_applies_only_in_real_time() {
        let f = fixture(Mode::Networked);
        let alice = logged_in(&f.service, "alice");
        let sim = logged_in(&f.service, "sim1");
        let ac2 = selected(&f.service, alice, "AC2");

        // Fixed-horizon: unassigned writes are allowed.
        call(
            &f.service,
            RpcRequest::SynchronizeAircraft {
                session_id: alice,
                state: ac2.clone(),
            },
        )
        .unwrap();

        call(&f.service, RpcRequest::StartRealTime { session_id: alice }).unwrap();
        let ac1 = selected(&f.service, alice, "AC1");
        call(
            &f.service,
            RpcRequest::SynchronizeAircraft {
                session_id: alice,
                state: ac1,
            },
        )
        .unwrap();
        let err = call(
            &f.service,
            RpcRequest::SynchronizeAircraft {
                session_id: alice,
                state: ac2.clone(),
            },
        )
        .unwrap_err();
        assert_eq!(err.kind, ErrorKind::Ownership);
        call(
            &f.service,
            RpcRequest::SynchronizeAircraft {
                session_id: sim,
                state: ac2,
            },
        )
        .unwrap();
        call(&f.service, RpcRequest::Stop { session_id: alice }).unwrap();
    }

    #[test]
    fn request_aircraft_assigns_to_caller() {
        let f = fixture(Mode::Networked);
        let bob = logged_in(&f.service, "bob");
        call(
            &f.service,
            RpcRequest::RequestAircraft {
                session_id: bob,
                aircraft_id: "AC2".into(),
            },
        )
        .unwrap();
        assert_eq!(selected(&f.service, bob, "AC2").assigned_user.as_deref(), Some("bob"));

        let anon = f.service.registry().create(None, None);
        let err = call(
            &f.service,
            RpcRequest::RequestAircraft {
                session_id: anon,
                aircraft_id: "AC2".into(),
            },
        )
        .unwrap_err();
        assert_eq!(err.kind, ErrorKind::NotAuthenticated);
    }

    #[test]
    fn external_and_missing_entities() {
        let f = fixture(Mode::Networked);
        let sim = logged_in(&f.service, "sim1");
        let ext = selected(&f.service, sim, "EXT");
        let err = call(
            &f.service,
            RpcRequest::SynchronizeAircraft {
                session_id: sim,
                state: ext,
            },
        )
        .unwrap_err();
        assert_eq!(err.kind, ErrorKind::Engine);

        let err = call(
            &f.service,
            RpcRequest::SelectGroundVehicle {
                session_id: sim,
                ground_vehicle_id: "GV9".into(),
            },
        )
        .unwrap_err();
        assert_eq!(err.kind, ErrorKind::NotFound);
    }

    #[test]
    fn embedded_mode_refuses_session_operations() {
        let f = fixture(Mode::Embedded);
        let session_id = f.service.embedded_session().unwrap();
        for request in [
            RpcRequest::Login {
                session_id,
                auth_id: "alice".into(),
            },
            RpcRequest::Logout { session_id },
            RpcRequest::RequestDownloadTrajectoryFile { session_id },
        ] {
            assert_eq!(call(&f.service, request).unwrap_err().kind, ErrorKind::Mode);
        }
        // Entity queries answer for the built-in administrator.
        let ids = call(
            &f.service,
            RpcRequest::AssignedAircraftIds {
                session_id,
                auth_id: Some("alice".into()),
            },
        )
        .unwrap();
        assert_eq!(ids, RpcValue::Ids(vec![]));
    }

    #[test]
    fn setup_and_bounded_run_through_dispatch() {
        let f = fixture(Mode::Embedded);
        let session_id = f.service.embedded_session().unwrap();
        let run = call(
            &f.service,
            RpcRequest::SetupSimulation {
                session_id,
                total_period_s: 60.0,
                step_s: 2.0,
            },
        )
        .unwrap();
        assert_eq!(run, RpcValue::Integer(1));
        call(
            &f.service,
            RpcRequest::Start {
                session_id,
                duration_s: None,
            },
        )
        .unwrap();
        let start = std::time::Instant::now();
        loop {
            let status = f.service.controller().status();
            if status.status == RunStatus::Ended {
                break;
            }
            assert!(start.elapsed() < std::time::Duration::from_secs(5));
            std::thread::sleep(std::time::Duration::from_millis(5));
        }
        assert_eq!(
            call(&f.service, RpcRequest::CurrentSimTime { session_id }).unwrap(),
            RpcValue::Float(60.0)
        );
        assert_eq!(
            call(&f.service, RpcRequest::SimId { session_id }).unwrap(),
            RpcValue::Integer(1)
        );
    }

    /// Engine that records each ownership check and commit, pausing inside
    /// the check so an unserialized writer would interleave.
    struct Traced {
        inner: KinematicEngine,
        log: Arc<Mutex<Vec<&'static str>>>,
    }

    impl Engine for Traced {
        fn load_scenario(&mut self, scenario: Scenario) -> Result<(), EngineError> {
            self.inner.load_scenario(scenario)
        }
        fn setup(&mut self, plan: PropagationPlan) {
            self.inner.setup(plan)
        }
        fn propagate(&mut self, dt_s: f64) {
            self.inner.propagate(dt_s)
        }
        fn sim_time_s(&self) -> f64 {
            self.inner.sim_time_s()
        }
        fn aircraft_ids(&self) -> Vec<String> {
            self.inner.aircraft_ids()
        }
        fn ground_vehicle_ids(&self) -> Vec<String> {
            self.inner.ground_vehicle_ids()
        }
        fn select_aircraft(&self, id: &str) -> Option<AircraftState> {
            self.inner.select_aircraft(id)
        }
        fn select_ground_vehicle(&self, id: &str) -> Option<GroundVehicleState> {
            self.inner.select_ground_vehicle(id)
        }
        fn synchronize_aircraft(&mut self, state: &AircraftState) -> Result<(), EngineError> {
            self.log.lock().unwrap().push("commit");
            self.inner.synchronize_aircraft(state)
        }
        fn synchronize_ground_vehicle(
            &mut self,
            state: &GroundVehicleState,
        ) -> Result<(), EngineError> {
            self.inner.synchronize_ground_vehicle(state)
        }
        fn assignee(&self, kind: EntityKind, id: &str) -> Result<Option<String>, EngineError> {
            self.log.lock().unwrap().push("check");
            std::thread::sleep(std::time::Duration::from_millis(10));
            self.inner.assignee(kind, id)
        }
        fn assign(&mut self, kind: EntityKind, id: &str, auth_id: &str) -> Result<(), EngineError> {
            self.inner.assign(kind, id, auth_id)
        }
        fn assigned_ids(&self, kind: EntityKind, auth_id: &str) -> Vec<String> {
            self.inner.assigned_ids(kind, auth_id)
        }
        fn write_trajectories(
            &self,
            path: &Path,
        ) -> Result<airspace_engine::TrajectoryFiles, EngineError> {
            self.inner.write_trajectories(path)
        }
        fn clear_trajectories(&mut self) {
            self.inner.clear_trajectories()
        }
    }

    #[test]
    fn concurrent_writes_to_one_entity_are_serialized() {
        let dir = tempfile::tempdir().unwrap();
        let scenario = dir.path().join("scenario.json");
        fs::write(&scenario, SCENARIO).unwrap();
        let config = RelayConfig {
            scenario: Some(scenario),
            ..RelayConfig::default()
        };
        let log = Arc::new(Mutex::new(Vec::new()));
        let engine = Traced {
            inner: KinematicEngine::new(),
            log: log.clone(),
        };
        let service = Service::new(&config, UserDirectory::parse(USERS), Box::new(engine)).unwrap();

        let writers = [
            logged_in(&service, "sim1"),
            logged_in(&service, LOCALHOST_ADMIN),
        ];
        let state = selected(&service, writers[0], "AC1");

        std::thread::scope(|scope| {
            for session_id in writers {
                let service = &service;
                let state = state.clone();
                scope.spawn(move || {
                    for _ in 0..3 {
                        call(
                            service,
                            RpcRequest::SynchronizeAircraft {
                                session_id,
                                state: state.clone(),
                            },
                        )
                        .unwrap();
                    }
                });
            }
        });

        let log = log.lock().unwrap();
        assert_eq!(log.len(), 12);
        for pair in log.chunks(2) {
            assert_eq!(pair, ["check", "commit"]);
        }
    }

    #[test]
    fn unknown_entities_get_no_write_lock() {
        let f = fixture(Mode::Networked);
        let sim = logged_in(&f.service, "sim1");
        let before = f.service.entity_locks.locks.lock().unwrap().len();
        assert_eq!(before, 4);

        let mut ghost = selected(&f.service, sim, "AC1");
        for n in 0..50 {
            ghost.id = format!("GHOST{n}");
            let err = call(
                &f.service,
                RpcRequest::SynchronizeAircraft {
                    session_id: sim,
                    state: ghost.clone(),
                },
            )
            .unwrap_err();
            assert_eq!(err.kind, ErrorKind::NotFound);
        }
        let err = call(
            &f.service,
            RpcRequest::RequestGroundVehicle {
                session_id: sim,
                ground_vehicle_id: "GV9".into(),
            },
        )
        .unwrap_err();
        assert_eq!(err.kind, ErrorKind::NotFound);
        assert_eq!(f.service.entity_locks.locks.lock().unwrap().len(), before);
    }
}
