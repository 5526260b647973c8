// Simulation run lifecycle.
//
// States: Ready -> Running -> {Paused <-> Running} -> Stopped -> Ended.
//
// A driver thread owns propagation. It sleeps on a condvar until the run is
// Running and not waiting, then advances the engine one base step at a time
// (the finest per-phase step of the plan), holding the state lock across each
// step so a control call never observes a half-applied step. Lock order is
// always state, then engine.
//
// - Fixed-horizon runs step as fast as the engine allows.
// - Real-time runs sleep until the next propagation instant on the wall
//   clock; each step advances simulated time by one base step.
// - `start(Some(d))` / `resume(Some(d))` set a hold point `d` simulated
//   seconds ahead. Reaching it sets `waiting` and the driver stops stepping.
//   Only `resume` or `stop` clears it.
// - Reaching the plan's total period ends the run. `stop` moves to Stopped;
//   the driver then closes the run out as Ended.
//
// The controller also keeps the trajectory file pointer: the (run, path) of
// the most recent `write_trajectories`, overwritten on every write.

use std::path::{Path, PathBuf};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use airspace_engine::{Engine, PropagationPlan, TrajectoryFiles};
use airspace_protocol::{RunId, RunStatus, RuntimeStatus};
use tracing::{debug, info};

use crate::error::RelayError;

/// Engine shared between the controller's driver and entity RPC handlers.
pub type SharedEngine = Arc<Mutex<Box<dyn Engine>>>;

pub fn lock_engine(engine: &SharedEngine) -> MutexGuard<'_, Box<dyn Engine>> {
    engine.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Sim time closer than this to a hold or end point counts as reaching it.
const TIME_EPSILON_S: f64 = 1e-9;

#[derive(Clone, Debug, PartialEq)]
pub struct TrajectoryPointer {
    pub run_id: RunId,
    pub path: PathBuf,
    /// Ground-vehicle file produced by the same write, if any.
    pub ground_vehicles: Option<PathBuf>,
}

struct RunState {
    run_id: RunId,
    status: RunStatus,
    plan: PropagationPlan,
    real_time: bool,
    sim_time_s: f64,
    hold_at_s: Option<f64>,
    waiting: bool,
    next_propagation: Option<SystemTime>,
    shutdown: bool,
}

impl RunState {
    fn snapshot(&self) -> RuntimeStatus {
        RuntimeStatus {
            run_id: self.run_id,
            status: self.status,
            waiting: self.waiting,
            real_time: self.real_time,
            sim_time_s: self.sim_time_s,
        }
    }

    fn transition_error(&self, op: &'static str) -> RelayError {
        RelayError::InvalidTransition {
            op,
            from: self.status,
        }
    }
}

struct Shared {
    engine: SharedEngine,
    state: Mutex<RunState>,
    changed: Condvar,
    trajectory: Mutex<Option<TrajectoryPointer>>,
}

impl Shared {
    fn lock_state(&self) -> MutexGuard<'_, RunState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

pub struct SimulationController {
    shared: Arc<Shared>,
    driver: Option<JoinHandle<()>>,
}

impl SimulationController {
    pub fn new(engine: SharedEngine) -> Self {
        let plan = PropagationPlan::default();
        lock_engine(&engine).setup(plan);
        let shared = Arc::new(Shared {
            engine,
            state: Mutex::new(RunState {
                run_id: RunId(0),
                status: RunStatus::Ready,
                plan,
                real_time: false,
                sim_time_s: 0.0,
                hold_at_s: None,
                waiting: false,
                next_propagation: None,
                shutdown: false,
            }),
            changed: Condvar::new(),
            trajectory: Mutex::new(None),
        });
        let driver_shared = shared.clone();
        let driver = thread::spawn(move || drive(driver_shared));
        Self {
            shared,
            driver: Some(driver),
        }
    }

    /// Run `f` on the state, then wake the driver.
    fn with_state<T>(&self, f: impl FnOnce(&mut RunState) -> Result<T, RelayError>) -> Result<T, RelayError> {
        let mut state = self.shared.lock_state();
        let result = f(&mut state);
        drop(state);
        self.shared.changed.notify_all();
        result
    }

    /// Prepare a new run with `plan`. Resets simulated time to zero.
    pub fn setup(&self, plan: PropagationPlan) -> Result<RunId, RelayError> {
        if !plan.is_valid() {
            return Err(RelayError::InvalidArgument(format!(
                "propagation periods must be positive: {plan:?}"
            )));
        }
        self.with_state(|state| {
            if !matches!(
                state.status,
                RunStatus::Ready | RunStatus::Stopped | RunStatus::Ended
            ) {
                return Err(state.transition_error("setup_simulation"));
            }
            lock_engine(&self.shared.engine).setup(plan);
            state.run_id = RunId(state.run_id.0 + 1);
            state.status = RunStatus::Ready;
            state.plan = plan;
            state.real_time = false;
            state.sim_time_s = 0.0;
            state.hold_at_s = None;
            state.waiting = false;
            state.next_propagation = None;
            info!(run_id = state.run_id.0, ?plan, "simulation set up");
            Ok(state.run_id)
        })
    }

    /// Start a fixed-horizon run; with `duration_s`, hold after that many
    /// simulated seconds.
    pub fn start(&self, duration_s: Option<f64>) -> Result<(), RelayError> {
        let hold = check_duration(duration_s)?;
        self.with_state(|state| {
            if state.status != RunStatus::Ready {
                return Err(state.transition_error("start"));
            }
            state.status = RunStatus::Running;
            state.real_time = false;
            state.hold_at_s = hold.map(|d| state.sim_time_s + d);
            info!(run_id = state.run_id.0, ?duration_s, "simulation started");
            Ok(())
        })
    }

    pub fn start_real_time(&self) -> Result<(), RelayError> {
        self.with_state(|state| {
            if state.status != RunStatus::Ready {
                return Err(state.transition_error("start_real_time"));
            }
            state.status = RunStatus::Running;
            state.real_time = true;
            state.hold_at_s = None;
            state.next_propagation = Some(SystemTime::now() + step_duration(&state.plan));
            info!(run_id = state.run_id.0, "real-time simulation started");
            Ok(())
        })
    }

    pub fn pause(&self) -> Result<(), RelayError> {
        self.with_state(|state| {
            if state.status != RunStatus::Running {
                return Err(state.transition_error("pause"));
            }
            state.status = RunStatus::Paused;
            state.waiting = false;
            state.hold_at_s = None;
            info!(run_id = state.run_id.0, sim_time_s = state.sim_time_s, "simulation paused");
            Ok(())
        })
    }

    /// Continue a paused or waiting run; with `duration_s`, hold again after
    /// that many simulated seconds.
    pub fn resume(&self, duration_s: Option<f64>) -> Result<(), RelayError> {
        let hold = check_duration(duration_s)?;
        self.with_state(|state| {
            let resumable = state.status == RunStatus::Paused
                || (state.status == RunStatus::Running && state.waiting);
            if !resumable {
                return Err(state.transition_error("resume"));
            }
            state.status = RunStatus::Running;
            state.waiting = false;
            state.hold_at_s = hold.map(|d| state.sim_time_s + d);
            if state.real_time {
                state.next_propagation = Some(SystemTime::now() + step_duration(&state.plan));
            }
            info!(run_id = state.run_id.0, ?duration_s, "simulation resumed");
            Ok(())
        })
    }

    pub fn stop(&self) -> Result<(), RelayError> {
        self.with_state(|state| {
            if matches!(state.status, RunStatus::Stopped | RunStatus::Ended) {
                return Err(state.transition_error("stop"));
            }
            state.status = RunStatus::Stopped;
            state.waiting = false;
            state.hold_at_s = None;
            info!(run_id = state.run_id.0, sim_time_s = state.sim_time_s, "simulation stopped");
            Ok(())
        })
    }

    pub fn status(&self) -> RuntimeStatus {
        self.shared.lock_state().snapshot()
    }

    pub fn is_real_time(&self) -> bool {
        self.shared.lock_state().real_time
    }

    /// Fails unless no run is in progress (Ready, Stopped, or Ended).
    pub fn ensure_idle(&self, op: &'static str) -> Result<(), RelayError> {
        let state = self.shared.lock_state();
        if matches!(state.status, RunStatus::Running | RunStatus::Paused) {
            return Err(state.transition_error(op));
        }
        Ok(())
    }

    pub fn current_utc_ms() -> u64 {
        utc_ms(SystemTime::now())
    }

    pub fn next_propagation_utc_ms(&self) -> Result<u64, RelayError> {
        let state = self.shared.lock_state();
        match (state.real_time, state.status, state.next_propagation) {
            (true, RunStatus::Running | RunStatus::Paused, Some(next)) => Ok(utc_ms(next)),
            _ => Err(state.transition_error("get_next_propagation_utc_time")),
        }
    }

    /// Simulated (and, in real-time runs, wall-clock) seconds per step.
    pub fn real_time_step_s(&self) -> f64 {
        self.shared.lock_state().plan.base_step_s()
    }

    /// Write the engine's trajectories and point downloads at them.
    pub fn write_trajectories(&self, path: &Path) -> Result<TrajectoryFiles, RelayError> {
        let run_id = self.shared.lock_state().run_id;
        let files = lock_engine(&self.shared.engine).write_trajectories(path)?;
        *self
            .shared
            .trajectory
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = Some(TrajectoryPointer {
            run_id,
            path: path.to_path_buf(),
            ground_vehicles: files.ground_vehicles.clone(),
        });
        info!(run_id = run_id.0, path = %path.display(), "trajectories written");
        Ok(files)
    }

    pub fn clear_trajectories(&self) {
        lock_engine(&self.shared.engine).clear_trajectories();
    }

    pub fn trajectory_pointer(&self) -> Option<TrajectoryPointer> {
        self.shared
            .trajectory
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Files a download should stream: the pointed-to file, then the
    /// ground-vehicle file written with it, if that still exists.
    pub fn download_files(&self) -> Result<Vec<PathBuf>, RelayError> {
        let pointer = self
            .trajectory_pointer()
            .ok_or_else(|| RelayError::NotFound("no trajectory file has been written".into()))?;
        if !pointer.path.is_file() {
            return Err(RelayError::NotFound(pointer.path.display().to_string()));
        }
        let mut files = vec![pointer.path];
        files.extend(pointer.ground_vehicles.filter(|p| p.is_file()));
        Ok(files)
    }
}

impl Drop for SimulationController {
    fn drop(&mut self) {
        self.shared.lock_state().shutdown = true;
        self.shared.changed.notify_all();
        if let Some(driver) = self.driver.take() {
            let _ = driver.join();
        }
    }
}

fn check_duration(duration_s: Option<f64>) -> Result<Option<f64>, RelayError> {
    match duration_s {
        Some(d) if !(d.is_finite() && d > 0.0) => Err(RelayError::InvalidArgument(format!(
            "duration must be positive, got {d}"
        ))),
        other => Ok(other),
    }
}

fn step_duration(plan: &PropagationPlan) -> Duration {
    Duration::from_secs_f64(plan.base_step_s())
}

fn utc_ms(t: SystemTime) -> u64 {
    t.duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

/// Driver thread body.
fn drive(shared: Arc<Shared>) {
    let mut state = shared.lock_state();
    loop {
        if state.shutdown {
            return;
        }
        match state.status {
            RunStatus::Stopped => {
                state.status = RunStatus::Ended;
                info!(run_id = state.run_id.0, "simulation ended");
                shared.changed.notify_all();
                continue;
            }
            RunStatus::Running if !state.waiting => {}
            _ => {
                state = shared
                    .changed
                    .wait(state)
                    .unwrap_or_else(PoisonError::into_inner);
                continue;
            }
        }

        let remaining = state.plan.total_period_s - state.sim_time_s;
        if remaining <= TIME_EPSILON_S {
            state.status = RunStatus::Ended;
            info!(run_id = state.run_id.0, sim_time_s = state.sim_time_s, "simulation ended");
            shared.changed.notify_all();
            continue;
        }
        let mut dt = state.plan.base_step_s().min(remaining);
        if let Some(hold) = state.hold_at_s {
            let until_hold = hold - state.sim_time_s;
            if until_hold <= TIME_EPSILON_S {
                state.waiting = true;
                state.hold_at_s = None;
                info!(run_id = state.run_id.0, sim_time_s = state.sim_time_s, "simulation waiting");
                shared.changed.notify_all();
                continue;
            }
            dt = dt.min(until_hold);
        }

        if state.real_time {
            if let Some(next) = state.next_propagation {
                if let Ok(delay) = next.duration_since(SystemTime::now()) {
                    state = shared
                        .changed
                        .wait_timeout(state, delay)
                        .map(|(guard, _)| guard)
                        .unwrap_or_else(|e| e.into_inner().0);
                    continue;
                }
            }
        }

        let sim_time_s = {
            let mut engine = lock_engine(&shared.engine);
            engine.propagate(dt);
            engine.sim_time_s()
        };
        state.sim_time_s = sim_time_s;
        if state.real_time {
            let step = step_duration(&state.plan);
            state.next_propagation = state.next_propagation.map(|next| next + step);
        }
        debug!(sim_time_s, "propagated");
        shared.changed.notify_all();

        // Let RPC handlers (stop, status) in between fixed-horizon steps.
        drop(state);
        thread::yield_now();
        state = shared.lock_state();
    }
}
