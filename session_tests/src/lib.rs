// Test rig for end-to-end session tests.
//
// `TestServer` starts a real relay on OS-assigned loopback ports with a
// scratch directory holding the scenario and any trajectory output.
// `TestServer::connect` returns a real `SimClient` whose downloads land in
// the server's scratch directory under `downloads/`.
//
// The only test-specific code here is the bounded polling helpers; all
// networking goes through the same `SimClient` / `start_relay` code paths a
// real deployment uses.
//
// See also: `tests/full_pipeline.rs` for the scenarios.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use airspace_engine::KinematicEngine;
use airspace_protocol::{RunStatus, RuntimeStatus};
use airspace_relay::{
    ClientConfig, ControlEvent, RelayAddrs, RelayConfig, RelayHandle, Service, SimClient,
    UserDirectory, start_relay,
};
use tempfile::TempDir;

/// Default timeout for blocking poll operations.
pub const POLL_TIMEOUT: Duration = Duration::from_secs(5);

/// Sleep duration between poll attempts.
pub const POLL_INTERVAL: Duration = Duration::from_millis(10);

/// `sim1` may write anything; `alice` owns AC1 and GV1; `bob` owns nothing.
pub const USERS: &str = "\
# test directory
[Simulation_Admin]
sim1
[Normal_User]
alice:{AC1},{GV1}
bob
";

pub const SCENARIO: &str = r#"{
    "aircraft": [
        {"id": "AC1", "tas_knots": 250.0, "flight_phase": "Cruise",
         "flight_plan": [{"name": "SFO", "latitude_deg": 37.62, "longitude_deg": -122.38}]},
        {"id": "AC2", "tas_knots": 250.0, "flight_phase": "Cruise"}
    ],
    "ground_vehicles": [{"id": "GV1", "airport_id": "KSFO", "speed_knots": 10.0}]
}"#;

/// Block until `done` returns true, failing the test after `POLL_TIMEOUT`.
pub fn wait_until(what: &str, mut done: impl FnMut() -> bool) {
    let start = Instant::now();
    while !done() {
        assert!(start.elapsed() < POLL_TIMEOUT, "timed out waiting for {what}");
        thread::sleep(POLL_INTERVAL);
    }
}

/// Poll the run status until `done` holds; returns that status.
pub fn wait_for_status(
    client: &SimClient,
    what: &str,
    done: impl Fn(&RuntimeStatus) -> bool,
) -> RuntimeStatus {
    let mut last = None;
    wait_until(what, || {
        let status = client.runtime_status().expect("runtime_status failed");
        let reached = done(&status);
        last = Some(status);
        reached
    });
    last.expect("status polled at least once")
}

/// Set up and run a fixed-horizon simulation to completion.
pub fn run_to_end(client: &SimClient, total_period_s: f64, step_s: f64) -> RuntimeStatus {
    client
        .setup_simulation(total_period_s, step_s)
        .expect("setup_simulation failed");
    client.start().expect("start failed");
    wait_for_status(client, "run to end", |s| s.status == RunStatus::Ended)
}

/// Drain control events until one matches `pred`; returns it. Events that
/// do not match are discarded.
pub fn poll_until_event(client: &SimClient, pred: impl Fn(&ControlEvent) -> bool) -> ControlEvent {
    let start = Instant::now();
    loop {
        assert!(start.elapsed() < POLL_TIMEOUT, "timed out waiting for control event");
        if let Some(event) = client.poll().into_iter().find(|e| pred(e)) {
            return event;
        }
        thread::sleep(POLL_INTERVAL);
    }
}

pub struct TestServer {
    handle: Option<RelayHandle>,
    pub addrs: RelayAddrs,
    pub config: RelayConfig,
    dir: TempDir,
}

impl TestServer {
    pub fn start() -> Self {
        Self::start_with(|_| {})
    }

    /// Start a relay after letting the test adjust the config.
    pub fn start_with(tweak: impl FnOnce(&mut RelayConfig)) -> Self {
        let dir = tempfile::tempdir().expect("create scratch dir");
        let config = test_config(dir.path(), tweak);
        let service = build_service(&config);
        let (handle, addrs) = start_relay(&config, service).expect("start_relay failed");
        Self {
            handle: Some(handle),
            addrs,
            config,
            dir,
        }
    }

    pub fn service(&self) -> &Arc<Service> {
        self.handle
            .as_ref()
            .expect("server already stopped")
            .service()
    }

    /// A path inside the scratch directory.
    pub fn path(&self, name: &str) -> PathBuf {
        self.dir.path().join(name)
    }

    pub fn download_dir(&self) -> PathBuf {
        self.path("downloads")
    }

    pub fn client_config(&self) -> ClientConfig {
        ClientConfig {
            host: "127.0.0.1".into(),
            rpc_port: self.addrs.rpc.port(),
            control_port: self.addrs.control.port(),
            download_dir: self.download_dir(),
        }
    }

    pub fn connect(&self) -> SimClient {
        SimClient::connect(&self.client_config()).expect("SimClient::connect failed")
    }

    pub fn stop(mut self) {
        if let Some(handle) = self.handle.take() {
            handle.stop();
        }
    }
}

impl Drop for TestServer {
    fn drop(&mut self) {
        if let Some(handle) = self.handle.take() {
            handle.stop();
        }
    }
}

/// Start an embedded service (no listeners) over the same fixtures.
/// The returned `TempDir` must outlive the service's file use.
pub fn start_embedded() -> (TempDir, Arc<Service>) {
    let dir = tempfile::tempdir().expect("create scratch dir");
    let config = test_config(dir.path(), |c| c.mode = airspace_relay::Mode::Embedded);
    let service = build_service(&config);
    (dir, service)
}

fn test_config(dir: &Path, tweak: impl FnOnce(&mut RelayConfig)) -> RelayConfig {
    let scenario = dir.join("scenario.json");
    fs::write(&scenario, SCENARIO).expect("write scenario");
    let mut config = RelayConfig {
        rpc_port: 0,
        control_port: 0,
        scenario: Some(scenario),
        ..RelayConfig::default()
    };
    tweak(&mut config);
    config
}

fn build_service(config: &RelayConfig) -> Arc<Service> {
    let service = Service::new(
        config,
        UserDirectory::parse(USERS),
        Box::new(KinematicEngine::new()),
    )
    .expect("Service::new failed");
    Arc::new(service)
}
