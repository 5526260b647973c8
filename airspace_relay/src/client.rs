// Client library for the simulation server.
//
// A `SimClient` talks to the server over two channels:
// - RPC, through a boxed `RpcTransport`: `TcpRpc` for a networked server or
//   `EmbeddedRpc` for an in-process `Service`. Every call carries the
//   session id explicitly; the transport itself has no session affinity.
// - The control socket (networked only). `connect()` opens it first, then
//   spawns a background receiver thread and waits (bounded) for the
//   `{sessionId}` push before opening the RPC channel.
//
// The receiver thread owns the read half of the control socket. It keeps a
// small shared `ControlState` (session id, last pushed auth id, busy flag)
// behind a mutex + condvar for the blocking conveniences, and forwards
// every notable push into a bounded inbox that `poll()` drains without
// blocking. A client that never polls loses its oldest events once the
// inbox is full; the shared state stays current either way. File bodies are copied straight from the socket into
// `download_dir`, under the file-name component of the announced path only.
//
// There is no ordering between the two channels: after `login()` returns,
// the matching `{auth_id}` push may or may not have been received yet.
//
// See also: `proxy.rs` for the write-through entity proxies returned by
// `select_aircraft` / `select_ground_vehicle`.

use std::collections::VecDeque;
use std::fs::{self, File};
use std::io::{self, BufReader, BufWriter};
use std::net::{Shutdown, TcpStream, ToSocketAddrs};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Condvar, Mutex, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use airspace_protocol::{
    ControlDecoder, ControlMessage, ErrorKind, FrameError, RpcError, RpcReply, RpcRequest,
    RpcValue, RunId, RuntimeStatus, SessionId, read_message, write_message,
};
use thiserror::Error;
use tracing::{debug, warn};

use crate::config::ClientConfig;
use crate::proxy::{AircraftProxy, GroundVehicleProxy};
use crate::service::Service;

/// How long `connect()` waits for the `{sessionId}` push.
const SESSION_ID_TIMEOUT: Duration = Duration::from_secs(5);

/// How long `disconnect()` waits for an in-flight transfer to finish.
const DISCONNECT_IDLE_TIMEOUT: Duration = Duration::from_secs(5);

/// Most control events held for `poll()`.
pub const INBOX_CAPACITY: usize = 256;

#[derive(Debug, Error)]
pub enum ClientError {
    /// The server rejected the call.
    #[error(transparent)]
    Remote(#[from] RpcError),
    #[error("i/o error: {0}")]
    Io(#[from] io::Error),
    #[error("cannot decode reply: {0}")]
    Decode(#[from] serde_json::Error),
    #[error("control socket: {0}")]
    Frame(#[from] FrameError),
    #[error("unexpected reply to {0}")]
    UnexpectedReply(&'static str),
    #[error("entity `{0}` is external and cannot be modified")]
    ExternalEntity(String),
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
    #[error("timed out waiting for {0}")]
    Timeout(&'static str),
}

impl ClientError {
    /// The server-side error category, if the server produced this error or
    /// would have for the same input.
    pub fn kind(&self) -> Option<ErrorKind> {
        match self {
            ClientError::Remote(e) => Some(e.kind),
            ClientError::InvalidArgument(_) => Some(ErrorKind::InvalidArgument),
            _ => None,
        }
    }
}

// ---------------------------------------------------------------------------
// RPC transports
// ---------------------------------------------------------------------------

/// One synchronous request/response exchange with the server.
pub trait RpcTransport: Send {
    fn call(&mut self, request: RpcRequest) -> Result<RpcValue, ClientError>;
}

/// RPC over TCP: JSON payloads with a 4-byte length prefix.
pub struct TcpRpc {
    reader: BufReader<TcpStream>,
    writer: BufWriter<TcpStream>,
}

impl TcpRpc {
    pub fn connect(addr: impl ToSocketAddrs) -> io::Result<Self> {
        let stream = TcpStream::connect(addr)?;
        stream.set_nodelay(true).ok();
        let reader = BufReader::new(stream.try_clone()?);
        Ok(Self {
            reader,
            writer: BufWriter::new(stream),
        })
    }
}

impl RpcTransport for TcpRpc {
    fn call(&mut self, request: RpcRequest) -> Result<RpcValue, ClientError> {
        let json = serde_json::to_vec(&request)?;
        write_message(&mut self.writer, &json)?;
        let bytes = read_message(&mut self.reader)?;
        let reply: RpcReply = serde_json::from_slice(&bytes)?;
        Result::<RpcValue, RpcError>::from(reply).map_err(ClientError::Remote)
    }
}

/// RPC straight into an in-process `Service`.
pub struct EmbeddedRpc {
    service: Arc<Service>,
}

impl EmbeddedRpc {
    pub fn new(service: Arc<Service>) -> Self {
        Self { service }
    }
}

impl RpcTransport for EmbeddedRpc {
    fn call(&mut self, request: RpcRequest) -> Result<RpcValue, ClientError> {
        let reply = self.service.dispatch(request);
        Result::<RpcValue, RpcError>::from(reply).map_err(ClientError::Remote)
    }
}

/// Shared handle to a client's RPC transport plus its session id. Cloned
/// into every entity proxy so proxies can write through on their own.
#[derive(Clone)]
pub struct RpcHandle {
    transport: Arc<Mutex<Box<dyn RpcTransport>>>,
    session_id: SessionId,
}

impl RpcHandle {
    pub fn new(transport: Box<dyn RpcTransport>, session_id: SessionId) -> Self {
        Self {
            transport: Arc::new(Mutex::new(transport)),
            session_id,
        }
    }

    pub fn session_id(&self) -> SessionId {
        self.session_id
    }

    pub fn call(&self, request: RpcRequest) -> Result<RpcValue, ClientError> {
        self.transport
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .call(request)
    }

    pub(crate) fn call_unit(&self, request: RpcRequest) -> Result<(), ClientError> {
        let op = request.name();
        match self.call(request)? {
            RpcValue::Unit => Ok(()),
            _ => Err(ClientError::UnexpectedReply(op)),
        }
    }

    fn call_integer(&self, request: RpcRequest) -> Result<u64, ClientError> {
        let op = request.name();
        match self.call(request)? {
            RpcValue::Integer(n) => Ok(n),
            _ => Err(ClientError::UnexpectedReply(op)),
        }
    }

    fn call_float(&self, request: RpcRequest) -> Result<f64, ClientError> {
        let op = request.name();
        match self.call(request)? {
            RpcValue::Float(x) => Ok(x),
            _ => Err(ClientError::UnexpectedReply(op)),
        }
    }

    fn call_ids(&self, request: RpcRequest) -> Result<Vec<String>, ClientError> {
        let op = request.name();
        match self.call(request)? {
            RpcValue::Ids(ids) => Ok(ids),
            _ => Err(ClientError::UnexpectedReply(op)),
        }
    }
}

// ---------------------------------------------------------------------------
// Control socket receiver
// ---------------------------------------------------------------------------

/// Notable pushes from the control socket, in arrival order.
#[derive(Clone, Debug, PartialEq)]
pub enum ControlEvent {
    SessionAssigned(SessionId),
    AuthChanged(Option<String>),
    FileReceived { path: PathBuf, bytes: u64 },
    /// The body was consumed but could not be stored locally.
    TransferFailed(String),
    Closed,
}

#[derive(Clone, Debug, Default)]
struct ControlState {
    session_id: Option<SessionId>,
    auth_id: Option<String>,
    busy: bool,
    closed: bool,
}

#[derive(Default)]
struct ControlShared {
    state: Mutex<ControlState>,
    changed: Condvar,
}

impl ControlShared {
    fn update(&self, f: impl FnOnce(&mut ControlState)) {
        f(&mut self.state.lock().unwrap_or_else(PoisonError::into_inner));
        self.changed.notify_all();
    }

    fn snapshot(&self) -> ControlState {
        self.state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Block until `done` holds or `timeout` passes; returns the final state.
    fn wait_until(&self, timeout: Duration, done: impl Fn(&ControlState) -> bool) -> ControlState {
        let deadline = Instant::now() + timeout;
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        while !done(&state) {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                break;
            }
            state = self
                .changed
                .wait_timeout(state, remaining)
                .unwrap_or_else(PoisonError::into_inner)
                .0;
        }
        state.clone()
    }
}

/// Control events awaiting `poll()`, oldest dropped first when full.
#[derive(Default)]
struct EventInbox {
    queue: Mutex<VecDeque<ControlEvent>>,
}

impl EventInbox {
    fn push(&self, event: ControlEvent) {
        let mut queue = self.queue.lock().unwrap_or_else(PoisonError::into_inner);
        if queue.len() >= INBOX_CAPACITY {
            queue.pop_front();
            debug!("control event inbox full; oldest event dropped");
        }
        queue.push_back(event);
    }

    fn drain(&self) -> Vec<ControlEvent> {
        self.queue
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .drain(..)
            .collect()
    }
}

struct ControlLink {
    stream: TcpStream,
    shared: Arc<ControlShared>,
    inbox: Arc<EventInbox>,
    reader_thread: Option<JoinHandle<()>>,
}

impl ControlLink {
    fn open(config: &ClientConfig) -> io::Result<Self> {
        fs::create_dir_all(&config.download_dir)?;
        let stream = TcpStream::connect((config.host.as_str(), config.control_port))?;
        let reader = BufReader::new(stream.try_clone()?);
        let shared = Arc::new(ControlShared::default());
        let inbox = Arc::new(EventInbox::default());
        let reader_thread = {
            let shared = shared.clone();
            let inbox = inbox.clone();
            let download_dir = config.download_dir.clone();
            thread::spawn(move || receiver_loop(reader, &shared, &inbox, &download_dir))
        };
        Ok(Self {
            stream,
            shared,
            inbox,
            reader_thread: Some(reader_thread),
        })
    }
}

impl Drop for ControlLink {
    fn drop(&mut self) {
        let _ = self.stream.shutdown(Shutdown::Both);
        if let Some(handle) = self.reader_thread.take() {
            let _ = handle.join();
        }
    }
}

/// Receiver thread: decode pushes until the socket closes or desyncs.
fn receiver_loop(
    mut reader: BufReader<TcpStream>,
    shared: &ControlShared,
    inbox: &EventInbox,
    download_dir: &Path,
) {
    let mut decoder = ControlDecoder::new();
    loop {
        let msg = match decoder.read_message(&mut reader) {
            Ok(msg) => msg,
            Err(e) => {
                if !e.is_eof() {
                    warn!(error = %e, "control socket failed");
                }
                break;
            }
        };
        let event = match msg {
            ControlMessage::SessionId(id) => {
                shared.update(|s| s.session_id = Some(id));
                Some(ControlEvent::SessionAssigned(id))
            }
            ControlMessage::AuthId(auth_id) => {
                shared.update(|s| s.auth_id = auth_id.clone());
                Some(ControlEvent::AuthChanged(auth_id))
            }
            ControlMessage::SocketBusy(busy) => {
                shared.update(|s| s.busy = busy);
                None
            }
            ControlMessage::LivenessProbe { timestamp_ms } => {
                debug!(timestamp_ms, "liveness probe");
                None
            }
            ControlMessage::FileTransfer { path, .. } => {
                match receive_file(&mut decoder, &mut reader, download_dir, &path) {
                    Ok(event) => Some(event),
                    Err(e) => {
                        warn!(path = %path, error = %e, "file transfer broke the control stream");
                        break;
                    }
                }
            }
        };
        if let Some(event) = event {
            inbox.push(event);
        }
    }
    shared.update(|s| {
        s.busy = false;
        s.closed = true;
    });
    inbox.push(ControlEvent::Closed);
}

/// Copy one announced body into `download_dir`. A file that cannot be
/// created locally is still drained so the stream stays in sync; only a
/// short or failed socket read is fatal.
fn receive_file<R: io::Read>(
    decoder: &mut ControlDecoder,
    reader: &mut R,
    download_dir: &Path,
    announced: &str,
) -> Result<ControlEvent, FrameError> {
    let target = match Path::new(announced).file_name() {
        Some(name) => {
            let path = download_dir.join(name);
            File::create(&path)
                .map(|file| (path, file))
                .map_err(|e| e.to_string())
        }
        None => Err(format!("announced path `{announced}` has no file name")),
    };
    match target {
        Ok((path, file)) => {
            let bytes = decoder.copy_body(reader, &mut BufWriter::new(file))?;
            debug!(path = %path.display(), bytes, "file received");
            Ok(ControlEvent::FileReceived { path, bytes })
        }
        Err(reason) => {
            let bytes = decoder.copy_body(reader, &mut io::sink())?;
            warn!(announced, bytes, reason = %reason, "file discarded");
            Ok(ControlEvent::TransferFailed(reason))
        }
    }
}

// ---------------------------------------------------------------------------
// SimClient
// ---------------------------------------------------------------------------

pub struct SimClient {
    rpc: RpcHandle,
    control: Option<ControlLink>,
}

impl SimClient {
    /// Connect to a networked server: control socket first, then RPC.
    pub fn connect(config: &ClientConfig) -> Result<Self, ClientError> {
        let control = ControlLink::open(config)?;
        let state = control.shared.wait_until(SESSION_ID_TIMEOUT, |s| {
            s.session_id.is_some() || s.closed
        });
        // Dropping `control` on any early return closes the socket.
        let session_id = state.session_id.ok_or(ClientError::Timeout("session id"))?;
        let transport = TcpRpc::connect((config.host.as_str(), config.rpc_port))?;
        debug!(session_id = %session_id, "connected");
        Ok(Self {
            rpc: RpcHandle::new(Box::new(transport), session_id),
            control: Some(control),
        })
    }

    /// Attach to an embedded `Service` in this process.
    pub fn connect_embedded(service: Arc<Service>) -> Result<Self, ClientError> {
        let session_id = service.embedded_session().ok_or(ClientError::Remote(RpcError {
            kind: ErrorKind::Mode,
            message: "service is not in embedded mode".into(),
        }))?;
        Ok(Self {
            rpc: RpcHandle::new(Box::new(EmbeddedRpc::new(service)), session_id),
            control: None,
        })
    }

    pub fn session_id(&self) -> SessionId {
        self.rpc.session_id()
    }

    pub fn rpc(&self) -> &RpcHandle {
        &self.rpc
    }

    /// Identity from the most recent `{auth_id}` push.
    pub fn current_auth_id(&self) -> Option<String> {
        self.control
            .as_ref()
            .and_then(|c| c.shared.snapshot().auth_id)
    }

    /// Inside a `socketBusy` bracket.
    pub fn is_busy(&self) -> bool {
        self.control
            .as_ref()
            .is_some_and(|c| c.shared.snapshot().busy)
    }

    /// Wait for an in-flight transfer to end. Returns false on timeout.
    pub fn wait_until_idle(&self, timeout: Duration) -> bool {
        match &self.control {
            Some(c) => !c.shared.wait_until(timeout, |s| !s.busy).busy,
            None => true,
        }
    }

    /// Block until the control socket delivers `auth_id` (or times out).
    pub fn wait_for_auth_id(&self, auth_id: Option<&str>, timeout: Duration) -> bool {
        match &self.control {
            Some(c) => {
                let state = c
                    .shared
                    .wait_until(timeout, |s| s.auth_id.as_deref() == auth_id || s.closed);
                state.auth_id.as_deref() == auth_id
            }
            None => false,
        }
    }

    /// Drain queued control events without blocking.
    pub fn poll(&self) -> Vec<ControlEvent> {
        match &self.control {
            Some(control) => control.inbox.drain(),
            None => Vec::new(),
        }
    }

    /// Log out (if logged in), let any transfer finish, then close the
    /// control socket. Returns the logout result.
    pub fn disconnect(mut self) -> Result<(), ClientError> {
        let logout = if self.current_auth_id().is_some() {
            self.logout()
        } else {
            Ok(())
        };
        if !self.wait_until_idle(DISCONNECT_IDLE_TIMEOUT) {
            warn!("closing control socket during a file transfer");
        }
        self.control.take();
        logout
    }

    // --- Identity ---

    pub fn login(&self, auth_id: &str) -> Result<(), ClientError> {
        self.rpc.call_unit(RpcRequest::Login {
            session_id: self.session_id(),
            auth_id: auth_id.to_string(),
        })
    }

    pub fn logout(&self) -> Result<(), ClientError> {
        self.rpc.call_unit(RpcRequest::Logout {
            session_id: self.session_id(),
        })
    }

    // --- Run control ---

    pub fn setup_simulation(&self, total_period_s: f64, step_s: f64) -> Result<RunId, ClientError> {
        self.rpc
            .call_integer(RpcRequest::SetupSimulation {
                session_id: self.session_id(),
                total_period_s,
                step_s,
            })
            .map(RunId)
    }

    pub fn setup_simulation_by_phase(
        &self,
        total_period_s: f64,
        surface_step_s: f64,
        terminal_step_s: f64,
        airborne_step_s: f64,
    ) -> Result<RunId, ClientError> {
        self.rpc
            .call_integer(RpcRequest::SetupSimulationByPhase {
                session_id: self.session_id(),
                total_period_s,
                surface_step_s,
                terminal_step_s,
                airborne_step_s,
            })
            .map(RunId)
    }

    pub fn start(&self) -> Result<(), ClientError> {
        self.rpc.call_unit(RpcRequest::Start {
            session_id: self.session_id(),
            duration_s: None,
        })
    }

    /// Run for `duration_s` simulated seconds, then hold until resumed.
    pub fn start_for(&self, duration_s: f64) -> Result<(), ClientError> {
        self.rpc.call_unit(RpcRequest::Start {
            session_id: self.session_id(),
            duration_s: Some(duration_s),
        })
    }

    pub fn start_real_time(&self) -> Result<(), ClientError> {
        self.rpc.call_unit(RpcRequest::StartRealTime {
            session_id: self.session_id(),
        })
    }

    pub fn pause(&self) -> Result<(), ClientError> {
        self.rpc.call_unit(RpcRequest::Pause {
            session_id: self.session_id(),
        })
    }

    pub fn resume(&self) -> Result<(), ClientError> {
        self.rpc.call_unit(RpcRequest::Resume {
            session_id: self.session_id(),
            duration_s: None,
        })
    }

    pub fn resume_for(&self, duration_s: f64) -> Result<(), ClientError> {
        self.rpc.call_unit(RpcRequest::Resume {
            session_id: self.session_id(),
            duration_s: Some(duration_s),
        })
    }

    pub fn stop(&self) -> Result<(), ClientError> {
        self.rpc.call_unit(RpcRequest::Stop {
            session_id: self.session_id(),
        })
    }

    pub fn runtime_status(&self) -> Result<RuntimeStatus, ClientError> {
        match self.rpc.call(RpcRequest::RuntimeStatus {
            session_id: self.session_id(),
        })? {
            RpcValue::Status(status) => Ok(status),
            _ => Err(ClientError::UnexpectedReply("get_runtime_sim_status")),
        }
    }

    pub fn sim_id(&self) -> Result<RunId, ClientError> {
        self.rpc
            .call_integer(RpcRequest::SimId {
                session_id: self.session_id(),
            })
            .map(RunId)
    }

    pub fn current_sim_time(&self) -> Result<f64, ClientError> {
        self.rpc.call_float(RpcRequest::CurrentSimTime {
            session_id: self.session_id(),
        })
    }

    /// Server wall clock, ms since the Unix epoch.
    pub fn current_utc_ms(&self) -> Result<u64, ClientError> {
        self.rpc.call_integer(RpcRequest::CurrentUtcTime {
            session_id: self.session_id(),
        })
    }

    pub fn next_propagation_utc_ms(&self) -> Result<u64, ClientError> {
        self.rpc.call_integer(RpcRequest::NextPropagationUtcTime {
            session_id: self.session_id(),
        })
    }

    pub fn real_time_step_s(&self) -> Result<f64, ClientError> {
        self.rpc.call_float(RpcRequest::RealTimeStep {
            session_id: self.session_id(),
        })
    }

    // --- Scenario and results ---

    /// Load a scenario file. The path is resolved on the server.
    pub fn load_scenario(&self, path: &str) -> Result<(), ClientError> {
        self.rpc.call_unit(RpcRequest::LoadScenario {
            session_id: self.session_id(),
            path: path.to_string(),
        })
    }

    /// Write trajectory CSVs on the server. Returns the written paths.
    pub fn write_trajectories(&self, path: &str) -> Result<Vec<String>, ClientError> {
        self.rpc.call_ids(RpcRequest::WriteTrajectories {
            session_id: self.session_id(),
            path: path.to_string(),
        })
    }

    pub fn clear_trajectories(&self) -> Result<(), ClientError> {
        self.rpc.call_unit(RpcRequest::ClearTrajectories {
            session_id: self.session_id(),
        })
    }

    /// Ask the server to stream the latest trajectory file(s) over the
    /// control socket. Returns the body byte count the server sent; the
    /// files land asynchronously (see `poll()` / `wait_until_idle()`).
    pub fn request_download_trajectory_file(&self) -> Result<u64, ClientError> {
        self.rpc.call_integer(RpcRequest::RequestDownloadTrajectoryFile {
            session_id: self.session_id(),
        })
    }

    // --- Entities ---

    pub fn all_aircraft_ids(&self) -> Result<Vec<String>, ClientError> {
        self.rpc.call_ids(RpcRequest::AllAircraftIds {
            session_id: self.session_id(),
        })
    }

    pub fn all_ground_vehicle_ids(&self) -> Result<Vec<String>, ClientError> {
        self.rpc.call_ids(RpcRequest::AllGroundVehicleIds {
            session_id: self.session_id(),
        })
    }

    /// Aircraft assigned to `auth_id`, or to this session's identity.
    pub fn assigned_aircraft_ids(&self, auth_id: Option<&str>) -> Result<Vec<String>, ClientError> {
        self.rpc.call_ids(RpcRequest::AssignedAircraftIds {
            session_id: self.session_id(),
            auth_id: auth_id.map(str::to_string),
        })
    }

    pub fn assigned_ground_vehicle_ids(
        &self,
        auth_id: Option<&str>,
    ) -> Result<Vec<String>, ClientError> {
        self.rpc.call_ids(RpcRequest::AssignedGroundVehicleIds {
            session_id: self.session_id(),
            auth_id: auth_id.map(str::to_string),
        })
    }

    pub fn request_aircraft(&self, aircraft_id: &str) -> Result<(), ClientError> {
        self.rpc.call_unit(RpcRequest::RequestAircraft {
            session_id: self.session_id(),
            aircraft_id: aircraft_id.to_string(),
        })
    }

    pub fn request_ground_vehicle(&self, ground_vehicle_id: &str) -> Result<(), ClientError> {
        self.rpc.call_unit(RpcRequest::RequestGroundVehicle {
            session_id: self.session_id(),
            ground_vehicle_id: ground_vehicle_id.to_string(),
        })
    }

    pub fn select_aircraft(&self, aircraft_id: &str) -> Result<AircraftProxy, ClientError> {
        match self.rpc.call(RpcRequest::SelectAircraft {
            session_id: self.session_id(),
            aircraft_id: aircraft_id.to_string(),
        })? {
            RpcValue::Aircraft(state) => Ok(AircraftProxy::new(self.rpc.clone(), state)),
            _ => Err(ClientError::UnexpectedReply("select_aircraft")),
        }
    }

    pub fn select_ground_vehicle(
        &self,
        ground_vehicle_id: &str,
    ) -> Result<GroundVehicleProxy, ClientError> {
        match self.rpc.call(RpcRequest::SelectGroundVehicle {
            session_id: self.session_id(),
            ground_vehicle_id: ground_vehicle_id.to_string(),
        })? {
            RpcValue::GroundVehicle(state) => {
                Ok(GroundVehicleProxy::new(self.rpc.clone(), state))
            }
            _ => Err(ClientError::UnexpectedReply("select_ground_vehicle")),
        }
    }
}
