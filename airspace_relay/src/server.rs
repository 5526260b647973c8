// TCP listeners and background threads for a networked relay.
//
// Architecture: thread-per-connection over blocking `std::net` sockets.
//
// - **RPC listener thread**: accepts RPC connections and hands each to its
//   own thread running `rpc::serve_rpc_connection`. Requests on one
//   connection are served in order; connections run concurrently and meet
//   only inside `Service` (registry, controller, engine locks).
// - **Control listener thread**: accepts control connections and hands each
//   to its own thread running `control::serve_control_connection`, which
//   creates the session and reads until EOF.
// - **Liveness maintainer**: probes every control socket on an interval and
//   evicts dead sessions (see `liveness.rs`).
// - **Simulation driver**: owned by `SimulationController`, not started here.
//
// Open RPC sockets are tracked by connection id only so `stop` can shut them
// down; each connection thread removes its own entry on exit, which closes
// the server's last handle on that socket.
//
// Both listeners are nonblocking so the accept loops can check
// `keep_running` periodically. `RelayHandle::stop` clears the flag, shuts
// down every open socket so blocked readers wake up, and joins the listener
// and maintainer threads.

use std::collections::HashMap;
use std::io;
use std::net::{Shutdown, SocketAddr, TcpListener, TcpStream};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread;
use std::time::Duration;

use tracing::{info, warn};

use crate::config::{Mode, RelayConfig};
use crate::control::{AcceptPolicy, serve_control_connection};
use crate::liveness::spawn_maintainer;
use crate::rpc::serve_rpc_connection;
use crate::service::Service;

/// Sleep between accept attempts when no connection is pending.
const ACCEPT_POLL: Duration = Duration::from_millis(50);

/// Open RPC sockets keyed by connection id.
type RpcStreams = Arc<Mutex<HashMap<u64, TcpStream>>>;

/// Bound addresses of a running relay.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RelayAddrs {
    pub rpc: SocketAddr,
    pub control: SocketAddr,
}

/// Handle returned by `start_relay` to control the running server.
pub struct RelayHandle {
    keep_running: Arc<AtomicBool>,
    service: Arc<Service>,
    rpc_streams: RpcStreams,
    threads: Vec<thread::JoinHandle<()>>,
}

impl RelayHandle {
    pub fn service(&self) -> &Arc<Service> {
        &self.service
    }

    /// Signal the relay to stop, close every client socket, and wait for the
    /// background threads to exit.
    pub fn stop(self) {
        self.keep_running.store(false, Ordering::SeqCst);
        for (_, channel) in self.service.registry().channels() {
            channel.shutdown();
        }
        for (_, stream) in self
            .rpc_streams
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .drain()
        {
            let _ = stream.shutdown(Shutdown::Both);
        }
        for handle in self.threads {
            let _ = handle.join();
        }
        info!("relay stopped");
    }
}

/// Bind both listeners and start the background threads. Returns a handle
/// for stopping the relay and the actual bound addresses (useful when port 0
/// is used to let the OS pick free ports).
pub fn start_relay(
    config: &RelayConfig,
    service: Arc<Service>,
) -> io::Result<(RelayHandle, RelayAddrs)> {
    if service.mode() == Mode::Embedded {
        return Err(io::Error::new(
            io::ErrorKind::InvalidInput,
            "embedded services have no network listeners",
        ));
    }
    let rpc_listener = TcpListener::bind(SocketAddr::new(config.bind_address, config.rpc_port))?;
    let control_listener =
        TcpListener::bind(SocketAddr::new(config.bind_address, config.control_port))?;
    let addrs = RelayAddrs {
        rpc: rpc_listener.local_addr()?,
        control: control_listener.local_addr()?,
    };
    rpc_listener.set_nonblocking(true)?;
    control_listener.set_nonblocking(true)?;

    let keep_running = Arc::new(AtomicBool::new(true));
    let rpc_streams: RpcStreams = Arc::new(Mutex::new(HashMap::new()));
    let policy = AcceptPolicy {
        bind_address: config.bind_address,
        trust_same_host: config.trust_same_host,
    };

    let rpc_thread = {
        let keep_running = keep_running.clone();
        let service = service.clone();
        let rpc_streams = rpc_streams.clone();
        let next_conn = AtomicU64::new(1);
        thread::spawn(move || {
            accept_loop(&rpc_listener, &keep_running, |stream| {
                let conn_id = next_conn.fetch_add(1, Ordering::Relaxed);
                if let Ok(clone) = stream.try_clone() {
                    rpc_streams
                        .lock()
                        .unwrap_or_else(PoisonError::into_inner)
                        .insert(conn_id, clone);
                }
                let service = service.clone();
                let rpc_streams = rpc_streams.clone();
                thread::spawn(move || {
                    serve_rpc_connection(stream, service);
                    rpc_streams
                        .lock()
                        .unwrap_or_else(PoisonError::into_inner)
                        .remove(&conn_id);
                });
            });
        })
    };

    let control_thread = {
        let keep_running = keep_running.clone();
        let registry = service.registry().clone();
        thread::spawn(move || {
            accept_loop(&control_listener, &keep_running, |stream| {
                let registry = registry.clone();
                thread::spawn(move || serve_control_connection(stream, registry, policy));
            });
        })
    };

    let maintainer = spawn_maintainer(
        service.registry().clone(),
        config.liveness_interval(),
        keep_running.clone(),
    );

    info!(rpc = %addrs.rpc, control = %addrs.control, "relay listening");
    Ok((
        RelayHandle {
            keep_running,
            service,
            rpc_streams,
            threads: vec![rpc_thread, control_thread, maintainer],
        },
        addrs,
    ))
}

/// Accept connections until `keep_running` clears, passing each (switched
/// back to blocking mode) to `on_accept`.
fn accept_loop(
    listener: &TcpListener,
    keep_running: &AtomicBool,
    mut on_accept: impl FnMut(TcpStream),
) {
    while keep_running.load(Ordering::SeqCst) {
        match listener.accept() {
            Ok((stream, _addr)) => {
                stream.set_nonblocking(false).ok();
                stream.set_nodelay(true).ok();
                on_accept(stream);
            }
            Err(ref e) if e.kind() == io::ErrorKind::WouldBlock => {
                thread::sleep(ACCEPT_POLL);
            }
            Err(e) => {
                warn!(error = %e, "accept failed; listener exiting");
                break;
            }
        }
    }
}
