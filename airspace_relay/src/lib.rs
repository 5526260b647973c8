// airspace_relay: session and simulation-control server for the shared
// airspace simulation, plus the matching client library.
//
// Many remote clients drive one time-stepped simulation. Each client holds
// two channels to the server: a stateless RPC channel (every call names its
// session explicitly) and a stateful control socket over which the server
// pushes the session id, identity changes, liveness probes, and trajectory
// file downloads.
//
// Module overview:
// - `config.rs`:     `RelayConfig` / `ClientConfig` (JSON, serde defaults).
// - `error.rs`:      `RelayError`, `AuthError`, `ConfigError`, and the
//                    mapping onto wire `RpcError`s.
// - `users.rs`:      The user/assignment file and the built-in identities.
// - `registry.rs`:   `SessionRegistry`, the concurrent table of sessions.
// - `channel.rs`:    Per-session control socket writer (one writer at a
//                    time per socket, busy-bracketed file streaming).
// - `auth.rs`:       Login/logout, same-host trust, write authorization.
// - `controller.rs`: `SimulationController` run state machine and the
//                    driver thread that propagates the engine.
// - `service.rs`:    `Service::dispatch`, the single RPC entry point.
// - `rpc.rs`:        Per-connection RPC loop.
// - `control.rs`:    Per-connection control socket accept/read loop.
// - `liveness.rs`:   Probe-and-evict maintainer.
// - `server.rs`:     Listeners, background threads, `start_relay`.
// - `client.rs`:     `SimClient`, RPC transports, control receiver thread.
// - `proxy.rs`:      Write-through aircraft / ground vehicle proxies.
//
// Dependencies: `airspace_protocol` (wire types and framing) and
// `airspace_engine` (the propagation engine behind the `Engine` trait).
//
// The server can run as a standalone binary (`main.rs`), be embedded in a
// process via `start_relay`, or run with no network at all in embedded mode
// (`Service` + `client::EmbeddedRpc`).

pub mod auth;
pub mod channel;
pub mod client;
pub mod config;
pub mod control;
pub mod controller;
pub mod error;
pub mod liveness;
pub mod proxy;
pub mod registry;
pub mod rpc;
pub mod server;
pub mod service;
pub mod users;

pub use client::{ClientError, ControlEvent, SimClient};
pub use config::{ClientConfig, Mode, RelayConfig};
pub use error::{AuthError, ConfigError, RelayError};
pub use proxy::{AircraftProxy, GroundVehicleProxy};
pub use server::{RelayAddrs, RelayHandle, start_relay};
pub use service::Service;
pub use users::UserDirectory;
