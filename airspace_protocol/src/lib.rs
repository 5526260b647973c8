// airspace_protocol: wire protocol shared by the simulation server and its
// clients.
//
// The server exposes two channels per client:
// - an RPC channel carrying `RpcRequest` / `RpcReply` as JSON with a 4-byte
//   length prefix (stateless request/response, explicit session id), and
// - a control socket carrying server pushes as 2-byte length-prefixed text
//   frames, interleaved with raw file bodies during trajectory downloads.
//
// Module overview:
// - `types.rs`:    `SessionId`, `RunId`, `PermissionTier`, `RunStatus`,
//                  `RuntimeStatus`.
// - `entity.rs`:   Aircraft / ground vehicle snapshots exchanged by
//                  select/synchronize and loaded from scenario files.
// - `message.rs`:  RPC request/reply enums and the wire error taxonomy.
// - `framing.rs`:  Length-prefixed framing for both channels.
// - `text.rs`:     Parser/encoder for the loose key/value objects inside
//                  control frames (unquoted keys, quoted numbers).
// - `control.rs`:  Control-socket message shapes and the receive-side
//                  frame/body state machine.
// - `error.rs`:    `FrameError`.
//
// No async runtime: everything works over `std::io::Read`/`Write`, so the same
// code serves blocking TCP streams, buffered wrappers, and in-memory cursors
// in tests.

pub mod control;
pub mod entity;
pub mod error;
pub mod framing;
pub mod message;
pub mod text;
pub mod types;

pub use control::{ControlDecoder, ControlMessage, DecoderState, write_control, write_file_body};
pub use entity::{AircraftState, EntityKind, FlightPhase, GroundVehicleState, Waypoint};
pub use error::FrameError;
pub use framing::{MAX_FRAME_LEN, MAX_MESSAGE_SIZE, read_frame, read_message, write_frame, write_message};
pub use message::{ErrorKind, RpcError, RpcReply, RpcRequest, RpcValue};
pub use types::{PermissionTier, RunId, RunStatus, RuntimeStatus, SessionId};
