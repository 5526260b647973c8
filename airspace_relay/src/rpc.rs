// RPC connection loop.
//
// Each RPC connection gets its own thread. Requests on one connection are
// served in order: read a 4-byte length-prefixed JSON `RpcRequest`, dispatch
// it, write the `RpcReply` back with the same framing.
//
// A protocol error (a request that does not parse, or one naming an unknown
// session) is fatal to the connection: the error reply is written, then the
// connection is closed. EOF or an I/O error also ends the loop.

use std::io::{BufReader, BufWriter};
use std::net::TcpStream;
use std::sync::Arc;

use airspace_protocol::{ErrorKind, RpcError, RpcReply, RpcRequest, read_message, write_message};
use tracing::{debug, warn};

use crate::service::Service;

pub fn serve_rpc_connection(stream: TcpStream, service: Arc<Service>) {
    let peer = stream.peer_addr().ok();
    debug!(peer = ?peer, "rpc connection opened");
    let write_half = match stream.try_clone() {
        Ok(s) => s,
        Err(e) => {
            warn!(error = %e, "cannot clone rpc socket");
            return;
        }
    };
    let mut reader = BufReader::new(stream);
    let mut writer = BufWriter::new(write_half);

    while let Ok(bytes) = read_message(&mut reader) {
        let reply = match serde_json::from_slice::<RpcRequest>(&bytes) {
            Ok(request) => service.dispatch(request),
            Err(e) => {
                warn!(peer = ?peer, error = %e, "malformed rpc request");
                RpcReply::Err(RpcError {
                    kind: ErrorKind::Protocol,
                    message: format!("malformed request: {e}"),
                })
            }
        };
        let json = match serde_json::to_vec(&reply) {
            Ok(json) => json,
            Err(e) => {
                warn!(error = %e, "cannot encode rpc reply");
                break;
            }
        };
        if write_message(&mut writer, &json).is_err() {
            break;
        }
        if matches!(&reply, RpcReply::Err(e) if e.kind == ErrorKind::Protocol) {
            debug!(peer = ?peer, "closing rpc connection after protocol error");
            break;
        }
    }
    debug!(peer = ?peer, "rpc connection closed");
}
