// Server side of the control socket, one thread per connection.
//
// On accept: create the session, push `{sessionId: N}`, optionally apply
// same-host trust, then block reading. Clients are not expected to send
// anything, so the reader exists to notice EOF and garbage:
//
// - a well-formed frame is logged and ignored;
// - EOF or a read error marks the channel closed (the liveness maintainer
//   evicts it on its next pass);
// - anything that fails to decode is a protocol error: the socket is shut
//   down and the session evicted at once.
//
// All pushes go through the session's `ControlChannel`; the reader thread
// never writes.

use std::io::BufReader;
use std::net::{IpAddr, TcpStream};
use std::sync::Arc;

use airspace_protocol::{ControlDecoder, ControlMessage, FrameError, SessionId};
use tracing::{debug, info, warn};

use crate::auth;
use crate::channel::ControlChannel;
use crate::registry::SessionRegistry;

/// Settings the accept path needs from `RelayConfig`.
#[derive(Clone, Copy, Debug)]
pub struct AcceptPolicy {
    pub bind_address: IpAddr,
    pub trust_same_host: bool,
}

/// Register a freshly accepted control connection and run its reader until
/// the connection ends. Blocks; call it on the connection's own thread.
pub fn serve_control_connection(
    stream: TcpStream,
    registry: Arc<SessionRegistry>,
    policy: AcceptPolicy,
) {
    let peer = stream.peer_addr().ok();
    let channel = match ControlChannel::from_stream(&stream) {
        Ok(channel) => Arc::new(channel),
        Err(e) => {
            warn!(error = %e, "cannot clone control socket");
            return;
        }
    };
    let session_id = registry.create(peer, Some(channel.clone()));
    info!(session_id = %session_id, peer = ?peer, "control connection accepted");

    if let Err(e) = channel.send(&ControlMessage::SessionId(session_id)) {
        warn!(session_id = %session_id, error = %e, "cannot send session id");
        registry.remove(session_id);
        return;
    }

    if policy.trust_same_host {
        if let Some(peer) = peer {
            if auth::is_same_host(peer, policy.bind_address) {
                if let Err(e) = auth::bind_same_host(&registry, session_id) {
                    warn!(session_id = %session_id, error = %e, "same-host binding failed");
                }
            }
        }
    }

    read_until_closed(stream, session_id, &channel, &registry);
}

fn read_until_closed(
    stream: TcpStream,
    session_id: SessionId,
    channel: &ControlChannel,
    registry: &SessionRegistry,
) {
    let mut reader = BufReader::new(stream);
    let mut decoder = ControlDecoder::new();
    loop {
        match decoder.read_message(&mut reader) {
            Ok(msg) => {
                debug!(session_id = %session_id, ?msg, "ignoring inbound control frame");
            }
            Err(FrameError::Io(e)) => {
                debug!(session_id = %session_id, error = %e, "control socket closed by peer");
                channel.mark_closed();
                return;
            }
            Err(e) => {
                warn!(session_id = %session_id, error = %e, "protocol error; evicting session");
                channel.shutdown();
                registry.remove(session_id);
                return;
            }
        }
    }
}
