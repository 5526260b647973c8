// Integration smoke test for the relay server's wire protocol.
//
// Starts a relay on localhost with OS-assigned ports and talks to it with
// plain TCP sockets: the protocol crate's framing and message types on both
// channels, no `SimClient`. This pins down the bytes a client in any
// language would see: the `{sessionId}` push, `{auth_id}` pushes after
// login, liveness probes, and the busy-bracketed file download.

use std::fs;
use std::io::{BufReader, BufWriter, Read};
use std::net::{Shutdown, SocketAddr, TcpStream};
use std::path::Path;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use airspace_engine::KinematicEngine;
use airspace_protocol::{
    ControlDecoder, ControlMessage, ErrorKind, RpcReply, RpcRequest, RpcValue, RunStatus,
    SessionId, read_message, write_message,
};
use airspace_relay::{RelayAddrs, RelayConfig, RelayHandle, Service, UserDirectory, start_relay};

const USERS: &str = "[Simulation_Admin]\nsim1\n[Normal_User]\nalice:{AC1},{GV1}\n";

const SCENARIO: &str = r#"{
    "aircraft": [{"id": "AC1", "tas_knots": 240.0, "flight_phase": "Cruise"}],
    "ground_vehicles": [{"id": "GV1", "speed_knots": 12.0}]
}"#;

fn start(dir: &Path, liveness_interval_ms: u64) -> (RelayHandle, RelayAddrs) {
    let scenario = dir.join("scenario.json");
    fs::write(&scenario, SCENARIO).unwrap();
    let config = RelayConfig {
        rpc_port: 0,
        control_port: 0,
        liveness_interval_ms,
        scenario: Some(scenario),
        ..RelayConfig::default()
    };
    let service = Service::new(
        &config,
        UserDirectory::parse(USERS),
        Box::new(KinematicEngine::new()),
    )
    .unwrap();
    start_relay(&config, Arc::new(service)).unwrap()
}

/// Raw RPC connection: JSON with a 4-byte length prefix.
struct RawRpc {
    reader: BufReader<TcpStream>,
    writer: BufWriter<TcpStream>,
}

impl RawRpc {
    fn connect(addr: SocketAddr) -> Self {
        let stream = TcpStream::connect(addr).unwrap();
        stream
            .set_read_timeout(Some(Duration::from_secs(5)))
            .unwrap();
        Self {
            reader: BufReader::new(stream.try_clone().unwrap()),
            writer: BufWriter::new(stream),
        }
    }

    fn send_bytes(&mut self, payload: &[u8]) -> RpcReply {
        write_message(&mut self.writer, payload).unwrap();
        let bytes = read_message(&mut self.reader).unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    fn call(&mut self, request: RpcRequest) -> RpcReply {
        self.send_bytes(&serde_json::to_vec(&request).unwrap())
    }

    /// The server closes its side: the next read sees EOF, not a timeout.
    fn expect_eof(mut self) {
        let mut buf = [0u8; 1];
        let read = self.reader.read(&mut buf);
        assert!(matches!(read, Ok(0)), "expected EOF, got {read:?}");
    }

    fn ok(&mut self, request: RpcRequest) -> RpcValue {
        match self.call(request) {
            RpcReply::Ok(value) => value,
            RpcReply::Err(e) => panic!("rpc failed: {e}"),
        }
    }
}

/// Raw control socket reader.
struct RawControl {
    reader: BufReader<TcpStream>,
    decoder: ControlDecoder,
}

impl RawControl {
    fn connect(addr: SocketAddr) -> Self {
        let stream = TcpStream::connect(addr).unwrap();
        stream
            .set_read_timeout(Some(Duration::from_secs(5)))
            .unwrap();
        Self {
            reader: BufReader::new(stream),
            decoder: ControlDecoder::new(),
        }
    }

    fn next(&mut self) -> ControlMessage {
        self.decoder.read_message(&mut self.reader).unwrap()
    }

    /// Next push that is not a liveness probe.
    fn next_push(&mut self) -> ControlMessage {
        loop {
            match self.next() {
                ControlMessage::LivenessProbe { .. } => continue,
                other => return other,
            }
        }
    }

    fn body(&mut self) -> Vec<u8> {
        let mut body = Vec::new();
        self.decoder.copy_body(&mut self.reader, &mut body).unwrap();
        body
    }
}

#[test]
fn session_id_then_auth_pushes() {
    let dir = tempfile::tempdir().unwrap();
    let (handle, addrs) = start(dir.path(), 60_000);

    let mut control = RawControl::connect(addrs.control);
    assert_eq!(control.next(), ControlMessage::SessionId(SessionId(1)));

    let mut rpc = RawRpc::connect(addrs.rpc);
    let session_id = SessionId(1);
    rpc.ok(RpcRequest::Login {
        session_id,
        auth_id: "alice".into(),
    });
    assert_eq!(
        control.next_push(),
        ControlMessage::AuthId(Some("alice".into()))
    );

    rpc.ok(RpcRequest::Logout { session_id });
    assert_eq!(control.next_push(), ControlMessage::AuthId(None));

    handle.stop();
}

#[test]
fn liveness_probes_arrive_on_interval() {
    let dir = tempfile::tempdir().unwrap();
    let (handle, addrs) = start(dir.path(), 20);

    let mut control = RawControl::connect(addrs.control);
    assert_eq!(control.next(), ControlMessage::SessionId(SessionId(1)));
    for _ in 0..2 {
        assert!(matches!(
            control.next(),
            ControlMessage::LivenessProbe { timestamp_ms } if timestamp_ms > 0
        ));
    }

    handle.stop();
}

#[test]
fn protocol_error_closes_rpc_connection() {
    let dir = tempfile::tempdir().unwrap();
    let (handle, addrs) = start(dir.path(), 60_000);
    let mut control = RawControl::connect(addrs.control);
    assert_eq!(control.next(), ControlMessage::SessionId(SessionId(1)));

    let mut rpc = RawRpc::connect(addrs.rpc);
    match rpc.send_bytes(b"{\"method\": \"Nonsense\"}") {
        RpcReply::Err(e) => assert_eq!(e.kind, ErrorKind::Protocol),
        other => panic!("expected protocol error, got {other:?}"),
    }
    rpc.expect_eof();

    let mut rpc = RawRpc::connect(addrs.rpc);
    match rpc.call(RpcRequest::RuntimeStatus {
        session_id: SessionId(999),
    }) {
        RpcReply::Err(e) => assert_eq!(e.kind, ErrorKind::Protocol),
        other => panic!("expected unknown session, got {other:?}"),
    }
    rpc.expect_eof();

    // A fresh connection with a valid session is served normally.
    let mut rpc = RawRpc::connect(addrs.rpc);
    let ids = rpc.ok(RpcRequest::AllAircraftIds {
        session_id: SessionId(1),
    });
    assert_eq!(ids, RpcValue::Ids(vec!["AC1".into()]));

    handle.stop();
}

#[test]
fn rpc_socket_is_closed_when_client_half_closes() {
    let dir = tempfile::tempdir().unwrap();
    let (handle, addrs) = start(dir.path(), 60_000);

    let rpc = RawRpc::connect(addrs.rpc);
    rpc.reader.get_ref().shutdown(Shutdown::Write).unwrap();
    rpc.expect_eof();

    handle.stop();
}

#[test]
fn download_is_one_busy_bracket_with_exact_bodies() {
    let dir = tempfile::tempdir().unwrap();
    let (handle, addrs) = start(dir.path(), 60_000);
    let session_id = SessionId(1);

    let mut control = RawControl::connect(addrs.control);
    assert_eq!(control.next(), ControlMessage::SessionId(session_id));
    let mut rpc = RawRpc::connect(addrs.rpc);

    rpc.ok(RpcRequest::SetupSimulation {
        session_id,
        total_period_s: 60.0,
        step_s: 10.0,
    });
    rpc.ok(RpcRequest::Start {
        session_id,
        duration_s: None,
    });
    let start = Instant::now();
    loop {
        let RpcValue::Status(status) = rpc.ok(RpcRequest::RuntimeStatus { session_id }) else {
            panic!("expected a status");
        };
        if status.status == RunStatus::Ended {
            break;
        }
        assert!(start.elapsed() < Duration::from_secs(5), "run never ended");
        thread::sleep(Duration::from_millis(10));
    }

    let out = dir.path().join("traj.csv");
    let written = rpc.ok(RpcRequest::WriteTrajectories {
        session_id,
        path: out.display().to_string(),
    });
    let RpcValue::Ids(written) = written else {
        panic!("expected written paths");
    };
    assert_eq!(written.len(), 2, "aircraft and ground vehicle files");

    let RpcValue::Integer(total) =
        rpc.ok(RpcRequest::RequestDownloadTrajectoryFile { session_id })
    else {
        panic!("expected a byte count");
    };

    assert_eq!(control.next_push(), ControlMessage::SocketBusy(true));
    let mut received = 0;
    for expected_path in &written {
        let ControlMessage::FileTransfer { path, length } = control.next() else {
            panic!("expected a file transfer");
        };
        assert_eq!(&path, expected_path);
        let body = control.body();
        assert_eq!(body.len() as u64, length);
        assert_eq!(body, fs::read(expected_path).unwrap());
        received += length;
    }
    // The next frame parses cleanly only if the bodies were exactly sized.
    assert_eq!(control.next(), ControlMessage::SocketBusy(false));
    assert_eq!(received, total);

    handle.stop();
}
