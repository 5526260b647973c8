// Control-socket messages and the receive-side state machine.
//
// The control socket carries server-to-client pushes only. Each push is one
// text frame (see `framing.rs`) holding a loose object (see `text.rs`) of one
// of these shapes:
//
//   {sessionId: N}                          once, right after accept
//   {auth_id: "alice"} / {auth_id: null}    after login / logout
//   {socketBusy: "true"} ... "false"        brackets one or more transfers
//   {fileTransfer: "path", fileLength: N}   followed by N raw bytes
//   {msg_detect_client_alive: ts}           liveness probe, no reply
//
// `ControlDecoder` tracks the only stateful part of the format: after a
// `fileTransfer` frame the next `fileLength` bytes are an unframed file body
// and must be consumed with `copy_body` before the next frame can be read.
// Trying to read a frame while a body is pending (or to copy a body when none
// was announced) is an error rather than a silent desync.

use std::io::{self, Read, Write};

use crate::error::FrameError;
use crate::framing::{read_frame, write_frame};
use crate::text::{LooseObject, LooseValue};
use crate::types::SessionId;

/// One server-to-client push.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ControlMessage {
    SessionId(SessionId),
    /// `None` after logout.
    AuthId(Option<String>),
    FileTransfer { path: String, length: u64 },
    SocketBusy(bool),
    LivenessProbe { timestamp_ms: u64 },
}

impl ControlMessage {
    pub fn to_text(&self) -> String {
        let obj = match self {
            ControlMessage::SessionId(id) => {
                LooseObject::new().with("sessionId", LooseValue::Number(id.0.to_string()))
            }
            ControlMessage::AuthId(Some(auth_id)) => {
                LooseObject::new().with("auth_id", LooseValue::Text(auth_id.clone()))
            }
            ControlMessage::AuthId(None) => LooseObject::new().with("auth_id", LooseValue::Null),
            ControlMessage::FileTransfer { path, length } => LooseObject::new()
                .with("fileTransfer", LooseValue::Text(path.clone()))
                .with("fileLength", LooseValue::Number(length.to_string())),
            ControlMessage::SocketBusy(busy) => LooseObject::new().with(
                "socketBusy",
                LooseValue::Text(if *busy { "true" } else { "false" }.into()),
            ),
            ControlMessage::LivenessProbe { timestamp_ms } => LooseObject::new().with(
                "msg_detect_client_alive",
                LooseValue::Number(timestamp_ms.to_string()),
            ),
        };
        obj.encode()
    }

    /// Classify a frame payload. Keys are checked in a fixed order so a frame
    /// carrying several known keys resolves deterministically.
    pub fn from_text(text: &str) -> Result<Self, FrameError> {
        let obj = LooseObject::parse(text)?;

        if let Some(v) = obj.get("sessionId") {
            let id = v.as_u64().ok_or(FrameError::InvalidValue("sessionId"))?;
            return Ok(ControlMessage::SessionId(SessionId(id)));
        }
        if let Some(v) = obj.get("auth_id") {
            return match v {
                LooseValue::Null => Ok(ControlMessage::AuthId(None)),
                LooseValue::Text(s) if s.is_empty() || s.eq_ignore_ascii_case("null") => {
                    Ok(ControlMessage::AuthId(None))
                }
                LooseValue::Text(s) | LooseValue::Number(s) => {
                    Ok(ControlMessage::AuthId(Some(s.clone())))
                }
                LooseValue::Bool(_) => Err(FrameError::InvalidValue("auth_id")),
            };
        }
        if let Some(v) = obj.get("fileTransfer") {
            let path = v
                .as_text()
                .filter(|p| !p.is_empty())
                .ok_or(FrameError::InvalidValue("fileTransfer"))?;
            let length = obj
                .get("fileLength")
                .and_then(LooseValue::as_u64)
                .ok_or(FrameError::InvalidValue("fileLength"))?;
            return Ok(ControlMessage::FileTransfer {
                path: path.to_owned(),
                length,
            });
        }
        if let Some(v) = obj.get("socketBusy") {
            let busy = v.as_bool().ok_or(FrameError::InvalidValue("socketBusy"))?;
            return Ok(ControlMessage::SocketBusy(busy));
        }
        if let Some(v) = obj.get("msg_detect_client_alive") {
            let timestamp_ms = v
                .as_u64()
                .ok_or(FrameError::InvalidValue("msg_detect_client_alive"))?;
            return Ok(ControlMessage::LivenessProbe { timestamp_ms });
        }
        Err(FrameError::UnknownShape(text.to_owned()))
    }
}

/// Write a single control message as one frame.
pub fn write_control<W: Write>(writer: &mut W, msg: &ControlMessage) -> Result<(), FrameError> {
    write_frame(writer, &msg.to_text())
}

/// Announce a file and stream exactly `length` bytes of `body` after it.
///
/// Fails with `BodyLength` if `body` runs out early; the stream is then
/// unusable because the receiver is still waiting for the missing bytes.
pub fn write_file_body<W: Write, R: Read>(
    writer: &mut W,
    announced_path: &str,
    length: u64,
    body: R,
) -> Result<u64, FrameError> {
    write_control(
        writer,
        &ControlMessage::FileTransfer {
            path: announced_path.to_owned(),
            length,
        },
    )?;
    let mut limited = body.take(length);
    let copied = io::copy(&mut limited, writer)?;
    writer.flush()?;
    if copied != length {
        return Err(FrameError::BodyLength {
            expected: length,
            copied,
        });
    }
    Ok(copied)
}

/// Where the receive side is in the frame/body alternation.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub enum DecoderState {
    #[default]
    Normal,
    AwaitingBody { path: String, length: u64 },
}

/// Receive-side state machine: NORMAL -> awaiting-body(N) -> NORMAL.
#[derive(Debug, Default)]
pub struct ControlDecoder {
    state: DecoderState,
}

impl ControlDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self) -> &DecoderState {
        &self.state
    }

    /// Block until the next control frame arrives and classify it.
    pub fn read_message<R: Read>(&mut self, reader: &mut R) -> Result<ControlMessage, FrameError> {
        if let DecoderState::AwaitingBody { length, .. } = self.state {
            return Err(FrameError::AwaitingBody(length));
        }
        let text = read_frame(reader)?;
        let msg = ControlMessage::from_text(&text)?;
        if let ControlMessage::FileTransfer { path, length } = &msg {
            self.state = DecoderState::AwaitingBody {
                path: path.clone(),
                length: *length,
            };
        }
        Ok(msg)
    }

    /// Copy the announced file body into `sink`, returning to NORMAL.
    ///
    /// The state returns to NORMAL even on a short copy; the caller must treat
    /// `BodyLength` as fatal for the connection.
    pub fn copy_body<R: Read, W: Write>(
        &mut self,
        reader: &mut R,
        sink: &mut W,
    ) -> Result<u64, FrameError> {
        let expected = match std::mem::take(&mut self.state) {
            DecoderState::AwaitingBody { length, .. } => length,
            DecoderState::Normal => return Err(FrameError::NoBodyPending),
        };
        let mut limited = Read::take(&mut *reader, expected);
        let copied = io::copy(&mut limited, sink)?;
        sink.flush()?;
        if copied != expected {
            return Err(FrameError::BodyLength { expected, copied });
        }
        Ok(copied)
    }
}
