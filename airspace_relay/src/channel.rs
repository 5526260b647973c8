// Outbound half of one client's control socket.
//
// Each session owns one `ControlChannel`. Its writer sits behind its own
// mutex, so pushes to one client serialize with each other but never wait on
// another client's socket. A file download holds the lock for the whole
// `{socketBusy: true}` ... `{socketBusy: false}` bracket, so no auth push or
// liveness probe can land between a `fileTransfer` frame and its body.
//
// Any write failure marks the channel closed. The liveness maintainer evicts
// closed channels on its next pass; the channel never retries. Accepted
// sockets carry a write timeout, so a peer that stops reading fails its
// write instead of holding the lock forever.

use std::fs::File;
use std::io::{BufWriter, Write};
use std::net::{Shutdown, TcpStream};
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, PoisonError, TryLockError};
use std::time::Duration;

use airspace_protocol::{ControlMessage, write_control, write_file_body};
use tracing::{debug, info, warn};

use crate::error::RelayError;

/// Longest a single write may block on a peer that is not reading.
pub const WRITE_TIMEOUT: Duration = Duration::from_secs(10);

/// Outcome of a non-blocking send attempt.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TrySend {
    Sent,
    /// Another writer (usually a file transfer) holds the socket.
    Busy,
    Failed,
}

pub struct ControlChannel {
    writer: Mutex<Box<dyn Write + Send>>,
    closed: AtomicBool,
    /// Kept only to shut the socket down on eviction.
    stream: Option<TcpStream>,
}

impl ControlChannel {
    pub fn from_stream(stream: &TcpStream) -> std::io::Result<Self> {
        stream.set_write_timeout(Some(WRITE_TIMEOUT))?;
        let writer = BufWriter::new(stream.try_clone()?);
        Ok(Self {
            writer: Mutex::new(Box::new(writer)),
            closed: AtomicBool::new(false),
            stream: Some(stream.try_clone()?),
        })
    }

    /// A channel over an arbitrary writer, for tests.
    pub fn from_writer(writer: impl Write + Send + 'static) -> Self {
        Self {
            writer: Mutex::new(Box::new(writer)),
            closed: AtomicBool::new(false),
            stream: None,
        }
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    pub fn mark_closed(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }

    /// Mark closed and shut the socket down, unblocking the reader thread.
    pub fn shutdown(&self) {
        self.mark_closed();
        if let Some(stream) = &self.stream {
            let _ = stream.shutdown(Shutdown::Both);
        }
    }

    pub fn send(&self, msg: &ControlMessage) -> Result<(), RelayError> {
        if self.is_closed() {
            return Err(RelayError::Transport("control socket is closed".into()));
        }
        let mut writer = self.writer.lock().unwrap_or_else(PoisonError::into_inner);
        write_control(&mut *writer, msg).map_err(|e| {
            self.mark_closed();
            RelayError::Transport(e.to_string())
        })
    }

    /// Send `msg` only if no other write is in progress. Never waits on
    /// the writer lock.
    pub fn try_send(&self, msg: &ControlMessage) -> TrySend {
        if self.is_closed() {
            return TrySend::Failed;
        }
        let mut writer = match self.writer.try_lock() {
            Ok(writer) => writer,
            Err(TryLockError::Poisoned(poisoned)) => poisoned.into_inner(),
            Err(TryLockError::WouldBlock) => return TrySend::Busy,
        };
        match write_control(&mut *writer, msg) {
            Ok(()) => TrySend::Sent,
            Err(_) => {
                self.mark_closed();
                TrySend::Failed
            }
        }
    }

    /// Stream `files` inside one busy bracket. Every path must exist; the
    /// caller checks that before calling so a missing file never opens a
    /// bracket it cannot finish.
    pub fn stream_files(&self, files: &[&Path]) -> Result<u64, RelayError> {
        if self.is_closed() {
            return Err(RelayError::Transport("control socket is closed".into()));
        }
        let mut writer = self.writer.lock().unwrap_or_else(PoisonError::into_inner);
        let result = stream_locked(&mut *writer, files);
        if let Err(e) = &result {
            warn!(error = %e, "file transfer failed; closing control socket");
            self.mark_closed();
        }
        result
    }
}

fn stream_locked<W: Write>(writer: &mut W, files: &[&Path]) -> Result<u64, RelayError> {
    let transport = |e: airspace_protocol::FrameError| RelayError::Transport(e.to_string());
    write_control(writer, &ControlMessage::SocketBusy(true)).map_err(transport)?;

    let mut total = 0;
    for path in files {
        let file = File::open(path).map_err(|e| RelayError::Transport(e.to_string()))?;
        let length = file
            .metadata()
            .map_err(|e| RelayError::Transport(e.to_string()))?
            .len();
        let announced = path.display().to_string();
        info!(path = %announced, bytes = length, "streaming file");
        total += write_file_body(writer, &announced, length, file).map_err(transport)?;
    }

    write_control(writer, &ControlMessage::SocketBusy(false)).map_err(transport)?;
    debug!(bytes = total, "file transfer complete");
    Ok(total)
}
