// Liveness maintainer.
//
// Every interval, probe each session's control socket with
// `{msg_detect_client_alive: <utc ms>}`. A channel that is already closed, or
// whose probe write fails, is shut down and its session removed. This is the
// only disconnect detection: clients send no heartbeat.
//
// Probes never wait on a socket's writer. A channel busy with a file transfer
// is skipped for this pass; the transfer itself fails (and closes the
// channel) if the peer is gone, so one stalled client cannot hold up
// eviction of the others.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use airspace_protocol::{ControlMessage, SessionId};
use tracing::{debug, info};

use crate::channel::TrySend;
use crate::controller::SimulationController;
use crate::registry::SessionRegistry;

/// How often the maintainer checks its stop flag while idle.
const STOP_POLL: Duration = Duration::from_millis(50);

/// Probe every session once. Returns the evicted session ids.
pub fn sweep_once(registry: &SessionRegistry) -> Vec<SessionId> {
    let probe = ControlMessage::LivenessProbe {
        timestamp_ms: SimulationController::current_utc_ms(),
    };
    let mut evicted = Vec::new();
    for (session_id, channel) in registry.channels() {
        let alive = match channel.try_send(&probe) {
            TrySend::Sent => true,
            TrySend::Busy => {
                debug!(session_id = %session_id, "control socket busy; probe skipped");
                true
            }
            TrySend::Failed => false,
        };
        if !alive {
            channel.shutdown();
            registry.remove(session_id);
            info!(session_id = %session_id, "session evicted");
            evicted.push(session_id);
        }
    }
    if !evicted.is_empty() {
        debug!(remaining = registry.len(), "liveness sweep evicted sessions");
    }
    evicted
}

pub fn spawn_maintainer(
    registry: Arc<SessionRegistry>,
    interval: Duration,
    keep_running: Arc<AtomicBool>,
) -> JoinHandle<()> {
    thread::spawn(move || {
        let mut last_sweep = Instant::now();
        while keep_running.load(Ordering::SeqCst) {
            let due = interval.saturating_sub(last_sweep.elapsed());
            if !due.is_zero() {
                thread::sleep(due.min(STOP_POLL));
                continue;
            }
            sweep_once(&registry);
            last_sweep = Instant::now();
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::{self, Write};
    use std::sync::mpsc;

    use crate::channel::ControlChannel;

    struct BrokenPipe;

    impl Write for BrokenPipe {
        fn write(&mut self, _: &[u8]) -> io::Result<usize> {
            Err(io::Error::new(io::ErrorKind::BrokenPipe, "gone"))
        }
        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn failed_probe_evicts_only_that_session() {
        let registry = SessionRegistry::new();
        let healthy = registry.create(None, Some(Arc::new(ControlChannel::from_writer(io::sink()))));
        let broken = registry.create(None, Some(Arc::new(ControlChannel::from_writer(BrokenPipe))));
        let embedded = registry.create(None, None);

        assert_eq!(sweep_once(&registry), vec![broken]);
        assert!(registry.contains(healthy));
        assert!(registry.contains(embedded));
        assert!(!registry.contains(broken));
    }

    #[test]
    fn closed_channel_is_evicted_without_writing() {
        let registry = SessionRegistry::new();
        let channel = Arc::new(ControlChannel::from_writer(io::sink()));
        let id = registry.create(None, Some(channel.clone()));
        channel.mark_closed();
        assert_eq!(sweep_once(&registry), vec![id]);
    }

    /// Writer that blocks until its sender is dropped, like a peer that
    /// stopped reading mid-transfer.
    struct Stalled {
        entered: mpsc::Sender<()>,
        release: mpsc::Receiver<()>,
    }

    impl Write for Stalled {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            let _ = self.entered.send(());
            let _ = self.release.recv();
            Ok(buf.len())
        }
        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn stalled_transfer_does_not_block_eviction_of_others() {
        let (entered_tx, entered_rx) = mpsc::channel();
        let (release_tx, release_rx) = mpsc::channel();
        let stalled = Arc::new(ControlChannel::from_writer(Stalled {
            entered: entered_tx,
            release: release_rx,
        }));

        let registry = Arc::new(SessionRegistry::new());
        let stalled_id = registry.create(None, Some(stalled.clone()));
        let writer = {
            let stalled = stalled.clone();
            thread::spawn(move || stalled.send(&ControlMessage::SocketBusy(true)))
        };
        entered_rx.recv().unwrap();

        let broken: Vec<_> = (0..10)
            .map(|_| registry.create(None, Some(Arc::new(ControlChannel::from_writer(BrokenPipe)))))
            .collect();

        let keep_running = Arc::new(AtomicBool::new(true));
        let handle = spawn_maintainer(registry.clone(), Duration::from_millis(20), keep_running.clone());
        let start = Instant::now();
        while broken.iter().any(|id| registry.contains(*id)) {
            assert!(start.elapsed() < Duration::from_secs(5), "dead sessions not evicted");
            thread::sleep(Duration::from_millis(5));
        }
        assert!(registry.contains(stalled_id));

        keep_running.store(false, Ordering::SeqCst);
        handle.join().unwrap();
        drop(release_tx);
        writer.join().unwrap().unwrap();
    }

    #[test]
    fn maintainer_sweeps_on_interval() {
        let registry = Arc::new(SessionRegistry::new());
        let keep_running = Arc::new(AtomicBool::new(true));
        let handle = spawn_maintainer(registry.clone(), Duration::from_millis(20), keep_running.clone());

        registry.create(None, Some(Arc::new(ControlChannel::from_writer(BrokenPipe))));
        let start = Instant::now();
        while !registry.is_empty() {
            assert!(start.elapsed() < Duration::from_secs(5), "not evicted");
            thread::sleep(Duration::from_millis(5));
        }
        keep_running.store(false, Ordering::SeqCst);
        handle.join().unwrap();
    }
}
