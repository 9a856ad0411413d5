//! The background sender: a single worker thread per agent that drains the
//! command queue and writes to the collector.

use std::io;
use std::process;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use crossbeam_channel::{bounded, Receiver, Sender, TryRecvError};
use tracing::{debug, warn};

use crate::state::State;

/// Worker control states, advanced monotonically by the facade.
pub(crate) const RUN: u8 = 0;
/// Exit without touching the network beyond the current cycle (`stop`).
pub(crate) const STOP: u8 = 1;
/// Exit after one final drain, reconnecting if needed (`cleanup`).
pub(crate) const STOP_FLUSH: u8 = 2;

const BACKOFF_SLICE: Duration = Duration::from_millis(50);

/// Facade-side handle to a spawned worker.
///
/// Completion is observed through a channel rather than `JoinHandle::join`
/// so that shutdown can wait with a timeout.
pub(crate) struct WorkerHandle {
    pub pid: u32,
    pub stop: Arc<AtomicU8>,
    pub done: Receiver<()>,
}

impl WorkerHandle {
    /// Whether this handle refers to a live worker in the current process.
    ///
    /// False after a fork (the thread only exists in the parent), after a
    /// stop signal, or once the worker has announced completion.
    pub fn is_alive(&self) -> bool {
        self.pid == process::id()
            && self.stop.load(Ordering::Acquire) == RUN
            && matches!(self.done.try_recv(), Err(TryRecvError::Empty))
    }
}

/// Spawns the sender worker for `state`.
pub(crate) fn spawn(state: Arc<State>) -> io::Result<WorkerHandle> {
    let stop = Arc::new(AtomicU8::new(RUN));
    let (done_tx, done_rx) = bounded(1);
    let worker = Worker { state, stop: Arc::clone(&stop), done: done_tx };
    thread::Builder::new()
        .name("collector-agent-sender".to_string())
        .spawn(move || worker.run())?;
    Ok(WorkerHandle { pid: process::id(), stop, done: done_rx })
}

struct Worker {
    state: Arc<State>,
    stop: Arc<AtomicU8>,
    done: Sender<()>,
}

impl Worker {
    fn run(self) {
        debug!("sender worker started");
        let interval = self.state.reporting_interval;

        loop {
            match self.stop.load(Ordering::Acquire) {
                STOP => break,
                STOP_FLUSH => {
                    if !self.state.queue.is_empty() {
                        self.state.drain_and_send(true);
                    }
                    break;
                }
                _ => {}
            }

            let ready = self.state.connection.lock().is_ready();
            if ready {
                let Some(first) = self.state.queue.pop_blocking(interval) else {
                    continue;
                };
                let mut connection = self.state.connection.lock();
                if let Err(e) = connection.send(&first) {
                    warn!(error = %e, "write failed; command dropped, reconnecting next cycle");
                    continue;
                }
                for command in self.state.queue.drain_all() {
                    if let Err(e) = connection.send(&command) {
                        warn!(error = %e, "write failed; dropping remainder of batch");
                        break;
                    }
                }
            } else {
                // Get the connection up before taking anything off the
                // queue, so an unreachable collector leaves the backlog
                // intact for a later cycle.
                if !self.state.queue.wait_for_work(interval) {
                    continue;
                }
                if self.stop.load(Ordering::Acquire) != RUN {
                    continue;
                }
                let result = self.state.connection.lock().ensure_ready();
                if let Err(e) = result {
                    debug!(error = %e, "collector unreachable; leaving commands queued");
                    self.backoff(interval);
                }
            }
        }

        let _ = self.done.send(());
        debug!("sender worker stopped");
    }

    /// Sleeps out the reporting interval after a failed connect, in slices
    /// so a stop signal is still honored promptly.
    fn backoff(&self, interval: Duration) {
        let mut remaining = interval;
        while !remaining.is_zero() && self.stop.load(Ordering::Acquire) == RUN {
            let slice = remaining.min(BACKOFF_SLICE);
            thread::sleep(slice);
            remaining = remaining.saturating_sub(slice);
        }
    }
}
