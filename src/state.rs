//! State shared between the agent facade, the sender worker, and flush
//! threads.

use std::sync::atomic::{AtomicBool, AtomicU64};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tracing::{debug, warn};

use crate::connection::Connection;
use crate::queue::CommandQueue;

/// Everything that crosses the caller/worker boundary.
///
/// The queue is the only mutable structure producers touch; the connection
/// is owned by whichever thread currently performs delivery, serialized by
/// its mutex.
pub(crate) struct State {
    pub enabled: bool,
    pub synchronous: AtomicBool,
    pub reporting_interval: Duration,
    pub exit_flush_timeout: Duration,
    pub queue: CommandQueue,
    pub connection: Mutex<Connection>,
    pub failures: Arc<AtomicU64>,
}

impl State {
    /// Drains the queue and writes everything to the collector in FIFO
    /// order. Shared by `flush` and the worker's final pass.
    ///
    /// Not ready and `allow_reconnect` is false: the backlog is dropped
    /// without any network activity. Not ready and reconnecting fails: the
    /// backlog stays queued. A write failure mid-batch drops the remainder.
    pub fn drain_and_send(&self, allow_reconnect: bool) {
        let mut connection = self.connection.lock();
        if !connection.is_ready() {
            if !allow_reconnect {
                let dropped = self.queue.drain_all();
                if !dropped.is_empty() {
                    debug!(
                        count = dropped.len(),
                        "flush while disconnected with reconnect disallowed; dropping commands"
                    );
                }
                return;
            }
            if let Err(e) = connection.ensure_ready() {
                debug!(error = %e, "collector unreachable during flush; leaving commands queued");
                return;
            }
        }

        for command in self.queue.drain_all() {
            if let Err(e) = connection.send(&command) {
                warn!(error = %e, "write failed during flush; dropping remainder of batch");
                break;
            }
        }
    }
}
