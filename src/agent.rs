//! The agent facade: the public recording surface plus lifecycle control.

use std::process;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::thread;
use std::time::Instant;

use parking_lot::Mutex;
use tracing::{debug, warn};

use crate::builder::AgentBuilder;
use crate::command::{Command, CommandKind};
use crate::connection::DeliveryError;
use crate::state::State;
use crate::util;
use crate::validate;
use crate::worker::{self, WorkerHandle, STOP, STOP_FLUSH};

/// Substitute metric recorded when a caller passes an invalid name.
const INVALID_METRIC_NAME: &str = "agent.invalid_metric";
/// Substitute metric recorded when a caller passes a non-finite value.
const INVALID_VALUE_NAME: &str = "agent.invalid_value";

/// Options for [`Agent::flush_with`].
#[derive(Clone, Copy, Debug)]
pub struct FlushOptions {
    /// Whether flush may open a connection when none is live. When `false`
    /// and the connection is down, the flush performs no network activity
    /// at all and the pending commands are dropped.
    pub allow_reconnect: bool,

    /// Run the drain on a one-shot background thread instead of blocking
    /// the caller.
    pub asynchronous: bool,
}

impl Default for FlushOptions {
    fn default() -> Self {
        FlushOptions { allow_reconnect: true, asynchronous: false }
    }
}

/// A client for reporting metrics to a collector service.
///
/// Record calls never block on the network (outside synchronous mode) and
/// never fail the caller: every delivery-path problem is logged, counted in
/// [`failures`](Agent::failures), and reflected at most as a `None` return.
pub struct Agent {
    state: Arc<State>,
    worker: Mutex<Option<WorkerHandle>>,
}

impl std::fmt::Debug for Agent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Agent").finish_non_exhaustive()
    }
}

impl Agent {
    /// Creates a builder for an agent authenticating with `token`.
    pub fn builder<S>(token: S) -> AgentBuilder
    where
        S: Into<String>,
    {
        AgentBuilder::new(token)
    }

    pub(crate) fn from_state(state: Arc<State>) -> Self {
        Agent { state, worker: Mutex::new(None) }
    }

    /// Increments the counter `name` by 1 at the current time.
    ///
    /// Returns the recorded value, or `None` when the name fails validation,
    /// the queue is full, or delivery failed internally.
    pub fn increment(&self, name: &str) -> Option<f64> {
        self.record_metric(CommandKind::Increment, name, 1.0, None, 1)
    }

    /// Increments the counter `name` by `value` at the current time.
    pub fn increment_by(&self, name: &str, value: f64) -> Option<f64> {
        self.record_metric(CommandKind::Increment, name, value, None, 1)
    }

    /// Increments the counter `name` by `value` at `time` (unix seconds),
    /// aggregating `count` events.
    pub fn increment_at(&self, name: &str, value: f64, time: u64, count: u64) -> Option<f64> {
        self.record_metric(CommandKind::Increment, name, value, Some(time), count)
    }

    /// Records gauge `name` at `value`, stamped with the current time.
    ///
    /// Returns the recorded value, or `None` under the same conditions as
    /// [`increment`](Agent::increment).
    pub fn gauge(&self, name: &str, value: f64) -> Option<f64> {
        self.record_metric(CommandKind::Gauge, name, value, None, 1)
    }

    /// Records gauge `name` at `value` for `time` (unix seconds),
    /// aggregating `count` samples.
    pub fn gauge_at(&self, name: &str, value: f64, time: u64, count: u64) -> Option<f64> {
        self.record_metric(CommandKind::Gauge, name, value, Some(time), count)
    }

    /// Runs `work`, records its wall-clock duration in seconds as gauge
    /// `name`, and returns `work`'s own result.
    ///
    /// A panic inside `work` propagates to the caller untouched; the agent
    /// only swallows failures of its own delivery machinery.
    pub fn time<T, F>(&self, name: &str, work: F) -> T
    where
        F: FnOnce() -> T,
    {
        let start = Instant::now();
        let result = work();
        let _ = self.gauge(name, start.elapsed().as_secs_f64());
        result
    }

    /// Like [`time`](Agent::time), recording the duration in milliseconds.
    pub fn time_ms<T, F>(&self, name: &str, work: F) -> T
    where
        F: FnOnce() -> T,
    {
        let start = Instant::now();
        let result = work();
        let _ = self.gauge(name, start.elapsed().as_secs_f64() * 1000.0);
        result
    }

    /// Sends a freeform notice stamped with the current time.
    ///
    /// Returns `None` when the message contains a newline (which would break
    /// the line-oriented protocol) or delivery failed.
    pub fn notice(&self, message: &str) -> Option<()> {
        self.notice_at(message, util::unix_now(), 0.0)
    }

    /// Sends a freeform notice for `time` (unix seconds) covering
    /// `duration` seconds.
    pub fn notice_at(&self, message: &str, time: u64, duration: f64) -> Option<()> {
        if message.contains('\n') {
            warn!(notice = message, "notice contains a newline; dropped");
            return None;
        }
        self.dispatch(Command::notice(message, time, duration)).then_some(())
    }

    /// Drains the queue and sends everything, blocking until done.
    ///
    /// Equivalent to `flush_with(FlushOptions::default())`.
    pub fn flush(&self) {
        self.flush_with(FlushOptions::default());
    }

    /// Drains the queue and sends everything, per `options`.
    pub fn flush_with(&self, options: FlushOptions) {
        if !self.state.enabled {
            return;
        }
        if options.asynchronous {
            let state = Arc::clone(&self.state);
            let spawned = thread::Builder::new()
                .name("collector-agent-flush".to_string())
                .spawn(move || state.drain_and_send(options.allow_reconnect));
            if let Err(e) = spawned {
                warn!(error = %e, "failed to spawn flush thread");
            }
        } else {
            self.state.drain_and_send(options.allow_reconnect);
        }
    }

    /// Signals the background worker to exit after its current cycle.
    ///
    /// Queued commands are left in place; a later record call starts a
    /// fresh worker.
    pub fn stop(&self) {
        let guard = self.worker.lock();
        if let Some(handle) = guard.as_ref() {
            handle.stop.store(STOP, Ordering::Release);
            self.state.queue.interrupt();
        }
    }

    /// Final flush with a bounded wait, safe to call at process exit.
    ///
    /// Returns immediately when nothing is queued. Otherwise the worker is
    /// told to drain once more and `cleanup` waits for it at most the
    /// configured exit-flush timeout; past the deadline the wait is
    /// abandoned and any remaining data is dropped. Also runs on `Drop`.
    pub fn cleanup(&self) {
        if self.state.queue.is_empty() {
            return;
        }

        let handle = self.worker.lock().take();
        match handle {
            Some(handle) if handle.pid == process::id() => {
                handle.stop.store(STOP_FLUSH, Ordering::Release);
                self.state.queue.interrupt();
                if handle.done.recv_timeout(self.state.exit_flush_timeout).is_err() {
                    warn!(
                        timeout = ?self.state.exit_flush_timeout,
                        "gave up waiting for final flush; dropping remaining commands"
                    );
                }
            }
            _ => {
                // No live worker in this process; nothing to wait on.
                debug!(queued = self.state.queue.len(), "cleanup with no running worker");
            }
        }
    }

    /// Lifetime count of connect, handshake, and write failures. Never
    /// resets.
    pub fn failures(&self) -> u64 {
        self.state.failures.load(Ordering::Relaxed)
    }

    /// Number of commands currently queued.
    pub fn queue_len(&self) -> usize {
        self.state.queue.len()
    }

    /// Snapshot of the queued commands, oldest first. Observability only;
    /// the queue is left untouched.
    pub fn queued(&self) -> Vec<Command> {
        self.state.queue.snapshot()
    }

    /// Whether the agent was built enabled.
    pub fn enabled(&self) -> bool {
        self.state.enabled
    }

    /// Whether record calls currently deliver inline on the caller's thread.
    pub fn synchronous(&self) -> bool {
        self.state.synchronous.load(Ordering::Relaxed)
    }

    /// Switches between synchronous (inline) and asynchronous (background
    /// worker) delivery.
    pub fn set_synchronous(&self, synchronous: bool) {
        self.state.synchronous.store(synchronous, Ordering::Relaxed);
    }

    fn record_metric(
        &self,
        kind: CommandKind,
        name: &str,
        value: f64,
        time: Option<u64>,
        count: u64,
    ) -> Option<f64> {
        if validate::metric_name(name).is_err() {
            warn!(name, "invalid metric name; recording agent.invalid_metric instead");
            self.record_substitute(INVALID_METRIC_NAME);
            return None;
        }
        if validate::metric_value(value).is_err() {
            warn!(name, value, "invalid metric value; recording agent.invalid_value instead");
            self.record_substitute(INVALID_VALUE_NAME);
            return None;
        }

        let time = time.unwrap_or_else(util::unix_now);
        let command = Command::metric(kind, name, value, time, count);
        self.dispatch(command).then_some(value)
    }

    fn record_substitute(&self, name: &str) {
        let command = Command::metric(CommandKind::Increment, name, 1.0, util::unix_now(), 1);
        let _ = self.dispatch(command);
    }

    /// Hands a formatted command to the delivery machinery. Returns whether
    /// the command was accepted. Never panics and never blocks outside
    /// synchronous mode.
    fn dispatch(&self, command: Command) -> bool {
        if !self.state.enabled {
            return true;
        }

        if self.synchronous() {
            match self.send_inline(command) {
                Ok(()) => true,
                Err(e) => {
                    warn!(error = %e, "failed to deliver command");
                    false
                }
            }
        } else {
            self.ensure_worker();
            self.state.queue.offer(command)
        }
    }

    /// Synchronous-mode delivery: connect on demand and write inline.
    ///
    /// Any leftover queued commands (from an earlier asynchronous period)
    /// are drained first so FIFO order holds across a mode switch.
    fn send_inline(&self, command: Command) -> Result<(), DeliveryError> {
        let mut connection = self.state.connection.lock();
        connection.ensure_ready()?;
        for queued in self.state.queue.drain_all() {
            connection.send(&queued)?;
        }
        connection.send(&command)
    }

    /// Starts the background worker if this process doesn't have a live one,
    /// covering first use, restart after `stop`, and respawn after a fork.
    fn ensure_worker(&self) {
        let mut guard = self.worker.lock();
        if guard.as_ref().is_some_and(WorkerHandle::is_alive) {
            return;
        }
        match worker::spawn(Arc::clone(&self.state)) {
            Ok(handle) => *guard = Some(handle),
            Err(e) => {
                warn!(error = %e, "failed to spawn sender worker");
                *guard = None;
            }
        }
    }

    #[cfg(test)]
    fn worker_stop_state(&self) -> Option<u8> {
        self.worker.lock().as_ref().map(|h| h.stop.load(Ordering::Acquire))
    }
}

impl Drop for Agent {
    fn drop(&mut self) {
        self.cleanup();
    }
}
