//! The bounded FIFO queue sitting between record callers and the sender
//! worker.
//!
//! Producers never block: `offer` rejects outright when the queue is at
//! capacity, so a slow or absent collector costs the host application a
//! dropped sample, not a stalled thread. The single consumer side (the
//! worker, or a direct flush) takes items through `pop_blocking` and
//! `drain_all`, both of which transfer ownership of each command to exactly
//! one consumer.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use parking_lot::{Condvar, Mutex};
use tracing::warn;

use crate::command::Command;

pub(crate) struct CommandQueue {
    inner: Mutex<VecDeque<Command>>,
    available: Condvar,
    capacity: usize,
    // One-shot "queue full" warning. Set on the first rejection, cleared by
    // the next successful enqueue, so a sustained overflow logs once per
    // episode rather than once per rejected command.
    full_warned: AtomicBool,
}

impl CommandQueue {
    pub fn new(capacity: usize) -> Self {
        CommandQueue {
            inner: Mutex::new(VecDeque::with_capacity(capacity.min(1024))),
            available: Condvar::new(),
            capacity,
            full_warned: AtomicBool::new(false),
        }
    }

    /// Attempts to enqueue a command without blocking.
    ///
    /// Returns `false` when the queue is at capacity; the command is dropped.
    pub fn offer(&self, command: Command) -> bool {
        let mut queue = self.inner.lock();
        if queue.len() >= self.capacity {
            drop(queue);
            if !self.full_warned.swap(true, Ordering::Relaxed) {
                warn!(
                    capacity = self.capacity,
                    "command queue full; dropping new commands until space frees up"
                );
            }
            return false;
        }
        queue.push_back(command);
        drop(queue);
        self.full_warned.store(false, Ordering::Relaxed);
        self.available.notify_all();
        true
    }

    /// Removes and returns the head of the queue, waiting up to `timeout`
    /// for one to arrive.
    ///
    /// A single wait: returns early on any wake-up, with `None` if the queue
    /// is still empty at that point.
    pub fn pop_blocking(&self, timeout: Duration) -> Option<Command> {
        let mut queue = self.inner.lock();
        if queue.is_empty() {
            let _ = self.available.wait_for(&mut queue, timeout);
        }
        queue.pop_front()
    }

    /// Parks until the queue is non-empty, an interrupt arrives, or `timeout`
    /// elapses, without consuming anything.
    ///
    /// Returns whether work is available. The worker uses this before it has
    /// a ready connection so that an unreachable collector leaves the backlog
    /// fully queued.
    pub fn wait_for_work(&self, timeout: Duration) -> bool {
        let mut queue = self.inner.lock();
        if queue.is_empty() {
            let _ = self.available.wait_for(&mut queue, timeout);
        }
        !queue.is_empty()
    }

    /// Atomically removes and returns every queued command, in FIFO order.
    pub fn drain_all(&self) -> Vec<Command> {
        let mut queue = self.inner.lock();
        queue.drain(..).collect()
    }

    /// Wakes any blocked consumer so it can observe a stop signal.
    pub fn interrupt(&self) {
        self.available.notify_all();
    }

    pub fn len(&self) -> usize {
        self.inner.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.lock().is_empty()
    }

    /// Clones the current contents, oldest first. Observability only.
    pub fn snapshot(&self) -> Vec<Command> {
        self.inner.lock().iter().cloned().collect()
    }

    #[cfg(test)]
    fn full_warned(&self) -> bool {
        self.full_warned.load(Ordering::Relaxed)
    }
}
