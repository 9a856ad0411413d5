//! Configuration and construction of an [`Agent`].

use std::net::{SocketAddr, ToSocketAddrs as _};
use std::sync::atomic::{AtomicBool, AtomicU64};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use thiserror::Error;

use crate::agent::Agent;
use crate::connection::{Connection, ConnectionSettings};
use crate::queue::CommandQueue;
use crate::state::State;
use crate::util;

const DEFAULT_COLLECTOR: &str = "127.0.0.1:8000";
const DEFAULT_REPORTING_INTERVAL: Duration = Duration::from_secs(30);
const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(5);
const DEFAULT_REPLY_TIMEOUT: Duration = Duration::from_secs(5);
const DEFAULT_WRITE_TIMEOUT: Duration = Duration::from_secs(1);

/// Default capacity of the pending-command queue.
pub const MAX_QUEUE_SIZE: usize = 5000;

/// Default ceiling on how long `cleanup` waits for the final flush.
pub const EXIT_FLUSH_TIMEOUT: Duration = Duration::from_secs(5);

/// Errors that could occur while building an [`Agent`].
#[derive(Debug, Error)]
pub enum BuildError {
    /// The API token was empty.
    #[error("API token must not be empty")]
    MissingToken,

    /// The collector address did not parse or resolve.
    #[error("invalid collector address '{address}': {reason}")]
    InvalidCollectorAddress {
        /// The address as given.
        address: String,
        /// Details about the failure.
        reason: String,
    },
}

/// Builder for an [`Agent`].
pub struct AgentBuilder {
    token: String,
    collector: String,
    enabled: bool,
    synchronous: bool,
    reporting_interval: Duration,
    max_queue_size: usize,
    exit_flush_timeout: Duration,
    connect_timeout: Duration,
    reply_timeout: Duration,
    write_timeout: Duration,
}

impl AgentBuilder {
    /// Creates a builder for an agent authenticating with `token`.
    pub fn new<S>(token: S) -> Self
    where
        S: Into<String>,
    {
        AgentBuilder {
            token: token.into(),
            collector: DEFAULT_COLLECTOR.to_string(),
            enabled: true,
            synchronous: false,
            reporting_interval: DEFAULT_REPORTING_INTERVAL,
            max_queue_size: MAX_QUEUE_SIZE,
            exit_flush_timeout: EXIT_FLUSH_TIMEOUT,
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            reply_timeout: DEFAULT_REPLY_TIMEOUT,
            write_timeout: DEFAULT_WRITE_TIMEOUT,
        }
    }

    /// Sets the collector address, in `<host>:<port>` form.
    ///
    /// Resolved once at build time. Defaults to `127.0.0.1:8000`.
    #[must_use]
    pub fn with_collector<S>(mut self, collector: S) -> Self
    where
        S: Into<String>,
    {
        self.collector = collector.into();
        self
    }

    /// Sets how long the worker waits for new work before waking anyway,
    /// which doubles as the retry cadence while the collector is
    /// unreachable.
    ///
    /// Defaults to 30 seconds.
    #[must_use]
    pub fn with_reporting_interval(mut self, interval: Duration) -> Self {
        self.reporting_interval = interval;
        self
    }

    /// Enables or disables the agent.
    ///
    /// A disabled agent validates record calls and returns their values but
    /// never queues anything and never opens a connection.
    ///
    /// Defaults to `true`.
    #[must_use]
    pub fn enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }

    /// Starts the agent in synchronous mode: record calls deliver inline on
    /// the calling thread instead of through the background worker.
    ///
    /// Can be toggled later with [`Agent::set_synchronous`]. Defaults to
    /// `false`.
    #[must_use]
    pub fn with_synchronous(mut self, synchronous: bool) -> Self {
        self.synchronous = synchronous;
        self
    }

    /// Sets the capacity of the pending-command queue. When full, new
    /// commands are dropped and the record call returns `None`.
    ///
    /// Defaults to [`MAX_QUEUE_SIZE`].
    #[must_use]
    pub fn with_max_queue_size(mut self, capacity: usize) -> Self {
        self.max_queue_size = capacity;
        self
    }

    /// Sets the ceiling on how long [`Agent::cleanup`] waits for the worker
    /// to finish its final flush before abandoning it.
    ///
    /// Defaults to [`EXIT_FLUSH_TIMEOUT`].
    #[must_use]
    pub fn with_exit_flush_timeout(mut self, timeout: Duration) -> Self {
        self.exit_flush_timeout = timeout;
        self
    }

    /// Sets the TCP connect timeout. Defaults to 5 seconds.
    #[must_use]
    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    /// Sets how long to wait for the collector's handshake replies.
    /// Defaults to 5 seconds.
    #[must_use]
    pub fn with_reply_timeout(mut self, timeout: Duration) -> Self {
        self.reply_timeout = timeout;
        self
    }

    /// Sets the socket write timeout. Defaults to 1 second.
    #[must_use]
    pub fn with_write_timeout(mut self, timeout: Duration) -> Self {
        self.write_timeout = timeout;
        self
    }

    /// Builds the agent.
    ///
    /// No connection is opened and no thread is spawned here; the worker
    /// starts lazily with the first asynchronous record call.
    ///
    /// # Errors
    ///
    /// Returns an error when the token is empty or the collector address
    /// cannot be parsed or resolved.
    pub fn build(self) -> Result<Agent, BuildError> {
        if self.token.is_empty() {
            return Err(BuildError::MissingToken);
        }

        let addrs: Vec<SocketAddr> = self
            .collector
            .to_socket_addrs()
            .map_err(|e| BuildError::InvalidCollectorAddress {
                address: self.collector.clone(),
                reason: e.to_string(),
            })?
            .collect();
        if addrs.is_empty() {
            return Err(BuildError::InvalidCollectorAddress {
                address: self.collector,
                reason: "resolved to no addresses".to_string(),
            });
        }

        let settings = Arc::new(ConnectionSettings {
            addrs,
            collector: self.collector,
            token: self.token,
            hostname: util::hostname(),
            connect_timeout: self.connect_timeout,
            reply_timeout: self.reply_timeout,
            write_timeout: self.write_timeout,
        });

        let failures = Arc::new(AtomicU64::new(0));
        let state = Arc::new(State {
            enabled: self.enabled,
            synchronous: AtomicBool::new(self.synchronous),
            reporting_interval: self.reporting_interval,
            exit_flush_timeout: self.exit_flush_timeout,
            queue: CommandQueue::new(self.max_queue_size),
            connection: Mutex::new(Connection::new(settings, Arc::clone(&failures))),
            failures,
        });

        Ok(Agent::from_state(state))
    }
}
