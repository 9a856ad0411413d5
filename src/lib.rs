//! A client-side agent for reporting application metrics to a collector
//! service over a persistent TCP connection.
//!
//! Application code calls simple recording primitives — increment a counter,
//! set a gauge, time a block, send a notice — and the agent validates,
//! buffers, and delivers them asynchronously as line-oriented commands. The
//! guiding constraint is that the agent must never hurt the host
//! application: record calls don't block on the network, delivery failures
//! never raise, and process exit is never delayed more than a bounded flush
//! window.
//!
//! # Usage
//!
//! ```no_run
//! use collector_agent::Agent;
//!
//! let agent = Agent::builder("my-api-token")
//!     .with_collector("metrics.example.com:8000")
//!     .build()
//!     .expect("failed to build agent");
//!
//! agent.increment("jobs.completed");
//! agent.gauge("queue.depth", 42.0);
//!
//! // Times the block and records the duration as a gauge, passing the
//! // block's own result through.
//! let answer = agent.time("jobs.runtime", || {
//!     # fn run_job() -> u32 { 7 }
//!     run_job()
//! });
//! # let _ = answer;
//! ```
//!
//! # Delivery model
//!
//! Commands pass through a bounded in-memory queue drained by a single
//! background worker thread, spawned lazily on first use. While the
//! collector is unreachable the backlog simply stays queued and delivery is
//! retried every reporting interval; once the queue is full, new commands
//! are dropped and the record call returns `None`. Commands that have been
//! taken off the queue are delivered at most once — a failed write drops
//! them rather than re-queueing.
//!
//! In synchronous mode ([`AgentBuilder::with_synchronous`]) there is no
//! worker: record calls connect on demand and write inline on the calling
//! thread, which delivers everything at the cost of blocking the caller.
//!
//! # Fork safety
//!
//! A forked child inherits the agent's in-memory state but never the
//! parent's socket: before any delivery the agent compares the process id
//! that opened the connection with the current one, and rebuilds both the
//! connection and the worker on a mismatch.
//!
//! # Exit behavior
//!
//! [`Agent::cleanup`] — called manually or from `Drop` — gives the worker
//! one final chance to drain, waiting at most the configured exit-flush
//! timeout. With an empty queue it returns immediately, so a quiet process
//! never pays the wait; with a hung collector it abandons the flush at the
//! deadline rather than stalling exit.

#![deny(clippy::all)]
#![deny(clippy::pedantic)]
#![allow(clippy::cast_possible_truncation)]
#![allow(clippy::cast_precision_loss)]
#![allow(clippy::cast_sign_loss)]
#![allow(clippy::must_use_candidate)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::missing_panics_doc)]
#![deny(missing_docs)]

mod agent;
pub use self::agent::{Agent, FlushOptions};

mod builder;
pub use self::builder::{AgentBuilder, BuildError, EXIT_FLUSH_TIMEOUT, MAX_QUEUE_SIZE};

mod command;
pub use self::command::{Command, CommandKind};

mod connection;
mod queue;
mod state;
mod util;
mod validate;
mod worker;
