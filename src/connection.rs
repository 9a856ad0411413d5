//! Connection management: the connect → authenticate → ready state machine
//! owning the socket to the collector.
//!
//! All failures funnel into [`DeliveryError`] and the shared lifetime
//! `failures` counter; none of them escape to record callers. The connection
//! also remembers which process opened the socket, so a forked child never
//! writes to a stream it shares with its parent.

use std::io::{self, Read as _, Write as _};
use std::net::{SocketAddr, TcpStream};
use std::process;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tracing::debug;

use crate::command::Command;

/// Client identifier sent in the handshake.
pub(crate) const AGENT_IDENT: &str =
    concat!(env!("CARGO_PKG_NAME"), "/", env!("CARGO_PKG_VERSION"));

const MAX_REPLY_LEN: usize = 256;

/// Every way the delivery path can fail.
///
/// Caught at the record-call boundary (or inside the worker loop) and turned
/// into a logged warning; never surfaced to callers.
#[derive(Debug, Error)]
pub(crate) enum DeliveryError {
    #[error("unable to connect to collector at {collector}: {source}")]
    Connect {
        collector: String,
        source: io::Error,
    },

    #[error("collector rejected handshake with '{reply}'")]
    HandshakeRejected { reply: String },

    #[error("collector rejected authentication with '{reply}'")]
    AuthenticationRejected { reply: String },

    #[error("failed reading collector reply: {0}")]
    Reply(io::Error),

    #[error("failed writing to collector: {0}")]
    Write(io::Error),
}

/// Where the connection currently stands.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum ConnectionState {
    Disconnected,
    Connecting,
    Authenticating,
    Ready,
}

/// Settings the connection needs to reach and identify itself to the
/// collector. Fixed at agent construction.
pub(crate) struct ConnectionSettings {
    pub addrs: Vec<SocketAddr>,
    pub collector: String,
    pub token: String,
    pub hostname: String,
    pub connect_timeout: Duration,
    pub reply_timeout: Duration,
    pub write_timeout: Duration,
}

pub(crate) struct Connection {
    settings: Arc<ConnectionSettings>,
    state: ConnectionState,
    stream: Option<TcpStream>,
    bound_pid: u32,
    failures: Arc<AtomicU64>,
    wire_buf: Vec<u8>,
}

impl Connection {
    pub fn new(settings: Arc<ConnectionSettings>, failures: Arc<AtomicU64>) -> Self {
        Connection {
            settings,
            state: ConnectionState::Disconnected,
            stream: None,
            bound_pid: process::id(),
            failures,
            wire_buf: Vec::with_capacity(256),
        }
    }

    /// Returns whether the connection is ready for writes in this process.
    pub fn is_ready(&mut self) -> bool {
        self.check_epoch();
        self.state == ConnectionState::Ready
    }

    /// Drives the connection to `Ready`, connecting and authenticating as
    /// needed. Any failure increments the lifetime failure counter and
    /// leaves the connection `Disconnected`.
    pub fn ensure_ready(&mut self) -> Result<(), DeliveryError> {
        self.check_epoch();
        if self.state == ConnectionState::Ready {
            return Ok(());
        }

        match self.open() {
            Ok(stream) => {
                self.stream = Some(stream);
                self.state = ConnectionState::Ready;
                debug!(collector = %self.settings.collector, "connected and authenticated");
                Ok(())
            }
            Err(e) => {
                self.stream = None;
                self.state = ConnectionState::Disconnected;
                self.failures.fetch_add(1, Ordering::Relaxed);
                Err(e)
            }
        }
    }

    /// Writes one command to the collector.
    ///
    /// A failed write drops the connection; the in-flight command is not
    /// retried (at-most-once delivery past the queue).
    pub fn send(&mut self, command: &Command) -> Result<(), DeliveryError> {
        self.check_epoch();
        let stream = match self.stream.as_mut() {
            Some(stream) => stream,
            None => {
                return Err(DeliveryError::Write(io::Error::new(
                    io::ErrorKind::NotConnected,
                    "no live connection to collector",
                )))
            }
        };

        self.wire_buf.clear();
        command.write_wire(&mut self.wire_buf);
        match stream.write_all(&self.wire_buf) {
            Ok(()) => Ok(()),
            Err(e) => {
                self.failures.fetch_add(1, Ordering::Relaxed);
                self.disconnect();
                Err(DeliveryError::Write(e))
            }
        }
    }

    pub fn disconnect(&mut self) {
        self.stream = None;
        self.state = ConnectionState::Disconnected;
    }

    #[cfg(test)]
    pub fn state(&self) -> ConnectionState {
        self.state
    }

    /// Invariant: a socket opened by another process is never written to.
    /// On a pid mismatch the inherited stream is discarded and the machine
    /// restarts from `Disconnected` in the current process.
    fn check_epoch(&mut self) {
        let pid = process::id();
        if self.bound_pid != pid {
            if self.stream.take().is_some() {
                debug!(
                    inherited_from = self.bound_pid,
                    pid, "discarding connection inherited across fork"
                );
            }
            self.state = ConnectionState::Disconnected;
            self.bound_pid = pid;
        }
    }

    fn open(&mut self) -> Result<TcpStream, DeliveryError> {
        self.state = ConnectionState::Connecting;
        let mut stream = self.connect()?;
        stream
            .set_nodelay(true)
            .and_then(|()| stream.set_read_timeout(Some(self.settings.reply_timeout)))
            .and_then(|()| stream.set_write_timeout(Some(self.settings.write_timeout)))
            .map_err(|source| DeliveryError::Connect {
                collector: self.settings.collector.clone(),
                source,
            })?;

        let hello = format!(
            "hello version {} hostname {}\n",
            AGENT_IDENT, self.settings.hostname
        );
        stream.write_all(hello.as_bytes()).map_err(DeliveryError::Write)?;
        let reply = read_reply(&mut stream).map_err(DeliveryError::Reply)?;
        if reply != "ok" {
            return Err(DeliveryError::HandshakeRejected { reply });
        }

        self.state = ConnectionState::Authenticating;
        let auth = format!("authenticate {}\n", self.settings.token);
        stream.write_all(auth.as_bytes()).map_err(DeliveryError::Write)?;
        let reply = read_reply(&mut stream).map_err(DeliveryError::Reply)?;
        if reply != "ok" {
            return Err(DeliveryError::AuthenticationRejected { reply });
        }

        Ok(stream)
    }

    fn connect(&self) -> Result<TcpStream, DeliveryError> {
        let mut last_err = None;
        for addr in &self.settings.addrs {
            match TcpStream::connect_timeout(addr, self.settings.connect_timeout) {
                Ok(stream) => return Ok(stream),
                Err(e) => last_err = Some(e),
            }
        }
        Err(DeliveryError::Connect {
            collector: self.settings.collector.clone(),
            source: last_err.unwrap_or_else(|| {
                io::Error::new(io::ErrorKind::AddrNotAvailable, "no collector addresses")
            }),
        })
    }
}

/// Reads one newline-terminated reply line during the handshake.
///
/// Byte-at-a-time is fine here: only two replies are ever read per
/// connection, and it avoids a buffered reader swallowing bytes that belong
/// to the stream after the handshake.
fn read_reply(stream: &mut TcpStream) -> io::Result<String> {
    let mut reply = Vec::with_capacity(8);
    let mut byte = [0u8; 1];
    loop {
        if stream.read(&mut byte)? == 0 {
            return Err(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                "collector closed connection during handshake",
            ));
        }
        if byte[0] == b'\n' {
            break;
        }
        reply.push(byte[0]);
        if reply.len() > MAX_REPLY_LEN {
            return Err(io::Error::new(io::ErrorKind::InvalidData, "oversized collector reply"));
        }
    }
    if reply.last() == Some(&b'\r') {
        reply.pop();
    }
    Ok(String::from_utf8_lossy(&reply).into_owned())
}

#[cfg(test)]
mod tests {
    use std::io::{BufRead as _, BufReader, Write as _};
    use std::net::{SocketAddr, TcpListener};
    use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
    use std::sync::{Arc, Mutex};
    use std::thread;
    use std::time::Duration;

    use super::{Connection, ConnectionSettings, ConnectionState, DeliveryError};
    use crate::command::{Command, CommandKind};

    struct Handshakes {
        connects: AtomicUsize,
        lines: Mutex<Vec<String>>,
    }

    fn spawn_server(accept_auth: bool, max_conns: usize) -> (SocketAddr, Arc<Handshakes>) {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        let seen = Arc::new(Handshakes { connects: AtomicUsize::new(0), lines: Mutex::new(Vec::new()) });
        let state = Arc::clone(&seen);
        thread::spawn(move || {
            for _ in 0..max_conns {
                let Ok((stream, _)) = listener.accept() else { return };
                state.connects.fetch_add(1, Ordering::SeqCst);
                let mut writer = stream.try_clone().unwrap();
                let mut reader = BufReader::new(stream);
                let mut line = String::new();
                if reader.read_line(&mut line).unwrap_or(0) == 0 {
                    continue;
                }
                state.lines.lock().unwrap().push(line.trim_end().to_string());
                writer.write_all(b"ok\n").unwrap();
                line.clear();
                if reader.read_line(&mut line).unwrap_or(0) == 0 {
                    continue;
                }
                state.lines.lock().unwrap().push(line.trim_end().to_string());
                let reply: &[u8] = if accept_auth { b"ok\n" } else { b"fail\n" };
                writer.write_all(reply).unwrap();
            }
        });
        (addr, seen)
    }

    fn settings(addr: SocketAddr) -> Arc<ConnectionSettings> {
        Arc::new(ConnectionSettings {
            addrs: vec![addr],
            collector: addr.to_string(),
            token: "secret".to_string(),
            hostname: "testhost".to_string(),
            connect_timeout: Duration::from_secs(2),
            reply_timeout: Duration::from_secs(2),
            write_timeout: Duration::from_secs(2),
        })
    }

    #[test]
    fn handshake_sends_ident_and_token() {
        let (addr, seen) = spawn_server(true, 1);
        let failures = Arc::new(AtomicU64::new(0));
        let mut connection = Connection::new(settings(addr), Arc::clone(&failures));

        connection.ensure_ready().unwrap();
        assert!(connection.is_ready());
        assert_eq!(failures.load(Ordering::SeqCst), 0);

        let lines = seen.lines.lock().unwrap().clone();
        assert_eq!(lines.len(), 2);
        assert!(lines[0].starts_with("hello version collector-agent/"), "got {:?}", lines[0]);
        assert!(lines[0].contains("hostname testhost"));
        assert_eq!(lines[1], "authenticate secret");
    }

    #[test]
    fn reconnects_when_process_id_changes() {
        let (addr, seen) = spawn_server(true, 2);
        let failures = Arc::new(AtomicU64::new(0));
        let mut connection = Connection::new(settings(addr), failures);

        connection.ensure_ready().unwrap();
        assert_eq!(seen.connects.load(Ordering::SeqCst), 1);

        // Pretend the process forked: the remembered pid no longer matches.
        connection.bound_pid = connection.bound_pid.wrapping_add(1);
        assert!(!connection.is_ready());
        connection.ensure_ready().unwrap();
        assert_eq!(seen.connects.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn rejected_authentication_counts_as_failure() {
        let (addr, _seen) = spawn_server(false, 1);
        let failures = Arc::new(AtomicU64::new(0));
        let mut connection = Connection::new(settings(addr), Arc::clone(&failures));

        let err = connection.ensure_ready().unwrap_err();
        assert!(matches!(err, DeliveryError::AuthenticationRejected { .. }));
        assert_eq!(connection.state(), ConnectionState::Disconnected);
        assert_eq!(failures.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn refused_connect_counts_as_failure() {
        let addr = {
            let listener = TcpListener::bind("127.0.0.1:0").unwrap();
            listener.local_addr().unwrap()
        };
        let failures = Arc::new(AtomicU64::new(0));
        let mut connection = Connection::new(settings(addr), Arc::clone(&failures));

        let err = connection.ensure_ready().unwrap_err();
        assert!(matches!(err, DeliveryError::Connect { .. }));
        assert_eq!(failures.load(Ordering::SeqCst), 1);

        let command = Command::metric(CommandKind::Increment, "x", 1.0, 1, 1);
        assert!(connection.send(&command).is_err());
    }
}
