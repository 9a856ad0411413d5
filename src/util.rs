use std::env;
use std::time::{SystemTime, UNIX_EPOCH};

use tracing::warn;

/// Detects the hostname reported in the connection handshake.
///
/// Checks the `HOSTNAME` environment variable first (commonly set in
/// containers), then the system hostname, falling back to `"unknown"`.
pub(crate) fn hostname() -> String {
    if let Ok(name) = env::var("HOSTNAME") {
        if !name.is_empty() {
            return name;
        }
    }

    match nix::unistd::gethostname() {
        Ok(name) => {
            if let Some(name) = name.to_str() {
                if !name.is_empty() {
                    return name.to_string();
                }
            }
        }
        Err(e) => {
            warn!(error = %e, "failed to read system hostname");
        }
    }

    "unknown".to_string()
}

/// Current unix time in whole seconds.
pub(crate) fn unix_now() -> u64 {
    SystemTime::now().duration_since(UNIX_EPOCH).map(|d| d.as_secs()).unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::{hostname, unix_now};

    #[test]
    fn hostname_is_never_empty() {
        assert!(!hostname().is_empty());
    }

    #[test]
    fn unix_now_is_past_2020() {
        assert!(unix_now() > 1_577_836_800);
    }
}
