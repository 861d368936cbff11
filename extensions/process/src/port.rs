//! Network endpoints and port allocation.

use crate::error::ProcessError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::io::ErrorKind;
use std::net::TcpListener;

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Endpoint {
    pub host: String,
    pub port: u16,
}

impl Endpoint {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }

    /// Placeholder asking for any free port on `host`.
    pub fn any_port(host: impl Into<String>) -> Self {
        Self::new(host, 0)
    }

    pub fn is_any_port(&self) -> bool {
        self.port == 0
    }

    pub fn with_port(&self, port: u16) -> Self {
        Self::new(self.host.clone(), port)
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.host.contains(':') {
            write!(f, "[{}]:{}", self.host, self.port)
        } else {
            write!(f, "{}:{}", self.host, self.port)
        }
    }
}

pub trait PortAllocator: Send + Sync {
    /// A port on `host` that is free right now.
    fn allocate(&self, host: &str) -> Result<u16, ProcessError>;
}

/// Asks the OS for an ephemeral port by binding port 0.
#[derive(Debug, Clone, Copy, Default)]
pub struct EphemeralPorts;

impl PortAllocator for EphemeralPorts {
    fn allocate(&self, host: &str) -> Result<u16, ProcessError> {
        let listener = TcpListener::bind((host, 0)).map_err(|e| {
            tracing::debug!(host, error = %e, "ephemeral bind failed");
            ProcessError::NoFreePort {
                host: host.to_string(),
            }
        })?;
        let port = listener.local_addr()?.port();
        tracing::trace!(host, port, "allocated port");
        Ok(port)
    }
}

/// Fail fast with `PortUnavailable` when something already listens on
/// `host:port`.
pub fn ensure_available(host: &str, port: u16) -> Result<(), ProcessError> {
    match TcpListener::bind((host, port)) {
        Ok(_) => Ok(()),
        Err(e) if e.kind() == ErrorKind::AddrInUse => Err(ProcessError::PortUnavailable {
            host: host.to_string(),
            port,
        }),
        Err(e) => Err(e.into()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ephemeral_port_is_bindable() {
        let port = EphemeralPorts.allocate("127.0.0.1").unwrap();
        assert_ne!(port, 0);
        ensure_available("127.0.0.1", port).unwrap();
    }

    #[test]
    fn test_busy_port_is_unavailable() {
        let listener = TcpListener::bind(("127.0.0.1", 0)).unwrap();
        let port = listener.local_addr().unwrap().port();

        let err = ensure_available("127.0.0.1", port).unwrap_err();
        assert!(matches!(err, ProcessError::PortUnavailable { port: p, .. } if p == port));
    }

    #[test]
    fn test_display_brackets_ipv6() {
        assert_eq!(Endpoint::new("127.0.0.1", 27017).to_string(), "127.0.0.1:27017");
        assert_eq!(Endpoint::new("::1", 27017).to_string(), "[::1]:27017");
        assert!(Endpoint::any_port("localhost").is_any_port());
    }
}
