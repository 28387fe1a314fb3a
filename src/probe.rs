//! One-shot TCP listener probe.

use std::io;
use std::net::{IpAddr, SocketAddr, TcpListener};

use tracing::debug;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PortProbe {
    InUse,
    Free,
}

impl PortProbe {
    pub fn in_use(self) -> bool {
        matches!(self, PortProbe::InUse)
    }
}

/// Test whether something is already listening on `host:port` by attempting
/// to bind it. A successful bind is dropped immediately, so no listening
/// socket survives the call. Ambiguous bind errors classify as `InUse`:
/// wrongly spawning a second instance on a busy port is worse than wrongly
/// skipping a spawn.
pub fn probe(host: IpAddr, port: u16) -> PortProbe {
    match TcpListener::bind(SocketAddr::new(host, port)) {
        Ok(listener) => {
            drop(listener);
            PortProbe::Free
        }
        Err(error)
            if matches!(
                error.kind(),
                io::ErrorKind::AddrInUse | io::ErrorKind::PermissionDenied
            ) =>
        {
            PortProbe::InUse
        }
        Err(error) => {
            debug!(%error, port, "unexpected bind error while probing; treating port as in use");
            PortProbe::InUse
        }
    }
}
