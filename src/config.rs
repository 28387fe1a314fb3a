//! Immutable run configuration, built once at startup.

use std::env;
use std::net::{IpAddr, Ipv4Addr};
use std::time::Duration;

use nix::sys::signal::Signal;

pub const DEFAULT_PORT: u16 = 3000;

/// The supervisor always probes and binds the all-interfaces wildcard;
/// HOST only extends the dev server's own inbound-host allow-list.
pub const BIND_HOST: IpAddr = IpAddr::V4(Ipv4Addr::UNSPECIFIED);

pub const DEFAULT_READINESS_TIMEOUT: Duration = Duration::from_secs(60);

/// Shell exit codes for a child terminated externally:
/// 130 (SIGINT), 137 (SIGKILL), 143 (SIGTERM).
pub const NEUTRAL_EXIT_CODES: [i32; 3] = [130, 137, 143];

pub const TERMINATION_SIGNALS: [Signal; 5] = [
    Signal::SIGINT,
    Signal::SIGTERM,
    Signal::SIGHUP,
    Signal::SIGQUIT,
    Signal::SIGPIPE,
];

#[derive(Debug, Clone)]
pub struct SupervisorConfig {
    pub host: IpAddr,
    pub port: u16,
    pub allowed_host: Option<String>,
    pub readiness_timeout: Duration,
    pub neutral_exit_codes: Vec<i32>,
    pub termination_signals: Vec<Signal>,
}

impl SupervisorConfig {
    /// Environment is read exactly once here; the port is never re-resolved
    /// mid-run.
    pub fn from_env(port_flag: Option<u16>, timeout_secs_flag: Option<u64>) -> Self {
        let port =
            port_flag.unwrap_or_else(|| port_from_env_value(env::var("PORT").ok().as_deref()));
        let allowed_host = env::var("HOST")
            .ok()
            .map(|value| value.trim().to_string())
            .filter(|value| !value.is_empty());
        let readiness_timeout = timeout_secs_flag
            .map(Duration::from_secs)
            .unwrap_or(DEFAULT_READINESS_TIMEOUT);

        Self {
            host: BIND_HOST,
            port,
            allowed_host,
            readiness_timeout,
            neutral_exit_codes: NEUTRAL_EXIT_CODES.to_vec(),
            termination_signals: TERMINATION_SIGNALS.to_vec(),
        }
    }
}

/// Lenient PORT parsing: absent, non-numeric, or zero falls back to the
/// default rather than failing the run.
fn port_from_env_value(value: Option<&str>) -> u16 {
    value
        .and_then(|raw| raw.trim().parse::<u16>().ok())
        .filter(|port| *port > 0)
        .unwrap_or(DEFAULT_PORT)
}
