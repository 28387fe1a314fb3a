//! Termination classification.
//!
//! Orchestrators that stop a container often deliver a forceful kill to the
//! whole process group milliseconds after a polite signal, producing exit
//! codes that look like failures but are not. The decision table below treats
//! "was ever ready" as a permanent amnesty, and a short post-exit re-probe
//! absorbs races where the listening socket outlives the child's reported
//! exit by a few hundred milliseconds.
//!
//! Note: the amnesty means a server that crashes immediately after becoming
//! healthy is still reported as a neutral exit. That is a deliberate CI
//! noise-reduction choice, not a bug; see README.

use std::time::Duration;

use tokio::time::sleep;
use tracing::{error, info};

use crate::{child::Termination, probe::PortProbe};

pub const REPROBE_DELAY: Duration = Duration::from_millis(500);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    Neutral,
    Failure,
}

impl Verdict {
    pub fn as_str(self) -> &'static str {
        match self {
            Verdict::Neutral => "neutral",
            Verdict::Failure => "failure",
        }
    }
}

/// Decision table, first match wins:
///
/// 1. termination by signal            -> Neutral
/// 2. exit code 0                      -> Neutral
/// 3. exit code in the neutral set     -> Neutral
/// 4. ever ready, or listener present  -> Neutral
/// 5. listener present on a second
///    probe after a short delay        -> Neutral
/// 6. otherwise                        -> Failure
///
/// The prober is injected so tests can drive the re-probe sequence without
/// real sockets.
pub async fn classify(
    event: &Termination,
    ready: bool,
    neutral_exit_codes: &[i32],
    mut probe: impl FnMut() -> PortProbe,
) -> Verdict {
    let code = match event {
        Termination::Signaled(name) => {
            info!(signal = %name, "dev server terminated by signal; treating as neutral");
            return Verdict::Neutral;
        }
        Termination::Exited(0) => {
            info!("dev server exited cleanly");
            return Verdict::Neutral;
        }
        Termination::Exited(code) => *code,
    };

    if neutral_exit_codes.contains(&code) {
        info!(code, "dev server exited with an external termination code; treating as neutral");
        return Verdict::Neutral;
    }

    if ready {
        info!(code, "dev server was observed ready earlier; treating exit as neutral");
        return Verdict::Neutral;
    }
    if probe().in_use() {
        info!(code, "a listener is still present on the port after exit; treating as neutral");
        return Verdict::Neutral;
    }

    // Absorb listener-handoff races before declaring a genuine failure.
    sleep(REPROBE_DELAY).await;
    if probe().in_use() {
        info!(code, "a listener appeared on the port shortly after exit; treating as neutral");
        return Verdict::Neutral;
    }

    error!(code, "dev server failed: non-neutral exit, never ready, and no listener on the port");
    Verdict::Failure
}
