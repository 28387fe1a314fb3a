//! Background polling loop that reports when the dev server first accepts
//! connections.

use std::time::Duration;

use tokio::time::{Instant, sleep};

use crate::probe::PortProbe;

const INITIAL_DELAY: Duration = Duration::from_millis(200);
const MAX_DELAY: Duration = Duration::from_secs(1);
const GROWTH_FACTOR: f64 = 1.25;

/// Multiplicative backoff between probes, bounding both probe frequency and
/// worst-case detection latency.
#[derive(Debug)]
pub struct Backoff {
    delay: Duration,
}

impl Backoff {
    pub fn new() -> Self {
        Self {
            delay: INITIAL_DELAY,
        }
    }

    pub fn next_delay(&mut self) -> Duration {
        let current = self.delay;
        self.delay = self.delay.mul_f64(GROWTH_FACTOR).min(MAX_DELAY);
        current
    }
}

impl Default for Backoff {
    fn default() -> Self {
        Self::new()
    }
}

/// Poll until a listener appears or the deadline elapses. Deadline expiry is
/// not an error; it only reports that readiness was never observed. The
/// prober is injected so tests can drive the loop without real sockets.
pub async fn wait_for_ready(mut probe: impl FnMut() -> PortProbe, timeout: Duration) -> bool {
    let deadline = Instant::now() + timeout;
    let mut backoff = Backoff::new();

    loop {
        if probe().in_use() {
            return true;
        }
        let now = Instant::now();
        if now >= deadline {
            return false;
        }
        sleep(backoff.next_delay().min(deadline - now)).await;
    }
}
