//! Top-level state machine: initial probe, spawn, supervise, decide.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use tokio::signal::unix::{SignalKind, signal};
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use crate::{
    child::{ChildHandle, LaunchPlan, Termination},
    classify::{Verdict, classify},
    config::SupervisorConfig,
    probe::probe,
    readiness::wait_for_ready,
};

/// One-shot gate for the final decision. Multiple event sources (child exit,
/// OS signals) can race to the decision point; the first claimant performs
/// the re-probes and produces the verdict, everyone else no-ops.
#[derive(Debug, Default)]
pub struct OnceFlag(AtomicBool);

impl OnceFlag {
    pub fn claim(&self) -> bool {
        self.0
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_ok()
    }
}

pub struct Supervisor {
    config: SupervisorConfig,
    plan: LaunchPlan,
    /// Monotonic: set exactly once by the readiness watcher, never reset.
    ready: Arc<AtomicBool>,
    finalized: OnceFlag,
}

impl Supervisor {
    pub fn new(config: SupervisorConfig, plan: LaunchPlan) -> Self {
        Self {
            config,
            plan,
            ready: Arc::new(AtomicBool::new(false)),
            finalized: OnceFlag::default(),
        }
    }

    pub async fn run(&self) -> Verdict {
        let port = self.config.port;

        if probe(self.config.host, port).in_use() {
            info!(
                port,
                "port already in use; assuming an existing healthy dev server and reusing it"
            );
            return Verdict::Neutral;
        }

        if let Some(host) = &self.config.allowed_host {
            info!(host, "extending the dev server host allow-list from HOST");
        }
        info!(
            port,
            launcher = self.plan.source.describe(),
            "starting dev server with strict port binding"
        );

        let mut child = match ChildHandle::spawn(&self.plan) {
            Ok(child) => child,
            Err(error) => {
                error!(%error, "failed to launch dev server");
                // No termination event exists; classify as a plain failure
                // code so compensating port evidence can still neutralize it.
                return self.decide(&Termination::Exited(1)).await;
            }
        };

        self.spawn_readiness_watcher();
        let (_signal_tx, mut signal_rx) = self.subscribe_signals();

        let event = tokio::select! {
            result = child.wait() => match result {
                Ok(event) => {
                    info!(event = %event.describe(), "dev server terminated");
                    event
                }
                Err(error) => {
                    error!(%error, "lost track of the dev server process");
                    Termination::Exited(1)
                }
            },
            Some(name) = signal_rx.recv() => {
                info!(
                    signal = name,
                    "received termination signal; not forwarding to the dev server"
                );
                Termination::Signaled(name.to_string())
            }
        };

        let verdict = self.decide(&event).await;
        // No orphan outlives the supervisor, whichever event won the race.
        child.terminate();
        verdict
    }

    /// Single pass through the decision table, guarded by the one-shot gate.
    async fn decide(&self, event: &Termination) -> Verdict {
        if !self.finalized.claim() {
            debug!("termination already finalized; ignoring duplicate event");
            return Verdict::Neutral;
        }

        let ready = self.ready.load(Ordering::SeqCst);
        let (host, port) = (self.config.host, self.config.port);
        classify(event, ready, &self.config.neutral_exit_codes, move || {
            probe(host, port)
        })
        .await
    }

    /// Detached polling task. It self-terminates at its deadline and keeps
    /// running harmlessly if the run finalizes first; its outcome only
    /// withholds or grants the readiness amnesty.
    fn spawn_readiness_watcher(&self) {
        let ready = Arc::clone(&self.ready);
        let (host, port) = (self.config.host, self.config.port);
        let timeout = self.config.readiness_timeout;
        tokio::spawn(async move {
            if wait_for_ready(move || probe(host, port), timeout).await {
                ready.store(true, Ordering::SeqCst);
                info!(port, "dev server is accepting connections");
            } else {
                warn!(
                    port,
                    timeout_secs = timeout.as_secs(),
                    "dev server never accepted connections before the readiness deadline"
                );
            }
        });
    }

    /// One registration per configured signal, all feeding a single channel.
    /// The returned sender keeps the channel open even when no handler could
    /// be installed.
    fn subscribe_signals(&self) -> (mpsc::Sender<&'static str>, mpsc::Receiver<&'static str>) {
        let (tx, rx) = mpsc::channel(1);
        for sig in &self.config.termination_signals {
            let name = sig.as_str();
            match signal(SignalKind::from_raw(*sig as i32)) {
                Ok(mut stream) => {
                    let tx = tx.clone();
                    tokio::spawn(async move {
                        if stream.recv().await.is_some() {
                            let _ = tx.send(name).await;
                        }
                    });
                }
                Err(error) => {
                    warn!(%error, signal = name, "failed to install signal handler");
                }
            }
        }
        (tx, rx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::{Ipv4Addr, TcpListener};
    use std::path::PathBuf;
    use std::time::Duration;

    use crate::child::LaunchSource;
    use crate::config::{BIND_HOST, NEUTRAL_EXIT_CODES, TERMINATION_SIGNALS};

    fn shell_plan(script: &str) -> LaunchPlan {
        LaunchPlan {
            program: PathBuf::from("/bin/sh"),
            args: vec!["-c".to_string(), script.to_string()],
            source: LaunchSource::LocalBinary,
        }
    }

    fn config_for(port: u16) -> SupervisorConfig {
        SupervisorConfig {
            host: BIND_HOST,
            port,
            allowed_host: None,
            readiness_timeout: Duration::from_secs(5),
            neutral_exit_codes: NEUTRAL_EXIT_CODES.to_vec(),
            termination_signals: TERMINATION_SIGNALS.to_vec(),
        }
    }

    fn free_port() -> u16 {
        let listener = TcpListener::bind((Ipv4Addr::UNSPECIFIED, 0)).expect("bind ephemeral port");
        listener.local_addr().expect("local addr").port()
    }

    #[test]
    fn finalization_gate_admits_exactly_one_claimant() {
        let flag = Arc::new(OnceFlag::default());
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let flag = Arc::clone(&flag);
                std::thread::spawn(move || flag.claim())
            })
            .collect();

        let wins = handles
            .into_iter()
            .map(|handle| handle.join().expect("claimant thread"))
            .filter(|claimed| *claimed)
            .count();
        assert_eq!(wins, 1);
    }

    #[tokio::test]
    async fn already_bound_port_short_circuits_without_spawning() {
        let listener = TcpListener::bind((Ipv4Addr::UNSPECIFIED, 0)).expect("bind stub listener");
        let port = listener.local_addr().expect("local addr").port();

        let marker = std::env::temp_dir().join(format!(
            "devkeeper-spawn-marker-{}",
            std::process::id()
        ));
        let _ = std::fs::remove_file(&marker);
        let plan = shell_plan(&format!("touch {}", marker.display()));

        let supervisor = Supervisor::new(config_for(port), plan);
        assert_eq!(supervisor.run().await, Verdict::Neutral);
        assert!(!marker.exists(), "no child may be spawned on a busy port");
        drop(listener);
    }

    #[tokio::test]
    async fn failing_child_with_free_port_is_a_failure() {
        let port = free_port();
        let supervisor = Supervisor::new(config_for(port), shell_plan("exit 1"));
        assert_eq!(supervisor.run().await, Verdict::Failure);
    }

    #[tokio::test]
    async fn listener_appearing_before_the_second_probe_is_neutral() {
        let port = free_port();
        let holder = tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(150)).await;
            let mut listener = TcpListener::bind((Ipv4Addr::UNSPECIFIED, port));
            while listener.is_err() {
                tokio::time::sleep(Duration::from_millis(10)).await;
                listener = TcpListener::bind((Ipv4Addr::UNSPECIFIED, port));
            }
            tokio::time::sleep(Duration::from_secs(2)).await;
            drop(listener);
        });

        let supervisor = Supervisor::new(config_for(port), shell_plan("exit 1"));
        assert_eq!(supervisor.run().await, Verdict::Neutral);
        holder.abort();
    }

    #[tokio::test]
    async fn simulated_signal_is_neutral_and_finalizes_the_run() {
        let supervisor = Supervisor::new(config_for(free_port()), shell_plan("exit 1"));
        let verdict = supervisor
            .decide(&Termination::Signaled("SIGTERM".to_string()))
            .await;
        assert_eq!(verdict, Verdict::Neutral);

        // A racing child-exit event observes the gate and no-ops.
        let duplicate = supervisor.decide(&Termination::Exited(1)).await;
        assert_eq!(duplicate, Verdict::Neutral);
    }

    #[tokio::test]
    async fn readiness_amnesty_covers_nonzero_exits() {
        let supervisor = Supervisor::new(config_for(free_port()), shell_plan("exit 1"));
        supervisor.ready.store(true, Ordering::SeqCst);
        let verdict = supervisor.decide(&Termination::Exited(1)).await;
        assert_eq!(verdict, Verdict::Neutral);
    }
}
