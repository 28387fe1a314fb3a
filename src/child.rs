//! Spawning and termination reporting for the supervised dev server.

use std::net::IpAddr;
use std::path::{Path, PathBuf};
use std::process::Stdio;

use anyhow::{Context, Result};
use nix::{
    errno::Errno,
    sys::signal::{Signal, kill as send_unix_signal},
    unistd::Pid,
};
use tokio::process::{Child, Command};
use tracing::warn;

const LOCAL_VITE: &str = "node_modules/.bin/vite";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LaunchSource {
    LocalBinary,
    PackageRunner,
}

impl LaunchSource {
    pub fn describe(self) -> &'static str {
        match self {
            LaunchSource::LocalBinary => "local vite binary",
            LaunchSource::PackageRunner => "npx vite",
        }
    }
}

/// Resolved launch command for the dev server. Always requests strict-port
/// binding so the port argument stays authoritative for later probes.
#[derive(Debug, Clone)]
pub struct LaunchPlan {
    pub program: PathBuf,
    pub args: Vec<String>,
    pub source: LaunchSource,
}

impl LaunchPlan {
    /// Prefer the locally installed Vite binary; fall back to `npx vite`.
    /// PATH lookup failures are deferred to spawn time, where the port
    /// re-check can still neutralize them.
    pub fn resolve(host: IpAddr, port: u16) -> Self {
        let local = Path::new(LOCAL_VITE);
        let (program, mut args, source) = if local.exists() {
            (local.to_path_buf(), Vec::new(), LaunchSource::LocalBinary)
        } else {
            let npx = which::which("npx").unwrap_or_else(|_| PathBuf::from("npx"));
            (
                npx,
                vec!["vite".to_string()],
                LaunchSource::PackageRunner,
            )
        };

        args.extend([
            "--host".to_string(),
            host.to_string(),
            "--port".to_string(),
            port.to_string(),
            "--strictPort".to_string(),
        ]);

        Self {
            program,
            args,
            source,
        }
    }
}

/// How the child ended: a numeric exit code or the name of the signal that
/// killed it, never both.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Termination {
    Exited(i32),
    Signaled(String),
}

impl Termination {
    fn from_status(status: &std::process::ExitStatus) -> Self {
        if let Some(code) = status.code() {
            return Termination::Exited(code);
        }
        if let Some(signo) = exit_signal(status) {
            let name = Signal::try_from(signo)
                .map(|signal| signal.as_str().to_string())
                .unwrap_or_else(|_| format!("signal {signo}"));
            return Termination::Signaled(name);
        }
        // Neither code nor signal reported; treat as a plain failure code.
        Termination::Exited(1)
    }

    pub fn describe(&self) -> String {
        match self {
            Termination::Exited(code) => format!("exited with code {code}"),
            Termination::Signaled(name) => format!("terminated by {name}"),
        }
    }
}

#[derive(Debug)]
pub struct ChildHandle {
    child: Child,
}

impl ChildHandle {
    /// The child inherits our stdio so its own logs stay visible in CI
    /// output, and inherits our environment (HOST, NODE_OPTIONS, ...).
    pub fn spawn(plan: &LaunchPlan) -> Result<Self> {
        let child = Command::new(&plan.program)
            .args(&plan.args)
            .stdin(Stdio::inherit())
            .stdout(Stdio::inherit())
            .stderr(Stdio::inherit())
            .spawn()
            .with_context(|| format!("spawning {}", plan.program.display()))?;
        Ok(Self { child })
    }

    pub async fn wait(&mut self) -> Result<Termination> {
        let status = self
            .child
            .wait()
            .await
            .context("waiting for dev server process")?;
        Ok(Termination::from_status(&status))
    }

    /// Best-effort SIGTERM so no orphan outlives the supervisor. A child that
    /// is already gone is not an error.
    pub fn terminate(&self) {
        let Some(pid) = self.child.id() else {
            return;
        };
        match send_unix_signal(Pid::from_raw(pid as i32), Signal::SIGTERM) {
            Ok(()) | Err(Errno::ESRCH) => {}
            Err(error) => warn!(%error, pid, "failed to terminate dev server process"),
        }
    }
}

fn exit_signal(status: &std::process::ExitStatus) -> Option<i32> {
    #[cfg(unix)]
    {
        use std::os::unix::process::ExitStatusExt;
        status.signal()
    }

    #[cfg(not(unix))]
    {
        let _ = status;
        None
    }
}
