//! Helper process-manager lifecycle.
//!
//! Optionally, a separate long-running process manager is started before
//! any suite executes; the test executor relies on it for spawning test
//! processes. The orchestrator waits for it to become ready (a bounded TCP
//! readiness check against its listen port) and stops it first during
//! teardown.

use std::time::Duration;

use anyhow::{anyhow, bail, Context, Result};
use tokio::net::TcpStream;
use tokio::process::Child;
use tracing::{info, warn};

use crate::config::ProcmanConfig;

/// Interval between readiness probes.
const PROBE_INTERVAL: Duration = Duration::from_millis(200);

/// A running helper process manager.
#[derive(Debug)]
pub struct ProcessManager {
    child: Child,
    port: u16,
}

impl ProcessManager {
    /// Launches the manager and waits for it to accept connections on its
    /// port, bounded by the configured readiness timeout.
    pub async fn start(config: &ProcmanConfig) -> Result<Self> {
        let argv = shell_words::split(&config.command)
            .with_context(|| format!("Bad process-manager command {:?}", config.command))?;
        let program = argv
            .first()
            .ok_or_else(|| anyhow!("empty process-manager command"))?;

        info!("starting process manager: {}", config.command);
        let child = tokio::process::Command::new(program)
            .args(&argv[1..])
            .kill_on_drop(true)
            .spawn()
            .with_context(|| format!("Failed to spawn process manager {:?}", program))?;

        let mut manager = Self {
            child,
            port: config.port,
        };
        manager
            .wait_ready(Duration::from_secs(config.ready_timeout_secs))
            .await?;
        Ok(manager)
    }

    async fn wait_ready(&mut self, timeout: Duration) -> Result<()> {
        let deadline = tokio::time::Instant::now() + timeout;
        let addr = format!("127.0.0.1:{}", self.port);

        loop {
            if let Some(status) = self.child.try_wait()? {
                bail!("process manager exited during startup: {}", status);
            }
            if TcpStream::connect(&addr).await.is_ok() {
                info!("process manager ready on {}", addr);
                return Ok(());
            }
            if tokio::time::Instant::now() >= deadline {
                self.child.start_kill().ok();
                bail!("process manager not ready on {} within {:?}", addr, timeout);
            }
            tokio::time::sleep(PROBE_INTERVAL).await;
        }
    }

    /// Stops the manager and reaps it.
    pub async fn stop(mut self) {
        if let Err(e) = self.child.start_kill() {
            warn!("failed to kill process manager: {}", e);
            return;
        }
        match self.child.wait().await {
            Ok(status) => info!("process manager stopped: {}", status),
            Err(e) => warn!("failed to reap process manager: {}", e),
        }
    }
}
