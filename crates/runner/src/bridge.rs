//! Driver bridge management - spawning and health checking the shared
//! automation server that brokers browser sessions

use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;
use tokio::process::{Child, Command};
use tokio::time::sleep;
use tracing::{info, warn};

use docrun_common::config::BridgeSettings;

use crate::error::{RunnerError, RunnerResult};

/// Handle to a running bridge process
pub struct BridgeHandle {
    child: Child,
    pub base_url: String,
    pub port: u16,
}

impl BridgeHandle {
    /// Spawn the bridge and wait until it answers status checks
    pub async fn spawn(config: BridgeConfig) -> RunnerResult<Self> {
        let port = match config.port {
            Some(port) => port,
            None => find_free_port()?,
        };
        let base_url = format!("http://127.0.0.1:{}", port);

        info!("Spawning driver bridge on port {}", port);

        let mut cmd = Command::new(&config.binary_path);
        cmd.args(["--port", &port.to_string()])
            .args(&config.args)
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .kill_on_drop(true);

        let child = cmd.spawn().map_err(|e| {
            RunnerError::BridgeStartup(format!(
                "Failed to spawn {}: {}",
                config.binary_path.display(),
                e
            ))
        })?;

        let handle = BridgeHandle {
            child,
            base_url: base_url.clone(),
            port,
        };

        handle.wait_for_ready(config.startup_timeout).await?;

        info!("Driver bridge is ready at {}", base_url);
        Ok(handle)
    }

    /// Wait for the bridge to answer `GET /status`
    async fn wait_for_ready(&self, timeout_duration: Duration) -> RunnerResult<()> {
        let status_url = format!("{}/status", self.base_url);
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(2))
            .build()?;

        let start = std::time::Instant::now();
        let mut attempts = 0;

        while start.elapsed() < timeout_duration {
            attempts += 1;

            match client.get(&status_url).send().await {
                Ok(resp) if resp.status().is_success() => {
                    return Ok(());
                }
                Ok(resp) => {
                    warn!("Bridge status check returned {}", resp.status());
                }
                Err(e) => {
                    if attempts == 1 {
                        info!("Waiting for driver bridge to start...");
                    }
                    // Connection refused is expected while the bridge boots
                    if !e.is_connect() {
                        warn!("Bridge status check error: {}", e);
                    }
                }
            }

            sleep(Duration::from_millis(100)).await;
        }

        Err(RunnerError::BridgeHealthCheck(attempts))
    }

    /// Get the base URL for this bridge
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Stop the bridge: SIGTERM, then kill if it is still up after
    /// 500 ms. Best effort: failures are logged, never returned.
    pub async fn stop(&mut self) {
        let Some(pid) = self.child.id() else {
            return;
        };
        info!("Stopping driver bridge (pid: {})", pid);

        #[cfg(unix)]
        {
            use nix::sys::signal::{kill, Signal};
            use nix::unistd::Pid;

            if kill(Pid::from_raw(pid as i32), Signal::SIGTERM).is_ok()
                && tokio::time::timeout(Duration::from_millis(500), self.child.wait()).await.is_ok()
            {
                return;
            }
        }

        if let Err(e) = self.child.kill().await {
            if e.kind() != std::io::ErrorKind::InvalidInput {
                warn!("Failed to kill driver bridge: {}", e);
            }
        }
    }
}

/// Configuration for spawning the bridge
#[derive(Debug, Clone)]
pub struct BridgeConfig {
    /// Path to the bridge binary
    pub binary_path: PathBuf,

    /// Extra arguments after `--port <port>`
    pub args: Vec<String>,

    /// Port to listen on (None = find free port)
    pub port: Option<u16>,

    /// Timeout for bridge startup
    pub startup_timeout: Duration,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self::from(&BridgeSettings::default())
    }
}

impl From<&BridgeSettings> for BridgeConfig {
    fn from(settings: &BridgeSettings) -> Self {
        Self {
            binary_path: settings.binary.clone(),
            args: settings.args.clone(),
            port: settings.port,
            startup_timeout: Duration::from_millis(settings.startup_timeout_ms),
        }
    }
}

/// Find a free port to use
fn find_free_port() -> RunnerResult<u16> {
    use std::net::TcpListener;

    let listener = TcpListener::bind("127.0.0.1:0")?;
    Ok(listener.local_addr()?.port())
}
