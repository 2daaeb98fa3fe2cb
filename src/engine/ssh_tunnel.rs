//! SSH Tunnel
//!
//! Provides SSH tunneling for databases only reachable through a gateway.
//! Uses the native OpenSSH client for maximum compatibility.

use std::process::Stdio;
use std::time::Duration;

use tokio::io::AsyncReadExt;
use tokio::net::TcpStream;
use tokio::process::{Child, Command};
use tokio::time::{sleep, Instant};
use tracing::{debug, info, instrument};

use crate::engine::error::{EngineError, EngineResult};
use crate::engine::types::{ConnectionConfig, SshAuth, SshHostKeyPolicy, SshTunnelConfig};

const READY_POLL_INTERVAL: Duration = Duration::from_millis(100);
const DEFAULT_READY_TIMEOUT: Duration = Duration::from_secs(10);

/// Represents an active SSH tunnel using native OpenSSH
pub struct SshTunnel {
    local_port: u16,
    process: Option<Child>,
}

impl SshTunnel {
    /// Opens a tunnel for `config` and returns it with a config rewritten to
    /// the local forwarded endpoint
    #[instrument(skip(config), fields(gateway = %ssh.host, gateway_port = ssh.port))]
    pub async fn establish(
        config: &ConnectionConfig,
        ssh: &SshTunnelConfig,
    ) -> EngineResult<(Self, ConnectionConfig)> {
        let tunnel = Self::open(ssh, &config.host, config.port).await?;
        let forwarded = config.forwarded_to(tunnel.local_port());
        Ok((tunnel, forwarded))
    }

    /// Opens an SSH tunnel to the remote database using native OpenSSH
    ///
    /// Spawns an `ssh -N -L` process and waits until the forwarded port
    /// accepts connections, or the process exits.
    pub async fn open(
        config: &SshTunnelConfig,
        remote_host: &str,
        remote_port: u16,
    ) -> EngineResult<Self> {
        // Find an available local port
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .map_err(|e| EngineError::tunnel_error(format!("Failed to bind local port: {}", e)))?;

        let local_port = listener
            .local_addr()
            .map_err(|e| EngineError::tunnel_error(format!("Failed to get local address: {}", e)))?
            .port();

        // Drop the listener so ssh can bind to this port
        drop(listener);

        let args = Self::build_args(config, local_port, remote_host, remote_port)?;
        debug!(local_port, "spawning ssh for port forwarding");

        let process = Command::new("ssh")
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| {
                EngineError::tunnel_error(format!(
                    "Failed to spawn SSH process: {}. Is OpenSSH installed?",
                    e
                ))
            })?;

        let mut tunnel = Self {
            local_port,
            process: Some(process),
        };

        let ready_timeout = match config.connect_timeout_secs {
            0 => DEFAULT_READY_TIMEOUT,
            secs => Duration::from_secs(u64::from(secs)) + Duration::from_secs(1),
        };
        tunnel.wait_until_ready(ready_timeout).await?;

        info!(local_port, gateway = %config.host, "SSH tunnel established");
        Ok(tunnel)
    }

    /// Builds the OpenSSH argument list
    fn build_args(
        config: &SshTunnelConfig,
        local_port: u16,
        remote_host: &str,
        remote_port: u16,
    ) -> EngineResult<Vec<String>> {
        let mut args: Vec<String> = vec![
            "-N".into(),
            "-o".into(),
            "BatchMode=yes".into(),
            "-o".into(),
            "ExitOnForwardFailure=yes".into(),
        ];

        match config.host_key_policy {
            SshHostKeyPolicy::AcceptNew => {
                args.extend(["-o".into(), "StrictHostKeyChecking=accept-new".into()]);
                if let Some(path) = &config.known_hosts_path {
                    args.extend(["-o".into(), format!("UserKnownHostsFile={}", path)]);
                }
            }
            SshHostKeyPolicy::Strict => {
                args.extend(["-o".into(), "StrictHostKeyChecking=yes".into()]);
                if let Some(path) = &config.known_hosts_path {
                    args.extend(["-o".into(), format!("UserKnownHostsFile={}", path)]);
                }
            }
            SshHostKeyPolicy::InsecureNoCheck => {
                args.extend([
                    "-o".into(),
                    "StrictHostKeyChecking=no".into(),
                    "-o".into(),
                    "UserKnownHostsFile=/dev/null".into(),
                ]);
            }
        }

        if config.connect_timeout_secs > 0 {
            args.extend(["-o".into(), format!("ConnectTimeout={}", config.connect_timeout_secs)]);
        }
        if config.keepalive_interval_secs > 0 {
            args.extend([
                "-o".into(),
                format!("ServerAliveInterval={}", config.keepalive_interval_secs),
            ]);
        }

        args.extend([
            "-L".into(),
            format!("127.0.0.1:{}:{}:{}", local_port, remote_host, remote_port),
            "-p".into(),
            config.port.to_string(),
        ]);

        match &config.auth {
            SshAuth::Password { .. } => {
                // BatchMode forbids interactive prompts
                return Err(EngineError::tunnel_error(
                    "Password authentication not supported. Use SSH keys instead.",
                ));
            }
            SshAuth::Key { passphrase: Some(p), .. } if !p.is_empty() => {
                return Err(EngineError::tunnel_error(
                    "Passphrase-protected keys must be loaded into ssh-agent",
                ));
            }
            SshAuth::Key { private_key_path, .. } => {
                args.extend(["-i".into(), private_key_path.clone()]);
            }
        }

        args.push(format!("{}@{}", config.username, config.host));
        Ok(args)
    }

    async fn wait_until_ready(&mut self, timeout: Duration) -> EngineResult<()> {
        let deadline = Instant::now() + timeout;

        loop {
            if let Some(process) = self.process.as_mut() {
                let exited = process
                    .try_wait()
                    .map_err(|e| EngineError::tunnel_error(format!("Failed to poll SSH process: {}", e)))?;
                if let Some(status) = exited {
                    let stderr = Self::read_stderr(process).await;
                    self.process = None;
                    return Err(EngineError::tunnel_error(format!(
                        "SSH exited with {} before the tunnel was ready: {}",
                        status,
                        stderr.trim()
                    )));
                }
            }

            if TcpStream::connect(("127.0.0.1", self.local_port)).await.is_ok() {
                return Ok(());
            }

            if Instant::now() >= deadline {
                self.close().await?;
                return Err(EngineError::tunnel_error(format!(
                    "Gateway did not open the forwarded port within {}ms",
                    timeout.as_millis()
                )));
            }

            sleep(READY_POLL_INTERVAL).await;
        }
    }

    async fn read_stderr(process: &mut Child) -> String {
        let mut output = String::new();
        if let Some(mut stderr) = process.stderr.take() {
            let _ = stderr.read_to_string(&mut output).await;
        }
        output
    }

    /// Returns the local port to connect to
    pub fn local_port(&self) -> u16 {
        self.local_port
    }

    /// Closes the tunnel
    pub async fn close(&mut self) -> EngineResult<()> {
        if let Some(mut process) = self.process.take() {
            process
                .kill()
                .await
                .map_err(|e| EngineError::tunnel_error(format!("Failed to kill SSH process: {}", e)))?;
            info!(local_port = self.local_port, "SSH tunnel closed");
        }
        Ok(())
    }
}

impl Drop for SshTunnel {
    fn drop(&mut self) {
        if let Some(mut process) = self.process.take() {
            // Best effort kill on drop
            let _ = process.start_kill();
        }
    }
}
