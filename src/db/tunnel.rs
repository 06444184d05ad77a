//! Local port forwarding through the system `ssh` binary.

use std::process::Stdio;
use std::time::Duration;

use tokio::io::AsyncReadExt;
use tokio::net::TcpStream;
use tokio::process::{Child, Command};
use tracing::{debug, info};

use crate::db::connection::SshConfig;
use crate::error::ClientError;

const POLL_INTERVAL: Duration = Duration::from_millis(100);

/// A running `ssh -N -L` process. The process is killed when the tunnel drops.
#[derive(Debug)]
pub struct SshTunnel {
    local_port: u16,
    child: Child,
}

impl SshTunnel {
    /// Forward a free local port to `remote_host:remote_port` as seen from the
    /// jump host, waiting up to `timeout` for the forward to accept connections.
    pub async fn open(
        ssh: &SshConfig,
        remote_host: &str,
        remote_port: u16,
        timeout: Duration,
    ) -> Result<Self, ClientError> {
        if ssh.host.is_empty() {
            return Err(ClientError::Config("ssh.host is required".to_string()));
        }

        let local_port = free_local_port()?;
        let args = ssh_args(ssh, local_port, remote_host, remote_port);
        debug!(host = %ssh.host, local_port, "starting ssh tunnel");

        let child = Command::new("ssh")
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| ClientError::Connection(format!("Failed to start ssh: {}", e)))?;

        let mut tunnel = SshTunnel { local_port, child };
        tunnel.wait_ready(timeout).await?;
        info!(host = %ssh.host, local_port, "ssh tunnel ready");
        Ok(tunnel)
    }

    pub fn local_port(&self) -> u16 {
        self.local_port
    }

    async fn wait_ready(&mut self, timeout: Duration) -> Result<(), ClientError> {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            if let Some(status) = self.child.try_wait()? {
                let mut stderr = String::new();
                if let Some(mut pipe) = self.child.stderr.take() {
                    let _ = pipe.read_to_string(&mut stderr).await;
                }
                return Err(ClientError::Connection(format!(
                    "ssh exited with {}: {}",
                    status,
                    stderr.trim()
                )));
            }

            if TcpStream::connect(("127.0.0.1", self.local_port)).await.is_ok() {
                return Ok(());
            }

            if tokio::time::Instant::now() >= deadline {
                return Err(ClientError::Connection(format!(
                    "ssh tunnel not ready after {}s",
                    timeout.as_secs()
                )));
            }
            tokio::time::sleep(POLL_INTERVAL).await;
        }
    }
}

fn free_local_port() -> Result<u16, ClientError> {
    let listener = std::net::TcpListener::bind(("127.0.0.1", 0))?;
    Ok(listener.local_addr()?.port())
}

fn ssh_args(ssh: &SshConfig, local_port: u16, remote_host: &str, remote_port: u16) -> Vec<String> {
    let mut args = vec![
        "-N".to_string(),
        "-o".to_string(),
        "BatchMode=yes".to_string(),
        "-o".to_string(),
        "ExitOnForwardFailure=yes".to_string(),
        "-L".to_string(),
        format!("127.0.0.1:{}:{}:{}", local_port, remote_host, remote_port),
        "-p".to_string(),
        ssh.port.to_string(),
    ];
    if let Some(identity) = &ssh.identity_file {
        args.push("-i".to_string());
        args.push(identity.clone());
    }
    let target = if ssh.username.is_empty() {
        ssh.host.clone()
    } else {
        format!("{}@{}", ssh.username, ssh.host)
    };
    args.push(target);
    args
}
