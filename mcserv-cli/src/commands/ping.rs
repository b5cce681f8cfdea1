//! `mcserv ping`: connectivity check against a running daemon.

use std::path::PathBuf;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use clap::Args;

use mcserv_daemon::paths::{default_socket_path, SOCKET_ENV};
use mcserv_daemon::{ping, ClientError};

#[derive(Args, Debug)]
pub struct PingArgs {
    /// Path of the control socket.
    #[arg(short, long, env = SOCKET_ENV, default_value_os_t = default_socket_path())]
    pub socket: PathBuf,

    /// Give up on an unresponsive daemon after this many milliseconds.
    #[arg(long, default_value_t = 2000)]
    pub timeout_ms: u64,
}

impl PingArgs {
    pub fn run(self) -> Result<()> {
        let timeout = Some(Duration::from_millis(self.timeout_ms));
        match ping(&self.socket, timeout) {
            Ok(pong) => {
                println!(
                    "{}",
                    serde_json::to_string_pretty(&pong).context("failed to render ping JSON")?
                );
                if !pong.ok {
                    bail!("mcserv answered ping without ok");
                }
                Ok(())
            }
            Err(err @ ClientError::NotRunning { .. }) => {
                let payload = serde_json::json!({
                    "ok": false,
                    "socket": self.socket.display().to_string(),
                });
                println!(
                    "{}",
                    serde_json::to_string_pretty(&payload)
                        .context("failed to render ping JSON")?
                );
                Err(err).context("mcserv is not reachable")
            }
            Err(err) => Err(err).context("ping failed"),
        }
    }
}
