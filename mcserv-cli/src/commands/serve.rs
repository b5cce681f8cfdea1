//! `mcserv serve`: wire the services together and run them until they exit.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Args;

use mcserv_daemon::paths::{default_socket_path, SOCKET_ENV};
use mcserv_daemon::{init_tracing, Control, LogFormat, RpcServer, ServiceRegistry};

use crate::game_server::GameServer;

#[derive(Args, Debug)]
pub struct ServeArgs {
    /// Increase logging verbosity.
    #[arg(short, long)]
    pub verbose: bool,

    /// Path of the control socket.
    #[arg(short, long, env = SOCKET_ENV, default_value_os_t = default_socket_path())]
    pub socket: PathBuf,

    /// Log output format: compact or json.
    #[arg(long, default_value_t = LogFormat::Compact)]
    pub log_format: LogFormat,

    /// Game server command to run.
    #[arg(value_name = "CMD")]
    pub command: String,

    /// Arguments passed to the game server command.
    #[arg(value_name = "ARGS", trailing_var_arg = true, allow_hyphen_values = true)]
    pub args: Vec<String>,
}

impl ServeArgs {
    pub fn run(self) -> Result<()> {
        init_tracing(self.verbose, self.log_format);
        tracing::debug!(options = ?self, "parsed options");

        let runtime = tokio::runtime::Builder::new_multi_thread()
            .enable_all()
            .build()
            .context("failed to build tokio runtime")?;
        runtime.block_on(self.serve())
    }

    async fn serve(self) -> Result<()> {
        let registry = ServiceRegistry::new();

        let mut server = RpcServer::new(&self.socket);
        server
            .register(Arc::new(Control))
            .context("failed to register control methods")?;
        registry.add(Arc::new(server));
        registry.add(Arc::new(GameServer::new(self.command, self.args)));

        registry
            .setup_signal_handler()
            .context("failed to install signal handler")?;
        registry.start();

        registry.wait().await.context("mcserv exited with errors")?;
        tracing::info!("all services stopped");
        Ok(())
    }
}
