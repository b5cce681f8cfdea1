//! mcserv: runs a game server behind a local control socket.
//!
//! # Usage
//!
//! ```text
//! mcserv serve [-v] [-s <socket>] [--log-format compact|json] <CMD> [ARGS]...
//! mcserv ping [-s <socket>] [--timeout-ms <ms>]
//! ```

mod commands;
mod game_server;

use anyhow::Result;
use clap::{Parser, Subcommand};

use commands::{ping::PingArgs, serve::ServeArgs};

#[derive(Parser, Debug)]
#[command(
    name = "mcserv",
    version,
    about = "Run a game server and expose it over a local control socket",
    long_about = None,
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Start the control socket and the game server, and block until both exit.
    Serve(ServeArgs),

    /// Check connectivity with a running mcserv.
    Ping(PingArgs),
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    match cli.command {
        Commands::Serve(args) => args.run(),
        Commands::Ping(args) => args.run(),
    }
}
