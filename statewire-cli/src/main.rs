//! statewire-cli - Observer for statewire engines
//!
//! Sends inputs and commands to a running engine and prints the status
//! messages it reports.

mod commands;

use clap::{Parser, Subcommand};
use colored::Colorize;
use std::net::SocketAddr;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "statewire-cli")]
#[command(about = "Observer for statewire automaton engines")]
#[command(version)]
struct Cli {
    /// Engine address (where inputs and commands are sent)
    #[arg(short, long, env = "STATEWIRE_ENGINE", default_value = "127.0.0.1:9001")]
    engine: SocketAddr,

    /// Local address status messages arrive on (the engine's peer)
    #[arg(short, long, env = "STATEWIRE_LISTEN", default_value = "127.0.0.1:9000")]
    listen: SocketAddr,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Send an input event
    Input {
        /// Input name
        name: String,

        /// Input value
        #[arg(default_value = "")]
        value: String,
    },

    /// Ask the engine to shut down
    Terminate,

    /// Request a status dump and print it
    Status {
        /// Stop collecting after this many milliseconds without a message
        #[arg(short, long, default_value = "500")]
        wait_ms: u64,
    },

    /// Print status messages until the engine terminates or Ctrl+C
    Watch,
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .init();

    let cli = Cli::parse();

    let result = commands::execute(cli.engine, cli.listen, cli.command).await;
    match result {
        Ok(output) => {
            if !output.is_empty() {
                println!("{}", output);
            }
        }
        Err(e) => {
            eprintln!("{}: {}", "Error".red(), e);
            std::process::exit(1);
        }
    }

    Ok(())
}
