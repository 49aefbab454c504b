//! statewire - Automaton runner
//!
//! Loads a machine definition, binds the UDP transport and runs the
//! automaton until the observer (or a signal) terminates it.
//!
//! Guards and actions in a generic definition resolve against an empty
//! evaluator: unguarded transitions fire, every state action is reported as
//! `ERROR ACTION_ERROR` and every guard as `ERROR GUARD_ERROR` (and taken as
//! false).
//! Generated automata link their own evaluator and call
//! [`statewire_runtime::launch`] directly (see `src/bin/blink.rs`).

use clap::Parser;
use statewire_core::{CallbackEvaluator, Interpreter};
use statewire_runtime::{launch, Config};
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "statewire")]
#[command(about = "Runs a statewire automaton over UDP")]
#[command(version)]
struct Args {
    /// Machine definition (JSON or YAML)
    #[arg(short, long)]
    machine: Option<PathBuf>,

    /// YAML config file
    #[arg(short, long, env = "STATEWIRE_CONFIG")]
    config: Option<PathBuf>,

    /// Local address to bind
    #[arg(long)]
    bind_host: Option<String>,

    /// Port inbound messages arrive on
    #[arg(short, long)]
    listen_port: Option<u16>,

    /// Observer host
    #[arg(long)]
    peer_host: Option<String>,

    /// Observer port
    #[arg(short, long)]
    peer_port: Option<u16>,

    /// Name announced in READY
    #[arg(short, long)]
    name: Option<String>,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();

    let mut config = match Config::load_from(args.config.as_deref()) {
        Ok(config) => {
            if let Some(path) = &args.config {
                tracing::info!("Loaded config from {}", path.display());
            }
            config
        }
        Err(e) => {
            tracing::error!("Failed to load config: {}", e);
            return Err(e.into());
        }
    };

    // Command-line flags win over file and environment
    if let Some(path) = args.machine {
        config.machine.path = Some(path);
    }
    if let Some(name) = args.name {
        config.machine.name = Some(name);
    }
    if let Some(host) = args.bind_host {
        config.network.bind_host = host;
    }
    if let Some(port) = args.listen_port {
        config.network.listen_port = port;
    }
    if let Some(host) = args.peer_host {
        config.network.peer_host = host;
    }
    if let Some(port) = args.peer_port {
        config.network.peer_port = port;
    }

    if let Err(e) = config.validate() {
        tracing::error!("{}", e);
        return Err(e.into());
    }

    let definition = match config.machine.load_definition() {
        Ok(definition) => Arc::new(definition),
        Err(e) => {
            tracing::error!("Failed to load machine definition: {}", e);
            return Err(e.into());
        }
    };

    let settings = config.engine_settings(&definition.name);
    let interpreter = Interpreter::new(definition, CallbackEvaluator::new());

    tracing::info!(
        listen = %format!("{}:{}", settings.bind_host, settings.listen_port),
        peer = %format!("{}:{}", settings.peer_host, settings.peer_port),
        "Starting statewire"
    );

    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()?;
    if let Err(e) = runtime.block_on(launch(settings, interpreter)) {
        tracing::error!("{}", e.report());
        return Err(e.into());
    }

    tracing::info!("Automaton terminated");
    Ok(())
}
