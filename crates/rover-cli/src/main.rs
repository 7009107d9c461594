//! `rover` – starts the rover control core.
//!
//! 1. Loads `~/.rover/config.toml`, writing the defaults on first run.
//! 2. Registers the devices and links the control inputs; any configuration
//!    mistake aborts here, before anything is driven.
//! 3. Binds the cockpit server and blocks until every device is ready.
//! 4. Runs the control loop until **Ctrl-C** requests an exit.  Cockpit
//!    observers can steer and switch modes but cannot stop the process.

mod config;
mod rig;

use std::net::SocketAddr;
use std::process::ExitCode;
use std::sync::Arc;
use std::thread;

use colored::Colorize;
use rover_cockpit::{CockpitServer, SubscriberSet};
use rover_runtime::{ChannelInput, ControlLoop, FixedCommand, LoopStats, init_tracing};
use rover_types::{Payload, RoverError, SHOULD_EXIT, Value};
use tracing::{Instrument, error, info, info_span, warn};

use crate::config::{Config, ConfigOrigin};

fn main() -> ExitCode {
    let _otel = init_tracing("rover");

    print_banner();

    let path = config::config_path().display().to_string();
    let cfg = match config::load_or_init() {
        Ok((cfg, ConfigOrigin::File)) => {
            println!("  Config loaded from {}", path.bold());
            cfg
        }
        Ok((cfg, ConfigOrigin::Created)) => {
            println!("  {} Default config written to {}", "✓".green().bold(), path.bold());
            cfg
        }
        Ok((cfg, ConfigOrigin::Unsaved(e))) => {
            warn!(error = %e, "could not write default config");
            cfg
        }
        Err(e) => {
            println!("{}: {}", "Config error".red(), e);
            error!(error = %e, "invalid configuration");
            return ExitCode::FAILURE;
        }
    };

    match run(cfg) {
        Ok(stats) => {
            info!(
                iterations = stats.iterations,
                dispatched = stats.dispatched,
                full_syncs = stats.full_syncs,
                deltas = stats.deltas,
                "rover stopped"
            );
            println!("{}", "  ✓ Rover stopped.".green());
            ExitCode::SUCCESS
        }
        Err(e) => {
            println!("{}: {}", "Startup failed".red().bold(), e);
            error!(error = %e, "startup failed");
            ExitCode::FAILURE
        }
    }
}

fn run(cfg: Config) -> Result<LoopStats, RoverError> {
    let mut manager = rig::build_device_manager(&cfg)?;

    let (input_tx, input) = ChannelInput::channel();
    let subscribers = SubscriberSet::new();
    let control_inputs = cfg.links.iter().map(|link| link.input.clone());
    let cockpit = CockpitServer::new(subscribers.clone(), input_tx.clone())
        .with_port(cfg.cockpit_port)
        .with_control_inputs(control_inputs);
    spawn_cockpit(cockpit)?;

    info!(devices = manager.len(), "waiting for devices to become ready");
    match manager.wait_until_all_ready(cfg.readiness_timeout()) {
        Ok(()) => info!("all devices ready"),
        Err(e @ RoverError::ReadinessTimeout { .. }) if cfg.degraded_start => {
            warn!(error = %e, "starting with unstable devices");
        }
        Err(e) => return Err(e),
    }

    if let Err(e) = ctrlc::set_handler(move || {
        println!();
        println!("{}", "⚠  Ctrl-C received – stopping the rover …".yellow().bold());
        let mut exit = Payload::new();
        exit.insert(SHOULD_EXIT.to_string(), Value::Bool(true));
        let _ = input_tx.send(exit);
    }) {
        warn!(error = %e, "failed to install Ctrl-C handler; graceful shutdown unavailable");
    }

    let control = ControlLoop::new(
        manager,
        Box::new(input),
        Box::new(FixedCommand::default()),
        Arc::new(subscribers),
        cfg.control_loop_config(),
    );
    let handle = thread::Builder::new()
        .name("control-loop".to_string())
        .spawn(move || control.run())
        .map_err(|e| RoverError::Channel(format!("failed to spawn control loop: {e}")))?;

    handle
        .join()
        .map_err(|_| RoverError::Channel("control loop panicked".to_string()))
}

/// Bind the cockpit port up front so a busy port fails startup, then serve
/// on a dedicated runtime thread for the life of the process.
fn spawn_cockpit(server: CockpitServer) -> Result<(), RoverError> {
    let port = server.port();
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .worker_threads(2)
        .thread_name("cockpit")
        .enable_all()
        .build()
        .map_err(|e| RoverError::Channel(format!("failed to start cockpit runtime: {e}")))?;

    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let listener = runtime
        .block_on(tokio::net::TcpListener::bind(addr))
        .map_err(|e| RoverError::Channel(format!("cockpit bind error on {addr}: {e}")))?;
    println!("  Cockpit on {}", format!("http://localhost:{port}").bold().cyan());

    thread::Builder::new()
        .name("cockpit".to_string())
        .spawn(move || {
            let serving = server.serve(listener).instrument(info_span!("cockpit", port));
            if let Err(e) = runtime.block_on(serving) {
                error!(error = %e, "cockpit server stopped");
            }
        })
        .map_err(|e| RoverError::Channel(format!("failed to spawn cockpit thread: {e}")))?;
    Ok(())
}

fn print_banner() {
    println!();
    println!("{}", r#"   ___                    "#.bold().cyan());
    println!("{}", r#"  / _ \___ _  _____ ____  "#.bold().cyan());
    println!("{}", r#" / , _/ _ \ |/ / -_) __/  "#.bold().cyan());
    println!("{}", r#"/_/|_|\___/___/\__/_/     "#.bold().cyan());
    println!();
    println!("  {} {}",
        "rover".bold(),
        format!("v{}", env!("CARGO_PKG_VERSION")).dimmed()
    );
    println!("  Rover control core");
    println!();
}
