//! proxyfleet - entry point
//!
//! Runs the rotation daemon or a one-shot fleet command. Exit status is 0 on
//! success, 3 after `stop`/`restart`, and the error's own code otherwise. One-shot
//! commands exit with 75 instead of waiting while another process holds the
//! inventory lock.

use std::path::Path;
use std::process::{ExitCode, Stdio};
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use tokio::signal;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use proxyfleet::cli::{Cli, Commands};
use proxyfleet::config::LogConfig;
use proxyfleet::fleet::{Collaborators, FleetController};
use proxyfleet::services::{
    pidfile, CycleMode, RotationLoop, RotationLoopConfig, RotationLoopHandle,
};
use proxyfleet::{Config, Result};

const STOPPED_EXIT_CODE: u8 = 3;

/// How long `restart` waits for the old daemon to finish its rotation
const RESTART_WAIT: Duration = Duration::from_secs(15 * 60);

enum Outcome {
    Done,
    Stopped,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let config = match Config::load(&cli.conf) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("proxyfleet: {}", e);
            return ExitCode::from(e.exit_code());
        }
    };
    init_tracing(&config.log);

    match dispatch(cli.command(), Arc::new(config), &cli.conf).await {
        Ok(Outcome::Done) => ExitCode::SUCCESS,
        Ok(Outcome::Stopped) => ExitCode::from(STOPPED_EXIT_CODE),
        Err(e) if e.is_fatal() => {
            error!("Cannot start: {}", e);
            ExitCode::from(e.exit_code())
        }
        Err(e) => {
            error!("{}", e);
            ExitCode::from(e.exit_code())
        }
    }
}

fn init_tracing(log: &LogConfig) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| format!("proxyfleet={}", log.level).into());

    if log.format.eq_ignore_ascii_case("json") {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer().json())
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer())
            .init();
    }
}

async fn dispatch(command: Commands, config: Arc<Config>, conf_path: &Path) -> Result<Outcome> {
    match command {
        Commands::Stop => {
            stop_daemon(&config)?;
            return Ok(Outcome::Stopped);
        }
        Commands::Restart => {
            if let Some(pid) = stop_daemon(&config)? {
                info!(pid, "Waiting for the old daemon to exit");
                if !pidfile::wait_for_exit(pid, RESTART_WAIT).await? {
                    warn!(pid, "Old daemon still running, starting the new one anyway");
                }
            }
            start_daemon(conf_path)?;
            return Ok(Outcome::Stopped);
        }
        _ => {}
    }

    let collaborators = Collaborators::from_config(&config);
    let mut controller = FleetController::open(config.clone(), collaborators).await?;
    if !matches!(command, Commands::Run { .. }) {
        controller = controller.fail_when_locked();
    }

    match command {
        Commands::Run { test, rotate } => {
            let mode = if test { CycleMode::Test } else { CycleMode::Rotate };
            run_daemon(controller, &config, mode, rotate).await?;
        }
        Commands::Create { region } => {
            controller.create_one(region).await?;
        }
        Commands::Drop => {
            let dropped = controller.drop_all().await?;
            info!(dropped, "Dropped fleet");
        }
        Commands::Provision { num } => {
            let report = controller.provision(num, false).await?;
            info!(?report, "Provisioning finished");
        }
        Commands::Add { num } => {
            let report = controller.provision(num, true).await?;
            info!(?report, "Provisioning finished");
        }
        Commands::Rotate { region } => {
            controller.rotate(region).await?;
        }
        Commands::Test => {
            controller.test_cycle().await?;
        }
        Commands::WriteInventory => {
            let active = controller.write_inventory().await?;
            info!(active, "Inventory rewritten");
        }
        Commands::WriteLbConfig => {
            controller.write_lb_config().await?;
        }
        Commands::Stop | Commands::Restart => {}
    }

    Ok(Outcome::Done)
}

async fn run_daemon(
    controller: FleetController,
    config: &Config,
    mode: CycleMode,
    rotate_first: bool,
) -> Result<()> {
    let pid_file = config.rotation.pid_file.clone();
    pidfile::write(&pid_file)?;

    let mut rotation_loop =
        RotationLoop::new(controller, RotationLoopConfig::from_config(config, mode));

    if rotate_first {
        let result = match mode {
            CycleMode::Rotate => rotation_loop.controller_mut().rotate(None).await,
            CycleMode::Test => rotation_loop.controller_mut().test_cycle().await,
        };
        if let Err(e) = result {
            error!("Initial rotation failed: {}", e);
        }
    }

    let handle = rotation_loop.handle();
    let signal_task = tokio::spawn(stop_on_signal(handle));

    let result = rotation_loop.run().await;
    signal_task.abort();
    match pidfile::release(&pid_file) {
        Ok(false) => info!("Pid file now belongs to another daemon, leaving it"),
        Ok(true) => {}
        Err(e) => warn!("Could not remove pid file: {}", e),
    }

    let exit = result?;
    info!(rounds = exit.rounds, failures = exit.failures, "Rotation daemon stopped");
    Ok(())
}

/// Stop the loop on Ctrl+C, SIGTERM or SIGUSR1
async fn stop_on_signal(handle: RotationLoopHandle) {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            warn!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use signal::unix::{signal, SignalKind};
        match (signal(SignalKind::terminate()), signal(SignalKind::user_defined1())) {
            (Ok(mut term), Ok(mut usr1)) => {
                tokio::select! {
                    _ = term.recv() => {},
                    _ = usr1.recv() => {},
                }
            }
            _ => {
                warn!("Failed to install signal handlers");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    info!("Stop signal received");
    handle.stop();
}

/// Remove the heartbeat and signal the recorded daemon; returns the pid signalled
fn stop_daemon(config: &Config) -> Result<Option<u32>> {
    let _ = std::fs::remove_file(&config.rotation.heartbeat_file);

    let Some(pid) = pidfile::read(&config.rotation.pid_file)? else {
        warn!(
            pid_file = %config.rotation.pid_file.display(),
            "No pid file, daemon not running?"
        );
        return Ok(None);
    };

    info!(pid, "Stopping rotation daemon");
    match pidfile::terminate(pid) {
        Ok(true) => Ok(Some(pid)),
        Ok(false) => {
            warn!(pid, "Daemon already gone");
            Ok(None)
        }
        Err(e) => {
            warn!(pid, "Could not signal daemon: {}", e);
            Ok(None)
        }
    }
}

fn start_daemon(conf_path: &Path) -> Result<()> {
    let exe = std::env::current_exe()?;
    let child = std::process::Command::new(exe)
        .arg("--conf")
        .arg(conf_path)
        .arg("run")
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .spawn()?;
    info!(pid = child.id(), "Started rotation daemon");
    Ok(())
}
