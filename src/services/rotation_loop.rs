//! Rotation daemon
//!
//! Sleeps for the rotation interval, then runs one rotation. The loop keeps going
//! while the heartbeat marker exists and the cancellation token is untouched; a
//! rotation in flight always runs to completion.
//!
//! Only [`RotationLoopHandle::stop`] removes the marker. The loop leaves it alone on
//! exit, since a replacement daemon may already have created its own.

use std::path::PathBuf;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{error, info, instrument};

use crate::config::Config;
use crate::error::Result;
use crate::fleet::FleetController;

/// What each tick does
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CycleMode {
    #[default]
    Rotate,
    /// Synthetic rotation that never touches the provider or live files
    Test,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopState {
    Running,
    Stopped,
}

/// Rotation loop configuration
#[derive(Debug, Clone)]
pub struct RotationLoopConfig {
    pub interval: Duration,
    pub heartbeat_file: PathBuf,
    pub mode: CycleMode,
}

impl RotationLoopConfig {
    pub fn from_config(config: &Config, mode: CycleMode) -> Self {
        Self {
            interval: config.rotation_interval(),
            heartbeat_file: config.rotation.heartbeat_file.clone(),
            mode,
        }
    }
}

/// Summary returned when the loop exits
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LoopExit {
    pub state: LoopState,
    /// Ticks that ran a rotation, successful or not
    pub rounds: u64,
    pub failures: u64,
}

pub struct RotationLoop {
    controller: FleetController,
    config: RotationLoopConfig,
    cancel: CancellationToken,
}

impl RotationLoop {
    pub fn new(controller: FleetController, config: RotationLoopConfig) -> Self {
        Self {
            controller,
            config,
            cancel: CancellationToken::new(),
        }
    }

    pub fn controller_mut(&mut self) -> &mut FleetController {
        &mut self.controller
    }

    pub fn handle(&self) -> RotationLoopHandle {
        RotationLoopHandle {
            heartbeat: self.config.heartbeat_file.clone(),
            cancel: self.cancel.clone(),
        }
    }

    async fn alive(&self) -> bool {
        !self.cancel.is_cancelled() && tokio::fs::metadata(&self.config.heartbeat_file).await.is_ok()
    }

    /// Create the heartbeat marker and rotate on every tick until stopped
    #[instrument(skip(self), fields(mode = ?self.config.mode))]
    pub async fn run(mut self) -> Result<LoopExit> {
        tokio::fs::write(&self.config.heartbeat_file, b"").await?;
        info!(
            interval_secs = self.config.interval.as_secs(),
            heartbeat = %self.config.heartbeat_file.display(),
            "Rotation loop running"
        );

        let mut rounds = 0;
        let mut failures = 0;

        loop {
            tokio::select! {
                _ = tokio::time::sleep(self.config.interval) => {}
                _ = self.cancel.cancelled() => {}
            }

            if !self.alive().await {
                info!("Heartbeat gone or stop requested, rotation loop exiting");
                break;
            }

            rounds += 1;
            info!(round = rounds, "Rotating proxy node");

            let result = match self.config.mode {
                CycleMode::Rotate => self.controller.rotate(None).await,
                CycleMode::Test => self.controller.test_cycle().await,
            };

            match result {
                Ok(report) => info!(
                    round = rounds,
                    new_proxy = %report.new_proxy,
                    retiree = ?report.retiree.as_ref().map(|r| r.address),
                    lb_applied = report.lb_applied,
                    retiree_deleted = report.retiree_deleted,
                    "Rotation complete"
                ),
                Err(e) => {
                    failures += 1;
                    error!(round = rounds, "Rotation failed: {}", e);
                }
            }
        }

        Ok(LoopExit {
            state: LoopState::Stopped,
            rounds,
            failures,
        })
    }
}

/// Stops a running [`RotationLoop`] from another task or a signal handler
#[derive(Debug, Clone)]
pub struct RotationLoopHandle {
    heartbeat: PathBuf,
    cancel: CancellationToken,
}

impl RotationLoopHandle {
    /// Remove the heartbeat marker and wake the loop
    pub fn stop(&self) {
        let _ = std::fs::remove_file(&self.heartbeat);
        self.cancel.cancel();
    }
}
