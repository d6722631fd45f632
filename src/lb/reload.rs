use std::path::Path;

use async_trait::async_trait;
use tracing::info;

use crate::command;
use crate::error::{FleetError, Result};

/// Makes the load balancer pick up a freshly written configuration
#[async_trait]
pub trait LoadBalancerReloader: Send + Sync {
    async fn apply(&self, config_path: &Path) -> Result<()>;
}

/// Runs a configured shell command, e.g. `sudo service haproxy reload`
pub struct CommandReloader {
    command: String,
}

impl CommandReloader {
    pub fn new(command: impl Into<String>) -> Self {
        Self {
            command: command.into(),
        }
    }
}

#[async_trait]
impl LoadBalancerReloader for CommandReloader {
    async fn apply(&self, config_path: &Path) -> Result<()> {
        command::run_shell(&self.command)
            .await
            .map_err(|e| FleetError::LbReload(e.to_string()))?;
        info!(config = %config_path.display(), "Reloaded load balancer");
        Ok(())
    }
}
