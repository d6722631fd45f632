use std::net::Ipv4Addr;
use std::time::Duration;

use async_trait::async_trait;
use tracing::{info, instrument, warn};

use crate::command;
use crate::config::BootstrapConfig;
use crate::error::{FleetError, Result};

/// Idempotent remote setup of a freshly switched-in proxy
#[async_trait]
pub trait PostProcessor: Send + Sync {
    async fn bootstrap(&self, address: Ipv4Addr) -> Result<()>;
}

/// Runs each configured command on the host over ssh
pub struct SshPostProcessor {
    user: String,
    commands: Vec<String>,
    delay: Duration,
}

impl SshPostProcessor {
    pub fn new(config: &BootstrapConfig) -> Self {
        Self {
            user: config.user.clone(),
            commands: config.commands.clone(),
            delay: Duration::from_secs(config.delay_secs),
        }
    }

    fn ssh_args(&self, address: Ipv4Addr, remote: &str) -> Vec<String> {
        vec![
            "-o".into(),
            "StrictHostKeyChecking=no".into(),
            "-o".into(),
            "UserKnownHostsFile=/dev/null".into(),
            format!("{}@{}", self.user, address),
            remote.to_string(),
        ]
    }
}

#[async_trait]
impl PostProcessor for SshPostProcessor {
    #[instrument(skip(self))]
    async fn bootstrap(&self, address: Ipv4Addr) -> Result<()> {
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }

        let mut failures = Vec::new();
        for remote in &self.commands {
            info!(%address, command = %remote, "Running bootstrap command");
            if let Err(e) = command::run("ssh", &self.ssh_args(address, remote)).await {
                warn!(%address, command = %remote, "Bootstrap command failed: {}", e);
                failures.push(e.to_string());
            }
        }

        if failures.is_empty() {
            Ok(())
        } else {
            Err(FleetError::Bootstrap {
                address,
                reason: failures.join("; "),
            })
        }
    }
}
