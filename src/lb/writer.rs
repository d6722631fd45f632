use std::path::{Path, PathBuf};

use tracing::info;

use super::render::{render, BackendSettings};
use crate::config::LoadBalancerConfig;
use crate::error::{FleetError, Result};
use crate::models::FleetState;
use crate::repository::write_atomic;

/// Renders the fleet into the load balancer template and writes it out
#[derive(Debug, Clone)]
pub struct LbConfigWriter {
    template: String,
    settings: BackendSettings,
    live_path: PathBuf,
    staging_path: PathBuf,
}

impl LbConfigWriter {
    pub fn new(template: impl Into<String>, settings: BackendSettings, live_path: PathBuf) -> Self {
        let file_name = live_path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "lb.cfg".to_string());
        let staging_path = std::env::temp_dir().join(format!(".{}", file_name));

        Self {
            template: template.into(),
            settings,
            live_path,
            staging_path,
        }
    }

    /// Read the template named by the config; a missing template is a startup error
    pub fn from_config(config: &LoadBalancerConfig) -> Result<Self> {
        let template = std::fs::read_to_string(&config.template).map_err(|e| {
            FleetError::InvalidConfig(format!(
                "cannot read load balancer template {}: {}",
                config.template.display(),
                e
            ))
        })?;
        if !template.contains(&config.marker) {
            return Err(FleetError::InvalidConfig(format!(
                "load balancer template {} has no '{}' marker",
                config.template.display(),
                config.marker
            )));
        }

        Ok(Self::new(
            template,
            BackendSettings::from(config),
            config.config_path.clone(),
        ))
    }

    /// Override where dry-run output goes
    pub fn with_staging_path(mut self, path: PathBuf) -> Self {
        self.staging_path = path;
        self
    }

    pub fn live_path(&self) -> &Path {
        &self.live_path
    }

    pub fn staging_path(&self) -> &Path {
        &self.staging_path
    }

    /// Render and atomically replace the live configuration
    pub async fn write_live(&self, state: &FleetState) -> Result<PathBuf> {
        self.write_to(state, self.live_path.clone()).await
    }

    /// Render to the staging location only; the live config is left alone
    pub async fn write_staging(&self, state: &FleetState) -> Result<PathBuf> {
        self.write_to(state, self.staging_path.clone()).await
    }

    async fn write_to(&self, state: &FleetState, path: PathBuf) -> Result<PathBuf> {
        let contents = render(state, &self.template, &self.settings)?;

        let target = path.clone();
        tokio::task::spawn_blocking(move || write_atomic(&target, contents.as_bytes()))
            .await
            .map_err(|e| FleetError::LbWrite(e.to_string()))?
            .map_err(|e| FleetError::LbWrite(format!("{}: {}", path.display(), e)))?;

        info!(
            path = %path.display(),
            backends = state.active_count(),
            "Wrote load balancer config"
        );
        Ok(path)
    }
}
