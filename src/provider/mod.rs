//! Hosting backends
//!
//! One [`InstanceProvisioner`] implementation per backend, chosen at startup from
//! `provider.kind`.

mod aws;
mod dry_run;
mod linode;

pub use aws::AwsCliProvisioner;
pub use dry_run::{synthetic_address, synthetic_instance_id, DryRunProvisioner};
pub use linode::LinodeCliProvisioner;

use std::net::Ipv4Addr;
use std::sync::Arc;

use async_trait::async_trait;

use crate::config::{Config, ProviderKind};
use crate::error::Result;
use crate::models::{InstanceInfo, RegionId};

/// A freshly created, network-reachable instance
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewInstance {
    pub address: Ipv4Addr,
    pub instance_id: String,
}

/// Instance lifecycle operations on a hosting backend
///
/// Every call blocks until the backend reports the operation complete.
#[async_trait]
pub trait InstanceProvisioner: Send + Sync {
    /// Create an instance in `region` and wait until it is reachable
    async fn create(&self, region: RegionId) -> Result<NewInstance>;

    /// Delete an instance and wait until it is gone
    async fn delete(&self, instance_id: &str) -> Result<()>;

    /// Every fleet instance matching the configured image/group filter
    async fn list(&self) -> Result<Vec<InstanceInfo>>;

    /// Provider-assigned human label
    async fn get_label(&self, instance_id: &str) -> Result<String>;

    async fn set_label(&self, instance_id: &str, label: &str, group: &str) -> Result<()>;

    /// Backend name for logs
    fn name(&self) -> &'static str;
}

/// Create the provisioner selected by `provider.kind`
pub fn create_provisioner(config: &Config) -> Arc<dyn InstanceProvisioner> {
    match config.provider.kind {
        ProviderKind::Linode => Arc::new(LinodeCliProvisioner::new(&config.provider)),
        ProviderKind::Aws => Arc::new(AwsCliProvisioner::new(&config.provider.aws)),
        ProviderKind::DryRun => Arc::new(DryRunProvisioner::new()),
    }
}
