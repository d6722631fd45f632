//! Fleet orchestration: rotation, provisioning and teardown

mod controller;

pub use controller::{FleetController, ProvisionReport, RotationReport};

use std::sync::Arc;

use crate::config::Config;
use crate::hooks::{create_notifier, Notifier, PostProcessor, SshPostProcessor};
use crate::lb::{CommandReloader, LoadBalancerReloader};
use crate::provider::{create_provisioner, InstanceProvisioner};

/// External capabilities the controller drives
#[derive(Clone)]
pub struct Collaborators {
    pub provisioner: Arc<dyn InstanceProvisioner>,
    pub reloader: Arc<dyn LoadBalancerReloader>,
    pub post_processor: Arc<dyn PostProcessor>,
    pub notifier: Arc<dyn Notifier>,
}

impl Collaborators {
    /// Production collaborators selected by the configuration
    pub fn from_config(config: &Config) -> Self {
        Self {
            provisioner: create_provisioner(config),
            reloader: Arc::new(CommandReloader::new(
                config.load_balancer.reload_command.clone(),
            )),
            post_processor: Arc::new(SshPostProcessor::new(&config.bootstrap)),
            notifier: create_notifier(&config.email),
        }
    }
}
