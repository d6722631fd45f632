//! In-memory backend that fabricates addresses instead of creating hosts

use std::collections::BTreeMap;
use std::net::Ipv4Addr;

use async_trait::async_trait;
use parking_lot::Mutex;
use rand::Rng;
use tracing::info;

use super::{InstanceProvisioner, NewInstance};
use crate::error::{FleetError, Result};
use crate::models::{InstanceInfo, RegionId};

/// Random address with every octet in `[20, 100)`
pub fn synthetic_address() -> Ipv4Addr {
    let mut rng = rand::thread_rng();
    Ipv4Addr::new(
        rng.gen_range(20..100),
        rng.gen_range(20..100),
        rng.gen_range(20..100),
        rng.gen_range(20..100),
    )
}

/// Random instance id in `[10000, 50000)`
pub fn synthetic_instance_id() -> String {
    rand::thread_rng().gen_range(10_000..50_000u32).to_string()
}

#[derive(Debug, Clone)]
struct DryRunInstance {
    address: Ipv4Addr,
    region: RegionId,
    label: String,
}

/// Keeps a fake fleet in memory; nothing leaves the process
#[derive(Debug, Default)]
pub struct DryRunProvisioner {
    instances: Mutex<BTreeMap<String, DryRunInstance>>,
}

impl DryRunProvisioner {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl InstanceProvisioner for DryRunProvisioner {
    async fn create(&self, region: RegionId) -> Result<NewInstance> {
        let mut instances = self.instances.lock();

        let (address, instance_id) = loop {
            let address = synthetic_address();
            let instance_id = synthetic_instance_id();
            let taken = instances.contains_key(&instance_id)
                || instances.values().any(|i| i.address == address);
            if !taken {
                break (address, instance_id);
            }
        };

        instances.insert(
            instance_id.clone(),
            DryRunInstance {
                address,
                region,
                label: format!("dry-run-{}", instance_id),
            },
        );
        info!(%address, %instance_id, region, "Created dry-run instance");

        Ok(NewInstance {
            address,
            instance_id,
        })
    }

    async fn delete(&self, instance_id: &str) -> Result<()> {
        self.instances
            .lock()
            .remove(instance_id)
            .map(|_| ())
            .ok_or_else(|| FleetError::Provision(format!("no dry-run instance {}", instance_id)))
    }

    async fn list(&self) -> Result<Vec<InstanceInfo>> {
        Ok(self
            .instances
            .lock()
            .iter()
            .map(|(id, i)| InstanceInfo {
                address: i.address,
                region: i.region,
                instance_id: id.clone(),
            })
            .collect())
    }

    async fn get_label(&self, instance_id: &str) -> Result<String> {
        self.instances
            .lock()
            .get(instance_id)
            .map(|i| i.label.clone())
            .ok_or_else(|| FleetError::Provision(format!("no dry-run instance {}", instance_id)))
    }

    async fn set_label(&self, instance_id: &str, label: &str, _group: &str) -> Result<()> {
        let mut instances = self.instances.lock();
        let instance = instances
            .get_mut(instance_id)
            .ok_or_else(|| FleetError::Provision(format!("no dry-run instance {}", instance_id)))?;
        instance.label = label.to_string();
        Ok(())
    }

    fn name(&self) -> &'static str {
        "dry_run"
    }
}
