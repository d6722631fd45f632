use std::net::Ipv4Addr;
use std::sync::Arc;

use rand::seq::SliceRandom;
use tracing::{debug, error, info, instrument, warn};

use super::Collaborators;
use crate::config::Config;
use crate::error::{FleetError, Result};
use crate::hooks::notify::{format_subject, local_hostname, rotation_body};
use crate::lb::LbConfigWriter;
use crate::models::{now, FleetState, ProxyRecord, RegionId};
use crate::provider::{synthetic_address, synthetic_instance_id, NewInstance};
use crate::repository::{InventoryLock, InventoryRepository};
use crate::rotation::{create_selector, RetireeSelector};

/// Outcome of one rotation (or test cycle)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RotationReport {
    pub region: RegionId,
    pub new_proxy: Ipv4Addr,
    pub new_instance_id: String,
    /// Record retired this cycle, already marked inactive
    pub retiree: Option<ProxyRecord>,
    pub retiree_label: Option<String>,
    pub lb_applied: bool,
    pub retiree_deleted: bool,
    pub relabelled: bool,
}

impl RotationReport {
    fn new(region: RegionId, instance: &NewInstance, retiree: Option<ProxyRecord>) -> Self {
        Self {
            region,
            new_proxy: instance.address,
            new_instance_id: instance.instance_id.clone(),
            retiree,
            retiree_label: None,
            lb_applied: false,
            retiree_deleted: false,
            relabelled: false,
        }
    }
}

/// Outcome of a provisioning run
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProvisionReport {
    pub requested: usize,
    pub created: usize,
    pub dropped: usize,
    /// Active proxies in the rewritten inventory
    pub active: usize,
}

/// Orchestrates rotations against one inventory and one load balancer
///
/// Every mutating operation holds the inventory lock from start to finish and
/// re-reads the inventory first, so a one-shot invocation and a running daemon
/// never interleave.
pub struct FleetController {
    config: Arc<Config>,
    inventory: InventoryRepository,
    lb: LbConfigWriter,
    selector: Box<dyn RetireeSelector>,
    collaborators: Collaborators,
    state: FleetState,
    hostname: String,
    wait_for_lock: bool,
}

impl FleetController {
    pub fn new(
        config: Arc<Config>,
        state: FleetState,
        lb: LbConfigWriter,
        collaborators: Collaborators,
    ) -> Self {
        let inventory = InventoryRepository::new(config.inventory.path.clone());
        let selector = create_selector(config.rotation.policy);

        Self {
            config,
            inventory,
            lb,
            selector,
            collaborators,
            state,
            hostname: local_hostname(),
            wait_for_lock: true,
        }
    }

    /// Fail with [`FleetError::InventoryLocked`] instead of waiting for the lock
    pub fn fail_when_locked(mut self) -> Self {
        self.wait_for_lock = false;
        self
    }

    async fn lock(&self) -> Result<InventoryLock> {
        if self.wait_for_lock {
            InventoryLock::acquire(self.inventory.path()).await
        } else {
            InventoryLock::try_acquire(self.inventory.path())
        }
    }

    /// Load the inventory and load balancer template; failures here are fatal
    pub async fn open(config: Arc<Config>, collaborators: Collaborators) -> Result<Self> {
        let inventory = InventoryRepository::new(config.inventory.path.clone());
        let state = inventory.load().await?;
        let lb = LbConfigWriter::from_config(&config.load_balancer)?;

        info!(
            policy = %config.rotation.policy,
            provider = collaborators.provisioner.name(),
            active = state.active_count(),
            "Fleet controller ready"
        );
        Ok(Self::new(config, state, lb, collaborators))
    }

    pub fn state(&self) -> &FleetState {
        &self.state
    }

    /// A configured region with no active proxy, or any configured region if all are covered
    pub fn resolve_region(&self) -> Result<RegionId> {
        let mut rng = rand::thread_rng();
        let active = self.state.active_regions();

        let mut regions = self.config.rotation.region_ids.clone();
        regions.shuffle(&mut rng);

        regions
            .iter()
            .copied()
            .find(|r| !active.contains(r))
            .or_else(|| regions.choose(&mut rng).copied())
            .ok_or_else(|| FleetError::InvalidConfig("no regions configured".into()))
    }

    async fn resync(&mut self) -> Result<()> {
        let loaded = self.inventory.load().await?;
        self.state.resync(loaded);
        Ok(())
    }

    /// Bring a new proxy in, retire one per policy, and reconfigure the load balancer
    #[instrument(skip(self), fields(policy = %self.selector.policy()))]
    pub async fn rotate(&mut self, target_region: Option<RegionId>) -> Result<RotationReport> {
        let _lock = self.lock().await?;
        self.resync().await?;

        let before = self.state.clone();

        let region = match target_region {
            Some(region) => {
                info!(region, "Using supplied region");
                region
            }
            None => self.resolve_region()?,
        };

        let instance = self.collaborators.provisioner.create(region).await?;
        info!(
            address = %instance.address,
            instance_id = %instance.instance_id,
            region,
            "Provisioned new proxy"
        );

        let retiree = self.selector.select(&mut self.state, region);
        match &retiree {
            Some(r) => info!(retiree = %r, "Selected proxy to retire"),
            None => warn!(region, "No eligible retiree, fleet grows by one this cycle"),
        }

        self.state
            .mark_switch_in(instance.address, instance.instance_id.clone(), region);
        if let Err(e) = self.inventory.persist(&self.state, false).await {
            error!(
                address = %instance.address,
                instance_id = %instance.instance_id,
                "Inventory could not be written, rolling back the new proxy: {}",
                e
            );
            self.state = before;
            match self.collaborators.provisioner.delete(&instance.instance_id).await {
                Ok(()) => info!(instance_id = %instance.instance_id, "Deleted unrecorded proxy"),
                Err(delete_err) => error!(
                    instance_id = %instance.instance_id,
                    "Unrecorded proxy is still running and must be deleted by hand: {}",
                    delete_err
                ),
            }
            return Err(e);
        }
        info!(address = %instance.address, "Switched in new proxy");

        let mut report = RotationReport::new(region, &instance, retiree);

        match self.apply_lb().await {
            Ok(()) => report.lb_applied = true,
            Err(e) => error!(
                "Load balancer update failed, not retiring any proxy this cycle: {}",
                e
            ),
        }

        if report.lb_applied {
            if let Some(retiree) = report.retiree.clone() {
                self.retire(&retiree, &instance, &mut report).await;
            }
        }

        self.bootstrap(instance.address).await;
        self.notify(&report).await;

        Ok(report)
    }

    /// Delete the retiree's instance and hand its label to the new instance
    async fn retire(
        &self,
        retiree: &ProxyRecord,
        successor: &NewInstance,
        report: &mut RotationReport,
    ) {
        if !retiree.has_instance() {
            warn!(retiree = %retiree, "Retiree has no provider instance id, not deleting");
            return;
        }

        let provisioner = &self.collaborators.provisioner;
        let label = match provisioner.get_label(&retiree.instance_id).await {
            Ok(label) => Some(label),
            Err(e) => {
                warn!(retiree = %retiree, "Could not read retiree label: {}", e);
                None
            }
        };
        report.retiree_label = label.clone();

        info!(instance_id = %retiree.instance_id, "Removing switched out instance");
        if let Err(e) = provisioner.delete(&retiree.instance_id).await {
            error!(retiree = %retiree, "Failed to delete retired instance: {}", e);
            return;
        }
        report.retiree_deleted = true;

        if let Some(label) = label {
            tokio::time::sleep(self.config.settle_delay()).await;
            match provisioner
                .set_label(&successor.instance_id, &label, &self.config.provider.group)
                .await
            {
                Ok(()) => {
                    info!(%label, instance_id = %successor.instance_id, "Relabelled new instance");
                    report.relabelled = true;
                }
                Err(e) => warn!(%label, "Failed to relabel new instance: {}", e),
            }
        }
    }

    /// Dry-run rotation with a made-up proxy; nothing is created, deleted or promoted
    #[instrument(skip(self))]
    pub async fn test_cycle(&mut self) -> Result<RotationReport> {
        let region = self.resolve_region()?;
        let instance = NewInstance {
            address: synthetic_address(),
            instance_id: synthetic_instance_id(),
        };
        info!(address = %instance.address, region, "Rotating to synthetic proxy");

        let retiree = self.selector.select(&mut self.state, region);
        let mut report = RotationReport::new(region, &instance, retiree);

        if let Some(retiree) = report.retiree.as_ref().filter(|r| r.has_instance()) {
            match self
                .collaborators
                .provisioner
                .get_label(&retiree.instance_id)
                .await
            {
                Ok(label) => report.retiree_label = Some(label),
                Err(e) => debug!("No label for retiree {}: {}", retiree.address, e),
            }
        }

        self.state
            .mark_switch_in(instance.address, instance.instance_id.clone(), region);

        if let Err(e) = self.lb.write_staging(&self.state).await {
            warn!("Could not write staging load balancer config: {}", e);
        }

        self.notify(&report).await;
        Ok(report)
    }

    /// Create `count` instances round-robin across regions
    ///
    /// Unless `add` is set the current fleet is dropped first. Per-instance failures
    /// are logged and skipped. The inventory is rebuilt from a provider listing.
    #[instrument(skip(self))]
    pub async fn provision(&mut self, count: usize, add: bool) -> Result<ProvisionReport> {
        let _lock = self.lock().await?;
        self.resync().await?;

        let dropped = if add { 0 } else { self.drop_instances().await? };
        let start = if add { self.state.active_count() } else { 0 };
        let regions = self.config.rotation.region_ids.clone();
        if regions.is_empty() {
            return Err(FleetError::InvalidConfig("no regions configured".into()));
        }

        let mut created = 0;
        for i in start..start + count {
            let region = regions[i % regions.len()];
            let instance = match self.collaborators.provisioner.create(region).await {
                Ok(instance) => instance,
                Err(e) => {
                    error!(index = i, region, "Error creating instance: {}", e);
                    continue;
                }
            };

            let label = format!("{}{}", self.config.provider.label_prefix, i + 1);
            if let Err(e) = self
                .collaborators
                .provisioner
                .set_label(&instance.instance_id, &label, &self.config.provider.group)
                .await
            {
                warn!(%label, instance_id = %instance.instance_id, "Failed to label instance: {}", e);
            }

            self.bootstrap(instance.address).await;
            created += 1;
        }
        info!(created, requested = count, "Provisioned proxies");

        self.rebuild_inventory().await?;

        Ok(ProvisionReport {
            requested: count,
            created,
            dropped,
            active: self.state.active_count(),
        })
    }

    /// Delete every provider instance in the fleet; the inventory file is left alone
    #[instrument(skip(self))]
    pub async fn drop_all(&mut self) -> Result<usize> {
        let _lock = self.lock().await?;
        self.drop_instances().await
    }

    async fn drop_instances(&self) -> Result<usize> {
        let provisioner = &self.collaborators.provisioner;
        let instances = provisioner.list().await?;
        info!(count = instances.len(), "Dropping all proxies");

        let mut deleted = 0;
        for instance in instances {
            if instance.instance_id.is_empty() || instance.instance_id == "0" {
                continue;
            }
            info!(
                instance_id = %instance.instance_id,
                address = %instance.address,
                region = instance.region,
                "Dropping instance"
            );
            match provisioner.delete(&instance.instance_id).await {
                Ok(()) => deleted += 1,
                Err(e) => error!(instance_id = %instance.instance_id, "Failed to drop instance: {}", e),
            }
        }
        Ok(deleted)
    }

    /// Rewrite the inventory from a fresh provider listing
    #[instrument(skip(self))]
    pub async fn write_inventory(&mut self) -> Result<usize> {
        let _lock = self.lock().await?;
        self.rebuild_inventory().await?;
        Ok(self.state.active_count())
    }

    async fn rebuild_inventory(&mut self) -> Result<()> {
        let listing = self.collaborators.provisioner.list().await?;
        let state = FleetState::from_listing(listing, now());
        self.inventory.persist(&state, false).await?;
        info!(
            path = %self.inventory.path().display(),
            proxies = state.active_count(),
            "Saved current proxy configuration"
        );
        self.state = state;
        Ok(())
    }

    /// Render the current inventory into the live load balancer config and reload
    #[instrument(skip(self))]
    pub async fn write_lb_config(&mut self) -> Result<()> {
        let _lock = self.lock().await?;
        self.resync().await?;
        self.apply_lb().await
    }

    /// Create a single instance outside the inventory
    #[instrument(skip(self))]
    pub async fn create_one(&self, region: RegionId) -> Result<NewInstance> {
        let instance = self.collaborators.provisioner.create(region).await?;
        info!(
            address = %instance.address,
            instance_id = %instance.instance_id,
            region,
            "Created instance"
        );
        self.bootstrap(instance.address).await;
        Ok(instance)
    }

    async fn apply_lb(&self) -> Result<()> {
        let path = self.lb.write_live(&self.state).await?;
        self.collaborators.reloader.apply(&path).await
    }

    async fn bootstrap(&self, address: Ipv4Addr) {
        info!(%address, "Post-processing new proxy");
        if let Err(e) = self.collaborators.post_processor.bootstrap(address).await {
            warn!(%address, "Bootstrap failed: {}", e);
        }
    }

    async fn notify(&self, report: &RotationReport) {
        let subject = format_subject(&self.config.email.subject, now(), &self.hostname);
        let body = rotation_body(
            report.new_proxy,
            report.retiree.as_ref().map(|r| r.address),
            report.retiree_label.as_deref(),
            report.region,
        );
        if let Err(e) = self.collaborators.notifier.send(&subject, &body).await {
            warn!("Notification failed: {}", e);
        }
    }
}
