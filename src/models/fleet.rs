use std::collections::{BTreeMap, BTreeSet};
use std::net::Ipv4Addr;

use chrono::{DateTime, Utc};

use super::proxy::{now, InstanceInfo, ProxyRecord, RegionId};
use crate::error::{FleetError, Result};

/// In-memory inventory: every known proxy keyed by address
///
/// Retired records stay here with `active == false` until the next reload; only
/// active records are written back by default.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FleetState {
    records: BTreeMap<Ipv4Addr, ProxyRecord>,
}

impl FleetState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a state where every listed instance is active as of `at`
    pub fn from_listing(instances: Vec<InstanceInfo>, at: DateTime<Utc>) -> Self {
        let mut state = Self::new();
        for instance in instances {
            state.insert(ProxyRecord::new(
                instance.address,
                instance.region,
                instance.instance_id,
                at,
            ));
        }
        state
    }

    /// Insert or replace a record
    pub fn insert(&mut self, record: ProxyRecord) {
        self.records.insert(record.address, record);
    }

    pub fn get(&self, address: &Ipv4Addr) -> Option<&ProxyRecord> {
        self.records.get(address)
    }

    /// All records, active or not, in address order
    pub fn records(&self) -> impl Iterator<Item = &ProxyRecord> {
        self.records.values()
    }

    /// Active records in address order
    pub fn active(&self) -> Vec<&ProxyRecord> {
        self.records.values().filter(|r| r.active).collect()
    }

    pub fn active_count(&self) -> usize {
        self.records.values().filter(|r| r.active).count()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Regions with at least one active proxy
    pub fn active_regions(&self) -> BTreeSet<RegionId> {
        self.records
            .values()
            .filter(|r| r.active)
            .map(|r| r.region)
            .collect()
    }

    /// Retire a proxy: `active = false`, `switch_out_at = now`
    pub fn mark_switch_out(&mut self, address: Ipv4Addr) -> Result<&ProxyRecord> {
        self.mark_switch_out_at(address, now())
    }

    pub fn mark_switch_out_at(
        &mut self,
        address: Ipv4Addr,
        at: DateTime<Utc>,
    ) -> Result<&ProxyRecord> {
        let record = self
            .records
            .get_mut(&address)
            .ok_or(FleetError::ProxyNotFound(address))?;
        record.active = false;
        record.switch_out_at = at;
        Ok(record)
    }

    /// Activate a proxy, replacing any previous record for the same address
    pub fn mark_switch_in(
        &mut self,
        address: Ipv4Addr,
        instance_id: impl Into<String>,
        region: RegionId,
    ) -> &ProxyRecord {
        self.mark_switch_in_at(address, instance_id, region, now())
    }

    pub fn mark_switch_in_at(
        &mut self,
        address: Ipv4Addr,
        instance_id: impl Into<String>,
        region: RegionId,
        at: DateTime<Utc>,
    ) -> &ProxyRecord {
        let record = ProxyRecord::new(address, region, instance_id, at);
        self.records.insert(address, record);
        &self.records[&address]
    }

    /// Adopt a freshly loaded inventory, keeping retired records the file no longer holds
    pub fn resync(&mut self, loaded: FleetState) {
        let retired: Vec<ProxyRecord> = self
            .records
            .values()
            .filter(|r| !r.active && !loaded.records.contains_key(&r.address))
            .cloned()
            .collect();

        self.records = loaded.records;
        for record in retired {
            self.records.insert(record.address, record);
        }
    }
}
