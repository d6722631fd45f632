//! LRU selection preferring a region switch

use std::net::Ipv4Addr;

use super::lru::lru_order;
use super::{RetireeSelector, RotationPolicy};
use crate::models::{ProxyRecord, RegionId};

/// Retires the oldest active proxy outside the target region, falling back to the
/// globally oldest one when every active proxy shares the target region
#[derive(Debug, Default, Clone, Copy)]
pub struct LruNewRegionSelector;

impl RetireeSelector for LruNewRegionSelector {
    fn choose(&self, active: &[&ProxyRecord], target_region: RegionId) -> Option<Ipv4Addr> {
        let ordered = lru_order(active);
        ordered
            .iter()
            .find(|r| r.region != target_region)
            .or_else(|| ordered.first())
            .map(|r| r.address)
    }

    fn policy(&self) -> RotationPolicy {
        RotationPolicy::LruNewRegion
    }
}
