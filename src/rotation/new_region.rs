//! Region-switching retiree selection

use std::net::Ipv4Addr;

use rand::seq::SliceRandom;

use super::{RetireeSelector, RotationPolicy};
use crate::models::{ProxyRecord, RegionId};

/// Retires a random active proxy outside the target region
///
/// When every active proxy is already in the target region nothing is retired and
/// the fleet grows by one for that cycle.
#[derive(Debug, Default, Clone, Copy)]
pub struct NewRegionSelector;

impl RetireeSelector for NewRegionSelector {
    fn choose(&self, active: &[&ProxyRecord], target_region: RegionId) -> Option<Ipv4Addr> {
        let candidates: Vec<&ProxyRecord> = active
            .iter()
            .copied()
            .filter(|r| r.region != target_region)
            .collect();

        let mut rng = rand::thread_rng();
        candidates.choose(&mut rng).map(|r| r.address)
    }

    fn policy(&self) -> RotationPolicy {
        RotationPolicy::NewRegion
    }
}
