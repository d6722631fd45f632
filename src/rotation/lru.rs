//! Least-recently-used retiree selection

use std::net::Ipv4Addr;

use super::{RetireeSelector, RotationPolicy};
use crate::models::{ProxyRecord, RegionId};

/// Active records ordered by ascending `switch_out_at`, ties by address
///
/// `switch_out_at` is also stamped at switch-in, so for active records this is
/// effectively "longest continuously active first".
pub fn lru_order<'a>(active: &[&'a ProxyRecord]) -> Vec<&'a ProxyRecord> {
    let mut ordered = active.to_vec();
    ordered.sort_by_key(|r| (r.switch_out_at, r.address));
    ordered
}

/// Retires the active proxy with the oldest `switch_out_at`
#[derive(Debug, Default, Clone, Copy)]
pub struct LruSelector;

impl RetireeSelector for LruSelector {
    fn choose(&self, active: &[&ProxyRecord], _target_region: RegionId) -> Option<Ipv4Addr> {
        lru_order(active).first().map(|r| r.address)
    }

    fn policy(&self) -> RotationPolicy {
        RotationPolicy::Lru
    }
}
