//! Random retiree selection

use std::net::Ipv4Addr;

use rand::seq::SliceRandom;

use super::{RetireeSelector, RotationPolicy};
use crate::models::{ProxyRecord, RegionId};

/// Retires a uniformly random active proxy; the target region is ignored
#[derive(Debug, Default, Clone, Copy)]
pub struct RandomSelector;

impl RetireeSelector for RandomSelector {
    fn choose(&self, active: &[&ProxyRecord], _target_region: RegionId) -> Option<Ipv4Addr> {
        let mut rng = rand::thread_rng();
        active.choose(&mut rng).map(|r| r.address)
    }

    fn policy(&self) -> RotationPolicy {
        RotationPolicy::Random
    }
}
