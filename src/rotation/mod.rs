//! Retiree selection policies
//!
//! Each rotation brings one new proxy in and, depending on the policy, picks one
//! active proxy to retire. Picking and retiring are one step: [`RetireeSelector::select`]
//! marks the chosen record switched-out before returning it.

mod lru;
mod lru_new_region;
mod new_region;
mod random;

pub use lru::{lru_order, LruSelector};
pub use lru_new_region::LruNewRegionSelector;
pub use new_region::NewRegionSelector;
pub use random::RandomSelector;

use std::fmt;
use std::net::Ipv4Addr;
use std::str::FromStr;

use serde::Deserialize;

use crate::error::FleetError;
use crate::models::{FleetState, ProxyRecord, RegionId};

/// Policy used to pick the proxy retired by a rotation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(try_from = "String")]
pub enum RotationPolicy {
    Random,
    Lru,
    NewRegion,
    #[default]
    LruNewRegion,
}

impl RotationPolicy {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Random => "random",
            Self::Lru => "lru",
            Self::NewRegion => "new_region",
            Self::LruNewRegion => "lru_new_region",
        }
    }
}

impl FromStr for RotationPolicy {
    type Err = FleetError;

    /// Accepts `ROTATION_LRU_NEW_REGION` style names as well as snake and kebab case
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.trim().to_lowercase().replace('-', "_");
        let name = normalized
            .strip_prefix("rotation_")
            .unwrap_or(normalized.as_str());

        match name {
            "random" => Ok(Self::Random),
            "lru" | "least_recently_used" => Ok(Self::Lru),
            "new_region" => Ok(Self::NewRegion),
            "lru_new_region" => Ok(Self::LruNewRegion),
            _ => Err(FleetError::InvalidConfig(format!(
                "unknown rotation policy: {}",
                s
            ))),
        }
    }
}

impl TryFrom<String> for RotationPolicy {
    type Error = FleetError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl fmt::Display for RotationPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Trait for retiree selection policies
pub trait RetireeSelector: Send + Sync {
    /// Pick the address to retire from the active records, without mutating anything
    ///
    /// `target_region` is the region of the proxy being brought in.
    fn choose(&self, active: &[&ProxyRecord], target_region: RegionId) -> Option<Ipv4Addr>;

    /// The policy this selector implements
    fn policy(&self) -> RotationPolicy;

    /// Pick a retiree and mark it switched-out in `state`
    fn select(&self, state: &mut FleetState, target_region: RegionId) -> Option<ProxyRecord> {
        let address = {
            let active = state.active();
            self.choose(&active, target_region)?
        };
        state.mark_switch_out(address).ok().cloned()
    }
}

/// Create a retiree selector for a policy
pub fn create_selector(policy: RotationPolicy) -> Box<dyn RetireeSelector> {
    match policy {
        RotationPolicy::Random => Box::new(RandomSelector),
        RotationPolicy::Lru => Box::new(LruSelector),
        RotationPolicy::NewRegion => Box::new(NewRegionSelector),
        RotationPolicy::LruNewRegion => Box::new(LruNewRegionSelector),
    }
}
