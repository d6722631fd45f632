use std::fmt;
use std::net::Ipv4Addr;

use chrono::{DateTime, SubsecRound, TimeZone, Utc};
use serde::{Deserialize, Serialize};

/// Provider region identifier
pub type RegionId = u32;

/// Human-readable name for a region id
pub fn region_name(region: RegionId) -> String {
    let name = match region {
        2 => "Dallas",
        3 => "Fremont",
        4 => "Atlanta",
        6 => "Newark",
        7 => "London",
        8 => "Tokyo",
        9 => "Singapore",
        10 => "Frankfurt",
        other => return format!("region {}", other),
    };
    name.to_string()
}

/// Current time at the one-second resolution the inventory persists
pub fn now() -> DateTime<Utc> {
    Utc::now().trunc_subsecs(0)
}

/// One proxy host in the fleet, keyed by its address
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProxyRecord {
    pub address: Ipv4Addr,
    pub region: RegionId,
    /// Opaque provider handle; `0` or empty when the provider did not report one
    pub instance_id: String,
    pub switch_in_at: DateTime<Utc>,
    /// Stamped at switch-in as well as at retirement
    pub switch_out_at: DateTime<Utc>,
    pub active: bool,
}

impl ProxyRecord {
    /// A freshly switched-in record
    pub fn new(
        address: Ipv4Addr,
        region: RegionId,
        instance_id: impl Into<String>,
        at: DateTime<Utc>,
    ) -> Self {
        Self {
            address,
            region,
            instance_id: instance_id.into(),
            switch_in_at: at,
            switch_out_at: at,
            active: true,
        }
    }

    /// Whether the record carries a real provider instance that can be deleted
    pub fn has_instance(&self) -> bool {
        let id = self.instance_id.trim();
        !id.is_empty() && id != "0"
    }

    /// Render as an inventory line: `address,region,instance,switch_in,switch_out`
    pub fn to_line(&self) -> String {
        format!(
            "{},{},{},{},{}",
            self.address,
            self.region,
            self.instance_id,
            self.switch_in_at.timestamp(),
            self.switch_out_at.timestamp()
        )
    }

    /// Parse an inventory line; zero timestamps are replaced by `now`
    pub fn parse_line(line: &str, now: DateTime<Utc>) -> Result<Self, String> {
        let fields: Vec<&str> = line.split(',').map(str::trim).collect();
        if fields.len() != 5 {
            return Err(format!("expected 5 fields, found {}", fields.len()));
        }

        let address = fields[0]
            .parse::<Ipv4Addr>()
            .map_err(|_| format!("invalid IPv4 address '{}'", fields[0]))?;
        let region = fields[1]
            .parse::<RegionId>()
            .map_err(|_| format!("invalid region '{}'", fields[1]))?;
        let instance_id = fields[2].to_string();
        let switch_in_at = parse_epoch(fields[3], now)?;
        let switch_out_at = parse_epoch(fields[4], now)?;

        Ok(Self {
            address,
            region,
            instance_id,
            switch_in_at,
            switch_out_at,
            active: true,
        })
    }
}

impl fmt::Display for ProxyRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} (region {}, instance {})",
            self.address, self.region, self.instance_id
        )
    }
}

/// Accepts integer or float epoch seconds; `0` means "unknown, use now"
fn parse_epoch(raw: &str, now: DateTime<Utc>) -> Result<DateTime<Utc>, String> {
    let secs = raw
        .parse::<f64>()
        .ok()
        .filter(|v| v.is_finite() && *v >= 0.0)
        .ok_or_else(|| format!("invalid timestamp '{}'", raw))?
        .trunc() as i64;

    if secs == 0 {
        return Ok(now);
    }

    Utc.timestamp_opt(secs, 0)
        .single()
        .ok_or_else(|| format!("timestamp out of range '{}'", raw))
}

/// An instance as reported by a provider listing
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstanceInfo {
    pub address: Ipv4Addr,
    pub region: RegionId,
    pub instance_id: String,
}
