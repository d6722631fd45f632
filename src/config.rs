use std::env;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;

use crate::error::{FleetError, Result};
use crate::models::RegionId;
use crate::rotation::RotationPolicy;

/// Longest accepted rotation interval, one year
pub const MAX_FREQUENCY_HOURS: f64 = 8760.0;

/// Application configuration, loaded once from a JSON file at startup
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Rotation schedule and policy
    pub rotation: RotationConfig,
    /// Persisted inventory location
    pub inventory: InventoryConfig,
    /// Load balancer rendering and reload
    pub load_balancer: LoadBalancerConfig,
    /// Hosting backend settings
    pub provider: ProviderConfig,
    /// Remote host post-processing
    pub bootstrap: BootstrapConfig,
    /// Rotation notifications
    pub email: EmailConfig,
    /// Logging configuration
    pub log: LogConfig,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RotationConfig {
    /// Retiree selection policy
    pub policy: RotationPolicy,
    /// Hours between scheduled rotations
    pub frequency_hours: f64,
    /// Regions new proxies may be created in
    pub region_ids: Vec<RegionId>,
    /// Seconds to wait after deleting a retiree before relabelling its successor
    pub settle_delay_secs: u64,
    /// Liveness marker; the loop runs while this file exists
    pub heartbeat_file: PathBuf,
    /// Pid of the running daemon, used by `stop` and `restart`
    pub pid_file: PathBuf,
}

impl Default for RotationConfig {
    fn default() -> Self {
        Self {
            policy: RotationPolicy::LruNewRegion,
            frequency_hours: 2.0,
            region_ids: vec![2, 3, 4, 6, 7, 8, 9, 10],
            settle_delay_secs: 5,
            heartbeat_file: PathBuf::from(".heartbeat"),
            pid_file: PathBuf::from("rotator.pid"),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct InventoryConfig {
    /// Inventory file, one `address,region,instance,switch_in,switch_out` line per proxy
    pub path: PathBuf,
}

impl Default for InventoryConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("proxies.list"),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LoadBalancerConfig {
    /// Template containing the backend marker
    pub template: PathBuf,
    /// Live configuration path the rendered template is promoted to
    pub config_path: PathBuf,
    /// Shell command that makes the load balancer pick up the new config
    pub reload_command: String,
    /// Marker in the template replaced by the backend block
    pub marker: String,
    /// Backend server name prefix (`squid` renders `squid1`, `squid2`, ...)
    pub server_prefix: String,
    /// Port the proxies listen on
    pub port: u16,
    pub check_interval_ms: u64,
    pub rise: u32,
    pub fall: u32,
}

impl Default for LoadBalancerConfig {
    fn default() -> Self {
        Self {
            template: PathBuf::from("haproxy.cfg.template"),
            config_path: PathBuf::from("/etc/haproxy/haproxy.cfg"),
            reload_command: "sudo service haproxy reload".to_string(),
            marker: "%(squid_config)s".to_string(),
            server_prefix: "squid".to_string(),
            port: 8321,
            check_interval_ms: 10_000,
            rise: 2,
            fall: 5,
        }
    }
}

/// Hosting backend selected at startup
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProviderKind {
    #[default]
    Linode,
    Aws,
    DryRun,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ProviderConfig {
    pub kind: ProviderKind,
    /// Group every fleet instance is tagged with
    pub group: String,
    /// Prefix for sequential labels assigned at provisioning (`proxy1`, `proxy2`, ...)
    pub label_prefix: String,
    /// Label of the load balancer host, excluded from fleet listings
    pub lb_label: String,
    pub linode: LinodeConfig,
    pub aws: AwsConfig,
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            kind: ProviderKind::default(),
            group: "proxies".to_string(),
            label_prefix: "proxy".to_string(),
            lb_label: "lb".to_string(),
            linode: LinodeConfig::default(),
            aws: AwsConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LinodeConfig {
    /// Path or name of the linode CLI binary
    pub binary: String,
    pub plan_id: u32,
    pub os_id: u32,
    pub image_id: u32,
}

impl Default for LinodeConfig {
    fn default() -> Self {
        Self {
            binary: "linode".to_string(),
            plan_id: 1,
            os_id: 140,
            image_id: 0,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AwsConfig {
    /// Path or name of the aws CLI binary
    pub binary: String,
    pub image_id: String,
    pub instance_type: String,
    pub key_name: String,
    pub security_groups: Vec<String>,
    pub subnet_id: String,
}

impl Default for AwsConfig {
    fn default() -> Self {
        Self {
            binary: "aws".to_string(),
            image_id: String::new(),
            instance_type: "t2.micro".to_string(),
            key_name: String::new(),
            security_groups: Vec::new(),
            subnet_id: String::new(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct BootstrapConfig {
    /// Remote user for ssh
    pub user: String,
    /// Seconds to wait before the first ssh attempt
    pub delay_secs: u64,
    /// Commands run on each new host, in order
    pub commands: Vec<String>,
}

impl Default for BootstrapConfig {
    fn default() -> Self {
        Self {
            user: "ubuntu".to_string(),
            delay_secs: 5,
            commands: vec![
                "sudo iptables-restore < /etc/iptables.rules".to_string(),
                "sudo squid3 -f /etc/squid3/squid.conf".to_string(),
            ],
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct EmailConfig {
    /// Mail notifications; when false the report is only logged
    pub send_email: bool,
    pub from: String,
    pub to: Vec<String>,
    /// Subject line; `{timestamp}` and `{host}` are substituted
    pub subject: String,
    /// sendmail-compatible binary accepting `-t`
    pub sendmail: String,
}

impl Default for EmailConfig {
    fn default() -> Self {
        Self {
            send_email: false,
            from: "rotator@localhost".to_string(),
            to: Vec::new(),
            subject: "Proxy rotated at {timestamp} on {host}".to_string(),
            sendmail: "/usr/sbin/sendmail".to_string(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LogConfig {
    /// Log level (debug, info, warn, error)
    pub level: String,
    /// Output format (json, pretty)
    pub format: String,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: "pretty".to_string(),
        }
    }
}

impl Config {
    /// Load configuration from a JSON file, apply env overrides and validate
    pub fn load(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path).map_err(|e| {
            FleetError::InvalidConfig(format!("cannot read {}: {}", path.display(), e))
        })?;
        let mut config = Self::from_json(&raw)?;
        config.apply_env();
        config.validate()?;
        Ok(config)
    }

    /// Parse configuration text without env overrides or validation
    pub fn from_json(raw: &str) -> Result<Self> {
        serde_json::from_str(raw)
            .map_err(|e| FleetError::InvalidConfig(format!("invalid config JSON: {}", e)))
    }

    fn apply_env(&mut self) {
        self.log.level = get_env_or("LOG_LEVEL", &self.log.level);
        self.log.format = get_env_or("LOG_FORMAT", &self.log.format);
    }

    /// Reject values that would make rotation impossible
    pub fn validate(&self) -> Result<()> {
        if self.rotation.region_ids.is_empty() {
            return Err(FleetError::InvalidConfig(
                "rotation.region_ids must not be empty".into(),
            ));
        }
        let hours = self.rotation.frequency_hours;
        if !(hours.is_finite() && hours > 0.0 && hours <= MAX_FREQUENCY_HOURS) {
            return Err(FleetError::InvalidConfig(format!(
                "rotation.frequency_hours must be between 0 and {}",
                MAX_FREQUENCY_HOURS
            )));
        }
        if self.load_balancer.port == 0 {
            return Err(FleetError::InvalidConfig(
                "load_balancer.port must be a valid port number".into(),
            ));
        }
        if self.load_balancer.marker.is_empty() {
            return Err(FleetError::InvalidConfig(
                "load_balancer.marker must not be empty".into(),
            ));
        }
        if self.email.send_email && self.email.to.is_empty() {
            return Err(FleetError::InvalidConfig(
                "email.to must list at least one recipient when send_email is set".into(),
            ));
        }
        Ok(())
    }

    /// Interval between scheduled rotations
    pub fn rotation_interval(&self) -> Duration {
        Duration::try_from_secs_f64(self.rotation.frequency_hours * 3600.0)
            .unwrap_or(Duration::MAX)
    }

    pub fn settle_delay(&self) -> Duration {
        Duration::from_secs(self.rotation.settle_delay_secs)
    }
}

/// Get environment variable with a default value
fn get_env_or(key: &str, default: &str) -> String {
    env::var(key).unwrap_or_else(|_| default.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    static ENV_LOCK: Mutex<()> = Mutex::new(());

    #[test]
    fn test_config_defaults() {
        let config = Config::from_json("{}").unwrap();

        assert_eq!(config.rotation.policy, RotationPolicy::LruNewRegion);
        assert_eq!(config.rotation.region_ids, vec![2, 3, 4, 6, 7, 8, 9, 10]);
        assert_eq!(config.inventory.path, PathBuf::from("proxies.list"));
        assert_eq!(config.load_balancer.port, 8321);
        assert_eq!(config.load_balancer.check_interval_ms, 10_000);
        assert_eq!(config.load_balancer.rise, 2);
        assert_eq!(config.load_balancer.fall, 5);
        assert_eq!(config.provider.kind, ProviderKind::Linode);
        assert!(!config.email.send_email);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_overrides() {
        let config = Config::from_json(
            r#"{
                "rotation": {"policy": "ROTATION_RANDOM", "frequency_hours": 0.5, "region_ids": [3, 7]},
                "inventory": {"path": "/var/lib/fleet/proxies.list"},
                "load_balancer": {"port": 3128, "server_prefix": "node"},
                "provider": {"kind": "dry_run", "group": "crawl"}
            }"#,
        )
        .unwrap();

        assert_eq!(config.rotation.policy, RotationPolicy::Random);
        assert_eq!(config.rotation.region_ids, vec![3, 7]);
        assert_eq!(config.rotation_interval(), Duration::from_secs(1800));
        assert_eq!(config.load_balancer.port, 3128);
        assert_eq!(config.load_balancer.server_prefix, "node");
        assert_eq!(config.load_balancer.rise, 2);
        assert_eq!(config.provider.kind, ProviderKind::DryRun);
        assert_eq!(config.provider.group, "crawl");
    }

    #[test]
    fn test_config_unknown_policy_rejected() {
        let err = Config::from_json(r#"{"rotation": {"policy": "ROTATION_FIFO"}}"#).unwrap_err();
        assert!(matches!(err, FleetError::InvalidConfig(_)));
    }

    #[test]
    fn test_config_validation() {
        let mut config = Config::default();
        config.rotation.region_ids.clear();
        assert!(matches!(
            config.validate(),
            Err(FleetError::InvalidConfig(_))
        ));

        let mut config = Config::default();
        config.rotation.frequency_hours = 0.0;
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.rotation.frequency_hours = 1e20;
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.rotation.frequency_hours = MAX_FREQUENCY_HOURS;
        assert!(config.validate().is_ok());
        assert_eq!(config.rotation_interval(), Duration::from_secs(365 * 24 * 3600));

        let mut config = Config::default();
        config.email.send_email = true;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_config_load_missing_file() {
        let err = Config::load(Path::new("/nonexistent/proxy.conf")).unwrap_err();
        assert!(err.is_fatal());
    }

    #[test]
    fn test_config_load_env_overrides() {
        let _lock = ENV_LOCK.lock().unwrap();
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("proxy.conf");
        std::fs::write(&path, r#"{"log": {"level": "debug"}}"#).unwrap();

        env::remove_var("LOG_LEVEL");
        env::set_var("LOG_FORMAT", "json");
        let config = Config::load(&path).unwrap();
        env::remove_var("LOG_FORMAT");

        assert_eq!(config.log.level, "debug");
        assert_eq!(config.log.format, "json");
    }
}
