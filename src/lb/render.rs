use rand::seq::SliceRandom;

use crate::config::LoadBalancerConfig;
use crate::error::{FleetError, Result};
use crate::models::{FleetState, ProxyRecord};

/// Per-backend health check and naming settings
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackendSettings {
    pub marker: String,
    pub server_prefix: String,
    pub port: u16,
    pub check_interval_ms: u64,
    pub rise: u32,
    pub fall: u32,
}

impl Default for BackendSettings {
    fn default() -> Self {
        Self::from(&LoadBalancerConfig::default())
    }
}

impl From<&LoadBalancerConfig> for BackendSettings {
    fn from(config: &LoadBalancerConfig) -> Self {
        Self {
            marker: config.marker.clone(),
            server_prefix: config.server_prefix.clone(),
            port: config.port,
            check_interval_ms: config.check_interval_ms,
            rise: config.rise,
            fall: config.fall,
        }
    }
}

/// One `server` line per record, numbered from 1 in the given order
pub fn render_backends(records: &[&ProxyRecord], settings: &BackendSettings) -> Vec<String> {
    records
        .iter()
        .enumerate()
        .map(|(idx, record)| {
            format!(
                "\tserver {}{} {}:{} check inter {} rise {} fall {}",
                settings.server_prefix,
                idx + 1,
                record.address,
                settings.port,
                settings.check_interval_ms,
                settings.rise,
                settings.fall
            )
        })
        .collect()
}

/// Render the active fleet into `template`
///
/// Backend order is shuffled so list position says nothing about switch-in order.
pub fn render(state: &FleetState, template: &str, settings: &BackendSettings) -> Result<String> {
    if !template.contains(&settings.marker) {
        return Err(FleetError::LbWrite(format!(
            "template has no '{}' marker",
            settings.marker
        )));
    }

    let mut active = state.active();
    active.shuffle(&mut rand::thread_rng());

    let block = render_backends(&active, settings).join("\n");
    Ok(template.replace(&settings.marker, &block))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rotation::test_support::record;
    use std::collections::BTreeSet;

    const TEMPLATE: &str = "backend squids\n\tbalance roundrobin\n%(squid_config)s\n";

    fn server_lines(rendered: &str) -> Vec<&str> {
        rendered
            .lines()
            .filter(|l| l.trim_start().starts_with("server"))
            .collect()
    }

    #[test]
    fn test_render_backends_format() {
        let a = record(1, 3, 100);
        let b = record(2, 7, 200);
        let lines = render_backends(&[&a, &b], &BackendSettings::default());

        assert_eq!(
            lines,
            vec![
                "\tserver squid1 10.0.0.1:8321 check inter 10000 rise 2 fall 5",
                "\tserver squid2 10.0.0.2:8321 check inter 10000 rise 2 fall 5",
            ]
        );
    }

    #[test]
    fn test_render_one_line_per_active_record() {
        let mut state = FleetState::new();
        for last in 1..=6 {
            state.insert(record(last, 3, last as i64));
        }
        state
            .mark_switch_out(std::net::Ipv4Addr::new(10, 0, 0, 4))
            .unwrap();

        let rendered = render(&state, TEMPLATE, &BackendSettings::default()).unwrap();
        let lines = server_lines(&rendered);
        assert_eq!(lines.len(), 5);

        let addresses: BTreeSet<String> = lines
            .iter()
            .map(|l| l.split_whitespace().nth(2).unwrap().to_string())
            .collect();
        let expected: BTreeSet<String> = [1, 2, 3, 5, 6]
            .iter()
            .map(|n| format!("10.0.0.{}:8321", n))
            .collect();
        assert_eq!(addresses, expected);

        let names: BTreeSet<&str> = lines
            .iter()
            .map(|l| l.split_whitespace().nth(1).unwrap())
            .collect();
        let expected_names: BTreeSet<&str> =
            ["squid1", "squid2", "squid3", "squid4", "squid5"].into();
        assert_eq!(names, expected_names);

        assert!(rendered.starts_with("backend squids\n\tbalance roundrobin\n"));
        assert!(!rendered.contains("%(squid_config)s"));
    }

    #[test]
    fn test_render_custom_settings() {
        let mut state = FleetState::new();
        state.insert(record(1, 3, 100));
        let settings = BackendSettings {
            marker: "{{backends}}".into(),
            server_prefix: "node".into(),
            port: 3128,
            check_interval_ms: 2000,
            rise: 3,
            fall: 1,
        };

        let rendered = render(&state, "listen\n{{backends}}", &settings).unwrap();
        assert_eq!(
            rendered,
            "listen\n\tserver node1 10.0.0.1:3128 check inter 2000 rise 3 fall 1"
        );
    }

    #[test]
    fn test_render_missing_marker() {
        let err = render(&FleetState::new(), "no marker here", &BackendSettings::default())
            .unwrap_err();
        assert!(matches!(err, FleetError::LbWrite(_)));
    }
}
