//! Linode backend driven through the `linode` command line tool

use std::net::Ipv4Addr;

use async_trait::async_trait;
use rand::distributions::Alphanumeric;
use rand::Rng;
use tracing::{info, instrument};

use super::{InstanceProvisioner, NewInstance};
use crate::command;
use crate::config::ProviderConfig;
use crate::error::{FleetError, Result};
use crate::models::{InstanceInfo, ProxyRecord, RegionId};

const DISK_LABEL: &str = "proxy_disk";

pub struct LinodeCliProvisioner {
    binary: String,
    plan_id: u32,
    os_id: u32,
    image_id: u32,
    group: String,
    lb_label: String,
}

impl LinodeCliProvisioner {
    pub fn new(config: &ProviderConfig) -> Self {
        Self {
            binary: config.linode.binary.clone(),
            plan_id: config.linode.plan_id,
            os_id: config.linode.os_id,
            image_id: config.linode.image_id,
            group: config.group.clone(),
            lb_label: config.lb_label.clone(),
        }
    }

    async fn linode(&self, args: Vec<String>) -> Result<String> {
        self.linode_redacted(args, &[]).await
    }

    async fn linode_redacted(&self, args: Vec<String>, secrets: &[&str]) -> Result<String> {
        command::run_redacted(&self.binary, &args, secrets)
            .await
            .map_err(|e| FleetError::Provision(e.to_string()))
    }
}

#[async_trait]
impl InstanceProvisioner for LinodeCliProvisioner {
    #[instrument(skip(self))]
    async fn create(&self, region: RegionId) -> Result<NewInstance> {
        let password = root_password();
        let args = vec![
            "create".into(),
            "-d".into(),
            region.to_string(),
            "-p".into(),
            self.plan_id.to_string(),
            "-o".into(),
            self.os_id.to_string(),
            "-i".into(),
            self.image_id.to_string(),
            "-l".into(),
            DISK_LABEL.into(),
            "-r".into(),
            password.clone(),
        ];
        let output = self.linode_redacted(args, &[password.as_str()]).await?;

        let instance = parse_create_output(&output)?;
        info!(
            address = %instance.address,
            instance_id = %instance.instance_id,
            region,
            "Created linode"
        );
        Ok(instance)
    }

    async fn delete(&self, instance_id: &str) -> Result<()> {
        self.linode(vec!["delete".into(), "-l".into(), instance_id.into()])
            .await?;
        info!(instance_id, "Deleted linode");
        Ok(())
    }

    async fn list(&self) -> Result<Vec<InstanceInfo>> {
        let output = self
            .linode(vec![
                "find".into(),
                "-g".into(),
                self.group.clone(),
                "-s".into(),
                self.lb_label.clone(),
            ])
            .await?;
        parse_find_output(&output)
    }

    async fn get_label(&self, instance_id: &str) -> Result<String> {
        let output = self
            .linode(vec!["info".into(), "-l".into(), instance_id.into()])
            .await?;
        parse_info_label(&output)
    }

    async fn set_label(&self, instance_id: &str, label: &str, group: &str) -> Result<()> {
        self.linode(vec![
            "update".into(),
            "-l".into(),
            instance_id.into(),
            "-L".into(),
            label.into(),
            "-g".into(),
            group.into(),
        ])
        .await?;
        Ok(())
    }

    fn name(&self) -> &'static str {
        "linode"
    }
}

fn root_password() -> String {
    rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(20)
        .map(char::from)
        .collect()
}

/// The id is the last word three lines from the end, the address the last word of the last line
fn parse_create_output(output: &str) -> Result<NewInstance> {
    let lines: Vec<&str> = output
        .lines()
        .map(str::trim)
        .filter(|l| !l.is_empty())
        .collect();
    if lines.len() < 3 {
        return Err(FleetError::Provision(format!(
            "unexpected linode create output: {}",
            output.trim()
        )));
    }

    let last_word = |line: &str| line.split_whitespace().last().unwrap_or("").to_string();
    let raw_address = last_word(lines[lines.len() - 1]);
    let instance_id = last_word(lines[lines.len() - 3]);

    let address = raw_address
        .parse::<Ipv4Addr>()
        .map_err(|_| FleetError::Provision(format!("invalid linode address '{}'", raw_address)))?;
    if instance_id.is_empty() {
        return Err(FleetError::Provision("linode create reported no id".into()));
    }

    Ok(NewInstance {
        address,
        instance_id,
    })
}

/// `find` prints inventory-style lines: `address,region,id,switch_in,switch_out`
fn parse_find_output(output: &str) -> Result<Vec<InstanceInfo>> {
    let listed_at = crate::models::now();
    output
        .lines()
        .filter(|l| !l.trim().is_empty())
        .map(|line| {
            ProxyRecord::parse_line(line, listed_at)
                .map(|r| InstanceInfo {
                    address: r.address,
                    region: r.region,
                    instance_id: r.instance_id,
                })
                .map_err(|reason| {
                    FleetError::Provision(format!("bad linode listing '{}': {}", line, reason))
                })
        })
        .collect()
}

/// First line of `info` is `label: <name>`
fn parse_info_label(output: &str) -> Result<String> {
    output
        .lines()
        .next()
        .and_then(|line| line.rsplit(':').next())
        .map(|label| label.trim().to_string())
        .filter(|label| !label.is_empty())
        .ok_or_else(|| FleetError::Provision("linode info reported no label".into()))
}
