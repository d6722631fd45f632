//! EC2 backend driven through the `aws` command line tool with JSON output

use std::net::Ipv4Addr;

use async_trait::async_trait;
use serde::Deserialize;
use tracing::{info, instrument};

use super::{InstanceProvisioner, NewInstance};
use crate::command;
use crate::config::AwsConfig;
use crate::error::{FleetError, Result};
use crate::models::{InstanceInfo, RegionId};

/// EC2 instances carry no region id of their own in the inventory
const AWS_REGION_ID: RegionId = 0;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct RunInstancesOutput {
    #[serde(default)]
    instances: Vec<Ec2Instance>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct DescribeInstancesOutput {
    #[serde(default)]
    reservations: Vec<Reservation>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct Reservation {
    #[serde(default)]
    instances: Vec<Ec2Instance>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct Ec2Instance {
    instance_id: String,
    #[serde(default)]
    public_ip_address: Option<String>,
    #[serde(default)]
    tags: Vec<Tag>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct Tag {
    key: String,
    value: String,
}

impl DescribeInstancesOutput {
    fn into_instances(self) -> impl Iterator<Item = Ec2Instance> {
        self.reservations.into_iter().flat_map(|r| r.instances)
    }
}

pub struct AwsCliProvisioner {
    binary: String,
    config: AwsConfig,
}

impl AwsCliProvisioner {
    pub fn new(config: &AwsConfig) -> Self {
        Self {
            binary: config.binary.clone(),
            config: config.clone(),
        }
    }

    async fn ec2(&self, args: &[&str]) -> Result<String> {
        let mut full: Vec<String> = vec!["ec2".into()];
        full.extend(args.iter().map(|s| s.to_string()));
        full.push("--output".into());
        full.push("json".into());
        command::run(&self.binary, &full)
            .await
            .map_err(|e| FleetError::Provision(e.to_string()))
    }

    async fn describe(&self, instance_id: &str) -> Result<Ec2Instance> {
        let output = self
            .ec2(&["describe-instances", "--instance-ids", instance_id])
            .await?;
        parse_describe(&output)?
            .into_instances()
            .next()
            .ok_or_else(|| FleetError::Provision(format!("instance {} not found", instance_id)))
    }
}

#[async_trait]
impl InstanceProvisioner for AwsCliProvisioner {
    #[instrument(skip(self))]
    async fn create(&self, region: RegionId) -> Result<NewInstance> {
        let mut args = vec![
            "run-instances",
            "--count",
            "1",
            "--image-id",
            self.config.image_id.as_str(),
            "--instance-type",
            self.config.instance_type.as_str(),
        ];
        if !self.config.key_name.is_empty() {
            args.extend(["--key-name", self.config.key_name.as_str()]);
        }
        if !self.config.subnet_id.is_empty() {
            args.extend(["--subnet-id", self.config.subnet_id.as_str()]);
        }
        if !self.config.security_groups.is_empty() {
            args.push("--security-group-ids");
            args.extend(self.config.security_groups.iter().map(String::as_str));
        }

        let output = self.ec2(&args).await?;
        let instance_id = parse_run_instances(&output)?;

        self.ec2(&["wait", "instance-running", "--instance-ids", instance_id.as_str()])
            .await?;

        let described = self.describe(&instance_id).await?;
        let address = public_address(&described)?;

        info!(%address, %instance_id, "Created ec2 instance");
        Ok(NewInstance {
            address,
            instance_id,
        })
    }

    async fn delete(&self, instance_id: &str) -> Result<()> {
        self.ec2(&["terminate-instances", "--instance-ids", instance_id])
            .await?;
        self.ec2(&["wait", "instance-terminated", "--instance-ids", instance_id])
            .await?;
        info!(instance_id, "Terminated ec2 instance");
        Ok(())
    }

    async fn list(&self) -> Result<Vec<InstanceInfo>> {
        let image_filter = format!("Name=image-id,Values={}", self.config.image_id);
        let output = self
            .ec2(&[
                "describe-instances",
                "--filters",
                image_filter.as_str(),
                "Name=instance-state-name,Values=running",
            ])
            .await?;

        parse_describe(&output)?
            .into_instances()
            .map(|instance| {
                Ok(InstanceInfo {
                    address: public_address(&instance)?,
                    region: AWS_REGION_ID,
                    instance_id: instance.instance_id,
                })
            })
            .collect()
    }

    async fn get_label(&self, instance_id: &str) -> Result<String> {
        let instance = self.describe(instance_id).await?;
        tag_value(&instance, "Name")
            .ok_or_else(|| FleetError::Provision(format!("instance {} has no Name tag", instance_id)))
    }

    async fn set_label(&self, instance_id: &str, label: &str, group: &str) -> Result<()> {
        let name_tag = format!("Key=Name,Value={}", label);
        let group_tag = format!("Key=Group,Value={}", group);
        self.ec2(&[
            "create-tags",
            "--resources",
            instance_id,
            "--tags",
            name_tag.as_str(),
            group_tag.as_str(),
        ])
        .await?;
        Ok(())
    }

    fn name(&self) -> &'static str {
        "aws"
    }
}

fn parse_run_instances(output: &str) -> Result<String> {
    let parsed: RunInstancesOutput = serde_json::from_str(output)
        .map_err(|e| FleetError::Provision(format!("bad run-instances output: {}", e)))?;
    parsed
        .instances
        .into_iter()
        .next()
        .map(|i| i.instance_id)
        .ok_or_else(|| FleetError::Provision("run-instances returned no instance".into()))
}

fn parse_describe(output: &str) -> Result<DescribeInstancesOutput> {
    serde_json::from_str(output)
        .map_err(|e| FleetError::Provision(format!("bad describe-instances output: {}", e)))
}

fn public_address(instance: &Ec2Instance) -> Result<Ipv4Addr> {
    instance
        .public_ip_address
        .as_deref()
        .and_then(|ip| ip.parse().ok())
        .ok_or_else(|| {
            FleetError::Provision(format!(
                "instance {} has no public IPv4 address",
                instance.instance_id
            ))
        })
}

fn tag_value(instance: &Ec2Instance, key: &str) -> Option<String> {
    instance
        .tags
        .iter()
        .find(|t| t.key == key)
        .map(|t| t.value.clone())
}
