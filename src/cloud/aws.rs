//! AWS implementation through the `aws` CLI

use crate::cloud::{CloudError, CloudProvider, CreatedKeyPair, RegistryApi};
use crate::core::{FirewallRule, FirewallStatus, InstanceAttributes, InstanceState, InstanceStatus};
use crate::credentials::RegistryToken;
use async_trait::async_trait;
use chrono::{Duration as ChronoDuration, Utc};
use secrecy::SecretString;
use serde_json::Value;
use std::time::Duration;
use tokio::process::Command;
use tokio::time::timeout;
use tracing::{debug, info, warn};
use zeroize::{Zeroize, Zeroizing};

/// ECR login passwords are valid for twelve hours
const REGISTRY_TOKEN_TTL_HOURS: i64 = 12;

/// Client for the AWS CLI
#[derive(Debug, Clone)]
pub struct AwsCli {
    /// Path to aws executable
    aws_path: String,

    region: String,

    /// Timeout for a single CLI call in seconds
    timeout_secs: u64,
}

/// Output of one CLI invocation
enum CliOutput {
    Success(String),
    Failure { code: i32, stderr: String },
}

impl AwsCli {
    pub fn new(region: impl Into<String>) -> Self {
        Self {
            aws_path: "aws".to_string(),
            region: region.into(),
            timeout_secs: 120,
        }
    }

    async fn run(&self, args: &[String]) -> Result<CliOutput, CloudError> {
        debug!("aws {}", args.join(" "));

        let result = timeout(
            Duration::from_secs(self.timeout_secs),
            Command::new(&self.aws_path)
                .args(args)
                .args(["--region", self.region.as_str(), "--output", "json"])
                .kill_on_drop(true)
                .output(),
        )
        .await
        .map_err(|_| CloudError::Timeout(self.timeout_secs))?;

        let output = result
            .map_err(|e| CloudError::Internal(format!("Failed to execute aws: {}", e)))?;

        if !output.status.success() {
            return Ok(CliOutput::Failure {
                code: output.status.code().unwrap_or(-1),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }

        let stdout = String::from_utf8(output.stdout)
            .map_err(|e| CloudError::Internal(format!("Failed to decode aws output: {}", e)))?;
        Ok(CliOutput::Success(stdout))
    }

    /// Run a call that must succeed and parse its JSON output
    async fn call(&self, args: &[String]) -> Result<Value, CloudError> {
        match self.run(args).await? {
            CliOutput::Success(stdout) if stdout.trim().is_empty() => Ok(Value::Null),
            CliOutput::Success(stdout) => serde_json::from_str(&stdout)
                .map_err(|e| CloudError::Internal(format!("Invalid aws JSON output: {}", e))),
            CliOutput::Failure { code, stderr } => {
                warn!("aws exited with code {}: {}", code, stderr);
                Err(CloudError::Api(format!("aws exited with code {}: {}", code, stderr)))
            }
        }
    }

    async fn firewall_id(&self, name: &str) -> Result<String, CloudError> {
        self.find_firewall(name)
            .await?
            .map(|f| f.id)
            .ok_or_else(|| CloudError::Api(format!("security group '{}' not found", name)))
    }
}

fn args(values: &[&str]) -> Vec<String> {
    values.iter().map(|v| v.to_string()).collect()
}

fn str_field<'a>(value: &'a Value, field: &str) -> Option<&'a str> {
    value.get(field).and_then(Value::as_str)
}

fn parse_instance(value: &Value) -> Result<InstanceStatus, CloudError> {
    let id = str_field(value, "InstanceId")
        .ok_or_else(|| CloudError::Internal("instance without InstanceId".to_string()))?;
    let state_name = value
        .get("State")
        .and_then(|s| str_field(s, "Name"))
        .unwrap_or("pending");
    let state = InstanceState::parse(state_name)
        .ok_or_else(|| CloudError::Internal(format!("unknown instance state '{}'", state_name)))?;

    Ok(InstanceStatus {
        id: id.to_string(),
        state,
        public_address: str_field(value, "PublicIpAddress").map(str::to_string),
        image: str_field(value, "ImageId").unwrap_or_default().to_string(),
        instance_type: str_field(value, "InstanceType").unwrap_or_default().to_string(),
    })
}

fn parse_rules(group: &Value) -> Vec<FirewallRule> {
    let mut rules = Vec::new();
    let permissions = group
        .get("IpPermissions")
        .and_then(Value::as_array)
        .cloned()
        .unwrap_or_default();

    for permission in &permissions {
        let protocol = str_field(permission, "IpProtocol").unwrap_or("tcp").to_string();
        let Some(port) = permission
            .get("FromPort")
            .and_then(Value::as_u64)
            .and_then(|p| u16::try_from(p).ok())
        else {
            continue;
        };
        let ranges = permission
            .get("IpRanges")
            .and_then(Value::as_array)
            .cloned()
            .unwrap_or_default();
        for range in &ranges {
            if let Some(cidr) = str_field(range, "CidrIp") {
                rules.push(FirewallRule {
                    protocol: protocol.clone(),
                    port,
                    cidr: cidr.to_string(),
                });
            }
        }
    }

    rules
}

#[async_trait]
impl CloudProvider for AwsCli {
    async fn find_key_pair(&self, name: &str) -> Result<Option<String>, CloudError> {
        let filter = format!("Name=key-name,Values={}", name);
        let output = self
            .call(&args(&["ec2", "describe-key-pairs", "--filters", &filter]))
            .await?;

        Ok(output
            .get("KeyPairs")
            .and_then(Value::as_array)
            .and_then(|pairs| pairs.first())
            .and_then(|pair| str_field(pair, "KeyPairId"))
            .map(str::to_string))
    }

    async fn create_key_pair(&self, name: &str) -> Result<CreatedKeyPair, CloudError> {
        info!("Creating key pair {}", name);
        // Raw output carries the key material; wiped once parsed
        let stdout = match self
            .run(&args(&["ec2", "create-key-pair", "--key-name", name]))
            .await?
        {
            CliOutput::Success(stdout) => Zeroizing::new(stdout),
            CliOutput::Failure { code, stderr } => {
                warn!("aws exited with code {}: {}", code, stderr);
                return Err(CloudError::Api(format!("aws exited with code {}: {}", code, stderr)));
            }
        };
        let mut output: Value = serde_json::from_str(&stdout)
            .map_err(|e| CloudError::Internal(format!("Invalid aws JSON output: {}", e)))?;

        let id = str_field(&output, "KeyPairId").unwrap_or(name).to_string();
        let private_key = match output.get_mut("KeyMaterial").map(Value::take) {
            Some(Value::String(mut material)) => {
                let key = SecretString::from(material.as_str());
                material.zeroize();
                key
            }
            _ => {
                return Err(CloudError::Internal(
                    "create-key-pair returned no key material".to_string(),
                ))
            }
        };

        Ok(CreatedKeyPair { id, private_key })
    }

    async fn find_firewall(&self, name: &str) -> Result<Option<FirewallStatus>, CloudError> {
        let filter = format!("Name=group-name,Values={}", name);
        let output = self
            .call(&args(&["ec2", "describe-security-groups", "--filters", &filter]))
            .await?;

        let group = output
            .get("SecurityGroups")
            .and_then(Value::as_array)
            .and_then(|groups| groups.first());

        Ok(group.and_then(|group| {
            str_field(group, "GroupId").map(|id| FirewallStatus {
                id: id.to_string(),
                rules: parse_rules(group),
            })
        }))
    }

    async fn create_firewall(
        &self,
        name: &str,
        description: &str,
        rules: &[FirewallRule],
    ) -> Result<String, CloudError> {
        info!("Creating security group {}", name);
        let output = self
            .call(&args(&[
                "ec2",
                "create-security-group",
                "--group-name",
                name,
                "--description",
                description,
            ]))
            .await?;
        let id = str_field(&output, "GroupId")
            .ok_or_else(|| CloudError::Internal("create-security-group returned no GroupId".to_string()))?
            .to_string();

        for rule in rules {
            debug!("Authorizing {} on {}", rule, name);
            let port = rule.port.to_string();
            self.call(&args(&[
                "ec2",
                "authorize-security-group-ingress",
                "--group-id",
                &id,
                "--protocol",
                &rule.protocol,
                "--port",
                &port,
                "--cidr",
                &rule.cidr,
            ]))
            .await?;
        }

        Ok(id)
    }

    async fn find_instance(&self, name: &str) -> Result<Option<InstanceStatus>, CloudError> {
        let filter = format!("Name=tag:Name,Values={}", name);
        let output = self
            .call(&args(&["ec2", "describe-instances", "--filters", &filter]))
            .await?;

        let reservations = output
            .get("Reservations")
            .and_then(Value::as_array)
            .cloned()
            .unwrap_or_default();

        for reservation in &reservations {
            let instances = reservation
                .get("Instances")
                .and_then(Value::as_array)
                .cloned()
                .unwrap_or_default();
            for instance in &instances {
                let status = parse_instance(instance)?;
                if !status.state.is_gone() {
                    return Ok(Some(status));
                }
            }
        }

        Ok(None)
    }

    async fn create_instance(
        &self,
        name: &str,
        attributes: &InstanceAttributes,
    ) -> Result<InstanceStatus, CloudError> {
        let mut firewall_ids = Vec::new();
        for firewall in &attributes.firewalls {
            firewall_ids.push(self.firewall_id(firewall).await?);
        }

        info!("Launching instance {} ({})", name, attributes.instance_type);
        let tags = format!(
            "ResourceType=instance,Tags=[{{Key=Name,Value={}}},{{Key=Role,Value={}}}]",
            name, attributes.role
        );
        let mut call = args(&[
            "ec2",
            "run-instances",
            "--count",
            "1",
            "--image-id",
            &attributes.image,
            "--instance-type",
            &attributes.instance_type,
            "--key-name",
            &attributes.key_name,
            "--tag-specifications",
            &tags,
        ]);
        if !firewall_ids.is_empty() {
            call.push("--security-group-ids".to_string());
            call.extend(firewall_ids);
        }
        call.push(if attributes.public_ip {
            "--associate-public-ip-address".to_string()
        } else {
            "--no-associate-public-ip-address".to_string()
        });

        let output = self.call(&call).await?;
        let instance = output
            .get("Instances")
            .and_then(Value::as_array)
            .and_then(|instances| instances.first())
            .ok_or_else(|| CloudError::Internal("run-instances returned no instance".to_string()))?;

        parse_instance(instance)
    }

    async fn describe_instance(&self, id: &str) -> Result<InstanceStatus, CloudError> {
        let output = self
            .call(&args(&["ec2", "describe-instances", "--instance-ids", id]))
            .await?;

        output
            .get("Reservations")
            .and_then(Value::as_array)
            .and_then(|r| r.first())
            .and_then(|r| r.get("Instances"))
            .and_then(Value::as_array)
            .and_then(|i| i.first())
            .ok_or_else(|| CloudError::Api(format!("instance {} not found", id)))
            .and_then(parse_instance)
    }
}

#[async_trait]
impl RegistryApi for AwsCli {
    async fn find_repository(&self, name: &str) -> Result<Option<String>, CloudError> {
        match self
            .run(&args(&["ecr", "describe-repositories", "--repository-names", name]))
            .await?
        {
            CliOutput::Success(stdout) => {
                let output: Value = serde_json::from_str(&stdout)
                    .map_err(|e| CloudError::Internal(format!("Invalid aws JSON output: {}", e)))?;
                Ok(output
                    .get("repositories")
                    .and_then(Value::as_array)
                    .and_then(|r| r.first())
                    .and_then(|r| str_field(r, "repositoryUri"))
                    .map(str::to_string))
            }
            CliOutput::Failure { stderr, .. } if stderr.contains("RepositoryNotFoundException") => {
                Ok(None)
            }
            CliOutput::Failure { code, stderr } => Err(CloudError::Api(format!(
                "aws exited with code {}: {}",
                code, stderr
            ))),
        }
    }

    async fn create_repository(&self, name: &str) -> Result<String, CloudError> {
        info!("Creating registry repository {}", name);
        let output = self
            .call(&args(&["ecr", "create-repository", "--repository-name", name]))
            .await?;

        output
            .get("repository")
            .and_then(|r| str_field(r, "repositoryUri"))
            .map(str::to_string)
            .ok_or_else(|| CloudError::Internal("create-repository returned no URI".to_string()))
    }

    async fn get_token(&self) -> Result<RegistryToken, CloudError> {
        // Plain text output; never logged
        match self.run(&args(&["ecr", "get-login-password"])).await? {
            CliOutput::Success(stdout) => {
                let stdout = Zeroizing::new(stdout);
                Ok(RegistryToken::new(
                    "AWS",
                    SecretString::from(stdout.trim()),
                    Utc::now() + ChronoDuration::hours(REGISTRY_TOKEN_TTL_HOURS),
                ))
            }
            CliOutput::Failure { code, .. } => Err(CloudError::Api(format!(
                "ecr get-login-password exited with code {}",
                code
            ))),
        }
    }
}
