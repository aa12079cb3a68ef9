//! Immutable version records.
//!
//! A version describes everything needed to launch one instance of an
//! application: image, resources, ports, health checking, placement
//! constraint, and the instance count. Versions never change after
//! construction; updates install a new version next to the old one.

use std::collections::BTreeMap;
use std::sync::Arc;

use osprey_id::VersionId;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::constraint::{compile, Constraint};
use crate::error::ManagerError;
use crate::offer::Resources;

/// Transport protocol of a mapped port.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Protocol {
    Tcp,
    Udp,
}

/// A container port exposed by the application.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PortMapping {
    /// Optional human name (`web`, `admin`); used by health checks.
    pub name: Option<String>,
    pub container_port: u16,
    pub protocol: Protocol,
}

/// HTTP health check specification.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HealthCheck {
    pub path: String,
    /// Index into the version's port mappings.
    pub port_index: usize,
    pub grace_seconds: u64,
    pub interval_seconds: u64,
    pub max_consecutive_failures: u32,
}

/// An immutable launch description.
#[derive(Debug, Clone)]
pub struct Version {
    pub id: VersionId,
    pub image: String,
    pub command: Option<String>,
    pub args: Vec<String>,
    pub env: BTreeMap<String, String>,
    pub resources: Resources,
    pub port_mappings: Vec<PortMapping>,
    pub health_check: Option<HealthCheck>,
    /// Raw constraint expression, if any.
    pub constraint: Option<String>,
    pub instances: u32,
    /// Routing weight propagated to targets.
    pub weight: f64,

    constraint_ast: Option<Constraint>,
}

impl Version {
    pub fn builder() -> VersionBuilder {
        VersionBuilder::default()
    }

    /// The compiled constraint, if the version has one.
    pub fn constraint_ast(&self) -> Option<&Constraint> {
        self.constraint_ast.as_ref()
    }

    /// A short content digest over everything that affects a launch.
    ///
    /// Two versions with equal digests launch identical tasks; the digest is
    /// what rolling update uses to tell old slots from converted ones.
    pub fn digest(&self) -> String {
        let mut hasher = Sha256::new();
        hasher.update(self.image.as_bytes());
        hasher.update(b":");
        hasher.update(self.command.as_deref().unwrap_or("").as_bytes());
        for arg in &self.args {
            hasher.update(b":");
            hasher.update(arg.as_bytes());
        }
        for (key, value) in &self.env {
            hasher.update(b":");
            hasher.update(key.as_bytes());
            hasher.update(b"=");
            hasher.update(value.as_bytes());
        }
        hasher.update(format!(
            ":{}:{}:{}:{}",
            self.resources.cpus, self.resources.mem, self.resources.disk, self.resources.gpus
        ));
        for mapping in &self.port_mappings {
            hasher.update(format!(
                ":{}/{:?}",
                mapping.container_port, mapping.protocol
            ));
        }
        hasher.update(b":");
        hasher.update(self.constraint.as_deref().unwrap_or("").as_bytes());
        hasher.update(format!(":{}:{}", self.instances, self.weight));
        format!("{:x}", hasher.finalize())[..16].to_string()
    }
}

/// Builder for constructing validated versions.
#[derive(Debug, Default)]
pub struct VersionBuilder {
    image: Option<String>,
    command: Option<String>,
    args: Vec<String>,
    env: BTreeMap<String, String>,
    resources: Resources,
    port_mappings: Vec<PortMapping>,
    health_check: Option<HealthCheck>,
    constraint: Option<String>,
    instances: u32,
    weight: Option<f64>,
}

impl VersionBuilder {
    pub fn image(mut self, image: impl Into<String>) -> Self {
        self.image = Some(image.into());
        self
    }

    pub fn command(mut self, command: impl Into<String>) -> Self {
        self.command = Some(command.into());
        self
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.insert(key.into(), value.into());
        self
    }

    pub fn resources(mut self, resources: Resources) -> Self {
        self.resources = resources;
        self
    }

    pub fn port(mut self, name: Option<&str>, container_port: u16, protocol: Protocol) -> Self {
        self.port_mappings.push(PortMapping {
            name: name.map(str::to_string),
            container_port,
            protocol,
        });
        self
    }

    pub fn health_check(mut self, check: HealthCheck) -> Self {
        self.health_check = Some(check);
        self
    }

    pub fn constraint(mut self, expression: impl Into<String>) -> Self {
        self.constraint = Some(expression.into());
        self
    }

    pub fn instances(mut self, instances: u32) -> Self {
        self.instances = instances;
        self
    }

    pub fn weight(mut self, weight: f64) -> Self {
        self.weight = Some(weight);
        self
    }

    /// Validates and freezes the version.
    pub fn build(self) -> Result<Arc<Version>, ManagerError> {
        let image = self
            .image
            .filter(|i| !i.is_empty())
            .ok_or_else(|| ManagerError::InvalidSpec("image is required".to_string()))?;

        if self.instances == 0 {
            return Err(ManagerError::InvalidSpec(
                "instance count must be at least 1".to_string(),
            ));
        }
        if self.resources.cpus < 0.0
            || self.resources.mem < 0.0
            || self.resources.disk < 0.0
            || self.resources.gpus < 0.0
        {
            return Err(ManagerError::InvalidSpec(
                "resource requests must be non-negative".to_string(),
            ));
        }
        if let Some(check) = &self.health_check {
            if check.port_index >= self.port_mappings.len() {
                return Err(ManagerError::InvalidSpec(format!(
                    "health check references port index {} but only {} ports are mapped",
                    check.port_index,
                    self.port_mappings.len()
                )));
            }
        }

        let weight = self.weight.unwrap_or(100.0);
        if weight < 0.0 {
            return Err(ManagerError::InvalidSpec(
                "weight must be non-negative".to_string(),
            ));
        }

        let constraint_ast = match &self.constraint {
            Some(text) => Some(compile(text)?),
            None => None,
        };

        Ok(Arc::new(Version {
            id: VersionId::new(),
            image,
            command: self.command,
            args: self.args,
            env: self.env,
            resources: self.resources,
            port_mappings: self.port_mappings,
            health_check: self.health_check,
            constraint: self.constraint,
            instances: self.instances,
            weight,
            constraint_ast,
        }))
    }
}
