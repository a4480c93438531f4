//! Node identity and role
//!
//! Every process runs exactly one fabric node. Its identity is fixed at startup
//! and shared read-only with the dispatcher and the transport.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Default task id used when the configuration does not name one
pub const DEFAULT_TASK_ID: &str = "task_id";

/// Errors raised while building an identity from configuration
#[derive(Debug, Error, PartialEq, Eq)]
pub enum IdentityError {
    /// The role string or class code is neither device nor controller
    #[error("Unknown node role: {0}")]
    UnknownRole(String),
}

/// Whether a node produces data (device) or consumes it and issues tasks (controller)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Device,
    Controller,
}

impl Role {
    /// Value of the `class` field in status messages
    pub fn class_label(self) -> &'static str {
        match self {
            Role::Device => "device",
            Role::Controller => "controller",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.class_label())
    }
}

impl FromStr for Role {
    type Err = IdentityError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "device" => Ok(Role::Device),
            "controller" => Ok(Role::Controller),
            other => Err(IdentityError::UnknownRole(other.to_string())),
        }
    }
}

// Legacy numeric class codes
impl TryFrom<u8> for Role {
    type Error = IdentityError;

    fn try_from(code: u8) -> Result<Self, Self::Error> {
        match code {
            1 => Ok(Role::Device),
            2 => Ok(Role::Controller),
            other => Err(IdentityError::UnknownRole(other.to_string())),
        }
    }
}

/// Immutable identity of the local node
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeIdentity {
    root_topic: String,
    node_name: String,
    platform_id: String,
    actor_id: String,
    actor_platform_id: String,
    task_id: String,
    role: Role,
}

impl NodeIdentity {
    /// Creates an identity acting under its own name and platform
    pub fn new(
        root_topic: impl Into<String>,
        node_name: impl Into<String>,
        platform_id: impl Into<String>,
        role: Role,
    ) -> Self {
        let node_name = node_name.into();
        let platform_id = platform_id.into();
        Self {
            root_topic: root_topic.into(),
            actor_id: node_name.clone(),
            actor_platform_id: platform_id.clone(),
            node_name,
            platform_id,
            task_id: DEFAULT_TASK_ID.to_string(),
            role,
        }
    }

    pub fn with_actor(
        mut self,
        actor_id: impl Into<String>,
        actor_platform_id: impl Into<String>,
    ) -> Self {
        self.actor_id = actor_id.into();
        self.actor_platform_id = actor_platform_id.into();
        self
    }

    pub fn with_task_id(mut self, task_id: impl Into<String>) -> Self {
        self.task_id = task_id.into();
        self
    }

    pub fn root_topic(&self) -> &str {
        &self.root_topic
    }

    pub fn node_name(&self) -> &str {
        &self.node_name
    }

    pub fn platform_id(&self) -> &str {
        &self.platform_id
    }

    pub fn actor_id(&self) -> &str {
        &self.actor_id
    }

    pub fn actor_platform_id(&self) -> &str {
        &self.actor_platform_id
    }

    pub fn task_id(&self) -> &str {
        &self.task_id
    }

    pub fn role(&self) -> Role {
        self.role
    }
}
