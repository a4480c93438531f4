//! Node configuration file
//!
//! A single TOML file holds the broker settings and the node identity. A
//! default file is written on first start so it can be edited in place.

use crate::fabric::identity::{IdentityError, NodeIdentity, Role};
use crate::mqtt::config::MqttConfig;
use color_eyre::{eyre::eyre, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::{debug, info};

const CONFIG_DIR: &str = "mqtt-fabric";
const CONFIG_FILE: &str = "fabric.toml";

#[derive(Deserialize, Serialize, Clone, Debug, PartialEq, Eq)]
#[serde(default)]
pub struct NodeConfig {
    pub root_topic: String,
    /// Defaults to the hostname
    pub node_name: String,
    pub platform_id: String,
    /// `device` or `controller`
    pub role: String,
    pub actor_id: Option<String>,
    pub actor_platform_id: Option<String>,
    pub task_id: Option<String>,
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            root_topic: "fabric".to_string(),
            node_name: hostname::get()
                .ok()
                .and_then(|h| h.into_string().ok())
                .unwrap_or_else(|| "node".into()),
            platform_id: std::env::consts::OS.to_string(),
            role: Role::Device.to_string(),
            actor_id: None,
            actor_platform_id: None,
            task_id: None,
        }
    }
}

impl NodeConfig {
    /// Builds the immutable identity; fails on an unknown role
    pub fn identity(&self) -> Result<NodeIdentity, IdentityError> {
        let role: Role = self.role.parse()?;
        let mut identity = NodeIdentity::new(
            self.root_topic.clone(),
            self.node_name.clone(),
            self.platform_id.clone(),
            role,
        );
        if self.actor_id.is_some() || self.actor_platform_id.is_some() {
            let actor_id = self
                .actor_id
                .clone()
                .unwrap_or_else(|| identity.actor_id().to_string());
            let actor_platform_id = self
                .actor_platform_id
                .clone()
                .unwrap_or_else(|| identity.actor_platform_id().to_string());
            identity = identity.with_actor(actor_id, actor_platform_id);
        }
        if let Some(task_id) = &self.task_id {
            identity = identity.with_task_id(task_id.clone());
        }
        Ok(identity)
    }
}

#[derive(Deserialize, Serialize, Clone, Debug, Default, PartialEq, Eq)]
#[serde(default)]
pub struct FabricConfig {
    /// Extra raw filters subscribed on every connect
    pub subscriptions: Vec<String>,
    pub broker: MqttConfig,
    pub node: NodeConfig,
}

impl FabricConfig {
    pub fn default_path() -> Result<PathBuf> {
        let mut path = dirs::config_dir().ok_or_else(|| eyre!("No config directory available"))?;
        path.push(CONFIG_DIR);
        path.push(CONFIG_FILE);
        Ok(path)
    }

    pub async fn load(path: &Path) -> Result<Self> {
        let content = tokio::fs::read_to_string(path)
            .await
            .map_err(|e| eyre!("Failed to read config file {}: {}", path.display(), e))?;
        let config = toml::from_str(&content)
            .map_err(|e| eyre!("Failed to parse config file {}: {}", path.display(), e))?;
        debug!("Loaded configuration from {}", path.display());
        Ok(config)
    }

    pub async fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| eyre!("Failed to create config directory: {}", e))?;
        }
        let content = toml::to_string_pretty(self)
            .map_err(|e| eyre!("Failed to serialize config: {}", e))?;
        tokio::fs::write(path, content)
            .await
            .map_err(|e| eyre!("Failed to write config file: {}", e))?;
        Ok(())
    }

    /// Loads the file, writing the defaults first if it does not exist
    pub async fn load_or_create(path: &Path) -> Result<Self> {
        let exists = tokio::fs::try_exists(path)
            .await
            .map_err(|e| eyre!("Failed to check if config file exists: {}", e))?;
        if !exists {
            info!("No configuration at {}, writing defaults", path.display());
            Self::default().save(path).await?;
        }
        Self::load(path).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[tokio::test]
    async fn load_or_create_writes_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join(CONFIG_FILE);

        let created = FabricConfig::load_or_create(&path).await.unwrap();
        assert!(path.exists());
        assert_eq!(created, FabricConfig::default());

        let reloaded = FabricConfig::load(&path).await.unwrap();
        assert_eq!(reloaded, created);
    }

    #[test]
    fn identity_from_toml() {
        let config: FabricConfig = toml::from_str(
            r#"
            subscriptions = ["other/+/status"]

            [broker]
            host = "broker.lan"

            [node]
            root_topic = "home"
            node_name = "hub"
            platform_id = "linux"
            role = "controller"
            actor_id = "scheduler"
            "#,
        )
        .unwrap();

        let identity = config.node.identity().unwrap();
        assert_eq!(identity.role(), Role::Controller);
        assert_eq!(identity.actor_id(), "scheduler");
        assert_eq!(identity.actor_platform_id(), "linux");
        assert_eq!(config.broker.host, "broker.lan");
        assert_eq!(config.subscriptions, vec!["other/+/status"]);
    }

    #[test]
    fn unknown_role_fails_identity() {
        let node = NodeConfig {
            role: "gateway".into(),
            ..Default::default()
        };
        assert_eq!(
            node.identity(),
            Err(IdentityError::UnknownRole("gateway".into()))
        );
    }
}
