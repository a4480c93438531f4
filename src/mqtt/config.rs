use chrono::Timelike;
use serde::{Deserialize, Serialize};

/// Broker connection settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MqttConfig {
    pub host: String,
    pub port: u16,
    pub keep_alive_secs: u64,
    pub username: Option<String>,
    pub password: Option<String>,
    /// Client id prefix; the hostname when unset
    pub client_id_prefix: Option<String>,
    /// Capacity of the client request channel
    pub request_capacity: usize,
    pub reconnect_delay_ms: u64,
}

impl Default for MqttConfig {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            port: 1883,
            keep_alive_secs: 30,
            username: None,
            password: None,
            client_id_prefix: None,
            request_capacity: 100,
            reconnect_delay_ms: 1000,
        }
    }
}

impl MqttConfig {
    /// Prefix followed by the current second, e.g. `kitchen-pi37`
    pub fn client_id(&self) -> String {
        let prefix = self.client_id_prefix.clone().unwrap_or_else(|| {
            hostname::get()
                .ok()
                .and_then(|h| h.into_string().ok())
                .unwrap_or_else(|| "mqtt-fabric".into())
        });
        format!("{}{}", prefix, chrono::Local::now().second())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn client_id_uses_prefix_and_second() {
        let config = MqttConfig {
            client_id_prefix: Some("bench".into()),
            ..Default::default()
        };
        let id = config.client_id();
        let suffix = id.strip_prefix("bench").unwrap();
        let second: u32 = suffix.parse().unwrap();
        assert!(second < 60);
    }

    #[test]
    fn partial_toml_falls_back_to_defaults() {
        let config: MqttConfig = toml::from_str("host = \"broker.lan\"").unwrap();
        assert_eq!(config.host, "broker.lan");
        assert_eq!(config.port, 1883);
        assert_eq!(config.request_capacity, 100);
    }
}
