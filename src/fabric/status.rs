//! Status protocol
//!
//! Every node announces itself on its own `status` command topic: `online`
//! after connecting, `offline` before a graceful disconnect and `disconnected`
//! as the last will the broker publishes for it. Status messages are always
//! retained and sent with the highest QoS.

use super::envelope::{envelope_body, EnvelopeError, TYPE_KEY};
use super::error::FabricError;
use super::identity::NodeIdentity;
use super::topic::{build_command_topic, CMD_STATUS};
use crate::mqtt::message_manager::OutboundMessage;
use rumqttc::QoS;
use serde::{Deserialize, Serialize};
use serde_json::Value;

pub const STATUS_TYPE: &str = "status";
pub const STATUS_QOS: QoS = QoS::ExactlyOnce;

const REQUIRED_FIELDS: [&str; 5] = [TYPE_KEY, "status", "nodename", "platform_id", "class"];

/// Connectivity state announced by a node
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FabricStatus {
    Online { uptime_secs: i64 },
    Offline { uptime_secs: i64 },
    Disconnected,
}

impl FabricStatus {
    pub fn label(&self) -> &'static str {
        match self {
            FabricStatus::Online { .. } => "online",
            FabricStatus::Offline { .. } => "offline",
            FabricStatus::Disconnected => "disconnected",
        }
    }

    pub fn uptime_secs(&self) -> Option<i64> {
        match self {
            FabricStatus::Online { uptime_secs } | FabricStatus::Offline { uptime_secs } => {
                Some(*uptime_secs)
            }
            FabricStatus::Disconnected => None,
        }
    }
}

/// Body of a status message as it appears on the wire
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusReport {
    #[serde(rename = "_type")]
    pub kind: String,
    pub status: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub uptime: Option<i64>,
    pub nodename: String,
    pub platform_id: String,
    pub class: String,
}

impl StatusReport {
    pub fn is_online(&self) -> bool {
        self.status == "online"
    }
}

#[derive(Debug, Serialize)]
struct StatusEnvelope {
    d: StatusReport,
}

/// Builds the retained status message for `identity`
pub fn build_status_message(
    identity: &NodeIdentity,
    status: FabricStatus,
) -> Result<OutboundMessage, FabricError> {
    let envelope = StatusEnvelope {
        d: StatusReport {
            kind: STATUS_TYPE.to_string(),
            status: status.label().to_string(),
            uptime: status.uptime_secs(),
            nodename: identity.node_name().to_string(),
            platform_id: identity.platform_id().to_string(),
            class: identity.role().class_label().to_string(),
        },
    };

    let payload = serde_json::to_vec(&envelope)?;
    Ok(OutboundMessage::new(
        build_command_topic(identity, CMD_STATUS),
        payload,
        STATUS_QOS,
        true,
    ))
}

/// Decodes a status message received from another node. `uptime` is optional
/// and may be `null`; every other field must be a string.
pub fn parse_status_message(payload: &[u8]) -> Result<StatusReport, EnvelopeError> {
    let body = envelope_body(payload)?;

    let missing: Vec<&'static str> = REQUIRED_FIELDS
        .into_iter()
        .filter(|key| !body.get(*key).is_some_and(Value::is_string))
        .collect();
    if !missing.is_empty() {
        return Err(EnvelopeError::MissingFields(missing));
    }

    serde_json::from_value(Value::Object(body)).map_err(|_| EnvelopeError::MalformedEnvelope)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fabric::identity::Role;
    use pretty_assertions::assert_eq;

    fn body(msg: &OutboundMessage) -> String {
        String::from_utf8(msg.payload.clone()).unwrap()
    }

    #[test]
    fn online_status_carries_uptime() {
        let id = NodeIdentity::new("home", "kitchen", "esp8266", Role::Device);
        let msg = build_status_message(&id, FabricStatus::Online { uptime_secs: 42 }).unwrap();

        assert_eq!(msg.topic, "home/kitchen/$commands/$clients/sysctl/esp8266/status");
        assert_eq!(msg.qos, QoS::ExactlyOnce);
        assert!(msg.retain);
        assert_eq!(
            body(&msg),
            r#"{"d":{"_type":"status","status":"online","uptime":42,"nodename":"kitchen","platform_id":"esp8266","class":"device"}}"#
        );
    }

    #[test]
    fn disconnected_status_omits_uptime() {
        let id = NodeIdentity::new("home", "hub", "linux", Role::Controller);
        let msg = build_status_message(&id, FabricStatus::Disconnected).unwrap();
        let text = body(&msg);

        assert!(!text.contains("uptime"));
        assert!(text.contains(r#""status":"disconnected""#));
        assert!(text.contains(r#""class":"controller""#));
    }

    #[test]
    fn offline_status_round_trips_through_parser() {
        let id = NodeIdentity::new("home", "hub", "linux", Role::Controller);
        let msg = build_status_message(&id, FabricStatus::Offline { uptime_secs: 3600 }).unwrap();
        let report = parse_status_message(&msg.payload).unwrap();

        assert_eq!(report.status, "offline");
        assert_eq!(report.uptime, Some(3600));
        assert_eq!(report.nodename, "hub");
        assert!(!report.is_online());
    }

    #[test]
    fn null_uptime_is_accepted() {
        let report = parse_status_message(
            br#"{"d":{"_type":"status","status":"disconnected","uptime":null,"nodename":"n","platform_id":"p","class":"device"}}"#,
        )
        .unwrap();
        assert_eq!(report.uptime, None);
    }

    #[test]
    fn incomplete_status_reports_missing_fields() {
        let err = parse_status_message(br#"{"d":{"_type":"status","status":"online","class":7}}"#)
            .unwrap_err();
        assert!(matches!(
            err,
            EnvelopeError::MissingFields(ref f) if f == &vec!["nodename", "platform_id", "class"]
        ));
    }

    #[test]
    fn malformed_status_payloads() {
        assert!(matches!(
            parse_status_message(b"offline"),
            Err(EnvelopeError::MalformedTopLevel(_))
        ));
        assert!(matches!(
            parse_status_message(br#"{"d":[]}"#),
            Err(EnvelopeError::MalformedEnvelope)
        ));
        assert!(matches!(
            parse_status_message(
                br#"{"d":{"_type":"status","status":"online","uptime":"long","nodename":"n","platform_id":"p","class":"device"}}"#
            ),
            Err(EnvelopeError::MalformedEnvelope)
        ));
    }
}
