use chrono::NaiveDateTime;
use rumqttc::{Publish, QoS};
use std::fmt;

const PREVIEW_CHARS: usize = 32;

/// A message ready to be handed to the broker
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutboundMessage {
    pub topic: String,
    pub payload: Vec<u8>,
    pub qos: QoS,
    pub retain: bool,
}

impl OutboundMessage {
    pub fn new(
        topic: impl Into<String>,
        payload: impl Into<Vec<u8>>,
        qos: QoS,
        retain: bool,
    ) -> Self {
        Self {
            topic: topic.into(),
            payload: payload.into(),
            qos,
            retain,
        }
    }
}

/// A message received from the broker, stamped on arrival
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InboundMessage {
    pub topic: String,
    pub payload: Vec<u8>,
    pub timestamp: NaiveDateTime,
}

impl InboundMessage {
    pub fn new(topic: impl Into<String>, payload: impl Into<Vec<u8>>) -> Self {
        InboundMessage {
            topic: topic.into(),
            payload: payload.into(),
            timestamp: chrono::Local::now().naive_local(),
        }
    }

    pub fn from_publish(publish: &Publish) -> Self {
        Self::new(publish.topic.clone(), publish.payload.to_vec())
    }

    pub fn preview(&self) -> String {
        let text = String::from_utf8_lossy(&self.payload);
        let mut preview: String = text.chars().take(PREVIEW_CHARS).collect();
        if text.chars().count() > PREVIEW_CHARS {
            preview.push('…');
        }
        preview
    }
}

impl fmt::Display for InboundMessage {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{} {} - {}", self.timestamp, self.topic, self.preview())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn preview_truncates_long_payloads() {
        let msg = InboundMessage::new("a/b", "x".repeat(100));
        assert_eq!(msg.preview().chars().count(), PREVIEW_CHARS + 1);
        assert!(msg.preview().ends_with('…'));
    }

    #[test]
    fn preview_keeps_short_payloads() {
        let msg = InboundMessage::new("a/b", "on");
        assert_eq!(msg.preview(), "on");
        assert!(msg.to_string().ends_with("a/b - on"));
    }
}
