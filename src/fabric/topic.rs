//! Topic model
//!
//! All routing metadata lives in the topic path. Three shapes exist:
//!
//! ```text
//! command  {root}/{node}/$commands/$clients/{sys}/{platform}/{cmd}
//! onramp   {root}/{node}/$feeds/$onramp/{platform}/{service}/{feed}
//! offramp  {root}/{node}/$feeds/$offramp/{actor}/{actor_platform}/{task}/{platform}/{service}/{feed}
//! ```
//!
//! Segment order and the `$`-marker literals are wire format shared with
//! deployed nodes and must not change. The root is a single segment and may be
//! empty.

use super::identity::NodeIdentity;
use std::fmt;
use thiserror::Error;

pub const SEPARATOR: char = '/';

/// MQTT single-level wildcard
pub const TOPIC_ANY: &str = "+";
pub const NODENAME_BROADCAST: &str = "broadcast";

pub const MARKER_COMMANDS: &str = "$commands";
pub const MARKER_CLIENTS: &str = "$clients";
pub const MARKER_FEEDS: &str = "$feeds";
pub const MARKER_ONRAMP: &str = "$onramp";
pub const MARKER_OFFRAMP: &str = "$offramp";

/// `sys` segment of command topics published by the fabric itself
pub const FABRIC_SYS: &str = "sysctl";
pub const CMD_STATUS: &str = "status";

pub const PLATFORM_ID_CHRONOS: &str = "chronos";

pub const SERVICE_ID_DIGITAL: &str = "digital";
pub const SERVICE_ID_DIGITAL_IN: &str = "digital_in";
pub const SERVICE_ID_DIGITAL_OUT: &str = "digital_out";
pub const SERVICE_ID_ANALOG: &str = "analog";
pub const SERVICE_ID_ANALOG_IN: &str = "analog_in";
pub const SERVICE_ID_ANALOG_OUT: &str = "analog_out";
pub const SERVICE_ID_TIME: &str = "time";
pub const SERVICE_ID_TEXT: &str = "text";

pub const TASK_ID_DIGITAL_WRITE_MOMENTARY: &str = "digital_write_momentary";
pub const TASK_ID_DIGITAL_WRITE_MOMENTARY_EX: &str = "digital_write_momentary_ex";
pub const TASK_ID_DIGITAL_WRITE: &str = "digital_write";
pub const TASK_ID_DIGITAL_WRITE_EX: &str = "digital_write_ex";
pub const TASK_ID_ANALOG_WRITE: &str = "analog_write";
pub const TASK_ID_ANALOG_WRITE_EX: &str = "analog_write_ex";
pub const TASK_ID_RAW: &str = "raw";

pub const FEED_ID_SECONDS: &str = "seconds";

const COMMAND_SEGMENTS: usize = 7;
const ONRAMP_SEGMENTS: usize = 7;
const OFFRAMP_SEGMENTS: usize = 10;

/// Why a topic could not be classified. Every variant means "unrecognized":
/// the message is dropped, never dispatched.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum TopicParseError {
    #[error("Topic has {0} segments, at least {min} required", min = COMMAND_SEGMENTS)]
    TooShort(usize),

    #[error("Unknown topic kind '{0}'")]
    UnknownKind(String),

    #[error("Unknown command scope '{0}'")]
    UnknownScope(String),

    #[error("Unknown feed direction '{0}'")]
    UnknownDirection(String),

    #[error("{kind} topic needs {expected} segments, found {found}")]
    SegmentCount {
        kind: &'static str,
        expected: usize,
        found: usize,
    },
}

/// Fields of a command topic. The `sys` segment carries the actor id.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandRoute {
    pub root: String,
    pub node_name: String,
    pub actor_id: String,
    pub platform_id: String,
    pub cmd: String,
}

/// Fields of an onramp (device to fabric) topic
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OnrampRoute {
    pub root: String,
    pub node_name: String,
    pub platform_id: String,
    pub service_id: String,
    pub feed_id: String,
}

/// Fields of an offramp (fabric to device) topic
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OfframpRoute {
    pub root: String,
    pub node_name: String,
    pub actor_id: String,
    pub actor_platform_id: String,
    pub task_id: String,
    pub platform_id: String,
    pub service_id: String,
    pub feed_id: String,
}

/// A classified topic
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TopicPath {
    Command(CommandRoute),
    Onramp(OnrampRoute),
    Offramp(OfframpRoute),
}

impl TopicPath {
    pub fn node_name(&self) -> &str {
        match self {
            TopicPath::Command(route) => &route.node_name,
            TopicPath::Onramp(route) => &route.node_name,
            TopicPath::Offramp(route) => &route.node_name,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            TopicPath::Command(_) => "command",
            TopicPath::Onramp(_) => "onramp",
            TopicPath::Offramp(_) => "offramp",
        }
    }
}

fn join(segments: &[&str]) -> String {
    segments.join("/")
}

impl fmt::Display for CommandRoute {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(&join(&[
            &self.root,
            &self.node_name,
            MARKER_COMMANDS,
            MARKER_CLIENTS,
            &self.actor_id,
            &self.platform_id,
            &self.cmd,
        ]))
    }
}

impl fmt::Display for OnrampRoute {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(&join(&[
            &self.root,
            &self.node_name,
            MARKER_FEEDS,
            MARKER_ONRAMP,
            &self.platform_id,
            &self.service_id,
            &self.feed_id,
        ]))
    }
}

impl fmt::Display for OfframpRoute {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(&join(&[
            &self.root,
            &self.node_name,
            MARKER_FEEDS,
            MARKER_OFFRAMP,
            &self.actor_id,
            &self.actor_platform_id,
            &self.task_id,
            &self.platform_id,
            &self.service_id,
            &self.feed_id,
        ]))
    }
}

impl fmt::Display for TopicPath {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            TopicPath::Command(route) => route.fmt(f),
            TopicPath::Onramp(route) => route.fmt(f),
            TopicPath::Offramp(route) => route.fmt(f),
        }
    }
}

/// Topic a device publishes its own feed data on
pub fn build_onramp_topic(identity: &NodeIdentity, service_id: &str, feed_id: &str) -> String {
    build_onramp_subscription(
        identity,
        identity.node_name(),
        identity.platform_id(),
        service_id,
        feed_id,
    )
}

/// Topic a controller publishes on to reach a device's offramp
pub fn build_offramp_topic(
    identity: &NodeIdentity,
    node_name: &str,
    task_id: &str,
    platform_id: &str,
    service_id: &str,
    feed_id: &str,
) -> String {
    build_offramp_subscription(
        identity,
        node_name,
        identity.actor_id(),
        identity.actor_platform_id(),
        task_id,
        platform_id,
        service_id,
        feed_id,
    )
}

/// Filter a device subscribes to for tasks addressed to it. Any argument may be
/// [`TOPIC_ANY`].
#[allow(clippy::too_many_arguments)]
pub fn build_offramp_subscription(
    identity: &NodeIdentity,
    node_name: &str,
    actor_id: &str,
    actor_platform_id: &str,
    task_id: &str,
    platform_id: &str,
    service_id: &str,
    feed_id: &str,
) -> String {
    join(&[
        identity.root_topic(),
        node_name,
        MARKER_FEEDS,
        MARKER_OFFRAMP,
        actor_id,
        actor_platform_id,
        task_id,
        platform_id,
        service_id,
        feed_id,
    ])
}

/// Filter a controller subscribes to for device telemetry. Any argument may be
/// [`TOPIC_ANY`].
pub fn build_onramp_subscription(
    identity: &NodeIdentity,
    node_name: &str,
    platform_id: &str,
    service_id: &str,
    feed_id: &str,
) -> String {
    join(&[
        identity.root_topic(),
        node_name,
        MARKER_FEEDS,
        MARKER_ONRAMP,
        platform_id,
        service_id,
        feed_id,
    ])
}

/// Command topic of the local node, issued under the fabric `sys` segment
pub fn build_command_topic(identity: &NodeIdentity, cmd: &str) -> String {
    join(&[
        identity.root_topic(),
        identity.node_name(),
        MARKER_COMMANDS,
        MARKER_CLIENTS,
        FABRIC_SYS,
        identity.platform_id(),
        cmd,
    ])
}

/// Filter for the status messages of `node_name` (or every node with [`TOPIC_ANY`])
pub fn build_status_subscription(identity: &NodeIdentity, node_name: &str) -> String {
    join(&[
        identity.root_topic(),
        node_name,
        MARKER_COMMANDS,
        MARKER_CLIENTS,
        FABRIC_SYS,
        TOPIC_ANY,
        CMD_STATUS,
    ])
}

fn expect_len(
    kind: &'static str,
    segments: &[&str],
    expected: usize,
) -> Result<(), TopicParseError> {
    if segments.len() == expected {
        Ok(())
    } else {
        Err(TopicParseError::SegmentCount {
            kind,
            expected,
            found: segments.len(),
        })
    }
}

/// Classifies a topic string. Never panics; anything that does not match one
/// of the three shapes exactly is an error.
pub fn parse_topic(topic: &str) -> Result<TopicPath, TopicParseError> {
    let segments: Vec<&str> = topic.split(SEPARATOR).collect();
    if segments.len() < COMMAND_SEGMENTS {
        return Err(TopicParseError::TooShort(segments.len()));
    }

    let owned = |i: usize| segments[i].to_string();

    match segments[2] {
        MARKER_COMMANDS => {
            if segments[3] != MARKER_CLIENTS {
                return Err(TopicParseError::UnknownScope(owned(3)));
            }
            expect_len("command", &segments, COMMAND_SEGMENTS)?;
            Ok(TopicPath::Command(CommandRoute {
                root: owned(0),
                node_name: owned(1),
                actor_id: owned(4),
                platform_id: owned(5),
                cmd: owned(6),
            }))
        }
        MARKER_FEEDS => match segments[3] {
            MARKER_ONRAMP => {
                expect_len("onramp", &segments, ONRAMP_SEGMENTS)?;
                Ok(TopicPath::Onramp(OnrampRoute {
                    root: owned(0),
                    node_name: owned(1),
                    platform_id: owned(4),
                    service_id: owned(5),
                    feed_id: owned(6),
                }))
            }
            MARKER_OFFRAMP => {
                expect_len("offramp", &segments, OFFRAMP_SEGMENTS)?;
                Ok(TopicPath::Offramp(OfframpRoute {
                    root: owned(0),
                    node_name: owned(1),
                    actor_id: owned(4),
                    actor_platform_id: owned(5),
                    task_id: owned(6),
                    platform_id: owned(7),
                    service_id: owned(8),
                    feed_id: owned(9),
                }))
            }
            _ => Err(TopicParseError::UnknownDirection(owned(3))),
        },
        _ => Err(TopicParseError::UnknownKind(owned(2))),
    }
}
