//! Fabric node lifecycle on top of rumqttc
//!
//! ```text
//! Configured ──start()──► Running ──run_until_shutdown()──► Stopped
//! ```
//!
//! While running, every ConnAck publishes a retained `online` status and fires
//! the on-connect hook (where subscriptions belong, since the session is clean).
//! Connection errors fire the on-disconnect hook once and the event loop keeps
//! polling, which makes rumqttc reconnect. Shutdown publishes `offline` before
//! disconnecting. The broker publishes the `disconnected` last will if the
//! process dies without a clean shutdown.

use super::config::MqttConfig;
use super::message_manager::{InboundMessage, OutboundMessage};
use crate::fabric::dispatcher::{panic_message, Dispatcher};
use crate::fabric::envelope::ValueEnvelope;
use crate::fabric::error::FabricError;
use crate::fabric::identity::{NodeIdentity, Role};
use crate::fabric::status::{build_status_message, FabricStatus};
use crate::fabric::topic::{
    build_offramp_subscription, build_offramp_topic, build_onramp_subscription,
    build_onramp_topic, build_status_subscription, SERVICE_ID_TEXT, TASK_ID_RAW, TOPIC_ANY,
};
use chrono::{DateTime, Local};
use rumqttc::{AsyncClient, Event, EventLoop, LastWill, MqttOptions, Outgoing, Packet, QoS};
use statum::{machine, state};
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

const MAX_ERROR_MESSAGES: usize = 20;
const SHUTDOWN_DRAIN_TIMEOUT: Duration = Duration::from_secs(2);

#[derive(Debug, thiserror::Error)]
pub enum MqttError {
    #[error("Client request failed: {0}")]
    Client(#[from] rumqttc::ClientError),

    #[error("Fabric error: {0}")]
    Fabric(#[from] FabricError),

    #[error("Invalid broker configuration: {0}")]
    Config(String),

    #[error("Node has not been started")]
    NotStarted,
}

#[derive(Clone, Default, Debug, PartialEq, Eq)]
pub enum ConnectionState {
    #[default]
    Disconnected,
    Connecting,
    Connected,
    Reconnecting,
}

#[derive(Clone, Debug, Default)]
pub struct MqttStatus {
    pub connection_state: ConnectionState,
    pub error_messages: Vec<String>,
    pub messages_received: usize,
    pub messages_sent: usize,
    pub last_activity: Option<DateTime<Local>>,
}

impl MqttStatus {
    fn record_error(&mut self, message: String) {
        if self.error_messages.len() >= MAX_ERROR_MESSAGES {
            self.error_messages.remove(0);
        }
        self.error_messages.push(message);
    }
}

/// Lifecycle callback receiving a handle to the live client
pub type LifecycleHook = Arc<dyn Fn(&FabricPublisher) + Send + Sync>;

/// Cheap, cloneable publishing handle bound to the local identity
#[derive(Clone)]
pub struct FabricPublisher {
    client: AsyncClient,
    identity: Arc<NodeIdentity>,
}

impl FabricPublisher {
    pub fn new(client: AsyncClient, identity: Arc<NodeIdentity>) -> Self {
        Self { client, identity }
    }

    pub fn identity(&self) -> &NodeIdentity {
        &self.identity
    }

    /// Queues a message without waiting for channel capacity
    pub fn publish(&self, message: OutboundMessage) -> Result<(), MqttError> {
        debug!("Publishing to {}", message.topic);
        self.client
            .try_publish(message.topic, message.qos, message.retain, message.payload)?;
        Ok(())
    }

    /// Queues a message, waiting for channel capacity
    pub async fn publish_async(&self, message: OutboundMessage) -> Result<(), MqttError> {
        debug!("Publishing to {}", message.topic);
        self.client
            .publish(message.topic, message.qos, message.retain, message.payload)
            .await?;
        Ok(())
    }

    pub fn subscribe(&self, filter: &str, qos: QoS) -> Result<(), MqttError> {
        info!("Subscribing to {}", filter);
        self.client.try_subscribe(filter, qos)?;
        Ok(())
    }

    pub fn publish_status(&self, status: FabricStatus) -> Result<(), MqttError> {
        self.publish(build_status_message(&self.identity, status)?)
    }

    /// Subscribes to what the local role consumes: its own offramp for a
    /// device, every onramp and every status topic for a controller
    pub fn subscribe_role_defaults(&self) -> Result<(), MqttError> {
        let id = &self.identity;
        match id.role() {
            Role::Device => self.subscribe(
                &build_offramp_subscription(
                    id,
                    id.node_name(),
                    TOPIC_ANY,
                    TOPIC_ANY,
                    TOPIC_ANY,
                    id.platform_id(),
                    TOPIC_ANY,
                    TOPIC_ANY,
                ),
                QoS::AtLeastOnce,
            ),
            Role::Controller => {
                self.subscribe(
                    &build_onramp_subscription(id, TOPIC_ANY, TOPIC_ANY, TOPIC_ANY, TOPIC_ANY),
                    QoS::AtLeastOnce,
                )?;
                self.subscribe(&build_status_subscription(id, TOPIC_ANY), QoS::AtLeastOnce)
            }
        }
    }

    /// Publishes text on the local onramp `text` service
    pub fn device_pub_text(
        &self,
        feed_id: &str,
        text: &str,
        qos: QoS,
        retain: bool,
    ) -> Result<(), MqttError> {
        let topic = build_onramp_topic(&self.identity, SERVICE_ID_TEXT, feed_id);
        let payload = ValueEnvelope::text(feed_id, text)
            .to_json()
            .map_err(FabricError::from)?;
        self.publish(OutboundMessage::new(topic, payload, qos, retain))
    }

    /// Sends text to a device's offramp `text` service as a raw task
    pub fn ctrl_pub_text(
        &self,
        node_name: &str,
        platform_id: &str,
        feed_id: &str,
        text: &str,
        qos: QoS,
        retain: bool,
    ) -> Result<(), MqttError> {
        let topic = build_offramp_topic(
            &self.identity,
            node_name,
            TASK_ID_RAW,
            platform_id,
            SERVICE_ID_TEXT,
            feed_id,
        );
        let payload = ValueEnvelope::text(feed_id, text)
            .to_json()
            .map_err(FabricError::from)?;
        self.publish(OutboundMessage::new(topic, payload, qos, retain))
    }
}

#[state]
#[derive(Debug, Clone)]
pub enum FabricNodeState {
    Configured, // Options and last will built, no client yet
    Running,    // Client created, event loop owned by the node
    Stopped,    // Offline status sent, connection closed
}

#[machine]
pub struct FabricNode<S: FabricNodeState> {
    identity: Arc<NodeIdentity>,
    dispatcher: Arc<Dispatcher>,
    options: MqttOptions,
    last_will: OutboundMessage,
    request_capacity: usize,
    reconnect_delay: Duration,
    started_at: DateTime<Local>,
    on_connect: Option<LifecycleHook>,
    on_disconnect: Option<LifecycleHook>,
    status_tx: watch::Sender<MqttStatus>,
    publisher: Option<FabricPublisher>,
    event_loop: Option<EventLoop>,
}

impl<S: FabricNodeState> FabricNode<S> {
    pub fn identity(&self) -> &NodeIdentity {
        &self.identity
    }

    /// Shared dispatcher; handlers may be registered in any state
    pub fn dispatcher(&self) -> Arc<Dispatcher> {
        self.dispatcher.clone()
    }

    pub fn last_will(&self) -> &OutboundMessage {
        &self.last_will
    }

    pub fn status(&self) -> watch::Receiver<MqttStatus> {
        self.status_tx.subscribe()
    }

    pub fn uptime_secs(&self) -> i64 {
        (Local::now() - self.started_at).num_seconds()
    }

    fn set_state(&self, state: ConnectionState) {
        self.status_tx.send_modify(|status| status.connection_state = state);
    }
}

impl FabricNode<Configured> {
    /// Validates broker settings and prepares options with the last will
    pub fn configure(identity: NodeIdentity, config: &MqttConfig) -> Result<Self, MqttError> {
        if config.host.trim().is_empty() {
            return Err(MqttError::Config("broker host is empty".to_string()));
        }
        if config.keep_alive_secs == 0 {
            return Err(MqttError::Config("keep alive must be at least one second".to_string()));
        }
        if config.request_capacity == 0 {
            return Err(MqttError::Config("request capacity must be positive".to_string()));
        }

        let identity = Arc::new(identity);
        let last_will = build_status_message(&identity, FabricStatus::Disconnected)?;

        let client_id = config.client_id();
        info!("Configuring fabric node {} with client id {}", identity.node_name(), client_id);
        debug!("Last will on {}", last_will.topic);

        let mut options = MqttOptions::new(client_id, config.host.clone(), config.port);
        options
            .set_keep_alive(Duration::from_secs(config.keep_alive_secs))
            .set_clean_session(true)
            .set_last_will(LastWill::new(
                last_will.topic.clone(),
                last_will.payload.clone(),
                last_will.qos,
                last_will.retain,
            ));
        if let Some(user) = &config.username {
            options.set_credentials(user.clone(), config.password.clone().unwrap_or_default());
        }

        let dispatcher = Arc::new(Dispatcher::new(identity.clone()));
        let (status_tx, _) = watch::channel(MqttStatus::default());

        Ok(Self::new(
            identity,
            dispatcher,
            options,
            last_will,
            config.request_capacity,
            Duration::from_millis(config.reconnect_delay_ms),
            Local::now(),
            None, // on_connect
            None, // on_disconnect
            status_tx,
            None, // publisher
            None, // event_loop
        ))
    }

    pub fn on_connect<F>(mut self, hook: F) -> Self
    where
        F: Fn(&FabricPublisher) + Send + Sync + 'static,
    {
        self.on_connect = Some(Arc::new(hook));
        self
    }

    pub fn on_disconnect<F>(mut self, hook: F) -> Self
    where
        F: Fn(&FabricPublisher) + Send + Sync + 'static,
    {
        self.on_disconnect = Some(Arc::new(hook));
        self
    }

    /// Creates the client. Nothing touches the network until the event loop runs.
    pub fn start(mut self) -> FabricNode<Running> {
        info!("Starting fabric node {}", self.identity.node_name());
        let (client, event_loop) = AsyncClient::new(self.options.clone(), self.request_capacity);
        self.publisher = Some(FabricPublisher::new(client, self.identity.clone()));
        self.event_loop = Some(event_loop);
        self.started_at = Local::now();
        self.set_state(ConnectionState::Connecting);
        self.transition()
    }
}

impl FabricNode<Running> {
    pub fn publisher(&self) -> Result<FabricPublisher, MqttError> {
        self.publisher.clone().ok_or(MqttError::NotStarted)
    }

    fn run_hook(&self, name: &str, hook: &Option<LifecycleHook>, publisher: &FabricPublisher) {
        if let Some(hook) = hook {
            if let Err(panic) = panic::catch_unwind(AssertUnwindSafe(|| hook(publisher))) {
                error!("{} hook panicked: {}", name, panic_message(panic.as_ref()));
            }
        }
    }

    fn handle_event(&self, event: Event, publisher: &FabricPublisher) {
        match event {
            Event::Incoming(Packet::ConnAck(ack)) => {
                info!("Connected to broker ({:?})", ack.code);
                self.status_tx.send_modify(|status| {
                    status.connection_state = ConnectionState::Connected;
                    status.last_activity = Some(Local::now());
                });
                let online = FabricStatus::Online {
                    uptime_secs: self.uptime_secs(),
                };
                if let Err(e) = publisher.publish_status(online) {
                    error!("Failed to publish online status: {}", e);
                }
                self.run_hook("on_connect", &self.on_connect, publisher);
            }
            Event::Incoming(Packet::Publish(publish)) => {
                let message = InboundMessage::from_publish(&publish);
                debug!("Received {}", message);
                self.status_tx.send_modify(|status| {
                    status.messages_received += 1;
                    status.last_activity = Some(Local::now());
                });
                self.dispatcher.dispatch(&message.topic, &message.payload);
            }
            Event::Outgoing(Outgoing::Publish(_)) => {
                self.status_tx.send_modify(|status| {
                    status.messages_sent += 1;
                    status.last_activity = Some(Local::now());
                });
            }
            _ => {}
        }
    }

    /// Drives the event loop until `shutdown` fires, then says goodbye
    pub async fn run_until_shutdown(
        mut self,
        shutdown: CancellationToken,
    ) -> Result<FabricNode<Stopped>, MqttError> {
        let publisher = self.publisher()?;
        let mut event_loop = self.event_loop.take().ok_or(MqttError::NotStarted)?;
        info!("Running event loop for {}", self.identity.node_name());

        loop {
            tokio::select! {
                biased;

                _ = shutdown.cancelled() => {
                    info!("Shutdown requested for {}", self.identity.node_name());
                    break;
                }

                polled = event_loop.poll() => match polled {
                    Ok(event) => self.handle_event(event, &publisher),
                    Err(e) => {
                        let was_connected =
                            self.status_tx.borrow().connection_state == ConnectionState::Connected;
                        warn!("Connection error: {}", e);
                        self.status_tx.send_modify(|status| {
                            status.connection_state = ConnectionState::Reconnecting;
                            status.record_error(e.to_string());
                        });
                        if was_connected {
                            self.run_hook("on_disconnect", &self.on_disconnect, &publisher);
                        }
                        tokio::select! {
                            _ = shutdown.cancelled() => break,
                            _ = tokio::time::sleep(self.reconnect_delay) => {}
                        }
                    }
                }
            }
        }

        self.say_goodbye(&publisher, &mut event_loop).await;
        self.set_state(ConnectionState::Disconnected);
        Ok(self.transition())
    }

    /// Publishes `offline` and disconnects, flushing both through the event loop.
    /// Nothing polls the event loop while queueing, so a full request channel
    /// drops the goodbye instead of waiting on it.
    async fn say_goodbye(&self, publisher: &FabricPublisher, event_loop: &mut EventLoop) {
        let offline = FabricStatus::Offline {
            uptime_secs: self.uptime_secs(),
        };
        if let Err(e) = publisher.publish_status(offline) {
            warn!("Failed to queue offline status: {}", e);
        }
        if let Err(e) = publisher.client.try_disconnect() {
            warn!("Failed to queue disconnect: {}", e);
        }

        let drain = async {
            loop {
                match event_loop.poll().await {
                    Ok(Event::Outgoing(Outgoing::Disconnect)) => break,
                    Ok(_) => {}
                    Err(e) => {
                        debug!("Event loop closed during shutdown: {}", e);
                        break;
                    }
                }
            }
        };
        if tokio::time::timeout(SHUTDOWN_DRAIN_TIMEOUT, drain).await.is_err() {
            warn!("Timed out flushing shutdown messages");
        }
    }
}

impl FabricNode<Stopped> {}
