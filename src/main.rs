use color_eyre::{eyre::eyre, Result};
use mqtt_fabric::config::FabricConfig;
use mqtt_fabric::fabric::topic::CMD_STATUS;
use mqtt_fabric::fabric::{parse_envelope, parse_status_message, Dispatcher, FeedValue};
use mqtt_fabric::mqtt::FabricNode;
use rumqttc::QoS;
use std::path::PathBuf;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn, Level};
use tracing_subscriber::FmtSubscriber;

#[tokio::main]
async fn main() -> Result<()> {
    setup()?;

    let path = match std::env::args().nth(1) {
        Some(path) => PathBuf::from(path),
        None => FabricConfig::default_path()?,
    };
    let config = FabricConfig::load_or_create(&path).await?;
    let identity = config
        .node
        .identity()
        .map_err(|e| eyre!("Invalid node configuration: {}", e))?;

    info!(
        "Node {} ({}) on platform {} under root '{}'",
        identity.node_name(),
        identity.role(),
        identity.platform_id(),
        identity.root_topic()
    );

    let node = FabricNode::configure(identity, &config.broker)?;
    register_handlers(&node.dispatcher());

    let extra_subscriptions = config.subscriptions.clone();
    let node = node
        .on_connect(move |publisher| {
            if let Err(e) = publisher.subscribe_role_defaults() {
                error!("Failed to subscribe role defaults: {}", e);
            }
            for filter in &extra_subscriptions {
                if let Err(e) = publisher.subscribe(filter, QoS::AtLeastOnce) {
                    error!("Failed to subscribe to {}: {}", filter, e);
                }
            }
        })
        .on_disconnect(|publisher| {
            warn!(
                "Connection lost for {}, reconnecting",
                publisher.identity().node_name()
            );
        });

    let shutdown = CancellationToken::new();
    let ctrl_c = shutdown.clone();
    tokio::spawn(async move {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("Unable to listen for Ctrl-C: {}", e);
            return;
        }
        info!("Ctrl-C received, shutting down");
        ctrl_c.cancel();
    });

    let stopped = node.start().run_until_shutdown(shutdown).await?;
    info!("Stopped after {}s", stopped.uptime_secs());

    Ok(())
}

fn describe(value: &Option<FeedValue>) -> String {
    match value {
        Some(FeedValue::Int(i)) => format!("int {}", i),
        Some(FeedValue::Bool(b)) => format!("bool {}", b),
        Some(FeedValue::Text(s)) => format!("text '{}'", s),
        None => "null".to_string(),
    }
}

fn register_handlers(dispatcher: &Dispatcher) {
    dispatcher.set_onramp_handler(|route, payload| match parse_envelope(payload) {
        Ok(envelope) => info!(
            "onramp {}@{} {}/{}: {}",
            route.node_name,
            route.platform_id,
            route.service_id,
            route.feed_id,
            describe(&envelope.value)
        ),
        Err(e) => warn!("Dropping onramp payload from {}: {}", route.node_name, e),
    });

    dispatcher.set_offramp_handler(|route, payload| match parse_envelope(payload) {
        Ok(envelope) => info!(
            "offramp task {} from {}@{} for {}/{}: {}",
            route.task_id,
            route.actor_id,
            route.actor_platform_id,
            route.service_id,
            route.feed_id,
            describe(&envelope.value)
        ),
        Err(e) => warn!("Dropping offramp payload for {}: {}", route.node_name, e),
    });

    dispatcher.set_command_handler(|route, payload| {
        if route.cmd != CMD_STATUS {
            info!("Command '{}' for {}", route.cmd, route.node_name);
            return;
        }
        match parse_status_message(payload) {
            Ok(report) => info!(
                "{} {} ({}) is {}{}",
                report.class,
                report.nodename,
                report.platform_id,
                report.status,
                report
                    .uptime
                    .map(|secs| format!(" after {}s", secs))
                    .unwrap_or_default()
            ),
            Err(e) => warn!("Malformed status from {}: {}", route.node_name, e),
        }
    });
}

fn setup() -> Result<()> {
    if std::env::var("RUST_LIB_BACKTRACE").is_err() {
        std::env::set_var("RUST_LIB_BACKTRACE", "0")
    }
    color_eyre::install()?;
    if std::env::var("RUST_LOG").is_err() {
        std::env::set_var("RUST_LOG", "info")
    }
    setup_logging_env();
    Ok(())
}

fn setup_logging_env() {
    FmtSubscriber::builder()
        .with_max_level(Level::INFO)
        .with_target(false)
        .with_thread_ids(true)
        .with_file(true)
        .with_line_number(true)
        .pretty()
        .init();
}
