//! Inbound message dispatcher
//!
//! Classifies each received `(topic, payload)` pair and hands it to the
//! registered handler for its shape. The node role decides which traffic is
//! accepted:
//!
//! ```text
//!              onramp                     offramp
//! Device       only other nodes' data     everything
//! Controller   everything                 only other nodes' tasks
//! ```
//!
//! Loop suppression compares the node name segment only. A node reusing
//! another node's name on a different platform is suppressed as well.
//!
//! `dispatch` is reentrant and may be called concurrently from any number of
//! transport workers. Handler slots sit behind a read-write lock; the handler is
//! cloned out before it runs so a handler may re-register without deadlocking.

use super::identity::{NodeIdentity, Role};
use super::topic::{
    parse_topic, CommandRoute, OfframpRoute, OnrampRoute, TopicParseError, TopicPath,
};
use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::sync::{Arc, PoisonError, RwLock};
use tracing::{debug, error, warn};

pub type OnrampHandler = Arc<dyn Fn(&OnrampRoute, &[u8]) + Send + Sync>;
pub type OfframpHandler = Arc<dyn Fn(&OfframpRoute, &[u8]) + Send + Sync>;
pub type CommandHandler = Arc<dyn Fn(&CommandRoute, &[u8]) + Send + Sync>;

#[derive(Default, Clone)]
struct HandlerSlots {
    onramp: Option<OnrampHandler>,
    offramp: Option<OfframpHandler>,
    command: Option<CommandHandler>,
}

/// Result of dispatching one message
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DispatchOutcome {
    /// A handler ran to completion for this topic kind
    Delivered(&'static str),
    /// Dropped because the message originated from this node
    SuppressedLoop(&'static str),
    /// Recognized, but no handler is registered for the kind
    NoHandler(&'static str),
    /// Topic matches no known shape
    Unrecognized(TopicParseError),
    /// The handler panicked; the panic was contained
    HandlerPanicked,
}

/// Onramp data is accepted by controllers, and by devices unless they sent it
pub fn accepts_onramp(role: Role, own_node: &str, origin_node: &str) -> bool {
    match role {
        Role::Controller => true,
        Role::Device => origin_node != own_node,
    }
}

/// Offramp tasks are accepted by devices, and by controllers unless addressed to themselves
pub fn accepts_offramp(role: Role, own_node: &str, origin_node: &str) -> bool {
    match role {
        Role::Device => true,
        Role::Controller => origin_node != own_node,
    }
}

pub(crate) fn panic_message(payload: &(dyn Any + Send)) -> &str {
    if let Some(s) = payload.downcast_ref::<&str>() {
        *s
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.as_str()
    } else {
        "unknown panic payload"
    }
}

pub struct Dispatcher {
    identity: Arc<NodeIdentity>,
    handlers: RwLock<HandlerSlots>,
}

impl Dispatcher {
    pub fn new(identity: Arc<NodeIdentity>) -> Self {
        Self {
            identity,
            handlers: RwLock::new(HandlerSlots::default()),
        }
    }

    pub fn identity(&self) -> &NodeIdentity {
        &self.identity
    }

    /// Replaces the onramp handler
    pub fn set_onramp_handler<F>(&self, handler: F)
    where
        F: Fn(&OnrampRoute, &[u8]) + Send + Sync + 'static,
    {
        self.slots_mut(|slots| slots.onramp = Some(Arc::new(handler)));
    }

    /// Replaces the offramp handler
    pub fn set_offramp_handler<F>(&self, handler: F)
    where
        F: Fn(&OfframpRoute, &[u8]) + Send + Sync + 'static,
    {
        self.slots_mut(|slots| slots.offramp = Some(Arc::new(handler)));
    }

    /// Replaces the command handler
    pub fn set_command_handler<F>(&self, handler: F)
    where
        F: Fn(&CommandRoute, &[u8]) + Send + Sync + 'static,
    {
        self.slots_mut(|slots| slots.command = Some(Arc::new(handler)));
    }

    fn slots_mut(&self, update: impl FnOnce(&mut HandlerSlots)) {
        let mut guard = self.handlers.write().unwrap_or_else(PoisonError::into_inner);
        update(&mut guard);
    }

    fn slots(&self) -> HandlerSlots {
        self.handlers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Routes one inbound message. Never panics and never fails; every drop
    /// is logged and reported through the outcome.
    pub fn dispatch(&self, topic: &str, payload: &[u8]) -> DispatchOutcome {
        match panic::catch_unwind(AssertUnwindSafe(|| self.route(topic, payload))) {
            Ok(outcome) => outcome,
            Err(panic) => {
                error!(
                    "Handler panicked while processing '{}': {}",
                    topic,
                    panic_message(panic.as_ref())
                );
                DispatchOutcome::HandlerPanicked
            }
        }
    }

    fn route(&self, topic: &str, payload: &[u8]) -> DispatchOutcome {
        let path = match parse_topic(topic) {
            Ok(path) => path,
            Err(e) => {
                warn!("Dropping message on '{}': {}", topic, e);
                return DispatchOutcome::Unrecognized(e);
            }
        };

        let kind = path.kind();
        let own_node = self.identity.node_name();
        let role = self.identity.role();
        let slots = self.slots();

        match path {
            TopicPath::Command(route) => {
                debug!(
                    "Command '{}' for node={} actor={} platform={}",
                    route.cmd, route.node_name, route.actor_id, route.platform_id
                );
                match slots.command {
                    Some(handler) => {
                        handler(&route, payload);
                        DispatchOutcome::Delivered(kind)
                    }
                    None => DispatchOutcome::NoHandler(kind),
                }
            }
            TopicPath::Onramp(route) => {
                let Some(handler) = slots.onramp else {
                    return DispatchOutcome::NoHandler(kind);
                };
                if !accepts_onramp(role, own_node, &route.node_name) {
                    debug!("Suppressing own onramp data on '{}'", topic);
                    return DispatchOutcome::SuppressedLoop(kind);
                }
                handler(&route, payload);
                DispatchOutcome::Delivered(kind)
            }
            TopicPath::Offramp(route) => {
                let Some(handler) = slots.offramp else {
                    return DispatchOutcome::NoHandler(kind);
                };
                if !accepts_offramp(role, own_node, &route.node_name) {
                    debug!("Suppressing own offramp task on '{}'", topic);
                    return DispatchOutcome::SuppressedLoop(kind);
                }
                handler(&route, payload);
                DispatchOutcome::Delivered(kind)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fabric::topic::{build_offramp_topic, build_onramp_topic, TASK_ID_RAW};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;
    use std::thread;

    fn identity(name: &str, role: Role) -> Arc<NodeIdentity> {
        Arc::new(NodeIdentity::new("home", name, "esp8266", role))
    }

    fn counting_onramp(dispatcher: &Dispatcher) -> Arc<AtomicUsize> {
        let hits = Arc::new(AtomicUsize::new(0));
        let counter = hits.clone();
        dispatcher.set_onramp_handler(move |_, _| {
            counter.fetch_add(1, Ordering::SeqCst);
        });
        hits
    }

    fn counting_offramp(dispatcher: &Dispatcher) -> Arc<AtomicUsize> {
        let hits = Arc::new(AtomicUsize::new(0));
        let counter = hits.clone();
        dispatcher.set_offramp_handler(move |_, _| {
            counter.fetch_add(1, Ordering::SeqCst);
        });
        hits
    }

    #[test]
    fn device_ignores_its_own_onramp_data() {
        let own = identity("kitchen", Role::Device);
        let dispatcher = Dispatcher::new(own.clone());
        let hits = counting_onramp(&dispatcher);

        let topic = build_onramp_topic(&own, "text", "lcd");
        assert_eq!(
            dispatcher.dispatch(&topic, b"{}"),
            DispatchOutcome::SuppressedLoop("onramp")
        );
        assert_eq!(hits.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn device_receives_other_nodes_onramp_data() {
        let dispatcher = Dispatcher::new(identity("kitchen", Role::Device));
        let hits = counting_onramp(&dispatcher);

        let other = identity("porch", Role::Device);
        let topic = build_onramp_topic(&other, "text", "lcd");
        assert_eq!(
            dispatcher.dispatch(&topic, b"{}"),
            DispatchOutcome::Delivered("onramp")
        );
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn controller_accepts_all_onramp_data() {
        let own = identity("hub", Role::Controller);
        let dispatcher = Dispatcher::new(own.clone());
        let hits = counting_onramp(&dispatcher);

        dispatcher.dispatch(&build_onramp_topic(&own, "time", "seconds"), b"1");
        dispatcher.dispatch(
            &build_onramp_topic(&identity("porch", Role::Device), "time", "seconds"),
            b"2",
        );
        assert_eq!(hits.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn controller_ignores_tasks_addressed_to_itself() {
        let own = identity("hub", Role::Controller);
        let dispatcher = Dispatcher::new(own.clone());
        let hits = counting_offramp(&dispatcher);

        let to_self = build_offramp_topic(&own, "hub", TASK_ID_RAW, "esp8266", "text", "lcd");
        assert_eq!(
            dispatcher.dispatch(&to_self, b"{}"),
            DispatchOutcome::SuppressedLoop("offramp")
        );

        let to_device = build_offramp_topic(&own, "kitchen", TASK_ID_RAW, "esp8266", "text", "lcd");
        assert_eq!(
            dispatcher.dispatch(&to_device, b"{}"),
            DispatchOutcome::Delivered("offramp")
        );
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn device_accepts_all_offramp_tasks() {
        let own = identity("kitchen", Role::Device);
        let dispatcher = Dispatcher::new(own.clone());
        let hits = counting_offramp(&dispatcher);

        let controller = identity("hub", Role::Controller);
        let topic =
            build_offramp_topic(&controller, "kitchen", TASK_ID_RAW, "esp8266", "text", "lcd");
        assert_eq!(
            dispatcher.dispatch(&topic, b"{}"),
            DispatchOutcome::Delivered("offramp")
        );
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn loop_suppression_matches_on_name_only() {
        let dispatcher = Dispatcher::new(identity("kitchen", Role::Device));
        let hits = counting_onramp(&dispatcher);

        // Same node name on a different platform still counts as self
        let impostor = Arc::new(NodeIdentity::new("home", "kitchen", "rpi", Role::Device));
        let topic = build_onramp_topic(&impostor, "text", "lcd");
        assert_eq!(
            dispatcher.dispatch(&topic, b"{}"),
            DispatchOutcome::SuppressedLoop("onramp")
        );
        assert_eq!(hits.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn handler_receives_parsed_fields_and_payload() {
        let dispatcher = Dispatcher::new(identity("hub", Role::Controller));
        let seen = Arc::new(Mutex::new(None));
        let sink = seen.clone();
        dispatcher.set_onramp_handler(move |route, payload| {
            *sink.lock().unwrap() = Some((route.clone(), payload.to_vec()));
        });

        dispatcher.dispatch("home/porch/$feeds/$onramp/rpi/analog_in/temp", b"21");

        let (route, payload) = seen.lock().unwrap().take().unwrap();
        assert_eq!(route.node_name, "porch");
        assert_eq!(route.platform_id, "rpi");
        assert_eq!(route.service_id, "analog_in");
        assert_eq!(route.feed_id, "temp");
        assert_eq!(payload, b"21");
    }

    #[test]
    fn missing_handlers_and_bad_topics_are_dropped() {
        let dispatcher = Dispatcher::new(identity("hub", Role::Controller));
        assert_eq!(
            dispatcher.dispatch("home/porch/$feeds/$onramp/rpi/text/lcd", b""),
            DispatchOutcome::NoHandler("onramp")
        );
        assert_eq!(
            dispatcher.dispatch("home/porch/$commands/$clients/sysctl/rpi/status", b""),
            DispatchOutcome::NoHandler("command")
        );
        assert!(matches!(
            dispatcher.dispatch("home/porch", b""),
            DispatchOutcome::Unrecognized(TopicParseError::TooShort(2))
        ));
    }

    #[test]
    fn command_handler_sees_every_command() {
        let dispatcher = Dispatcher::new(identity("hub", Role::Controller));
        let cmds = Arc::new(Mutex::new(Vec::new()));
        let sink = cmds.clone();
        dispatcher.set_command_handler(move |route, _| {
            sink.lock().unwrap().push(route.cmd.clone());
        });

        dispatcher.dispatch("home/hub/$commands/$clients/sysctl/linux/status", b"");
        dispatcher.dispatch("home/porch/$commands/$clients/sysctl/rpi/reboot", b"");
        assert_eq!(*cmds.lock().unwrap(), vec!["status", "reboot"]);
    }

    #[test]
    fn panicking_handler_is_contained() {
        let dispatcher = Dispatcher::new(identity("hub", Role::Controller));
        dispatcher.set_onramp_handler(|_, _| panic!("sensor decoder exploded"));

        let topic = "home/porch/$feeds/$onramp/rpi/text/lcd";
        assert_eq!(dispatcher.dispatch(topic, b""), DispatchOutcome::HandlerPanicked);

        // The dispatcher stays usable after a contained panic
        let hits = counting_onramp(&dispatcher);
        assert_eq!(dispatcher.dispatch(topic, b""), DispatchOutcome::Delivered("onramp"));
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn last_registration_wins() {
        let dispatcher = Dispatcher::new(identity("hub", Role::Controller));
        let first = counting_onramp(&dispatcher);
        let second = counting_onramp(&dispatcher);

        dispatcher.dispatch("home/porch/$feeds/$onramp/rpi/text/lcd", b"");
        assert_eq!(first.load(Ordering::SeqCst), 0);
        assert_eq!(second.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn handler_can_reregister_during_dispatch() {
        let dispatcher = Arc::new(Dispatcher::new(identity("hub", Role::Controller)));
        let inner = Arc::downgrade(&dispatcher);
        dispatcher.set_onramp_handler(move |_, _| {
            if let Some(d) = inner.upgrade() {
                d.set_onramp_handler(|_, _| {});
            }
        });

        assert_eq!(
            dispatcher.dispatch("home/porch/$feeds/$onramp/rpi/text/lcd", b""),
            DispatchOutcome::Delivered("onramp")
        );
    }

    #[test]
    fn concurrent_dispatch_delivers_every_message() {
        let dispatcher = Arc::new(Dispatcher::new(identity("hub", Role::Controller)));
        let hits = counting_onramp(&dispatcher);

        let workers: Vec<_> = (0..8)
            .map(|n| {
                let d = dispatcher.clone();
                thread::spawn(move || {
                    for i in 0..50 {
                        let topic = format!("home/node{n}/$feeds/$onramp/rpi/text/f{i}");
                        d.dispatch(&topic, b"");
                    }
                })
            })
            .collect();
        for worker in workers {
            worker.join().unwrap();
        }

        assert_eq!(hits.load(Ordering::SeqCst), 400);
    }
}
