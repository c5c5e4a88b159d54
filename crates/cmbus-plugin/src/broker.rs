use std::collections::HashSet;
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use bytes::Bytes;
use cmbus_frame::{Envelope, MessageType};
use cmbus_transport::{channel, poll, ChannelReceiver, ChannelSender, Multipart, TransportError};
use tracing::{debug, info, trace, warn};

use crate::client::{lock, ClientPort, Routes};
use crate::config::BrokerConfig;
use crate::context::{BrokerHandle, PluginChannels, PluginContext};
use crate::dispatch::Loaded;
use crate::error::{PluginError, Result};
use crate::registry::{PluginDescriptor, PluginRegistry};
use crate::state::{PluginState, StateCell};

/// Node-local broker: loads plugins, runs one thread per plugin, and routes
/// envelopes between plugins and clients by tag.
pub struct Broker {
    handle: BrokerHandle,
    workers: Vec<Worker>,
    control: Option<ChannelSender>,
    router: Option<JoinHandle<()>>,
}

struct Worker {
    name: String,
    shutdown: Option<ChannelSender>,
    thread: Option<JoinHandle<()>>,
}

impl Broker {
    /// Load and start the configured plugins.
    ///
    /// Tree broadcasts are logged and discarded; see `start_with_upstream`.
    pub fn start(config: BrokerConfig, registry: &PluginRegistry) -> Result<Self> {
        Self::start_inner(config, registry, None)
    }

    /// Like `start`, forwarding tree broadcasts to `upstream`.
    pub fn start_with_upstream(
        config: BrokerConfig,
        registry: &PluginRegistry,
        upstream: ChannelSender,
    ) -> Result<Self> {
        Self::start_inner(config, registry, Some(upstream))
    }

    fn start_inner(
        config: BrokerConfig,
        registry: &PluginRegistry,
        upstream: Option<ChannelSender>,
    ) -> Result<Self> {
        let descriptors = resolve_plugins(&config, registry)?;
        let conf = Arc::new(config);
        let hwm = conf.hwm;

        let (submit_tx, submit_rx) = channel(hwm);
        let (publish_tx, publish_rx) = channel(hwm);
        let (control_tx, control_rx) = channel(1);

        let mut inputs = vec![
            Input::new(Source::Control, control_rx),
            Input::new(Source::Submit, submit_rx),
            Input::new(Source::Publish, publish_rx),
        ];
        let mut links = Vec::with_capacity(descriptors.len());
        let mut pending = Vec::with_capacity(descriptors.len());
        let routes: Routes = Arc::default();

        for (index, descriptor) in descriptors.into_iter().enumerate() {
            let name = descriptor.name.to_string();
            let state = Arc::new(StateCell::new());

            let (in_request_tx, in_request) = channel(hwm);
            let (in_event_tx, in_event) = channel(hwm);
            let (request, request_rx) = channel(hwm);
            let (responses_tx, responses) = channel(hwm);
            let (out_response, out_response_rx) = channel(hwm);
            let (out_event, out_event_rx) = channel(hwm);
            let (out_tree, out_tree_rx) = channel(hwm);

            inputs.push(Input::new(Source::Request(index), request_rx));
            inputs.push(Input::new(Source::Response(index), out_response_rx));
            inputs.push(Input::new(Source::Event(index), out_event_rx));
            inputs.push(Input::new(Source::Tree(index), out_tree_rx));

            lock(&routes).insert(Bytes::from(name.clone()), responses_tx);
            links.push(PluginLink {
                prefix: format!("{name}{}", cmbus_frame::TAG_SEPARATOR),
                name: name.clone(),
                state: Arc::clone(&state),
                in_request: in_request_tx,
                in_event: in_event_tx,
            });
            pending.push((
                descriptor,
                state,
                PluginChannels {
                    in_request,
                    in_event,
                    request,
                    responses,
                    out_response,
                    out_event,
                    out_tree,
                },
            ));
        }

        let states = links
            .iter()
            .map(|link| (link.name.clone(), Arc::clone(&link.state)))
            .collect();
        let handle = BrokerHandle::new(
            Arc::clone(&conf),
            submit_tx,
            publish_tx,
            states,
            Arc::clone(&routes),
        );

        let router = Router {
            plugins: links,
            routes: Arc::clone(&routes),
            upstream,
        };
        let router = thread::Builder::new()
            .name("cmbus-router".to_string())
            .spawn(move || router.run(inputs))
            .map_err(|source| PluginError::Spawn {
                name: "router".to_string(),
                source,
            })?;

        let mut broker = Broker {
            handle: handle.clone(),
            workers: Vec::with_capacity(pending.len()),
            control: Some(control_tx),
            router: Some(router),
        };

        // Dropping `broker` on an early return shuts down whatever already started.
        for (descriptor, state, channels) in pending {
            let name = descriptor.name.to_string();
            let ctx = PluginContext::new(name.clone(), Arc::clone(&conf), channels, handle.clone());
            let loaded = Loaded::init((descriptor.create)(), ctx, state)?;

            let (shutdown_tx, shutdown_rx) = channel(1);
            let thread = loaded.spawn(shutdown_rx)?;
            broker.workers.push(Worker {
                name,
                shutdown: Some(shutdown_tx),
                thread: Some(thread),
            });
        }

        info!(
            node = conf.node,
            plugins = broker.workers.len(),
            "broker started"
        );
        Ok(broker)
    }

    /// Shared handle for querying state and injecting traffic.
    pub fn handle(&self) -> BrokerHandle {
        self.handle.clone()
    }

    /// Loaded plugin names, in load order.
    pub fn plugins(&self) -> Vec<String> {
        self.handle.plugins().map(str::to_string).collect()
    }

    pub fn state_of(&self, plugin: &str) -> Option<PluginState> {
        self.handle.state_of(plugin)
    }

    /// Inject a request. Replies follow the envelope's own route.
    pub fn submit(&self, envelope: Envelope) -> Result<()> {
        self.handle.submit(envelope)
    }

    /// Publish an event to every running plugin.
    pub fn publish(&self, envelope: Envelope) -> Result<()> {
        self.handle.publish(envelope)
    }

    /// Attach an external client with its own return path.
    pub fn connect_client(&self) -> ClientPort {
        self.handle.connect_client()
    }

    /// Finalize every plugin, then stop routing. Safe to call twice.
    pub fn shutdown(&mut self) -> Result<()> {
        let mut result = Ok(());

        for worker in &mut self.workers {
            worker.shutdown.take();
        }
        for worker in &mut self.workers {
            if let Some(thread) = worker.thread.take() {
                if thread.join().is_err() {
                    warn!(plugin = %worker.name, "plugin thread panicked");
                    result = Err(PluginError::ThreadPanicked(worker.name.clone()));
                }
            }
        }

        self.control.take();
        if let Some(router) = self.router.take() {
            if router.join().is_err() {
                result = Err(PluginError::ThreadPanicked("router".to_string()));
            }
            info!("broker stopped");
        }
        result
    }
}

impl Drop for Broker {
    fn drop(&mut self) {
        if let Err(err) = self.shutdown() {
            warn!(error = %err, "broker shutdown failed");
        }
    }
}

fn resolve_plugins(
    config: &BrokerConfig,
    registry: &PluginRegistry,
) -> Result<Vec<PluginDescriptor>> {
    let names: Vec<String> = if config.plugins.is_empty() {
        registry.names().map(str::to_string).collect()
    } else {
        config.plugins.clone()
    };

    let mut seen = HashSet::new();
    names
        .into_iter()
        .map(|name| {
            if !seen.insert(name.clone()) {
                return Err(PluginError::DuplicatePlugin(name));
            }
            registry
                .get(&name)
                .copied()
                .ok_or(PluginError::UnknownPlugin(name))
        })
        .collect()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Source {
    Control,
    Submit,
    Publish,
    Request(usize),
    Response(usize),
    Event(usize),
    Tree(usize),
}

struct Input {
    source: Source,
    rx: ChannelReceiver,
}

impl Input {
    fn new(source: Source, rx: ChannelReceiver) -> Self {
        Self { source, rx }
    }
}

struct PluginLink {
    name: String,
    prefix: String,
    state: Arc<StateCell>,
    in_request: ChannelSender,
    in_event: ChannelSender,
}

impl PluginLink {
    fn accepting(&self) -> bool {
        matches!(
            self.state.get(),
            PluginState::Initialized | PluginState::Running
        )
    }

    fn claims(&self, envelope: &Envelope) -> bool {
        envelope.matches_tag(&self.name).unwrap_or(false)
            || matches!(envelope.match_prefix(&self.prefix), Ok(Some(_)))
    }
}

struct Router {
    plugins: Vec<PluginLink>,
    routes: Routes,
    upstream: Option<ChannelSender>,
}

impl Router {
    fn run(self, mut inputs: Vec<Input>) {
        loop {
            let ready = {
                let receivers: Vec<&ChannelReceiver> = inputs.iter().map(|input| &input.rx).collect();
                poll(&receivers, None)
            };
            let Some(index) = ready else {
                continue;
            };

            let source = inputs[index].source;
            match inputs[index].rx.try_recv() {
                Ok(frames) => self.dispatch(source, frames),
                Err(TransportError::WouldBlock) => {}
                Err(_) if source == Source::Control => break,
                Err(_) => {
                    trace!(?source, "router input closed");
                    inputs.swap_remove(index);
                }
            }
        }
        debug!("router exiting");
    }

    fn dispatch(&self, source: Source, frames: Multipart) {
        let mut envelope = Envelope::from(frames);
        match source {
            Source::Control => {}
            Source::Submit => self.route_request(envelope),
            Source::Request(index) => {
                let name = &self.plugins[index].name;
                match envelope.push_hop(Bytes::from(name.clone())) {
                    Ok(()) => self.route_request(envelope),
                    Err(err) => warn!(plugin = %name, error = %err, "dropping request"),
                }
            }
            Source::Response(_) => self.route_response(envelope),
            Source::Event(_) | Source::Publish => self.publish(&envelope),
            Source::Tree(_) => self.forward_tree(envelope),
        }
    }

    fn route_request(&self, mut envelope: Envelope) {
        let tag = match envelope.tag() {
            Ok(tag) => tag.to_string(),
            Err(err) => {
                warn!(error = %err, "dropping request without a usable tag");
                return;
            }
        };

        let claimant = self
            .plugins
            .iter()
            .find(|link| link.accepting() && link.claims(&envelope));
        match claimant {
            Some(link) => {
                trace!(plugin = %link.name, %tag, "routing request");
                if let Err(err) = link.in_request.try_send(envelope.into_frames()) {
                    warn!(plugin = %link.name, %tag, error = %err, "request not delivered");
                }
            }
            None => {
                debug!(%tag, "no plugin claims tag, returning NAK");
                match envelope.nak_request(MessageType::Request) {
                    Ok(()) => self.route_response(envelope),
                    Err(err) => warn!(%tag, error = %err, "failed to NAK request"),
                }
            }
        }
    }

    fn route_response(&self, mut envelope: Envelope) {
        let Some(address) = envelope.pop_hop() else {
            warn!(
                tag = envelope.tag().unwrap_or("?"),
                "response has no return address, dropping"
            );
            return;
        };

        let target = lock(&self.routes).get(&address).cloned();
        let Some(target) = target else {
            warn!(
                address = %String::from_utf8_lossy(&address),
                tag = envelope.tag().unwrap_or("?"),
                "no route for response, dropping"
            );
            return;
        };
        if let Err(err) = target.try_send(envelope.into_frames()) {
            warn!(
                address = %String::from_utf8_lossy(&address),
                error = %err,
                "response not delivered"
            );
        }
    }

    fn publish(&self, envelope: &Envelope) {
        for link in self.plugins.iter().filter(|link| link.accepting()) {
            if let Err(err) = link.in_event.try_send(envelope.frames().to_vec()) {
                warn!(
                    plugin = %link.name,
                    tag = envelope.tag().unwrap_or("?"),
                    error = %err,
                    "event not delivered"
                );
            }
        }
    }

    fn forward_tree(&self, envelope: Envelope) {
        match &self.upstream {
            Some(upstream) => {
                if let Err(err) = upstream.try_send(envelope.into_frames()) {
                    warn!(error = %err, "tree broadcast not forwarded");
                }
            }
            None => debug!(
                tag = envelope.tag().unwrap_or("?"),
                "no upstream, discarding tree broadcast"
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::time::{Duration, Instant};

    use cmbus_frame::{EnvelopeSink, FrameError, RecvMode};
    use serde_json::json;

    use super::*;
    use crate::context::Outbound;
    use crate::plugin::Plugin;

    const WAIT: Duration = Duration::from_secs(5);

    struct Echo;

    impl Plugin for Echo {
        fn receive(
            &mut self,
            ctx: &mut PluginContext,
            envelope: Envelope,
            kind: MessageType,
        ) -> Result<()> {
            if kind == MessageType::Request {
                ctx.respond(envelope)?;
            }
            Ok(())
        }
    }

    /// Answers `relay.*` only after a round trip through `echo`.
    #[derive(Default)]
    struct Relay {
        pending: Option<Envelope>,
    }

    impl Plugin for Relay {
        fn receive(
            &mut self,
            ctx: &mut PluginContext,
            envelope: Envelope,
            kind: MessageType,
        ) -> Result<()> {
            match kind {
                MessageType::Request => {
                    self.pending = Some(envelope);
                    ctx.outbound(Outbound::Request).send_formatted(
                        Some(&json!({"from": "relay"})),
                        None,
                        format_args!("echo.{}", "ping"),
                    )?;
                }
                MessageType::Response => {
                    if envelope.matches_tag("echo.ping")? {
                        if let Some(mut pending) = self.pending.take() {
                            pending.replace_json(&json!({"relayed": true}))?;
                            ctx.respond(pending)?;
                        }
                    }
                }
                MessageType::Event => {}
            }
            Ok(())
        }
    }

    /// Turns every event into a tree broadcast.
    struct Mirror;

    impl Plugin for Mirror {
        fn receive(
            &mut self,
            ctx: &mut PluginContext,
            envelope: Envelope,
            kind: MessageType,
        ) -> Result<()> {
            if kind == MessageType::Event {
                ctx.broadcast_tree(envelope)?;
            }
            Ok(())
        }
    }

    static TICKER_FINI: AtomicBool = AtomicBool::new(false);

    struct Ticker;

    impl Plugin for Ticker {
        fn init(&mut self, ctx: &mut PluginContext) -> Result<()> {
            let period = ctx
                .settings()
                .and_then(|s| s["period_ms"].as_u64())
                .unwrap_or(1000);
            ctx.set_timeout(Some(Duration::from_millis(period)));
            Ok(())
        }

        fn timeout(&mut self, ctx: &mut PluginContext) -> Result<()> {
            let name = ctx.name().to_string();
            ctx.outbound(Outbound::Tree).send_formatted(
                None,
                None,
                format_args!("{name}.tick"),
            )?;
            Ok(())
        }

        fn fini(&mut self, _ctx: &mut PluginContext) -> Result<()> {
            TICKER_FINI.store(true, Ordering::SeqCst);
            Ok(())
        }
    }

    static COUNTER_RECEIVED: AtomicUsize = AtomicUsize::new(0);
    static COUNTER_TIMEOUTS: AtomicUsize = AtomicUsize::new(0);
    static COUNTER_POLLS: AtomicUsize = AtomicUsize::new(0);

    /// Counts callbacks. `counter.arm` schedules a single timeout.
    struct Counter;

    impl Plugin for Counter {
        fn receive(
            &mut self,
            ctx: &mut PluginContext,
            envelope: Envelope,
            kind: MessageType,
        ) -> Result<()> {
            COUNTER_RECEIVED.fetch_add(1, Ordering::SeqCst);
            if kind == MessageType::Request {
                if envelope.matches_tag("counter.arm")? {
                    ctx.set_timeout(Some(Duration::from_millis(20)));
                }
                ctx.respond(envelope)?;
            }
            Ok(())
        }

        fn timeout(&mut self, ctx: &mut PluginContext) -> Result<()> {
            COUNTER_TIMEOUTS.fetch_add(1, Ordering::SeqCst);
            ctx.set_timeout(None);
            Ok(())
        }

        fn poll(&mut self, _ctx: &mut PluginContext) -> Result<()> {
            COUNTER_POLLS.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    fn wait_for(counter: &AtomicUsize, value: usize) {
        let start = Instant::now();
        while counter.load(Ordering::SeqCst) < value {
            assert!(start.elapsed() < WAIT, "counter stuck below {value}");
            std::thread::sleep(Duration::from_millis(5));
        }
    }

    struct Broken;

    impl Plugin for Broken {
        fn init(&mut self, _ctx: &mut PluginContext) -> Result<()> {
            Err(PluginError::callback("no backing store"))
        }
    }

    fn registry() -> PluginRegistry {
        let mut registry = PluginRegistry::new();
        registry
            .register(PluginDescriptor::new("echo", || Box::new(Echo)))
            .unwrap();
        registry
            .register(PluginDescriptor::new("relay", || Box::<Relay>::default()))
            .unwrap();
        registry
            .register(PluginDescriptor::new("mirror", || Box::new(Mirror)))
            .unwrap();
        registry
            .register(PluginDescriptor::new("ticker", || Box::new(Ticker)))
            .unwrap();
        registry
            .register(PluginDescriptor::new("broken", || Box::new(Broken)))
            .unwrap();
        registry
            .register(PluginDescriptor::new("counter", || Box::new(Counter)))
            .unwrap();
        registry
    }

    fn config(plugins: &[&str]) -> BrokerConfig {
        BrokerConfig {
            plugins: plugins.iter().map(|p| p.to_string()).collect(),
            ..BrokerConfig::default()
        }
    }

    #[test]
    fn request_is_answered_with_route_stripped() {
        let broker = Broker::start(config(&["echo"]), &registry()).unwrap();
        let client = broker.connect_client();

        let request = cmbus_frame::encode("echo.hi", Some(&json!({"n": 1})), Some(b"raw")).unwrap();
        client.send(request.clone()).unwrap();

        let reply = client.recv_timeout(WAIT).unwrap();
        assert_eq!(reply, request);
        assert!(!reply.is_routed());
    }

    #[test]
    fn bare_plugin_name_is_claimed() {
        let broker = Broker::start(config(&["echo"]), &registry()).unwrap();
        let client = broker.connect_client();

        client.send(Envelope::from_frames(["echo"])).unwrap();
        assert!(client.recv_timeout(WAIT).unwrap().matches_tag("echo").unwrap());
    }

    #[test]
    fn unclaimed_request_comes_back_as_nak() {
        let broker = Broker::start(config(&["echo"]), &registry()).unwrap();
        let client = broker.connect_client();

        client
            .send(Envelope::from_frames(["kvs.get", "{\"key\":\"a\"}"]))
            .unwrap();

        let reply = client.recv_timeout(WAIT).unwrap();
        assert_eq!(reply.tag().unwrap(), "kvs.get.NAK");
        assert_eq!(reply.json_frame().unwrap().as_ref(), b"{\"key\":\"a\"}");
    }

    #[test]
    fn similar_prefix_is_not_claimed() {
        let broker = Broker::start(config(&["echo"]), &registry()).unwrap();
        let client = broker.connect_client();

        client.send(Envelope::from_frames(["echoes.get"])).unwrap();
        assert!(client.recv_timeout(WAIT).unwrap().is_nak());
    }

    #[test]
    fn plugin_to_plugin_round_trip() {
        let broker = Broker::start(config(&["echo", "relay"]), &registry()).unwrap();
        let client = broker.connect_client();

        client
            .send(cmbus_frame::encode("relay.go", Some(&json!({})), None).unwrap())
            .unwrap();

        let msg = cmbus_frame::decode(&client.recv_timeout(WAIT).unwrap()).unwrap();
        assert_eq!(msg.tag, "relay.go");
        assert_eq!(msg.json, Some(json!({"relayed": true})));
    }

    #[test]
    fn events_reach_plugins_and_tree_goes_upstream() {
        let (upstream, tree) = channel(16);
        let broker =
            Broker::start_with_upstream(config(&["echo", "mirror"]), &registry(), upstream)
                .unwrap();

        broker
            .publish(Envelope::from_frames(["hb", "{\"epoch\":7}"]))
            .unwrap();

        let forwarded = Envelope::from(tree.recv_timeout(WAIT).unwrap());
        assert!(forwarded.matches_tag("hb").unwrap());
        assert_eq!(forwarded.json_frame().unwrap().as_ref(), b"{\"epoch\":7}");
    }

    #[test]
    fn timeout_callback_fires_and_fini_runs() {
        let (upstream, tree) = channel(16);
        let mut cfg = config(&["ticker"]);
        cfg.settings.insert("ticker".to_string(), json!({"period_ms": 10}));
        let mut broker = Broker::start_with_upstream(cfg, &registry(), upstream).unwrap();

        let tick = Envelope::from(tree.recv_timeout(WAIT).unwrap());
        assert!(tick.matches_tag("ticker.tick").unwrap());
        assert_eq!(broker.state_of("ticker"), Some(PluginState::Running));

        broker.shutdown().unwrap();
        assert_eq!(broker.state_of("ticker"), Some(PluginState::Terminated));
        assert!(TICKER_FINI.load(Ordering::SeqCst));
    }

    #[test]
    fn poll_follows_every_message_and_every_timeout() {
        let broker = Broker::start(config(&["counter"]), &registry()).unwrap();
        let client = broker.connect_client();

        client.send(Envelope::from_frames(["counter.ping"])).unwrap();
        client.recv_timeout(WAIT).unwrap();
        wait_for(&COUNTER_POLLS, 1);
        assert_eq!(COUNTER_RECEIVED.load(Ordering::SeqCst), 1);
        assert_eq!(COUNTER_TIMEOUTS.load(Ordering::SeqCst), 0);

        client.send(Envelope::from_frames(["counter.arm"])).unwrap();
        client.recv_timeout(WAIT).unwrap();
        wait_for(&COUNTER_TIMEOUTS, 1);
        wait_for(&COUNTER_POLLS, 3);

        // The timeout disarmed itself, so the loop is idle now.
        std::thread::sleep(Duration::from_millis(100));
        assert_eq!(COUNTER_RECEIVED.load(Ordering::SeqCst), 2);
        assert_eq!(COUNTER_TIMEOUTS.load(Ordering::SeqCst), 1);
        assert_eq!(COUNTER_POLLS.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn failed_init_aborts_start() {
        let err = Broker::start(config(&["echo", "broken"]), &registry())
            .err()
            .unwrap();
        assert!(matches!(err, PluginError::Init { ref plugin, .. } if plugin == "broken"));
    }

    #[test]
    fn unknown_and_duplicate_plugins_rejected() {
        let err = Broker::start(config(&["nope"]), &registry()).err().unwrap();
        assert!(matches!(err, PluginError::UnknownPlugin(name) if name == "nope"));

        let err = Broker::start(config(&["echo", "echo"]), &registry())
            .err()
            .unwrap();
        assert!(matches!(err, PluginError::DuplicatePlugin(_)));
    }

    #[test]
    fn empty_plugin_list_loads_whole_registry() {
        let mut registry = PluginRegistry::new();
        registry
            .register(PluginDescriptor::new("echo", || Box::new(Echo)))
            .unwrap();
        registry
            .register(PluginDescriptor::new("mirror", || Box::new(Mirror)))
            .unwrap();

        let broker = Broker::start(BrokerConfig::default(), &registry).unwrap();
        assert_eq!(broker.plugins(), vec!["echo".to_string(), "mirror".to_string()]);
    }

    #[test]
    fn clients_get_distinct_addresses_and_detach_on_drop() {
        let broker = Broker::start(config(&["echo"]), &registry()).unwrap();
        let first = broker.connect_client();
        let second = broker.connect_client();
        assert_ne!(first.address(), second.address());

        let address = Bytes::copy_from_slice(first.address());
        drop(first);
        assert!(!lock(broker.handle.routes()).contains_key(&address));
    }

    #[test]
    fn nonblocking_client_receive() {
        let broker = Broker::start(config(&["echo"]), &registry()).unwrap();
        let mut client = broker.connect_client();

        assert!(matches!(
            client.recv(RecvMode::NonBlocking),
            Err(PluginError::Frame(FrameError::WouldBlock))
        ));
    }
}
