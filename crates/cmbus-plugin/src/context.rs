use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use cmbus_frame::{Envelope, EnvelopeSink, EnvelopeSource, RecvMode, TAG_SEPARATOR};
use cmbus_transport::{ChannelReceiver, ChannelSender};
use serde_json::Value;

use crate::client::{ClientPort, Routes};
use crate::config::BrokerConfig;
use crate::error::Result;
use crate::state::{PluginState, StateCell};

/// Outbound channel roles a plugin can send on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outbound {
    /// Requests to other plugins; their replies come back as `Response`.
    Request,
    /// Replies to requests this plugin received.
    Response,
    /// Events published to every running plugin.
    Event,
    /// Broadcasts for the node tree above this broker.
    Tree,
}

/// The channels a plugin's context owns, seen from the plugin side.
pub(crate) struct PluginChannels {
    pub(crate) in_request: ChannelReceiver,
    pub(crate) in_event: ChannelReceiver,
    pub(crate) request: ChannelSender,
    pub(crate) responses: ChannelReceiver,
    pub(crate) out_response: ChannelSender,
    pub(crate) out_event: ChannelSender,
    pub(crate) out_tree: ChannelSender,
}

/// Per-plugin state, owned by that plugin's thread.
pub struct PluginContext {
    name: String,
    conf: Arc<BrokerConfig>,
    pub(crate) channels: PluginChannels,
    timeout: Option<Duration>,
    server: BrokerHandle,
}

impl PluginContext {
    pub(crate) fn new(
        name: String,
        conf: Arc<BrokerConfig>,
        channels: PluginChannels,
        server: BrokerHandle,
    ) -> Self {
        let timeout = conf.plugin_timeout();
        Self {
            name,
            conf,
            channels,
            timeout,
            server,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Shared broker configuration.
    pub fn conf(&self) -> &BrokerConfig {
        &self.conf
    }

    /// This plugin's entry in `BrokerConfig::settings`.
    pub fn settings(&self) -> Option<&Value> {
        self.conf.settings_for(&self.name)
    }

    /// How long the thread waits for a message before calling `timeout`.
    pub fn timeout(&self) -> Option<Duration> {
        self.timeout
    }

    /// Change the wait. Takes effect on the next iteration.
    pub fn set_timeout(&mut self, timeout: Option<Duration>) {
        self.timeout = timeout;
    }

    /// Handle to the broker, for submitting traffic and querying state.
    pub fn server(&self) -> &BrokerHandle {
        &self.server
    }

    /// The sender for an outbound role, usable as an `EnvelopeSink`.
    pub fn outbound(&mut self, role: Outbound) -> &mut ChannelSender {
        match role {
            Outbound::Request => &mut self.channels.request,
            Outbound::Response => &mut self.channels.out_response,
            Outbound::Event => &mut self.channels.out_event,
            Outbound::Tree => &mut self.channels.out_tree,
        }
    }

    pub fn send_request(&mut self, envelope: Envelope) -> Result<()> {
        Ok(self.outbound(Outbound::Request).send_envelope(envelope)?)
    }

    /// Send a reply. `envelope` must still carry the requester's route.
    pub fn respond(&mut self, envelope: Envelope) -> Result<()> {
        Ok(self.outbound(Outbound::Response).send_envelope(envelope)?)
    }

    pub fn publish(&mut self, envelope: Envelope) -> Result<()> {
        Ok(self.outbound(Outbound::Event).send_envelope(envelope)?)
    }

    pub fn broadcast_tree(&mut self, envelope: Envelope) -> Result<()> {
        Ok(self.outbound(Outbound::Tree).send_envelope(envelope)?)
    }

    /// Receive a reply to one of this plugin's own requests.
    ///
    /// For use inside a callback that needs the answer before it returns.
    pub fn recv_response(&mut self, mode: RecvMode) -> Result<Envelope> {
        Ok(self.channels.responses.recv_envelope(mode)?)
    }
}

/// Read access to the broker for plugins and embedders.
#[derive(Clone)]
pub struct BrokerHandle {
    inner: Arc<Shared>,
}

struct Shared {
    conf: Arc<BrokerConfig>,
    requests: ChannelSender,
    events: ChannelSender,
    plugins: Vec<(String, Arc<StateCell>)>,
    routes: Routes,
    next_client_id: AtomicU64,
}

impl BrokerHandle {
    pub(crate) fn new(
        conf: Arc<BrokerConfig>,
        requests: ChannelSender,
        events: ChannelSender,
        plugins: Vec<(String, Arc<StateCell>)>,
        routes: Routes,
    ) -> Self {
        Self {
            inner: Arc::new(Shared {
                conf,
                requests,
                events,
                plugins,
                routes,
                next_client_id: AtomicU64::new(1),
            }),
        }
    }

    #[cfg(test)]
    pub(crate) fn routes(&self) -> &Routes {
        &self.inner.routes
    }

    pub fn config(&self) -> &BrokerConfig {
        &self.inner.conf
    }

    /// This node's rank.
    pub fn node(&self) -> u32 {
        self.inner.conf.node
    }

    /// Loaded plugin names, in load order.
    pub fn plugins(&self) -> impl Iterator<Item = &str> + '_ {
        self.inner.plugins.iter().map(|(name, _)| name.as_str())
    }

    pub fn state_of(&self, plugin: &str) -> Option<PluginState> {
        self.inner
            .plugins
            .iter()
            .find(|(name, _)| name == plugin)
            .map(|(_, state)| state.get())
    }

    /// Inject a request as if it arrived from outside any plugin.
    ///
    /// Replies follow the envelope's own route; an unrouted request that
    /// nobody claims is dropped after logging.
    pub fn submit(&self, envelope: Envelope) -> Result<()> {
        self.inner.requests.send(envelope.into_frames())?;
        Ok(())
    }

    /// Publish an event to every running plugin.
    pub fn publish(&self, envelope: Envelope) -> Result<()> {
        self.inner.events.send(envelope.into_frames())?;
        Ok(())
    }

    /// Attach an external client with its own return path.
    pub fn connect_client(&self) -> ClientPort {
        let id = self.inner.next_client_id.fetch_add(1, Ordering::Relaxed);
        // The separator keeps client addresses disjoint from plugin names.
        let address = Bytes::from(format!("client{TAG_SEPARATOR}{id}"));
        ClientPort::attach(
            self.clone(),
            Arc::clone(&self.inner.routes),
            address,
            self.inner.conf.hwm,
        )
    }
}

impl std::fmt::Debug for BrokerHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BrokerHandle")
            .field("node", &self.node())
            .field("plugins", &self.plugins().collect::<Vec<_>>())
            .finish()
    }
}
