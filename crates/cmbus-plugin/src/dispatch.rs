//! The per-plugin execution thread.

use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Instant;

use cmbus_frame::{Envelope, MessageType};
use cmbus_transport::{poll, ChannelReceiver, TransportError};
use tracing::{debug, info, warn};

use crate::context::PluginContext;
use crate::error::{PluginError, Result};
use crate::plugin::Plugin;
use crate::state::{PluginState, StateCell};

/// Poll slots, in the order handed to `poll`.
const SHUTDOWN: usize = 0;
const IN_REQUEST: usize = 1;
const IN_EVENT: usize = 2;
const RESPONSES: usize = 3;

/// A plugin whose `init` already succeeded, ready to get its own thread.
pub(crate) struct Loaded {
    pub(crate) plugin: Box<dyn Plugin>,
    pub(crate) ctx: PluginContext,
    pub(crate) state: Arc<StateCell>,
}

impl Loaded {
    /// Run `init` on the calling thread.
    pub(crate) fn init(
        mut plugin: Box<dyn Plugin>,
        mut ctx: PluginContext,
        state: Arc<StateCell>,
    ) -> Result<Self> {
        if let Err(err) = plugin.init(&mut ctx) {
            state.advance(PluginState::Terminated);
            return Err(PluginError::Init {
                plugin: ctx.name().to_string(),
                source: Box::new(err),
            });
        }
        state.advance(PluginState::Initialized);
        debug!(plugin = ctx.name(), timeout = ?ctx.timeout(), "plugin initialized");
        Ok(Self { plugin, ctx, state })
    }

    /// Move the plugin onto its own thread. It runs until `shutdown` disconnects.
    pub(crate) fn spawn(self, shutdown: ChannelReceiver) -> Result<JoinHandle<()>> {
        let name = self.ctx.name().to_string();
        thread::Builder::new()
            .name(format!("plugin-{name}"))
            .spawn(move || self.run(shutdown))
            .map_err(|source| PluginError::Spawn { name, source })
    }

    fn run(mut self, shutdown: ChannelReceiver) {
        self.state.advance(PluginState::Running);
        info!(plugin = self.ctx.name(), "plugin running");

        loop {
            match self.wait(&shutdown) {
                Wake::Shutdown => break,
                Wake::Delivered => {}
                Wake::TimedOut => {
                    if let Err(err) = self.plugin.timeout(&mut self.ctx) {
                        warn!(plugin = self.ctx.name(), error = %err, "timeout callback failed");
                    }
                }
            }

            if let Err(err) = self.plugin.poll(&mut self.ctx) {
                warn!(plugin = self.ctx.name(), error = %err, "poll callback failed");
            }
        }

        self.state.advance(PluginState::Finalizing);
        if let Err(err) = self.plugin.fini(&mut self.ctx) {
            warn!(plugin = self.ctx.name(), error = %err, "fini callback failed");
        }
        self.state.advance(PluginState::Terminated);
        info!(plugin = self.ctx.name(), "plugin terminated");
    }

    /// Wait for one message or for the timeout to expire.
    ///
    /// A wake-up that yields no message keeps waiting until the original
    /// deadline, so `timeout` only fires once the full wait has elapsed.
    fn wait(&mut self, shutdown: &ChannelReceiver) -> Wake {
        let deadline = self
            .ctx
            .timeout()
            .and_then(|timeout| Instant::now().checked_add(timeout));
        loop {
            let remaining = deadline.map(|at| at.saturating_duration_since(Instant::now()));
            let ready = {
                let channels = &self.ctx.channels;
                poll(
                    &[
                        shutdown,
                        &channels.in_request,
                        &channels.in_event,
                        &channels.responses,
                    ],
                    remaining,
                )
            };

            match ready {
                None => return Wake::TimedOut,
                Some(SHUTDOWN) => return Wake::Shutdown,
                Some(slot) => match self.deliver(slot) {
                    Delivery::Handled => return Wake::Delivered,
                    Delivery::Closed => return Wake::Shutdown,
                    Delivery::Empty => continue,
                },
            }
        }
    }

    /// Receive from the ready slot and hand the envelope to `receive`.
    fn deliver(&mut self, slot: usize) -> Delivery {
        let (rx, kind) = match slot {
            IN_REQUEST => (&self.ctx.channels.in_request, MessageType::Request),
            IN_EVENT => (&self.ctx.channels.in_event, MessageType::Event),
            RESPONSES => (&self.ctx.channels.responses, MessageType::Response),
            _ => return Delivery::Empty,
        };

        let frames = match rx.try_recv() {
            Ok(frames) => frames,
            Err(TransportError::WouldBlock) => return Delivery::Empty,
            Err(TransportError::Disconnected) => {
                debug!(plugin = self.ctx.name(), %kind, "broker channel closed");
                return Delivery::Closed;
            }
            Err(err) => {
                warn!(plugin = self.ctx.name(), %kind, error = %err, "receive failed");
                return Delivery::Empty;
            }
        };

        let envelope = Envelope::from(frames);
        if let Err(err) = self.plugin.receive(&mut self.ctx, envelope, kind) {
            warn!(plugin = self.ctx.name(), %kind, error = %err, "receive callback failed");
        }
        Delivery::Handled
    }
}

/// Outcome of one wait in the plugin loop.
enum Wake {
    Shutdown,
    Delivered,
    TimedOut,
}

enum Delivery {
    Handled,
    /// Readiness reported, but nothing was there.
    Empty,
    Closed,
}
