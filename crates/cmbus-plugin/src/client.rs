//! External clients attached to the broker.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use bytes::Bytes;
use cmbus_frame::{Envelope, EnvelopeSink, EnvelopeSource, FrameError, RecvMode};
use cmbus_transport::{channel, ChannelReceiver, ChannelSender, TransportError};
use tracing::debug;

use crate::context::BrokerHandle;
use crate::error::{PluginError, Result};

/// Return paths by hop address: plugin names and client addresses.
pub(crate) type Routes = Arc<Mutex<HashMap<Bytes, ChannelSender>>>;

pub(crate) fn lock(routes: &Routes) -> MutexGuard<'_, HashMap<Bytes, ChannelSender>> {
    routes.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Sending half of a client attachment.
///
/// Every envelope gets the client's address pushed as a hop, so replies and
/// NAKs find their way back. Dropping it detaches the client.
pub struct ClientSender {
    address: Bytes,
    broker: BrokerHandle,
    _route: RouteGuard,
}

impl ClientSender {
    pub fn address(&self) -> &[u8] {
        &self.address
    }

    pub fn send(&self, mut envelope: Envelope) -> Result<()> {
        envelope.push_hop(self.address.clone())?;
        self.broker.submit(envelope)
    }
}

impl EnvelopeSink for ClientSender {
    fn send_envelope(&mut self, envelope: Envelope) -> cmbus_frame::Result<()> {
        self.send(envelope).map_err(|err| match err {
            PluginError::Frame(err) => err,
            PluginError::Transport(err) => err.into(),
            other => FrameError::Transport(TransportError::Io(std::io::Error::other(
                other.to_string(),
            ))),
        })
    }
}

/// An external client's attachment to the broker.
pub struct ClientPort {
    sender: ClientSender,
    replies: ChannelReceiver,
}

impl ClientPort {
    /// Register `address` as a return path and build the port around it.
    pub(crate) fn attach(broker: BrokerHandle, routes: Routes, address: Bytes, hwm: usize) -> Self {
        let (replies_tx, replies) = channel(hwm);
        lock(&routes).insert(address.clone(), replies_tx);
        debug!(address = %String::from_utf8_lossy(&address), "client attached");

        Self {
            sender: ClientSender {
                address: address.clone(),
                broker,
                _route: RouteGuard { address, routes },
            },
            replies,
        }
    }

    pub fn address(&self) -> &[u8] {
        self.sender.address()
    }

    /// Send a request.
    pub fn send(&self, envelope: Envelope) -> Result<()> {
        self.sender.send(envelope)
    }

    /// Receive the next reply.
    pub fn recv(&mut self, mode: RecvMode) -> Result<Envelope> {
        Ok(self.replies.recv_envelope(mode)?)
    }

    /// Receive the next reply, giving up after `timeout`.
    pub fn recv_timeout(&self, timeout: Duration) -> Result<Envelope> {
        Ok(Envelope::from(self.replies.recv_timeout(timeout)?))
    }

    /// Split into independently owned send and receive halves.
    pub fn into_split(self) -> (ClientSender, ChannelReceiver) {
        (self.sender, self.replies)
    }
}

struct RouteGuard {
    address: Bytes,
    routes: Routes,
}

impl Drop for RouteGuard {
    fn drop(&mut self) {
        lock(&self.routes).remove(&self.address);
        debug!(address = %String::from_utf8_lossy(&self.address), "client detached");
    }
}
