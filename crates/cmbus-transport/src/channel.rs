//! Bounded message-oriented channels.
//!
//! A channel carries multi-frame messages and keeps frame boundaries intact.
//! Its capacity is the high-water mark: once the receiving side holds that many
//! undelivered messages, `send` blocks and `try_send` fails. Nothing is dropped.

use std::time::Duration;

use bytes::Bytes;
use crossbeam_channel::{
    Receiver, RecvTimeoutError, Select, Sender, TryRecvError, TrySendError,
};

use crate::error::{Result, TransportError};

/// One message as seen by the transport: an ordered list of opaque frames.
pub type Multipart = Vec<Bytes>;

/// Default per-channel high-water mark.
pub const DEFAULT_HWM: usize = 1000;

/// Create a channel with the given high-water mark.
///
/// A mark of zero means unbounded.
pub fn channel(hwm: usize) -> (ChannelSender, ChannelReceiver) {
    let (tx, rx) = if hwm == 0 {
        crossbeam_channel::unbounded()
    } else {
        crossbeam_channel::bounded(hwm)
    };
    (ChannelSender { tx, hwm }, ChannelReceiver { rx })
}

/// Sending half of a channel. Clones feed the same receiver.
#[derive(Debug, Clone)]
pub struct ChannelSender {
    tx: Sender<Multipart>,
    hwm: usize,
}

impl ChannelSender {
    /// Send a message, blocking while the peer is at its high-water mark.
    pub fn send(&self, msg: Multipart) -> Result<()> {
        self.tx.send(msg).map_err(|_| TransportError::Disconnected)
    }

    /// Send without blocking.
    pub fn try_send(&self, msg: Multipart) -> Result<()> {
        self.tx.try_send(msg).map_err(|err| match err {
            TrySendError::Full(_) => TransportError::Full { hwm: self.hwm },
            TrySendError::Disconnected(_) => TransportError::Disconnected,
        })
    }

    /// Configured high-water mark (zero when unbounded).
    pub fn hwm(&self) -> usize {
        self.hwm
    }
}

/// Receiving half of a channel. Owned by exactly one consumer.
#[derive(Debug)]
pub struct ChannelReceiver {
    rx: Receiver<Multipart>,
}

impl ChannelReceiver {
    /// Receive the next message (blocking).
    pub fn recv(&self) -> Result<Multipart> {
        self.rx.recv().map_err(|_| TransportError::Disconnected)
    }

    /// Receive the next message, giving up after `timeout`.
    pub fn recv_timeout(&self, timeout: Duration) -> Result<Multipart> {
        self.rx.recv_timeout(timeout).map_err(|err| match err {
            RecvTimeoutError::Timeout => TransportError::Timeout(timeout),
            RecvTimeoutError::Disconnected => TransportError::Disconnected,
        })
    }

    /// Receive only if a message is already queued.
    pub fn try_recv(&self) -> Result<Multipart> {
        self.rx.try_recv().map_err(|err| match err {
            TryRecvError::Empty => TransportError::WouldBlock,
            TryRecvError::Disconnected => TransportError::Disconnected,
        })
    }

    /// True if a message is queued. Does not consume it.
    pub fn is_ready(&self) -> bool {
        !self.rx.is_empty()
    }

    /// Number of queued messages.
    pub fn len(&self) -> usize {
        self.rx.len()
    }

    /// True if no message is queued.
    pub fn is_empty(&self) -> bool {
        self.rx.is_empty()
    }
}

/// Wait until one of `receivers` is ready.
///
/// Returns the index of a ready receiver, or `None` once `timeout` expires.
/// `None` for the timeout waits indefinitely. A receiver whose senders are all
/// gone counts as ready, so the caller sees `Disconnected` on its next receive.
pub fn poll(receivers: &[&ChannelReceiver], timeout: Option<Duration>) -> Option<usize> {
    if receivers.is_empty() {
        if let Some(timeout) = timeout {
            std::thread::sleep(timeout);
        }
        return None;
    }

    let mut select = Select::new();
    for receiver in receivers {
        select.recv(&receiver.rx);
    }

    match timeout {
        Some(timeout) => select.ready_timeout(timeout).ok(),
        None => Some(select.ready()),
    }
}
