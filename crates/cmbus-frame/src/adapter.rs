//! Send/receive over either carrier with the same logical framing.
//!
//! Channels hand frames across unchanged. Byte streams go through the
//! serializer in [`crate::codec`].

use std::fmt;
use std::io::{Read, Write};
use std::time::Duration;

use cmbus_transport::{ChannelReceiver, ChannelSender, Readiness};
use serde_json::Value;
use tracing::trace;

use crate::envelope::Envelope;
use crate::error::{FrameError, Result};
use crate::message::{self, Message};
use crate::reader::EnvelopeReader;
use crate::writer::EnvelopeWriter;

/// How a receive behaves when nothing is ready.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum RecvMode {
    /// Wait for the next envelope.
    #[default]
    Blocking,
    /// Fail with `WouldBlock` immediately, consuming nothing.
    NonBlocking,
}

/// Something envelopes can be sent into.
pub trait EnvelopeSink {
    /// Send one envelope, blocking until the carrier accepts it.
    fn send_envelope(&mut self, envelope: Envelope) -> Result<()>;

    /// Format a tag, encode it with optional json and data, and send it.
    ///
    /// ```ignore
    /// sink.send_formatted(Some(&json), None, format_args!("{}.hb", name))?;
    /// ```
    fn send_formatted(
        &mut self,
        json: Option<&Value>,
        data: Option<&[u8]>,
        tag: fmt::Arguments<'_>,
    ) -> Result<()> {
        let tag = fmt::format(tag);
        let envelope = message::encode(&tag, json, data)?;
        trace!(%tag, frames = envelope.len(), "sending formatted envelope");
        self.send_envelope(envelope)
    }

    /// Encode and send a decoded message.
    fn send_message(&mut self, msg: &Message) -> Result<()> {
        self.send_envelope(msg.encode()?)
    }
}

/// Something envelopes can be received from.
pub trait EnvelopeSource {
    /// Receive the next envelope.
    fn recv_envelope(&mut self, mode: RecvMode) -> Result<Envelope>;

    /// Receive and decode the next envelope.
    fn recv_message(&mut self, mode: RecvMode) -> Result<Message> {
        let envelope = self.recv_envelope(mode)?;
        message::decode(&envelope)
    }
}

impl EnvelopeSink for ChannelSender {
    fn send_envelope(&mut self, envelope: Envelope) -> Result<()> {
        self.send(envelope.into_frames())?;
        Ok(())
    }
}

impl EnvelopeSource for ChannelReceiver {
    fn recv_envelope(&mut self, mode: RecvMode) -> Result<Envelope> {
        let frames = match mode {
            RecvMode::Blocking => self.recv()?,
            RecvMode::NonBlocking => {
                if !self.is_ready() {
                    return Err(FrameError::WouldBlock);
                }
                self.try_recv()?
            }
        };
        Ok(Envelope::from(frames))
    }
}

impl<T: Write> EnvelopeSink for EnvelopeWriter<T> {
    fn send_envelope(&mut self, envelope: Envelope) -> Result<()> {
        self.write_envelope(&envelope)
    }
}

impl<T: Read + Readiness> EnvelopeSource for EnvelopeReader<T> {
    fn recv_envelope(&mut self, mode: RecvMode) -> Result<Envelope> {
        if mode == RecvMode::Blocking {
            return self.read_envelope();
        }
        if let Some(envelope) = self.take_buffered()? {
            return Ok(envelope);
        }
        if !self.get_ref().poll_readable(Duration::ZERO)? {
            return Err(FrameError::WouldBlock);
        }
        // A partial envelope stays buffered for the next call.
        self.fill()?;
        self.take_buffered()?.ok_or(FrameError::WouldBlock)
    }
}
