use std::io::{ErrorKind, Write};

use bytes::BytesMut;
use cmbus_transport::{IpcStream, TransportError};

use crate::codec::{encode_stream_envelope, encoded_len, StreamConfig};
use crate::envelope::Envelope;
use crate::error::{FrameError, Result};

/// Writes whole serialized envelopes to any `Write` stream.
pub struct EnvelopeWriter<T> {
    inner: T,
    buf: BytesMut,
    config: StreamConfig,
}

impl<T: Write> EnvelopeWriter<T> {
    /// Create a writer with default configuration.
    pub fn new(inner: T) -> Self {
        Self::with_config(inner, StreamConfig::default())
    }

    /// Create a writer with explicit configuration.
    pub fn with_config(inner: T, config: StreamConfig) -> Self {
        Self {
            inner,
            buf: BytesMut::with_capacity(config.buffer_capacity),
            config,
        }
    }

    /// Serialize and write one envelope (blocking).
    ///
    /// The body is preceded by its 4-byte length. Bodies larger than
    /// `buffer_capacity` are rejected before anything is written.
    pub fn write_envelope(&mut self, envelope: &Envelope) -> Result<()> {
        let size = encoded_len(envelope);
        if size > self.config.buffer_capacity {
            return Err(FrameError::InvalidArgument(format!(
                "serialized envelope is {size} bytes, stream capacity is {}",
                self.config.buffer_capacity
            )));
        }

        self.buf.clear();
        encode_stream_envelope(envelope, &mut self.buf)?;

        let mut offset = 0usize;
        while offset < self.buf.len() {
            match self.inner.write(&self.buf[offset..]) {
                Ok(0) => return Err(FrameError::Transport(TransportError::Disconnected)),
                Ok(n) => offset += n,
                Err(err) if err.kind() == ErrorKind::Interrupted => continue,
                Err(err) if err.kind() == ErrorKind::WouldBlock => continue,
                Err(err) => return Err(err.into()),
            }
        }

        self.flush()
    }

    /// Flush the underlying stream.
    pub fn flush(&mut self) -> Result<()> {
        loop {
            match self.inner.flush() {
                Ok(()) => return Ok(()),
                Err(err) if err.kind() == ErrorKind::Interrupted => continue,
                Err(err) if err.kind() == ErrorKind::WouldBlock => continue,
                Err(err) => return Err(err.into()),
            }
        }
    }

    pub fn get_ref(&self) -> &T {
        &self.inner
    }

    pub fn get_mut(&mut self) -> &mut T {
        &mut self.inner
    }

    pub fn into_inner(self) -> T {
        self.inner
    }

    /// Current configuration.
    pub fn config(&self) -> &StreamConfig {
        &self.config
    }
}

impl EnvelopeWriter<IpcStream> {
    /// Create a writer for `IpcStream` and apply the write timeout from config.
    pub fn with_config_ipc(inner: IpcStream, config: StreamConfig) -> Result<Self> {
        inner.set_write_timeout(config.write_timeout)?;
        Ok(Self::with_config(inner, config))
    }
}
