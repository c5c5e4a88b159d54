use std::io::{ErrorKind, Read};

use bytes::BytesMut;
use cmbus_transport::IpcStream;

use crate::codec::{decode_stream_envelope, StreamConfig};
use crate::envelope::Envelope;
use crate::error::{FrameError, Result};

const READ_CHUNK_SIZE: usize = 8 * 1024;

/// Reads length-delimited envelopes from a byte stream.
///
/// Partial reads are buffered; each call yields exactly one envelope and
/// keeps whatever followed it for the next call.
pub struct EnvelopeReader<T> {
    inner: T,
    buf: BytesMut,
    config: StreamConfig,
}

impl<T: Read> EnvelopeReader<T> {
    /// Create a reader with default configuration.
    pub fn new(inner: T) -> Self {
        Self::with_config(inner, StreamConfig::default())
    }

    /// Create a reader with explicit configuration.
    pub fn with_config(inner: T, config: StreamConfig) -> Self {
        Self {
            inner,
            buf: BytesMut::with_capacity(READ_CHUNK_SIZE),
            config,
        }
    }

    /// Read and decode the next envelope (blocking).
    ///
    /// A zero-byte read is a protocol violation, not end-of-stream.
    pub fn read_envelope(&mut self) -> Result<Envelope> {
        loop {
            if let Some(envelope) = self.take_buffered()? {
                return Ok(envelope);
            }
            self.fill()?;
        }
    }

    /// Pop an envelope that is already fully buffered.
    pub(crate) fn take_buffered(&mut self) -> Result<Option<Envelope>> {
        decode_stream_envelope(&mut self.buf, self.config.buffer_capacity)
    }

    /// One read from the stream into the buffer.
    pub(crate) fn fill(&mut self) -> Result<()> {
        let mut chunk = [0u8; READ_CHUNK_SIZE];
        loop {
            match self.inner.read(&mut chunk) {
                Ok(0) => {
                    return Err(FrameError::Protocol(format!(
                        "zero-byte read on stream ({} bytes buffered)",
                        self.buf.len()
                    )));
                }
                Ok(n) => {
                    self.buf.extend_from_slice(&chunk[..n]);
                    return Ok(());
                }
                Err(err) if err.kind() == ErrorKind::Interrupted => continue,
                Err(err) => return Err(err.into()),
            }
        }
    }

    /// Borrow the underlying stream.
    pub fn get_ref(&self) -> &T {
        &self.inner
    }

    /// Mutably borrow the underlying stream.
    pub fn get_mut(&mut self) -> &mut T {
        &mut self.inner
    }

    /// Consume the reader and return the inner stream.
    pub fn into_inner(self) -> T {
        self.inner
    }

    /// Current configuration.
    pub fn config(&self) -> &StreamConfig {
        &self.config
    }
}

impl EnvelopeReader<IpcStream> {
    /// Create a reader for `IpcStream` and apply the read timeout from config.
    pub fn with_config_ipc(inner: IpcStream, config: StreamConfig) -> Result<Self> {
        inner.set_read_timeout(config.read_timeout)?;
        Ok(Self::with_config(inner, config))
    }
}
