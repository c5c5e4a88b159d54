use std::path::Path;

use cmbus_frame::{Envelope, EnvelopeReader, EnvelopeSource, EnvelopeWriter, RecvMode, StreamConfig};
use cmbus_transport::{IpcStream, UnixDomainSocket};

use crate::error::Result;

/// One end of a byte-stream connection carrying serialized envelopes.
pub struct BusConnection {
    id: String,
    reader: EnvelopeReader<IpcStream>,
    writer: EnvelopeWriter<IpcStream>,
}

impl BusConnection {
    /// Wrap a connected stream, applying the timeouts in `config`.
    pub fn from_stream(id: impl Into<String>, stream: IpcStream, config: StreamConfig) -> Result<Self> {
        let reader_stream = stream.try_clone()?;
        let reader = EnvelopeReader::with_config_ipc(reader_stream, config.clone())?;
        let writer = EnvelopeWriter::with_config_ipc(stream, config)?;
        Ok(Self {
            id: id.into(),
            reader,
            writer,
        })
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn send(&mut self, envelope: &Envelope) -> Result<()> {
        Ok(self.writer.write_envelope(envelope)?)
    }

    pub fn recv(&mut self, mode: RecvMode) -> Result<Envelope> {
        Ok(self.reader.recv_envelope(mode)?)
    }

    /// Peer `(pid, uid, gid)` where the platform reports it.
    pub fn peer_credentials(&self) -> Option<(u32, u32, u32)> {
        self.writer.get_ref().peer_credentials()
    }

    pub fn into_split(self) -> (EnvelopeReader<IpcStream>, EnvelopeWriter<IpcStream>) {
        (self.reader, self.writer)
    }
}

/// Connect to a serving broker's socket.
pub fn connect(path: impl AsRef<Path>) -> Result<BusConnection> {
    connect_with_config(path, StreamConfig::default())
}

/// Connect with explicit stream configuration.
pub fn connect_with_config(path: impl AsRef<Path>, config: StreamConfig) -> Result<BusConnection> {
    let path = path.as_ref();
    let stream = UnixDomainSocket::connect(path)?;
    BusConnection::from_stream(path.display().to_string(), stream, config)
}
