use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::thread;

use cmbus_frame::{Envelope, FrameError, StreamConfig};
use cmbus_transport::UnixDomainSocket;
use tracing::{debug, info, warn};

use crate::client::ClientPort;
use crate::connector::BusConnection;
use crate::context::BrokerHandle;
use crate::error::{PluginError, Result};

/// Accepts stream connections and relays their envelopes into a broker.
pub struct BusListener {
    socket: UnixDomainSocket,
    stream_config: StreamConfig,
    next_conn_id: AtomicU64,
}

impl BusListener {
    /// Bind to a Unix domain socket path.
    pub fn bind(path: impl AsRef<Path>) -> Result<Self> {
        let socket = UnixDomainSocket::bind(path)?;
        Ok(Self {
            socket,
            stream_config: StreamConfig::default(),
            next_conn_id: AtomicU64::new(1),
        })
    }

    /// Override buffer capacity and timeouts for accepted connections.
    pub fn with_stream_config(mut self, config: StreamConfig) -> Self {
        self.stream_config = config;
        self
    }

    /// Accept the next connection and give it an auto-generated id.
    pub fn accept(&self) -> Result<BusConnection> {
        let id = self.next_conn_id.fetch_add(1, Ordering::Relaxed);
        let stream = self.socket.accept()?;
        BusConnection::from_stream(format!("conn-{id}"), stream, self.stream_config.clone())
    }

    /// Accept connections forever, relaying each on its own thread.
    ///
    /// Returns only when accepting fails.
    pub fn serve(&self, broker: &BrokerHandle) -> Result<()> {
        info!(path = %self.path().display(), "accepting connections");
        loop {
            let conn = self.accept()?;
            let client = broker.connect_client();
            let name = conn.id().to_string();
            debug!(connection = %name, creds = ?conn.peer_credentials(), "connection accepted");

            thread::Builder::new()
                .name(name.clone())
                .spawn(move || {
                    if let Err(err) = relay(conn, client) {
                        warn!(error = %err, "relay failed");
                    }
                })
                .map_err(|source| PluginError::Spawn { name, source })?;
        }
    }

    /// Bound socket path.
    pub fn path(&self) -> &Path {
        self.socket.path()
    }
}

/// Shuttle envelopes between one connection and the broker until the peer
/// goes away.
///
/// Inbound envelopes are submitted as requests under the client's address;
/// replies are written back as they arrive.
pub fn relay(conn: BusConnection, client: ClientPort) -> Result<()> {
    let id = conn.id().to_string();
    let (mut reader, mut writer) = conn.into_split();
    let (sender, replies) = client.into_split();

    let pump_id = id.clone();
    let pump = thread::Builder::new()
        .name(format!("{id}-replies"))
        .spawn(move || {
            while let Ok(frames) = replies.recv() {
                match writer.write_envelope(&Envelope::from(frames)) {
                    Ok(()) => {}
                    Err(FrameError::InvalidArgument(reason)) => {
                        warn!(connection = %pump_id, %reason, "reply dropped");
                    }
                    Err(err) => {
                        debug!(connection = %pump_id, error = %err, "reply not written");
                        break;
                    }
                }
            }
            // Without a reply path the connection is useless; end the read loop too.
            if let Err(err) = writer.get_ref().shutdown() {
                debug!(connection = %pump_id, error = %err, "shutdown failed");
            }
        })
        .map_err(|source| PluginError::Spawn {
            name: format!("{id}-replies"),
            source,
        })?;

    loop {
        match reader.read_envelope() {
            Ok(envelope) => {
                if let Err(err) = sender.send(envelope) {
                    warn!(connection = %id, error = %err, "request not submitted");
                    break;
                }
            }
            Err(FrameError::Protocol(reason)) => {
                debug!(connection = %id, %reason, "closing connection");
                break;
            }
            Err(err) => {
                warn!(connection = %id, error = %err, "read failed");
                break;
            }
        }
    }

    // Dropping the sender detaches the client, which ends the reply pump.
    drop(sender);
    pump.join()
        .map_err(|_| PluginError::ThreadPanicked(format!("{id}-replies")))
}

#[cfg(test)]
mod tests {
    use std::path::PathBuf;
    use std::time::Duration;

    use cmbus_frame::{MessageType, RecvMode};
    use serde_json::json;

    use super::*;
    use crate::broker::Broker;
    use crate::config::BrokerConfig;
    use crate::connector::connect_with_config;
    use crate::context::PluginContext;
    use crate::plugin::Plugin;
    use crate::registry::{PluginDescriptor, PluginRegistry};

    struct Echo;

    impl Plugin for Echo {
        fn receive(
            &mut self,
            ctx: &mut PluginContext,
            envelope: Envelope,
            kind: MessageType,
        ) -> crate::error::Result<()> {
            if kind == MessageType::Request {
                ctx.respond(envelope)?;
            }
            Ok(())
        }
    }

    fn make_sock_path(tag: &str) -> PathBuf {
        let dir = std::path::PathBuf::from(format!(
            "/tmp/cmbus-{}-{}-{}",
            tag,
            std::process::id(),
            std::time::SystemTime::now()
                .duration_since(std::time::UNIX_EPOCH)
                .expect("time should be after epoch")
                .as_nanos()
        ));
        std::fs::create_dir_all(&dir).expect("temp dir should be creatable");
        dir.join("bus.sock")
    }

    fn start_serving(sock_path: &Path) -> Broker {
        start_serving_with(sock_path, StreamConfig::default())
    }

    fn start_serving_with(sock_path: &Path, stream_config: StreamConfig) -> Broker {
        let mut registry = PluginRegistry::new();
        registry
            .register(PluginDescriptor::new("echo", || Box::new(Echo)))
            .expect("echo should register");
        let broker = Broker::start(BrokerConfig::default(), &registry).expect("broker should start");

        let listener = BusListener::bind(sock_path)
            .expect("listener should bind")
            .with_stream_config(stream_config);
        let handle = broker.handle();
        thread::spawn(move || {
            let _ = listener.serve(&handle);
        });
        broker
    }

    fn client_config() -> StreamConfig {
        StreamConfig {
            read_timeout: Some(Duration::from_secs(5)),
            write_timeout: Some(Duration::from_secs(5)),
            ..StreamConfig::default()
        }
    }

    #[test]
    fn accept_assigns_sequential_ids() {
        let sock_path = make_sock_path("accept");
        let listener = BusListener::bind(&sock_path).expect("listener should bind");

        let server = thread::spawn(move || {
            let first = listener.accept().expect("first accept should succeed");
            let second = listener.accept().expect("second accept should succeed");
            assert_eq!(first.id(), "conn-1");
            assert_eq!(second.id(), "conn-2");
        });

        let _c1 = connect_with_config(&sock_path, client_config()).expect("first client should connect");
        let _c2 = connect_with_config(&sock_path, client_config()).expect("second client should connect");
        server.join().expect("server thread should finish");

        if let Some(parent) = sock_path.parent() {
            let _ = std::fs::remove_dir_all(parent);
        }
    }

    #[test]
    fn request_over_socket_gets_reply() {
        let sock_path = make_sock_path("echo");
        let _broker = start_serving(&sock_path);

        let mut conn = connect_with_config(&sock_path, client_config()).expect("client should connect");
        let request = cmbus_frame::encode("echo.hi", Some(&json!({"x": 1})), None).expect("encode");
        conn.send(&request).expect("send should succeed");

        let reply = conn.recv(RecvMode::Blocking).expect("reply should arrive");
        assert_eq!(reply, request);

        if let Some(parent) = sock_path.parent() {
            let _ = std::fs::remove_dir_all(parent);
        }
    }

    #[test]
    fn unclaimed_tag_over_socket_is_nakked() {
        let sock_path = make_sock_path("nak");
        let _broker = start_serving(&sock_path);

        let mut conn = connect_with_config(&sock_path, client_config()).expect("client should connect");
        conn.send(&Envelope::from_frames(["kvs.get"]))
            .expect("send should succeed");

        let reply = conn.recv(RecvMode::Blocking).expect("reply should arrive");
        assert_eq!(reply.tag().expect("tag"), "kvs.get.NAK");

        if let Some(parent) = sock_path.parent() {
            let _ = std::fs::remove_dir_all(parent);
        }
    }

    #[test]
    fn pipelined_requests_each_get_a_reply() {
        let sock_path = make_sock_path("pipeline");
        let _broker = start_serving(&sock_path);

        let mut conn = connect_with_config(&sock_path, client_config()).expect("client should connect");
        let first = Envelope::from_frames(["echo.a"]);
        let second = Envelope::from_frames(["echo.b"]);
        conn.send(&first).expect("first send should succeed");
        conn.send(&second).expect("second send should succeed");

        assert_eq!(conn.recv(RecvMode::Blocking).expect("first reply"), first);
        assert_eq!(conn.recv(RecvMode::Blocking).expect("second reply"), second);

        if let Some(parent) = sock_path.parent() {
            let _ = std::fs::remove_dir_all(parent);
        }
    }

    #[test]
    fn oversized_reply_does_not_stall_connection() {
        let sock_path = make_sock_path("oversized");
        let _broker = start_serving_with(
            &sock_path,
            StreamConfig {
                buffer_capacity: 64,
                ..StreamConfig::default()
            },
        );

        let mut conn = connect_with_config(&sock_path, client_config()).expect("client should connect");
        // 62-byte body; its NAK is 66 bytes and cannot be written back.
        let big = cmbus_frame::encode("kvs.get", Some(&json!({"k": "x".repeat(45)})), None)
            .expect("encode");
        assert_eq!(cmbus_frame::encoded_len(&big), 62);
        conn.send(&big).expect("send should succeed");

        let small = Envelope::from_frames(["echo.x"]);
        conn.send(&small).expect("send should succeed");

        assert_eq!(conn.recv(RecvMode::Blocking).expect("reply should arrive"), small);

        if let Some(parent) = sock_path.parent() {
            let _ = std::fs::remove_dir_all(parent);
        }
    }
}
