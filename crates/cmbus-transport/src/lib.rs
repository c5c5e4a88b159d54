//! Transport primitives for the cmbus message bus.
//!
//! Two carriers live here:
//! - bounded, frame-preserving channels between the broker and its plugins,
//!   with a high-water mark and a poller across several channels
//! - Unix domain stream sockets, the byte-stream carrier used by API clients
//!
//! Nothing in this crate knows about tags or envelopes; it moves opaque frames
//! and bytes.

pub mod channel;
pub mod error;
pub mod traits;

#[cfg(unix)]
pub mod uds;

pub use channel::{channel, poll, ChannelReceiver, ChannelSender, Multipart, DEFAULT_HWM};
pub use error::{Result, TransportError};
pub use traits::{IpcStream, Readiness};

#[cfg(unix)]
pub use uds::UnixDomainSocket;
