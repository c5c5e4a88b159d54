//! Node-local message bus for a cluster control-plane broker.
//!
//! Broker and plugin traffic travels as multi-frame envelopes: optional
//! routing hops, a dot-separated tag, an optional JSON document, and optional
//! opaque data. Plugins attach to a broker, each on its own thread, and claim
//! the tags under their name.
//!
//! # Crate Structure
//!
//! - [`transport`] — Bounded channels, channel polling, Unix stream sockets
//! - [`frame`] — Envelope model, tag/json/data codec, matching, NAK, stream carrier
//! - [`plugin`] — Plugin lifecycle, broker routing, socket relay (behind `plugin` feature)

/// Re-export transport types.
pub mod transport {
    pub use cmbus_transport::*;
}

/// Re-export envelope types.
pub mod frame {
    pub use cmbus_frame::*;
}

/// Re-export plugin dispatch types (requires `plugin` feature).
#[cfg(feature = "plugin")]
pub mod plugin {
    pub use cmbus_plugin::*;
}
