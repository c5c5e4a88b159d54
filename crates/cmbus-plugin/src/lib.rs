//! Plugin dispatch for the cmbus message bus.
//!
//! A [`Broker`] loads plugins from a compile-time [`PluginRegistry`], gives
//! each one a [`PluginContext`] with private channels and its own thread, and
//! routes envelopes between them by tag prefix. Requests nobody claims come
//! back to their sender with a `.NAK` tag.

pub mod broker;
pub mod client;
pub mod config;
pub mod context;
mod dispatch;
pub mod error;
pub mod plugin;
pub mod registry;
pub mod state;

#[cfg(unix)]
pub mod connector;
#[cfg(unix)]
pub mod listener;

pub use broker::Broker;
pub use client::{ClientPort, ClientSender};
pub use config::BrokerConfig;
pub use context::{BrokerHandle, Outbound, PluginContext};
pub use error::{PluginError, Result};
pub use plugin::Plugin;
pub use registry::{PluginDescriptor, PluginRegistry};
pub use state::PluginState;

#[cfg(unix)]
pub use connector::{connect, connect_with_config, BusConnection};
#[cfg(unix)]
pub use listener::{relay, BusListener};
