/// Errors that can occur while loading, running, or routing to plugins.
#[derive(Debug, thiserror::Error)]
pub enum PluginError {
    /// Transport-level error.
    #[error("transport error: {0}")]
    Transport(#[from] cmbus_transport::TransportError),

    /// Envelope-level error.
    #[error("frame error: {0}")]
    Frame(#[from] cmbus_frame::FrameError),

    /// The configuration names a plugin the registry does not know.
    #[error("unknown plugin: {0}")]
    UnknownPlugin(String),

    /// A plugin with this name is already registered or loaded.
    #[error("duplicate plugin: {0}")]
    DuplicatePlugin(String),

    /// A plugin name that cannot serve as a tag prefix.
    #[error("invalid plugin name {name:?}: {reason}")]
    InvalidName { name: String, reason: &'static str },

    /// A plugin's init callback failed; the broker did not start.
    #[error("plugin {plugin} failed to initialize: {source}")]
    Init {
        plugin: String,
        #[source]
        source: Box<PluginError>,
    },

    /// Spawning a plugin or router thread failed.
    #[error("failed to spawn thread for {name}: {source}")]
    Spawn {
        name: String,
        source: std::io::Error,
    },

    /// A plugin or router thread panicked.
    #[error("thread for {0} panicked")]
    ThreadPanicked(String),

    /// Malformed broker configuration.
    #[error("invalid config: {0}")]
    Config(#[from] serde_json::Error),

    /// A plugin callback reported a failure of its own.
    #[error("{0}")]
    Callback(String),
}

impl PluginError {
    /// Convenience for callbacks that fail with a plain message.
    pub fn callback(message: impl Into<String>) -> Self {
        Self::Callback(message.into())
    }
}

pub type Result<T> = std::result::Result<T, PluginError>;
