use std::collections::BTreeMap;
use std::path::Path;
use std::time::Duration;

use cmbus_transport::DEFAULT_HWM;
use serde::Deserialize;
use serde_json::Value;

use crate::error::{PluginError, Result};

/// Broker configuration, shared read-only with every plugin.
#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct BrokerConfig {
    /// Plugins to load, in order. Empty loads every registered plugin.
    pub plugins: Vec<String>,
    /// Default plugin timeout in milliseconds. `None` waits indefinitely.
    pub plugin_timeout_ms: Option<u64>,
    /// High-water mark for every channel the broker creates. Zero is unbounded.
    pub hwm: usize,
    /// This node's rank in the cluster.
    pub node: u32,
    /// Per-plugin settings, keyed by plugin name.
    pub settings: BTreeMap<String, Value>,
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            plugins: Vec::new(),
            plugin_timeout_ms: None,
            hwm: DEFAULT_HWM,
            node: 0,
            settings: BTreeMap::new(),
        }
    }
}

impl BrokerConfig {
    pub fn from_json(text: &str) -> Result<Self> {
        Ok(serde_json::from_str(text)?)
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let text = std::fs::read_to_string(path.as_ref())
            .map_err(|err| PluginError::Transport(err.into()))?;
        Self::from_json(&text)
    }

    pub fn plugin_timeout(&self) -> Option<Duration> {
        self.plugin_timeout_ms.map(Duration::from_millis)
    }

    /// Settings for one plugin, if configured.
    pub fn settings_for(&self, plugin: &str) -> Option<&Value> {
        self.settings.get(plugin)
    }
}
