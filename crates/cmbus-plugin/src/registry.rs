use std::collections::BTreeMap;
use std::fmt;

use cmbus_frame::{NAK_SUFFIX, TAG_SEPARATOR};

use crate::error::{PluginError, Result};
use crate::plugin::Plugin;

/// Immutable record of a plugin the broker can load.
#[derive(Clone, Copy)]
pub struct PluginDescriptor {
    /// Name, also the tag prefix the plugin claims (`"kvs"` claims `kvs.*`).
    pub name: &'static str,
    /// Builds a fresh instance for each load.
    pub create: fn() -> Box<dyn Plugin>,
}

impl PluginDescriptor {
    pub const fn new(name: &'static str, create: fn() -> Box<dyn Plugin>) -> Self {
        Self { name, create }
    }
}

impl fmt::Debug for PluginDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PluginDescriptor")
            .field("name", &self.name)
            .finish_non_exhaustive()
    }
}

/// Compile-time set of plugins, keyed by name.
#[derive(Debug, Clone, Default)]
pub struct PluginRegistry {
    descriptors: BTreeMap<&'static str, PluginDescriptor>,
}

impl PluginRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a descriptor. Names must be unique and usable as a tag prefix.
    pub fn register(&mut self, descriptor: PluginDescriptor) -> Result<()> {
        validate_name(descriptor.name)?;
        if self.descriptors.contains_key(descriptor.name) {
            return Err(PluginError::DuplicatePlugin(descriptor.name.to_string()));
        }
        self.descriptors.insert(descriptor.name, descriptor);
        Ok(())
    }

    /// Builder-style `register`.
    pub fn with(mut self, descriptor: PluginDescriptor) -> Result<Self> {
        self.register(descriptor)?;
        Ok(self)
    }

    pub fn get(&self, name: &str) -> Option<&PluginDescriptor> {
        self.descriptors.get(name)
    }

    /// Registered names in sorted order.
    pub fn names(&self) -> impl Iterator<Item = &'static str> + '_ {
        self.descriptors.keys().copied()
    }

    pub fn len(&self) -> usize {
        self.descriptors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.descriptors.is_empty()
    }
}

fn validate_name(name: &str) -> Result<()> {
    let reason = if name.is_empty() {
        "must not be empty"
    } else if name.contains(TAG_SEPARATOR) {
        "must not contain the tag separator"
    } else if name.ends_with(NAK_SUFFIX.trim_start_matches(TAG_SEPARATOR)) {
        "must not end with the NAK suffix"
    } else {
        return Ok(());
    };
    Err(PluginError::InvalidName {
        name: name.to_string(),
        reason,
    })
}
