use std::fmt;
use std::sync::atomic::{AtomicU8, Ordering};

/// Lifecycle of one loaded plugin.
///
/// Moves strictly forward:
/// `Uninitialized -> Initialized -> Running -> Finalizing -> Terminated`.
/// A failed init jumps straight to `Terminated`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
#[repr(u8)]
pub enum PluginState {
    Uninitialized = 0,
    Initialized = 1,
    Running = 2,
    Finalizing = 3,
    Terminated = 4,
}

impl PluginState {
    pub fn as_str(self) -> &'static str {
        match self {
            PluginState::Uninitialized => "uninitialized",
            PluginState::Initialized => "initialized",
            PluginState::Running => "running",
            PluginState::Finalizing => "finalizing",
            PluginState::Terminated => "terminated",
        }
    }

    fn from_u8(raw: u8) -> Self {
        match raw {
            0 => PluginState::Uninitialized,
            1 => PluginState::Initialized,
            2 => PluginState::Running,
            3 => PluginState::Finalizing,
            _ => PluginState::Terminated,
        }
    }
}

impl fmt::Display for PluginState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// State shared between a plugin's thread and the broker that routes to it.
#[derive(Debug)]
pub(crate) struct StateCell(AtomicU8);

impl StateCell {
    pub(crate) fn new() -> Self {
        Self(AtomicU8::new(PluginState::Uninitialized as u8))
    }

    pub(crate) fn get(&self) -> PluginState {
        PluginState::from_u8(self.0.load(Ordering::Acquire))
    }

    /// Advance to `next`. Backward moves are ignored.
    pub(crate) fn advance(&self, next: PluginState) -> PluginState {
        let prev = self.0.fetch_max(next as u8, Ordering::AcqRel);
        PluginState::from_u8(prev)
    }
}
