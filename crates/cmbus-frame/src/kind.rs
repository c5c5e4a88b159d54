//! Message classification and reserved tag pieces.

use std::fmt;

/// Separator between levels of a hierarchical tag (`"kvs.get"`).
pub const TAG_SEPARATOR: char = '.';

/// Suffix the broker appends to a request tag nobody claims.
pub const NAK_SUFFIX: &str = ".NAK";

/// How an envelope is to be treated, decided by the channel it arrived on.
///
/// The type is never encoded in the frames themselves.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MessageType {
    /// Expects exactly one reply along the recorded return path.
    Request,
    /// Reply to a request this side sent earlier.
    Response,
    /// Published to every subscriber; no reply path.
    Event,
}

impl MessageType {
    /// Lowercase name for logs and CLI output.
    pub fn as_str(self) -> &'static str {
        match self {
            MessageType::Request => "request",
            MessageType::Response => "response",
            MessageType::Event => "event",
        }
    }
}

impl fmt::Display for MessageType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
