//! Exact and hierarchical-prefix tag matching.

use crate::envelope::Envelope;
use crate::error::{FrameError, Result};

impl Envelope {
    /// The resolved tag as text.
    ///
    /// Fails with `Protocol` for an envelope with no frames, an empty tag
    /// frame, or a tag that is not UTF-8.
    pub fn tag(&self) -> Result<&str> {
        let frame = self
            .tag_frame()
            .ok_or_else(|| FrameError::Protocol("envelope has no tag frame".to_string()))?;
        if frame.is_empty() {
            return Err(FrameError::Protocol("tag frame is empty".to_string()));
        }
        std::str::from_utf8(frame)
            .map_err(|err| FrameError::Protocol(format!("tag frame is not utf-8: {err}")))
    }

    /// True iff the resolved tag is exactly `tag`.
    pub fn matches_tag(&self, tag: &str) -> Result<bool> {
        let frame = self
            .tag_frame()
            .ok_or_else(|| FrameError::Protocol("envelope has no tag frame".to_string()))?;
        Ok(frame.as_ref() == tag.as_bytes())
    }

    /// Match the resolved tag against a hierarchical prefix.
    ///
    /// Returns the tag with `prefix` stripped when it matches, so a tag
    /// `"kvs.get.foo"` against `"kvs."` yields `Some("get.foo")`.
    pub fn match_prefix(&self, prefix: &str) -> Result<Option<&str>> {
        Ok(self.tag()?.strip_prefix(prefix))
    }
}
