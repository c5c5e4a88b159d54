use bytes::Bytes;
use cmbus_transport::Multipart;

use crate::error::{FrameError, Result};
use crate::locate;

/// One bus message: an ordered list of opaque frames.
///
/// Layout, left to right:
/// ```text
/// [addr_1]..[addr_k]   k >= 0 routing hops, each non-empty
/// []                   delimiter, present iff k >= 1
/// [tag]                non-empty UTF-8, '.'-separated
/// [json]?              JSON document text
/// [data]?              opaque bytes, only after a json frame
/// ```
///
/// An envelope is owned by one thread at a time. Mutations replace frames in
/// place and never touch frames they are not about.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Envelope {
    frames: Vec<Bytes>,
}

impl Envelope {
    /// Create an envelope with no frames.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create an envelope from raw frames, as received off a channel.
    pub fn from_frames<I, F>(frames: I) -> Self
    where
        I: IntoIterator<Item = F>,
        F: Into<Bytes>,
    {
        Self {
            frames: frames.into_iter().map(Into::into).collect(),
        }
    }

    /// All frames, addresses and delimiter included.
    pub fn frames(&self) -> &[Bytes] {
        &self.frames
    }

    /// Frame at `index`, if any.
    pub fn frame(&self, index: usize) -> Option<&Bytes> {
        self.frames.get(index)
    }

    /// Number of frames.
    pub fn len(&self) -> usize {
        self.frames.len()
    }

    /// True if the envelope has no frames at all.
    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }

    /// Append a frame at the end.
    pub fn push(&mut self, frame: impl Into<Bytes>) {
        self.frames.push(frame.into());
    }

    /// Consume the envelope, yielding its frames.
    pub fn into_frames(self) -> Vec<Bytes> {
        self.frames
    }

    /// True if the envelope crossed at least one routing hop.
    pub fn is_routed(&self) -> bool {
        locate::delimiter_index(&self.frames).is_some()
    }

    /// Routing addresses, outermost first. Empty for an unrouted envelope.
    pub fn route(&self) -> &[Bytes] {
        match locate::delimiter_index(&self.frames) {
            Some(delimiter) => &self.frames[..delimiter],
            None => &[],
        }
    }

    /// Record a routing hop by prepending `address`.
    ///
    /// The first hop also inserts the delimiter between the address and the tag.
    pub fn push_hop(&mut self, address: impl Into<Bytes>) -> Result<()> {
        let address = address.into();
        if address.is_empty() {
            return Err(FrameError::InvalidArgument(
                "routing address must not be empty".to_string(),
            ));
        }
        if !self.is_routed() {
            self.frames.insert(0, Bytes::new());
        }
        self.frames.insert(0, address);
        Ok(())
    }

    /// Strip the outermost routing address.
    ///
    /// Removing the last address also removes the delimiter, leaving an
    /// unrouted envelope. Returns `None` if there is no routing address.
    pub fn pop_hop(&mut self) -> Option<Bytes> {
        let delimiter = locate::delimiter_index(&self.frames)?;
        if delimiter == 0 {
            return None;
        }
        let address = self.frames.remove(0);
        if delimiter == 1 {
            self.frames.remove(0);
        }
        Some(address)
    }

    pub(crate) fn replace_frame(&mut self, index: usize, frame: Bytes) {
        self.frames[index] = frame;
    }

    pub(crate) fn insert_frame(&mut self, index: usize, frame: Bytes) {
        self.frames.insert(index, frame);
    }
}

impl From<Multipart> for Envelope {
    fn from(frames: Multipart) -> Self {
        Self { frames }
    }
}

impl From<Envelope> for Multipart {
    fn from(envelope: Envelope) -> Self {
        envelope.frames
    }
}
