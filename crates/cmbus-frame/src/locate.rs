//! Frame locator.
//!
//! Finds the tag, json, data, and sender frames of an envelope whether or not
//! it crossed any routing hops. No format flag is carried: the first zero-length
//! frame is the delimiter, and without one the envelope is taken as hop-free.

use bytes::Bytes;

use crate::envelope::Envelope;

/// Index of the delimiter frame, if the envelope was routed.
pub fn delimiter_index(frames: &[Bytes]) -> Option<usize> {
    frames.iter().position(Bytes::is_empty)
}

/// Index of the tag frame.
///
/// The frame right after the delimiter; frame 0 when there is no delimiter
/// (or nothing follows it). `None` only for an empty envelope.
pub fn tag_index(frames: &[Bytes]) -> Option<usize> {
    if frames.is_empty() {
        return None;
    }
    match delimiter_index(frames) {
        Some(delimiter) if delimiter + 1 < frames.len() => Some(delimiter + 1),
        _ => Some(0),
    }
}

/// Index of the json frame: the one right after the tag.
pub fn json_index(frames: &[Bytes]) -> Option<usize> {
    next_index(frames, tag_index(frames)?)
}

/// Index of the data frame: the one right after the json frame.
pub fn data_index(frames: &[Bytes]) -> Option<usize> {
    next_index(frames, json_index(frames)?)
}

/// Index of the innermost routing address, the frame just before the delimiter.
pub fn sender_index(frames: &[Bytes]) -> Option<usize> {
    match delimiter_index(frames)? {
        0 => None,
        delimiter => Some(delimiter - 1),
    }
}

fn next_index(frames: &[Bytes], index: usize) -> Option<usize> {
    let next = index + 1;
    (next < frames.len()).then_some(next)
}

impl Envelope {
    /// The tag frame.
    pub fn tag_frame(&self) -> Option<&Bytes> {
        tag_index(self.frames()).and_then(|i| self.frame(i))
    }

    /// The json frame, if present.
    pub fn json_frame(&self) -> Option<&Bytes> {
        json_index(self.frames()).and_then(|i| self.frame(i))
    }

    /// The data frame, if present.
    pub fn data_frame(&self) -> Option<&Bytes> {
        data_index(self.frames()).and_then(|i| self.frame(i))
    }

    /// The innermost routing address, used to build a reply.
    pub fn sender_frame(&self) -> Option<&Bytes> {
        sender_index(self.frames()).and_then(|i| self.frame(i))
    }
}
