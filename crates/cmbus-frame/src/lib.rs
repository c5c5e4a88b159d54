//! Multi-frame envelopes for the cmbus message bus.
//!
//! Every piece of broker and plugin traffic is an [`Envelope`]:
//! - zero or more routing addresses, then a zero-length delimiter if any
//! - a dot-separated tag such as `kvs.get`
//! - an optional JSON document, then optional opaque data
//!
//! This crate locates those parts, encodes and decodes them, matches and
//! rewrites tags, and moves envelopes over channels or byte streams.

pub mod adapter;
pub mod codec;
pub mod envelope;
pub mod error;
pub mod kind;
pub mod locate;
pub mod matcher;
pub mod message;
pub mod mutate;
pub mod reader;
pub mod writer;

pub use adapter::{EnvelopeSink, EnvelopeSource, RecvMode};
pub use codec::{
    decode_envelope, decode_stream_envelope, encode_envelope, encode_stream_envelope, encoded_len,
    StreamConfig, DEFAULT_BUFFER_CAPACITY, ENVELOPE_HEADER_LEN,
};
pub use envelope::Envelope;
pub use error::{FrameError, Result};
pub use kind::{MessageType, NAK_SUFFIX, TAG_SEPARATOR};
pub use message::{decode, encode, Message};
pub use reader::EnvelopeReader;
pub use writer::EnvelopeWriter;
