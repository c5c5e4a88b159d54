//! In-place envelope edits and reply-address extraction.

use bytes::{BufMut, Bytes, BytesMut};
use serde_json::Value;
use tracing::debug;

use crate::envelope::Envelope;
use crate::error::{FrameError, Result};
use crate::kind::{MessageType, NAK_SUFFIX};
use crate::locate;

impl Envelope {
    /// Append `.NAK` to the tag frame. Every other frame is left as is.
    pub fn append_nak(&mut self) -> Result<()> {
        let index = locate::tag_index(self.frames())
            .ok_or_else(|| FrameError::Protocol("envelope has no tag frame".to_string()))?;
        let tag = &self.frames()[index];

        let mut nak = BytesMut::with_capacity(tag.len() + NAK_SUFFIX.len());
        nak.put_slice(tag);
        nak.put_slice(NAK_SUFFIX.as_bytes());
        self.replace_frame(index, nak.freeze());
        Ok(())
    }

    /// Turn an unclaimed request into its NAK reply.
    ///
    /// Only requests have a single return path, so anything else is refused.
    pub fn nak_request(&mut self, kind: MessageType) -> Result<()> {
        if kind != MessageType::Request {
            return Err(FrameError::InvalidArgument(format!(
                "only requests can be NAKed, got {kind}"
            )));
        }
        self.append_nak()
    }

    /// True if the tag carries the `.NAK` suffix.
    pub fn is_nak(&self) -> bool {
        self.tag_frame()
            .is_some_and(|tag| tag.ends_with(NAK_SUFFIX.as_bytes()))
    }

    /// Overwrite the json frame with `json`. Does not create a missing one.
    pub fn replace_json(&mut self, json: &Value) -> Result<()> {
        let index = locate::json_index(self.frames()).ok_or_else(|| {
            FrameError::InvalidArgument("envelope has no json frame".to_string())
        })?;
        self.replace_frame(index, Bytes::from(json.to_string()));
        Ok(())
    }

    /// Replace the json frame, or add one right after a bare tag.
    pub fn set_json(&mut self, json: &Value) -> Result<()> {
        if locate::json_index(self.frames()).is_some() {
            return self.replace_json(json);
        }
        let tag = locate::tag_index(self.frames())
            .ok_or_else(|| FrameError::Protocol("envelope has no tag frame".to_string()))?;
        self.insert_frame(tag + 1, Bytes::from(json.to_string()));
        Ok(())
    }

    /// Owned copy of the innermost routing address.
    pub fn sender_address(&self) -> Result<Bytes> {
        match self.sender_frame() {
            Some(frame) => Ok(Bytes::copy_from_slice(frame)),
            None => {
                debug!(frames = self.len(), "envelope has no sender address");
                Err(FrameError::NoSender)
            }
        }
    }

    /// Copy the data frame into `buf`, returning the number of bytes copied.
    pub fn copy_data(&self, buf: &mut [u8]) -> Result<usize> {
        let data = self.data_frame().ok_or_else(|| {
            FrameError::InvalidArgument("envelope has no data frame".to_string())
        })?;
        if data.len() > buf.len() {
            return Err(FrameError::InvalidArgument(format!(
                "buffer too small for data frame ({} bytes, have {})",
                data.len(),
                buf.len()
            )));
        }
        buf[..data.len()].copy_from_slice(data);
        Ok(data.len())
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn nak_touches_only_the_tag() {
        let mut env = Envelope::from_frames(["hop2", "hop1", "", "kvs.get", "{\"k\":1}", "raw"]);
        let before = env.clone();

        env.append_nak().unwrap();

        assert_eq!(env.tag().unwrap(), "kvs.get.NAK");
        assert!(env.is_nak());
        for i in [0, 1, 2, 4, 5] {
            assert_eq!(env.frame(i), before.frame(i), "frame {i} changed");
        }
    }

    #[test]
    fn nak_on_unrouted_envelope() {
        let mut env = Envelope::from_frames(["kvs.get"]);
        env.append_nak().unwrap();
        assert!(env.matches_tag("kvs.get.NAK").unwrap());
    }

    #[test]
    fn nak_without_tag_fails() {
        let mut env = Envelope::new();
        assert!(matches!(env.append_nak(), Err(FrameError::Protocol(_))));
    }

    #[test]
    fn nak_request_refuses_events() {
        let mut env = Envelope::from_frames(["hb"]);
        let err = env.nak_request(MessageType::Event).unwrap_err();
        assert!(matches!(err, FrameError::InvalidArgument(_)));
        assert_eq!(env.tag().unwrap(), "hb");

        env.nak_request(MessageType::Request).unwrap();
        assert_eq!(env.tag().unwrap(), "hb.NAK");
    }

    #[test]
    fn replace_json_keeps_other_frames() {
        let mut env = Envelope::from_frames(["hop", "", "kvs.get", "{}", "raw"]);
        env.replace_json(&json!({"val": 42})).unwrap();

        assert_eq!(env.json_frame().unwrap().as_ref(), b"{\"val\":42}");
        assert_eq!(env.data_frame().unwrap().as_ref(), b"raw");
        assert_eq!(env.sender_frame().unwrap().as_ref(), b"hop");
    }

    #[test]
    fn replace_json_needs_existing_frame() {
        let mut env = Envelope::from_frames(["kvs.get"]);
        let err = env.replace_json(&json!({})).unwrap_err();
        assert!(matches!(err, FrameError::InvalidArgument(_)));
        assert_eq!(env.len(), 1);
    }

    #[test]
    fn set_json_adds_frame_after_bare_tag() {
        let mut env = Envelope::from_frames(["hop", "", "hb.get"]);
        env.set_json(&json!({"epoch": 3})).unwrap();

        assert_eq!(env.len(), 4);
        assert_eq!(env.json_frame().unwrap().as_ref(), b"{\"epoch\":3}");
        assert_eq!(env.sender_frame().unwrap().as_ref(), b"hop");

        env.set_json(&json!({"epoch": 4})).unwrap();
        assert_eq!(env.len(), 4);
        assert_eq!(env.json_frame().unwrap().as_ref(), b"{\"epoch\":4}");
    }

    #[test]
    fn sender_address_of_routed_envelope() {
        let env = Envelope::from_frames(["hop2", "hop1", "", "kvs.get"]);
        assert_eq!(env.sender_address().unwrap().as_ref(), b"hop1");
    }

    #[test]
    fn sender_address_without_route_is_no_sender() {
        let env = Envelope::from_frames(["kvs.get", "{}"]);
        assert!(matches!(env.sender_address(), Err(FrameError::NoSender)));
    }

    #[test]
    fn copy_data_into_buffer() {
        let env = Envelope::from_frames(["kvs.put", "{}", "abc"]);

        let mut buf = [0u8; 8];
        assert_eq!(env.copy_data(&mut buf).unwrap(), 3);
        assert_eq!(&buf[..3], b"abc");

        let mut small = [0u8; 2];
        assert!(matches!(
            env.copy_data(&mut small),
            Err(FrameError::InvalidArgument(_))
        ));
    }
}
