//! Reassembly of fragmented messages.
//!
//! A message is one `Text` or `Binary` frame followed by any number of `Continuation` frames,
//! the last of which has FIN set. Control frames may be interleaved anywhere and pass through
//! without touching the message being accumulated.
//!
//! The reassembler does not bound the accumulated size. Callers enforce their own limit with
//! [`Reassembler::buffered_len`] before pushing the next fragment.
use bytes::BytesMut;

use crate::{
    frame::{Frame, FrameView, OpCode},
    FrameError, Result,
};

/// Per-connection fragment accumulator.
#[derive(Debug, Default)]
pub struct Reassembler {
    /// Opcode of the message in progress.
    fragment: Option<OpCode>,
    /// Accumulated data from fragmented frames.
    accumulated: BytesMut,
}

impl Reassembler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Processes one frame.
    ///
    /// - Control frames are returned immediately.
    /// - A `Text` or `Binary` frame while a message is in progress fails with
    ///   [`FrameError::InvalidFragment`].
    /// - A `Continuation` frame without a message in progress fails with
    ///   [`FrameError::InvalidContinuationFrame`].
    /// - The frame with FIN set completes the message, which is returned with the opcode of its
    ///   first frame and the concatenated payload.
    ///
    /// Returns `Ok(None)` while the message is still incomplete.
    pub fn push(&mut self, frame: Frame) -> Result<Option<FrameView>> {
        let opcode = frame.opcode();
        match opcode {
            OpCode::Text | OpCode::Binary => {
                if self.fragment.is_some() {
                    return Err(FrameError::InvalidFragment.into());
                }

                if frame.fin() {
                    Ok(Some(FrameView::from(frame)))
                } else {
                    self.fragment = Some(opcode);
                    self.accumulated.extend_from_slice(frame.payload());
                    Ok(None)
                }
            }
            OpCode::Continuation => {
                let opcode = self
                    .fragment
                    .ok_or(FrameError::InvalidContinuationFrame)?;

                self.accumulated.extend_from_slice(frame.payload());
                if !frame.fin() {
                    return Ok(None);
                }

                self.fragment = None;
                let payload = std::mem::take(&mut self.accumulated);
                Ok(Some(FrameView::from((opcode, payload))))
            }
            OpCode::Close | OpCode::Ping | OpCode::Pong => Ok(Some(FrameView::from(frame))),
        }
    }

    /// Returns `true` while a fragmented message is being accumulated.
    pub fn in_progress(&self) -> bool {
        self.fragment.is_some()
    }

    /// Number of payload bytes held for the message in progress.
    pub fn buffered_len(&self) -> usize {
        self.accumulated.len()
    }

    /// Drops the message in progress.
    pub fn reset(&mut self) {
        self.fragment = None;
        self.accumulated.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{frame::FrameBuilder, WebSocketError};

    fn fragment(opcode: OpCode, fin: bool, payload: &'static str) -> Frame {
        FrameBuilder::new(opcode)
            .fin(fin)
            .payload(payload)
            .build()
            .unwrap()
    }

    #[test]
    fn test_reassembles_text_message() {
        let mut reassembler = Reassembler::new();

        assert!(reassembler
            .push(fragment(OpCode::Text, false, "Hel"))
            .unwrap()
            .is_none());
        assert!(reassembler
            .push(fragment(OpCode::Continuation, false, "lo "))
            .unwrap()
            .is_none());
        assert_eq!(reassembler.buffered_len(), 6);

        let message = reassembler
            .push(fragment(OpCode::Continuation, true, "World"))
            .unwrap()
            .unwrap();

        assert_eq!(message.opcode, OpCode::Text);
        assert_eq!(message.as_str(), Some("Hello World"));
        assert!(!reassembler.in_progress());
        assert_eq!(reassembler.buffered_len(), 0);
    }

    #[test]
    fn test_unfragmented_message_passes_through() {
        let mut reassembler = Reassembler::new();
        let message = reassembler
            .push(fragment(OpCode::Binary, true, "data"))
            .unwrap()
            .unwrap();
        assert_eq!(message.opcode, OpCode::Binary);
        assert_eq!(&message.payload[..], b"data");
    }

    #[test]
    fn test_continuation_without_message() {
        let mut reassembler = Reassembler::new();
        let err = reassembler
            .push(fragment(OpCode::Continuation, true, "orphan"))
            .unwrap_err();
        assert!(matches!(
            err,
            WebSocketError::InvalidFrame(FrameError::InvalidContinuationFrame)
        ));
    }

    #[test]
    fn test_interleaved_message_start() {
        let mut reassembler = Reassembler::new();
        reassembler.push(fragment(OpCode::Text, false, "a")).unwrap();

        let err = reassembler
            .push(fragment(OpCode::Binary, true, "b"))
            .unwrap_err();
        assert!(matches!(
            err,
            WebSocketError::InvalidFrame(FrameError::InvalidFragment)
        ));
    }

    #[test]
    fn test_control_frames_mid_message() {
        let mut reassembler = Reassembler::new();
        reassembler.push(fragment(OpCode::Text, false, "one ")).unwrap();

        let ping = reassembler
            .push(fragment(OpCode::Ping, true, "ping"))
            .unwrap()
            .unwrap();
        assert_eq!(ping.opcode, OpCode::Ping);
        assert_eq!(&ping.payload[..], b"ping");
        assert_eq!(reassembler.buffered_len(), 4);

        let close = reassembler
            .push(FrameBuilder::close().build().unwrap())
            .unwrap()
            .unwrap();
        assert_eq!(close.opcode, OpCode::Close);

        let message = reassembler
            .push(fragment(OpCode::Continuation, true, "two"))
            .unwrap()
            .unwrap();
        assert_eq!(message.as_str(), Some("one two"));
    }

    #[test]
    fn test_reset() {
        let mut reassembler = Reassembler::new();
        reassembler.push(fragment(OpCode::Binary, false, "abc")).unwrap();
        reassembler.reset();

        assert!(!reassembler.in_progress());
        assert!(reassembler
            .push(fragment(OpCode::Text, true, "fresh"))
            .unwrap()
            .is_some());
    }
}
