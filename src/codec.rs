use std::env;
use std::io::Cursor;

use bytes::{Buf, BytesMut};
use tokio_util::codec::{Decoder, Encoder};
use tracing::warn;

use crate::frame::{self, DecodeOptions, Frame, DEFAULT_MAX_PAYLOAD_LEN};
use crate::request::Request;
use crate::Error;

/// Decodes replies and encodes requests.
///
/// Decoding is two-phase: `Frame::check` finds the end of the next frame without building it, then
/// `Frame::parse` builds it from exactly those bytes. A frame with malformed content but intact
/// framing is consumed and reported as an error, so the following replies stay readable.
#[derive(Clone, Debug)]
pub struct FrameCodec {
    options: DecodeOptions,
}

impl FrameCodec {
    pub fn new(options: DecodeOptions) -> Self {
        Self { options }
    }

    pub fn options(&self) -> &DecodeOptions {
        &self.options
    }

    /// The payload bound, overridable through the `MAX_FRAME_SIZE` environment variable.
    pub fn max_frame_size() -> usize {
        match env::var("MAX_FRAME_SIZE") {
            Ok(value) => value.parse().unwrap_or_else(|_| {
                warn!("ignoring MAX_FRAME_SIZE={:?}, it must be a number", value);
                DEFAULT_MAX_PAYLOAD_LEN
            }),
            Err(_) => DEFAULT_MAX_PAYLOAD_LEN,
        }
    }
}

impl Default for FrameCodec {
    fn default() -> Self {
        Self::new(DecodeOptions {
            max_payload_len: FrameCodec::max_frame_size(),
            ..DecodeOptions::default()
        })
    }
}

impl Decoder for FrameCodec {
    type Item = Frame;
    type Error = Error;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        let mut cursor = Cursor::new(&src[..]);
        match Frame::check(&mut cursor, &self.options) {
            Ok(()) => {}
            Err(frame::Error::Incomplete) => return Ok(None), // Not enough data to parse a frame.
            Err(err) => return Err(err.into()),
        }

        let len = cursor.position() as usize;
        let frame = Frame::parse(&mut Cursor::new(&src[..len]), &self.options);

        // Remove the frame from the buffer whether or not its content was valid.
        src.advance(len);

        Ok(Some(frame?))
    }
}

impl Encoder<&Request> for FrameCodec {
    type Error = Error;

    fn encode(&mut self, request: &Request, dst: &mut BytesMut) -> Result<(), Self::Error> {
        request.encode(dst);
        Ok(())
    }
}

impl Encoder<&Frame> for FrameCodec {
    type Error = Error;

    fn encode(&mut self, frame: &Frame, dst: &mut BytesMut) -> Result<(), Self::Error> {
        frame.encode(dst);
        Ok(())
    }
}
