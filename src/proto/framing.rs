//! Length-prefixed frame codec.
//!
//! Every frame on the wire is a 4-byte big-endian unsigned length followed by
//! exactly that many bytes of UTF-8 JSON encoding an [`Envelope`]. The
//! decoder is incremental: it consumes complete frames from a growing buffer
//! and reports `Incomplete` until enough bytes arrive, so short reads are
//! handled by the caller's read loop.
//!
//! Oversize frames and malformed JSON are protocol violations that close the
//! connection; the decoder signals them as `Invalid`.

use crate::core::error::{HubError, HubResult};
use crate::proto::message::Envelope;
use bytes::{BufMut, Bytes, BytesMut};

/// Width of the length prefix in bytes.
pub const LENGTH_PREFIX_SIZE: usize = 4;

/// Outcome of one decode attempt against the buffer.
#[derive(Debug)]
pub enum DecodeOutcome {
    /// A complete envelope was decoded and consumed from the buffer.
    Complete(Envelope),
    /// More data is needed.
    Incomplete,
    /// The stream is corrupt; the connection must be closed.
    Invalid(String),
}

/// Incremental frame decoder with a configurable size cap.
#[derive(Debug, Clone, Copy)]
pub struct FrameDecoder {
    max_frame_size: usize,
}

impl FrameDecoder {
    /// Create a decoder enforcing the given frame size cap.
    pub fn new(max_frame_size: usize) -> Self {
        Self { max_frame_size }
    }

    /// Try to decode one frame from the front of `buffer`.
    ///
    /// On `Complete` the frame's bytes have been consumed; call again to
    /// drain further frames already buffered.
    pub fn decode(&self, buffer: &mut BytesMut) -> DecodeOutcome {
        if buffer.len() < LENGTH_PREFIX_SIZE {
            return DecodeOutcome::Incomplete;
        }

        let len = u32::from_be_bytes([buffer[0], buffer[1], buffer[2], buffer[3]]) as usize;
        if len == 0 {
            return DecodeOutcome::Invalid("zero-length frame".to_string());
        }
        if len > self.max_frame_size {
            return DecodeOutcome::Invalid(format!(
                "frame length {len} exceeds cap {}",
                self.max_frame_size
            ));
        }

        if buffer.len() < LENGTH_PREFIX_SIZE + len {
            return DecodeOutcome::Incomplete;
        }

        let frame = buffer.split_to(LENGTH_PREFIX_SIZE + len);
        let body = &frame[LENGTH_PREFIX_SIZE..];
        match serde_json::from_slice::<Envelope>(body) {
            Ok(envelope) => DecodeOutcome::Complete(envelope),
            Err(e) => DecodeOutcome::Invalid(format!("malformed envelope JSON: {e}")),
        }
    }
}

/// Encode an envelope into a single length-prefixed frame.
pub fn encode_frame(envelope: &Envelope, max_frame_size: usize) -> HubResult<Bytes> {
    let body = serde_json::to_vec(envelope).map_err(|e| HubError::internal(e.to_string()))?;
    if body.len() > max_frame_size {
        return Err(HubError::FrameDecode {
            detail: format!(
                "encoded frame of {} bytes exceeds cap {max_frame_size}",
                body.len()
            ),
        });
    }

    let mut frame = BytesMut::with_capacity(LENGTH_PREFIX_SIZE + body.len());
    frame.put_u32(body.len() as u32);
    frame.put_slice(&body);
    Ok(frame.freeze())
}
