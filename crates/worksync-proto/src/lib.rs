//! Wire protocol spoken between two worksync peers over a mesh link.
//!
//! The transport only guarantees small bounded writes, so every message is
//! serialized to JSON, wrapped in a length-prefixed frame and split into
//! chunks. The receiving side feeds raw chunks into a [`FrameAssembler`] and
//! gets whole messages back; a partial frame is never parsed.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Number of bytes in the frame length prefix.
pub const LEN_PREFIX_BYTES: usize = 4;

/// Default per-write byte ceiling. Mirrors the small MTU of the short-range
/// links this protocol was designed for.
pub const DEFAULT_MAX_CHUNK_BYTES: usize = 512;

/// Upper bound on a single reassembled frame. Anything larger is treated as
/// a protocol violation and the buffer is discarded.
pub const DEFAULT_MAX_FRAME_BYTES: usize = 4 * 1024 * 1024;

/// Kind of mutation carried inside a snapshot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WireKind {
    Create,
    Update,
    Delete,
}

/// One queued mutation as it travels between peers.
///
/// Field names on the wire match what the queue has always stored:
/// `type`, `collection`, `id`, `data`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WireOperation {
    #[serde(rename = "type")]
    pub kind: WireKind,
    pub collection: String,
    #[serde(rename = "id")]
    pub record_id: String,
    #[serde(rename = "data", default)]
    pub payload: serde_json::Value,
}

/// Messages exchanged over an established peer link.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum PeerMessage {
    /// Sent once after connecting so each side learns who it is talking to.
    Hello { device_name: String },
    /// A batch of pending mutations pushed to the peer.
    #[serde(rename = "sync")]
    Snapshot {
        operations: Vec<WireOperation>,
        #[serde(rename = "timestamp")]
        sent_at: DateTime<Utc>,
    },
    /// "My queue is empty, send me yours."
    #[serde(rename = "request")]
    SnapshotRequest,
    /// Receipt confirmation for a snapshot, used for logging only.
    Ack { received: usize },
}

/// A peer-delivered chunk sequence could not be reassembled or parsed.
#[derive(Debug, Error)]
pub enum FrameError {
    #[error("frame of {size} bytes exceeds the {max} byte limit")]
    Oversize { size: usize, max: usize },
    #[error("failed to decode peer frame: {0}")]
    Decode(#[from] serde_json::Error),
}

/// Serialize a message into a single length-prefixed frame.
pub fn encode_frame(message: &PeerMessage) -> Result<Vec<u8>, FrameError> {
    let body = serde_json::to_vec(message)?;
    let mut frame = Vec::with_capacity(LEN_PREFIX_BYTES + body.len());
    frame.extend_from_slice(&(body.len() as u32).to_be_bytes());
    frame.extend_from_slice(&body);
    Ok(frame)
}

/// Split a frame into transport-sized chunks.
///
/// `max_chunk` values below 1 are clamped to 1 so the split always makes
/// progress.
pub fn chunk_frame(frame: &[u8], max_chunk: usize) -> Vec<Vec<u8>> {
    let max_chunk = max_chunk.max(1);
    frame.chunks(max_chunk).map(|c| c.to_vec()).collect()
}

/// Reassembles length-prefixed frames from an arbitrary chunk stream.
///
/// Chunk boundaries carry no meaning: a chunk may hold a fraction of a frame
/// or several frames back to back. Completed messages are returned in order.
#[derive(Debug)]
pub struct FrameAssembler {
    buf: Vec<u8>,
    max_frame: usize,
}

impl Default for FrameAssembler {
    fn default() -> Self {
        Self::new()
    }
}

impl FrameAssembler {
    pub fn new() -> Self {
        Self::with_max_frame(DEFAULT_MAX_FRAME_BYTES)
    }

    pub fn with_max_frame(max_frame: usize) -> Self {
        Self {
            buf: Vec::new(),
            max_frame,
        }
    }

    /// Feed one received chunk, returning every message completed by it.
    ///
    /// On error the assembler discards everything it had buffered: a peer
    /// producing unparseable or oversized frames cannot be resynchronized
    /// against, and no partial data may survive to be enqueued later.
    pub fn feed(&mut self, chunk: &[u8]) -> Result<Vec<PeerMessage>, FrameError> {
        self.buf.extend_from_slice(chunk);

        let mut completed = Vec::new();
        loop {
            if self.buf.len() < LEN_PREFIX_BYTES {
                break;
            }
            let len = u32::from_be_bytes([self.buf[0], self.buf[1], self.buf[2], self.buf[3]])
                as usize;
            if len > self.max_frame {
                self.buf.clear();
                return Err(FrameError::Oversize {
                    size: len,
                    max: self.max_frame,
                });
            }
            if self.buf.len() < LEN_PREFIX_BYTES + len {
                break;
            }

            let body = self.buf[LEN_PREFIX_BYTES..LEN_PREFIX_BYTES + len].to_vec();
            self.buf.drain(..LEN_PREFIX_BYTES + len);

            match serde_json::from_slice::<PeerMessage>(&body) {
                Ok(message) => completed.push(message),
                Err(e) => {
                    self.buf.clear();
                    return Err(FrameError::Decode(e));
                }
            }
        }

        Ok(completed)
    }

    /// Bytes currently buffered while waiting for the rest of a frame.
    pub fn pending_bytes(&self) -> usize {
        self.buf.len()
    }

    /// Drop any partially received frame, e.g. when the link goes away.
    pub fn clear(&mut self) {
        self.buf.clear();
    }
}
