//! The stream-rpc transport: multiplexed streams over one connection.
//!
//! Frames carry a stream id, a kind tag, and a length-prefixed body. The
//! supervisor opens a new odd-numbered stream per request, writes a `Data`
//! frame, and reads frames until the peer answers on that stream and closes
//! it. Frames for other streams (e.g. server pushes this client does not
//! consume) are skipped with a log line.

use std::io::{Read, Write};

use serde::Serialize;
use serde::de::DeserializeOwned;
use tracing::{trace, warn};

use super::{MAX_FRAME_LEN, TransportError};

/// Tracing target for mux transport operations.
const MUX_TARGET: &str = "menagerie_plugins::transport::mux";

/// Frame type tags on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameKind {
    /// Payload bytes for a stream.
    Data,
    /// Half-close of a stream by the sender.
    Close,
}

impl FrameKind {
    const fn as_byte(self) -> u8 {
        match self {
            Self::Data => 0,
            Self::Close => 1,
        }
    }

    const fn from_byte(byte: u8) -> Option<Self> {
        match byte {
            0 => Some(Self::Data),
            1 => Some(Self::Close),
            _ => None,
        }
    }
}

/// A single multiplexed frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MuxFrame {
    /// Stream the frame belongs to.
    pub stream_id: u32,
    /// Frame type.
    pub kind: FrameKind,
    /// Frame body; empty for `Close`.
    pub payload: Vec<u8>,
}

impl MuxFrame {
    /// Writes the frame to a stream.
    ///
    /// # Errors
    ///
    /// Returns [`TransportError::FrameTooLarge`] or an I/O error.
    pub fn write_to(&self, writer: &mut impl Write) -> Result<(), TransportError> {
        let len = u32::try_from(self.payload.len())
            .map_err(|_| TransportError::FrameTooLarge { len: u32::MAX })?;
        if len > MAX_FRAME_LEN {
            return Err(TransportError::FrameTooLarge { len });
        }
        writer.write_all(&self.stream_id.to_be_bytes())?;
        writer.write_all(&[self.kind.as_byte()])?;
        writer.write_all(&len.to_be_bytes())?;
        writer.write_all(&self.payload)?;
        writer.flush()?;
        Ok(())
    }

    /// Reads one frame from a stream.
    ///
    /// # Errors
    ///
    /// Returns [`TransportError::Closed`] on EOF,
    /// [`TransportError::UnknownFrameKind`] for unrecognised type tags, and
    /// [`TransportError::FrameTooLarge`] for oversized bodies.
    pub fn read_from(reader: &mut impl Read) -> Result<Self, TransportError> {
        let mut header = [0u8; 9];
        reader.read_exact(&mut header)?;

        let stream_id = u32::from_be_bytes([header[0], header[1], header[2], header[3]]);
        let kind = FrameKind::from_byte(header[4])
            .ok_or(TransportError::UnknownFrameKind { kind: header[4] })?;
        let len = u32::from_be_bytes([header[5], header[6], header[7], header[8]]);
        if len > MAX_FRAME_LEN {
            return Err(TransportError::FrameTooLarge { len });
        }

        let mut payload = vec![0u8; len as usize];
        reader.read_exact(&mut payload)?;
        Ok(Self {
            stream_id,
            kind,
            payload,
        })
    }
}

/// A stream-rpc session over any byte stream.
///
/// Client-opened streams use odd ids so they never collide with
/// server-initiated even ids.
pub struct MuxConnection<S> {
    stream: S,
    next_stream_id: u32,
}

impl<S: Read + Write> MuxConnection<S> {
    /// Wraps a connected stream.
    pub const fn new(stream: S) -> Self {
        Self {
            stream,
            next_stream_id: 1,
        }
    }

    /// Performs one request/response exchange on a fresh stream.
    ///
    /// Sends a `Data` frame followed by `Close`, then reads until the peer
    /// answers with `Data` on the same stream. Frames addressed to other
    /// streams are skipped.
    ///
    /// # Errors
    ///
    /// Returns a [`TransportError`] on codec or stream failure, or
    /// [`TransportError::Closed`] when the peer closes the stream without
    /// answering.
    pub fn call<Req: Serialize, Resp: DeserializeOwned>(
        &mut self,
        request: &Req,
    ) -> Result<Resp, TransportError> {
        let stream_id = self.next_stream_id;
        self.next_stream_id = self.next_stream_id.wrapping_add(2);

        let payload =
            serde_json::to_vec(request).map_err(|source| TransportError::Codec { source })?;
        MuxFrame {
            stream_id,
            kind: FrameKind::Data,
            payload,
        }
        .write_to(&mut self.stream)?;
        MuxFrame {
            stream_id,
            kind: FrameKind::Close,
            payload: Vec::new(),
        }
        .write_to(&mut self.stream)?;
        trace!(target: MUX_TARGET, stream_id, "opened request stream");

        loop {
            let frame = MuxFrame::read_from(&mut self.stream)?;
            if frame.stream_id != stream_id {
                warn!(
                    target: MUX_TARGET,
                    expected = stream_id,
                    received = frame.stream_id,
                    "skipping frame for unrelated stream"
                );
                continue;
            }
            match frame.kind {
                FrameKind::Data => {
                    return serde_json::from_slice(&frame.payload)
                        .map_err(|source| TransportError::Codec { source });
                }
                FrameKind::Close => return Err(TransportError::Closed),
            }
        }
    }
}

impl<S> std::fmt::Debug for MuxConnection<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MuxConnection")
            .field("next_stream_id", &self.next_stream_id)
            .finish_non_exhaustive()
    }
}
