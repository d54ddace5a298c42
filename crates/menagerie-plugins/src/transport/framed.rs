//! The framed-rpc transport: length-prefixed JSON over a single stream.
//!
//! Each message is a big-endian `u32` length followed by that many bytes of
//! JSON. The exchange is strictly request/response: the supervisor writes
//! one frame and reads one frame back.

use std::io::{Read, Write};

use serde::Serialize;
use serde::de::DeserializeOwned;
use tracing::trace;

use super::{MAX_FRAME_LEN, TransportError};

/// Tracing target for framed transport operations.
const FRAMED_TARGET: &str = "menagerie_plugins::transport::framed";

/// A framed-rpc session over any byte stream.
pub struct FramedConnection<S> {
    stream: S,
}

impl<S: Read + Write> FramedConnection<S> {
    /// Wraps a connected stream.
    pub const fn new(stream: S) -> Self {
        Self { stream }
    }

    /// Consumes the session and returns the underlying stream.
    pub fn into_inner(self) -> S {
        self.stream
    }

    /// Writes one frame containing the JSON encoding of `message`.
    ///
    /// # Errors
    ///
    /// Returns [`TransportError::Codec`] on serialization failure and
    /// [`TransportError::Io`] on write failure.
    pub fn send<M: Serialize>(&mut self, message: &M) -> Result<(), TransportError> {
        let body = serde_json::to_vec(message).map_err(|source| TransportError::Codec { source })?;
        let len = u32::try_from(body.len()).map_err(|_| TransportError::FrameTooLarge {
            len: u32::MAX,
        })?;
        if len > MAX_FRAME_LEN {
            return Err(TransportError::FrameTooLarge { len });
        }

        trace!(target: FRAMED_TARGET, frame_bytes = body.len(), "sending frame");
        self.stream.write_all(&len.to_be_bytes())?;
        self.stream.write_all(&body)?;
        self.stream.flush()?;
        Ok(())
    }

    /// Reads one frame and decodes its JSON body.
    ///
    /// # Errors
    ///
    /// Returns [`TransportError::Closed`] on EOF,
    /// [`TransportError::FrameTooLarge`] when the announced length exceeds
    /// the limit, and [`TransportError::Codec`] on decode failure.
    pub fn recv<M: DeserializeOwned>(&mut self) -> Result<M, TransportError> {
        let mut header = [0u8; 4];
        self.stream.read_exact(&mut header)?;
        let len = u32::from_be_bytes(header);
        if len > MAX_FRAME_LEN {
            return Err(TransportError::FrameTooLarge { len });
        }

        let mut body = vec![0u8; len as usize];
        self.stream.read_exact(&mut body)?;
        trace!(target: FRAMED_TARGET, frame_bytes = body.len(), "received frame");

        serde_json::from_slice(&body).map_err(|source| TransportError::Codec { source })
    }

    /// Performs one request/response round trip.
    ///
    /// # Errors
    ///
    /// Propagates the errors of [`FramedConnection::send`] and
    /// [`FramedConnection::recv`].
    pub fn call<Req: Serialize, Resp: DeserializeOwned>(
        &mut self,
        request: &Req,
    ) -> Result<Resp, TransportError> {
        self.send(request)?;
        self.recv()
    }
}

impl<S> std::fmt::Debug for FramedConnection<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FramedConnection").finish_non_exhaustive()
    }
}
