//! Error types for building and sending retransmission requests.

use std::io;

use bincode::error::EncodeError;
use thiserror::Error;

/// Errors raised while turning queued requests into transmissions.
#[non_exhaustive]
#[derive(Debug, Error)]
pub enum RequestError {
    /// A request could not be encoded.
    #[error("failed to encode request: {0}")]
    Encode(#[from] EncodeError),
    /// The transport refused a request.
    #[error("failed to broadcast request: {0}")]
    Broadcast(#[from] io::Error),
}
