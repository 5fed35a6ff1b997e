//! Errors raised while assembling a [`Reassembler`](super::Reassembler).

use thiserror::Error;

use crate::config::ConfigError;

/// Errors returned by [`ReassemblerBuilder::build`](super::ReassemblerBuilder::build).
#[derive(Debug, Error, Clone, PartialEq)]
pub enum BuildError {
    /// A required collaborator was not supplied.
    #[error("missing collaborator: {0}")]
    MissingCollaborator(&'static str),
    /// The configuration failed validation.
    #[error("invalid configuration: {0}")]
    Config(#[from] ConfigError),
}
