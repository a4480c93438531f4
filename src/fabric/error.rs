//! Error definitions for the fabric core

use super::envelope::EnvelopeError;
use super::identity::IdentityError;
use super::topic::TopicParseError;
use thiserror::Error;

/// Aggregate error type for fabric operations
#[derive(Debug, Error)]
pub enum FabricError {
    /// Topic does not match any known shape
    #[error("Unrecognized topic: {0}")]
    Topic(#[from] TopicParseError),

    /// Payload is not a usable value envelope
    #[error("Envelope error: {0}")]
    Envelope(#[from] EnvelopeError),

    /// Identity could not be built from configuration
    #[error("Identity error: {0}")]
    Identity(#[from] IdentityError),

    /// JSON encoding or decoding failed
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}
