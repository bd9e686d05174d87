//! Error types for the provisioning core.

use thiserror::Error;

use crate::bpp::SegmentKind;

/// Result type for provisioning operations
pub type Result<T> = std::result::Result<T, Error>;

/// Error type for provisioning operations
///
/// Covers the three stages of a profile download: activation code parsing,
/// session key agreement and bound profile package decoding. Errors never
/// carry key material or cryptographic intermediates.
#[derive(Debug, Error)]
pub enum Error {
    /// Activation code does not match the `$`-delimited grammar
    #[error("malformed activation code: {0}")]
    MalformedActivationCode(&'static str),

    /// Remote public key failed curve validation
    #[error("invalid remote public key")]
    InvalidPublicKey,

    /// Segment authentication tag did not match the running MAC chain
    #[error("segment {position}: authentication failed")]
    AuthenticationFailed {
        /// Zero-based position of the offending segment
        position: usize,
    },

    /// Segment kind is not a legal successor in the package grammar
    #[error("segment {position}: unexpected {kind} segment")]
    UnexpectedSegmentOrder {
        /// Kind of the offending segment
        kind: SegmentKind,
        /// Zero-based position of the offending segment
        position: usize,
    },

    /// Package ended before all mandatory segment kinds were seen
    #[error("incomplete package: {0}")]
    IncompleteChain(&'static str),

    /// Segment framing is structurally invalid
    #[error("malformed segment: {0}")]
    MalformedSegment(&'static str),

    /// Decrypted element-sequence payload is not a valid TLV record list
    #[error("segment {position}: malformed profile element")]
    MalformedElement {
        /// Zero-based position of the enclosing segment
        position: usize,
    },

    /// Ciphertext unpadding failed after decryption
    #[error("unpad error")]
    Unpad(#[from] cipher::block_padding::UnpadError),
}
