//! Remote SIM provisioning core.
//!
//! This crate implements the secure-provisioning pipeline that turns an
//! out-of-band activation code into a live cryptographic session with a
//! profile distribution server and decodes the downloaded bound profile
//! package into installable profile elements:
//!
//! 1. [`ActivationCode`] — parsing and serialization of the session
//!    bootstrap token.
//! 2. [`KeyAgreementResult`] — elliptic-curve key agreement on P-256 and
//!    session key derivation.
//! 3. [`bpp::SegmentChain`] — sequential authenticated decryption of the
//!    package's ordered segments.
//!
//! Card transport, network I/O and certificate trust decisions live in
//! external layers; this crate is pure transformation logic over supplied
//! byte buffers and keys. All key material is zeroized on drop.

pub mod bpp;

mod activation;
mod crypto;
mod error;
mod session;

pub use activation::ActivationCode;
pub use bpp::{
    ProfileElement, ProfileElements, SecureSegment, SegmentChain, SegmentKind, SegmentSealer,
};
pub use crypto::{Bsp, MAC_TAG_LEN, derive_shared_secret};
pub use error::{Error, Result};
pub use session::{KeyAgreementResult, SessionKeys, SharedSecretBytes};
