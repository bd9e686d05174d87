//! Session key material for one profile download.
//!
//! This module provides the [`KeyAgreementResult`] produced by elliptic-curve
//! key agreement and the [`SessionKeys`] consumed by the segment chain. Both
//! are zeroized on drop and never expose key bytes through `Debug`.

use std::fmt;

use cipher::Key;
use generic_array::GenericArray;
use p256::{SecretKey, ecdh::SharedSecret, elliptic_curve::consts::U32};
use zeroize::Zeroize;

use crate::{
    Result,
    crypto::{self, Bsp, KEY_INDEX_CMAC, KEY_INDEX_ENC, KEY_INDEX_RMAC},
};

/// Raw ECKA shared secret: the x-coordinate of the agreed point.
pub type SharedSecretBytes = GenericArray<u8, U32>;

/// Session keys derived from the ECKA shared secret.
///
/// All three keys originate from one shared secret but are derived with
/// distinct indices and are therefore independent.
#[derive(Clone, Zeroize)]
#[zeroize(drop)]
pub struct SessionKeys {
    /// Encryption key
    enc: Key<Bsp>,
    /// Command (outbound) MAC key
    cmac: Key<Bsp>,
    /// Response (inbound) MAC key
    rmac: Key<Bsp>,
}

impl SessionKeys {
    /// Create a key set from raw key bytes.
    ///
    /// Intended for callers that restore keys negotiated elsewhere; normal
    /// session establishment goes through [`KeyAgreementResult::derive`].
    pub fn from_raw(enc: Key<Bsp>, cmac: Key<Bsp>, rmac: Key<Bsp>) -> Self {
        Self { enc, cmac, rmac }
    }

    /// Get the encryption key
    pub fn enc(&self) -> &Key<Bsp> {
        &self.enc
    }

    /// Get the command MAC key, used by the outbound session traffic
    /// owned by the transport layer
    pub fn cmac(&self) -> &Key<Bsp> {
        &self.cmac
    }

    /// Get the response MAC key
    pub fn rmac(&self) -> &Key<Bsp> {
        &self.rmac
    }
}

impl fmt::Debug for SessionKeys {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // Key material is deliberately not printed
        f.debug_struct("SessionKeys").finish_non_exhaustive()
    }
}

/// Outcome of elliptic-curve key agreement for one session.
///
/// Holds the raw shared secret and the session keys expanded from it.
/// Exclusively owned by the session that created it; dropped (and zeroized)
/// once the package has been processed or the session aborts.
#[derive(Zeroize)]
#[zeroize(drop)]
pub struct KeyAgreementResult {
    shared_secret: SharedSecretBytes,
    keys: SessionKeys,
}

impl KeyAgreementResult {
    /// Expand a shared secret into the three session keys.
    ///
    /// `context` is a domain separation string identifying the session
    /// (for example the host identifier and card identifier agreed during
    /// session negotiation). Derivation is deterministic: identical inputs
    /// always produce identical keys.
    pub fn derive(shared_secret: &SharedSecret, context: &[u8]) -> Self {
        let keys = SessionKeys {
            enc: crypto::derive_key(shared_secret, context, KEY_INDEX_ENC),
            cmac: crypto::derive_key(shared_secret, context, KEY_INDEX_CMAC),
            rmac: crypto::derive_key(shared_secret, context, KEY_INDEX_RMAC),
        };

        Self {
            shared_secret: *shared_secret.raw_secret_bytes(),
            keys,
        }
    }

    /// Perform key agreement with the remote party and derive session keys
    /// in one step.
    ///
    /// Fails with [`crate::Error::InvalidPublicKey`] if the remote SEC1
    /// encoding does not validate. The ephemeral private key is supplied by
    /// the session negotiation layer; no randomness is consumed here.
    pub fn establish(private: &SecretKey, remote_public: &[u8], context: &[u8]) -> Result<Self> {
        let shared = crypto::derive_shared_secret(private, remote_public)?;
        Ok(Self::derive(&shared, context))
    }

    /// Get the raw shared secret
    pub fn shared_secret(&self) -> &SharedSecretBytes {
        &self.shared_secret
    }

    /// Get the derived session keys
    pub fn keys(&self) -> &SessionKeys {
        &self.keys
    }
}

impl fmt::Debug for KeyAgreementResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KeyAgreementResult").finish_non_exhaustive()
    }
}
