//! Construction side of the bound profile package secure channel.
//!
//! The sealer is the mirror image of [`SegmentChain`](super::SegmentChain):
//! it walks the same segment grammar with the same block counter and MAC
//! chain discipline, producing protected segments from plaintext payloads.
//! The distribution-server side of the protocol uses it to build packages;
//! the test suite uses it to exercise the decoder end to end.

use bytes::BytesMut;
use tracing::trace;

use crate::{
    Error, Result,
    crypto::{self, MAC_TAG_LEN, MacChainValue},
    session::SessionKeys,
};

use super::{SecureSegment, SegmentKind, chain::ChainPhase};

/// Stateful encoder producing the ordered segments of one package.
///
/// Unlike the decoder, an order error here is a caller bug rather than a
/// tampering signal, so it does not poison the sealer: the offending call
/// has no effect and sealing may continue with a legal segment kind.
#[derive(Debug)]
pub struct SegmentSealer<'k> {
    keys: &'k SessionKeys,
    phase: ChainPhase,
    block_nr: u64,
    mac_chain: MacChainValue,
    position: usize,
}

impl<'k> SegmentSealer<'k> {
    /// Start a fresh package.
    pub fn begin(keys: &'k SessionKeys) -> Self {
        Self {
            keys,
            phase: ChainPhase::AwaitingInit,
            block_nr: 1,
            mac_chain: crypto::initial_mac_chain(keys.rmac()),
            position: 0,
        }
    }

    /// Encrypt and authenticate one segment.
    ///
    /// Segments must be sealed in the package grammar's order; an illegal
    /// kind fails with [`Error::UnexpectedSegmentOrder`]. For an
    /// element-sequence segment the plaintext is the concatenation of the
    /// encoded profile element TLV records.
    pub fn seal(&mut self, kind: SegmentKind, plaintext: &[u8]) -> Result<SecureSegment> {
        let Some(next_phase) = self.phase.accept(kind) else {
            return Err(Error::UnexpectedSegmentOrder {
                kind,
                position: self.position,
            });
        };

        let iv = crypto::derive_icv(self.keys.enc(), self.block_nr);
        let ciphertext = crypto::encrypt_data(&mut BytesMut::from(plaintext), self.keys.enc(), &iv);

        let chained = crypto::mac_step(
            self.keys.rmac(),
            &self.mac_chain,
            kind.tag(),
            &ciphertext,
        );

        let mut payload = BytesMut::with_capacity(ciphertext.len() + MAC_TAG_LEN);
        payload.extend_from_slice(&ciphertext);
        payload.extend_from_slice(&chained[..MAC_TAG_LEN]);
        let segment = SecureSegment::new(kind, payload.freeze(), self.position)?;

        trace!(%kind, position = self.position, "segment sealed");

        self.block_nr += 1;
        self.mac_chain = chained;
        self.position += 1;
        self.phase = next_phase;
        Ok(segment)
    }

    /// Whether the grammar allows closing the package here.
    ///
    /// True once the metadata segment has been sealed.
    pub const fn is_complete(&self) -> bool {
        matches!(self.phase, ChainPhase::SawMetadata)
    }
}
