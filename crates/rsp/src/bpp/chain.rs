//! Sequential authenticated decoder for one bound profile package.
//!
//! The chain is a single linear pass over the package's segments: each
//! segment's authentication tag depends on all prior ciphertext, so
//! truncation, duplication and reordering are all detected as either a
//! grammar violation or a MAC mismatch. There is no backtracking and a
//! chain is never rewound or replayed.

use bytes::BytesMut;
use tracing::{debug, trace};

use crate::{
    Error, Result,
    crypto::{self, MacChainValue},
    session::SessionKeys,
};

use super::{ProfileElement, ProfileElements, SecureSegment, SegmentKind};

/// Position of the chain within the package grammar.
///
/// Phases are named after what the chain expects next; `finish` plays the
/// role of the terminal transition out of `SawMetadata`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(super) enum ChainPhase {
    AwaitingInit,
    AwaitingFirstSequence,
    AcceptingElements,
    AwaitingMetadata,
    SawMetadata,
}

impl ChainPhase {
    /// Phase reached by ingesting a segment of `kind`, if `kind` is a
    /// legal successor in the package grammar.
    pub(super) const fn accept(self, kind: SegmentKind) -> Option<Self> {
        match (self, kind) {
            (Self::AwaitingInit, SegmentKind::ChannelInit) => Some(Self::AwaitingFirstSequence),
            (Self::AwaitingFirstSequence, SegmentKind::FirstSequence) => {
                Some(Self::AcceptingElements)
            }
            (Self::AcceptingElements, SegmentKind::ElementSequence) => {
                Some(Self::AcceptingElements)
            }
            (Self::AcceptingElements, SegmentKind::SecondSequence) => Some(Self::AwaitingMetadata),
            (Self::AcceptingElements | Self::AwaitingMetadata, SegmentKind::MetadataSequence) => {
                Some(Self::SawMetadata)
            }
            _ => None,
        }
    }
}

/// Reason a chain entered its terminal failed state.
///
/// Kept separately from [`Error`] so that repeated calls on a failed chain
/// deterministically reproduce the original error.
#[derive(Debug, Clone, Copy)]
enum ChainFailure {
    Order { kind: SegmentKind, position: usize },
    Authentication { position: usize },
    Decrypt,
    Element { position: usize },
}

impl ChainFailure {
    fn to_error(self) -> Error {
        match self {
            Self::Order { kind, position } => Error::UnexpectedSegmentOrder { kind, position },
            Self::Authentication { position } => Error::AuthenticationFailed { position },
            Self::Decrypt => Error::Unpad(cipher::block_padding::UnpadError),
            Self::Element { position } => Error::MalformedElement { position },
        }
    }
}

/// Stateful decoder for the segments of one bound profile package.
///
/// Created with [`SegmentChain::begin`], fed segments in strict arrival
/// order with [`SegmentChain::ingest`] and closed with
/// [`SegmentChain::finish`]. The chain is exclusively owned by the session
/// processing the package; concurrent sessions each run their own chain.
///
/// Any failure is terminal: the chain stays in its failed state and every
/// further call returns the same error without side effects.
#[derive(Debug)]
pub struct SegmentChain<'k> {
    keys: &'k SessionKeys,
    phase: ChainPhase,
    failure: Option<ChainFailure>,
    /// Block counter behind ICV derivation; advances by one per segment.
    block_nr: u64,
    /// Running MAC chaining value folded forward across segments.
    mac_chain: MacChainValue,
    /// Segments ingested so far; doubles as the expected next position.
    position: usize,
    element_segments: usize,
}

impl<'k> SegmentChain<'k> {
    /// Start a fresh chain over one package.
    ///
    /// The block counter starts at one and the MAC accumulator at its
    /// fixed initial value derived from the response MAC key.
    pub fn begin(keys: &'k SessionKeys) -> Self {
        Self {
            keys,
            phase: ChainPhase::AwaitingInit,
            failure: None,
            block_nr: 1,
            mac_chain: crypto::initial_mac_chain(keys.rmac()),
            position: 0,
            element_segments: 0,
        }
    }

    /// Ingest the next segment of the package.
    ///
    /// Verifies the segment's position and kind against the package
    /// grammar, authenticates its ciphertext against the running MAC
    /// chain, and only then decrypts. For an element-sequence segment the
    /// plaintext is split into [`ProfileElement`]s and returned; other
    /// kinds yield an empty sequence.
    ///
    /// On any failure the chain transitions to its terminal failed state
    /// and no output is produced for the segment: a tag mismatch discards
    /// the segment entirely rather than exposing unauthenticated
    /// plaintext.
    pub fn ingest(&mut self, segment: &SecureSegment) -> Result<ProfileElements> {
        if let Some(failure) = self.failure {
            return Err(failure.to_error());
        }

        let kind = segment.kind();
        trace!(%kind, position = self.position, "ingesting segment");

        let accepted = if segment.position() == self.position {
            self.phase.accept(kind)
        } else {
            None
        };
        let Some(next_phase) = accepted else {
            return Err(self.fail(ChainFailure::Order {
                kind,
                position: self.position,
            }));
        };

        // Authenticate before releasing any plaintext
        let chained = crypto::mac_step(
            self.keys.rmac(),
            &self.mac_chain,
            kind.tag(),
            segment.ciphertext(),
        );
        if !crypto::verify_segment_tag(&chained, segment.auth_tag()) {
            return Err(self.fail(ChainFailure::Authentication {
                position: self.position,
            }));
        }
        self.mac_chain = chained;

        let iv = crypto::derive_icv(self.keys.enc(), self.block_nr);
        self.block_nr += 1;

        let mut buf = BytesMut::from(segment.ciphertext());
        let plaintext = match crypto::decrypt_data(&mut buf, self.keys.enc(), &iv) {
            Ok(plaintext) => plaintext,
            Err(_) => return Err(self.fail(ChainFailure::Decrypt)),
        };

        let elements = if kind == SegmentKind::ElementSequence {
            match ProfileElement::parse_sequence(plaintext, self.position) {
                Ok(elements) => {
                    self.element_segments += 1;
                    elements
                }
                Err(_) => {
                    return Err(self.fail(ChainFailure::Element {
                        position: self.position,
                    }));
                }
            }
        } else {
            Vec::new()
        };

        debug!(
            %kind,
            position = self.position,
            elements = elements.len(),
            "segment authenticated"
        );

        self.position += 1;
        self.phase = next_phase;
        Ok(ProfileElements::new(elements))
    }

    /// Close the chain after the metadata segment.
    ///
    /// Fails with [`Error::IncompleteChain`] unless every mandatory
    /// segment kind has been seen: channel-init, first-sequence, at least
    /// one element-sequence and the final metadata-sequence.
    pub fn finish(self) -> Result<()> {
        if let Some(failure) = self.failure {
            return Err(failure.to_error());
        }
        match self.phase {
            ChainPhase::SawMetadata if self.element_segments > 0 => {
                debug!(segments = self.position, "package complete");
                Ok(())
            }
            ChainPhase::SawMetadata => Err(Error::IncompleteChain("no element sequence")),
            _ => Err(Error::IncompleteChain("package ended before metadata")),
        }
    }

    /// Whether the chain has entered its terminal failed state.
    pub const fn has_failed(&self) -> bool {
        self.failure.is_some()
    }

    fn fail(&mut self, failure: ChainFailure) -> Error {
        debug!(?failure, "chain failed");
        self.failure = Some(failure);
        failure.to_error()
    }
}
