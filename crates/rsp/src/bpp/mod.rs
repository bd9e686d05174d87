//! Bound profile package segment model.
//!
//! A bound profile package is an ordered sequence of TLV-framed segments,
//! each individually encrypted and authenticated, whose relative order is
//! part of its meaning. This module provides the segment and profile
//! element types; [`SegmentChain`] decodes a package and [`SegmentSealer`]
//! constructs one.

use std::fmt;

use bytes::{Bytes, BytesMut};
use iso7816_tlv::ber::Tlv;

use crate::{Error, Result, crypto::MAC_TAG_LEN};

mod chain;
mod seal;

pub use chain::SegmentChain;
pub use seal::SegmentSealer;

/// Minimum segment payload: one cipher block plus the authentication tag.
const MIN_PAYLOAD_LEN: usize = 16 + MAC_TAG_LEN;

/// Kind discriminator of a bound profile package segment.
///
/// The five kinds must appear in the order channel-init, first-sequence,
/// element-sequence (repeatable), second-sequence (optional),
/// metadata-sequence.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SegmentKind {
    /// Secure channel initialisation data
    ChannelInit,
    /// First configuration sequence
    FirstSequence,
    /// Profile element sequence; its plaintext is a list of TLV records
    ElementSequence,
    /// Second configuration sequence (optional in a package)
    SecondSequence,
    /// Package metadata sequence
    MetadataSequence,
}

impl SegmentKind {
    /// Outer framing tag of this segment kind.
    pub const fn tag(&self) -> &'static [u8] {
        match self {
            Self::ChannelInit => &[0xbf, 0x23],
            Self::FirstSequence => &[0xa0],
            Self::ElementSequence => &[0xa1],
            Self::SecondSequence => &[0xa2],
            Self::MetadataSequence => &[0xa3],
        }
    }

    /// Classify a framing tag.
    pub fn from_tag(tag: &[u8]) -> Option<Self> {
        match tag {
            [0xbf, 0x23] => Some(Self::ChannelInit),
            [0xa0] => Some(Self::FirstSequence),
            [0xa1] => Some(Self::ElementSequence),
            [0xa2] => Some(Self::SecondSequence),
            [0xa3] => Some(Self::MetadataSequence),
            _ => None,
        }
    }
}

impl fmt::Display for SegmentKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ChannelInit => write!(f, "channel-init"),
            Self::FirstSequence => write!(f, "first-sequence"),
            Self::ElementSequence => write!(f, "element-sequence"),
            Self::SecondSequence => write!(f, "second-sequence"),
            Self::MetadataSequence => write!(f, "metadata-sequence"),
        }
    }
}

/// One TLV-framed chunk of a bound profile package.
///
/// Immutable once parsed. The payload is the segment ciphertext followed
/// by its 8-byte authentication tag; `position` is the segment's index in
/// the package's ordered stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SecureSegment {
    kind: SegmentKind,
    payload: Bytes,
    position: usize,
}

impl SecureSegment {
    /// Create a segment from an already-demarcated payload.
    ///
    /// The payload must hold at least one cipher block of ciphertext,
    /// block aligned, plus the trailing tag; anything else fails with
    /// [`Error::MalformedSegment`].
    pub fn new(kind: SegmentKind, payload: Bytes, position: usize) -> Result<Self> {
        if payload.len() < MIN_PAYLOAD_LEN {
            return Err(Error::MalformedSegment("payload too short"));
        }
        if (payload.len() - MAC_TAG_LEN) % 16 != 0 {
            return Err(Error::MalformedSegment("ciphertext not block aligned"));
        }
        Ok(Self {
            kind,
            payload,
            position,
        })
    }

    /// Parse one framed segment from raw bytes.
    ///
    /// `input` must hold exactly one segment frame (tag, BER length,
    /// payload), as produced by the outer package split.
    pub fn parse(input: &[u8], position: usize) -> Result<Self> {
        let frame = frame::read(input)?;
        if frame.consumed != input.len() {
            return Err(Error::MalformedSegment("trailing bytes after segment"));
        }
        let kind = SegmentKind::from_tag(frame.tag)
            .ok_or(Error::MalformedSegment("unknown segment tag"))?;
        Self::new(kind, Bytes::copy_from_slice(frame.value), position)
    }

    /// Serialize the segment back into its framed form.
    pub fn to_bytes(&self) -> Bytes {
        let mut out = BytesMut::with_capacity(4 + self.payload.len());
        frame::write(self.kind.tag(), &self.payload, &mut out);
        out.freeze()
    }

    /// Segment kind
    pub const fn kind(&self) -> SegmentKind {
        self.kind
    }

    /// Position of the segment in the package's ordered stream
    pub const fn position(&self) -> usize {
        self.position
    }

    /// Segment ciphertext, excluding the authentication tag
    pub(crate) fn ciphertext(&self) -> &[u8] {
        &self.payload[..self.payload.len() - MAC_TAG_LEN]
    }

    /// Trailing authentication tag
    pub(crate) fn auth_tag(&self) -> &[u8] {
        &self.payload[self.payload.len() - MAC_TAG_LEN..]
    }
}

/// One decoded, authenticated profile element.
///
/// A profile element is a plaintext TLV record extracted from an
/// element-sequence segment after the segment's authentication tag has
/// verified. It is handed to the profile installation layer as-is.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProfileElement {
    raw: Bytes,
    value_offset: usize,
}

impl ProfileElement {
    /// Tag bytes of the element's outer TLV record.
    pub fn tag(&self) -> &[u8] {
        let mut len = 1;
        if self.raw[0] & 0x1f == 0x1f {
            while self.raw[len] & 0x80 != 0 {
                len += 1;
            }
            len += 1;
        }
        &self.raw[..len]
    }

    /// Value bytes of the element's outer TLV record.
    pub fn value(&self) -> &[u8] {
        &self.raw[self.value_offset..]
    }

    /// Complete encoded record.
    pub fn as_bytes(&self) -> &[u8] {
        &self.raw
    }

    /// Consume the element, returning the complete encoded record.
    pub fn into_bytes(self) -> Bytes {
        self.raw
    }

    /// Split an authenticated element-sequence plaintext into its TLV
    /// records, validating each one.
    pub(crate) fn parse_sequence(mut plaintext: Bytes, position: usize) -> Result<Vec<Self>> {
        let mut elements = Vec::new();
        while !plaintext.is_empty() {
            let (parsed, rest) = Tlv::parse(&plaintext);
            parsed.map_err(|_| Error::MalformedElement { position })?;
            let consumed = plaintext.len() - rest.len();

            let frame = frame::read(&plaintext)
                .map_err(|_| Error::MalformedElement { position })?;
            let value_offset = frame.consumed - frame.value.len();

            let raw = plaintext.split_to(consumed);
            elements.push(Self { raw, value_offset });
        }
        Ok(elements)
    }
}

impl fmt::Display for ProfileElement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({} bytes)", hex::encode(self.tag()), self.raw.len())
    }
}

/// Ordered sequence of profile elements decoded from one segment.
///
/// Finite, single pass and not restartable: the segment it came from
/// cannot be re-ingested because the chain counter has already advanced.
#[derive(Debug)]
pub struct ProfileElements {
    inner: std::vec::IntoIter<ProfileElement>,
}

impl ProfileElements {
    pub(crate) fn new(elements: Vec<ProfileElement>) -> Self {
        Self {
            inner: elements.into_iter(),
        }
    }
}

impl Iterator for ProfileElements {
    type Item = ProfileElement;

    fn next(&mut self) -> Option<Self::Item> {
        self.inner.next()
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        self.inner.size_hint()
    }
}

impl ExactSizeIterator for ProfileElements {}

/// Minimal BER frame reader/writer for segment and element framing.
///
/// Only definite lengths are accepted; an indefinite length marker is a
/// structural error.
mod frame {
    use bytes::{BufMut, BytesMut};

    use crate::{Error, Result};

    pub(super) struct Frame<'a> {
        pub(super) tag: &'a [u8],
        pub(super) value: &'a [u8],
        pub(super) consumed: usize,
    }

    pub(super) fn read(input: &[u8]) -> Result<Frame<'_>> {
        if input.is_empty() {
            return Err(Error::MalformedSegment("empty frame"));
        }

        let mut tag_len = 1;
        if input[0] & 0x1f == 0x1f {
            loop {
                let Some(&byte) = input.get(tag_len) else {
                    return Err(Error::MalformedSegment("truncated tag"));
                };
                tag_len += 1;
                if byte & 0x80 == 0 {
                    break;
                }
            }
        }

        let Some(&first) = input.get(tag_len) else {
            return Err(Error::MalformedSegment("missing length"));
        };
        let (value_len, len_len) = if first & 0x80 == 0 {
            (first as usize, 1)
        } else {
            let octets = (first & 0x7f) as usize;
            if octets == 0 || octets > 4 {
                return Err(Error::MalformedSegment("unsupported length form"));
            }
            let Some(len_bytes) = input.get(tag_len + 1..tag_len + 1 + octets) else {
                return Err(Error::MalformedSegment("truncated length"));
            };
            let mut len = 0usize;
            for &byte in len_bytes {
                len = len << 8 | byte as usize;
            }
            (len, 1 + octets)
        };

        let header_len = tag_len + len_len;
        let Some(value) = input.get(header_len..header_len + value_len) else {
            return Err(Error::MalformedSegment("truncated value"));
        };

        Ok(Frame {
            tag: &input[..tag_len],
            value,
            consumed: header_len + value_len,
        })
    }

    pub(super) fn write(tag: &[u8], value: &[u8], out: &mut BytesMut) {
        out.extend_from_slice(tag);
        match value.len() {
            len @ 0..=0x7f => out.put_u8(len as u8),
            len @ 0x80..=0xff => {
                out.put_u8(0x81);
                out.put_u8(len as u8);
            }
            len @ 0x100..=0xffff => {
                out.put_u8(0x82);
                out.put_u16(len as u16);
            }
            len @ 0x1_0000..=0xff_ffff => {
                out.put_u8(0x83);
                out.put_u8((len >> 16) as u8);
                out.put_u16(len as u16);
            }
            len => {
                out.put_u8(0x84);
                out.put_u32(len as u32);
            }
        }
        out.extend_from_slice(value);
    }
}
