//! Activation code parsing and serialization.
//!
//! An activation code is the out-of-band token (usually scanned from a QR
//! code) that bootstraps a profile download: it names the distribution
//! server and the matching identifier of the pending profile.
//!
//! The textual form is `1$address$matching_id[$oid[$confirmation_flag]]`.
//! The number of `$` separators is meaningful: a trailing field that is
//! present but empty is distinct from an absent one, and serialization
//! reproduces the original separator count exactly.

use std::fmt;
use std::str::FromStr;

use crate::{Error, Result};

/// Activation code format version understood by this implementation.
const VERSION: &str = "1";

/// Scheme prefix used when the code is carried in a QR code.
const QR_PREFIX: &str = "LPA:";

/// Field separator of the textual form.
const SEPARATOR: char = '$';

/// A parsed activation code.
///
/// Immutable value object; constructed once from a scanned or typed code
/// and consumed by session bootstrap. The two optional fields are
/// tri-state: absent, present but empty, or present with a value. This
/// distinction is preserved across a parse/format round trip.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActivationCode {
    /// Fully qualified host name of the distribution server. May be empty.
    pub smdp_address: String,
    /// Token identifying the pending profile. May be empty.
    pub matching_id: String,
    /// Dotted identifier of a non-default activation protocol, if the
    /// field was present. `Some(String::new())` records a present-but-empty
    /// field.
    pub oid: Option<String>,
    /// Whether the server requires a confirmation code, if the field was
    /// present.
    pub confirmation_code_required: Option<bool>,
}

impl ActivationCode {
    /// Create an activation code with just an address and matching identifier.
    pub const fn new(smdp_address: String, matching_id: String) -> Self {
        Self {
            smdp_address,
            matching_id,
            oid: None,
            confirmation_code_required: None,
        }
    }

    /// Format version of the textual form.
    pub const fn version(&self) -> u8 {
        1
    }
}

impl FromStr for ActivationCode {
    type Err = Error;

    /// Parse the `$`-delimited textual form, with or without the `LPA:`
    /// QR scheme prefix.
    ///
    /// Missing trailing fields are treated as empty or absent; more than
    /// five fields, a version other than `1` or a confirmation flag other
    /// than `0`/`1` fail with [`Error::MalformedActivationCode`].
    fn from_str(s: &str) -> Result<Self> {
        let s = match s.get(..QR_PREFIX.len()) {
            Some(prefix) if prefix.eq_ignore_ascii_case(QR_PREFIX) => &s[QR_PREFIX.len()..],
            _ => s,
        };

        let fields: Vec<&str> = s.split(SEPARATOR).collect();
        if fields.len() > 5 {
            return Err(Error::MalformedActivationCode("too many fields"));
        }
        if fields[0] != VERSION {
            return Err(Error::MalformedActivationCode("unsupported version"));
        }

        let confirmation_code_required = match fields.get(4) {
            None => None,
            Some(&"0") => Some(false),
            Some(&"1") => Some(true),
            Some(_) => {
                return Err(Error::MalformedActivationCode(
                    "confirmation flag must be 0 or 1",
                ));
            }
        };

        Ok(Self {
            smdp_address: fields.get(1).copied().unwrap_or_default().to_owned(),
            matching_id: fields.get(2).copied().unwrap_or_default().to_owned(),
            oid: fields.get(3).map(|&f| f.to_owned()),
            confirmation_code_required,
        })
    }
}

impl fmt::Display for ActivationCode {
    /// Reconstruct the canonical textual form, without the `LPA:` prefix.
    ///
    /// Emits exactly as many trailing fields as are present, so the
    /// separator count of a parsed code is reproduced byte for byte.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{VERSION}{SEPARATOR}{}{SEPARATOR}{}", self.smdp_address, self.matching_id)?;
        if self.oid.is_some() || self.confirmation_code_required.is_some() {
            write!(f, "{SEPARATOR}{}", self.oid.as_deref().unwrap_or_default())?;
        }
        if let Some(required) = self.confirmation_code_required {
            write!(f, "{SEPARATOR}{}", if required { "1" } else { "0" })?;
        }
        Ok(())
    }
}
