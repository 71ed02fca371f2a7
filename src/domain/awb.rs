//! Air Waybill number handling.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Air Waybill number in the standard `NNN-NNNNNNNN` form.
///
/// The three-digit prefix is the issuing carrier code, the eight-digit
/// suffix the serial number. Validated on construction; globally unique
/// and immutable once assigned to a shipment.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Awb(String);

/// Rejection of a malformed AWB number.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid AWB number: expected NNN-NNNNNNNN")]
pub struct AwbParseError;

impl Awb {
    /// Parse and validate an AWB number.
    pub fn new(raw: &str) -> Result<Self, AwbParseError> {
        raw.parse()
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl FromStr for Awb {
    type Err = AwbParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let bytes = s.as_bytes();
        if bytes.len() != 12 || bytes[3] != b'-' {
            return Err(AwbParseError);
        }
        let digits_ok = bytes[..3]
            .iter()
            .chain(bytes[4..].iter())
            .all(|b| b.is_ascii_digit());
        if !digits_ok {
            return Err(AwbParseError);
        }
        Ok(Self(s.to_string()))
    }
}

impl TryFrom<String> for Awb {
    type Error = AwbParseError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        s.parse()
    }
}

impl From<Awb> for String {
    fn from(awb: Awb) -> Self {
        awb.0
    }
}

impl fmt::Display for Awb {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}
