//! Opaque identifiers.
//!
//! A [`Token`] is the only handle the request engine hands out. Requests,
//! resolvers, providers and requesters are all referred to by token, so a
//! referent that is transiently absent (after a reload, while a building is
//! unloaded) is a lookup miss rather than a dangling reference.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Opaque, structurally comparable identifier.
///
/// Carries one 128-bit value. Tokens are ordered by that value, which gives
/// every table keyed by token a deterministic iteration order.
///
/// Serialized as a UUID-style hex string so tokens survive any map-key
/// encoding.
///
/// # Example
///
/// ```
/// use requestable::Token;
///
/// let token = Token::new(0x2a);
/// let text = token.to_string();
/// assert_eq!(text, "00000000-0000-0000-0000-00000000002a");
/// assert_eq!(text.parse::<Token>().unwrap(), token);
/// ```
#[derive(Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(into = "String", try_from = "String")]
pub struct Token(u128);

impl Token {
    /// Creates a token from a raw value.
    #[must_use]
    pub const fn new(id: u128) -> Self {
        Self(id)
    }

    /// Returns the raw value of this token.
    #[must_use]
    pub const fn as_u128(self) -> u128 {
        self.0
    }
}

impl fmt::Debug for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Token({self})")
    }
}

impl fmt::Display for Token {
    // Truncating casts select each group after the shift.
    #[allow(clippy::cast_possible_truncation)]
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let v = self.0;
        write!(
            f,
            "{:08x}-{:04x}-{:04x}-{:04x}-{:012x}",
            (v >> 96) as u32,
            (v >> 80) as u16,
            (v >> 64) as u16,
            (v >> 48) as u16,
            v & 0xffff_ffff_ffff,
        )
    }
}

/// Error returned when a token string is malformed.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("malformed token `{input}`: expected 32 hex digits in 8-4-4-4-12 groups")]
pub struct TokenParseError {
    input: String,
}

impl FromStr for Token {
    type Err = TokenParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let err = || TokenParseError {
            input: s.to_string(),
        };
        let groups: Vec<&str> = s.split('-').collect();
        let widths = [8, 4, 4, 4, 12];
        if groups.len() != widths.len()
            || groups
                .iter()
                .zip(widths)
                .any(|(g, w)| g.len() != w || !g.chars().all(|c| c.is_ascii_hexdigit()))
        {
            return Err(err());
        }
        let digits: String = groups.concat();
        u128::from_str_radix(&digits, 16).map(Self).map_err(|_| err())
    }
}

impl From<Token> for String {
    fn from(token: Token) -> Self {
        token.to_string()
    }
}

impl TryFrom<String> for Token {
    type Error = TokenParseError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<u128> for Token {
    fn from(id: u128) -> Self {
        Self::new(id)
    }
}
