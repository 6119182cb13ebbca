//! Dotted-decimal IPv4 text to bucket key conversion.
//!
//! The parser is deliberately stricter than [`std::net::Ipv4Addr`]'s: it only
//! looks at ASCII digits and dots, accepts leading zeros (`010` is ten), and
//! reports the first thing wrong with the input as an [`AddressError`].
//!
//! `0.0.0.0` parses structurally but is rejected as
//! [`AddressError::Unspecified`]: the unspecified address is never rate
//! limited, it is always treated as invalid input.

use std::fmt;
use std::net::Ipv4Addr;
use std::num::NonZeroU32;
use std::str::FromStr;

use thiserror::Error;

/// Longest text a valid IPv4 address can have (`255.255.255.255`).
pub const MAX_ADDRESS_LEN: usize = 15;

const OCTETS: usize = 4;
const MAX_OCTET_DIGITS: usize = 3;

/// Reasons a message is not a usable IPv4 address.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum AddressError {
    #[error("address text is {len} bytes, longer than {MAX_ADDRESS_LEN}")]
    TooLong { len: usize },

    #[error("invalid character {0:?}")]
    InvalidCharacter(char),

    #[error("empty octet")]
    EmptyOctet,

    #[error("octet has more than {MAX_OCTET_DIGITS} digits")]
    OctetTooLong,

    #[error("more than {OCTETS} octets")]
    TooManyOctets,

    #[error("fewer than {OCTETS} octets")]
    TooFewOctets,

    #[error("octet value {0} is above 255")]
    OctetOutOfRange(u16),

    #[error("the unspecified address 0.0.0.0 cannot be rate limited")]
    Unspecified,
}

/// A packed IPv4 address, most significant octet first. Never zero.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BucketKey(NonZeroU32);

impl BucketKey {
    /// Wraps a packed address. Returns `None` for `0` (`0.0.0.0`).
    pub fn new(raw: u32) -> Option<Self> {
        NonZeroU32::new(raw).map(Self)
    }

    pub fn get(self) -> u32 {
        self.0.get()
    }
}

impl fmt::Display for BucketKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        Ipv4Addr::from(self.get()).fmt(f)
    }
}

impl From<BucketKey> for Ipv4Addr {
    fn from(key: BucketKey) -> Self {
        Ipv4Addr::from(key.get())
    }
}

impl FromStr for BucketKey {
    type Err = AddressError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        parse(s)
    }
}

/// Parses dotted-decimal IPv4 text into a [`BucketKey`].
///
/// Input longer than [`MAX_ADDRESS_LEN`] is rejected before any character is
/// examined. Otherwise the text must be exactly four dot-separated octets of
/// one to three digits each, every octet at most 255.
pub fn parse(text: &str) -> Result<BucketKey, AddressError> {
    if text.len() > MAX_ADDRESS_LEN {
        return Err(AddressError::TooLong { len: text.len() });
    }

    let mut octets = [0u16; OCTETS];
    let mut octet = 0usize;
    let mut digits = 0usize;

    for c in text.chars() {
        match c {
            '0'..='9' => {
                digits += 1;
                if digits > MAX_OCTET_DIGITS {
                    return Err(AddressError::OctetTooLong);
                }
                let value = u16::from(c as u8 - b'0');
                octets[octet] = octets[octet] * 10 + value;
            }
            '.' => {
                if digits == 0 {
                    return Err(AddressError::EmptyOctet);
                }
                octet += 1;
                digits = 0;
                if octet == OCTETS {
                    return Err(AddressError::TooManyOctets);
                }
            }
            other => return Err(AddressError::InvalidCharacter(other)),
        }
    }

    if octet != OCTETS - 1 || digits == 0 {
        return Err(AddressError::TooFewOctets);
    }

    let mut packed = 0u32;
    for value in octets {
        let byte = u8::try_from(value).map_err(|_| AddressError::OctetOutOfRange(value))?;
        packed = (packed << 8) | u32::from(byte);
    }

    BucketKey::new(packed).ok_or(AddressError::Unspecified)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key(text: &str) -> u32 {
        match parse(text) {
            Ok(k) => k.get(),
            Err(e) => panic!("{text:?} should parse, got {e}"),
        }
    }

    #[test]
    fn packs_most_significant_octet_first() {
        assert_eq!(key("192.168.3.30"), 0xC0A8_031E);
        assert_eq!(key("0.0.0.1"), 1);
        assert_eq!(key("255.255.255.255"), u32::MAX);
        assert_eq!(key("1.0.0.0"), 1 << 24);
    }

    #[test]
    fn accepts_leading_zeros() {
        assert_eq!(key("010.001.000.009"), key("10.1.0.9"));
    }

    #[test]
    fn agrees_with_std_for_canonical_text() {
        for text in ["8.8.8.8", "127.0.0.1", "10.20.30.40", "172.16.254.3"] {
            let std: Ipv4Addr = text.parse().unwrap_or_else(|e| panic!("{text}: {e}"));
            assert_eq!(key(text), u32::from(std));
            assert_eq!(parse(text).map(|k| k.to_string()), Ok(text.to_string()));
        }
    }

    #[test]
    fn rejects_malformed_text() {
        let cases = [
            ("", AddressError::TooFewOctets),
            (".", AddressError::EmptyOctet),
            ("1..2.3", AddressError::EmptyOctet),
            (".1.2.3", AddressError::EmptyOctet),
            ("1.2.3", AddressError::TooFewOctets),
            ("192.168.", AddressError::TooFewOctets),
            ("1.2.3.", AddressError::TooFewOctets),
            ("1.2.3.4.", AddressError::TooManyOctets),
            ("1.2.3.4.5", AddressError::TooManyOctets),
            ("1.2.3.1000", AddressError::OctetTooLong),
            ("1.2.3.256", AddressError::OctetOutOfRange(256)),
            ("999.1.1.1", AddressError::OctetOutOfRange(999)),
            ("-1.-2.-3.-4", AddressError::InvalidCharacter('-')),
            ("B.BB.B.B", AddressError::InvalidCharacter('B')),
            ("1.2.3.4 ", AddressError::InvalidCharacter(' ')),
            ("1.2.3.4\n", AddressError::InvalidCharacter('\n')),
        ];
        for (text, expected) in cases {
            assert_eq!(parse(text), Err(expected), "input {text:?}");
        }
    }

    #[test]
    fn rejects_overlong_input_before_parsing() {
        let junk = "A".repeat(80);
        assert_eq!(parse(&junk), Err(AddressError::TooLong { len: 80 }));
        assert_eq!(parse("1.1.1.1.1.1.1.1.1"), Err(AddressError::TooLong { len: 17 }));
    }

    #[test]
    fn unspecified_address_is_invalid() {
        assert_eq!(parse("0.0.0.0"), Err(AddressError::Unspecified));
        assert_eq!(parse("000.000.000.000"), Err(AddressError::Unspecified));
        assert!(BucketKey::new(0).is_none());
    }

    #[test]
    fn reparsing_is_stable() {
        let first = parse("203.0.113.7");
        assert_eq!(first, parse("203.0.113.7"));
        assert_eq!("203.0.113.7".parse::<BucketKey>(), first);
    }
}
