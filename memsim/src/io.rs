//! Parsing of address batches typed by a user.

use std::fmt;

use nom::{
    branch::alt,
    bytes::complete::{tag_no_case, take_till1, take_while},
    character::complete::{hex_digit1, u32 as dec_u32},
    combinator::{all_consuming, map_res},
    sequence::preceded,
    IResult,
};
use serde::Serialize;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SkippedToken {
    /// zero-based index among the non-empty tokens
    pub position: usize,
    pub token: String,
}

impl fmt::Display for SkippedToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "token #{} `{}`", self.position, self.token)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct AddressBatch {
    pub addresses: Vec<u32>,
    pub skipped: Vec<SkippedToken>,
}

fn address(input: &str) -> IResult<&str, u32> {
    alt((
        preceded(
            tag_no_case("0x"),
            map_res(hex_digit1, |h| u32::from_str_radix(h, 16)),
        ),
        dec_u32,
    ))(input)
}

/// Reads a single decimal or `0x`-prefixed address.
pub fn parse_address(input: &str) -> Option<u32> {
    all_consuming(address)(input.trim()).ok().map(|(_, a)| a)
}

fn separator(input: &str) -> IResult<&str, &str> {
    take_while(|c: char| c == ',' || c.is_whitespace())(input)
}

fn token(input: &str) -> IResult<&str, &str> {
    take_till1(|c: char| c == ',' || c.is_whitespace())(input)
}

/// Splits `input` on commas and whitespace and reads each token as a
/// decimal or `0x`-prefixed hexadecimal 32-bit address.
///
/// Malformed tokens do not abort the batch; they are collected in
/// [`AddressBatch::skipped`].
/// ```
/// use memsim::io::parse_address_batch;
///
/// let b = parse_address_batch("0, 16 0x20,,-4, 48");
/// assert_eq!(b.addresses, [0, 16, 32, 48]);
/// assert_eq!(b.skipped[0].token, "-4");
/// ```
pub fn parse_address_batch(input: &str) -> AddressBatch {
    let mut batch = AddressBatch::default();
    let mut rest = input;
    for position in 0.. {
        let Ok((r, tok)) = separator(rest).and_then(|(r, _)| token(r)) else {
            break;
        };
        rest = r;
        match all_consuming(address)(tok) {
            Ok((_, a)) => batch.addresses.push(a),
            Err(_) => {
                log::warn!("skipping malformed address `{tok}` at position {position}");
                batch.skipped.push(SkippedToken {
                    position,
                    token: tok.to_owned(),
                });
            }
        }
    }
    batch
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decimal_and_hex() {
        let b = parse_address_batch("0,16,32,48,0");
        assert_eq!(b.addresses, [0, 16, 32, 48, 0]);
        assert!(b.skipped.is_empty());
        let b = parse_address_batch("0x10 0XfF\n4096");
        assert_eq!(b.addresses, [16, 255, 4096]);
    }

    #[test]
    fn test_skips_malformed_tokens() {
        let b = parse_address_batch(" 1, abc, 2, -3, 0x, 4294967296, 4294967295, 12ab ");
        assert_eq!(b.addresses, [1, 2, u32::MAX]);
        let skipped: Vec<_> = b
            .skipped
            .iter()
            .map(|s| (s.position, s.token.as_str()))
            .collect();
        assert_eq!(
            skipped,
            [
                (1, "abc"),
                (3, "-3"),
                (4, "0x"),
                (5, "4294967296"),
                (7, "12ab")
            ]
        );
    }

    #[test]
    fn test_single_address() {
        assert_eq!(parse_address(" 0x1F "), Some(31));
        assert_eq!(parse_address("5000"), Some(5000));
        assert_eq!(parse_address("5,000"), None);
        assert_eq!(parse_address(""), None);
    }

    #[test]
    fn test_empty_input() {
        assert_eq!(parse_address_batch(""), AddressBatch::default());
        assert_eq!(parse_address_batch(" ,, \t"), AddressBatch::default());
    }
}
