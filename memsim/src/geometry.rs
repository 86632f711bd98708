//! Cache layout derived from size parameters.

use std::{fmt, ops::Range, str::FromStr};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::bits::{self, ADDRESS_WIDTH};

/// bytes per data word held by a cache line
pub const WORD_BYTES: u32 = 4;
/// caches are materialised line by line, and every step snapshots them
pub const MAX_LINES: u32 = 1 << 16;
pub const MAX_CACHE_SIZE: u32 = 1 << 20;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum Associativity {
    #[default]
    #[serde(rename = "direct", alias = "direct-mapped")]
    DirectMapped,
    #[serde(rename = "full", alias = "fully-associative")]
    FullyAssociative,
    /// `n` lines per set
    #[serde(rename = "ways")]
    NWay(u32),
}

impl fmt::Display for Associativity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Associativity::DirectMapped => write!(f, "direct-mapped"),
            Associativity::FullyAssociative => write!(f, "fully-associative"),
            Associativity::NWay(n) => write!(f, "{n}-way set-associative"),
        }
    }
}

#[derive(Error, Debug, PartialEq, Eq)]
#[error("unknown associativity `{0}` (expected `direct`, `full` or a number of ways)")]
pub struct ParseAssociativityError(String);

impl FromStr for Associativity {
    type Err = ParseAssociativityError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let t = s.trim().to_ascii_lowercase();
        match t.as_str() {
            "direct" | "direct-mapped" | "dm" => Ok(Associativity::DirectMapped),
            "full" | "fully-associative" | "fa" => Ok(Associativity::FullyAssociative),
            _ => t
                .strip_suffix("-way")
                .unwrap_or(&t)
                .parse()
                .map(Associativity::NWay)
                .map_err(|_| ParseAssociativityError(s.to_owned())),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    pub cache_size: u32,
    pub block_size: u32,
    pub associativity: Associativity,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            cache_size: 1024,
            block_size: 16,
            associativity: Associativity::DirectMapped,
        }
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum GeometryError {
    #[error("{what} must be positive")]
    ZeroSize { what: &'static str },
    #[error("{what} ({value}) must be a power of two")]
    NotPowerOfTwo { what: &'static str, value: u32 },
    #[error("cache size ({cache_size}) is smaller than block size ({block_size})")]
    CacheSmallerThanBlock { cache_size: u32, block_size: u32 },
    #[error("cache size ({cache_size}) exceeds the supported maximum of {max} bytes", max = MAX_CACHE_SIZE)]
    CacheTooLarge { cache_size: u32 },
    #[error("{lines} lines exceed the supported maximum of {max}", max = MAX_LINES)]
    TooManyLines { lines: u32 },
    #[error("associativity must have at least one way")]
    ZeroWays,
    #[error("{ways} ways do not evenly divide {lines} lines")]
    AssociativityDoesNotDivide { ways: u32, lines: u32 },
}

/// Immutable layout of a cache; rebuilt whenever the config changes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Geometry {
    pub cache_size: u32,
    pub block_size: u32,
    pub num_lines: u32,
    pub num_sets: u32,
    pub lines_per_set: u32,
    pub offset_bits: u32,
    pub index_bits: u32,
    pub tag_bits: u32,
}

impl Geometry {
    pub fn derive(config: &CacheConfig) -> Result<Self, GeometryError> {
        let CacheConfig {
            cache_size,
            block_size,
            associativity,
        } = *config;
        let offset_bits = pow2_bits("block size", block_size)?;
        pow2_bits("cache size", cache_size)?;
        if cache_size < block_size {
            return Err(GeometryError::CacheSmallerThanBlock {
                cache_size,
                block_size,
            });
        }
        if cache_size > MAX_CACHE_SIZE {
            return Err(GeometryError::CacheTooLarge { cache_size });
        }
        let num_lines = cache_size / block_size;
        if num_lines > MAX_LINES {
            return Err(GeometryError::TooManyLines { lines: num_lines });
        }
        let lines_per_set = match associativity {
            Associativity::DirectMapped => 1,
            Associativity::FullyAssociative => num_lines,
            Associativity::NWay(0) => return Err(GeometryError::ZeroWays),
            Associativity::NWay(ways) => {
                if num_lines % ways != 0 {
                    return Err(GeometryError::AssociativityDoesNotDivide {
                        ways,
                        lines: num_lines,
                    });
                }
                ways
            }
        };
        let num_sets = num_lines / lines_per_set;
        // num_lines is a power of two, so any divisor of it is one too
        let index_bits = num_sets.trailing_zeros();
        Ok(Self {
            cache_size,
            block_size,
            num_lines,
            num_sets,
            lines_per_set,
            offset_bits,
            index_bits,
            tag_bits: ADDRESS_WIDTH - offset_bits - index_bits,
        })
    }

    pub fn words_per_line(&self) -> usize {
        (self.block_size / WORD_BYTES) as usize
    }

    /// absolute line numbers a set may occupy
    pub fn set_range(&self, index: u32) -> Range<usize> {
        let start = (index * self.lines_per_set) as usize;
        start..start + self.lines_per_set as usize
    }

    pub fn parse(&self, address: u32) -> ParsedAddress {
        let address = address as u64;
        ParsedAddress {
            tag: bits::shr(address, self.offset_bits + self.index_bits) as u32,
            index: bits::extract(address, self.offset_bits, self.index_bits) as u32,
            offset: bits::mask_lower(address, self.offset_bits) as u32,
            offset_bits: self.offset_bits,
            index_bits: self.index_bits,
            tag_bits: self.tag_bits,
        }
    }

    /// first byte address of the block holding `address`
    pub fn block_base(&self, address: u32) -> u32 {
        address & !(bits::bit_range_lower(self.offset_bits) as u32)
    }
}

impl fmt::Display for Geometry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "{} bytes / {}-byte blocks = {} lines in {} sets of {}",
            self.cache_size, self.block_size, self.num_lines, self.num_sets, self.lines_per_set
        )?;
        write!(
            f,
            "address fields: tag {} bits | index {} bits | offset {} bits",
            self.tag_bits, self.index_bits, self.offset_bits
        )
    }
}

fn pow2_bits(what: &'static str, value: u32) -> Result<u32, GeometryError> {
    if value == 0 {
        return Err(GeometryError::ZeroSize { what });
    }
    bits::log2_exact(value as u64).ok_or(GeometryError::NotPowerOfTwo { what, value })
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ParsedAddress {
    pub tag: u32,
    pub index: u32,
    pub offset: u32,
    pub offset_bits: u32,
    pub index_bits: u32,
    pub tag_bits: u32,
}

impl fmt::Display for ParsedAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "tag={} index={} offset={}",
            self.tag, self.index, self.offset
        )
    }
}
