//! Single-level page table consulted by virtual-memory translation.

use rand::{Rng, SeedableRng};
use rand_xorshift::XorShiftRng;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::bits;

/// chance that a generated entry is resident
pub const PRESENT_PROBABILITY: f64 = 0.3;
/// upper bound on generated tables, which are materialised in full
pub const MAX_PAGES: u64 = 1 << 20;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PagingConfig {
    pub logical_address_bits: u32,
    pub physical_address_bits: u32,
    pub page_size: u32,
}

impl Default for PagingConfig {
    fn default() -> Self {
        Self {
            logical_address_bits: 16,
            physical_address_bits: 20,
            page_size: 4096,
        }
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PagingConfigError {
    #[error("page size ({0}) must be a non-zero power of two")]
    PageSizeNotPowerOfTwo(u32),
    #[error("{what} address width ({bits} bits) must be between 1 and 32")]
    AddressBitsOutOfRange { what: &'static str, bits: u32 },
    #[error("{what} address width ({bits} bits) cannot hold a page offset of {page_offset_bits} bits")]
    AddressBitsBelowOffset {
        what: &'static str,
        bits: u32,
        page_offset_bits: u32,
    },
    #[error("{pages} pages exceed the supported maximum of {max}", max = MAX_PAGES)]
    TooManyPages { pages: u64 },
    #[error("page table holds {found} entries but the config needs {expected}")]
    TableLengthMismatch { expected: u64, found: usize },
    #[error("page {page} maps to frame {frame}, beyond the {frames} physical frames")]
    FrameOutOfRange { page: usize, frame: u32, frames: u64 },
}

impl PagingConfig {
    /// Number of page offset bits, after checking the page size alone.
    pub fn page_offset_bits(&self) -> Result<u32, PagingConfigError> {
        bits::log2_exact(self.page_size as u64)
            .ok_or(PagingConfigError::PageSizeNotPowerOfTwo(self.page_size))
    }

    pub fn validate(&self) -> Result<(), PagingConfigError> {
        let page_offset_bits = self.page_offset_bits()?;
        for (what, width) in [
            ("logical", self.logical_address_bits),
            ("physical", self.physical_address_bits),
        ] {
            if width == 0 || width > bits::ADDRESS_WIDTH {
                return Err(PagingConfigError::AddressBitsOutOfRange { what, bits: width });
            }
            if width < page_offset_bits {
                return Err(PagingConfigError::AddressBitsBelowOffset {
                    what,
                    bits: width,
                    page_offset_bits,
                });
            }
        }
        let pages = units(self.logical_address_bits, page_offset_bits);
        if pages > MAX_PAGES {
            return Err(PagingConfigError::TooManyPages { pages });
        }
        Ok(())
    }

    /// Page-table length; fails unless the whole config is valid.
    pub fn num_pages(&self) -> Result<u64, PagingConfigError> {
        self.validate()?;
        Ok(units(self.logical_address_bits, self.page_offset_bits()?))
    }

    /// at most 2^32, so every frame number fits in a `u32`
    pub fn num_frames(&self) -> Result<u64, PagingConfigError> {
        self.validate()?;
        Ok(units(self.physical_address_bits, self.page_offset_bits()?))
    }
}

/// pages (or frames) in a `width`-bit address space; `width` is at most 32
fn units(width: u32, page_offset_bits: u32) -> u64 {
    1 << width.saturating_sub(page_offset_bits)
}

/// One page-table slot; a resident page always carries its frame.
///
/// Serialized as `{"valid": bool, "frame_number": n}`. A frame stored
/// alongside `"valid": false` is ignored.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(try_from = "EntryRepr", into = "EntryRepr")]
pub struct PageTableEntry {
    frame_number: Option<u32>,
}

/// on-disk form of [`PageTableEntry`]
#[derive(Serialize, Deserialize)]
pub struct EntryRepr {
    valid: bool,
    #[serde(default)]
    frame_number: Option<u32>,
}

#[derive(Error, Debug, PartialEq, Eq)]
#[error("page table entry is marked valid but has no frame_number")]
pub struct ValidEntryWithoutFrame;

impl TryFrom<EntryRepr> for PageTableEntry {
    type Error = ValidEntryWithoutFrame;

    fn try_from(repr: EntryRepr) -> Result<Self, Self::Error> {
        match (repr.valid, repr.frame_number) {
            (true, None) => Err(ValidEntryWithoutFrame),
            (true, frame) => Ok(Self {
                frame_number: frame,
            }),
            (false, _) => Ok(Self::absent()),
        }
    }
}

impl From<PageTableEntry> for EntryRepr {
    fn from(e: PageTableEntry) -> Self {
        Self {
            valid: e.is_valid(),
            frame_number: e.frame_number,
        }
    }
}

impl PageTableEntry {
    pub fn present(frame_number: u32) -> Self {
        Self {
            frame_number: Some(frame_number),
        }
    }
    pub fn absent() -> Self {
        Self::default()
    }
    pub fn is_valid(&self) -> bool {
        self.frame_number.is_some()
    }
    /// frame number of a resident page
    pub fn frame(&self) -> Option<u32> {
        self.frame_number
    }
}

/// Page number -> entry; read-only once built.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PageTable {
    entries: Vec<PageTableEntry>,
}

impl PageTable {
    pub fn from_entries(entries: Vec<PageTableEntry>) -> Self {
        Self { entries }
    }

    pub fn generate(config: &PagingConfig, rng: &mut impl Rng) -> Result<Self, PagingConfigError> {
        config.validate()?;
        let num_frames = config.num_frames()?;
        let entries = (0..config.num_pages()?)
            .map(|_| {
                if rng.gen_bool(PRESENT_PROBABILITY) {
                    PageTableEntry::present(rng.gen_range(0..num_frames) as u32)
                } else {
                    PageTableEntry::absent()
                }
            })
            .collect::<Vec<_>>();
        log::info!(
            "generated page table: {} pages, {} resident, {} frames",
            entries.len(),
            entries.iter().filter(|e| e.is_valid()).count(),
            num_frames
        );
        Ok(Self { entries })
    }

    /// Checks that this table has one entry per page of `config` and that
    /// every frame lies in physical memory.
    pub fn check(&self, config: &PagingConfig) -> Result<(), PagingConfigError> {
        let expected = config.num_pages()?;
        if self.entries.len() as u64 != expected {
            return Err(PagingConfigError::TableLengthMismatch {
                expected,
                found: self.entries.len(),
            });
        }
        let frames = config.num_frames()?;
        for (page, e) in self.entries.iter().enumerate() {
            if let Some(frame) = e.frame().filter(|&f| f as u64 >= frames) {
                return Err(PagingConfigError::FrameOutOfRange {
                    page,
                    frame,
                    frames,
                });
            }
        }
        Ok(())
    }

    /// Reproducible table for `seed`.
    pub fn seeded(config: &PagingConfig, seed: u64) -> Result<Self, PagingConfigError> {
        let mut rng = XorShiftRng::seed_from_u64(seed);
        Self::generate(config, &mut rng)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
    pub fn get(&self, page: u64) -> Option<&PageTableEntry> {
        usize::try_from(page).ok().and_then(|p| self.entries.get(p))
    }
    pub fn entries(&self) -> &[PageTableEntry] {
        &self.entries
    }
}
