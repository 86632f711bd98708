//! Effective-address computation for the supported addressing modes.

use std::{collections::HashMap, fmt, str::FromStr};

use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::{
    bits,
    page_table::{PageTable, PagingConfig, PagingConfigError},
};

/// program counter assumed by relative addressing unless configured
pub const DEFAULT_PROGRAM_COUNTER: u32 = 1000;
/// real-mode style segment scaling
pub const SEGMENT_SHIFT: u32 = 4;

fn default_program_counter() -> u32 {
    DEFAULT_PROGRAM_COUNTER
}

/// An addressing mode together with the registers it reads.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "kebab-case")]
pub enum AddressingMode {
    #[default]
    Direct,
    Immediate,
    Register,
    RegisterIndirect,
    Relative {
        #[serde(default = "default_program_counter")]
        program_counter: u32,
    },
    BaseIndexed {
        #[serde(default)]
        base_address: u32,
        #[serde(default)]
        index_register: u32,
    },
    SegmentedOffset {
        #[serde(default)]
        segment_register: u32,
    },
    VirtualMemory(PagingConfig),
}

impl AddressingMode {
    pub fn kind(&self) -> ModeKind {
        match self {
            AddressingMode::Direct => ModeKind::Direct,
            AddressingMode::Immediate => ModeKind::Immediate,
            AddressingMode::Register => ModeKind::Register,
            AddressingMode::RegisterIndirect => ModeKind::RegisterIndirect,
            AddressingMode::Relative { .. } => ModeKind::Relative,
            AddressingMode::BaseIndexed { .. } => ModeKind::BaseIndexed,
            AddressingMode::SegmentedOffset { .. } => ModeKind::SegmentedOffset,
            AddressingMode::VirtualMemory(_) => ModeKind::VirtualMemory,
        }
    }

    pub fn paging(&self) -> Option<&PagingConfig> {
        match self {
            AddressingMode::VirtualMemory(p) => Some(p),
            _ => None,
        }
    }
}

/// Mode names without their register payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ModeKind {
    Direct,
    Immediate,
    Register,
    RegisterIndirect,
    Relative,
    BaseIndexed,
    SegmentedOffset,
    VirtualMemory,
}

impl ModeKind {
    pub const ALL: [ModeKind; 8] = [
        ModeKind::Direct,
        ModeKind::Immediate,
        ModeKind::Register,
        ModeKind::RegisterIndirect,
        ModeKind::Relative,
        ModeKind::BaseIndexed,
        ModeKind::SegmentedOffset,
        ModeKind::VirtualMemory,
    ];

    pub fn name(self) -> &'static str {
        match self {
            ModeKind::Direct => "direct",
            ModeKind::Immediate => "immediate",
            ModeKind::Register => "register",
            ModeKind::RegisterIndirect => "register-indirect",
            ModeKind::Relative => "relative",
            ModeKind::BaseIndexed => "base-indexed",
            ModeKind::SegmentedOffset => "segmented-offset",
            ModeKind::VirtualMemory => "virtual-memory",
        }
    }

    pub fn description(self) -> &'static str {
        match self {
            ModeKind::Direct => "direct: EA = address field",
            ModeKind::Immediate => "immediate: the address field is the operand",
            ModeKind::Register => "register: the operand is held in a register",
            ModeKind::RegisterIndirect => "register indirect: the register holds the EA",
            ModeKind::Relative => "relative: EA = PC + address field",
            ModeKind::BaseIndexed => "base indexed: EA = base register + index register",
            ModeKind::SegmentedOffset => "segmented: EA = segment register * 16 + offset",
            ModeKind::VirtualMemory => {
                "virtual memory: logical address -> physical address, with page faults"
            }
        }
    }
}

impl fmt::Display for ModeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

pub static MODE_LOOKUP: Lazy<HashMap<&'static str, ModeKind>> =
    Lazy::new(|| ModeKind::ALL.iter().map(|k| (k.name(), *k)).collect());

#[derive(Error, Debug, PartialEq, Eq)]
#[error("unknown addressing mode `{0}`")]
pub struct ParseModeError(String);

impl FromStr for ModeKind {
    type Err = ParseModeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let key = s.trim().to_ascii_lowercase().replace('_', "-");
        MODE_LOOKUP
            .get(key.as_str())
            .copied()
            .ok_or_else(|| ParseModeError(s.to_owned()))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum TranslationOutcome {
    /// EA computed without consulting a page table
    Resolved,
    PageHit { page: u32, frame: u32 },
    PageFault { page: u32 },
    PageOutOfRange { page: u32, pages: usize },
    Rejected(#[serde(serialize_with = "serialize_display")] PagingConfigError),
}

fn serialize_display<S: serde::Serializer>(
    e: &PagingConfigError,
    s: S,
) -> Result<S::Ok, S::Error> {
    s.collect_str(e)
}

impl fmt::Display for TranslationOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TranslationOutcome::Resolved => write!(f, "resolved"),
            TranslationOutcome::PageHit { page, frame } => {
                write!(f, "page {page} resident in frame {frame}")
            }
            TranslationOutcome::PageFault { page } => write!(f, "page fault on page {page}"),
            TranslationOutcome::PageOutOfRange { page, pages } => {
                write!(f, "page {page} outside the {pages}-entry page table")
            }
            TranslationOutcome::Rejected(e) => write!(f, "rejected: {e}"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Translation {
    pub effective_address: Option<u64>,
    pub trace: Vec<String>,
    pub page_fault: bool,
    pub highlighted_page_entry: Option<u32>,
    pub outcome: TranslationOutcome,
}

struct TraceBuilder(Vec<String>);

impl TraceBuilder {
    fn push(&mut self, line: String) {
        log::trace!("{line}");
        self.0.push(line);
    }

    fn resolved(self, ea: u64) -> Translation {
        Translation {
            effective_address: Some(ea),
            trace: self.0,
            page_fault: false,
            highlighted_page_entry: None,
            outcome: TranslationOutcome::Resolved,
        }
    }
}

/// Computes the effective address of `input` under `mode`.
///
/// `page_table` is only read by [`AddressingMode::VirtualMemory`]. Nothing
/// is mutated, so identical arguments always give identical results.
pub fn translate(mode: &AddressingMode, input: u32, page_table: &PageTable) -> Translation {
    let mut t = TraceBuilder(Vec::new());
    t.push(format!("addressing mode: {}", mode.kind().description()));
    let addr = input as u64;
    match *mode {
        AddressingMode::Direct => {
            t.push(format!("EA = address field = {addr}"));
            t.resolved(addr)
        }
        AddressingMode::Immediate => {
            t.push(format!(
                "operand = address field = {addr} (no effective address is computed, the value is the operand)"
            ));
            t.resolved(addr)
        }
        AddressingMode::Register => {
            t.push(format!("EA = register contents = {addr}"));
            t.resolved(addr)
        }
        AddressingMode::RegisterIndirect => {
            t.push(format!("EA = (register) = ({addr}) = {addr}"));
            t.resolved(addr)
        }
        AddressingMode::Relative { program_counter } => {
            let pc = program_counter as u64;
            let ea = pc + addr;
            t.push(format!("PC = {pc}"));
            t.push(format!("EA = PC + address field = {pc} + {addr} = {ea}"));
            t.resolved(ea)
        }
        AddressingMode::BaseIndexed {
            base_address,
            index_register,
        } => {
            let (base, index) = (base_address as u64, index_register as u64);
            let ea = base + index;
            t.push(format!("base register = {base}"));
            t.push(format!("index register = {index}"));
            t.push(format!("EA = base + index = {base} + {index} = {ea}"));
            t.resolved(ea)
        }
        AddressingMode::SegmentedOffset { segment_register } => {
            let segment = segment_register as u64;
            let ea = (segment << SEGMENT_SHIFT) + addr;
            t.push(format!("segment register = {segment}"));
            t.push(format!("offset = {addr}"));
            t.push(format!(
                "EA = segment * 16 + offset = {segment} * 16 + {addr} = {ea}"
            ));
            t.resolved(ea)
        }
        AddressingMode::VirtualMemory(paging) => translate_paged(t, &paging, input, page_table),
    }
}

fn translate_paged(
    mut t: TraceBuilder,
    paging: &PagingConfig,
    input: u32,
    page_table: &PageTable,
) -> Translation {
    t.push(format!("logical address = {input}"));
    let page_offset_bits = match paging.page_offset_bits() {
        Ok(b) => b,
        Err(e) => {
            t.push(format!("error: {e}"));
            log::warn!("virtual memory translation rejected: {e}");
            return Translation {
                effective_address: None,
                trace: t.0,
                page_fault: false,
                highlighted_page_entry: None,
                outcome: TranslationOutcome::Rejected(e),
            };
        }
    };
    let page = bits::shr(input as u64, page_offset_bits) as u32;
    let offset = bits::mask_lower(input as u64, page_offset_bits);
    t.push(format!("page size = {} bytes", paging.page_size));
    t.push(format!("page offset bits = {page_offset_bits}"));
    t.push(format!(
        "page number bits = {}",
        paging.logical_address_bits as i64 - page_offset_bits as i64
    ));
    t.push(format!("from logical address {input}:"));
    t.push(format!("  page number = {page}"));
    t.push(format!("  offset in page = {offset}"));

    let Some(entry) = page_table.get(page as u64) else {
        let pages = page_table.len();
        t.push(format!(
            "error: page number {page} is outside the page table ({pages} pages)"
        ));
        return Translation {
            effective_address: None,
            trace: t.0,
            page_fault: true,
            highlighted_page_entry: None,
            outcome: TranslationOutcome::PageOutOfRange { page, pages },
        };
    };
    t.push(format!("page table entry for page {page}:"));
    match entry.frame() {
        Some(frame) => {
            let ea = ((frame as u64) << page_offset_bits) | offset;
            t.push("  valid bit = 1 (page is resident)".to_owned());
            t.push(format!("  frame number = {frame}"));
            t.push("physical address = frame << page offset bits | offset".to_owned());
            t.push(format!(
                "physical address = {frame} << {page_offset_bits} | {offset} = {ea}"
            ));
            Translation {
                effective_address: Some(ea),
                trace: t.0,
                page_fault: false,
                highlighted_page_entry: Some(page),
                outcome: TranslationOutcome::PageHit { page, frame },
            }
        }
        None => {
            t.push("  valid bit = 0 (page is not resident)".to_owned());
            t.push("page fault: the page must be loaded from disk first".to_owned());
            log::debug!("page fault on page {page}");
            Translation {
                effective_address: None,
                trace: t.0,
                page_fault: true,
                highlighted_page_entry: Some(page),
                outcome: TranslationOutcome::PageFault { page },
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::page_table::PageTableEntry;

    fn vm(page_size: u32) -> AddressingMode {
        AddressingMode::VirtualMemory(PagingConfig {
            page_size,
            ..Default::default()
        })
    }

    fn table_with_page1(entry: PageTableEntry) -> PageTable {
        let mut entries = vec![PageTableEntry::absent(); 16];
        entries[1] = entry;
        PageTable::from_entries(entries)
    }

    #[test]
    fn test_paged_hit() {
        let table = table_with_page1(PageTableEntry::present(7));
        let t = translate(&vm(4096), 5000, &table);
        assert_eq!(t.effective_address, Some(29608));
        assert!(!t.page_fault);
        assert_eq!(t.highlighted_page_entry, Some(1));
        assert_eq!(t.outcome, TranslationOutcome::PageHit { page: 1, frame: 7 });
        assert!(t.trace.iter().any(|l| l.contains("offset in page = 904")));
    }

    #[test]
    fn test_paged_fault() {
        let table = table_with_page1(PageTableEntry::absent());
        let t = translate(&vm(4096), 5000, &table);
        assert_eq!(t.effective_address, None);
        assert!(t.page_fault);
        assert_eq!(t.highlighted_page_entry, Some(1));
        assert_eq!(t.outcome, TranslationOutcome::PageFault { page: 1 });
        // the fault is reported, not resolved
        assert_eq!(table.get(1), Some(&PageTableEntry::absent()));
    }

    #[test]
    fn test_paged_out_of_range() {
        let table = table_with_page1(PageTableEntry::present(7));
        let t = translate(&vm(4096), 16 * 4096, &table);
        assert_eq!(t.effective_address, None);
        assert!(t.page_fault);
        assert_eq!(t.highlighted_page_entry, None);
        assert_eq!(
            t.outcome,
            TranslationOutcome::PageOutOfRange { page: 16, pages: 16 }
        );
    }

    #[test]
    fn test_paged_rejects_bad_page_size() {
        let table = table_with_page1(PageTableEntry::present(7));
        let t = translate(&vm(3000), 5000, &table);
        assert_eq!(t.effective_address, None);
        assert!(!t.page_fault);
        assert_eq!(
            t.outcome,
            TranslationOutcome::Rejected(PagingConfigError::PageSizeNotPowerOfTwo(3000))
        );
        assert!(t.trace.last().unwrap().starts_with("error:"));
    }

    #[test]
    fn test_non_paged_modes() {
        let table = PageTable::default();
        let cases = [
            (AddressingMode::Direct, 100, 100),
            (AddressingMode::Immediate, 100, 100),
            (AddressingMode::Register, 100, 100),
            (AddressingMode::RegisterIndirect, 100, 100),
            (
                AddressingMode::Relative {
                    program_counter: DEFAULT_PROGRAM_COUNTER,
                },
                20,
                1020,
            ),
            (
                AddressingMode::BaseIndexed {
                    base_address: 400,
                    index_register: 12,
                },
                9999,
                412,
            ),
            (
                AddressingMode::SegmentedOffset {
                    segment_register: 16,
                },
                32,
                288,
            ),
        ];
        for (mode, input, ea) in cases {
            let t = translate(&mode, input, &table);
            assert_eq!(t.effective_address, Some(ea), "{}", mode.kind());
            assert!(!t.page_fault);
            assert_eq!(t.highlighted_page_entry, None);
            assert_eq!(t.outcome, TranslationOutcome::Resolved);
        }
    }

    #[test]
    fn test_segment_does_not_overflow() {
        let mode = AddressingMode::SegmentedOffset {
            segment_register: u32::MAX,
        };
        let t = translate(&mode, u32::MAX, &PageTable::default());
        assert_eq!(t.effective_address, Some(u32::MAX as u64 * 17));
    }

    #[test]
    fn test_translate_is_idempotent() {
        let table = PageTable::seeded(&PagingConfig::default(), 42).unwrap();
        for input in [0, 4095, 4096, 5000, 65535, 65536] {
            let a = translate(&vm(4096), input, &table);
            let b = translate(&vm(4096), input, &table);
            assert_eq!(a, b);
        }
    }

    #[test]
    fn test_mode_names() {
        for k in ModeKind::ALL {
            assert_eq!(k.name().parse::<ModeKind>(), Ok(k));
        }
        assert_eq!(
            "Virtual_Memory".parse::<ModeKind>(),
            Ok(ModeKind::VirtualMemory)
        );
        assert!("paged".parse::<ModeKind>().is_err());
    }

    #[test]
    fn test_mode_serde() {
        let m: AddressingMode =
            serde_json::from_str(r#"{"mode": "segmented-offset", "segment_register": 16}"#)
                .unwrap();
        assert_eq!(
            m,
            AddressingMode::SegmentedOffset {
                segment_register: 16
            }
        );
        let m: AddressingMode = serde_json::from_str(r#"{"mode": "relative"}"#).unwrap();
        assert_eq!(
            m,
            AddressingMode::Relative {
                program_counter: 1000
            }
        );
        let m: AddressingMode =
            serde_json::from_str(r#"{"mode": "virtual-memory", "page_size": 1024}"#).unwrap();
        assert_eq!(m.paging().map(|p| p.page_size), Some(1024));
        assert_eq!(m.paging().map(|p| p.logical_address_bits), Some(16));
    }
}
