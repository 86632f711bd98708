//! Step-by-step cache access simulation with LRU replacement.

use std::fmt;

use serde::Serialize;
use thiserror::Error;

use crate::geometry::{Geometry, ParsedAddress, WORD_BYTES};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CacheLine {
    pub tag: Option<u32>,
    pub data: Vec<u32>,
    pub valid: bool,
    /// never set: every simulated access is a load
    pub dirty: bool,
    pub last_used: u64,
}

impl CacheLine {
    pub fn empty(words: usize) -> Self {
        Self {
            tag: None,
            data: vec![0; words],
            valid: false,
            dirty: false,
            last_used: 0,
        }
    }
}

impl fmt::Display for CacheLine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.tag {
            Some(tag) if self.valid => write!(f, "tag={tag:<6}")?,
            _ => write!(f, "tag={:<6}", "-")?,
        }
        write!(
            f,
            " {} lru={:<4} [",
            if self.valid { "V" } else { "-" },
            self.last_used
        )?;
        for (i, w) in self.data.iter().enumerate() {
            if i != 0 {
                write!(f, " ")?;
            }
            write!(f, "{w:#x}")?;
        }
        write!(f, "]")
    }
}

/// Lines of one cache together with the LRU clock that stamps them.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CacheState {
    /// layout the lines were built for
    #[serde(skip)]
    geometry: Geometry,
    lines: Vec<CacheLine>,
    clock: u64,
}

impl CacheState {
    pub fn geometry(&self) -> &Geometry {
        &self.geometry
    }
    pub fn lines(&self) -> &[CacheLine] {
        &self.lines
    }
    /// last value handed out by the LRU clock
    pub fn clock(&self) -> u64 {
        self.clock
    }
    pub fn valid_lines(&self) -> usize {
        self.lines.iter().filter(|l| l.valid).count()
    }
    fn tick(&mut self) -> u64 {
        self.clock += 1;
        self.clock
    }
}

/// Cold cache for `geometry`: every line invalid, clock at zero.
pub fn reset_cache(geometry: &Geometry) -> CacheState {
    CacheState {
        geometry: *geometry,
        lines: vec![CacheLine::empty(geometry.words_per_line()); geometry.num_lines as usize],
        clock: 0,
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Replacement {
    pub replaced_line_index: usize,
    /// the line as it was before being overwritten
    pub evicted_line: CacheLine,
    pub fetched_data: Vec<u32>,
}

impl Replacement {
    /// `false` when an invalid line was filled
    pub fn is_eviction(&self) -> bool {
        self.evicted_line.valid
    }
}

/// Trace record of one simulated access.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AccessStep {
    pub address: u32,
    pub parsed: ParsedAddress,
    pub before: Vec<CacheLine>,
    pub hit: bool,
    pub highlighted_line: usize,
    pub replacement: Option<Replacement>,
    pub after: Vec<CacheLine>,
}

impl fmt::Display for AccessStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{addr:>10} ({addr:#010x}): {parsed} -> {result:<4} line {line}",
            addr = self.address,
            parsed = self.parsed,
            result = if self.hit { "hit" } else { "miss" },
            line = self.highlighted_line
        )?;
        if let Some(r) = &self.replacement {
            match r.evicted_line.tag {
                Some(tag) if r.is_eviction() => write!(f, " (evicted tag {tag})")?,
                _ => write!(f, " (cold fill)")?,
            }
        }
        Ok(())
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SimulationError {
    #[error(
        "cache was built for {} lines of {} bytes, not {} lines of {} bytes",
        .found.num_lines,
        .found.block_size,
        .expected.num_lines,
        .expected.block_size
    )]
    GeometryMismatch { expected: Geometry, found: Geometry },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Simulation {
    pub state: CacheState,
    pub steps: Vec<AccessStep>,
}

/// Runs `addresses` in order against a copy of `cache`.
///
/// `cache` itself is left untouched; the state after the last access is
/// returned together with one [`AccessStep`] per address.
pub fn simulate(
    addresses: &[u32],
    cache: &CacheState,
    geometry: &Geometry,
) -> Result<Simulation, SimulationError> {
    if cache.geometry != *geometry {
        return Err(SimulationError::GeometryMismatch {
            expected: *geometry,
            found: cache.geometry,
        });
    }
    let mut state = cache.clone();
    let steps = addresses
        .iter()
        .map(|&address| access(&mut state, geometry, address))
        .collect::<Vec<_>>();
    log::info!(
        "simulated {} accesses: {} hits, {} misses",
        steps.len(),
        steps.iter().filter(|s| s.hit).count(),
        steps.iter().filter(|s| !s.hit).count()
    );
    Ok(Simulation { state, steps })
}

fn access(state: &mut CacheState, geometry: &Geometry, address: u32) -> AccessStep {
    let parsed = geometry.parse(address);
    let before = state.lines.clone();
    let range = geometry.set_range(parsed.index);
    let start = range.start;
    let set = &state.lines[range];

    if let Some(slot) = set
        .iter()
        .position(|l| l.valid && l.tag == Some(parsed.tag))
    {
        let line = start + slot;
        let stamp = state.tick();
        state.lines[line].last_used = stamp;
        log::debug!("{address:#010x}: {parsed}, hit on line {line}");
        return AccessStep {
            address,
            parsed,
            before,
            hit: true,
            highlighted_line: line,
            replacement: None,
            after: state.lines.clone(),
        };
    }

    let line = start + select_victim(set);
    let fetched_data = fetch_block(geometry, address);
    let stamp = state.tick();
    let evicted_line = std::mem::replace(
        &mut state.lines[line],
        CacheLine {
            tag: Some(parsed.tag),
            data: fetched_data.clone(),
            valid: true,
            dirty: false,
            last_used: stamp,
        },
    );
    log::debug!(
        "{address:#010x}: {parsed}, miss, filled line {line}{}",
        if evicted_line.valid { " by eviction" } else { "" }
    );
    AccessStep {
        address,
        parsed,
        before,
        hit: false,
        highlighted_line: line,
        replacement: Some(Replacement {
            replaced_line_index: line,
            evicted_line,
            fetched_data,
        }),
        after: state.lines.clone(),
    }
}

/// Slot to overwrite within a set: the first invalid line if any, else the
/// first line holding the smallest LRU stamp.
fn select_victim(set: &[CacheLine]) -> usize {
    if let Some(slot) = set.iter().position(|l| !l.valid) {
        return slot;
    }
    set.iter()
        .enumerate()
        .min_by_key(|(_, l)| l.last_used)
        .map_or(0, |(slot, _)| slot)
}

/// Placeholder contents of the block holding `address`: each word carries
/// the memory address it was loaded from.
fn fetch_block(geometry: &Geometry, address: u32) -> Vec<u32> {
    let base = geometry.block_base(address);
    (0..geometry.words_per_line() as u32)
        .map(|i| base.wrapping_add(i * WORD_BYTES))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geometry::{Associativity, CacheConfig};

    fn geometry(cache_size: u32, block_size: u32, associativity: Associativity) -> Geometry {
        Geometry::derive(&CacheConfig {
            cache_size,
            block_size,
            associativity,
        })
        .unwrap()
    }

    fn hits(sim: &Simulation) -> Vec<bool> {
        sim.steps.iter().map(|s| s.hit).collect()
    }

    #[test]
    fn test_reset_cache() {
        let g = geometry(64, 16, Associativity::DirectMapped);
        let c = reset_cache(&g);
        assert_eq!(c.lines().len(), 4);
        assert_eq!(c.clock(), 0);
        assert!(c
            .lines()
            .iter()
            .all(|l| !l.valid && l.tag.is_none() && l.last_used == 0 && l.data == [0; 4]));
    }

    #[test]
    fn test_direct_mapped_cold_fill_then_hit() {
        let g = geometry(64, 16, Associativity::DirectMapped);
        let sim = simulate(&[0, 16, 32, 48, 0], &reset_cache(&g), &g).unwrap();
        assert_eq!(hits(&sim), [false, false, false, false, true]);
        let lines: Vec<_> = sim.steps.iter().map(|s| s.highlighted_line).collect();
        assert_eq!(lines, [0, 1, 2, 3, 0]);
        assert!(sim.steps[..4]
            .iter()
            .all(|s| !s.replacement.as_ref().unwrap().is_eviction()));
        assert!(sim.steps[4].replacement.is_none());
    }

    #[test]
    fn test_repeated_address_hits() {
        let g = geometry(256, 16, Associativity::NWay(4));
        let sim = simulate(&[0x1234, 0x1234], &reset_cache(&g), &g).unwrap();
        assert_eq!(hits(&sim), [false, true]);
        assert_eq!(sim.steps[0].highlighted_line, sim.steps[1].highlighted_line);
    }

    #[test]
    fn test_two_way_evicts_least_recently_used() {
        // 4 lines, 2 sets: 0, 32 and 64 all map to set 0
        let g = geometry(64, 16, Associativity::NWay(2));
        let sim = simulate(&[0, 32, 0, 64], &reset_cache(&g), &g).unwrap();
        assert_eq!(hits(&sim), [false, false, true, false]);
        let r = sim.steps[3].replacement.as_ref().unwrap();
        assert_eq!(r.replaced_line_index, 1);
        assert_eq!(r.evicted_line.tag, Some(1));
        assert!(r.is_eviction());

        let sim = simulate(&[0, 32, 64], &reset_cache(&g), &g).unwrap();
        let r = sim.steps[2].replacement.as_ref().unwrap();
        assert_eq!(r.replaced_line_index, 0);
        assert_eq!(r.evicted_line.tag, Some(0));
    }

    #[test]
    fn test_invalid_line_wins_over_lru() {
        let g = geometry(64, 16, Associativity::FullyAssociative);
        let sim = simulate(&[0, 16, 0, 32], &reset_cache(&g), &g).unwrap();
        // line 1 holds the oldest stamp but line 2 is still empty
        assert_eq!(sim.steps[3].highlighted_line, 2);
    }

    #[test]
    fn test_batch_order_matters() {
        // a single line: 0 and 16 collide
        let g = geometry(16, 16, Associativity::DirectMapped);
        let sim = simulate(&[0, 16, 0], &reset_cache(&g), &g).unwrap();
        assert_eq!(hits(&sim), [false, false, false]);
        let sim = simulate(&[0, 0, 16], &reset_cache(&g), &g).unwrap();
        assert_eq!(hits(&sim), [false, true, false]);
    }

    #[test]
    fn test_snapshots_are_independent() {
        let g = geometry(32, 16, Associativity::DirectMapped);
        let sim = simulate(&[0, 32], &reset_cache(&g), &g).unwrap();
        let first = &sim.steps[0];
        assert!(!first.before[0].valid);
        assert_eq!(first.after[0].tag, Some(0));
        assert_eq!(sim.steps[1].before, first.after);
        assert_eq!(sim.steps[1].after[0].tag, Some(1));
        assert_eq!(sim.state.lines()[0].tag, Some(1));
        assert_eq!(first.after[0].tag, Some(0));
    }

    #[test]
    fn test_input_state_untouched_and_clock_threaded() {
        let g = geometry(64, 16, Associativity::DirectMapped);
        let cold = reset_cache(&g);
        let sim = simulate(&[0, 16, 0], &cold, &g).unwrap();
        assert_eq!(cold, reset_cache(&g));
        assert_eq!(sim.state.clock(), 3);
        assert_eq!(sim.state.lines()[0].last_used, 3);

        // counter keeps increasing across batches
        let next = simulate(&[16], &sim.state, &g).unwrap();
        assert_eq!(next.state.lines()[1].last_used, 4);
        assert!(next.steps[0].hit);
    }

    #[test]
    fn test_fetched_data_and_flags() {
        let g = geometry(64, 16, Associativity::DirectMapped);
        let sim = simulate(&[0x4a], &reset_cache(&g), &g).unwrap();
        let r = sim.steps[0].replacement.as_ref().unwrap();
        assert_eq!(r.fetched_data, [0x40, 0x44, 0x48, 0x4c]);
        let line = &sim.state.lines()[r.replaced_line_index];
        assert!(line.valid && !line.dirty);
        assert_eq!(line.data, r.fetched_data);
        assert_eq!(sim.steps[0].parsed.offset, 0xa);
    }

    #[test]
    fn test_geometry_mismatch() {
        let small = geometry(64, 16, Associativity::DirectMapped);
        let large = geometry(128, 16, Associativity::DirectMapped);
        assert_eq!(
            simulate(&[0], &reset_cache(&small), &large),
            Err(SimulationError::GeometryMismatch {
                expected: large,
                found: small
            })
        );
    }

    #[test]
    fn test_same_line_count_other_block_size() {
        let narrow = geometry(64, 16, Associativity::DirectMapped);
        let wide = geometry(128, 32, Associativity::DirectMapped);
        assert_eq!(narrow.num_lines, wide.num_lines);
        let e = simulate(&[0], &reset_cache(&narrow), &wide).unwrap_err();
        assert_eq!(
            e.to_string(),
            "cache was built for 4 lines of 16 bytes, not 4 lines of 32 bytes"
        );
        let sim = simulate(&[0], &reset_cache(&wide), &wide).unwrap();
        assert_eq!(sim.state.geometry(), &wide);
        assert_eq!(sim.state.lines()[0].data.len(), 8);
    }
}
