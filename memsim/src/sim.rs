use rand::SeedableRng;
use rand_xorshift::XorShiftRng;

use crate::{
    addressing::{self, AddressingMode, Translation},
    cache::{self, AccessStep, CacheState, SimulationError},
    geometry::{CacheConfig, Geometry, GeometryError},
    io::{self, SkippedToken},
    page_table::{PageTable, PagingConfig, PagingConfigError},
};

#[cfg(feature = "stat")]
use crate::stat::{AddStats, CacheStat, Stats, TranslationStat};

/// A cache together with the configuration it was built from and the
/// trace of every access since the last reset.
pub struct CacheSimulator {
    config: CacheConfig,
    geometry: Geometry,
    state: CacheState,
    trace: Vec<AccessStep>,
    #[cfg(feature = "stat")]
    stat: CacheStat,
}

impl CacheSimulator {
    pub fn new(config: CacheConfig) -> Result<Self, GeometryError> {
        let geometry = Geometry::derive(&config)?;
        log::info!("cache geometry: {geometry}");
        Ok(Self {
            config,
            geometry,
            state: cache::reset_cache(&geometry),
            trace: Vec::new(),
            #[cfg(feature = "stat")]
            stat: CacheStat::default(),
        })
    }

    /// Rebuilds the geometry and starts over from a cold cache. On error
    /// the current configuration stays in effect.
    pub fn reconfigure(&mut self, config: CacheConfig) -> Result<(), GeometryError> {
        match Self::new(config) {
            Ok(s) => {
                *self = s;
                Ok(())
            }
            Err(e) => {
                log::warn!("rejected cache config {config:?}: {e}");
                Err(e)
            }
        }
    }

    pub fn reset(&mut self) {
        self.state = cache::reset_cache(&self.geometry);
        self.trace.clear();
        #[cfg(feature = "stat")]
        {
            self.stat = CacheStat::default();
        }
    }

    /// Simulates `addresses` and commits the resulting cache; returns the
    /// steps added to the trace.
    pub fn run(&mut self, addresses: &[u32]) -> Result<&[AccessStep], SimulationError> {
        let sim = cache::simulate(addresses, &self.state, &self.geometry)?;
        let first = self.trace.len();
        #[cfg(feature = "stat")]
        sim.steps.iter().for_each(|s| self.stat.record(s));
        self.state = sim.state;
        self.trace.extend(sim.steps);
        Ok(&self.trace[first..])
    }

    /// Parses and simulates a batch; malformed tokens are skipped and
    /// returned.
    pub fn run_str(&mut self, input: &str) -> Result<Vec<SkippedToken>, SimulationError> {
        let batch = io::parse_address_batch(input);
        self.run(&batch.addresses)?;
        Ok(batch.skipped)
    }

    pub fn config(&self) -> &CacheConfig {
        &self.config
    }
    pub fn geometry(&self) -> &Geometry {
        &self.geometry
    }
    pub fn state(&self) -> &CacheState {
        &self.state
    }
    pub fn trace(&self) -> &[AccessStep] {
        &self.trace
    }
}

#[cfg(feature = "stat")]
impl AddStats for CacheSimulator {
    fn add_stats(&self, buf: &mut Stats) {
        buf.push(Box::new(self.stat));
    }
}

/// An addressing mode plus the page table virtual-memory mode reads.
pub struct AddressingSimulator {
    mode: AddressingMode,
    page_table: PageTable,
    /// paging parameters `page_table` was built for
    table_shape: Option<PagingConfig>,
    rng: XorShiftRng,
    #[cfg(feature = "stat")]
    stat: TranslationStat,
}

impl AddressingSimulator {
    /// Page tables generated by this session are reproducible from `seed`.
    pub fn new(mode: AddressingMode, seed: u64) -> Result<Self, PagingConfigError> {
        let mut s = Self {
            mode: AddressingMode::default(),
            page_table: PageTable::default(),
            table_shape: None,
            rng: XorShiftRng::seed_from_u64(seed),
            #[cfg(feature = "stat")]
            stat: TranslationStat::default(),
        };
        s.set_mode(mode)?;
        Ok(s)
    }

    /// Switches mode; a new page table is generated whenever the paging
    /// parameters differ from those of the current table. On error the
    /// previous mode and table stay in effect.
    pub fn set_mode(&mut self, mode: AddressingMode) -> Result<(), PagingConfigError> {
        if let Some(paging) = mode.paging() {
            if self.table_shape != Some(*paging) {
                self.page_table = PageTable::generate(paging, &mut self.rng).map_err(|e| {
                    log::warn!("rejected paging config {paging:?}: {e}");
                    e
                })?;
                self.table_shape = Some(*paging);
            }
        }
        self.mode = mode;
        Ok(())
    }

    /// Installs an explicit page table for the current paging parameters.
    /// Outside virtual-memory mode the table is ignored, since the next
    /// switch to paging generates one for its own parameters.
    pub fn set_page_table(&mut self, page_table: PageTable) -> Result<(), PagingConfigError> {
        let Some(paging) = self.mode.paging().copied() else {
            log::warn!("ignored page table: {} mode does not page", self.mode.kind());
            return Ok(());
        };
        page_table.check(&paging).map_err(|e| {
            log::warn!("rejected page table: {e}");
            e
        })?;
        log::info!("installed page table with {} entries", page_table.len());
        self.page_table = page_table;
        self.table_shape = Some(paging);
        Ok(())
    }

    pub fn translate(&mut self, input: u32) -> Translation {
        let t = addressing::translate(&self.mode, input, &self.page_table);
        log::debug!("{} {input}: {}", self.mode.kind(), t.outcome);
        #[cfg(feature = "stat")]
        self.stat.record(&t);
        t
    }

    pub fn mode(&self) -> &AddressingMode {
        &self.mode
    }
    pub fn page_table(&self) -> &PageTable {
        &self.page_table
    }
}

#[cfg(feature = "stat")]
impl AddStats for AddressingSimulator {
    fn add_stats(&self, buf: &mut Stats) {
        buf.push(Box::new(self.stat));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        addressing::TranslationOutcome, geometry::Associativity, page_table::PageTableEntry,
    };

    fn two_way() -> CacheConfig {
        CacheConfig {
            cache_size: 64,
            block_size: 16,
            associativity: Associativity::NWay(2),
        }
    }

    #[test]
    fn test_batches_share_state() {
        let mut sim = CacheSimulator::new(two_way()).unwrap();
        let steps = sim.run(&[0, 32]).unwrap();
        assert_eq!(steps.len(), 2);
        let steps = sim.run(&[0, 64]).unwrap();
        assert_eq!(steps.len(), 2);
        assert!(steps[0].hit);
        assert_eq!(
            steps[1].replacement.as_ref().unwrap().evicted_line.tag,
            Some(1)
        );
        assert_eq!(sim.trace().len(), 4);
        assert_eq!(sim.state().clock(), 4);
    }

    #[test]
    fn test_run_str_reports_skipped() {
        let mut sim = CacheSimulator::new(two_way()).unwrap();
        let skipped = sim.run_str("0, x, 0").unwrap();
        assert_eq!(skipped.len(), 1);
        assert_eq!(sim.trace().len(), 2);
        assert!(sim.trace()[1].hit);
    }

    #[test]
    fn test_reconfigure_resets() {
        let mut sim = CacheSimulator::new(two_way()).unwrap();
        sim.run(&[0, 16]).unwrap();
        sim.reconfigure(CacheConfig {
            associativity: Associativity::FullyAssociative,
            ..two_way()
        })
        .unwrap();
        assert!(sim.trace().is_empty());
        assert_eq!(sim.state().valid_lines(), 0);
        assert_eq!(sim.geometry().num_sets, 1);
    }

    #[test]
    fn test_bad_reconfigure_keeps_state() {
        let mut sim = CacheSimulator::new(two_way()).unwrap();
        sim.run(&[0]).unwrap();
        let e = sim.reconfigure(CacheConfig {
            cache_size: 48,
            ..two_way()
        });
        assert!(e.is_err());
        assert_eq!(sim.config(), &two_way());
        assert_eq!(sim.trace().len(), 1);
    }

    #[test]
    fn test_reset() {
        let mut sim = CacheSimulator::new(two_way()).unwrap();
        sim.run(&[0]).unwrap();
        sim.reset();
        assert!(sim.trace().is_empty());
        assert_eq!(sim.state().clock(), 0);
        assert!(!sim.run(&[0]).unwrap()[0].hit);
    }

    #[test]
    fn test_page_table_regenerated_only_on_shape_change() {
        let paging = PagingConfig::default();
        let mut sim = AddressingSimulator::new(AddressingMode::VirtualMemory(paging), 1).unwrap();
        assert_eq!(sim.page_table().len(), 16);
        let mut entries = vec![PageTableEntry::absent(); 16];
        entries[1] = PageTableEntry::present(7);
        sim.set_page_table(PageTable::from_entries(entries)).unwrap();

        // leaving and re-entering paging with the same shape keeps the table
        sim.set_mode(AddressingMode::Direct).unwrap();
        sim.set_mode(AddressingMode::VirtualMemory(paging)).unwrap();
        assert_eq!(sim.translate(5000).effective_address, Some(29608));

        sim.set_mode(AddressingMode::VirtualMemory(PagingConfig {
            page_size: 1024,
            ..paging
        }))
        .unwrap();
        assert_eq!(sim.page_table().len(), 64);
    }

    #[test]
    fn test_page_table_must_fit_config() {
        let mode = AddressingMode::VirtualMemory(PagingConfig::default());
        let mut sim = AddressingSimulator::new(mode, 5).unwrap();
        let generated = sim.page_table().clone();
        let e = sim.set_page_table(PageTable::from_entries(vec![PageTableEntry::present(3); 2]));
        assert_eq!(
            e,
            Err(PagingConfigError::TableLengthMismatch {
                expected: 16,
                found: 2
            })
        );
        // the generated table stays, so page 3 is still inside it
        assert_eq!(sim.page_table(), &generated);
        assert!(!matches!(
            sim.translate(3 * 4096).outcome,
            TranslationOutcome::PageOutOfRange { .. }
        ));
    }

    #[test]
    fn test_page_table_ignored_without_paging() {
        let mut sim = AddressingSimulator::new(AddressingMode::Direct, 5).unwrap();
        sim.set_page_table(PageTable::from_entries(vec![PageTableEntry::present(3); 2]))
            .unwrap();
        assert!(sim.page_table().is_empty());
    }

    #[test]
    fn test_invalid_paging_rejected() {
        let mut sim = AddressingSimulator::new(AddressingMode::Direct, 1).unwrap();
        let e = sim.set_mode(AddressingMode::VirtualMemory(PagingConfig {
            page_size: 3000,
            ..Default::default()
        }));
        assert_eq!(e, Err(PagingConfigError::PageSizeNotPowerOfTwo(3000)));
        assert_eq!(sim.mode(), &AddressingMode::Direct);
        assert!(sim.page_table().is_empty());
    }

    #[test]
    fn test_same_seed_same_tables() {
        let mode = AddressingMode::VirtualMemory(PagingConfig::default());
        let a = AddressingSimulator::new(mode, 99).unwrap();
        let b = AddressingSimulator::new(mode, 99).unwrap();
        assert_eq!(a.page_table(), b.page_table());
    }
}
