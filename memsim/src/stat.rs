use std::fmt;

use crate::{
    addressing::{Translation, TranslationOutcome},
    cache::AccessStep,
};

pub trait Stat {
    fn view(&self, max_width: usize) -> Box<dyn StatView + '_>;
}

pub trait StatView: fmt::Display {
    /// header of stat
    fn header(&self) -> &'static str;
    /// body width
    fn width(&self) -> usize;
}

pub trait AddStats {
    /// add stat to `buf`.
    fn add_stats(&self, buf: &mut Stats);
}

#[derive(Default)]
pub struct Stats {
    stats: Vec<Box<dyn Stat>>,
}

impl IntoIterator for Stats {
    type Item = Box<dyn Stat>;

    type IntoIter = <Vec<Box<dyn Stat>> as IntoIterator>::IntoIter;

    fn into_iter(self) -> Self::IntoIter {
        self.stats.into_iter()
    }
}

impl Stats {
    pub fn push(&mut self, stat: Box<dyn Stat>) {
        self.stats.push(stat)
    }
    pub fn is_empty(&self) -> bool {
        self.stats.is_empty()
    }
    pub fn view(&self, max_width: usize) -> StatAllView<'_> {
        StatAllView {
            views: self.stats.iter().map(|s| s.view(max_width)).collect(),
        }
    }
}

pub struct StatAllView<'s> {
    views: Vec<Box<dyn StatView + 's>>,
}

impl fmt::Display for StatAllView<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let width = self
            .views
            .iter()
            .map(|s| s.header().len().max(s.width()))
            .max()
            .unwrap_or(0);
        writeln!(f, "{:-^width$}", " statistics ")?;
        for sv in &self.views {
            writeln!(f, "{}:", sv.header())?;
            writeln!(f, "{}", sv)?;
        }
        write!(f, "{:-<width$}", "")
    }
}

fn ratio(part: usize, whole: usize) -> f64 {
    if whole == 0 {
        0.0
    } else {
        part as f64 * 100.0 / whole as f64
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheStat {
    pub accesses: usize,
    pub hits: usize,
    pub misses: usize,
    /// misses served by an invalid line
    pub cold_fills: usize,
    pub evictions: usize,
}

impl CacheStat {
    pub fn record(&mut self, step: &AccessStep) {
        self.accesses += 1;
        if step.hit {
            self.hits += 1;
        } else {
            self.misses += 1;
        }
        match &step.replacement {
            Some(r) if r.is_eviction() => self.evictions += 1,
            Some(_) => self.cold_fills += 1,
            None => (),
        }
    }
    /// in percent
    pub fn hit_rate(&self) -> f64 {
        ratio(self.hits, self.accesses)
    }
}

impl Stat for CacheStat {
    fn view(&self, _: usize) -> Box<dyn StatView + '_> {
        Box::new(self)
    }
}

impl StatView for &'_ CacheStat {
    fn header(&self) -> &'static str {
        "cache accesses"
    }
    fn width(&self) -> usize {
        30
    }
}

impl fmt::Display for &'_ CacheStat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "  accesses: {:>16}", self.accesses)?;
        let hits = format!("{} ({:.2}%)", self.hits, self.hit_rate());
        writeln!(f, "  hits: {hits:>20}")?;
        writeln!(f, "  misses: {:>18}", self.misses)?;
        writeln!(f, "    cold fills: {:>10}", self.cold_fills)?;
        write!(f, "    evictions: {:>11}", self.evictions)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TranslationStat {
    pub translations: usize,
    pub resolved: usize,
    pub page_hits: usize,
    pub page_faults: usize,
    pub out_of_range: usize,
    pub rejected: usize,
}

impl TranslationStat {
    pub fn record(&mut self, t: &Translation) {
        self.translations += 1;
        match t.outcome {
            TranslationOutcome::Resolved => self.resolved += 1,
            TranslationOutcome::PageHit { .. } => self.page_hits += 1,
            TranslationOutcome::PageFault { .. } => self.page_faults += 1,
            TranslationOutcome::PageOutOfRange { .. } => self.out_of_range += 1,
            TranslationOutcome::Rejected(_) => self.rejected += 1,
        }
    }
    /// share of paged lookups that faulted, in percent
    pub fn fault_rate(&self) -> f64 {
        ratio(
            self.page_faults + self.out_of_range,
            self.page_hits + self.page_faults + self.out_of_range,
        )
    }
}

impl Stat for TranslationStat {
    fn view(&self, _: usize) -> Box<dyn StatView + '_> {
        Box::new(self)
    }
}

impl StatView for &'_ TranslationStat {
    fn header(&self) -> &'static str {
        "address translations"
    }
    fn width(&self) -> usize {
        30
    }
}

impl fmt::Display for &'_ TranslationStat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "  translations: {:>12}", self.translations)?;
        writeln!(f, "  without paging: {:>10}", self.resolved)?;
        writeln!(f, "  page hits: {:>15}", self.page_hits)?;
        let faults = format!("{} ({:.2}%)", self.page_faults, self.fault_rate());
        writeln!(f, "  page faults: {faults:>13}")?;
        writeln!(f, "  out of range: {:>12}", self.out_of_range)?;
        write!(f, "  rejected: {:>16}", self.rejected)
    }
}
