mod interactive;
mod view;

use std::{
    path::PathBuf,
    time::{SystemTime, UNIX_EPOCH},
};

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use memsim::{
    addressing::{self, AddressingMode, ModeKind, DEFAULT_PROGRAM_COUNTER},
    config::SimConfig,
    geometry::{Associativity, CacheConfig},
    io::parse_address,
    page_table::{PageTable, PagingConfig, PagingConfigError},
    sim::{AddressingSimulator, CacheSimulator},
};

#[cfg(feature = "stat")]
use memsim::stat::AddStats;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// simulate a sequence of cache accesses
    Cache(CacheArgs),
    /// compute an effective address under an addressing mode
    Translate(TranslateArgs),
}

#[derive(Args, Debug)]
struct CommonArgs {
    /// File path to JSON config
    #[arg(short, long)]
    config: Option<PathBuf>,
    /// Print results as JSON
    #[arg(long)]
    json: bool,
    /// Verbose output
    #[arg(short, long)]
    verbose: bool,
}

#[derive(Args, Debug)]
struct CacheArgs {
    #[command(flatten)]
    delegate: CommonArgs,
    /// Total cache size in bytes
    #[arg(long)]
    cache_size: Option<u32>,
    /// Block size in bytes
    #[arg(long)]
    block_size: Option<u32>,
    /// `direct`, `full` or a number of ways
    #[arg(long)]
    assoc: Option<Associativity>,
    /// Addresses to access, separated by commas or whitespace
    #[arg(short, long)]
    addresses: Option<String>,
    /// Enable interactive mode
    #[arg(long)]
    interactive: bool,
}

#[derive(Args, Debug)]
struct TranslateArgs {
    #[command(flatten)]
    delegate: CommonArgs,
    /// Addressing mode
    #[arg(short, long)]
    mode: Option<ModeKind>,
    /// Address field, operand or logical address
    #[arg(short, long, value_parser = parse_u32)]
    input: u32,
    /// Base register (base-indexed)
    #[arg(long, value_parser = parse_u32)]
    base: Option<u32>,
    /// Index register (base-indexed)
    #[arg(long, value_parser = parse_u32)]
    index: Option<u32>,
    /// Segment register (segmented-offset)
    #[arg(long, value_parser = parse_u32)]
    segment: Option<u32>,
    /// Program counter (relative)
    #[arg(long, value_parser = parse_u32)]
    pc: Option<u32>,
    /// Logical address width in bits (virtual-memory)
    #[arg(long)]
    logical_bits: Option<u32>,
    /// Physical address width in bits (virtual-memory)
    #[arg(long)]
    physical_bits: Option<u32>,
    /// Page size in bytes (virtual-memory)
    #[arg(long, value_parser = parse_u32)]
    page_size: Option<u32>,
    /// Seed of the generated page table
    #[arg(long)]
    seed: Option<u64>,
    /// Print the page table
    #[arg(long)]
    show_page_table: bool,
}

fn parse_u32(s: &str) -> Result<u32, String> {
    parse_address(s).ok_or_else(|| format!("`{s}` is not a 32-bit unsigned integer"))
}

fn init_logger(verbose: bool) {
    if verbose {
        env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    } else {
        env_logger::init();
    }
}

fn read_config(path: Option<PathBuf>) -> Result<SimConfig> {
    Ok(match path {
        Some(p) => SimConfig::load_path(&p)
            .with_context(|| format!("failed to load config {}", p.display()))?,
        None => Default::default(),
    })
}

fn main() -> anyhow::Result<()> {
    let args = Cli::parse();
    match args.command {
        Command::Cache(args) => {
            init_logger(args.delegate.verbose);
            run_cache(args)
        }
        Command::Translate(args) => {
            init_logger(args.delegate.verbose);
            run_translate(args)
        }
    }
}

fn run_cache(
    CacheArgs {
        delegate: CommonArgs {
            config,
            json,
            verbose: _,
        },
        cache_size,
        block_size,
        assoc,
        addresses,
        interactive,
    }: CacheArgs,
) -> Result<()> {
    let file = read_config(config)?;
    let base = file.cache.unwrap_or_default();
    let cache_config = CacheConfig {
        cache_size: cache_size.unwrap_or(base.cache_size),
        block_size: block_size.unwrap_or(base.block_size),
        associativity: assoc.unwrap_or(base.associativity),
    };
    let mut sim = CacheSimulator::new(cache_config).context("invalid cache configuration")?;
    let addresses = addresses.or(file.addresses).unwrap_or_default();
    let skipped = sim.run_str(&addresses)?;
    for s in &skipped {
        eprintln!("skipped {s}: not a 32-bit unsigned integer");
    }
    if interactive {
        return interactive::execute_interactive(&mut sim);
    }
    if json {
        let out = serde_json::json!({
            "config": sim.config(),
            "geometry": sim.geometry(),
            "steps": sim.trace(),
            "final_state": sim.state(),
            "skipped": skipped,
        });
        println!("{}", serde_json::to_string_pretty(&out)?);
        return Ok(());
    }
    println!("{}", sim.geometry());
    println!();
    for step in sim.trace() {
        println!("{step}");
    }
    println!();
    print!(
        "{}",
        view::render_lines(
            sim.state().lines(),
            sim.geometry(),
            sim.trace().last().map(|s| s.highlighted_line)
        )
    );
    output_stat(&sim);
    Ok(())
}

/// Starts from the file's mode when its kind matches, otherwise from the
/// defaults of `kind`, then applies the register flags that mode reads.
fn build_mode(kind: Option<ModeKind>, file: Option<AddressingMode>, args: &TranslateArgs) -> AddressingMode {
    let kind = kind.or(file.map(|m| m.kind())).unwrap_or(ModeKind::Direct);
    let mut mode = match file {
        Some(m) if m.kind() == kind => m,
        _ => match kind {
            ModeKind::Direct => AddressingMode::Direct,
            ModeKind::Immediate => AddressingMode::Immediate,
            ModeKind::Register => AddressingMode::Register,
            ModeKind::RegisterIndirect => AddressingMode::RegisterIndirect,
            ModeKind::Relative => AddressingMode::Relative {
                program_counter: DEFAULT_PROGRAM_COUNTER,
            },
            ModeKind::BaseIndexed => AddressingMode::BaseIndexed {
                base_address: 0,
                index_register: 0,
            },
            ModeKind::SegmentedOffset => AddressingMode::SegmentedOffset {
                segment_register: 0,
            },
            ModeKind::VirtualMemory => AddressingMode::VirtualMemory(PagingConfig::default()),
        },
    };
    match &mut mode {
        AddressingMode::Relative { program_counter } => {
            *program_counter = args.pc.unwrap_or(*program_counter);
        }
        AddressingMode::BaseIndexed {
            base_address,
            index_register,
        } => {
            *base_address = args.base.unwrap_or(*base_address);
            *index_register = args.index.unwrap_or(*index_register);
        }
        AddressingMode::SegmentedOffset { segment_register } => {
            *segment_register = args.segment.unwrap_or(*segment_register);
        }
        AddressingMode::VirtualMemory(p) => {
            p.logical_address_bits = args.logical_bits.unwrap_or(p.logical_address_bits);
            p.physical_address_bits = args.physical_bits.unwrap_or(p.physical_address_bits);
            p.page_size = args.page_size.unwrap_or(p.page_size);
        }
        _ => (),
    }
    mode
}

fn run_translate(args: TranslateArgs) -> Result<()> {
    let file = read_config(args.delegate.config.clone())?;
    let mode = build_mode(args.mode, file.addressing, &args);
    let seed = args.seed.or(file.seed).unwrap_or_else(|| {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_nanos() as u64)
            .unwrap_or_default()
    });
    log::info!("page table seed: {seed}");
    let (t, sim) = match AddressingSimulator::new(mode, seed) {
        Ok(mut sim) => {
            if let Some(table) = file.page_table {
                sim.set_page_table(table)
                    .context("page table from the config file does not fit the paging config")?;
            }
            (sim.translate(args.input), Some(sim))
        }
        // the translation trace explains this rejection
        Err(e @ PagingConfigError::PageSizeNotPowerOfTwo(_)) => {
            log::warn!("{e}");
            let t = addressing::translate(&mode, args.input, &PageTable::default());
            (t, None)
        }
        Err(e) => return Err(e).context("invalid paging configuration"),
    };
    let page_table = sim.as_ref().map(|s| s.page_table());
    if args.delegate.json {
        let out = serde_json::json!({
            "mode": mode,
            "input": args.input,
            "translation": t,
            "page_table": if args.show_page_table { page_table } else { None },
        });
        println!("{}", serde_json::to_string_pretty(&out)?);
        return Ok(());
    }
    for line in &t.trace {
        println!("{line}");
    }
    println!();
    match t.effective_address {
        Some(ea) => println!("effective address: {ea} ({ea:#x})"),
        None => println!("effective address: undefined"),
    }
    if mode.paging().is_some() {
        println!("page fault: {}", if t.page_fault { "yes" } else { "no" });
        if let Some(p) = t.highlighted_page_entry {
            println!("page table entry: {p}");
        }
    }
    if let (true, Some(table)) = (args.show_page_table, page_table) {
        println!();
        for (i, e) in table.entries().iter().enumerate() {
            let mark = if t.highlighted_page_entry == Some(i as u32) { '*' } else { ' ' };
            match e.frame() {
                Some(f) => println!("{mark}page {i:>5}: frame {f}"),
                None => println!("{mark}page {i:>5}: not resident"),
            }
        }
    }
    if let Some(sim) = &sim {
        output_stat(sim);
    }
    Ok(())
}

#[cfg(not(feature = "stat"))]
fn output_stat<S>(_: &S) {}

#[cfg(feature = "stat")]
fn output_stat(sim: &impl AddStats) {
    let mut stats = Default::default();
    sim.add_stats(&mut stats);
    let max_width = view::get_terminal_width().unwrap_or(120) as usize;
    log::info!("statistics:\n{}", stats.view(max_width));
}
