use std::io::{stdin, stdout, Write};

use anyhow::Result;
use bitmask_enum::bitmask;
use memsim::{
    cache::CacheLine,
    geometry::{Associativity, CacheConfig},
    io::parse_address,
    sim::CacheSimulator,
};

#[cfg(feature = "stat")]
use memsim::stat::AddStats;

use crate::view;

peg::parser!(grammar command() for str {
    rule usize() -> usize
        = n:$(quiet!{['0'..='9']+}) {? n.parse().map_err(|_| "usize") }
        / expected!("usize")
    rule number() -> u32
        = n:$(quiet!{(("0" ['x' | 'X'] ['0'..='9' | 'a'..='f' | 'A'..='F']+) / ['0'..='9']+)})
        {? parse_address(n).ok_or("32-bit unsigned integer") }
        / expected!("number")
    rule assoc() -> Associativity
        = a:$(quiet!{['a'..='z' | 'A'..='Z' | '0'..='9' | '-']+})
        {? a.parse().map_err(|_| "direct, full or a number of ways") }
    rule panel() -> Panels
        = "cache" { Panels::Cache }
        / ("fields" / "field") { Panels::Fields }
        / "all" { Panels::all() }
    rule show_kind() -> ShowKind
        = "cache" { ShowKind::Cache }
        / "step" { ShowKind::Step }
        / ("geometry" / "geo") { ShowKind::Geometry }
        / "stat" { ShowKind::Stat }
        / "trace" { ShowKind::Trace }
    rule set_kind() -> SetKind
        = "size" __ n:number() { SetKind::CacheSize(n) }
        / "block" __ n:number() { SetKind::BlockSize(n) }
        / "assoc" __ a:assoc() { SetKind::Associativity(a) }
    rule move_command() -> Move
        = "run" { Move::End }
        / "step" n:(__ n:usize() { n })? { Move::Forward(n.unwrap_or(1)) }
        / "back" n:(__ n:usize() { n })? { Move::Backward(n.unwrap_or(1)) }
        / "goto" __ n:usize() { Move::To(n) }
    pub(crate) rule parse_command() -> Command
        = _ ("access" / "a") __ list:$([_]+) { Command::Access(list.to_owned()) }
        / _ m:move_command() _ { Command::Move(m) }
        / _ "reset" _ { Command::Reset }
        / _ "set" __ s:set_kind() _ { Command::Set(s) }
        / _ "show" __ s:show_kind() _ { Command::Show(s) }
        / _ "watch" __ p:panel() _ { Command::Watch(true, p) }
        / _ "unwatch" __ p:panel() _ { Command::Watch(false, p) }
        / _ ("exit" / "quit") _ { Command::Exit }
        / _ { Command::Move(Move::Forward(1)) }
        / expected!("command")

    rule ws() = quiet!{[' ' | '\t' | '\r' | '\n']}
        / expected!("whitespace")
    rule _() = ws()*
    rule __() = ws()+
});

pub(crate) enum Command {
    Access(String),
    Move(Move),
    Reset,
    Set(SetKind),
    Show(ShowKind),
    Watch(bool, Panels),
    Exit,
}

pub(crate) enum Move {
    End,
    Forward(usize),
    Backward(usize),
    To(usize),
}

pub(crate) enum SetKind {
    CacheSize(u32),
    BlockSize(u32),
    Associativity(Associativity),
}

pub(crate) enum ShowKind {
    Cache,
    Step,
    Geometry,
    Stat,
    Trace,
}

/// panels printed after every cursor move
#[bitmask(u8)]
pub(crate) enum Panels {
    Cache,
    Fields,
}

/// Cache contents once the first `cursor` steps of the trace are replayed.
fn lines_at(sim: &CacheSimulator, cursor: usize) -> &[CacheLine] {
    match cursor.checked_sub(1).and_then(|i| sim.trace().get(i)) {
        Some(step) => &step.after,
        None => match sim.trace().first() {
            Some(step) => &step.before,
            None => sim.state().lines(),
        },
    }
}

fn show(sim: &CacheSimulator, cursor: usize, kind: ShowKind) {
    let current = cursor.checked_sub(1).and_then(|i| sim.trace().get(i));
    match kind {
        ShowKind::Cache => {
            let highlight = current.map(|s| s.highlighted_line);
            print!(
                "{}",
                view::render_lines(lines_at(sim, cursor), sim.geometry(), highlight)
            );
        }
        ShowKind::Step => match current {
            Some(step) => {
                println!("#{cursor}: {step}");
                if let Some(r) = &step.replacement {
                    println!(
                        "\tline {} <- {}",
                        r.replaced_line_index,
                        r.fetched_data
                            .iter()
                            .map(|w| format!("{w:#x}"))
                            .collect::<Vec<_>>()
                            .join(" ")
                    );
                }
            }
            None => println!("no access replayed yet."),
        },
        ShowKind::Geometry => println!("{}", sim.geometry()),
        #[cfg(feature = "stat")]
        ShowKind::Stat => {
            let mut stats = Default::default();
            sim.add_stats(&mut stats);
            let width = view::get_terminal_width().unwrap_or(60) as usize;
            println!("{}", stats.view(width));
        }
        #[cfg(not(feature = "stat"))]
        ShowKind::Stat => {
            println!("try compile with `--features stat`");
        }
        ShowKind::Trace => {
            if sim.trace().is_empty() {
                println!("trace is empty.");
            }
            for (i, step) in sim.trace().iter().enumerate() {
                let mark = if i + 1 == cursor { '>' } else { ' ' };
                println!("{mark}#{:<4} {step}", i + 1);
            }
        }
    }
}

fn show_watched(sim: &CacheSimulator, cursor: usize, watching: Panels) {
    if watching.contains(Panels::Fields) {
        match cursor.checked_sub(1).and_then(|i| sim.trace().get(i)) {
            Some(step) => println!("{}", step.parsed),
            None => println!("{}", sim.geometry()),
        }
    }
    if watching.contains(Panels::Cache) {
        show(sim, cursor, ShowKind::Cache);
    }
}

pub fn execute_interactive(sim: &mut CacheSimulator) -> Result<()> {
    let mut cursor = 0;
    let mut watching = Panels::Cache;
    println!("entering interactive.");
    println!(
        "{} accesses recorded; press enter to replay one step.",
        sim.trace().len()
    );
    'interactive: loop {
        // prompt string
        print!("{}/{} > ", cursor, sim.trace().len());
        stdout().flush()?;
        let mut str = String::new();
        if stdin().read_line(&mut str)? == 0 {
            break 'interactive;
        }
        let parsed = match command::parse_command(&str) {
            Ok(p) => p,
            Err(e) => {
                println!("parse error: expected {}", e.expected);
                continue;
            }
        };
        match parsed {
            Command::Access(list) => {
                let skipped = sim.run_str(&list)?;
                for s in skipped {
                    println!("skipped {s}");
                }
                cursor = sim.trace().len();
                show(sim, cursor, ShowKind::Step);
                show_watched(sim, cursor, watching);
            }
            Command::Move(m) => {
                let len = sim.trace().len();
                let forward = matches!(m, Move::Forward(_) | Move::End);
                let next = match m {
                    Move::End => len,
                    Move::Forward(n) => cursor.saturating_add(n).min(len),
                    Move::Backward(n) => cursor.saturating_sub(n),
                    Move::To(n) => n.min(len),
                };
                if next == cursor && forward {
                    println!("end of trace.");
                    continue;
                }
                cursor = next;
                show(sim, cursor, ShowKind::Step);
                show_watched(sim, cursor, watching);
            }
            Command::Reset => {
                sim.reset();
                cursor = 0;
                println!("cache reset.");
            }
            Command::Set(s) => {
                let config = *sim.config();
                let config = match s {
                    SetKind::CacheSize(cache_size) => CacheConfig {
                        cache_size,
                        ..config
                    },
                    SetKind::BlockSize(block_size) => CacheConfig {
                        block_size,
                        ..config
                    },
                    SetKind::Associativity(associativity) => CacheConfig {
                        associativity,
                        ..config
                    },
                };
                match sim.reconfigure(config) {
                    Ok(()) => {
                        cursor = 0;
                        println!("{}", sim.geometry());
                    }
                    Err(e) => println!("{e}"),
                }
            }
            Command::Show(k) => show(sim, cursor, k),
            Command::Watch(add, p) => {
                if add {
                    watching |= p;
                } else {
                    watching &= !p;
                }
                if watching.is_none() {
                    println!("nothing to watch.");
                } else {
                    show_watched(sim, cursor, watching);
                }
            }
            Command::Exit => break 'interactive,
        }
    }
    println!("exiting interactive.");
    Ok(())
}
