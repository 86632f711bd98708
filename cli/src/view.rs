use memsim::{cache::CacheLine, geometry::Geometry};
use terminal_size::terminal_size;

pub(crate) fn get_terminal_width() -> Option<u16> {
    terminal_size().map(|(w, _)| w.0.saturating_sub(4))
}

/// Lays out `lines` in as many columns as the terminal allows; the
/// highlighted line is marked with `*`.
pub(crate) fn render_lines(
    lines: &[CacheLine],
    geometry: &Geometry,
    highlight: Option<usize>,
) -> String {
    let cells: Vec<String> = lines
        .iter()
        .enumerate()
        .map(|(i, l)| {
            let mark = if highlight == Some(i) { '*' } else { ' ' };
            let set = i / geometry.lines_per_set as usize;
            format!("{mark}L{i:<3} S{set:<3} {l}")
        })
        .collect();
    let cell_width = cells.iter().map(|c| c.len()).max().unwrap_or(0) + 2;
    let max_width = get_terminal_width().unwrap_or(120) as usize;
    let columns = (max_width / cell_width.max(1)).max(1);
    let mut out = String::new();
    for row in cells.chunks(columns) {
        for cell in row {
            out.push_str(&format!("{cell:<cell_width$}"));
        }
        out.truncate(out.trim_end().len());
        out.push('\n');
    }
    out
}
