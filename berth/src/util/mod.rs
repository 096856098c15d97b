/// Auto-detect terminal size like Docker does
/// Returns (rows, cols) tuple
pub fn get_terminal_size() -> (u16, u16) {
    match term_size::dimensions() {
        Some((cols, rows)) => (clamp_cells(rows), clamp_cells(cols)),
        // Standard terminal size (80x24)
        None => (24, 80),
    }
}

fn clamp_cells(cells: usize) -> u16 {
    u16::try_from(cells).unwrap_or(u16::MAX)
}
