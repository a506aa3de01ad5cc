//! Component P — the UI renderer (spec §2 "thin renderer"): paints each
//! pane's `layout::geometry_for` rectangle from the cached `TerminalState`
//! the shim client hands back, draws borders/titles and positions the
//! cursor.
//!
//! Grounded on the teacher's `rendering.rs` (`render_window`/`render_node`)
//! for the border/title/cursor drawing shape, regeneralized from walking a
//! `Node`/`Pane` tree and locking a `vt100::Parser` onto painting a
//! `ratatui::buffer::Buffer` cell-by-cell from a `cell::TerminalState`
//! snapshot.

use ratatui::prelude::*;
use ratatui::widgets::{Block, Borders};

use crate::cell::{Cell, CellFlags, TerminalState};
use crate::config::ThemeConfig;
use crate::layout::{PaneId, Rectangle};

/// Everything the renderer needs about one pane; assembled by the app
/// orchestrator from `LayoutState` + `ShimClient` state so this module never
/// touches either directly.
pub struct PaneView<'a> {
    pub pane_id: PaneId,
    pub rectangle: Rectangle,
    pub title: String,
    pub focused: bool,
    pub state: Option<&'a TerminalState>,
}

/// Draws every visible pane (zero-area rectangles, e.g. hidden stack panes
/// in Stacked mode, are skipped) plus a one-line status bar along the
/// bottom of `full_area`.
pub fn render(f: &mut Frame, full_area: Rect, panes: &[PaneView], theme: &ThemeConfig, status: &str) {
    for pane in panes {
        if pane.rectangle.width < 3 || pane.rectangle.height < 3 {
            continue;
        }
        render_pane(f, pane, theme);
    }
    render_status_bar(f, full_area, theme, status);
}

fn render_pane(f: &mut Frame, pane: &PaneView, theme: &ThemeConfig) {
    let area: Rect = pane.rectangle.into();
    let border_color = if pane.focused { color(&theme.pane_active_border_color) } else { color(&theme.pane_border_color) };
    let block = Block::default()
        .borders(Borders::ALL)
        .border_style(Style::default().fg(border_color))
        .title(pane.title.clone());
    let inner = block.inner(area);
    f.render_widget(block, area);

    let Some(state) = pane.state else { return };
    paint_terminal(f.buffer_mut(), inner, state);
    if pane.focused && state.cursor.visible {
        let cx = inner.x + (state.cursor.x as u16).min(inner.width.saturating_sub(1));
        let cy = inner.y + (state.cursor.y as u16).min(inner.height.saturating_sub(1));
        f.set_cursor(cx, cy);
    }
}

fn paint_terminal(buf: &mut Buffer, area: Rect, state: &TerminalState) {
    let rows = area.height.min(state.rows as u16);
    let cols = area.width.min(state.cols as u16);
    for row in 0..rows {
        let Some(source_row) = state.cells.get(row as usize) else { continue };
        for col in 0..cols {
            let Some(cell) = source_row.get(col as usize) else { continue };
            if cell.width == 0 {
                continue;
            }
            let x = area.x + col;
            let y = area.y + row;
            buf.get_mut(x, y).set_char(cell.ch()).set_style(cell_style(cell));
        }
    }
}

fn cell_style(cell: &Cell) -> Style {
    let mut style = Style::default().fg(rgb(cell.fg)).bg(rgb(cell.bg));
    if cell.flags.contains(CellFlags::BOLD) {
        style = style.add_modifier(Modifier::BOLD);
    }
    if cell.flags.contains(CellFlags::DIM) {
        style = style.add_modifier(Modifier::DIM);
    }
    if cell.flags.contains(CellFlags::ITALIC) {
        style = style.add_modifier(Modifier::ITALIC);
    }
    if cell.flags.contains(CellFlags::UNDERLINE) {
        style = style.add_modifier(Modifier::UNDERLINED);
    }
    if cell.flags.contains(CellFlags::BLINK) {
        style = style.add_modifier(Modifier::SLOW_BLINK);
    }
    if cell.flags.contains(CellFlags::INVERSE) {
        style = style.add_modifier(Modifier::REVERSED);
    }
    if cell.flags.contains(CellFlags::STRIKE) {
        style = style.add_modifier(Modifier::CROSSED_OUT);
    }
    style
}

fn rgb(c: crate::cell::Rgb) -> Color {
    Color::Rgb(c.r, c.g, c.b)
}

fn color(hex: &str) -> Color {
    let hex = hex.trim_start_matches('#');
    if hex.len() == 6 {
        if let (Ok(r), Ok(g), Ok(b)) =
            (u8::from_str_radix(&hex[0..2], 16), u8::from_str_radix(&hex[2..4], 16), u8::from_str_radix(&hex[4..6], 16))
        {
            return Color::Rgb(r, g, b);
        }
    }
    Color::Reset
}

fn render_status_bar(f: &mut Frame, full_area: Rect, theme: &ThemeConfig, status: &str) {
    if full_area.height == 0 {
        return;
    }
    let bar_area = Rect { x: full_area.x, y: full_area.y + full_area.height - 1, width: full_area.width, height: 1 };
    let style = Style::default().fg(color(&theme.status_bar_fg)).bg(color(&theme.status_bar_bg));
    let buf = f.buffer_mut();
    buf.set_style(bar_area, style);
    buf.set_stringn(bar_area.x, bar_area.y, status, bar_area.width as usize, style);
}
