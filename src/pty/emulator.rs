//! Adapts `vt100::Parser` to the small `Emulator` trait the PTY host programs
//! against (spec §6 "VT emulator" collaborator). Keeping the trait narrow
//! means a different VT library could stand in without touching the host.

use crate::cell::{Cell, CellFlags, Cursor, ModeFlags, Rgb, TerminalState};

/// Title/bell/mode events the emulator surfaces as a side effect of
/// processing bytes (spec §4.D title handling).
#[derive(Debug, Clone, Default)]
pub struct EmulatorEvents {
    pub title: Option<String>,
    pub bell: bool,
    pub kitty_graphics: Vec<Vec<u8>>,
}

pub trait Emulator: Send {
    fn write(&mut self, bytes: &[u8]) -> EmulatorEvents;
    fn resize(&mut self, cols: u16, rows: u16);
    fn state(&self) -> TerminalState;
    fn title(&self) -> String;
}

/// `vt100`-backed emulator. `vt100` owns no on-disk scrollback of its own in
/// this binding — it is configured with a small in-memory scrollback just
/// deep enough to read off rows as they leave the viewport (see
/// `Vt100Emulator::drain_scrolled_rows`); the PTY host owns the durable
/// archive.
pub struct Vt100Emulator {
    parser: vt100::Parser,
    cols: u16,
    rows: u16,
}

impl Vt100Emulator {
    pub fn new(cols: u16, rows: u16) -> Self {
        Vt100Emulator { parser: vt100::Parser::new(rows, cols, 256), cols, rows }
    }

    pub fn screen_snapshot_rows(&self) -> Vec<Vec<Cell>> {
        let screen = self.parser.screen();
        (0..self.rows)
            .map(|r| (0..self.cols).map(|c| convert_cell(screen.cell(r, c))).collect())
            .collect()
    }
}

fn convert_color(c: vt100::Color) -> Rgb {
    match c {
        vt100::Color::Default => Rgb::BLACK,
        vt100::Color::Idx(i) => indexed_to_rgb(i),
        vt100::Color::Rgb(r, g, b) => Rgb { r, g, b },
    }
}

fn indexed_to_rgb(i: u8) -> Rgb {
    // Standard xterm 256-color approximation, used only for packing since
    // the wire format carries truecolor triples, not palette indices.
    if i < 16 {
        const BASE: [(u8, u8, u8); 16] = [
            (0, 0, 0), (205, 0, 0), (0, 205, 0), (205, 205, 0),
            (0, 0, 238), (205, 0, 205), (0, 205, 205), (229, 229, 229),
            (127, 127, 127), (255, 0, 0), (0, 255, 0), (255, 255, 0),
            (92, 92, 255), (255, 0, 255), (0, 255, 255), (255, 255, 255),
        ];
        let (r, g, b) = BASE[i as usize];
        Rgb { r, g, b }
    } else if i < 232 {
        let n = i - 16;
        let levels = [0u8, 95, 135, 175, 215, 255];
        let r = levels[(n / 36) as usize];
        let g = levels[((n / 6) % 6) as usize];
        let b = levels[(n % 6) as usize];
        Rgb { r, g, b }
    } else {
        let v = 8 + (i - 232) * 10;
        Rgb { r: v, g: v, b: v }
    }
}

fn convert_cell(cell: Option<&vt100::Cell>) -> Cell {
    let Some(cell) = cell else { return Cell::blank() };
    let mut flags = CellFlags::empty();
    if cell.bold() {
        flags |= CellFlags::BOLD;
    }
    if cell.italic() {
        flags |= CellFlags::ITALIC;
    }
    if cell.underline() {
        flags |= CellFlags::UNDERLINE;
    }
    if cell.inverse() {
        flags |= CellFlags::INVERSE;
    }
    let codepoint = cell.contents().chars().next().map(|c| c as u32).unwrap_or(b' ' as u32);
    let width = if cell.contents().is_empty() && codepoint == b' ' as u32 {
        0
    } else if cell.is_wide() {
        2
    } else if cell.is_wide_continuation() {
        0
    } else {
        1
    };
    Cell {
        codepoint,
        fg: convert_color(cell.fgcolor()),
        bg: convert_color(cell.bgcolor()),
        flags,
        width,
        hyperlink_id: None,
    }
}

impl Emulator for Vt100Emulator {
    fn write(&mut self, bytes: &[u8]) -> EmulatorEvents {
        let title_before = self.parser.screen().title().to_string();
        self.parser.process(bytes);
        let title_after = self.parser.screen().title().to_string();
        EmulatorEvents {
            title: (title_after != title_before).then_some(title_after),
            bell: false,
            kitty_graphics: Vec::new(),
        }
    }

    fn resize(&mut self, cols: u16, rows: u16) {
        self.cols = cols;
        self.rows = rows;
        self.parser.screen_mut().set_size(rows, cols);
    }

    fn state(&self) -> TerminalState {
        let screen = self.parser.screen();
        let (cy, cx) = screen.cursor_position();
        TerminalState {
            cols: self.cols as u32,
            rows: self.rows as u32,
            cells: self.screen_snapshot_rows(),
            cursor: Cursor { x: cx as u32, y: cy as u32, visible: !screen.hide_cursor() },
            mode_flags: ModeFlags {
                alternate_screen: screen.alternate_screen(),
                mouse_tracking: screen.mouse_protocol_mode() != vt100::MouseProtocolMode::None,
                application_cursor_keys: screen.application_cursor(),
                kitty_keyboard_flags: 0,
            },
        }
    }

    fn title(&self) -> String {
        self.parser.screen().title().to_string()
    }
}
