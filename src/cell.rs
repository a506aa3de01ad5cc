//! Component B — the `Cell` data model plus bit-exact binary (de)serialization
//! for rows, full terminal states and dirty updates (spec §3, §4.B).

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::error::{OpenmuxError, Result};

pub const CELL_BYTES: usize = 16;

/// Style-flag bitfield (spec §4.B): a single byte, so a hand-rolled newtype
/// reads better here than pulling in the `bitflags` crate for one field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct CellFlags(pub u8);

impl CellFlags {
    pub const BOLD: CellFlags = CellFlags(0x01);
    pub const ITALIC: CellFlags = CellFlags(0x02);
    pub const UNDERLINE: CellFlags = CellFlags(0x04);
    pub const STRIKE: CellFlags = CellFlags(0x08);
    pub const INVERSE: CellFlags = CellFlags(0x10);
    pub const BLINK: CellFlags = CellFlags(0x20);
    pub const DIM: CellFlags = CellFlags(0x40);
    pub const WIDE: CellFlags = CellFlags(0x80);

    pub fn empty() -> Self {
        CellFlags(0)
    }

    pub fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }

    pub fn bits(self) -> u8 {
        self.0
    }

    pub fn from_bits(bits: u8) -> Self {
        CellFlags(bits)
    }
}

impl std::ops::BitOr for CellFlags {
    type Output = Self;
    fn bitor(self, rhs: Self) -> Self {
        CellFlags(self.0 | rhs.0)
    }
}

impl std::ops::BitOrAssign for CellFlags {
    fn bitor_assign(&mut self, rhs: Self) {
        self.0 |= rhs.0;
    }
}

/// Foreground/background truecolor triple.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Rgb {
    pub r: u8,
    pub g: u8,
    pub b: u8,
}

impl Rgb {
    pub const BLACK: Rgb = Rgb { r: 0, g: 0, b: 0 };
}

/// The atomic screen unit (spec §3).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Cell {
    pub codepoint: u32,
    pub fg: Rgb,
    pub bg: Rgb,
    pub flags: CellFlags,
    /// 0 = continuation of a wide glyph, 1 = normal, 2 = wide (occupies the
    /// next column too).
    pub width: u8,
    pub hyperlink_id: Option<u16>,
}

impl Default for Cell {
    fn default() -> Self {
        Cell {
            codepoint: b' ' as u32,
            fg: Rgb::default(),
            bg: Rgb::default(),
            flags: CellFlags::empty(),
            width: 1,
            hyperlink_id: None,
        }
    }
}

impl Cell {
    pub fn blank() -> Self {
        Cell::default()
    }

    pub fn is_wide(&self) -> bool {
        self.width == 2
    }

    pub fn is_continuation(&self) -> bool {
        self.width == 0
    }

    pub fn ch(&self) -> char {
        char::from_u32(self.codepoint).unwrap_or(' ')
    }

    /// Packs this cell into the fixed 16-byte wire encoding (spec §4.B).
    /// `hyperlink_id` packs into the reserved byte as `id+1` (0 = none),
    /// clamped to u8 range — hyperlink ids beyond 254 collide, which is an
    /// acceptable loss for the reserved single byte this format allots them.
    pub fn pack(&self, out: &mut Vec<u8>) {
        out.extend_from_slice(&self.codepoint.to_le_bytes());
        out.push(self.fg.r);
        out.push(self.fg.g);
        out.push(self.fg.b);
        out.push(self.bg.r);
        out.push(self.bg.g);
        out.push(self.bg.b);
        let mut flags = self.flags;
        if self.width == 2 {
            flags |= CellFlags::WIDE;
        }
        out.push(flags.bits());
        out.push(self.width);
        let reserved = self
            .hyperlink_id
            .map(|id| (id.min(254) as u8) + 1)
            .unwrap_or(0);
        out.push(reserved);
    }

    pub fn unpack(bytes: &[u8]) -> Result<Cell> {
        if bytes.len() < CELL_BYTES {
            return Err(OpenmuxError::invalid("cell buffer shorter than 16 bytes"));
        }
        let codepoint = u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]);
        let fg = Rgb { r: bytes[4], g: bytes[5], b: bytes[6] };
        let bg = Rgb { r: bytes[7], g: bytes[8], b: bytes[9] };
        let flags_byte = bytes[10];
        let width = bytes[11];
        let reserved = bytes[12];
        let flags = CellFlags::from_bits(flags_byte & !CellFlags::WIDE.bits());
        let hyperlink_id = if reserved == 0 { None } else { Some((reserved - 1) as u16) };
        Ok(Cell { codepoint, fg, bg, flags, width, hyperlink_id })
    }
}

pub type Row = Vec<Cell>;

pub fn pack_row(row: &[Cell]) -> Vec<u8> {
    let mut out = Vec::with_capacity(4 + row.len() * CELL_BYTES);
    out.extend_from_slice(&(row.len() as u32).to_le_bytes());
    for cell in row {
        cell.pack(&mut out);
    }
    out
}

pub fn unpack_row(bytes: &[u8]) -> Result<Row> {
    if bytes.len() < 4 {
        return Err(OpenmuxError::invalid("row buffer too short for count prefix"));
    }
    let count = u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]) as usize;
    let mut row = Vec::with_capacity(count);
    let mut offset = 4;
    for _ in 0..count {
        let end = offset + CELL_BYTES;
        if end > bytes.len() {
            return Err(OpenmuxError::invalid("row buffer truncated"));
        }
        row.push(Cell::unpack(&bytes[offset..end])?);
        offset = end;
    }
    Ok(row)
}

/// Cursor mode flags bitfield used in the full-state prefix (spec §4.B).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ModeFlags {
    pub alternate_screen: bool,
    pub mouse_tracking: bool,
    pub application_cursor_keys: bool,
    pub kitty_keyboard_flags: u8,
}

impl ModeFlags {
    /// Packs into a single byte: bit0=alt screen, bit1=mouse tracking,
    /// bit2=application cursor keys, bits 3..8 unused here (kitty flags carry
    /// alongside separately when present, since they don't fit one byte
    /// combined with the other three booleans at full fidelity — this byte
    /// only round-trips the three boolean modes; `kitty_keyboard_flags` is
    /// carried in the JSON header for full-state responses instead).
    pub fn to_byte(self) -> u8 {
        let mut b = 0u8;
        if self.alternate_screen {
            b |= 0x01;
        }
        if self.mouse_tracking {
            b |= 0x02;
        }
        if self.application_cursor_keys {
            b |= 0x04;
        }
        b
    }

    pub fn from_byte(b: u8) -> Self {
        ModeFlags {
            alternate_screen: b & 0x01 != 0,
            mouse_tracking: b & 0x02 != 0,
            application_cursor_keys: b & 0x04 != 0,
            kitty_keyboard_flags: 0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Cursor {
    pub x: u32,
    pub y: u32,
    pub visible: bool,
}

/// Full terminal state (spec §3 `TerminalState`).
#[derive(Debug, Clone, PartialEq)]
pub struct TerminalState {
    pub cols: u32,
    pub rows: u32,
    pub cells: Vec<Row>,
    pub cursor: Cursor,
    pub mode_flags: ModeFlags,
}

impl TerminalState {
    pub fn blank(cols: u32, rows: u32) -> Self {
        TerminalState {
            cols,
            rows,
            cells: vec![vec![Cell::blank(); cols as usize]; rows as usize],
            cursor: Cursor::default(),
            mode_flags: ModeFlags::default(),
        }
    }

    /// `cells.len == rows ∧ ∀r cells[r].len == cols`; `0 ≤ cursor.x ≤ cols`,
    /// `0 ≤ cursor.y < rows`.
    pub fn check_invariants(&self) -> bool {
        self.cells.len() as u32 == self.rows
            && self.cells.iter().all(|r| r.len() as u32 == self.cols)
            && self.cursor.x <= self.cols
            && (self.rows == 0 || self.cursor.y < self.rows)
    }

    pub fn pack(&self) -> Vec<u8> {
        let mut out = Vec::new();
        out.extend_from_slice(&self.cols.to_le_bytes());
        out.extend_from_slice(&self.rows.to_le_bytes());
        out.extend_from_slice(&self.cursor.x.to_le_bytes());
        out.extend_from_slice(&self.cursor.y.to_le_bytes());
        out.push(self.cursor.visible as u8);
        out.push(self.mode_flags.to_byte());
        for row in &self.cells {
            out.extend_from_slice(&pack_row(row));
        }
        out
    }

    pub fn unpack(bytes: &[u8]) -> Result<TerminalState> {
        if bytes.len() < 18 {
            return Err(OpenmuxError::invalid("full-state buffer shorter than header"));
        }
        let cols = u32::from_le_bytes(bytes[0..4].try_into().unwrap());
        let rows = u32::from_le_bytes(bytes[4..8].try_into().unwrap());
        let cursor_x = u32::from_le_bytes(bytes[8..12].try_into().unwrap());
        let cursor_y = u32::from_le_bytes(bytes[12..16].try_into().unwrap());
        let cursor_visible = bytes[16] != 0;
        let mode_flags = ModeFlags::from_byte(bytes[17]);
        let mut cells = Vec::with_capacity(rows as usize);
        let mut offset = 18;
        for _ in 0..rows {
            if offset + 4 > bytes.len() {
                return Err(OpenmuxError::invalid("full-state buffer truncated before row count"));
            }
            let count = u32::from_le_bytes(bytes[offset..offset + 4].try_into().unwrap()) as usize;
            let row_bytes_len = 4 + count * CELL_BYTES;
            if offset + row_bytes_len > bytes.len() {
                return Err(OpenmuxError::invalid("full-state buffer truncated mid-row"));
            }
            cells.push(unpack_row(&bytes[offset..offset + row_bytes_len])?);
            offset += row_bytes_len;
        }
        Ok(TerminalState {
            cols,
            rows,
            cells,
            cursor: Cursor { x: cursor_x, y: cursor_y, visible: cursor_visible },
            mode_flags,
        })
    }
}

/// Scroll viewport state (spec §3 `ScrollState`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScrollState {
    pub viewport_offset: u64,
    pub scrollback_length: u64,
}

impl ScrollState {
    pub fn is_at_bottom(&self) -> bool {
        self.viewport_offset == 0
    }
}

/// Incremental delta between two terminal frames (spec §3 `DirtyUpdate`).
#[derive(Debug, Clone)]
pub struct DirtyUpdate {
    pub dirty_rows: BTreeMap<u16, Row>,
    pub cursor: Cursor,
    pub scroll: ScrollState,
    pub cols: u32,
    pub rows: u32,
    pub is_full: bool,
    pub full_state: Option<TerminalState>,
    pub mode_flags: ModeFlags,
    /// Pass-through flag; the core never interprets it (spec §9 open
    /// question).
    pub in_band_resize: bool,
}

impl DirtyUpdate {
    /// Serializes `(meta, dirty_row_indices: u16[], dirty_row_data, optional
    /// full_state_data)` per spec §4.B, as three/four payload segments ready
    /// to hand to a `Frame`.
    pub fn pack_payloads(&self) -> (serde_json::Value, Vec<Vec<u8>>) {
        let mut indices = Vec::with_capacity(self.dirty_rows.len() * 2);
        let mut row_data = Vec::new();
        for (idx, row) in &self.dirty_rows {
            indices.extend_from_slice(&idx.to_le_bytes());
            row_data.extend_from_slice(&pack_row(row));
        }
        let mut payloads = vec![indices, row_data];
        if let Some(full) = &self.full_state {
            payloads.push(full.pack());
        }
        let meta = serde_json::json!({
            "cols": self.cols,
            "rows": self.rows,
            "cursorX": self.cursor.x,
            "cursorY": self.cursor.y,
            "cursorVisible": self.cursor.visible,
            "viewportOffset": self.scroll.viewport_offset,
            "scrollbackLength": self.scroll.scrollback_length,
            "isFull": self.is_full,
            "inBandResize": self.in_band_resize,
            "modeFlags": self.mode_flags.to_byte(),
        });
        (meta, payloads)
    }

    pub fn unpack_payloads(meta: &serde_json::Value, payloads: &[Vec<u8>]) -> Result<DirtyUpdate> {
        let cols = meta.get("cols").and_then(|v| v.as_u64()).unwrap_or(0) as u32;
        let rows = meta.get("rows").and_then(|v| v.as_u64()).unwrap_or(0) as u32;
        let cursor = Cursor {
            x: meta.get("cursorX").and_then(|v| v.as_u64()).unwrap_or(0) as u32,
            y: meta.get("cursorY").and_then(|v| v.as_u64()).unwrap_or(0) as u32,
            visible: meta.get("cursorVisible").and_then(|v| v.as_bool()).unwrap_or(true),
        };
        let scroll = ScrollState {
            viewport_offset: meta.get("viewportOffset").and_then(|v| v.as_u64()).unwrap_or(0),
            scrollback_length: meta.get("scrollbackLength").and_then(|v| v.as_u64()).unwrap_or(0),
        };
        let is_full = meta.get("isFull").and_then(|v| v.as_bool()).unwrap_or(false);
        let in_band_resize = meta.get("inBandResize").and_then(|v| v.as_bool()).unwrap_or(false);
        let mode_flags = ModeFlags::from_byte(meta.get("modeFlags").and_then(|v| v.as_u64()).unwrap_or(0) as u8);

        let indices_bytes = payloads.first().map(Vec::as_slice).unwrap_or(&[]);
        let row_data = payloads.get(1).map(Vec::as_slice).unwrap_or(&[]);
        let mut dirty_rows = BTreeMap::new();
        let mut row_offset = 0usize;
        let mut i = 0usize;
        while i + 2 <= indices_bytes.len() {
            let idx = u16::from_le_bytes([indices_bytes[i], indices_bytes[i + 1]]);
            i += 2;
            if row_offset + 4 > row_data.len() {
                return Err(OpenmuxError::invalid("dirty row data truncated before count"));
            }
            let count = u32::from_le_bytes(row_data[row_offset..row_offset + 4].try_into().unwrap()) as usize;
            let row_len = 4 + count * CELL_BYTES;
            if row_offset + row_len > row_data.len() {
                return Err(OpenmuxError::invalid("dirty row data truncated mid-row"));
            }
            let row = unpack_row(&row_data[row_offset..row_offset + row_len])?;
            dirty_rows.insert(idx, row);
            row_offset += row_len;
        }

        let full_state = if is_full {
            payloads.get(2).map(|b| TerminalState::unpack(b)).transpose()?
        } else {
            None
        };

        Ok(DirtyUpdate { dirty_rows, cursor, scroll, cols, rows, is_full, full_state, mode_flags, in_band_resize })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_row(n: usize) -> Row {
        (0..n)
            .map(|i| Cell {
                codepoint: b'a' as u32 + (i % 26) as u32,
                fg: Rgb { r: i as u8, g: 0, b: 255 },
                bg: Rgb::BLACK,
                flags: if i % 2 == 0 { CellFlags::BOLD } else { CellFlags::empty() },
                width: 1,
                hyperlink_id: None,
            })
            .collect()
    }

    #[test]
    fn cell_round_trip() {
        let row = sample_row(12);
        let packed = pack_row(&row);
        let unpacked = unpack_row(&packed).unwrap();
        assert_eq!(row, unpacked);
    }

    #[test]
    fn wide_cell_round_trip() {
        let wide = Cell { width: 2, ..Cell::blank() };
        let cont = Cell { width: 0, ..Cell::blank() };
        let row = vec![wide, cont];
        let packed = pack_row(&row);
        let unpacked = unpack_row(&packed).unwrap();
        assert_eq!(row, unpacked);
        assert!(unpacked[0].is_wide());
        assert!(unpacked[1].is_continuation());
    }

    #[test]
    fn full_state_round_trip() {
        let mut state = TerminalState::blank(10, 3);
        state.cells[1] = sample_row(10);
        state.cursor = Cursor { x: 4, y: 1, visible: true };
        state.mode_flags.alternate_screen = true;
        let packed = state.pack();
        let restored = TerminalState::unpack(&packed).unwrap();
        assert_eq!(state, restored);
        assert!(restored.check_invariants());
    }

    #[test]
    fn dirty_update_round_trip() {
        let mut dirty = BTreeMap::new();
        dirty.insert(0u16, sample_row(5));
        dirty.insert(3u16, sample_row(5));
        let update = DirtyUpdate {
            dirty_rows: dirty,
            cursor: Cursor { x: 1, y: 2, visible: true },
            scroll: ScrollState { viewport_offset: 0, scrollback_length: 100 },
            cols: 5,
            rows: 24,
            is_full: false,
            full_state: None,
            mode_flags: ModeFlags::default(),
            in_band_resize: false,
        };
        let (meta, payloads) = update.pack_payloads();
        let restored = DirtyUpdate::unpack_payloads(&meta, &payloads).unwrap();
        assert_eq!(restored.dirty_rows, update.dirty_rows);
        assert_eq!(restored.cursor, update.cursor);
        assert_eq!(restored.scroll, update.scroll);
    }
}
