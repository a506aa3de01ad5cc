//! Per-PTY client-side state cache (spec §4.F `PtyState`): the reconstructed
//! `TerminalState` plus whatever else the UI's hot paths need without a
//! round trip to the shim.

use crate::cell::{Cursor, DirtyUpdate, ModeFlags, Row, ScrollState, TerminalState};

/// Kitty graphics payloads, cached per screen (spec §4.F: "a second cache
/// for Kitty graphics state keyed by {main, alt} screen" — the alternate
/// screen's images are unrelated to the main screen's and must not bleed
/// into each other across a screen switch).
#[derive(Debug, Clone, Default)]
pub struct KittyGraphicsCache {
    pub main: Vec<Vec<u8>>,
    pub alt: Vec<Vec<u8>>,
}

#[derive(Debug, Clone)]
pub struct PtyState {
    pub cols: u32,
    pub rows: u32,
    pub cached_rows: Vec<Row>,
    pub cursor: Cursor,
    pub mode_flags: ModeFlags,
    pub scroll: ScrollState,
    pub title: String,
    pub kitty: KittyGraphicsCache,
}

impl PtyState {
    pub fn blank() -> Self {
        PtyState {
            cols: 0,
            rows: 0,
            cached_rows: Vec::new(),
            cursor: Cursor::default(),
            mode_flags: ModeFlags::default(),
            scroll: ScrollState { viewport_offset: 0, scrollback_length: 0 },
            title: String::new(),
            kitty: KittyGraphicsCache::default(),
        }
    }

    /// Appends a forwarded Kitty graphics payload to whichever screen's
    /// cache is currently active.
    pub fn push_kitty(&mut self, data: Vec<u8>) {
        if self.mode_flags.alternate_screen {
            self.kitty.alt.push(data);
        } else {
            self.kitty.main.push(data);
        }
    }

    /// Applies a `ptyUpdate` frame (spec §4.F step 1-3): on a full snapshot,
    /// replace everything; otherwise splice the listed rows into the cache
    /// and rebuild cursor/mode/scroll from the update's metadata.
    pub fn apply(&mut self, update: DirtyUpdate) {
        if update.is_full {
            if let Some(full) = update.full_state {
                self.cols = full.cols;
                self.rows = full.rows;
                self.cached_rows = full.cells;
            }
        } else {
            if update.cols != self.cols || update.rows != self.rows {
                // A column/row change without a full snapshot means the
                // cache is stale for any row not explicitly listed; resize
                // first so indices line up, padding with blank rows.
                self.cols = update.cols;
                self.rows = update.rows;
                self.cached_rows.resize(self.rows as usize, vec![crate::cell::Cell::blank(); self.cols as usize]);
            }
            for (idx, row) in update.dirty_rows {
                if let Some(slot) = self.cached_rows.get_mut(idx as usize) {
                    *slot = row;
                }
            }
        }
        self.cursor = update.cursor;
        self.mode_flags = update.mode_flags;
        self.scroll = update.scroll;
    }

    /// Rebuilds the derived `TerminalState` from mode flags + cursor +
    /// cached rows (spec §4.F step 2).
    pub fn terminal_state(&self) -> TerminalState {
        TerminalState {
            cols: self.cols,
            rows: self.rows,
            cells: self.cached_rows.clone(),
            cursor: self.cursor,
            mode_flags: self.mode_flags,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cell::Cell;
    use std::collections::BTreeMap;

    #[test]
    fn full_snapshot_replaces_everything() {
        let mut state = PtyState::blank();
        let full = TerminalState::blank(4, 2);
        let update = DirtyUpdate {
            dirty_rows: BTreeMap::new(),
            cursor: Cursor { x: 1, y: 0, visible: true },
            scroll: ScrollState { viewport_offset: 0, scrollback_length: 5 },
            cols: 4,
            rows: 2,
            is_full: true,
            full_state: Some(full),
            mode_flags: ModeFlags::default(),
            in_band_resize: false,
        };
        state.apply(update);
        assert_eq!(state.cols, 4);
        assert_eq!(state.cached_rows.len(), 2);
        assert_eq!(state.scroll.scrollback_length, 5);
    }

    #[test]
    fn dirty_update_only_touches_listed_rows() {
        let mut state = PtyState::blank();
        state.cols = 3;
        state.rows = 2;
        state.cached_rows = vec![vec![Cell::blank(); 3]; 2];
        let mut dirty = BTreeMap::new();
        let mut row = vec![Cell::blank(); 3];
        row[0].codepoint = b'x' as u32;
        dirty.insert(1u16, row.clone());
        let update = DirtyUpdate {
            dirty_rows: dirty,
            cursor: Cursor::default(),
            scroll: ScrollState { viewport_offset: 0, scrollback_length: 0 },
            cols: 3,
            rows: 2,
            is_full: false,
            full_state: None,
            mode_flags: ModeFlags::default(),
            in_band_resize: false,
        };
        state.apply(update);
        assert_eq!(state.cached_rows[0], vec![Cell::blank(); 3]);
        assert_eq!(state.cached_rows[1], row);
    }
}
