//! Component K — the copy-mode engine (spec §4.K): a virtual cursor
//! `(x, absY)` ranging over `[0, scrollbackLength + rows)`, vim-style
//! motions, and three selection modes {char, line, block}.
//!
//! Grounded on the teacher's `copy_mode.rs` (`move_copy_cursor`,
//! `yank_selection`) for the cursor-nudge/selection shape, generalized from
//! its rectangular-only yank into full char/line/word/WORD motions plus
//! line and char selection, driven purely through the `LineSource` seam so
//! this module never touches `ShimClient` or the scrollback archive
//! directly.

use crate::cell::{Cell, Row};

/// Hands copy-mode a row by absolute line number: `0` is the oldest
/// scrollback row, `[scrollbackLength, scrollbackLength + rows)` is the live
/// screen (spec §4.K). Implementations may return `None` for a scrollback
/// line that hasn't been fetched into cache yet; the engine treats that as
/// an empty row rather than failing the motion.
pub trait LineSource {
    fn cols(&self) -> u32;
    fn rows(&self) -> u32;
    fn scrollback_length(&self) -> u64;
    fn get_line(&mut self, absolute: u64) -> Option<Row>;
}

pub fn total_lines(source: &impl LineSource) -> u64 {
    source.scrollback_length() + source.rows() as u64
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SelectionMode {
    Char,
    Line,
    Block,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Position {
    pub x: u32,
    pub y: u64,
}

/// Normalized selection bounds: `start` always precedes or equals `end` in
/// reading order; `focus_at_end` records which endpoint the live cursor sits
/// at, for rendering the active handle (spec §4.K).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Selection {
    pub start_x: u32,
    pub start_y: u64,
    pub end_x: u32,
    pub end_y: u64,
    pub focus_at_end: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Class {
    Word,
    Other,
    Space,
}

fn is_word_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '_' || (c as u32) > 127
}

fn classify(c: char, big: bool) -> Class {
    if c.is_whitespace() {
        Class::Space
    } else if big {
        Class::Other
    } else if is_word_char(c) {
        Class::Word
    } else {
        Class::Other
    }
}

pub struct CopyEngine {
    cursor: Position,
    anchor: Option<Position>,
    mode: SelectionMode,
}

impl CopyEngine {
    pub fn new(cursor: Position) -> Self {
        CopyEngine { cursor, anchor: None, mode: SelectionMode::Char }
    }

    pub fn cursor(&self) -> Position {
        self.cursor
    }

    pub fn mode(&self) -> SelectionMode {
        self.mode
    }

    pub fn selection_active(&self) -> bool {
        self.anchor.is_some()
    }

    pub fn start_selection(&mut self, mode: SelectionMode) {
        self.anchor = Some(self.cursor);
        self.mode = mode;
    }

    pub fn clear_selection(&mut self) {
        self.anchor = None;
    }

    /// Normalizes anchor/cursor into reading order (spec §4.K). Block mode
    /// keeps the raw x bounds as a bounding box rather than reading order,
    /// since a block selection has no "earlier" corner.
    pub fn selection(&self) -> Option<Selection> {
        let anchor = self.anchor?;
        let (start, end, focus_at_end) = if (anchor.y, anchor.x) <= (self.cursor.y, self.cursor.x) {
            (anchor, self.cursor, true)
        } else {
            (self.cursor, anchor, false)
        };
        Some(Selection { start_x: start.x, start_y: start.y, end_x: end.x, end_y: end.y, focus_at_end })
    }

    pub fn move_left(&mut self) {
        self.cursor.x = self.cursor.x.saturating_sub(1);
    }

    pub fn move_right(&mut self, source: &impl LineSource) {
        self.cursor.x = (self.cursor.x + 1).min(source.cols().saturating_sub(1));
    }

    pub fn move_up(&mut self) {
        self.cursor.y = self.cursor.y.saturating_sub(1);
    }

    pub fn move_down(&mut self, source: &impl LineSource) {
        self.cursor.y = (self.cursor.y + 1).min(total_lines(source).saturating_sub(1));
    }

    pub fn page_up(&mut self, lines: u64) {
        self.cursor.y = self.cursor.y.saturating_sub(lines);
    }

    pub fn page_down(&mut self, source: &impl LineSource, lines: u64) {
        self.cursor.y = (self.cursor.y + lines).min(total_lines(source).saturating_sub(1));
    }

    pub fn move_to_line_start(&mut self) {
        self.cursor.x = 0;
    }

    pub fn move_to_line_end(&mut self, source: &mut impl LineSource) {
        if let Some(row) = source.get_line(self.cursor.y) {
            let last = row.iter().rposition(|c| c.width != 0).unwrap_or(0);
            self.cursor.x = last as u32;
        }
    }

    pub fn move_to_first_non_blank(&mut self, source: &mut impl LineSource) {
        if let Some(row) = source.get_line(self.cursor.y) {
            let first = row.iter().position(|c| c.width != 0 && c.ch() != ' ').unwrap_or(0);
            self.cursor.x = first as u32;
        }
    }

    pub fn move_top(&mut self) {
        self.cursor = Position { x: 0, y: 0 };
    }

    pub fn move_bottom(&mut self, source: &impl LineSource) {
        self.cursor = Position { x: 0, y: total_lines(source).saturating_sub(1) };
    }

    pub fn move_word_forward(&mut self, source: &mut impl LineSource, big: bool) {
        let mut pos = self.cursor;
        let cls = class_at(source, pos.y, pos.x, big);
        if cls != Class::Space {
            while let Some(next) = step_forward(source, pos) {
                if class_at(source, next.y, next.x, big) != cls {
                    break;
                }
                pos = next;
            }
        }
        loop {
            let Some(next) = step_forward(source, pos) else {
                self.cursor = pos;
                return;
            };
            let next_cls = class_at(source, next.y, next.x, big);
            pos = next;
            if next_cls != Class::Space {
                break;
            }
        }
        self.cursor = pos;
    }

    pub fn move_word_backward(&mut self, source: &mut impl LineSource, big: bool) {
        let Some(mut pos) = step_backward(source, self.cursor) else { return };
        while class_at(source, pos.y, pos.x, big) == Class::Space {
            let Some(prev) = step_backward(source, pos) else {
                self.cursor = pos;
                return;
            };
            pos = prev;
        }
        let cls = class_at(source, pos.y, pos.x, big);
        loop {
            let Some(prev) = step_backward(source, pos) else { break };
            if class_at(source, prev.y, prev.x, big) != cls {
                break;
            }
            pos = prev;
        }
        self.cursor = pos;
    }

    pub fn move_word_end(&mut self, source: &mut impl LineSource, big: bool) {
        let Some(mut pos) = step_forward(source, self.cursor) else { return };
        while class_at(source, pos.y, pos.x, big) == Class::Space {
            let Some(next) = step_forward(source, pos) else {
                self.cursor = pos;
                return;
            };
            pos = next;
        }
        let cls = class_at(source, pos.y, pos.x, big);
        loop {
            let Some(next) = step_forward(source, pos) else { break };
            if class_at(source, next.y, next.x, big) != cls {
                break;
            }
            pos = next;
        }
        self.cursor = pos;
    }

    /// Extracts the selected text through `getLine`, joining rows with `\n`
    /// and honouring wide-cell continuation (spec §4.K).
    pub fn extract(&self, source: &mut impl LineSource) -> String {
        let Some(sel) = self.selection() else { return String::new() };
        match self.mode {
            SelectionMode::Block => extract_block(source, sel),
            SelectionMode::Line => extract_lines(source, sel),
            SelectionMode::Char => extract_char(source, sel),
        }
    }
}

fn step_forward(source: &impl LineSource, pos: Position) -> Option<Position> {
    let cols = source.cols();
    let max_y = total_lines(source).saturating_sub(1);
    if pos.x + 1 < cols {
        Some(Position { x: pos.x + 1, y: pos.y })
    } else if pos.y < max_y {
        Some(Position { x: 0, y: pos.y + 1 })
    } else {
        None
    }
}

fn step_backward(source: &impl LineSource, pos: Position) -> Option<Position> {
    if pos.x > 0 {
        Some(Position { x: pos.x - 1, y: pos.y })
    } else if pos.y > 0 {
        Some(Position { x: source.cols().saturating_sub(1), y: pos.y - 1 })
    } else {
        None
    }
}

/// Continuation columns (the second cell of a wide glyph) inherit the
/// class of the column before them so word motions don't stop mid-glyph.
fn class_at(source: &mut impl LineSource, y: u64, x: u32, big: bool) -> Class {
    let Some(row) = source.get_line(y) else { return Class::Space };
    let Some(cell) = row.get(x as usize) else { return Class::Space };
    if cell.width == 0 {
        if x > 0 {
            return class_at(source, y, x - 1, big);
        }
        return Class::Space;
    }
    classify(cell.ch(), big)
}

fn row_text_range(row: &Row, start_col: u32, end_col_inclusive: u32) -> String {
    row.iter()
        .enumerate()
        .filter(|(i, cell)| *i as u32 >= start_col && *i as u32 <= end_col_inclusive && cell.width != 0)
        .map(|(_, cell): (usize, &Cell)| cell.ch())
        .collect()
}

fn row_text_full(row: &Row) -> String {
    row_text_range(row, 0, u32::MAX)
}

fn extract_char(source: &mut impl LineSource, sel: Selection) -> String {
    if sel.start_y == sel.end_y {
        let Some(row) = source.get_line(sel.start_y) else { return String::new() };
        return row_text_range(&row, sel.start_x, sel.end_x);
    }
    let mut lines = Vec::new();
    if let Some(row) = source.get_line(sel.start_y) {
        lines.push(row_text_range(&row, sel.start_x, u32::MAX));
    }
    for y in (sel.start_y + 1)..sel.end_y {
        lines.push(source.get_line(y).map(|r| row_text_full(&r)).unwrap_or_default());
    }
    if let Some(row) = source.get_line(sel.end_y) {
        lines.push(row_text_range(&row, 0, sel.end_x));
    }
    lines.join("\n")
}

fn extract_lines(source: &mut impl LineSource, sel: Selection) -> String {
    let mut lines = Vec::new();
    for y in sel.start_y..=sel.end_y {
        lines.push(source.get_line(y).map(|r| row_text_full(&r)).unwrap_or_default());
    }
    lines.join("\n")
}

fn extract_block(source: &mut impl LineSource, sel: Selection) -> String {
    let (lo, hi) = (sel.start_x.min(sel.end_x), sel.start_x.max(sel.end_x));
    let mut lines = Vec::new();
    for y in sel.start_y..=sel.end_y {
        lines.push(source.get_line(y).map(|r| row_text_range(&r, lo, hi)).unwrap_or_default());
    }
    lines.join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cell::Cell;

    struct FakeSource {
        cols: u32,
        lines: Vec<Row>,
        scrollback_length: u64,
    }

    impl FakeSource {
        fn from_text(lines: &[&str], cols: u32, scrollback_length: u64) -> Self {
            let rows = lines
                .iter()
                .map(|line| {
                    let mut row: Vec<Cell> = line.chars().map(|c| Cell { codepoint: c as u32, ..Cell::blank() }).collect();
                    row.resize(cols as usize, Cell::blank());
                    row
                })
                .collect();
            FakeSource { cols, lines: rows, scrollback_length }
        }
    }

    impl LineSource for FakeSource {
        fn cols(&self) -> u32 {
            self.cols
        }
        fn rows(&self) -> u32 {
            (self.lines.len() as u64 - self.scrollback_length) as u32
        }
        fn scrollback_length(&self) -> u64 {
            self.scrollback_length
        }
        fn get_line(&mut self, absolute: u64) -> Option<Row> {
            self.lines.get(absolute as usize).cloned()
        }
    }

    #[test]
    fn char_selection_spans_two_lines() {
        let mut src = FakeSource::from_text(&["hello world", "second line"], 11, 0);
        let mut engine = CopyEngine::new(Position { x: 6, y: 0 });
        engine.start_selection(SelectionMode::Char);
        engine.cursor = Position { x: 5, y: 1 };
        let text = engine.extract(&mut src);
        assert_eq!(text, "world\nsecond");
    }

    #[test]
    fn line_selection_ignores_columns() {
        let mut src = FakeSource::from_text(&["abc", "def"], 3, 0);
        let mut engine = CopyEngine::new(Position { x: 2, y: 0 });
        engine.start_selection(SelectionMode::Line);
        engine.cursor = Position { x: 0, y: 1 };
        assert_eq!(engine.extract(&mut src), "abc\ndef");
    }

    #[test]
    fn block_selection_is_a_bounding_box() {
        let mut src = FakeSource::from_text(&["abcdef", "ghijkl", "mnopqr"], 6, 0);
        let mut engine = CopyEngine::new(Position { x: 1, y: 0 });
        engine.start_selection(SelectionMode::Block);
        engine.cursor = Position { x: 3, y: 2 };
        assert_eq!(engine.extract(&mut src), "bcd\nhij\nnop");
    }

    #[test]
    fn word_forward_skips_punctuation_run_then_spaces() {
        let mut src = FakeSource::from_text(&["foo.bar  baz"], 12, 0);
        let mut engine = CopyEngine::new(Position { x: 0, y: 0 });
        engine.move_word_forward(&mut src, false);
        assert_eq!(engine.cursor().x, 3); // '.'
        engine.move_word_forward(&mut src, false);
        assert_eq!(engine.cursor().x, 4); // 'bar'
        engine.move_word_forward(&mut src, false);
        assert_eq!(engine.cursor().x, 9); // 'baz'
    }

    #[test]
    fn big_word_forward_only_respects_whitespace() {
        let mut src = FakeSource::from_text(&["foo.bar  baz"], 12, 0);
        let mut engine = CopyEngine::new(Position { x: 0, y: 0 });
        engine.move_word_forward(&mut src, true);
        assert_eq!(engine.cursor().x, 9);
    }

    #[test]
    fn word_backward_lands_on_previous_word_start() {
        let mut src = FakeSource::from_text(&["foo bar baz"], 11, 0);
        let mut engine = CopyEngine::new(Position { x: 8, y: 0 });
        engine.move_word_backward(&mut src, false);
        assert_eq!(engine.cursor().x, 4);
    }

    #[test]
    fn wide_cell_continuation_is_skipped_on_extract() {
        let wide = Cell { codepoint: '\u{4E2D}' as u32, width: 2, ..Cell::blank() };
        let cont = Cell { width: 0, ..Cell::blank() };
        let a = Cell { codepoint: 'a' as u32, ..Cell::blank() };
        let row = vec![wide, cont, a];
        let mut src = FakeSource { cols: 3, lines: vec![row], scrollback_length: 0 };
        let mut engine = CopyEngine::new(Position { x: 0, y: 0 });
        engine.start_selection(SelectionMode::Char);
        engine.cursor = Position { x: 2, y: 0 };
        assert_eq!(engine.extract(&mut src), "\u{4E2D}a");
    }

    #[test]
    fn move_to_line_end_lands_on_last_non_continuation_cell() {
        let mut src = FakeSource::from_text(&["hi   "], 5, 0);
        let mut engine = CopyEngine::new(Position { x: 0, y: 0 });
        engine.move_to_line_end(&mut src);
        assert_eq!(engine.cursor().x, 4);
    }
}
