//! `pane.capture` output formatting (spec §4.I): plain text trimmed of
//! trailing blank content, or ANSI with SGR codes only on a style change.

use crate::cell::{Cell, CellFlags, Row};

use super::server::CaptureFormat;

pub fn format_capture(rows: &[Row], format: CaptureFormat, raw: bool) -> String {
    match format {
        CaptureFormat::Text => format_text(rows, raw),
        CaptureFormat::Ansi => format_ansi(rows),
    }
}

fn line_text(row: &[Cell]) -> String {
    row.iter().filter(|c| c.width != 0).map(Cell::ch).collect()
}

fn format_text(rows: &[Row], raw: bool) -> String {
    let mut lines: Vec<String> = rows.iter().map(|r| line_text(r)).collect();
    if !raw {
        for line in lines.iter_mut() {
            let trimmed_len = line.trim_end().len();
            line.truncate(trimmed_len);
        }
        while lines.last().is_some_and(String::is_empty) {
            lines.pop();
        }
    }
    lines.join("\n")
}

fn format_ansi(rows: &[Row]) -> String {
    let mut out = String::new();
    for row in rows {
        let mut prev: Option<&Cell> = None;
        for cell in row {
            if cell.width == 0 {
                continue;
            }
            if prev.map_or(true, |p| style_differs(p, cell)) {
                out.push_str(&sgr_for(cell));
            }
            out.push(cell.ch());
            prev = Some(cell);
        }
        out.push_str("\x1b[0m");
        out.push('\n');
    }
    if out.ends_with('\n') {
        out.pop();
    }
    out
}

fn style_differs(a: &Cell, b: &Cell) -> bool {
    a.fg != b.fg || a.bg != b.bg || a.flags != b.flags
}

/// Emits attrs, fg and bg as three independently-terminated escapes rather
/// than one merged SGR, so a consumer matching on `\x1b[38;2;r;g;bm` alone
/// finds it immediately followed by `m` regardless of what else changed.
fn sgr_for(cell: &Cell) -> String {
    let mut codes = vec!["0".to_string()];
    if cell.flags.contains(CellFlags::BOLD) {
        codes.push("1".into());
    }
    if cell.flags.contains(CellFlags::DIM) {
        codes.push("2".into());
    }
    if cell.flags.contains(CellFlags::ITALIC) {
        codes.push("3".into());
    }
    if cell.flags.contains(CellFlags::UNDERLINE) {
        codes.push("4".into());
    }
    if cell.flags.contains(CellFlags::BLINK) {
        codes.push("5".into());
    }
    if cell.flags.contains(CellFlags::INVERSE) {
        codes.push("7".into());
    }
    if cell.flags.contains(CellFlags::STRIKE) {
        codes.push("9".into());
    }
    let mut out = format!("\x1b[{}m", codes.join(";"));
    out.push_str(&format!("\x1b[38;2;{};{};{}m", cell.fg.r, cell.fg.g, cell.fg.b));
    out.push_str(&format!("\x1b[48;2;{};{};{}m", cell.bg.r, cell.bg.g, cell.bg.b));
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cell::Rgb;

    fn row_of(text: &str) -> Row {
        text.chars().map(|c| Cell { codepoint: c as u32, ..Cell::blank() }).collect()
    }

    #[test]
    fn text_format_trims_trailing_whitespace_and_blank_lines() {
        let rows = vec![row_of("hi   "), row_of("    "), row_of("")];
        let out = format_capture(&rows, CaptureFormat::Text, false);
        assert_eq!(out, "hi");
    }

    #[test]
    fn raw_text_keeps_padding_and_blank_lines() {
        let rows = vec![row_of("hi "), row_of("")];
        let out = format_capture(&rows, CaptureFormat::Text, true);
        assert_eq!(out, "hi \n");
    }

    #[test]
    fn ansi_emits_sgr_only_on_style_change() {
        let mut a = Cell { codepoint: b'a' as u32, ..Cell::blank() };
        a.fg = Rgb { r: 1, g: 2, b: 3 };
        let mut b = a;
        b.codepoint = b'b' as u32;
        let mut c = Cell { codepoint: b'c' as u32, ..Cell::blank() };
        c.fg = Rgb { r: 9, g: 9, b: 9 };
        let rows = vec![vec![a, b, c]];
        let out = format_capture(&rows, CaptureFormat::Ansi, false);
        assert_eq!(out.matches("38;2;1;2;3").count(), 1);
        assert_eq!(out.matches("38;2;9;9;9").count(), 1);
        assert!(out.ends_with("\x1b[0m"));
    }

    #[test]
    fn fg_escape_is_independently_terminated() {
        let mut red = Cell { codepoint: b'x' as u32, ..Cell::blank() };
        red.fg = Rgb { r: 255, g: 0, b: 0 };
        let rows = vec![vec![red]];
        let out = format_capture(&rows, CaptureFormat::Ansi, false);
        assert!(out.contains("\x1b[38;2;255;0;0m"));
    }
}
