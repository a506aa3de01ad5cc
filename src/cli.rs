//! Component O — argv parsing and dispatch for the `openmux` binary.
//! Hand-rolled, no argument-parsing crate, in the same spirit as the
//! teacher's own ad hoc `std::env::args()` walking.

use std::process::ExitCode;

use crate::error::exit_code;
use crate::layout::SplitDirection;

/// What the process was invoked to do, decided purely from argv.
#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    /// Default (no subcommand) or `attach`: launch/attach the interactive UI.
    Attach { session: Option<String> },
    /// Internal sentinel: run as the detached PTY shim.
    Shim,
    SessionList { json: bool },
    SessionCreate { name: Option<String> },
    PaneSplit { direction: SplitDirection, workspace: Option<u8>, pane: Option<String> },
    PaneSend { text: String, workspace: Option<u8>, pane: Option<String> },
    PaneCapture { lines: u32, format: CaptureFormatArg, raw: bool, workspace: Option<u8>, pane: Option<String> },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CaptureFormatArg {
    Text,
    Ansi,
}

#[derive(Debug)]
pub struct UsageError(pub String);

pub fn parse(args: &[String]) -> Result<Command, UsageError> {
    let mut it = args.iter().peekable();
    match it.peek().map(String::as_str) {
        Some("--shim") => Ok(Command::Shim),
        Some("attach") => {
            it.next();
            parse_attach(it)
        }
        Some("session") => {
            it.next();
            parse_session(it)
        }
        Some("pane") => {
            it.next();
            parse_pane(it)
        }
        None => Ok(Command::Attach { session: None }),
        Some(other) if other.starts_with("--") => parse_attach(it),
        Some(other) => Err(UsageError(format!("unrecognised command: {other}"))),
    }
}

fn parse_attach(mut it: std::iter::Peekable<std::slice::Iter<String>>) -> Result<Command, UsageError> {
    let mut session = None;
    while let Some(arg) = it.next() {
        match arg.as_str() {
            "--session" => session = Some(require_value(&mut it, "--session")?),
            other => return Err(UsageError(format!("unexpected argument: {other}"))),
        }
    }
    Ok(Command::Attach { session })
}

fn parse_session(mut it: std::iter::Peekable<std::slice::Iter<String>>) -> Result<Command, UsageError> {
    match it.next().map(String::as_str) {
        Some("list") => {
            let mut json = false;
            while let Some(arg) = it.next() {
                match arg.as_str() {
                    "--json" => json = true,
                    other => return Err(UsageError(format!("unexpected argument: {other}"))),
                }
            }
            Ok(Command::SessionList { json })
        }
        Some("create") => {
            let name = it.next().cloned();
            Ok(Command::SessionCreate { name })
        }
        Some(other) => Err(UsageError(format!("unknown session subcommand: {other}"))),
        None => Err(UsageError("expected a session subcommand: list|create".into())),
    }
}

fn parse_pane(mut it: std::iter::Peekable<std::slice::Iter<String>>) -> Result<Command, UsageError> {
    match it.next().map(String::as_str) {
        Some("split") => {
            let mut direction = SplitDirection::Vertical;
            let mut workspace = None;
            let mut pane = None;
            while let Some(arg) = it.next() {
                match arg.as_str() {
                    "--direction" => {
                        direction = match require_value(&mut it, "--direction")?.as_str() {
                            "vertical" => SplitDirection::Vertical,
                            "horizontal" => SplitDirection::Horizontal,
                            other => return Err(UsageError(format!("bad --direction: {other}"))),
                        }
                    }
                    "--workspace" => workspace = Some(parse_workspace(&require_value(&mut it, "--workspace")?)?),
                    "--pane" => pane = Some(require_value(&mut it, "--pane")?),
                    other => return Err(UsageError(format!("unexpected argument: {other}"))),
                }
            }
            Ok(Command::PaneSplit { direction, workspace, pane })
        }
        Some("send") => {
            let mut text = None;
            let mut workspace = None;
            let mut pane = None;
            while let Some(arg) = it.next() {
                match arg.as_str() {
                    "--text" => text = Some(decode_escapes(&require_value(&mut it, "--text")?)?),
                    "--workspace" => workspace = Some(parse_workspace(&require_value(&mut it, "--workspace")?)?),
                    "--pane" => pane = Some(require_value(&mut it, "--pane")?),
                    other => return Err(UsageError(format!("unexpected argument: {other}"))),
                }
            }
            let text = text.ok_or_else(|| UsageError("--text is required".into()))?;
            Ok(Command::PaneSend { text, workspace, pane })
        }
        Some("capture") => {
            let mut lines = 100u32;
            let mut format = CaptureFormatArg::Text;
            let mut raw = false;
            let mut workspace = None;
            let mut pane = None;
            while let Some(arg) = it.next() {
                match arg.as_str() {
                    "--lines" => {
                        lines = require_value(&mut it, "--lines")?
                            .parse()
                            .map_err(|_| UsageError("--lines expects a number".into()))?
                    }
                    "--format" => {
                        format = match require_value(&mut it, "--format")?.as_str() {
                            "text" => CaptureFormatArg::Text,
                            "ansi" => CaptureFormatArg::Ansi,
                            other => return Err(UsageError(format!("bad --format: {other}"))),
                        }
                    }
                    "--raw" => raw = true,
                    "--workspace" => workspace = Some(parse_workspace(&require_value(&mut it, "--workspace")?)?),
                    "--pane" => pane = Some(require_value(&mut it, "--pane")?),
                    other => return Err(UsageError(format!("unexpected argument: {other}"))),
                }
            }
            Ok(Command::PaneCapture { lines, format, raw, workspace, pane })
        }
        Some(other) => Err(UsageError(format!("unknown pane subcommand: {other}"))),
        None => Err(UsageError("expected a pane subcommand: split|send|capture".into())),
    }
}

fn parse_workspace(raw: &str) -> Result<u8, UsageError> {
    let n: u8 = raw.parse().map_err(|_| UsageError(format!("bad --workspace: {raw}")))?;
    if !(1..=9).contains(&n) {
        return Err(UsageError("--workspace must be 1-9".into()));
    }
    Ok(n)
}

fn require_value(it: &mut std::iter::Peekable<std::slice::Iter<String>>, flag: &str) -> Result<String, UsageError> {
    it.next().cloned().ok_or_else(|| UsageError(format!("{flag} requires a value")))
}

/// Decodes `\n \r \t \xHH \uXXXX \u{...}` escapes in a `--text` argument.
/// Any other backslash escape is passed through literally.
pub fn decode_escapes(raw: &str) -> Result<String, UsageError> {
    let mut out = String::new();
    let mut chars = raw.chars().peekable();
    while let Some(c) = chars.next() {
        if c != '\\' {
            out.push(c);
            continue;
        }
        match chars.next() {
            Some('n') => out.push('\n'),
            Some('r') => out.push('\r'),
            Some('t') => out.push('\t'),
            Some('\\') => out.push('\\'),
            Some('x') => {
                let hex: String = chars.by_ref().take(2).collect();
                let byte = u8::from_str_radix(&hex, 16).map_err(|_| UsageError(format!("bad \\x escape: {hex}")))?;
                out.push(byte as char);
            }
            Some('u') => {
                if chars.peek() == Some(&'{') {
                    chars.next();
                    let hex: String = chars.by_ref().take_while(|c| *c != '}').collect();
                    let code = u32::from_str_radix(&hex, 16).map_err(|_| UsageError(format!("bad \\u{{}} escape: {hex}")))?;
                    let ch = char::from_u32(code).ok_or_else(|| UsageError(format!("invalid codepoint: {hex}")))?;
                    out.push(ch);
                } else {
                    let hex: String = chars.by_ref().take(4).collect();
                    let code = u32::from_str_radix(&hex, 16).map_err(|_| UsageError(format!("bad \\u escape: {hex}")))?;
                    let ch = char::from_u32(code).ok_or_else(|| UsageError(format!("invalid codepoint: {hex}")))?;
                    out.push(ch);
                }
            }
            Some(other) => {
                out.push('\\');
                out.push(other);
            }
            None => out.push('\\'),
        }
    }
    Ok(out)
}

pub fn usage_exit_code() -> ExitCode {
    ExitCode::from(exit_code::USAGE as u8)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(v: &[&str]) -> Vec<String> {
        v.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn no_args_defaults_to_attach() {
        assert_eq!(parse(&args(&[])).unwrap(), Command::Attach { session: None });
    }

    #[test]
    fn attach_with_session_flag() {
        let cmd = parse(&args(&["attach", "--session", "work"])).unwrap();
        assert_eq!(cmd, Command::Attach { session: Some("work".into()) });
    }

    #[test]
    fn shim_sentinel() {
        assert_eq!(parse(&args(&["--shim"])).unwrap(), Command::Shim);
    }

    #[test]
    fn session_list_json() {
        assert_eq!(parse(&args(&["session", "list", "--json"])).unwrap(), Command::SessionList { json: true });
    }

    #[test]
    fn pane_split_parses_direction_and_scope() {
        let cmd = parse(&args(&["pane", "split", "--direction", "horizontal", "--workspace", "2"])).unwrap();
        assert_eq!(
            cmd,
            Command::PaneSplit { direction: SplitDirection::Horizontal, workspace: Some(2), pane: None }
        );
    }

    #[test]
    fn pane_send_requires_text() {
        assert!(parse(&args(&["pane", "send"])).is_err());
    }

    #[test]
    fn text_escape_decoding_matches_spec_example() {
        let decoded = decode_escapes("npm test\\n").unwrap();
        assert_eq!(decoded.as_bytes(), b"npm test\n");
        assert_eq!(decoded.len(), 9);
    }

    #[test]
    fn hex_and_unicode_escapes() {
        assert_eq!(decode_escapes("\\x41").unwrap(), "A");
        assert_eq!(decode_escapes("\\u0041").unwrap(), "A");
        assert_eq!(decode_escapes("\\u{1F600}").unwrap(), "\u{1F600}");
    }

    #[test]
    fn bad_workspace_is_usage_error() {
        assert!(parse(&args(&["pane", "split", "--workspace", "0"])).is_err());
        assert!(parse(&args(&["pane", "split", "--workspace", "10"])).is_err());
    }
}
