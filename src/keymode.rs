//! Component J — keyboard/mode router (spec §4.J): a finite mode state
//! machine that decides whether a key is consumed by the UI or forwarded to
//! the focused PTY. Grounded on `input.rs`'s prefix-key/`Instant`-timeout
//! pattern and its raw-byte key encoding, regeneralized onto the spec's mode
//! set and the layout engine's `Action` type instead of the teacher's
//! `AppState`-coupled bindings.

use std::time::{Duration, Instant};

use crossterm::event::{KeyCode, KeyEvent, KeyModifiers};

use crate::layout::{Action as LayoutAction, FocusDirection, FocusTarget, SplitDirection};

const PREFIX_TIMEOUT: Duration = Duration::from_secs(1);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    Normal,
    Prefix,
    Search,
    Copy,
    Aggregate,
    Confirm,
    Move,
}

/// What the router asks the app orchestrator to do. A superset of
/// `layout::Action`: mode transitions and a few whole-app actions the layout
/// engine has no concept of.
#[derive(Debug, Clone, PartialEq)]
pub enum RouterAction {
    Layout(LayoutAction),
    EnterMode(Mode),
    ExitToNormal,
    SubmitSearch(String),
    SearchInput(String),
    SubmitConfirm(bool),
    CopyModeKey(KeyEvent),
    Detach,
    Quit,
    ToggleCopyMode,
}

pub enum KeyOutcome {
    /// The router consumed the key; zero or more actions follow from it.
    Handled(Vec<RouterAction>),
    /// Normal mode with no matching binding: raw bytes for the focused PTY,
    /// already encoded per its DECCKM cursor-key mode.
    Forward(Vec<u8>),
}

pub struct KeyRouter {
    mode: Mode,
    prefix_key: (KeyCode, KeyModifiers),
    armed_at: Option<Instant>,
    search_buffer: String,
}

impl KeyRouter {
    pub fn new() -> Self {
        KeyRouter {
            mode: Mode::Normal,
            prefix_key: (KeyCode::Char('b'), KeyModifiers::CONTROL),
            armed_at: None,
            search_buffer: String::new(),
        }
    }

    pub fn mode(&self) -> Mode {
        self.mode
    }

    pub fn force_mode(&mut self, mode: Mode) {
        self.mode = mode;
        if mode != Mode::Prefix {
            self.armed_at = None;
        }
    }

    /// Routes one key event. `application_cursor_keys` is the focused PTY's
    /// current DECCKM state, needed to encode forwarded arrow keys.
    pub fn handle(&mut self, key: KeyEvent, application_cursor_keys: bool) -> KeyOutcome {
        if self.mode == Mode::Prefix {
            if let Some(armed) = self.armed_at {
                if armed.elapsed() > PREFIX_TIMEOUT {
                    self.mode = Mode::Normal;
                    self.armed_at = None;
                }
            }
        }

        match self.mode {
            Mode::Normal => self.handle_normal(key, application_cursor_keys),
            Mode::Prefix => self.handle_prefix(key),
            Mode::Search => self.handle_search(key),
            Mode::Copy => self.handle_copy(key),
            Mode::Aggregate => self.handle_aggregate(key),
            Mode::Confirm => self.handle_confirm(key),
            Mode::Move => self.handle_move(key),
        }
    }

    fn handle_normal(&mut self, key: KeyEvent, application_cursor_keys: bool) -> KeyOutcome {
        if (key.code, key.modifiers) == self.prefix_key {
            self.mode = Mode::Prefix;
            self.armed_at = Some(Instant::now());
            return KeyOutcome::Handled(vec![]);
        }
        KeyOutcome::Forward(encode_key(key, application_cursor_keys))
    }

    fn handle_prefix(&mut self, key: KeyEvent) -> KeyOutcome {
        self.mode = Mode::Normal;
        self.armed_at = None;

        let action = match (key.code, key.modifiers) {
            (KeyCode::Char('%'), _) => Some(RouterAction::Layout(LayoutAction::SplitPane(SplitDirection::Horizontal))),
            (KeyCode::Char('"'), _) => Some(RouterAction::Layout(LayoutAction::SplitPane(SplitDirection::Vertical))),
            (KeyCode::Char('c'), _) => Some(RouterAction::Layout(LayoutAction::NewPane)),
            (KeyCode::Char('x'), _) => Some(RouterAction::EnterMode(Mode::Confirm)),
            (KeyCode::Char('z'), _) => Some(RouterAction::Layout(LayoutAction::ToggleZoom)),
            (KeyCode::Char('['), _) => Some(RouterAction::ToggleCopyMode),
            (KeyCode::Char('d'), _) => Some(RouterAction::Detach),
            (KeyCode::Char('/'), _) => Some(RouterAction::EnterMode(Mode::Search)),
            (KeyCode::Char('m'), _) => Some(RouterAction::EnterMode(Mode::Move)),
            (KeyCode::Char('a'), _) => Some(RouterAction::EnterMode(Mode::Aggregate)),
            (KeyCode::Left, _) => Some(RouterAction::Layout(LayoutAction::Focus(FocusTarget::Direction(FocusDirection::Left)))),
            (KeyCode::Right, _) => Some(RouterAction::Layout(LayoutAction::Focus(FocusTarget::Direction(FocusDirection::Right)))),
            (KeyCode::Up, _) => Some(RouterAction::Layout(LayoutAction::Focus(FocusTarget::Direction(FocusDirection::Up)))),
            (KeyCode::Down, _) => Some(RouterAction::Layout(LayoutAction::Focus(FocusTarget::Direction(FocusDirection::Down)))),
            (KeyCode::Char(d), _) if d.is_ascii_digit() && d != '0' => {
                Some(RouterAction::Layout(LayoutAction::SwitchWorkspace(d.to_digit(10).unwrap() as u8)))
            }
            (KeyCode::Esc, _) => None,
            _ => None,
        };

        match action {
            Some(RouterAction::EnterMode(m)) => {
                self.mode = m;
                if m == Mode::Search {
                    self.search_buffer.clear();
                }
                KeyOutcome::Handled(vec![RouterAction::EnterMode(m)])
            }
            Some(a) => KeyOutcome::Handled(vec![a]),
            None => KeyOutcome::Handled(vec![]),
        }
    }

    fn handle_search(&mut self, key: KeyEvent) -> KeyOutcome {
        match key.code {
            KeyCode::Esc => {
                self.mode = Mode::Normal;
                self.search_buffer.clear();
                KeyOutcome::Handled(vec![RouterAction::ExitToNormal])
            }
            KeyCode::Enter => {
                self.mode = Mode::Normal;
                let query = std::mem::take(&mut self.search_buffer);
                KeyOutcome::Handled(vec![RouterAction::SubmitSearch(query)])
            }
            KeyCode::Backspace => {
                self.search_buffer.pop();
                KeyOutcome::Handled(vec![RouterAction::SearchInput(self.search_buffer.clone())])
            }
            KeyCode::Char(c) => {
                self.search_buffer.push(c);
                KeyOutcome::Handled(vec![RouterAction::SearchInput(self.search_buffer.clone())])
            }
            _ => KeyOutcome::Handled(vec![]),
        }
    }

    fn handle_copy(&mut self, key: KeyEvent) -> KeyOutcome {
        if matches!(key.code, KeyCode::Esc) || matches!(key.code, KeyCode::Char('q')) {
            self.mode = Mode::Normal;
            return KeyOutcome::Handled(vec![RouterAction::ExitToNormal]);
        }
        KeyOutcome::Handled(vec![RouterAction::CopyModeKey(key)])
    }

    fn handle_aggregate(&mut self, key: KeyEvent) -> KeyOutcome {
        if matches!(key.code, KeyCode::Esc) {
            self.mode = Mode::Normal;
            return KeyOutcome::Handled(vec![RouterAction::ExitToNormal]);
        }
        KeyOutcome::Forward(encode_key(key, false))
    }

    fn handle_confirm(&mut self, key: KeyEvent) -> KeyOutcome {
        self.mode = Mode::Normal;
        match key.code {
            KeyCode::Char('y') | KeyCode::Char('Y') => KeyOutcome::Handled(vec![RouterAction::SubmitConfirm(true)]),
            _ => KeyOutcome::Handled(vec![RouterAction::SubmitConfirm(false)]),
        }
    }

    fn handle_move(&mut self, key: KeyEvent) -> KeyOutcome {
        match key.code {
            KeyCode::Esc | KeyCode::Enter => {
                self.mode = Mode::Normal;
                KeyOutcome::Handled(vec![RouterAction::ExitToNormal])
            }
            KeyCode::Left => KeyOutcome::Handled(vec![RouterAction::Layout(LayoutAction::Focus(FocusTarget::Direction(FocusDirection::Left)))]),
            KeyCode::Right => KeyOutcome::Handled(vec![RouterAction::Layout(LayoutAction::Focus(FocusTarget::Direction(FocusDirection::Right)))]),
            KeyCode::Up => KeyOutcome::Handled(vec![RouterAction::Layout(LayoutAction::Focus(FocusTarget::Direction(FocusDirection::Up)))]),
            KeyCode::Down => KeyOutcome::Handled(vec![RouterAction::Layout(LayoutAction::Focus(FocusTarget::Direction(FocusDirection::Down)))]),
            _ => KeyOutcome::Handled(vec![]),
        }
    }
}

impl Default for KeyRouter {
    fn default() -> Self {
        Self::new()
    }
}

/// Encodes a key event as the byte sequence a real terminal would send,
/// honouring DECCKM for the arrow keys (spec §4.J).
pub fn encode_key(key: KeyEvent, application_cursor_keys: bool) -> Vec<u8> {
    match key.code {
        KeyCode::Char(c) if key.modifiers.contains(KeyModifiers::CONTROL) && key.modifiers.contains(KeyModifiers::ALT) => {
            let ctrl_byte = ctrl_byte(c);
            vec![0x1b, ctrl_byte]
        }
        KeyCode::Char(c) if key.modifiers.contains(KeyModifiers::ALT) => {
            let mut out = vec![0x1b];
            out.extend(c.to_string().into_bytes());
            out
        }
        KeyCode::Char(c) if key.modifiers.contains(KeyModifiers::CONTROL) => vec![ctrl_byte(c)],
        KeyCode::Char(c) => c.to_string().into_bytes(),
        KeyCode::Enter => vec![b'\r'],
        KeyCode::Tab => vec![b'\t'],
        KeyCode::BackTab => vec![0x1b, b'[', b'Z'],
        KeyCode::Backspace => vec![0x7f],
        KeyCode::Esc => vec![0x1b],
        KeyCode::Delete => vec![0x1b, b'[', b'3', b'~'],
        KeyCode::Home => vec![0x1b, b'[', b'H'],
        KeyCode::End => vec![0x1b, b'[', b'F'],
        KeyCode::PageUp => vec![0x1b, b'[', b'5', b'~'],
        KeyCode::PageDown => vec![0x1b, b'[', b'6', b'~'],
        KeyCode::Left => arrow(b'D', application_cursor_keys),
        KeyCode::Right => arrow(b'C', application_cursor_keys),
        KeyCode::Up => arrow(b'A', application_cursor_keys),
        KeyCode::Down => arrow(b'B', application_cursor_keys),
        _ => Vec::new(),
    }
}

fn ctrl_byte(c: char) -> u8 {
    (c.to_ascii_lowercase() as u8).wrapping_sub(b'a' - 1)
}

fn arrow(letter: u8, application_cursor_keys: bool) -> Vec<u8> {
    if application_cursor_keys {
        vec![0x1b, b'O', letter]
    } else {
        vec![0x1b, b'[', letter]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key(code: KeyCode) -> KeyEvent {
        KeyEvent::new(code, KeyModifiers::NONE)
    }

    fn ctrl_key(c: char) -> KeyEvent {
        KeyEvent::new(KeyCode::Char(c), KeyModifiers::CONTROL)
    }

    #[test]
    fn prefix_then_split_returns_to_normal() {
        let mut router = KeyRouter::new();
        let outcome = router.handle(ctrl_key('b'), false);
        assert!(matches!(outcome, KeyOutcome::Handled(a) if a.is_empty()));
        assert_eq!(router.mode(), Mode::Prefix);

        let outcome = router.handle(key(KeyCode::Char('%')), false);
        assert_eq!(router.mode(), Mode::Normal);
        match outcome {
            KeyOutcome::Handled(actions) => {
                assert_eq!(actions, vec![RouterAction::Layout(LayoutAction::SplitPane(SplitDirection::Horizontal))]);
            }
            _ => panic!("expected handled"),
        }
    }

    #[test]
    fn unhandled_normal_key_is_forwarded_encoded() {
        let mut router = KeyRouter::new();
        match router.handle(key(KeyCode::Char('x')), false) {
            KeyOutcome::Forward(bytes) => assert_eq!(bytes, b"x"),
            _ => panic!("expected forward"),
        }
    }

    #[test]
    fn arrow_keys_respect_decckm() {
        assert_eq!(encode_key(key(KeyCode::Up), false), vec![0x1b, b'[', b'A']);
        assert_eq!(encode_key(key(KeyCode::Up), true), vec![0x1b, b'O', b'A']);
    }

    #[test]
    fn search_mode_accumulates_and_submits() {
        let mut router = KeyRouter::new();
        router.force_mode(Mode::Search);
        router.handle(key(KeyCode::Char('h')), false);
        router.handle(key(KeyCode::Char('i')), false);
        match router.handle(key(KeyCode::Enter), false) {
            KeyOutcome::Handled(actions) => assert_eq!(actions, vec![RouterAction::SubmitSearch("hi".into())]),
            _ => panic!("expected handled"),
        }
        assert_eq!(router.mode(), Mode::Normal);
    }

    #[test]
    fn prefix_times_out_back_to_normal() {
        let mut router = KeyRouter::new();
        router.handle(ctrl_key('b'), false);
        router.armed_at = Some(Instant::now() - Duration::from_secs(2));
        match router.handle(key(KeyCode::Char('%')), false) {
            KeyOutcome::Forward(_) => {}
            _ => panic!("expected the timed-out prefix to forward the key as normal mode"),
        }
    }

    #[test]
    fn copy_mode_forwards_unrecognised_keys_to_copy_engine() {
        let mut router = KeyRouter::new();
        router.force_mode(Mode::Copy);
        match router.handle(key(KeyCode::Char('j')), false) {
            KeyOutcome::Handled(actions) => assert_eq!(actions, vec![RouterAction::CopyModeKey(key(KeyCode::Char('j')))]),
            _ => panic!("expected handled"),
        }
        match router.handle(key(KeyCode::Esc), false) {
            KeyOutcome::Handled(actions) => assert_eq!(actions, vec![RouterAction::ExitToNormal]),
            _ => panic!("expected handled"),
        }
        assert_eq!(router.mode(), Mode::Normal);
    }
}
