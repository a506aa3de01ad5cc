//! Component M — the UI process orchestrator (spec §2 "UI process (U)"):
//! owns `LayoutState`, the active `Session`, a `ShimClient`, the keyboard
//! router and per-pane copy-mode engines, drives the ratatui/crossterm event
//! loop, and answers control-socket requests by implementing
//! `control::ControlBackend`.
//!
//! Grounded on the teacher's `app.rs` `run()` for the terminal setup/teardown
//! and `terminal.draw` loop shape, entirely regeneralized: the teacher reads
//! a VT100 screen straight out of in-process `vt100::Parser`s it owns,
//! whereas here every pane's content comes from `ShimClient`'s reconstructed
//! `TerminalState`, and panes are spawned lazily against the layout tree
//! instead of eagerly in `create_window`.

use std::collections::HashMap;
use std::io;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use crossterm::event::{self, Event, KeyEventKind};
use crossterm::execute;
use crossterm::terminal::{disable_raw_mode, enable_raw_mode, EnterAlternateScreen, LeaveAlternateScreen};
use ratatui::backend::CrosstermBackend;
use ratatui::Terminal;
use serde_json::{json, Value};

use crate::cell::Row;
use crate::client::ShimClient;
use crate::config::Config;
use crate::control::{resolve_selector, format_capture, CaptureFormat, ControlBackend, ControlServer, PaneSelector};
use crate::copy_mode::{total_lines, CopyEngine, LineSource, Position, SelectionMode};
use crate::error::{OpenmuxError, Result};
use crate::keymode::{KeyOutcome, KeyRouter, Mode as RouterMode, RouterAction};
use crate::layout::{Action, FocusTarget, LayoutState, PaneId, Rectangle, SplitDirection, Workspace};
use crate::rendering::{self, PaneView};
use crate::session::{AutoSaver, Session, SessionStore};

const TICK: Duration = Duration::from_millis(25);

enum PendingConfirm {
    ClosePane(PaneId),
}

/// Everything the UI process owns, guarded by one mutex so the render loop
/// and the control socket's accept threads can share it without the layout
/// engine or the shim client needing to know about either caller.
struct App {
    config: Config,
    store: SessionStore,
    session: Session,
    shim: ShimClient,
    layout: LayoutState,
    router: KeyRouter,
    copy_engines: HashMap<PaneId, CopyEngine>,
    status: String,
    auto_saver: AutoSaver,
    pending_confirm: Option<PendingConfirm>,
    should_detach: bool,
}

pub fn run(session_name: Option<String>) -> Result<()> {
    let config = Config::load();
    let store = SessionStore::new();
    let now = now_ms();

    let session = match session_name {
        Some(name) => find_or_create_named(&store, &name, now)?,
        None => load_active_or_create(&store, now)?,
    };

    let exe_path = std::env::current_exe().map_err(OpenmuxError::Io)?;
    let client_id = format!("ui-{}", std::process::id());
    let shim = ShimClient::connect_or_spawn(&client_id, &exe_path)?;

    let mut terminal = setup_terminal().map_err(OpenmuxError::Io)?;
    let size = terminal.size().map_err(OpenmuxError::Io)?;
    let viewport = Rectangle { x: 0, y: 0, width: size.width, height: size.height.saturating_sub(1) };

    let mut layout = LayoutState::new(config.layout.clone(), viewport);
    let workspaces: Vec<Workspace> = session.workspaces.values().cloned().collect();
    layout.dispatch(Action::LoadSession(workspaces, session.active_workspace_id));

    let auto_saver = AutoSaver::new(config.session.auto_save_interval_ms, now, layout.layout_version);

    let app = Arc::new(Mutex::new(App {
        config,
        store,
        session,
        shim,
        layout,
        router: KeyRouter::new(),
        copy_engines: HashMap::new(),
        status: String::new(),
        auto_saver,
        pending_confirm: None,
        should_detach: false,
    }));

    // Best-effort: another UI may already hold the control socket (e.g. an
    // earlier attach that hasn't exited yet). The CLI falls back to the disk
    // store for session.create/list in that case, so failing to bind here is
    // not fatal to this attach.
    let _ = ControlServer::spawn(app.clone());

    let result = event_loop(&app, &mut terminal);

    {
        let mut app = app.lock().expect("app mutex poisoned");
        app.persist_session();
    }
    teardown_terminal(&mut terminal).map_err(OpenmuxError::Io)?;
    result
}

fn event_loop(app: &Arc<Mutex<App>>, terminal: &mut Terminal<CrosstermBackend<io::Stdout>>) -> Result<()> {
    loop {
        {
            let mut app = app.lock().expect("app mutex poisoned");
            app.shim.pump();
            if app.shim.is_detached() {
                app.status = "shim detached".to_string();
            }
            app.spawn_pending_ptys();
            app.maybe_autosave();

            if app.should_detach {
                return Ok(());
            }

            terminal.draw(|f| app.draw(f)).map_err(OpenmuxError::Io)?;
        }

        if event::poll(TICK).map_err(OpenmuxError::Io)? {
            let ev = event::read().map_err(OpenmuxError::Io)?;
            let mut app = app.lock().expect("app mutex poisoned");
            match ev {
                Event::Key(key) if key.kind == KeyEventKind::Press || key.kind == KeyEventKind::Repeat => {
                    app.handle_key(key);
                }
                Event::Resize(cols, rows) => {
                    app.layout.dispatch(Action::SetViewport(Rectangle { x: 0, y: 0, width: cols, height: rows.saturating_sub(1) }));
                }
                _ => {}
            }
            if app.should_detach {
                return Ok(());
            }
        }
    }
}

impl App {
    fn focused_pty(&self) -> Option<String> {
        let ws = self.layout.active_workspace();
        let id = ws.focused_pane_id?;
        ws.all_pane_ids().contains(&id).then(|| ())?;
        self.leaf_pty(self.layout.active_workspace().id, id)
    }

    fn leaf_pty(&self, workspace_id: u8, pane_id: PaneId) -> Option<String> {
        self.layout.workspaces.get(&workspace_id)?.find_leaf(pane_id)?.pty_id.clone()
    }

    fn handle_key(&mut self, key: crossterm::event::KeyEvent) {
        let app_cursor = self
            .focused_pty()
            .and_then(|id| self.shim.get_emulator_sync(&id))
            .map(|s| s.mode_flags.application_cursor_keys)
            .unwrap_or(false);

        let outcome = self.router.handle(key, app_cursor);
        match outcome {
            KeyOutcome::Forward(bytes) => {
                if !bytes.is_empty() {
                    if let Some(pty) = self.focused_pty() {
                        self.shim.write_input(&pty, bytes);
                    }
                }
            }
            KeyOutcome::Handled(actions) => {
                for action in actions {
                    self.apply_router_action(action, key);
                }
            }
        }
    }

    fn apply_router_action(&mut self, action: RouterAction, raw_key: crossterm::event::KeyEvent) {
        match action {
            RouterAction::Layout(layout_action) => self.layout.dispatch(layout_action),
            RouterAction::EnterMode(RouterMode::Confirm) => {
                if let Some(focused) = self.layout.active_workspace().focused_pane_id {
                    self.pending_confirm = Some(PendingConfirm::ClosePane(focused));
                }
            }
            RouterAction::EnterMode(_) => {}
            RouterAction::ExitToNormal => {
                self.copy_engines.clear();
            }
            RouterAction::SubmitSearch(query) => self.run_search(&query),
            RouterAction::SearchInput(partial) => {
                self.status = format!("search: {partial}");
            }
            RouterAction::SubmitConfirm(true) => {
                if let Some(PendingConfirm::ClosePane(id)) = self.pending_confirm.take() {
                    self.close_pane(id);
                }
            }
            RouterAction::SubmitConfirm(false) => {
                self.pending_confirm = None;
            }
            RouterAction::CopyModeKey(key) => self.handle_copy_key(key),
            RouterAction::ToggleCopyMode => self.toggle_copy_mode(),
            RouterAction::Detach => self.should_detach = true,
            RouterAction::Quit => self.should_detach = true,
        }
        let _ = raw_key;
    }

    fn close_pane(&mut self, pane_id: PaneId) {
        let workspace_id = self.layout.active_workspace().id;
        if let Some(pty_id) = self.leaf_pty(workspace_id, pane_id) {
            let _ = self.shim.destroy(&pty_id);
        }
        self.copy_engines.remove(&pane_id);
        self.layout.dispatch(Action::ClosePane(pane_id));
    }

    fn toggle_copy_mode(&mut self) {
        let Some(focused) = self.layout.active_workspace().focused_pane_id else { return };
        if self.copy_engines.contains_key(&focused) {
            self.copy_engines.remove(&focused);
            self.router.force_mode(RouterMode::Normal);
            return;
        }
        let Some(pty_id) = self.focused_pty() else { return };
        let Some(state) = self.shim.get_emulator_sync(&pty_id) else { return };
        let scrollback = state.scroll.scrollback_length;
        let cursor_y = scrollback + state.cursor.y as u64;
        self.copy_engines.insert(focused, CopyEngine::new(Position { x: state.cursor.x, y: cursor_y }));
        self.router.force_mode(RouterMode::Copy);
    }

    fn handle_copy_key(&mut self, key: crossterm::event::KeyEvent) {
        use crossterm::event::KeyCode;

        let Some(focused) = self.layout.active_workspace().focused_pane_id else { return };
        let Some(pty_id) = self.focused_pty() else { return };
        let Some(mut engine) = self.copy_engines.remove(&focused) else { return };

        {
            let mut source = ShimLineSource { shim: &mut self.shim, pty_id: pty_id.clone() };
            match key.code {
                KeyCode::Char('h') | KeyCode::Left => engine.move_left(),
                KeyCode::Char('l') | KeyCode::Right => engine.move_right(&source),
                KeyCode::Char('k') | KeyCode::Up => engine.move_up(),
                KeyCode::Char('j') | KeyCode::Down => engine.move_down(&source),
                KeyCode::Char('w') => engine.move_word_forward(&mut source, false),
                KeyCode::Char('W') => engine.move_word_forward(&mut source, true),
                KeyCode::Char('b') => engine.move_word_backward(&mut source, false),
                KeyCode::Char('B') => engine.move_word_backward(&mut source, true),
                KeyCode::Char('e') => engine.move_word_end(&mut source, false),
                KeyCode::Char('E') => engine.move_word_end(&mut source, true),
                KeyCode::Char('0') => engine.move_to_line_start(),
                KeyCode::Char('$') => engine.move_to_line_end(&mut source),
                KeyCode::Char('^') => engine.move_to_first_non_blank(&mut source),
                KeyCode::Char('g') => engine.move_top(),
                KeyCode::Char('G') => engine.move_bottom(&source),
                KeyCode::Char('v') => engine.start_selection(SelectionMode::Char),
                KeyCode::Char('V') => engine.start_selection(SelectionMode::Line),
                KeyCode::Char(c) if c == '\u{16}' => engine.start_selection(SelectionMode::Block),
                KeyCode::Enter => {
                    if engine.selection_active() {
                        let text = engine.extract(&mut source);
                        self.status = format!("copied {} bytes", text.len());
                    }
                }
                _ => {}
            }
        }

        self.copy_engines.insert(focused, engine);
    }

    fn run_search(&mut self, query: &str) {
        if query.is_empty() {
            self.status.clear();
            return;
        }
        let Some(pty_id) = self.focused_pty() else { return };
        let Some(state) = self.shim.get_emulator_sync(&pty_id) else { return };
        let total = state.scroll.scrollback_length + state.rows as u64;
        let mut found = None;
        for offset in (0..total).rev() {
            if let Some(row) = self.line_at(&pty_id, offset) {
                let text: String = row.iter().filter(|c| c.width != 0).map(crate::cell::Cell::ch).collect();
                if text.contains(query) {
                    found = Some(offset);
                    break;
                }
            }
        }
        self.status = match found {
            Some(offset) => format!("/{query} found at line {offset}"),
            None => format!("/{query} not found"),
        };
    }

    fn line_at(&mut self, pty_id: &str, absolute: u64) -> Option<Row> {
        let mut source = ShimLineSource { shim: &mut self.shim, pty_id: pty_id.to_string() };
        source.get_line(absolute)
    }

    /// Spawns a PTY for every leaf in the active workspace that doesn't have
    /// one yet (restored sessions, template instantiation, freshly split
    /// panes), then registers the pane/pty pair with the shim's mapping
    /// table (spec §4.H "lazy adopt-or-create").
    fn spawn_pending_ptys(&mut self) {
        let workspace_id = self.layout.active_workspace().id;
        let rects = self.layout.geometry();
        let pane_ids = self.layout.active_workspace().all_pane_ids();
        let session_numeric = numeric_session_id(&self.session.metadata.id);

        for pane_id in pane_ids {
            let needs_spawn = self
                .layout
                .workspaces
                .get(&workspace_id)
                .and_then(|ws| ws.find_leaf(pane_id))
                .map(|leaf| leaf.pty_id.is_none())
                .unwrap_or(false);
            if !needs_spawn {
                continue;
            }
            let rect = rects.get(&pane_id).copied().unwrap_or(Rectangle { x: 0, y: 0, width: 80, height: 24 });
            let (cols, rows) = (rect.width.max(1), rect.height.max(1));
            let (cwd, command) = self
                .layout
                .workspaces
                .get(&workspace_id)
                .and_then(|ws| ws.find_leaf(pane_id))
                .map(|leaf| (leaf.pending_cwd.clone(), leaf.pending_command.clone()))
                .unwrap_or((None, None));
            let cwd = cwd.or_else(default_pane_cwd);

            let Ok(pty_id) = self.shim.create_pty(cols, rows, cwd.as_deref()) else { continue };
            if let Some(cmd) = command {
                self.shim.write_input(&pty_id, format!("{cmd}\n").into_bytes());
            }
            let _ = self.shim.register_pane(session_numeric, pane_id, &pty_id);
            if let Some(leaf) = self.layout.find_leaf_mut(workspace_id, pane_id) {
                leaf.pty_id = Some(pty_id);
                leaf.pending_cwd = None;
                leaf.pending_command = None;
            }
        }
    }

    fn maybe_autosave(&mut self) {
        let now = now_ms();
        if self.auto_saver.should_save(now, self.layout.layout_version) {
            self.persist_session();
        }
    }

    fn persist_session(&mut self) {
        self.session.workspaces = self.layout.workspaces.clone();
        self.session.active_workspace_id = self.layout.active_workspace_id;
        let _ = self.store.save(&self.session);
    }

    fn draw(&mut self, f: &mut ratatui::Frame) {
        let full_area = f.area();
        let ws = self.layout.active_workspace();
        let rects = self.layout.geometry();
        let focused = ws.focused_pane_id;
        let workspace_id = ws.id;

        let mut states = HashMap::new();
        for pane_id in ws.all_pane_ids() {
            if let Some(pty_id) = self.leaf_pty(workspace_id, pane_id) {
                if let Some(state) = self.shim.get_terminal_state_sync(&pty_id) {
                    states.insert(pane_id, state);
                }
            }
        }

        let views: Vec<PaneView> = ws
            .all_pane_ids()
            .into_iter()
            .filter_map(|pane_id| {
                let rect = rects.get(&pane_id).copied()?;
                let title = self
                    .layout
                    .workspaces
                    .get(&workspace_id)
                    .and_then(|w| w.find_leaf(pane_id))
                    .and_then(|leaf| leaf.title.clone())
                    .unwrap_or_else(|| format!("pane {pane_id}"));
                Some(PaneView { pane_id, rectangle: rect, title, focused: Some(pane_id) == focused, state: states.get(&pane_id) })
            })
            .collect();

        let status = self.status_line();
        rendering::render(f, full_area, &views, &self.config.theme, &status);
    }

    fn status_line(&self) -> String {
        if !self.status.is_empty() {
            return self.status.clone();
        }
        format!(
            "[{}] workspace {} · {:?}",
            self.session.metadata.name,
            self.layout.active_workspace_id,
            self.router.mode()
        )
    }
}

/// Adapts `ShimClient`'s async scrollback fetch + sync live-row cache onto
/// `copy_mode::LineSource` (spec §4.K's seam).
struct ShimLineSource<'a> {
    shim: &'a mut ShimClient,
    pty_id: String,
}

impl LineSource for ShimLineSource<'_> {
    fn cols(&self) -> u32 {
        self.shim.get_emulator_sync(&self.pty_id).map(|s| s.cols).unwrap_or(0)
    }

    fn rows(&self) -> u32 {
        self.shim.get_emulator_sync(&self.pty_id).map(|s| s.rows).unwrap_or(0)
    }

    fn scrollback_length(&self) -> u64 {
        self.shim.get_emulator_sync(&self.pty_id).map(|s| s.scroll.scrollback_length).unwrap_or(0)
    }

    fn get_line(&mut self, absolute: u64) -> Option<Row> {
        let scrollback_length = self.scrollback_length();
        if absolute < scrollback_length {
            if let Some(row) = self.shim.cached_scrollback_line(&self.pty_id, absolute) {
                return Some(row);
            }
            let start = absolute.saturating_sub(8);
            let _ = self.shim.get_scrollback_lines(&self.pty_id, start, 32);
            return self.shim.cached_scrollback_line(&self.pty_id, absolute);
        }
        let live_idx = (absolute - scrollback_length) as usize;
        self.shim.get_emulator_sync(&self.pty_id).and_then(|s| s.cached_rows.get(live_idx).cloned())
    }
}

impl ControlBackend for App {
    fn session_create(&mut self, name: Option<String>) -> Result<Value> {
        let session = self.store.create(name, now_ms())?;
        Ok(json!({"sessionId": session.metadata.id, "name": session.metadata.name}))
    }

    fn session_list(&mut self) -> Result<Value> {
        let sessions: Vec<Value> = self
            .store
            .list()
            .into_iter()
            .map(|s| json!({"id": s.id, "name": s.name, "autoNamed": s.auto_named}))
            .collect();
        Ok(json!({"sessions": sessions}))
    }

    fn pane_split(&mut self, direction: SplitDirection, workspace_id: Option<u8>, pane: Option<&str>) -> Result<Value> {
        let selector = PaneSelector::parse(pane)?;
        let (wid, pane_id) = resolve_selector(&self.layout.workspaces, self.layout.active_workspace_id, workspace_id, &selector)?;
        if wid != self.layout.active_workspace_id {
            self.layout.dispatch(Action::SwitchWorkspace(wid));
        }
        self.layout.dispatch(Action::Focus(FocusTarget::Id(pane_id)));
        self.layout.dispatch(Action::SplitPane(direction));
        let new_focused = self.layout.active_workspace().focused_pane_id;
        Ok(json!({"workspaceId": wid, "paneId": new_focused}))
    }

    fn pane_send(&mut self, text: String, workspace_id: Option<u8>, pane: Option<&str>) -> Result<Value> {
        let selector = PaneSelector::parse(pane)?;
        let (wid, pane_id) = resolve_selector(&self.layout.workspaces, self.layout.active_workspace_id, workspace_id, &selector)?;
        let pty_id = self.leaf_pty(wid, pane_id).ok_or_else(|| OpenmuxError::not_found("pane has no running process"))?;
        self.shim.write_input(&pty_id, text.into_bytes());
        Ok(json!({"ok": true}))
    }

    fn pane_capture(
        &mut self,
        lines: u32,
        format: CaptureFormat,
        raw: bool,
        workspace_id: Option<u8>,
        pane: Option<&str>,
    ) -> Result<Value> {
        let selector = PaneSelector::parse(pane)?;
        let (wid, pane_id) = resolve_selector(&self.layout.workspaces, self.layout.active_workspace_id, workspace_id, &selector)?;
        let pty_id = self.leaf_pty(wid, pane_id).ok_or_else(|| OpenmuxError::not_found("pane has no running process"))?;

        let state = self.shim.get_emulator_sync(&pty_id).ok_or_else(|| OpenmuxError::not_found("pane has no cached state yet"))?;
        let total = total_lines_from(state.scroll.scrollback_length, state.rows);
        let start = total.saturating_sub(lines as u64);

        let mut source = ShimLineSource { shim: &mut self.shim, pty_id };
        let rows: Vec<Row> = (start..total).map(|i| source.get_line(i).unwrap_or_default()).collect();
        let text = format_capture(&rows, format, raw);
        Ok(json!({"text": text}))
    }
}

fn total_lines_from(scrollback_length: u64, rows: u32) -> u64 {
    scrollback_length + rows as u64
}

fn find_or_create_named(store: &SessionStore, name: &str, now: i64) -> Result<Session> {
    if let Some(meta) = store.list().into_iter().find(|m| m.name == name) {
        return store.load(&meta.id);
    }
    store.create(Some(name.to_string()), now)
}

fn load_active_or_create(store: &SessionStore, now: i64) -> Result<Session> {
    match store.active_session_id() {
        Some(id) => store.load(&id).or_else(|_| store.create(None, now)),
        None => store.create(None, now),
    }
}

/// Derives the `u64` session key the shim's mapping table uses from the
/// session store's string id (`"s12"` -> `12`); falls back to `0` for
/// anything that doesn't carry a trailing number (shouldn't happen for ids
/// minted by `SessionStore::create`, but keeps this infallible).
fn numeric_session_id(id: &str) -> u64 {
    id.trim_start_matches(|c: char| !c.is_ascii_digit()).parse().unwrap_or(0)
}

/// Fallback cwd for a freshly-created pane with no `pending_cwd` of its own:
/// `OPENMUX_ORIGINAL_CWD` (set by a wrapper that `cd`s before exec-ing into
/// the UI process) takes priority over the UI process's own cwd.
fn default_pane_cwd() -> Option<String> {
    std::env::var("OPENMUX_ORIGINAL_CWD")
        .ok()
        .or_else(|| std::env::current_dir().ok().map(|p| p.to_string_lossy().into_owned()))
}

fn now_ms() -> i64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or(0)
}

fn setup_terminal() -> io::Result<Terminal<CrosstermBackend<io::Stdout>>> {
    let mut stdout = io::stdout();
    enable_raw_mode()?;
    execute!(stdout, EnterAlternateScreen)?;
    Terminal::new(CrosstermBackend::new(stdout))
}

fn teardown_terminal(terminal: &mut Terminal<CrosstermBackend<io::Stdout>>) -> io::Result<()> {
    disable_raw_mode()?;
    execute!(terminal.backend_mut(), LeaveAlternateScreen)?;
    terminal.show_cursor()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn numeric_session_id_extracts_trailing_digits() {
        assert_eq!(numeric_session_id("s12"), 12);
        assert_eq!(numeric_session_id("session-7"), 7);
        assert_eq!(numeric_session_id("no-digits"), 0);
    }
}
