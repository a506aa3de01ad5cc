//! Component D — spawns and owns a PTY, feeds its byte stream to a VT
//! emulator, and produces `DirtyUpdate`s plus scrollback-archive appends
//! (spec §4.D).

mod emulator;

pub use emulator::{Emulator, EmulatorEvents, Vt100Emulator};

use std::collections::HashMap;
use std::io::{Read, Write};
use std::sync::mpsc::Receiver;
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

use portable_pty::{native_pty_system, CommandBuilder, MasterPty, PtySize};

use crate::cell::{Cell, DirtyUpdate, ModeFlags, Row, ScrollState, TerminalState};
use crate::error::{OpenmuxError, Result};
use crate::scrollback::{ScrollbackArchive, ScrollbackConfig};

pub type PtyId = String;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PtyPhase {
    Running,
    Suspended,
    Dead,
}

/// Everything a subscriber needs to know about about a PTY update (spec §3
/// `DirtyUpdate` plus the lifecycle/title side channels).
pub enum PtyEvent {
    Update(DirtyUpdate),
    Exit { code: i32 },
    Title(String),
    Kitty(Vec<u8>),
}

pub struct SpawnOptions {
    pub cols: u16,
    pub rows: u16,
    pub cwd: Option<String>,
    pub shell: Option<String>,
    pub env: Vec<(String, String)>,
}

impl Default for SpawnOptions {
    fn default() -> Self {
        SpawnOptions { cols: 80, rows: 24, cwd: None, shell: None, env: Vec::new() }
    }
}

/// One PTY: its master fd, its emulator, its durable scrollback archive and
/// its current lifecycle phase. Owned exclusively by the shim server's
/// per-PTY task (spec §5 "Shared resources").
pub struct PtySession {
    pub id: PtyId,
    pub pid: u32,
    pub cwd: Option<String>,
    pub shell: String,
    pub exit_code: Option<i32>,
    phase: PtyPhase,
    master: Box<dyn MasterPty + Send>,
    writer: Box<dyn Write + Send>,
    emulator: Arc<Mutex<Vt100Emulator>>,
    archive: ScrollbackArchive,
    last_state: TerminalState,
    cols: u16,
    rows: u16,
    events_rx: Receiver<HostEvent>,
}

enum HostEvent {
    Data(Vec<u8>),
    Exit(i32),
    Err,
}

impl PtySession {
    pub fn spawn(id: PtyId, opts: SpawnOptions, archive_dir: impl Into<std::path::PathBuf>) -> Result<Self> {
        let pty_system = native_pty_system();
        let size = PtySize { rows: opts.rows, cols: opts.cols, pixel_width: 0, pixel_height: 0 };
        let pair = pty_system
            .openpty(size)
            .map_err(|e| OpenmuxError::internal(format!("openpty: {e}")))?;

        let shell = opts.shell.clone().unwrap_or_else(default_shell);
        let mut cmd = CommandBuilder::new(&shell);
        if let Some(cwd) = &opts.cwd {
            cmd.cwd(cwd);
        }
        for (k, v) in &opts.env {
            cmd.env(k, v);
        }

        let child = pair
            .slave
            .spawn_command(cmd)
            .map_err(|e| OpenmuxError::internal(format!("spawn: {e}")))?;
        let pid = child.process_id().unwrap_or(0);
        drop(pair.slave);

        let writer = pair
            .master
            .take_writer()
            .map_err(|e| OpenmuxError::internal(format!("take_writer: {e}")))?;
        let mut reader = pair
            .master
            .try_clone_reader()
            .map_err(|e| OpenmuxError::internal(format!("clone_reader: {e}")))?;

        let (tx, rx) = std::sync::mpsc::channel::<HostEvent>();
        let mut child = child;
        let exit_tx = tx.clone();
        thread::spawn(move || {
            let status = child.wait();
            let code = status.map(|s| if s.success() { 0 } else { 1 }).unwrap_or(1);
            let _ = exit_tx.send(HostEvent::Exit(code));
        });
        thread::spawn(move || {
            let mut buf = [0u8; 65536];
            loop {
                match reader.read(&mut buf) {
                    Ok(0) => {
                        let _ = tx.send(HostEvent::Err);
                        break;
                    }
                    Ok(n) => {
                        if tx.send(HostEvent::Data(buf[..n].to_vec())).is_err() {
                            break;
                        }
                    }
                    Err(_) => {
                        let _ = tx.send(HostEvent::Err);
                        break;
                    }
                }
            }
        });

        let emulator = Arc::new(Mutex::new(Vt100Emulator::new(opts.cols, opts.rows)));
        let last_state = emulator.lock().unwrap().state();
        let archive = ScrollbackArchive::open(archive_dir, ScrollbackConfig::default())?;

        Ok(PtySession {
            id,
            pid,
            cwd: opts.cwd,
            shell,
            exit_code: None,
            phase: PtyPhase::Running,
            master: pair.master,
            writer,
            emulator,
            archive,
            last_state,
            cols: opts.cols,
            rows: opts.rows,
            events_rx: rx,
        })
    }

    pub fn phase(&self) -> &PtyPhase {
        &self.phase
    }

    pub fn suspend(&mut self) {
        if self.phase == PtyPhase::Running {
            self.phase = PtyPhase::Suspended;
        }
    }

    /// Resume rebuilds subscriptions (handled by the caller's registry) and
    /// returns a full-state snapshot to push immediately (spec §4.D).
    pub fn resume(&mut self) -> DirtyUpdate {
        self.phase = PtyPhase::Running;
        self.full_snapshot()
    }

    pub fn write(&mut self, data: &[u8]) -> Result<()> {
        self.writer.write_all(data).map_err(OpenmuxError::Io)
    }

    pub fn resize(&mut self, cols: u16, rows: u16) -> Result<()> {
        self.cols = cols;
        self.rows = rows;
        self.master
            .resize(PtySize { rows, cols, pixel_width: 0, pixel_height: 0 })
            .map_err(|e| OpenmuxError::internal(format!("resize: {e}")))?;
        self.emulator.lock().unwrap().resize(cols, rows);
        Ok(())
    }

    /// Best-effort live cwd via `/proc/<pid>/cwd`; falls back to the spawn
    /// cwd when the pid has already exited or `/proc` isn't available.
    pub fn get_cwd(&self) -> Option<String> {
        std::fs::read_link(format!("/proc/{}/cwd", self.pid))
            .ok()
            .and_then(|p| p.to_str().map(str::to_string))
            .or_else(|| self.cwd.clone())
    }

    /// Drains queued reader-thread events, feeds them through the emulator
    /// and returns the resulting dirty update plus any title/exit/kitty
    /// events, or `None` if nothing has happened since the last poll.
    pub fn poll(&mut self) -> (Option<DirtyUpdate>, Vec<PtyEvent>) {
        let mut batch = Vec::new();
        let mut exited: Option<i32> = None;
        while let Ok(ev) = self.events_rx.try_recv() {
            match ev {
                HostEvent::Data(bytes) => batch.extend(bytes),
                HostEvent::Exit(code) => exited = Some(code),
                HostEvent::Err => exited = exited.or(Some(1)),
            }
        }

        let mut side_events = Vec::new();
        if !batch.is_empty() {
            let events = {
                let mut emu = self.emulator.lock().unwrap();
                emu.write(&batch)
            };
            if let Some(title) = events.title {
                side_events.push(PtyEvent::Title(title));
            }
            for g in events.kitty_graphics {
                side_events.push(PtyEvent::Kitty(g));
            }
        }

        let dirty = if batch.is_empty() && exited.is_none() {
            None
        } else {
            Some(self.compute_dirty_update())
        };

        if let Some(code) = exited {
            self.exit_code = Some(code);
            self.phase = PtyPhase::Dead;
            side_events.push(PtyEvent::Exit { code });
        }

        (dirty, side_events)
    }

    fn compute_dirty_update(&mut self) -> DirtyUpdate {
        let new_state = self.emulator.lock().unwrap().state();
        self.archive_scrolled_rows(&new_state);

        let mut dirty_rows = std::collections::BTreeMap::new();
        if new_state.cols == self.last_state.cols && new_state.rows == self.last_state.rows {
            for (i, (old_row, new_row)) in self.last_state.cells.iter().zip(new_state.cells.iter()).enumerate() {
                if old_row != new_row {
                    dirty_rows.insert(i as u16, new_row.clone());
                }
            }
        }

        let scroll = ScrollState { viewport_offset: 0, scrollback_length: self.archive.length() };
        let update = DirtyUpdate {
            dirty_rows,
            cursor: new_state.cursor,
            scroll,
            cols: new_state.cols,
            rows: new_state.rows,
            is_full: false,
            full_state: None,
            mode_flags: new_state.mode_flags,
            in_band_resize: false,
        };
        self.last_state = new_state;
        update
    }

    /// Detects rows that scrolled off the top of the viewport by matching
    /// the previous grid's tail against the new grid's head, and archives
    /// them. `vt100` exposes no eviction callback, so this leading-row match
    /// is the simplest correct way to bolt a durable archive onto it.
    fn archive_scrolled_rows(&mut self, new_state: &TerminalState) {
        if new_state.cols != self.last_state.cols || new_state.rows != self.last_state.rows {
            return;
        }
        let n = new_state.rows as usize;
        if n == 0 {
            return;
        }
        let mut shift = 0usize;
        for k in 1..n {
            if self.last_state.cells[k..] == new_state.cells[..n - k] {
                shift = k;
            }
        }
        if shift > 0 {
            let evicted: Vec<Row> = self.last_state.cells[..shift].to_vec();
            let _ = self.archive.append(&evicted);
        }
    }

    pub fn full_snapshot(&mut self) -> DirtyUpdate {
        let state = self.emulator.lock().unwrap().state();
        self.last_state = state.clone();
        DirtyUpdate {
            dirty_rows: Default::default(),
            cursor: state.cursor,
            scroll: ScrollState { viewport_offset: 0, scrollback_length: self.archive.length() },
            cols: state.cols,
            rows: state.rows,
            is_full: true,
            full_state: Some(state),
            mode_flags: ModeFlags::default(),
            in_band_resize: false,
        }
    }

    pub fn scroll_length(&self) -> u64 {
        self.archive.length()
    }

    pub fn archive_bytes(&self) -> u64 {
        self.archive.bytes()
    }

    pub fn archive_oldest_created_at(&self) -> Option<chrono::DateTime<chrono::Utc>> {
        self.archive.oldest_created_at()
    }

    pub fn drop_oldest_scrollback_chunk(&mut self) -> Result<()> {
        self.archive.drop_oldest_chunk()
    }

    /// Routes a scrollback read to the archive or the live emulator
    /// depending on which owns `offset`: archive lines come first (spec
    /// §4.D).
    pub fn get_scrollback_line(&mut self, offset: u64) -> Option<Row> {
        let archive_len = self.archive.length();
        if offset < archive_len {
            self.archive.get_line(offset)
        } else {
            let live_idx = (offset - archive_len) as usize;
            self.last_state.cells.get(live_idx).cloned()
        }
    }

    pub fn dispose(&mut self) -> Result<()> {
        self.archive.dispose()
    }

    /// Walks the process tree rooted at the shell pid to find the foreground
    /// command, falling back to the shell itself (spec §4.D "foreground
    /// process" — what the status line names when no descendant is running).
    pub fn foreground_process(&self) -> Option<ForegroundProcess> {
        foreground_process(self.pid)
    }

    /// Scans scrollback + live rows (newest first) for lines matching
    /// `query` as a regex, per the shim's `search` method (spec §4.E).
    /// Returns up to `limit` matches and whether more exist beyond them.
    pub fn search(&mut self, query: &str, limit: usize) -> Result<(Vec<SearchMatch>, bool)> {
        let re = regex::Regex::new(query).map_err(|e| OpenmuxError::invalid(format!("bad search pattern: {e}")))?;
        let total = self.archive.length() + self.rows as u64;
        let mut matches = Vec::new();
        let mut has_more = false;
        for offset in (0..total).rev() {
            let Some(row) = self.get_scrollback_line(offset) else { continue };
            let text: String = row.iter().filter(|c| c.width != 0).map(Cell::ch).collect();
            if re.is_match(&text) {
                if matches.len() >= limit {
                    has_more = true;
                    break;
                }
                matches.push(SearchMatch { offset, text });
            }
        }
        Ok((matches, has_more))
    }
}

pub struct SearchMatch {
    pub offset: u64,
    pub text: String,
}

/// The process a shell pid's tree is currently running in the foreground.
#[derive(Debug, Clone)]
pub struct ForegroundProcess {
    pub pid: u32,
    pub name: String,
}

/// Finds the foreground descendant of `root_pid` (falling back to `root_pid`
/// itself when it has none) and reads its `comm` name.
fn foreground_process(root_pid: u32) -> Option<ForegroundProcess> {
    let pid = find_foreground_child_pid(root_pid).unwrap_or(root_pid);
    process_name(pid).map(|name| ForegroundProcess { pid, name })
}

fn process_name(pid: u32) -> Option<String> {
    std::fs::read_to_string(format!("/proc/{pid}/comm")).ok().map(|s| s.trim().to_string())
}

/// Parent pid from `/proc/<pid>/stat`'s third field, skipping past the
/// executable name (which may itself contain spaces/parens) by looking for
/// the last `)`.
fn process_ppid(pid: u32) -> Option<u32> {
    let stat = std::fs::read_to_string(format!("/proc/{pid}/stat")).ok()?;
    let rparen = stat.rfind(')')?;
    stat[rparen + 1..].split_whitespace().nth(1)?.parse().ok()
}

/// Walks the process tree from `root_pid` downward and returns the pid most
/// likely to be the user's foreground command: BFS every descendant, then
/// prefer a leaf (no children of its own) over an interior process, deepest
/// first with largest pid as tiebreaker.
fn find_foreground_child_pid(root_pid: u32) -> Option<u32> {
    let entries: Vec<(u32, u32)> = std::fs::read_dir("/proc")
        .ok()?
        .filter_map(|e| e.ok())
        .filter_map(|e| e.file_name().to_str()?.parse::<u32>().ok())
        .filter_map(|pid| process_ppid(pid).map(|ppid| (pid, ppid)))
        .collect();

    let mut descendants: Vec<(u32, u32)> = Vec::new();
    let mut queue = vec![(root_pid, 0u32)];
    let mut head = 0;
    while head < queue.len() {
        let (parent, depth) = queue[head];
        head += 1;
        for &(pid, ppid) in &entries {
            if ppid == parent && pid != root_pid && !descendants.iter().any(|(p, _)| *p == pid) {
                descendants.push((pid, depth + 1));
                queue.push((pid, depth + 1));
            }
        }
    }
    if descendants.is_empty() {
        return None;
    }

    let desc_pids: std::collections::HashSet<u32> = descendants.iter().map(|(p, _)| *p).collect();
    let leaves: Vec<(u32, u32)> =
        descendants.iter().copied().filter(|(pid, _)| !entries.iter().any(|(ep, eppid)| eppid == pid && desc_pids.contains(ep))).collect();
    let pool = if !leaves.is_empty() { leaves } else { descendants };

    pool.into_iter().max_by(|a, b| a.1.cmp(&b.1).then(a.0.cmp(&b.0))).map(|(pid, _)| pid)
}

/// Resolves the shell to spawn when a pane doesn't request one explicitly:
/// `$SHELL`, falling back to the first of `bash`/`zsh`/`sh` found on `PATH`.
fn default_shell() -> String {
    if let Ok(shell) = std::env::var("SHELL") {
        if !shell.is_empty() {
            return shell;
        }
    }
    for candidate in ["bash", "zsh", "sh"] {
        if let Ok(path) = which::which(candidate) {
            return path.to_string_lossy().into_owned();
        }
    }
    "/bin/sh".to_string()
}

/// Registry of all live PTYs, keyed by id. Owned exclusively by the shim
/// server (spec §5).
pub struct PtyRegistry {
    sessions: HashMap<PtyId, PtySession>,
    next_id: u64,
}

impl Default for PtyRegistry {
    fn default() -> Self {
        PtyRegistry { sessions: HashMap::new(), next_id: 0 }
    }
}

impl PtyRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fresh_id(&mut self) -> PtyId {
        let id = format!("pty-{}", self.next_id);
        self.next_id += 1;
        id
    }

    pub fn insert(&mut self, session: PtySession) {
        self.sessions.insert(session.id.clone(), session);
    }

    pub fn get(&self, id: &str) -> Option<&PtySession> {
        self.sessions.get(id)
    }

    pub fn get_mut(&mut self, id: &str) -> Option<&mut PtySession> {
        self.sessions.get_mut(id)
    }

    pub fn remove(&mut self, id: &str) -> Option<PtySession> {
        self.sessions.remove(id)
    }

    pub fn ids(&self) -> Vec<PtyId> {
        self.sessions.keys().cloned().collect()
    }
}
