//! Component F — the shim client used by the UI process (spec §4.F):
//! connect/spawn/detach, delta-to-state reconstruction, a synchronous read
//! cache for hot UI paths, and request/response correlation.

mod pty_state;

pub use pty_state::PtyState;

use std::collections::{HashMap, VecDeque};
use std::io::{Read, Write};
use std::os::unix::net::UnixStream;
use std::process::{Command, Stdio};
use std::sync::mpsc::{channel, Receiver, Sender};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

use serde_json::{json, Value};

use crate::cell::{DirtyUpdate, Row};
use crate::error::{OpenmuxError, Result};
use crate::frame::{Frame, FrameDecoder};
use crate::paths;

const DEFAULT_TIMEOUT: Duration = Duration::from_millis(2000);
const CONNECT_RETRY_BUDGET: Duration = Duration::from_millis(3000);

enum Incoming {
    Response { id: u64, ok: bool, result: Value, error: Option<String>, payloads: Vec<Vec<u8>> },
    Event(Value, Vec<Vec<u8>>),
    Closed,
}

struct Pending {
    tx: std::sync::mpsc::SyncSender<Result<(Value, Vec<Vec<u8>>)>>,
}

pub type Unsubscribe = Box<dyn FnOnce() + Send>;

#[derive(Default)]
struct Subscribers {
    unified: Vec<(u64, Box<dyn FnMut(&str, &PtyState) + Send>)>,
    state: Vec<(u64, Box<dyn FnMut(&str, &PtyState) + Send>)>,
    scroll: Vec<(u64, Box<dyn FnMut(&str, &PtyState) + Send>)>,
    detach: Vec<(u64, Box<dyn FnOnce() + Send>)>,
    next_handle: u64,
}

/// Connects to the shim socket, reconstructs per-PTY terminal state from
/// incremental `ptyUpdate` frames, and exposes a synchronous read API for
/// selection/rendering/copy-mode hot paths (spec §4.F).
pub struct ShimClient {
    stream: UnixStream,
    next_request_id: u64,
    pending: Arc<Mutex<HashMap<u64, Pending>>>,
    states: Arc<Mutex<HashMap<String, PtyState>>>,
    subscribers: Arc<Mutex<Subscribers>>,
    incoming_rx: Receiver<Incoming>,
    detached: Arc<std::sync::atomic::AtomicBool>,
    scrollback_cache: Arc<Mutex<LruRowCache>>,
}

struct LruRowCache {
    capacity: usize,
    order: VecDeque<(String, u64)>,
    rows: HashMap<(String, u64), Row>,
}

impl LruRowCache {
    fn new(capacity: usize) -> Self {
        LruRowCache { capacity, order: VecDeque::new(), rows: HashMap::new() }
    }

    fn put(&mut self, pty_id: &str, offset: u64, row: Row) {
        let key = (pty_id.to_string(), offset);
        if !self.rows.contains_key(&key) && self.rows.len() >= self.capacity {
            if let Some(evict) = self.order.pop_front() {
                self.rows.remove(&evict);
            }
        }
        self.order.push_back(key.clone());
        self.rows.insert(key, row);
    }

    fn get(&self, pty_id: &str, offset: u64) -> Option<Row> {
        self.rows.get(&(pty_id.to_string(), offset)).cloned()
    }
}

impl ShimClient {
    /// Connects to the shim socket, spawning a detached shim process and
    /// retrying with bounded exponential backoff if nothing is listening yet
    /// (spec §4.E "Spawn").
    pub fn connect_or_spawn(client_id: &str, exe_path: &std::path::Path) -> Result<Self> {
        let path = paths::shim_socket_path();
        match Self::connect(&path, client_id) {
            Ok(client) => return Ok(client),
            Err(_) => {
                let _ = Command::new(exe_path)
                    .arg("--shim")
                    .stdin(Stdio::null())
                    .stdout(Stdio::null())
                    .stderr(Stdio::null())
                    .spawn();
            }
        }

        let start = Instant::now();
        let mut backoff = Duration::from_millis(50);
        loop {
            if let Ok(client) = Self::connect(&path, client_id) {
                return Ok(client);
            }
            if start.elapsed() > CONNECT_RETRY_BUDGET {
                return Err(OpenmuxError::internal("shim did not come up in time"));
            }
            thread::sleep(backoff);
            backoff = (backoff * 2).min(Duration::from_millis(500));
        }
    }

    pub fn connect(path: &std::path::Path, client_id: &str) -> Result<Self> {
        let stream = UnixStream::connect(path).map_err(OpenmuxError::Io)?;
        let reader_stream = stream.try_clone().map_err(OpenmuxError::Io)?;
        let (tx, rx) = channel();
        thread::spawn(move || reader_loop(reader_stream, tx));

        let mut client = ShimClient {
            stream,
            next_request_id: 0,
            pending: Arc::new(Mutex::new(HashMap::new())),
            states: Arc::new(Mutex::new(HashMap::new())),
            subscribers: Arc::new(Mutex::new(Subscribers::default())),
            incoming_rx: rx,
            detached: Arc::new(std::sync::atomic::AtomicBool::new(false)),
            scrollback_cache: Arc::new(Mutex::new(LruRowCache::new(4096))),
        };
        client.request("hello", json!({"clientId": client_id, "version": protocol_version()}), &[])?;
        Ok(client)
    }

    pub fn is_detached(&self) -> bool {
        self.detached.load(std::sync::atomic::Ordering::Acquire)
    }

    pub fn on_shim_detached(&mut self, callback: impl FnOnce() + 'static + Send) -> Unsubscribe {
        let mut subs = self.subscribers.lock().unwrap();
        let handle = subs.next_handle;
        subs.next_handle += 1;
        subs.detach.push((handle, Box::new(callback)));
        let subs_arc = self.subscribers.clone();
        Box::new(move || {
            subs_arc.lock().unwrap().detach.retain(|(h, _)| *h != handle);
        })
    }

    pub fn subscribe_unified(&mut self, callback: impl FnMut(&str, &PtyState) + 'static + Send) -> Unsubscribe {
        self.add_subscriber(SubscriberKind::Unified, callback)
    }

    pub fn subscribe_state(&mut self, callback: impl FnMut(&str, &PtyState) + 'static + Send) -> Unsubscribe {
        self.add_subscriber(SubscriberKind::State, callback)
    }

    pub fn subscribe_scroll(&mut self, callback: impl FnMut(&str, &PtyState) + 'static + Send) -> Unsubscribe {
        self.add_subscriber(SubscriberKind::Scroll, callback)
    }

    fn add_subscriber(&mut self, kind: SubscriberKind, callback: impl FnMut(&str, &PtyState) + 'static + Send) -> Unsubscribe {
        let mut subs = self.subscribers.lock().unwrap();
        let handle = subs.next_handle;
        subs.next_handle += 1;
        let boxed: Box<dyn FnMut(&str, &PtyState) + Send> = Box::new(callback);
        match kind {
            SubscriberKind::Unified => subs.unified.push((handle, boxed)),
            SubscriberKind::State => subs.state.push((handle, boxed)),
            SubscriberKind::Scroll => subs.scroll.push((handle, boxed)),
        }
        let subs_arc = self.subscribers.clone();
        Box::new(move || {
            let mut subs = subs_arc.lock().unwrap();
            subs.unified.retain(|(h, _)| *h != handle);
            subs.state.retain(|(h, _)| *h != handle);
            subs.scroll.retain(|(h, _)| *h != handle);
        })
    }

    /// Drains whatever arrived on the socket since the last call, applying
    /// `ptyUpdate`s to the cache and firing subscriber callbacks in the
    /// deterministic order the spec mandates: unified, then state, then
    /// scroll (spec §4.F).
    pub fn pump(&mut self) {
        if self.is_detached() {
            return;
        }
        while let Ok(incoming) = self.incoming_rx.try_recv() {
            match incoming {
                Incoming::Response { id, ok, result, error, payloads } => self.resolve(id, ok, result, error, payloads),
                Incoming::Event(header, payloads) => self.handle_event(header, payloads),
                Incoming::Closed => {
                    self.mark_detached();
                    return;
                }
            }
        }
    }

    fn resolve(&mut self, id: u64, ok: bool, result: Value, error: Option<String>, payloads: Vec<Vec<u8>>) {
        let mut pending = self.pending.lock().unwrap();
        if let Some(p) = pending.remove(&id) {
            let outcome = if ok {
                Ok((result, payloads))
            } else {
                Err(OpenmuxError::internal(error.unwrap_or_else(|| "request failed".into())))
            };
            let _ = p.tx.send(outcome);
        }
    }

    fn handle_event(&mut self, header: Value, payloads: Vec<Vec<u8>>) {
        let kind = header.get("type").and_then(Value::as_str).unwrap_or("");
        match kind {
            "detached" => self.mark_detached(),
            "ptyUpdate" => {
                let Some(pty_id) = header.get("ptyId").and_then(Value::as_str).map(str::to_string) else { return };
                let Ok(update) = DirtyUpdate::unpack_payloads(&header, &payloads) else { return };
                self.apply_update(&pty_id, update);
            }
            "ptyExit" | "ptyLifecycle" | "ptyTitle" | "ptyKitty" | "ptyNotification" => {
                // No dedicated subscriber channel is specified for these in
                // §4.F beyond the per-PTY cache; UI layers read title/kitty/
                // exit off `PtyState` which the handlers below update.
                if kind == "ptyTitle" {
                    if let (Some(pty_id), Some(title)) = (
                        header.get("ptyId").and_then(Value::as_str),
                        header.get("title").and_then(Value::as_str),
                    ) {
                        let mut states = self.states.lock().unwrap();
                        if let Some(state) = states.get_mut(pty_id) {
                            state.title = title.to_string();
                        }
                    }
                } else if kind == "ptyKitty" {
                    if let Some(pty_id) = header.get("ptyId").and_then(Value::as_str) {
                        if let Some(data) = payloads.into_iter().next() {
                            let mut states = self.states.lock().unwrap();
                            let state = states.entry(pty_id.to_string()).or_insert_with(PtyState::blank);
                            state.push_kitty(data);
                        }
                    }
                }
            }
            _ => {}
        }
    }

    fn apply_update(&mut self, pty_id: &str, update: DirtyUpdate) {
        let mut states = self.states.lock().unwrap();
        let entry = states.entry(pty_id.to_string()).or_insert_with(PtyState::blank);
        entry.apply(update);
        let snapshot = entry.clone();
        drop(states);

        let mut subs = self.subscribers.lock().unwrap();
        for (_, cb) in subs.unified.iter_mut() {
            cb(pty_id, &snapshot);
        }
        for (_, cb) in subs.state.iter_mut() {
            cb(pty_id, &snapshot);
        }
        for (_, cb) in subs.scroll.iter_mut() {
            cb(pty_id, &snapshot);
        }
    }

    fn mark_detached(&mut self) {
        if self.detached.swap(true, std::sync::atomic::Ordering::AcqRel) {
            return;
        }
        let callbacks = std::mem::take(&mut self.subscribers.lock().unwrap().detach);
        for (_, cb) in callbacks {
            cb();
        }
        let mut pending = self.pending.lock().unwrap();
        for (_, p) in pending.drain() {
            let _ = p.tx.send(Err(OpenmuxError::Detached));
        }
    }

    /// Synchronous read: returns whatever is currently cached, which may
    /// race ahead of or behind any in-flight write (spec §9 "hot-path sync
    /// reads of async state").
    pub fn get_terminal_state_sync(&self, pty_id: &str) -> Option<crate::cell::TerminalState> {
        self.states.lock().unwrap().get(pty_id).map(|s| s.terminal_state())
    }

    pub fn get_scroll_state_sync(&self, pty_id: &str) -> Option<crate::cell::ScrollState> {
        self.states.lock().unwrap().get(pty_id).map(|s| s.scroll)
    }

    pub fn get_emulator_sync(&self, pty_id: &str) -> Option<PtyState> {
        self.states.lock().unwrap().get(pty_id).cloned()
    }

    /// Fire-and-forget write: posts the request and returns without waiting
    /// for a reply. Keyboard/mouse/paste/resize MUST never round-trip (spec
    /// §5).
    pub fn write_input(&mut self, pty_id: &str, data: Vec<u8>) {
        let _ = self.post("write", json!({"ptyId": pty_id}), vec![data]);
    }

    pub fn resize(&mut self, pty_id: &str, cols: u16, rows: u16) {
        let _ = self.post("resize", json!({"ptyId": pty_id, "cols": cols, "rows": rows}), vec![]);
    }

    pub fn create_pty(&mut self, cols: u16, rows: u16, cwd: Option<&str>) -> Result<String> {
        let result = self.request("createPty", json!({"cols": cols, "rows": rows, "cwd": cwd}), &[])?;
        Ok(result.0.get("ptyId").and_then(Value::as_str).unwrap_or_default().to_string())
    }

    pub fn destroy(&mut self, pty_id: &str) -> Result<()> {
        self.request("destroy", json!({"ptyId": pty_id}), &[]).map(|_| ())
    }

    /// Fetches scrollback lines async, filling the LRU cache as replies
    /// arrive; callers needing a line synchronously should check
    /// `cached_scrollback_line` first.
    pub fn get_scrollback_lines(&mut self, pty_id: &str, start: u64, count: u64) -> Result<()> {
        let (header, payloads) = self.request(
            "getScrollbackLines",
            json!({"ptyId": pty_id, "startOffset": start, "count": count}),
            &[],
        )?;
        let offsets: Vec<u64> = header
            .get("lineOffsets")
            .and_then(Value::as_array)
            .map(|a| a.iter().filter_map(Value::as_u64).collect())
            .unwrap_or_default();
        let concatenated = payloads.into_iter().next().unwrap_or_default();
        let mut cache = self.scrollback_cache.lock().unwrap();
        let mut offset_byte = 0usize;
        for off in offsets {
            if offset_byte + 4 > concatenated.len() {
                break;
            }
            let count = u32::from_le_bytes(concatenated[offset_byte..offset_byte + 4].try_into().unwrap()) as usize;
            let row_len = 4 + count * crate::cell::CELL_BYTES;
            if offset_byte + row_len > concatenated.len() {
                break;
            }
            if let Ok(row) = crate::cell::unpack_row(&concatenated[offset_byte..offset_byte + row_len]) {
                cache.put(pty_id, off, row);
            }
            offset_byte += row_len;
        }
        Ok(())
    }

    pub fn cached_scrollback_line(&self, pty_id: &str, offset: u64) -> Option<Row> {
        self.scrollback_cache.lock().unwrap().get(pty_id, offset)
    }

    /// Records which pty currently backs a session/pane pair, so a fresh
    /// attach can recover pane->pty wiring via `session_mapping` (spec
    /// §4.E `SessionMapping`).
    pub fn register_pane(&mut self, session_id: u64, pane_id: u64, pty_id: &str) -> Result<()> {
        self.request("registerPane", json!({"sessionId": session_id, "paneId": pane_id, "ptyId": pty_id}), &[]).map(|_| ())
    }

    pub fn session_mapping(&mut self, session_id: u64) -> Result<Vec<(u64, String)>> {
        let (result, _) = self.request("getSessionMapping", json!({"sessionId": session_id}), &[])?;
        let entries = result
            .get("entries")
            .and_then(Value::as_array)
            .map(|a| {
                a.iter()
                    .filter_map(|e| {
                        let pane_id = e.get("paneId").and_then(Value::as_u64)?;
                        let pty_id = e.get("ptyId").and_then(Value::as_str)?.to_string();
                        Some((pane_id, pty_id))
                    })
                    .collect()
            })
            .unwrap_or_default();
        Ok(entries)
    }

    fn post(&mut self, method: &str, params: Value, payloads: Vec<Vec<u8>>) -> std::io::Result<()> {
        let header = json!({"method": method, "params": params});
        let frame = Frame::new(header, payloads);
        self.stream.write_all(&frame.encode())
    }

    /// Sends a request and blocks for a reply up to `DEFAULT_TIMEOUT`,
    /// rejecting on disconnect (spec §4.F "Request correlation").
    fn request(&mut self, method: &str, params: Value, payloads: &[Vec<u8>]) -> Result<(Value, Vec<Vec<u8>>)> {
        let id = self.next_request_id;
        self.next_request_id += 1;
        let (tx, rx) = std::sync::mpsc::sync_channel(1);
        self.pending.lock().unwrap().insert(id, Pending { tx });

        let header = json!({"method": method, "id": id, "params": params});
        let frame = Frame::new(header, payloads.to_vec());
        self.stream.write_all(&frame.encode()).map_err(OpenmuxError::Io)?;

        let deadline = Instant::now() + DEFAULT_TIMEOUT;
        loop {
            self.pump();
            match rx.try_recv() {
                Ok(result) => return result,
                Err(std::sync::mpsc::TryRecvError::Empty) => {
                    if Instant::now() > deadline {
                        self.pending.lock().unwrap().remove(&id);
                        return Err(OpenmuxError::Timeout);
                    }
                    thread::sleep(Duration::from_millis(2));
                }
                Err(std::sync::mpsc::TryRecvError::Disconnected) => return Err(OpenmuxError::Detached),
            }
        }
    }
}

enum SubscriberKind {
    Unified,
    State,
    Scroll,
}

fn reader_loop(mut stream: UnixStream, tx: Sender<Incoming>) {
    let mut decoder = FrameDecoder::new();
    let mut buf = [0u8; 65536];
    loop {
        match stream.read(&mut buf) {
            Ok(0) => break,
            Ok(n) => {
                decoder.feed(&buf[..n]);
                loop {
                    match decoder.try_decode() {
                        Ok(Some(frame)) => {
                            let incoming = classify(frame);
                            if tx.send(incoming).is_err() {
                                return;
                            }
                        }
                        Ok(None) => break,
                        Err(_) => return,
                    }
                }
            }
            Err(_) => break,
        }
    }
    let _ = tx.send(Incoming::Closed);
}

/// The version string the client hands the shim on `hello`. Overridable via
/// `OPENMUX_VERSION`, e.g. to pin an older protocol version while testing
/// compatibility against a shim built from a different checkout.
fn protocol_version() -> String {
    std::env::var("OPENMUX_VERSION").unwrap_or_else(|_| env!("CARGO_PKG_VERSION").to_string())
}

fn classify(frame: Frame) -> Incoming {
    if frame.header.get("type").and_then(Value::as_str) == Some("response") {
        let id = frame.header.get("id").and_then(Value::as_u64).unwrap_or(0);
        let ok = frame.header.get("ok").and_then(Value::as_bool).unwrap_or(false);
        let result = frame.header.get("result").cloned().unwrap_or(Value::Null);
        let error = frame.header.get("error").and_then(Value::as_str).map(str::to_string);
        Incoming::Response { id, ok, result, error, payloads: frame.payloads }
    } else {
        Incoming::Event(frame.header, frame.payloads)
    }
}
