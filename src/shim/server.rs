//! Component E — the shim process: owns the PTY registry, multiplexes
//! subscriptions to at most one attached client, and implements steal-and-
//! attach (spec §4.E).

use std::io::{Read, Write};
use std::os::unix::net::{UnixListener, UnixStream};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{channel, Receiver, Sender};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use serde_json::{json, Value};
use tracing::{debug, info};

use crate::cell::ScrollState;
use crate::error::{ErrorCode, OpenmuxError, Result};
use crate::frame::{Frame, FrameDecoder};
use crate::pty::{PtyEvent, PtyPhase, PtyRegistry, PtySession, SpawnOptions};
use crate::shim::registry::SessionMapping;
use crate::{paths, protocol};

const DETACH_GRACE: Duration = Duration::from_millis(250);
const POLL_INTERVAL: Duration = Duration::from_millis(8);
/// Global scrollback byte budget across every PTY's archive (spec §4.C).
/// Not currently config-surfaced (spec §6 doesn't list a scrollback table);
/// a fixed generous default avoids silently growing unbounded disk usage
/// across a long-lived shim.
const GLOBAL_SCROLLBACK_BUDGET: u64 = 64 * 1024 * 1024;

enum Inbound {
    NewClient(UnixStream),
    Request { client: u64, header: Value, payloads: Vec<Vec<u8>> },
    ClientGone(u64),
}

pub struct ShimServer {
    registry: PtyRegistry,
    mapping: SessionMapping,
    attached: Option<AttachedClient>,
    next_client_seq: u64,
    shutdown: Arc<AtomicBool>,
    inbound_tx: Option<Sender<Inbound>>,
}

struct AttachedClient {
    id: u64,
    client_id_str: String,
    stream: UnixStream,
}

impl ShimServer {
    pub fn new() -> Self {
        ShimServer {
            registry: PtyRegistry::new(),
            mapping: SessionMapping::new(),
            attached: None,
            next_client_seq: 0,
            shutdown: Arc::new(AtomicBool::new(false)),
            inbound_tx: None,
        }
    }

    pub fn run(mut self) -> Result<()> {
        let socket_path = paths::shim_socket_path();
        if let Some(parent) = socket_path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        replace_orphaned_socket(&socket_path);
        let listener = UnixListener::bind(&socket_path)?;
        info!(path = %socket_path.display(), "shim listening");

        let (tx, rx) = channel::<Inbound>();
        let accept_tx = tx.clone();
        self.inbound_tx = Some(tx);
        thread::spawn(move || accept_loop(listener, accept_tx));

        self.event_loop(rx)
    }

    fn event_loop(&mut self, rx: Receiver<Inbound>) -> Result<()> {
        loop {
            if self.shutdown.load(Ordering::Acquire) {
                return Ok(());
            }
            while let Ok(msg) = rx.try_recv() {
                self.handle_inbound(msg);
            }
            self.pump_pty_events();
            self.enforce_scrollback_budget();
            thread::sleep(POLL_INTERVAL);
        }
    }

    fn handle_inbound(&mut self, msg: Inbound) {
        match msg {
            Inbound::NewClient(stream) => self.steal_and_attach(stream),
            Inbound::Request { client, header, payloads } => {
                if self.attached.as_ref().map(|a| a.id) != Some(client) {
                    return;
                }
                self.dispatch(header, payloads);
            }
            Inbound::ClientGone(client) => {
                if self.attached.as_ref().map(|a| a.id) == Some(client) {
                    self.attached = None;
                }
            }
        }
    }

    /// New `hello` displaces any existing client: it gets `{type:"detached"}`
    /// then a half-close after a 250 ms grace (spec §4.E, §8 steal-and-attach).
    fn steal_and_attach(&mut self, stream: UnixStream) {
        if let Some(prev) = self.attached.take() {
            let _ = send_event(&prev.stream, &protocol::ShimEventHeader::Detached, &[]);
            let grace_stream = prev.stream.try_clone();
            thread::spawn(move || {
                thread::sleep(DETACH_GRACE);
                if let Ok(s) = grace_stream {
                    let _ = s.shutdown(std::net::Shutdown::Both);
                }
            });
        }

        let id = self.next_client_seq;
        self.next_client_seq += 1;
        let reader_stream = match stream.try_clone() {
            Ok(s) => s,
            Err(_) => return,
        };
        let client_id_str = format!("client-{id}");
        self.attached = Some(AttachedClient { id, client_id_str, stream });

        let tx = self.inbound_tx.clone().expect("run() wires inbound_tx before accepting clients");
        spawn_reader(id, reader_stream, tx);

        // Snapshot every live PTY to the freshly attached client (spec §4.E:
        // "for each live PTY, a full-state snapshot followed by subsequent
        // incremental updates").
        let ids = self.registry.ids();
        for pty_id in ids {
            if let Some(session) = self.registry.get_mut(&pty_id) {
                let snapshot = session.full_snapshot();
                self.push_update(&pty_id, &snapshot);
            }
        }
    }

    fn pump_pty_events(&mut self) {
        let ids = self.registry.ids();
        for pty_id in ids {
            let Some(session) = self.registry.get_mut(&pty_id) else { continue };
            if *session.phase() != PtyPhase::Running {
                continue;
            }
            let (update, events) = session.poll();
            if let Some(update) = &update {
                self.push_update(&pty_id, update);
            }
            for ev in events {
                self.push_side_event(&pty_id, ev);
            }
        }
    }

    /// Repeatedly drops the oldest chunk of whichever archive's oldest chunk
    /// is globally oldest until the total is back under budget, or only one
    /// archive remains (spec §4.C, §8 "archive global cap"). Registration
    /// order (the `pty-N` numeric suffix) breaks ties between equal
    /// timestamps.
    fn enforce_scrollback_budget(&mut self) {
        loop {
            let ids = self.registry.ids();
            if ids.len() <= 1 {
                return;
            }
            let total: u64 = ids.iter().filter_map(|id| self.registry.get(id)).map(|s| s.archive_bytes()).sum();
            if total <= GLOBAL_SCROLLBACK_BUDGET {
                return;
            }
            let candidate = ids
                .iter()
                .filter_map(|id| {
                    self.registry
                        .get(id)
                        .and_then(|s| s.archive_oldest_created_at())
                        .map(|ts| (ts, registration_order(id), id.clone()))
                })
                .min();
            let Some((_, _, id)) = candidate else { return };
            match self.registry.get_mut(&id) {
                Some(session) => {
                    if session.drop_oldest_scrollback_chunk().is_err() {
                        return;
                    }
                }
                None => return,
            }
        }
    }

    fn push_update(&self, pty_id: &str, update: &crate::cell::DirtyUpdate) {
        let Some(attached) = &self.attached else { return };
        let (mut meta, payloads) = update.pack_payloads();
        meta["type"] = json!("ptyUpdate");
        meta["ptyId"] = json!(pty_id);
        let frame = Frame::new(meta, payloads);
        let _ = write_frame(&attached.stream, &frame);
    }

    fn push_side_event(&mut self, pty_id: &str, event: PtyEvent) {
        let Some(attached) = &self.attached else { return };
        let (header, payload) = match event {
            PtyEvent::Exit { code } => (protocol::ShimEventHeader::PtyExit { pty_id: pty_id.to_string(), code }, None),
            PtyEvent::Title(title) => (protocol::ShimEventHeader::PtyTitle { pty_id: pty_id.to_string(), title }, None),
            PtyEvent::Kitty(data) => (protocol::ShimEventHeader::PtyKitty { pty_id: pty_id.to_string() }, Some(data)),
            PtyEvent::Update(_) => return,
        };
        let payloads = payload.map(|p| vec![p]).unwrap_or_default();
        let _ = send_event(&attached.stream, &header, &payloads);
    }

    /// Pushes `ptyLifecycle` to the attached client, if any (spec §4.E /
    /// §6): `createPty` sends `Created`, `destroy`/`destroyAll` send
    /// `Destroyed`.
    fn push_lifecycle(&self, pty_id: &str, kind: protocol::LifecycleKind) {
        let Some(attached) = &self.attached else { return };
        let header = protocol::ShimEventHeader::PtyLifecycle { pty_id: pty_id.to_string(), kind };
        let _ = send_event(&attached.stream, &header, &[]);
    }

    fn dispatch(&mut self, header: Value, payloads: Vec<Vec<u8>>) {
        let Some(id) = header.get("id").and_then(Value::as_u64) else { return };
        let method = header.get("method").and_then(Value::as_str).unwrap_or("");
        let params = header.get("params").cloned().unwrap_or(Value::Null);
        let Some(attached) = &self.attached else { return };
        let stream = attached.stream.try_clone().ok();

        let result = self.handle_method(method, params, payloads);
        if let Some(stream) = stream {
            match result {
                Ok((value, extra_payloads)) => {
                    let _ = send_result(&stream, id, value, extra_payloads);
                }
                Err(e) => {
                    let _ = send_response(&stream, id, e.code(), Err(e.message().as_str()));
                }
            }
        }
    }

    fn handle_method(&mut self, method: &str, params: Value, payloads: Vec<Vec<u8>>) -> Result<(Value, Vec<Vec<u8>>)> {
        match method {
            "hello" => Ok((json!({"pid": std::process::id()}), vec![])),
            "setHostColors" => Ok((json!({"applied": true}), vec![])),
            "createPty" => {
                let cols = params.get("cols").and_then(Value::as_u64).unwrap_or(80) as u16;
                let rows = params.get("rows").and_then(Value::as_u64).unwrap_or(24) as u16;
                let cwd = params.get("cwd").and_then(Value::as_str).map(str::to_string);
                let pty_id = self.registry.fresh_id();
                let archive_dir = paths::scrollback_dir(&pty_id);
                let session = PtySession::spawn(pty_id.clone(), SpawnOptions { cols, rows, cwd, ..Default::default() }, archive_dir)?;
                self.registry.insert(session);
                self.push_lifecycle(&pty_id, protocol::LifecycleKind::Created);
                Ok((json!({"ptyId": pty_id}), vec![]))
            }
            "write" => {
                let pty_id = require_str(&params, "ptyId")?;
                let session = self.session_mut(&pty_id)?;
                let data = payloads.first().cloned().unwrap_or_default();
                session.write(&data)?;
                Ok((Value::Null, vec![]))
            }
            "resize" => {
                let pty_id = require_str(&params, "ptyId")?;
                let cols = params.get("cols").and_then(Value::as_u64).unwrap_or(80) as u16;
                let rows = params.get("rows").and_then(Value::as_u64).unwrap_or(24) as u16;
                self.session_mut(&pty_id)?.resize(cols, rows)?;
                Ok((Value::Null, vec![]))
            }
            "destroy" => {
                let pty_id = require_str(&params, "ptyId")?;
                let mut session = self.registry.remove(&pty_id).ok_or_else(|| OpenmuxError::not_found(&pty_id))?;
                self.mapping.forget_pty(&pty_id);
                let _ = session.dispose();
                self.push_lifecycle(&pty_id, protocol::LifecycleKind::Destroyed);
                Ok((Value::Null, vec![]))
            }
            "destroyAll" => {
                for id in self.registry.ids() {
                    if let Some(mut s) = self.registry.remove(&id) {
                        let _ = s.dispose();
                    }
                    self.mapping.forget_pty(&id);
                    self.push_lifecycle(&id, protocol::LifecycleKind::Destroyed);
                }
                Ok((Value::Null, vec![]))
            }
            "shutdown" => {
                let flag = self.shutdown.clone();
                thread::spawn(move || {
                    thread::sleep(Duration::from_millis(10));
                    flag.store(true, Ordering::Release);
                    std::process::exit(0);
                });
                Ok((Value::Null, vec![]))
            }
            "setPanePosition" => Ok((Value::Null, vec![])),
            "getCwd" => {
                let pty_id = require_str(&params, "ptyId")?;
                let cwd = self.session(&pty_id)?.get_cwd().unwrap_or_default();
                Ok((json!({"cwd": cwd}), vec![]))
            }
            "getTerminalState" => {
                let pty_id = require_str(&params, "ptyId")?;
                let session = self.session_mut(&pty_id)?;
                let snapshot = session.full_snapshot();
                let (_, payloads) = snapshot.pack_payloads();
                let full_payload = payloads.into_iter().last().unwrap_or_default();
                Ok((json!({"cols": snapshot.cols, "rows": snapshot.rows}), vec![full_payload]))
            }
            "getScrollState" => {
                let pty_id = require_str(&params, "ptyId")?;
                let session = self.session(&pty_id)?;
                let state = ScrollState { viewport_offset: 0, scrollback_length: session.scroll_length() };
                Ok((json!({"viewportOffset": state.viewport_offset, "scrollbackLength": state.scrollback_length}), vec![]))
            }
            "setScrollOffset" => Ok((Value::Null, vec![])),
            "getScrollbackLines" => {
                let pty_id = require_str(&params, "ptyId")?;
                let start = params.get("startOffset").and_then(Value::as_u64).unwrap_or(0);
                let count = params.get("count").and_then(Value::as_u64).unwrap_or(0);
                let session = self.session_mut(&pty_id)?;
                let mut offsets = Vec::new();
                let mut rows_bytes = Vec::new();
                for off in start..start + count {
                    if let Some(row) = session.get_scrollback_line(off) {
                        offsets.push(off);
                        rows_bytes.push(crate::cell::pack_row(&row));
                    }
                }
                let concatenated: Vec<u8> = rows_bytes.into_iter().flatten().collect();
                Ok((json!({"lineOffsets": offsets}), vec![concatenated]))
            }
            "search" => {
                let pty_id = require_str(&params, "ptyId")?;
                let query = params.get("query").and_then(Value::as_str).ok_or_else(|| OpenmuxError::invalid("missing query"))?;
                let limit = params.get("limit").and_then(Value::as_u64).unwrap_or(100) as usize;
                let (matches, has_more) = self.session_mut(&pty_id)?.search(query, limit)?;
                let matches: Vec<Value> = matches.into_iter().map(|m| json!({"offset": m.offset, "text": m.text})).collect();
                Ok((json!({"matches": matches, "hasMore": has_more}), vec![]))
            }
            "listAll" => Ok((json!({"ptyIds": self.registry.ids()}), vec![])),
            "getSession" => {
                let pty_id = require_str(&params, "ptyId")?;
                let session = self.mapping.pane_for(&pty_id).map(|key| json!({"sessionId": key.session_id, "paneId": key.pane_id}));
                Ok((json!({"session": session}), vec![]))
            }
            "getForegroundProcess" => {
                let pty_id = require_str(&params, "ptyId")?;
                let process = self
                    .session(&pty_id)?
                    .foreground_process()
                    .map(|p| json!({"pid": p.pid, "name": p.name}));
                Ok((json!({"process": process}), vec![]))
            }
            "registerPane" => {
                let session_id = params.get("sessionId").and_then(Value::as_u64).ok_or_else(|| OpenmuxError::invalid("sessionId"))?;
                let pane_id = params.get("paneId").and_then(Value::as_u64).ok_or_else(|| OpenmuxError::invalid("paneId"))?;
                let pty_id = require_str(&params, "ptyId")?;
                self.mapping.register(session_id, pane_id, pty_id);
                Ok((Value::Null, vec![]))
            }
            "getSessionMapping" => {
                let session_id = params.get("sessionId").and_then(Value::as_u64).ok_or_else(|| OpenmuxError::invalid("sessionId"))?;
                let entries = self.mapping.entries_for(session_id);
                Ok((json!({"entries": entries.into_iter().map(|(p, pty)| json!({"paneId": p, "ptyId": pty})).collect::<Vec<_>>()}), vec![]))
            }
            _ => Err(OpenmuxError::invalid(format!("unknown method: {method}"))),
        }
    }

    fn session(&self, id: &str) -> Result<&PtySession> {
        self.registry.get(id).ok_or_else(|| OpenmuxError::not_found(id))
    }

    fn session_mut(&mut self, id: &str) -> Result<&mut PtySession> {
        self.registry.get_mut(id).ok_or_else(|| OpenmuxError::not_found(id))
    }
}

/// Extracts the numeric suffix `PtyRegistry::fresh_id` mints (`"pty-7"` ->
/// `7`) so ties in `enforce_scrollback_budget` break in registration order.
fn registration_order(pty_id: &str) -> u64 {
    pty_id.rsplit('-').next().and_then(|s| s.parse().ok()).unwrap_or(0)
}

fn require_str(params: &Value, key: &str) -> Result<String> {
    params
        .get(key)
        .and_then(Value::as_str)
        .map(str::to_string)
        .ok_or_else(|| OpenmuxError::invalid(format!("missing {key}")))
}

fn accept_loop(listener: UnixListener, tx: Sender<Inbound>) {
    for conn in listener.incoming() {
        let Ok(stream) = conn else { continue };
        if tx.send(Inbound::NewClient(stream)).is_err() {
            break;
        }
    }
}

fn spawn_reader(client: u64, mut stream: UnixStream, tx: Sender<Inbound>) {
    thread::spawn(move || {
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
                                if tx.send(Inbound::Request { client, header: frame.header, payloads: frame.payloads }).is_err() {
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
        let _ = tx.send(Inbound::ClientGone(client));
    });
}

fn write_frame(mut stream: &UnixStream, frame: &Frame) -> std::io::Result<()> {
    stream.write_all(&frame.encode())
}

fn send_event(stream: &UnixStream, header: &protocol::ShimEventHeader, payloads: &[Vec<u8>]) -> std::io::Result<()> {
    let value = serde_json::to_value(header).unwrap_or(json!({"type": "detached"}));
    write_frame(stream, &Frame::new(value, payloads.to_vec()))
}

fn send_result(stream: &UnixStream, id: u64, result: Value, payloads: Vec<Vec<u8>>) -> std::io::Result<()> {
    let header = json!({"type": "response", "id": id, "ok": true, "result": result});
    write_frame(stream, &Frame::new(header, payloads))
}

fn send_response(stream: &UnixStream, id: u64, code: ErrorCode, message: std::result::Result<&str, &str>) -> std::io::Result<()> {
    let header = match message {
        Ok(_) => json!({"type": "response", "id": id, "ok": true}),
        Err(msg) => json!({"type": "response", "id": id, "ok": false, "error": msg, "errorCode": code.to_string()}),
    };
    write_frame(stream, &Frame::new(header, vec![]))
}

fn replace_orphaned_socket(path: &std::path::Path) {
    if path.exists() {
        if UnixStream::connect(path).is_err() {
            debug!(path = %path.display(), "replacing orphaned socket file");
            let _ = std::fs::remove_file(path);
        }
    }
}
