//! Control socket listener (spec §4.I): binds a second Unix socket and
//! dispatches `hello`/`session.create`/`pane.split`/`pane.send`/
//! `pane.capture` against whatever implements `ControlBackend` — the UI
//! process's app state. Grounded on `shim/server.rs`'s accept-loop shape,
//! simplified since there are no subscriptions: one response per request.

use std::io::{Read, Write};
use std::os::unix::net::{UnixListener, UnixStream};
use std::sync::{Arc, Mutex};
use std::thread;

use serde_json::{json, Value};
use tracing::{debug, info};

use crate::error::{OpenmuxError, Result};
use crate::frame::{Frame, FrameDecoder};
use crate::layout::SplitDirection;
use crate::paths;

use super::selector::PaneSelector;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CaptureFormat {
    Text,
    Ansi,
}

/// Everything the control socket needs from the UI process's app state.
/// Implemented by the app orchestrator; kept as a trait so this module
/// doesn't need to know about `app.rs`'s concrete state.
pub trait ControlBackend: Send {
    fn session_create(&mut self, name: Option<String>) -> Result<Value>;
    fn session_list(&mut self) -> Result<Value>;
    fn pane_split(&mut self, direction: SplitDirection, workspace_id: Option<u8>, pane: Option<&str>) -> Result<Value>;
    fn pane_send(&mut self, text: String, workspace_id: Option<u8>, pane: Option<&str>) -> Result<Value>;
    fn pane_capture(
        &mut self,
        lines: u32,
        format: CaptureFormat,
        raw: bool,
        workspace_id: Option<u8>,
        pane: Option<&str>,
    ) -> Result<Value>;
}

pub struct ControlServer;

impl ControlServer {
    /// Binds the control socket and spawns its accept loop in the
    /// background; returns once the listener is bound.
    pub fn spawn(backend: Arc<Mutex<dyn ControlBackend>>) -> std::io::Result<()> {
        let socket_path = paths::control_socket_path();
        if let Some(parent) = socket_path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        replace_orphaned_socket(&socket_path);
        let listener = UnixListener::bind(&socket_path)?;
        info!(path = %socket_path.display(), "control socket listening");
        thread::spawn(move || {
            for conn in listener.incoming() {
                let Ok(stream) = conn else { continue };
                let backend = backend.clone();
                thread::spawn(move || handle_connection(stream, backend));
            }
        });
        Ok(())
    }
}

fn handle_connection(mut stream: UnixStream, backend: Arc<Mutex<dyn ControlBackend>>) {
    let mut decoder = FrameDecoder::new();
    let mut buf = [0u8; 65536];
    loop {
        match stream.read(&mut buf) {
            Ok(0) => return,
            Ok(n) => {
                decoder.feed(&buf[..n]);
                loop {
                    match decoder.try_decode() {
                        Ok(Some(frame)) => {
                            let response = dispatch(&backend, frame.header);
                            if stream.write_all(&response.encode()).is_err() {
                                return;
                            }
                        }
                        Ok(None) => break,
                        Err(_) => {
                            debug!("malformed control frame, closing connection");
                            return;
                        }
                    }
                }
            }
            Err(_) => return,
        }
    }
}

fn dispatch(backend: &Arc<Mutex<dyn ControlBackend>>, header: Value) -> Frame {
    let id = header.get("id").and_then(Value::as_u64).unwrap_or(0);
    let method = header.get("method").and_then(Value::as_str).unwrap_or("");
    let params = header.get("params").cloned().unwrap_or(Value::Null);
    match handle_method(backend, method, params) {
        Ok(value) => Frame::header_only(json!({"type": "response", "id": id, "ok": true, "result": value})),
        Err(e) => Frame::header_only(json!({
            "type": "response",
            "id": id,
            "ok": false,
            "error": e.message(),
            "errorCode": e.code().to_string(),
        })),
    }
}

fn handle_method(backend: &Arc<Mutex<dyn ControlBackend>>, method: &str, params: Value) -> Result<Value> {
    let mut backend = backend.lock().map_err(|_| OpenmuxError::internal("control backend lock poisoned"))?;
    match method {
        "hello" => Ok(json!({"pid": std::process::id()})),
        "session.create" => {
            let name = params.get("name").and_then(Value::as_str).map(str::to_string);
            backend.session_create(name)
        }
        "session.list" => backend.session_list(),
        "pane.split" => {
            let direction = match params.get("direction").and_then(Value::as_str) {
                Some("horizontal") => SplitDirection::Horizontal,
                _ => SplitDirection::Vertical,
            };
            let (workspace_id, pane) = target(&params)?;
            backend.pane_split(direction, workspace_id, pane.as_deref())
        }
        "pane.send" => {
            let text = params
                .get("text")
                .and_then(Value::as_str)
                .ok_or_else(|| OpenmuxError::invalid("missing text"))?
                .to_string();
            let (workspace_id, pane) = target(&params)?;
            backend.pane_send(text, workspace_id, pane.as_deref())
        }
        "pane.capture" => {
            let lines = params.get("lines").and_then(Value::as_u64).unwrap_or(100) as u32;
            let format = match params.get("format").and_then(Value::as_str) {
                Some("ansi") => CaptureFormat::Ansi,
                _ => CaptureFormat::Text,
            };
            let raw = params.get("raw").and_then(Value::as_bool).unwrap_or(false);
            let (workspace_id, pane) = target(&params)?;
            backend.pane_capture(lines, format, raw, workspace_id, pane.as_deref())
        }
        _ => Err(OpenmuxError::invalid(format!("unknown method: {method}"))),
    }
}

/// Extracts `workspaceId`/`pane` and validates the selector grammar eagerly
/// so a bad selector fails with `invalid_request` before it reaches the
/// backend.
fn target(params: &Value) -> Result<(Option<u8>, Option<String>)> {
    let workspace_id = params.get("workspaceId").and_then(Value::as_u64).map(|v| v as u8);
    let pane = params.get("pane").and_then(Value::as_str).map(str::to_string);
    PaneSelector::parse(pane.as_deref())?;
    Ok((workspace_id, pane))
}

fn replace_orphaned_socket(path: &std::path::Path) {
    if path.exists() {
        if UnixStream::connect(path).is_err() {
            debug!(path = %path.display(), "replacing orphaned control socket file");
            let _ = std::fs::remove_file(path);
        }
    }
}
