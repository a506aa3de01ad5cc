//! Component O — process entry point. Argv is parsed once (`cli::parse`)
//! and dispatched to one of three process roles (spec §2): the interactive
//! UI (`app::run`), the detached PTY shim (`shim::ShimServer`), or a
//! one-shot control-plane client that speaks to an already-running UI over
//! the control socket (`session.*`/`pane.*` subcommands).

mod app;
mod cell;
mod cli;
mod client;
mod config;
mod control;
mod copy_mode;
mod error;
mod frame;
mod keymode;
mod layout;
mod logging;
mod paths;
mod protocol;
mod pty;
mod rendering;
mod scrollback;
mod session;
mod shim;

use std::io::{Read, Write};
use std::os::unix::net::UnixStream;
use std::process::ExitCode;
use std::time::Duration;

use serde_json::{json, Value};

use cli::{CaptureFormatArg, Command, UsageError};
use error::exit_code;
use layout::SplitDirection;

fn main() -> ExitCode {
    let args: Vec<String> = std::env::args().skip(1).collect();
    let command = match cli::parse(&args) {
        Ok(c) => c,
        Err(UsageError(msg)) => {
            eprintln!("openmux: {msg}");
            return cli::usage_exit_code();
        }
    };

    match command {
        Command::Shim => run_shim(),
        Command::Attach { session } => run_attach(session),
        Command::SessionList { json: as_json } => run_session_list(as_json),
        Command::SessionCreate { name } => run_session_create(name),
        Command::PaneSplit { direction, workspace, pane } => run_pane_split(direction, workspace, pane),
        Command::PaneSend { text, workspace, pane } => run_pane_send(text, workspace, pane),
        Command::PaneCapture { lines, format, raw, workspace, pane } => run_pane_capture(lines, format, raw, workspace, pane),
    }
}

fn run_shim() -> ExitCode {
    logging::init_shim();
    if let Err(e) = paths::ensure_dirs() {
        tracing::error!(error = %e, "failed to create openmux directories");
        return ExitCode::from(exit_code::INTERNAL as u8);
    }
    match shim::ShimServer::new().run() {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!(error = %e, "shim exited with error");
            ExitCode::from(exit_code::INTERNAL as u8)
        }
    }
}

fn run_attach(session: Option<String>) -> ExitCode {
    logging::init_ui_or_cli();
    if let Err(e) = paths::ensure_dirs() {
        eprintln!("openmux: failed to set up config directories: {e}");
        return ExitCode::from(exit_code::INTERNAL as u8);
    }
    match app::run(session) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("openmux: {e}");
            ExitCode::from(e.code().exit_code() as u8)
        }
    }
}

/// `session list`/`session create` fall back to direct on-disk session-store
/// manipulation when no UI process holds the control socket (spec §4.I open
/// question, DESIGN.md "control plane without a UI"); `pane.*` has no such
/// fallback and fails with `no_ui`.
fn run_session_list(as_json: bool) -> ExitCode {
    logging::init_ui_or_cli();
    match control_request("session.list", json!({})) {
        Ok(result) => {
            print_session_list(&result, as_json);
            ExitCode::SUCCESS
        }
        Err(ControlError::NoUi) => {
            let store = session::SessionStore::new();
            let sessions = store.list();
            let result = json!({
                "sessions": sessions.iter().map(|s| json!({
                    "id": s.id, "name": s.name, "autoNamed": s.auto_named,
                })).collect::<Vec<_>>(),
            });
            print_session_list(&result, as_json);
            ExitCode::SUCCESS
        }
        Err(e) => fail(e),
    }
}

fn print_session_list(result: &Value, as_json: bool) {
    if as_json {
        println!("{result}");
        return;
    }
    if let Some(sessions) = result.get("sessions").and_then(Value::as_array) {
        for s in sessions {
            let name = s.get("name").and_then(Value::as_str).unwrap_or("");
            let id = s.get("id").and_then(Value::as_str).unwrap_or("");
            println!("{id}\t{name}");
        }
    }
}

fn run_session_create(name: Option<String>) -> ExitCode {
    logging::init_ui_or_cli();
    let params = json!({"name": name});
    match control_request("session.create", params) {
        Ok(result) => {
            println!("{result}");
            ExitCode::SUCCESS
        }
        Err(ControlError::NoUi) => {
            let store = session::SessionStore::new();
            let now = now_ms();
            match store.create(name, now) {
                Ok(s) => {
                    println!("{}", json!({"sessionId": s.metadata.id, "name": s.metadata.name}));
                    ExitCode::SUCCESS
                }
                Err(e) => fail(ControlError::Other(e.code().exit_code(), e.to_string())),
            }
        }
        Err(e) => fail(e),
    }
}

fn run_pane_split(direction: SplitDirection, workspace: Option<u8>, pane: Option<String>) -> ExitCode {
    logging::init_ui_or_cli();
    let direction_str = match direction {
        SplitDirection::Horizontal => "horizontal",
        SplitDirection::Vertical => "vertical",
    };
    let params = json!({"direction": direction_str, "workspaceId": workspace, "pane": pane});
    match control_request("pane.split", params) {
        Ok(_) => ExitCode::SUCCESS,
        Err(e) => fail(e),
    }
}

fn run_pane_send(text: String, workspace: Option<u8>, pane: Option<String>) -> ExitCode {
    logging::init_ui_or_cli();
    let params = json!({"text": text, "workspaceId": workspace, "pane": pane});
    match control_request("pane.send", params) {
        Ok(_) => ExitCode::SUCCESS,
        Err(e) => fail(e),
    }
}

fn run_pane_capture(lines: u32, format: CaptureFormatArg, raw: bool, workspace: Option<u8>, pane: Option<String>) -> ExitCode {
    logging::init_ui_or_cli();
    let format_str = match format {
        CaptureFormatArg::Text => "text",
        CaptureFormatArg::Ansi => "ansi",
    };
    let params = json!({"lines": lines, "format": format_str, "raw": raw, "workspaceId": workspace, "pane": pane});
    match control_request("pane.capture", params) {
        Ok(result) => {
            if let Some(text) = result.get("text").and_then(Value::as_str) {
                print!("{text}");
                let _ = std::io::stdout().flush();
            }
            ExitCode::SUCCESS
        }
        Err(e) => fail(e),
    }
}

enum ControlError {
    /// No UI process is listening on the control socket.
    NoUi,
    Other(i32, String),
}

fn fail(e: ControlError) -> ExitCode {
    match e {
        ControlError::NoUi => {
            eprintln!("openmux: no attached UI process.");
            ExitCode::from(exit_code::NO_UI as u8)
        }
        ControlError::Other(code, msg) => {
            eprintln!("{msg}");
            ExitCode::from(code as u8)
        }
    }
}

/// Sends one request/response round trip over the control socket and
/// returns the decoded `result` value.
fn control_request(method: &str, params: Value) -> Result<Value, ControlError> {
    let socket_path = paths::control_socket_path();
    let mut stream = UnixStream::connect(&socket_path).map_err(|_| ControlError::NoUi)?;
    stream
        .set_read_timeout(Some(Duration::from_millis(2000)))
        .map_err(|e| ControlError::Other(exit_code::INTERNAL, e.to_string()))?;

    let header = json!({"type": "request", "id": 1, "method": method, "params": params});
    let request_frame = frame::Frame::header_only(header);
    stream
        .write_all(&request_frame.encode())
        .map_err(|_| ControlError::NoUi)?;

    let mut decoder = frame::FrameDecoder::new();
    let mut buf = [0u8; 65536];
    loop {
        let n = stream.read(&mut buf).map_err(|e| ControlError::Other(exit_code::INTERNAL, e.to_string()))?;
        if n == 0 {
            return Err(ControlError::Other(exit_code::INTERNAL, "control socket closed unexpectedly".into()));
        }
        decoder.feed(&buf[..n]);
        match decoder.try_decode() {
            Ok(Some(response)) => return decode_control_response(response),
            Ok(None) => continue,
            Err(_) => return Err(ControlError::Other(exit_code::INTERNAL, "malformed control response".into())),
        }
    }
}

fn decode_control_response(frame: frame::Frame) -> Result<Value, ControlError> {
    let ok = frame.header.get("ok").and_then(Value::as_bool).unwrap_or(false);
    if ok {
        return Ok(frame.header.get("result").cloned().unwrap_or(Value::Null));
    }
    let message = frame.header.get("error").and_then(Value::as_str).unwrap_or("request failed").to_string();
    let code_str = frame.header.get("errorCode").and_then(Value::as_str).unwrap_or("internal");
    let exit = match code_str {
        "not_found" => exit_code::NOT_FOUND,
        "ambiguous" => exit_code::AMBIGUOUS,
        "invalid_request" => exit_code::USAGE,
        _ => exit_code::INTERNAL,
    };
    Err(ControlError::Other(exit, message))
}

fn now_ms() -> i64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or(0)
}
