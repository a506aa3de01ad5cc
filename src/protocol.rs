//! Shared request/response/event envelopes for both sockets (spec §4.E,
//! §4.I). Frame headers carry these as JSON; raw cell/row payloads travel
//! alongside as the frame's payload segments (see `frame.rs`, `cell.rs`).

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::ErrorCode;

/// `method`/`type` discriminated request header for both the shim and
/// control sockets. `id` correlates a response; it is omitted for one-way
/// notifications such as `write`/`resize`/`destroy`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RequestHeader {
    pub method: String,
    #[serde(default)]
    pub id: Option<u64>,
    #[serde(default)]
    pub params: Value,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum ResponseHeader {
    #[serde(rename = "response")]
    Response {
        id: u64,
        ok: bool,
        #[serde(skip_serializing_if = "Option::is_none")]
        result: Option<Value>,
        #[serde(skip_serializing_if = "Option::is_none")]
        error: Option<String>,
        #[serde(skip_serializing_if = "Option::is_none", rename = "errorCode")]
        error_code: Option<ErrorCode>,
    },
}

impl ResponseHeader {
    pub fn ok(id: u64, result: Value) -> Self {
        ResponseHeader::Response { id, ok: true, result: Some(result), error: None, error_code: None }
    }

    pub fn err(id: u64, code: ErrorCode, message: impl Into<String>) -> Self {
        ResponseHeader::Response { id, ok: false, result: None, error: Some(message.into()), error_code: Some(code) }
    }
}

/// Event headers the shim pushes to the attached client, unsolicited (spec
/// §4.E).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum ShimEventHeader {
    #[serde(rename = "ptyUpdate")]
    PtyUpdate { #[serde(rename = "ptyId")] pty_id: String, meta: Value },
    #[serde(rename = "ptyExit")]
    PtyExit { #[serde(rename = "ptyId")] pty_id: String, code: i32 },
    #[serde(rename = "ptyLifecycle")]
    PtyLifecycle { #[serde(rename = "ptyId")] pty_id: String, kind: LifecycleKind },
    #[serde(rename = "ptyTitle")]
    PtyTitle { #[serde(rename = "ptyId")] pty_id: String, title: String },
    #[serde(rename = "ptyKitty")]
    PtyKitty { #[serde(rename = "ptyId")] pty_id: String },
    #[serde(rename = "ptyNotification")]
    PtyNotification { #[serde(rename = "ptyId")] pty_id: String, title: String, body: String },
    #[serde(rename = "detached")]
    Detached,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LifecycleKind {
    Created,
    Destroyed,
}
