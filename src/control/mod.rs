//! Component I — the control socket and pane selector resolver (spec §4.I).
//!
//! A second Unix socket, independent of the shim socket, that the `openmux`
//! CLI speaks to ask a running UI process to create sessions and act on
//! panes. Unlike the shim socket there are no subscriptions: every request
//! gets exactly one response.

mod capture;
mod selector;
mod server;

pub use capture::format_capture;
pub use selector::{resolve_selector, PaneSelector};
pub use server::{CaptureFormat, ControlBackend, ControlServer};
