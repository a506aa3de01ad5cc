//! Application logging setup using `tracing` + `tracing-subscriber`.
//!
//! The shim is a detached background process with no terminal to print to,
//! so it always logs to a file under the XDG state dir. The UI process and
//! the CLI only log when `OPENMUX_LOG` is set (never to stdout, which would
//! corrupt the TUI). Modeled closely on `vybestack-llxprt-jefe`'s
//! `logging.rs`.

use std::fs::OpenOptions;

use tracing_subscriber::EnvFilter;

use crate::paths;

fn filter() -> EnvFilter {
    std::env::var("OPENMUX_LOG")
        .ok()
        .and_then(|value| EnvFilter::try_new(value).ok())
        .or_else(|| EnvFilter::try_new("info,openmux=debug").ok())
        .unwrap_or_else(|| EnvFilter::new("info"))
}

/// Always initializes file logging. Call once at the start of the shim's
/// `main()`.
pub fn init_shim() {
    let path = paths::shim_log_file();
    if let Some(parent) = path.parent() {
        let _ = std::fs::create_dir_all(parent);
    }

    let Ok(file) = OpenOptions::new().create(true).append(true).open(&path) else {
        return;
    };

    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter())
        .with_writer(file)
        .with_ansi(false)
        .with_target(true)
        .with_level(true)
        .with_thread_ids(true)
        .try_init();
}

/// Initializes stderr logging only if `OPENMUX_LOG` is set. No-op otherwise,
/// since stdout/stderr are owned by the interactive TUI.
pub fn init_ui_or_cli() {
    if std::env::var_os("OPENMUX_LOG").is_none() {
        return;
    }
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter())
        .with_writer(std::io::stderr)
        .with_ansi(true)
        .try_init();
}
