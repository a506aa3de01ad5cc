//! XDG-style path resolution for sockets, config, sessions and scrollback
//! archives. Grounded on the `dirs`-crate usage in `vybestack-llxprt-jefe`.

use std::env;
use std::path::PathBuf;

fn config_home() -> PathBuf {
    env::var_os("XDG_CONFIG_HOME")
        .map(PathBuf::from)
        .or_else(|| dirs::config_dir())
        .unwrap_or_else(|| PathBuf::from("."))
        .join("openmux")
}

fn state_home() -> PathBuf {
    env::var_os("XDG_STATE_HOME")
        .map(PathBuf::from)
        .or_else(dirs::state_dir)
        .unwrap_or_else(config_home)
        .join("openmux")
}

pub fn config_dir() -> PathBuf {
    config_home()
}

pub fn config_file() -> PathBuf {
    config_home().join("config.toml")
}

pub fn sockets_dir() -> PathBuf {
    config_home().join("sockets")
}

pub fn shim_socket_path() -> PathBuf {
    env::var_os("OPENMUX_SHIM_SOCKET_PATH")
        .map(PathBuf::from)
        .unwrap_or_else(|| sockets_dir().join("openmux-shim.sock"))
}

pub fn control_socket_path() -> PathBuf {
    env::var_os("OPENMUX_CONTROL_SOCKET_PATH")
        .map(PathBuf::from)
        .unwrap_or_else(|| sockets_dir().join("openmux-ui.sock"))
}

pub fn sessions_dir() -> PathBuf {
    config_home().join("sessions")
}

pub fn templates_dir() -> PathBuf {
    config_home().join("templates")
}

pub fn scrollback_dir(pty_id: &str) -> PathBuf {
    config_home().join("scrollback").join(pty_id)
}

pub fn shim_log_file() -> PathBuf {
    state_home().join("shim.log")
}

/// Ensures the directories needed before sockets/files can be created exist.
pub fn ensure_dirs() -> std::io::Result<()> {
    std::fs::create_dir_all(sockets_dir())?;
    std::fs::create_dir_all(sessions_dir())?;
    std::fs::create_dir_all(templates_dir())?;
    std::fs::create_dir_all(config_home().join("scrollback"))?;
    Ok(())
}
