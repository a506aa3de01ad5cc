//! Component N — TOML configuration (ambient, spec §4.N, §6).
//!
//! Grounded on the pack's `toml`+`serde` config loaders: parse
//! `$XDG_CONFIG_HOME/openmux/config.toml` into a `serde`-derived `Config`,
//! writing defaults on first run. Env overrides are applied after parsing
//! so they always win, same tolerant-parse philosophy as the session index
//! (a malformed file logs a warning and falls back to defaults rather than
//! aborting startup).

use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::layout::LayoutMode;
use crate::paths;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct LayoutConfig {
    pub window_gap: u16,
    pub outer_padding: Padding,
    pub border_width: u16,
    pub default_layout_mode: LayoutMode,
    pub default_split_ratio: f32,
    pub min_pane_width: u16,
    pub min_pane_height: u16,
}

impl Default for LayoutConfig {
    fn default() -> Self {
        LayoutConfig {
            window_gap: 1,
            outer_padding: Padding::default(),
            border_width: 1,
            default_layout_mode: LayoutMode::Vertical,
            default_split_ratio: 0.5,
            min_pane_width: 10,
            min_pane_height: 3,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct Padding {
    pub top: u16,
    pub right: u16,
    pub bottom: u16,
    pub left: u16,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ThemeConfig {
    pub pane_border_color: String,
    pub pane_active_border_color: String,
    pub status_bar_bg: String,
    pub status_bar_fg: String,
    pub search_accent_color: String,
    pub ui_bg: String,
    pub ui_fg: String,
}

impl Default for ThemeConfig {
    fn default() -> Self {
        ThemeConfig {
            pane_border_color: "#444444".into(),
            pane_active_border_color: "#5f87ff".into(),
            status_bar_bg: "#1c1c1c".into(),
            status_bar_fg: "#c0c0c0".into(),
            search_accent_color: "#ffaf00".into(),
            ui_bg: "#000000".into(),
            ui_fg: "#d0d0d0".into(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct SessionConfig {
    pub auto_save_interval_ms: u64,
}

impl Default for SessionConfig {
    fn default() -> Self {
        SessionConfig { auto_save_interval_ms: 30_000 }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct Config {
    pub layout: LayoutConfig,
    pub theme: ThemeConfig,
    pub session: SessionConfig,
    /// Freeform table: `"normal:ctrl-b c" = "new-pane"` style entries,
    /// consumed by the keymode router (component J) to override its
    /// built-in bindings. Kept as a flat map rather than a typed struct
    /// since the binding surface is configuration, not schema.
    #[serde(default)]
    pub keybindings: std::collections::BTreeMap<String, String>,
}

impl Config {
    /// Loads the config file, creating it with defaults if absent, then
    /// applies the env overrides listed in spec §6.
    pub fn load() -> Config {
        let path = paths::config_file();
        let mut config = if path.exists() {
            match std::fs::read_to_string(&path) {
                Ok(text) => toml::from_str(&text).unwrap_or_else(|e| {
                    warn!(error = %e, path = %path.display(), "malformed config, using defaults");
                    Config::default()
                }),
                Err(e) => {
                    warn!(error = %e, path = %path.display(), "could not read config, using defaults");
                    Config::default()
                }
            }
        } else {
            let config = Config::default();
            config.write_defaults(&path);
            config
        };
        config.apply_env_overrides();
        config
    }

    fn write_defaults(&self, path: &Path) {
        if let Some(parent) = path.parent() {
            let _ = std::fs::create_dir_all(parent);
        }
        if let Ok(text) = toml::to_string_pretty(self) {
            let _ = std::fs::write(path, text);
        }
    }

    fn apply_env_overrides(&mut self) {
        if let Some(v) = env_u16("OPENMUX_WINDOW_GAP") {
            self.layout.window_gap = v;
        }
        if let Some(v) = env_u16("OPENMUX_MIN_PANE_WIDTH") {
            self.layout.min_pane_width = v;
        }
        if let Some(v) = env_u16("OPENMUX_MIN_PANE_HEIGHT") {
            self.layout.min_pane_height = v;
        }
        if let Some(v) = env_f32("OPENMUX_STACK_RATIO") {
            self.layout.default_split_ratio = v;
        }
    }
}

fn env_u16(name: &str) -> Option<u16> {
    std::env::var(name).ok().and_then(|s| s.parse().ok())
}

fn env_f32(name: &str) -> Option<f32> {
    std::env::var(name).ok().and_then(|s| s.parse().ok())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_round_trips_through_toml() {
        let config = Config::default();
        let text = toml::to_string_pretty(&config).unwrap();
        let parsed: Config = toml::from_str(&text).unwrap();
        assert_eq!(config, parsed);
    }

    #[test]
    fn malformed_toml_falls_back_to_default_shape() {
        let parsed: Result<Config, _> = toml::from_str("layout = 5");
        assert!(parsed.is_err());
    }
}
