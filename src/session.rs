//! Component H — the session store (spec §4.H): a disk-backed index of
//! sessions and templates under `$XDG_CONFIG_HOME/openmux/sessions/`.
//!
//! Grounded on `config.rs`'s tolerant-parse philosophy (malformed file logs
//! and falls back rather than aborting) and `paths.rs` for the on-disk
//! layout. Switching PTY ownership itself lives with the caller (the app
//! orchestrator, component via `client::ShimClient`) since this module has
//! no socket; it only tracks which session is active on disk.

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::error::{OpenmuxError, Result};
use crate::layout::{LayoutMode, LayoutNode, PaneLeaf, PaneId, Workspace};
use crate::paths;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SessionMetadata {
    pub id: String,
    pub name: String,
    pub created_at: i64,
    pub last_switched_at: i64,
    pub auto_named: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Session {
    pub metadata: SessionMetadata,
    pub workspaces: HashMap<u8, Workspace>,
    pub active_workspace_id: u8,
}

impl Session {
    fn new(id: String, name: String, auto_named: bool, now: i64) -> Self {
        let mut workspaces = HashMap::new();
        for id in 1..=9u8 {
            workspaces.insert(id, Workspace::empty(id));
        }
        Session {
            metadata: SessionMetadata { id, name, created_at: now, last_switched_at: now, auto_named },
            workspaces,
            active_workspace_id: 1,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct Index {
    sessions: Vec<SessionMetadata>,
    active_session_id: Option<String>,
}

/// Role a template leaf plays once instantiated: whether it becomes the
/// workspace's main pane or joins the stack (spec §3 Template).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TemplateRole {
    Main,
    Stack,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TemplateLeaf {
    pub role: TemplateRole,
    pub cwd: Option<String>,
    pub command: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TemplateWorkspace {
    pub label: Option<String>,
    #[serde(default)]
    pub layout_mode: LayoutMode,
    pub leaves: Vec<TemplateLeaf>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Template {
    pub id: String,
    pub name: String,
    pub workspaces: Vec<TemplateWorkspace>,
}

pub struct SessionStore {
    dir: PathBuf,
    templates_dir: PathBuf,
}

impl SessionStore {
    pub fn new() -> Self {
        SessionStore { dir: paths::sessions_dir(), templates_dir: paths::templates_dir() }
    }

    fn index_path(&self) -> PathBuf {
        self.dir.join("index.json")
    }

    fn session_path(&self, id: &str) -> PathBuf {
        self.dir.join(format!("{id}.json"))
    }

    fn template_path(&self, id: &str) -> PathBuf {
        self.templates_dir.join(format!("{id}.json"))
    }

    fn load_index(&self) -> Index {
        read_json_tolerant(&self.index_path()).unwrap_or_default()
    }

    fn save_index(&self, index: &Index) -> Result<()> {
        write_json(&self.index_path(), index)
    }

    pub fn list(&self) -> Vec<SessionMetadata> {
        self.load_index().sessions
    }

    pub fn active_session_id(&self) -> Option<String> {
        self.load_index().active_session_id
    }

    /// Creates a new empty session, auto-naming it `session-N` unless a name
    /// is supplied, and persists it as the active session.
    pub fn create(&self, name: Option<String>, now: i64) -> Result<Session> {
        let mut index = self.load_index();
        let id = next_id(&index.sessions);
        let auto_named = name.is_none();
        let name = name.unwrap_or_else(|| format!("session-{id}"));
        let session = Session::new(id.clone(), name, auto_named, now);
        self.save(&session)?;
        index.sessions.push(session.metadata.clone());
        index.active_session_id = Some(id);
        self.save_index(&index)?;
        Ok(session)
    }

    pub fn load(&self, id: &str) -> Result<Session> {
        let path = self.session_path(id);
        read_json_tolerant(&path).ok_or_else(|| OpenmuxError::not_found(format!("session {id}")))
    }

    pub fn save(&self, session: &Session) -> Result<()> {
        write_json(&self.session_path(&session.metadata.id), session)
    }

    pub fn rename(&self, id: &str, name: String) -> Result<()> {
        let mut session = self.load(id)?;
        session.metadata.name = name;
        session.metadata.auto_named = false;
        self.save(&session)?;
        let mut index = self.load_index();
        if let Some(entry) = index.sessions.iter_mut().find(|s| s.id == id) {
            *entry = session.metadata.clone();
        }
        self.save_index(&index)
    }

    pub fn delete(&self, id: &str) -> Result<()> {
        let mut index = self.load_index();
        index.sessions.retain(|s| s.id != id);
        if index.active_session_id.as_deref() == Some(id) {
            index.active_session_id = index.sessions.first().map(|s| s.id.clone());
        }
        self.save_index(&index)?;
        let _ = fs::remove_file(self.session_path(id));
        Ok(())
    }

    /// Records `to_id` as active and stamps `last_switched_at` on both the
    /// outgoing and incoming session. Caller is responsible for PTY
    /// suspend/adopt against the shim (spec §4.H step 2-3); this only
    /// persists the disk-side half of the switch.
    pub fn switch(&self, from: Option<&Session>, to_id: &str, now: i64) -> Result<Session> {
        if let Some(outgoing) = from {
            self.save(outgoing)?;
        }
        let mut incoming = self.load(to_id)?;
        incoming.metadata.last_switched_at = now;
        self.save(&incoming)?;
        let mut index = self.load_index();
        index.active_session_id = Some(to_id.to_string());
        if let Some(entry) = index.sessions.iter_mut().find(|s| s.id == to_id) {
            entry.last_switched_at = now;
        }
        self.save_index(&index)?;
        Ok(incoming)
    }

    pub fn load_template(&self, id: &str) -> Result<Template> {
        read_json_tolerant(&self.template_path(id)).ok_or_else(|| OpenmuxError::not_found(format!("template {id}")))
    }

    pub fn save_template(&self, template: &Template) -> Result<()> {
        write_json(&self.template_path(&template.id), template)
    }

    /// Instantiates a template into a brand-new session (spec §4.H). Each
    /// leaf becomes a pane with a fresh id; the PTY itself is left to be
    /// lazily created on first render, exactly like a restored session's
    /// adopt-or-create path.
    pub fn instantiate(&self, template: &Template, name: String, now: i64) -> Result<Session> {
        let mut index = self.load_index();
        let id = next_id(&index.sessions);
        let mut session = Session::new(id.clone(), name, false, now);
        let mut next_pane_id: PaneId = 1;

        for (slot, tw) in template.workspaces.iter().enumerate() {
            let workspace_id = (slot + 1) as u8;
            if workspace_id > 9 {
                break;
            }
            let mut workspace = Workspace::empty(workspace_id);
            workspace.label = tw.label.clone();
            workspace.layout_mode = tw.layout_mode;
            for leaf in &tw.leaves {
                let pane_id = next_pane_id;
                next_pane_id += 1;
                let node = LayoutNode::Leaf(PaneLeaf {
                    pane_id,
                    pty_id: None,
                    title: leaf.command.clone(),
                    rectangle: None,
                    pending_cwd: leaf.cwd.clone(),
                    pending_command: leaf.command.clone(),
                });
                match leaf.role {
                    TemplateRole::Main if workspace.main_pane.is_none() => workspace.main_pane = Some(node),
                    _ => workspace.stack_panes.push(node),
                }
                if workspace.focused_pane_id.is_none() {
                    workspace.focused_pane_id = Some(pane_id);
                }
            }
            session.workspaces.insert(workspace_id, workspace);
        }

        self.save(&session)?;
        index.sessions.push(session.metadata.clone());
        index.active_session_id = Some(id);
        self.save_index(&index)?;
        Ok(session)
    }
}

impl Default for SessionStore {
    fn default() -> Self {
        Self::new()
    }
}

fn next_id(existing: &[SessionMetadata]) -> String {
    let mut n = existing.len() as u64 + 1;
    let used: std::collections::HashSet<&str> = existing.iter().map(|s| s.id.as_str()).collect();
    loop {
        let candidate = format!("s{n}");
        if !used.contains(candidate.as_str()) {
            return candidate;
        }
        n += 1;
    }
}

fn read_json_tolerant<T: for<'de> Deserialize<'de>>(path: &Path) -> Option<T> {
    let text = fs::read_to_string(path).ok()?;
    match serde_json::from_str(&text) {
        Ok(value) => Some(value),
        Err(e) => {
            warn!(error = %e, path = %path.display(), "malformed session store file, ignoring");
            None
        }
    }
}

fn write_json<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let text = serde_json::to_string_pretty(value).map_err(|e| OpenmuxError::internal(e.to_string()))?;
    fs::write(path, text)?;
    Ok(())
}

/// Periodic + version-triggered auto-save (spec §4.H "Auto-save is
/// time-driven and also fires on every layoutVersion bump").
pub struct AutoSaver {
    interval_ms: u64,
    last_saved_at_ms: i64,
    last_layout_version: u64,
}

impl AutoSaver {
    pub fn new(interval_ms: u64, now_ms: i64, layout_version: u64) -> Self {
        AutoSaver { interval_ms, last_saved_at_ms: now_ms, last_layout_version: layout_version }
    }

    /// Returns true (and records the save) if an auto-save should happen
    /// now: either the interval elapsed or the layout version moved since
    /// the last save.
    pub fn should_save(&mut self, now_ms: i64, layout_version: u64) -> bool {
        let due = now_ms.saturating_sub(self.last_saved_at_ms) as u64 >= self.interval_ms;
        let changed = layout_version != self.last_layout_version;
        if due || changed {
            self.last_saved_at_ms = now_ms;
            self.last_layout_version = layout_version;
            true
        } else {
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn store_in(dir: &std::path::Path) -> SessionStore {
        SessionStore {
            dir: dir.join("sessions"),
            templates_dir: dir.join("templates"),
        }
    }

    #[test]
    fn create_list_and_load_round_trip() {
        let tmp = TempDir::new().unwrap();
        let store = store_in(tmp.path());
        let session = store.create(Some("work".into()), 1000).unwrap();
        let listed = store.list();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].name, "work");
        let loaded = store.load(&session.metadata.id).unwrap();
        assert_eq!(loaded.metadata.id, session.metadata.id);
        assert_eq!(loaded.workspaces.len(), 9);
    }

    #[test]
    fn rename_updates_both_file_and_index() {
        let tmp = TempDir::new().unwrap();
        let store = store_in(tmp.path());
        let session = store.create(None, 1000).unwrap();
        assert!(session.metadata.auto_named);
        store.rename(&session.metadata.id, "renamed".into()).unwrap();
        let listed = store.list();
        assert_eq!(listed[0].name, "renamed");
        assert!(!listed[0].auto_named);
    }

    #[test]
    fn delete_removes_file_and_clears_active_if_needed() {
        let tmp = TempDir::new().unwrap();
        let store = store_in(tmp.path());
        let session = store.create(None, 1000).unwrap();
        let id = session.metadata.id.clone();
        store.delete(&id).unwrap();
        assert!(store.list().is_empty());
        assert!(store.active_session_id().is_none());
        assert!(store.load(&id).is_err());
    }

    #[test]
    fn switch_stamps_last_switched_at_and_updates_index() {
        let tmp = TempDir::new().unwrap();
        let store = store_in(tmp.path());
        let a = store.create(Some("a".into()), 1000).unwrap();
        let b = store.create(Some("b".into()), 1000).unwrap();
        let switched = store.switch(Some(&a), &b.metadata.id, 5000).unwrap();
        assert_eq!(switched.metadata.last_switched_at, 5000);
        assert_eq!(store.active_session_id().as_deref(), Some(b.metadata.id.as_str()));
    }

    #[test]
    fn malformed_session_file_is_treated_as_not_found() {
        let tmp = TempDir::new().unwrap();
        let store = store_in(tmp.path());
        std::fs::create_dir_all(&store.dir).unwrap();
        std::fs::write(store.dir.join("bogus.json"), b"{ not json").unwrap();
        assert!(store.load("bogus").is_err());
    }

    #[test]
    fn instantiate_template_builds_main_and_stack_panes() {
        let tmp = TempDir::new().unwrap();
        let store = store_in(tmp.path());
        let template = Template {
            id: "t1".into(),
            name: "two-pane".into(),
            workspaces: vec![TemplateWorkspace {
                label: Some("dev".into()),
                layout_mode: LayoutMode::Vertical,
                leaves: vec![
                    TemplateLeaf { role: TemplateRole::Main, cwd: Some("/tmp".into()), command: None },
                    TemplateLeaf { role: TemplateRole::Stack, cwd: Some("/tmp".into()), command: Some("htop".into()) },
                ],
            }],
        };
        let session = store.instantiate(&template, "from-template".into(), 1000).unwrap();
        let ws = &session.workspaces[&1];
        assert!(ws.main_pane.is_some());
        assert_eq!(ws.stack_panes.len(), 1);
        assert_eq!(ws.all_pane_ids().len(), 2);
    }

    #[test]
    fn auto_saver_fires_on_interval_or_version_bump() {
        let mut saver = AutoSaver::new(1000, 0, 1);
        assert!(!saver.should_save(500, 1));
        assert!(saver.should_save(500, 2));
        assert!(saver.should_save(1600, 2));
        assert!(!saver.should_save(1700, 2));
    }
}
