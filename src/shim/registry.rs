//! Session↔pane↔pty mapping tables the shim keeps in lock-step (spec §3
//! "Mapping tables (shim)"): `sessionId -> {paneId -> ptyId}` and its
//! reverse index, used to re-adopt a PTY when a pane's session becomes
//! active again after a switch.

use std::collections::HashMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PaneKey {
    pub session_id: u64,
    pub pane_id: u64,
}

#[derive(Default)]
pub struct SessionMapping {
    forward: HashMap<u64, HashMap<u64, String>>,
    reverse: HashMap<String, PaneKey>,
}

impl SessionMapping {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, session_id: u64, pane_id: u64, pty_id: impl Into<String>) {
        let pty_id = pty_id.into();
        if let Some(prev) = self.forward.entry(session_id).or_default().insert(pane_id, pty_id.clone()) {
            self.reverse.remove(&prev);
        }
        self.reverse.insert(pty_id, PaneKey { session_id, pane_id });
    }

    pub fn pty_for(&self, session_id: u64, pane_id: u64) -> Option<&str> {
        self.forward.get(&session_id)?.get(&pane_id).map(String::as_str)
    }

    pub fn pane_for(&self, pty_id: &str) -> Option<PaneKey> {
        self.reverse.get(pty_id).copied()
    }

    pub fn entries_for(&self, session_id: u64) -> Vec<(u64, String)> {
        self.forward
            .get(&session_id)
            .map(|m| m.iter().map(|(pane, pty)| (*pane, pty.clone())).collect())
            .unwrap_or_default()
    }

    pub fn forget_pty(&mut self, pty_id: &str) {
        if let Some(key) = self.reverse.remove(pty_id) {
            if let Some(panes) = self.forward.get_mut(&key.session_id) {
                panes.remove(&key.pane_id);
            }
        }
    }

    pub fn forget_session(&mut self, session_id: u64) -> Vec<String> {
        let Some(panes) = self.forward.remove(&session_id) else { return Vec::new() };
        for pty_id in panes.values() {
            self.reverse.remove(pty_id);
        }
        panes.into_values().collect()
    }

    /// Invariant check used by tests: every forward entry has a matching
    /// reverse entry and vice versa.
    #[cfg(test)]
    fn consistent(&self) -> bool {
        for (sid, panes) in &self.forward {
            for (pid, pty) in panes {
                let Some(key) = self.reverse.get(pty) else { return false };
                if key.session_id != *sid || key.pane_id != *pid {
                    return false;
                }
            }
        }
        self.reverse.len() == self.forward.values().map(|m| m.len()).sum::<usize>()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn forward_and_reverse_stay_in_lock_step() {
        let mut m = SessionMapping::new();
        m.register(1, 10, "pty-a");
        m.register(1, 11, "pty-b");
        m.register(2, 10, "pty-c");
        assert!(m.consistent());
        assert_eq!(m.pty_for(1, 10), Some("pty-a"));
        assert_eq!(m.pane_for("pty-b"), Some(PaneKey { session_id: 1, pane_id: 11 }));

        m.forget_pty("pty-a");
        assert!(m.consistent());
        assert_eq!(m.pty_for(1, 10), None);

        let removed = m.forget_session(1);
        assert!(m.consistent());
        assert_eq!(removed, vec!["pty-b".to_string()]);
    }
}
