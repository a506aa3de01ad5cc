//! Pane selector grammar (spec §4.I): parses the `pane` string a control
//! request carries and resolves it against the session's live workspace
//! set.

use std::collections::HashMap;

use crate::error::{OpenmuxError, Result};
use crate::layout::{LayoutNode, PaneId, PaneLeaf, Workspace};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PaneSelector {
    /// Absent selector, or the literal string `"focused"`.
    Focused,
    Main,
    /// Zero-based once parsed; the wire form `"stack:N"` is 1-based.
    Stack(usize),
    PaneId(PaneId),
    PtyId(String),
}

impl PaneSelector {
    pub fn parse(raw: Option<&str>) -> Result<Self> {
        let Some(raw) = raw else { return Ok(PaneSelector::Focused) };
        let raw = raw.trim();
        if raw.is_empty() || raw == "focused" {
            return Ok(PaneSelector::Focused);
        }
        if raw == "main" {
            return Ok(PaneSelector::Main);
        }
        if let Some(rest) = raw.strip_prefix("stack:") {
            let n: usize = rest.parse().map_err(|_| OpenmuxError::invalid(format!("bad stack index: {rest}")))?;
            if n == 0 {
                return Err(OpenmuxError::invalid("stack index is 1-based"));
            }
            return Ok(PaneSelector::Stack(n - 1));
        }
        if let Some(rest) = raw.strip_prefix("pane:") {
            let id: PaneId = rest.parse().map_err(|_| OpenmuxError::invalid(format!("bad pane id: {rest}")))?;
            return Ok(PaneSelector::PaneId(id));
        }
        if let Some(rest) = raw.strip_prefix("pty:") {
            return Ok(PaneSelector::PtyId(rest.to_string()));
        }
        if let Ok(id) = raw.parse::<PaneId>() {
            return Ok(PaneSelector::PaneId(id));
        }
        Err(OpenmuxError::invalid(format!("unrecognised pane selector: {raw}")))
    }
}

/// Resolves a selector to the `(workspaceId, paneId)` it names. `workspace_id`
/// scopes `pane:`/`pty:` lookups to one workspace; left `None`, the search
/// spans every workspace and a match in more than one is `ambiguous` (spec
/// §4.I).
pub fn resolve_selector(
    workspaces: &HashMap<u8, Workspace>,
    active_workspace_id: u8,
    workspace_id: Option<u8>,
    selector: &PaneSelector,
) -> Result<(u8, PaneId)> {
    match selector {
        PaneSelector::Focused => {
            let wid = workspace_id.unwrap_or(active_workspace_id);
            let ws = workspace(workspaces, wid)?;
            ws.focused_pane_id.map(|id| (wid, id)).ok_or_else(|| OpenmuxError::not_found("no focused pane"))
        }
        PaneSelector::Main => {
            let wid = workspace_id.unwrap_or(active_workspace_id);
            let ws = workspace(workspaces, wid)?;
            let main = ws.main_pane.as_ref().ok_or_else(|| OpenmuxError::not_found("workspace has no main pane"))?;
            single_leaf_id(main).map(|id| (wid, id))
        }
        PaneSelector::Stack(index) => {
            let wid = workspace_id.unwrap_or(active_workspace_id);
            let ws = workspace(workspaces, wid)?;
            let node = ws
                .stack_panes
                .get(*index)
                .ok_or_else(|| OpenmuxError::not_found(format!("stack:{}", index + 1)))?;
            single_leaf_id(node).map(|id| (wid, id))
        }
        PaneSelector::PaneId(id) => {
            let matches = find_by(workspaces, workspace_id, |leaf| leaf.pane_id == *id);
            match matches.len() {
                0 => Err(OpenmuxError::not_found(format!("pane {id}"))),
                1 => Ok(matches[0]),
                // Literal wording spec §8's selector-ambiguity scenario requires
                // verbatim on the CLI's stderr.
                _ => Err(OpenmuxError::ambiguous("Pane id matches multiple workspaces.")),
            }
        }
        PaneSelector::PtyId(pty_id) => {
            let matches = find_by(workspaces, workspace_id, |leaf| leaf.pty_id.as_deref() == Some(pty_id.as_str()));
            one_match(matches, || format!("pty {pty_id}"))
        }
    }
}

fn workspace(workspaces: &HashMap<u8, Workspace>, id: u8) -> Result<&Workspace> {
    workspaces.get(&id).ok_or_else(|| OpenmuxError::not_found(format!("workspace {id}")))
}

/// A slot ("main" or "stack:N") only resolves unambiguously when it holds
/// exactly one pane; a split slot needs `pane:ID` instead.
fn single_leaf_id(node: &LayoutNode) -> Result<PaneId> {
    match node.pane_ids().as_slice() {
        [id] => Ok(*id),
        [] => Err(OpenmuxError::not_found("empty pane slot")),
        _ => Err(OpenmuxError::ambiguous("slot contains more than one pane, use pane:ID")),
    }
}

fn find_by(
    workspaces: &HashMap<u8, Workspace>,
    workspace_id: Option<u8>,
    predicate: impl Fn(&PaneLeaf) -> bool,
) -> Vec<(u8, PaneId)> {
    let mut out = Vec::new();
    let candidate_ids: Vec<u8> = match workspace_id {
        Some(id) => vec![id],
        None => {
            let mut ids: Vec<u8> = workspaces.keys().copied().collect();
            ids.sort_unstable();
            ids
        }
    };
    for wid in candidate_ids {
        let Some(ws) = workspaces.get(&wid) else { continue };
        for node in ws.main_pane.iter().chain(ws.stack_panes.iter()) {
            collect_matches(node, &predicate, wid, &mut out);
        }
    }
    out
}

fn collect_matches(
    node: &LayoutNode,
    predicate: &impl Fn(&PaneLeaf) -> bool,
    workspace_id: u8,
    out: &mut Vec<(u8, PaneId)>,
) {
    match node {
        LayoutNode::Leaf(leaf) => {
            if predicate(leaf) {
                out.push((workspace_id, leaf.pane_id));
            }
        }
        LayoutNode::Split { first, second, .. } => {
            collect_matches(first, predicate, workspace_id, out);
            collect_matches(second, predicate, workspace_id, out);
        }
    }
}

fn one_match(matches: Vec<(u8, PaneId)>, what: impl Fn() -> String) -> Result<(u8, PaneId)> {
    match matches.len() {
        0 => Err(OpenmuxError::not_found(what())),
        1 => Ok(matches[0]),
        _ => Err(OpenmuxError::ambiguous(what())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::layout::{LayoutNode, SplitDirection};

    fn workspace_with(main: Option<LayoutNode>, stack: Vec<LayoutNode>, focused: Option<PaneId>) -> Workspace {
        let mut ws = Workspace::empty(1);
        ws.main_pane = main;
        ws.stack_panes = stack;
        ws.focused_pane_id = focused;
        ws
    }

    #[test]
    fn parses_all_grammar_forms() {
        assert_eq!(PaneSelector::parse(None).unwrap(), PaneSelector::Focused);
        assert_eq!(PaneSelector::parse(Some("focused")).unwrap(), PaneSelector::Focused);
        assert_eq!(PaneSelector::parse(Some("main")).unwrap(), PaneSelector::Main);
        assert_eq!(PaneSelector::parse(Some("stack:2")).unwrap(), PaneSelector::Stack(1));
        assert_eq!(PaneSelector::parse(Some("pane:7")).unwrap(), PaneSelector::PaneId(7));
        assert_eq!(PaneSelector::parse(Some("pty:abc")).unwrap(), PaneSelector::PtyId("abc".into()));
        assert_eq!(PaneSelector::parse(Some("9")).unwrap(), PaneSelector::PaneId(9));
        assert!(PaneSelector::parse(Some("stack:0")).is_err());
        assert!(PaneSelector::parse(Some("garbage!!")).is_err());
    }

    #[test]
    fn resolves_main_and_stack_by_index() {
        let ws = workspace_with(Some(LayoutNode::leaf(1)), vec![LayoutNode::leaf(2), LayoutNode::leaf(3)], Some(1));
        let mut map = HashMap::new();
        map.insert(1u8, ws);
        assert_eq!(resolve_selector(&map, 1, None, &PaneSelector::Main).unwrap(), (1, 1));
        assert_eq!(resolve_selector(&map, 1, None, &PaneSelector::Stack(1)).unwrap(), (1, 3));
        assert!(resolve_selector(&map, 1, None, &PaneSelector::Stack(5)).is_err());
    }

    #[test]
    fn main_slot_with_a_split_is_ambiguous() {
        let split = LayoutNode::Split {
            direction: SplitDirection::Vertical,
            ratio: 0.5,
            first: Box::new(LayoutNode::leaf(1)),
            second: Box::new(LayoutNode::leaf(2)),
        };
        let ws = workspace_with(Some(split), vec![], Some(1));
        let mut map = HashMap::new();
        map.insert(1u8, ws);
        let err = resolve_selector(&map, 1, None, &PaneSelector::Main).unwrap_err();
        assert_eq!(err.code(), crate::error::ErrorCode::Ambiguous);
    }

    #[test]
    fn pane_id_search_spans_workspaces_unless_scoped() {
        let ws1 = workspace_with(Some(LayoutNode::leaf(1)), vec![], Some(1));
        let ws2 = workspace_with(Some(LayoutNode::leaf(2)), vec![], Some(2));
        let mut map = HashMap::new();
        map.insert(1u8, ws1);
        map.insert(2u8, ws2);
        assert_eq!(resolve_selector(&map, 1, None, &PaneSelector::PaneId(2)).unwrap(), (2, 2));
        assert!(resolve_selector(&map, 1, Some(1), &PaneSelector::PaneId(2)).is_err());
    }

    #[test]
    fn focused_falls_back_to_not_found_when_unset() {
        let ws = workspace_with(None, vec![], None);
        let mut map = HashMap::new();
        map.insert(1u8, ws);
        assert!(resolve_selector(&map, 1, None, &PaneSelector::Focused).is_err());
    }
}
