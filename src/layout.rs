//! Component G — the layout engine (spec §4.G): a reducer over
//! `LayoutState{workspaces, activeWorkspaceId, viewport, config,
//! layoutVersion, layoutGeometryVersion}`, plus a pure geometry pass.
//!
//! Grounded on the teacher's `tree.rs` (recursive ratio-based split tree,
//! `compute_rects`) for the split-tree mechanics inside a `LayoutNode`
//! subtree, regeneralized from `psmux`'s pure-BSP `Node::{Leaf,Split}` tree
//! into the spec's `Workspace{mainPane, stackPanes}` main/stack model (§3).

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::config::LayoutConfig;

pub type PaneId = u64;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SplitDirection {
    /// Side by side: divides width.
    Horizontal,
    /// Top and bottom: divides height.
    Vertical,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LayoutMode {
    Vertical,
    Horizontal,
    Stacked,
}

impl Default for LayoutMode {
    fn default() -> Self {
        LayoutMode::Vertical
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Rectangle {
    pub x: u16,
    pub y: u16,
    pub width: u16,
    pub height: u16,
}

impl Rectangle {
    pub const ZERO: Rectangle = Rectangle { x: 0, y: 0, width: 0, height: 0 };

    fn split_horizontal(self, ratio: f32) -> (Rectangle, Rectangle) {
        let left_w = ((self.width as f32) * ratio).round() as u16;
        let left_w = left_w.min(self.width);
        let first = Rectangle { x: self.x, y: self.y, width: left_w, height: self.height };
        let second =
            Rectangle { x: self.x + left_w, y: self.y, width: self.width - left_w, height: self.height };
        (first, second)
    }

    fn split_vertical(self, ratio: f32) -> (Rectangle, Rectangle) {
        let top_h = ((self.height as f32) * ratio).round() as u16;
        let top_h = top_h.min(self.height);
        let first = Rectangle { x: self.x, y: self.y, width: self.width, height: top_h };
        let second =
            Rectangle { x: self.x, y: self.y + top_h, width: self.width, height: self.height - top_h };
        (first, second)
    }
}

impl From<ratatui::layout::Rect> for Rectangle {
    fn from(r: ratatui::layout::Rect) -> Self {
        Rectangle { x: r.x, y: r.y, width: r.width, height: r.height }
    }
}

impl From<Rectangle> for ratatui::layout::Rect {
    fn from(r: Rectangle) -> Self {
        ratatui::layout::Rect { x: r.x, y: r.y, width: r.width, height: r.height }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PaneLeaf {
    pub pane_id: PaneId,
    pub pty_id: Option<String>,
    pub title: Option<String>,
    #[serde(skip)]
    pub rectangle: Option<Rectangle>,
    /// Working directory to spawn with the first time this pane is
    /// rendered and has no `pty_id` yet (restored session or template
    /// instantiation, spec §4.H lazy-adopt-or-create path).
    #[serde(default)]
    pub pending_cwd: Option<String>,
    /// Shell command to run instead of the default shell, same lazy-spawn
    /// timing as `pending_cwd`.
    #[serde(default)]
    pub pending_command: Option<String>,
}

impl PaneLeaf {
    pub fn new(pane_id: PaneId) -> Self {
        PaneLeaf { pane_id, pty_id: None, title: None, rectangle: None, pending_cwd: None, pending_command: None }
    }
}

/// A leaf or a ratio-based binary split (spec §3 `LayoutNode`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum LayoutNode {
    Leaf(PaneLeaf),
    Split { direction: SplitDirection, ratio: f32, first: Box<LayoutNode>, second: Box<LayoutNode> },
}

impl LayoutNode {
    pub fn leaf(pane_id: PaneId) -> Self {
        LayoutNode::Leaf(PaneLeaf::new(pane_id))
    }

    pub fn split(direction: SplitDirection, ratio: f32, first: LayoutNode, second: LayoutNode) -> Self {
        LayoutNode::Split { direction, ratio: ratio.clamp(0.1, 0.9), first: Box::new(first), second: Box::new(second) }
    }

    pub fn pane_ids(&self) -> Vec<PaneId> {
        match self {
            LayoutNode::Leaf(l) => vec![l.pane_id],
            LayoutNode::Split { first, second, .. } => {
                let mut ids = first.pane_ids();
                ids.extend(second.pane_ids());
                ids
            }
        }
    }

    pub fn contains(&self, pane_id: PaneId) -> bool {
        self.pane_ids().contains(&pane_id)
    }

    pub fn find_leaf_mut(&mut self, pane_id: PaneId) -> Option<&mut PaneLeaf> {
        match self {
            LayoutNode::Leaf(l) if l.pane_id == pane_id => Some(l),
            LayoutNode::Leaf(_) => None,
            LayoutNode::Split { first, second, .. } => first.find_leaf_mut(pane_id).or_else(|| second.find_leaf_mut(pane_id)),
        }
    }

    /// Replaces the leaf `pane_id` with a new split whose `first` keeps the
    /// existing leaf and whose `second` is `new_leaf` (spec §4.G
    /// `SPLIT_PANE`).
    fn split_leaf(&mut self, pane_id: PaneId, direction: SplitDirection, ratio: f32, new_leaf: LayoutNode) -> bool {
        match self {
            LayoutNode::Leaf(l) if l.pane_id == pane_id => {
                let existing = std::mem::replace(self, LayoutNode::leaf(0));
                *self = LayoutNode::split(direction, ratio, existing, new_leaf);
                true
            }
            LayoutNode::Leaf(_) => false,
            LayoutNode::Split { first, second, .. } => {
                first.split_leaf(pane_id, direction, ratio, new_leaf.clone())
                    || second.split_leaf(pane_id, direction, ratio, new_leaf)
            }
        }
    }

    /// Removes `pane_id`, collapsing its parent split into the sibling.
    /// Returns `None` if removing `pane_id` would empty the whole subtree.
    fn remove(self, pane_id: PaneId) -> Option<LayoutNode> {
        match self {
            LayoutNode::Leaf(l) => {
                if l.pane_id == pane_id {
                    None
                } else {
                    Some(LayoutNode::Leaf(l))
                }
            }
            LayoutNode::Split { direction, ratio, first, second } => {
                let first_has = first.contains(pane_id);
                if first_has {
                    match first.remove(pane_id) {
                        Some(replaced) => Some(LayoutNode::Split { direction, ratio, first: Box::new(replaced), second }),
                        None => Some(*second),
                    }
                } else {
                    match second.remove(pane_id) {
                        Some(replaced) => Some(LayoutNode::Split { direction, ratio, first, second: Box::new(replaced) }),
                        None => Some(*first),
                    }
                }
            }
        }
    }

    fn set_rectangles(&mut self, area: Rectangle, min_w: u16, min_h: u16, out: &mut HashMap<PaneId, Rectangle>) {
        match self {
            LayoutNode::Leaf(l) => {
                l.rectangle = Some(area);
                out.insert(l.pane_id, area);
            }
            LayoutNode::Split { direction, ratio, first, second } => {
                let (a, b) = match direction {
                    SplitDirection::Horizontal => clamp_split(area, *ratio, min_w, area.width, |r, ra| r.split_horizontal(ra)),
                    SplitDirection::Vertical => clamp_split(area, *ratio, min_h, area.height, |r, ra| r.split_vertical(ra)),
                };
                first.set_rectangles(a, min_w, min_h, out);
                second.set_rectangles(b, min_w, min_h, out);
            }
        }
    }
}

fn clamp_split(
    area: Rectangle,
    ratio: f32,
    min_dim: u16,
    total_dim: u16,
    split: impl Fn(Rectangle, f32) -> (Rectangle, Rectangle),
) -> (Rectangle, Rectangle) {
    let min_ratio = if total_dim == 0 { 0.0 } else { (min_dim as f32 / total_dim as f32).min(0.5) };
    let clamped = ratio.clamp(min_ratio, 1.0 - min_ratio);
    split(area, clamped)
}

/// One of up to nine independent pane trees (spec §3 `Workspace`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Workspace {
    pub id: u8,
    pub label: Option<String>,
    pub layout_mode: LayoutMode,
    pub main_pane: Option<LayoutNode>,
    pub stack_panes: Vec<LayoutNode>,
    pub focused_pane_id: Option<PaneId>,
    pub zoomed: bool,
    pub active_stack_index: usize,
}

impl Workspace {
    pub fn empty(id: u8) -> Self {
        Workspace {
            id,
            label: None,
            layout_mode: LayoutMode::default(),
            main_pane: None,
            stack_panes: Vec::new(),
            focused_pane_id: None,
            zoomed: false,
            active_stack_index: 0,
        }
    }

    /// Every pane id appearing in this workspace, checked for uniqueness by
    /// callers that construct a `Workspace` (spec §3 invariant).
    pub fn all_pane_ids(&self) -> Vec<PaneId> {
        let mut ids: Vec<PaneId> = self.main_pane.iter().flat_map(|n| n.pane_ids()).collect();
        for stack in &self.stack_panes {
            ids.extend(stack.pane_ids());
        }
        ids
    }

    pub fn find_leaf_mut(&mut self, pane_id: PaneId) -> Option<&mut PaneLeaf> {
        if let Some(main) = self.main_pane.as_mut() {
            if let Some(leaf) = main.find_leaf_mut(pane_id) {
                return Some(leaf);
            }
        }
        self.stack_panes.iter_mut().find_map(|n| n.find_leaf_mut(pane_id))
    }

    pub fn pane_ids_are_unique(&self) -> bool {
        let ids = self.all_pane_ids();
        let mut sorted = ids.clone();
        sorted.sort_unstable();
        sorted.dedup();
        sorted.len() == ids.len()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FocusDirection {
    Left,
    Right,
    Up,
    Down,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FocusTarget {
    Direction(FocusDirection),
    Id(PaneId),
}

#[derive(Debug, Clone)]
pub enum Action {
    NewPane,
    SplitPane(SplitDirection),
    ClosePane(PaneId),
    Focus(FocusTarget),
    SetLayoutMode(LayoutMode),
    ToggleZoom,
    SwitchWorkspace(u8),
    SetViewport(Rectangle),
    LoadSession(Vec<Workspace>, u8),
    ClearAll,
}

/// `LayoutState` (spec §4.G): the full reducer surface the UI process
/// drives.
pub struct LayoutState {
    pub workspaces: HashMap<u8, Workspace>,
    pub active_workspace_id: u8,
    pub viewport: Rectangle,
    pub config: LayoutConfig,
    pub layout_version: u64,
    pub layout_geometry_version: u64,
    next_pane_id: PaneId,
}

impl LayoutState {
    pub fn new(config: LayoutConfig, viewport: Rectangle) -> Self {
        let mut workspaces = HashMap::new();
        for id in 1..=9u8 {
            workspaces.insert(id, Workspace::empty(id));
        }
        LayoutState {
            workspaces,
            active_workspace_id: 1,
            viewport,
            config,
            layout_version: 0,
            layout_geometry_version: 0,
            next_pane_id: 1,
        }
    }

    fn fresh_pane_id(&mut self) -> PaneId {
        let id = self.next_pane_id;
        self.next_pane_id += 1;
        id
    }

    fn active_workspace_mut(&mut self) -> &mut Workspace {
        self.workspaces.entry(self.active_workspace_id).or_insert_with(|| Workspace::empty(self.active_workspace_id))
    }

    pub fn active_workspace(&self) -> &Workspace {
        &self.workspaces[&self.active_workspace_id]
    }

    pub fn find_leaf_mut(&mut self, workspace_id: u8, pane_id: PaneId) -> Option<&mut PaneLeaf> {
        self.workspaces.get_mut(&workspace_id)?.find_leaf_mut(pane_id)
    }

    /// Applies one action, bumping `layout_version` on structural changes
    /// and `layout_geometry_version` only when a pane's rectangle actually
    /// moved (spec §4.G) — a pure focus change, for instance, must not bump
    /// it.
    pub fn dispatch(&mut self, action: Action) {
        let before = self.geometry();
        let structural = self.apply(action);
        if structural {
            self.layout_version += 1;
        }
        if self.geometry() != before {
            self.layout_geometry_version += 1;
        }
    }

    fn apply(&mut self, action: Action) -> bool {
        match action {
            Action::NewPane => {
                let id = self.fresh_pane_id();
                let ws = self.active_workspace_mut();
                if ws.main_pane.is_none() {
                    ws.main_pane = Some(LayoutNode::leaf(id));
                } else {
                    ws.stack_panes.push(LayoutNode::leaf(id));
                }
                ws.focused_pane_id = Some(id);
                true
            }
            Action::SplitPane(direction) => {
                let new_id = self.fresh_pane_id();
                let ratio = self.config.default_split_ratio;
                let ws = self.active_workspace_mut();
                let Some(focused) = ws.focused_pane_id else { return false };
                let new_leaf = LayoutNode::leaf(new_id);
                let split_in_main = ws.main_pane.as_ref().is_some_and(|n| n.contains(focused));
                let done = if split_in_main {
                    ws.main_pane.as_mut().unwrap().split_leaf(focused, direction, ratio, new_leaf)
                } else {
                    ws.stack_panes.iter_mut().any(|n| n.split_leaf(focused, direction, ratio, new_leaf.clone()))
                };
                if done {
                    ws.focused_pane_id = Some(new_id);
                }
                done
            }
            Action::ClosePane(pane_id) => {
                let ws = self.active_workspace_mut();
                let was_main = ws.main_pane.as_ref().is_some_and(|n| n.contains(pane_id));
                if was_main {
                    ws.main_pane = ws.main_pane.take().and_then(|n| n.remove(pane_id));
                } else {
                    let mut removed_any = false;
                    ws.stack_panes = ws
                        .stack_panes
                        .drain(..)
                        .filter_map(|n| {
                            if n.contains(pane_id) {
                                removed_any = true;
                                n.remove(pane_id)
                            } else {
                                Some(n)
                            }
                        })
                        .collect();
                    let _ = removed_any;
                }
                if ws.focused_pane_id == Some(pane_id) {
                    ws.focused_pane_id = ws.all_pane_ids().first().copied();
                }
                ws.active_stack_index = ws.active_stack_index.min(ws.stack_panes.len().saturating_sub(1));
                true
            }
            Action::Focus(target) => self.apply_focus(target),
            Action::SetLayoutMode(mode) => {
                self.active_workspace_mut().layout_mode = mode;
                true
            }
            Action::ToggleZoom => {
                let ws = self.active_workspace_mut();
                ws.zoomed = !ws.zoomed;
                false
            }
            Action::SwitchWorkspace(id) => {
                self.active_workspace_id = id.clamp(1, 9);
                self.workspaces.entry(self.active_workspace_id).or_insert_with(|| Workspace::empty(self.active_workspace_id));
                true
            }
            Action::SetViewport(rect) => {
                self.viewport = rect;
                false
            }
            Action::LoadSession(workspaces, active_id) => {
                self.workspaces.clear();
                for ws in workspaces {
                    self.workspaces.insert(ws.id, ws);
                }
                for id in 1..=9u8 {
                    self.workspaces.entry(id).or_insert_with(|| Workspace::empty(id));
                }
                self.active_workspace_id = active_id.clamp(1, 9);
                true
            }
            Action::ClearAll => {
                self.workspaces.clear();
                for id in 1..=9u8 {
                    self.workspaces.insert(id, Workspace::empty(id));
                }
                self.active_workspace_id = 1;
                true
            }
        }
    }

    fn apply_focus(&mut self, target: FocusTarget) -> bool {
        let rects = self.geometry();
        let ws = self.active_workspace_mut();
        match target {
            FocusTarget::Id(id) => {
                if ws.all_pane_ids().contains(&id) {
                    ws.focused_pane_id = Some(id);
                }
            }
            FocusTarget::Direction(dir) => {
                let Some(current) = ws.focused_pane_id else { return false };
                let Some(current_rect) = rects.get(&current) else { return false };
                let best = rects
                    .iter()
                    .filter(|(id, _)| **id != current)
                    .filter(|(_, rect)| directionally_ahead(dir, *current_rect, **rect))
                    .min_by_key(|(_, rect)| distance(*current_rect, **rect));
                if let Some((id, _)) = best {
                    ws.focused_pane_id = Some(*id);
                }
            }
        }
        false
    }

    /// Pure geometry pass: `(workspace, viewport, config) -> {paneId:
    /// rectangle}` (spec §4.G). Stacked mode shows only the active stack
    /// pane; the rest get zero-area rectangles but keep their state.
    pub fn geometry(&self) -> HashMap<PaneId, Rectangle> {
        geometry_for(self.active_workspace(), self.viewport, &self.config)
    }
}

pub fn geometry_for(workspace: &Workspace, viewport: Rectangle, config: &LayoutConfig) -> HashMap<PaneId, Rectangle> {
    let mut out = HashMap::new();
    let inner = apply_padding(viewport, config);

    if workspace.zoomed {
        if let Some(id) = workspace.focused_pane_id {
            out.insert(id, inner);
            for other in workspace.all_pane_ids() {
                out.entry(other).or_insert(Rectangle::ZERO);
            }
            return out;
        }
    }

    let Some(main) = &workspace.main_pane else {
        for stack in &workspace.stack_panes {
            let mut n = stack.clone();
            n.set_rectangles(inner, config.min_pane_width, config.min_pane_height, &mut out);
        }
        return out;
    };

    if workspace.stack_panes.is_empty() {
        let mut n = main.clone();
        n.set_rectangles(inner, config.min_pane_width, config.min_pane_height, &mut out);
        return out;
    }

    match workspace.layout_mode {
        LayoutMode::Stacked => {
            // Only one pane is ever visible: the focused one if it belongs
            // to this workspace, else whichever `activeStackIndex` points
            // at, else main. Everyone else gets a zero-area rect but keeps
            // their place in the tree.
            let visible = workspace
                .focused_pane_id
                .filter(|id| workspace.all_pane_ids().contains(id))
                .or_else(|| workspace.stack_panes.get(workspace.active_stack_index).and_then(|n| n.pane_ids().into_iter().next()))
                .or_else(|| main.pane_ids().into_iter().next());

            let mut m = main.clone();
            if m.pane_ids().iter().any(|id| Some(*id) == visible) {
                m.set_rectangles(inner, config.min_pane_width, config.min_pane_height, &mut out);
            } else {
                for id in m.pane_ids() {
                    out.insert(id, Rectangle::ZERO);
                }
            }
            for stack in &workspace.stack_panes {
                if stack.pane_ids().iter().any(|id| Some(*id) == visible) {
                    let mut n = stack.clone();
                    n.set_rectangles(inner, config.min_pane_width, config.min_pane_height, &mut out);
                } else {
                    for id in stack.pane_ids() {
                        out.insert(id, Rectangle::ZERO);
                    }
                }
            }
        }
        LayoutMode::Vertical => {
            let (main_area, stack_area) = inner.split_horizontal(config.default_split_ratio);
            let mut m = main.clone();
            m.set_rectangles(main_area, config.min_pane_width, config.min_pane_height, &mut out);
            lay_out_stack_vertically(&workspace.stack_panes, stack_area, config, &mut out);
        }
        LayoutMode::Horizontal => {
            let (main_area, stack_area) = inner.split_vertical(config.default_split_ratio);
            let mut m = main.clone();
            m.set_rectangles(main_area, config.min_pane_width, config.min_pane_height, &mut out);
            lay_out_stack_horizontally(&workspace.stack_panes, stack_area, config, &mut out);
        }
    }
    out
}

fn lay_out_stack_vertically(stack: &[LayoutNode], area: Rectangle, config: &LayoutConfig, out: &mut HashMap<PaneId, Rectangle>) {
    if stack.is_empty() {
        return;
    }
    let each_h = (area.height / stack.len() as u16).max(1);
    let mut y = area.y;
    for (i, node) in stack.iter().enumerate() {
        let h = if i == stack.len() - 1 { area.y + area.height - y } else { each_h };
        let rect = Rectangle { x: area.x, y, width: area.width, height: h };
        let mut n = node.clone();
        n.set_rectangles(rect, config.min_pane_width, config.min_pane_height, out);
        y += h;
    }
}

fn lay_out_stack_horizontally(stack: &[LayoutNode], area: Rectangle, config: &LayoutConfig, out: &mut HashMap<PaneId, Rectangle>) {
    if stack.is_empty() {
        return;
    }
    let each_w = (area.width / stack.len() as u16).max(1);
    let mut x = area.x;
    for (i, node) in stack.iter().enumerate() {
        let w = if i == stack.len() - 1 { area.x + area.width - x } else { each_w };
        let rect = Rectangle { x, y: area.y, width: w, height: area.height };
        let mut n = node.clone();
        n.set_rectangles(rect, config.min_pane_width, config.min_pane_height, out);
        x += w;
    }
}

fn apply_padding(viewport: Rectangle, config: &LayoutConfig) -> Rectangle {
    let p = config.outer_padding;
    let x = viewport.x + p.left;
    let y = viewport.y + p.top;
    let width = viewport.width.saturating_sub(p.left + p.right);
    let height = viewport.height.saturating_sub(p.top + p.bottom);
    Rectangle { x, y, width, height }
}

fn directionally_ahead(dir: FocusDirection, from: Rectangle, to: Rectangle) -> bool {
    match dir {
        FocusDirection::Left => to.x + to.width <= from.x,
        FocusDirection::Right => to.x >= from.x + from.width,
        FocusDirection::Up => to.y + to.height <= from.y,
        FocusDirection::Down => to.y >= from.y + from.height,
    }
}

fn distance(a: Rectangle, b: Rectangle) -> u32 {
    let dx = (a.x as i32 - b.x as i32).unsigned_abs();
    let dy = (a.y as i32 - b.y as i32).unsigned_abs();
    dx * dx + dy * dy
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> LayoutConfig {
        LayoutConfig { min_pane_width: 2, min_pane_height: 2, default_split_ratio: 0.5, ..LayoutConfig::default() }
    }

    #[test]
    fn new_pane_becomes_main_then_stack() {
        let mut state = LayoutState::new(config(), Rectangle { x: 0, y: 0, width: 100, height: 40 });
        state.dispatch(Action::NewPane);
        state.dispatch(Action::NewPane);
        let ws = state.active_workspace();
        assert!(ws.main_pane.is_some());
        assert_eq!(ws.stack_panes.len(), 1);
        assert_eq!(state.layout_version, 2);
    }

    #[test]
    fn split_pane_keeps_pane_ids_unique() {
        let mut state = LayoutState::new(config(), Rectangle { x: 0, y: 0, width: 100, height: 40 });
        state.dispatch(Action::NewPane);
        state.dispatch(Action::SplitPane(SplitDirection::Horizontal));
        let ws = state.active_workspace();
        assert!(ws.pane_ids_are_unique());
        assert_eq!(ws.all_pane_ids().len(), 2);
    }

    #[test]
    fn close_pane_collapses_split() {
        let mut state = LayoutState::new(config(), Rectangle { x: 0, y: 0, width: 100, height: 40 });
        state.dispatch(Action::NewPane);
        state.dispatch(Action::SplitPane(SplitDirection::Vertical));
        let second_id = state.active_workspace().focused_pane_id.unwrap();
        state.dispatch(Action::ClosePane(second_id));
        let ws = state.active_workspace();
        assert_eq!(ws.all_pane_ids().len(), 1);
        assert!(matches!(ws.main_pane, Some(LayoutNode::Leaf(_))));
    }

    #[test]
    fn geometry_respects_viewport_and_sums_to_area() {
        let mut state = LayoutState::new(config(), Rectangle { x: 0, y: 0, width: 100, height: 40 });
        state.dispatch(Action::NewPane);
        state.dispatch(Action::NewPane);
        state.dispatch(Action::SetLayoutMode(LayoutMode::Vertical));
        let rects = state.geometry();
        assert_eq!(rects.len(), 2);
        for r in rects.values() {
            assert!(r.width <= 100 && r.height <= 40);
        }
    }

    #[test]
    fn stacked_mode_zeroes_non_active_stack_panes() {
        let mut state = LayoutState::new(config(), Rectangle { x: 0, y: 0, width: 80, height: 24 });
        state.dispatch(Action::NewPane);
        state.dispatch(Action::NewPane);
        state.dispatch(Action::NewPane);
        state.dispatch(Action::SetLayoutMode(LayoutMode::Stacked));
        let rects = state.geometry();
        let ws = state.active_workspace();
        for stack in &ws.stack_panes {
            for id in stack.pane_ids() {
                assert_eq!(rects[&id], Rectangle::ZERO);
            }
        }
    }

    #[test]
    fn pure_focus_change_does_not_bump_geometry_version() {
        let mut state = LayoutState::new(config(), Rectangle { x: 0, y: 0, width: 100, height: 40 });
        state.dispatch(Action::NewPane);
        state.dispatch(Action::NewPane);
        let other = state.active_workspace().all_pane_ids().into_iter().find(|id| Some(*id) != state.active_workspace().focused_pane_id).unwrap();
        let before = state.layout_geometry_version;
        state.dispatch(Action::Focus(FocusTarget::Id(other)));
        assert_eq!(state.layout_geometry_version, before);
    }

    #[test]
    fn zoom_gives_focused_pane_full_viewport() {
        let mut state = LayoutState::new(config(), Rectangle { x: 0, y: 0, width: 80, height: 24 });
        state.dispatch(Action::NewPane);
        state.dispatch(Action::NewPane);
        state.dispatch(Action::ToggleZoom);
        let focused = state.active_workspace().focused_pane_id.unwrap();
        let rects = state.geometry();
        assert_eq!(rects[&focused].width, 80);
        assert_eq!(rects[&focused].height, 24);
    }
}
