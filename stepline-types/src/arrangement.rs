//! Song arrangement: an arena-backed tree of groups and sections plus the
//! path cursor playback walks it with.
//!
//! Nodes are addressed by [`NodeId`]. Ids are stable across edits; a node
//! removed from the tree keeps its arena slot, so a stale id never aliases a
//! different node.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

/// Upper bound for the editable section fields.
pub const MAX_SECTION_VALUE: u8 = 127;
/// Upper bound for a group's repeat count.
pub const MAX_ITERATIONS: u8 = 128;

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct NodeId(u32);

impl NodeId {
    pub fn new(id: u32) -> Self {
        Self(id)
    }
    pub fn get(self) -> u32 {
        self.0
    }
}

impl std::fmt::Display for NodeId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Leaf payload: which part plays and for how long.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SongSection {
    pub part: usize,
    pub cycles: u8,
    pub start_beat: u8,
    pub start_cycles: u8,
    /// Keep the accumulated cycle counter when the section is re-entered.
    #[serde(default)]
    pub keep_cycles: bool,
}

impl SongSection {
    pub fn new(part: usize) -> Self {
        Self {
            part,
            cycles: 1,
            start_beat: 0,
            start_cycles: 1,
            keep_cycles: false,
        }
    }

    /// Whether a counter value has used up this section's cycles.
    pub fn is_exhausted(&self, count: u32) -> bool {
        u32::from(self.cycles) + u32::from(self.start_cycles) <= count
    }

    pub fn increase_cycles(&mut self) {
        self.cycles = bump(self.cycles);
    }

    pub fn decrease_cycles(&mut self) {
        self.cycles = self.cycles.saturating_sub(1);
    }

    pub fn increase_start_beat(&mut self) {
        self.start_beat = bump(self.start_beat);
    }

    pub fn decrease_start_beat(&mut self) {
        self.start_beat = self.start_beat.saturating_sub(1);
    }

    pub fn increase_start_cycles(&mut self) {
        self.start_cycles = bump(self.start_cycles);
    }

    pub fn decrease_start_cycles(&mut self) {
        self.start_cycles = self.start_cycles.saturating_sub(1);
    }

    pub fn toggle_keep_cycles(&mut self) {
        self.keep_cycles = !self.keep_cycles;
    }
}

fn bump(value: u8) -> u8 {
    value.saturating_add(1).min(MAX_SECTION_VALUE)
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
enum NodeKind {
    Group(Vec<NodeId>),
    Section(SongSection),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArrangementNode {
    /// Configured repeat count; only groups consult it.
    pub iterations: u8,
    kind: NodeKind,
}

impl ArrangementNode {
    fn group(iterations: u8, children: Vec<NodeId>) -> Self {
        Self {
            iterations,
            kind: NodeKind::Group(children),
        }
    }

    fn leaf(section: SongSection) -> Self {
        Self {
            iterations: 1,
            kind: NodeKind::Section(section),
        }
    }

    pub fn is_group(&self) -> bool {
        matches!(self.kind, NodeKind::Group(_))
    }

    pub fn section(&self) -> Option<&SongSection> {
        match &self.kind {
            NodeKind::Section(s) => Some(s),
            NodeKind::Group(_) => None,
        }
    }

    pub fn children(&self) -> &[NodeId] {
        match &self.kind {
            NodeKind::Group(children) => children,
            NodeKind::Section(_) => &[],
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Arrangement {
    nodes: Vec<ArrangementNode>,
    root: NodeId,
}

impl Arrangement {
    /// An empty song: a root group with no children.
    pub fn new() -> Self {
        Self {
            nodes: vec![ArrangementNode::group(1, Vec::new())],
            root: NodeId(0),
        }
    }

    /// A flat song playing `sections` in order.
    pub fn from_sections(sections: impl IntoIterator<Item = SongSection>) -> Self {
        let mut arrangement = Self::new();
        let root = arrangement.root;
        for section in sections {
            arrangement.add_section(root, section);
        }
        arrangement
    }

    pub fn root(&self) -> NodeId {
        self.root
    }

    pub fn node(&self, id: NodeId) -> Option<&ArrangementNode> {
        self.nodes.get(id.0 as usize)
    }

    fn node_mut(&mut self, id: NodeId) -> Option<&mut ArrangementNode> {
        self.nodes.get_mut(id.0 as usize)
    }

    pub fn is_group(&self, id: NodeId) -> bool {
        self.node(id).is_some_and(|n| n.is_group())
    }

    pub fn children(&self, id: NodeId) -> &[NodeId] {
        self.node(id).map(|n| n.children()).unwrap_or(&[])
    }

    fn children_mut(&mut self, id: NodeId) -> Option<&mut Vec<NodeId>> {
        match self.node_mut(id).map(|n| &mut n.kind) {
            Some(NodeKind::Group(children)) => Some(children),
            _ => None,
        }
    }

    pub fn section(&self, id: NodeId) -> Option<&SongSection> {
        self.node(id).and_then(|n| n.section())
    }

    pub fn section_mut(&mut self, id: NodeId) -> Option<&mut SongSection> {
        match self.node_mut(id).map(|n| &mut n.kind) {
            Some(NodeKind::Section(s)) => Some(s),
            _ => None,
        }
    }

    /// Configured repeat count of a node (1 for unknown ids).
    pub fn iterations(&self, id: NodeId) -> u8 {
        self.node(id).map(|n| n.iterations).unwrap_or(1)
    }

    fn alloc(&mut self, node: ArrangementNode) -> NodeId {
        let id = NodeId(self.nodes.len() as u32);
        self.nodes.push(node);
        id
    }

    /// Append a section under `parent`. `None` when `parent` is not a group.
    pub fn add_section(&mut self, parent: NodeId, section: SongSection) -> Option<NodeId> {
        if !self.is_group(parent) {
            return None;
        }
        let id = self.alloc(ArrangementNode::leaf(section));
        self.children_mut(parent)?.push(id);
        Some(id)
    }

    /// Append an empty group under `parent`.
    pub fn add_group(&mut self, parent: NodeId, iterations: u8) -> Option<NodeId> {
        if !self.is_group(parent) {
            return None;
        }
        let iterations = iterations.clamp(1, MAX_ITERATIONS);
        let id = self.alloc(ArrangementNode::group(iterations, Vec::new()));
        self.children_mut(parent)?.push(id);
        Some(id)
    }

    pub fn increase_iterations(&mut self, id: NodeId) {
        if let Some(node) = self.node_mut(id).filter(|n| n.is_group()) {
            node.iterations = (node.iterations + 1).min(MAX_ITERATIONS);
        }
    }

    pub fn decrease_iterations(&mut self, id: NodeId) {
        if let Some(node) = self.node_mut(id).filter(|n| n.is_group()) {
            node.iterations = node.iterations.saturating_sub(1).max(1);
        }
    }

    /// Node ids reachable from the root, in pre-order.
    pub fn walk(&self) -> Vec<NodeId> {
        let mut out = Vec::new();
        let mut stack = vec![self.root];
        while let Some(id) = stack.pop() {
            out.push(id);
            stack.extend(self.children(id).iter().rev());
        }
        out
    }

    fn count_sections_under(&self, id: NodeId) -> usize {
        if self.section(id).is_some() {
            return 1;
        }
        self.children(id)
            .iter()
            .map(|&c| self.count_sections_under(c))
            .sum()
    }

    pub fn count_sections(&self) -> usize {
        self.count_sections_under(self.root)
    }

    /// Wrap `parent`'s children `start..=end` in a new group with one
    /// iteration. Invalid ranges leave the tree untouched.
    pub fn group_nodes(&mut self, parent: NodeId, start: usize, end: usize) -> Option<NodeId> {
        let len = self.children_mut(parent)?.len();
        if start > end || end >= len {
            return None;
        }
        let group = self.alloc(ArrangementNode::group(1, Vec::new()));
        let members: Vec<NodeId> = self.children_mut(parent)?.splice(start..=end, [group]).collect();
        if let Some(children) = self.children_mut(group) {
            *children = members;
        }
        Some(group)
    }

    /// Replace the group at `parent`'s child `index` with its own children.
    pub fn ungroup(&mut self, parent: NodeId, index: usize) -> bool {
        let Some(&group) = self.children(parent).get(index) else {
            return false;
        };
        let Some(members) = self.children_mut(group).map(std::mem::take) else {
            return false;
        };
        match self.children_mut(parent) {
            Some(children) => {
                children.splice(index..=index, members);
                true
            }
            None => false,
        }
    }

    /// Insert a section next to the cursor's node (before it unless `after`)
    /// and point the cursor at it. At the root the section is appended.
    pub fn insert_section(
        &mut self,
        cursor: &mut Cursor,
        section: SongSection,
        after: bool,
    ) -> Option<NodeId> {
        if cursor.len() < 2 {
            let id = self.add_section(self.root, section)?;
            *cursor = Cursor::from_path(vec![self.root, id]);
            return Some(id);
        }
        let parent = cursor.parent()?;
        let current = cursor.current()?;
        let index = self.children(parent).iter().position(|&c| c == current)?;
        let at = if after { index + 1 } else { index };

        let id = self.alloc(ArrangementNode::leaf(section));
        self.children_mut(parent)?.insert(at, id);
        cursor.0.pop();
        cursor.0.push(id);
        Some(id)
    }

    /// Remove the cursor's node from its parent.
    ///
    /// The cursor retreats to the previous section in pre-order. When the
    /// removal empties the parent group, the group stays and the cursor moves
    /// to the group's previous sibling, or to the group itself when it is
    /// first. Deleting the root, or the song's last remaining section, is a
    /// no-op.
    pub fn delete_node(&mut self, cursor: &mut Cursor) {
        if cursor.len() < 2 {
            return;
        }
        let (Some(current), Some(parent)) = (cursor.current(), cursor.parent()) else {
            return;
        };
        if self.count_sections() <= self.count_sections_under(current) {
            return;
        }
        let Some(index) = self.children(parent).iter().position(|&c| c == current) else {
            return;
        };

        let mut retreat = cursor.clone();
        let retreated = retreat.move_prev(self);

        let Some(children) = self.children_mut(parent) else {
            return;
        };
        children.remove(index);
        let emptied = children.is_empty();

        if emptied {
            cursor.up();
            if cursor.len() >= 2 && !cursor.is_first_sibling(self) {
                if let Some(previous) = step_sibling(self, cursor.path(), Toward::Last) {
                    cursor.0 = previous;
                } else if let (Some(grandparent), Some(group)) = (cursor.parent(), cursor.current()) {
                    let siblings = self.children(grandparent);
                    let previous = siblings
                        .iter()
                        .position(|&c| c == group)
                        .and_then(|i| i.checked_sub(1))
                        .map(|i| siblings[i]);
                    if let Some(previous) = previous {
                        cursor.0.pop();
                        cursor.0.push(previous);
                    }
                }
            }
        } else if retreated {
            *cursor = retreat;
        } else {
            // Nothing before it: land on whatever now occupies its slot.
            cursor.0.pop();
            if let Some(&next) = self.children(parent).get(index) {
                cursor.0.push(next);
                let mut path = cursor.0.clone();
                if descend(self, &mut path, Toward::First) {
                    cursor.0 = path;
                }
            }
        }
    }
}

impl Default for Arrangement {
    fn default() -> Self {
        Self::new()
    }
}

/// Live play counters keyed by node identity.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IterationCounts(HashMap<NodeId, u32>);

impl IterationCounts {
    pub fn new() -> Self {
        Self(HashMap::new())
    }

    /// Counters for a fresh run: groups at 0, sections at `start_cycles`.
    pub fn seeded(arrangement: &Arrangement) -> Self {
        let mut counts = Self::new();
        for id in arrangement.walk() {
            let start = arrangement
                .section(id)
                .map(|s| u32::from(s.start_cycles))
                .unwrap_or(0);
            counts.set(id, start);
        }
        counts
    }

    pub fn get(&self, id: NodeId) -> u32 {
        self.0.get(&id).copied().unwrap_or(0)
    }

    pub fn set(&mut self, id: NodeId, value: u32) {
        self.0.insert(id, value);
    }

    pub fn increment(&mut self, id: NodeId) -> u32 {
        let count = self.0.entry(id).or_insert(0);
        *count += 1;
        *count
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Toward {
    First,
    Last,
}

/// Extend `path` down to the first (or last) section below its tail,
/// skipping empty groups. Leaves `path` unchanged on failure.
fn descend(arrangement: &Arrangement, path: &mut Vec<NodeId>, toward: Toward) -> bool {
    let Some(&tail) = path.last() else {
        return false;
    };
    let Some(node) = arrangement.node(tail) else {
        return false;
    };
    if !node.is_group() {
        return true;
    }
    let children = node.children();
    let ordered: Vec<NodeId> = match toward {
        Toward::First => children.to_vec(),
        Toward::Last => children.iter().rev().copied().collect(),
    };
    for child in ordered {
        path.push(child);
        if descend(arrangement, path, toward) {
            return true;
        }
        path.pop();
    }
    false
}

/// Path to the nearest section reached through a later (or earlier) sibling
/// of the path's tail, without climbing.
fn step_sibling(arrangement: &Arrangement, path: &[NodeId], toward: Toward) -> Option<Vec<NodeId>> {
    let [.., parent, tail] = path else {
        return None;
    };
    let siblings = arrangement.children(*parent);
    let index = siblings.iter().position(|c| c == tail)?;
    let candidates: Vec<NodeId> = match toward {
        Toward::First => siblings[index + 1..].to_vec(),
        Toward::Last => siblings[..index].iter().rev().copied().collect(),
    };
    for sibling in candidates {
        let mut work = path[..path.len() - 1].to_vec();
        work.push(sibling);
        if descend(arrangement, &mut work, toward) {
            return Some(work);
        }
    }
    None
}

/// Climb from the tail until some ancestor level has a neighbouring section.
fn neighbour_section(arrangement: &Arrangement, path: &[NodeId], toward: Toward) -> Option<Vec<NodeId>> {
    let mut scope = path.to_vec();
    while scope.len() >= 2 {
        if let Some(found) = step_sibling(arrangement, &scope, toward) {
            return Some(found);
        }
        scope.pop();
    }
    None
}

/// Root-to-current path through an [`Arrangement`].
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct Cursor(Vec<NodeId>);

impl Cursor {
    pub fn at_root(arrangement: &Arrangement) -> Self {
        Self(vec![arrangement.root()])
    }

    /// Cursor on the song's first section (the root when there is none).
    pub fn first_section(arrangement: &Arrangement) -> Self {
        let mut cursor = Self::at_root(arrangement);
        cursor.move_next(arrangement);
        cursor
    }

    pub fn from_path(path: Vec<NodeId>) -> Self {
        Self(path)
    }

    pub fn path(&self) -> &[NodeId] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn current(&self) -> Option<NodeId> {
        self.0.last().copied()
    }

    pub fn parent(&self) -> Option<NodeId> {
        self.0.len().checked_sub(2).map(|i| self.0[i])
    }

    pub fn is_root(&self) -> bool {
        self.0.len() == 1
    }

    pub fn matches(&self, node: NodeId) -> bool {
        self.current() == Some(node)
    }

    fn sibling_index(&self, arrangement: &Arrangement) -> Option<(usize, usize)> {
        let parent = self.parent()?;
        let current = self.current()?;
        let siblings = arrangement.children(parent);
        let index = siblings.iter().position(|&c| c == current)?;
        Some((index, siblings.len()))
    }

    pub fn is_first_sibling(&self, arrangement: &Arrangement) -> bool {
        self.sibling_index(arrangement).is_some_and(|(i, _)| i == 0)
    }

    pub fn is_last_sibling(&self, arrangement: &Arrangement) -> bool {
        self.sibling_index(arrangement)
            .is_some_and(|(i, len)| i + 1 == len)
    }

    pub fn up(&mut self) {
        self.0.pop();
    }

    /// Move to the next section in pre-order. Returns false, leaving the
    /// cursor alone, at the end of the song.
    pub fn move_next(&mut self, arrangement: &Arrangement) -> bool {
        let Some(current) = self.current() else {
            return false;
        };
        let mut found = None;
        if arrangement.is_group(current) {
            let mut work = self.0.clone();
            if descend(arrangement, &mut work, Toward::First) {
                found = Some(work);
            }
        }
        if found.is_none() {
            found = neighbour_section(arrangement, &self.0, Toward::First);
        }
        self.commit(found)
    }

    /// Move to the previous section in pre-order. From the root this lands
    /// on the song's last section.
    pub fn move_prev(&mut self, arrangement: &Arrangement) -> bool {
        let found = if self.0.len() <= 1 {
            let mut work = self.0.clone();
            descend(arrangement, &mut work, Toward::Last).then_some(work)
        } else {
            neighbour_section(arrangement, &self.0, Toward::Last)
        };
        self.commit(found)
    }

    /// Move to the next playable sibling without leaving the parent.
    pub fn move_to_sibling(&mut self, arrangement: &Arrangement) -> bool {
        let found = step_sibling(arrangement, &self.0, Toward::First);
        self.commit(found)
    }

    /// Move to the first section under the parent.
    pub fn move_to_first_sibling(&mut self, arrangement: &Arrangement) -> bool {
        if self.0.len() < 2 {
            return false;
        }
        let mut work = self.0[..self.0.len() - 1].to_vec();
        let found = descend(arrangement, &mut work, Toward::First).then_some(work);
        self.commit(found)
    }

    fn commit(&mut self, found: Option<Vec<NodeId>>) -> bool {
        match found {
            Some(path) => {
                self.0 = path;
                true
            }
            None => false,
        }
    }

    /// True iff the parent still has repeats left.
    pub fn has_parent_iterations(&self, arrangement: &Arrangement, counts: &IterationCounts) -> bool {
        self.parent()
            .is_some_and(|p| counts.get(p) < u32::from(arrangement.iterations(p)))
    }

    /// Zero the counters of every group on the path that has used up its
    /// repeats. Groups with repeats remaining, and sections, are untouched.
    pub fn reset_iterations(&self, arrangement: &Arrangement, counts: &mut IterationCounts) {
        for &id in &self.0 {
            if arrangement.is_group(id) && counts.get(id) >= u32::from(arrangement.iterations(id)) {
                counts.set(id, 0);
            }
        }
    }
}
