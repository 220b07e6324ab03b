//! Saved-command tree: an arena of categories and commands with stable
//! sibling ordering.
//!
//! Nodes are addressed by id; parent links are owned by the tree and never
//! exposed for reassignment, so the structure cannot be made cyclic from the
//! outside. Every mutation renumbers the affected sibling lists to a dense,
//! zero-based `order` sequence.

use serde::de::Deserializer;
use serde::ser::Serializer;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use uuid::Uuid;

use crate::types::{TreeError, TreeResult};

pub type NodeId = Uuid;

/// Payload of a tree node
#[derive(Debug, Clone, PartialEq)]
pub enum NodeKind {
    Category {
        name: String,
    },
    Command {
        label: String,
        command_text: String,
        order: i64,
    },
}

impl NodeKind {
    pub fn is_category(&self) -> bool {
        matches!(self, NodeKind::Category { .. })
    }

    /// Display name: category name or command label
    pub fn title(&self) -> &str {
        match self {
            NodeKind::Category { name } => name,
            NodeKind::Command { label, .. } => label,
        }
    }
}

/// Node description passed to [`CommandTree::insert`]
#[derive(Debug, Clone, PartialEq)]
pub enum NewNode {
    Category { name: String },
    Command { label: String, command_text: String },
}

#[derive(Debug, Clone, PartialEq)]
struct NodeEntry {
    parent: Option<NodeId>,
    kind: NodeKind,
    children: Vec<NodeId>,
}

/// Ordered, nested saved-command structure
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CommandTree {
    nodes: HashMap<NodeId, NodeEntry>,
    roots: Vec<NodeId>,
}

impl CommandTree {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of nodes in the tree, categories included
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn node(&self, id: NodeId) -> Option<&NodeKind> {
        self.nodes.get(&id).map(|entry| &entry.kind)
    }

    pub fn parent(&self, id: NodeId) -> Option<NodeId> {
        self.nodes.get(&id).and_then(|entry| entry.parent)
    }

    /// Children of a category (or of the root forest for `None`), in
    /// traversal order
    pub fn children(&self, parent: Option<NodeId>) -> TreeResult<&[NodeId]> {
        match parent {
            None => Ok(&self.roots),
            Some(id) => {
                let entry = self
                    .nodes
                    .get(&id)
                    .ok_or_else(|| TreeError::NotFound(id.to_string()))?;
                if !entry.kind.is_category() {
                    return Err(TreeError::NotACategory(id.to_string()));
                }
                Ok(&entry.children)
            }
        }
    }

    /// Insert a node under `parent` at `position` (append when `None`).
    /// Sibling `order` values are renumbered dense afterwards.
    pub fn insert(
        &mut self,
        parent: Option<NodeId>,
        node: NewNode,
        position: Option<usize>,
    ) -> TreeResult<NodeId> {
        let len = self.children(parent)?.len();
        let position = position.unwrap_or(len);
        if position > len {
            return Err(TreeError::PositionOutOfBounds { position, len });
        }

        let id = Uuid::new_v4();
        let kind = match node {
            NewNode::Category { name } => NodeKind::Category { name },
            NewNode::Command {
                label,
                command_text,
            } => NodeKind::Command {
                label,
                command_text,
                order: 0,
            },
        };
        self.nodes.insert(
            id,
            NodeEntry {
                parent,
                kind,
                children: Vec::new(),
            },
        );
        self.sibling_list_mut(parent).insert(position, id);
        self.renumber(parent);
        Ok(id)
    }

    /// Move a node (command or whole category subtree) to a new parent.
    ///
    /// All checks run before any mutation, so a rejection leaves the tree
    /// untouched. Moving a category into itself or one of its descendants
    /// fails with `CycleRejected`.
    pub fn move_node(
        &mut self,
        id: NodeId,
        new_parent: Option<NodeId>,
        position: Option<usize>,
    ) -> TreeResult<()> {
        let old_parent = self
            .nodes
            .get(&id)
            .ok_or_else(|| TreeError::NotFound(id.to_string()))?
            .parent;

        if let Some(target) = new_parent {
            if target == id || self.is_descendant_of(target, id) {
                return Err(TreeError::CycleRejected);
            }
        }

        // Destination length as it will be once the node has been detached
        let mut dest_len = self.children(new_parent)?.len();
        if old_parent == new_parent {
            dest_len -= 1;
        }
        let position = position.unwrap_or(dest_len);
        if position > dest_len {
            return Err(TreeError::PositionOutOfBounds {
                position,
                len: dest_len,
            });
        }

        self.sibling_list_mut(old_parent).retain(|child| *child != id);
        self.sibling_list_mut(new_parent).insert(position, id);
        if let Some(entry) = self.nodes.get_mut(&id) {
            entry.parent = new_parent;
        }
        self.renumber(old_parent);
        if old_parent != new_parent {
            self.renumber(new_parent);
        }
        Ok(())
    }

    /// Remove a node and, for categories, its entire subtree
    pub fn remove(&mut self, id: NodeId) -> TreeResult<()> {
        let parent = self
            .nodes
            .get(&id)
            .ok_or_else(|| TreeError::NotFound(id.to_string()))?
            .parent;
        self.sibling_list_mut(parent).retain(|child| *child != id);
        self.drop_subtree(id);
        self.renumber(parent);
        Ok(())
    }

    /// Rename a category in place; ordering is untouched
    pub fn rename_category(&mut self, id: NodeId, name: impl Into<String>) -> TreeResult<()> {
        let entry = self
            .nodes
            .get_mut(&id)
            .ok_or_else(|| TreeError::NotFound(id.to_string()))?;
        match &mut entry.kind {
            NodeKind::Category { name: current } => {
                *current = name.into();
                Ok(())
            }
            NodeKind::Command { .. } => Err(TreeError::NotACategory(id.to_string())),
        }
    }

    /// Update a command's label and text in place; `order` is preserved
    pub fn update_command(
        &mut self,
        id: NodeId,
        label: impl Into<String>,
        command_text: impl Into<String>,
    ) -> TreeResult<()> {
        let entry = self
            .nodes
            .get_mut(&id)
            .ok_or_else(|| TreeError::NotFound(id.to_string()))?;
        match &mut entry.kind {
            NodeKind::Command {
                label: l,
                command_text: t,
                ..
            } => {
                *l = label.into();
                *t = command_text.into();
                Ok(())
            }
            NodeKind::Category { .. } => Err(TreeError::NotFound(id.to_string())),
        }
    }

    /// Look up a node by id string or `/`-separated path
    pub fn resolve(&self, path_or_id: &str) -> TreeResult<NodeId> {
        if let Ok(id) = Uuid::parse_str(path_or_id) {
            if self.nodes.contains_key(&id) {
                return Ok(id);
            }
            return Err(TreeError::NotFound(path_or_id.to_string()));
        }
        self.resolve_path(path_or_id)
    }

    /// Walk a `/`-separated path of category names; the final segment may
    /// name either a category or a command label
    pub fn resolve_path(&self, path: &str) -> TreeResult<NodeId> {
        let segments: Vec<&str> = path
            .split('/')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .collect();
        if segments.is_empty() {
            return Err(TreeError::NotFound(path.to_string()));
        }

        let mut scope: Option<NodeId> = None;
        for (index, segment) in segments.iter().enumerate() {
            let last = index == segments.len() - 1;
            let found = self
                .children(scope)?
                .iter()
                .copied()
                .find(|child| match &self.nodes[child].kind {
                    NodeKind::Category { name } => name == segment,
                    NodeKind::Command { label, .. } => last && label == segment,
                });
            match found {
                Some(id) if last => return Ok(id),
                Some(id) if self.nodes[&id].kind.is_category() => scope = Some(id),
                _ => return Err(TreeError::NotFound(path.to_string())),
            }
        }
        unreachable!("loop returns on the last segment")
    }

    /// Depth-first traversal in display order, yielding (depth, id)
    pub fn walk(&self) -> Vec<(usize, NodeId)> {
        let mut out = Vec::with_capacity(self.nodes.len());
        let mut stack: Vec<(usize, NodeId)> = self
            .roots
            .iter()
            .rev()
            .map(|id| (0usize, *id))
            .collect();
        while let Some((depth, id)) = stack.pop() {
            out.push((depth, id));
            if let Some(entry) = self.nodes.get(&id) {
                for child in entry.children.iter().rev() {
                    stack.push((depth + 1, *child));
                }
            }
        }
        out
    }

    fn sibling_list_mut(&mut self, parent: Option<NodeId>) -> &mut Vec<NodeId> {
        match parent {
            None => &mut self.roots,
            Some(id) => {
                &mut self
                    .nodes
                    .get_mut(&id)
                    .expect("parent validated before mutation")
                    .children
            }
        }
    }

    /// True when `node` sits somewhere below `ancestor`
    fn is_descendant_of(&self, node: NodeId, ancestor: NodeId) -> bool {
        let mut cursor = self.parent(node);
        while let Some(id) = cursor {
            if id == ancestor {
                return true;
            }
            cursor = self.parent(id);
        }
        false
    }

    /// Reassign dense zero-based `order` values to the command children of
    /// `parent`, in list order
    fn renumber(&mut self, parent: Option<NodeId>) {
        let ids: Vec<NodeId> = match parent {
            None => self.roots.clone(),
            Some(id) => match self.nodes.get(&id) {
                Some(entry) => entry.children.clone(),
                None => return,
            },
        };
        let mut next = 0i64;
        for id in ids {
            if let Some(NodeEntry {
                kind: NodeKind::Command { order, .. },
                ..
            }) = self.nodes.get_mut(&id)
            {
                *order = next;
                next += 1;
            }
        }
    }

    fn drop_subtree(&mut self, id: NodeId) {
        if let Some(entry) = self.nodes.remove(&id) {
            for child in entry.children {
                self.drop_subtree(child);
            }
        }
    }

    fn to_persisted(&self, ids: &[NodeId]) -> Vec<PersistedNode> {
        ids.iter()
            .filter_map(|id| self.nodes.get(id).map(|entry| (*id, entry)))
            .map(|(id, entry)| match &entry.kind {
                NodeKind::Category { name } => PersistedNode::Category {
                    name: name.clone(),
                    children: self.to_persisted(&entry.children),
                },
                NodeKind::Command {
                    label,
                    command_text,
                    order,
                } => PersistedNode::Command {
                    id,
                    label: label.clone(),
                    command_text: command_text.clone(),
                    order: *order,
                },
            })
            .collect()
    }

    fn attach_persisted(&mut self, parent: Option<NodeId>, nodes: Vec<PersistedNode>) {
        for node in nodes {
            match node {
                PersistedNode::Category { name, children } => {
                    let id = Uuid::new_v4();
                    self.nodes.insert(
                        id,
                        NodeEntry {
                            parent,
                            kind: NodeKind::Category { name },
                            children: Vec::new(),
                        },
                    );
                    self.sibling_list_mut(parent).push(id);
                    self.attach_persisted(Some(id), children);
                }
                PersistedNode::Command {
                    id,
                    label,
                    command_text,
                    order,
                } => {
                    self.nodes.insert(
                        id,
                        NodeEntry {
                            parent,
                            kind: NodeKind::Command {
                                label,
                                command_text,
                                order,
                            },
                            children: Vec::new(),
                        },
                    );
                    self.sibling_list_mut(parent).push(id);
                }
            }
        }
    }

    /// Sort command siblings by persisted `order` (stable, so file position
    /// breaks ties), then renumber dense. Category slots keep their file
    /// positions.
    fn normalize_from_load(&mut self, parent: Option<NodeId>) {
        let ids: Vec<NodeId> = match self.children(parent) {
            Ok(ids) => ids.to_vec(),
            Err(_) => return,
        };

        let mut command_slots = Vec::new();
        let mut commands = Vec::new();
        for (slot, id) in ids.iter().enumerate() {
            match &self.nodes[id].kind {
                NodeKind::Command { order, .. } => {
                    command_slots.push(slot);
                    commands.push((*order, *id));
                }
                NodeKind::Category { .. } => {}
            }
        }
        commands.sort_by_key(|(order, _)| *order);

        let mut sorted = ids;
        for (slot, (_, id)) in command_slots.into_iter().zip(commands) {
            sorted[slot] = id;
        }
        *self.sibling_list_mut(parent) = sorted.clone();
        self.renumber(parent);

        for id in sorted {
            if self.nodes[&id].kind.is_category() {
                self.normalize_from_load(Some(id));
            }
        }
    }

    /// Rebuild a tree from its persisted nested form
    pub(crate) fn from_persisted(nodes: Vec<PersistedNode>) -> Self {
        let mut tree = CommandTree::new();
        tree.attach_persisted(None, nodes);
        tree.normalize_from_load(None);
        tree
    }

    pub(crate) fn persisted(&self) -> Vec<PersistedNode> {
        self.to_persisted(&self.roots)
    }
}

/// On-disk nested representation of the saved-command forest
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub(crate) enum PersistedNode {
    Category {
        name: String,
        children: Vec<PersistedNode>,
    },
    Command {
        id: Uuid,
        label: String,
        command_text: String,
        order: i64,
    },
}

impl Serialize for CommandTree {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.persisted().serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for CommandTree {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let nodes = Vec::<PersistedNode>::deserialize(deserializer)?;
        Ok(CommandTree::from_persisted(nodes))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn command(label: &str) -> NewNode {
        NewNode::Command {
            label: label.to_string(),
            command_text: format!("say {label}"),
        }
    }

    fn category(name: &str) -> NewNode {
        NewNode::Category {
            name: name.to_string(),
        }
    }

    fn orders(tree: &CommandTree, parent: Option<NodeId>) -> Vec<i64> {
        tree.children(parent)
            .unwrap()
            .iter()
            .filter_map(|id| match tree.node(*id) {
                Some(NodeKind::Command { order, .. }) => Some(*order),
                _ => None,
            })
            .collect()
    }

    #[test]
    fn insert_renumbers_dense() {
        let mut tree = CommandTree::new();
        let cat = tree.insert(None, category("General"), None).unwrap();
        tree.insert(Some(cat), command("a"), None).unwrap();
        tree.insert(Some(cat), command("b"), None).unwrap();
        tree.insert(Some(cat), command("c"), Some(0)).unwrap();

        assert_eq!(orders(&tree, Some(cat)), vec![0, 1, 2]);
        let labels: Vec<&str> = tree
            .children(Some(cat))
            .unwrap()
            .iter()
            .map(|id| tree.node(*id).unwrap().title())
            .collect();
        assert_eq!(labels, vec!["c", "a", "b"]);
    }

    #[test]
    fn insert_out_of_bounds_position_is_rejected() {
        let mut tree = CommandTree::new();
        let err = tree.insert(None, command("a"), Some(3)).unwrap_err();
        assert_eq!(err, TreeError::PositionOutOfBounds { position: 3, len: 0 });
    }

    #[test]
    fn move_into_own_descendant_is_rejected_without_mutation() {
        let mut tree = CommandTree::new();
        let outer = tree.insert(None, category("outer"), None).unwrap();
        let inner = tree.insert(Some(outer), category("inner"), None).unwrap();
        tree.insert(Some(inner), command("cmd"), None).unwrap();

        let before = tree.clone();
        assert_eq!(
            tree.move_node(outer, Some(inner), None),
            Err(TreeError::CycleRejected)
        );
        assert_eq!(
            tree.move_node(outer, Some(outer), None),
            Err(TreeError::CycleRejected)
        );
        assert_eq!(tree, before);
    }

    #[test]
    fn move_renumbers_source_and_destination() {
        let mut tree = CommandTree::new();
        let a = tree.insert(None, category("a"), None).unwrap();
        let b = tree.insert(None, category("b"), None).unwrap();
        let one = tree.insert(Some(a), command("one"), None).unwrap();
        tree.insert(Some(a), command("two"), None).unwrap();
        tree.insert(Some(b), command("three"), None).unwrap();

        tree.move_node(one, Some(b), Some(0)).unwrap();

        assert_eq!(orders(&tree, Some(a)), vec![0]);
        assert_eq!(orders(&tree, Some(b)), vec![0, 1]);
        assert_eq!(tree.parent(one), Some(b));
        let b_labels: Vec<&str> = tree
            .children(Some(b))
            .unwrap()
            .iter()
            .map(|id| tree.node(*id).unwrap().title())
            .collect();
        assert_eq!(b_labels, vec!["one", "three"]);
    }

    #[test]
    fn remove_category_drops_subtree() {
        let mut tree = CommandTree::new();
        let cat = tree.insert(None, category("cat"), None).unwrap();
        let nested = tree.insert(Some(cat), category("nested"), None).unwrap();
        let leaf = tree.insert(Some(nested), command("leaf"), None).unwrap();
        tree.insert(None, command("kept"), None).unwrap();

        tree.remove(cat).unwrap();

        assert_eq!(tree.len(), 1);
        assert!(tree.node(cat).is_none());
        assert!(tree.node(nested).is_none());
        assert!(tree.node(leaf).is_none());
        assert_eq!(orders(&tree, None), vec![0]);
    }

    #[test]
    fn resolve_by_path_and_id() {
        let mut tree = CommandTree::new();
        let cat = tree.insert(None, category("General"), None).unwrap();
        let sub = tree.insert(Some(cat), category("Admin"), None).unwrap();
        let cmd = tree.insert(Some(sub), command("whitelist"), None).unwrap();

        assert_eq!(tree.resolve_path("General/Admin").unwrap(), sub);
        assert_eq!(tree.resolve_path("General/Admin/whitelist").unwrap(), cmd);
        assert_eq!(tree.resolve(&cmd.to_string()).unwrap(), cmd);
        assert_eq!(
            tree.resolve_path("General/missing"),
            Err(TreeError::NotFound("General/missing".to_string()))
        );
    }

    #[test]
    fn serde_round_trip_preserves_structure_and_order() {
        let mut tree = CommandTree::new();
        let cat = tree.insert(None, category("General"), None).unwrap();
        tree.insert(Some(cat), command("b"), None).unwrap();
        tree.insert(Some(cat), command("a"), Some(0)).unwrap();
        tree.insert(None, command("root"), None).unwrap();

        let json = serde_json::to_string(&tree).unwrap();
        let reloaded: CommandTree = serde_json::from_str(&json).unwrap();

        let titles = |t: &CommandTree| -> Vec<String> {
            t.walk()
                .iter()
                .map(|(depth, id)| format!("{depth}:{}", t.node(*id).unwrap().title()))
                .collect()
        };
        assert_eq!(titles(&reloaded), titles(&tree));
        assert_eq!(orders(&reloaded, None), orders(&tree, None));
    }

    #[test]
    fn load_sorts_commands_by_order_with_stable_ties() {
        // Orders out of file order, including a duplicate pair: the sort is
        // stable so the tied pair keeps its file order.
        let json = r#"[
            {"type":"command","id":"00000000-0000-0000-0000-000000000001","label":"second","command_text":"b","order":5},
            {"type":"command","id":"00000000-0000-0000-0000-000000000002","label":"first","command_text":"a","order":1},
            {"type":"command","id":"00000000-0000-0000-0000-000000000003","label":"tie-a","command_text":"c","order":5},
            {"type":"command","id":"00000000-0000-0000-0000-000000000004","label":"tie-b","command_text":"d","order":5}
        ]"#;
        let tree: CommandTree = serde_json::from_str(json).unwrap();
        let labels: Vec<&str> = tree
            .children(None)
            .unwrap()
            .iter()
            .map(|id| tree.node(*id).unwrap().title())
            .collect();
        assert_eq!(labels, vec!["first", "second", "tie-a", "tie-b"]);
        assert_eq!(orders(&tree, None), vec![0, 1, 2, 3]);
    }
}
