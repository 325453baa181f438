//! Normalized change-set representation
//!
//! Desired edits are collected into four buckets keyed by component FQDD:
//! whole-subtree replacements (delete-then-recreate), partial merges
//! (create-if-absent-else-set), attribute removals and component removals.
//! `whole` always applies before `partial`, so a replaced subtree can still
//! receive partial refinements in the same pass. A key scheduled for removal
//! must not also appear in `whole` within the same cycle.

use std::collections::BTreeMap;

/// One edit in the change tree: a single-valued leaf, a repeated-name leaf
/// list, or a component with named children.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Node {
    Set(String),
    List(Vec<String>),
    Component(BTreeMap<String, Node>),
}

impl Node {
    pub fn component() -> Node {
        Node::Component(BTreeMap::new())
    }

    pub fn set(value: impl Into<String>) -> Node {
        Node::Set(value.into())
    }

    /// Children of a component node; `None` for leaves.
    pub fn children(&self) -> Option<&BTreeMap<String, Node>> {
        match self {
            Node::Component(children) => Some(children),
            _ => None,
        }
    }

    pub fn children_mut(&mut self) -> Option<&mut BTreeMap<String, Node>> {
        match self {
            Node::Component(children) => Some(children),
            _ => None,
        }
    }

    /// Insert a leaf under a component node. No-op on leaves.
    pub fn insert(&mut self, name: impl Into<String>, node: Node) -> &mut Node {
        if let Node::Component(children) = self {
            children.insert(name.into(), node);
        }
        self
    }

    /// Recursive merge with an explicit conflict policy: leaves are
    /// later-write-wins, component children merge by key.
    pub fn merge_from(&mut self, other: Node) {
        match (self, other) {
            (Node::Component(mine), Node::Component(theirs)) => {
                for (name, node) in theirs {
                    match mine.get_mut(&name) {
                        Some(existing) => existing.merge_from(node),
                        None => {
                            mine.insert(name, node);
                        }
                    }
                }
            }
            (slot, other) => *slot = other,
        }
    }
}

impl From<&str> for Node {
    fn from(value: &str) -> Self {
        Node::Set(value.to_string())
    }
}

impl From<String> for Node {
    fn from(value: String) -> Self {
        Node::Set(value)
    }
}

/// Nested removal targets. An empty subtree means "remove the node named by
/// this key"; a non-empty one descends through child components.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct RemoveTree(pub BTreeMap<String, RemoveTree>);

impl RemoveTree {
    pub fn leaf() -> RemoveTree {
        RemoveTree::default()
    }

    pub fn is_leaf(&self) -> bool {
        self.0.is_empty()
    }

    fn merge_from(&mut self, other: RemoveTree) {
        for (name, subtree) in other.0 {
            self.0.entry(name).or_default().merge_from(subtree);
        }
    }
}

/// Removal buckets, keyed by the component FQDD the removals start under.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Removals {
    pub attributes: BTreeMap<String, RemoveTree>,
    pub components: BTreeMap<String, RemoveTree>,
}

/// The normalized, four-bucket representation of desired edits.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ChangeSet {
    /// FQDD -> full subtree to create-or-replace.
    pub whole: BTreeMap<String, Node>,
    /// FQDD -> edits merged into the existing subtree.
    pub partial: BTreeMap<String, Node>,
    pub remove: Removals,
}

impl ChangeSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set a single attribute in the partial bucket.
    pub fn set_partial(&mut self, fqdd: &str, name: &str, value: impl Into<String>) {
        self.partial
            .entry(fqdd.to_string())
            .or_insert_with(Node::component)
            .insert(name, Node::set(value));
    }

    /// Set a single attribute in the whole bucket.
    pub fn set_whole(&mut self, fqdd: &str, name: &str, value: impl Into<String>) {
        self.whole
            .entry(fqdd.to_string())
            .or_insert_with(Node::component)
            .insert(name, Node::set(value));
    }

    /// Schedule an attribute directly under a component for removal.
    pub fn remove_attribute(&mut self, fqdd: &str, name: &str) {
        self.remove
            .attributes
            .entry(fqdd.to_string())
            .or_default()
            .0
            .insert(name.to_string(), RemoveTree::leaf());
    }

    /// Schedule a whole component for removal.
    pub fn remove_component(&mut self, fqdd: &str) {
        self.remove
            .components
            .insert(fqdd.to_string(), RemoveTree::leaf());
    }

    /// Merge another change-set into this one, bucket by bucket.
    pub fn merge_from(&mut self, other: ChangeSet) {
        for (fqdd, node) in other.whole {
            match self.whole.get_mut(&fqdd) {
                Some(existing) => existing.merge_from(node),
                None => {
                    self.whole.insert(fqdd, node);
                }
            }
        }
        for (fqdd, node) in other.partial {
            match self.partial.get_mut(&fqdd) {
                Some(existing) => existing.merge_from(node),
                None => {
                    self.partial.insert(fqdd, node);
                }
            }
        }
        for (fqdd, tree) in other.remove.attributes {
            self.remove
                .attributes
                .entry(fqdd)
                .or_default()
                .merge_from(tree);
        }
        for (fqdd, tree) in other.remove.components {
            self.remove
                .components
                .entry(fqdd)
                .or_default()
                .merge_from(tree);
        }
    }

    /// `whole` deep-merged with `partial` as one combined edit tree, the
    /// shape the sync checker walks.
    pub fn combined_edits(&self) -> BTreeMap<String, Node> {
        let mut combined = self.whole.clone();
        for (fqdd, node) in &self.partial {
            match combined.get_mut(fqdd) {
                Some(existing) => existing.merge_from(node.clone()),
                None => {
                    combined.insert(fqdd.clone(), node.clone());
                }
            }
        }
        combined
    }

    pub fn is_empty(&self) -> bool {
        self.whole.is_empty()
            && self.partial.is_empty()
            && self.remove.attributes.is_empty()
            && self.remove.components.is_empty()
    }
}
