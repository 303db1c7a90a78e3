//! Labeled prefix tree
//!
//! TigerStyle: Iterative traversal, no recursion, explicit path validation.
//!
//! Values are stored in leaves. A leaf is reached through the list of labels
//! from the root to it, and every leaf under a node shares that node's path
//! as a prefix:
//!
//! ```text
//!            ____ root:* ____
//!           |                |
//!        node:s1          node:s2
//!        |      |            |
//!     leaf:0  leaf:1      leaf:0
//! ```
//!
//! `get(["*", "s1"])` returns the values of both leaves under `s1`, and
//! `get([])` returns every value in the tree.

use crate::error::{Error, Result};

#[derive(Debug, Clone)]
struct Node<K, V> {
    label: K,
    children: Vec<Node<K, V>>,
    value: Option<V>,
}

impl<K, V> Node<K, V> {
    fn branch(label: K) -> Self {
        Self {
            label,
            children: Vec::new(),
            value: None,
        }
    }

    fn leaf(label: K, value: V) -> Self {
        Self {
            label,
            children: Vec::new(),
            value: Some(value),
        }
    }

    fn is_leaf(&self) -> bool {
        self.value.is_some()
    }

    /// Leaf values under this node, in insertion order
    fn leaf_values(&self) -> Vec<&V> {
        let mut values = Vec::new();
        let mut stack = vec![self];
        while let Some(node) = stack.pop() {
            if let Some(value) = &node.value {
                values.push(value);
            }
            stack.extend(node.children.iter().rev());
        }
        values
    }
}

/// Prefix tree mapping label paths to leaf values
#[derive(Debug, Clone)]
pub struct PrefixTree<K, V> {
    root: Node<K, V>,
    leaves_count: usize,
}

impl<K, V> PrefixTree<K, V>
where
    K: PartialEq + Clone,
    V: Clone,
{
    /// Create an empty tree whose root carries the given label
    pub fn with_root(label: K) -> Self {
        Self {
            root: Node::branch(label),
            leaves_count: 0,
        }
    }

    /// Label of the root node
    pub fn root_label(&self) -> &K {
        &self.root.label
    }

    /// Number of stored values
    pub fn len(&self) -> usize {
        self.leaves_count
    }

    /// Check if the tree holds no value
    pub fn is_empty(&self) -> bool {
        self.leaves_count == 0
    }

    /// Add a value under `path`
    ///
    /// `path` starts with the root label and ends with the leaf label.
    /// Missing intermediate nodes are created. The value is appended as a new
    /// leaf even if an identical one exists.
    ///
    /// # Errors
    /// Returns an error if the path is shorter than two labels or does not
    /// start with the root label.
    pub fn add(&mut self, path: &[K], value: V) -> Result<()> {
        self.check_path(path)?;

        let (leaf_label, branch_path) = match path[1..].split_last() {
            Some(split) => split,
            None => return Err(Error::internal("tree path has no leaf label")),
        };

        let mut node = &mut self.root;
        for label in branch_path {
            let existing = node
                .children
                .iter()
                .position(|child| !child.is_leaf() && &child.label == label);
            let index = match existing {
                Some(index) => index,
                None => {
                    node.children.push(Node::branch(label.clone()));
                    node.children.len() - 1
                }
            };
            node = &mut node.children[index];
        }

        node.children.push(Node::leaf(leaf_label.clone(), value));
        self.leaves_count += 1;
        Ok(())
    }

    /// Get every value stored under `path`
    ///
    /// An empty path returns every value. A path that leaves the tree at any
    /// component returns nothing.
    pub fn get(&self, path: &[K]) -> Vec<V> {
        if path.is_empty() {
            return self.root.leaf_values().into_iter().cloned().collect();
        }
        if path[0] != self.root.label {
            return Vec::new();
        }

        let mut frontier = vec![&self.root];
        for label in &path[1..] {
            frontier = frontier
                .into_iter()
                .flat_map(|node| node.children.iter().filter(|c| &c.label == label))
                .collect();
            if frontier.is_empty() {
                return Vec::new();
            }
        }

        frontier
            .into_iter()
            .flat_map(|node| node.leaf_values())
            .cloned()
            .collect()
    }

    /// Remove the first leaf at `path` holding `value`
    ///
    /// Branches left without children are pruned. Returns whether a leaf was
    /// removed.
    pub fn remove(&mut self, path: &[K], value: &V) -> bool
    where
        V: PartialEq,
    {
        if self.check_path(path).is_err() {
            return false;
        }
        let (leaf_label, branch_path) = match path[1..].split_last() {
            Some(split) => split,
            None => return false,
        };

        // Branch labels are unique among siblings, so the descent is a
        // single chain of child indices.
        let mut indices = Vec::with_capacity(branch_path.len());
        let mut node = &self.root;
        for label in branch_path {
            match node
                .children
                .iter()
                .position(|child| !child.is_leaf() && &child.label == label)
            {
                Some(index) => {
                    indices.push(index);
                    node = &node.children[index];
                }
                None => return false,
            }
        }

        let parent = self.node_at_mut(&indices);
        let found = parent
            .children
            .iter()
            .position(|c| &c.label == leaf_label && c.value.as_ref() == Some(value));
        let leaf_index = match found {
            Some(index) => index,
            None => return false,
        };
        parent.children.remove(leaf_index);
        self.leaves_count -= 1;

        while let Some(last) = indices.pop() {
            let parent = self.node_at_mut(&indices);
            if parent.children[last].children.is_empty() {
                parent.children.remove(last);
            } else {
                break;
            }
        }
        true
    }

    /// Every stored `(path, value)` pair, root label included
    pub fn leaves(&self) -> Vec<(Vec<K>, V)> {
        let mut result = Vec::with_capacity(self.leaves_count);
        let mut stack = vec![(vec![self.root.label.clone()], &self.root)];
        while let Some((path, node)) = stack.pop() {
            if let Some(value) = &node.value {
                result.push((path, value.clone()));
                continue;
            }
            for child in node.children.iter().rev() {
                let mut child_path = path.clone();
                child_path.push(child.label.clone());
                stack.push((child_path, child));
            }
        }
        result
    }

    fn check_path(&self, path: &[K]) -> Result<()> {
        if path.len() < 2 {
            return Err(Error::internal(format!(
                "tree path needs a root and a leaf label, got {} labels",
                path.len()
            )));
        }
        if path[0] != self.root.label {
            return Err(Error::internal("tree path does not start at the root label"));
        }
        Ok(())
    }

    fn node_at_mut(&mut self, indices: &[usize]) -> &mut Node<K, V> {
        let mut node = &mut self.root;
        for &index in indices {
            node = &mut node.children[index];
        }
        node
    }
}
