use serde::{Deserialize, Serialize};
use std::ops::{Index, IndexMut};

/// Handle of a node inside a [`FeatureTree`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct NodeId(usize);

impl NodeId {
    pub fn index(self) -> usize {
        self.0
    }
}

impl std::fmt::Display for NodeId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "#{}", self.0)
    }
}

#[derive(Debug)]
struct Slot<N> {
    node: N,
    child: Option<NodeId>,
    sibling: Option<NodeId>,
}

/// An arena of nodes linked by `child` and `sibling` handles.
///
/// `child` is the sequence entered once a node's step unlocks nested work;
/// `sibling` continues at the same nesting level.
#[derive(Debug)]
pub struct FeatureTree<N> {
    slots: Vec<Slot<N>>,
    root: Option<NodeId>,
}

impl<N> Default for FeatureTree<N> {
    fn default() -> Self {
        Self {
            slots: Vec::new(),
            root: None,
        }
    }
}

impl<N> FeatureTree<N> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds an unlinked node and returns its handle.
    pub fn insert(&mut self, node: N) -> NodeId {
        self.slots.push(Slot {
            node,
            child: None,
            sibling: None,
        });
        NodeId(self.slots.len() - 1)
    }

    pub fn set_root(&mut self, root: Option<NodeId>) {
        self.root = root;
    }

    pub fn set_child(&mut self, id: NodeId, child: Option<NodeId>) {
        self.slots[id.0].child = child;
    }

    pub fn set_sibling(&mut self, id: NodeId, sibling: Option<NodeId>) {
        self.slots[id.0].sibling = sibling;
    }

    pub fn root(&self) -> Option<NodeId> {
        self.root
    }

    pub fn child(&self, id: NodeId) -> Option<NodeId> {
        self.slots.get(id.0).and_then(|slot| slot.child)
    }

    pub fn sibling(&self, id: NodeId) -> Option<NodeId> {
        self.slots.get(id.0).and_then(|slot| slot.sibling)
    }

    pub fn get(&self, id: NodeId) -> Option<&N> {
        self.slots.get(id.0).map(|slot| &slot.node)
    }

    pub fn get_mut(&mut self, id: NodeId) -> Option<&mut N> {
        self.slots.get_mut(id.0).map(|slot| &mut slot.node)
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    /// Handles reachable from the root in execution order: a node, then its
    /// child sequence, then its siblings.
    pub fn preorder(&self) -> Vec<NodeId> {
        let mut order = Vec::with_capacity(self.slots.len());
        let mut stack: Vec<NodeId> = self.root.into_iter().collect();
        while let Some(id) = stack.pop() {
            order.push(id);
            if let Some(sibling) = self.sibling(id) {
                stack.push(sibling);
            }
            if let Some(child) = self.child(id) {
                stack.push(child);
            }
        }
        order
    }

    /// Number of reachable nodes at each nesting depth (depth grows through `child`).
    pub fn depth_counts(&self) -> Vec<usize> {
        let mut counts = Vec::new();
        let mut stack: Vec<(NodeId, usize)> = self.root.map(|id| (id, 0)).into_iter().collect();
        while let Some((id, depth)) = stack.pop() {
            if counts.len() <= depth {
                counts.resize(depth + 1, 0);
            }
            counts[depth] += 1;
            if let Some(sibling) = self.sibling(id) {
                stack.push((sibling, depth));
            }
            if let Some(child) = self.child(id) {
                stack.push((child, depth + 1));
            }
        }
        counts
    }

    /// Walks both trees in lockstep and checks that they have the same links
    /// and that `same` holds for every pair of corresponding nodes.
    pub fn same_shape<M>(&self, other: &FeatureTree<M>, same: impl Fn(&N, &M) -> bool) -> bool {
        let mut stack = vec![(self.root, other.root)];
        while let Some(pair) = stack.pop() {
            match pair {
                (None, None) => {}
                (Some(a), Some(b)) => {
                    if !same(&self[a], &other[b]) {
                        return false;
                    }
                    stack.push((self.sibling(a), other.sibling(b)));
                    stack.push((self.child(a), other.child(b)));
                }
                _ => return false,
            }
        }
        true
    }
}

impl<N> Index<NodeId> for FeatureTree<N> {
    type Output = N;

    fn index(&self, id: NodeId) -> &N {
        &self.slots[id.0].node
    }
}

impl<N> IndexMut<NodeId> for FeatureTree<N> {
    fn index_mut(&mut self, id: NodeId) -> &mut N {
        &mut self.slots[id.0].node
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// a -> b (child: c -> d), e
    fn sample() -> (FeatureTree<&'static str>, [NodeId; 5]) {
        let mut tree = FeatureTree::new();
        let a = tree.insert("a");
        let b = tree.insert("b");
        let c = tree.insert("c");
        let d = tree.insert("d");
        let e = tree.insert("e");
        tree.set_sibling(a, Some(b));
        tree.set_child(b, Some(c));
        tree.set_sibling(c, Some(d));
        tree.set_sibling(b, Some(e));
        tree.set_root(Some(a));
        (tree, [a, b, c, d, e])
    }

    #[test]
    fn test_preorder_visits_child_sequence_before_siblings() {
        let (tree, _) = sample();
        let names: Vec<_> = tree.preorder().into_iter().map(|id| tree[id]).collect();
        assert_eq!(names, vec!["a", "b", "c", "d", "e"]);
    }

    #[test]
    fn test_depth_counts() {
        let (tree, _) = sample();
        assert_eq!(tree.depth_counts(), vec![3, 2]);
        assert!(FeatureTree::<u8>::new().depth_counts().is_empty());
    }

    #[test]
    fn test_same_shape_detects_link_differences() {
        let (left, _) = sample();
        let (mut right, ids) = sample();
        assert!(left.same_shape(&right, |a, b| a == b));
        right.set_child(ids[3], Some(ids[4]));
        right.set_sibling(ids[1], None);
        assert!(!left.same_shape(&right, |a, b| a == b));
    }

    #[test]
    fn test_same_shape_compares_payloads() {
        let (left, _) = sample();
        let (mut right, ids) = sample();
        right[ids[2]] = "z";
        assert!(!left.same_shape(&right, |a, b| a == b));
        assert!(left.same_shape(&right, |_, _| true));
    }
}
