//! Lazy hierarchy discovery.
//!
//! A hierarchy chunk describes a few levels of the tree below one node as a
//! list of child bitmasks in breadth-first order, starting with the chunk
//! root's own mask. Bit `j` set means octant `j` has a child.
//!
//! ```text
//! chunk: [0b1000_0001, 0b0000_0010, 0b0000_0000]
//!
//!         ""           mask 0 -> children 0, 7
//!        /  \
//!      "0"  "7"        mask 1 -> "0" has child 1, mask 2 -> "7" is a leaf
//!       |
//!     "01"             no mask left -> frontier (needs its own chunk)
//! ```

use std::collections::VecDeque;

use super::{HierarchyState, NodeId, Octree};
use crate::error::{SourceError, StreamError, StreamResult};

/// Apply a hierarchy chunk below `node`.
///
/// Creates the described children (existing children are reused) and
/// returns the frontier: created nodes whose own mask was not part of the
/// chunk. Each frontier node is marked [`HierarchyState::Queued`] and needs
/// its own chunk fetch.
///
/// The chunk is validated before any node is created, so a rejected chunk
/// leaves the tree untouched.
///
/// # Errors
/// - [`StreamError::UnknownNode`] when `node` is not live
/// - [`SourceError::Malformed`] when the chunk is empty or lists more masks
///   than there are nodes to apply them to
pub fn apply_chunk(tree: &Octree, node: NodeId, masks: &[u8]) -> StreamResult<Vec<NodeId>> {
  if !tree.contains(node) {
    return Err(StreamError::UnknownNode(node));
  }
  validate_chunk(masks)?;

  let mut pending = VecDeque::from([node]);
  for &mask in masks {
    let Some(current) = pending.pop_front() else {
      break;
    };
    for octant in (0..8u8).filter(|o| mask & (1 << o) != 0) {
      let child = tree
        .create_child(current, octant)
        .ok_or(StreamError::UnknownNode(current))?;
      pending.push_back(child);
    }
  }

  let frontier: Vec<_> = pending.into();
  for id in &frontier {
    if let Some(child) = tree.get(*id) {
      child.set_hierarchy_state(HierarchyState::Queued);
    }
  }
  Ok(frontier)
}

/// Every mask must belong to a node described by the masks before it.
fn validate_chunk(masks: &[u8]) -> Result<(), SourceError> {
  if masks.is_empty() {
    return Err(SourceError::Malformed("empty hierarchy chunk".to_string()));
  }
  // The chunk root plus every child announced so far.
  let mut described = 1usize;
  for (i, &mask) in masks.iter().enumerate() {
    if i >= described {
      return Err(SourceError::Malformed(format!(
        "hierarchy chunk has {} masks but only {} nodes",
        masks.len(),
        described
      )));
    }
    described += mask.count_ones() as usize;
  }
  Ok(())
}

#[cfg(test)]
mod tests {
  use glam::DVec3;

  use super::*;
  use crate::octree::DAabb3;

  fn tree_with_root() -> (Octree, NodeId) {
    let tree = Octree::new();
    let root = tree.create_root(DAabb3::new(DVec3::ZERO, DVec3::splat(8.0)));
    (tree, root)
  }

  fn path(tree: &Octree, id: NodeId) -> String {
    tree.get(id).map(|n| n.path().to_string()).unwrap_or_default()
  }

  #[test]
  fn test_single_level_chunk_returns_children_as_frontier() {
    let (tree, root) = tree_with_root();
    let frontier = apply_chunk(&tree, root, &[0b1000_0001]).unwrap();

    let paths: Vec<_> = frontier.iter().map(|id| path(&tree, *id)).collect();
    assert_eq!(paths, vec!["0", "7"]);
    assert_eq!(tree.len(), 3);
  }

  #[test]
  fn test_multi_level_chunk() {
    let (tree, root) = tree_with_root();
    // root -> {0, 7}; "0" -> {1}; "7" leaf; "01" not described
    let frontier = apply_chunk(&tree, root, &[0b1000_0001, 0b0000_0010, 0]).unwrap();

    let paths: Vec<_> = frontier.iter().map(|id| path(&tree, *id)).collect();
    assert_eq!(paths, vec!["01"]);
    assert_eq!(tree.len(), 4);
  }

  #[test]
  fn test_child_bounds_follow_octant() {
    let (tree, root) = tree_with_root();
    let frontier = apply_chunk(&tree, root, &[0b0001_0000]).unwrap();

    let child = tree.get(frontier[0]).unwrap();
    assert_eq!(child.path(), "4");
    assert_eq!(child.bounds().min, DVec3::new(4.0, 0.0, 0.0));
    assert_eq!(child.bounds().max, DVec3::new(8.0, 4.0, 4.0));
    assert_eq!(child.parent(), Some(root));
  }

  #[test]
  fn test_reapplying_reuses_children() {
    let (tree, root) = tree_with_root();
    let first = apply_chunk(&tree, root, &[0b11]).unwrap();
    let second = apply_chunk(&tree, root, &[0b11]).unwrap();

    assert_eq!(first, second);
    assert_eq!(tree.len(), 3);
  }

  #[test]
  fn test_leaf_chunk_has_empty_frontier() {
    let (tree, root) = tree_with_root();
    assert!(apply_chunk(&tree, root, &[0]).unwrap().is_empty());
  }

  #[test]
  fn test_empty_chunk_is_malformed() {
    let (tree, root) = tree_with_root();
    assert!(matches!(
      apply_chunk(&tree, root, &[]),
      Err(StreamError::Source(SourceError::Malformed(_)))
    ));
  }

  #[test]
  fn test_too_many_masks_is_malformed() {
    let (tree, root) = tree_with_root();
    // Root has a single child, so the third mask has no node
    assert!(matches!(
      apply_chunk(&tree, root, &[0b1, 0, 0]),
      Err(StreamError::Source(SourceError::Malformed(_)))
    ));
  }

  #[test]
  fn test_malformed_chunk_creates_nothing() {
    let (tree, root) = tree_with_root();
    // Valid first two levels, then a mask for a node that does not exist
    let result = apply_chunk(&tree, root, &[0b11, 0b1, 0, 0, 0]);

    assert!(matches!(result, Err(StreamError::Source(SourceError::Malformed(_)))));
    assert_eq!(tree.len(), 1);
    assert_eq!(tree.children(root).count(), 0);
  }

  #[test]
  fn test_frontier_is_marked_queued() {
    let (tree, root) = tree_with_root();
    let frontier = apply_chunk(&tree, root, &[0b11, 0b1, 0]).unwrap();

    let states: Vec<_> = frontier
      .iter()
      .map(|id| tree.get(*id).unwrap().hierarchy_state())
      .collect();
    assert_eq!(states, vec![HierarchyState::Queued]);
    let described = tree.children(root).next().unwrap();
    assert_eq!(tree.get(described).unwrap().hierarchy_state(), HierarchyState::Resolved);
  }

  #[test]
  fn test_unknown_node() {
    let (tree, root) = tree_with_root();
    tree.remove_subtree(root);
    assert!(matches!(
      apply_chunk(&tree, root, &[0b1]),
      Err(StreamError::UnknownNode(_))
    ));
  }
}
