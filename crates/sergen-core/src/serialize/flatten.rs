//! Dependency ordering of a value tree.

use crate::error::{Error, Result};
use crate::value::{InstanceId, ValueTree};
use std::collections::VecDeque;
use tracing::trace;

/// Lists every instance reachable from the root exactly once, children before
/// the instances that reference them.
///
/// The tree is walked breadth-first from the root and the visitation order is
/// reversed: every instance is enqueued after its parent, so after reversal it
/// comes before it. The root is always last.
///
/// Fails if an instance is reachable twice, which covers both shared
/// subtrees and cycles.
pub fn flatten(tree: &ValueTree) -> Result<Vec<InstanceId>> {
    let root = tree.root()?;
    let mut visited = vec![false; tree.len()];
    let mut order = Vec::with_capacity(tree.len());
    let mut queue = VecDeque::new();

    mark(&mut visited, root)?;
    queue.push_back(root);

    while let Some(id) = queue.pop_front() {
        order.push(id);
        for child in tree.instance(id)?.children() {
            mark(&mut visited, child)?;
            queue.push_back(child);
        }
    }

    order.reverse();
    trace!("Flattened {} of {} instances", order.len(), tree.len());
    Ok(order)
}

fn mark(visited: &mut [bool], id: InstanceId) -> Result<()> {
    let seen = visited
        .get_mut(id.index())
        .ok_or_else(|| Error::internal(format!("dangling instance reference {}", id)))?;
    if *seen {
        return Err(Error::InstanceRevisited {
            instance: id.to_string(),
        });
    }
    *seen = true;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::StructId;
    use crate::value::{StructInstance, Value};

    fn leaf(tree: &mut ValueTree) -> InstanceId {
        tree.insert(StructInstance::new(StructId::new(0), vec![Value::Signed(0)]))
    }

    #[test]
    fn test_children_before_parents() {
        let mut tree = ValueTree::new();
        let a = leaf(&mut tree);
        let b = leaf(&mut tree);
        let c = leaf(&mut tree);
        let mid = tree.insert(StructInstance::new(
            StructId::new(1),
            vec![Value::Struct(Some(c))],
        ));
        let root = tree.insert(StructInstance::new(
            StructId::new(2),
            vec![Value::Struct(Some(mid)), Value::Array(vec![a, b]), Value::Struct(None)],
        ));
        tree.set_root(root);

        let order = flatten(&tree).unwrap();
        assert_eq!(order, vec![c, b, a, mid, root]);

        let position = |id| order.iter().position(|&x| x == id).unwrap();
        assert!(position(c) < position(mid));
        assert!(position(mid) < position(root));
        assert!(position(a) < position(root));
    }

    #[test]
    fn test_unreachable_instances_are_skipped() {
        let mut tree = ValueTree::new();
        let _orphan = leaf(&mut tree);
        let root = leaf(&mut tree);
        tree.set_root(root);
        assert_eq!(flatten(&tree).unwrap(), vec![root]);
    }

    #[test]
    fn test_shared_instance_rejected() {
        let mut tree = ValueTree::new();
        let shared = leaf(&mut tree);
        let root = tree.insert(StructInstance::new(
            StructId::new(1),
            vec![Value::Array(vec![shared, shared])],
        ));
        tree.set_root(root);
        assert!(matches!(flatten(&tree), Err(Error::InstanceRevisited { .. })));
    }

    #[test]
    fn test_cycle_rejected() {
        let mut tree = ValueTree::new();
        let a = tree.insert(StructInstance::new(StructId::new(0), vec![Value::Struct(None)]));
        let b = tree.insert(StructInstance::new(StructId::new(0), vec![Value::Struct(Some(a))]));
        tree.get_mut(a).unwrap().set(0, Value::Struct(Some(b))).unwrap();
        tree.set_root(a);
        assert!(matches!(flatten(&tree), Err(Error::InstanceRevisited { .. })));
    }

    #[test]
    fn test_no_root() {
        assert!(flatten(&ValueTree::new()).is_err());
    }
}
