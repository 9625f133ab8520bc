//! Property tests for transform hierarchies.
//!
//! Random re-parenting keeps `c.parent == p <=> c in p.children` and never
//! creates a cycle; mutating any node's local TRS leaves every descendant
//! with a dirty world cache until it is queried.

use std::sync::Arc;

use kestrel_ecs::prelude::*;
use proptest::prelude::*;

const NODES: usize = 8;

#[derive(Debug, Clone)]
enum TreeOp {
    Parent(usize, usize),
    Detach(usize),
    Translate(usize, i8),
}

fn tree_op_strategy() -> impl Strategy<Value = TreeOp> {
    prop_oneof![
        3 => (0..NODES, 0..NODES).prop_map(|(c, p)| TreeOp::Parent(c, p)),
        1 => (0..NODES).prop_map(TreeOp::Detach),
        2 => (0..NODES, any::<i8>()).prop_map(|(n, d)| TreeOp::Translate(n, d)),
    ]
}

fn is_ancestor(ancestor: &Arc<Transform>, node: &Arc<Transform>) -> bool {
    let mut cursor = node.parent();
    while let Some(p) = cursor {
        if Arc::ptr_eq(&p, ancestor) {
            return true;
        }
        cursor = p.parent();
    }
    false
}

fn descendants(node: &Arc<Transform>) -> Vec<Arc<Transform>> {
    let mut out = Vec::new();
    let mut stack = node.children();
    while let Some(n) = stack.pop() {
        stack.extend(n.children());
        out.push(n);
    }
    out
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(1_000))]

    #[test]
    fn parent_child_links_stay_symmetric(
        ops in prop::collection::vec(tree_op_strategy(), 1..60),
    ) {
        let nodes: Vec<Arc<Transform>> = (0..NODES).map(|_| Arc::new(Transform::new())).collect();

        for op in ops {
            match op {
                TreeOp::Parent(c, p) => {
                    let would_cycle = c == p || is_ancestor(&nodes[c], &nodes[p]);
                    let linked = nodes[c].set_parent(Some(&nodes[p]));
                    prop_assert_eq!(linked, !would_cycle);
                }
                TreeOp::Detach(n) => nodes[n].detach(),
                TreeOp::Translate(n, d) => nodes[n].translate(Vector3::new(f32::from(d), 0.0, 0.0)),
            }

            for node in &nodes {
                if let Some(parent) = node.parent() {
                    prop_assert!(parent.children().iter().any(|c| Arc::ptr_eq(c, node)));
                    prop_assert!(!is_ancestor(node, &parent));
                }
                for child in node.children() {
                    prop_assert!(child.parent().is_some_and(|p| Arc::ptr_eq(&p, node)));
                }
            }
        }
    }

    #[test]
    fn local_change_dirties_every_descendant(
        links in prop::collection::vec((1..NODES, 0..NODES), 0..20),
        target in 0..NODES,
    ) {
        let nodes: Vec<Arc<Transform>> = (0..NODES).map(|_| Arc::new(Transform::new())).collect();
        // Only link to lower indices so the result is a forest.
        for (c, p) in links {
            nodes[c].set_parent(Some(&nodes[p % c]));
        }
        for node in &nodes {
            node.world();
        }

        nodes[target].set_rotation(Vector3::new(0.0, 45.0, 0.0));
        for d in descendants(&nodes[target]) {
            prop_assert!(d.is_world_dirty());
            d.world_position();
            prop_assert!(!d.is_world_dirty());
        }
    }
}

// ---------------------------------------------------------------------------
// Scenario: world position through a parent
// ---------------------------------------------------------------------------

#[test]
fn s2_transform_hierarchy() {
    let parent = Arc::new(Transform::at(Vector3::new(1.0, 0.0, 0.0)));
    let child = Arc::new(Transform::at(Vector3::new(0.0, 2.0, 0.0)));
    assert!(child.set_parent(Some(&parent)));
    assert_eq!(child.world_position(), Vector3::new(1.0, 2.0, 0.0));

    parent.translate(Vector3::new(0.0, 0.0, 3.0));
    assert_eq!(child.world_position(), Vector3::new(1.0, 2.0, 3.0));
}
