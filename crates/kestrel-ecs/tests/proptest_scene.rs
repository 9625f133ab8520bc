//! Property tests for scene indices.
//!
//! After any sequence of create/destroy/retag/toggle operations, every owned
//! entity is reachable by id and sits in exactly its own tag bucket, and the
//! cached transform view matches the active entities.

use std::collections::HashMap;

use kestrel_ecs::prelude::*;
use proptest::prelude::*;

const TAGS: [&str; 4] = ["", "enemy", "player", "prop"];

#[derive(Debug, Clone)]
enum SceneOp {
    Create { tag: usize, with_transform: bool },
    Destroy(usize),
    DestroyTag(usize),
    Retag(usize, usize),
    Toggle(usize),
    Refresh,
}

fn scene_op_strategy() -> impl Strategy<Value = SceneOp> {
    prop_oneof![
        4 => (0..TAGS.len(), any::<bool>())
            .prop_map(|(tag, with_transform)| SceneOp::Create { tag, with_transform }),
        2 => (0..64usize).prop_map(SceneOp::Destroy),
        1 => (0..TAGS.len()).prop_map(SceneOp::DestroyTag),
        2 => (0..64usize, 0..TAGS.len()).prop_map(|(i, t)| SceneOp::Retag(i, t)),
        2 => (0..64usize).prop_map(SceneOp::Toggle),
        1 => Just(SceneOp::Refresh),
    ]
}

fn check_indices(scene: &Scene, model: &HashMap<EntityId, &'static str>) -> Result<(), TestCaseError> {
    prop_assert_eq!(scene.entity_count(), model.len());
    for (&id, &tag) in model {
        let e = scene.find_entity_by_id(id);
        prop_assert!(e.is_some());
        prop_assert_eq!(e.map(Entity::tag), Some(tag));
        prop_assert!(scene.entity_ids_with_tag(tag).contains(&id));
        for other in TAGS.iter().filter(|t| **t != tag) {
            prop_assert!(!scene.entity_ids_with_tag(other).contains(&id));
        }
    }
    let indexed: usize = TAGS.iter().map(|t| scene.entity_ids_with_tag(t).len()).sum();
    prop_assert_eq!(indexed, model.len());
    Ok(())
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(1_000))]

    #[test]
    fn random_ops_keep_indices_consistent(
        ops in prop::collection::vec(scene_op_strategy(), 1..60),
    ) {
        let mut scene = Scene::new("prop");
        let mut model: HashMap<EntityId, &'static str> = HashMap::new();
        let mut order: Vec<EntityId> = Vec::new();

        for op in ops {
            match op {
                SceneOp::Create { tag, with_transform } => {
                    let id = if with_transform {
                        scene.create_entity_at(TAGS[tag], "", Vector3::ZERO)
                    } else {
                        scene.create_entity(TAGS[tag], "")
                    };
                    model.insert(id, TAGS[tag]);
                    order.push(id);
                }
                SceneOp::Destroy(i) if !order.is_empty() => {
                    let id = order.remove(i % order.len());
                    prop_assert!(scene.destroy_entity(id));
                    model.remove(&id);
                }
                SceneOp::DestroyTag(t) => {
                    let expected = model.values().filter(|tag| **tag == TAGS[t]).count();
                    prop_assert_eq!(scene.destroy_entities_with_tag(TAGS[t]), expected);
                    model.retain(|_, tag| *tag != TAGS[t]);
                    order.retain(|id| model.contains_key(id));
                }
                SceneOp::Retag(i, t) if !order.is_empty() => {
                    let id = order[i % order.len()];
                    prop_assert!(scene.set_entity_tag(id, TAGS[t]));
                    model.insert(id, TAGS[t]);
                }
                SceneOp::Toggle(i) if !order.is_empty() => {
                    let id = order[i % order.len()];
                    let active = scene.find_entity_by_id(id).map(Entity::is_active).unwrap_or(false);
                    prop_assert!(scene.set_entity_active(id, !active));
                }
                SceneOp::Refresh => {
                    let expected = scene
                        .entities()
                        .filter(|e| e.is_active() && e.transform().is_some())
                        .count();
                    prop_assert_eq!(scene.cached_transforms().len(), expected);
                    prop_assert!(!scene.is_cache_dirty());
                }
                _ => {}
            }
            check_indices(&scene, &model)?;
        }
    }
}

// ---------------------------------------------------------------------------
// Scenario: tag lookup
// ---------------------------------------------------------------------------

#[test]
fn s1_tag_lookup() {
    let mut scene = Scene::new("s1");
    let ids: Vec<EntityId> = ["a", "a", "b", ""]
        .iter()
        .map(|tag| scene.create_entity(tag, ""))
        .collect();

    let a = scene.find_entities_with_tag("a");
    assert_eq!(a.len(), 2);
    assert_eq!(a[0].id(), ids[0]);
    assert_eq!(a[1].id(), ids[1]);
    assert_eq!(scene.find_entity_with_tag("b").map(Entity::id), Some(ids[2]));
    assert!(scene.find_entity_with_tag("c").is_none());
}
