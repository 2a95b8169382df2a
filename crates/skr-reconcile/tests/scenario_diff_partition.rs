use skr_reconcile::*;

#[derive(Debug, Clone, PartialEq)]
struct Bucket {
    name: String,
    policy: String,
    created_at: Option<i64>,
}

fn bucket(name: &str, policy: &str, created_at: Option<i64>) -> Bucket {
    Bucket {
        name: name.to_string(),
        policy: policy.to_string(),
        created_at,
    }
}

fn id(b: &Bucket) -> String {
    b.name.clone()
}

/// Server-generated `created_at` is not part of equality.
fn eq(a: &Bucket, b: &Bucket) -> bool {
    a.name == b.name && a.policy == b.policy
}

#[test]
fn scenario_desired_only_is_create_observed_only_is_delete() {
    let desired = vec![bucket("b1", "p", None), bucket("b2", "p", None)];
    let observed = vec![bucket("b2", "p", Some(10)), bucket("b3", "p", Some(11))];

    let cs = diff(desired, observed, id, eq);

    assert_eq!(cs.to_create.keys().collect::<Vec<_>>(), vec!["b1"]);
    assert_eq!(cs.to_delete.keys().collect::<Vec<_>>(), vec!["b3"]);
    assert!(cs.to_update.is_empty(), "ignorable field must not diverge");
}

#[test]
fn scenario_unequal_pair_is_update_with_source_winning() {
    let desired = vec![bucket("b1", "P2", None)];
    let observed = vec![bucket("b1", "P1", Some(10))];

    let cs = diff(desired, observed, id, eq);

    let d = cs.to_update.get("b1").expect("b1 diverges");
    assert_eq!(d.source.policy, "P2");
    assert_eq!(d.target.policy, "P1");
    assert_eq!(cs.counts().total(), 1);
}

#[test]
fn scenario_every_entity_lands_in_exactly_one_set() {
    let desired = vec![
        bucket("a", "1", None),
        bucket("b", "1", None),
        bucket("c", "2", None),
    ];
    let observed = vec![
        bucket("b", "1", None),
        bucket("c", "1", None),
        bucket("d", "1", None),
    ];

    let cs = diff(desired, observed, id, eq);

    let ids = cs.entity_ids();
    let mut dedup = ids.clone();
    dedup.dedup();
    assert_eq!(ids, dedup);
    assert_eq!(ids, vec!["a", "c", "d"]);
}

#[test]
fn scenario_input_order_does_not_change_the_result() {
    let a = diff(
        vec![bucket("x", "1", None), bucket("y", "1", None)],
        vec![bucket("z", "1", None)],
        id,
        eq,
    );
    let b = diff(
        vec![bucket("y", "1", None), bucket("x", "1", None)],
        vec![bucket("z", "1", None)],
        id,
        eq,
    );
    assert_eq!(a, b);
}

#[test]
fn scenario_identical_sides_yield_empty_change_set() {
    let side = vec![bucket("b1", "p", Some(1))];
    let cs = diff(side.clone(), side, id, eq);
    assert!(cs.is_empty());
}
