use std::collections::BTreeMap;

use crate::{Adoption, ChangeSet, Divergence, UpdateOrReplace};

/// Index records by entity id. Duplicate ids keep the first record seen.
fn index_by_id<R, I>(records: Vec<R>, id: &I) -> BTreeMap<String, R>
where
    I: Fn(&R) -> String,
{
    let mut out: BTreeMap<String, R> = BTreeMap::new();
    for r in records {
        out.entry(id(&r)).or_insert(r);
    }
    out
}

/// Partition `source` against `target` by entity id:
/// - source-only => create
/// - target-only => delete
/// - both sides and `eq` is false => update
///
/// The result only ever populates `to_create`, `to_update` and `to_delete`.
/// Ordering is by entity id, independent of input order.
pub fn diff<R, I, E>(source: Vec<R>, target: Vec<R>, id: I, eq: E) -> ChangeSet<R>
where
    I: Fn(&R) -> String,
    E: Fn(&R, &R) -> bool,
{
    let source = index_by_id(source, &id);
    let mut target = index_by_id(target, &id);

    let mut out = ChangeSet::default();
    for (entity_id, s) in source {
        match target.remove(&entity_id) {
            None => {
                out.to_create.insert(entity_id, s);
            }
            Some(t) => {
                if !eq(&s, &t) {
                    out.to_update
                        .insert(entity_id, Divergence { source: s, target: t });
                }
            }
        }
    }
    out.to_delete = target;
    out
}

/// Refine an apply-direction change set (source = desired, target = observed).
///
/// - divergent pairs where `update_or_replace(observed, desired)` says
///   `Replace` move to `to_replace`
/// - a reserved observed object is never replaced or deleted: replacements
///   and observed-only deletions of reserved objects move to `to_adopt`
/// - a desired-only record whose `reserved_key` matches an unclaimed
///   reserved object is not created; it claims that adoption instead and
///   keeps its own internal id
pub fn classify_apply<R, U, P, K>(
    changes: ChangeSet<R>,
    update_or_replace: U,
    is_reserved: P,
    reserved_key: K,
) -> ChangeSet<R>
where
    U: Fn(&R, &R) -> UpdateOrReplace,
    P: Fn(&R) -> bool,
    K: Fn(&R) -> Option<String>,
{
    let ChangeSet {
        to_create,
        to_update,
        mut to_replace,
        mut to_adopt,
        to_delete,
    } = changes;

    let mut updates = BTreeMap::new();
    for (entity_id, d) in to_update {
        match update_or_replace(&d.target, &d.source) {
            UpdateOrReplace::Update => {
                updates.insert(entity_id, d);
            }
            UpdateOrReplace::Replace if is_reserved(&d.target) => {
                to_adopt.insert(
                    entity_id,
                    Adoption {
                        observed: d.target,
                        desired: Some(d.source),
                    },
                );
            }
            UpdateOrReplace::Replace => {
                to_replace.insert(entity_id, d);
            }
        }
    }

    let mut deletes = BTreeMap::new();
    for (entity_id, observed) in to_delete {
        if is_reserved(&observed) {
            to_adopt.insert(
                entity_id,
                Adoption {
                    observed,
                    desired: None,
                },
            );
        } else {
            deletes.insert(entity_id, observed);
        }
    }

    let mut creates = BTreeMap::new();
    for (entity_id, desired) in to_create {
        let claim = reserved_key(&desired).and_then(|key| {
            to_adopt
                .iter()
                .find(|(_, a)| a.desired.is_none() && reserved_key(&a.observed).as_deref() == Some(key.as_str()))
                .map(|(id, _)| id.clone())
        });
        match claim.and_then(|id| to_adopt.get_mut(&id)) {
            Some(adoption) => adoption.desired = Some(desired),
            None => {
                creates.insert(entity_id, desired);
            }
        }
    }

    ChangeSet {
        to_create: creates,
        to_update: updates,
        to_replace,
        to_adopt,
        to_delete: deletes,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, Clone, PartialEq)]
    struct Rec {
        id: &'static str,
        v: u32,
    }

    fn rec(id: &'static str, v: u32) -> Rec {
        Rec { id, v }
    }

    #[test]
    fn duplicate_ids_collapse_to_first() {
        let cs = diff(
            vec![rec("a", 1), rec("a", 2)],
            vec![rec("a", 1)],
            |r| r.id.to_string(),
            |a, b| a == b,
        );
        assert!(cs.is_empty());
    }

    #[test]
    fn replace_of_non_reserved_stays_replace() {
        let cs = diff(
            vec![rec("a", 2)],
            vec![rec("a", 1)],
            |r| r.id.to_string(),
            |a, b| a == b,
        );
        let cs = classify_apply(cs, |_, _| UpdateOrReplace::Replace, |_| false, |_| None);
        assert_eq!(cs.to_replace.len(), 1);
        assert!(cs.to_update.is_empty());
        assert!(cs.to_adopt.is_empty());
    }

    #[test]
    fn desired_only_without_reserved_key_is_still_created() {
        let cs = diff(vec![rec("a", 1)], vec![rec("b", 1)], |r| r.id.to_string(), |a, b| a == b);
        let cs = classify_apply(cs, |_, _| UpdateOrReplace::Update, |r| r.id == "b", |_| None);
        assert_eq!(cs.to_create.len(), 1);
        assert!(cs.to_adopt["b"].desired.is_none());
    }
}
