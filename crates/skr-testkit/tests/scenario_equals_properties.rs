//! Property checks over every stock mapper: `equals` is reflexive and
//! symmetric over generated record pairs, and `entity_id` depends on the
//! record alone.

use std::collections::BTreeMap;
use std::sync::Arc;

use proptest::prelude::*;
use skr_mapper::{Mapper, MemoryStore};
use skr_sim::compute::{Instance, InstanceMapper};
use skr_sim::iam::{Role, RoleMapper};
use skr_sim::network::{SecurityGroup, SecurityGroupMapper};
use skr_sim::storage::{Bucket, BucketMapper};
use skr_sim::SimCloud;
use skr_testkit::policy;
use uuid::Uuid;

fn check_pair<M: Mapper>(m: &M, a: &M::Record, b: &M::Record) {
    assert!(m.equals(a, a), "{} equals must be reflexive", m.kind());
    assert!(m.equals(b, b), "{} equals must be reflexive", m.kind());
    assert_eq!(
        m.equals(a, b),
        m.equals(b, a),
        "{} equals must be symmetric",
        m.kind()
    );
    assert_eq!(m.entity_id(a), m.entity_id(&a.clone()));
}

fn group_mapper() -> Arc<SecurityGroupMapper> {
    Arc::new(SecurityGroupMapper::new(
        SimCloud::new(),
        Arc::new(MemoryStore::<SecurityGroup>::new()),
    ))
}

fn instance_mapper() -> InstanceMapper {
    InstanceMapper::new(
        SimCloud::new(),
        group_mapper(),
        Arc::new(MemoryStore::<Instance>::new()),
    )
}

// Small alphabets so equal and near-equal pairs come up often.

fn arb_internal_id() -> impl Strategy<Value = Option<Uuid>> {
    prop::option::of(any::<u128>().prop_map(Uuid::from_u128))
}

fn arb_tags() -> impl Strategy<Value = BTreeMap<String, String>> {
    prop::collection::btree_map(
        prop_oneof![Just("env".to_string()), Just("team".to_string())],
        prop_oneof![Just("prod".to_string()), Just("dev".to_string())],
        0..3,
    )
}

/// Policy documents, including one written two ways and one that is not
/// JSON at all.
fn arb_policy() -> impl Strategy<Value = String> {
    prop_oneof![
        Just(policy("s3:GetObject")),
        Just(policy("s3:PutObject")),
        Just(r#"{ "Version" : "2012-10-17", "Statement" : [] }"#.to_string()),
        Just(r#"{"Statement":[],"Version":"2012-10-17"}"#.to_string()),
        "[a-z{}: ]{0,10}",
    ]
}

fn arb_bucket() -> impl Strategy<Value = Bucket> {
    (
        prop_oneof![Just("logs"), Just("assets")],
        prop::option::of(arb_policy()),
        arb_tags(),
        prop::option::of(1_700_000_000i64..1_700_000_004),
        arb_internal_id(),
    )
        .prop_map(|(name, policy, tags, created_at, internal_id)| {
            let mut b = Bucket::new(name);
            b.policy = policy;
            b.tags = tags;
            b.created_at = created_at;
            b.internal_id = internal_id;
            b
        })
}

fn arb_role() -> impl Strategy<Value = Role> {
    (
        prop_oneof![Just("deployer"), Just("reader")],
        arb_policy(),
        prop::option::of(prop_oneof![
            Just("arn:sim:iam::1:role/deployer".to_string()),
            Just("arn:sim:iam::1:role/reader".to_string()),
        ]),
        prop::option::of(prop_oneof![Just("ci".to_string()), Just("ops".to_string())]),
        arb_internal_id(),
    )
        .prop_map(|(name, doc, arn, description, internal_id)| {
            let mut r = Role::new(name, &doc);
            r.arn = arn;
            r.description = description;
            r.internal_id = internal_id;
            r
        })
}

fn arb_group() -> impl Strategy<Value = SecurityGroup> {
    (
        prop_oneof![Just("api"), Just("default")],
        prop_oneof![Just("api tier"), Just("default VPC security group")],
        prop::option::of(prop_oneof![Just("sg-0001"), Just("sg-0002"), Just("sg-default")]),
        arb_tags(),
        arb_internal_id(),
    )
        .prop_map(|(name, description, group_id, tags, internal_id)| {
            let mut g = SecurityGroup::new(name, description);
            g.group_id = group_id.map(str::to_string);
            g.tags = tags;
            g.internal_id = internal_id;
            g
        })
}

fn arb_instance() -> impl Strategy<Value = Instance> {
    (
        prop_oneof![Just("ami-0001"), Just("ami-0002")],
        prop_oneof![Just("t3.micro"), Just("t3.small")],
        prop_oneof![Just(8i64), Just(16i64)],
        prop::option::of(prop_oneof![Just("i-0001"), Just("i-0002")]),
        prop::option::of(prop_oneof![
            Just("pending".to_string()),
            Just("running".to_string())
        ]),
        arb_tags(),
        arb_internal_id(),
    )
        .prop_map(|(image, size, gb, instance_id, state, tags, internal_id)| {
            let mut i = Instance::new("web-1", image, size, "web");
            i.volume_size_gb = gb;
            i.instance_id = instance_id.map(str::to_string);
            i.state = state;
            i.tags = tags;
            i.internal_id = internal_id;
            i
        })
}

proptest! {
    #[test]
    fn bucket_equality_is_well_behaved(a in arb_bucket(), b in arb_bucket()) {
        let m = BucketMapper::new(SimCloud::new(), Arc::new(MemoryStore::<Bucket>::new()));
        check_pair(&m, &a, &b);
    }

    #[test]
    fn role_equality_is_well_behaved(a in arb_role(), b in arb_role()) {
        let m = RoleMapper::new(SimCloud::new(), Arc::new(MemoryStore::<Role>::new()));
        check_pair(&m, &a, &b);
    }

    #[test]
    fn group_equality_is_well_behaved(a in arb_group(), b in arb_group()) {
        check_pair(group_mapper().as_ref(), &a, &b);
    }

    #[test]
    fn instance_equality_is_well_behaved(a in arb_instance(), b in arb_instance()) {
        check_pair(&instance_mapper(), &a, &b);
    }

    #[test]
    fn server_generated_fields_never_affect_equality(
        a in arb_instance(),
        state in prop::option::of(Just("running".to_string())),
        internal_id in arb_internal_id(),
    ) {
        let m = instance_mapper();
        let mut b = a.clone();
        b.state = state;
        b.internal_id = internal_id;
        prop_assert!(m.equals(&a, &b));
    }
}

#[test]
fn reformatted_policy_documents_are_equal() {
    let m = BucketMapper::new(SimCloud::new(), Arc::new(MemoryStore::<Bucket>::new()));
    let mut spaced = Bucket::new("logs");
    spaced.policy = Some(r#"{ "Version" : "2012-10-17", "Statement" : [] }"#.into());
    let mut compact = Bucket::new("logs");
    compact.policy = Some(r#"{"Statement":[],"Version":"2012-10-17"}"#.into());
    assert!(m.equals(&spaced, &compact));
}
