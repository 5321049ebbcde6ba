//! Property tests: the incrementally maintained release-target set always
//! equals the brute-force definition, whatever order mutations arrive in.

use chrono::{DateTime, Utc};
use engine_store::{ChangeSet, EntityStore};
use engine_types::{Condition, Deployment, Environment, Resource, Selector};
use proptest::prelude::*;

#[derive(Debug, Clone)]
enum Op {
    UpsertResource { id: u8, kind: &'static str, env: &'static str },
    RemoveResource(u8),
    UpsertDeployment { id: u8, system: u8, selector: Option<Selector> },
    RemoveDeployment(u8),
    UpsertEnvironment { id: u8, system: u8, selector: Option<Selector> },
    RemoveEnvironment(u8),
}

fn selector() -> impl Strategy<Value = Option<Selector>> {
    prop_oneof![
        Just(None),
        Just(Some(Selector::All)),
        Just(Some(Selector::json(Condition::eq("kind", "service")))),
        Just(Some(Selector::json(Condition::eq("kind", "database")))),
        Just(Some(Selector::json(Condition::eq("metadata.env", "prod")))),
        Just(Some(Selector::json(Condition::Not(Box::new(Condition::eq(
            "metadata.env",
            "prod"
        )))))),
    ]
}

fn op() -> impl Strategy<Value = Op> {
    prop_oneof![
        3 => (0u8..4, prop::sample::select(vec!["service", "database"]), prop::sample::select(vec!["prod", "staging"]))
            .prop_map(|(id, kind, env)| Op::UpsertResource { id, kind, env }),
        1 => (0u8..4).prop_map(Op::RemoveResource),
        2 => (0u8..3, 0u8..2, selector())
            .prop_map(|(id, system, selector)| Op::UpsertDeployment { id, system, selector }),
        1 => (0u8..3).prop_map(Op::RemoveDeployment),
        2 => (0u8..3, 0u8..2, selector())
            .prop_map(|(id, system, selector)| Op::UpsertEnvironment { id, system, selector }),
        1 => (0u8..3).prop_map(Op::RemoveEnvironment),
    ]
}

fn apply(store: &EntityStore, op: &Op) {
    let mut cs = ChangeSet::new(DateTime::<Utc>::default());
    match op.clone() {
        Op::UpsertResource { id, kind, env } => store
            .upsert_resource(&mut cs, Resource::new(format!("r{id}"), kind).with_metadata("env", env))
            .unwrap(),
        Op::RemoveResource(id) => {
            store.remove_resource(&mut cs, &format!("r{id}").into()).unwrap();
        }
        Op::UpsertDeployment { id, system, selector } => {
            let mut d = Deployment::new(format!("d{id}"), format!("s{system}"));
            d.resource_selector = selector;
            store.upsert_deployment(&mut cs, d).unwrap();
        }
        Op::RemoveDeployment(id) => {
            store.remove_deployment(&mut cs, &format!("d{id}").into()).unwrap();
        }
        Op::UpsertEnvironment { id, system, selector } => {
            let mut e = Environment::new(format!("e{id}"), format!("s{system}"));
            e.resource_selector = selector;
            store.upsert_environment(&mut cs, e).unwrap();
        }
        Op::RemoveEnvironment(id) => {
            store.remove_environment(&mut cs, &format!("e{id}").into()).unwrap();
        }
    }
}

proptest! {
    #[test]
    fn release_targets_match_brute_force(ops in prop::collection::vec(op(), 1..40)) {
        let store = EntityStore::default();
        for op in &ops {
            apply(&store, op);
            prop_assert!(store.verify_release_targets().is_ok());
        }
    }

    #[test]
    fn reapplying_an_operation_changes_nothing(ops in prop::collection::vec(op(), 1..20)) {
        let store = EntityStore::default();
        for op in &ops {
            apply(&store, op);
            let before = store.release_targets();
            let resources = store.resources().items();
            apply(&store, op);
            prop_assert_eq!(before, store.release_targets());
            prop_assert_eq!(resources, store.resources().items());
        }
    }
}
