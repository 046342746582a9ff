//! # Property-Based Tests
//!
//! Invariants of the value store and the subset evaluator, checked with
//! proptest.

use proptest::collection::vec;
use proptest::prelude::*;
use researchos_core::{
    AddressGraph, AttributeKey, AttributeSource, Condition, Config, DataObject, Database,
    EntityId, EntityKind, Lookup, ResearchObject, RosError, Value, validate_schema,
};
use std::collections::{BTreeMap, BTreeSet};

// =============================================================================
// FIXTURES
// =============================================================================

/// Attribute values held in a map instead of a database.
#[derive(Default)]
struct MapSource {
    values: BTreeMap<(EntityId, AttributeKey), Value>,
}

impl MapSource {
    fn set(&mut self, entity: &str, variable: &str, value: Value) {
        self.values
            .insert((EntityId::from(entity), AttributeKey::from(variable)), value);
    }
}

impl AttributeSource for MapSource {
    fn lookup_value(
        &self,
        entity: &EntityId,
        attribute: &AttributeKey,
    ) -> Result<Lookup<Value>, RosError> {
        Ok(self
            .values
            .get(&(entity.clone(), attribute.clone()))
            .cloned()
            .map_or(Lookup::NotAssociated, Lookup::Value))
    }

    fn variable_exists(&self, id: &EntityId) -> Result<bool, RosError> {
        Ok(id.as_str().starts_with("VR"))
    }
}

/// DS1 with one flat subject per flag pair.
fn flat_dataset(count: usize) -> AddressGraph {
    AddressGraph::from_relations(
        EntityId::from("DS1"),
        vec![EntityKind::Dataset, EntityKind::Subject],
        (0..count).map(|i| (EntityId::from("DS1"), EntityId::new(format!("SB{i}")))),
    )
    .expect("graph")
}

fn leaf(variable: &str) -> serde_json::Value {
    serde_json::json!([variable, "==", 1])
}

// =============================================================================
// PROPERTY TESTS
// =============================================================================

proptest! {
    /// `and` and `or` agree with boolean composition of their leaves.
    #[test]
    fn and_or_compose_leaves(flags in vec((any::<bool>(), any::<bool>()), 1..20)) {
        let graph = flat_dataset(flags.len());
        let mut source = MapSource::default();
        for (i, (a, b)) in flags.iter().enumerate() {
            let node = format!("SB{i}");
            source.set(&node, "VRa", Value::Int(i64::from(*a)));
            source.set(&node, "VRb", Value::Int(i64::from(*b)));
        }

        let c1 = Condition::parse(&leaf("VRa"), &source).expect("c1");
        let c2 = Condition::parse(&leaf("VRb"), &source).expect("c2");
        let both = Condition::parse(
            &serde_json::json!({"and": [leaf("VRa"), leaf("VRb")]}),
            &source,
        )
        .expect("and");
        let either = Condition::parse(
            &serde_json::json!({"or": [leaf("VRa"), leaf("VRb")]}),
            &source,
        )
        .expect("or");

        for node in graph.nodes() {
            let a = c1.matches(node, &graph, &source).expect("c1");
            let b = c2.matches(node, &graph, &source).expect("c2");
            prop_assert_eq!(both.matches(node, &graph, &source).expect("and"), a && b);
            prop_assert_eq!(either.matches(node, &graph, &source).expect("or"), a || b);
        }
    }

    /// A trial with no own value is judged by its subject's value.
    #[test]
    fn ancestor_value_decides(age in -100i64..100, threshold in -100i64..100) {
        let graph = AddressGraph::from_relations(
            EntityId::from("DS1"),
            vec![EntityKind::Dataset, EntityKind::Subject, EntityKind::Trial],
            [
                (EntityId::from("DS1"), EntityId::from("SB1")),
                (EntityId::from("SB1"), EntityId::from("TR1")),
            ],
        )
        .expect("graph");
        let mut source = MapSource::default();
        source.set("SB1", "VRage", Value::Int(age));

        let cond = Condition::parse(&serde_json::json!(["VRage", ">", threshold]), &source)
            .expect("parse");
        let trial = EntityId::from("TR1");
        prop_assert_eq!(cond.matches(&trial, &graph, &source).expect("match"), age > threshold);

        // without any holder the leaf is false
        let empty = MapSource::default();
        prop_assert!(!cond.matches(&trial, &graph, &empty).expect("match"));
    }

    /// Equal values written anywhere share one stored blob.
    #[test]
    fn equal_values_store_one_blob(values in vec(0i64..8, 1..24)) {
        let mut db = Database::in_memory(Config::default());
        let mut action = db.begin_action("write").expect("action");
        let subject = DataObject::new(&db, &mut action, EntityKind::Subject, "S")
            .expect("subject");
        db.commit(action).expect("commit");
        let baseline = db.blob_count().expect("count");

        let mut action = db.begin_action("values").expect("action");
        for (i, v) in values.iter().enumerate() {
            db.set_data_value(
                &mut action,
                subject.id(),
                &AttributeKey::new(format!("VR{i}")),
                &Value::Int(*v),
            )
            .expect("set");
        }
        db.commit(action).expect("commit");

        let distinct: BTreeSet<i64> = values.iter().copied().collect();
        prop_assert_eq!(db.blob_count().expect("count"), baseline + distinct.len());
    }

    /// A schema must start with the Dataset kind.
    #[test]
    fn schema_must_start_with_dataset(
        kinds in vec(
            prop::sample::select(vec![
                EntityKind::Subject,
                EntityKind::Visit,
                EntityKind::Trial,
                EntityKind::Phase,
            ]),
            1..4,
        )
    ) {
        prop_assert!(validate_schema(&kinds).is_err());
    }
}
