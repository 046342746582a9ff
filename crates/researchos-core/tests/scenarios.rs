//! # Scenario Tests (S0-S4)
//!
//! End-to-end behaviour through the public API only.
//!
//! ## Tiers
//! - S0: Action log and value store
//! - S1: Hierarchy and subsets
//! - S2: Pipeline linking
//! - S3: Package bridging
//! - S4: Persistence

use researchos_core::{
    Binding, Config, DataObject, Database, Dataset, EntityId, EntityKind, Header, Logsheet,
    Lookup, Process, ResearchObject, RosError, Subset, Value, Variable, build_pipeline_graph,
    link_step,
};
use serde_json::json;

/// Dataset with schema [Dataset, Subject, Trial], subject SB1 (age = 10)
/// and trial TR1 under SB1.
struct Hierarchy {
    db: Database,
    dataset: Dataset,
    subject: DataObject,
    trial: DataObject,
    age: Variable,
}

fn hierarchy() -> Hierarchy {
    let mut db = Database::in_memory(Config::default());
    let mut action = db.begin_action("setup").expect("action");
    let mut dataset = Dataset::new(&db, &mut action, "gait").expect("dataset");
    dataset
        .set_schema(
            &mut action,
            &[EntityKind::Dataset, EntityKind::Subject, EntityKind::Trial],
        )
        .expect("schema");
    let subject = DataObject::new(&db, &mut action, EntityKind::Subject, "SB1").expect("subject");
    let trial = DataObject::new(&db, &mut action, EntityKind::Trial, "TR1").expect("trial");
    let age = Variable::new(&db, &mut action, "age").expect("variable");
    db.relate(&mut action, dataset.id(), dataset.id(), subject.id())
        .expect("relate");
    db.relate(&mut action, dataset.id(), subject.id(), trial.id())
        .expect("relate");
    db.set_data_value(&mut action, subject.id(), &age.key(), &Value::Int(10))
        .expect("age");
    assert!(db.commit(action).expect("commit"));
    Hierarchy {
        db,
        dataset,
        subject,
        trial,
        age,
    }
}

// =============================================================================
// TIER S0: ACTION LOG AND VALUE STORE
// =============================================================================

mod s0_values {
    use super::*;

    /// S0.1: An empty action commits nothing, not even its own row.
    #[test]
    fn empty_action_is_a_no_op() {
        let mut db = Database::in_memory(Config::default());
        let action = db.begin_action("nothing").expect("action");
        let id = action.id().clone();
        assert!(!db.commit(action).expect("commit"));
        assert!(db.store().action(&id).expect("read").is_none());
    }

    /// S0.2: Writing the same value from two actions stores one blob.
    #[test]
    fn repeated_value_shares_blob() {
        let mut h = hierarchy();
        let before = h.db.blob_count().expect("count");
        let mut action = h.db.begin_action("same age").expect("action");
        h.db.set_data_value(&mut action, h.trial.id(), &h.age.key(), &Value::Int(10))
            .expect("set");
        h.db.commit(action).expect("commit");
        assert_eq!(h.db.blob_count().expect("count"), before);

        let subject_row = h.db.history(h.subject.id(), &h.age.key()).expect("history");
        let trial_row = h.db.history(h.trial.id(), &h.age.key()).expect("history");
        assert_eq!(subject_row[0].hash, trial_row[0].hash);
    }

    /// S0.3: A deleted value is not associated but stays in history.
    #[test]
    fn soft_delete_keeps_history() {
        let mut h = hierarchy();
        let written = h.db.history(h.subject.id(), &h.age.key()).expect("history")[0]
            .action_id
            .clone();

        let mut action = h.db.begin_action("forget age").expect("action");
        h.db.delete_value(&mut action, h.subject.id(), &h.age.key())
            .expect("delete");
        h.db.commit(action).expect("commit");

        assert_eq!(
            h.db.lookup::<Value>(h.subject.id(), &h.age.key()).expect("lookup"),
            Lookup::NotAssociated
        );
        assert_eq!(
            h.db.value_for_action::<Value>(h.subject.id(), &h.age.key(), &written)
                .expect("by action"),
            Some(Value::Int(10))
        );
    }

    /// S0.4: A later write supersedes; exactly one association stays active.
    #[test]
    fn supersede_leaves_one_active() {
        let mut h = hierarchy();
        for age in [11, 12, 13] {
            let mut action = h.db.begin_action("birthday").expect("action");
            h.db.set_data_value(&mut action, h.subject.id(), &h.age.key(), &Value::Int(age))
                .expect("set");
            h.db.commit(action).expect("commit");
        }
        let history = h.db.history(h.subject.id(), &h.age.key()).expect("history");
        assert_eq!(history.len(), 4);
        assert_eq!(history.iter().filter(|r| r.is_active()).count(), 1);
        assert_eq!(
            h.db.get::<Value>(h.subject.id(), &h.age.key()).expect("get"),
            Value::Int(13)
        );
    }
}

// =============================================================================
// TIER S1: HIERARCHY AND SUBSETS
// =============================================================================

mod s1_subsets {
    use super::*;

    /// S1.1: A trial without its own age matches through its subject, and
    /// the result keeps the full lineage.
    #[test]
    fn ancestor_fallback_includes_lineage() {
        let mut h = hierarchy();
        let mut action = h.db.begin_action("subset").expect("action");
        let subset = Subset::new(
            &h.db,
            &mut action,
            "adults",
            h.dataset.id(),
            &json!([h.age.id().as_str(), ">=", 5]),
        )
        .expect("subset");
        h.db.commit(action).expect("commit");

        let members = subset.members(&h.db).expect("members");
        assert!(members.contains(h.trial.id()));
        assert!(members.contains(h.subject.id()));
        assert!(members.contains(h.dataset.id()));

        let graph = Subset::load(&h.db, subset.id())
            .expect("load")
            .resolve(&h.db)
            .expect("resolve");
        assert_eq!(graph.node_count(), 3);
        assert_eq!(
            graph.edges(),
            {
                let mut edges = vec![
                    (h.dataset.id().clone(), h.subject.id().clone()),
                    (h.subject.id().clone(), h.trial.id().clone()),
                ];
                edges.sort();
                edges
            }
        );
    }

    /// S1.2: A trial-level value overrides the subject's.
    #[test]
    fn own_value_beats_ancestor() {
        let mut h = hierarchy();
        let mut action = h.db.begin_action("override").expect("action");
        h.db.set_data_value(&mut action, h.trial.id(), &h.age.key(), &Value::Int(2))
            .expect("set");
        let subset = Subset::new(
            &h.db,
            &mut action,
            "adults",
            h.dataset.id(),
            &json!({"and": [[h.age.id().as_str(), ">", 5]]}),
        )
        .expect("subset");
        h.db.commit(action).expect("commit");

        let members = subset.members(&h.db).expect("members");
        assert!(members.contains(h.subject.id()));
        assert!(!members.contains(h.trial.id()));
    }

    /// S1.3: Conditions are validated before anything is stored.
    #[test]
    fn malformed_conditions_are_rejected() {
        let h = hierarchy();
        let mut action = h.db.begin_action("bad").expect("action");
        for raw in [
            json!([h.age.id().as_str(), ">"]),
            json!([h.age.id().as_str(), "~", 1]),
            json!([h.age.id().as_str(), ">", "five"]),
            json!({"and": [], "or": []}),
            json!({"xor": []}),
        ] {
            assert!(matches!(
                Subset::new(&h.db, &mut action, "bad", h.dataset.id(), &raw),
                Err(RosError::Validation(_))
            ));
        }
        assert!(matches!(
            Subset::new(
                &h.db,
                &mut action,
                "bad",
                h.dataset.id(),
                &json!(["VRmissing", "==", 1])
            ),
            Err(RosError::Reference(_))
        ));
        assert!(action.is_empty());
    }

    /// S1.4: A relation that breaks schema order fails the graph build.
    #[test]
    fn out_of_order_relation_is_structural() {
        let mut h = hierarchy();
        let mut action = h.db.begin_action("bad relation").expect("action");
        h.db.relate(&mut action, h.dataset.id(), h.trial.id(), h.subject.id())
            .expect("queued");
        h.db.commit(action).expect("commit");
        assert!(matches!(
            researchos_core::AddressGraph::build(&h.db, h.dataset.id()),
            Err(RosError::Structural(_))
        ));
    }

    /// S1.5: Unrelating removes the edge from the next build.
    #[test]
    fn unrelate_drops_edge() {
        let mut h = hierarchy();
        let mut action = h.db.begin_action("unrelate").expect("action");
        h.db.unrelate(&mut action, h.dataset.id(), h.subject.id(), h.trial.id())
            .expect("unrelate");
        h.db.commit(action).expect("commit");
        let graph = researchos_core::AddressGraph::build(&h.db, h.dataset.id()).expect("build");
        assert_eq!(graph.edge_count(), 1);
        assert!(!graph.contains(h.trial.id()));
    }
}

// =============================================================================
// TIER S2: PIPELINE LINKING
// =============================================================================

mod s2_pipeline {
    use super::*;

    /// S2.1: A consumer pinned to its producer links exactly once, and the
    /// pipeline graph shows the edge.
    #[test]
    fn pinned_input_links_to_producer() {
        let mut db = Database::in_memory(Config::default());
        let mut action = db.begin_action("steps").expect("action");
        let var = Variable::new(&db, &mut action, "speed").expect("variable");
        let mut producer = Process::new(&db, &mut action, "compute").expect("producer");
        producer
            .set_output(&db, &mut action, "speed", var.id())
            .expect("output");
        let mut consumer = Process::new(&db, &mut action, "plot").expect("consumer");
        consumer
            .set_input(
                &db,
                &mut action,
                "speed",
                Binding::Variable {
                    variable: var.id().clone(),
                    source: Some(producer.id().clone()),
                },
            )
            .expect("input");
        db.commit(action).expect("commit");

        let edges = link_step(&mut db, consumer.id()).expect("link");
        assert_eq!(edges.len(), 1);
        assert_eq!(&edges[0].outlet.parent, producer.id());
        assert_eq!(&edges[0].inlet.parent, consumer.id());

        assert!(link_step(&mut db, consumer.id()).expect("relink").is_empty());

        let graph = build_pipeline_graph(&db).expect("graph");
        assert_eq!(graph.node_count(), 2);
        assert_eq!(graph.edges_between(producer.id(), consumer.id()).len(), 1);
        assert!(graph.edges_between(consumer.id(), producer.id()).is_empty());
    }

    /// S2.2: No producer means no edges and no error.
    #[test]
    fn unbound_input_is_fine() {
        let mut db = Database::in_memory(Config::default());
        let mut action = db.begin_action("steps").expect("action");
        let var = Variable::new(&db, &mut action, "speed").expect("variable");
        let mut consumer = Process::new(&db, &mut action, "plot").expect("consumer");
        consumer
            .set_input(
                &db,
                &mut action,
                "speed",
                Binding::Variable {
                    variable: var.id().clone(),
                    source: None,
                },
            )
            .expect("input");
        db.commit(action).expect("commit");

        assert!(link_step(&mut db, consumer.id()).expect("link").is_empty());
        assert_eq!(build_pipeline_graph(&db).expect("graph").edge_count(), 0);
    }

    /// S2.3: Logsheet columns feed steps that read their variable.
    #[test]
    fn logsheet_column_feeds_step() {
        let mut db = Database::in_memory(Config::default());
        let mut action = db.begin_action("steps").expect("action");
        let mass = Variable::new(&db, &mut action, "mass").expect("variable");
        let mut sheet = Logsheet::new(&db, &mut action, "intake").expect("logsheet");
        sheet
            .set_headers(
                &db,
                &mut action,
                vec![Header {
                    column: "Mass".to_string(),
                    level: EntityKind::Subject,
                    variable: mass.id().clone(),
                }],
            )
            .expect("headers");
        let mut step = Process::new(&db, &mut action, "normalize").expect("step");
        step.set_input(
            &db,
            &mut action,
            "mass",
            Binding::Variable {
                variable: mass.id().clone(),
                source: None,
            },
        )
        .expect("input");
        db.commit(action).expect("commit");

        let edges = link_step(&mut db, step.id()).expect("link");
        assert_eq!(edges.len(), 1);
        assert_eq!(&edges[0].outlet.parent, sheet.id());
        assert_eq!(edges[0].outlet.name, "Mass");
    }

    /// S2.4: Linking something that is not a process is a reference error.
    #[test]
    fn link_requires_process() {
        let mut h = hierarchy();
        let trial: EntityId = h.trial.id().clone();
        assert!(matches!(
            link_step(&mut h.db, &trial),
            Err(RosError::Reference(_))
        ));
    }
}

// =============================================================================
// TIER S3: PACKAGE BRIDGING
// =============================================================================

mod s3_packages {
    use researchos_core::packages::{NodeKind, NodeRole, PackageContext, collect_bridges};
    use researchos_core::{ConfigGraph, PackageDef, bridge_packages};

    fn parse(text: serde_json::Value) -> PackageDef {
        serde_json::from_value(text).expect("package")
    }

    /// S3.1: An unspecified input becomes a variable input once bridged.
    #[test]
    fn bridge_promotes_unspecified_target() {
        let packages = vec![
            parse(serde_json::json!({
                "name": "pkgA",
                "process": {
                    "step1": {"path": "a.py", "subset": "all", "inputs": {}, "outputs": ["outVar"]}
                }
            })),
            parse(serde_json::json!({
                "name": "pkgB",
                "stats": {
                    "step2": {
                        "path": "b.py", "subset": "all", "level": "Subject",
                        "inputs": {"inVar": "?"}, "outputs": []
                    }
                },
                "bridges": {
                    "link": {"sources": "pkgA.step1.outVar", "targets": ["pkgB.step2.inVar"]}
                }
            })),
        ];
        let mut graph =
            ConfigGraph::from_packages(&packages, &researchos_core::Config::default())
                .expect("build");
        assert_eq!(graph.open_inputs(), vec!["pkgB.step2.inVar"]);

        let ctx = PackageContext::from_packages(&packages);
        let added = bridge_packages(&mut graph, &collect_bridges(&packages), &ctx).expect("bridge");
        assert_eq!(added, 1);
        assert_eq!(
            graph.bridges(),
            vec![("pkgA.step1.outVar", "pkgB.step2.inVar", "pkgB.link")]
        );
        assert_eq!(
            graph.node(NodeRole::Input, "pkgB.step2.inVar").map(|n| n.kind.clone()),
            Some(NodeKind::InputVariable)
        );
        assert!(graph.open_inputs().is_empty());
        assert_eq!(
            graph.runnable_order().expect("order"),
            vec!["pkgA.step1", "pkgB.step2"]
        );
    }
}

// =============================================================================
// TIER S4: PERSISTENCE
// =============================================================================

mod s4_persistence {
    use super::*;

    /// S4.1: Committed state survives closing and reopening a redb file.
    #[test]
    fn redb_round_trip() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("research.redb");

        let (subject, age) = {
            let mut db = Database::open(&path, Config::default()).expect("open");
            assert!(db.is_persistent());
            let mut action = db.begin_action("setup").expect("action");
            let subject =
                DataObject::new(&db, &mut action, EntityKind::Subject, "S01").expect("subject");
            let age = Variable::new(&db, &mut action, "age").expect("variable");
            db.set_data_value(&mut action, subject.id(), &age.key(), &Value::Int(31))
                .expect("set");
            db.commit(action).expect("commit");
            (subject, age)
        };

        let db = Database::open(&path, Config::default()).expect("reopen");
        assert_eq!(DataObject::load(&db, subject.id()).expect("load"), subject);
        assert_eq!(
            db.get::<Value>(subject.id(), &age.key()).expect("get"),
            Value::Int(31)
        );
        assert_eq!(db.store().actions().expect("actions").len(), 1);
    }

    /// S4.2: A failed commit leaves the file untouched.
    #[test]
    fn failed_commit_writes_nothing() {
        let dir = tempfile::tempdir().expect("tempdir");
        let mut db = Database::open(dir.path().join("research.redb"), Config::default())
            .expect("open");

        let mut action = db.begin_action("setup").expect("action");
        let subject =
            DataObject::new(&db, &mut action, EntityKind::Subject, "S01").expect("subject");
        db.commit(action).expect("commit");

        // second unrelate of the same relation fails at commit time
        let mut action = db.begin_action("bad").expect("action");
        let var = Variable::new(&db, &mut action, "age").expect("variable");
        db.unrelate(&mut action, &EntityId::from("DSnone"), subject.id(), subject.id())
            .expect("queued");
        assert!(db.commit(action).is_err());

        assert!(!db.contains_entity(var.id()).expect("contains"));
        assert_eq!(db.store().actions().expect("actions").len(), 1);
    }
}
