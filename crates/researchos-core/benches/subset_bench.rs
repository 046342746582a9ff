//! # Subset Benchmarks
//!
//! Hierarchy build and condition evaluation over growing datasets.
//!
//! Run with: `cargo bench -p researchos-core`

use criterion::{BenchmarkId, Criterion, criterion_group, criterion_main};
use researchos_core::{
    AddressGraph, Condition, Config, DataObject, Database, Dataset, EntityId, EntityKind,
    ResearchObject, Value, Variable, evaluate,
};
use std::hint::black_box;

/// A dataset with `subjects` subjects of four trials each. Every subject
/// carries an `age`; trials carry nothing.
fn populated(subjects: usize) -> (Database, EntityId, Variable) {
    let mut db = Database::in_memory(Config::default());
    let mut action = db.begin_action("populate").expect("action");
    let mut dataset = Dataset::new(&db, &mut action, "bench").expect("dataset");
    dataset
        .set_schema(
            &mut action,
            &[EntityKind::Dataset, EntityKind::Subject, EntityKind::Trial],
        )
        .expect("schema");
    let age = Variable::new(&db, &mut action, "age").expect("variable");

    for i in 0..subjects {
        let subject = DataObject::new(&db, &mut action, EntityKind::Subject, &format!("S{i}"))
            .expect("subject");
        db.relate(&mut action, dataset.id(), dataset.id(), subject.id())
            .expect("relate");
        let years = i64::try_from(i % 80).expect("fits");
        db.set_data_value(&mut action, subject.id(), &age.key(), &Value::Int(years))
            .expect("age");
        for t in 0..4 {
            let trial =
                DataObject::new(&db, &mut action, EntityKind::Trial, &format!("S{i}T{t}"))
                    .expect("trial");
            db.relate(&mut action, dataset.id(), subject.id(), trial.id())
                .expect("relate");
        }
    }
    db.commit(action).expect("commit");
    (db, dataset.id().clone(), age)
}

fn bench_address_graph(c: &mut Criterion) {
    let mut group = c.benchmark_group("address_graph_build");
    for size in [10, 100, 500] {
        let (db, dataset, _) = populated(size);
        group.bench_with_input(BenchmarkId::from_parameter(size), &size, |b, _| {
            b.iter(|| AddressGraph::build(black_box(&db), black_box(&dataset)).expect("build"));
        });
    }
    group.finish();
}

fn bench_evaluate(c: &mut Criterion) {
    let mut group = c.benchmark_group("subset_evaluate");
    for size in [10, 100, 500] {
        let (db, dataset, age) = populated(size);
        let graph = AddressGraph::build(&db, &dataset).expect("build");
        let condition = Condition::parse(
            &serde_json::json!({"and": [[age.id().as_str(), ">=", 18], [age.id().as_str(), "<", 65]]}),
            &db,
        )
        .expect("condition");
        group.bench_with_input(BenchmarkId::from_parameter(size), &size, |b, _| {
            b.iter(|| evaluate(black_box(&condition), &graph, &db).expect("evaluate"));
        });
    }
    group.finish();
}

criterion_group!(benches, bench_address_graph, bench_evaluate);
criterion_main!(benches);
