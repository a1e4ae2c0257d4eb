use std::sync::{Arc, Mutex};

use serde_json::json;

use dynamic_etl::adapter::Adapter;
use dynamic_etl::batch::{BatchEvent, BatchJob, BatchObserver, BatchOptions, BatchRunner};
use dynamic_etl::load::{Destination, MemorySink, WriteMode};
use dynamic_etl::schema::{FieldType, SchemaRegistry};
use dynamic_etl::transform::{parse_transform_spec, StepSpec};
use dynamic_etl::types::RawUpload;

#[derive(Default)]
struct EventLog(Mutex<Vec<String>>);

impl BatchObserver for EventLog {
    fn on_event(&self, event: &BatchEvent) {
        let label = match event {
            BatchEvent::BatchStarted { .. } => "batch_started",
            BatchEvent::ThrottleWaited { .. } => "throttle_waited",
            BatchEvent::RunStarted { .. } => "run_started",
            BatchEvent::RunFinished { .. } => "run_finished",
            BatchEvent::BatchFinished { .. } => "batch_finished",
        };
        self.0.lock().unwrap().push(label.to_string());
    }
}

fn runner(adapter: Adapter, threads: usize) -> BatchRunner {
    BatchRunner::new(
        Arc::new(adapter),
        BatchOptions {
            num_threads: Some(threads),
            max_in_flight: Some(threads),
        },
    )
    .unwrap()
}

#[test]
fn batch_runs_share_one_destination() {
    let sink = Arc::new(MemorySink::new(WriteMode::Append));
    let dest = Destination::new(sink.clone());
    let steps = parse_transform_spec(&json!([{"drop_null": ["name"]}])).unwrap();
    let jobs: Vec<BatchJob> = (0..6)
        .map(|i| {
            BatchJob::new(
                RawUpload::new(format!("id,name\n{i},n{i}\n{i},\n"), format!("part_{i}.csv")),
                steps.clone(),
                dest.clone(),
            )
        })
        .collect();

    let log = Arc::new(EventLog::default());
    let r = runner(Adapter::default(), 3).with_observer(log.clone());
    let results = r.run(jobs);

    assert!(results.iter().all(|res| res.is_success()));
    assert_eq!(sink.row_count(), 6);
    let events = log.0.lock().unwrap().clone();
    assert_eq!(events.first().map(String::as_str), Some("batch_started"));
    assert_eq!(events.last().map(String::as_str), Some("batch_finished"));
    assert_eq!(events.iter().filter(|e| *e == "run_finished").count(), 6);
}

#[test]
fn one_bad_upload_does_not_affect_the_others() {
    let dest = Destination::new(Arc::new(MemorySink::new(WriteMode::Append)));
    let jobs = vec![
        BatchJob::new(RawUpload::new("a\n1\n", "one.csv"), vec![], dest.clone()),
        BatchJob::new(
            RawUpload::new("a\n2\n", "two.csv"),
            vec![StepSpec::new("uppercase_column", json!({"column": "b"}))],
            dest.clone(),
        ),
        BatchJob::new(RawUpload::new("a\n3\n", "three.csv"), vec![], dest),
    ];

    let r = runner(Adapter::default(), 2);
    let results = r.run(jobs);

    assert!(results[0].is_success());
    assert_eq!(results[1].failure().unwrap().reason, "missing_columns");
    assert_eq!(results[1].failure().unwrap().source_id, "two");
    assert!(results[2].is_success());
    let m = r.metrics().snapshot();
    assert_eq!((m.runs_succeeded, m.runs_failed), (2, 1));
}

#[test]
fn registry_versions_follow_schema_changes() {
    let registry = Arc::new(SchemaRegistry::new());
    let adapter = Adapter::default().with_schema_registry(registry.clone());
    let dest = Destination::new(Arc::new(MemorySink::new(WriteMode::Overwrite)));
    let run = |body: &str| {
        adapter
            .process(RawUpload::new(body.to_string(), "daily.csv"), &[], &dest)
            .summary()
            .and_then(|s| s.schema_version.clone())
            .unwrap()
    };

    let v1 = run("id,name\n1,Ada\n");
    assert_eq!((v1.version, v1.changed), (1, true));

    let same = run("id,name\n2,Tim\n");
    assert_eq!((same.version, same.changed), (1, false));
    assert!(same.diff.is_empty());

    let v2 = run("id,name,score\n3,Kim,9.5\n");
    assert_eq!((v2.version, v2.changed), (2, true));
    assert_eq!(v2.diff.added.len(), 1);
    assert_eq!(v2.diff.added[0].name, "score");
    assert_eq!(v2.diff.added[0].field_type, FieldType::Number);

    let v1_schema = registry.version("daily", 1).unwrap();
    assert!(v1_schema.field("score").is_none());
    assert_eq!(registry.latest("daily").unwrap().fields.len(), 3);
}

#[test]
fn failed_runs_are_not_registered() {
    let registry = Arc::new(SchemaRegistry::new());
    let adapter = Adapter::default().with_schema_registry(registry.clone());
    let dest = Destination::new(Arc::new(MemorySink::default()));

    let steps = [StepSpec::new("drop_column", json!({"column": "nope"}))];
    let result = adapter.process(RawUpload::new("id\n1\n", "weekly.csv"), &steps, &dest);

    assert!(!result.is_success());
    assert!(registry.latest("weekly").is_none());
}
