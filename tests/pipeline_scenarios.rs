use std::sync::Arc;

use serde_json::json;

use dynamic_etl::adapter::{Adapter, RunState, Stage};
use dynamic_etl::detect::FormatKind;
use dynamic_etl::load::{Destination, DestinationConfig, MemorySink, WriteMode};
use dynamic_etl::schema::FieldType;
use dynamic_etl::transform::parse_transform_spec;
use dynamic_etl::types::{RawUpload, Value};

fn fixture(name: &str) -> Vec<u8> {
    std::fs::read(format!("tests/fixtures/{name}")).unwrap()
}

fn memory_destination() -> (Arc<MemorySink>, Destination) {
    let sink = Arc::new(MemorySink::new(WriteMode::Overwrite));
    (sink.clone(), Destination::new(sink))
}

#[test]
fn csv_drop_column_end_to_end() {
    let result = dynamic_etl::process(
        fixture("data.csv"),
        "data.csv",
        &json!([{"drop_column": {"column": "name"}}]),
        &DestinationConfig::Memory {
            mode: WriteMode::Append,
        },
    );

    let summary = result.summary().expect("run succeeded");
    assert_eq!(summary.source_id, "data");
    assert_eq!(summary.format, FormatKind::Delimited);
    assert_eq!(summary.row_count, 2);
    assert_eq!(summary.column_names, ["id"]);
    assert_eq!(summary.load.rows_written, 2);
    assert_eq!(result.state(), RunState::Succeeded);
}

#[test]
fn workbook_extension_without_workbook_bytes_fails_detection() {
    let result = dynamic_etl::process(
        fixture("bad.xlsx"),
        "bad.xlsx",
        &json!([]),
        &DestinationConfig::default(),
    );

    let failure = result.failure().expect("run failed");
    assert_eq!(failure.source_id, "bad");
    assert_eq!(failure.stage, Stage::Detect);
    assert_eq!(failure.reason, "unsupported_format");
    assert!(failure.cause_detail.contains("bad.xlsx"));
}

#[test]
fn missing_column_fails_transform_and_leaves_sink_untouched() {
    let (sink, dest) = memory_destination();
    let steps = parse_transform_spec(&json!([{"uppercase_column": "missing"}])).unwrap();
    let result = Adapter::default().process(RawUpload::new(fixture("data.csv"), "data.csv"), &steps, &dest);

    let failure = result.failure().unwrap();
    assert_eq!(failure.stage, Stage::Transform);
    assert_eq!(failure.reason, "missing_columns");
    assert!(sink.snapshot().is_none());
}

#[test]
fn header_only_file_loads_zero_rows() {
    let (sink, dest) = memory_destination();
    let result = Adapter::default().process(RawUpload::new(fixture("header_only.csv"), "header_only.csv"), &[], &dest);

    let summary = result.summary().unwrap();
    assert_eq!(summary.row_count, 0);
    assert_eq!(summary.column_names, ["id", "name"]);
    let loaded = sink.snapshot().unwrap();
    assert_eq!(loaded.columns(), ["id", "name"]);
    assert_eq!(loaded.row_count(), 0);
}

#[test]
fn steps_run_in_declared_order() {
    let (sink, dest) = memory_destination();
    let steps = parse_transform_spec(&json!([
        {"rename_column": {"from": "name", "to": "full_name"}},
        {"uppercase_column": "full_name"},
        {"coerce_type": {"column": "id", "to": "integer"}},
        {"filter_rows": {"column": "id", "op": "gt", "value": 1}},
    ]))
    .unwrap();
    let result = Adapter::default().process(RawUpload::new(fixture("data.csv"), "data.csv"), &steps, &dest);

    let summary = result.summary().unwrap();
    let names: Vec<&str> = summary.steps.iter().map(|s| s.step_name.as_str()).collect();
    assert_eq!(names, ["rename_column", "uppercase_column", "coerce_type", "filter_rows"]);
    assert_eq!(summary.steps[3].rows_before, 2);
    assert_eq!(summary.steps[3].rows_after, 1);

    let loaded = sink.snapshot().unwrap();
    assert_eq!(loaded.columns(), ["id", "full_name"]);
    assert_eq!(loaded.get(0, "id"), Some(&Value::Int64(2)));
    assert_eq!(loaded.get(0, "full_name"), Some(&Value::Utf8("BOB".into())));
    assert_eq!(summary.schema.field("id").unwrap().field_type, FieldType::Integer);
}

#[test]
fn reversed_steps_fail_where_the_column_is_gone() {
    let (_, dest) = memory_destination();
    let steps = parse_transform_spec(&json!([
        {"uppercase_column": "full_name"},
        {"rename_column": {"from": "name", "to": "full_name"}},
    ]))
    .unwrap();
    let result = Adapter::default().process(RawUpload::new(fixture("data.csv"), "data.csv"), &steps, &dest);
    assert_eq!(result.failure().unwrap().reason, "missing_columns");
}

#[test]
fn strict_coercion_aborts_the_run() {
    let (sink, dest) = memory_destination();
    let steps = parse_transform_spec(&json!([
        {"coerce_type": {"column": "age", "to": "integer", "on_error": "abort"}}
    ]))
    .unwrap();
    let upload = RawUpload::new("name,age\nAda,36\nTim,unknown\n", "ages.csv");
    let result = Adapter::default().process(upload, &steps, &dest);

    let failure = result.failure().unwrap();
    assert_eq!(failure.stage, Stage::Transform);
    assert_eq!(failure.reason, "coercion_failed");
    assert!(failure.cause_detail.contains("unknown"));
    assert!(sink.snapshot().is_none());
}

#[test]
fn lenient_coercion_nulls_bad_cells() {
    let (sink, dest) = memory_destination();
    let steps = parse_transform_spec(&json!([{"coerce_type": {"column": "age", "to": "integer"}}])).unwrap();
    let upload = RawUpload::new("name,age\nAda,36\nTim,unknown\n", "ages.csv");
    let summary = Adapter::default().process(upload, &steps, &dest).summary().cloned().unwrap();

    assert_eq!(summary.cleaning.nulls_before, 0);
    assert_eq!(summary.cleaning.nulls_after, 1);
    assert_eq!(sink.snapshot().unwrap().get(1, "age"), Some(&Value::Null));
}

#[test]
fn rename_onto_existing_column_is_rejected() {
    let (_, dest) = memory_destination();
    let steps = parse_transform_spec(&json!([{"rename_column": {"from": "name", "to": "id"}}])).unwrap();
    let result = Adapter::default().process(RawUpload::new(fixture("data.csv"), "data.csv"), &steps, &dest);
    assert_eq!(result.failure().unwrap().reason, "duplicate_column");
}

#[test]
fn invalid_parameters_fail_validation_before_detection() {
    let result = dynamic_etl::process(
        fixture("bad.xlsx"),
        "bad.xlsx",
        &json!([{"filter_rows": {"column": "id", "op": "gt"}}]),
        &DestinationConfig::default(),
    );
    let failure = result.failure().unwrap();
    assert_eq!(failure.stage, Stage::Validate);
    assert_eq!(failure.reason, "invalid_parameter");
}

#[test]
fn markup_without_a_table_reports_no_table_found() {
    let (_, dest) = memory_destination();
    let upload = RawUpload::new("<html><body><p>nothing tabular here</p></body></html>", "page.html");
    let failure = Adapter::default().process(upload, &[], &dest).failure().cloned().unwrap();
    assert_eq!(failure.stage, Stage::Extract);
    assert_eq!(failure.reason, "no_table_found");
}

#[test]
fn malformed_json_fails_extraction() {
    let (_, dest) = memory_destination();
    let upload = RawUpload::new(r#"[{"id": 1,, }"#, "broken.json");
    let failure = Adapter::default().process(upload, &[], &dest).failure().cloned().unwrap();
    assert_eq!(failure.stage, Stage::Extract);
    assert_eq!(failure.reason, "malformed_input");
}

#[test]
fn same_input_gives_the_same_result() {
    let steps = parse_transform_spec(&json!([{"deduplicate": []}, {"lowercase_column": "name"}])).unwrap();
    let run = || {
        let (sink, dest) = memory_destination();
        let summary = Adapter::default()
            .process(RawUpload::new(fixture("data.csv"), "data.csv"), &steps, &dest)
            .summary()
            .cloned()
            .unwrap();
        (summary.column_names, summary.steps, summary.schema, sink.snapshot())
    };
    assert_eq!(run(), run());
}

#[test]
fn caller_source_id_overrides_the_filename() {
    let (_, dest) = memory_destination();
    let upload = RawUpload::new(fixture("data.csv"), "data.csv").with_source_id("crm-export");
    let summary = Adapter::default().process(upload, &[], &dest).summary().cloned().unwrap();
    assert_eq!(summary.source_id, "crm-export");
}

#[test]
fn result_json_shape() {
    let result = dynamic_etl::process(
        fixture("bad.xlsx"),
        "bad.xlsx",
        &json!([]),
        &DestinationConfig::default(),
    );
    let v = serde_json::to_value(&result).unwrap();
    assert_eq!(v["status"], "failure");
    assert_eq!(v["stage"], "detect");
    assert_eq!(v["reason"], "unsupported_format");
    assert_eq!(v["source_id"], "bad");
}
