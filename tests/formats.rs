use std::sync::Arc;

use chrono::NaiveDate;
use serde_json::json;

use dynamic_etl::adapter::{Adapter, AdapterOptions, Stage};
use dynamic_etl::detect::{FormatKind, MarkupKind};
use dynamic_etl::extract::SheetSelection;
use dynamic_etl::load::{Destination, MemorySink, WriteMode};
use dynamic_etl::transform::parse_transform_spec;
use dynamic_etl::types::{CanonicalTable, RawUpload, Value};

fn fixture(name: &str) -> Vec<u8> {
    std::fs::read(format!("tests/fixtures/{name}")).unwrap()
}

/// Run `upload` with no steps and return the format plus the loaded table.
fn extract_with(adapter: &Adapter, upload: RawUpload) -> (FormatKind, CanonicalTable) {
    let sink = Arc::new(MemorySink::new(WriteMode::Overwrite));
    let result = adapter.process(upload, &[], &Destination::new(sink.clone()));
    let summary = result.summary().unwrap_or_else(|| panic!("run failed: {result:?}"));
    (summary.format, sink.snapshot().unwrap())
}

fn extract(upload: RawUpload) -> (FormatKind, CanonicalTable) {
    extract_with(&Adapter::default(), upload)
}

fn utf8(s: &str) -> Value {
    Value::Utf8(s.to_string())
}

fn people_workbook() -> Vec<u8> {
    use rust_xlsxwriter::{ExcelDateTime, Format, Workbook};

    let mut wb = Workbook::new();
    let ws = wb.add_worksheet();
    ws.set_name("Summary").unwrap();
    ws.write_string(0, 0, "generated by finance").unwrap();
    ws.write_string(1, 0, "total").unwrap();
    ws.write_number(1, 1, 2).unwrap();

    let ws = wb.add_worksheet();
    ws.set_name("People").unwrap();
    for (col, name) in ["id", "name", "score", "active", "joined"].into_iter().enumerate() {
        ws.write_string(0, col as u16, name).unwrap();
    }
    let date_format = Format::new().set_num_format("yyyy-mm-dd");
    ws.write_number(1, 0, 1).unwrap();
    ws.write_string(1, 1, "Ada").unwrap();
    ws.write_number(1, 2, 98.5).unwrap();
    ws.write_boolean(1, 3, true).unwrap();
    let joined = ExcelDateTime::from_ymd(2021, 3, 14).unwrap();
    ws.write_datetime_with_format(1, 4, &joined, &date_format).unwrap();

    ws.write_number(2, 0, 2).unwrap();
    ws.write_string(2, 1, "Grace").unwrap();
    ws.write_number(2, 2, 87.25).unwrap();
    ws.write_boolean(2, 3, false).unwrap();

    wb.save_to_buffer().unwrap()
}

#[test]
fn csv_fixture_is_extracted_as_text() {
    let (format, table) = extract(RawUpload::new(fixture("data.csv"), "data.csv"));
    assert_eq!(format, FormatKind::Delimited);
    assert_eq!(table.columns(), ["id", "name"]);
    assert_eq!(table.rows()[0], vec![utf8("1"), utf8("Alice")]);
}

#[test]
fn semicolon_and_tab_delimiters_are_sniffed() {
    let (_, semi) = extract(RawUpload::new("a;b;c\n1;2;3\n", "semi.csv"));
    assert_eq!(semi.columns(), ["a", "b", "c"]);

    let (_, tabs) = extract(RawUpload::new("a\tb\n1\t2\n", "tabs.tsv"));
    assert_eq!(tabs.columns(), ["a", "b"]);
    assert_eq!(tabs.get(0, "b"), Some(&utf8("2")));
}

#[test]
fn forced_delimiter_overrides_sniffing() {
    let mut options = AdapterOptions::default();
    options.extract.delimiter = Some(b'|');
    let (_, table) = extract_with(&Adapter::new(options), RawUpload::new("a,b|c\n1,2|3\n", "pipes.txt"));
    assert_eq!(table.columns(), ["a,b", "c"]);
}

#[test]
fn latin1_csv_is_decoded_with_a_warning() {
    let bytes = b"id;name\n1;Caf\xe9\n".to_vec();
    let sink = Arc::new(MemorySink::new(WriteMode::Overwrite));
    let result = Adapter::default().process(RawUpload::new(bytes, "cafe.csv"), &[], &Destination::new(sink.clone()));

    let summary = result.summary().unwrap();
    assert_eq!(summary.warnings.len(), 1);
    assert_eq!(sink.snapshot().unwrap().get(0, "name"), Some(&utf8("Café")));
}

#[test]
fn utf8_bom_does_not_leak_into_the_header() {
    let mut bytes = vec![0xEF, 0xBB, 0xBF];
    bytes.extend_from_slice(b"id,name\n1,Ada\n");
    let (_, table) = extract(RawUpload::new(bytes, "bom.csv"));
    assert_eq!(table.columns(), ["id", "name"]);
}

#[test]
fn html_fixture_uses_the_first_consistent_table() {
    let (format, table) = extract(RawUpload::new(fixture("people.html"), "people.html"));
    assert_eq!(format, FormatKind::Markup(MarkupKind::Html));
    assert_eq!(table.columns(), ["id", "name", "city"]);
    assert_eq!(table.row_count(), 3);
    assert_eq!(table.get(1, "city"), Some(&Value::Null));
    assert_eq!(table.get(2, "name"), Some(&utf8("Carol")));
}

#[test]
fn xml_fixture_uses_the_repeating_record_group() {
    let (format, table) = extract(RawUpload::new(fixture("people.xml"), "people.xml"));
    assert_eq!(format, FormatKind::Markup(MarkupKind::Xml));
    assert_eq!(table.columns(), ["id", "name", "city"]);
    assert_eq!(table.row_count(), 3);
    assert_eq!(table.get(0, "id"), Some(&utf8("1")));
    assert_eq!(table.get(1, "city"), Some(&Value::Null));
}

#[test]
fn json_fixture_keeps_native_types() {
    let (format, table) = extract(RawUpload::new(fixture("people.json"), "people.json"));
    assert_eq!(format, FormatKind::Json);
    assert_eq!(table.columns(), ["id", "name", "score", "active"]);
    assert_eq!(table.get(0, "id"), Some(&Value::Int64(1)));
    assert_eq!(table.get(0, "score"), Some(&Value::Float64(98.5)));
    assert_eq!(table.get(1, "active"), Some(&Value::Bool(false)));
    assert_eq!(table.get(2, "active"), Some(&Value::Null));
}

#[test]
fn ndjson_upload_is_one_row_per_line() {
    let (_, table) = extract(RawUpload::new("{\"a\":1}\n{\"a\":2,\"b\":\"x\"}\n", "events.ndjson"));
    assert_eq!(table.columns(), ["a", "b"]);
    assert_eq!(table.row_count(), 2);
}

#[test]
fn content_is_sniffed_when_the_extension_is_unknown() {
    let (format, _) = extract(RawUpload::new(fixture("people.json"), "people.dat"));
    assert_eq!(format, FormatKind::Json);
}

#[test]
fn xlsx_first_sheet_by_default() {
    let (format, table) = extract(RawUpload::new(people_workbook(), "people.xlsx"));
    assert_eq!(format, FormatKind::Spreadsheet);
    assert_eq!(table.columns()[0], "generated by finance");
    assert_eq!(table.row_count(), 1);
}

#[test]
fn xlsx_selected_sheet_keeps_native_cell_types() {
    let mut options = AdapterOptions::default();
    options.extract.sheet = SheetSelection::Name("People".into());
    let (_, table) = extract_with(&Adapter::new(options), RawUpload::new(people_workbook(), "people.xlsx"));

    assert_eq!(table.columns(), ["id", "name", "score", "active", "joined"]);
    assert_eq!(table.row_count(), 2);
    assert_eq!(table.get(0, "score"), Some(&Value::Float64(98.5)));
    assert_eq!(table.get(0, "active"), Some(&Value::Bool(true)));
    assert_eq!(
        table.get(0, "joined"),
        Some(&Value::Date(NaiveDate::from_ymd_opt(2021, 3, 14).unwrap()))
    );
    assert_eq!(table.get(1, "joined"), Some(&Value::Null));
}

#[test]
fn xlsx_numbers_coerce_to_integers() {
    let mut options = AdapterOptions::default();
    options.extract.sheet = SheetSelection::Index(1);
    let sink = Arc::new(MemorySink::new(WriteMode::Overwrite));
    let steps = parse_transform_spec(&json!([{"coerce_type": {"column": "id", "to": "integer"}}])).unwrap();
    let result = Adapter::new(options).process(
        RawUpload::new(people_workbook(), "people.xlsx"),
        &steps,
        &Destination::new(sink.clone()),
    );

    assert!(result.is_success());
    assert_eq!(sink.snapshot().unwrap().get(1, "id"), Some(&Value::Int64(2)));
}

#[test]
fn missing_sheet_fails_extraction() {
    let mut options = AdapterOptions::default();
    options.extract.sheet = SheetSelection::Name("Nope".into());
    let result = Adapter::new(options).process(
        RawUpload::new(people_workbook(), "people.xlsx"),
        &[],
        &Destination::new(Arc::new(MemorySink::default())),
    );
    let failure = result.failure().unwrap();
    assert_eq!(failure.stage, Stage::Extract);
    assert_eq!(failure.reason, "malformed_input");
}

#[test]
fn binary_payload_with_text_extension_is_rejected() {
    let result = Adapter::default().process(
        RawUpload::new(people_workbook(), "people.csv"),
        &[],
        &Destination::new(Arc::new(MemorySink::default())),
    );
    assert_eq!(result.failure().unwrap().reason, "unsupported_format");
}
