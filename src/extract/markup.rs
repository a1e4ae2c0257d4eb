//! Markup extraction: the first data-table-like structure of an HTML or XML document.
//!
//! A structure qualifies when it has at least two rows with the same, non-zero cell count.
//! If nothing qualifies the extraction fails with [`ExtractionError::NoTable`] rather than
//! guessing.

use scraper::{ElementRef, Html, Selector};

use crate::error::ExtractionError;
use crate::types::{dedupe_headers, CanonicalTable, Value};

use super::encoding::decode_text;
use super::{Extraction, Extractor};

/// Minimum number of rows (header included) a structure needs to count as a table.
const MIN_ROWS: usize = 2;

/// Extracts the first consistent `<table>` of an HTML document.
///
/// The first row is the header. Nested tables are considered separately, in document order.
#[derive(Debug, Clone, Copy, Default)]
pub struct HtmlExtractor;

impl Extractor for HtmlExtractor {
    fn name(&self) -> &'static str {
        "html"
    }

    fn extract(&self, content: &[u8]) -> Result<Extraction, ExtractionError> {
        let (text, _) = decode_text(content);
        let doc = Html::parse_document(&text);
        let tables = selector("table")?;
        let trs = selector("tr")?;

        for table in doc.select(&tables) {
            let grid: Vec<Vec<String>> = table
                .select(&trs)
                .filter(|tr| owning_table(tr).is_some_and(|t| t.id() == table.id()))
                .map(|tr| row_cells(&tr))
                .filter(|row| !row.is_empty())
                .collect();

            if let Some(table) = grid_to_table(grid)? {
                return Ok(Extraction::new(table));
            }
        }
        Err(ExtractionError::NoTable)
    }
}

fn selector(css: &'static str) -> Result<Selector, ExtractionError> {
    Selector::parse(css).map_err(|e| ExtractionError::Malformed(format!("selector '{css}': {e}")))
}

fn owning_table<'a>(tr: &ElementRef<'a>) -> Option<ElementRef<'a>> {
    tr.ancestors()
        .filter_map(ElementRef::wrap)
        .find(|el| el.value().name() == "table")
}

/// Direct `th`/`td` children only; nested tables belong to their own rows.
fn row_cells(tr: &ElementRef<'_>) -> Vec<String> {
    tr.children()
        .filter_map(ElementRef::wrap)
        .filter(|c| matches!(c.value().name(), "th" | "td"))
        .map(|c| cell_text(&c))
        .collect()
}

fn cell_text(cell: &ElementRef<'_>) -> String {
    cell.text().flat_map(str::split_whitespace).collect::<Vec<_>>().join(" ")
}

/// `Ok(None)` when the grid is not a consistent table.
fn grid_to_table(grid: Vec<Vec<String>>) -> Result<Option<CanonicalTable>, ExtractionError> {
    let width = match grid.first() {
        Some(header) => header.len(),
        None => return Ok(None),
    };
    if grid.len() < MIN_ROWS || grid.iter().any(|r| r.len() != width) {
        return Ok(None);
    }

    let mut iter = grid.into_iter();
    let columns = dedupe_headers(iter.next().unwrap_or_default());
    let rows = iter
        .map(|r| r.iter().map(|c| Value::text(c)).collect())
        .collect();
    Ok(Some(CanonicalTable::try_new(columns, rows)?))
}

/// Extracts the first repeating record group of an XML document.
///
/// A record group is an element whose element children all share one tag name, with at least
/// two children that each carry the same number of fields. Fields are the record's attributes
/// followed by its child elements, nested ones flattened to dotted names. Columns are the union of field names in first-seen
/// order; a record lacking a field gets null there.
#[derive(Debug, Clone, Copy, Default)]
pub struct XmlExtractor;

impl Extractor for XmlExtractor {
    fn name(&self) -> &'static str {
        "xml"
    }

    fn extract(&self, content: &[u8]) -> Result<Extraction, ExtractionError> {
        let (text, _) = decode_text(content);
        let doc = roxmltree::Document::parse(&text)?;

        for parent in doc.root_element().descendants().filter(|n| n.is_element()) {
            if let Some(records) = record_group(parent) {
                return Ok(Extraction::new(records_to_table(&records)?));
            }
        }
        Err(ExtractionError::NoTable)
    }
}

type Record = Vec<(String, String)>;

fn record_group(parent: roxmltree::Node<'_, '_>) -> Option<Vec<Record>> {
    let children: Vec<_> = parent.children().filter(|n| n.is_element()).collect();
    if children.len() < MIN_ROWS {
        return None;
    }
    let tag = children[0].tag_name().name();
    if children.iter().any(|c| c.tag_name().name() != tag) {
        return None;
    }

    let records: Vec<Record> = children.iter().map(|c| record_fields(*c)).collect();
    let width = records[0].len();
    if width == 0 || records.iter().any(|r| r.len() != width) {
        return None;
    }
    Some(records)
}

fn record_fields(node: roxmltree::Node<'_, '_>) -> Record {
    let mut fields = Vec::new();
    collect_fields(node, "", &mut fields);
    // Repeated tags inside one record become `tag`, `tag_2`, ...
    let names = dedupe_headers(fields.iter().map(|(name, _)| name));
    names.into_iter().zip(fields).map(|(name, (_, value))| (name, value)).collect()
}

/// Attributes, then child elements in document order. Leaves become fields; nested elements
/// are flattened with dotted names (`address.city`).
fn collect_fields(node: roxmltree::Node<'_, '_>, prefix: &str, fields: &mut Record) {
    for attr in node.attributes() {
        fields.push((format!("{prefix}{}", attr.name()), attr.value().to_string()));
    }
    for child in node.children().filter(|n| n.is_element()) {
        let name = format!("{prefix}{}", child.tag_name().name());
        if child.children().any(|n| n.is_element()) {
            collect_fields(child, &format!("{name}."), fields);
        } else {
            fields.push((name, child.text().unwrap_or("").to_string()));
        }
    }
}

fn records_to_table(records: &[Record]) -> Result<CanonicalTable, ExtractionError> {
    let mut names: Vec<&str> = Vec::new();
    for record in records {
        for (name, _) in record {
            if !names.contains(&name.as_str()) {
                names.push(name);
            }
        }
    }

    let rows = records
        .iter()
        .map(|record| {
            names
                .iter()
                .map(|name| {
                    record
                        .iter()
                        .find(|(n, _)| n == name)
                        .map_or(Value::Null, |(_, v)| Value::text(v))
                })
                .collect()
        })
        .collect();

    Ok(CanonicalTable::try_new(dedupe_headers(names), rows)?)
}
