//! Workbook extraction (`.xlsx`, `.xls`, `.ods`, ...) via `calamine`.

use std::collections::HashMap;
use std::io::Cursor;

use calamine::{open_workbook_auto_from_rs, Data, Range, Reader};
use chrono::NaiveDate;
use tracing::{debug, warn};

use crate::error::ExtractionError;
use crate::types::{dedupe_headers, CanonicalTable, Value};

use super::{Extraction, Extractor, SheetSelection};

/// Extracts a single sheet of a workbook.
///
/// Behavior:
/// - picks the sheet named/indexed by the [`SheetSelection`], the first sheet by default
/// - detects the first non-empty row as the header row
/// - trims empty trailing rows and columns
/// - keeps native cell types (numbers, booleans, dates)
/// - error cells and formula cells the workbook holds no cached result for become null and
///   are reported as warnings
#[derive(Debug, Clone, Default)]
pub struct SpreadsheetExtractor {
    sheet: SheetSelection,
}

impl SpreadsheetExtractor {
    pub fn new(sheet: SheetSelection) -> Self {
        Self { sheet }
    }
}

impl Extractor for SpreadsheetExtractor {
    fn name(&self) -> &'static str {
        "spreadsheet"
    }

    fn extract(&self, content: &[u8]) -> Result<Extraction, ExtractionError> {
        let mut workbook = open_workbook_auto_from_rs(Cursor::new(content.to_vec()))?;

        let names = workbook.sheet_names().to_vec();
        let sheet = match &self.sheet {
            SheetSelection::First => names.first().cloned(),
            SheetSelection::Name(name) => names.iter().find(|n| *n == name).cloned(),
            SheetSelection::Index(idx) => names.get(*idx).cloned(),
        }
        .ok_or_else(|| ExtractionError::SheetNotFound(format!("{:?}", self.sheet)))?;

        debug!(sheet = %sheet, sheets = names.len(), "spreadsheet extraction");
        let range = workbook.worksheet_range(&sheet)?;
        // Not every format exposes formulas; values alone are still a table.
        let formulas = workbook.worksheet_formula(&sheet).ok();
        range_to_extraction(&sheet, &range, formulas.as_ref())
    }
}

fn range_to_extraction(
    sheet: &str,
    range: &Range<Data>,
    formulas: Option<&Range<String>>,
) -> Result<Extraction, ExtractionError> {
    let grid: Vec<&[Data]> = range.rows().collect();
    let origin = range.start().unwrap_or((0, 0));
    let formulas = formula_cells(formulas, origin);
    let cell = |r: usize, c: usize| grid.get(r).and_then(|row| row.get(c)).unwrap_or(&Data::Empty);
    let occupied = |r: usize, c: usize| !is_blank(cell(r, c)) || formulas.contains_key(&(r, c));

    let height = formulas.keys().map(|&(r, _)| r + 1).fold(grid.len(), usize::max);
    let row_width = |r: usize| {
        let values = grid.get(r).map_or(0, |row| row.len());
        let extra = formulas.keys().filter(|&&(fr, _)| fr == r).map(|&(_, c)| c + 1).max().unwrap_or(0);
        (0..values.max(extra)).rev().find(|&c| occupied(r, c)).map(|c| c + 1)
    };

    let header_idx = (0..height).find(|&r| row_width(r).is_some()).ok_or(ExtractionError::NoHeader)?;

    // Trailing columns and rows that are empty everywhere are not part of the table.
    let width = (header_idx..height).filter_map(&row_width).max().unwrap_or(0);
    let last_row = (header_idx..height).rev().find(|&r| row_width(r).is_some()).unwrap_or(header_idx);

    let columns = dedupe_headers((0..width).map(|c| header_text(cell(header_idx, c))));

    let mut warnings = Vec::new();
    let mut rows = Vec::with_capacity(last_row - header_idx);
    for r in header_idx + 1..=last_row {
        // 1-based, Excel-like row number.
        let user_row = origin.0 as usize + r + 1;
        let mut out = Vec::with_capacity(width);
        for (c, column) in columns.iter().enumerate() {
            let value = match (cell(r, c), formulas.get(&(r, c))) {
                (Data::Empty, Some(formula)) => Err(format!("formula ={formula} has no cached value")),
                (data, _) => convert_cell(data),
            };
            match value {
                Ok(v) => out.push(v),
                Err(unresolved) => {
                    warnings.push(format!(
                        "sheet '{sheet}' row {user_row} column '{column}': unresolved cell {unresolved}; using null"
                    ));
                    out.push(Value::Null);
                }
            }
        }
        rows.push(out);
    }

    if !warnings.is_empty() {
        warn!(sheet = %sheet, count = warnings.len(), "unresolved spreadsheet cells surfaced as null");
    }

    Ok(Extraction {
        table: CanonicalTable::try_new(columns, rows)?,
        warnings,
    })
}

/// Non-empty formulas keyed by position relative to the value grid's origin.
fn formula_cells(formulas: Option<&Range<String>>, origin: (u32, u32)) -> HashMap<(usize, usize), &str> {
    let Some(range) = formulas else {
        return HashMap::new();
    };
    let Some((row0, col0)) = range.start() else {
        return HashMap::new();
    };
    range
        .used_cells()
        .filter(|(_, _, text)| !text.trim().is_empty())
        .filter_map(|(r, c, text)| {
            let row = (row0 as usize + r).checked_sub(origin.0 as usize)?;
            let col = (col0 as usize + c).checked_sub(origin.1 as usize)?;
            Some(((row, col), text.as_str()))
        })
        .collect()
}

fn is_blank(c: &Data) -> bool {
    match c {
        Data::Empty => true,
        Data::String(s) => s.trim().is_empty(),
        _ => false,
    }
}

fn header_text(c: &Data) -> String {
    match c {
        Data::String(s) => s.trim().to_string(),
        Data::Float(f) if f.fract() == 0.0 => (*f as i64).to_string(),
        Data::Empty => String::new(),
        other => other.to_string(),
    }
}

/// Convert one cell; `Err` carries a description of a cell that has no usable value.
fn convert_cell(c: &Data) -> Result<Value, String> {
    match c {
        Data::Empty => Ok(Value::Null),
        Data::String(s) => Ok(Value::text(s)),
        Data::Int(i) => Ok(Value::Int64(*i)),
        Data::Float(f) => Ok(Value::Float64(*f)),
        Data::Bool(b) => Ok(Value::Bool(*b)),
        Data::DateTime(dt) => dt
            .as_datetime()
            .map(|d| Value::Date(d.date()))
            .ok_or_else(|| format!("invalid date serial {dt:?}")),
        Data::DateTimeIso(s) => Ok(s
            .get(..10)
            .and_then(|d| NaiveDate::parse_from_str(d, "%Y-%m-%d").ok())
            .map(Value::Date)
            .unwrap_or_else(|| Value::text(s))),
        Data::DurationIso(s) => Ok(Value::text(s)),
        Data::Error(e) => Err(format!("{e:?}")),
    }
}
