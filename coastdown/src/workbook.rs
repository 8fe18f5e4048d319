//! Spreadsheet and CSV I/O: loading sample sheets and writing range reports.

use std::fs::File;
use std::io::BufWriter;
use std::path::Path;

use calamine::{open_workbook_auto, Data, Reader};
use rust_xlsxwriter::{Format, Image, Workbook, Worksheet, XlsxError};
use serde::Serialize;

use crate::range::RangeRun;
use crate::table::{SampleTable, Value};
use crate::{CdError, RangeParams};

pub const PROCESSED_SHEET: &str = "Processed Data";
pub const SUMMARY_SHEET: &str = "Summary";
pub const PARAMETERS_SHEET: &str = "Parameters";
pub const DEFAULT_SAMPLE_SHEET: &str = "Sheet1";
pub const DEFAULT_EFFICIENCY_SHEET: &str = "Sheet3";

/// Summary plot anchor: cell D6.
const IMAGE_ANCHOR: (u32, u16) = (5, 3);

const SPREADSHEET_EXTENSIONS: [&str; 5] = ["xlsx", "xlsm", "xlsb", "xls", "ods"];

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum InputKind {
    Csv,
    Spreadsheet,
}

pub fn input_kind(path: &Path) -> Result<InputKind, CdError> {
    let ext = path
        .extension()
        .and_then(|e| e.to_str())
        .map(str::to_ascii_lowercase)
        .unwrap_or_default();
    if ext == "csv" {
        Ok(InputKind::Csv)
    } else if SPREADSHEET_EXTENSIONS.contains(&ext.as_str()) {
        Ok(InputKind::Spreadsheet)
    } else {
        Err(CdError::UnsupportedFormat(path.display().to_string()))
    }
}

/// Load a sample table. CSV files ignore `sheet`.
pub fn load_table(path: &Path, sheet: &str) -> Result<SampleTable, CdError> {
    match input_kind(path)? {
        InputKind::Csv => SampleTable::from_csv_path(path),
        InputKind::Spreadsheet => read_sheet(path, sheet),
    }
}

pub fn sheet_names(path: &Path) -> Result<Vec<String>, CdError> {
    let workbook = open_workbook_auto(path).map_err(|e| workbook_error(path, e))?;
    Ok(workbook.sheet_names())
}

/// Read one named sheet; the first row holds the headers.
pub fn read_sheet(path: &Path, sheet: &str) -> Result<SampleTable, CdError> {
    let mut workbook = open_workbook_auto(path).map_err(|e| workbook_error(path, e))?;
    let range = workbook
        .worksheet_range(sheet)
        .map_err(|e| CdError::Workbook(format!("{}: sheet '{}': {}", path.display(), sheet, e)))?;
    let mut rows = range.rows();
    let Some(header_row) = rows.next() else {
        return Ok(SampleTable::default());
    };
    let headers = header_row.iter().map(header_text).collect();
    let body = rows
        .filter(|row| !row.iter().all(|cell| matches!(cell, Data::Empty)))
        .map(|row| row.iter().map(cell_value).collect())
        .collect();
    Ok(SampleTable::from_rows(headers, body))
}

fn workbook_error(path: &Path, err: impl std::fmt::Display) -> CdError {
    CdError::Workbook(format!("{}: {}", path.display(), err))
}

fn header_text(cell: &Data) -> String {
    match cell {
        Data::String(s) => s.clone(),
        Data::Empty => String::new(),
        other => other.to_string(),
    }
}

fn cell_value(cell: &Data) -> Value {
    match cell {
        Data::Int(v) => Value::Number(*v as f64),
        Data::Float(v) => Value::Number(*v),
        Data::Bool(b) => Value::Number(if *b { 1.0 } else { 0.0 }),
        Data::String(s) => Value::parse(s),
        Data::DateTime(dt) => Value::Number(dt.as_f64()),
        Data::DateTimeIso(s) | Data::DurationIso(s) => Value::Text(s.clone()),
        Data::Error(_) | Data::Empty => Value::Empty,
    }
}

/// Write the range report: processed rows, summary metrics with the optional
/// speed-force image, and the parameter set with its fingerprint.
pub fn write_report(
    path: &Path,
    run: &RangeRun,
    params: &RangeParams,
    image: Option<&Path>,
) -> Result<(), CdError> {
    let mut workbook = Workbook::new();

    let sheet = workbook.add_worksheet();
    sheet.set_name(PROCESSED_SHEET).map_err(xlsx_error)?;
    write_table(sheet, &run.table)?;

    let sheet = workbook.add_worksheet();
    sheet.set_name(SUMMARY_SHEET).map_err(xlsx_error)?;
    let bold = Format::new().set_bold();
    sheet
        .write_string_with_format(0, 0, "Metric", &bold)
        .map_err(xlsx_error)?;
    sheet
        .write_string_with_format(0, 1, "Value", &bold)
        .map_err(xlsx_error)?;
    for (i, (label, value)) in run.summary.metrics().into_iter().enumerate() {
        let row = i as u32 + 1;
        sheet.write_string(row, 0, label).map_err(xlsx_error)?;
        sheet.write_number(row, 1, value).map_err(xlsx_error)?;
    }
    if let Some(image) = image {
        let image = Image::new(image).map_err(xlsx_error)?;
        sheet
            .insert_image(IMAGE_ANCHOR.0, IMAGE_ANCHOR.1, &image)
            .map_err(xlsx_error)?;
    }

    let sheet = workbook.add_worksheet();
    sheet.set_name(PARAMETERS_SHEET).map_err(xlsx_error)?;
    write_parameters(sheet, params, &params.fingerprint()?)?;

    workbook.save(path).map_err(|e| workbook_error(path, e))
}

fn xlsx_error(err: XlsxError) -> CdError {
    CdError::Workbook(err.to_string())
}

fn write_table(sheet: &mut Worksheet, table: &SampleTable) -> Result<(), CdError> {
    for (col, name) in table.headers().iter().enumerate() {
        sheet
            .write_string(0, col as u16, name.as_str())
            .map_err(xlsx_error)?;
    }
    for row in 0..table.len() {
        let xl_row = row as u32 + 1;
        for (col, value) in table.row(row).enumerate() {
            let col = col as u16;
            match value {
                Value::Number(v) if v.is_finite() => {
                    sheet.write_number(xl_row, col, *v).map_err(xlsx_error)?;
                }
                Value::Text(text) => {
                    sheet
                        .write_string(xl_row, col, text.as_str())
                        .map_err(xlsx_error)?;
                }
                // Excel has no NaN or infinity; those cells stay blank.
                Value::Number(_) | Value::Empty => {}
            }
        }
    }
    Ok(())
}

/// Parameter rows as dotted keys (`road_load.a`) from the serialized form.
pub fn parameter_rows(params: &impl Serialize) -> Result<Vec<(String, serde_json::Value)>, CdError> {
    let json = serde_json::to_value(params)
        .map_err(|e| CdError::InvalidParameter(format!("unserializable params: {e}")))?;
    let mut rows = Vec::new();
    flatten("", &json, &mut rows);
    Ok(rows)
}

fn flatten(prefix: &str, value: &serde_json::Value, out: &mut Vec<(String, serde_json::Value)>) {
    match value {
        serde_json::Value::Object(map) => {
            for (key, child) in map {
                let name = if prefix.is_empty() {
                    key.clone()
                } else {
                    format!("{prefix}.{key}")
                };
                flatten(&name, child, out);
            }
        }
        other => out.push((prefix.to_string(), other.clone())),
    }
}

fn write_parameters(
    sheet: &mut Worksheet,
    params: &RangeParams,
    fingerprint: &str,
) -> Result<(), CdError> {
    sheet.write_string(0, 0, "Parameter").map_err(xlsx_error)?;
    sheet.write_string(0, 1, "Value").map_err(xlsx_error)?;
    let rows = parameter_rows(params)?;
    for (i, (name, value)) in rows.iter().enumerate() {
        let row = i as u32 + 1;
        sheet.write_string(row, 0, name.as_str()).map_err(xlsx_error)?;
        match value {
            serde_json::Value::Number(n) => {
                let v = n.as_f64().unwrap_or(f64::NAN);
                sheet.write_number(row, 1, v).map_err(xlsx_error)?;
            }
            serde_json::Value::String(s) => {
                sheet.write_string(row, 1, s.as_str()).map_err(xlsx_error)?;
            }
            other => {
                sheet
                    .write_string(row, 1, other.to_string())
                    .map_err(xlsx_error)?;
            }
        }
    }
    let row = rows.len() as u32 + 1;
    sheet.write_string(row, 0, "fingerprint").map_err(xlsx_error)?;
    sheet.write_string(row, 1, fingerprint).map_err(xlsx_error)?;
    Ok(())
}

pub fn export_csv(path: &Path, table: &SampleTable) -> Result<(), CdError> {
    let file = File::create(path)
        .map_err(|e| CdError::Csv(format!("failed to create {}: {}", path.display(), e)))?;
    table.write_csv(BufWriter::new(file))
}
