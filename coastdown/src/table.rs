use std::collections::HashSet;
use std::fs::File;
use std::io::{Read, Write};
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::CdError;

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum Value {
    Number(f64),
    Text(String),
    Empty,
}

impl Value {
    /// Interpret a raw text cell: blank is empty, anything `f64` accepts is a number.
    pub fn parse(raw: &str) -> Value {
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            return Value::Empty;
        }
        match trimmed.parse::<f64>() {
            Ok(v) => Value::Number(v),
            Err(_) => Value::Text(trimmed.to_string()),
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Number(v) => Some(*v),
            _ => None,
        }
    }

    pub fn is_missing(&self) -> bool {
        match self {
            Value::Number(v) => v.is_nan(),
            Value::Empty => true,
            Value::Text(_) => false,
        }
    }
}

/// Column-major table of loaded samples. Headers are trimmed and unique.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct SampleTable {
    headers: Vec<String>,
    columns: Vec<Vec<Value>>,
}

impl SampleTable {
    /// Build from header names and row-major cells. Short rows are padded with
    /// empties, long rows truncated to the header width.
    pub fn from_rows(headers: Vec<String>, rows: Vec<Vec<Value>>) -> Self {
        let headers = normalize_headers(headers);
        let mut columns: Vec<Vec<Value>> = vec![Vec::with_capacity(rows.len()); headers.len()];
        for row in rows {
            let mut cells = row.into_iter();
            for column in columns.iter_mut() {
                column.push(cells.next().unwrap_or(Value::Empty));
            }
        }
        Self { headers, columns }
    }

    pub fn read_csv<R: Read>(reader: R) -> Result<Self, CdError> {
        let mut rdr = csv::ReaderBuilder::new()
            .has_headers(true)
            .flexible(true)
            .trim(csv::Trim::Headers)
            .from_reader(reader);
        let headers: Vec<String> = rdr.headers()?.iter().map(str::to_string).collect();
        let mut rows = Vec::new();
        for record in rdr.records() {
            let record = record?;
            if record.iter().all(|f| f.trim().is_empty()) {
                continue;
            }
            rows.push(record.iter().map(Value::parse).collect());
        }
        Ok(Self::from_rows(headers, rows))
    }

    pub fn from_csv_path(path: &Path) -> Result<Self, CdError> {
        let file = File::open(path)
            .map_err(|e| CdError::Csv(format!("failed to open {}: {}", path.display(), e)))?;
        Self::read_csv(file)
    }

    pub fn headers(&self) -> &[String] {
        &self.headers
    }

    pub fn len(&self) -> usize {
        self.columns.first().map_or(0, Vec::len)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.headers.iter().position(|h| h == name)
    }

    pub fn column(&self, name: &str) -> Option<&[Value]> {
        self.column_index(name).map(|i| self.columns[i].as_slice())
    }

    fn require_column(&self, name: &str) -> Result<&[Value], CdError> {
        self.column(name).ok_or_else(|| CdError::MissingColumns {
            wanted: vec![name.to_string()],
            available: self.headers.clone(),
        })
    }

    /// Numeric view of a column; empties become NaN, text is an error.
    pub fn numeric_column(&self, name: &str) -> Result<Vec<f64>, CdError> {
        let column = self.require_column(name)?;
        column
            .iter()
            .enumerate()
            .map(|(row, value)| match value {
                Value::Number(v) => Ok(*v),
                Value::Empty => Ok(f64::NAN),
                Value::Text(text) => Err(CdError::NonNumeric {
                    column: name.to_string(),
                    row,
                    text: text.clone(),
                }),
            })
            .collect()
    }

    /// Numeric view for display purposes; anything non-numeric becomes NaN.
    pub fn lossy_column(&self, name: &str) -> Result<Vec<f64>, CdError> {
        let column = self.require_column(name)?;
        Ok(column
            .iter()
            .map(|v| v.as_f64().unwrap_or(f64::NAN))
            .collect())
    }

    /// Copy of the table without rows that miss a value in any of `required`.
    /// A text cell in a required column is rejected rather than dropped.
    pub fn drop_incomplete(&self, required: &[&str]) -> Result<SampleTable, CdError> {
        let mut indices = Vec::with_capacity(required.len());
        for name in required {
            self.numeric_column(name)?;
            if let Some(idx) = self.column_index(name) {
                indices.push(idx);
            }
        }
        let keep: Vec<usize> = (0..self.len())
            .filter(|&row| indices.iter().all(|&c| !self.columns[c][row].is_missing()))
            .collect();
        let columns = self
            .columns
            .iter()
            .map(|column| keep.iter().map(|&row| column[row].clone()).collect())
            .collect();
        Ok(SampleTable {
            headers: self.headers.clone(),
            columns,
        })
    }

    /// Insert or overwrite a numeric column; its length must match the table.
    pub fn set_column(&mut self, name: &str, values: &[f64]) -> Result<(), CdError> {
        if !self.headers.is_empty() && values.len() != self.len() {
            return Err(CdError::InvalidParameter(format!(
                "column '{}' has {} values for {} rows",
                name,
                values.len(),
                self.len()
            )));
        }
        let column: Vec<Value> = values.iter().map(|&v| Value::Number(v)).collect();
        match self.column_index(name) {
            Some(idx) => self.columns[idx] = column,
            None => {
                self.headers.push(name.to_string());
                self.columns.push(column);
            }
        }
        Ok(())
    }

    pub fn row(&self, index: usize) -> impl Iterator<Item = &Value> + '_ {
        self.columns.iter().map(move |column| &column[index])
    }

    pub fn write_csv<W: Write>(&self, writer: W) -> Result<(), CdError> {
        let mut wtr = csv::Writer::from_writer(writer);
        wtr.write_record(&self.headers)?;
        for row in 0..self.len() {
            wtr.write_record(self.row(row).map(|value| match value {
                Value::Number(v) if v.is_nan() => String::new(),
                Value::Number(v) => v.to_string(),
                Value::Text(text) => text.clone(),
                Value::Empty => String::new(),
            }))?;
        }
        wtr.flush()
            .map_err(|e| CdError::Csv(format!("failed to flush CSV: {e}")))?;
        Ok(())
    }
}

fn normalize_headers(headers: Vec<String>) -> Vec<String> {
    let mut seen = HashSet::new();
    headers
        .into_iter()
        .enumerate()
        .map(|(idx, raw)| {
            let trimmed = raw.trim();
            let base = if trimmed.is_empty() {
                format!("Unnamed: {idx}")
            } else {
                trimmed.to_string()
            };
            let mut name = base.clone();
            let mut suffix = 1;
            while !seen.insert(name.clone()) {
                name = format!("{base}.{suffix}");
                suffix += 1;
            }
            name
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    const LOG: &str = " Time , Speed (km/h),Longitudinal acceleration (g),note\n\
                       0.0,20.0,-0.01,start\n\
                       1.0,,-0.02,\n\
                       2.0,19.5,-0.02,\n";

    #[test]
    fn csv_headers_are_trimmed_and_cells_typed() {
        let table = SampleTable::read_csv(LOG.as_bytes()).unwrap();
        assert_eq!(
            table.headers(),
            &["Time", "Speed (km/h)", "Longitudinal acceleration (g)", "note"]
        );
        assert_eq!(table.len(), 3);
        assert_eq!(table.column("note").unwrap()[0], Value::Text("start".into()));
        assert_eq!(table.column("Speed (km/h)").unwrap()[1], Value::Empty);
    }

    #[test]
    fn incomplete_rows_are_dropped() {
        let table = SampleTable::read_csv(LOG.as_bytes()).unwrap();
        let clean = table.drop_incomplete(&["Time", "Speed (km/h)"]).unwrap();
        assert_eq!(clean.len(), 2);
        assert_eq!(clean.numeric_column("Time").unwrap(), vec![0.0, 2.0]);
        assert_eq!(clean.column("note").unwrap()[0], Value::Text("start".into()));
    }

    #[test]
    fn text_in_required_column_is_rejected() {
        let table = SampleTable::read_csv("t,v\n0,1\n1,fast\n".as_bytes()).unwrap();
        match table.drop_incomplete(&["t", "v"]).unwrap_err() {
            CdError::NonNumeric { column, row, text } => {
                assert_eq!(column, "v");
                assert_eq!(row, 1);
                assert_eq!(text, "fast");
            }
            other => panic!("unexpected error {other:?}"),
        }
    }

    #[test]
    fn duplicate_and_blank_headers_get_unique_names() {
        let table = SampleTable::from_rows(
            vec!["x".into(), "x".into(), " ".into()],
            vec![vec![Value::Number(1.0)]],
        );
        assert_eq!(table.headers(), &["x", "x.1", "Unnamed: 2"]);
        assert_eq!(table.column("x.1").unwrap()[0], Value::Empty);
    }

    #[test]
    fn set_column_overwrites_and_checks_length() {
        let mut table = SampleTable::read_csv("t,v\n0,1\n1,2\n".as_bytes()).unwrap();
        table.set_column("F", &[3.0, 4.0]).unwrap();
        table.set_column("F", &[5.0, 6.0]).unwrap();
        assert_eq!(table.headers().len(), 3);
        assert_eq!(table.numeric_column("F").unwrap(), vec![5.0, 6.0]);
        assert!(table.set_column("G", &[1.0]).is_err());
    }

    #[test]
    fn csv_export_reads_back() {
        let mut table = SampleTable::read_csv("t,label\n0,a\n1,\n".as_bytes()).unwrap();
        table.set_column("F", &[1.5, f64::NAN]).unwrap();
        let mut out = Vec::new();
        table.write_csv(&mut out).unwrap();
        let back = SampleTable::read_csv(out.as_slice()).unwrap();
        assert_eq!(back.headers(), table.headers());
        assert_eq!(back.column("F").unwrap()[0], Value::Number(1.5));
        assert_eq!(back.column("F").unwrap()[1], Value::Empty);
    }
}
