use std::path::PathBuf;

use approx::assert_relative_eq;
use coastdown::range::DerivedSeries;
use coastdown::table::Value;
use coastdown::workbook::{self, PARAMETERS_SHEET, PROCESSED_SHEET, SUMMARY_SHEET};
use coastdown::{compute_range, ColumnMapping, EfficiencyCurve, RangeParams, SampleTable};

fn temp_path(name: &str) -> PathBuf {
    std::env::temp_dir().join(format!("coastdown-{}-{}", std::process::id(), name))
}

fn sample_run() -> (coastdown::RangeRun, RangeParams) {
    let mut csv = String::from("timestamps,Speed_dyno,note\n");
    for i in 0..120 {
        let t = i as f64 * 0.5;
        let v = 25.0 + 10.0 * (t / 7.0).sin();
        let note = if i % 40 == 0 { "lap" } else { "" };
        csv.push_str(&format!("{t},{v},{note}\n"));
    }
    let table = SampleTable::read_csv(csv.as_bytes()).unwrap();
    let columns = ColumnMapping::range_defaults()
        .resolve(table.headers())
        .unwrap();
    let efficiency = EfficiencyCurve::new(vec![(0.0, 0.7), (20.0, 0.82), (40.0, 0.88)]).unwrap();
    let params = RangeParams::default();
    let run = compute_range(&table, &columns, &efficiency, &params).unwrap();
    (run, params)
}

#[test]
fn processed_sheet_reproduces_derived_columns() {
    let (run, params) = sample_run();
    let path = temp_path("report.xlsx");
    workbook::write_report(&path, &run, &params, None).unwrap();

    let names = workbook::sheet_names(&path).unwrap();
    assert_eq!(names, vec![PROCESSED_SHEET, SUMMARY_SHEET, PARAMETERS_SHEET]);

    let back = workbook::read_sheet(&path, PROCESSED_SHEET).unwrap();
    assert_eq!(back.headers(), run.table.headers());
    assert_eq!(back.len(), run.table.len());
    for (name, values) in run.derived.columns() {
        let reread = back.numeric_column(name).unwrap();
        for (a, b) in reread.iter().zip(values) {
            assert_relative_eq!(*a, *b, max_relative = 1e-12);
        }
    }
    assert_eq!(back.column("note").unwrap()[0], Value::Text("lap".into()));
    assert_eq!(back.column("note").unwrap()[1], Value::Empty);

    let _ = std::fs::remove_file(path);
}

#[test]
fn summary_and_parameter_sheets() {
    let (run, params) = sample_run();
    let path = temp_path("summary.xlsx");
    workbook::write_report(&path, &run, &params, None).unwrap();

    let summary = workbook::read_sheet(&path, SUMMARY_SHEET).unwrap();
    assert_eq!(summary.headers(), &["Metric", "Value"]);
    assert_eq!(summary.len(), 4);
    let labels: Vec<Value> = summary.column("Metric").unwrap().to_vec();
    assert_eq!(
        labels[3],
        Value::Text("Estimated Range (km)".into()),
    );
    let values = summary.numeric_column("Value").unwrap();
    assert_relative_eq!(values[0], run.summary.energy_wh, max_relative = 1e-12);
    assert_relative_eq!(values[3], run.summary.range_km, max_relative = 1e-12);

    let parameters = workbook::read_sheet(&path, PARAMETERS_SHEET).unwrap();
    let keys = parameters.column("Parameter").unwrap();
    let vals = parameters.column("Value").unwrap();
    let lookup = |key: &str| {
        keys.iter()
            .position(|k| *k == Value::Text(key.into()))
            .map(|i| vals[i].clone())
    };
    assert_eq!(lookup("battery_capacity_wh"), Some(Value::Number(3965.0)));
    assert_eq!(lookup("road_load.a"), Some(Value::Number(36.078)));
    assert_eq!(
        lookup("fingerprint"),
        Some(Value::Text(params.fingerprint().unwrap()))
    );

    let _ = std::fs::remove_file(path);
}

#[test]
fn derived_series_length_matches_table() {
    let (run, _) = sample_run();
    let derived: &DerivedSeries = &run.derived;
    assert_eq!(derived.len(), run.table.len());
    assert!(!derived.is_empty());
}

#[test]
fn unsupported_extension_is_rejected() {
    let err = workbook::load_table(&temp_path("data.json"), "Sheet1").unwrap_err();
    assert!(err.to_string().contains("unsupported file format"));
}
