use std::path::Path;

use tracing::debug;

use crate::columns::{ColumnMapping, ResolvedColumns, Semantic};
use crate::efficiency::EfficiencyCurve;
use crate::fit::{coastdown_force, fit_force_curve, ForceFit};
use crate::range::{compute_range, RangeRun};
use crate::selection::RangeSelector;
use crate::table::SampleTable;
use crate::workbook;
use crate::{CdError, CoastdownParams, RangeParams};

pub const SMOOTHED_ACCEL_COLUMN: &str = "Smoothed Acceleration (g)";
pub const FORCE_COLUMN: &str = "Force (N)";

/// Working state of one analysis: the loaded table, its resolved columns, the
/// last range run and the marker selection. Loading a new table clears the rest.
#[derive(Clone, Debug)]
pub struct Session {
    mapping: ColumnMapping,
    table: Option<SampleTable>,
    columns: Option<ResolvedColumns>,
    last_range: Option<RangeRun>,
    last_fit: Option<ForceFit>,
    selector: RangeSelector,
}

impl Session {
    pub fn new(mapping: ColumnMapping) -> Self {
        Self {
            mapping,
            table: None,
            columns: None,
            last_range: None,
            last_fit: None,
            selector: RangeSelector::default(),
        }
    }

    pub fn for_coastdown() -> Self {
        Self::new(ColumnMapping::coastdown_defaults())
    }

    pub fn for_range() -> Self {
        Self::new(ColumnMapping::range_defaults())
    }

    pub fn mapping(&self) -> &ColumnMapping {
        &self.mapping
    }

    /// Resolve the mapping against `table` and make it current. On failure the
    /// previous state is kept.
    pub fn load_table(&mut self, table: SampleTable) -> Result<&ResolvedColumns, CdError> {
        let columns = self.mapping.resolve(table.headers())?;
        debug!(
            rows = table.len(),
            speed = ?columns.speed,
            acceleration = ?columns.acceleration,
            timestamp = ?columns.timestamp,
            "table loaded"
        );
        self.table = Some(table);
        self.last_range = None;
        self.last_fit = None;
        self.selector = RangeSelector::default();
        Ok(self.columns.insert(columns))
    }

    pub fn load_path(&mut self, path: &Path, sheet: &str) -> Result<&ResolvedColumns, CdError> {
        let table = workbook::load_table(path, sheet)?;
        self.load_table(table)
    }

    pub fn table(&self) -> Option<&SampleTable> {
        self.table.as_ref()
    }

    pub fn columns(&self) -> Option<&ResolvedColumns> {
        self.columns.as_ref()
    }

    pub fn last_range(&self) -> Option<&RangeRun> {
        self.last_range.as_ref()
    }

    pub fn last_fit(&self) -> Option<&ForceFit> {
        self.last_fit.as_ref()
    }

    pub fn selector(&self) -> &RangeSelector {
        &self.selector
    }

    pub fn selector_mut(&mut self) -> &mut RangeSelector {
        &mut self.selector
    }

    fn loaded(&self) -> Result<(&SampleTable, &ResolvedColumns), CdError> {
        match (&self.table, &self.columns) {
            (Some(table), Some(columns)) => Ok((table, columns)),
            _ => Err(CdError::InsufficientData("no table loaded".into())),
        }
    }

    /// Append the smoothed acceleration and coastdown force columns.
    pub fn smooth_and_calculate(&mut self, params: &CoastdownParams) -> Result<(), CdError> {
        let (table, columns) = self.loaded()?;
        let accel_col = columns.require(Semantic::Acceleration, table.headers())?;
        let accel = table.numeric_column(accel_col)?;
        let (smoothed, force) =
            coastdown_force(&accel, params.smoothing_window, params.total_mass_kg())?;

        let mut updated = table.clone();
        updated.set_column(SMOOTHED_ACCEL_COLUMN, &smoothed)?;
        updated.set_column(FORCE_COLUMN, &force)?;
        debug!(
            window = params.smoothing_window,
            mass_kg = params.total_mass_kg(),
            "force columns computed"
        );
        self.table = Some(updated);
        self.last_fit = None;
        Ok(())
    }

    pub fn has_force(&self) -> bool {
        self.table
            .as_ref()
            .is_some_and(|t| t.column(FORCE_COLUMN).is_some())
    }

    /// Speed trace (km/h) of the current table, one value per row.
    pub fn speed_series(&self) -> Result<Vec<f64>, CdError> {
        let (table, columns) = self.loaded()?;
        let speed_col = columns.require(Semantic::Speed, table.headers())?;
        table.numeric_column(speed_col)
    }

    /// Speeds under the two markers, in index order.
    pub fn marker_readout(&self) -> Result<(f64, f64), CdError> {
        self.selector.readout(&self.speed_series()?)
    }

    pub fn readout_text(&self) -> Result<String, CdError> {
        let (s1, s2) = self.marker_readout()?;
        Ok(format!("Speed 1: {s1:.2} km/h\nSpeed 2: {s2:.2} km/h"))
    }

    /// Fit `F = C·v² + A` over the rows between the markers. Needs the force
    /// column from [`Session::smooth_and_calculate`].
    pub fn fit_selection(&mut self) -> Result<ForceFit, CdError> {
        if !self.has_force() {
            return Err(CdError::InsufficientData(
                "smooth and calculate force first".into(),
            ));
        }
        let speed = self.speed_series()?;
        let (table, _) = self.loaded()?;
        let force = table.numeric_column(FORCE_COLUMN)?;
        let (i1, i2) = self.selector.bounds(speed.len())?;
        let fit = fit_force_curve(&speed, &force, i1, i2)?;
        debug!(start = fit.start, end = fit.end, a = fit.a, c = fit.c, "force curve fitted");
        self.last_fit = Some(fit);
        Ok(fit)
    }

    pub fn run_range(
        &mut self,
        efficiency: &EfficiencyCurve,
        params: &RangeParams,
    ) -> Result<&RangeRun, CdError> {
        let (table, columns) = self.loaded()?;
        let run = compute_range(table, columns, efficiency, params)?;
        debug!(
            rows = run.table.len(),
            energy_wh = run.summary.energy_wh,
            range_km = run.summary.range_km,
            "range computed"
        );
        Ok(self.last_range.insert(run))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    fn coastdown_log() -> SampleTable {
        let mut csv = String::from("Time,Speed (km/h),Longitudinal acceleration (g)\n");
        for i in 0..300 {
            let v = 60.0 - i as f64 * 0.15;
            let accel_g = -(0.0004 * v * v + 0.02) / (170.0 * 9.81);
            csv.push_str(&format!("{},{},{}\n", i as f64 * 0.1, v, accel_g));
        }
        SampleTable::read_csv(csv.as_bytes()).unwrap()
    }

    #[test]
    fn operations_require_a_table() {
        let mut session = Session::for_coastdown();
        assert!(matches!(
            session.smooth_and_calculate(&CoastdownParams::default()),
            Err(CdError::InsufficientData(_))
        ));
        assert!(session.marker_readout().is_err());
    }

    #[test]
    fn fit_needs_force_columns() {
        let mut session = Session::for_coastdown();
        session.load_table(coastdown_log()).unwrap();
        assert!(!session.has_force());
        assert!(matches!(
            session.fit_selection(),
            Err(CdError::InsufficientData(_))
        ));
    }

    #[test]
    fn smooth_then_fit_recovers_drag_terms() {
        let mut session = Session::for_coastdown();
        let columns = session.load_table(coastdown_log()).unwrap().clone();
        assert_eq!(columns.speed.as_deref(), Some("Speed (km/h)"));
        assert_eq!(columns.timestamp.as_deref(), Some("Time"));

        let params = CoastdownParams {
            smoothing_window: 1,
            ..CoastdownParams::default()
        };
        session.smooth_and_calculate(&params).unwrap();
        assert!(session.has_force());
        let fit = session.fit_selection().unwrap();
        // force = 170 * 9.81 * accel_g = -(0.0004 v² + 0.02)
        assert_abs_diff_eq!(fit.c, -0.0004, epsilon = 1e-9);
        assert_abs_diff_eq!(fit.a, -0.02, epsilon = 1e-7);
        assert_eq!((fit.start, fit.end), (100, 200));
        assert_eq!(session.last_fit(), Some(&fit));
    }

    #[test]
    fn readout_follows_dragged_markers() {
        let mut session = Session::for_coastdown();
        session.load_table(coastdown_log()).unwrap();
        let sel = session.selector_mut();
        sel.pointer_down(Some(190.0));
        sel.pointer_move(Some(20.0));
        sel.pointer_up();
        let (s1, s2) = session.marker_readout().unwrap();
        assert_abs_diff_eq!(s1, 60.0 - 20.0 * 0.15, epsilon = 1e-9);
        assert_abs_diff_eq!(s2, 60.0 - 100.0 * 0.15, epsilon = 1e-9);
        assert_eq!(
            session.readout_text().unwrap(),
            "Speed 1: 57.00 km/h\nSpeed 2: 45.00 km/h"
        );
    }

    #[test]
    fn new_load_clears_previous_results() {
        let mut session = Session::for_coastdown();
        session.load_table(coastdown_log()).unwrap();
        session
            .smooth_and_calculate(&CoastdownParams::default())
            .unwrap();
        session.fit_selection().unwrap();
        session.selector_mut().pointer_down(Some(0.0));
        session.load_table(coastdown_log()).unwrap();
        assert!(session.last_fit().is_none());
        assert!(!session.has_force());
        assert_eq!(session.selector(), &RangeSelector::default());
    }

    #[test]
    fn failed_load_keeps_current_table() {
        let mut session = Session::for_coastdown();
        session.load_table(coastdown_log()).unwrap();
        let bad = SampleTable::read_csv("foo,bar\n1,2\n".as_bytes()).unwrap();
        assert!(matches!(
            session.load_table(bad),
            Err(CdError::MissingColumns { .. })
        ));
        assert_eq!(session.table().map(SampleTable::len), Some(300));
    }

    #[test]
    fn range_run_is_kept() {
        let mut session = Session::for_range();
        let table =
            SampleTable::read_csv("timestamps,Speed_dyno\n0,36\n1,36\n2,36\n".as_bytes()).unwrap();
        session.load_table(table).unwrap();
        let eff = EfficiencyCurve::new(vec![(0.0, 0.9), (50.0, 0.9)]).unwrap();
        let summary = session.run_range(&eff, &RangeParams::default()).unwrap().summary;
        assert_abs_diff_eq!(summary.distance_m, 20.0, epsilon = 1e-9);
        assert!(session.last_range().is_some());
    }
}
