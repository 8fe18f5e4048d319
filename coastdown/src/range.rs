//! Energy/range run: kinematics, road load, efficiency correction and
//! integration over one cleaned sample table.

use serde::{Deserialize, Serialize};

use crate::columns::{ResolvedColumns, Semantic};
use crate::efficiency::EfficiencyCurve;
use crate::energy::RangeSummary;
use crate::kinematics::{centered_rolling_mean, kmh_to_mps, lagged_derivative};
use crate::road_load::power;
use crate::table::SampleTable;
use crate::{AccelSource, CdError, RangeParams, GRAVITY_MPS2};

pub const SPEED_MPS_COLUMN: &str = "Speed (m/s)";
pub const ACCEL_COLUMN: &str = "dv/dt (m/s²)";
pub const FORCE_COLUMN: &str = "F (N)";
pub const POWER_COLUMN: &str = "P (W)";
pub const EFFICIENCY_COLUMN: &str = "Efficiency";
pub const CORRECTED_POWER_COLUMN: &str = "P_corrected (W)";

/// Per-row derived values, index-aligned with the cleaned table.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct DerivedSeries {
    pub speed_mps: Vec<f64>,
    pub accel_mps2: Vec<f64>,
    pub force_n: Vec<f64>,
    pub power_w: Vec<f64>,
    pub efficiency: Vec<f64>,
    pub corrected_power_w: Vec<f64>,
}

impl DerivedSeries {
    pub fn columns(&self) -> [(&'static str, &[f64]); 6] {
        [
            (SPEED_MPS_COLUMN, self.speed_mps.as_slice()),
            (ACCEL_COLUMN, self.accel_mps2.as_slice()),
            (FORCE_COLUMN, self.force_n.as_slice()),
            (POWER_COLUMN, self.power_w.as_slice()),
            (EFFICIENCY_COLUMN, self.efficiency.as_slice()),
            (CORRECTED_POWER_COLUMN, self.corrected_power_w.as_slice()),
        ]
    }

    pub fn len(&self) -> usize {
        self.speed_mps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.speed_mps.is_empty()
    }
}

#[derive(Clone, Debug)]
pub struct RangeRun {
    /// Cleaned input rows with the derived columns appended.
    pub table: SampleTable,
    pub derived: DerivedSeries,
    pub summary: RangeSummary,
    /// Observed speed span (km/h), used for the speed-force curve.
    pub speed_span_kmh: (f64, f64),
}

pub fn compute_range(
    table: &SampleTable,
    columns: &ResolvedColumns,
    efficiency: &EfficiencyCurve,
    params: &RangeParams,
) -> Result<RangeRun, CdError> {
    params.validate()?;
    let headers = table.headers();
    let time_col = columns.require(Semantic::Timestamp, headers)?;
    let speed_col = columns.require(Semantic::Speed, headers)?;
    let mut required = vec![time_col, speed_col];
    let accel_col = match params.accel_source {
        AccelSource::Measured => Some(columns.require(Semantic::Acceleration, headers)?),
        AccelSource::Auto => columns
            .get(Semantic::Acceleration)
            .filter(|col| headers.iter().any(|h| h == col)),
        AccelSource::Derivative => None,
    };
    if let Some(col) = accel_col {
        required.push(col);
    }

    let mut clean = table.drop_incomplete(&required)?;
    if clean.len() < 2 {
        return Err(CdError::InsufficientData(format!(
            "{} complete rows; at least 2 are needed",
            clean.len()
        )));
    }

    let timestamps = clean.numeric_column(time_col)?;
    let speed_kmh = clean.numeric_column(speed_col)?;
    let speed_mps = kmh_to_mps(&speed_kmh);
    let accel_mps2: Vec<f64> = match accel_col {
        Some(col) => centered_rolling_mean(&clean.numeric_column(col)?, params.smoothing_window)?
            .into_iter()
            .map(|g| g * GRAVITY_MPS2)
            .collect(),
        None => lagged_derivative(&speed_mps, &timestamps)?,
    };

    let mass = params.total_mass_kg();
    let force_n: Vec<f64> = speed_kmh
        .iter()
        .zip(&accel_mps2)
        .map(|(&v, &a)| params.road_load.force_with_inertia(v, mass, a))
        .collect();
    let power_w: Vec<f64> = force_n
        .iter()
        .zip(&speed_mps)
        .map(|(&f, &v)| power(f, v))
        .collect();
    let eff: Vec<f64> = speed_kmh.iter().map(|&v| efficiency.at(v)).collect();
    let corrected_power_w: Vec<f64> = timestamps
        .iter()
        .zip(&power_w)
        .zip(&eff)
        .map(|((&t, &p), &e)| params.correction.apply(t, p, e))
        .collect();

    let summary = RangeSummary::compute(
        &corrected_power_w,
        &speed_mps,
        &timestamps,
        params.battery_capacity_wh,
    )?;

    let derived = DerivedSeries {
        speed_mps,
        accel_mps2,
        force_n,
        power_w,
        efficiency: eff,
        corrected_power_w,
    };
    for (name, values) in derived.columns() {
        clean.set_column(name, values)?;
    }

    let speed_span_kmh = speed_kmh
        .iter()
        .fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), &v| {
            (lo.min(v), hi.max(v))
        });

    Ok(RangeRun {
        table: clean,
        derived,
        summary,
        speed_span_kmh,
    })
}
