use crate::table::{SampleTable, Value};
use crate::CdError;

/// Piecewise-linear drivetrain efficiency over speed (km/h). Outside the
/// sampled range the end segments are extended linearly; nothing is clamped.
#[derive(Clone, Debug, PartialEq)]
pub struct EfficiencyCurve {
    speeds: Vec<f64>,
    efficiencies: Vec<f64>,
}

impl EfficiencyCurve {
    pub fn new(points: Vec<(f64, f64)>) -> Result<Self, CdError> {
        if points.len() < 2 {
            return Err(CdError::InsufficientData(
                "efficiency curve needs at least two points".into(),
            ));
        }
        if points.iter().any(|(s, e)| !s.is_finite() || !e.is_finite()) {
            return Err(CdError::Interpolation(
                "efficiency curve contains non-finite values".into(),
            ));
        }
        let mut points = points;
        points.sort_by(|a, b| a.0.total_cmp(&b.0));
        let (speeds, efficiencies) = points.into_iter().unzip();
        Ok(Self {
            speeds,
            efficiencies,
        })
    }

    /// Build from the first two columns of a lookup sheet. `skip_rows` data
    /// rows after the header are ignored (typically a units row); rows missing
    /// either value are dropped.
    pub fn from_table(table: &SampleTable, skip_rows: usize) -> Result<Self, CdError> {
        let headers = table.headers();
        if headers.len() < 2 {
            return Err(CdError::MissingColumns {
                wanted: vec!["speed".into(), "efficiency".into()],
                available: headers.to_vec(),
            });
        }
        let speed = table.column(&headers[0]).unwrap_or_default();
        let eff = table.column(&headers[1]).unwrap_or_default();
        let points = speed
            .iter()
            .zip(eff.iter())
            .skip(skip_rows)
            .filter_map(|(s, e)| match (s, e) {
                (Value::Number(s), Value::Number(e)) if !s.is_nan() && !e.is_nan() => {
                    Some((*s, *e))
                }
                _ => None,
            })
            .collect();
        Self::new(points)
    }

    pub fn len(&self) -> usize {
        self.speeds.len()
    }

    pub fn is_empty(&self) -> bool {
        self.speeds.is_empty()
    }

    pub fn points(&self) -> impl Iterator<Item = (f64, f64)> + '_ {
        self.speeds
            .iter()
            .copied()
            .zip(self.efficiencies.iter().copied())
    }

    pub fn at(&self, speed_kmh: f64) -> f64 {
        let n = self.speeds.len();
        let idx = self
            .speeds
            .partition_point(|&s| s < speed_kmh)
            .clamp(1, n - 1);
        let (x0, x1) = (self.speeds[idx - 1], self.speeds[idx]);
        let (y0, y1) = (self.efficiencies[idx - 1], self.efficiencies[idx]);
        if x1 == x0 {
            return y1;
        }
        y0 + (y1 - y0) * (speed_kmh - x0) / (x1 - x0)
    }
}
