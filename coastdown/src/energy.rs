use serde::{Deserialize, Serialize};

use crate::CdError;

pub const SECONDS_PER_HOUR: f64 = 3600.0;

/// Trapezoidal integral of `y` over `x`. Order matters: integrating over
/// decreasing `x` flips the sign.
pub fn trapezoid(y: &[f64], x: &[f64]) -> Result<f64, CdError> {
    if y.len() != x.len() {
        return Err(CdError::InvalidParameter(format!(
            "{} samples for {} abscissae",
            y.len(),
            x.len()
        )));
    }
    Ok(x.windows(2)
        .zip(y.windows(2))
        .map(|(xs, ys)| (xs[1] - xs[0]) * (ys[0] + ys[1]) / 2.0)
        .sum())
}

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq)]
pub struct RangeSummary {
    pub energy_wh: f64,
    pub distance_m: f64,
    pub wh_per_km: f64,
    pub range_km: f64,
}

impl RangeSummary {
    /// Integrate corrected power and speed over the timestamps and derive
    /// consumption and range. Zero distance or zero consumption is an error.
    pub fn compute(
        corrected_power_w: &[f64],
        speed_mps: &[f64],
        timestamps_s: &[f64],
        battery_capacity_wh: f64,
    ) -> Result<Self, CdError> {
        let energy_wh = trapezoid(corrected_power_w, timestamps_s)? / SECONDS_PER_HOUR;
        if !energy_wh.is_finite() {
            return Err(CdError::NonFinite("energy"));
        }
        let distance_m = trapezoid(speed_mps, timestamps_s)?;
        if !distance_m.is_finite() {
            return Err(CdError::NonFinite("distance"));
        }
        let wh_per_km = specific_consumption(energy_wh, distance_m)?;
        let range_km = range_km(battery_capacity_wh, wh_per_km)?;
        Ok(Self {
            energy_wh,
            distance_m,
            wh_per_km,
            range_km,
        })
    }

    /// Labelled rows as written to the summary sheet.
    pub fn metrics(&self) -> [(&'static str, f64); 4] {
        [
            ("Total Energy Consumption (Wh)", self.energy_wh),
            ("Total Distance (m)", self.distance_m),
            ("Energy Consumption (Wh/km)", self.wh_per_km),
            ("Estimated Range (km)", self.range_km),
        ]
    }
}

pub fn specific_consumption(energy_wh: f64, distance_m: f64) -> Result<f64, CdError> {
    if distance_m == 0.0 {
        return Err(CdError::ZeroDistance);
    }
    Ok(energy_wh / (distance_m / 1000.0))
}

pub fn range_km(battery_capacity_wh: f64, wh_per_km: f64) -> Result<f64, CdError> {
    if wh_per_km == 0.0 {
        return Err(CdError::ZeroConsumption);
    }
    Ok(battery_capacity_wh / wh_per_km)
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::{assert_abs_diff_eq, assert_relative_eq};

    #[test]
    fn trapezoid_of_linear_ramp() {
        let x = [0.0, 1.0, 2.0, 4.0];
        let y = [0.0, 1.0, 2.0, 4.0];
        assert_abs_diff_eq!(trapezoid(&y, &x).unwrap(), 8.0, epsilon = 1e-12);
        assert_eq!(trapezoid(&[], &[]).unwrap(), 0.0);
        assert_eq!(trapezoid(&[5.0], &[1.0]).unwrap(), 0.0);
        assert!(trapezoid(&[1.0, 2.0], &[0.0]).is_err());
    }

    #[test]
    fn reversing_rows_with_timestamps_flips_sign() {
        let t = [0.0, 1.0, 2.5, 3.0, 5.0];
        let p = [100.0, 250.0, -40.0, 32.0, 180.0];
        let forward = trapezoid(&p, &t).unwrap();
        let t_rev: Vec<f64> = t.iter().rev().copied().collect();
        let p_rev: Vec<f64> = p.iter().rev().copied().collect();
        let backward = trapezoid(&p_rev, &t_rev).unwrap();
        assert_relative_eq!(backward, -forward, epsilon = 1e-12);
    }

    #[test]
    fn range_for_fifteen_wh_per_km() {
        assert_abs_diff_eq!(range_km(3965.0, 15.0).unwrap(), 264.3333333, epsilon = 1e-6);
    }

    #[test]
    fn summary_from_constant_cruise() {
        // 10 m/s for 100 s at 360 W: 10 Wh over 1 km.
        let t: Vec<f64> = (0..=100).map(f64::from).collect();
        let v = vec![10.0; t.len()];
        let p = vec![360.0; t.len()];
        let summary = RangeSummary::compute(&p, &v, &t, 3965.0).unwrap();
        assert_abs_diff_eq!(summary.energy_wh, 10.0, epsilon = 1e-9);
        assert_abs_diff_eq!(summary.distance_m, 1000.0, epsilon = 1e-9);
        assert_abs_diff_eq!(summary.wh_per_km, 10.0, epsilon = 1e-9);
        assert_abs_diff_eq!(summary.range_km, 396.5, epsilon = 1e-9);
        assert_eq!(summary.metrics()[3].0, "Estimated Range (km)");
    }

    #[test]
    fn zero_distance_and_zero_consumption_fail_closed() {
        let t = [0.0, 1.0, 2.0];
        assert!(matches!(
            RangeSummary::compute(&[10.0; 3], &[0.0; 3], &t, 3965.0),
            Err(CdError::ZeroDistance)
        ));
        assert!(matches!(
            RangeSummary::compute(&[0.0; 3], &[5.0; 3], &t, 3965.0),
            Err(CdError::ZeroConsumption)
        ));
    }

    #[test]
    fn infinite_power_is_rejected() {
        let t = [0.0, 1.0];
        assert!(matches!(
            RangeSummary::compute(&[f64::INFINITY, 1.0], &[5.0, 5.0], &t, 3965.0),
            Err(CdError::NonFinite("energy"))
        ));
    }
}
