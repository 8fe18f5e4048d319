use ndarray::{s, Array1};
use serde::{Deserialize, Serialize};

use crate::kinematics::centered_rolling_mean;
use crate::{CdError, GRAVITY_MPS2};

/// Coastdown fit `F = C·v² + A` (v in km/h).
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq)]
pub struct ForceFit {
    /// Constant drag term (N).
    pub a: f64,
    /// Quadratic coefficient (N/(km/h)²).
    pub c: f64,
    pub start: usize,
    pub end: usize,
    pub samples: usize,
}

impl ForceFit {
    pub fn force(&self, speed_kmh: f64) -> f64 {
        self.c * speed_kmh * speed_kmh + self.a
    }

    pub fn report(&self) -> String {
        format!("A = {:.2} N\nC = {:.4} N/(km/h)^2", self.a, self.c)
    }
}

/// Sort and clamp two marker indices into `0..len`, inclusive bounds.
pub fn ordered_bounds(i1: usize, i2: usize, len: usize) -> Result<(usize, usize), CdError> {
    if len == 0 {
        return Err(CdError::InsufficientData("series is empty".into()));
    }
    let last = len - 1;
    let (a, b) = (i1.min(last), i2.min(last));
    Ok((a.min(b), a.max(b)))
}

/// Least-squares fit of `force = C·speed² + A` over rows `i1..=i2` (either order).
pub fn fit_force_curve(
    speed_kmh: &[f64],
    force_n: &[f64],
    i1: usize,
    i2: usize,
) -> Result<ForceFit, CdError> {
    if speed_kmh.len() != force_n.len() {
        return Err(CdError::InvalidParameter(format!(
            "{} speeds for {} forces",
            speed_kmh.len(),
            force_n.len()
        )));
    }
    let (start, end) = ordered_bounds(i1, i2, speed_kmh.len())?;
    let v = Array1::from_vec(speed_kmh.to_vec());
    let f = Array1::from_vec(force_n.to_vec());
    let v2 = v.slice(s![start..=end]).mapv(|x| x * x);
    let f = f.slice(s![start..=end]).to_owned();
    let (c, a) = linear_least_squares(&v2, &f)?;
    Ok(ForceFit {
        a,
        c,
        start,
        end,
        samples: end - start + 1,
    })
}

/// Ordinary least squares `y = slope·x + intercept`.
pub fn linear_least_squares(x: &Array1<f64>, y: &Array1<f64>) -> Result<(f64, f64), CdError> {
    if x.len() < 2 {
        return Err(CdError::Fit(format!(
            "need at least 2 points, got {}",
            x.len()
        )));
    }
    if x.iter().chain(y.iter()).any(|v| !v.is_finite()) {
        return Err(CdError::Fit("selection contains missing values".into()));
    }
    let x_mean = x.mean().unwrap_or(0.0);
    let y_mean = y.mean().unwrap_or(0.0);
    let dx = x - x_mean;
    let dy = y - y_mean;
    let sxx = dx.dot(&dx);
    if sxx <= f64::EPSILON * x_mean.abs().max(1.0) {
        return Err(CdError::Fit("speed does not vary over the selection".into()));
    }
    let slope = dx.dot(&dy) / sxx;
    Ok((slope, y_mean - slope * x_mean))
}

/// Smoothed acceleration (g) and the resulting decelerating force
/// `m · g · a` for a coastdown log.
pub fn coastdown_force(
    accel_g: &[f64],
    window: usize,
    total_mass_kg: f64,
) -> Result<(Vec<f64>, Vec<f64>), CdError> {
    let smoothed = centered_rolling_mean(accel_g, window)?;
    let force = smoothed
        .iter()
        .map(|a| total_mass_kg * GRAVITY_MPS2 * a)
        .collect();
    Ok((smoothed, force))
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    #[test]
    fn recovers_exact_quadratic() {
        let speed: Vec<f64> = (0..40).map(|i| 20.0 + i as f64).collect();
        let force: Vec<f64> = speed.iter().map(|v| 0.012 * v * v + 18.5).collect();
        let fit = fit_force_curve(&speed, &force, 35, 3).unwrap();
        assert_eq!((fit.start, fit.end, fit.samples), (3, 35, 33));
        assert_abs_diff_eq!(fit.a, 18.5, epsilon = 1e-8);
        assert_abs_diff_eq!(fit.c, 0.012, epsilon = 1e-11);
        assert_abs_diff_eq!(fit.force(30.0), 0.012 * 900.0 + 18.5, epsilon = 1e-8);
    }

    #[test]
    fn bounds_are_clamped_into_series() {
        assert_eq!(ordered_bounds(100, 200, 50).unwrap(), (49, 49));
        assert_eq!(ordered_bounds(30, 5, 50).unwrap(), (5, 30));
        assert!(ordered_bounds(0, 1, 0).is_err());
    }

    #[test]
    fn single_point_selection_fails() {
        let err = fit_force_curve(&[10.0, 20.0], &[1.0, 2.0], 1, 1).unwrap_err();
        assert!(matches!(err, CdError::Fit(_)));
    }

    #[test]
    fn constant_speed_selection_fails() {
        let err = fit_force_curve(&[25.0; 5], &[1.0, 2.0, 3.0, 4.0, 5.0], 0, 4).unwrap_err();
        assert!(matches!(err, CdError::Fit(_)));
    }

    #[test]
    fn report_formats_coefficients() {
        let fit = ForceFit {
            a: 18.456,
            c: 0.01234,
            start: 0,
            end: 1,
            samples: 2,
        };
        assert_eq!(fit.report(), "A = 18.46 N\nC = 0.0123 N/(km/h)^2");
    }

    #[test]
    fn coastdown_force_scales_smoothed_acceleration() {
        let (smoothed, force) = coastdown_force(&[-0.01, -0.02, -0.03], 3, 170.0).unwrap();
        assert_abs_diff_eq!(smoothed[1], -0.02, epsilon = 1e-12);
        assert_abs_diff_eq!(force[1], 170.0 * 9.81 * -0.02, epsilon = 1e-9);
        assert_abs_diff_eq!(smoothed[0], -0.015, epsilon = 1e-12);
    }
}
