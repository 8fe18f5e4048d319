use crate::CdError;

pub const KMH_PER_MPS: f64 = 3.6;

pub fn kmh_to_mps(speed_kmh: &[f64]) -> Vec<f64> {
    speed_kmh.iter().map(|v| v / KMH_PER_MPS).collect()
}

/// Derivative of `values` with respect to `times` on a possibly irregular grid:
/// second-order central differences inside, first-order one-sided at the ends.
pub fn gradient(values: &[f64], times: &[f64]) -> Result<Vec<f64>, CdError> {
    let n = values.len();
    if n != times.len() {
        return Err(CdError::InvalidParameter(format!(
            "{} values for {} timestamps",
            n,
            times.len()
        )));
    }
    if n < 2 {
        return Err(CdError::InsufficientData(
            "differentiation needs at least two samples".into(),
        ));
    }
    for i in 1..n {
        if times[i] == times[i - 1] {
            return Err(CdError::DegenerateTimestamps { row: i });
        }
    }

    let mut out = Vec::with_capacity(n);
    out.push((values[1] - values[0]) / (times[1] - times[0]));
    for i in 1..n - 1 {
        let dx1 = times[i] - times[i - 1];
        let dx2 = times[i + 1] - times[i];
        let a = -dx2 / (dx1 * (dx1 + dx2));
        let b = (dx2 - dx1) / (dx1 * dx2);
        let c = dx1 / (dx2 * (dx1 + dx2));
        out.push(a * values[i - 1] + b * values[i] + c * values[i + 1]);
    }
    out.push((values[n - 1] - values[n - 2]) / (times[n - 1] - times[n - 2]));
    Ok(out)
}

/// Shift forward by one sample; the first slot becomes zero.
pub fn lag_one(series: &[f64]) -> Vec<f64> {
    if series.is_empty() {
        return Vec::new();
    }
    let mut out = Vec::with_capacity(series.len());
    out.push(0.0);
    out.extend_from_slice(&series[..series.len() - 1]);
    out
}

/// `gradient` lagged by one sample: the acceleration used at row i is the
/// one estimated at row i-1.
pub fn lagged_derivative(values: &[f64], times: &[f64]) -> Result<Vec<f64>, CdError> {
    Ok(lag_one(&gradient(values, times)?))
}

/// Centered moving average that needs only one valid sample per window.
/// The window for row i ends at `i + (window-1)/2` and spans `window` rows;
/// NaN samples are skipped and a window without any valid sample yields NaN.
pub fn centered_rolling_mean(values: &[f64], window: usize) -> Result<Vec<f64>, CdError> {
    if window == 0 {
        return Err(CdError::InvalidParameter(
            "smoothing window must be at least 1".into(),
        ));
    }
    let n = values.len();
    let mut sums = vec![0.0; n + 1];
    let mut counts = vec![0usize; n + 1];
    for (i, &v) in values.iter().enumerate() {
        let valid = !v.is_nan();
        sums[i + 1] = sums[i] + if valid { v } else { 0.0 };
        counts[i + 1] = counts[i] + usize::from(valid);
    }
    let offset = (window - 1) / 2;
    Ok((0..n)
        .map(|i| {
            let end = (i + offset + 1).min(n);
            let start = (i + offset + 1).saturating_sub(window);
            let count = counts[end] - counts[start];
            if count == 0 {
                f64::NAN
            } else {
                (sums[end] - sums[start]) / count as f64
            }
        })
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    #[test]
    fn gradient_is_exact_for_quadratics_on_irregular_grid() {
        let times = [0.0, 0.5, 1.5, 2.0, 3.5];
        let values: Vec<f64> = times.iter().map(|t| t * t).collect();
        let grad = gradient(&values, &times).unwrap();
        for i in 1..times.len() - 1 {
            assert_abs_diff_eq!(grad[i], 2.0 * times[i], epsilon = 1e-12);
        }
        assert_abs_diff_eq!(grad[0], 0.5, epsilon = 1e-12);
        assert_abs_diff_eq!(grad[4], 5.5, epsilon = 1e-12);
    }

    #[test]
    fn two_rows_differentiate() {
        let grad = gradient(&[10.0, 12.0], &[0.0, 2.0]).unwrap();
        assert_eq!(grad, vec![1.0, 1.0]);
        let lagged = lagged_derivative(&[10.0, 12.0], &[0.0, 2.0]).unwrap();
        assert_eq!(lagged, vec![0.0, 1.0]);
    }

    #[test]
    fn single_row_and_repeated_timestamps_fail() {
        assert!(matches!(
            gradient(&[1.0], &[0.0]),
            Err(CdError::InsufficientData(_))
        ));
        assert!(matches!(
            gradient(&[1.0, 2.0, 3.0], &[0.0, 1.0, 1.0]),
            Err(CdError::DegenerateTimestamps { row: 2 })
        ));
    }

    #[test]
    fn lag_shifts_and_zero_fills() {
        assert_eq!(lag_one(&[1.0, 2.0, 3.0]), vec![0.0, 1.0, 2.0]);
        assert!(lag_one(&[]).is_empty());
    }

    #[test]
    fn rolling_mean_shrinks_at_edges() {
        let values = [1.0, 2.0, 3.0, 4.0, 5.0, 6.0];
        let smoothed = centered_rolling_mean(&values, 5).unwrap();
        assert_abs_diff_eq!(smoothed[0], 2.0, epsilon = 1e-12);
        assert_abs_diff_eq!(smoothed[1], 2.5, epsilon = 1e-12);
        assert_abs_diff_eq!(smoothed[2], 3.0, epsilon = 1e-12);
        assert_abs_diff_eq!(smoothed[3], 4.0, epsilon = 1e-12);
        assert_abs_diff_eq!(smoothed[5], 5.0, epsilon = 1e-12);
    }

    #[test]
    fn rolling_mean_even_window_leans_back() {
        let smoothed = centered_rolling_mean(&[1.0, 2.0, 3.0], 2).unwrap();
        assert_eq!(smoothed, vec![1.0, 1.5, 2.5]);
        let smoothed = centered_rolling_mean(&[1.0, 2.0, 3.0, 4.0], 4).unwrap();
        assert_abs_diff_eq!(smoothed[1], 2.0, epsilon = 1e-12);
        assert_abs_diff_eq!(smoothed[2], 2.5, epsilon = 1e-12);
    }

    #[test]
    fn rolling_mean_skips_nan_and_rejects_zero_window() {
        let smoothed = centered_rolling_mean(&[1.0, f64::NAN, 3.0], 3).unwrap();
        assert_abs_diff_eq!(smoothed[1], 2.0, epsilon = 1e-12);
        assert!(centered_rolling_mean(&[1.0], 0).is_err());
        let window_one = centered_rolling_mean(&[4.0, 7.0], 1).unwrap();
        assert_eq!(window_one, vec![4.0, 7.0]);
    }
}
