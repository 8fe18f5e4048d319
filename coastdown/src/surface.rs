//! Time-windowed X/Y/Z surface frames: window slicing, degenerate-input
//! fallbacks and linear interpolation over a Delaunay triangulation.

use std::collections::{BTreeSet, HashMap};

use ndarray::Array2;
use ordered_float::OrderedFloat;

use crate::CdError;

pub const TOO_FEW_POINTS: &str = "Too few data points";
pub const INSUFFICIENT_VARIATION: &str = "Insufficient variation in X or Y";
pub const CONSTANT_Z: &str = "Z is constant";

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Point3 {
    pub x: f64,
    pub y: f64,
    pub z: f64,
}

/// How scattered points should be coloured.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ScatterColor {
    /// Through the colormap by Z.
    ByZ,
    /// One flat colour.
    Uniform,
}

/// Interpolated surface on a regular grid. `z[[j, i]]` sits at `(xs[i], ys[j])`;
/// nodes outside the convex hull of the samples are NaN.
#[derive(Clone, Debug, PartialEq)]
pub struct SurfaceGrid {
    pub xs: Vec<f64>,
    pub ys: Vec<f64>,
    pub z: Array2<f64>,
}

impl SurfaceGrid {
    pub fn z_range(&self) -> Option<(f64, f64)> {
        finite_range(self.z.iter().copied())
    }
}

#[derive(Clone, Debug, PartialEq)]
pub enum SurfaceFrame {
    TooFew {
        count: usize,
    },
    Scatter {
        window: (f64, f64),
        points: Vec<Point3>,
        color: ScatterColor,
        reason: String,
    },
    Surface {
        window: (f64, f64),
        points: Vec<Point3>,
        grid: SurfaceGrid,
    },
}

impl SurfaceFrame {
    pub fn title(&self) -> String {
        match self {
            SurfaceFrame::TooFew { .. } => TOO_FEW_POINTS.to_string(),
            SurfaceFrame::Scatter { window, .. } | SurfaceFrame::Surface { window, .. } => {
                format!("{:.2} – {:.2} sec", window.0, window.1)
            }
        }
    }

    /// Why the frame fell back from a surface, if it did.
    pub fn note(&self) -> Option<&str> {
        match self {
            SurfaceFrame::TooFew { .. } => Some(TOO_FEW_POINTS),
            SurfaceFrame::Scatter { reason, .. } => Some(reason),
            SurfaceFrame::Surface { .. } => None,
        }
    }

    pub fn points(&self) -> &[Point3] {
        match self {
            SurfaceFrame::TooFew { .. } => &[],
            SurfaceFrame::Scatter { points, .. } | SurfaceFrame::Surface { points, .. } => points,
        }
    }
}

/// Rows with `t0 <= time <= t0 + width` and finite X, Y and Z.
pub fn window_points(
    time: &[f64],
    x: &[f64],
    y: &[f64],
    z: &[f64],
    t0: f64,
    width: f64,
) -> Result<Vec<Point3>, CdError> {
    let n = time.len();
    if x.len() != n || y.len() != n || z.len() != n {
        return Err(CdError::InvalidParameter(format!(
            "column lengths differ: time {}, x {}, y {}, z {}",
            n,
            x.len(),
            y.len(),
            z.len()
        )));
    }
    let t1 = t0 + width;
    Ok((0..n)
        .filter(|&i| time[i] >= t0 && time[i] <= t1)
        .filter(|&i| !x[i].is_nan() && !y[i].is_nan() && !z[i].is_nan())
        .map(|i| Point3 {
            x: x[i],
            y: y[i],
            z: z[i],
        })
        .collect())
}

pub fn distinct_count(values: impl IntoIterator<Item = f64>) -> usize {
    values
        .into_iter()
        .map(OrderedFloat)
        .collect::<BTreeSet<_>>()
        .len()
}

/// Build the frame for the window starting at `t0`.
pub fn build_frame(
    time: &[f64],
    x: &[f64],
    y: &[f64],
    z: &[f64],
    t0: f64,
    width: f64,
    grid_size: usize,
) -> Result<SurfaceFrame, CdError> {
    if !t0.is_finite() || !width.is_finite() || width < 0.0 {
        return Err(CdError::InvalidParameter(format!(
            "window start {t0} and width {width} must be finite, width non-negative"
        )));
    }
    if grid_size < 2 {
        return Err(CdError::InvalidParameter("grid_size must be at least 2".into()));
    }
    let points = window_points(time, x, y, z, t0, width)?;
    if points.len() < 3 {
        return Ok(SurfaceFrame::TooFew {
            count: points.len(),
        });
    }
    let window = (t0, t0 + width);
    let scatter = |points: Vec<Point3>, color, reason: String| SurfaceFrame::Scatter {
        window,
        points,
        color,
        reason,
    };

    if distinct_count(points.iter().map(|p| p.x)) < 2
        || distinct_count(points.iter().map(|p| p.y)) < 2
    {
        return Ok(scatter(points, ScatterColor::ByZ, INSUFFICIENT_VARIATION.into()));
    }
    if distinct_count(points.iter().map(|p| p.z)) < 2 {
        return Ok(scatter(points, ScatterColor::Uniform, CONSTANT_Z.into()));
    }
    match interpolate_grid(&points, grid_size) {
        Ok(grid) => Ok(SurfaceFrame::Surface {
            window,
            points,
            grid,
        }),
        Err(err) => {
            let reason = match err {
                CdError::Interpolation(msg) => msg,
                other => other.to_string(),
            };
            Ok(scatter(
                points,
                ScatterColor::ByZ,
                format!("Interpolation fallback: {reason}"),
            ))
        }
    }
}

/// Linear interpolation of scattered samples onto a `size`×`size` grid
/// spanning their X and Y ranges.
pub fn interpolate_grid(points: &[Point3], size: usize) -> Result<SurfaceGrid, CdError> {
    let (x_min, x_max) = finite_range(points.iter().map(|p| p.x))
        .ok_or_else(|| CdError::Interpolation("no finite points".into()))?;
    let (y_min, y_max) = finite_range(points.iter().map(|p| p.y))
        .ok_or_else(|| CdError::Interpolation("no finite points".into()))?;
    let xs = linspace(x_min, x_max, size);
    let ys = linspace(y_min, y_max, size);

    let tri = Triangulation::new(points)?;
    let mut z = Array2::from_elem((size, size), f64::NAN);
    for (j, &yv) in ys.iter().enumerate() {
        for (i, &xv) in xs.iter().enumerate() {
            if let Some(v) = tri.interpolate(xv, yv) {
                z[[j, i]] = v;
            }
        }
    }
    if z.iter().all(|v| v.is_nan()) {
        return Err(CdError::Interpolation("Interpolation failed".into()));
    }
    Ok(SurfaceGrid { xs, ys, z })
}

fn linspace(lo: f64, hi: f64, n: usize) -> Vec<f64> {
    if n == 1 {
        return vec![lo];
    }
    let step = (hi - lo) / (n - 1) as f64;
    (0..n)
        .map(|i| if i == n - 1 { hi } else { lo + step * i as f64 })
        .collect()
}

fn finite_range(values: impl Iterator<Item = f64>) -> Option<(f64, f64)> {
    values
        .filter(|v| v.is_finite())
        .fold(None, |acc, v| match acc {
            None => Some((v, v)),
            Some((lo, hi)) => Some((lo.min(v), hi.max(v))),
        })
}

#[derive(Clone, Copy, Debug)]
struct Triangle {
    v: [usize; 3],
    cx: f64,
    cy: f64,
    r2: f64,
}

/// Delaunay triangulation (Bowyer-Watson) of the XY projection of the
/// samples, coordinates shifted so the minimum corner sits at the origin.
struct Triangulation {
    xy: Vec<(f64, f64)>,
    z: Vec<f64>,
    triangles: Vec<Triangle>,
    origin: (f64, f64),
}

impl Triangulation {
    fn new(points: &[Point3]) -> Result<Self, CdError> {
        let origin = (
            points.iter().map(|p| p.x).fold(f64::INFINITY, f64::min),
            points.iter().map(|p| p.y).fold(f64::INFINITY, f64::min),
        );
        // Coincident XY samples keep the first Z seen.
        let mut seen = BTreeSet::new();
        let mut xy = Vec::with_capacity(points.len() + 3);
        let mut z = Vec::with_capacity(points.len());
        for p in points {
            if seen.insert((OrderedFloat(p.x), OrderedFloat(p.y))) {
                xy.push((p.x - origin.0, p.y - origin.1));
                z.push(p.z);
            }
        }
        let n = xy.len();
        if n < 3 {
            return Err(CdError::Interpolation(format!(
                "{n} distinct XY points; at least 3 are needed"
            )));
        }
        let extent = xy
            .iter()
            .fold(0.0_f64, |m, &(x, y)| m.max(x.abs()).max(y.abs()));
        if collinear(&xy, extent) {
            return Err(CdError::Interpolation("points are collinear".into()));
        }

        let d = extent.max(1.0);
        xy.push((-20.0 * d, -20.0 * d));
        xy.push((20.0 * d, -20.0 * d));
        xy.push((0.0, 20.0 * d));
        let mut triangles = vec![circumscribe(&xy, [n, n + 1, n + 2])];

        for p in 0..n {
            let (px, py) = xy[p];
            let mut edges: HashMap<(usize, usize), usize> = HashMap::new();
            triangles.retain(|t| {
                let dx = px - t.cx;
                let dy = py - t.cy;
                let bad = dx * dx + dy * dy <= t.r2 * (1.0 + 1e-12);
                if bad {
                    for k in 0..3 {
                        let (a, b) = (t.v[k], t.v[(k + 1) % 3]);
                        *edges.entry((a.min(b), a.max(b))).or_insert(0) += 1;
                    }
                }
                !bad
            });
            for ((a, b), count) in edges {
                if count == 1 {
                    triangles.push(circumscribe(&xy, [a, b, p]));
                }
            }
        }

        triangles.retain(|t| t.v.iter().all(|&v| v < n));
        if triangles.is_empty() {
            return Err(CdError::Interpolation("triangulation is empty".into()));
        }
        xy.truncate(n);
        Ok(Self {
            xy,
            z,
            triangles,
            origin,
        })
    }

    /// Barycentric interpolation at `(x, y)`, `None` outside the hull.
    fn interpolate(&self, x: f64, y: f64) -> Option<f64> {
        let (px, py) = (x - self.origin.0, y - self.origin.1);
        const EPS: f64 = 1e-10;
        for t in &self.triangles {
            let [a, b, c] = t.v;
            let (ax, ay) = self.xy[a];
            let (bx, by) = self.xy[b];
            let (cx, cy) = self.xy[c];
            let det = (by - cy) * (ax - cx) + (cx - bx) * (ay - cy);
            if det.abs() < f64::EPSILON {
                continue;
            }
            let l1 = ((by - cy) * (px - cx) + (cx - bx) * (py - cy)) / det;
            let l2 = ((cy - ay) * (px - cx) + (ax - cx) * (py - cy)) / det;
            let l3 = 1.0 - l1 - l2;
            if l1 >= -EPS && l2 >= -EPS && l3 >= -EPS {
                return Some(l1 * self.z[a] + l2 * self.z[b] + l3 * self.z[c]);
            }
        }
        None
    }
}

fn collinear(xy: &[(f64, f64)], extent: f64) -> bool {
    let (x0, y0) = xy[0];
    let Some(&(x1, y1)) = xy
        .iter()
        .skip(1)
        .max_by(|a, b| {
            let da = (a.0 - x0).hypot(a.1 - y0);
            let db = (b.0 - x0).hypot(b.1 - y0);
            da.total_cmp(&db)
        })
    else {
        return true;
    };
    let tol = 1e-12 * extent.max(f64::MIN_POSITIVE).powi(2);
    xy.iter()
        .all(|&(x, y)| ((x1 - x0) * (y - y0) - (y1 - y0) * (x - x0)).abs() <= tol)
}

fn circumscribe(xy: &[(f64, f64)], v: [usize; 3]) -> Triangle {
    let (ax, ay) = xy[v[0]];
    let (bx, by) = xy[v[1]];
    let (cx, cy) = xy[v[2]];
    let d = 2.0 * (ax * (by - cy) + bx * (cy - ay) + cx * (ay - by));
    if d.abs() < f64::EPSILON {
        // Degenerate: make it contain everything so it gets replaced.
        return Triangle {
            v,
            cx: 0.0,
            cy: 0.0,
            r2: f64::INFINITY,
        };
    }
    let a2 = ax * ax + ay * ay;
    let b2 = bx * bx + by * by;
    let c2 = cx * cx + cy * cy;
    let ux = (a2 * (by - cy) + b2 * (cy - ay) + c2 * (ay - by)) / d;
    let uy = (a2 * (cx - bx) + b2 * (ax - cx) + c2 * (bx - ax)) / d;
    Triangle {
        v,
        cx: ux,
        cy: uy,
        r2: (ax - ux).powi(2) + (ay - uy).powi(2),
    }
}

/// Upper bound on slider positions a recording may produce.
pub const MAX_SLIDER_POSITIONS: usize = 1_000_000;

/// Window-start slider over the time column.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct TimeSlider {
    pub from: f64,
    pub to: f64,
    pub step: f64,
}

impl TimeSlider {
    /// `from` is the earliest time, `to` the latest minus the window width,
    /// never below `from`. Missing times are ignored.
    pub fn new(time: &[f64], width: f64, step: f64) -> Result<Self, CdError> {
        if !(step > 0.0) || !step.is_finite() {
            return Err(CdError::InvalidParameter(format!(
                "slider step must be positive, got {step}"
            )));
        }
        let (min, max) = finite_range(time.iter().copied())
            .ok_or_else(|| CdError::InsufficientData("time column has no values".into()))?;
        let slider = Self {
            from: min,
            to: (max - width).max(min),
            step,
        };
        let steps = (slider.to - slider.from) / step;
        if !(steps + 1e-9 < MAX_SLIDER_POSITIONS as f64) {
            return Err(CdError::InvalidParameter(format!(
                "slider step {step} gives more than {MAX_SLIDER_POSITIONS} positions"
            )));
        }
        Ok(slider)
    }

    /// Number of window starts between `from` and `to`, both ends included.
    pub fn count(&self) -> usize {
        ((self.to - self.from) / self.step + 1e-9).floor() as usize + 1
    }

    /// Window starts from `from` to `to` in `step` increments.
    pub fn positions(&self) -> Vec<f64> {
        (0..self.count())
            .map(|k| self.from + self.step * k as f64)
            .collect()
    }

    /// Advance one step, wrapping to `from` once past `to`.
    pub fn advance(&self, current: f64) -> f64 {
        let next = current + self.step;
        if next > self.to {
            self.from
        } else {
            next
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    fn plane(n: usize) -> (Vec<f64>, Vec<f64>, Vec<f64>, Vec<f64>) {
        let mut t = Vec::new();
        let mut x = Vec::new();
        let mut y = Vec::new();
        let mut z = Vec::new();
        for i in 0..n {
            for j in 0..n {
                // Jitter keeps samples off a perfect lattice.
                let xv = i as f64 + 0.013 * ((i * 7 + j * 3) % 5) as f64;
                let yv = 2.0 * j as f64 + 0.017 * ((i * 3 + j * 5) % 7) as f64;
                t.push((i * n + j) as f64 * 0.01);
                x.push(xv);
                y.push(yv);
                z.push(3.0 * xv - 0.5 * yv + 1.0);
            }
        }
        (t, x, y, z)
    }

    #[test]
    fn window_is_inclusive_and_skips_missing() {
        let t = [0.0, 0.5, 1.0, 1.5];
        let x = [1.0, f64::NAN, 3.0, 4.0];
        let pts = window_points(&t, &x, &[0.0; 4], &[0.0; 4], 0.0, 1.0).unwrap();
        assert_eq!(pts.len(), 2);
        assert_eq!(pts[1].x, 3.0);
    }

    #[test]
    fn fewer_than_three_points_draws_nothing() {
        let frame = build_frame(&[0.0, 0.5], &[1.0, 2.0], &[1.0, 2.0], &[1.0, 2.0], 0.0, 1.0, 10)
            .unwrap();
        assert_eq!(frame, SurfaceFrame::TooFew { count: 2 });
        assert_eq!(frame.title(), "Too few data points");
        assert!(frame.points().is_empty());
    }

    #[test]
    fn single_x_value_falls_back_to_scatter() {
        let t = [0.0, 0.1, 0.2, 0.3];
        let frame =
            build_frame(&t, &[5.0; 4], &[1.0, 2.0, 3.0, 4.0], &[1.0, 2.0, 3.0, 4.0], 0.0, 1.0, 10)
                .unwrap();
        match &frame {
            SurfaceFrame::Scatter { color, reason, .. } => {
                assert_eq!(*color, ScatterColor::ByZ);
                assert_eq!(reason, INSUFFICIENT_VARIATION);
            }
            other => panic!("unexpected frame {other:?}"),
        }
        assert_eq!(frame.title(), "0.00 – 1.00 sec");
    }

    #[test]
    fn constant_z_scatters_in_one_colour() {
        let t = [0.0, 0.1, 0.2];
        let frame =
            build_frame(&t, &[0.0, 1.0, 0.0], &[0.0, 0.0, 1.0], &[7.0; 3], 0.0, 1.0, 10).unwrap();
        assert!(matches!(
            frame,
            SurfaceFrame::Scatter {
                color: ScatterColor::Uniform,
                ..
            }
        ));
        assert_eq!(frame.note(), Some(CONSTANT_Z));
    }

    #[test]
    fn collinear_points_use_interpolation_fallback() {
        let t = [0.0, 0.1, 0.2, 0.3];
        let x = [0.0, 1.0, 2.0, 3.0];
        let y = [0.0, 2.0, 4.0, 6.0];
        let z = [1.0, 2.0, 3.0, 4.0];
        let frame = build_frame(&t, &x, &y, &z, 0.0, 1.0, 10).unwrap();
        match frame {
            SurfaceFrame::Scatter { reason, color, .. } => {
                assert!(reason.starts_with("Interpolation fallback: "));
                assert_eq!(color, ScatterColor::ByZ);
            }
            other => panic!("unexpected frame {other:?}"),
        }
    }

    #[test]
    fn plane_is_reproduced_on_grid() {
        let (t, x, y, z) = plane(6);
        let frame = build_frame(&t, &x, &y, &z, 0.0, 1.0, 25).unwrap();
        let SurfaceFrame::Surface { grid, points, .. } = frame else {
            panic!("expected a surface");
        };
        assert_eq!(points.len(), 36);
        assert_eq!(grid.z.dim(), (25, 25));
        assert_eq!(grid.xs.len(), 25);
        assert_abs_diff_eq!(grid.xs[0], 0.0);
        let mut filled = 0;
        for (j, &yv) in grid.ys.iter().enumerate() {
            for (i, &xv) in grid.xs.iter().enumerate() {
                let v = grid.z[[j, i]];
                if v.is_finite() {
                    filled += 1;
                    assert_abs_diff_eq!(v, 3.0 * xv - 0.5 * yv + 1.0, epsilon = 1e-9);
                }
            }
        }
        assert!(grid.z[[12, 12]].is_finite());
        assert!(filled > 25 * 25 / 2);
        assert!(grid.z_range().is_some());
    }

    #[test]
    fn nodes_outside_hull_are_nan() {
        // Triangle covering the lower-left half of its bounding box.
        let pts = [
            Point3 { x: 0.0, y: 0.0, z: 0.0 },
            Point3 { x: 1.0, y: 0.0, z: 1.0 },
            Point3 { x: 0.0, y: 1.0, z: 2.0 },
        ];
        let grid = interpolate_grid(&pts, 11).unwrap();
        assert_abs_diff_eq!(grid.z[[0, 0]], 0.0, epsilon = 1e-12);
        assert_abs_diff_eq!(grid.z[[5, 5]], 1.5, epsilon = 1e-9);
        assert!(grid.z[[10, 10]].is_nan());
        assert!(grid.z[[9, 8]].is_nan());
    }

    #[test]
    fn distinct_counts_treat_equal_floats_once() {
        assert_eq!(distinct_count([1.0, 1.0, 2.0, 2.0]), 2);
        assert_eq!(distinct_count(Vec::<f64>::new()), 0);
    }

    #[test]
    fn slider_spans_times_minus_width() {
        let s = TimeSlider::new(&[2.0, f64::NAN, 5.0, 3.0], 1.0, 0.1).unwrap();
        assert_eq!((s.from, s.to), (2.0, 4.0));
        assert_eq!(s.count(), 21);
        assert_eq!(s.positions().len(), s.count());
        assert_abs_diff_eq!(s.advance(3.0), 3.1, epsilon = 1e-12);
        assert_eq!(s.advance(3.95), 2.0);

        let narrow = TimeSlider::new(&[0.0, 0.5], 1.0, 0.1).unwrap();
        assert_eq!((narrow.from, narrow.to), (0.0, 0.0));
        assert_eq!(narrow.positions(), vec![0.0]);
    }

    #[test]
    fn slider_rejects_empty_time_or_bad_step() {
        assert!(TimeSlider::new(&[f64::NAN], 1.0, 0.1).is_err());
        assert!(TimeSlider::new(&[0.0, 1.0], 1.0, 0.0).is_err());
    }

    #[test]
    fn slider_rejects_steps_with_too_many_positions() {
        let err = TimeSlider::new(&[0.0, 1.0e6], 1.0, 1.0e-9).unwrap_err();
        assert!(matches!(err, CdError::InvalidParameter(_)));
        let coarse = TimeSlider::new(&[0.0, 1.0e6], 1.0, 1.0).unwrap();
        assert_eq!(coarse.count(), 1_000_000);
    }
}
