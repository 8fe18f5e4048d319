use serde::{Deserialize, Serialize};

/// Road-load polynomial `F(v) = a + b·v + c·v²`, speed in km/h, force in N.
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq)]
pub struct RoadLoad {
    pub a: f64,
    pub b: f64,
    pub c: f64,
}

impl Default for RoadLoad {
    fn default() -> Self {
        Self {
            a: 36.078,
            b: 0.1727,
            c: -0.0028,
        }
    }
}

impl RoadLoad {
    pub fn force(&self, speed_kmh: f64) -> f64 {
        self.a + self.b * speed_kmh + self.c * speed_kmh * speed_kmh
    }

    /// Road load plus the inertial term `m·dv/dt` (mass in kg, dv/dt in m/s²).
    pub fn force_with_inertia(&self, speed_kmh: f64, mass_kg: f64, accel_mps2: f64) -> f64 {
        self.force(speed_kmh) + mass_kg * accel_mps2
    }

    /// Evenly spaced `(speed, force)` samples over `[min_kmh, max_kmh]`, no inertia.
    pub fn curve(&self, min_kmh: f64, max_kmh: f64, points: usize) -> Vec<(f64, f64)> {
        match points {
            0 => Vec::new(),
            1 => vec![(min_kmh, self.force(min_kmh))],
            _ => {
                let step = (max_kmh - min_kmh) / (points - 1) as f64;
                (0..points)
                    .map(|i| {
                        let v = min_kmh + step * i as f64;
                        (v, self.force(v))
                    })
                    .collect()
            }
        }
    }
}

/// Tractive power in W from force (N) and speed (m/s).
pub fn power(force_n: f64, speed_mps: f64) -> f64 {
    force_n * speed_mps
}

/// Battery-side power from wheel power and drivetrain efficiency.
///
/// Before `regime_boundary_s` every sample is a draw (`|P| / η`). From the
/// boundary on, negative power is recuperated (`P·η`), exactly zero power
/// costs `idle_draw_w`, and positive power is a draw (`P / η`).
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct PowerCorrection {
    pub regime_boundary_s: f64,
    pub idle_draw_w: f64,
}

impl Default for PowerCorrection {
    fn default() -> Self {
        Self {
            regime_boundary_s: 700.0,
            idle_draw_w: 32.0,
        }
    }
}

impl PowerCorrection {
    pub fn apply(&self, timestamp_s: f64, power_w: f64, efficiency: f64) -> f64 {
        if timestamp_s < self.regime_boundary_s {
            power_w.abs() / efficiency
        } else if power_w < 0.0 {
            power_w * efficiency
        } else if power_w == 0.0 {
            self.idle_draw_w
        } else {
            power_w / efficiency
        }
    }
}
