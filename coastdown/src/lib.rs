//! Coastdown force fitting, energy/range estimation and time-windowed surface
//! framing for vehicle test logs.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use thiserror::Error;

pub mod colormap;
pub mod columns;
pub mod efficiency;
pub mod energy;
pub mod fit;
pub mod kinematics;
pub mod playback;
pub mod range;
pub mod road_load;
pub mod selection;
pub mod session;
pub mod surface;
pub mod table;
pub mod workbook;

pub use colormap::Colormap;
pub use columns::{ColumnMapping, ResolvedColumns, Semantic, MATCH_THRESHOLD};
pub use efficiency::EfficiencyCurve;
pub use energy::RangeSummary;
pub use fit::ForceFit;
pub use range::{compute_range, DerivedSeries, RangeRun};
pub use road_load::{PowerCorrection, RoadLoad};
pub use selection::RangeSelector;
pub use session::Session;
pub use surface::SurfaceFrame;
pub use table::{SampleTable, Value};

/// Standard gravity used to turn accelerometer readings in g into m/s².
pub const GRAVITY_MPS2: f64 = 9.81;

#[derive(Error, Debug)]
pub enum CdError {
    #[error("unsupported file format: {0}")]
    UnsupportedFormat(String),
    #[error("failed to read CSV: {0}")]
    Csv(String),
    #[error("workbook error: {0}")]
    Workbook(String),
    #[error("required columns not found: wanted {wanted:?}, available {available:?}")]
    MissingColumns {
        wanted: Vec<String>,
        available: Vec<String>,
    },
    #[error("column '{column}' row {row}: '{text}' is not numeric")]
    NonNumeric {
        column: String,
        row: usize,
        text: String,
    },
    #[error("insufficient data: {0}")]
    InsufficientData(String),
    #[error("invalid parameter: {0}")]
    InvalidParameter(String),
    #[error("timestamps do not advance at row {row}")]
    DegenerateTimestamps { row: usize },
    #[error("total distance is zero; consumption is undefined")]
    ZeroDistance,
    #[error("energy consumption is zero; range is undefined")]
    ZeroConsumption,
    #[error("{0} is not finite")]
    NonFinite(&'static str),
    #[error("force fit failed: {0}")]
    Fit(String),
    #[error("interpolation failed: {0}")]
    Interpolation(String),
}

impl From<csv::Error> for CdError {
    fn from(err: csv::Error) -> Self {
        CdError::Csv(err.to_string())
    }
}

/// Where the per-row acceleration feeding the inertia term comes from.
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum AccelSource {
    /// Measured acceleration when the acceleration column resolves, the speed
    /// derivative otherwise.
    Auto,
    /// Lagged time derivative of the speed trace.
    Derivative,
    /// Measured longitudinal acceleration (g), smoothed with a centered moving average.
    Measured,
}

impl Default for AccelSource {
    fn default() -> Self {
        AccelSource::Auto
    }
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct RangeParams {
    pub road_load: RoadLoad,
    pub vehicle_weight_kg: f64,
    pub rider_weight_kg: f64,
    pub battery_capacity_wh: f64,
    /// Sampling raster of the log. Recorded with the report, not used by the computation.
    pub raster_s: f64,
    pub smoothing_window: usize,
    pub accel_source: AccelSource,
    pub correction: PowerCorrection,
}

impl Default for RangeParams {
    fn default() -> Self {
        Self {
            road_load: RoadLoad::default(),
            vehicle_weight_kg: 138.0,
            rider_weight_kg: 75.0,
            battery_capacity_wh: 3965.0,
            raster_s: 1.0,
            smoothing_window: 5,
            accel_source: AccelSource::Auto,
            correction: PowerCorrection::default(),
        }
    }
}

impl RangeParams {
    pub fn total_mass_kg(&self) -> f64 {
        self.vehicle_weight_kg + self.rider_weight_kg
    }

    pub fn validate(&self) -> Result<(), CdError> {
        let scalars = [
            ("a", self.road_load.a),
            ("b", self.road_load.b),
            ("c", self.road_load.c),
            ("vehicle_weight_kg", self.vehicle_weight_kg),
            ("rider_weight_kg", self.rider_weight_kg),
            ("battery_capacity_wh", self.battery_capacity_wh),
            ("raster_s", self.raster_s),
            ("regime_boundary_s", self.correction.regime_boundary_s),
            ("idle_draw_w", self.correction.idle_draw_w),
        ];
        for (name, value) in scalars {
            if !value.is_finite() {
                return Err(CdError::InvalidParameter(format!("{name} must be finite")));
            }
        }
        if self.accel_source != AccelSource::Derivative && self.smoothing_window == 0 {
            return Err(CdError::InvalidParameter(
                "smoothing_window must be at least 1".into(),
            ));
        }
        Ok(())
    }

    /// SHA-256 over the JSON form of the parameter set, written into reports so
    /// two runs can be matched to the inputs that produced them.
    pub fn fingerprint(&self) -> Result<String, CdError> {
        let json = serde_json::to_vec(self)
            .map_err(|e| CdError::InvalidParameter(format!("unserializable params: {e}")))?;
        Ok(sha256_hex(&json))
    }
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct CoastdownParams {
    pub smoothing_window: usize,
    pub vehicle_weight_kg: f64,
    pub rider_weight_kg: f64,
}

impl Default for CoastdownParams {
    fn default() -> Self {
        Self {
            smoothing_window: 5,
            vehicle_weight_kg: 100.0,
            rider_weight_kg: 70.0,
        }
    }
}

impl CoastdownParams {
    pub fn total_mass_kg(&self) -> f64 {
        self.vehicle_weight_kg + self.rider_weight_kg
    }
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct SurfaceParams {
    pub time_window_s: f64,
    pub colormap: Colormap,
    pub step_s: f64,
    pub frame_delay_ms: u64,
    pub grid_size: usize,
}

impl Default for SurfaceParams {
    fn default() -> Self {
        Self {
            time_window_s: 1.0,
            colormap: Colormap::Viridis,
            step_s: 0.1,
            frame_delay_ms: 300,
            grid_size: 100,
        }
    }
}

fn sha256_hex(bytes: &[u8]) -> String {
    let digest = Sha256::digest(bytes);
    let mut out = String::with_capacity(digest.len() * 2);
    for b in digest {
        use std::fmt::Write;
        let _ = write!(&mut out, "{:02x}", b);
    }
    out
}
