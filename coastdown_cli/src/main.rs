use std::fs::{self, File};
use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use chrono::Utc;
use clap::{ArgAction, Parser, Subcommand, ValueEnum, ValueHint};
use coastdown::columns::Semantic;
use coastdown::playback::{CancelToken, Player};
use coastdown::surface::{build_frame, TimeSlider};
use coastdown::workbook::{self, InputKind};
use coastdown::{
    AccelSource, CoastdownParams, Colormap, ColumnMapping, EfficiencyCurve, RangeParams,
    RangeSelector, Session, SurfaceParams,
};
use serde::de::DeserializeOwned;
use serde_json::json;
use tracing::{debug, info, warn};
use tracing_subscriber::EnvFilter;

mod plot;

#[derive(Parser, Debug)]
#[command(author, version, about = "Coastdown force and range estimation CLI", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Estimate energy consumption and range from a dyno log and efficiency table
    Range(RangeArgs),
    /// Smooth a coastdown log, compute force and fit F = C·v² + A over a row span
    Coastdown(CoastdownArgs),
    /// Render time-windowed X/Y/Z surface frames
    Surface(SurfaceArgs),
}

#[derive(Parser, Debug)]
struct RangeArgs {
    /// Sample log (.xlsx/.xls/.ods workbook or .csv)
    #[arg(value_hint = ValueHint::FilePath)]
    samples: PathBuf,

    /// Sheet holding the samples
    #[arg(long, default_value = workbook::DEFAULT_SAMPLE_SHEET)]
    sheet: String,

    /// Efficiency table (defaults to the sample workbook)
    #[arg(long, value_hint = ValueHint::FilePath)]
    efficiency: Option<PathBuf>,

    /// Sheet holding the efficiency table
    #[arg(long, default_value = workbook::DEFAULT_EFFICIENCY_SHEET)]
    efficiency_sheet: String,

    /// Data rows to skip at the top of the efficiency table (units row)
    #[arg(long, default_value_t = 1)]
    efficiency_skip_rows: usize,

    /// JSON parameter file; flags below override its values
    #[arg(long, value_hint = ValueHint::FilePath)]
    config: Option<PathBuf>,

    /// Constant road-load coefficient a (N)
    #[arg(long)]
    coef_a: Option<f64>,

    /// Linear road-load coefficient b (N/(km/h))
    #[arg(long)]
    coef_b: Option<f64>,

    /// Quadratic road-load coefficient c (N/(km/h)²)
    #[arg(long)]
    coef_c: Option<f64>,

    /// Vehicle weight (kg)
    #[arg(long)]
    vehicle_weight: Option<f64>,

    /// Rider weight (kg)
    #[arg(long)]
    rider_weight: Option<f64>,

    /// Battery capacity (Wh)
    #[arg(long)]
    battery: Option<f64>,

    /// Sampling raster (s), recorded in the report
    #[arg(long)]
    raster: Option<f64>,

    /// Timestamp (s) where the power correction switches regime
    #[arg(long)]
    regime_boundary: Option<f64>,

    /// Power (W) assigned to zero-power rows past the regime boundary
    #[arg(long)]
    idle_draw: Option<f64>,

    /// Acceleration source: measured column when present (auto), speed derivative, or measured
    #[arg(long, value_enum)]
    accel_source: Option<AccelSourceOpt>,

    /// Moving-average window for measured acceleration
    #[arg(long)]
    smoothing_window: Option<usize>,

    /// Exact timestamp column name
    #[arg(long)]
    time_col: Option<String>,

    /// Exact speed column name
    #[arg(long)]
    speed_col: Option<String>,

    /// Exact acceleration column name
    #[arg(long)]
    accel_col: Option<String>,

    /// Output report workbook
    #[arg(short, long, default_value = "range_report.xlsx", value_hint = ValueHint::FilePath)]
    output: PathBuf,

    /// Speed-force PNG path (defaults next to the report)
    #[arg(long, value_hint = ValueHint::FilePath)]
    png: Option<PathBuf>,

    /// Disable plot generation
    #[arg(long, action = ArgAction::SetTrue)]
    no_plot: bool,

    /// Also export the processed rows as CSV
    #[arg(long, value_hint = ValueHint::FilePath)]
    csv: Option<PathBuf>,

    /// Write the summary and parameters as JSON
    #[arg(long, value_hint = ValueHint::FilePath)]
    summary_json: Option<PathBuf>,

    /// Verbose logging
    #[arg(long, action = ArgAction::SetTrue)]
    verbose: bool,
}

#[derive(Parser, Debug)]
struct CoastdownArgs {
    /// Coastdown log (.csv or workbook)
    #[arg(value_hint = ValueHint::FilePath)]
    input: PathBuf,

    /// Sheet to read when the input is a workbook
    #[arg(long, default_value = workbook::DEFAULT_SAMPLE_SHEET)]
    sheet: String,

    /// JSON parameter file; flags below override its values
    #[arg(long, value_hint = ValueHint::FilePath)]
    config: Option<PathBuf>,

    /// Moving-average window (rows)
    #[arg(long)]
    window: Option<usize>,

    /// Vehicle weight (kg)
    #[arg(long)]
    vehicle_weight: Option<f64>,

    /// Rider weight (kg)
    #[arg(long)]
    rider_weight: Option<f64>,

    /// Exact speed column name
    #[arg(long)]
    speed_col: Option<String>,

    /// Exact acceleration column name
    #[arg(long)]
    accel_col: Option<String>,

    /// First marker (row index)
    #[arg(long, default_value_t = 100.0)]
    from: f64,

    /// Second marker (row index)
    #[arg(long, default_value_t = 200.0)]
    to: f64,

    /// Processed CSV output (input columns plus smoothed acceleration and force)
    #[arg(short, long, value_hint = ValueHint::FilePath)]
    output: Option<PathBuf>,

    /// Column for the X axis of a line plot
    #[arg(long, requires = "plot_y")]
    plot_x: Option<String>,

    /// Column for the Y axis of a line plot
    #[arg(long, requires = "plot_x")]
    plot_y: Option<String>,

    /// Line plot PNG path
    #[arg(long, default_value = "plot.png", value_hint = ValueHint::FilePath)]
    plot: PathBuf,

    /// Speed trace PNG with the selection markers
    #[arg(long, value_hint = ValueHint::FilePath)]
    selector_png: Option<PathBuf>,

    /// Verbose logging
    #[arg(long, action = ArgAction::SetTrue)]
    verbose: bool,
}

#[derive(Parser, Debug)]
struct SurfaceArgs {
    /// Data log (.csv or workbook)
    #[arg(value_hint = ValueHint::FilePath)]
    input: PathBuf,

    /// Sheet to read when the input is a workbook
    #[arg(long, default_value = workbook::DEFAULT_SAMPLE_SHEET)]
    sheet: String,

    /// JSON parameter file; flags below override its values
    #[arg(long, value_hint = ValueHint::FilePath)]
    config: Option<PathBuf>,

    #[arg(long, default_value = "Time")]
    time_col: String,

    #[arg(long, default_value = "X")]
    x_col: String,

    #[arg(long, default_value = "Y")]
    y_col: String,

    #[arg(long, default_value = "Z")]
    z_col: String,

    /// Window width (s)
    #[arg(long)]
    window: Option<f64>,

    /// Colour map for surfaces and Z-coloured scatters
    #[arg(long, value_enum)]
    colormap: Option<ColormapOpt>,

    /// Slider step (s)
    #[arg(long)]
    step: Option<f64>,

    /// Delay between animation frames (ms)
    #[arg(long)]
    delay_ms: Option<u64>,

    /// Interpolation grid nodes per axis
    #[arg(long)]
    grid: Option<usize>,

    /// Window start (s); defaults to the earliest time
    #[arg(long)]
    at: Option<f64>,

    /// Single-frame PNG output
    #[arg(short, long, default_value = "surface.png", value_hint = ValueHint::FilePath)]
    output: PathBuf,

    /// Play through the slider, writing one PNG per frame
    #[arg(long, action = ArgAction::SetTrue)]
    animate: bool,

    /// Directory for animation frames
    #[arg(long, default_value = "frames", value_hint = ValueHint::DirPath)]
    frames_dir: PathBuf,

    /// Stop after this many frames (defaults to one pass over the slider)
    #[arg(long)]
    max_frames: Option<usize>,

    /// Verbose logging
    #[arg(long, action = ArgAction::SetTrue)]
    verbose: bool,
}

#[derive(Copy, Clone, Debug, ValueEnum)]
enum AccelSourceOpt {
    Auto,
    Derivative,
    Measured,
}

impl From<AccelSourceOpt> for AccelSource {
    fn from(value: AccelSourceOpt) -> Self {
        match value {
            AccelSourceOpt::Auto => AccelSource::Auto,
            AccelSourceOpt::Derivative => AccelSource::Derivative,
            AccelSourceOpt::Measured => AccelSource::Measured,
        }
    }
}

#[derive(Copy, Clone, Debug, ValueEnum)]
enum ColormapOpt {
    Viridis,
    Plasma,
    Inferno,
    Magma,
    Cividis,
}

impl From<ColormapOpt> for Colormap {
    fn from(value: ColormapOpt) -> Self {
        match value {
            ColormapOpt::Viridis => Colormap::Viridis,
            ColormapOpt::Plasma => Colormap::Plasma,
            ColormapOpt::Inferno => Colormap::Inferno,
            ColormapOpt::Magma => Colormap::Magma,
            ColormapOpt::Cividis => Colormap::Cividis,
        }
    }
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    let verbose = match &cli.command {
        Command::Range(args) => args.verbose,
        Command::Coastdown(args) => args.verbose,
        Command::Surface(args) => args.verbose,
    };
    let default_level = if verbose { "debug" } else { "info" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .try_init();

    match cli.command {
        Command::Range(args) => handle_range(args),
        Command::Coastdown(args) => handle_coastdown(args),
        Command::Surface(args) => handle_surface(args),
    }
}

fn load_config<T: DeserializeOwned + Default>(path: Option<&Path>) -> Result<T> {
    let Some(path) = path else {
        return Ok(T::default());
    };
    let text = fs::read_to_string(path)
        .with_context(|| format!("failed to read config {}", path.display()))?;
    let value = serde_json::from_str(&text)
        .with_context(|| format!("{} is not a valid parameter file", path.display()))?;
    debug!("Loaded parameters from {}", path.display());
    Ok(value)
}

fn apply_exact_columns(
    mut mapping: ColumnMapping,
    overrides: [(Semantic, Option<&String>); 3],
) -> ColumnMapping {
    for (semantic, name) in overrides {
        if let Some(name) = name {
            mapping = mapping.with_exact(semantic, name.as_str());
        }
    }
    mapping
}

fn handle_range(args: RangeArgs) -> Result<()> {
    let mut params: RangeParams = load_config(args.config.as_deref())?;
    if let Some(v) = args.coef_a {
        params.road_load.a = v;
    }
    if let Some(v) = args.coef_b {
        params.road_load.b = v;
    }
    if let Some(v) = args.coef_c {
        params.road_load.c = v;
    }
    if let Some(v) = args.vehicle_weight {
        params.vehicle_weight_kg = v;
    }
    if let Some(v) = args.rider_weight {
        params.rider_weight_kg = v;
    }
    if let Some(v) = args.battery {
        params.battery_capacity_wh = v;
    }
    if let Some(v) = args.raster {
        params.raster_s = v;
    }
    if let Some(v) = args.regime_boundary {
        params.correction.regime_boundary_s = v;
    }
    if let Some(v) = args.idle_draw {
        params.correction.idle_draw_w = v;
    }
    if let Some(v) = args.smoothing_window {
        params.smoothing_window = v;
    }
    if let Some(v) = args.accel_source {
        params.accel_source = v.into();
    }

    let mut mapping = apply_exact_columns(
        ColumnMapping::range_defaults(),
        [
            (Semantic::Timestamp, args.time_col.as_ref()),
            (Semantic::Speed, args.speed_col.as_ref()),
            (Semantic::Acceleration, args.accel_col.as_ref()),
        ],
    );
    if params.accel_source == AccelSource::Measured {
        mapping = mapping.with_required(Semantic::Acceleration, true);
    }

    let mut session = Session::new(mapping);
    let columns = session
        .load_path(&args.samples, &args.sheet)
        .with_context(|| format!("failed to load samples from {}", args.samples.display()))?
        .clone();
    info!(
        "Loaded {} rows from {} (time: {}, speed: {})",
        session.table().map_or(0, |t| t.len()),
        args.samples.display(),
        columns.timestamp.as_deref().unwrap_or("-"),
        columns.speed.as_deref().unwrap_or("-"),
    );

    let eff_path = match (&args.efficiency, workbook::input_kind(&args.samples)?) {
        (Some(path), _) => path.clone(),
        (None, InputKind::Spreadsheet) => args.samples.clone(),
        (None, InputKind::Csv) => {
            return Err(anyhow!("--efficiency is required when samples come from CSV"))
        }
    };
    let eff_table = workbook::load_table(&eff_path, &args.efficiency_sheet).with_context(|| {
        format!(
            "failed to load efficiency table from {} ({})",
            eff_path.display(),
            args.efficiency_sheet
        )
    })?;
    let efficiency = EfficiencyCurve::from_table(&eff_table, args.efficiency_skip_rows)
        .context("invalid efficiency table")?;
    debug!("Efficiency curve with {} points", efficiency.len());

    let run = session
        .run_range(&efficiency, &params)
        .context("range computation failed")?;
    for (label, value) in run.summary.metrics() {
        info!("{}: {:.2}", label, value);
    }

    let mut image: Option<PathBuf> = None;
    if !args.no_plot {
        let png_path = args.png.clone().unwrap_or_else(|| {
            let mut p = args.output.clone();
            p.set_extension("png");
            p
        });
        let (lo, hi) = run.speed_span_kmh;
        let curve = params.road_load.curve(lo, hi, 100);
        match plot::render_guard(|| plot::speed_force_chart(&png_path, &curve)) {
            Ok(()) => {
                info!("Wrote plot: {}", png_path.display());
                image = Some(png_path);
            }
            Err(err) => warn!("Skipping PNG render ({}): {}", png_path.display(), err),
        }
    }

    workbook::write_report(&args.output, run, &params, image.as_deref())
        .with_context(|| format!("failed to write report {}", args.output.display()))?;
    info!("Wrote report: {}", args.output.display());

    if let Some(path) = args.csv.as_ref() {
        workbook::export_csv(path, &run.table)
            .with_context(|| format!("failed to write {}", path.display()))?;
        info!("Wrote processed CSV: {}", path.display());
    }

    if let Some(path) = args.summary_json.as_ref() {
        let doc = json!({
            "generated_at": Utc::now().to_rfc3339(),
            "samples": args.samples.display().to_string(),
            "summary": run.summary,
            "parameters": params,
            "fingerprint": params.fingerprint()?,
        });
        let file =
            File::create(path).with_context(|| format!("failed to create {}", path.display()))?;
        serde_json::to_writer_pretty(file, &doc)
            .with_context(|| format!("failed to write {}", path.display()))?;
        info!("Wrote summary JSON: {}", path.display());
    }

    Ok(())
}

fn handle_coastdown(args: CoastdownArgs) -> Result<()> {
    let mut params: CoastdownParams = load_config(args.config.as_deref())?;
    if let Some(v) = args.window {
        params.smoothing_window = v;
    }
    if let Some(v) = args.vehicle_weight {
        params.vehicle_weight_kg = v;
    }
    if let Some(v) = args.rider_weight {
        params.rider_weight_kg = v;
    }

    let mapping = apply_exact_columns(
        ColumnMapping::coastdown_defaults(),
        [
            (Semantic::Timestamp, None),
            (Semantic::Speed, args.speed_col.as_ref()),
            (Semantic::Acceleration, args.accel_col.as_ref()),
        ],
    );
    let mut session = Session::new(mapping);
    let columns = session
        .load_path(&args.input, &args.sheet)
        .with_context(|| format!("failed to load {}", args.input.display()))?
        .clone();
    info!(
        "Loaded {} rows. Matched columns: speed {}, accel {}",
        session.table().map_or(0, |t| t.len()),
        columns.speed.as_deref().unwrap_or("-"),
        columns.acceleration.as_deref().unwrap_or("-"),
    );

    session
        .smooth_and_calculate(&params)
        .context("smoothing and force calculation failed")?;
    info!(
        "Smoothed acceleration over {} rows, mass {:.1} kg",
        params.smoothing_window,
        params.total_mass_kg()
    );

    *session.selector_mut() = RangeSelector::new(args.from, args.to);
    let readout = session.readout_text()?;
    for line in readout.lines() {
        info!("{}", line);
    }
    let fit = session.fit_selection().context("force curve fit failed")?;
    info!("Fitted rows {}..={} ({} samples)", fit.start, fit.end, fit.samples);
    println!("{}", fit.report());

    let table = session
        .table()
        .ok_or_else(|| anyhow!("no table loaded"))?;
    if let Some(path) = args.output.as_ref() {
        workbook::export_csv(path, table)
            .with_context(|| format!("failed to write {}", path.display()))?;
        info!("Wrote processed CSV: {}", path.display());
    }

    if let (Some(x_col), Some(y_col)) = (args.plot_x.as_ref(), args.plot_y.as_ref()) {
        let x = table
            .lossy_column(x_col)
            .with_context(|| format!("unknown column '{}'", x_col))?;
        let y = table
            .lossy_column(y_col)
            .with_context(|| format!("unknown column '{}'", y_col))?;
        match plot::render_guard(|| plot::line_chart(&args.plot, &x, &y, x_col, y_col)) {
            Ok(()) => info!("Wrote plot: {}", args.plot.display()),
            Err(err) => warn!("Skipping PNG render ({}): {}", args.plot.display(), err),
        }
    }

    if let Some(path) = args.selector_png.as_ref() {
        let speed = session.speed_series()?;
        let markers = session.selector().markers();
        match plot::render_guard(|| plot::speed_selector_chart(path, &speed, markers, &readout)) {
            Ok(()) => info!("Wrote plot: {}", path.display()),
            Err(err) => warn!("Skipping PNG render ({}): {}", path.display(), err),
        }
    }

    Ok(())
}

fn handle_surface(args: SurfaceArgs) -> Result<()> {
    let mut params: SurfaceParams = load_config(args.config.as_deref())?;
    if let Some(v) = args.window {
        params.time_window_s = v;
    }
    if let Some(v) = args.colormap {
        params.colormap = v.into();
    }
    if let Some(v) = args.step {
        params.step_s = v;
    }
    if let Some(v) = args.delay_ms {
        params.frame_delay_ms = v;
    }
    if let Some(v) = args.grid {
        params.grid_size = v;
    }

    let table = workbook::load_table(&args.input, &args.sheet)
        .with_context(|| format!("failed to load {}", args.input.display()))?;
    let column = |name: &str| {
        table
            .numeric_column(name)
            .with_context(|| format!("column '{}' could not be read", name))
    };
    let time = column(&args.time_col)?;
    let x = column(&args.x_col)?;
    let y = column(&args.y_col)?;
    let z = column(&args.z_col)?;

    let slider = TimeSlider::new(&time, params.time_window_s, params.step_s)?;
    info!(
        "Loaded {} rows; window starts {:.2}..{:.2} s, step {} s, colormap {}",
        table.len(),
        slider.from,
        slider.to,
        slider.step,
        params.colormap
    );

    let labels = plot::AxisLabels {
        x: &args.x_col,
        y: &args.y_col,
        z: &args.z_col,
    };
    let render = |t0: f64, path: &Path| -> Result<()> {
        let frame = build_frame(&time, &x, &y, &z, t0, params.time_window_s, params.grid_size)?;
        debug!(title = %frame.title(), note = ?frame.note(), "frame built");
        if let Err(err) =
            plot::render_guard(|| plot::surface_chart(path, &frame, params.colormap, &labels))
        {
            warn!("Skipping PNG render ({}): {}", path.display(), err);
        }
        Ok(())
    };

    if args.animate {
        fs::create_dir_all(&args.frames_dir)
            .with_context(|| format!("failed to create {}", args.frames_dir.display()))?;
        let mut player = Player::new(slider);
        if let Some(at) = args.at {
            player.seek(at);
        }
        let token = CancelToken::new();
        let max_frames = args.max_frames.unwrap_or_else(|| slider.count());
        let mut index = 0usize;
        let frames = player.run(
            &token,
            Duration::from_millis(params.frame_delay_ms),
            Some(max_frames),
            |t0| {
                let path = args.frames_dir.join(format!("frame_{:04}.png", index));
                index += 1;
                render(t0, &path)
            },
        )?;
        info!("Wrote {} frames to {}", frames, args.frames_dir.display());
    } else {
        let t0 = args
            .at
            .map_or(slider.from, |t| t.clamp(slider.from, slider.to));
        render(t0, &args.output)?;
        info!("Wrote frame: {}", args.output.display());
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn flags_parse_into_subcommands() {
        let cli = Cli::try_parse_from([
            "coastdown-cli",
            "surface",
            "log.csv",
            "--colormap",
            "magma",
            "--window",
            "2.5",
        ])
        .unwrap();
        match cli.command {
            Command::Surface(args) => {
                assert_eq!(Colormap::from(args.colormap.unwrap()), Colormap::Magma);
                assert_eq!(args.window, Some(2.5));
                assert_eq!(args.time_col, "Time");
            }
            other => panic!("unexpected command {other:?}"),
        }
        assert!(Cli::try_parse_from(["coastdown-cli", "surface", "log.csv", "--colormap", "jet"])
            .is_err());
    }

    #[test]
    fn accel_source_flag_overrides_default() {
        let cli = Cli::try_parse_from([
            "coastdown-cli",
            "range",
            "log.xlsx",
            "--accel-source",
            "derivative",
        ])
        .unwrap();
        match cli.command {
            Command::Range(args) => {
                assert_eq!(AccelSource::from(args.accel_source.unwrap()), AccelSource::Derivative);
            }
            other => panic!("unexpected command {other:?}"),
        }
        assert!(Cli::try_parse_from(["coastdown-cli", "range", "log.xlsx", "--accel-source", "gps"])
            .is_err());
    }

    #[test]
    fn missing_config_gives_defaults() {
        let params: RangeParams = load_config(None).unwrap();
        assert_eq!(params, RangeParams::default());
    }

    #[test]
    fn config_file_values_are_kept() {
        let path = std::env::temp_dir().join(format!("coastdown-cli-{}.json", std::process::id()));
        fs::write(&path, r#"{"smoothing_window": 9, "rider_weight_kg": 80.0}"#).unwrap();
        let params: CoastdownParams = load_config(Some(&path)).unwrap();
        assert_eq!(params.smoothing_window, 9);
        assert_eq!(params.vehicle_weight_kg, 100.0);
        let _ = fs::remove_file(path);
    }

    #[test]
    fn exact_column_overrides_apply() {
        let speed = "v_kmh".to_string();
        let mapping = apply_exact_columns(
            ColumnMapping::range_defaults(),
            [
                (Semantic::Timestamp, None),
                (Semantic::Speed, Some(&speed)),
                (Semantic::Acceleration, None),
            ],
        );
        assert_eq!(mapping.speed.exact.as_deref(), Some("v_kmh"));
        assert!(mapping.timestamp.exact.is_none());
    }
}
