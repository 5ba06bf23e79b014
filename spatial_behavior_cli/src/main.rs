use std::collections::BTreeMap;
use std::fs::{self, File};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::time::Instant;

use anyhow::{anyhow, Context, Result};
use clap::{ArgAction, Args, Parser, Subcommand, ValueEnum, ValueHint};
use rayon::prelude::*;
use serde::Serialize;
use spatial_behavior::activity::{classify_all, ActivityReport, ActivitySummary, HourlyActivity};
use spatial_behavior::home_range::{estimate_outcome, list_methods, ZoneReport};
use spatial_behavior::quality::analyze_all;
use spatial_behavior::track::{
    daily_distances, monthly_movement, nsd_by_window, speed_summary, track_summary,
    DailyDistance, MonthlyMovement, NsdWindow, SpeedSummary, TrackSummary, WindowedNsd,
};
use spatial_behavior::{
    analyze_quality, classify_activity, core_peripheral_zones, estimate_all, parse_track_set,
    prepare, AnalysisConfig, HomeRangeMethod, McpSubsample, PreparedTrack, QualityReport,
    RangeOutcome, TrackSet,
};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(author, version, about = "Spatial behaviour analytics for animal GPS tracks", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Sort fixes and annotate step distance, time delta and speed
    Prepare(PrepareArgs),
    /// Classify fixes as active/resting and aggregate by hour of day
    Activity(ActivityArgs),
    /// Assess fix success, outages and sampling completeness
    Quality(QualityArgs),
    /// Estimate home-range isopleths per individual
    HomeRange(HomeRangeArgs),
    /// Run every analysis and write one JSON document
    Report(ReportArgs),
    /// List the available home-range methods
    Methods,
}

#[derive(Args, Debug)]
struct CommonArgs {
    /// CSV/GPX files to ingest
    #[arg(required = true, value_hint = ValueHint::FilePath)]
    inputs: Vec<PathBuf>,

    /// Output path (`-` for stdout)
    #[arg(short, long, default_value = "-", value_hint = ValueHint::FilePath)]
    output: PathBuf,

    /// JSON analysis config; flags below override its fields
    #[arg(long, value_hint = ValueHint::FilePath)]
    config: Option<PathBuf>,

    /// Verbose logging
    #[arg(long, action = ArgAction::SetTrue)]
    verbose: bool,

    /// Log stage timings
    #[arg(long, action = ArgAction::SetTrue)]
    profile: bool,
}

#[derive(Copy, Clone, Debug, Default, ValueEnum)]
enum OutputFormat {
    #[default]
    Json,
    Csv,
}

#[derive(Args, Debug)]
struct ActivityFlags {
    /// Step distance (km) above which a fix counts as active
    #[arg(long)]
    activity_threshold: Option<f64>,

    /// Longest gap (minutes) a step may take and still count as active
    #[arg(long)]
    time_window: Option<f64>,
}

#[derive(Args, Debug)]
struct QualityFlags {
    /// Expected minutes between fixes (inferred when omitted)
    #[arg(long)]
    expected_interval: Option<f64>,

    /// Speed (km/h) above which fixes are reported as outliers
    #[arg(long)]
    speed_outlier: Option<f64>,
}

#[derive(Args, Debug)]
struct HomeRangeFlags {
    /// Home-range method
    #[arg(long, value_enum)]
    method: Option<MethodOpt>,

    /// Percentage levels (comma separated, each in 1..=100)
    #[arg(long, value_delimiter = ',')]
    levels: Option<Vec<u32>>,

    /// Grid resolution per axis for KDE/BBMM
    #[arg(long)]
    grid_size: Option<usize>,

    /// KDE bandwidth factor (Scott's rule when omitted)
    #[arg(long)]
    bandwidth: Option<f64>,

    /// Seed for MCP random subsampling
    #[arg(long, conflicts_with = "centroid_trim")]
    seed: Option<u64>,

    /// Trim MCP by distance from the centroid instead of random subsampling
    #[arg(long, action = ArgAction::SetTrue)]
    centroid_trim: bool,

    /// Ignore timestamps in T-LoCoH neighbour search
    #[arg(long, action = ArgAction::SetTrue)]
    no_time: bool,
}

#[derive(Copy, Clone, Debug, ValueEnum)]
enum MethodOpt {
    Mcp,
    Kde,
    Bbmm,
    Locoht,
}

impl From<MethodOpt> for HomeRangeMethod {
    fn from(value: MethodOpt) -> Self {
        match value {
            MethodOpt::Mcp => HomeRangeMethod::Mcp,
            MethodOpt::Kde => HomeRangeMethod::Kde,
            MethodOpt::Bbmm => HomeRangeMethod::Bbmm,
            MethodOpt::Locoht => HomeRangeMethod::Locoh,
        }
    }
}

#[derive(Parser, Debug)]
struct PrepareArgs {
    #[command(flatten)]
    common: CommonArgs,

    #[arg(long, value_enum, default_value_t = OutputFormat::Csv)]
    format: OutputFormat,
}

#[derive(Parser, Debug)]
struct ActivityArgs {
    #[command(flatten)]
    common: CommonArgs,

    #[command(flatten)]
    flags: ActivityFlags,

    #[arg(long, value_enum, default_value_t = OutputFormat::Json)]
    format: OutputFormat,

    /// With `--format csv`, write the hourly table instead of per-fix rows
    #[arg(long, action = ArgAction::SetTrue)]
    hourly: bool,
}

#[derive(Parser, Debug)]
struct QualityArgs {
    #[command(flatten)]
    common: CommonArgs,

    #[command(flatten)]
    flags: QualityFlags,
}

#[derive(Parser, Debug)]
struct HomeRangeArgs {
    #[command(flatten)]
    common: CommonArgs,

    #[command(flatten)]
    flags: HomeRangeFlags,
}

#[derive(Parser, Debug)]
struct ReportArgs {
    #[command(flatten)]
    common: CommonArgs,

    #[command(flatten)]
    activity: ActivityFlags,

    #[command(flatten)]
    quality: QualityFlags,

    #[command(flatten)]
    home_range: HomeRangeFlags,

    /// Add KDE core (50%) and peripheral (95%) zones
    #[arg(long, action = ArgAction::SetTrue)]
    zones: bool,
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    let verbose = match &cli.command {
        Command::Prepare(args) => args.common.verbose,
        Command::Activity(args) => args.common.verbose,
        Command::Quality(args) => args.common.verbose,
        Command::HomeRange(args) => args.common.verbose,
        Command::Report(args) => args.common.verbose,
        Command::Methods => false,
    };
    let default_level = if verbose { "debug" } else { "info" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .try_init();

    match cli.command {
        Command::Prepare(args) => handle_prepare(args),
        Command::Activity(args) => handle_activity(args),
        Command::Quality(args) => handle_quality(args),
        Command::HomeRange(args) => handle_home_range(args),
        Command::Report(args) => handle_report(args),
        Command::Methods => write_json(Path::new("-"), &list_methods()),
    }
}

/// Timer that logs a stage duration when profiling is on.
struct Stage {
    name: &'static str,
    started: Instant,
    enabled: bool,
}

impl Stage {
    fn start(name: &'static str, common: &CommonArgs) -> Self {
        Self {
            name,
            started: Instant::now(),
            enabled: common.profile || common.verbose,
        }
    }

    fn finish(self, detail: impl std::fmt::Display) {
        if self.enabled {
            info!(
                "{} stage: {:.1} ms ({})",
                self.name,
                self.started.elapsed().as_secs_f64() * 1000.0,
                detail
            );
        }
    }
}

fn load_tracks(common: &CommonArgs) -> Result<Vec<PreparedTrack>> {
    let stage = Stage::start("Parse", common);
    let mut parsed: Vec<(usize, TrackSet)> = common
        .inputs
        .par_iter()
        .enumerate()
        .map(|(idx, path)| -> Result<(usize, TrackSet)> {
            let data =
                fs::read(path).with_context(|| format!("failed to read {}", path.display()))?;
            let hint = path
                .extension()
                .and_then(|ext| ext.to_str())
                .unwrap_or("csv");
            let set = parse_track_set(&data, hint)
                .with_context(|| format!("failed to parse {}", path.display()))?;
            Ok((idx, set))
        })
        .collect::<Result<Vec<_>>>()?;
    // restore input order
    parsed.sort_by_key(|(idx, _)| *idx);
    let set = TrackSet::merge(parsed.into_iter().map(|(_, s)| s));
    if set.is_empty() {
        return Err(anyhow!("no fixes found in the supplied inputs"));
    }
    stage.finish(format!("{} individuals, {} fixes", set.len(), set.total_fixes()));

    let stage = Stage::start("Prepare", common);
    let prepared = prepare(&set);
    stage.finish(format!("{} tracks", prepared.len()));
    Ok(prepared)
}

fn load_config(common: &CommonArgs) -> Result<AnalysisConfig> {
    match common.config.as_ref() {
        Some(path) => AnalysisConfig::from_path(path)
            .with_context(|| format!("failed to load config {}", path.display())),
        None => Ok(AnalysisConfig::default()),
    }
}

fn apply_activity(config: &mut AnalysisConfig, flags: &ActivityFlags) {
    if let Some(v) = flags.activity_threshold {
        config.activity.activity_threshold_km = v;
    }
    if let Some(v) = flags.time_window {
        config.activity.time_window_min = v;
    }
}

fn apply_quality(config: &mut AnalysisConfig, flags: &QualityFlags) {
    if flags.expected_interval.is_some() {
        config.quality.expected_interval_min = flags.expected_interval;
    }
    if let Some(v) = flags.speed_outlier {
        config.quality.speed_outlier_kmh = v;
    }
}

fn apply_home_range(config: &mut AnalysisConfig, flags: &HomeRangeFlags) {
    let params = &mut config.home_range;
    if let Some(method) = flags.method {
        params.method = method.into();
    }
    if let Some(levels) = flags.levels.as_ref() {
        params.percentage_levels = levels.clone();
    }
    if let Some(size) = flags.grid_size {
        params.grid_size = size;
    }
    if flags.bandwidth.is_some() {
        params.bandwidth = flags.bandwidth;
    }
    if flags.centroid_trim {
        params.mcp_subsample = McpSubsample::CentroidDistance;
    } else if flags.seed.is_some() {
        params.mcp_subsample = McpSubsample::Random { seed: flags.seed };
    }
    if flags.no_time {
        params.locoh_use_time = false;
    }
}

fn validated(config: AnalysisConfig) -> Result<AnalysisConfig> {
    config.validate().context("invalid analysis parameters")?;
    Ok(config)
}

fn handle_prepare(args: PrepareArgs) -> Result<()> {
    let tracks = load_tracks(&args.common)?;
    match args.format {
        OutputFormat::Json => write_json(&args.common.output, &tracks)?,
        OutputFormat::Csv => {
            write_csv(&args.common.output, |writer| write_prepared_rows(&tracks, writer))?
        }
    }
    log_written(&args.common.output);
    Ok(())
}

fn handle_activity(args: ActivityArgs) -> Result<()> {
    let mut config = load_config(&args.common)?;
    apply_activity(&mut config, &args.flags);
    let config = validated(config)?;
    let tracks = load_tracks(&args.common)?;

    let stage = Stage::start("Activity", &args.common);
    let reports = classify_all(&tracks, &config.activity);
    stage.finish(format!("{} individuals", reports.len()));
    for report in &reports {
        info!(
            "{}: {:.1}% active ({:.1}% by day, {:.1}% by night)",
            report.individual,
            report.summary.active_pct,
            report.summary.day_active_pct,
            report.summary.night_active_pct
        );
    }

    match (args.format, args.hourly) {
        (OutputFormat::Json, _) => write_json(&args.common.output, &reports)?,
        (OutputFormat::Csv, false) => {
            write_csv(&args.common.output, |w| write_activity_rows(&reports, w))?
        }
        (OutputFormat::Csv, true) => {
            write_csv(&args.common.output, |w| write_hourly_rows(&reports, w))?
        }
    }
    log_written(&args.common.output);
    Ok(())
}

fn handle_quality(args: QualityArgs) -> Result<()> {
    let mut config = load_config(&args.common)?;
    apply_quality(&mut config, &args.flags);
    let config = validated(config)?;
    let tracks = load_tracks(&args.common)?;

    let stage = Stage::start("Quality", &args.common);
    let reports = analyze_all(&tracks, &config.quality);
    stage.finish(format!("{} individuals", reports.len()));
    for report in &reports {
        let s = &report.summary;
        info!(
            "{}: fix success {:.1}%, {} outages, interval {} min{}",
            report.individual,
            s.fix_success_rate,
            s.total_outages,
            s.expected_interval_min,
            if s.interval_inferred { " (inferred)" } else { "" }
        );
    }
    write_json(&args.common.output, &reports)?;
    log_written(&args.common.output);
    Ok(())
}

fn handle_home_range(args: HomeRangeArgs) -> Result<()> {
    let mut config = load_config(&args.common)?;
    apply_home_range(&mut config, &args.flags);
    let config = validated(config)?;
    let tracks = load_tracks(&args.common)?;

    let stage = Stage::start("Home range", &args.common);
    let outcomes = estimate_all(&tracks, &config.home_range);
    stage.finish(format!(
        "{} on {} individuals",
        config.home_range.method.id(),
        outcomes.len()
    ));
    log_outcomes(&outcomes);

    let document = HomeRangeDocument {
        method: config.home_range.method.id(),
        percentage_levels: config.home_range.levels(),
        results: outcomes,
    };
    write_json(&args.common.output, &document)?;
    log_written(&args.common.output);
    Ok(())
}

#[derive(Serialize)]
struct HomeRangeDocument {
    method: &'static str,
    percentage_levels: Vec<u32>,
    results: BTreeMap<String, RangeOutcome>,
}

#[derive(Serialize)]
struct IndividualReport {
    summary: TrackSummary,
    speed: Option<SpeedSummary>,
    daily_distances: Vec<DailyDistance>,
    monthly_movement: Vec<MonthlyMovement>,
    nsd: BTreeMap<NsdWindow, Vec<WindowedNsd>>,
    activity: ActivityDigest,
    quality: Option<QualityReport>,
    home_range: RangeOutcome,
    #[serde(skip_serializing_if = "Option::is_none")]
    zones: Option<ZoneOutcome>,
}

#[derive(Serialize)]
struct ActivityDigest {
    summary: ActivitySummary,
    hourly: Vec<HourlyActivity>,
}

#[derive(Serialize)]
#[serde(untagged)]
enum ZoneOutcome {
    Zones(Box<ZoneReport>),
    Error { error: String },
}

#[derive(Serialize)]
struct ReportDocument {
    config: AnalysisConfig,
    individuals: BTreeMap<String, IndividualReport>,
}

fn handle_report(args: ReportArgs) -> Result<()> {
    let mut config = load_config(&args.common)?;
    apply_activity(&mut config, &args.activity);
    apply_quality(&mut config, &args.quality);
    apply_home_range(&mut config, &args.home_range);
    let config = validated(config)?;
    let tracks = load_tracks(&args.common)?;

    let stage = Stage::start("Report", &args.common);
    let individuals: BTreeMap<String, IndividualReport> = tracks
        .par_iter()
        .map(|track| (track.key(), build_report(track, &config, args.zones)))
        .collect();
    stage.finish(format!("{} individuals", individuals.len()));
    let outcomes: BTreeMap<String, RangeOutcome> = individuals
        .iter()
        .map(|(k, r)| (k.clone(), r.home_range.clone()))
        .collect();
    log_outcomes(&outcomes);

    write_json(
        &args.common.output,
        &ReportDocument {
            config,
            individuals,
        },
    )?;
    log_written(&args.common.output);
    Ok(())
}

fn build_report(track: &PreparedTrack, config: &AnalysisConfig, zones: bool) -> IndividualReport {
    let ActivityReport {
        summary, hourly, ..
    } = classify_activity(track, &config.activity);
    let zones = zones.then(|| {
        match core_peripheral_zones(track, 50, 95, &config.home_range) {
            Ok(report) => ZoneOutcome::Zones(Box::new(report)),
            Err(err) => {
                warn!("zones for {} failed: {}", track.key(), err);
                ZoneOutcome::Error {
                    error: err.to_string(),
                }
            }
        }
    });
    IndividualReport {
        summary: track_summary(track),
        speed: speed_summary(track),
        daily_distances: daily_distances(track),
        monthly_movement: monthly_movement(track),
        nsd: NsdWindow::ALL
            .iter()
            .map(|&window| (window, nsd_by_window(track, window)))
            .collect(),
        activity: ActivityDigest { summary, hourly },
        quality: analyze_quality(track, &config.quality),
        home_range: estimate_outcome(track, &config.home_range),
        zones,
    }
}

fn log_outcomes(outcomes: &BTreeMap<String, RangeOutcome>) {
    for (individual, outcome) in outcomes {
        match outcome {
            RangeOutcome::Levels(levels) => {
                let areas: Vec<String> = levels
                    .iter()
                    .map(|(level, iso)| format!("{}%={:.3} km2", level, iso.area_km2))
                    .collect();
                info!("{}: {}", individual, areas.join(", "));
            }
            RangeOutcome::Error { error } => warn!("{}: {}", individual, error),
        }
    }
}

fn log_written(path: &Path) {
    if path.as_os_str() != "-" {
        info!("Wrote {}", path.display());
    }
}

fn open_output(path: &Path) -> Result<Box<dyn Write>> {
    if path.as_os_str() == "-" {
        Ok(Box::new(io::stdout().lock()))
    } else {
        let file =
            File::create(path).with_context(|| format!("failed to create {}", path.display()))?;
        Ok(Box::new(io::BufWriter::new(file)))
    }
}

fn write_json<T: Serialize + ?Sized>(path: &Path, value: &T) -> Result<()> {
    let mut out = open_output(path)?;
    serde_json::to_writer_pretty(&mut out, value)
        .with_context(|| format!("failed to write JSON to {}", path.display()))?;
    writeln!(out)?;
    out.flush()?;
    Ok(())
}

fn write_csv<F>(path: &Path, rows: F) -> Result<()>
where
    F: FnOnce(&mut csv::Writer<Box<dyn Write>>) -> Result<()>,
{
    let mut writer = csv::Writer::from_writer(open_output(path)?);
    rows(&mut writer)?;
    writer.flush()?;
    Ok(())
}

fn write_prepared_rows<W: Write>(tracks: &[PreparedTrack], writer: &mut csv::Writer<W>) -> Result<()> {
    writer.write_record([
        "individual_id",
        "timestamp",
        "location_lat",
        "location_long",
        "step_distance_m",
        "time_delta_min",
        "speed_kmh",
    ])?;
    for track in tracks {
        let key = track.key();
        for p in &track.points {
            writer.write_record([
                key.clone(),
                p.timestamp.to_rfc3339(),
                format!("{:.6}", p.latitude),
                format!("{:.6}", p.longitude),
                format!("{:.3}", p.step_distance_m),
                format!("{:.3}", p.time_delta_min),
                format!("{:.3}", p.speed_kmh),
            ])?;
        }
    }
    Ok(())
}

fn write_activity_rows<W: Write>(
    reports: &[ActivityReport],
    writer: &mut csv::Writer<W>,
) -> Result<()> {
    writer.write_record([
        "individual_id",
        "timestamp",
        "location_lat",
        "location_long",
        "step_distance_m",
        "speed_kmh",
        "is_active",
        "hour_of_day",
        "is_daytime",
    ])?;
    for report in reports {
        for f in &report.fixes {
            writer.write_record([
                report.individual.clone(),
                f.timestamp.to_rfc3339(),
                format!("{:.6}", f.latitude),
                format!("{:.6}", f.longitude),
                format!("{:.3}", f.step_distance_m),
                format!("{:.3}", f.speed_kmh),
                f.is_active.to_string(),
                f.hour_of_day.to_string(),
                f.is_daytime.to_string(),
            ])?;
        }
    }
    Ok(())
}

fn write_hourly_rows<W: Write>(reports: &[ActivityReport], writer: &mut csv::Writer<W>) -> Result<()> {
    writer.write_record([
        "individual_id",
        "hour_of_day",
        "activity_count",
        "total_count",
        "activity_ratio",
        "activity",
        "avg_speed_kmh",
        "is_daytime",
    ])?;
    for report in reports {
        for h in &report.hourly {
            writer.write_record([
                report.individual.clone(),
                h.hour_of_day.to_string(),
                h.activity_count.to_string(),
                h.total_count.to_string(),
                format!("{:.4}", h.activity_ratio),
                format!("{:.2}", h.activity),
                format!("{:.3}", h.avg_speed_kmh),
                h.is_daytime.to_string(),
            ])?;
        }
    }
    Ok(())
}
