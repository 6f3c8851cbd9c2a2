//! Trendline CLI
//!
//! Command-line interface over the weight store, trend analytics and chart
//! renderer.
//!
//! Usage:
//!   trendline log 181.4
//!   trendline log 181.4 --date 2024-03-02 --flag 1 --note "after run"
//!   trendline show 2024-03
//!   trendline trends --format json
//!   trendline chart Month --output month.ppm
//!   trendline import weights.csv --delete-first

use anyhow::{bail, Context, Result};
use chrono::{Duration, Local, NaiveDate};
use clap::{Parser, Subcommand, ValueEnum};
use serde::Serialize;
use std::fs::OpenOptions;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tracing_subscriber::fmt::writer::BoxMakeWriter;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};
use trendline::config::{generate_default_config, Config, LoggingConfig};
use trendline::integrations::{export_csv, export_csv_to_path, CsvImporter};
use trendline::render::ChartRenderer;
use trendline::storage::{DayRecord, MonthCache, MonthDayKey, MonthIndex, PersistentStore, FLAG_COUNT};
use trendline::trends::{CompletionOutcome, TrendBoard};
use trendline::units::WeightUnit;

#[derive(Parser)]
#[command(name = "trendline")]
#[command(version, about = "Trendline - weight tracking with smoothed trends", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Config file (default: search the standard locations)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Database file (overrides the configured location)
    #[arg(long, global = true)]
    db: Option<PathBuf>,

    /// Output format
    #[arg(short, long, global = true, value_enum, default_value_t = OutputFormat::Table)]
    format: OutputFormat,
}

#[derive(Clone, Copy, PartialEq, Eq, ValueEnum)]
enum OutputFormat {
    Table,
    Json,
}

#[derive(Subcommand)]
enum Commands {
    #[command(flatten)]
    Store(StoreCommand),

    /// Generate default config file, or print the resolved one
    Config {
        /// Output path (default: stdout)
        #[arg(short, long)]
        output: Option<PathBuf>,
        /// Print the configuration in effect instead of the defaults
        #[arg(long)]
        resolved: bool,
    },
}

/// Commands that open the weight store
#[derive(Subcommand)]
enum StoreCommand {
    /// Record a day's weight, flags or note
    Log {
        /// Scale weight in the store's unit
        weight: Option<f32>,
        /// Day to record (YYYY-MM-DD, "today" or "yesterday")
        #[arg(short, long, default_value = "today")]
        date: String,
        /// Flags to set (1-4), repeatable
        #[arg(long = "flag", value_parser = clap::value_parser!(u8).range(1..=4))]
        flags: Vec<u8>,
        /// Note for the day
        #[arg(short, long)]
        note: Option<String>,
        /// Clear the day before applying the other options
        #[arg(long)]
        clear: bool,
    },

    /// Show the stored days of one month
    Show {
        /// Month (YYYY-MM, default: current month)
        month: Option<String>,
    },

    /// Show store statistics
    Status,

    /// Compute trend spans
    Trends,

    /// Render one span's chart to a binary PPM file
    Chart {
        /// Span title (e.g. Month, "All Time")
        span: String,
        /// Output file
        #[arg(short, long, default_value = "chart.ppm")]
        output: PathBuf,
        /// Chart width in pixels
        #[arg(long)]
        width: Option<u32>,
        /// Chart height in pixels
        #[arg(long)]
        height: Option<u32>,
    },

    /// Import a CSV file
    Import {
        /// Path to CSV file
        path: PathBuf,
        /// Remove all stored days first
        #[arg(long)]
        delete_first: bool,
        /// Date format (strftime), tried before the built-in formats
        #[arg(long)]
        date_format: Option<String>,
    },

    /// Export every stored day as CSV
    Export {
        /// Output file (default: stdout)
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Show or change the weight unit
    Unit {
        /// New unit (lb or kg)
        unit: Option<WeightUnit>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let config = match &cli.config {
        Some(path) => Config::load_with_env(path)?,
        None => Config::load_default(),
    };
    init_logging(&config.logging)?;

    let command = match cli.command {
        Commands::Config { output, resolved } => {
            let text = if resolved {
                toml::to_string_pretty(&config).context("Failed to serialize config")?
            } else {
                generate_default_config()
            };
            return write_config(output.as_deref(), &text);
        }
        Commands::Store(command) => command,
    };

    let db_path = cli
        .db
        .clone()
        .unwrap_or_else(|| config.storage.database_path());
    let store = PersistentStore::open(&db_path)
        .with_context(|| format!("Cannot open weight store at {:?}", db_path))?;
    let mut cache = MonthCache::new(store);

    match command {
        StoreCommand::Log {
            date,
            weight,
            flags,
            note,
            clear,
        } => {
            let date = parse_day(&date)?;
            let key = MonthDayKey::from_date(date);
            cache.update_day(key, |day| {
                if clear {
                    *day = DayRecord::default();
                }
                if weight.is_some() {
                    day.scale_weight = weight;
                }
                for flag in &flags {
                    day.flags.set(usize::from(*flag - 1), true);
                }
                if note.is_some() {
                    day.set_note(note.clone());
                }
            })?;

            let unit = cache.store().weight_unit()?;
            let record = cache
                .get(key.month)?
                .day(key.day)
                .cloned()
                .unwrap_or_default();
            match cli.format {
                OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&DayRow::new(key, &record))?),
                OutputFormat::Table => println!(
                    "Logged {}: {}",
                    key,
                    describe_day(&record, unit)
                ),
            }
        }

        StoreCommand::Show { month } => {
            let month = match month {
                Some(m) => m.parse::<MonthIndex>().map_err(anyhow::Error::msg)?,
                None => MonthIndex::from_date(Local::now().date_naive()),
            };
            let unit = cache.store().weight_unit()?;
            let data = cache.get(month)?;
            let rows: Vec<DayRow> = data
                .iter()
                .filter(|(_, record)| !record.is_empty())
                .map(|(key, record)| DayRow::new(key, record))
                .collect();

            match cli.format {
                OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&rows)?),
                OutputFormat::Table => print_month(month, &rows, unit),
            }
        }

        StoreCommand::Status => {
            let store = cache.store();
            let status = StoreStatus {
                path: db_path.clone(),
                weight_unit: store.weight_unit()?,
                measurements: store.measurement_count()?,
                first_day: store.earliest_measured_day()?.map(|k| k.to_string()),
                last_day: store.latest_measured_day()?.map(|k| k.to_string()),
                minimum_weight: store.minimum_weight()?,
                maximum_weight: store.maximum_weight()?,
            };

            match cli.format {
                OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&status)?),
                OutputFormat::Table => print_status(&status),
            }
        }

        StoreCommand::Trends => {
            let weight_unit = cache.store().weight_unit()?;
            let energy_unit = config.trends.energy_unit;
            let mut board = TrendBoard::new(config.trends.spans.clone());
            board.refresh(&mut cache)?;

            let summaries: Vec<_> = board
                .spans()
                .iter()
                .filter(|s| s.is_visible())
                .map(|s| s.summary(weight_unit, energy_unit))
                .collect();

            match cli.format {
                OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&summaries)?),
                OutputFormat::Table => {
                    if summaries.is_empty() {
                        println!("No measurements yet.");
                        println!();
                        println!("Record your first weight with:");
                        println!("  trendline log 180.0");
                    } else {
                        println!(
                            "{:<12} {:>6} {:>10} {:>10} {:>12}",
                            "Span", "Days", "Per day", "Change", "Energy/day"
                        );
                        println!("{}", "-".repeat(54));
                        for s in &summaries {
                            let days = if s.clamped {
                                format!("{}*", s.days)
                            } else {
                                s.days.to_string()
                            };
                            println!(
                                "{:<12} {:>6} {:>10.3} {:>10.1} {:>9.0} {}",
                                s.title,
                                days,
                                s.weight_per_day,
                                s.weight_change,
                                s.energy_per_day,
                                energy_unit.abbreviation()
                            );
                        }
                        println!();
                        println!("Weights in {}; * = shorter history than the span", weight_unit);
                    }
                }
            }
        }

        StoreCommand::Chart {
            span,
            output,
            width,
            height,
        } => {
            let mut spec = config
                .trends
                .spans
                .iter()
                .find(|s| s.title.eq_ignore_ascii_case(&span))
                .cloned()
                .with_context(|| format!("Unknown span: {}", span))?;
            spec.visible = true;
            let title = spec.title.clone();

            let mut bounds = config.render.bounds();
            bounds.width = width.unwrap_or(bounds.width);
            bounds.height = height.unwrap_or(bounds.height);

            let renderer = ChartRenderer::from_current(config.render.max_concurrent)?;
            let mut board = TrendBoard::new(vec![spec]);
            board.refresh(&mut cache)?;
            if board.spans().is_empty() {
                bail!("No measurements to chart");
            }

            board.request_charts(&renderer, bounds, config.render.max_grid_lines);
            while board.has_pending_renders() {
                match board.next_completion().await {
                    Some(CompletionOutcome::Failed(e)) => bail!("Chart rendering failed: {}", e),
                    Some(_) => {}
                    None => break,
                }
            }

            let image = board
                .span(&title)
                .and_then(|s| s.image())
                .context("Renderer produced no image")?;
            write_ppm(image, &output)?;
            println!(
                "Chart for {} written to {:?} ({}x{})",
                title,
                output,
                image.width(),
                image.height()
            );
        }

        StoreCommand::Import {
            path,
            delete_first,
            date_format,
        } => {
            if !path.exists() {
                bail!("File not found: {:?}", path);
            }

            let mut importer = CsvImporter::new().with_delete_first(delete_first);
            if let Some(format) = &date_format {
                importer = importer.with_date_format(format);
            }

            let mut last_reported = 0;
            let summary = importer.import_path(&mut cache, &path, |fraction| {
                let percent = (fraction * 100.0) as u32;
                if percent / 10 > last_reported / 10 {
                    last_reported = percent;
                    tracing::debug!(percent, "Import progress");
                }
            })?;

            match cli.format {
                OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&summary)?),
                OutputFormat::Table => {
                    println!("Import results:");
                    println!("  Rows processed: {}", summary.rows);
                    println!("  Rows imported: {}", summary.imported);
                    println!("  Rows failed: {}", summary.failed);

                    if !summary.errors.is_empty() {
                        println!();
                        println!("Errors (first 10):");
                        for error in summary.errors.iter().take(10) {
                            println!("  {}", error);
                        }
                    }
                }
            }
        }

        StoreCommand::Export { output } => match output {
            Some(path) => {
                let rows = export_csv_to_path(cache.store(), &path)?;
                println!("Exported {} days to {:?}", rows, path);
            }
            None => {
                let stdout = std::io::stdout();
                export_csv(cache.store(), stdout.lock())?;
            }
        },

        StoreCommand::Unit { unit } => {
            if let Some(unit) = unit {
                cache.set_weight_unit(unit)?;
            }
            let current = cache.store().weight_unit()?;
            match cli.format {
                OutputFormat::Json => println!("{}", serde_json::to_string(&current)?),
                OutputFormat::Table => {
                    println!("Weight unit: {} ({})", current, current.abbreviation())
                }
            }
        }
    }

    cache.into_store().close()?;
    Ok(())
}

/// Install the tracing subscriber described by `[logging]`
///
/// `RUST_LOG` wins over the configured level. Logs go to stderr, or to the
/// configured file, so command output on stdout stays clean.
fn init_logging(config: &LoggingConfig) -> Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("trendline={}", config.level)));

    let writer = match &config.file {
        Some(path) => {
            let file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .with_context(|| format!("Cannot open log file {}", path))?;
            BoxMakeWriter::new(Mutex::new(file))
        }
        None => BoxMakeWriter::new(std::io::stderr),
    };

    let registry = tracing_subscriber::registry().with(filter);
    if config.format.eq_ignore_ascii_case("json") {
        registry
            .with(tracing_subscriber::fmt::layer().json().with_writer(writer))
            .try_init()?;
    } else {
        registry
            .with(tracing_subscriber::fmt::layer().with_writer(writer))
            .try_init()?;
    }
    Ok(())
}

fn parse_day(s: &str) -> Result<NaiveDate> {
    let today = Local::now().date_naive();
    match s.trim().to_lowercase().as_str() {
        "today" => Ok(today),
        "yesterday" => Ok(today - Duration::days(1)),
        other => NaiveDate::parse_from_str(other, "%Y-%m-%d")
            .with_context(|| format!("Invalid date: {}. Use YYYY-MM-DD, today or yesterday", s)),
    }
}

fn write_config(output: Option<&Path>, text: &str) -> Result<()> {
    match output {
        Some(path) => {
            if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
                std::fs::create_dir_all(parent)?;
            }
            std::fs::write(path, text)?;
            println!("Config written to {:?}", path);
        }
        None => print!("{}", text),
    }
    Ok(())
}

fn write_ppm(image: &trendline::render::ChartImage, path: &Path) -> Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)?;
    }
    let file = std::fs::File::create(path).with_context(|| format!("Cannot create {:?}", path))?;
    let mut out = BufWriter::new(file);
    image.write_ppm(&mut out)?;
    out.flush()?;
    Ok(())
}

#[derive(Serialize)]
struct DayRow {
    date: String,
    scale_weight: Option<f32>,
    trend_weight: Option<f32>,
    flags: [bool; FLAG_COUNT],
    note: Option<String>,
}

impl DayRow {
    fn new(key: MonthDayKey, record: &DayRecord) -> Self {
        Self {
            date: key.to_string(),
            scale_weight: record.scale_weight,
            trend_weight: record.trend_weight,
            flags: record.flags.to_array(),
            note: record.note.clone(),
        }
    }
}

#[derive(Serialize)]
struct StoreStatus {
    path: PathBuf,
    weight_unit: WeightUnit,
    measurements: u64,
    first_day: Option<String>,
    last_day: Option<String>,
    minimum_weight: Option<f32>,
    maximum_weight: Option<f32>,
}

fn flag_labels(flags: &[bool; FLAG_COUNT]) -> String {
    flags
        .iter()
        .enumerate()
        .map(|(i, set)| if *set { char::from(b'1' + i as u8) } else { '.' })
        .collect()
}

fn describe_day(record: &DayRecord, unit: WeightUnit) -> String {
    let mut parts = Vec::new();
    match (record.scale_weight, record.trend_weight) {
        (Some(w), Some(t)) => parts.push(format!("{} (trend {})", unit.format(w), unit.format(t))),
        (Some(w), None) => parts.push(unit.format(w)),
        _ => parts.push("no weight".to_string()),
    }
    if record.flags.any() {
        parts.push(format!("flags {}", flag_labels(&record.flags.to_array())));
    }
    if let Some(note) = &record.note {
        parts.push(format!("\"{}\"", note));
    }
    parts.join(", ")
}

fn print_month(month: MonthIndex, rows: &[DayRow], unit: WeightUnit) {
    if rows.is_empty() {
        println!("No data for {}", month);
        return;
    }

    println!(
        "{:<12} | {:<10} | {:<10} | {:<5} | {}",
        "Date",
        format!("Weight {}", unit.abbreviation()),
        "Trend",
        "Flags",
        "Note"
    );
    println!("{}", "-".repeat(60));

    let fmt = |v: Option<f32>| v.map(|w| format!("{:.1}", w)).unwrap_or_else(|| "-".to_string());
    for row in rows {
        println!(
            "{:<12} | {:<10} | {:<10} | {:<5} | {}",
            row.date,
            fmt(row.scale_weight),
            fmt(row.trend_weight),
            flag_labels(&row.flags),
            row.note.as_deref().unwrap_or("")
        );
    }
}

fn print_status(status: &StoreStatus) {
    println!("Trendline v{}", env!("CARGO_PKG_VERSION"));
    println!();
    println!("Database: {:?}", status.path);
    println!("Weight unit: {}", status.weight_unit);
    println!("Measurements: {}", status.measurements);
    if let (Some(first), Some(last)) = (&status.first_day, &status.last_day) {
        println!("Range: {} to {}", first, last);
    }
    if let (Some(min), Some(max)) = (status.minimum_weight, status.maximum_weight) {
        println!(
            "Weights: {} to {}",
            status.weight_unit.format(min),
            status.weight_unit.format(max)
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn log_args(args: &[&str]) -> (Option<f32>, String) {
        let cli = Cli::try_parse_from(args).unwrap();
        match cli.command {
            Commands::Store(StoreCommand::Log { weight, date, .. }) => (weight, date),
            _ => panic!("expected log command"),
        }
    }

    #[test]
    fn test_log_weight_without_date() {
        assert_eq!(
            log_args(&["trendline", "log", "181.4"]),
            (Some(181.4), "today".to_string())
        );
        assert_eq!(
            log_args(&["trendline", "log", "181.4", "--date", "2024-03-02"]),
            (Some(181.4), "2024-03-02".to_string())
        );
        assert_eq!(
            log_args(&["trendline", "log", "-d", "yesterday", "--note", "rest day"]),
            (None, "yesterday".to_string())
        );
    }

    #[test]
    fn test_parse_day() {
        assert_eq!(parse_day("2024-02-29").unwrap(), NaiveDate::from_ymd_opt(2024, 2, 29).unwrap());
        assert_eq!(parse_day("Today").unwrap(), Local::now().date_naive());
        assert!(parse_day("181.4").is_err());
    }
}
