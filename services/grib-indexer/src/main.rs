//! GRIB collection indexer.
//!
//! Scans GRIB files, builds and caches their indexes, aggregates them into
//! collections and keeps configured collections current with their sources.

mod collections;
mod commands;
mod watch;

use std::path::PathBuf;

use anyhow::{bail, Result};
use clap::{Args, Parser, Subcommand, ValueEnum};
use grib_index::{IndexConfig, IntervalPolicy, JoinDimension, JoinSpec, RunDatePattern};
use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;

#[derive(Parser, Debug)]
#[command(name = "grib-indexer")]
#[command(about = "Index, aggregate and read GRIB collections")]
struct Cli {
    /// Log level
    #[arg(long, global = true, default_value = "info")]
    log_level: String,

    /// Emit logs as JSON
    #[arg(long, global = true)]
    json: bool,

    /// Index cache directory (overrides GRIB_CACHE_DIR)
    #[arg(long, global = true)]
    cache_dir: Option<PathBuf>,

    /// Worker threads for indexing (overrides GRIB_INDEX_THREADS)
    #[arg(long, global = true)]
    threads: Option<usize>,

    /// Interval policy: smallest_per_end or keep_all
    #[arg(long, global = true)]
    interval_policy: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// List the records of GRIB files
    Scan {
        #[arg(required = true)]
        files: Vec<PathBuf>,
    },

    /// Build (or load cached) indexes of GRIB files
    Index {
        #[arg(required = true)]
        files: Vec<PathBuf>,
    },

    /// Aggregate files into one collection
    Aggregate(AggregateArgs),

    /// Read values from a file or collection
    Read(ReadArgs),

    /// Keep configured collections current with their source files
    Watch {
        /// Configuration directory (contains collections/*.yaml)
        #[arg(long, env = "CONFIG_DIR", default_value = "config")]
        config_dir: PathBuf,

        /// Recheck every collection once and exit
        #[arg(long)]
        once: bool,
    },

    /// Delete the oldest cache entries until the cache fits a size limit
    CacheScour {
        /// Size limit in bytes
        #[arg(long)]
        max_bytes: u64,
    },
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum JoinKind {
    /// Concatenate files along the time dimension
    JoinTime,
    /// Concatenate files along the run dimension
    JoinRun,
    /// Combine distinct variables
    Union,
    /// Run x forecast offset
    Fmrc,
}

/// Where a collection comes from: a definition file or a list of files.
#[derive(Args, Debug)]
struct SourceArgs {
    /// Collection definition (YAML)
    #[arg(long, conflicts_with = "files")]
    collection: Option<PathBuf>,

    /// Source files, in aggregation order
    files: Vec<PathBuf>,

    /// How files are joined when no collection definition is given
    #[arg(long, value_enum, default_value = "join-time")]
    join: JoinKind,

    /// Sort join values instead of requiring ascending files
    #[arg(long)]
    sort: bool,

    /// Run time format in file names, e.g. %Y%m%d%H (fmrc only)
    #[arg(long)]
    run_date: Option<String>,
}

impl SourceArgs {
    fn join(&self) -> Result<JoinSpec> {
        Ok(match self.join {
            JoinKind::JoinTime => JoinSpec::JoinExisting {
                dimension: JoinDimension::Time,
                sort: self.sort,
            },
            JoinKind::JoinRun => JoinSpec::JoinExisting {
                dimension: JoinDimension::Run,
                sort: self.sort,
            },
            JoinKind::Union => JoinSpec::Union {
                renames: Default::default(),
            },
            JoinKind::Fmrc => {
                let run_date = self.run_date.as_deref().map(RunDatePattern::new);
                if let Some(pattern) = &run_date {
                    if !pattern.is_valid() {
                        bail!("invalid run date format '{}'", pattern.format);
                    }
                }
                JoinSpec::ForecastModelRun { run_date }
            }
        })
    }
}

#[derive(Args, Debug)]
struct AggregateArgs {
    #[command(flatten)]
    source: SourceArgs,

    /// Collection name when no definition is given
    #[arg(long, default_value = "collection")]
    name: String,
}

#[derive(Args, Debug)]
struct ReadArgs {
    #[command(flatten)]
    source: SourceArgs,

    /// Variable name
    #[arg(long)]
    variable: String,

    #[arg(long, default_value = "0")]
    run: usize,

    #[arg(long, default_value = "0")]
    ensemble: usize,

    /// Time index (index into the best time series with --best)
    #[arg(long, default_value = "0")]
    time: usize,

    #[arg(long, default_value = "0")]
    level: usize,

    /// Point latitude (with --lon, instead of --x/--y)
    #[arg(long, requires = "lon", allow_hyphen_values = true)]
    lat: Option<f64>,

    #[arg(long, requires = "lat", allow_hyphen_values = true)]
    lon: Option<f64>,

    #[arg(long, default_value = "0")]
    x: usize,

    #[arg(long, default_value = "0")]
    y: usize,

    /// Read along the best time series
    #[arg(long)]
    best: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load environment from .env file if present
    dotenvy::dotenv().ok();

    let cli = Cli::parse();
    init_tracing(&cli.log_level, cli.json)?;

    let config = index_config(&cli)?;
    info!(
        cache_dir = ?config.cache_dir,
        threads = ?config.threads,
        policy = ?config.interval_policy,
        "Starting grib-indexer"
    );

    match cli.command {
        Command::Scan { files } => commands::scan(&config, &files),
        Command::Index { files } => commands::index(&config, &files),
        Command::Aggregate(args) => commands::aggregate(&config, &args),
        Command::Read(args) => commands::read(&config, &args),
        Command::Watch { config_dir, once } => watch::run(config, &config_dir, once).await,
        Command::CacheScour { max_bytes } => commands::cache_scour(&config, max_bytes),
    }
}

fn init_tracing(log_level: &str, json: bool) -> Result<()> {
    let level = match log_level.to_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };

    // Logs go to stderr; stdout carries command output
    let builder = FmtSubscriber::builder()
        .with_max_level(level)
        .with_target(true)
        .with_writer(std::io::stderr);

    if json {
        tracing::subscriber::set_global_default(builder.json().with_thread_ids(true).finish())?;
    } else {
        tracing::subscriber::set_global_default(builder.finish())?;
    }
    Ok(())
}

/// Environment configuration with command-line overrides applied.
fn index_config(cli: &Cli) -> Result<IndexConfig> {
    let mut config = IndexConfig::from_env();
    if let Some(dir) = &cli.cache_dir {
        config.cache_dir = Some(dir.clone());
    }
    if let Some(threads) = cli.threads {
        config.threads = Some(threads);
    }
    if let Some(policy) = &cli.interval_policy {
        config.interval_policy = match IntervalPolicy::from_str(policy) {
            Some(policy) => policy,
            None => bail!("unknown interval policy '{}'", policy),
        };
    }
    config.validate()?;
    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_parses_read_point() {
        let cli = Cli::try_parse_from([
            "grib-indexer",
            "read",
            "--variable",
            "TMP_height_above_ground",
            "--lat",
            "41.37",
            "--lon",
            "-91.14",
            "gfs.grib2",
        ])
        .unwrap();
        match cli.command {
            Command::Read(args) => {
                assert_eq!(args.lat, Some(41.37));
                assert_eq!(args.lon, Some(-91.14));
                assert_eq!(args.source.files, vec![PathBuf::from("gfs.grib2")]);
            }
            other => panic!("unexpected command: {:?}", other),
        }
    }

    #[test]
    fn test_fmrc_join_from_flags() {
        let cli = Cli::try_parse_from([
            "grib-indexer",
            "aggregate",
            "--join",
            "fmrc",
            "--run-date",
            "%Y%m%d%H",
            "a.grib2",
            "b.grib2",
        ])
        .unwrap();
        let Command::Aggregate(args) = cli.command else {
            panic!("expected aggregate");
        };
        assert_eq!(
            args.source.join().unwrap(),
            JoinSpec::ForecastModelRun {
                run_date: Some(RunDatePattern::new("%Y%m%d%H"))
            }
        );
    }

    #[test]
    fn test_collection_conflicts_with_files() {
        assert!(Cli::try_parse_from([
            "grib-indexer",
            "aggregate",
            "--collection",
            "gfs.yaml",
            "a.grib2",
        ])
        .is_err());
    }
}
