//! Splitlane operator CLI — discover experiments, inspect results, and
//! manage assignments in a file-backed experiment store.

use anyhow::{bail, Context};
use clap::{Parser, Subcommand, ValueEnum};
use splitlane_core::config::StorageBackendKind;
use splitlane_core::EngineConfig;
use splitlane_experiments::{ExperimentEngine, Visitor};
use splitlane_reporting::{display_results, export_data, import_json, summary_line, to_csv};
use splitlane_web_sdk::{GaConfig, GaSink};
use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{debug, info, warn};

const DEFAULT_LOG_FILTER: &str = "warn,splitlane=info,splitlane_experiments=info,\
splitlane_store=info,splitlane_reporting=info,splitlane_web_sdk=info";

#[derive(Parser, Debug)]
#[command(name = "splitlane")]
#[command(about = "Client-side A/B experiment engine: operator console")]
#[command(version)]
struct Cli {
    /// TOML configuration file
    #[arg(short, long, env = "SPLITLANE_CONFIG")]
    config: Option<PathBuf>,

    /// Directory holding the experiment store (overrides config)
    #[arg(long, env = "SPLITLANE__STORAGE__PATH")]
    data_dir: Option<PathBuf>,

    /// Storage namespace (overrides config)
    #[arg(long, env = "SPLITLANE__NAMESPACE")]
    namespace: Option<String>,

    /// Minimum total clicks before a winner is declared (overrides config)
    #[arg(long)]
    min_sample_size: Option<u64>,

    /// Assignment lifetime in days, 0 for no expiry (overrides config)
    #[arg(long)]
    test_duration_days: Option<u32>,

    /// Emit logs as JSON
    #[arg(long, default_value_t = false)]
    json_logs: bool,

    /// Append GA4 payloads as JSON lines to this file for an external
    /// transport; without it they are discarded
    #[arg(long, env = "SPLITLANE_ANALYTICS_OUT")]
    analytics_out: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Register experiments from a JSON array of declarations
    Discover {
        /// Declarations file
        file: PathBuf,
    },

    /// Resolve (and persist) a visitor's variant
    Assign {
        experiment: String,

        #[arg(long, default_value = "operator")]
        visitor: String,
    },

    /// Record a tracking event
    Track {
        #[arg(value_enum)]
        kind: TrackKind,

        experiment: String,

        /// Variant to credit; conversions fall back to the visitor's assignment
        variant: Option<String>,

        #[arg(long, default_value = "operator")]
        visitor: String,
    },

    /// Show evaluation results for one or all experiments
    Results {
        experiment: Option<String>,

        /// Print structured JSON instead of a table
        #[arg(long, conflicts_with = "csv")]
        json: bool,

        /// Print CSV instead of a table
        #[arg(long)]
        csv: bool,
    },

    /// Zero counters and clear assignments for one or all experiments
    Reset { experiment: Option<String> },

    /// Force a visitor into a variant (QA / preview)
    Force {
        experiment: String,
        variant: String,

        #[arg(long, default_value = "operator")]
        visitor: String,
    },

    /// Write the full experiment state as a portable JSON document
    Export {
        /// Output file (default: stdout)
        #[arg(short, long)]
        out: Option<PathBuf>,
    },

    /// Merge an exported document into the store
    Import { file: PathBuf },
}

#[derive(ValueEnum, Clone, Copy, Debug)]
enum TrackKind {
    Impression,
    Click,
    Conversion,
}

fn init_tracing(json: bool) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| DEFAULT_LOG_FILTER.into());
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);
    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}

fn load_config(cli: &Cli) -> EngineConfig {
    let mut config = EngineConfig::load(cli.config.as_deref()).unwrap_or_else(|e| {
        warn!(error = %e, "Failed to load config, using defaults");
        EngineConfig::default()
    });

    // The CLI always works against durable storage.
    config.storage.backend = StorageBackendKind::File;
    if let Some(ref dir) = cli.data_dir {
        config.storage.path = dir.clone();
    }
    if let Some(ref namespace) = cli.namespace {
        config.namespace = namespace.clone();
    }
    if let Some(min) = cli.min_sample_size {
        config.statistics.min_sample_size = min;
    }
    if let Some(days) = cli.test_duration_days {
        config.assignment.test_duration_days = days;
    }
    config
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.json_logs);

    let config = load_config(&cli);
    info!(
        namespace = %config.namespace,
        path = %config.storage.path.display(),
        "Configuration loaded"
    );

    let analytics = config.analytics.clone();
    let analytics_out = cli.analytics_out.clone();
    let mut engine = ExperimentEngine::open(config).context("failed to open experiment store")?;

    let ga_sink = if analytics.enabled {
        let sink = Arc::new(GaSink::new(GaConfig::from(&analytics))?);
        engine = engine.with_event_sink(sink.clone());
        Some(sink)
    } else {
        None
    };

    run(cli.command, &mut engine)?;

    if let Some(sink) = ga_sink {
        let payloads = sink.drain();
        match analytics_out {
            Some(path) => {
                let mut file = std::fs::OpenOptions::new()
                    .create(true)
                    .append(true)
                    .open(&path)
                    .with_context(|| format!("failed to open {}", path.display()))?;
                write_payloads(&payloads, &mut file)?;
                info!(
                    written = payloads.len(),
                    path = %path.display(),
                    "GA4 payloads written"
                );
            }
            None if !payloads.is_empty() => {
                warn!(
                    dropped = payloads.len(),
                    "GA4 payloads dropped; pass --analytics-out to keep them"
                );
            }
            None => {}
        }
    }
    Ok(())
}

/// One JSON document per line.
fn write_payloads(payloads: &[serde_json::Value], out: &mut impl Write) -> anyhow::Result<()> {
    for payload in payloads {
        serde_json::to_writer(&mut *out, payload)?;
        writeln!(out)?;
    }
    out.flush()?;
    Ok(())
}

fn run(command: Commands, engine: &mut ExperimentEngine) -> anyhow::Result<()> {
    match command {
        Commands::Discover { file } => cmd_discover(engine, file),
        Commands::Assign {
            experiment,
            visitor,
        } => cmd_assign(engine, &experiment, &visitor),
        Commands::Track {
            kind,
            experiment,
            variant,
            visitor,
        } => cmd_track(engine, kind, &experiment, variant.as_deref(), &visitor),
        Commands::Results {
            experiment,
            json,
            csv,
        } => cmd_results(engine, experiment.as_deref(), json, csv),
        Commands::Reset { experiment } => {
            let reset = engine.reset_test(experiment.as_deref());
            if experiment.is_some() && reset == 0 {
                bail!("unknown experiment '{}'", experiment.unwrap_or_default());
            }
            println!("Reset {reset} experiment(s)");
            Ok(())
        }
        Commands::Force {
            experiment,
            variant,
            visitor,
        } => {
            let forced = engine
                .force_variant(&experiment, &variant, &Visitor::new(visitor))
                .with_context(|| format!("cannot force '{experiment}' to variant '{variant}'"))?;
            match forced.previous {
                Some(previous) => println!(
                    "{}: {} -> {}",
                    forced.experiment_id, previous, forced.variant_id
                ),
                None => println!("{}: {}", forced.experiment_id, forced.variant_id),
            }
            Ok(())
        }
        Commands::Export { out } => cmd_export(engine, out),
        Commands::Import { file } => {
            let json = std::fs::read_to_string(&file)
                .with_context(|| format!("failed to read {}", file.display()))?;
            let summary = import_json(engine, &json)?;
            println!(
                "Imported {} experiment(s), {} assignment(s)",
                summary.experiments, summary.assignments
            );
            Ok(())
        }
    }
}

// ---------------------------------------------------------------------------
// Commands
// ---------------------------------------------------------------------------

fn cmd_discover(engine: &mut ExperimentEngine, file: PathBuf) -> anyhow::Result<()> {
    let raw = std::fs::read_to_string(&file)
        .with_context(|| format!("failed to read {}", file.display()))?;
    let report = engine
        .discover_json(&raw)
        .context("declarations must be a JSON array")?;
    println!(
        "Created {} experiment(s) and {} variant(s)",
        report.experiments_created.len(),
        report.variants_created
    );
    for skipped in &report.skipped {
        println!("  skipped #{}: {}", skipped.index, skipped.reason);
    }
    Ok(())
}

fn cmd_assign(engine: &mut ExperimentEngine, experiment: &str, visitor: &str) -> anyhow::Result<()> {
    let Some(variant) = engine.resolve(experiment, &Visitor::new(visitor)) else {
        bail!("unknown experiment '{experiment}'");
    };
    println!("{variant}");
    Ok(())
}

fn cmd_track(
    engine: &mut ExperimentEngine,
    kind: TrackKind,
    experiment: &str,
    variant: Option<&str>,
    visitor: &str,
) -> anyhow::Result<()> {
    let recorded = match (kind, variant) {
        (TrackKind::Impression, Some(variant)) => engine.record_impression(experiment, variant),
        (TrackKind::Click, Some(variant)) => engine.record_click(experiment, variant),
        (TrackKind::Conversion, Some(variant)) => engine.record_conversion_for(experiment, variant),
        (TrackKind::Conversion, None) => engine.record_conversion(experiment, &Visitor::new(visitor)),
        (TrackKind::Impression | TrackKind::Click, None) => {
            bail!("{kind:?} tracking needs a variant")
        }
    };
    if !recorded {
        bail!("nothing recorded for '{experiment}'");
    }
    Ok(())
}

fn cmd_results(
    engine: &ExperimentEngine,
    experiment: Option<&str>,
    json: bool,
    csv: bool,
) -> anyhow::Result<()> {
    let results = match experiment {
        Some(id) => match engine.get_results(id) {
            Some(result) => vec![result],
            None => bail!("unknown experiment '{id}'"),
        },
        None => engine.get_all_results(),
    };
    for result in &results {
        debug!("{}", summary_line(result));
    }

    let mut stdout = std::io::stdout().lock();
    if json {
        serde_json::to_writer_pretty(&mut stdout, &results)?;
        writeln!(stdout)?;
    } else if csv {
        write!(stdout, "{}", to_csv(&results))?;
    } else {
        display_results(&results, &mut stdout)?;
    }
    Ok(())
}

fn cmd_export(engine: &ExperimentEngine, out: Option<PathBuf>) -> anyhow::Result<()> {
    let json = export_data(engine).to_json()?;
    match out {
        Some(path) => {
            std::fs::write(&path, json)
                .with_context(|| format!("failed to write {}", path.display()))?;
            println!("Export written to: {}", path.display());
        }
        None => println!("{json}"),
    }
    Ok(())
}
