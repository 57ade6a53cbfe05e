use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use multigram::audio::ingest_directory;
use multigram::family::{InstrumentFamily, LabelMap};
use multigram::pipeline::{ErrorHandling, StageReport, default_reporter, run_combination, run_extraction};
use multigram::polyphony::run_polyphony;
use multigram::report::ClassificationReport;
use multigram::storage::{read_curve, read_labels};
use multigram::{FeatureSet, PipelineConfig};
use tracing::Level;

#[derive(Parser, Debug)]
#[command(
    name = "multigram",
    about = "Multi-representation feature pipeline for instrument-family datasets"
)]
struct Cli {
    /// JSON configuration file (defaults are used when omitted)
    #[arg(long, global = true)]
    config: Option<PathBuf>,
    /// Directory holding stored waveforms and feature stacks [default: data]
    #[arg(long, global = true)]
    base_dir: Option<PathBuf>,
    /// Directory for models, curves and label files [default: output]
    #[arg(long, global = true)]
    output_dir: Option<PathBuf>,
    /// Abort a stage on the first failing family/feature
    #[arg(long, global = true)]
    stop_on_error: bool,
    /// Increase log verbosity (-v debug, -vv trace)
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    verbose: u8,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Write the effective configuration as JSON
    InitConfig {
        #[arg(long, default_value = "multigram.json")]
        output: PathBuf,
    },
    /// Read `<root>/<family name or raw id>/*.wav` into per-family waveform stacks
    Ingest { root: PathBuf },
    /// Extract the six representations for every (or the listed) family
    Extract {
        #[arg(long = "family")]
        families: Vec<InstrumentFamily>,
    },
    /// Combine the stored representations into padded blocks
    Combine {
        #[arg(long = "family")]
        families: Vec<InstrumentFamily>,
    },
    /// Synthesize the polyphonic validation set
    Polyphony,
    /// Print classification metrics from stored label files
    Report {
        /// Feature set whose validation labels are read
        #[arg(long)]
        set: Option<FeatureSet>,
        /// Explicit true-label file
        #[arg(long, requires = "predicted")]
        truth: Option<PathBuf>,
        /// Explicit predicted-label file
        #[arg(long, requires = "truth")]
        predicted: Option<PathBuf>,
    },
    /// Print the stored loss and accuracy curves
    Curves {
        #[arg(long)]
        set: FeatureSet,
        #[arg(long)]
        family: InstrumentFamily,
    },
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    init_logging(cli.verbose);
    match run(cli) {
        Ok(code) => code,
        Err(err) => {
            eprintln!("Error: {err:?}");
            ExitCode::from(1)
        }
    }
}

fn init_logging(verbose: u8) {
    let level = match verbose {
        0 => Level::INFO,
        1 => Level::DEBUG,
        _ => Level::TRACE,
    };
    tracing_subscriber::fmt()
        .with_max_level(level)
        .with_target(false)
        .init();
}

fn run(cli: Cli) -> Result<ExitCode> {
    let config = load_config(&cli)?;
    let handling = if cli.stop_on_error {
        ErrorHandling::StopOnFirstError
    } else {
        ErrorHandling::CollectErrors
    };
    let label_map = LabelMap::nsynth();

    match cli.command {
        Commands::InitConfig { output } => {
            config
                .to_json_file(&output)
                .with_context(|| format!("writing {}", output.display()))?;
            println!("wrote {}", output.display());
            Ok(ExitCode::SUCCESS)
        }
        Commands::Ingest { root } => {
            let report = ingest_directory(&root, &config, &label_map, handling)
                .with_context(|| format!("ingesting {}", root.display()))?;
            Ok(finish(&report))
        }
        Commands::Extract { families } => {
            let families = selected(families, &label_map);
            let progress = default_reporter();
            let report = run_extraction(&config, &families, handling, progress.as_ref())?;
            Ok(finish(&report))
        }
        Commands::Combine { families } => {
            let families = selected(families, &label_map);
            let progress = default_reporter();
            let report = run_combination(&config, &families, handling, progress.as_ref())?;
            Ok(finish(&report))
        }
        Commands::Polyphony => {
            let set = run_polyphony(&config, &label_map)?;
            println!("synthesized {} polyphonic samples", set.len());
            Ok(ExitCode::SUCCESS)
        }
        Commands::Report {
            set,
            truth,
            predicted,
        } => {
            let layout = config.layout();
            let (truth, predicted) = match (set, truth, predicted) {
                (_, Some(truth), Some(predicted)) => (truth, predicted),
                (Some(set), _, _) => (layout.true_labels(set), layout.predicted_labels(set)),
                _ => bail!("either --set or both --truth and --predicted are required"),
            };
            let truth_labels = read_labels(&truth)
                .with_context(|| format!("reading {}", truth.display()))?;
            let predicted_labels = read_labels(&predicted)
                .with_context(|| format!("reading {}", predicted.display()))?;
            let names = label_map.families().map(|f| f.to_string()).collect();
            let report = ClassificationReport::from_labels(&truth_labels, &predicted_labels, names)?;
            print!("{report}");
            Ok(ExitCode::SUCCESS)
        }
        Commands::Curves { set, family } => {
            let layout = config.layout();
            let loss = read_curve(layout.loss_curve(set, family))?;
            let accuracy = read_curve(layout.accuracy_curve(set, family))?;
            println!("{:>5} {:>10} {:>10}", "epoch", "loss", "accuracy");
            for (epoch, (l, a)) in loss.iter().zip(&accuracy).enumerate() {
                println!("{:>5} {l:>10.4} {a:>10.4}", epoch + 1);
            }
            Ok(ExitCode::SUCCESS)
        }
    }
}

/// Configuration from `--config` (or defaults) with explicit directory flags applied on top.
fn load_config(cli: &Cli) -> Result<PipelineConfig> {
    let config = match &cli.config {
        Some(path) => PipelineConfig::from_json_file(path)
            .with_context(|| format!("loading configuration {}", path.display()))?,
        None => PipelineConfig::default(),
    };
    let config = config.with_dirs(cli.base_dir.clone(), cli.output_dir.clone());
    config.validate()?;
    Ok(config)
}

fn selected(families: Vec<InstrumentFamily>, label_map: &LabelMap) -> Vec<InstrumentFamily> {
    if families.is_empty() {
        label_map.families().collect()
    } else {
        families
    }
}

fn finish(report: &StageReport) -> ExitCode {
    println!("{report}");
    if report.is_success() {
        ExitCode::SUCCESS
    } else {
        ExitCode::from(2)
    }
}
