//! awareness - mixed-model analysis of the awareness × attention experiment
//!
//! Command-line interface for configuration-driven analysis runs.

use awareness_analysis::aggregate::aggregate_mean;
use awareness_analysis::data::MixedFormula;
use awareness_analysis::error::Result;
use awareness_analysis::pipeline::{
    prepare_trials, preset, run, AnalysisConfig, RunOptions, PRESETS,
};
use clap::{ArgAction, Parser, Subcommand, ValueEnum};
use std::path::PathBuf;
use tracing::info;
use tracing_subscriber::EnvFilter;

/// Report output format
#[derive(Debug, Clone, Copy, ValueEnum)]
enum OutputFormat {
    /// Aligned text tables
    Text,
    /// Pretty-printed JSON
    Json,
}

/// Mixed-model analysis of the awareness × attention experiment
#[derive(Parser)]
#[command(name = "awareness")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Increase log verbosity (-v info, -vv debug, -vvv trace)
    #[arg(short, long, action = ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run an analysis from a YAML configuration file
    Run {
        /// Path to analysis configuration YAML
        #[arg(short, long)]
        config: PathBuf,

        /// Input CSV (overrides the configured input)
        #[arg(short, long)]
        input: Option<PathBuf>,

        /// Directory for figures
        #[arg(short, long, default_value = ".")]
        output_dir: PathBuf,

        /// Report format
        #[arg(short, long, value_enum, default_value = "text")]
        format: OutputFormat,

        /// Skip drawing figures
        #[arg(long)]
        no_plots: bool,
    },

    /// Write a built-in analysis configuration
    Example {
        /// Preset name: acc or rt
        #[arg(short, long, default_value = "rt")]
        preset: String,

        /// Output path (stdout when absent)
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Validate a configuration and its formulas
    Check {
        /// Path to analysis configuration YAML
        #[arg(short, long)]
        config: PathBuf,
    },

    /// Print group means of the filtered trials
    Aggregate {
        /// Path to analysis configuration YAML
        #[arg(short, long)]
        config: PathBuf,

        /// Input CSV (overrides the configured input)
        #[arg(short, long)]
        input: Option<PathBuf>,

        /// Grouping columns, comma-separated
        #[arg(short, long, value_delimiter = ',', required = true)]
        group_by: Vec<String>,

        /// Outcome column
        #[arg(short, long)]
        outcome: String,
    },
}

fn init_logging(verbose: u8) {
    let filter = match verbose {
        0 => EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        1 => EnvFilter::new("info"),
        2 => EnvFilter::new("debug"),
        _ => EnvFilter::new("trace"),
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn main() {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    let result = match cli.command {
        Commands::Run {
            config,
            input,
            output_dir,
            format,
            no_plots,
        } => cmd_run(&config, input, output_dir, format, no_plots),

        Commands::Example { preset, output } => cmd_example(&preset, output.as_ref()),

        Commands::Check { config } => cmd_check(&config),

        Commands::Aggregate {
            config,
            input,
            group_by,
            outcome,
        } => cmd_aggregate(&config, input, &group_by, &outcome),
    };

    if let Err(e) = result {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }
}

/// Run an analysis from configuration
fn cmd_run(
    config_path: &PathBuf,
    input: Option<PathBuf>,
    output_dir: PathBuf,
    format: OutputFormat,
    no_plots: bool,
) -> Result<()> {
    info!("Loading analysis configuration from {:?}", config_path);
    let config = AnalysisConfig::from_path(config_path)?;

    let options = RunOptions {
        input,
        output_dir,
        skip_plots: no_plots,
    };
    let report = run(&config, &options)?;

    match format {
        OutputFormat::Text => print!("{}", report.to_text()),
        OutputFormat::Json => println!("{}", report.to_json()?),
    }
    Ok(())
}

/// Write a preset configuration
fn cmd_example(name: &str, output_path: Option<&PathBuf>) -> Result<()> {
    let yaml = preset(name)?.to_yaml()?;
    match output_path {
        Some(path) => {
            std::fs::write(path, &yaml)?;
            eprintln!("Wrote '{}' configuration to {:?}", name, path);
        }
        None => print!("{}", yaml),
    }
    Ok(())
}

/// Parse a configuration and every model formula
fn cmd_check(config_path: &PathBuf) -> Result<()> {
    let config = AnalysisConfig::from_path(config_path)?;
    for model in &config.models {
        let formula = MixedFormula::parse(&model.spec.formula)?;
        println!(
            "model {}: {} fixed terms, {} random effect(s)",
            model.name,
            formula.fixed.terms.len(),
            formula.random.len()
        );
    }
    for figure in &config.figures {
        println!("figure {}: {} annotation(s)", figure.file, figure.annotations.len());
    }
    println!(
        "Configuration '{}' is valid (presets available: {})",
        config.name,
        PRESETS.join(", ")
    );
    Ok(())
}

/// Load, recode and filter, then print group means
fn cmd_aggregate(
    config_path: &PathBuf,
    input: Option<PathBuf>,
    group_by: &[String],
    outcome: &str,
) -> Result<()> {
    let config = AnalysisConfig::from_path(config_path)?;
    let input = input.unwrap_or_else(|| PathBuf::from(&config.input));
    let prepared = prepare_trials(&config, &input)?;
    for f in &prepared.filters {
        eprintln!("{}", f);
    }

    let table = aggregate_mean(&prepared.trials, group_by, outcome)?;
    print!("{}", table.to_table_string());
    Ok(())
}
