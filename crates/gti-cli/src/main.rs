//! CLI for gti — cross-stream timing coherence and phase-gap forecasting.

mod commands;

use clap::{Parser, Subcommand};
use gti_core::SlopeUnits;

#[derive(Parser)]
#[command(name = "gti")]
#[command(about = "gti — do independent clocks drift together? Coherence index and convergence ETA")]
#[command(version = gti_core::VERSION)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the coherence pipeline over a set of timing-residual streams
    Analyze {
        /// JSON object mapping stream name to [[timestamp_seconds, value], ...]
        #[arg(long)]
        input: String,

        /// Configuration JSON (defaults apply when omitted)
        #[arg(long)]
        config: Option<String>,

        /// Write the full result JSON to path
        #[arg(long)]
        output: Option<String>,

        /// Append the resulting phase gap to this history file
        #[arg(long)]
        history: Option<String>,
    },

    /// Forecast when the phase gap closes, with stability, placebo and bootstrap checks.
    /// Pass --manual-current and --manual-slope to skip the history fit.
    Eta {
        /// Phase-gap history JSON ({"history": [...]})
        #[arg(long, default_value = "phase_gap_history.json")]
        history: String,

        /// Configuration JSON (defaults apply when omitted)
        #[arg(long)]
        config: Option<String>,

        /// Write the report JSON to path
        #[arg(long)]
        output: Option<String>,

        /// Current GTI value; enables the zero-reset assessment
        #[arg(long)]
        gti: Option<f64>,

        /// Current phase gap in radians
        #[arg(long, requires = "manual_slope", allow_negative_numbers = true)]
        manual_current: Option<f64>,

        /// Phase-gap slope, negative when closing
        #[arg(long, requires = "manual_current", allow_negative_numbers = true)]
        manual_slope: Option<f64>,

        /// Units of --manual-slope: rad_per_sec or rad_per_day
        #[arg(long, default_value = "rad_per_sec")]
        slope_units: SlopeUnits,
    },

    /// Backfill-merge another history into the log; existing samples win per day
    Merge {
        /// History file to merge into
        #[arg(long, default_value = "phase_gap_history.json")]
        history: String,

        /// History JSON to merge from
        #[arg(long)]
        input: String,

        /// Report what would change without writing
        #[arg(long)]
        dry_run: bool,
    },

    /// Append one phase-gap sample to the history log
    Append {
        /// History file to append to
        #[arg(long, default_value = "phase_gap_history.json")]
        history: String,

        /// Phase gap in degrees
        #[arg(long, allow_negative_numbers = true, value_parser = commands::append::parse_degrees)]
        degrees: f64,

        /// Sample time (RFC 3339); defaults to now
        #[arg(long, value_parser = commands::append::parse_at)]
        at: Option<chrono::DateTime<chrono::Utc>>,

        /// Configuration JSON (for the history cap)
        #[arg(long)]
        config: Option<String>,
    },
}

fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .format_timestamp(None)
        .init();

    let cli = Cli::parse();

    let outcome = match cli.command {
        Commands::Analyze {
            input,
            config,
            output,
            history,
        } => commands::analyze::run(commands::analyze::AnalyzeCommandConfig {
            input_path: &input,
            config_path: config.as_deref(),
            output_path: output.as_deref(),
            history_path: history.as_deref(),
        }),
        Commands::Eta {
            history,
            config,
            output,
            gti,
            manual_current,
            manual_slope,
            slope_units,
        } => commands::eta::run(commands::eta::EtaCommandConfig {
            history_path: &history,
            config_path: config.as_deref(),
            output_path: output.as_deref(),
            gti,
            manual: manual_current.zip(manual_slope),
            slope_units,
        }),
        Commands::Merge {
            history,
            input,
            dry_run,
        } => commands::merge::run(&history, &input, dry_run),
        Commands::Append {
            history,
            degrees,
            at,
            config,
        } => commands::append::run(&history, degrees, at, config.as_deref()),
    };

    if let Err(e) = outcome {
        eprintln!("Error: {e}");
        std::process::exit(1);
    }
}
