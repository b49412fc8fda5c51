//! Application orchestration and command routing.
//!
//! Handles command-line argument parsing and delegates to appropriate command handlers.

use crate::commands;
use crate::logging;
use clap::{CommandFactory, Parser, Subcommand};
use clap_complete::{generate, Shell};
use std::io;

/// Real-time audio spectrogram for the terminal
#[derive(Parser)]
#[command(name = "spectrec")]
#[command(version)]
#[command(about = "Real-time audio spectrogram for the terminal")]
#[command(long_about = "Real-time audio spectrogram for the terminal.\n\nCaptures audio from an input device, runs a windowed FFT on every frame and\nshows the rolling spectrogram as a heat map, or streams the rows as NDJSON.\n\nDEFAULT COMMAND:\n    If no command is specified, 'record' is used by default.\n\nEXAMPLES:\n    # Live heat map from the configured device\n    $ spectrec\n\n    # Check the display with a 1 kHz test tone\n    $ spectrec record --tone 1000\n\n    # Ten seconds of quantized rows for another program\n    $ spectrec stream --duration 10 --quantize > rows.ndjson\n\n    # Toggle capture from a key binding\n    $ pkill -USR1 spectrec")]
#[command(
    after_help = "CONFIGURATION:\n    Config file:        ~/.config/spectrec/spectrec.toml\n    Recordings:         ~/.local/share/spectrec/recordings/\n    Logs:               ~/.local/state/spectrec/spectrec.log.*"
)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Show the live spectrogram (default)
    ///
    /// Press s/Enter to start, Space/x to stop, q/Esc to quit.
    /// SIGUSR1 toggles capture.
    #[command(visible_alias = "r")]
    Record {
        /// Analyze a synthetic sine tone at this frequency (Hz) instead of the device
        #[arg(long, value_name = "HZ")]
        tone: Option<f32>,
    },

    /// Write spectrogram rows to stdout as newline-delimited JSON
    ///
    /// Emits a metadata line, then one row line per tick, until Ctrl+C
    /// or the duration elapses.
    #[command(visible_alias = "s")]
    Stream {
        /// Stop after this many seconds
        #[arg(short, long, value_name = "SECS")]
        duration: Option<u64>,

        /// Emit row values as integers 0-255 instead of floats
        #[arg(short, long)]
        quantize: bool,

        /// Analyze a synthetic sine tone at this frequency (Hz) instead of the device
        #[arg(long, value_name = "HZ")]
        tone: Option<f32>,
    },

    /// Open configuration file in your preferred editor
    #[command(visible_alias = "c")]
    Config,

    /// List available audio input devices
    ///
    /// Shows device IDs, names, and default configurations to help
    /// configure the input device in spectrec.toml.
    #[command(name = "list-devices")]
    ListDevices,

    /// Show recent log entries from the application
    Logs,

    /// Generate shell completion script
    ///
    /// Examples:
    ///   spectrec completions bash > spectrec.bash
    ///   spectrec completions zsh > _spectrec
    Completions {
        /// The shell to generate completions for
        #[arg(value_enum)]
        shell: Shell,
    },
}

/// Runs the main application based on command-line arguments.
///
/// # Errors
/// - If logging initialization fails
/// - If the selected command fails
pub async fn run() -> Result<(), anyhow::Error> {
    let cli = Cli::parse();

    // Commands that print to the terminal and need no logging
    match &cli.command {
        Some(Commands::Completions { shell }) => {
            generate(*shell, &mut Cli::command(), "spectrec", &mut io::stdout());
            return Ok(());
        }
        Some(Commands::ListDevices) => return commands::handle_list_devices(),
        Some(Commands::Logs) => return commands::handle_logs(),
        _ => {}
    }

    logging::init_logging()?;
    tracing::debug!("spectrec {} starting", env!("CARGO_PKG_VERSION"));

    match cli.command {
        None => commands::handle_record(None).await,
        Some(Commands::Record { tone }) => commands::handle_record(tone).await,
        Some(Commands::Stream {
            duration,
            quantize,
            tone,
        }) => commands::handle_stream(duration, quantize, tone).await,
        Some(Commands::Config) => commands::handle_config(),
        Some(Commands::Completions { .. }) | Some(Commands::ListDevices) | Some(Commands::Logs) => {
            unreachable!("These commands are handled earlier")
        }
    }
}
