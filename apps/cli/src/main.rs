mod commands;

use std::path::PathBuf;

use clap::{Parser, Subcommand, ValueEnum};
use murmur_vad::VadMode;
use tracing_subscriber::EnvFilter;

/// murmur -- voice activity and speech pipeline tools.
#[derive(Parser, Debug)]
#[command(name = "murmur", version, about)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run voice activity detection over a WAV file and print speech segments
    Vad {
        /// WAV file (16-bit PCM or float, any supported rate)
        file: PathBuf,

        /// Detection aggressiveness
        #[arg(long, value_enum)]
        mode: Option<ModeArg>,

        /// Consecutive voice blocks needed to start a segment
        #[arg(long)]
        start: Option<u32>,

        /// Consecutive silent blocks needed to end a segment
        #[arg(long)]
        end: Option<u32>,

        /// Block length in milliseconds
        #[arg(long, default_value_t = 60)]
        block_ms: u32,

        /// Print segments as JSON
        #[arg(long)]
        json: bool,
    },

    /// Print the effective configuration
    Config {
        /// Read this file instead of the default location
        #[arg(long)]
        file: Option<PathBuf>,

        /// Only print where the configuration is read from
        #[arg(long)]
        path: bool,
    },
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum ModeArg {
    Quality,
    LowBitrate,
    Aggressive,
    VeryAggressive,
}

impl From<ModeArg> for VadMode {
    fn from(mode: ModeArg) -> Self {
        match mode {
            ModeArg::Quality => VadMode::Quality,
            ModeArg::LowBitrate => VadMode::LowBitrate,
            ModeArg::Aggressive => VadMode::Aggressive,
            ModeArg::VeryAggressive => VadMode::VeryAggressive,
        }
    }
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info,murmur=debug")),
        )
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Vad {
            file,
            mode,
            start,
            end,
            block_ms,
            json,
        } => {
            let options = commands::vad::VadOptions {
                mode: mode.map(Into::into),
                start_threshold: start,
                end_threshold: end,
                block_ms,
            };
            commands::vad::run(&file, options, json)
        }
        Commands::Config { file, path } => commands::config::run(file.as_deref(), path),
    }
}
