// SPDX-License-Identifier: GPL-3.0-only

use clap::{Parser, Subcommand};
use filtercam::{DevicePosition, FilterSpec, QualityPreset};
use std::path::PathBuf;

mod cli;

#[derive(Parser)]
#[command(name = "filtercam")]
#[command(about = "Record filtered video from a camera")]
#[command(version = env!("GIT_VERSION"))]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Record a filtered, rotated take
    Record {
        /// Recording duration in seconds
        #[arg(short, long, default_value = "5")]
        duration: u64,

        /// Filter to apply, in order (NAME or NAME:ARG; repeatable)
        #[arg(short, long = "filter")]
        filters: Vec<FilterSpec>,

        /// Camera to use (front or back)
        #[arg(short, long)]
        position: Option<DevicePosition>,

        /// Capture quality (low, medium, high, hd1080, uhd2160)
        #[arg(long)]
        preset: Option<QualityPreset>,

        /// Output file path (default: ~/Videos/filtercam/video_TIMESTAMP.EXT)
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// JSON configuration file
        #[arg(short, long)]
        config: Option<PathBuf>,

        /// Keep the take in landscape orientation
        #[arg(long)]
        no_transcode: bool,

        /// Record the built-in test pattern and tone instead of the devices
        #[arg(long)]
        test_pattern: bool,
    },

    /// List available filters
    Filters,

    /// List capture devices and flash LEDs
    Devices,

    /// Rotate an existing recording
    Transcode {
        input: PathBuf,

        /// Output file path (default: INPUT_rotated.EXT next to the input)
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Print the format of a Y4M recording
    Probe { file: PathBuf },
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Set RUST_LOG to control the log level, e.g. RUST_LOG=filtercam=debug
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .with_target(true)
        .with_level(true)
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Record {
            duration,
            filters,
            position,
            preset,
            output,
            config,
            no_transcode,
            test_pattern,
        } => cli::record(cli::RecordArgs {
            duration,
            filters,
            position,
            preset,
            output,
            config,
            transcode: !no_transcode,
            test_pattern,
        }),
        Commands::Filters => cli::list_filters(),
        Commands::Devices => cli::list_devices(),
        Commands::Transcode { input, output } => cli::transcode(&input, output),
        Commands::Probe { file } => cli::probe(&file),
    }
}
