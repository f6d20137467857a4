//! Slidecast CLI: inspect, validate and simulate narrated demos.
//!
//! Usage:
//!   slidecast markers <TEXT>       Parse inline markers out of narration text
//!   slidecast resolve <PATH>       Show marker times for every segment
//!   slidecast timing <PATH>        Show the resolved timing cascade
//!   slidecast validate <PATH>      Validate a demo bundle
//!   slidecast simulate <PATH>      Play a demo against simulated media

use std::path::PathBuf;

use clap::{Parser, Subcommand};

mod commands;

#[derive(Parser)]
#[command(
    name = "slidecast",
    about = "Narrated slide decks with marker-driven video sync",
    version,
    author
)]
struct Cli {
    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Emit structured JSON logs
    #[arg(long, global = true)]
    log_json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Parse `{#id}` / `{id#}` markers out of narration text
    Markers {
        /// Narration text (reads --file when omitted)
        text: Option<String>,

        /// Read narration text from a file
        #[arg(short, long)]
        file: Option<PathBuf>,

        /// Print the parse result as JSON
        #[arg(long)]
        json: bool,
    },

    /// Resolve marker times for every segment of a demo
    Resolve {
        /// Path to the demo directory
        path: PathBuf,

        /// Only this slide (e.g. c1_s2)
        #[arg(long)]
        slide: Option<String>,

        /// Print the result as JSON
        #[arg(long)]
        json: bool,
    },

    /// Show the resolved timing of every slide and segment
    Timing {
        /// Path to the demo directory
        path: PathBuf,
    },

    /// Validate a demo bundle
    Validate {
        /// Path to the demo directory
        path: PathBuf,
    },

    /// Play a demo against simulated audio and video
    Simulate {
        /// Path to the demo directory
        path: PathBuf,

        /// Start in manual mode at this slide instead of narrated playback
        #[arg(long)]
        slide: Option<usize>,

        /// Segment to jump to with --slide
        #[arg(long, default_value = "0")]
        segment: usize,

        /// Length of clips without an end bookmark (seconds)
        #[arg(long, default_value = "2.0")]
        clip_secs: f64,

        /// Print every snapshot change as a JSON line
        #[arg(long)]
        json: bool,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let config = slidecast_common::config::AppConfig::load();
    let mut logging = slidecast_common::logging::cli_logging(cli.verbose, cli.log_json);
    logging.file = config.logging.file.clone();
    slidecast_common::logging::init_logging(&logging);

    match cli.command {
        Commands::Markers { text, file, json } => commands::markers::run(text, file, json),
        Commands::Resolve { path, slide, json } => commands::resolve::run(path, slide, json),
        Commands::Timing { path } => commands::timing::run(path),
        Commands::Validate { path } => commands::validate::run(path),
        Commands::Simulate {
            path,
            slide,
            segment,
            clip_secs,
            json,
        } => {
            commands::simulate::run(
                path,
                config.playback,
                slide.map(|s| (s, segment)),
                clip_secs,
                json,
            )
            .await
        }
    }
}
