//! iiifetch CLI - IIIF manifest downloader
//!
//! Fetches the page images referenced by IIIF Presentation manifests
//! (v2 and v3) into local directories, with per-institution rate
//! limiting and size negotiation handled by the core engine.

mod commands;
mod output;
mod progress;

use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

/// iiifetch - download page images from IIIF manifests
#[derive(Parser)]
#[command(name = "iiifetch")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    /// Output format
    #[arg(long, default_value = "human")]
    output: OutputFormat,

    /// Verbose logging
    #[arg(short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Clone, Copy, Debug, clap::ValueEnum)]
enum OutputFormat {
    Human,
    Json,
}

#[derive(Subcommand)]
enum Commands {
    /// Download all page images of one or more manifests
    Download {
        /// Manifest URLs
        urls: Vec<String>,

        /// File with one manifest URL per line
        #[arg(short, long)]
        file: Option<PathBuf>,

        /// Base directory for downloaded images
        #[arg(short, long, env = "IIIF_IMG_DIR")]
        output_dir: Option<PathBuf>,

        /// Maximum image dimension in pixels
        #[arg(long, env = "IIIF_MAX_SIZE")]
        max_size: Option<u32>,

        /// Minimum image dimension in pixels (best effort)
        #[arg(long, env = "IIIF_MIN_SIZE")]
        min_size: Option<u32>,

        /// Attempts per image before recording a failure
        #[arg(long, env = "IIIF_RETRY_ATTEMPTS")]
        retries: Option<u32>,

        /// Accept responses shorter than their declared Content-Length
        #[arg(long, env = "IIIF_ALLOW_TRUNCATION")]
        allow_truncation: bool,

        /// Save the raw manifest JSON next to the images
        #[arg(long, env = "IIIF_SAVE_MANIFEST")]
        save_manifest: bool,
    },

    /// Fetch and summarize a manifest without downloading images
    Probe {
        /// Manifest URL
        url: String,
    },

    /// Show the builtin institution policy table
    Policies,

    /// Generate shell completions
    Completions {
        /// Shell to generate completions for
        shell: clap_complete::Shell,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let default_filter = if cli.verbose { "iiifetch=debug" } else { "warn" };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter)),
        )
        .with_writer(std::io::stderr)
        .init();

    match cli.command {
        Commands::Download {
            urls,
            file,
            output_dir,
            max_size,
            min_size,
            retries,
            allow_truncation,
            save_manifest,
        } => {
            commands::download(
                commands::DownloadArgs {
                    urls,
                    file,
                    output_dir,
                    max_size,
                    min_size,
                    retries,
                    allow_truncation,
                    save_manifest,
                },
                cli.output,
            )
            .await?
        }

        Commands::Probe { url } => commands::probe(&url, cli.output).await?,

        Commands::Policies => commands::policies(cli.output)?,

        Commands::Completions { shell } => {
            use clap::CommandFactory;
            clap_complete::generate(shell, &mut Cli::command(), "iiifetch", &mut std::io::stdout());
        }
    }

    Ok(())
}
