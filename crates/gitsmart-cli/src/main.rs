//! gitsmart CLI - talk the git smart protocol to a `git://` remote.

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

mod commands;
mod daemon;
mod pack_file;
mod url;

/// gitsmart - git smart protocol client
#[derive(Parser, Debug)]
#[command(name = "gitsmart")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Increase verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// YAML file with protocol tuning
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// List the refs a remote advertises
    LsRemote {
        /// Remote URL (git://host[:port]/path)
        url: String,
        /// Print refs and capabilities as JSON
        #[arg(long)]
        json: bool,
    },

    /// Negotiate with a remote and store the pack it sends
    FetchPack {
        /// Remote URL (git://host[:port]/path)
        url: String,
        /// Where to write the pack
        output: PathBuf,
        /// Ref name or object id to fetch (default: every advertised ref)
        #[arg(short, long)]
        want: Vec<String>,
        /// Object id the local side already has, newest first
        #[arg(long)]
        have: Vec<String>,
    },

    /// Show version information
    Version,
}

fn main() {
    let cli = Cli::parse();

    // Initialize tracing
    let log_level = match cli.verbose {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| format!("gitsmart={log_level}").into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let result = commands::load_config(cli.config.as_deref()).and_then(|config| match cli.command {
        Commands::LsRemote { url, json } => commands::ls_remote(&url, json, config),
        Commands::FetchPack {
            url,
            output,
            want,
            have,
        } => commands::fetch_pack(&url, &output, &want, &have, config),
        Commands::Version => {
            println!("gitsmart {}", env!("CARGO_PKG_VERSION"));
            Ok(())
        }
    });

    if let Err(e) = result {
        eprintln!("Error: {e:#}");
        std::process::exit(1);
    }
}
