use std::path::PathBuf;

use clap::{Parser, Subcommand};

#[derive(Parser, Debug)]
#[command(name = "batchcast")]
#[command(author, version, about = "Concurrent multi-account batch uploads and clip fetching")]
pub struct Cli {
    /// Path to config file (falls back to CONFIG_PATH, then batchcast.toml)
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run the job scheduler and admin API until SIGINT/SIGTERM
    Serve,

    /// Upload one video from every account now and print the report
    Dispatch {
        /// Video file path or URL
        #[arg(long)]
        video: String,

        /// Post title
        #[arg(long)]
        title: String,

        /// Credential store to dispatch across (defaults to [accounts] path)
        #[arg(long)]
        accounts: Option<PathBuf>,

        /// Extra upload switch passed as {option.<key>}, repeatable
        #[arg(long = "option", value_name = "KEY=VALUE", value_parser = parse_key_val)]
        options: Vec<(String, String)>,
    },

    /// Download resources with bounded retries and print one result per resource
    Fetch {
        /// Output directory (defaults to [fetch] output_dir)
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Attempts per resource
        #[arg(long)]
        retries: Option<u32>,

        /// Concurrent workers
        #[arg(long)]
        workers: Option<usize>,

        /// Resources to fetch (URLs or identifiers)
        #[arg(required = true)]
        resources: Vec<String>,
    },
}

fn parse_key_val(s: &str) -> Result<(String, String), String> {
    let (key, value) = s
        .split_once('=')
        .ok_or_else(|| format!("expected KEY=VALUE, got `{s}`"))?;
    if key.trim().is_empty() {
        return Err(format!("empty key in `{s}`"));
    }
    Ok((key.trim().to_string(), value.to_string()))
}
