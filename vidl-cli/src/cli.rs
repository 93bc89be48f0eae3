use std::path::PathBuf;

use clap::Parser;
use vidl_engine::{DownloadMode, VariantSelectionPolicy};

/// Download a video from an HLS playlist, a direct media link or a web page.
#[derive(Parser, Debug, Clone)]
#[command(name = "vidl", version, about)]
pub struct Args {
    /// Source URL
    pub url: String,

    /// Output file; relative paths are placed under --save-dir when given
    #[arg(short, long)]
    pub output: PathBuf,

    /// How to treat the source URL
    #[arg(short, long, value_enum)]
    pub mode: Option<DownloadMode>,

    /// Root for per-job segment directories (default: system temp dir)
    #[arg(long)]
    pub cache_dir: Option<PathBuf>,

    /// Directory the output file is written to
    #[arg(long)]
    pub save_dir: Option<PathBuf>,

    /// Extra request header, `Name: Value` (repeatable)
    #[arg(short = 'H', long = "header", value_name = "HEADER")]
    pub headers: Vec<String>,

    /// Overwrite the output file if it exists
    #[arg(short, long)]
    pub force: bool,

    /// Keep the cache directory after a successful download
    #[arg(long)]
    pub keep_cache: bool,

    /// Concurrent segment downloads
    #[arg(short = 't', long = "threads")]
    pub threads: Option<usize>,

    /// Simultaneous open HTTP requests
    #[arg(long)]
    pub max_connections: Option<usize>,

    /// Time ranges to leave out, in seconds: `0-10,100-110`
    #[arg(long, value_name = "RANGES")]
    pub ignore_segments: Option<String>,

    /// Retries per segment after the first attempt
    #[arg(short, long)]
    pub retries: Option<u32>,

    /// Failed segments tolerated before the job fails
    #[arg(long)]
    pub max_failed_segments: Option<usize>,

    /// Variant of a master playlist: highest, lowest, bitrate=N or WxH
    #[arg(long)]
    pub variant: Option<VariantSelectionPolicy>,

    /// ffmpeg binary used to remux into the output container
    #[arg(long, value_name = "PATH")]
    pub ffmpeg: Option<PathBuf>,

    /// Proxy URL (http, https or socks5), credentials allowed in the URL
    #[arg(long)]
    pub proxy: Option<String>,

    /// Per-request connect and read timeout in seconds
    #[arg(long, value_name = "SECS")]
    pub timeout: Option<u64>,

    /// Config file (default: <config dir>/vidl/config.toml)
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Print the job result as JSON
    #[arg(long)]
    pub json: bool,

    /// Debug logging
    #[arg(short, long, conflicts_with = "quiet")]
    pub verbose: bool,

    /// Errors only
    #[arg(short, long)]
    pub quiet: bool,
}
