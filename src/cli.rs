use clap::builder::styling::AnsiColor;
use clap::builder::Styles;
use clap::{Parser, Subcommand};
use std::path::PathBuf;

const CLAP_STYLING: Styles = Styles::styled()
    .header(AnsiColor::BrightGreen.on_default().bold())
    .usage(AnsiColor::BrightGreen.on_default().bold())
    .literal(AnsiColor::BrightCyan.on_default().bold())
    .placeholder(AnsiColor::BrightCyan.on_default());

#[derive(Parser)]
#[command(name = "ltfsvol")]
#[command(about = "Exercise the LTFS on-cartridge volume engine against a simulated cartridge")]
#[command(version)]
#[command(styles = CLAP_STYLING)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Enable verbose output
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Specify configuration file path
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Format a simulated cartridge (writes labels, then an initial empty index)
    Format {
        /// Directory standing in for the cartridge (file-backed test device)
        #[arg(short = 't', long = "tape", value_name = "DEVICE")]
        device: PathBuf,

        /// Simulated per-partition capacity in bytes
        #[arg(long, default_value_t = 2_500_000_000_000)]
        capacity_bytes: u64,

        /// Block size in bytes (minimum 4096)
        #[arg(long, default_value_t = 524_288)]
        block_size: u32,

        /// Six-character barcode (omit for no barcode)
        #[arg(long)]
        barcode: Option<String>,

        /// Enable the on-tape compression flag
        #[arg(long)]
        compression: bool,

        /// Format as a WORM cartridge
        #[arg(long)]
        worm: bool,
    },

    /// Write files or a directory tree into the volume
    Write {
        /// Directory standing in for the cartridge
        #[arg(short = 't', long = "tape", value_name = "DEVICE")]
        device: PathBuf,

        /// Target path inside the volume
        #[arg(short = 'o', long = "output", value_name = "DESTINATION")]
        destination: String,

        /// Source file or folder path
        #[arg(value_name = "SOURCE")]
        source: PathBuf,

        /// Verify written data by reading extents back and comparing bytes
        #[arg(long)]
        verify: bool,

        /// Show per-file progress
        #[arg(short, long)]
        progress: bool,
    },

    /// Read from the volume: list a directory or extract a file
    Read {
        /// Directory standing in for the cartridge
        #[arg(short = 't', long = "tape", value_name = "DEVICE")]
        device: PathBuf,

        /// Source path inside the volume (root if omitted)
        #[arg(value_name = "SOURCE")]
        source: Option<String>,

        /// Write the extracted file's bytes here instead of stdout
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Show volume space accounting
    Space {
        /// Directory standing in for the cartridge
        #[arg(short = 't', long = "tape", value_name = "DEVICE")]
        device: PathBuf,

        /// Show per-partition capacity alongside the summary
        #[arg(short = 'd', long = "detailed")]
        detailed: bool,
    },
}

impl Cli {
    pub fn parse_args() -> Self {
        Self::parse()
    }
}
