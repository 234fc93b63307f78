mod cli;
mod commands;
mod config;
mod dentry;
mod device;
mod error;
mod fs_tree;
mod index;
mod journal;
mod label;
mod logger;
mod volume;

use crate::cli::{Cli, Commands};
use crate::error::Result;
use tracing::{debug, error, info};

fn main() -> Result<()> {
    let args = Cli::parse_args();
    logger::init(args.verbose)?;
    debug!("ltfsvol starting");

    if let Some(path) = &args.config {
        let cfg = config::ConfigFile::load(path)?;
        debug!(
            plugins = cfg.plugins.len(),
            defaults = cfg.defaults.len(),
            "loaded config file {}",
            path.display()
        );
    }

    match run(args) {
        Ok(()) => {
            info!("operation completed successfully");
            Ok(())
        }
        Err(e) => {
            error!("operation failed: {}", e);
            std::process::exit(1);
        }
    }
}

fn run(args: Cli) -> Result<()> {
    match args.command {
        Commands::Format {
            device,
            capacity_bytes,
            block_size,
            barcode,
            compression,
            worm,
        } => commands::format::execute(device, capacity_bytes, block_size, barcode, compression, worm),

        Commands::Write {
            device,
            destination,
            source,
            verify,
            progress,
        } => commands::write::execute(source, device, destination, verify, progress),

        Commands::Read {
            device,
            source,
            output,
        } => commands::read::execute(device, source, output),

        Commands::Space { device, detailed } => commands::space::execute(device, detailed),
    }
}
