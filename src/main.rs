mod cache;
mod config;
mod device;
mod direct;
mod harness;
mod mapping;
mod report;
mod sink;

use std::io;
use std::path::PathBuf;
use std::process::ExitCode;

use env_logger::Env;
use log::{debug, info};

use crate::cache::ProcCacheController;
use crate::config::Config;

fn main() -> ExitCode {
    // RUST_LOG=debug for per-stage detail. Logs go to stderr; stdout carries
    // only the result lines.
    env_logger::Builder::from_env(Env::default().default_filter_or("info")).init();

    let mut args = std::env::args_os();
    let prog = args.next().map(PathBuf::from).unwrap_or_default();
    let Some(device) = args.next().map(PathBuf::from) else {
        eprintln!("usage: sudo {} <device>", prog.display());
        return ExitCode::FAILURE;
    };

    let config = Config::default();
    debug!("{:?}", config);
    let stdout = io::stdout().lock();
    match harness::run(&device, &config, &ProcCacheController::default(), stdout) {
        Ok(summary) => {
            info!(
                "{} experiments completed, {} bytes used to fill the cache",
                summary.results.len(),
                summary.fill_size
            );
            ExitCode::SUCCESS
        }
        Err(e) => {
            eprintln!("error: {e:#}");
            ExitCode::FAILURE
        }
    }
}
