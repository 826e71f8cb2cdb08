use std::process::ExitCode;

use clap::Parser;
use tracing_subscriber::EnvFilter;

pub mod cli;
pub mod commands;
pub mod core;
pub mod models;
pub mod storage;

pub use crate::core::errors::{DownloadError, DownloadResult};
pub use crate::core::manager::{DownloadManager, ProgressSink};
pub use crate::models::download::{DownloadOutcome, FileResult};
pub use crate::models::manifest::{DownloadRequest, ManifestEntry};
pub use modelget_core::core::events::{
    DownloadEvent, EventEmitter, FileCompletion, JobInfo, JobStatus, StrategyKind,
};

fn init_tracing(verbose: bool) {
    let fallback = if verbose { "info,modelget_lib=debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(fallback));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

pub fn run() -> ExitCode {
    let cli = cli::Cli::parse();
    init_tracing(cli.verbose);

    let runtime = match tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
    {
        Ok(rt) => rt,
        Err(e) => {
            eprintln!("error: could not start runtime: {}", e);
            return ExitCode::FAILURE;
        }
    };

    match runtime.block_on(cli::dispatch(cli)) {
        Ok(code) => code,
        Err(e) => {
            eprintln!("error: {:#}", e);
            ExitCode::FAILURE
        }
    }
}
