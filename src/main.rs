use std::error::Error;
use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::Duration;

use clap::Parser;
use crossbeam_channel::bounded;
use tracing_subscriber::EnvFilter;

use gpulogd::app;
use gpulogd::config::{self, LogKind};
use gpulogd::monitor::NvmlMonitor;
use gpulogd::record::{DEVICE_LOG_HEADER, PROCESS_LOG_HEADER};

/// Logs NVIDIA device and process utilisation for offline job profiling.
#[derive(Parser, Debug)]
#[command(name = "gpulogd", version, about)]
struct Cli {
    /// Device utilisation log path
    /// (default gpu-dev-util[-$SLURM_JOB_ID[-$SLURM_ARRAY_TASK_ID]].log)
    #[arg(long)]
    devlog: Option<PathBuf>,

    /// Process utilisation log path
    /// (default gpu-proc-util[-$SLURM_JOB_ID[-$SLURM_ARRAY_TASK_ID]].log)
    #[arg(long)]
    proclog: Option<PathBuf>,

    /// Sampling interval in seconds
    #[arg(
        long,
        default_value_t = config::DEFAULT_INTERVAL_SECS,
        value_parser = clap::value_parser!(u64).range(1..),
    )]
    frequency: u64,
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .init();

    if let Err(err) = run(Cli::parse()) {
        tracing::error!("{err}");
        std::process::exit(1);
    }
}

fn run(cli: Cli) -> Result<(), Box<dyn Error>> {
    let dev_path = cli
        .devlog
        .unwrap_or_else(|| PathBuf::from(config::default_log_path(LogKind::Device)));
    let proc_path = cli
        .proclog
        .unwrap_or_else(|| PathBuf::from(config::default_log_path(LogKind::Process)));

    let mut dev_log = open_log(&dev_path, DEVICE_LOG_HEADER)?;
    let mut proc_log = open_log(&proc_path, PROCESS_LOG_HEADER)?;

    let monitor = NvmlMonitor::new()?;

    let (stop_tx, stop_rx) = bounded(1);
    ctrlc::set_handler(move || {
        let _ = stop_tx.try_send(());
    })?;

    tracing::info!(
        devlog = %dev_path.display(),
        proclog = %proc_path.display(),
        frequency = cli.frequency,
        "sampling started"
    );

    app::run(
        &monitor,
        &mut dev_log,
        &mut proc_log,
        Duration::from_secs(cli.frequency),
        &stop_rx,
    )?;

    tracing::info!("stop signal received, shutting down");
    Ok(())
}

/// Open a log for appending, writing the header line when the stream is new.
fn open_log(path: &Path, header: &str) -> Result<File, Box<dyn Error>> {
    let mut file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .map_err(|err| format!("log file {} not created: {err}", path.display()))?;
    let is_new = file
        .metadata()
        .map_err(|err| format!("log file {} not readable: {err}", path.display()))?
        .len()
        == 0;
    if is_new {
        writeln!(file, "{header}")?;
        file.flush()?;
    }
    Ok(file)
}
