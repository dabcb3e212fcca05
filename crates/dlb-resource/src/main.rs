//! dlb-rsrc: resource planner for the DLB event device.
//!
//! Replays a list of scheduling-domain requests against a simulated device
//! and prints the resources left over, so a deployment can check that its
//! domains fit before touching hardware.

use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;

use clap::{Parser, ValueEnum};
use dlb_hw::sim::SimDlb;
use dlb_resource::{DlbResourceMgr, ResourceError, ResourceMgrConfig, SweepWorker};
use dlb_types::CreateSchedDomainArgs;
use log::{error, info, warn};
use tokio::sync::Mutex;

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum LogFormat {
    /// Plain text through env_logger
    Text,
    /// One JSON object per line through tracing
    Json,
}

/// DLB resource planner
#[derive(Parser, Debug)]
#[command(name = "dlb-rsrc")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Resource manager configuration (JSON)
    #[arg(short = 'c', long)]
    config: Option<PathBuf>,

    /// Domain creation requests (JSON array)
    #[arg(short = 'r', long)]
    requests: Option<PathBuf>,

    /// Reset every created domain before printing the snapshot
    #[arg(long)]
    reset_after: bool,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short = 'l', long, default_value = "info")]
    log_level: String,

    /// Log output format
    #[arg(long, value_enum, default_value = "text")]
    log_format: LogFormat,
}

fn init_logging(args: &Args) -> Result<(), String> {
    match args.log_format {
        LogFormat::Text => {
            env_logger::Builder::from_env(
                env_logger::Env::default().default_filter_or(&args.log_level),
            )
            .try_init()
            .map_err(|e| format!("logging already initialized: {}", e))
        }
        LogFormat::Json => dlb_resource::audit::init_logging(&args.log_level),
    }
}

fn load_requests(path: &Path) -> Result<Vec<CreateSchedDomainArgs>, ResourceError> {
    let json = std::fs::read_to_string(path).map_err(|e| {
        ResourceError::config(format!("cannot read {}: {}", path.display(), e))
    })?;
    serde_json::from_str(&json)
        .map_err(|e| ResourceError::config(format!("invalid requests in {}: {}", path.display(), e)))
}

async fn run(args: &Args) -> Result<(), ResourceError> {
    let config = match &args.config {
        Some(path) => ResourceMgrConfig::from_json_file(path)?,
        None => ResourceMgrConfig::default(),
    };
    let requests = match &args.requests {
        Some(path) => load_requests(path)?,
        None => Vec::new(),
    };

    let worker = SweepWorker::new();
    let sim = Arc::new(SimDlb::new(&config.limits).with_scheduler(worker.clone()));
    let mgr = Arc::new(Mutex::new(DlbResourceMgr::new(config, sim)?));
    let handle = worker.spawn(mgr.clone());

    let mut created = Vec::new();
    {
        let mut mgr = mgr.lock().await;
        for (i, request) in requests.iter().enumerate() {
            match mgr.create_sched_domain(request) {
                Ok(domain) => {
                    info!("request {}: created {}", i, domain);
                    created.push(domain);
                }
                Err(ResourceError::Rejected(status)) => {
                    warn!("request {}: rejected with {}", i, status);
                }
                Err(err) => {
                    error!("request {}: {}", i, err);
                    return Err(err);
                }
            }
        }

        if args.reset_after {
            for domain in &created {
                mgr.reset_domain(*domain)?;
                info!("reset {}", domain);
            }
        }

        let snapshot = serde_json::to_string_pretty(&mgr.get_num_resources())
            .map_err(|e| ResourceError::config(format!("cannot encode snapshot: {}", e)))?;
        println!("{}", snapshot);

        let stats = mgr.stats();
        info!(
            "{} domains created, {} rejected, {} reset, {} faults",
            stats.domains_created, stats.domain_create_rejections, stats.domains_reset, stats.faults
        );
    }

    worker.stop();
    if let Err(e) = handle.await {
        warn!("sweep worker ended abnormally: {}", e);
    }
    Ok(())
}

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();

    if let Err(e) = init_logging(&args) {
        eprintln!("dlb-rsrc: {}", e);
        return ExitCode::FAILURE;
    }

    info!("Starting dlb-rsrc");

    match run(&args).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("dlb-rsrc: {}", e);
            ExitCode::FAILURE
        }
    }
}
