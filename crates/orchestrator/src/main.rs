use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use tokio::sync::mpsc;
use tracing::info;

use orchestrator::config::OrchestratorConfig;
use orchestrator::external::fakes::{FakeImages, FakeRegistry};
use orchestrator::history::FileHistoryStore;
use orchestrator::hostpool::HostPool;
use orchestrator::model::ChangeRequest;
use orchestrator::orchestrator::Orchestrator;
use orchestrator::procedure::ProgressEvent;

#[derive(Parser)]
#[command(name = "sdcadm-orchestrator", about = "Plans and executes in-place fleet updates")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Compute an update plan from a batch of change requests and print or persist it.
    GenPlan {
        /// Path to a JSON array of change requests.
        #[arg(long)]
        requests: PathBuf,
        #[arg(long, default_value_t = false)]
        just_images: bool,
        /// Compute and print the plan without persisting a work directory.
        #[arg(long, default_value_t = false)]
        dry_run: bool,
    },
    /// Compute a plan and immediately execute it.
    Apply {
        #[arg(long)]
        requests: PathBuf,
        #[arg(long, default_value_t = false)]
        just_images: bool,
    },
    /// Update the orchestrator's own service in place.
    SelfUpdate {
        #[arg(long)]
        service: String,
        #[arg(long)]
        image: Option<String>,
    },
    /// List recent plan/execution history.
    History {
        #[arg(long, default_value_t = 20)]
        limit: usize,
    },
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    init_logging();

    let config = OrchestratorConfig::load()?;
    config.validate()?;

    let orchestrator = build_orchestrator(&config).await?;

    let cli = Cli::parse();
    match cli.command {
        Command::GenPlan { requests, just_images, dry_run } => {
            let requests = load_requests(&requests)?;
            let (plan, work_dir) = orchestrator.gen_plan(requests, just_images, dry_run).await?;
            println!("{}", plan.to_json_pretty()?);
            if let Some(work_dir) = work_dir {
                info!(path = %work_dir.display(), "plan persisted");
            }
        }
        Command::Apply { requests, just_images } => {
            let requests = load_requests(&requests)?;
            let (plan, work_dir) = orchestrator.gen_plan(requests.clone(), just_images, false).await?;
            let work_dir = work_dir.expect("gen_plan with dry_run=false always returns a work directory");

            let (tx, mut rx) = mpsc::unbounded_channel();
            let progress_task = tokio::spawn(async move {
                while let Some(event) = rx.recv().await {
                    log_progress(event);
                }
            });

            orchestrator.exec_plan(requests, &plan, work_dir, tx).await?;
            progress_task.await.ok();
        }
        Command::SelfUpdate { service, image } => {
            let (tx, mut rx) = mpsc::unbounded_channel();
            let progress_task = tokio::spawn(async move {
                while let Some(event) = rx.recv().await {
                    log_progress(event);
                }
            });

            orchestrator.self_update(&service, image, tx).await?;
            progress_task.await.ok();
        }
        Command::History { limit } => {
            for record in orchestrator.history(limit).await? {
                println!("{} started={} finished={} ok={}", record.uuid, record.started_at, record.finished_at.map(|t| t.to_string()).unwrap_or_else(|| "-".to_string()), record.succeeded());
            }
        }
    }

    Ok(())
}

fn log_progress(event: ProgressEvent) {
    match event {
        ProgressEvent::ProcedureStarted { kind, summary } => info!(procedure = %kind, "{}", summary),
        ProgressEvent::Message(message) => info!("{}", message),
        ProgressEvent::ProcedureFinished { kind } => info!(procedure = %kind, "done"),
    }
}

fn load_requests(path: &std::path::Path) -> Result<Vec<ChangeRequest>, Box<dyn std::error::Error>> {
    let data = std::fs::read_to_string(path)?;
    Ok(serde_json::from_str(&data)?)
}

/// Wires the real `HostPool`-backed `NodeInventory`/`RemoteShellFanout` (the
/// only collaborators with a live transport today) alongside in-memory
/// stand-ins for `ServiceRegistry`/`VmManager`/`ImageStore`/`ImageRegistry`/
/// `NetworkRegistry`, matching the fakes the test suite already exercises.
/// See DESIGN.md for why these five remain unimplemented against a real
/// SAPI/VMAPI/IMGAPI/NAPI backend.
async fn build_orchestrator(config: &OrchestratorConfig) -> Result<Orchestrator, Box<dyn std::error::Error>> {
    let pool = Arc::new(HostPool::new(config.hosts.clone()));
    pool.initialize().await?;

    let registry = Arc::new(FakeRegistry::new());
    let images = Arc::new(FakeImages::new());
    let history = Arc::new(FileHistoryStore::new(&config.paths.work_dir_root));

    struct NoNetworks;
    #[async_trait::async_trait]
    impl orchestrator::external::NetworkRegistry for NoNetworks {
        async fn list_networks(&self) -> orchestrator::external::Result<Vec<String>> {
            Ok(vec![])
        }
        async fn list_nics(&self, _owner_uuid: &str) -> orchestrator::external::Result<Vec<String>> {
            Ok(vec![])
        }
    }

    Ok(Orchestrator::new(
        registry.clone(),
        registry,
        images.clone(),
        images,
        pool.clone(),
        Arc::new(NoNetworks),
        pool,
        history,
        config.safety.clone(),
        config.images.channel_tag.clone(),
        config.paths.lock_file.clone(),
        config.paths.work_dir_root.clone(),
    ))
}

fn init_logging() {
    use tracing_subscriber::EnvFilter;

    tracing_subscriber::fmt().with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info,orchestrator=debug"))).init();
}
