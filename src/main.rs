//! Straylight CLI entry point.
//!
//! Provides `controller` to run the namespace allocator until interrupted,
//! `repair` for a single reconciliation pass, `create-namespace` to add a
//! tenant, `review` to see which policy would admit a pod, and
//! `check-policies` to validate the policy directory.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Context;
use clap::{Parser, Subcommand};
use tokio::sync::watch;
use tracing::{info, warn};

use straylight::admission::{Admission, ReviewRequest};
use straylight::allocator::default_mcs_allocation;
use straylight::config::{self, AllocationMode, Config, RuntimePaths};
use straylight::controller::legacy::InProcessAllocator;
use straylight::controller::repair::Repair;
use straylight::controller::shared::SharedRecordAllocator;
use straylight::controller::{Controller, NamespaceSync};
use straylight::policy::{self, priority, PolicyMatcher};
use straylight::store::sqlite::SqliteStore;
use straylight::store::{NamespaceStore, RangeAllocationStore};
use straylight::types::{Namespace, Pod, UserInfo};

/// Straylight: tenant UID/MCS allocation and pod security admission.
#[derive(Parser)]
#[command(name = "straylight", version, about)]
struct Cli {
    /// Configuration root; defaults to `~/.straylight`.
    #[arg(long, global = true)]
    root: Option<PathBuf>,

    /// Subcommand to execute.
    #[command(subcommand)]
    command: Command,
}

/// Available CLI subcommands.
#[derive(Subcommand)]
enum Command {
    /// Run the namespace allocation controller until interrupted.
    Controller,
    /// Rebuild the shared allocation record once and exit.
    Repair,
    /// Create a namespace.
    CreateNamespace {
        /// Namespace name.
        name: String,
    },
    /// Report which policy would admit a pod.
    Review {
        /// Pod JSON file, or `-` for stdin.
        #[arg(long)]
        pod: PathBuf,
        /// Requesting user.
        #[arg(long)]
        user: String,
        /// Groups of the requesting user.
        #[arg(long = "group")]
        groups: Vec<String>,
        /// Namespace of the pod; overrides the one in the file.
        #[arg(long)]
        namespace: Option<String>,
    },
    /// Validate the policy directory and print policies in admission order.
    CheckPolicies,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let root = match cli.root {
        Some(root) => root,
        None => config::config_dir()?,
    };
    let config = load_config_or_default(&root.join("config.toml"))?;
    let paths = RuntimePaths::resolve(&root, &config);

    match cli.command {
        Command::Controller => handle_controller(&config, &paths).await,
        Command::Repair => handle_repair(&config, &paths).await,
        Command::CreateNamespace { name } => handle_create_namespace(&paths, name).await,
        Command::Review {
            pod,
            user,
            groups,
            namespace,
        } => handle_review(&config, &paths, &pod, UserInfo::new(user, groups), namespace).await,
        Command::CheckPolicies => handle_check_policies(&paths),
    }
}

/// A missing `config.toml` means defaults.
fn load_config_or_default(path: &Path) -> anyhow::Result<Config> {
    if path.exists() {
        config::load_config(path)
    } else {
        Ok(Config::default())
    }
}

fn build_repair(config: &Config, store: &Arc<SqliteStore>) -> anyhow::Result<Repair> {
    let allocation = &config.allocation;
    let range = allocation.uid_range().context("invalid allocation.uid_range")?;
    let namespaces: Arc<dyn NamespaceStore> = Arc::clone(store) as Arc<dyn NamespaceStore>;
    let records: Arc<dyn RangeAllocationStore> = Arc::clone(store) as Arc<dyn RangeAllocationStore>;
    Ok(Repair::new(
        namespaces,
        records,
        range,
        allocation.record_name.clone(),
        config.annotations.uid_range.clone(),
        allocation.repair_interval(),
    )
    .with_conflict_retries(allocation.conflict_retries))
}

/// Run the allocation controller (and repair, in shared mode) until ctrl-c.
async fn handle_controller(config: &Config, paths: &RuntimePaths) -> anyhow::Result<()> {
    let _logging_guard = straylight::logging::init_production(&paths.logs_dir)?;

    let allocation = &config.allocation;
    let range = allocation.uid_range().context("invalid allocation.uid_range")?;
    let mcs_range = allocation.mcs_range().context("invalid allocation.mcs_range")?;
    let mcs = default_mcs_allocation(range, mcs_range.clone(), allocation.mcs_labels_per_project);

    let store = Arc::new(SqliteStore::open(&paths.database).await?);
    let namespaces: Arc<dyn NamespaceStore> = Arc::clone(&store) as Arc<dyn NamespaceStore>;

    let (shutdown_tx, _) = watch::channel(false);
    let shutdown_tx = Arc::new(shutdown_tx);
    let mut repair_loop = None;

    let sync: Arc<dyn NamespaceSync> = match allocation.mode {
        AllocationMode::Shared => {
            let repair = build_repair(config, &store)?;
            // A record that cannot be repaired at startup is fatal.
            repair.run_once().await.context("initial repair failed")?;
            repair_loop = Some(repair);

            let records: Arc<dyn RangeAllocationStore> =
                Arc::clone(&store) as Arc<dyn RangeAllocationStore>;
            Arc::new(
                SharedRecordAllocator::new(
                    Arc::clone(&namespaces),
                    records,
                    range,
                    allocation.record_name.clone(),
                    mcs,
                    config.annotations.clone(),
                )
                .with_conflict_retries(allocation.conflict_retries),
            )
        }
        AllocationMode::InProcess => {
            let allocator =
                InProcessAllocator::new(Arc::clone(&namespaces), range, mcs, config.annotations.clone());
            allocator.prime().await.context("failed to load existing allocations")?;
            Arc::new(allocator)
        }
    };

    let mut controller = Controller::new(namespaces, sync, allocation.workers, allocation.max_retries);
    if let Some(period) = allocation.resync_interval() {
        controller = controller.with_resync(period);
    }
    let controller = Arc::new(controller);

    info!(
        uid_range = %range,
        mcs_range = %mcs_range,
        mode = ?allocation.mode,
        database = %paths.database.display(),
        "straylight controller started"
    );

    let signal_tx = Arc::clone(&shutdown_tx);
    tokio::spawn(async move {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!(error = %e, "failed to listen for ctrl-c");
            return;
        }
        info!("shutdown requested");
        signal_tx.send_replace(true);
    });

    // A failed repair pass stops the whole process.
    let outcome = match repair_loop {
        Some(repair) => controller.run_with_repair(repair, &shutdown_tx).await,
        None => controller.run(shutdown_tx.subscribe()).await,
    };
    outcome.context("controller stopped with an error")
}

/// Rebuild the shared record once.
async fn handle_repair(config: &Config, paths: &RuntimePaths) -> anyhow::Result<()> {
    straylight::logging::init_cli();
    let store = Arc::new(SqliteStore::open(&paths.database).await?);
    let report = build_repair(config, &store)?
        .run_once()
        .await
        .context("repair failed")?;
    println!("allocated: {}  skipped: {}", report.allocated, report.skipped);
    Ok(())
}

/// Create an empty namespace; the controller allocates it.
async fn handle_create_namespace(paths: &RuntimePaths, name: String) -> anyhow::Result<()> {
    straylight::logging::init_cli();
    let store = SqliteStore::open(&paths.database).await?;
    let created = NamespaceStore::create(&store, &Namespace::new(name))
        .await
        .context("failed to create namespace")?;
    println!("namespace {} created", created.name);
    Ok(())
}

/// Print which policy would admit the pod, as JSON.
async fn handle_review(
    config: &Config,
    paths: &RuntimePaths,
    pod_path: &Path,
    user: UserInfo,
    namespace: Option<String>,
) -> anyhow::Result<()> {
    straylight::logging::init_cli();

    let contents = if pod_path == Path::new("-") {
        std::io::read_to_string(std::io::stdin()).context("failed to read pod from stdin")?
    } else {
        std::fs::read_to_string(pod_path)
            .with_context(|| format!("failed to read pod {}", pod_path.display()))?
    };
    let mut pod: Pod = serde_json::from_str(&contents).context("failed to parse pod JSON")?;
    if let Some(namespace) = namespace {
        pod.namespace = namespace;
    }

    let policies = policy::load_policies(&paths.policies_dir)?;
    let store = Arc::new(SqliteStore::open(&paths.database).await?);
    let admission = Admission::new(
        PolicyMatcher::new(policies),
        store as Arc<dyn NamespaceStore>,
        config.annotations.clone(),
    );

    let response = admission.review(&ReviewRequest { pod, user }).await?;
    println!("{}", serde_json::to_string_pretty(&response)?);
    Ok(())
}

/// Load every policy and list them in the order admission tries them.
fn handle_check_policies(paths: &RuntimePaths) -> anyhow::Result<()> {
    straylight::logging::init_cli();
    let mut policies = policy::load_policies(&paths.policies_dir)?;
    priority::sort_by_priority(&mut policies);
    for p in &policies {
        println!(
            "{}\tpriority={}\tscore={}",
            p.name,
            p.priority.map_or_else(|| "-".to_owned(), |v| v.to_string()),
            priority::score(p)
        );
    }
    println!("{} policies OK", policies.len());
    Ok(())
}
