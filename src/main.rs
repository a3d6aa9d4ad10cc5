use std::path::PathBuf;

use anyhow::Result;
use clap::{Args, Parser, Subcommand};
use tokio_util::sync::CancellationToken;

mod components;
mod config;
mod error;
mod gitops;
mod k8s;
mod lifecycle;
mod logging;
mod notify;
mod preflight;
mod progress;
mod provider;
mod provisioner;
mod registry;
mod runtime;

use config::{
    load_distribution, load_root, CniOption, Distribution, GitOpsEngine, Overrides, PolicyEngine,
    Provider, Toggle,
};
use lifecycle::{Orchestrator, UpdateOptions};
use notify::Notifier;
use runtime::DockerRuntime;

#[derive(Parser)]
#[command(name = "ksail")]
#[command(version)]
#[command(about = "Declarative local Kubernetes clusters and their GitOps workloads")]
struct Cli {
    /// Directory to resolve ksail.yaml from (defaults to the working
    /// directory).
    #[arg(short, long, global = true)]
    directory: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

/// Spec overrides shared by create and update.
#[derive(Args, Default)]
struct SpecFlags {
    #[arg(long)]
    distribution: Option<Distribution>,

    #[arg(long)]
    provider: Option<Provider>,

    /// Mirror registry spec, host=endpoint[,endpoint...]; repeatable.
    #[arg(long = "mirror-registry", value_name = "HOST=ENDPOINT")]
    mirror_registry: Vec<String>,

    #[arg(long, value_name = "PORT")]
    local_registry_port: Option<u16>,

    #[arg(long, value_name = "N")]
    control_planes: Option<u32>,

    #[arg(long, value_name = "N")]
    workers: Option<u32>,

    #[arg(long)]
    gitops_engine: Option<GitOpsEngine>,

    #[arg(long)]
    cni: Option<CniOption>,

    #[arg(long)]
    csi: Option<Toggle>,

    #[arg(long)]
    metrics_server: Option<Toggle>,

    #[arg(long)]
    load_balancer: Option<Toggle>,

    #[arg(long)]
    cert_manager: bool,

    #[arg(long)]
    policy_engine: Option<PolicyEngine>,
}

impl SpecFlags {
    fn overrides(&self) -> Overrides {
        Overrides {
            distribution: self.distribution,
            provider: self.provider,
            cni: self.cni,
            csi: self.csi,
            metrics_server: self.metrics_server,
            load_balancer: self.load_balancer,
            cert_manager: self.cert_manager.then_some(Toggle::Enabled),
            policy_engine: self.policy_engine,
            gitops_engine: self.gitops_engine,
            control_planes: self.control_planes,
            workers: self.workers,
            local_registry_port: self.local_registry_port,
            mirror_registries: self.mirror_registry.clone(),
        }
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Provision a cluster with its registries, components, and GitOps
    /// engine
    Create {
        #[command(flatten)]
        spec: SpecFlags,

        /// Destroy an existing cluster with the same name first
        #[arg(long)]
        force: bool,
    },
    /// Tear down the cluster and the registries ksail created for it
    Destroy {
        /// Also delete registry cache volumes
        #[arg(long)]
        delete_volumes: bool,
    },
    /// Start the cluster's stopped nodes
    Start,
    /// Stop the cluster's running nodes
    Stop,
    /// List clusters
    List {
        /// Include every supported distribution
        #[arg(long)]
        all: bool,
    },
    /// Reconcile the cluster with the declared configuration
    Update {
        #[command(flatten)]
        spec: SpecFlags,

        /// Allow changes that require recreating the cluster
        #[arg(long)]
        force: bool,

        /// Show the categorized change list without applying it
        #[arg(long)]
        dry_run: bool,

        /// Reboot nodes one at a time instead of all at once
        #[arg(long)]
        rolling_reboot: bool,
    },
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    let notifier = Notifier::stdout();

    match run(cli, notifier.clone()).await {
        Ok(()) => {}
        Err(err) => {
            notifier.error(format!("{:#}", err));
            std::process::exit(error::exit_code(&err));
        }
    }
}

async fn run(cli: Cli, notifier: Notifier) -> Result<()> {
    let cwd = match cli.directory {
        Some(directory) => directory,
        None => std::env::current_dir()?,
    };

    let overrides = match &cli.command {
        Commands::Create { spec, .. } | Commands::Update { spec, .. } => spec.overrides(),
        _ => Overrides::default(),
    };

    let project = load_root(&cwd, &overrides)?;
    let cluster_name = project.cluster.cluster_name();
    // The guard flushes buffered log lines when run() returns.
    let _log_guard = match logging::init_logging(&project.cluster.spec.logging, &cluster_name) {
        Ok(guard) => guard,
        Err(err) => {
            notifier.warning(format!("file logging disabled: {:#}", err));
            None
        }
    };
    tracing::info!(config = %project.config_path.display(), cluster = %cluster_name, "configuration loaded");

    let cancel = CancellationToken::new();
    spawn_signal_handler(cancel.clone());

    let runtime = match DockerRuntime::connect() {
        Ok(runtime) => Some(runtime),
        Err(err) => {
            tracing::debug!(error = %err, "container runtime unavailable");
            None
        }
    };

    let dist_config = load_distribution(&project.cluster, &project.root_dir)?;
    let mut orchestrator =
        Orchestrator::new(project, dist_config, runtime, notifier.clone(), cancel);

    match cli.command {
        Commands::Create { force, .. } => {
            if force {
                orchestrator.destroy(false).await?;
            }
            orchestrator.create().await
        }
        Commands::Destroy { delete_volumes } => orchestrator.destroy(delete_volumes).await,
        Commands::Start => orchestrator.start().await,
        Commands::Stop => orchestrator.stop().await,
        Commands::List { all } => orchestrator.list(all).await,
        Commands::Update {
            force,
            dry_run,
            rolling_reboot,
            ..
        } => {
            let options = UpdateOptions {
                dry_run,
                force,
                rolling_reboot,
            };
            orchestrator.update(&options).await.map(|_| ())
        }
    }
}

fn spawn_signal_handler(cancel: CancellationToken) {
    tokio::spawn(async move {
        #[cfg(unix)]
        {
            use tokio::signal::unix::{signal, SignalKind};
            match signal(SignalKind::terminate()) {
                Ok(mut term) => {
                    tokio::select! {
                        _ = tokio::signal::ctrl_c() => {}
                        _ = term.recv() => {}
                    }
                }
                Err(_) => {
                    let _ = tokio::signal::ctrl_c().await;
                }
            }
        }
        #[cfg(not(unix))]
        {
            let _ = tokio::signal::ctrl_c().await;
        }
        tracing::info!("interrupt received, cancelling");
        cancel.cancel();
    });
}
