//! Cluster lifecycle orchestrator
//!
//! Each operation walks an ordered list of stages over a shared context:
//! parsed configuration, the resolved spec, the distribution sub-config,
//! the runtime client, the notifier, and a stage-aware timer. Stages
//! short-circuit on the first error; registry containers created by the
//! current run are rolled back when a later stage fails.

pub mod diff;
mod update;

pub use update::{UpdateOptions, UpdateResult};

use std::path::PathBuf;

use anyhow::{Context, Result};
use tokio_util::sync::CancellationToken;

use crate::components::{plan, ComponentDetector, ComponentInstaller, Helm};
use crate::config::{
    Cluster, ClusterSpec, Distribution, DistributionConfig, GitOpsEngine, K3dRegistries, Project,
    Provider,
};
use crate::error::{self, Error};
use crate::gitops;
use crate::k8s::KubeOps;
use crate::notify::{format_duration, Notifier, Timer};
use crate::preflight;
use crate::provisioner::{make_provisioner, ClusterProvisioner};
use crate::registry::{
    merge, parse_flag_spec, render_hosts_toml, render_k3d_registries, render_talos_mirror_patch,
    specs_from_mirrors_dir, MirrorSpec, RegistryBatch, RegistryInfo, RegistryManager,
};
use crate::runtime::DockerRuntime;

pub(crate) struct StageMeta {
    pub emoji: &'static str,
    pub title: &'static str,
    pub failure_prefix: &'static str,
}

const PREFLIGHT: StageMeta = StageMeta {
    emoji: "🩺",
    title: "Checking prerequisites",
    failure_prefix: "preflight failed",
};
const REGISTRY_SETUP: StageMeta = StageMeta {
    emoji: "🪞",
    title: "Creating mirror registries",
    failure_prefix: "mirror registry setup failed",
};
const NETWORK: StageMeta = StageMeta {
    emoji: "🔗",
    title: "Creating cluster network",
    failure_prefix: "network creation failed",
};
const CONNECT_REGISTRIES: StageMeta = StageMeta {
    emoji: "🔌",
    title: "Connecting registries to the cluster network",
    failure_prefix: "registry network join failed",
};
const LOCAL_REGISTRY: StageMeta = StageMeta {
    emoji: "📦",
    title: "Provisioning local registry",
    failure_prefix: "local registry provisioning failed",
};
const BOOTSTRAP: StageMeta = StageMeta {
    emoji: "🚀",
    title: "Bootstrapping cluster",
    failure_prefix: "cluster bootstrap failed",
};
const LOCAL_REGISTRY_CONNECT: StageMeta = StageMeta {
    emoji: "🔌",
    title: "Connecting local registry",
    failure_prefix: "local registry network join failed",
};
const PUSH_MIRROR_CONFIG: StageMeta = StageMeta {
    emoji: "🗂",
    title: "Configuring nodes for mirror registries",
    failure_prefix: "node mirror configuration failed",
};
const COMPONENT_DETECT: StageMeta = StageMeta {
    emoji: "🔍",
    title: "Detecting cluster components",
    failure_prefix: "component detection failed",
};
const GITOPS: StageMeta = StageMeta {
    emoji: "🔁",
    title: "Bootstrapping GitOps engine",
    failure_prefix: "gitops bootstrap failed",
};
const CLUSTER_DELETE: StageMeta = StageMeta {
    emoji: "🔥",
    title: "Deleting cluster",
    failure_prefix: "cluster deletion failed",
};
const LOCAL_REGISTRY_CLEANUP: StageMeta = StageMeta {
    emoji: "🧹",
    title: "Removing local registry",
    failure_prefix: "local registry cleanup failed",
};
const MIRROR_CLEANUP: StageMeta = StageMeta {
    emoji: "🧹",
    title: "Removing mirror registries",
    failure_prefix: "mirror registry cleanup failed",
};
const START: StageMeta = StageMeta {
    emoji: "▶️",
    title: "Starting cluster",
    failure_prefix: "cluster start failed",
};
const STOP: StageMeta = StageMeta {
    emoji: "⏸",
    title: "Stopping cluster",
    failure_prefix: "cluster stop failed",
};

fn stage_error(meta: &StageMeta, err: anyhow::Error) -> anyhow::Error {
    anyhow::Error::from(Error::Stage {
        prefix: meta.failure_prefix.to_string(),
        source: err,
    })
}

pub struct Orchestrator {
    pub(crate) project: Project,
    pub(crate) spec: ClusterSpec,
    pub(crate) dist_config: DistributionConfig,
    pub(crate) runtime: Option<DockerRuntime>,
    pub(crate) notifier: Notifier,
    pub(crate) timer: Timer,
    pub(crate) cancel: CancellationToken,
}

impl Orchestrator {
    pub fn new(
        project: Project,
        dist_config: DistributionConfig,
        runtime: Option<DockerRuntime>,
        notifier: Notifier,
        cancel: CancellationToken,
    ) -> Self {
        let mut spec = project.cluster.resolve();
        spec.network_cidr = dist_config.network_cidr();
        // A file-provided node roster overrides the root document's counts,
        // so roster edits in kind.yaml/k3d.yaml surface in the diff.
        let roster = dist_config.node_roster();
        if !roster.is_empty() {
            spec.control_planes = roster
                .iter()
                .filter(|role| matches!(role.as_str(), "control-plane" | "server"))
                .count() as u32;
            spec.workers = roster.len() as u32 - spec.control_planes;
        }
        Self {
            project,
            spec,
            dist_config,
            runtime,
            notifier,
            timer: Timer::new(),
            cancel,
        }
    }

    pub fn spec(&self) -> &ClusterSpec {
        &self.spec
    }

    pub(crate) fn begin(&mut self, meta: &StageMeta) {
        self.notifier.header(meta.emoji, meta.title);
        self.timer.start_stage(meta.title);
        tracing::debug!(stage = %self.timer.stage(), "stage started");
    }

    pub(crate) fn print_timer(&self) {
        self.notifier.timer(
            &format_duration(self.timer.stage_elapsed()),
            &format_duration(self.timer.total_elapsed()),
        );
    }

    pub(crate) fn kubeconfig_path(&self) -> Result<PathBuf> {
        self.project.kubeconfig_path()
    }

    pub(crate) fn helm(&self) -> Result<Helm> {
        Ok(Helm::new(
            Some(self.kubeconfig_path()?.to_string_lossy().into_owned()),
            Some(self.project.cluster.context_name()),
        ))
    }

    pub(crate) fn kube_ops(&self) -> Result<KubeOps> {
        Ok(KubeOps::new(
            self.kubeconfig_path()?.to_string_lossy().into_owned(),
            self.project.cluster.context_name(),
        ))
    }

    pub(crate) fn make_provisioner(&self) -> Result<Box<dyn ClusterProvisioner>> {
        make_provisioner(
            &self.project.cluster,
            &self.dist_config,
            self.runtime.clone(),
            self.kubeconfig_path()?,
        )
    }

    /// Mirror specs merged in precedence order: hosts.toml files on disk,
    /// hosts already referenced by the Talos config, then flags.
    pub(crate) fn mirror_specs(&self) -> Result<Vec<MirrorSpec>> {
        let file_specs = specs_from_mirrors_dir(&self.project.mirrors_dir())?;
        let talos_specs = self
            .dist_config
            .talos
            .as_ref()
            .map(|talos| {
                talos
                    .referenced_mirror_hosts()
                    .into_iter()
                    .map(MirrorSpec::for_host)
                    .collect()
            })
            .unwrap_or_default();
        let mut flag_specs = Vec::new();
        for raw in &self.project.cluster.spec.mirror_registries {
            flag_specs
                .push(parse_flag_spec(raw).map_err(|err| Error::config(err.to_string()))?);
        }
        Ok(merge(vec![file_specs, talos_specs, flag_specs]))
    }

    // === create ===

    pub async fn create(&mut self) -> Result<()> {
        let mut batch: Option<RegistryBatch> = None;
        match self.create_stages(&mut batch).await {
            Ok(()) => {
                self.notifier.success(format!(
                    "cluster {} is ready",
                    self.spec.name
                ));
                self.print_timer();
                Ok(())
            }
            Err(err) => {
                if let (Some(batch), Some(runtime)) = (batch.take(), self.runtime.as_ref()) {
                    if !batch.is_empty() {
                        self.notifier
                            .warning("rolling back registries created by this run");
                        batch.rollback(runtime).await;
                    }
                }
                Err(err)
            }
        }
    }

    async fn create_stages(&mut self, batch_slot: &mut Option<RegistryBatch>) -> Result<()> {
        let name = self.spec.name.clone();
        let distribution = self.spec.distribution;
        let provider = self.spec.provider;
        let runtime = self.runtime.clone();
        let cancel = self.cancel.clone();
        let network = distribution.cluster_network(&name);
        let on_docker = provider == Provider::Docker;

        // 1. Preflight.
        self.begin(&PREFLIGHT);
        let preflight_result: Result<()> = async {
            if let Some(module) = preflight::required_kernel_module(distribution, provider) {
                preflight::ensure_kernel_module(module).await?;
            }
            if on_docker {
                preflight::check_runtime(runtime.as_ref()).await?;
            }
            preflight::check_distribution_cli(distribution)?;
            let would_install = plan(&self.spec, &no_components());
            preflight::check_helm(preflight::helm_needed(
                self.spec.gitops_engine,
                would_install.len(),
            ))?;
            Ok(())
        }
        .await;
        preflight_result.map_err(|err| stage_error(&PREFLIGHT, err))?;
        self.notifier.success("environment ready");

        // 2. Registry setup (batched; nothing joined to a network yet).
        let specs = self.mirror_specs()?;
        let mut registries: Vec<RegistryInfo> = Vec::new();
        let manager = runtime.clone().map(RegistryManager::new);
        if !specs.is_empty() && on_docker {
            let manager = manager.as_ref().ok_or(Error::ProviderUnavailable)?;
            self.begin(&REGISTRY_SETUP);
            let result: Result<()> = async {
                let (infos, batch) = manager
                    .ensure_mirrors(&specs, &name, distribution, &cancel)
                    .await?;
                *batch_slot = Some(batch);
                for info in &infos {
                    manager.wait_ready(info, &cancel).await?;
                    self.notifier
                        .added(format!("{} -> localhost:{}", info.host, info.host_port));
                }
                registries = infos;
                Ok(())
            }
            .await;
            result.map_err(|err| stage_error(&REGISTRY_SETUP, err))?;
        }

        // 3. Network creation.
        if let (Some(network), Some(runtime)) = (network.as_deref(), runtime.as_ref()) {
            self.begin(&NETWORK);
            runtime
                .create_network(network)
                .await
                .map_err(|err| stage_error(&NETWORK, err))?;
            self.notifier.success(format!("network {} ready", network));
        }

        // 4. Connect mirror registries.
        if !registries.is_empty() {
            if let (Some(network), Some(manager)) = (network.as_deref(), manager.as_ref()) {
                self.begin(&CONNECT_REGISTRIES);
                manager
                    .connect_to_network(
                        &registries,
                        network,
                        distribution == Distribution::Talos,
                    )
                    .await
                    .map_err(|err| stage_error(&CONNECT_REGISTRIES, err))?;
                self.notifier
                    .success(format!("{} registries connected", registries.len()));
            }
        }

        // 5. Local registry provision.
        let mut local_registry: Option<RegistryInfo> = None;
        if let (Some(port), Some(manager)) = (self.spec.local_registry_port, manager.as_ref()) {
            self.begin(&LOCAL_REGISTRY);
            let result: Result<()> = async {
                let info = manager.ensure_local_registry(&name, port).await?;
                manager.wait_ready(&info, &cancel).await?;
                local_registry = Some(info);
                Ok(())
            }
            .await;
            result.map_err(|err| stage_error(&LOCAL_REGISTRY, err))?;
            self.notifier.added(format!("localhost:{}", port));
        }

        // 6. Cluster bootstrap, with mirror config rendered into the
        //    distribution config first.
        self.begin(&BOOTSTRAP);
        self.inject_mirror_config(&registries)
            .map_err(|err| stage_error(&BOOTSTRAP, err))?;
        let provisioner = self
            .make_provisioner()
            .map_err(|err| stage_error(&BOOTSTRAP, err))?;
        tracing::info!(distribution = %provisioner.distribution(), cluster = %name, "bootstrapping");
        provisioner
            .create(&cancel)
            .await
            .map_err(|err| stage_error(&BOOTSTRAP, err))?;
        self.notifier.success(format!("cluster {} bootstrapped", name));

        // 7. Local registry joins the (possibly freshly created) cluster
        //    network.
        if let (Some(local), Some(network), Some(runtime)) =
            (local_registry.as_ref(), network.as_deref(), runtime.as_ref())
        {
            self.begin(&LOCAL_REGISTRY_CONNECT);
            runtime
                .connect_network(&local.name, network, None)
                .await
                .map_err(|err| stage_error(&LOCAL_REGISTRY_CONNECT, err))?;
            self.notifier.success("local registry connected");
        }

        // 8. Post-cluster mirror configuration (containerd cannot be
        //    patched pre-boot on Kind; no-op elsewhere).
        if distribution == Distribution::Vanilla && !registries.is_empty() {
            self.begin(&PUSH_MIRROR_CONFIG);
            self.push_hosts_into_nodes(provisioner.as_ref(), &registries)
                .await
                .map_err(|err| stage_error(&PUSH_MIRROR_CONFIG, err))?;
            self.notifier.success("nodes configured");
        }

        // 9. Component install (parallel, own progress rendering).
        let detected = {
            self.begin(&COMPONENT_DETECT);
            let helm = self.helm().map_err(|err| stage_error(&COMPONENT_DETECT, err))?;
            let mut kube = self
                .kube_ops()
                .map_err(|err| stage_error(&COMPONENT_DETECT, err))?;
            let mut detector = ComponentDetector::new(&mut kube, &helm, runtime.as_ref());
            detector
                .detect(distribution, provider)
                .await
                .map_err(|err| stage_error(&COMPONENT_DETECT, err))?
        };
        let missing = plan(&self.spec, &detected);
        if !missing.is_empty() {
            let helm = self.helm()?;
            let installer = ComponentInstaller::new(
                helm,
                runtime.clone(),
                self.notifier.clone(),
                self.project.cluster.timeout(),
            );
            installer
                .install_all(&missing, &self.spec, &cancel, Some(&mut self.timer))
                .await?;
        }

        // 10. GitOps bootstrap.
        if self.spec.gitops_engine != GitOpsEngine::None {
            self.begin(&GITOPS);
            let result: Result<()> = async {
                let helm = self.helm()?;
                let mut kube = self.kube_ops()?;
                let registry_name = local_registry
                    .as_ref()
                    .map(|info| info.name.clone())
                    .unwrap_or_else(|| "ksail-registry".to_string());
                gitops::bootstrap(
                    self.spec.gitops_engine,
                    &mut kube,
                    &helm,
                    &registry_name,
                    self.project.cluster.timeout(),
                )
                .await
            }
            .await;
            result.map_err(|err| stage_error(&GITOPS, err))?;
            self.notifier
                .success(format!("{} bootstrapped", self.spec.gitops_engine));
        }

        // Every stage succeeded: the batch is committed.
        *batch_slot = None;
        Ok(())
    }

    /// Render the mirror configuration into the distribution config (and,
    /// for Vanilla, the on-disk mirrors directory).
    fn inject_mirror_config(&mut self, registries: &[RegistryInfo]) -> Result<()> {
        if registries.is_empty() {
            return Ok(());
        }
        match self.spec.distribution {
            Distribution::Vanilla => {
                let mirrors_dir = self.project.mirrors_dir();
                for info in registries {
                    let host_dir = mirrors_dir.join(&info.host);
                    std::fs::create_dir_all(&host_dir)
                        .with_context(|| format!("failed to create {}", host_dir.display()))?;
                    std::fs::write(host_dir.join("hosts.toml"), render_hosts_toml(info)?)?;
                }
                if let Some(kind) = self.dist_config.kind.as_mut() {
                    let patch = "[plugins.\"io.containerd.grpc.v1.cri\".registry]\n  config_path = \"/etc/containerd/certs.d\"\n";
                    if !kind
                        .containerd_config_patches
                        .iter()
                        .any(|p| p.contains("config_path"))
                    {
                        kind.containerd_config_patches.push(patch.to_string());
                    }
                }
            }
            Distribution::K3s => {
                if let Some(k3d) = self.dist_config.k3d.as_mut() {
                    k3d.registries = Some(K3dRegistries {
                        config: Some(render_k3d_registries(registries)?),
                    });
                }
            }
            Distribution::Talos => {
                if let Some(talos) = self.dist_config.talos.as_mut() {
                    talos.push_patch("ksail-mirrors", &render_talos_mirror_patch(registries)?)?;
                }
            }
            Distribution::VCluster => {}
        }
        Ok(())
    }

    /// Copy the generated hosts.toml files into each node and restart
    /// containerd.
    async fn push_hosts_into_nodes(
        &self,
        provisioner: &dyn ClusterProvisioner,
        registries: &[RegistryInfo],
    ) -> Result<()> {
        let runtime = self.runtime.as_ref().ok_or(Error::ProviderUnavailable)?;
        let nodes = provisioner.provider().list_nodes(&self.spec.name).await?;
        for node in &nodes {
            for info in registries {
                let path = format!("/etc/containerd/certs.d/{}/hosts.toml", info.host);
                runtime
                    .write_container_file(&node.name, &path, &render_hosts_toml(info)?)
                    .await?;
            }
            runtime
                .exec_in_container(&node.name, &["systemctl", "restart", "containerd"])
                .await
                .with_context(|| format!("failed to restart containerd on {}", node.name))?;
        }
        Ok(())
    }

    // === destroy ===

    pub async fn destroy(&mut self, delete_volumes: bool) -> Result<()> {
        let name = self.spec.name.clone();
        let cancel = self.cancel.clone();

        self.begin(&CLUSTER_DELETE);
        let provisioner = self
            .make_provisioner()
            .map_err(|err| stage_error(&CLUSTER_DELETE, err))?;
        provisioner
            .delete(&name, &cancel)
            .await
            .map_err(|err| stage_error(&CLUSTER_DELETE, err))?;
        self.notifier.success(format!("cluster {} deleted", name));

        if let Some(runtime) = self.runtime.clone() {
            let manager = RegistryManager::new(runtime);

            self.begin(&LOCAL_REGISTRY_CLEANUP);
            match manager.remove_registry("ksail-registry", delete_volumes).await {
                Ok(()) => self.notifier.success("local registry removed"),
                Err(err) if error::is_registry_not_found(&err) => {
                    self.notifier.info("no local registry to remove");
                }
                Err(err) => return Err(stage_error(&LOCAL_REGISTRY_CLEANUP, err)),
            }

            self.begin(&MIRROR_CLEANUP);
            let removed = manager
                .cleanup(&name, delete_volumes)
                .await
                .map_err(|err| stage_error(&MIRROR_CLEANUP, err))?;
            if removed.is_empty() {
                self.notifier.info("no mirror registries to remove");
            } else {
                for container in &removed {
                    self.notifier.success(format!("{} removed", container));
                }
            }
        }

        self.print_timer();
        Ok(())
    }

    // === start / stop ===

    pub async fn start(&mut self) -> Result<()> {
        let name = self.spec.name.clone();
        let cancel = self.cancel.clone();
        self.begin(&START);
        let provisioner = self.make_provisioner().map_err(|err| stage_error(&START, err))?;
        match provisioner.start(&name, &cancel).await {
            Ok(()) => self.notifier.success(format!("cluster {} started", name)),
            Err(err) if error::is_no_nodes(&err) => {
                self.notifier
                    .warning(format!("cluster {} has no nodes, nothing to start", name));
            }
            Err(err) => return Err(stage_error(&START, err)),
        }
        self.print_timer();
        Ok(())
    }

    pub async fn stop(&mut self) -> Result<()> {
        let name = self.spec.name.clone();
        let cancel = self.cancel.clone();
        self.begin(&STOP);
        let provisioner = self.make_provisioner().map_err(|err| stage_error(&STOP, err))?;
        match provisioner.stop(&name, &cancel).await {
            Ok(()) => self.notifier.success(format!("cluster {} stopped", name)),
            Err(err) if error::is_no_nodes(&err) => {
                self.notifier
                    .warning(format!("cluster {} has no nodes, nothing to stop", name));
            }
            Err(err) => return Err(stage_error(&STOP, err)),
        }
        self.print_timer();
        Ok(())
    }

    // === list ===

    pub async fn list(&mut self, all: bool) -> Result<()> {
        let distributions: Vec<Distribution> = if all {
            vec![
                Distribution::Vanilla,
                Distribution::K3s,
                Distribution::Talos,
                Distribution::VCluster,
            ]
        } else {
            vec![self.spec.distribution]
        };

        for distribution in distributions {
            let mut cluster = self.project.cluster.clone();
            cluster.spec.distribution = distribution;
            let provisioner = match make_provisioner(
                &cluster,
                &default_config_for(distribution, &cluster),
                self.runtime.clone(),
                self.kubeconfig_path()?,
            ) {
                Ok(provisioner) => provisioner,
                Err(err) => {
                    tracing::debug!(distribution = %distribution, error = %err, "skipping distribution");
                    continue;
                }
            };
            let names = match provisioner.list(&self.cancel).await {
                Ok(names) => names,
                Err(err) => {
                    if all {
                        tracing::debug!(distribution = %distribution, error = %err, "listing failed");
                        continue;
                    }
                    return Err(err);
                }
            };
            for name in names {
                let status = cluster_status(provisioner.as_ref(), &name).await;
                self.notifier
                    .info(format!("{} [{}] {}", name, distribution, status));
            }
        }
        Ok(())
    }
}

/// Sub-config used when listing a distribution the project is not
/// configured for.
fn default_config_for(distribution: Distribution, cluster: &Cluster) -> DistributionConfig {
    let mut config = DistributionConfig::default();
    match distribution {
        Distribution::Vanilla => config.kind = Some(Default::default()),
        Distribution::K3s => {
            let mut k3d = crate::config::K3dSimpleConfig::default();
            k3d.metadata.name = cluster.cluster_name();
            config.k3d = Some(k3d);
        }
        Distribution::Talos => config.talos = Some(Default::default()),
        Distribution::VCluster => {}
    }
    config
}

async fn cluster_status(provisioner: &dyn ClusterProvisioner, name: &str) -> String {
    match provisioner.provider().list_nodes(name).await {
        Ok(nodes) if nodes.is_empty() => "unknown".to_string(),
        Ok(nodes) => {
            let running = nodes.iter().filter(|n| n.state == "running").count();
            if running == nodes.len() {
                "running".to_string()
            } else if running == 0 {
                "stopped".to_string()
            } else {
                format!("degraded ({}/{} running)", running, nodes.len())
            }
        }
        Err(_) => "unknown".to_string(),
    }
}

/// Detector result representing a cluster with nothing installed; used for
/// preflight sizing before a cluster exists.
fn no_components() -> crate::components::DetectedComponents {
    crate::components::DetectedComponents {
        cni: crate::config::CniProvider::BuiltIn,
        csi: false,
        metrics_server: false,
        load_balancer: false,
        cert_manager: false,
        policy_engine: crate::config::PolicyEngine::None,
        gitops_engine: GitOpsEngine::None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{load_distribution, load_root, Overrides};
    use crate::notify::test_support::CapturedNotifier;

    fn project_with(yaml: &str) -> Project {
        let dir = tempfile::tempdir().expect("tempdir");
        std::fs::write(dir.path().join("ksail.yaml"), yaml).expect("write");
        let project = load_root(dir.path(), &Overrides::default()).expect("load");
        // Leak the tempdir so the project path outlives the guard.
        std::mem::forget(dir);
        project
    }

    #[test]
    fn test_mirror_specs_flag_overrides_file() {
        let project = project_with(
            "apiVersion: ksail.dev/v1alpha1\nkind: Cluster\nmetadata:\n  name: dev\nspec:\n  mirrorRegistries:\n    - docker.io=http://docker.io:5001\n",
        );
        let mirrors_dir = project.mirrors_dir().join("docker.io");
        std::fs::create_dir_all(&mirrors_dir).expect("mkdir");
        std::fs::write(
            mirrors_dir.join("hosts.toml"),
            "server = \"https://mirror.example.com\"\n",
        )
        .expect("write");

        let config = load_distribution(&project.cluster, &project.root_dir).expect("dist");
        let captured = CapturedNotifier::new(false);
        let orchestrator = Orchestrator::new(
            project,
            config,
            None,
            captured.notifier.clone(),
            CancellationToken::new(),
        );

        let specs = orchestrator.mirror_specs().expect("specs");
        assert_eq!(specs.len(), 1);
        // The flag spec replaced the file spec for the same host.
        assert_eq!(specs[0].upstream, "https://registry-1.docker.io");
        assert_eq!(specs[0].desired_port(), Some(5001));
    }

    #[test]
    fn test_resolved_spec_carries_network_cidr() {
        let project = project_with(
            "apiVersion: ksail.dev/v1alpha1\nkind: Cluster\nmetadata:\n  name: dev\n",
        );
        std::fs::write(
            project.root_dir.join("kind.yaml"),
            "apiVersion: kind.x-k8s.io/v1alpha4\nkind: Cluster\nnodes:\n  - role: control-plane\nnetworking:\n  podSubnet: 10.42.0.0/16\n",
        )
        .expect("write");
        let config = load_distribution(&project.cluster, &project.root_dir).expect("dist");
        let captured = CapturedNotifier::new(false);
        let orchestrator = Orchestrator::new(
            project,
            config,
            None,
            captured.notifier.clone(),
            CancellationToken::new(),
        );
        assert_eq!(
            orchestrator.spec().network_cidr.as_deref(),
            Some("10.42.0.0/16")
        );
    }
}
