//! Vanilla (Kind) provisioner

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use super::{run_cli, scratch_config_path, ClusterProvisioner};
use crate::components::DetectedComponents;
use crate::config::{Cluster, ClusterSpec, Distribution, KindCluster};
use crate::error;
use crate::k8s::{kubeconfig, KubeOps};
use crate::provider::{NodeProvider, NodeRole};

pub struct KindProvisioner {
    cluster: Cluster,
    config: KindCluster,
    provider: Arc<dyn NodeProvider>,
    kubeconfig_path: PathBuf,
}

impl KindProvisioner {
    pub fn new(
        cluster: Cluster,
        config: KindCluster,
        provider: Arc<dyn NodeProvider>,
        kubeconfig_path: PathBuf,
    ) -> Self {
        Self {
            cluster,
            config,
            provider,
            kubeconfig_path,
        }
    }

    fn name(&self) -> String {
        self.cluster.cluster_name()
    }

    async fn known_clusters(&self, cancel: &CancellationToken) -> Result<Vec<String>> {
        let stdout = run_cli(Distribution::Vanilla, &["get", "clusters"], cancel).await?;
        Ok(stdout
            .lines()
            .map(str::trim)
            .filter(|line| !line.is_empty() && *line != "No kind clusters found.")
            .map(str::to_string)
            .collect())
    }
}

#[async_trait]
impl ClusterProvisioner for KindProvisioner {
    fn distribution(&self) -> Distribution {
        Distribution::Vanilla
    }

    fn provider(&self) -> &dyn NodeProvider {
        self.provider.as_ref()
    }

    async fn create(&self, cancel: &CancellationToken) -> Result<()> {
        let name = self.name();
        if self.exists(&name).await? {
            tracing::info!(cluster = %name, "cluster already exists, skipping bootstrap");
            return Ok(());
        }

        // The --name flag wins over any name in kind.yaml.
        if let Some(config_name) = &self.config.name {
            if *config_name != name {
                tracing::warn!(
                    config_name = %config_name,
                    cluster = %name,
                    "kind.yaml names a different cluster; using the ksail cluster name"
                );
            }
        }

        let config_path = scratch_config_path(&name, "kind.yaml");
        let content =
            serde_yml::to_string(&self.config).context("failed to render kind config")?;
        tokio::fs::write(&config_path, content)
            .await
            .with_context(|| format!("failed to write {}", config_path.display()))?;

        let scratch_kubeconfig = scratch_config_path(&name, "kubeconfig");
        run_cli(
            Distribution::Vanilla,
            &[
                "create",
                "cluster",
                "--name",
                &name,
                "--config",
                &config_path.to_string_lossy(),
                "--kubeconfig",
                &scratch_kubeconfig.to_string_lossy(),
            ],
            cancel,
        )
        .await?;

        let generated = tokio::fs::read_to_string(&scratch_kubeconfig)
            .await
            .context("failed to read generated kubeconfig")?;
        kubeconfig::merge_into(&self.kubeconfig_path, &generated).await?;
        let _ = tokio::fs::remove_file(&scratch_kubeconfig).await;
        let _ = tokio::fs::remove_file(&config_path).await;

        tracing::info!(cluster = %name, "kind cluster created");
        Ok(())
    }

    async fn delete(&self, name: &str, cancel: &CancellationToken) -> Result<()> {
        if self.known_clusters(cancel).await?.iter().any(|c| c == name) {
            run_cli(
                Distribution::Vanilla,
                &["delete", "cluster", "--name", name],
                cancel,
            )
            .await?;
        }
        // Fallback cleanup for anything the CLI left behind.
        self.provider.delete_nodes(name).await?;
        kubeconfig::remove_entries(
            &self.kubeconfig_path,
            &format!("kind-{}", name),
            &format!("kind-{}", name),
            &format!("kind-{}", name),
        )
        .await?;
        Ok(())
    }

    async fn start(&self, name: &str, _cancel: &CancellationToken) -> Result<()> {
        self.provider.start_nodes(name).await
    }

    async fn stop(&self, name: &str, _cancel: &CancellationToken) -> Result<()> {
        self.provider.stop_nodes(name).await
    }

    async fn exists(&self, name: &str) -> Result<bool> {
        match self.provider.nodes_exist(name).await {
            Ok(false) => return Ok(false),
            Ok(true) => {}
            Err(err) if error::is_no_nodes(&err) => return Ok(false),
            Err(err) => return Err(err),
        }
        let mut kube = KubeOps::new(
            self.kubeconfig_path.to_string_lossy().into_owned(),
            self.cluster.context_name(),
        );
        Ok(kube.is_reachable().await)
    }

    async fn list(&self, cancel: &CancellationToken) -> Result<Vec<String>> {
        self.known_clusters(cancel).await
    }

    async fn current_config(
        &self,
        detected: Option<&DetectedComponents>,
        _cancel: &CancellationToken,
    ) -> Result<ClusterSpec> {
        // Kind cannot report its bootstrap settings back; start from the
        // distribution defaults and overlay what is observable.
        let name = self.name();
        let mut spec =
            ClusterSpec::default_for(&name, Distribution::Vanilla, self.cluster.spec.provider);
        spec.network_cidr = self.config.networking.pod_subnet.clone();

        if let Ok(nodes) = self.provider.list_nodes(&name).await {
            if !nodes.is_empty() {
                spec.control_planes = nodes
                    .iter()
                    .filter(|n| n.role == NodeRole::ControlPlane)
                    .count() as u32;
                spec.workers = nodes.iter().filter(|n| n.role == NodeRole::Worker).count() as u32;
            }
        }

        if let Some(detected) = detected {
            detected.apply_to(&mut spec);
        }
        Ok(spec)
    }
}
