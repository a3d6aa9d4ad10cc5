//! K3s (K3d) provisioner

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::Deserialize;
use tokio_util::sync::CancellationToken;

use super::{run_cli, scratch_config_path, ClusterProvisioner};
use crate::components::DetectedComponents;
use crate::config::{Cluster, ClusterSpec, Distribution, K3dSimpleConfig};
use crate::error;
use crate::k8s::{kubeconfig, KubeOps};
use crate::provider::{NodeProvider, NodeRole};

#[derive(Debug, Deserialize)]
struct K3dClusterEntry {
    name: String,
}

pub struct K3dProvisioner {
    cluster: Cluster,
    config: K3dSimpleConfig,
    provider: Arc<dyn NodeProvider>,
    kubeconfig_path: PathBuf,
}

impl K3dProvisioner {
    pub fn new(
        cluster: Cluster,
        config: K3dSimpleConfig,
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

    /// Merge the cluster's kubeconfig into the configured path.
    async fn refresh_kubeconfig(&self, name: &str, cancel: &CancellationToken) -> Result<()> {
        let generated = run_cli(Distribution::K3s, &["kubeconfig", "get", name], cancel).await?;
        kubeconfig::merge_into(&self.kubeconfig_path, &generated).await
    }
}

#[async_trait]
impl ClusterProvisioner for K3dProvisioner {
    fn distribution(&self) -> Distribution {
        Distribution::K3s
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

        // The effective SimpleConfig (registries fragment included) goes to
        // a scratch file so the user's k3d.yaml is never mutated.
        let mut config = self.config.clone();
        config.metadata.name = name.clone();
        let config_path = scratch_config_path(&name, "k3d.yaml");
        let content = serde_yml::to_string(&config).context("failed to render k3d config")?;
        tokio::fs::write(&config_path, content)
            .await
            .with_context(|| format!("failed to write {}", config_path.display()))?;

        run_cli(
            Distribution::K3s,
            &[
                "cluster",
                "create",
                "--config",
                &config_path.to_string_lossy(),
                "--kubeconfig-update-default=false",
            ],
            cancel,
        )
        .await?;
        let _ = tokio::fs::remove_file(&config_path).await;

        self.refresh_kubeconfig(&name, cancel).await?;
        tracing::info!(cluster = %name, "k3d cluster created");
        Ok(())
    }

    async fn delete(&self, name: &str, cancel: &CancellationToken) -> Result<()> {
        if self.list(cancel).await?.iter().any(|c| c == name) {
            run_cli(Distribution::K3s, &["cluster", "delete", name], cancel).await?;
        }
        self.provider.delete_nodes(name).await?;
        kubeconfig::remove_entries(
            &self.kubeconfig_path,
            &format!("k3d-{}", name),
            &format!("k3d-{}", name),
            &format!("admin@k3d-{}", name),
        )
        .await?;
        Ok(())
    }

    async fn start(&self, name: &str, cancel: &CancellationToken) -> Result<()> {
        self.provider.start_nodes(name).await?;
        // Server certificates may rotate across restarts.
        self.refresh_kubeconfig(name, cancel).await
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
        let stdout = run_cli(Distribution::K3s, &["cluster", "list", "-o", "json"], cancel).await?;
        let entries: Vec<K3dClusterEntry> =
            serde_json::from_str(&stdout).context("failed to parse k3d cluster list")?;
        Ok(entries.into_iter().map(|e| e.name).collect())
    }

    async fn current_config(
        &self,
        detected: Option<&DetectedComponents>,
        _cancel: &CancellationToken,
    ) -> Result<ClusterSpec> {
        let name = self.name();
        let mut spec =
            ClusterSpec::default_for(&name, Distribution::K3s, self.cluster.spec.provider);

        if let Ok(nodes) = self.provider.list_nodes(&name).await {
            if !nodes.is_empty() {
                spec.control_planes =
                    nodes.iter().filter(|n| n.role == NodeRole::Server).count() as u32;
                spec.workers = nodes.iter().filter(|n| n.role == NodeRole::Agent).count() as u32;
            }
        }

        if let Some(detected) = detected {
            detected.apply_to(&mut spec);
        }
        Ok(spec)
    }
}
