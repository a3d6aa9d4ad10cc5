//! VCluster provisioner

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::Deserialize;
use tokio_util::sync::CancellationToken;

use super::{run_cli, ClusterProvisioner};
use crate::components::DetectedComponents;
use crate::config::{Cluster, ClusterSpec, Distribution};
use crate::error;
use crate::k8s::{kubeconfig, KubeOps};
use crate::provider::NodeProvider;

#[derive(Debug, Deserialize)]
struct VClusterEntry {
    #[serde(alias = "Name")]
    name: String,
}

pub struct VClusterProvisioner {
    cluster: Cluster,
    provider: Arc<dyn NodeProvider>,
    kubeconfig_path: PathBuf,
}

impl VClusterProvisioner {
    pub fn new(
        cluster: Cluster,
        provider: Arc<dyn NodeProvider>,
        kubeconfig_path: PathBuf,
    ) -> Self {
        Self {
            cluster,
            provider,
            kubeconfig_path,
        }
    }

    fn name(&self) -> String {
        self.cluster.cluster_name()
    }
}

#[async_trait]
impl ClusterProvisioner for VClusterProvisioner {
    fn distribution(&self) -> Distribution {
        Distribution::VCluster
    }

    fn provider(&self) -> &dyn NodeProvider {
        self.provider.as_ref()
    }

    async fn create(&self, cancel: &CancellationToken) -> Result<()> {
        let name = self.name();
        if self.list(cancel).await?.iter().any(|c| c == &name) {
            tracing::info!(cluster = %name, "cluster already exists, skipping bootstrap");
            return Ok(());
        }
        run_cli(
            Distribution::VCluster,
            &["create", &name, "--connect=false"],
            cancel,
        )
        .await?;

        let generated = run_cli(
            Distribution::VCluster,
            &["connect", &name, "--print"],
            cancel,
        )
        .await
        .context("failed to export vcluster kubeconfig")?;
        kubeconfig::merge_into(&self.kubeconfig_path, &generated).await?;

        tracing::info!(cluster = %name, "vcluster created");
        Ok(())
    }

    async fn delete(&self, name: &str, cancel: &CancellationToken) -> Result<()> {
        if self.list(cancel).await?.iter().any(|c| c == name) {
            run_cli(Distribution::VCluster, &["delete", name], cancel).await?;
        }
        self.provider.delete_nodes(name).await?;
        kubeconfig::remove_entries(
            &self.kubeconfig_path,
            &format!("vcluster-{}", name),
            &format!("vcluster-{}", name),
            &format!("vcluster-{}", name),
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
        let stdout = run_cli(Distribution::VCluster, &["ls", "--output", "json"], cancel).await?;
        let entries: Vec<VClusterEntry> =
            serde_json::from_str(&stdout).context("failed to parse vcluster list")?;
        Ok(entries.into_iter().map(|e| e.name).collect())
    }

    async fn current_config(
        &self,
        detected: Option<&DetectedComponents>,
        _cancel: &CancellationToken,
    ) -> Result<ClusterSpec> {
        let mut spec = ClusterSpec::default_for(
            &self.name(),
            Distribution::VCluster,
            self.cluster.spec.provider,
        );
        if let Some(detected) = detected {
            detected.apply_to(&mut spec);
        }
        Ok(spec)
    }
}
