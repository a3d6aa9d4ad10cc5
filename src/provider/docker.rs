//! Container-runtime node provider

use anyhow::{Context, Result};
use async_trait::async_trait;
use tokio::time::timeout;

use super::{LabelScheme, NodeInfo, NodeProvider, START_TIMEOUT, STOP_TIMEOUT};
use crate::error::Error;
use crate::runtime::DockerRuntime;

/// Node operations over containers discovered via a label scheme.
#[derive(Clone)]
pub struct ContainerNodeProvider {
    runtime: DockerRuntime,
    scheme: LabelScheme,
}

impl ContainerNodeProvider {
    pub fn new(runtime: DockerRuntime, scheme: LabelScheme) -> Self {
        Self { runtime, scheme }
    }

    async fn node_names(&self, cluster: &str) -> Result<Vec<String>> {
        let containers = self
            .runtime
            .list_containers(&self.scheme.filter(cluster))
            .await?;
        Ok(containers.into_iter().map(|c| c.name).collect())
    }
}

#[async_trait]
impl NodeProvider for ContainerNodeProvider {
    async fn is_available(&self) -> bool {
        self.runtime.is_accessible().await
    }

    async fn start_nodes(&self, cluster: &str) -> Result<()> {
        let names = self.node_names(cluster).await?;
        if names.is_empty() {
            return Err(Error::NoNodes.into());
        }
        timeout(START_TIMEOUT, async {
            for name in &names {
                self.runtime
                    .start_container(name)
                    .await
                    .with_context(|| format!("failed to start node {}", name))?;
            }
            Ok::<(), anyhow::Error>(())
        })
        .await
        .map_err(|_| anyhow::anyhow!("timed out starting nodes of {}", cluster))??;
        Ok(())
    }

    async fn stop_nodes(&self, cluster: &str) -> Result<()> {
        let names = self.node_names(cluster).await?;
        if names.is_empty() {
            return Err(Error::NoNodes.into());
        }
        timeout(STOP_TIMEOUT, async {
            for name in &names {
                self.runtime
                    .stop_container(name, 10)
                    .await
                    .with_context(|| format!("failed to stop node {}", name))?;
            }
            Ok::<(), anyhow::Error>(())
        })
        .await
        .map_err(|_| anyhow::anyhow!("timed out stopping nodes of {}", cluster))??;
        Ok(())
    }

    async fn list_nodes(&self, cluster: &str) -> Result<Vec<NodeInfo>> {
        let containers = self
            .runtime
            .list_containers(&self.scheme.filter(cluster))
            .await?;
        Ok(containers
            .iter()
            .map(|container| NodeInfo {
                name: container.name.clone(),
                cluster: cluster.to_string(),
                role: self.scheme.role_of(container),
                state: container.state.clone(),
            })
            .collect())
    }

    async fn list_all_clusters(&self) -> Result<Vec<String>> {
        let containers = self
            .runtime
            .list_containers(&self.scheme.any_filter())
            .await?;
        let mut clusters: Vec<String> = containers
            .iter()
            .filter_map(|c| self.scheme.cluster_of(c))
            .collect();
        clusters.sort();
        clusters.dedup();
        Ok(clusters)
    }

    async fn nodes_exist(&self, cluster: &str) -> Result<bool> {
        Ok(!self.node_names(cluster).await?.is_empty())
    }

    async fn delete_nodes(&self, cluster: &str) -> Result<()> {
        for name in self.node_names(cluster).await? {
            let _ = self.runtime.stop_container(&name, 10).await;
            self.runtime
                .remove_container(&name, true, true)
                .await
                .with_context(|| format!("failed to remove node {}", name))?;
        }
        Ok(())
    }
}
