//! Hetzner Cloud node provider
//!
//! Mirrors the container provider's surface over cloud VMs, keyed on a
//! `ksail.cluster` server label. Node creation itself belongs to the Talos
//! provisioner; the provider covers discovery, power state, and deletion,
//! plus the placement-group strategies used at creation time.

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use serde::Deserialize;
use tokio::time::timeout;

use super::{NodeInfo, NodeProvider, NodeRole, START_TIMEOUT, STOP_TIMEOUT};
use crate::config::PlacementGroupStrategy;
use crate::error::Error;

const API_BASE: &str = "https://api.hetzner.cloud/v1";
const CLUSTER_LABEL: &str = "ksail.cluster";
const ROLE_LABEL: &str = "ksail.role";

#[derive(Debug, Deserialize)]
struct ServerList {
    servers: Vec<Server>,
}

#[derive(Debug, Deserialize)]
struct Server {
    id: u64,
    name: String,
    status: String,
    labels: std::collections::HashMap<String, String>,
}

#[derive(Debug, Deserialize)]
struct PlacementGroupList {
    placement_groups: Vec<PlacementGroup>,
}

#[derive(Debug, Deserialize)]
struct PlacementGroup {
    id: u64,
    name: String,
}

pub struct HetznerNodeProvider {
    client: reqwest::Client,
    token: Option<String>,
}

impl HetznerNodeProvider {
    pub fn new() -> Self {
        Self {
            client: reqwest::Client::new(),
            token: std::env::var("HCLOUD_TOKEN").ok(),
        }
    }

    fn token(&self) -> Result<&str> {
        self.token
            .as_deref()
            .ok_or_else(|| anyhow!("HCLOUD_TOKEN is not set"))
    }

    async fn servers(&self, cluster: &str) -> Result<Vec<Server>> {
        let url = format!(
            "{}/servers?label_selector={}={}",
            API_BASE, CLUSTER_LABEL, cluster
        );
        let list: ServerList = self
            .client
            .get(&url)
            .bearer_auth(self.token()?)
            .send()
            .await
            .context("failed to list Hetzner servers")?
            .error_for_status()
            .context("Hetzner server list rejected")?
            .json()
            .await
            .context("failed to decode Hetzner server list")?;
        Ok(list.servers)
    }

    async fn server_action(&self, id: u64, action: &str) -> Result<()> {
        let url = format!("{}/servers/{}/actions/{}", API_BASE, id, action);
        self.client
            .post(&url)
            .bearer_auth(self.token()?)
            .json(&serde_json::json!({}))
            .send()
            .await
            .with_context(|| format!("failed to {} server {}", action, id))?
            .error_for_status()
            .with_context(|| format!("Hetzner rejected {} for server {}", action, id))?;
        Ok(())
    }

    /// Resolve the placement group to create servers into, creating it when
    /// the `Spread` strategy asks for one.
    pub async fn ensure_placement_group(
        &self,
        cluster: &str,
        strategy: PlacementGroupStrategy,
    ) -> Result<Option<u64>> {
        if strategy == PlacementGroupStrategy::None {
            return Ok(None);
        }
        let name = format!("{}-spread", cluster);
        let url = format!("{}/placement_groups", API_BASE);
        let existing: PlacementGroupList = self
            .client
            .get(&url)
            .bearer_auth(self.token()?)
            .send()
            .await
            .context("failed to list placement groups")?
            .error_for_status()?
            .json()
            .await
            .context("failed to decode placement groups")?;
        if let Some(group) = existing.placement_groups.iter().find(|g| g.name == name) {
            return Ok(Some(group.id));
        }

        #[derive(Debug, Deserialize)]
        struct Created {
            placement_group: PlacementGroup,
        }
        let created: Created = self
            .client
            .post(&url)
            .bearer_auth(self.token()?)
            .json(&serde_json::json!({ "name": name, "type": "spread" }))
            .send()
            .await
            .context("failed to create placement group")?
            .error_for_status()?
            .json()
            .await
            .context("failed to decode created placement group")?;
        Ok(Some(created.placement_group.id))
    }
}

impl Default for HetznerNodeProvider {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl NodeProvider for HetznerNodeProvider {
    async fn is_available(&self) -> bool {
        self.token.is_some()
    }

    async fn start_nodes(&self, cluster: &str) -> Result<()> {
        let servers = self.servers(cluster).await?;
        if servers.is_empty() {
            return Err(Error::NoNodes.into());
        }
        timeout(START_TIMEOUT, async {
            for server in &servers {
                if server.status != "running" {
                    self.server_action(server.id, "poweron").await?;
                }
            }
            Ok::<(), anyhow::Error>(())
        })
        .await
        .map_err(|_| anyhow!("timed out powering on nodes of {}", cluster))??;
        Ok(())
    }

    async fn stop_nodes(&self, cluster: &str) -> Result<()> {
        let servers = self.servers(cluster).await?;
        if servers.is_empty() {
            return Err(Error::NoNodes.into());
        }
        timeout(STOP_TIMEOUT, async {
            for server in &servers {
                if server.status == "running" {
                    self.server_action(server.id, "shutdown").await?;
                }
            }
            Ok::<(), anyhow::Error>(())
        })
        .await
        .map_err(|_| anyhow!("timed out shutting down nodes of {}", cluster))??;
        Ok(())
    }

    async fn list_nodes(&self, cluster: &str) -> Result<Vec<NodeInfo>> {
        Ok(self
            .servers(cluster)
            .await?
            .into_iter()
            .map(|server| NodeInfo {
                role: match server.labels.get(ROLE_LABEL).map(String::as_str) {
                    Some("controlplane") => NodeRole::ControlPlane,
                    _ => NodeRole::Worker,
                },
                name: server.name,
                cluster: cluster.to_string(),
                state: server.status,
            })
            .collect())
    }

    async fn list_all_clusters(&self) -> Result<Vec<String>> {
        let url = format!("{}/servers?label_selector={}", API_BASE, CLUSTER_LABEL);
        let list: ServerList = self
            .client
            .get(&url)
            .bearer_auth(self.token()?)
            .send()
            .await
            .context("failed to list Hetzner servers")?
            .error_for_status()?
            .json()
            .await
            .context("failed to decode Hetzner server list")?;
        let mut clusters: Vec<String> = list
            .servers
            .into_iter()
            .filter_map(|s| s.labels.get(CLUSTER_LABEL).cloned())
            .collect();
        clusters.sort();
        clusters.dedup();
        Ok(clusters)
    }

    async fn nodes_exist(&self, cluster: &str) -> Result<bool> {
        Ok(!self.servers(cluster).await?.is_empty())
    }

    async fn delete_nodes(&self, cluster: &str) -> Result<()> {
        for server in self.servers(cluster).await? {
            let url = format!("{}/servers/{}", API_BASE, server.id);
            self.client
                .delete(&url)
                .bearer_auth(self.token()?)
                .send()
                .await
                .with_context(|| format!("failed to delete server {}", server.name))?
                .error_for_status()
                .with_context(|| format!("Hetzner rejected delete of {}", server.name))?;
        }
        Ok(())
    }
}
