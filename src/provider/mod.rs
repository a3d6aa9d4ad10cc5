//! Node-level infrastructure providers
//!
//! A provider knows how to find, start, stop, and delete the machines a
//! cluster's nodes run on, without understanding the distribution itself.
//! The container-runtime provider discovers node containers through a
//! per-distribution label scheme; the Hetzner provider mirrors the same
//! surface over cloud VMs.

mod docker;
mod hetzner;

pub use docker::ContainerNodeProvider;
pub use hetzner::HetznerNodeProvider;

use std::fmt;
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;

use crate::config::Distribution;
use crate::runtime::{ContainerFilter, ContainerSummary};

pub const START_TIMEOUT: Duration = Duration::from_secs(30);
pub const STOP_TIMEOUT: Duration = Duration::from_secs(60);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeRole {
    ControlPlane,
    Worker,
    Server,
    Agent,
    LoadBalancer,
}

impl fmt::Display for NodeRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            NodeRole::ControlPlane => "control-plane",
            NodeRole::Worker => "worker",
            NodeRole::Server => "server",
            NodeRole::Agent => "agent",
            NodeRole::LoadBalancer => "load-balancer",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone)]
pub struct NodeInfo {
    pub name: String,
    #[allow(dead_code)]
    pub cluster: String,
    pub role: NodeRole,
    pub state: String,
}

/// Uniform node operations over an infrastructure backend.
#[async_trait]
pub trait NodeProvider: Send + Sync {
    async fn is_available(&self) -> bool;
    /// Errors with the `NoNodes` sentinel when the cluster has no nodes.
    async fn start_nodes(&self, cluster: &str) -> Result<()>;
    /// Errors with the `NoNodes` sentinel when the cluster has no nodes.
    async fn stop_nodes(&self, cluster: &str) -> Result<()>;
    async fn list_nodes(&self, cluster: &str) -> Result<Vec<NodeInfo>>;
    async fn list_all_clusters(&self) -> Result<Vec<String>>;
    async fn nodes_exist(&self, cluster: &str) -> Result<bool>;
    /// Removes nodes and their volumes; succeeds when nothing exists.
    async fn delete_nodes(&self, cluster: &str) -> Result<()>;
}

/// How node containers are discovered per distribution: name prefix for
/// Kind and VCluster, labels for K3d and Talos.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LabelScheme {
    Kind,
    K3d,
    Talos,
    VCluster,
}

impl LabelScheme {
    pub fn for_distribution(distribution: Distribution) -> Self {
        match distribution {
            Distribution::Vanilla => LabelScheme::Kind,
            Distribution::K3s => LabelScheme::K3d,
            Distribution::Talos => LabelScheme::Talos,
            Distribution::VCluster => LabelScheme::VCluster,
        }
    }

    pub fn filter(&self, cluster: &str) -> ContainerFilter {
        match self {
            LabelScheme::Kind => ContainerFilter::NamePrefix(format!("{}-", cluster)),
            LabelScheme::VCluster => ContainerFilter::NamePrefix(format!("vcluster-{}", cluster)),
            LabelScheme::K3d => {
                ContainerFilter::Labels(vec![format!("k3d.cluster={}", cluster)])
            }
            LabelScheme::Talos => ContainerFilter::Labels(vec![
                "talos.owned=true".to_string(),
                format!("talos.cluster.name={}", cluster),
            ]),
        }
    }

    /// Discovery filter for *any* cluster of this scheme.
    pub fn any_filter(&self) -> ContainerFilter {
        match self {
            LabelScheme::Kind => ContainerFilter::All,
            LabelScheme::VCluster => ContainerFilter::NamePrefix("vcluster-".to_string()),
            LabelScheme::K3d => ContainerFilter::Labels(vec!["k3d.cluster".to_string()]),
            LabelScheme::Talos => ContainerFilter::Labels(vec!["talos.owned=true".to_string()]),
        }
    }

    /// The cluster a listed container belongs to, when it matches the
    /// scheme at all.
    pub fn cluster_of(&self, container: &ContainerSummary) -> Option<String> {
        match self {
            LabelScheme::Kind => kind_cluster_from_name(&container.name),
            LabelScheme::VCluster => container
                .name
                .strip_prefix("vcluster-")
                .map(|rest| rest.split('-').next().unwrap_or(rest).to_string()),
            LabelScheme::K3d => container.labels.get("k3d.cluster").cloned(),
            LabelScheme::Talos => container.labels.get("talos.cluster.name").cloned(),
        }
    }

    pub fn role_of(&self, container: &ContainerSummary) -> NodeRole {
        match self {
            LabelScheme::Kind => {
                if container.name.contains("external-load-balancer") {
                    NodeRole::LoadBalancer
                } else if container.name.contains("control-plane") {
                    NodeRole::ControlPlane
                } else {
                    NodeRole::Worker
                }
            }
            LabelScheme::VCluster => NodeRole::ControlPlane,
            LabelScheme::K3d => match container.labels.get("k3d.role").map(String::as_str) {
                Some("server") => NodeRole::Server,
                Some("loadbalancer") => NodeRole::LoadBalancer,
                _ => NodeRole::Agent,
            },
            LabelScheme::Talos => match container.labels.get("talos.type").map(String::as_str) {
                Some("controlplane") => NodeRole::ControlPlane,
                _ => NodeRole::Worker,
            },
        }
    }
}

/// Kind node containers are `<cluster>-control-plane[N]`, `<cluster>-worker[N]`
/// or `<cluster>-external-load-balancer`.
fn kind_cluster_from_name(name: &str) -> Option<String> {
    for marker in ["-control-plane", "-worker", "-external-load-balancer"] {
        if let Some(idx) = name.find(marker) {
            if idx > 0 {
                return Some(name[..idx].to_string());
            }
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn container(name: &str, labels: &[(&str, &str)]) -> ContainerSummary {
        ContainerSummary {
            name: name.to_string(),
            state: "running".to_string(),
            labels: labels
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect::<HashMap<_, _>>(),
            host_ports: Vec::new(),
        }
    }

    #[test]
    fn test_kind_name_scheme() {
        let scheme = LabelScheme::Kind;
        let cp = container("dev-control-plane", &[]);
        let worker = container("dev-worker2", &[]);
        let lb = container("dev-external-load-balancer", &[]);
        assert_eq!(scheme.cluster_of(&cp).as_deref(), Some("dev"));
        assert_eq!(scheme.cluster_of(&worker).as_deref(), Some("dev"));
        assert_eq!(scheme.role_of(&cp), NodeRole::ControlPlane);
        assert_eq!(scheme.role_of(&worker), NodeRole::Worker);
        assert_eq!(scheme.role_of(&lb), NodeRole::LoadBalancer);
        assert_eq!(scheme.cluster_of(&container("unrelated", &[])), None);
    }

    #[test]
    fn test_k3d_label_scheme() {
        let scheme = LabelScheme::K3d;
        let server = container(
            "k3d-dev-server-0",
            &[("k3d.cluster", "dev"), ("k3d.role", "server")],
        );
        assert_eq!(scheme.cluster_of(&server).as_deref(), Some("dev"));
        assert_eq!(scheme.role_of(&server), NodeRole::Server);
    }

    #[test]
    fn test_talos_label_scheme() {
        let scheme = LabelScheme::Talos;
        let node = container(
            "dev-controlplane-1",
            &[
                ("talos.owned", "true"),
                ("talos.cluster.name", "dev"),
                ("talos.type", "controlplane"),
            ],
        );
        assert_eq!(scheme.cluster_of(&node).as_deref(), Some("dev"));
        assert_eq!(scheme.role_of(&node), NodeRole::ControlPlane);
        match scheme.filter("dev") {
            ContainerFilter::Labels(labels) => {
                assert!(labels.contains(&"talos.owned=true".to_string()));
                assert!(labels.contains(&"talos.cluster.name=dev".to_string()));
            }
            other => panic!("unexpected filter {:?}", other),
        }
    }
}
