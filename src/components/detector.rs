//! Component detection
//!
//! Probes a running cluster for the effective value of every component
//! toggle: Helm releases first, distribution-default workloads second, and
//! for the Vanilla load balancer a sibling container on the host. The
//! detector never mutates the cluster; a failed probe is fatal for the call
//! and the caller decides whether to continue with defaults.

use anyhow::{Context, Result};

use super::helm::{Helm, HelmRelease};
use crate::config::{ClusterSpec, CniProvider, Distribution, GitOpsEngine, PolicyEngine, Provider};
use crate::k8s::KubeOps;
use crate::runtime::{ContainerFilter, DockerRuntime};

/// Effective component values observed on a live cluster.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DetectedComponents {
    pub cni: CniProvider,
    pub csi: bool,
    pub metrics_server: bool,
    pub load_balancer: bool,
    pub cert_manager: bool,
    pub policy_engine: PolicyEngine,
    pub gitops_engine: GitOpsEngine,
}

impl DetectedComponents {
    /// Overlay the observed values onto a spec reconstructed by a
    /// provisioner.
    pub fn apply_to(&self, spec: &mut ClusterSpec) {
        spec.cni = self.cni;
        spec.csi = self.csi;
        spec.metrics_server = self.metrics_server;
        spec.load_balancer = self.load_balancer;
        spec.cert_manager = self.cert_manager;
        spec.policy_engine = self.policy_engine;
        spec.gitops_engine = self.gitops_engine;
    }
}

pub struct ComponentDetector<'a> {
    kube: &'a mut KubeOps,
    helm: &'a Helm,
    runtime: Option<&'a DockerRuntime>,
}

impl<'a> ComponentDetector<'a> {
    pub fn new(
        kube: &'a mut KubeOps,
        helm: &'a Helm,
        runtime: Option<&'a DockerRuntime>,
    ) -> Self {
        Self {
            kube,
            helm,
            runtime,
        }
    }

    pub async fn detect(
        &mut self,
        distribution: Distribution,
        provider: Provider,
    ) -> Result<DetectedComponents> {
        let releases = self
            .helm
            .list_all()
            .await
            .context("failed to list helm releases")?;

        let cni = if has_release(&releases, "cilium", Some("kube-system")) {
            CniProvider::Cilium
        } else if has_release(&releases, "calico", Some("calico-system")) {
            CniProvider::Calico
        } else {
            CniProvider::BuiltIn
        };

        let csi = match (distribution, provider) {
            (Distribution::K3s | Distribution::VCluster, _) => {
                self.kube
                    .deployment_exists("local-path-provisioner", "kube-system")
                    .await?
            }
            (Distribution::Talos, Provider::Hetzner) => has_release(&releases, "hcloud-csi", None),
            _ => {
                self.kube
                    .deployment_exists("local-path-provisioner", "local-path-storage")
                    .await?
            }
        };

        let metrics_server = has_release(&releases, "metrics-server", Some("metrics-server"))
            || self
                .kube
                .deployment_exists("metrics-server", "kube-system")
                .await?;

        let load_balancer = match distribution {
            Distribution::K3s | Distribution::VCluster => {
                self.kube
                    .daemonset_with_label("kube-system", "svccontroller.k3s.cattle.io/svcname")
                    .await?
            }
            Distribution::Vanilla => self.cloud_provider_kind_running().await?,
            Distribution::Talos => has_release(&releases, "metallb", None),
        };

        let cert_manager = has_release(&releases, "cert-manager", None);

        let policy_engine = if has_release(&releases, "kyverno", None) {
            PolicyEngine::Kyverno
        } else if has_release(&releases, "gatekeeper", None) {
            PolicyEngine::Gatekeeper
        } else {
            PolicyEngine::None
        };

        let gitops_engine = if has_release(&releases, "flux", None)
            || has_release(&releases, "flux2", None)
        {
            GitOpsEngine::Flux
        } else if has_release(&releases, "argocd", None) || has_release(&releases, "argo-cd", None)
        {
            GitOpsEngine::ArgoCd
        } else {
            GitOpsEngine::None
        };

        Ok(DetectedComponents {
            cni,
            csi,
            metrics_server,
            load_balancer,
            cert_manager,
            policy_engine,
            gitops_engine,
        })
    }

    /// Kind's load balancer is a sibling container, not an in-cluster
    /// workload.
    async fn cloud_provider_kind_running(&mut self) -> Result<bool> {
        let Some(runtime) = self.runtime else {
            return Ok(false);
        };
        let containers = runtime.list_containers(&ContainerFilter::All).await?;
        Ok(containers
            .iter()
            .any(|c| c.name.contains("cloud-provider-kind") && c.state == "running"))
    }
}

fn has_release(releases: &[HelmRelease], name: &str, namespace: Option<&str>) -> bool {
    releases.iter().any(|release| {
        release.name == name && namespace.map_or(true, |ns| release.namespace == ns)
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn release(name: &str, namespace: &str) -> HelmRelease {
        HelmRelease {
            name: name.to_string(),
            namespace: namespace.to_string(),
            chart: format!("{}-1.0.0", name),
            status: "deployed".to_string(),
        }
    }

    #[test]
    fn test_has_release_namespace_scoping() {
        let releases = vec![release("cilium", "kube-system"), release("kyverno", "kyverno")];
        assert!(has_release(&releases, "cilium", Some("kube-system")));
        assert!(!has_release(&releases, "cilium", Some("cilium")));
        assert!(has_release(&releases, "kyverno", None));
        assert!(!has_release(&releases, "gatekeeper", None));
    }
}
