//! Component installer
//!
//! Installs every component that resolved to enabled but was detected as
//! absent, via pinned Helm charts dispatched through the progress group.
//! cert-manager finishes before webhook-dependent policy engines start;
//! everything else runs in parallel.

use std::collections::HashMap;
use std::time::Duration;

use anyhow::{Context, Result};
use tokio_util::sync::CancellationToken;

use super::detector::DetectedComponents;
use super::helm::{ChartSpec, Helm};
use crate::config::{ClusterSpec, CniProvider, Distribution, PolicyEngine};
use crate::notify::{Notifier, Timer};
use crate::progress::{LabelVariant, ProgressGroup};
use crate::runtime::{DockerRuntime, RunContainerConfig};

/// One installable component, concrete per the resolved spec.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ComponentKind {
    Cilium,
    Calico,
    Csi,
    MetricsServer,
    LoadBalancer,
    CertManager,
    Kyverno,
    Gatekeeper,
}

impl ComponentKind {
    pub fn display_name(&self) -> &'static str {
        match self {
            ComponentKind::Cilium => "cilium",
            ComponentKind::Calico => "calico",
            ComponentKind::Csi => "local-path-provisioner",
            ComponentKind::MetricsServer => "metrics-server",
            ComponentKind::LoadBalancer => "load-balancer",
            ComponentKind::CertManager => "cert-manager",
            ComponentKind::Kyverno => "kyverno",
            ComponentKind::Gatekeeper => "gatekeeper",
        }
    }
}

/// Pinned chart for a component, when it installs via Helm on this
/// distribution. The Vanilla load balancer is a sibling container instead.
pub fn chart_for(component: ComponentKind) -> Option<ChartSpec> {
    let spec = match component {
        ComponentKind::Cilium => ChartSpec {
            release: "cilium",
            chart: "cilium",
            repo: "https://helm.cilium.io",
            version: "1.16.5",
            namespace: "kube-system",
            set: vec![("operator.replicas", "1")],
        },
        ComponentKind::Calico => ChartSpec {
            release: "calico",
            chart: "tigera-operator",
            repo: "https://docs.tigera.io/calico/charts",
            version: "v3.29.1",
            namespace: "calico-system",
            set: Vec::new(),
        },
        ComponentKind::Csi => ChartSpec {
            release: "local-path-provisioner",
            chart: "local-path-provisioner",
            repo: "https://charts.containeroo.ch",
            version: "0.0.31",
            namespace: "local-path-storage",
            set: Vec::new(),
        },
        ComponentKind::MetricsServer => ChartSpec {
            release: "metrics-server",
            chart: "metrics-server",
            repo: "https://kubernetes-sigs.github.io/metrics-server/",
            version: "3.12.2",
            namespace: "metrics-server",
            set: vec![("args[0]", "--kubelet-insecure-tls")],
        },
        ComponentKind::LoadBalancer => ChartSpec {
            release: "metallb",
            chart: "metallb",
            repo: "https://metallb.github.io/metallb",
            version: "0.14.9",
            namespace: "metallb-system",
            set: Vec::new(),
        },
        ComponentKind::CertManager => ChartSpec {
            release: "cert-manager",
            chart: "cert-manager",
            repo: "https://charts.jetstack.io",
            version: "v1.16.2",
            namespace: "cert-manager",
            set: vec![("crds.enabled", "true")],
        },
        ComponentKind::Kyverno => ChartSpec {
            release: "kyverno",
            chart: "kyverno",
            repo: "https://kyverno.github.io/kyverno/",
            version: "3.3.4",
            namespace: "kyverno",
            set: Vec::new(),
        },
        ComponentKind::Gatekeeper => ChartSpec {
            release: "gatekeeper",
            chart: "gatekeeper",
            repo: "https://open-policy-agent.github.io/gatekeeper/charts",
            version: "3.18.0",
            namespace: "gatekeeper-system",
            set: Vec::new(),
        },
    };
    Some(spec)
}

/// Components that are enabled in the desired spec but absent on the
/// cluster. Pure planning, unit-testable without a cluster.
pub fn plan(desired: &ClusterSpec, detected: &DetectedComponents) -> Vec<ComponentKind> {
    let mut missing = Vec::new();
    match desired.cni {
        CniProvider::Cilium if detected.cni != CniProvider::Cilium => {
            missing.push(ComponentKind::Cilium);
        }
        CniProvider::Calico if detected.cni != CniProvider::Calico => {
            missing.push(ComponentKind::Calico);
        }
        _ => {}
    }
    if desired.csi && !detected.csi {
        missing.push(ComponentKind::Csi);
    }
    if desired.metrics_server && !detected.metrics_server {
        missing.push(ComponentKind::MetricsServer);
    }
    if desired.load_balancer && !detected.load_balancer {
        missing.push(ComponentKind::LoadBalancer);
    }
    if desired.cert_manager && !detected.cert_manager {
        missing.push(ComponentKind::CertManager);
    }
    match desired.policy_engine {
        PolicyEngine::Kyverno if detected.policy_engine != PolicyEngine::Kyverno => {
            missing.push(ComponentKind::Kyverno);
        }
        PolicyEngine::Gatekeeper if detected.policy_engine != PolicyEngine::Gatekeeper => {
            missing.push(ComponentKind::Gatekeeper);
        }
        _ => {}
    }
    missing
}

pub struct ComponentInstaller {
    helm: Helm,
    runtime: Option<DockerRuntime>,
    notifier: Notifier,
    timeout: Duration,
}

impl ComponentInstaller {
    pub fn new(
        helm: Helm,
        runtime: Option<DockerRuntime>,
        notifier: Notifier,
        timeout: Duration,
    ) -> Self {
        Self {
            helm,
            runtime,
            notifier,
            timeout,
        }
    }

    /// Install the planned components through the progress group. Returns
    /// the failed subset alongside the first error so callers can report
    /// partial failure.
    pub async fn install_all(
        &self,
        components: &[ComponentKind],
        spec: &ClusterSpec,
        cancel: &CancellationToken,
        timer: Option<&mut Timer>,
    ) -> Result<()> {
        if components.is_empty() {
            return Ok(());
        }

        // Webhook-dependent policy engines wait for cert-manager.
        let needs_gate = spec.cert_manager
            && components.contains(&ComponentKind::CertManager)
            && components
                .iter()
                .any(|c| matches!(c, ComponentKind::Kyverno | ComponentKind::Gatekeeper));
        let (gate_tx, gate_rx) = tokio::sync::watch::channel(!needs_gate);

        let mut group = ProgressGroup::new(self.notifier.clone(), "📦", "Installing components")
            .labels(LabelVariant::Installing);

        for component in components.iter().copied() {
            let helm = self.helm.clone();
            let runtime = self.runtime.clone();
            let timeout = self.timeout;
            let distribution = spec.distribution;
            let gate_tx = gate_tx.clone();
            let mut gate_rx = gate_rx.clone();

            group = group.task(component.display_name(), move |token| async move {
                if matches!(component, ComponentKind::Kyverno | ComponentKind::Gatekeeper) {
                    tokio::select! {
                        _ = token.cancelled() => anyhow::bail!("install cancelled"),
                        result = gate_rx.wait_for(|ready| *ready) => {
                            result.context("cert-manager gate closed")?;
                        }
                    }
                }

                let result = install_component(component, distribution, &helm, runtime.as_ref(), timeout).await;

                if component == ComponentKind::CertManager && result.is_ok() {
                    let _ = gate_tx.send(true);
                }
                result
            });
        }
        drop(gate_tx);

        group.run(cancel, timer).await
    }

    /// Remove a component during an in-place update.
    pub async fn uninstall(&self, component: ComponentKind) -> Result<()> {
        if let Some(chart) = chart_for(component) {
            self.helm.uninstall(chart.release, chart.namespace).await?;
        }
        Ok(())
    }
}

async fn install_component(
    component: ComponentKind,
    distribution: Distribution,
    helm: &Helm,
    runtime: Option<&DockerRuntime>,
    timeout: Duration,
) -> Result<()> {
    // Kind's load balancer lives outside the cluster.
    if component == ComponentKind::LoadBalancer && distribution == Distribution::Vanilla {
        let runtime = runtime
            .ok_or_else(|| anyhow::anyhow!("container runtime required for cloud-provider-kind"))?;
        return run_cloud_provider_kind(runtime).await;
    }

    let chart = chart_for(component)
        .ok_or_else(|| anyhow::anyhow!("no chart pinned for {}", component.display_name()))?;
    helm.install(&chart, timeout)
        .await
        .with_context(|| format!("failed to install {}", component.display_name()))
}

async fn run_cloud_provider_kind(runtime: &DockerRuntime) -> Result<()> {
    const NAME: &str = "cloud-provider-kind";
    if runtime.container_running(NAME).await {
        return Ok(());
    }
    if runtime.container_exists(NAME).await {
        return runtime.start_container(NAME).await;
    }
    let config = RunContainerConfig {
        name: NAME.to_string(),
        image: "registry.k8s.io/cloud-provider-kind/cloud-controller-manager:v0.4.0".to_string(),
        env: Vec::new(),
        ports: Vec::new(),
        volumes: vec![(
            "/var/run/docker.sock".to_string(),
            "/var/run/docker.sock".to_string(),
        )],
        labels: HashMap::new(),
        network: Some("kind".to_string()),
    };
    runtime
        .run_container(&config)
        .await
        .context("failed to start cloud-provider-kind")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{Cluster, Distribution, GitOpsEngine, Toggle};

    fn detected_none() -> DetectedComponents {
        DetectedComponents {
            cni: CniProvider::BuiltIn,
            csi: false,
            metrics_server: false,
            load_balancer: false,
            cert_manager: false,
            policy_engine: PolicyEngine::None,
            gitops_engine: GitOpsEngine::None,
        }
    }

    #[test]
    fn test_plan_empty_for_default_vanilla() {
        let spec = ClusterSpec::default_for("kind", Distribution::Vanilla, Default::default());
        assert!(plan(&spec, &detected_none()).is_empty());
    }

    #[test]
    fn test_plan_metrics_server_enable() {
        let mut cluster = Cluster::default();
        cluster.spec.metrics_server = Toggle::Enabled;
        let spec = cluster.resolve();
        assert_eq!(plan(&spec, &detected_none()), vec![ComponentKind::MetricsServer]);

        // Already present: nothing to do.
        let mut detected = detected_none();
        detected.metrics_server = true;
        assert!(plan(&spec, &detected).is_empty());
    }

    #[test]
    fn test_plan_cni_and_policy() {
        let mut cluster = Cluster::default();
        cluster.spec.cni = crate::config::CniOption::Cilium;
        cluster.spec.cert_manager = Toggle::Enabled;
        cluster.spec.policy_engine = PolicyEngine::Kyverno;
        let spec = cluster.resolve();
        let planned = plan(&spec, &detected_none());
        assert_eq!(
            planned,
            vec![
                ComponentKind::Cilium,
                ComponentKind::CertManager,
                ComponentKind::Kyverno
            ]
        );
    }

    #[test]
    fn test_every_helm_component_has_a_pinned_chart() {
        for component in [
            ComponentKind::Cilium,
            ComponentKind::Calico,
            ComponentKind::Csi,
            ComponentKind::MetricsServer,
            ComponentKind::LoadBalancer,
            ComponentKind::CertManager,
            ComponentKind::Kyverno,
            ComponentKind::Gatekeeper,
        ] {
            let chart = chart_for(component).expect("chart pinned");
            assert!(!chart.version.is_empty());
            assert!(chart.repo.starts_with("https://"));
        }
    }
}
