//! GitOps engine bootstrap
//!
//! Installs Flux or ArgoCD via its pinned chart and points it at the
//! workload OCI artifact in the local registry. Building and pushing the
//! artifact itself is the packager's job; the engine starts reconciling as
//! soon as the artifact appears.

use std::time::Duration;

use anyhow::{Context, Result};

use crate::components::{ChartSpec, Helm};
use crate::config::GitOpsEngine;
use crate::k8s::KubeOps;
use crate::registry::REGISTRY_CONTAINER_PORT;

/// Artifact repository name inside the local registry.
pub const WORKLOAD_ARTIFACT: &str = "ksail-workloads";

/// In-cluster URL of the workload artifact: nodes resolve the local
/// registry container by name on the cluster network.
pub fn artifact_url(local_registry_name: &str) -> String {
    format!(
        "oci://{}:{}/{}",
        local_registry_name, REGISTRY_CONTAINER_PORT, WORKLOAD_ARTIFACT
    )
}

fn engine_chart(engine: GitOpsEngine) -> Option<ChartSpec> {
    match engine {
        GitOpsEngine::None => None,
        GitOpsEngine::Flux => Some(ChartSpec {
            release: "flux",
            chart: "flux2",
            repo: "https://fluxcd-community.github.io/helm-charts",
            version: "2.14.1",
            namespace: "flux-system",
            set: Vec::new(),
        }),
        GitOpsEngine::ArgoCd => Some(ChartSpec {
            release: "argocd",
            chart: "argo-cd",
            repo: "https://argoproj.github.io/argo-helm",
            version: "7.7.11",
            namespace: "argocd",
            set: Vec::new(),
        }),
    }
}

pub async fn bootstrap(
    engine: GitOpsEngine,
    kube: &mut KubeOps,
    helm: &Helm,
    local_registry_name: &str,
    timeout: Duration,
) -> Result<()> {
    let Some(chart) = engine_chart(engine) else {
        return Ok(());
    };
    helm.install(&chart, timeout)
        .await
        .with_context(|| format!("failed to install {}", engine))?;

    // Source objects need the engine's controllers answering webhooks.
    let (controller, namespace) = match engine {
        GitOpsEngine::Flux => ("source-controller", "flux-system"),
        GitOpsEngine::ArgoCd => ("argocd-repo-server", "argocd"),
        GitOpsEngine::None => unreachable!("engine_chart returned a chart"),
    };
    if !kube
        .wait_for_deployment_ready(controller, namespace, timeout)
        .await?
    {
        anyhow::bail!("{} did not become ready within {:?}", controller, timeout);
    }

    let url = artifact_url(local_registry_name);
    match engine {
        GitOpsEngine::Flux => {
            kube.apply_yaml(&flux_source(&url)).await?;
            kube.apply_yaml(&flux_kustomization()).await?;
        }
        GitOpsEngine::ArgoCd => {
            kube.apply_yaml(&argocd_application(&url)).await?;
        }
        GitOpsEngine::None => {}
    }
    tracing::info!(engine = %engine, artifact = %url, "gitops engine bootstrapped");
    Ok(())
}

/// Remove the engine during an in-place update.
pub async fn uninstall(engine: GitOpsEngine, helm: &Helm) -> Result<()> {
    if let Some(chart) = engine_chart(engine) {
        helm.uninstall(chart.release, chart.namespace).await?;
    }
    Ok(())
}

fn flux_source(url: &str) -> String {
    format!(
        r#"apiVersion: source.toolkit.fluxcd.io/v1beta2
kind: OCIRepository
metadata:
  name: {WORKLOAD_ARTIFACT}
  namespace: flux-system
spec:
  interval: 1m
  url: {url}
  insecure: true
  ref:
    tag: latest
"#
    )
}

fn flux_kustomization() -> String {
    format!(
        r#"apiVersion: kustomize.toolkit.fluxcd.io/v1
kind: Kustomization
metadata:
  name: {WORKLOAD_ARTIFACT}
  namespace: flux-system
spec:
  interval: 1m
  prune: true
  path: ./
  sourceRef:
    kind: OCIRepository
    name: {WORKLOAD_ARTIFACT}
"#
    )
}

fn argocd_application(url: &str) -> String {
    format!(
        r#"apiVersion: argoproj.io/v1alpha1
kind: Application
metadata:
  name: {WORKLOAD_ARTIFACT}
  namespace: argocd
spec:
  project: default
  source:
    repoURL: {url}
    targetRevision: latest
  destination:
    server: https://kubernetes.default.svc
    namespace: default
  syncPolicy:
    automated:
      prune: true
      selfHeal: true
"#
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_artifact_url() {
        assert_eq!(
            artifact_url("ksail-registry"),
            "oci://ksail-registry:5000/ksail-workloads"
        );
    }

    #[test]
    fn test_source_manifests_parse() {
        let source: serde_yml::Value =
            serde_yml::from_str(&flux_source("oci://ksail-registry:5000/ksail-workloads"))
                .expect("valid yaml");
        assert_eq!(
            source.get("kind").and_then(|k| k.as_str()),
            Some("OCIRepository")
        );

        let app: serde_yml::Value =
            serde_yml::from_str(&argocd_application("oci://ksail-registry:5000/ksail-workloads"))
                .expect("valid yaml");
        assert_eq!(app.get("kind").and_then(|k| k.as_str()), Some("Application"));
    }

    #[test]
    fn test_no_chart_for_none() {
        assert!(engine_chart(GitOpsEngine::None).is_none());
    }
}
