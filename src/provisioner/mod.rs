//! Cluster provisioners
//!
//! One provisioner per distribution, each coordinating the distribution's
//! own CLI (`kind`, `k3d`, `talosctl`, `vcluster`) plus the node provider
//! for container-level operations. The factory is the only discriminator
//! over (distribution, provider); everything downstream works through the
//! trait.

mod k3d;
mod kind;
mod talos;
mod vcluster;

pub use k3d::K3dProvisioner;
pub use kind::KindProvisioner;
pub use talos::TalosProvisioner;
pub use vcluster::VClusterProvisioner;

use std::path::PathBuf;
use std::process::Stdio;
use std::sync::Arc;

use anyhow::{bail, Result};
use async_trait::async_trait;
use tokio::process::Command;
use tokio_util::sync::CancellationToken;

use crate::components::DetectedComponents;
use crate::config::{Cluster, ClusterSpec, Distribution, DistributionConfig, Provider};
use crate::error::Error;
use crate::provider::{
    ContainerNodeProvider, HetznerNodeProvider, LabelScheme, NodeProvider,
};
use crate::runtime::DockerRuntime;

/// Per-distribution cluster lifecycle operations. All operations are
/// cancellable and safe to call when the cluster is absent.
#[async_trait]
pub trait ClusterProvisioner: Send + Sync {
    fn distribution(&self) -> Distribution;

    /// The node provider backing this provisioner.
    fn provider(&self) -> &dyn NodeProvider;

    /// Bootstrap the cluster from the loaded distribution config. Succeeds
    /// (with a log line) when the cluster already exists, and propagates
    /// the kubeconfig into the configured path.
    async fn create(&self, cancel: &CancellationToken) -> Result<()>;

    /// Tear down the named cluster; absent clusters are a no-op. Node
    /// removal through the provider runs as fallback cleanup.
    async fn delete(&self, name: &str, cancel: &CancellationToken) -> Result<()>;

    /// Provider start plus distribution post-steps.
    async fn start(&self, name: &str, cancel: &CancellationToken) -> Result<()>;

    /// Provider stop plus distribution post-steps.
    async fn stop(&self, name: &str, cancel: &CancellationToken) -> Result<()>;

    /// True iff nodes are reachable and the control plane responds. "Not
    /// found" is `false`, never an error.
    async fn exists(&self, name: &str) -> Result<bool>;

    /// Cluster names known to this distribution.
    async fn list(&self, cancel: &CancellationToken) -> Result<Vec<String>>;

    /// Reconstruct the live cluster's spec for diffing. Component values
    /// come from the detector when given; distributions that cannot
    /// introspect machine settings fall back to the default spec so the
    /// diff engine sees no spurious changes.
    async fn current_config(
        &self,
        detected: Option<&DetectedComponents>,
        cancel: &CancellationToken,
    ) -> Result<ClusterSpec>;
}

/// Select the provisioner for (distribution, provider) and hand it the
/// loaded sub-config.
pub fn make_provisioner(
    cluster: &Cluster,
    dist_config: &DistributionConfig,
    runtime: Option<DockerRuntime>,
    kubeconfig: PathBuf,
) -> Result<Box<dyn ClusterProvisioner>> {
    let distribution = cluster.spec.distribution;
    let provider_kind = cluster.spec.provider;
    if !distribution.supports(provider_kind) {
        return Err(Error::config(format!(
            "distribution {} does not support provider {}",
            distribution, provider_kind
        ))
        .into());
    }

    let provider: Arc<dyn NodeProvider> = match provider_kind {
        Provider::Docker => {
            let runtime = runtime.clone().ok_or(Error::ProviderUnavailable)?;
            Arc::new(ContainerNodeProvider::new(
                runtime,
                LabelScheme::for_distribution(distribution),
            ))
        }
        Provider::Hetzner => Arc::new(HetznerNodeProvider::new()),
    };

    let provisioner: Box<dyn ClusterProvisioner> = match distribution {
        Distribution::Vanilla => Box::new(KindProvisioner::new(
            cluster.clone(),
            dist_config.kind.clone().unwrap_or_default(),
            provider,
            kubeconfig,
        )),
        Distribution::K3s => Box::new(K3dProvisioner::new(
            cluster.clone(),
            dist_config.k3d.clone().unwrap_or_default(),
            provider,
            kubeconfig,
        )),
        Distribution::Talos => Box::new(TalosProvisioner::new(
            cluster.clone(),
            dist_config.talos.clone().unwrap_or_default(),
            provider,
            kubeconfig,
        )),
        Distribution::VCluster => Box::new(VClusterProvisioner::new(
            cluster.clone(),
            provider,
            kubeconfig,
        )),
    };
    Ok(provisioner)
}

/// Run a distribution CLI to completion, honoring cancellation. Non-zero
/// exit becomes a provisioner error carrying stderr.
pub(crate) async fn run_cli(
    distribution: Distribution,
    args: &[&str],
    cancel: &CancellationToken,
) -> Result<String> {
    let binary = distribution.cli_binary();
    tracing::debug!(binary = binary, args = ?args, "running distribution CLI");

    let mut cmd = Command::new(binary);
    cmd.args(args)
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);

    let output = tokio::select! {
        _ = cancel.cancelled() => bail!("{} {} cancelled", binary, args.first().copied().unwrap_or("")),
        output = cmd.output() => output.map_err(|err| {
            anyhow::Error::from(Error::Provisioner {
                distribution: distribution.to_string(),
                message: format!("failed to run {}: {}", binary, err),
            })
        })?,
    };

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        return Err(Error::Provisioner {
            distribution: distribution.to_string(),
            message: format!(
                "{} {} failed: {}",
                binary,
                args.join(" "),
                stderr.trim()
            ),
        }
        .into());
    }
    Ok(String::from_utf8_lossy(&output.stdout).into_owned())
}

/// Scratch path for a generated config handed to a distribution CLI, so
/// the user's own file is never mutated.
pub(crate) fn scratch_config_path(cluster: &str, suffix: &str) -> PathBuf {
    std::env::temp_dir().join(format!("ksail-{}-{}", cluster, suffix))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_factory_rejects_unsupported_combo() {
        let mut cluster = Cluster::default();
        cluster.spec.distribution = Distribution::K3s;
        cluster.spec.provider = Provider::Hetzner;
        let result = make_provisioner(
            &cluster,
            &DistributionConfig::default(),
            None,
            PathBuf::from("/tmp/kubeconfig"),
        );
        assert!(result.is_err());
    }

    #[test]
    fn test_factory_requires_runtime_for_docker() {
        let cluster = Cluster::default();
        let result = make_provisioner(
            &cluster,
            &DistributionConfig::default(),
            None,
            PathBuf::from("/tmp/kubeconfig"),
        );
        let err = result.err().expect("should fail without runtime");
        assert!(matches!(
            err.downcast_ref::<Error>(),
            Some(Error::ProviderUnavailable)
        ));
    }

    #[test]
    fn test_scratch_path_is_cluster_scoped() {
        let a = scratch_config_path("dev", "kind.yaml");
        let b = scratch_config_path("prod", "kind.yaml");
        assert_ne!(a, b);
    }
}
