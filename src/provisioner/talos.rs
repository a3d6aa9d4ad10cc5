//! Talos provisioner
//!
//! Drives `talosctl` for bootstrap and teardown; machine-config patches
//! collected at config load (user patches plus the generated CNI, kubelet,
//! and mirror patches) are passed through to `talosctl cluster create`.
//! Cluster readiness intentionally does not wait on CoreDNS or kube-proxy
//! when running in Docker.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use super::{run_cli, scratch_config_path, ClusterProvisioner};
use crate::components::DetectedComponents;
use crate::config::{Cluster, ClusterSpec, Distribution, Provider, TalosConfig};
use crate::error;
use crate::k8s::{kubeconfig, KubeOps};
use crate::provider::{HetznerNodeProvider, NodeProvider, NodeRole};

pub struct TalosProvisioner {
    cluster: Cluster,
    config: TalosConfig,
    provider: Arc<dyn NodeProvider>,
    kubeconfig_path: PathBuf,
}

impl TalosProvisioner {
    pub fn new(
        cluster: Cluster,
        config: TalosConfig,
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

    /// Write every patch document to scratch files and return the
    /// `--config-patch @path` argument pairs.
    async fn write_patches(&self, name: &str) -> Result<Vec<String>> {
        let mut args = Vec::new();
        for (index, patch) in self.config.patches.iter().enumerate() {
            let path = scratch_config_path(name, &format!("patch-{}.yaml", index));
            let content =
                serde_yml::to_string(&patch.value).context("failed to render Talos patch")?;
            tokio::fs::write(&path, content)
                .await
                .with_context(|| format!("failed to write {}", path.display()))?;
            args.push("--config-patch".to_string());
            args.push(format!("@{}", path.to_string_lossy()));
        }
        Ok(args)
    }
}

#[async_trait]
impl ClusterProvisioner for TalosProvisioner {
    fn distribution(&self) -> Distribution {
        Distribution::Talos
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

        if self.cluster.spec.provider == Provider::Hetzner {
            let hetzner = &self.cluster.spec.hetzner;
            tracing::info!(
                location = %hetzner.location,
                server_type = %hetzner.server_type,
                "provisioning on Hetzner"
            );
            HetznerNodeProvider::new()
                .ensure_placement_group(&name, hetzner.placement_group)
                .await?;
        }

        let control_planes = self.cluster.spec.control_planes.to_string();
        let workers = self.cluster.spec.workers.to_string();
        let mut args: Vec<String> = vec![
            "cluster".into(),
            "create".into(),
            "--name".into(),
            name.clone(),
            "--controlplanes".into(),
            control_planes,
            "--workers".into(),
            workers,
        ];
        if self.cluster.spec.provider == Provider::Docker {
            args.push("--provisioner".into());
            args.push("docker".into());
        }
        args.extend(self.write_patches(&name).await?);

        let arg_refs: Vec<&str> = args.iter().map(String::as_str).collect();
        run_cli(Distribution::Talos, &arg_refs, cancel).await?;

        // Merge the cluster's kubeconfig into the configured path.
        run_cli(
            Distribution::Talos,
            &[
                "kubeconfig",
                &self.kubeconfig_path.to_string_lossy(),
                "--nodes",
                "127.0.0.1",
                "--force",
            ],
            cancel,
        )
        .await?;

        tracing::info!(cluster = %name, "talos cluster created");
        Ok(())
    }

    async fn delete(&self, name: &str, cancel: &CancellationToken) -> Result<()> {
        match self.provider.nodes_exist(name).await {
            Ok(true) => {
                run_cli(
                    Distribution::Talos,
                    &["cluster", "destroy", "--name", name],
                    cancel,
                )
                .await?;
            }
            Ok(false) => {}
            Err(err) if error::is_no_nodes(&err) => {}
            Err(err) => return Err(err),
        }
        self.provider.delete_nodes(name).await?;
        kubeconfig::remove_entries(
            &self.kubeconfig_path,
            name,
            &format!("admin@{}", name),
            &format!("admin@{}", name),
        )
        .await?;
        Ok(())
    }

    async fn start(&self, name: &str, cancel: &CancellationToken) -> Result<()> {
        self.provider.start_nodes(name).await?;
        // Re-establish the etcd client after the nodes come back.
        if let Err(err) = run_cli(
            Distribution::Talos,
            &["etcd", "status", "--nodes", "127.0.0.1"],
            cancel,
        )
        .await
        {
            tracing::warn!(cluster = %name, error = %err, "etcd reconnect failed, continuing");
        }
        Ok(())
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

    async fn list(&self, _cancel: &CancellationToken) -> Result<Vec<String>> {
        self.provider.list_all_clusters().await
    }

    async fn current_config(
        &self,
        detected: Option<&DetectedComponents>,
        cancel: &CancellationToken,
    ) -> Result<ClusterSpec> {
        let name = self.name();
        let mut spec =
            ClusterSpec::default_for(&name, Distribution::Talos, self.cluster.spec.provider);

        if let Ok(nodes) = self.provider.list_nodes(&name).await {
            if !nodes.is_empty() {
                spec.control_planes = nodes
                    .iter()
                    .filter(|n| n.role == NodeRole::ControlPlane)
                    .count() as u32;
                spec.workers = nodes.iter().filter(|n| n.role == NodeRole::Worker).count() as u32;
            }
        }

        // Machine settings are introspectable through the Talos API.
        match run_cli(
            Distribution::Talos,
            &[
                "get",
                "machineconfig",
                "--nodes",
                "127.0.0.1",
                "-o",
                "yaml",
            ],
            cancel,
        )
        .await
        {
            Ok(stdout) => {
                let (kernel_params, disk_encryption) = parse_machine_options(&stdout);
                spec.kernel_params = kernel_params;
                spec.disk_encryption = disk_encryption;
            }
            Err(err) => {
                tracing::debug!(error = %err, "machineconfig introspection failed, using defaults");
            }
        }

        if let Some(detected) = detected {
            detected.apply_to(&mut spec);
        }
        Ok(spec)
    }
}

/// Extract kernel args and disk-encryption state from a machineconfig
/// resource dump.
fn parse_machine_options(yaml: &str) -> (Vec<String>, bool) {
    let mut kernel_params = Vec::new();
    let mut disk_encryption = false;
    for document in yaml.split("\n---") {
        let Ok(value) = serde_yml::from_str::<serde_yml::Value>(document) else {
            continue;
        };
        let machine = value
            .get("spec")
            .and_then(|s| s.get("machine"))
            .or_else(|| value.get("machine"));
        let Some(machine) = machine else { continue };

        if let Some(args) = machine
            .get("install")
            .and_then(|i| i.get("extraKernelArgs"))
            .and_then(|a| a.as_sequence())
        {
            for arg in args {
                if let Some(arg) = arg.as_str() {
                    if !kernel_params.iter().any(|p| p == arg) {
                        kernel_params.push(arg.to_string());
                    }
                }
            }
        }
        if machine
            .get("systemDiskEncryption")
            .is_some_and(|v| !v.is_null())
        {
            disk_encryption = true;
        }
    }
    (kernel_params, disk_encryption)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_machine_options() {
        let yaml = r#"
node: 127.0.0.1
spec:
  machine:
    install:
      extraKernelArgs:
        - vm.nr_hugepages=1024
    systemDiskEncryption:
      state:
        provider: luks2
"#;
        let (params, encrypted) = parse_machine_options(yaml);
        assert_eq!(params, vec!["vm.nr_hugepages=1024".to_string()]);
        assert!(encrypted);
    }

    #[test]
    fn test_parse_machine_options_defaults() {
        let (params, encrypted) = parse_machine_options("spec:\n  machine: {}\n");
        assert!(params.is_empty());
        assert!(!encrypted);
    }
}
