//! Update executor
//!
//! Loads the live cluster's spec, diffs it against the desired one, and
//! applies the result: in-place component changes on the running cluster,
//! machine-config changes with a rolling or batch reboot, and full
//! recreation when `--force` allows it.

use anyhow::{anyhow, Result};

use super::diff::{diff, Change, ChangeCategory};
use super::{stage_error, Orchestrator, StageMeta};
use crate::components::{ComponentDetector, ComponentInstaller, ComponentKind};
use crate::config::{Distribution, GitOpsEngine, PolicyEngine};
use crate::error::Error;
use crate::gitops;
use crate::provisioner::{run_cli, scratch_config_path, ClusterProvisioner};
use crate::registry::RegistryManager;

const DETECT: StageMeta = StageMeta {
    emoji: "🔍",
    title: "Loading current cluster state",
    failure_prefix: "state detection failed",
};
const APPLY: StageMeta = StageMeta {
    emoji: "🔧",
    title: "Applying in-place changes",
    failure_prefix: "in-place update failed",
};
const REBOOT: StageMeta = StageMeta {
    emoji: "♻️",
    title: "Applying machine config and rebooting nodes",
    failure_prefix: "reboot update failed",
};

#[derive(Debug, Clone, Copy, Default)]
pub struct UpdateOptions {
    pub dry_run: bool,
    pub force: bool,
    pub rolling_reboot: bool,
}

/// Outcome of an update run, built up monotonically while it executes.
#[derive(Debug, Default)]
pub struct UpdateResult {
    pub in_place: Vec<Change>,
    pub reboot_required: Vec<Change>,
    pub recreate_required: Vec<Change>,
    pub applied: Vec<Change>,
    pub failed: Vec<Change>,
    /// Wall-clock spent applying each change, by field.
    pub timings: Vec<(String, std::time::Duration)>,
    pub reboot_count: u32,
    pub cluster_recreated: bool,
}

impl UpdateResult {
    pub fn categorize(changes: &[Change]) -> Self {
        let mut result = Self::default();
        for change in changes {
            match change.category {
                ChangeCategory::InPlace => result.in_place.push(change.clone()),
                ChangeCategory::RebootRequired => result.reboot_required.push(change.clone()),
                ChangeCategory::RecreateRequired => {
                    result.recreate_required.push(change.clone())
                }
            }
        }
        result
    }

    pub fn has_recreate_required(&self) -> bool {
        !self.recreate_required.is_empty()
    }

    pub fn is_empty(&self) -> bool {
        self.in_place.is_empty()
            && self.reboot_required.is_empty()
            && self.recreate_required.is_empty()
    }
}

impl Orchestrator {
    pub async fn update(&mut self, options: &UpdateOptions) -> Result<UpdateResult> {
        let cancel = self.cancel.clone();
        let runtime = self.runtime.clone();
        let name = self.spec.name.clone();

        // 1-2. Desired spec is already loaded; load the current one.
        self.begin(&DETECT);
        let provisioner = self
            .make_provisioner()
            .map_err(|err| stage_error(&DETECT, err))?;
        let reachable = provisioner.exists(&name).await.unwrap_or(false);
        let detected = if reachable {
            let helm = self.helm().map_err(|err| stage_error(&DETECT, err))?;
            let mut kube = self.kube_ops().map_err(|err| stage_error(&DETECT, err))?;
            let mut detector = ComponentDetector::new(&mut kube, &helm, runtime.as_ref());
            Some(
                detector
                    .detect(self.spec.distribution, self.spec.provider)
                    .await
                    .map_err(|err| stage_error(&DETECT, err))?,
            )
        } else {
            None
        };
        let current = provisioner
            .current_config(detected.as_ref(), &cancel)
            .await
            .map_err(|err| stage_error(&DETECT, err))?;

        // 3. Diff.
        let changes = diff(&current, &self.spec);
        let mut result = UpdateResult::categorize(&changes);
        if changes.is_empty() {
            self.notifier.success("no changes detected");
            self.print_timer();
            return Ok(result);
        }
        self.print_changes(&result);

        // 4. Dry run stops at the categorized list.
        if options.dry_run {
            return Ok(result);
        }

        // 5. Recreation needs explicit consent.
        if result.has_recreate_required() {
            if !options.force {
                return Err(Error::RecreateRequired {
                    changes: result.recreate_required.clone(),
                }
                .into());
            }
            drop(provisioner);
            self.destroy(false).await?;
            self.create().await?;
            result.cluster_recreated = true;
            result.applied = changes;
            self.print_update_summary(&result);
            return Ok(result);
        }

        // 6. In-place changes, each attributed individually. A partial
        //    failure is recorded, not fatal, unless everything failed.
        if !result.in_place.is_empty() {
            self.begin(&APPLY);
            let in_place = result.in_place.clone();
            for change in in_place {
                let started = std::time::Instant::now();
                match self.apply_in_place(&change, &current, &cancel).await {
                    Ok(()) => {
                        result.timings.push((change.field.clone(), started.elapsed()));
                        self.notifier
                            .success(format!("{} applied", change.field));
                        result.applied.push(change);
                    }
                    Err(err) => {
                        self.notifier
                            .error(format!("{} failed\n{:#}", change.field, err));
                        result.failed.push(change);
                    }
                }
            }
            if result.applied.is_empty() && !result.failed.is_empty() {
                return Err(stage_error(&APPLY, anyhow!("every in-place change failed")));
            }
        }

        // 7. Reboot-required changes: apply the machine config, then
        //    reboot per the chosen strategy.
        if !result.reboot_required.is_empty() {
            self.begin(&REBOOT);
            let rebooted = self
                .apply_reboot_changes(provisioner.as_ref(), options)
                .await
                .map_err(|err| stage_error(&REBOOT, err))?;
            result.reboot_count = rebooted;
            result.applied.extend(result.reboot_required.clone());
        }

        self.print_update_summary(&result);
        self.print_timer();
        Ok(result)
    }

    fn print_update_summary(&self, result: &UpdateResult) {
        for (field, elapsed) in &result.timings {
            tracing::debug!(field = %field, elapsed = ?elapsed, "change applied");
        }
        let mut summary = format!(
            "{} change(s) applied, {} failed",
            result.applied.len(),
            result.failed.len()
        );
        if result.reboot_count > 0 {
            summary.push_str(&format!(", {} node(s) rebooted", result.reboot_count));
        }
        if result.cluster_recreated {
            summary.push_str(", cluster recreated");
        }
        if result.failed.is_empty() {
            self.notifier.success(summary);
        } else {
            self.notifier.warning(summary);
        }
    }

    fn print_changes(&self, result: &UpdateResult) {
        for (title, changes) in [
            ("recreate-required", &result.recreate_required),
            ("reboot-required", &result.reboot_required),
            ("in-place", &result.in_place),
        ] {
            if changes.is_empty() {
                continue;
            }
            self.notifier
                .info(format!("{} change(s), {}:", changes.len(), title));
            for change in changes {
                self.notifier.info(format!("  {}", change));
            }
        }
    }

    async fn apply_in_place(
        &mut self,
        change: &Change,
        current: &crate::config::ClusterSpec,
        cancel: &tokio_util::sync::CancellationToken,
    ) -> Result<()> {
        let helm = self.helm()?;
        let installer = ComponentInstaller::new(
            helm.clone(),
            self.runtime.clone(),
            self.notifier.clone(),
            self.project.cluster.timeout(),
        );

        let toggle = |enabled: bool, kind: ComponentKind| {
            let installer = &installer;
            let spec = &self.spec;
            async move {
                if enabled {
                    installer.install_all(&[kind], spec, cancel, None).await
                } else {
                    installer.uninstall(kind).await
                }
            }
        };

        match change.field.as_str() {
            "csi" => toggle(self.spec.csi, ComponentKind::Csi).await,
            "metricsServer" => {
                toggle(self.spec.metrics_server, ComponentKind::MetricsServer).await
            }
            "loadBalancer" => {
                toggle(self.spec.load_balancer, ComponentKind::LoadBalancer).await
            }
            "certManager" => toggle(self.spec.cert_manager, ComponentKind::CertManager).await,
            "policyEngine" => {
                match current.policy_engine {
                    PolicyEngine::Kyverno => installer.uninstall(ComponentKind::Kyverno).await?,
                    PolicyEngine::Gatekeeper => {
                        installer.uninstall(ComponentKind::Gatekeeper).await?
                    }
                    PolicyEngine::None => {}
                }
                match self.spec.policy_engine {
                    PolicyEngine::Kyverno => {
                        installer
                            .install_all(&[ComponentKind::Kyverno], &self.spec, cancel, None)
                            .await
                    }
                    PolicyEngine::Gatekeeper => {
                        installer
                            .install_all(&[ComponentKind::Gatekeeper], &self.spec, cancel, None)
                            .await
                    }
                    PolicyEngine::None => Ok(()),
                }
            }
            "gitopsEngine" => {
                if current.gitops_engine != GitOpsEngine::None {
                    gitops::uninstall(current.gitops_engine, &helm).await?;
                }
                if self.spec.gitops_engine != GitOpsEngine::None {
                    let mut kube = self.kube_ops()?;
                    gitops::bootstrap(
                        self.spec.gitops_engine,
                        &mut kube,
                        &helm,
                        "ksail-registry",
                        self.project.cluster.timeout(),
                    )
                    .await?;
                }
                Ok(())
            }
            "localRegistryPort" => {
                let runtime = self
                    .runtime
                    .clone()
                    .ok_or(Error::ProviderUnavailable)?;
                let manager = RegistryManager::new(runtime);
                match self.spec.local_registry_port {
                    Some(port) => {
                        let info = manager.ensure_local_registry(&self.spec.name, port).await?;
                        manager.wait_ready(&info, cancel).await?;
                        Ok(())
                    }
                    None => match manager.remove_registry("ksail-registry", false).await {
                        Ok(()) => Ok(()),
                        Err(err) if crate::error::is_registry_not_found(&err) => Ok(()),
                        Err(err) => Err(err),
                    },
                }
            }
            field => Err(anyhow!("change to {} cannot be applied in place", field)),
        }
    }

    /// Patch machine configs with the reboot-required settings and reboot
    /// nodes one at a time or all at once.
    async fn apply_reboot_changes(
        &self,
        provisioner: &dyn ClusterProvisioner,
        options: &UpdateOptions,
    ) -> Result<u32> {
        if self.spec.distribution != Distribution::Talos {
            return Err(anyhow!(
                "reboot-required changes only apply to Talos clusters"
            ));
        }

        let nodes = provisioner.provider().list_nodes(&self.spec.name).await?;
        if nodes.is_empty() {
            return Err(Error::NoNodes.into());
        }

        let patch = self.machine_patch();
        let patch_path = scratch_config_path(&self.spec.name, "update-patch.yaml");
        tokio::fs::write(&patch_path, patch).await?;
        let patch_file = patch_path.to_string_lossy().into_owned();

        for node in &nodes {
            run_cli(
                Distribution::Talos,
                &[
                    "patch",
                    "machineconfig",
                    "--nodes",
                    &node.name,
                    "--patch-file",
                    &patch_file,
                ],
                &self.cancel,
            )
            .await?;
        }

        if options.rolling_reboot {
            for node in &nodes {
                run_cli(
                    Distribution::Talos,
                    &["reboot", "--nodes", &node.name, "--wait"],
                    &self.cancel,
                )
                .await?;
            }
        } else {
            let joined = nodes
                .iter()
                .map(|n| n.name.as_str())
                .collect::<Vec<_>>()
                .join(",");
            run_cli(
                Distribution::Talos,
                &["reboot", "--nodes", &joined],
                &self.cancel,
            )
            .await?;
        }

        let _ = tokio::fs::remove_file(&patch_path).await;
        Ok(nodes.len() as u32)
    }

    /// Reboot-safe machine patch carrying the desired kernel and disk
    /// settings.
    fn machine_patch(&self) -> String {
        let mut patch = String::from("machine:\n");
        if !self.spec.kernel_params.is_empty() {
            patch.push_str("  install:\n    extraKernelArgs:\n");
            for param in &self.spec.kernel_params {
                patch.push_str(&format!("      - {}\n", param));
            }
        }
        if self.spec.disk_encryption {
            patch.push_str(
                "  systemDiskEncryption:\n    state:\n      provider: luks2\n      keys:\n        - nodeID: {}\n          slot: 0\n",
            );
        }
        if let Some(machine_type) = &self.spec.machine_type {
            patch.push_str(&format!("  type: {}\n", machine_type));
        }
        patch
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{Cluster, CniOption, Distribution, Toggle};
    use crate::lifecycle::diff::diff;

    #[test]
    fn test_categorize_buckets() {
        let current =
            crate::config::ClusterSpec::default_for("dev", Distribution::Talos, Default::default());
        let mut cluster = Cluster::default();
        cluster.metadata.name = "dev".to_string();
        cluster.spec.distribution = Distribution::Talos;
        cluster.spec.cni = CniOption::Cilium;
        cluster.spec.metrics_server = Toggle::Enabled;
        cluster.spec.talos.kernel_params = vec!["vm.swappiness=0".to_string()];
        let desired = cluster.resolve();

        let result = UpdateResult::categorize(&diff(&current, &desired));
        assert_eq!(result.recreate_required.len(), 1);
        assert_eq!(result.reboot_required.len(), 1);
        assert_eq!(result.in_place.len(), 1);
        assert!(result.has_recreate_required());
        assert!(!result.is_empty());
        assert!(result.applied.is_empty() && result.failed.is_empty());
    }

    #[test]
    fn test_empty_result() {
        let result = UpdateResult::categorize(&[]);
        assert!(result.is_empty());
        assert!(!result.has_recreate_required());
    }
}
