//! Configuration diff engine
//!
//! Field-by-field comparison between the desired and current resolved
//! specs. Every field maps to exactly one disruption category; where more
//! than one rule could apply, the most disruptive one is assigned at the
//! mapping level, so a change never needs re-classification downstream.

use std::fmt;

use crate::config::ClusterSpec;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum ChangeCategory {
    InPlace,
    RebootRequired,
    RecreateRequired,
}

impl fmt::Display for ChangeCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ChangeCategory::InPlace => f.write_str("in-place"),
            ChangeCategory::RebootRequired => f.write_str("reboot-required"),
            ChangeCategory::RecreateRequired => f.write_str("recreate-required"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Change {
    pub field: String,
    pub old: String,
    pub new: String,
    pub category: ChangeCategory,
    pub rationale: String,
}

impl fmt::Display for Change {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} [{}]: {} -> {} ({})",
            self.field, self.category, self.old, self.new, self.rationale
        )
    }
}

fn change(
    field: &str,
    old: impl fmt::Display,
    new: impl fmt::Display,
    category: ChangeCategory,
    rationale: &str,
) -> Change {
    Change {
        field: field.to_string(),
        old: old.to_string(),
        new: new.to_string(),
        category,
        rationale: rationale.to_string(),
    }
}

/// Compare current against desired. `diff(a, a)` is empty for any spec.
pub fn diff(current: &ClusterSpec, desired: &ClusterSpec) -> Vec<Change> {
    let mut changes = Vec::new();

    if current.name != desired.name {
        changes.push(change(
            "name",
            &current.name,
            &desired.name,
            ChangeCategory::RecreateRequired,
            "the cluster name keys every node, network, and kubeconfig entry",
        ));
    }
    if current.distribution != desired.distribution {
        changes.push(change(
            "distribution",
            current.distribution,
            desired.distribution,
            ChangeCategory::RecreateRequired,
            "a cluster cannot change its distribution in place",
        ));
    }
    if current.provider != desired.provider {
        changes.push(change(
            "provider",
            current.provider,
            desired.provider,
            ChangeCategory::RecreateRequired,
            "nodes live on the old provider's infrastructure",
        ));
    }
    if current.network_cidr != desired.network_cidr {
        changes.push(change(
            "networkCidr",
            current.network_cidr.as_deref().unwrap_or("<default>"),
            desired.network_cidr.as_deref().unwrap_or("<default>"),
            ChangeCategory::RecreateRequired,
            "pod and service addressing is fixed at bootstrap",
        ));
    }
    if current.control_planes != desired.control_planes {
        changes.push(change(
            "controlPlanes",
            current.control_planes,
            desired.control_planes,
            ChangeCategory::RecreateRequired,
            "the node roster is fixed at bootstrap for container clusters",
        ));
    }
    if current.workers != desired.workers {
        changes.push(change(
            "workers",
            current.workers,
            desired.workers,
            ChangeCategory::RecreateRequired,
            "the node roster is fixed at bootstrap for container clusters",
        ));
    }
    if current.cni != desired.cni {
        changes.push(change(
            "cni",
            current.cni,
            desired.cni,
            ChangeCategory::RecreateRequired,
            "pods cannot be rescheduled while the CNI is swapped out",
        ));
    }

    if current.kernel_params != desired.kernel_params {
        changes.push(change(
            "talos.kernelParams",
            current.kernel_params.join(","),
            desired.kernel_params.join(","),
            ChangeCategory::RebootRequired,
            "kernel parameters only take effect at boot",
        ));
    }
    if current.disk_encryption != desired.disk_encryption {
        changes.push(change(
            "talos.diskEncryption",
            current.disk_encryption,
            desired.disk_encryption,
            ChangeCategory::RebootRequired,
            "disk encryption state changes during boot",
        ));
    }
    if current.machine_type != desired.machine_type {
        changes.push(change(
            "talos.machineType",
            current.machine_type.as_deref().unwrap_or("<default>"),
            desired.machine_type.as_deref().unwrap_or("<default>"),
            ChangeCategory::RebootRequired,
            "the machine type is applied by the boot sequence",
        ));
    }

    if current.csi != desired.csi {
        changes.push(change(
            "csi",
            current.csi,
            desired.csi,
            ChangeCategory::InPlace,
            "storage provisioners install and uninstall on a running cluster",
        ));
    }
    if current.metrics_server != desired.metrics_server {
        changes.push(change(
            "metricsServer",
            current.metrics_server,
            desired.metrics_server,
            ChangeCategory::InPlace,
            "metrics-server installs and uninstalls on a running cluster",
        ));
    }
    if current.load_balancer != desired.load_balancer {
        changes.push(change(
            "loadBalancer",
            current.load_balancer,
            desired.load_balancer,
            ChangeCategory::InPlace,
            "load balancers install and uninstall on a running cluster",
        ));
    }
    if current.cert_manager != desired.cert_manager {
        changes.push(change(
            "certManager",
            current.cert_manager,
            desired.cert_manager,
            ChangeCategory::InPlace,
            "cert-manager installs and uninstalls on a running cluster",
        ));
    }
    if current.policy_engine != desired.policy_engine {
        changes.push(change(
            "policyEngine",
            current.policy_engine,
            desired.policy_engine,
            ChangeCategory::InPlace,
            "policy engines install and uninstall on a running cluster",
        ));
    }
    if current.gitops_engine != desired.gitops_engine {
        changes.push(change(
            "gitopsEngine",
            current.gitops_engine,
            desired.gitops_engine,
            ChangeCategory::InPlace,
            "GitOps engines install and uninstall on a running cluster",
        ));
    }
    if current.local_registry_port != desired.local_registry_port {
        changes.push(change(
            "localRegistryPort",
            format_port(current.local_registry_port),
            format_port(desired.local_registry_port),
            ChangeCategory::InPlace,
            "the local registry is a sibling container",
        ));
    }

    changes
}

fn format_port(port: Option<u16>) -> String {
    port.map(|p| p.to_string())
        .unwrap_or_else(|| "<none>".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{Cluster, CniOption, Distribution, PolicyEngine, Toggle};

    fn base() -> ClusterSpec {
        ClusterSpec::default_for("dev", Distribution::Talos, Default::default())
    }

    #[test]
    fn test_reflexivity() {
        let spec = base();
        assert!(diff(&spec, &spec).is_empty());

        let mut cluster = Cluster::default();
        cluster.spec.distribution = Distribution::K3s;
        cluster.spec.policy_engine = PolicyEngine::Kyverno;
        let spec = cluster.resolve();
        assert!(diff(&spec, &spec).is_empty());
    }

    #[test]
    fn test_cni_change_is_recreate() {
        let current = base();
        let mut cluster = Cluster::default();
        cluster.metadata.name = "dev".to_string();
        cluster.spec.distribution = Distribution::Talos;
        cluster.spec.cni = CniOption::Cilium;
        let desired = cluster.resolve();

        let changes = diff(&current, &desired);
        assert_eq!(changes.len(), 1);
        assert_eq!(changes[0].field, "cni");
        assert_eq!(changes[0].category, ChangeCategory::RecreateRequired);
    }

    #[test]
    fn test_metrics_server_change_is_in_place() {
        let current = base();
        let mut cluster = Cluster::default();
        cluster.metadata.name = "dev".to_string();
        cluster.spec.distribution = Distribution::Talos;
        cluster.spec.metrics_server = Toggle::Enabled;
        let desired = cluster.resolve();

        let changes = diff(&current, &desired);
        assert_eq!(changes.len(), 1);
        assert_eq!(changes[0].field, "metricsServer");
        assert_eq!(changes[0].category, ChangeCategory::InPlace);
    }

    #[test]
    fn test_kernel_params_change_is_reboot() {
        let current = base();
        let mut desired = base();
        desired.kernel_params = vec!["vm.nr_hugepages=1024".to_string()];

        let changes = diff(&current, &desired);
        assert_eq!(changes.len(), 1);
        assert_eq!(changes[0].category, ChangeCategory::RebootRequired);
    }

    #[test]
    fn test_roster_change_is_recreate() {
        let current = base();
        let mut desired = base();
        desired.workers = 3;
        let changes = diff(&current, &desired);
        assert_eq!(changes.len(), 1);
        assert_eq!(changes[0].category, ChangeCategory::RecreateRequired);
    }
}
