//! Distribution sub-configuration
//!
//! Each distribution keeps its own declarative config next to `ksail.yaml`:
//! a Kind cluster document, a K3d SimpleConfig, or a directory of Talos
//! machine configs plus optional patches. Loading applies defaults and the
//! in-memory patches derived from the root document (kubelet certificate
//! rotation for metrics-server, disabling the built-in CNI when another one
//! is requested).

use std::fs;
use std::path::Path;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use super::types::{CniOption, Cluster, Distribution};
use crate::error::Error;

pub const KIND_API_VERSION: &str = "kind.x-k8s.io/v1alpha4";
pub const K3D_API_VERSION: &str = "k3d.io/v1alpha5";

/// Exactly one field is populated, matching the root distribution;
/// VCluster carries no sub-config.
#[derive(Debug, Clone, Default)]
pub struct DistributionConfig {
    pub kind: Option<KindCluster>,
    pub k3d: Option<K3dSimpleConfig>,
    pub talos: Option<TalosConfig>,
}

impl DistributionConfig {
    pub fn network_cidr(&self) -> Option<String> {
        if let Some(kind) = &self.kind {
            return kind.networking.pod_subnet.clone();
        }
        None
    }

    /// Node roster as role strings, for diff classification.
    pub fn node_roster(&self) -> Vec<String> {
        if let Some(kind) = &self.kind {
            return kind.nodes.iter().map(|n| n.role.clone()).collect();
        }
        if let Some(k3d) = &self.k3d {
            let mut roster = vec!["server".to_string(); k3d.servers as usize];
            roster.extend(vec!["agent".to_string(); k3d.agents as usize]);
            return roster;
        }
        Vec::new()
    }
}

// === Kind ===

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct KindCluster {
    pub api_version: String,
    pub kind: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default)]
    pub nodes: Vec<KindNode>,
    #[serde(default)]
    pub networking: KindNetworking,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub containerd_config_patches: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub kubeadm_config_patches: Vec<String>,
}

impl Default for KindCluster {
    fn default() -> Self {
        Self {
            api_version: KIND_API_VERSION.to_string(),
            kind: "Cluster".to_string(),
            name: None,
            nodes: vec![KindNode::control_plane()],
            networking: KindNetworking::default(),
            containerd_config_patches: Vec::new(),
            kubeadm_config_patches: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KindNode {
    pub role: String,
}

impl KindNode {
    pub fn control_plane() -> Self {
        Self {
            role: "control-plane".to_string(),
        }
    }

    pub fn worker() -> Self {
        Self {
            role: "worker".to_string(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct KindNetworking {
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub disable_default_cni: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pod_subnet: Option<String>,
}

// === K3d ===

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct K3dSimpleConfig {
    pub api_version: String,
    pub kind: String,
    #[serde(default)]
    pub metadata: K3dMetadata,
    #[serde(default = "default_servers")]
    pub servers: u32,
    #[serde(default)]
    pub agents: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub registries: Option<K3dRegistries>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub options: Option<K3dOptions>,
}

impl Default for K3dSimpleConfig {
    fn default() -> Self {
        Self {
            api_version: K3D_API_VERSION.to_string(),
            kind: "Simple".to_string(),
            metadata: K3dMetadata::default(),
            servers: 1,
            agents: 0,
            registries: None,
            options: None,
        }
    }
}

fn default_servers() -> u32 {
    1
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct K3dMetadata {
    #[serde(default)]
    pub name: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct K3dRegistries {
    /// Inline `registries.yaml` content handed to k3d verbatim.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub config: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct K3dOptions {
    #[serde(default)]
    pub k3s: K3sOptions,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct K3sOptions {
    #[serde(default)]
    pub extra_args: Vec<K3sExtraArg>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct K3sExtraArg {
    pub arg: String,
    #[serde(default)]
    pub node_filters: Vec<String>,
}

impl K3sExtraArg {
    pub fn for_servers(arg: impl Into<String>) -> Self {
        Self {
            arg: arg.into(),
            node_filters: vec!["server:*".to_string()],
        }
    }

    pub fn for_all(arg: impl Into<String>) -> Self {
        Self {
            arg: arg.into(),
            node_filters: vec!["all".to_string()],
        }
    }
}

// === Talos ===

/// Machine configs and patches, kept as raw documents; ksail appends its own
/// patches rather than rewriting user files.
#[derive(Debug, Clone, Default)]
pub struct TalosConfig {
    pub machine_configs: Vec<NamedDocument>,
    pub patches: Vec<NamedDocument>,
}

#[derive(Debug, Clone)]
pub struct NamedDocument {
    pub name: String,
    pub value: serde_yml::Value,
}

impl TalosConfig {
    pub fn push_patch(&mut self, name: impl Into<String>, yaml: &str) -> Result<()> {
        let value = serde_yml::from_str(yaml).context("invalid generated Talos patch")?;
        self.patches.push(NamedDocument {
            name: name.into(),
            value,
        });
        Ok(())
    }

    /// Mirror hosts already referenced by loaded machine configs or patches.
    pub fn referenced_mirror_hosts(&self) -> Vec<String> {
        let mut hosts = Vec::new();
        for doc in self.machine_configs.iter().chain(self.patches.iter()) {
            let mirrors = doc
                .value
                .get("machine")
                .and_then(|m| m.get("registries"))
                .and_then(|r| r.get("mirrors"))
                .and_then(|m| m.as_mapping());
            if let Some(mirrors) = mirrors {
                for key in mirrors.keys() {
                    if let Some(host) = key.as_str() {
                        if !hosts.iter().any(|h| h == host) {
                            hosts.push(host.to_string());
                        }
                    }
                }
            }
        }
        hosts
    }
}

/// Load the sub-config matching the root distribution and apply in-memory
/// patches derived from the root document.
pub fn load_distribution(root: &Cluster, project_dir: &Path) -> Result<DistributionConfig> {
    let mut config = DistributionConfig::default();
    match root.spec.distribution {
        Distribution::Vanilla => {
            config.kind = Some(load_kind(root, project_dir)?);
        }
        Distribution::K3s => {
            config.k3d = Some(load_k3d(root, project_dir)?);
        }
        Distribution::Talos => {
            config.talos = Some(load_talos(root, project_dir)?);
        }
        Distribution::VCluster => {}
    }
    Ok(config)
}

fn load_kind(root: &Cluster, project_dir: &Path) -> Result<KindCluster> {
    let mut kind = match read_first(project_dir, &["kind.yaml", "kind.yml"])? {
        Some((path, content)) => serde_yml::from_str(&content).map_err(|err| {
            anyhow::Error::from(Error::config(format!(
                "failed to parse {}: {}",
                path.display(),
                err
            )))
        })?,
        None => {
            // Vanilla runs without a config file: synthesize the roster from
            // the root document.
            let mut kind = KindCluster::default();
            kind.nodes = Vec::new();
            for _ in 0..root.spec.control_planes {
                kind.nodes.push(KindNode::control_plane());
            }
            for _ in 0..root.spec.workers {
                kind.nodes.push(KindNode::worker());
            }
            kind
        }
    };

    if root.spec.cni != CniOption::Default {
        kind.networking.disable_default_cni = true;
    }
    if root.resolve().metrics_server {
        let patch = "kind: ClusterConfiguration\nmetadata:\n  name: config\nkubelet:\n  serverTLSBootstrap: true\n";
        if !kind.kubeadm_config_patches.iter().any(|p| p.contains("serverTLSBootstrap")) {
            kind.kubeadm_config_patches.push(patch.to_string());
        }
    }
    Ok(kind)
}

fn load_k3d(root: &Cluster, project_dir: &Path) -> Result<K3dSimpleConfig> {
    let (path, content) = read_first(project_dir, &["k3d.yaml", "k3d.yml"])?.ok_or_else(|| {
        anyhow::Error::from(Error::config(format!(
            "distribution K3s requires a k3d.yaml next to {}",
            project_dir.join("ksail.yaml").display()
        )))
    })?;

    let mut k3d: K3dSimpleConfig = serde_yml::from_str(&content).map_err(|err| {
        anyhow::Error::from(Error::config(format!(
            "failed to parse {}: {}",
            path.display(),
            err
        )))
    })?;

    if k3d.metadata.name.is_empty() {
        k3d.metadata.name = root.cluster_name();
    }

    let options = k3d.options.get_or_insert_with(K3dOptions::default);
    if root.spec.cni != CniOption::Default {
        push_unique_arg(options, K3sExtraArg::for_servers("--flannel-backend=none"));
        push_unique_arg(
            options,
            K3sExtraArg::for_servers("--disable-network-policy"),
        );
    }
    if root.resolve().metrics_server {
        push_unique_arg(
            options,
            K3sExtraArg::for_all("--kubelet-arg=rotate-server-certificates=true"),
        );
    }
    if options.k3s.extra_args.is_empty() {
        k3d.options = None;
    }
    Ok(k3d)
}

fn push_unique_arg(options: &mut K3dOptions, arg: K3sExtraArg) {
    if !options.k3s.extra_args.iter().any(|a| a.arg == arg.arg) {
        options.k3s.extra_args.push(arg);
    }
}

fn load_talos(root: &Cluster, project_dir: &Path) -> Result<TalosConfig> {
    let talos_dir = project_dir.join("talos");
    if !talos_dir.is_dir() {
        return Err(anyhow::Error::from(Error::config(format!(
            "distribution Talos requires machine configs under {}",
            talos_dir.display()
        ))));
    }

    let mut config = TalosConfig::default();
    config.machine_configs = read_yaml_dir(&talos_dir)?;
    let patches_dir = talos_dir.join("patches");
    if patches_dir.is_dir() {
        config.patches = read_yaml_dir(&patches_dir)?;
    }

    if root.spec.cni != CniOption::Default {
        config.push_patch(
            "ksail-cni-none",
            "cluster:\n  network:\n    cni:\n      name: none\n",
        )?;
    }
    if root.resolve().metrics_server {
        config.push_patch(
            "ksail-kubelet-cert-rotation",
            "machine:\n  kubelet:\n    extraArgs:\n      rotate-server-certificates: \"true\"\n",
        )?;
    }
    for param in &root.spec.talos.kernel_params {
        config.push_patch(
            format!("ksail-kernel-{}", param.replace(['.', '='], "-")),
            &format!("machine:\n  install:\n    extraKernelArgs:\n      - {}\n", param),
        )?;
    }
    Ok(config)
}

fn read_yaml_dir(dir: &Path) -> Result<Vec<NamedDocument>> {
    let mut documents = Vec::new();
    let mut entries: Vec<_> = fs::read_dir(dir)
        .with_context(|| format!("failed to read {}", dir.display()))?
        .filter_map(|e| e.ok())
        .map(|e| e.path())
        .filter(|p| {
            p.is_file()
                && matches!(
                    p.extension().and_then(|e| e.to_str()),
                    Some("yaml") | Some("yml")
                )
        })
        .collect();
    entries.sort();

    for path in entries {
        let content = fs::read_to_string(&path)
            .with_context(|| format!("failed to read {}", path.display()))?;
        let value: serde_yml::Value = serde_yml::from_str(&content).map_err(|err| {
            anyhow::Error::from(Error::config(format!(
                "failed to parse {}: {}",
                path.display(),
                err
            )))
        })?;
        documents.push(NamedDocument {
            name: path
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_default(),
            value,
        });
    }
    Ok(documents)
}

fn read_first(dir: &Path, names: &[&str]) -> Result<Option<(std::path::PathBuf, String)>> {
    for name in names {
        let path = dir.join(name);
        if path.is_file() {
            let content = fs::read_to_string(&path)
                .with_context(|| format!("failed to read {}", path.display()))?;
            return Ok(Some((path, content)));
        }
    }
    Ok(None)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::types::{Distribution, Toggle};

    fn root(distribution: Distribution) -> Cluster {
        let mut cluster = Cluster::default();
        cluster.metadata.name = "demo".to_string();
        cluster.spec.distribution = distribution;
        cluster
    }

    #[test]
    fn test_vanilla_defaults_synthesize_roster() {
        let dir = tempfile::tempdir().expect("tempdir");
        let mut cluster = root(Distribution::Vanilla);
        cluster.spec.workers = 2;
        let config = load_distribution(&cluster, dir.path()).expect("load");
        let kind = config.kind.expect("kind populated");
        assert_eq!(config.k3d.is_none(), true);
        assert_eq!(
            kind.nodes.iter().map(|n| n.role.as_str()).collect::<Vec<_>>(),
            vec!["control-plane", "worker", "worker"]
        );
    }

    #[test]
    fn test_missing_k3d_config_is_fatal() {
        let dir = tempfile::tempdir().expect("tempdir");
        let cluster = root(Distribution::K3s);
        assert!(load_distribution(&cluster, dir.path()).is_err());
    }

    #[test]
    fn test_k3d_cni_patch() {
        let dir = tempfile::tempdir().expect("tempdir");
        fs::write(
            dir.path().join("k3d.yaml"),
            "apiVersion: k3d.io/v1alpha5\nkind: Simple\nservers: 1\nagents: 1\n",
        )
        .expect("write");
        let mut cluster = root(Distribution::K3s);
        cluster.spec.cni = CniOption::Cilium;
        let config = load_distribution(&cluster, dir.path()).expect("load");
        let k3d = config.k3d.expect("k3d populated");
        let args: Vec<_> = k3d
            .options
            .expect("options")
            .k3s
            .extra_args
            .iter()
            .map(|a| a.arg.clone())
            .collect();
        assert!(args.contains(&"--flannel-backend=none".to_string()));
        assert!(args.contains(&"--disable-network-policy".to_string()));
        assert_eq!(k3d.metadata.name, "demo");
    }

    #[test]
    fn test_kind_metrics_server_patch() {
        let dir = tempfile::tempdir().expect("tempdir");
        let mut cluster = root(Distribution::Vanilla);
        cluster.spec.metrics_server = Toggle::Enabled;
        let config = load_distribution(&cluster, dir.path()).expect("load");
        let kind = config.kind.expect("kind populated");
        assert!(kind
            .kubeadm_config_patches
            .iter()
            .any(|p| p.contains("serverTLSBootstrap")));
    }

    #[test]
    fn test_talos_patches_and_mirror_hosts() {
        let dir = tempfile::tempdir().expect("tempdir");
        let talos = dir.path().join("talos");
        fs::create_dir_all(talos.join("patches")).expect("mkdir");
        fs::write(
            talos.join("controlplane.yaml"),
            "machine:\n  type: controlplane\n  registries:\n    mirrors:\n      docker.io:\n        endpoints:\n          - http://demo-docker.io:5000\n",
        )
        .expect("write");
        let mut cluster = root(Distribution::Talos);
        cluster.spec.cni = CniOption::Calico;
        let config = load_distribution(&cluster, dir.path()).expect("load");
        let talos = config.talos.expect("talos populated");
        assert_eq!(talos.machine_configs.len(), 1);
        assert!(talos.patches.iter().any(|p| p.name == "ksail-cni-none"));
        assert_eq!(talos.referenced_mirror_hosts(), vec!["docker.io"]);
    }
}
