//! Configuration file loading
//!
//! `ksail.yaml` is searched for by walking upward from the working
//! directory, so any subdirectory of a project behaves like the project
//! root. CLI flags are merged on top of the parsed document before
//! validation.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{anyhow, Context, Result};

use super::types::{
    CniOption, Cluster, Distribution, GitOpsEngine, PolicyEngine, Provider, Toggle,
};
use crate::error::Error;

const CONFIG_NAMES: [&str; 2] = ["ksail.yaml", "ksail.yml"];

/// CLI flag overrides merged onto the loaded document. `None` means the
/// flag was not given and the file value stands.
#[derive(Debug, Clone, Default)]
pub struct Overrides {
    pub distribution: Option<Distribution>,
    pub provider: Option<Provider>,
    pub cni: Option<CniOption>,
    pub csi: Option<Toggle>,
    pub metrics_server: Option<Toggle>,
    pub load_balancer: Option<Toggle>,
    pub cert_manager: Option<Toggle>,
    pub policy_engine: Option<PolicyEngine>,
    pub gitops_engine: Option<GitOpsEngine>,
    pub control_planes: Option<u32>,
    pub workers: Option<u32>,
    pub local_registry_port: Option<u16>,
    pub mirror_registries: Vec<String>,
}

impl Overrides {
    pub fn apply(&self, cluster: &mut Cluster) {
        if let Some(distribution) = self.distribution {
            cluster.spec.distribution = distribution;
        }
        if let Some(provider) = self.provider {
            cluster.spec.provider = provider;
        }
        if let Some(cni) = self.cni {
            cluster.spec.cni = cni;
        }
        if let Some(csi) = self.csi {
            cluster.spec.csi = csi;
        }
        if let Some(metrics_server) = self.metrics_server {
            cluster.spec.metrics_server = metrics_server;
        }
        if let Some(load_balancer) = self.load_balancer {
            cluster.spec.load_balancer = load_balancer;
        }
        if let Some(cert_manager) = self.cert_manager {
            cluster.spec.cert_manager = cert_manager;
        }
        if let Some(policy_engine) = self.policy_engine {
            cluster.spec.policy_engine = policy_engine;
        }
        if let Some(gitops_engine) = self.gitops_engine {
            cluster.spec.gitops_engine = gitops_engine;
        }
        if let Some(control_planes) = self.control_planes {
            cluster.spec.control_planes = control_planes;
        }
        if let Some(workers) = self.workers {
            cluster.spec.workers = workers;
        }
        if let Some(port) = self.local_registry_port {
            cluster.spec.local_registry.host_port = Some(port);
            if cluster.spec.local_registry.enabled == Toggle::Default {
                cluster.spec.local_registry.enabled = Toggle::Enabled;
            }
        }
        // Flag specs append after file specs so that for the same host the
        // flag wins during mirror-spec merging.
        cluster
            .spec
            .mirror_registries
            .extend(self.mirror_registries.iter().cloned());
    }
}

/// A loaded project: the root document plus the directory its config file
/// lives in (the anchor for distribution configs and the mirrors dir).
#[derive(Debug, Clone)]
pub struct Project {
    pub cluster: Cluster,
    pub root_dir: PathBuf,
    pub config_path: PathBuf,
}

impl Project {
    /// Directory holding per-host `hosts.toml` files, under the workload
    /// source dir.
    pub fn mirrors_dir(&self) -> PathBuf {
        self.root_dir
            .join(&self.cluster.spec.source_directory)
            .join("mirrors")
    }

    pub fn kubeconfig_path(&self) -> Result<PathBuf> {
        expand_home(Path::new(&self.cluster.spec.connection.kubeconfig))
    }
}

/// Load the root config, apply overrides, and validate.
pub fn load_root(cwd: &Path, overrides: &Overrides) -> Result<Project> {
    let config_path = find_config_file(cwd)?;
    let content = fs::read_to_string(&config_path)
        .with_context(|| format!("failed to read {}", config_path.display()))?;

    let mut cluster: Cluster = serde_yml::from_str(&content).map_err(|err| {
        anyhow::Error::from(Error::config(format!(
            "failed to parse {}: {}",
            config_path.display(),
            err
        )))
    })?;

    overrides.apply(&mut cluster);

    cluster
        .validate()
        .map_err(|err| anyhow::Error::from(Error::config(err.to_string())))?;

    let root_dir = config_path
        .parent()
        .ok_or_else(|| anyhow!("config path has no parent directory"))?
        .to_path_buf();

    Ok(Project {
        cluster,
        root_dir,
        config_path,
    })
}

/// Walk upward from `cwd` looking for the first `ksail.yaml`.
fn find_config_file(cwd: &Path) -> Result<PathBuf> {
    let mut dir = Some(cwd);
    while let Some(current) = dir {
        for name in CONFIG_NAMES {
            let candidate = current.join(name);
            if candidate.is_file() {
                return Ok(candidate);
            }
        }
        dir = current.parent();
    }
    Err(anyhow::Error::from(Error::config(format!(
        "no ksail.yaml found in {} or any parent directory",
        cwd.display()
    ))))
}

/// Expand ~ to home directory
pub fn expand_home(path: &Path) -> Result<PathBuf> {
    let path_str = path.to_string_lossy();
    if let Some(stripped) = path_str.strip_prefix('~') {
        let home = dirs::home_dir().ok_or_else(|| anyhow!("cannot determine home directory"))?;
        let rest = stripped.strip_prefix('/').unwrap_or(stripped);
        Ok(home.join(rest))
    } else {
        Ok(path.to_path_buf())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error;

    fn write_config(dir: &Path, content: &str) {
        fs::write(dir.join("ksail.yaml"), content).expect("write config");
    }

    #[test]
    fn test_load_from_subdirectory() {
        let dir = tempfile::tempdir().expect("tempdir");
        write_config(
            dir.path(),
            "apiVersion: ksail.dev/v1alpha1\nkind: Cluster\nmetadata:\n  name: demo\n",
        );
        let nested = dir.path().join("apps").join("web");
        fs::create_dir_all(&nested).expect("mkdir");

        let project = load_root(&nested, &Overrides::default()).expect("load");
        assert_eq!(project.cluster.cluster_name(), "demo");
        assert_eq!(project.root_dir, dir.path());
    }

    #[test]
    fn test_missing_config_is_config_error() {
        let dir = tempfile::tempdir().expect("tempdir");
        let err = load_root(dir.path(), &Overrides::default()).expect_err("should fail");
        assert_eq!(error::exit_code(&err), 2);
    }

    #[test]
    fn test_malformed_yaml_is_config_error() {
        let dir = tempfile::tempdir().expect("tempdir");
        write_config(dir.path(), "apiVersion: [unclosed\n");
        let err = load_root(dir.path(), &Overrides::default()).expect_err("should fail");
        assert_eq!(error::exit_code(&err), 2);
    }

    #[test]
    fn test_invalid_enum_lists_accepted_values() {
        let dir = tempfile::tempdir().expect("tempdir");
        write_config(
            dir.path(),
            "apiVersion: ksail.dev/v1alpha1\nkind: Cluster\nspec:\n  distribution: Minikube\n",
        );
        let err = load_root(dir.path(), &Overrides::default()).expect_err("should fail");
        let message = format!("{:#}", err);
        assert!(message.contains("Minikube") || message.contains("unknown variant"));
        assert_eq!(error::exit_code(&err), 2);
    }

    #[test]
    fn test_overrides_win_over_file() {
        let dir = tempfile::tempdir().expect("tempdir");
        write_config(
            dir.path(),
            "apiVersion: ksail.dev/v1alpha1\nkind: Cluster\nspec:\n  distribution: K3s\n  workers: 1\n",
        );
        let overrides = Overrides {
            workers: Some(3),
            gitops_engine: Some(GitOpsEngine::Flux),
            mirror_registries: vec!["docker.io=http://docker.io:5001".to_string()],
            ..Overrides::default()
        };
        let project = load_root(dir.path(), &overrides).expect("load");
        assert_eq!(project.cluster.spec.workers, 3);
        assert_eq!(project.cluster.spec.gitops_engine, GitOpsEngine::Flux);
        assert_eq!(project.cluster.spec.mirror_registries.len(), 1);
        // GitOps engine implies the default local registry.
        assert_eq!(project.cluster.local_registry_port(), Some(5050));
    }

    #[test]
    fn test_unsupported_combo_rejected() {
        let dir = tempfile::tempdir().expect("tempdir");
        write_config(
            dir.path(),
            "apiVersion: ksail.dev/v1alpha1\nkind: Cluster\nspec:\n  distribution: Vanilla\n  provider: Hetzner\n",
        );
        let err = load_root(dir.path(), &Overrides::default()).expect_err("should fail");
        assert_eq!(error::exit_code(&err), 2);
    }

    #[test]
    fn test_mirrors_dir_under_source_directory() {
        let dir = tempfile::tempdir().expect("tempdir");
        write_config(
            dir.path(),
            "apiVersion: ksail.dev/v1alpha1\nkind: Cluster\nspec:\n  sourceDirectory: deploy\n",
        );
        let project = load_root(dir.path(), &Overrides::default()).expect("load");
        assert_eq!(project.mirrors_dir(), dir.path().join("deploy").join("mirrors"));
    }
}
