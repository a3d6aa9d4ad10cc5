//! Registry mirror subsystem
//!
//! Materializes mirror specs as sibling pull-through registry containers,
//! keeps host-port allocations conflict-free across the whole host, joins
//! the containers to the distribution's cluster network, and renders the
//! distribution-specific mirror configuration pointing nodes at them.

mod containers;
mod ports;
mod rendering;
mod spec;

pub use containers::{RegistryBatch, RegistryManager, READY_DEADLINE};
pub use ports::{PortAllocator, AUTO_ALLOC_START};
pub use rendering::{
    parse_hosts_toml, render_hosts_toml, render_k3d_registries, render_talos_mirror_patch,
    ParsedHosts,
};
pub use spec::{default_upstream, merge, parse_flag_spec, MirrorSpec};

use crate::config::Distribution;

/// Label marking containers ksail owns and may remove on destroy.
pub const MANAGED_LABEL: &str = "ksail.managed";
/// Label scoping a managed container to its cluster.
pub const CLUSTER_LABEL: &str = "ksail.cluster";
/// Label recording the mirrored upstream, used for reuse checks.
pub const UPSTREAM_LABEL: &str = "ksail.upstream";

/// Registry image used for mirrors and the local registry.
pub const REGISTRY_IMAGE: &str = "registry:2";
/// Port the registry listens on inside its container.
pub const REGISTRY_CONTAINER_PORT: u16 = 5000;

/// A materialized (or about to be materialized) registry container.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegistryInfo {
    /// Container name, host-sanitized and cluster-prefixed where required.
    pub name: String,
    pub host: String,
    pub upstream: String,
    pub host_port: u16,
    pub volume: String,
    pub username: Option<String>,
    pub password: Option<String>,
}

impl RegistryInfo {
    /// Endpoint nodes reach the mirror at, resolved by DNS on the cluster
    /// network.
    pub fn endpoint(&self) -> String {
        format!("http://{}:{}", self.name, REGISTRY_CONTAINER_PORT)
    }
}

/// Container name for a mirror of `host`: `/` and `:` collapse to `-`, and
/// distributions that resolve endpoints by DNS get a cluster prefix.
pub fn container_name(distribution: Distribution, cluster: &str, host: &str) -> String {
    let sanitized = sanitize_host(host);
    if distribution.requires_cluster_scoped_registry_names() {
        format!("{}-{}", cluster, sanitized)
    } else {
        sanitized
    }
}

pub fn sanitize_host(host: &str) -> String {
    host.replace(['/', ':'], "-")
}

pub fn cache_volume_name(container_name: &str) -> String {
    format!("{}-cache", container_name)
}

/// Mirror specs recovered from `<mirrors_dir>/<host>/hosts.toml` files left
/// by earlier runs. Lowest precedence in the merge order.
pub fn specs_from_mirrors_dir(dir: &std::path::Path) -> anyhow::Result<Vec<MirrorSpec>> {
    let mut specs = Vec::new();
    if !dir.is_dir() {
        return Ok(specs);
    }
    let mut entries: Vec<_> = std::fs::read_dir(dir)?
        .filter_map(|e| e.ok())
        .map(|e| e.path())
        .filter(|p| p.is_dir())
        .collect();
    entries.sort();
    for host_dir in entries {
        let hosts_file = host_dir.join("hosts.toml");
        if !hosts_file.is_file() {
            continue;
        }
        let host = host_dir
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        let content = std::fs::read_to_string(&hosts_file)?;
        let parsed = parse_hosts_toml(&content)?;
        let mut spec = MirrorSpec::for_host(host);
        spec.upstream = parsed.server;
        specs.push(spec);
    }
    Ok(specs)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sanitize_host() {
        assert_eq!(sanitize_host("docker.io"), "docker.io");
        assert_eq!(
            sanitize_host("my.registry:8443/sub/path"),
            "my.registry-8443-sub-path"
        );
    }

    #[test]
    fn test_container_name_cluster_scoping() {
        assert_eq!(
            container_name(Distribution::Vanilla, "dev", "docker.io"),
            "docker.io"
        );
        assert_eq!(
            container_name(Distribution::Talos, "dev", "docker.io"),
            "dev-docker.io"
        );
    }

    #[test]
    fn test_specs_from_mirrors_dir() {
        let dir = tempfile::tempdir().expect("tempdir");
        let host_dir = dir.path().join("docker.io");
        std::fs::create_dir_all(&host_dir).expect("mkdir");
        std::fs::write(
            host_dir.join("hosts.toml"),
            "server = \"https://registry-1.docker.io\"\n\n[host.\"http://docker.io:5000\"]\ncapabilities = [\"pull\", \"resolve\"]\nskip_verify = true\n",
        )
        .expect("write");

        let specs = specs_from_mirrors_dir(dir.path()).expect("load");
        assert_eq!(specs.len(), 1);
        assert_eq!(specs[0].host, "docker.io");
        assert_eq!(specs[0].upstream, "https://registry-1.docker.io");

        // A directory that does not exist yields no specs.
        assert!(specs_from_mirrors_dir(&dir.path().join("missing"))
            .expect("load")
            .is_empty());
    }

    #[test]
    fn test_endpoint_uses_container_dns_name() {
        let info = RegistryInfo {
            name: "dev-docker.io".to_string(),
            host: "docker.io".to_string(),
            upstream: "https://registry-1.docker.io".to_string(),
            host_port: 5001,
            volume: "dev-docker.io-cache".to_string(),
            username: None,
            password: None,
        };
        assert_eq!(info.endpoint(), "http://dev-docker.io:5000");
    }
}
