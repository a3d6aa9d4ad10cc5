//! Distribution-specific mirror configuration rendering
//!
//! Vanilla gets containerd `hosts.toml` files, K3s gets a `registries.yaml`
//! fragment inlined into the K3d SimpleConfig, Talos gets a machine-config
//! patch.

use std::collections::BTreeMap;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use super::RegistryInfo;

// === containerd hosts.toml ===

#[derive(Debug, Serialize, Deserialize)]
struct HostsFile {
    server: String,
    #[serde(default, rename = "host")]
    hosts: BTreeMap<String, HostEntry>,
}

#[derive(Debug, Serialize, Deserialize)]
struct HostEntry {
    #[serde(default)]
    capabilities: Vec<String>,
    #[serde(default)]
    skip_verify: bool,
}

/// Semantic content of a parsed hosts.toml.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedHosts {
    pub server: String,
    pub endpoints: Vec<String>,
    pub capabilities: Vec<String>,
    pub skip_verify: bool,
}

pub fn render_hosts_toml(info: &RegistryInfo) -> Result<String> {
    let mut hosts = BTreeMap::new();
    hosts.insert(
        info.endpoint(),
        HostEntry {
            capabilities: vec!["pull".to_string(), "resolve".to_string()],
            skip_verify: true,
        },
    );
    let file = HostsFile {
        server: info.upstream.clone(),
        hosts,
    };
    toml::to_string(&file).context("failed to render hosts.toml")
}

pub fn parse_hosts_toml(content: &str) -> Result<ParsedHosts> {
    let file: HostsFile = toml::from_str(content).context("failed to parse hosts.toml")?;
    let capabilities = file
        .hosts
        .values()
        .next()
        .map(|entry| entry.capabilities.clone())
        .unwrap_or_default();
    let skip_verify = file.hosts.values().any(|entry| entry.skip_verify);
    Ok(ParsedHosts {
        server: file.server,
        endpoints: file.hosts.into_keys().collect(),
        capabilities,
        skip_verify,
    })
}

// === K3d registries fragment ===

#[derive(Debug, Default, Serialize)]
struct K3sRegistries {
    mirrors: BTreeMap<String, K3sMirror>,
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    configs: BTreeMap<String, K3sRegistryConfig>,
}

#[derive(Debug, Serialize)]
struct K3sMirror {
    endpoint: Vec<String>,
}

#[derive(Debug, Serialize)]
struct K3sRegistryConfig {
    auth: K3sRegistryAuth,
}

#[derive(Debug, Serialize)]
struct K3sRegistryAuth {
    username: String,
    password: String,
}

/// Inline `registries.yaml` content for the K3d SimpleConfig.
pub fn render_k3d_registries(registries: &[RegistryInfo]) -> Result<String> {
    let mut fragment = K3sRegistries::default();
    for info in registries {
        fragment.mirrors.insert(
            info.host.clone(),
            K3sMirror {
                endpoint: vec![info.endpoint()],
            },
        );
        if let (Some(username), Some(password)) = (&info.username, &info.password) {
            fragment.configs.insert(
                info.host.clone(),
                K3sRegistryConfig {
                    auth: K3sRegistryAuth {
                        username: username.clone(),
                        password: password.clone(),
                    },
                },
            );
        }
    }
    serde_yml::to_string(&fragment).context("failed to render k3d registries fragment")
}

// === Talos machine-config patch ===

#[derive(Debug, Serialize)]
struct TalosPatch {
    machine: TalosMachine,
}

#[derive(Debug, Serialize)]
struct TalosMachine {
    registries: TalosRegistries,
}

#[derive(Debug, Serialize)]
struct TalosRegistries {
    mirrors: BTreeMap<String, TalosMirror>,
}

#[derive(Debug, Serialize)]
struct TalosMirror {
    endpoints: Vec<String>,
}

/// `machine.registries.mirrors` patch merged into every machine config.
pub fn render_talos_mirror_patch(registries: &[RegistryInfo]) -> Result<String> {
    let mirrors = registries
        .iter()
        .map(|info| {
            (
                info.host.clone(),
                TalosMirror {
                    endpoints: vec![info.endpoint()],
                },
            )
        })
        .collect();
    let patch = TalosPatch {
        machine: TalosMachine {
            registries: TalosRegistries { mirrors },
        },
    };
    serde_yml::to_string(&patch).context("failed to render Talos mirror patch")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn registry(name: &str, host: &str, upstream: &str) -> RegistryInfo {
        RegistryInfo {
            name: name.to_string(),
            host: host.to_string(),
            upstream: upstream.to_string(),
            host_port: 5001,
            volume: format!("{}-cache", name),
            username: None,
            password: None,
        }
    }

    #[test]
    fn test_hosts_toml_round_trip() {
        let info = registry("docker.io", "docker.io", "https://registry-1.docker.io");
        let rendered = render_hosts_toml(&info).expect("render");
        assert!(rendered.contains("server = \"https://registry-1.docker.io\""));
        assert!(rendered.contains("[host.\"http://docker.io:5000\"]"));
        assert!(rendered.contains("skip_verify = true"));

        let parsed = parse_hosts_toml(&rendered).expect("parse");
        assert_eq!(parsed.server, "https://registry-1.docker.io");
        assert_eq!(parsed.endpoints, vec!["http://docker.io:5000".to_string()]);
        assert_eq!(parsed.capabilities, vec!["pull".to_string(), "resolve".to_string()]);
        assert!(parsed.skip_verify);

        // Render → parse → render is stable on the semantic fields.
        let reparsed = parse_hosts_toml(&render_hosts_toml(&info).expect("render")).expect("parse");
        assert_eq!(parsed, reparsed);
    }

    #[test]
    fn test_k3d_fragment() {
        let mut with_auth = registry("ghcr.io", "ghcr.io", "https://ghcr.io");
        with_auth.username = Some("bot".to_string());
        with_auth.password = Some("hunter2".to_string());
        let plain = registry("docker.io", "docker.io", "https://registry-1.docker.io");

        let fragment = render_k3d_registries(&[plain, with_auth]).expect("render");
        assert!(fragment.contains("mirrors:"));
        assert!(fragment.contains("docker.io:"));
        assert!(fragment.contains("- http://docker.io:5000"));
        assert!(fragment.contains("configs:"));
        assert!(fragment.contains("username: bot"));
    }

    #[test]
    fn test_talos_patch_schema() {
        let info = registry("dev-docker.io", "docker.io", "https://registry-1.docker.io");
        let patch = render_talos_mirror_patch(&[info]).expect("render");
        let value: serde_yml::Value = serde_yml::from_str(&patch).expect("parse");
        let endpoints = value
            .get("machine")
            .and_then(|m| m.get("registries"))
            .and_then(|r| r.get("mirrors"))
            .and_then(|m| m.get("docker.io"))
            .and_then(|h| h.get("endpoints"))
            .and_then(|e| e.as_sequence())
            .expect("endpoints sequence");
        assert_eq!(
            endpoints[0].as_str(),
            Some("http://dev-docker.io:5000")
        );
    }
}
