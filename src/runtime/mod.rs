//! Container runtime client
//!
//! One shared bollard wrapper for every container, network, and volume
//! operation: node providers, the registry subsystem, and the component
//! detector all go through it. The client is cheap to clone and safe for
//! concurrent use.

#![allow(deprecated)]

use std::collections::{HashMap, HashSet};
use std::path::PathBuf;

use anyhow::{anyhow, Context, Result};
use base64::{engine::general_purpose::STANDARD, Engine as _};
use bollard::container::{
    Config, CreateContainerOptions, InspectContainerOptions, ListContainersOptions,
    RemoveContainerOptions, StartContainerOptions, StopContainerOptions,
};
use bollard::exec::{CreateExecOptions, StartExecOptions, StartExecResults};
use bollard::image::CreateImageOptions;
use bollard::models::{EndpointIpamConfig, EndpointSettings, HostConfig, PortBinding};
use bollard::network::{ConnectNetworkOptions, CreateNetworkOptions, InspectNetworkOptions};
use bollard::volume::{CreateVolumeOptions, RemoveVolumeOptions};
use bollard::Docker;
use futures_util::StreamExt;

/// How containers are discovered when listing.
#[derive(Debug, Clone)]
pub enum ContainerFilter {
    /// Every container on the host, running or not.
    All,
    /// Name prefix match (Kind and VCluster node naming).
    NamePrefix(String),
    /// `key=value` label equality; multiple entries must all match.
    Labels(Vec<String>),
}

/// Flattened container listing entry.
#[derive(Debug, Clone)]
pub struct ContainerSummary {
    pub name: String,
    pub state: String,
    pub labels: HashMap<String, String>,
    pub host_ports: Vec<u16>,
}

/// Everything needed to create and start a detached container.
#[derive(Debug, Clone, Default)]
pub struct RunContainerConfig {
    pub name: String,
    pub image: String,
    pub env: Vec<(String, String)>,
    /// (host, container) TCP port pairs.
    pub ports: Vec<(u16, u16)>,
    /// (volume name, mount path) pairs.
    pub volumes: Vec<(String, String)>,
    pub labels: HashMap<String, String>,
    pub network: Option<String>,
}

/// Container runtime client over the Docker API.
#[derive(Clone)]
pub struct DockerRuntime {
    client: Docker,
}

impl DockerRuntime {
    /// Connect honoring `DOCKER_HOST` (and its TLS companions) when set,
    /// otherwise the platform Unix socket.
    pub fn connect() -> Result<Self> {
        let client = if std::env::var_os("DOCKER_HOST").is_some() {
            Docker::connect_with_defaults().context("failed to connect to DOCKER_HOST")?
        } else {
            let socket = default_socket_path()?;
            Docker::connect_with_unix(
                &socket.to_string_lossy(),
                120,
                bollard::API_DEFAULT_VERSION,
            )
            .with_context(|| format!("failed to connect to Docker at {:?}", socket))?
        };
        Ok(Self { client })
    }

    pub async fn is_accessible(&self) -> bool {
        self.client.ping().await.is_ok()
    }

    // === Container operations ===

    pub async fn container_exists(&self, name: &str) -> bool {
        self.client
            .inspect_container(name, None::<InspectContainerOptions>)
            .await
            .is_ok()
    }

    pub async fn container_running(&self, name: &str) -> bool {
        match self
            .client
            .inspect_container(name, None::<InspectContainerOptions>)
            .await
        {
            Ok(info) => info.state.and_then(|s| s.running).unwrap_or(false),
            Err(_) => false,
        }
    }

    pub async fn container_labels(&self, name: &str) -> Result<HashMap<String, String>> {
        let info = self
            .client
            .inspect_container(name, None::<InspectContainerOptions>)
            .await
            .with_context(|| format!("failed to inspect container {}", name))?;
        Ok(info.config.and_then(|c| c.labels).unwrap_or_default())
    }

    pub async fn start_container(&self, name: &str) -> Result<()> {
        self.client
            .start_container(name, None::<StartContainerOptions<String>>)
            .await
            .with_context(|| format!("failed to start container {}", name))
    }

    pub async fn stop_container(&self, name: &str, timeout_secs: i64) -> Result<()> {
        self.client
            .stop_container(name, Some(StopContainerOptions { t: timeout_secs }))
            .await
            .with_context(|| format!("failed to stop container {}", name))
    }

    /// Remove a container; `volumes` also removes its anonymous and named
    /// volume mounts.
    pub async fn remove_container(&self, name: &str, force: bool, volumes: bool) -> Result<()> {
        self.client
            .remove_container(
                name,
                Some(RemoveContainerOptions {
                    force,
                    v: volumes,
                    ..Default::default()
                }),
            )
            .await
            .with_context(|| format!("failed to remove container {}", name))
    }

    pub async fn list_containers(&self, filter: &ContainerFilter) -> Result<Vec<ContainerSummary>> {
        let mut filters: HashMap<String, Vec<String>> = HashMap::new();
        match filter {
            ContainerFilter::All => {}
            ContainerFilter::NamePrefix(prefix) => {
                filters.insert("name".to_string(), vec![prefix.clone()]);
            }
            ContainerFilter::Labels(labels) => {
                filters.insert("label".to_string(), labels.clone());
            }
        }

        let containers = self
            .client
            .list_containers(Some(ListContainersOptions {
                all: true,
                filters,
                ..Default::default()
            }))
            .await
            .context("failed to list containers")?;

        let mut summaries = Vec::with_capacity(containers.len());
        for container in containers {
            let name = container
                .names
                .as_ref()
                .and_then(|names| names.first())
                .map(|n| n.trim_start_matches('/').to_string())
                .unwrap_or_default();
            // The name filter is a substring match on the API side; enforce
            // an actual prefix here.
            if let ContainerFilter::NamePrefix(prefix) = filter {
                if !name.starts_with(prefix.as_str()) {
                    continue;
                }
            }
            summaries.push(ContainerSummary {
                name,
                state: container
                    .state
                    .map(|s| s.to_string().to_lowercase())
                    .unwrap_or_default(),
                labels: container.labels.unwrap_or_default(),
                host_ports: container
                    .ports
                    .unwrap_or_default()
                    .into_iter()
                    .filter_map(|p| p.public_port)
                    .collect(),
            });
        }
        Ok(summaries)
    }

    /// Host ports bound by *any* container on the host, running or stopped.
    /// Registry port allocation checks against this set so ksail coexists
    /// with registries it does not manage.
    pub async fn used_host_ports(&self) -> Result<HashSet<u16>> {
        let containers = self.list_containers(&ContainerFilter::All).await?;
        Ok(containers
            .into_iter()
            .flat_map(|c| c.host_ports)
            .collect())
    }

    pub async fn exec_in_container(&self, container: &str, command: &[&str]) -> Result<String> {
        let exec = self
            .client
            .create_exec(
                container,
                CreateExecOptions {
                    cmd: Some(command.to_vec()),
                    attach_stdout: Some(true),
                    attach_stderr: Some(true),
                    ..Default::default()
                },
            )
            .await
            .context("failed to create exec")?;

        let output = self
            .client
            .start_exec(&exec.id, Some(StartExecOptions::default()))
            .await
            .context("failed to start exec")?;

        let mut result = String::new();
        if let StartExecResults::Attached { mut output, .. } = output {
            while let Some(msg) = output.next().await {
                if let Ok(msg) = msg {
                    result.push_str(&msg.to_string());
                }
            }
        }
        Ok(result)
    }

    /// Write a file into a running container without a bind mount: the
    /// content is base64-encoded and decoded inside the container in one
    /// atomic shell command.
    pub async fn write_container_file(
        &self,
        container: &str,
        path: &str,
        content: &str,
    ) -> Result<()> {
        let encoded = STANDARD.encode(content.as_bytes());
        let parent = std::path::Path::new(path)
            .parent()
            .map(|p| p.to_string_lossy().into_owned())
            .unwrap_or_else(|| "/".to_string());
        let script = format!(
            "mkdir -p {} && echo '{}' | base64 -d > {}",
            parent, encoded, path
        );
        self.exec_in_container(container, &["sh", "-c", &script])
            .await
            .with_context(|| format!("failed to write {} into {}", path, container))?;
        Ok(())
    }

    // === Network operations ===

    pub async fn network_exists(&self, name: &str) -> bool {
        self.client
            .inspect_network(name, None::<InspectNetworkOptions<String>>)
            .await
            .is_ok()
    }

    pub async fn create_network(&self, name: &str) -> Result<()> {
        if self.network_exists(name).await {
            return Ok(());
        }
        self.client
            .create_network(CreateNetworkOptions {
                name: name.to_string(),
                ..Default::default()
            })
            .await
            .with_context(|| format!("failed to create network {}", name))?;
        Ok(())
    }

    pub async fn remove_network(&self, name: &str) -> Result<()> {
        let _ = self.client.remove_network(name).await;
        Ok(())
    }

    /// First subnet of the network's IPAM config, e.g. `172.20.0.0/16`.
    pub async fn network_subnet(&self, name: &str) -> Result<Option<String>> {
        let network = self
            .client
            .inspect_network(name, None::<InspectNetworkOptions<String>>)
            .await
            .with_context(|| format!("failed to inspect network {}", name))?;
        Ok(network
            .ipam
            .and_then(|ipam| ipam.config)
            .and_then(|configs| configs.into_iter().next())
            .and_then(|config| config.subnet))
    }

    /// Join a container to a network, optionally pinning an IPv4 address.
    /// Joining a network the container is already on is treated as success.
    pub async fn connect_network(
        &self,
        container: &str,
        network: &str,
        ipv4_address: Option<String>,
    ) -> Result<()> {
        let endpoint_config = EndpointSettings {
            ipam_config: ipv4_address.map(|address| EndpointIpamConfig {
                ipv4_address: Some(address),
                ..Default::default()
            }),
            ..Default::default()
        };
        match self
            .client
            .connect_network(
                network,
                ConnectNetworkOptions {
                    container: container.to_string(),
                    endpoint_config,
                },
            )
            .await
        {
            Ok(()) => Ok(()),
            Err(err) if err.to_string().contains("already exists") => Ok(()),
            Err(err) => Err(anyhow!(err)
                .context(format!("failed to connect {} to network {}", container, network))),
        }
    }

    // === Volume operations ===

    pub async fn create_volume(&self, name: &str) -> Result<()> {
        self.client
            .create_volume(CreateVolumeOptions {
                name: name.to_string(),
                ..Default::default()
            })
            .await
            .with_context(|| format!("failed to create volume {}", name))?;
        Ok(())
    }

    pub async fn remove_volume(&self, name: &str) -> Result<()> {
        let _ = self
            .client
            .remove_volume(name, Some(RemoveVolumeOptions { force: true }))
            .await;
        Ok(())
    }

    // === Image operations ===

    pub async fn image_exists(&self, image: &str) -> bool {
        self.client.inspect_image(image).await.is_ok()
    }

    pub async fn pull_image(&self, image: &str) -> Result<()> {
        let options = Some(CreateImageOptions {
            from_image: image,
            ..Default::default()
        });
        let mut stream = self.client.create_image(options, None, None);
        while let Some(result) = stream.next().await {
            result.with_context(|| format!("failed to pull image {}", image))?;
        }
        Ok(())
    }

    // === Run ===

    /// Create and start a detached container.
    pub async fn run_container(&self, config: &RunContainerConfig) -> Result<()> {
        if !self.image_exists(&config.image).await {
            self.pull_image(&config.image).await?;
        }

        let mut exposed_ports: HashMap<String, HashMap<(), ()>> = HashMap::new();
        let mut port_bindings: HashMap<String, Option<Vec<PortBinding>>> = HashMap::new();
        for (host, container) in &config.ports {
            let container_port = format!("{}/tcp", container);
            exposed_ports.insert(container_port.clone(), HashMap::new());
            port_bindings.insert(
                container_port,
                Some(vec![PortBinding {
                    host_ip: Some("0.0.0.0".to_string()),
                    host_port: Some(host.to_string()),
                }]),
            );
        }

        let env: Vec<String> = config
            .env
            .iter()
            .map(|(k, v)| format!("{}={}", k, v))
            .collect();

        let binds: Vec<String> = config
            .volumes
            .iter()
            .map(|(volume, path)| format!("{}:{}", volume, path))
            .collect();

        let host_config = HostConfig {
            port_bindings: Some(port_bindings),
            binds: if binds.is_empty() { None } else { Some(binds) },
            network_mode: config.network.clone(),
            ..Default::default()
        };

        let container_config = Config {
            image: Some(config.image.clone()),
            env: if env.is_empty() { None } else { Some(env) },
            labels: if config.labels.is_empty() {
                None
            } else {
                Some(config.labels.clone())
            },
            exposed_ports: if exposed_ports.is_empty() {
                None
            } else {
                Some(exposed_ports)
            },
            host_config: Some(host_config),
            ..Default::default()
        };

        self.client
            .create_container(
                Some(CreateContainerOptions {
                    name: config.name.clone(),
                    platform: None,
                }),
                container_config,
            )
            .await
            .with_context(|| format!("failed to create container {}", config.name))?;

        self.client
            .start_container(&config.name, None::<StartContainerOptions<String>>)
            .await
            .with_context(|| format!("failed to start container {}", config.name))?;

        Ok(())
    }
}

fn default_socket_path() -> Result<PathBuf> {
    let sock = PathBuf::from("/var/run/docker.sock");
    if sock.exists() {
        Ok(sock)
    } else {
        Err(anyhow!(
            "Docker socket not found at /var/run/docker.sock (set DOCKER_HOST to override)"
        ))
    }
}
