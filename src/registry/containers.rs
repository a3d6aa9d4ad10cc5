//! Registry container lifecycle
//!
//! Mirror setup is batched: containers created during a batch are torn down
//! if a later stage fails, while pre-existing containers are left alone.
//! Port allocation happens against every container on the host so ksail
//! coexists with K3d's native registries and anything created by hand.

use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use anyhow::{bail, Context, Result};
use futures::future::join_all;
use tokio_util::sync::CancellationToken;

use super::{
    cache_volume_name, container_name, MirrorSpec, PortAllocator, RegistryInfo, CLUSTER_LABEL,
    MANAGED_LABEL, REGISTRY_CONTAINER_PORT, REGISTRY_IMAGE, UPSTREAM_LABEL,
};
use crate::config::Distribution;
use crate::error::Error;
use crate::runtime::{ContainerFilter, DockerRuntime, RunContainerConfig};

/// Wall-clock budget for a registry's readiness probe.
pub const READY_DEADLINE: Duration = Duration::from_secs(60);

const LOCAL_REGISTRY_NAME: &str = "ksail-registry";

/// Containers created during one setup run, for rollback on failure.
#[derive(Debug, Default)]
pub struct RegistryBatch {
    created: Vec<RegistryInfo>,
}

impl RegistryBatch {
    pub fn is_empty(&self) -> bool {
        self.created.is_empty()
    }

    /// Tear down everything this batch created. Pre-existing containers are
    /// not touched.
    pub async fn rollback(self, runtime: &DockerRuntime) {
        for info in self.created {
            tracing::warn!(container = %info.name, "rolling back registry container");
            let _ = runtime.stop_container(&info.name, 5).await;
            let _ = runtime.remove_container(&info.name, true, true).await;
            let _ = runtime.remove_volume(&info.volume).await;
        }
    }
}

enum Plan {
    Reuse(RegistryInfo),
    Create(RegistryInfo),
    Recreate(RegistryInfo),
}

#[derive(Clone)]
pub struct RegistryManager {
    runtime: DockerRuntime,
}

impl RegistryManager {
    pub fn new(runtime: DockerRuntime) -> Self {
        Self { runtime }
    }

    /// Materialize every mirror spec as a running container, without
    /// joining any network yet. Returns the registries plus the batch of
    /// containers created by this call.
    pub async fn ensure_mirrors(
        &self,
        specs: &[MirrorSpec],
        cluster: &str,
        distribution: Distribution,
        cancel: &CancellationToken,
    ) -> Result<(Vec<RegistryInfo>, RegistryBatch)> {
        let mut allocator = PortAllocator::new(self.runtime.used_host_ports().await?);
        let existing = self
            .runtime
            .list_containers(&ContainerFilter::Labels(vec![format!(
                "{}=true",
                MANAGED_LABEL
            )]))
            .await?;

        // Planning is sequential: port allocation must observe earlier
        // decisions. Creation then fans out per spec.
        let mut plans = Vec::with_capacity(specs.len());
        for spec in specs {
            let name = container_name(distribution, cluster, &spec.host);
            let current = existing.iter().find(|c| c.name == name);

            let plan = match current {
                Some(current) => {
                    let same_upstream =
                        current.labels.get(UPSTREAM_LABEL) == Some(&spec.upstream);
                    let current_port = current.host_ports.first().copied();
                    let port_ok = match (spec.desired_port(), current_port) {
                        (Some(desired), Some(current)) => desired == current,
                        (None, Some(_)) => true,
                        _ => false,
                    };
                    if same_upstream && port_ok {
                        let port = current_port.unwrap_or(REGISTRY_CONTAINER_PORT);
                        Plan::Reuse(self.info(name, spec, port))
                    } else {
                        let port = allocator.allocate(spec.desired_port())?;
                        Plan::Recreate(self.info(name, spec, port))
                    }
                }
                None => {
                    if self.runtime.container_exists(&name).await {
                        // A container with this name exists but carries no
                        // ksail labels; refuse to take it over.
                        bail!(
                            "container {} already exists and is not managed by ksail",
                            name
                        );
                    }
                    let port = allocator.allocate(spec.desired_port())?;
                    Plan::Create(self.info(name, spec, port))
                }
            };
            plans.push(plan);
        }

        let batch = Arc::new(Mutex::new(RegistryBatch::default()));
        let ensures = plans.into_iter().map(|plan| {
            let manager = self.clone();
            let batch = batch.clone();
            let cluster = cluster.to_string();
            let cancel = cancel.clone();
            async move {
                if cancel.is_cancelled() {
                    bail!("registry setup cancelled");
                }
                match plan {
                    Plan::Reuse(info) => {
                        if !manager.runtime.container_running(&info.name).await {
                            manager.runtime.start_container(&info.name).await?;
                        }
                        tracing::debug!(container = %info.name, "reusing mirror registry");
                        Ok(info)
                    }
                    Plan::Recreate(info) => {
                        let _ = manager.runtime.stop_container(&info.name, 5).await;
                        manager
                            .runtime
                            .remove_container(&info.name, true, false)
                            .await?;
                        manager.create_mirror(&info, &cluster).await?;
                        batch.lock().expect("batch poisoned").created.push(info.clone());
                        Ok(info)
                    }
                    Plan::Create(info) => {
                        manager.create_mirror(&info, &cluster).await?;
                        batch.lock().expect("batch poisoned").created.push(info.clone());
                        Ok(info)
                    }
                }
            }
        });

        let results = join_all(ensures).await;
        let batch = Arc::try_unwrap(batch)
            .map(|m| m.into_inner().expect("batch poisoned"))
            .unwrap_or_default();

        let mut registries = Vec::with_capacity(results.len());
        let mut first_error = None;
        for result in results {
            match result {
                Ok(info) => registries.push(info),
                Err(err) => {
                    first_error.get_or_insert(err);
                }
            }
        }
        if let Some(err) = first_error {
            // The batch never reaches the caller on failure, so tear down
            // what this call created before surfacing the error.
            batch.rollback(&self.runtime).await;
            return Err(err.context("mirror registry setup failed"));
        }
        Ok((registries, batch))
    }

    fn info(&self, name: String, spec: &MirrorSpec, port: u16) -> RegistryInfo {
        RegistryInfo {
            volume: cache_volume_name(&name),
            name,
            host: spec.host.clone(),
            upstream: spec.upstream.clone(),
            host_port: port,
            username: spec.username.clone(),
            password: spec.password.clone(),
        }
    }

    async fn create_mirror(&self, info: &RegistryInfo, cluster: &str) -> Result<()> {
        self.runtime.create_volume(&info.volume).await?;

        let mut env = vec![("REGISTRY_PROXY_REMOTEURL".to_string(), info.upstream.clone())];
        if let Some(username) = &info.username {
            env.push(("REGISTRY_PROXY_USERNAME".to_string(), username.clone()));
        }
        if let Some(password) = &info.password {
            env.push(("REGISTRY_PROXY_PASSWORD".to_string(), password.clone()));
        }

        let config = RunContainerConfig {
            name: info.name.clone(),
            image: REGISTRY_IMAGE.to_string(),
            env,
            ports: vec![(info.host_port, REGISTRY_CONTAINER_PORT)],
            volumes: vec![(info.volume.clone(), "/var/lib/registry".to_string())],
            labels: [
                (MANAGED_LABEL.to_string(), "true".to_string()),
                (CLUSTER_LABEL.to_string(), cluster.to_string()),
                (UPSTREAM_LABEL.to_string(), info.upstream.clone()),
            ]
            .into(),
            network: None,
        };
        self.runtime
            .run_container(&config)
            .await
            .with_context(|| format!("failed to create mirror registry {}", info.name))?;
        tracing::info!(container = %info.name, port = info.host_port, "mirror registry created");
        Ok(())
    }

    /// Probe `GET /v2/` through the host port until the registry answers
    /// (200 or 401), with exponential backoff up to the deadline.
    pub async fn wait_ready(&self, info: &RegistryInfo, cancel: &CancellationToken) -> Result<()> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(2))
            .build()
            .context("failed to build registry probe client")?;
        let url = format!("http://127.0.0.1:{}/v2/", info.host_port);

        let start = Instant::now();
        let mut interval = Duration::from_millis(250);
        loop {
            if cancel.is_cancelled() {
                bail!("registry readiness probe cancelled");
            }
            let mut request = client.get(&url);
            if let Some(username) = &info.username {
                request = request.basic_auth(username, info.password.as_deref());
            }
            match request.send().await {
                Ok(resp) if resp.status().is_success() || resp.status() == 401 => {
                    tracing::debug!(container = %info.name, "registry ready");
                    return Ok(());
                }
                Ok(resp) => {
                    tracing::debug!(container = %info.name, status = %resp.status(), "registry not ready");
                }
                Err(err) => {
                    tracing::debug!(container = %info.name, error = %err, "registry probe failed");
                }
            }
            if start.elapsed() >= READY_DEADLINE {
                bail!("registry {} not ready after {:?}", info.name, READY_DEADLINE);
            }
            tokio::select! {
                _ = cancel.cancelled() => bail!("registry readiness probe cancelled"),
                _ = tokio::time::sleep(interval) => {}
            }
            interval = std::cmp::min(interval * 2, Duration::from_secs(2));
        }
    }

    /// Join registries to the cluster network, creating it first when
    /// needed. Talos pins static addresses so machine configs can reference
    /// stable endpoints; everything else joins dynamically.
    pub async fn connect_to_network(
        &self,
        registries: &[RegistryInfo],
        network: &str,
        static_ips: bool,
    ) -> Result<()> {
        self.runtime.create_network(network).await?;
        let subnet = if static_ips {
            self.runtime.network_subnet(network).await?
        } else {
            None
        };
        for (index, info) in registries.iter().enumerate() {
            let ip = subnet.as_deref().and_then(|s| static_ip(s, index));
            self.runtime
                .connect_network(&info.name, network, ip)
                .await?;
        }
        Ok(())
    }

    /// Create or reuse the non-proxying local registry hosting workload
    /// artifacts.
    pub async fn ensure_local_registry(
        &self,
        cluster: &str,
        host_port: u16,
    ) -> Result<RegistryInfo> {
        let info = RegistryInfo {
            name: LOCAL_REGISTRY_NAME.to_string(),
            host: format!("localhost:{}", host_port),
            upstream: String::new(),
            host_port,
            volume: cache_volume_name(LOCAL_REGISTRY_NAME),
            username: None,
            password: None,
        };

        if self.runtime.container_exists(&info.name).await {
            if !self.runtime.container_running(&info.name).await {
                self.runtime.start_container(&info.name).await?;
            }
            return Ok(info);
        }

        self.runtime.create_volume(&info.volume).await?;
        let config = RunContainerConfig {
            name: info.name.clone(),
            image: REGISTRY_IMAGE.to_string(),
            env: Vec::new(),
            ports: vec![(host_port, REGISTRY_CONTAINER_PORT)],
            volumes: vec![(info.volume.clone(), "/var/lib/registry".to_string())],
            labels: [
                (MANAGED_LABEL.to_string(), "true".to_string()),
                (CLUSTER_LABEL.to_string(), cluster.to_string()),
            ]
            .into(),
            network: None,
        };
        self.runtime
            .run_container(&config)
            .await
            .context("failed to create local registry")?;
        tracing::info!(port = host_port, "local registry created");
        Ok(info)
    }

    /// Remove one managed registry. Errors with the `RegistryNotFound`
    /// sentinel when nothing by that name exists.
    pub async fn remove_registry(&self, name: &str, delete_volumes: bool) -> Result<()> {
        if !self.runtime.container_exists(name).await {
            return Err(Error::RegistryNotFound.into());
        }
        let labels = self.runtime.container_labels(name).await?;
        if labels.get(MANAGED_LABEL).map(String::as_str) != Some("true") {
            bail!("container {} is not managed by ksail", name);
        }
        let _ = self.runtime.stop_container(name, 5).await;
        self.runtime.remove_container(name, true, false).await?;
        if delete_volumes {
            self.runtime.remove_volume(&cache_volume_name(name)).await?;
        }
        Ok(())
    }

    /// Remove every registry ksail created for this cluster. Both labels
    /// are enforced; foreign registries are never touched. Returns the
    /// removed container names.
    pub async fn cleanup(&self, cluster: &str, delete_volumes: bool) -> Result<Vec<String>> {
        let owned = self
            .runtime
            .list_containers(&ContainerFilter::Labels(vec![
                format!("{}=true", MANAGED_LABEL),
                format!("{}={}", CLUSTER_LABEL, cluster),
            ]))
            .await?;

        let mut removed = Vec::with_capacity(owned.len());
        for container in owned {
            let _ = self.runtime.stop_container(&container.name, 5).await;
            self.runtime
                .remove_container(&container.name, true, false)
                .await?;
            if delete_volumes {
                self.runtime
                    .remove_volume(&cache_volume_name(&container.name))
                    .await?;
            }
            removed.push(container.name);
        }
        Ok(removed)
    }
}

/// Deterministic address inside the network's first subnet, far from the
/// range the distributions hand out to nodes.
fn static_ip(subnet: &str, index: usize) -> Option<String> {
    let (base, prefix) = subnet.split_once('/')?;
    let prefix: u8 = prefix.parse().ok()?;
    let octets: Vec<u8> = base
        .split('.')
        .map(|o| o.parse().ok())
        .collect::<Option<Vec<u8>>>()?;
    if octets.len() != 4 || index > 40 {
        return None;
    }
    if prefix <= 16 {
        Some(format!("{}.{}.250.{}", octets[0], octets[1], 10 + index))
    } else if prefix <= 24 {
        Some(format!(
            "{}.{}.{}.{}",
            octets[0],
            octets[1],
            octets[2],
            200 + index
        ))
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_static_ip_wide_subnet() {
        assert_eq!(
            static_ip("172.20.0.0/16", 0).as_deref(),
            Some("172.20.250.10")
        );
        assert_eq!(
            static_ip("172.20.0.0/16", 3).as_deref(),
            Some("172.20.250.13")
        );
    }

    #[test]
    fn test_static_ip_narrow_subnet() {
        assert_eq!(
            static_ip("192.168.1.0/24", 1).as_deref(),
            Some("192.168.1.201")
        );
        assert_eq!(static_ip("10.0.0.0/28", 0), None);
        assert_eq!(static_ip("not-a-subnet", 0), None);
    }
}
