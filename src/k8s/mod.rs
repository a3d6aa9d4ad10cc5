//! Kubernetes API operations
//!
//! A lazily connected client wrapper: created eagerly at startup the
//! cluster may not exist yet, so the connection happens on first use and
//! can be reset after kubeconfig changes.

pub mod kubeconfig;

use std::path::Path;
use std::time::Duration;

use anyhow::{anyhow, Result};
use k8s_openapi::api::apps::v1::{DaemonSet, Deployment};
use kube::api::{Api, DynamicObject, ListParams, Patch, PatchParams, PostParams};
use kube::config::{KubeConfigOptions, Kubeconfig};
use kube::discovery::ApiResource;
use kube::{Client, Config};
use tokio::time::sleep;

use crate::config::expand_home;

/// Lazily-initialized Kubernetes client bound to a kubeconfig path and
/// context.
pub struct KubeOps {
    kubeconfig: String,
    context: String,
    client: Option<Client>,
}

impl KubeOps {
    pub fn new(kubeconfig: impl Into<String>, context: impl Into<String>) -> Self {
        Self {
            kubeconfig: kubeconfig.into(),
            context: context.into(),
            client: None,
        }
    }

    async fn client(&mut self) -> Result<&Client> {
        if self.client.is_none() {
            let config = if self.kubeconfig.is_empty() {
                Config::infer().await?
            } else {
                let path = expand_home(Path::new(&self.kubeconfig))?;
                let kubeconfig = Kubeconfig::read_from(&path)?;
                let options = KubeConfigOptions {
                    context: (!self.context.is_empty()).then(|| self.context.clone()),
                    ..Default::default()
                };
                Config::from_custom_kubeconfig(kubeconfig, &options).await?
            };
            self.client = Some(Client::try_from(config)?);
        }
        self.client
            .as_ref()
            .ok_or_else(|| anyhow!("kube client initialization failed"))
    }

    /// Reset the client (call after kubeconfig changes).
    #[allow(dead_code)]
    pub fn reset(&mut self) {
        self.client = None;
    }

    /// True when the API server answers a version request.
    pub async fn is_reachable(&mut self) -> bool {
        match self.client().await {
            Ok(client) => client.apiserver_version().await.is_ok(),
            Err(_) => false,
        }
    }

    pub async fn deployment_exists(&mut self, name: &str, namespace: &str) -> Result<bool> {
        let client = self.client().await?;
        let deployments: Api<Deployment> = Api::namespaced(client.clone(), namespace);
        match deployments.get_opt(name).await? {
            Some(_) => Ok(true),
            None => Ok(false),
        }
    }

    /// True when any daemonset in the namespace carries the label key.
    pub async fn daemonset_with_label(&mut self, namespace: &str, label: &str) -> Result<bool> {
        let client = self.client().await?;
        let daemonsets: Api<DaemonSet> = Api::namespaced(client.clone(), namespace);
        let list = daemonsets
            .list(&ListParams::default().labels(label))
            .await?;
        Ok(!list.items.is_empty())
    }

    /// Wait for a deployment to have at least one ready replica.
    pub async fn wait_for_deployment_ready(
        &mut self,
        name: &str,
        namespace: &str,
        timeout: Duration,
    ) -> Result<bool> {
        let start = std::time::Instant::now();
        while start.elapsed() < timeout {
            let client = self.client().await?;
            let deployments: Api<Deployment> = Api::namespaced(client.clone(), namespace);
            if let Ok(Some(deploy)) = deployments.get_opt(name).await {
                let ready = deploy
                    .status
                    .and_then(|s| s.ready_replicas)
                    .unwrap_or(0);
                if ready > 0 {
                    return Ok(true);
                }
            }
            sleep(Duration::from_secs(2)).await;
        }
        Ok(false)
    }

    /// Server-side apply of a YAML manifest, creating on 404.
    pub async fn apply_yaml(&mut self, yaml_content: &str) -> Result<()> {
        let client = self.client().await?;

        let value: serde_yml::Value = serde_yml::from_str(yaml_content)?;
        let api_version = value
            .get("apiVersion")
            .and_then(|v| v.as_str())
            .ok_or_else(|| anyhow!("missing apiVersion"))?;
        let kind = value
            .get("kind")
            .and_then(|v| v.as_str())
            .ok_or_else(|| anyhow!("missing kind"))?;
        let metadata = value
            .get("metadata")
            .ok_or_else(|| anyhow!("missing metadata"))?;
        let name = metadata
            .get("name")
            .and_then(|v| v.as_str())
            .ok_or_else(|| anyhow!("missing metadata.name"))?;
        let namespace = metadata
            .get("namespace")
            .and_then(|v| v.as_str())
            .unwrap_or("default");

        let (group, version) = match api_version.split_once('/') {
            Some((group, version)) => (group.to_string(), version.to_string()),
            None => (String::new(), api_version.to_string()),
        };

        let ar = ApiResource {
            group,
            version,
            kind: kind.to_string(),
            api_version: api_version.to_string(),
            plural: plural_of(kind),
        };

        let obj: DynamicObject = serde_yml::from_str(yaml_content)?;
        let api: Api<DynamicObject> = Api::namespaced_with(client.clone(), namespace, &ar);

        match api
            .patch(name, &PatchParams::apply("ksail"), &Patch::Apply(&obj))
            .await
        {
            Ok(_) => Ok(()),
            Err(kube::Error::Api(e)) if e.code == 404 => {
                api.create(&PostParams::default(), &obj).await?;
                Ok(())
            }
            Err(e) => Err(e.into()),
        }
    }
}

/// Resource plural for a manifest kind, as the API server forms it: the
/// request path is built from this verbatim, so `OCIRepository` must become
/// `ocirepositories`, not `ocirepositorys`.
fn plural_of(kind: &str) -> String {
    let lower = kind.to_lowercase();
    if let Some(stem) = lower.strip_suffix('y') {
        if !stem.ends_with(|c| matches!(c, 'a' | 'e' | 'i' | 'o' | 'u')) {
            return format!("{}ies", stem);
        }
    }
    if lower.ends_with('s') || lower.ends_with('x') || lower.ends_with("ch") || lower.ends_with("sh")
    {
        return format!("{}es", lower);
    }
    format!("{}s", lower)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_plural_of_applied_kinds() {
        assert_eq!(plural_of("OCIRepository"), "ocirepositories");
        assert_eq!(plural_of("Kustomization"), "kustomizations");
        assert_eq!(plural_of("Application"), "applications");
    }

    #[test]
    fn test_plural_of_suffix_rules() {
        assert_eq!(plural_of("Ingress"), "ingresses");
        assert_eq!(plural_of("Gateway"), "gateways");
        assert_eq!(plural_of("NetworkPolicy"), "networkpolicies");
    }
}
