//! Helm CLI wrapper
//!
//! Installs and inspects releases by driving the `helm` binary; no Helm SDK
//! is linked in. Commands are context-bound through `kill_on_drop`, so a
//! cancelled task tears its child process down.

use std::process::Stdio;
use std::time::Duration;

use anyhow::{anyhow, bail, Context, Result};
use serde::Deserialize;
use tokio::process::Command;

#[derive(Debug, Clone, Deserialize)]
pub struct HelmRelease {
    pub name: String,
    pub namespace: String,
    #[serde(default)]
    pub chart: String,
    #[serde(default)]
    pub status: String,
}

/// A pinned chart install.
#[derive(Debug, Clone)]
pub struct ChartSpec {
    pub release: &'static str,
    pub chart: &'static str,
    pub repo: &'static str,
    pub version: &'static str,
    pub namespace: &'static str,
    pub set: Vec<(&'static str, &'static str)>,
}

#[derive(Clone)]
pub struct Helm {
    kubeconfig: Option<String>,
    context: Option<String>,
}

impl Helm {
    pub fn new(kubeconfig: Option<String>, context: Option<String>) -> Self {
        Self {
            kubeconfig,
            context,
        }
    }

    fn command(&self) -> Command {
        let mut cmd = Command::new("helm");
        cmd.stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let Some(kubeconfig) = &self.kubeconfig {
            cmd.arg("--kubeconfig").arg(kubeconfig);
        }
        if let Some(context) = &self.context {
            cmd.arg("--kube-context").arg(context);
        }
        cmd
    }

    async fn run(&self, args: &[&str]) -> Result<String> {
        let mut cmd = self.command();
        cmd.args(args);
        let output = cmd
            .output()
            .await
            .with_context(|| format!("failed to run helm {}", args.join(" ")))?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            bail!(
                "helm {} failed: {}",
                args.first().copied().unwrap_or(""),
                stderr.trim()
            );
        }
        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }

    /// All releases across all namespaces.
    pub async fn list_all(&self) -> Result<Vec<HelmRelease>> {
        let stdout = self.run(&["list", "-A", "-o", "json"]).await?;
        serde_json::from_str(&stdout).map_err(|err| anyhow!("failed to parse helm list: {}", err))
    }

    /// Install (or upgrade) a pinned chart and wait for it.
    pub async fn install(&self, spec: &ChartSpec, timeout: Duration) -> Result<()> {
        let timeout_arg = format!("{}s", timeout.as_secs());
        let mut args: Vec<String> = vec![
            "upgrade".into(),
            "--install".into(),
            spec.release.into(),
            spec.chart.into(),
            "--repo".into(),
            spec.repo.into(),
            "--version".into(),
            spec.version.into(),
            "--namespace".into(),
            spec.namespace.into(),
            "--create-namespace".into(),
            "--wait".into(),
            "--timeout".into(),
            timeout_arg,
        ];
        for (key, value) in &spec.set {
            args.push("--set".into());
            args.push(format!("{}={}", key, value));
        }
        let arg_refs: Vec<&str> = args.iter().map(String::as_str).collect();
        self.run(&arg_refs).await?;
        tracing::info!(release = spec.release, version = spec.version, "helm release installed");
        Ok(())
    }

    pub async fn uninstall(&self, release: &str, namespace: &str) -> Result<()> {
        self.run(&["uninstall", release, "--namespace", namespace])
            .await?;
        tracing::info!(release = release, "helm release uninstalled");
        Ok(())
    }
}
