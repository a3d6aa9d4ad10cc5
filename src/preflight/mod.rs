//! Preflight checks
//!
//! Fail fast, before any stage mutates the host: kernel modules for
//! container-based distributions, runtime reachability, and the presence of
//! the CLIs a run will need. Every failure carries remediation text.

use anyhow::Result;

use crate::config::{Distribution, GitOpsEngine, Provider};
use crate::error::Error;
use crate::runtime::DockerRuntime;

/// Kernel module required per distribution × provider, when any.
pub fn required_kernel_module(
    distribution: Distribution,
    provider: Provider,
) -> Option<&'static str> {
    match (distribution, provider) {
        (Distribution::Talos | Distribution::VCluster, Provider::Docker) => Some("br_netfilter"),
        _ => None,
    }
}

/// Exact match on the first whitespace-delimited field of a /proc/modules
/// line.
pub fn module_loaded(proc_modules: &str, name: &str) -> bool {
    proc_modules
        .lines()
        .any(|line| line.split_whitespace().next() == Some(name))
}

/// Load a kernel module if missing: `modprobe`, then `sudo -n modprobe` so
/// a CI box without a TTY fails fast instead of hanging on a password
/// prompt. Non-Linux platforms are a no-op (the runtime's Linux VM handles
/// its own modules).
pub async fn ensure_kernel_module(name: &str) -> Result<()> {
    #[cfg(not(target_os = "linux"))]
    {
        let _ = name;
        Ok(())
    }

    #[cfg(target_os = "linux")]
    {
        let modules = tokio::fs::read_to_string("/proc/modules")
            .await
            .unwrap_or_default();
        if module_loaded(&modules, name) {
            return Ok(());
        }

        tracing::info!(module = name, "loading kernel module");
        if run_silent("modprobe", &[name]).await {
            return Ok(());
        }
        if run_silent("sudo", &["-n", "modprobe", name]).await {
            return Ok(());
        }
        Err(Error::preflight(
            format!("kernel module {} is not loaded", name),
            format!("run: sudo modprobe {}", name),
        )
        .into())
    }
}

#[cfg(target_os = "linux")]
async fn run_silent(binary: &str, args: &[&str]) -> bool {
    tokio::process::Command::new(binary)
        .args(args)
        .stdout(std::process::Stdio::null())
        .stderr(std::process::Stdio::null())
        .status()
        .await
        .map(|status| status.success())
        .unwrap_or(false)
}

/// The container runtime must answer a ping when the provider needs it.
pub async fn check_runtime(runtime: Option<&DockerRuntime>) -> Result<()> {
    match runtime {
        Some(runtime) if runtime.is_accessible().await => Ok(()),
        _ => Err(Error::preflight(
            "container runtime is not reachable",
            "start Docker (or set DOCKER_HOST) and retry",
        )
        .into()),
    }
}

/// The distribution's CLI must be on PATH.
pub fn check_distribution_cli(distribution: Distribution) -> Result<()> {
    let binary = distribution.cli_binary();
    if which::which(binary).is_ok() {
        return Ok(());
    }
    Err(Error::preflight(
        format!("{} requires the {} CLI", distribution, binary),
        format!("install {} and make sure it is on PATH", binary),
    )
    .into())
}

/// Helm is needed whenever components or a GitOps engine will be
/// installed.
pub fn check_helm(needed: bool) -> Result<()> {
    if !needed || which::which("helm").is_ok() {
        return Ok(());
    }
    Err(Error::preflight(
        "component installation requires the helm CLI",
        "install helm and make sure it is on PATH",
    )
    .into())
}

pub fn helm_needed(gitops: GitOpsEngine, component_count: usize) -> bool {
    component_count > 0 || gitops != GitOpsEngine::None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_module_loaded_exact_field_match() {
        let proc_modules = "\
br_netfilter 32768 0 - Live 0x0000000000000000\n\
bridge 307200 1 br_netfilter, Live 0x0000000000000000\n";
        assert!(module_loaded(proc_modules, "br_netfilter"));
        assert!(module_loaded(proc_modules, "bridge"));
        // Substrings of other module names never match.
        assert!(!module_loaded(proc_modules, "br_net"));
        assert!(!module_loaded(proc_modules, "netfilter"));
    }

    #[test]
    fn test_required_kernel_module_matrix() {
        assert_eq!(
            required_kernel_module(Distribution::Talos, Provider::Docker),
            Some("br_netfilter")
        );
        assert_eq!(
            required_kernel_module(Distribution::VCluster, Provider::Docker),
            Some("br_netfilter")
        );
        assert_eq!(
            required_kernel_module(Distribution::Vanilla, Provider::Docker),
            None
        );
        assert_eq!(
            required_kernel_module(Distribution::Talos, Provider::Hetzner),
            None
        );
    }

    #[test]
    fn test_helm_needed() {
        assert!(helm_needed(GitOpsEngine::Flux, 0));
        assert!(helm_needed(GitOpsEngine::None, 2));
        assert!(!helm_needed(GitOpsEngine::None, 0));
    }
}
