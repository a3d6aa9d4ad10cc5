//! Root cluster configuration types
//!
//! `ksail.yaml` is a versioned Kubernetes-style document
//! (`ksail.dev/v1alpha1`, kind `Cluster`). Tri-state component enums carry a
//! `Default` sentinel that is collapsed exactly once, at the boundary between
//! config load and the orchestrator, so everything downstream sees concrete
//! values only.

use std::fmt;
use std::time::Duration;

use anyhow::{bail, Result};
use clap::ValueEnum;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};

pub const API_VERSION: &str = "ksail.dev/v1alpha1";
pub const KIND: &str = "Cluster";

/// Default host port for the workload OCI registry.
pub const DEFAULT_LOCAL_REGISTRY_PORT: u16 = 5050;

static DNS1123_REGEX: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[a-z0-9]([-a-z0-9]*[a-z0-9])?$").expect("invalid DNS1123 regex"));

/// Names that would shadow well-known cluster-scoped identifiers.
const RESERVED_NAMES: [&str; 5] = [
    "default",
    "kube-system",
    "kube-public",
    "kube-node-lease",
    "local",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize, ValueEnum)]
#[value(rename_all = "PascalCase")]
pub enum Distribution {
    #[default]
    Vanilla,
    K3s,
    Talos,
    VCluster,
}

impl Distribution {
    /// Cluster name used when the root document leaves metadata.name empty.
    pub fn default_cluster_name(&self) -> &'static str {
        match self {
            Distribution::Vanilla => "kind",
            Distribution::K3s => "k3s-default",
            Distribution::Talos => "talos-default",
            Distribution::VCluster => "vcluster",
        }
    }

    /// Kubeconfig context name formula.
    pub fn context_name(&self, cluster_name: &str) -> String {
        match self {
            Distribution::Vanilla => format!("kind-{}", cluster_name),
            Distribution::K3s => format!("k3d-{}", cluster_name),
            Distribution::Talos => format!("admin@{}", cluster_name),
            Distribution::VCluster => format!("vcluster-{}", cluster_name),
        }
    }

    /// Container network the distribution attaches its nodes to, when it
    /// runs on the container runtime.
    pub fn cluster_network(&self, cluster_name: &str) -> Option<String> {
        match self {
            Distribution::Vanilla => Some("kind".to_string()),
            Distribution::K3s => Some(format!("k3d-{}", cluster_name)),
            Distribution::Talos => Some(cluster_name.to_string()),
            Distribution::VCluster => None,
        }
    }

    /// Whether registry container names must be unique per cluster. Talos
    /// resolves mirror endpoints by DNS on the bridge network, so two
    /// parallel clusters sharing a container name would collide.
    pub fn requires_cluster_scoped_registry_names(&self) -> bool {
        matches!(self, Distribution::Talos)
    }

    pub fn supports(&self, provider: Provider) -> bool {
        match provider {
            Provider::Docker => true,
            Provider::Hetzner => matches!(self, Distribution::Talos),
        }
    }

    /// CLI binary driving this distribution's bootstrap.
    pub fn cli_binary(&self) -> &'static str {
        match self {
            Distribution::Vanilla => "kind",
            Distribution::K3s => "k3d",
            Distribution::Talos => "talosctl",
            Distribution::VCluster => "vcluster",
        }
    }
}

impl fmt::Display for Distribution {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Distribution::Vanilla => "Vanilla",
            Distribution::K3s => "K3s",
            Distribution::Talos => "Talos",
            Distribution::VCluster => "VCluster",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize, ValueEnum)]
#[value(rename_all = "PascalCase")]
pub enum Provider {
    #[default]
    Docker,
    Hetzner,
}

impl fmt::Display for Provider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Provider::Docker => f.write_str("Docker"),
            Provider::Hetzner => f.write_str("Hetzner"),
        }
    }
}

/// Tri-state component option. `Default` defers to the distribution ×
/// provider bundling policy and never survives past config resolution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, ValueEnum)]
#[value(rename_all = "PascalCase")]
pub enum Toggle {
    #[default]
    Default,
    Enabled,
    Disabled,
}

impl Toggle {
    /// Collapse the sentinel against the bundling policy for this component.
    pub fn effective(self, bundled: bool) -> bool {
        match self {
            Toggle::Enabled => true,
            Toggle::Disabled => false,
            Toggle::Default => bundled,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, ValueEnum)]
#[value(rename_all = "PascalCase")]
pub enum CniOption {
    /// Keep the distribution's built-in CNI; install nothing extra.
    #[default]
    Default,
    Cilium,
    Calico,
}

/// Resolved CNI choice; a non-built-in choice implies the distribution's
/// own CNI is disabled at bootstrap.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CniProvider {
    BuiltIn,
    Cilium,
    Calico,
}

impl fmt::Display for CniProvider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CniProvider::BuiltIn => f.write_str("BuiltIn"),
            CniProvider::Cilium => f.write_str("Cilium"),
            CniProvider::Calico => f.write_str("Calico"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, ValueEnum)]
#[value(rename_all = "PascalCase")]
pub enum PolicyEngine {
    #[default]
    None,
    Kyverno,
    Gatekeeper,
}

impl fmt::Display for PolicyEngine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PolicyEngine::None => f.write_str("None"),
            PolicyEngine::Kyverno => f.write_str("Kyverno"),
            PolicyEngine::Gatekeeper => f.write_str("Gatekeeper"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, ValueEnum)]
#[value(rename_all = "PascalCase")]
pub enum GitOpsEngine {
    #[default]
    None,
    Flux,
    #[serde(rename = "ArgoCD")]
    #[value(name = "ArgoCD")]
    ArgoCd,
}

impl fmt::Display for GitOpsEngine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            GitOpsEngine::None => f.write_str("None"),
            GitOpsEngine::Flux => f.write_str("Flux"),
            GitOpsEngine::ArgoCd => f.write_str("ArgoCD"),
        }
    }
}

/// Root `ksail.yaml` document.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Cluster {
    pub api_version: String,
    pub kind: String,
    #[serde(default)]
    pub metadata: Metadata,
    #[serde(default)]
    pub spec: ClusterOptions,
}

impl Default for Cluster {
    fn default() -> Self {
        Self {
            api_version: API_VERSION.to_string(),
            kind: KIND.to_string(),
            metadata: Metadata::default(),
            spec: ClusterOptions::default(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Metadata {
    #[serde(default)]
    pub name: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClusterOptions {
    #[serde(default)]
    pub distribution: Distribution,
    #[serde(default)]
    pub provider: Provider,
    #[serde(default)]
    pub cni: CniOption,
    #[serde(default)]
    pub csi: Toggle,
    #[serde(default)]
    pub metrics_server: Toggle,
    #[serde(default)]
    pub load_balancer: Toggle,
    #[serde(default)]
    pub cert_manager: Toggle,
    #[serde(default)]
    pub policy_engine: PolicyEngine,
    #[serde(default)]
    pub gitops_engine: GitOpsEngine,
    #[serde(default)]
    pub connection: Connection,
    #[serde(default = "default_source_directory")]
    pub source_directory: String,
    #[serde(default = "default_control_planes")]
    pub control_planes: u32,
    #[serde(default)]
    pub workers: u32,
    #[serde(default)]
    pub local_registry: LocalRegistryOptions,
    /// Mirror registries as `host=endpoint[,endpoint...]` strings, same
    /// grammar as the `--mirror-registry` flag.
    #[serde(default)]
    pub mirror_registries: Vec<String>,
    #[serde(default)]
    pub talos: TalosOptions,
    #[serde(default)]
    pub hetzner: HetznerOptions,
    #[serde(default)]
    pub logging: LoggingOptions,
}

/// File logging configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LoggingOptions {
    #[serde(default = "default_logging_enabled")]
    pub enabled: bool,

    /// Log file path template; `{cluster_name}` is substituted.
    #[serde(default = "default_log_file")]
    pub file: String,

    /// trace, debug, info, warn, or error.
    #[serde(default = "default_log_level")]
    pub level: String,
}

impl Default for LoggingOptions {
    fn default() -> Self {
        Self {
            enabled: default_logging_enabled(),
            file: default_log_file(),
            level: default_log_level(),
        }
    }
}

fn default_logging_enabled() -> bool {
    true
}

fn default_log_file() -> String {
    "/tmp/ksail-{cluster_name}.log".to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for ClusterOptions {
    fn default() -> Self {
        Self {
            distribution: Distribution::default(),
            provider: Provider::default(),
            cni: CniOption::default(),
            csi: Toggle::default(),
            metrics_server: Toggle::default(),
            load_balancer: Toggle::default(),
            cert_manager: Toggle::default(),
            policy_engine: PolicyEngine::default(),
            gitops_engine: GitOpsEngine::default(),
            connection: Connection::default(),
            source_directory: default_source_directory(),
            control_planes: default_control_planes(),
            workers: 0,
            local_registry: LocalRegistryOptions::default(),
            mirror_registries: Vec::new(),
            talos: TalosOptions::default(),
            hetzner: HetznerOptions::default(),
            logging: LoggingOptions::default(),
        }
    }
}

fn default_source_directory() -> String {
    "k8s".to_string()
}

fn default_control_planes() -> u32 {
    1
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Connection {
    #[serde(default = "default_kubeconfig")]
    pub kubeconfig: String,
    #[serde(default)]
    pub context: String,
    /// Readiness-wait budget, e.g. "90s" or "5m".
    #[serde(default = "default_timeout")]
    pub timeout: String,
}

impl Default for Connection {
    fn default() -> Self {
        Self {
            kubeconfig: default_kubeconfig(),
            context: String::new(),
            timeout: default_timeout(),
        }
    }
}

fn default_kubeconfig() -> String {
    "~/.kube/config".to_string()
}

fn default_timeout() -> String {
    "5m".to_string()
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LocalRegistryOptions {
    /// Tri-state: `Default` enables the registry iff a GitOps engine is
    /// configured.
    #[serde(default)]
    pub enabled: Toggle,
    #[serde(default)]
    pub host_port: Option<u16>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TalosOptions {
    #[serde(default)]
    pub kernel_params: Vec<String>,
    #[serde(default)]
    pub disk_encryption: bool,
    #[serde(default)]
    pub machine_type: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, ValueEnum)]
#[value(rename_all = "PascalCase")]
pub enum PlacementGroupStrategy {
    #[default]
    None,
    Spread,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HetznerOptions {
    #[serde(default = "default_hetzner_location")]
    pub location: String,
    #[serde(default = "default_hetzner_server_type")]
    pub server_type: String,
    #[serde(default)]
    pub placement_group: PlacementGroupStrategy,
}

impl Default for HetznerOptions {
    fn default() -> Self {
        Self {
            location: default_hetzner_location(),
            server_type: default_hetzner_server_type(),
            placement_group: PlacementGroupStrategy::default(),
        }
    }
}

fn default_hetzner_location() -> String {
    "fsn1".to_string()
}

fn default_hetzner_server_type() -> String {
    "cx22".to_string()
}

// === Bundling policy ===
//
// Which components ship inside the distribution, per distribution × provider.

pub fn bundles_csi(distribution: Distribution, provider: Provider) -> bool {
    match distribution {
        Distribution::K3s | Distribution::VCluster => true,
        Distribution::Talos => provider == Provider::Hetzner,
        Distribution::Vanilla => false,
    }
}

pub fn bundles_metrics_server(distribution: Distribution, _provider: Provider) -> bool {
    matches!(distribution, Distribution::K3s | Distribution::VCluster)
}

pub fn bundles_load_balancer(distribution: Distribution, provider: Provider) -> bool {
    match distribution {
        Distribution::K3s | Distribution::VCluster => true,
        Distribution::Talos => provider == Provider::Hetzner,
        Distribution::Vanilla => false,
    }
}

/// Fully resolved cluster shape: no `Default` sentinels anywhere. This is
/// what the orchestrator and the diff engine operate on.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClusterSpec {
    pub name: String,
    pub distribution: Distribution,
    pub provider: Provider,
    pub cni: CniProvider,
    pub csi: bool,
    pub metrics_server: bool,
    pub load_balancer: bool,
    pub cert_manager: bool,
    pub policy_engine: PolicyEngine,
    pub gitops_engine: GitOpsEngine,
    pub control_planes: u32,
    pub workers: u32,
    pub network_cidr: Option<String>,
    pub local_registry_port: Option<u16>,
    pub kernel_params: Vec<String>,
    pub disk_encryption: bool,
    pub machine_type: Option<String>,
}

impl ClusterSpec {
    /// The spec a fresh cluster of this distribution × provider would have
    /// with an untouched configuration. Used by provisioners that cannot
    /// introspect live machine settings, so the diff engine sees no
    /// spurious changes.
    pub fn default_for(name: &str, distribution: Distribution, provider: Provider) -> Self {
        let mut cluster = Cluster::default();
        cluster.metadata.name = name.to_string();
        cluster.spec.distribution = distribution;
        cluster.spec.provider = provider;
        cluster.resolve()
    }
}

impl Cluster {
    /// Effective cluster name: explicit metadata.name or the distribution
    /// default.
    pub fn cluster_name(&self) -> String {
        if self.metadata.name.is_empty() {
            self.spec.distribution.default_cluster_name().to_string()
        } else {
            self.metadata.name.clone()
        }
    }

    /// Effective kubeconfig context.
    pub fn context_name(&self) -> String {
        if self.spec.connection.context.is_empty() {
            self.spec.distribution.context_name(&self.cluster_name())
        } else {
            self.spec.connection.context.clone()
        }
    }

    /// Local registry port when the registry is active: explicitly enabled,
    /// or defaulted on by a configured GitOps engine.
    pub fn local_registry_port(&self) -> Option<u16> {
        let active = self
            .spec
            .local_registry
            .enabled
            .effective(self.spec.gitops_engine != GitOpsEngine::None);
        active.then(|| {
            self.spec
                .local_registry
                .host_port
                .unwrap_or(DEFAULT_LOCAL_REGISTRY_PORT)
        })
    }

    /// Validate cross-field rules the serde layer cannot express.
    pub fn validate(&self) -> Result<()> {
        if self.api_version != API_VERSION {
            bail!(
                "unsupported apiVersion {:?} (expected {:?})",
                self.api_version,
                API_VERSION
            );
        }
        if self.kind != KIND {
            bail!("unsupported kind {:?} (expected {:?})", self.kind, KIND);
        }

        let name = self.cluster_name();
        validate_cluster_name(&name)?;

        if !self.spec.distribution.supports(self.spec.provider) {
            bail!(
                "distribution {} does not support provider {} (only Talos runs on Hetzner)",
                self.spec.distribution,
                self.spec.provider
            );
        }

        if self.spec.control_planes == 0 {
            bail!("at least one control-plane node is required");
        }

        parse_duration(&self.spec.connection.timeout)?;
        Ok(())
    }

    /// Collapse every `Default` sentinel into a concrete value. Called once,
    /// at the config → orchestrator boundary.
    pub fn resolve(&self) -> ClusterSpec {
        let distribution = self.spec.distribution;
        let provider = self.spec.provider;
        ClusterSpec {
            name: self.cluster_name(),
            distribution,
            provider,
            cni: match self.spec.cni {
                CniOption::Default => CniProvider::BuiltIn,
                CniOption::Cilium => CniProvider::Cilium,
                CniOption::Calico => CniProvider::Calico,
            },
            csi: self.spec.csi.effective(bundles_csi(distribution, provider)),
            metrics_server: self
                .spec
                .metrics_server
                .effective(bundles_metrics_server(distribution, provider)),
            load_balancer: self
                .spec
                .load_balancer
                .effective(bundles_load_balancer(distribution, provider)),
            cert_manager: self.spec.cert_manager.effective(false),
            policy_engine: self.spec.policy_engine,
            gitops_engine: self.spec.gitops_engine,
            control_planes: self.spec.control_planes,
            workers: self.spec.workers,
            network_cidr: None,
            local_registry_port: self.local_registry_port(),
            kernel_params: self.spec.talos.kernel_params.clone(),
            disk_encryption: self.spec.talos.disk_encryption,
            machine_type: self.spec.talos.machine_type.clone(),
        }
    }

    /// Readiness-wait budget from the connection section.
    pub fn timeout(&self) -> Duration {
        parse_duration(&self.spec.connection.timeout).unwrap_or(Duration::from_secs(300))
    }
}

pub fn validate_cluster_name(name: &str) -> Result<()> {
    if name.len() > 63 {
        bail!("cluster name {:?} exceeds 63 characters", name);
    }
    if !DNS1123_REGEX.is_match(name) {
        bail!(
            "cluster name {:?} is not a valid DNS-1123 label (lowercase alphanumerics and '-')",
            name
        );
    }
    if RESERVED_NAMES.contains(&name) {
        bail!("cluster name {:?} is reserved", name);
    }
    Ok(())
}

/// Parse `"90s"` / `"5m"` / `"1h"` shorthand into a duration.
pub fn parse_duration(input: &str) -> Result<Duration> {
    let trimmed = input.trim();
    if trimmed.is_empty() {
        bail!("invalid duration {:?}", input);
    }
    let split = trimmed
        .find(|c: char| !c.is_ascii_digit())
        .unwrap_or(trimmed.len());
    let (value, unit) = trimmed.split_at(split);
    let value: u64 = value
        .parse()
        .map_err(|_| anyhow::anyhow!("invalid duration {:?}", input))?;
    let seconds = match unit {
        "" | "s" => value,
        "m" => value * 60,
        "h" => value * 3600,
        _ => bail!("invalid duration unit {:?} in {:?}", unit, input),
    };
    Ok(Duration::from_secs(seconds))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_duration() {
        assert_eq!(parse_duration("90s").unwrap(), Duration::from_secs(90));
        assert_eq!(parse_duration("5m").unwrap(), Duration::from_secs(300));
        assert_eq!(parse_duration("1h").unwrap(), Duration::from_secs(3600));
        assert_eq!(parse_duration("42").unwrap(), Duration::from_secs(42));
        assert!(parse_duration("5 minutes").is_err());
        assert!(parse_duration("").is_err());
    }

    #[test]
    fn test_cluster_name_validation() {
        assert!(validate_cluster_name("kind").is_ok());
        assert!(validate_cluster_name("my-cluster-1").is_ok());
        assert!(validate_cluster_name("My-Cluster").is_err());
        assert!(validate_cluster_name("-leading").is_err());
        assert!(validate_cluster_name("kube-system").is_err());
        assert!(validate_cluster_name(&"a".repeat(64)).is_err());
    }

    #[test]
    fn test_provider_matrix() {
        assert!(Distribution::Vanilla.supports(Provider::Docker));
        assert!(!Distribution::Vanilla.supports(Provider::Hetzner));
        assert!(!Distribution::K3s.supports(Provider::Hetzner));
        assert!(!Distribution::VCluster.supports(Provider::Hetzner));
        assert!(Distribution::Talos.supports(Provider::Hetzner));
        assert!(Distribution::Talos.supports(Provider::Docker));
    }

    #[test]
    fn test_toggle_resolution_matrix() {
        // K3s and VCluster bundle metrics-server, CSI and LB.
        for distribution in [Distribution::K3s, Distribution::VCluster] {
            assert!(Toggle::Default.effective(bundles_csi(distribution, Provider::Docker)));
            assert!(
                Toggle::Default.effective(bundles_metrics_server(distribution, Provider::Docker))
            );
            assert!(
                Toggle::Default.effective(bundles_load_balancer(distribution, Provider::Docker))
            );
        }
        // Talos on Hetzner bundles CSI and LB, not metrics-server.
        assert!(Toggle::Default.effective(bundles_csi(Distribution::Talos, Provider::Hetzner)));
        assert!(Toggle::Default
            .effective(bundles_load_balancer(Distribution::Talos, Provider::Hetzner)));
        assert!(!Toggle::Default
            .effective(bundles_metrics_server(Distribution::Talos, Provider::Hetzner)));
        // Vanilla and Talos-in-Docker bundle none.
        for (distribution, provider) in [
            (Distribution::Vanilla, Provider::Docker),
            (Distribution::Talos, Provider::Docker),
        ] {
            assert!(!Toggle::Default.effective(bundles_csi(distribution, provider)));
            assert!(!Toggle::Default.effective(bundles_load_balancer(distribution, provider)));
        }
        // Explicit values always win.
        assert!(Toggle::Enabled.effective(false));
        assert!(!Toggle::Disabled.effective(true));
    }

    #[test]
    fn test_context_name_formula() {
        assert_eq!(Distribution::Vanilla.context_name("kind"), "kind-kind");
        assert_eq!(Distribution::K3s.context_name("dev"), "k3d-dev");
        assert_eq!(Distribution::Talos.context_name("dev"), "admin@dev");
    }

    #[test]
    fn test_local_registry_defaulting() {
        let mut cluster = Cluster::default();
        assert_eq!(cluster.local_registry_port(), None);

        cluster.spec.gitops_engine = GitOpsEngine::Flux;
        assert_eq!(cluster.local_registry_port(), Some(5050));

        cluster.spec.local_registry.host_port = Some(6000);
        assert_eq!(cluster.local_registry_port(), Some(6000));

        cluster.spec.local_registry.enabled = Toggle::Disabled;
        assert_eq!(cluster.local_registry_port(), None);
    }

    #[test]
    fn test_resolution_is_concrete_and_stable() {
        let mut cluster = Cluster::default();
        cluster.metadata.name = "dev".to_string();
        cluster.spec.distribution = Distribution::K3s;
        let spec = cluster.resolve();
        assert_eq!(spec.cni, CniProvider::BuiltIn);
        assert!(spec.csi && spec.metrics_server && spec.load_balancer);
        assert!(!spec.cert_manager);
        // Resolving twice yields the same spec (required by the diff engine).
        assert_eq!(spec, cluster.resolve());
    }

    #[test]
    fn test_validate_rejects_bad_combo() {
        let mut cluster = Cluster::default();
        cluster.spec.distribution = Distribution::K3s;
        cluster.spec.provider = Provider::Hetzner;
        assert!(cluster.validate().is_err());
    }

    #[test]
    fn test_yaml_round_trip_preserves_non_defaults() {
        let yaml = r#"
apiVersion: ksail.dev/v1alpha1
kind: Cluster
metadata:
  name: demo
spec:
  distribution: Talos
  cni: Cilium
  metricsServer: Enabled
  gitopsEngine: ArgoCD
  workers: 2
"#;
        let cluster: Cluster = serde_yml::from_str(yaml).expect("parse");
        assert_eq!(cluster.spec.distribution, Distribution::Talos);
        assert_eq!(cluster.spec.cni, CniOption::Cilium);
        assert_eq!(cluster.spec.gitops_engine, GitOpsEngine::ArgoCd);

        let rendered = serde_yml::to_string(&cluster).expect("render");
        let reparsed: Cluster = serde_yml::from_str(&rendered).expect("reparse");
        assert_eq!(reparsed.spec.metrics_server, Toggle::Enabled);
        assert_eq!(reparsed.spec.workers, 2);
        assert_eq!(reparsed.cluster_name(), "demo");
    }
}
