mod distribution;
mod loader;
mod types;

pub use distribution::{
    load_distribution, DistributionConfig, K3dRegistries, K3dSimpleConfig, K3sExtraArg,
    KindCluster, KindNode, NamedDocument, TalosConfig,
};
pub use loader::{expand_home, load_root, Overrides, Project};
pub use types::{
    bundles_csi, bundles_load_balancer, bundles_metrics_server, parse_duration,
    validate_cluster_name, Cluster, ClusterOptions, ClusterSpec, CniOption, CniProvider,
    Connection, Distribution, GitOpsEngine, HetznerOptions, LocalRegistryOptions, LoggingOptions,
    Metadata, PlacementGroupStrategy, PolicyEngine, Provider, TalosOptions, Toggle,
    DEFAULT_LOCAL_REGISTRY_PORT,
};
