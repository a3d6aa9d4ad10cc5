//! Error taxonomy for ksail
//!
//! Stage internals use `anyhow` for context chaining; the typed variants here
//! are attached at the boundaries that need them: exit-code mapping in main,
//! and the sentinel checks callers use for skip-if-absent semantics.

use thiserror::Error;

use crate::lifecycle::diff::Change;

#[derive(Debug, Error)]
pub enum Error {
    /// Invalid configuration: YAML parse failures, bad enum values,
    /// unsupported distribution/provider combinations.
    #[error("configuration error: {0}")]
    Config(String),

    /// An environment prerequisite is missing or unreachable.
    #[error("{message}\n{remediation}")]
    Preflight { message: String, remediation: String },

    /// A lifecycle stage failed; wraps the root cause with the stage's
    /// failure prefix.
    #[error("{prefix}: {source}")]
    Stage {
        prefix: String,
        #[source]
        source: anyhow::Error,
    },

    /// A distribution SDK/CLI call failed.
    #[error("{distribution} provisioner: {message}")]
    Provisioner {
        distribution: String,
        message: String,
    },

    /// `update` detected changes that cannot be applied without recreating
    /// the cluster.
    #[error("update requires cluster recreation ({} change(s)); re-run with --force to destroy and recreate", changes.len())]
    RecreateRequired { changes: Vec<Change> },

    /// Sentinel: the cluster has no nodes.
    #[error("no nodes found for cluster")]
    NoNodes,

    /// Sentinel: the container runtime is not reachable.
    #[error("container runtime is not available")]
    ProviderUnavailable,

    /// Sentinel: a registry container does not exist.
    #[error("registry container not found")]
    RegistryNotFound,
}

impl Error {
    pub fn config(msg: impl Into<String>) -> Self {
        Error::Config(msg.into())
    }

    pub fn preflight(message: impl Into<String>, remediation: impl Into<String>) -> Self {
        Error::Preflight {
            message: message.into(),
            remediation: remediation.into(),
        }
    }

    /// Exit code contract: 2 for config/validation errors, 1 otherwise.
    pub fn exit_code(&self) -> i32 {
        match self {
            Error::Config(_) => 2,
            _ => 1,
        }
    }
}

/// Map any error chain to a process exit code.
///
/// Typed `Error`s anywhere in the chain decide the code; untyped errors
/// default to 1.
pub fn exit_code(err: &anyhow::Error) -> i32 {
    err.chain()
        .filter_map(|cause| cause.downcast_ref::<Error>())
        .map(Error::exit_code)
        .next()
        .unwrap_or(1)
}

/// True when the error chain contains the given sentinel, matched by variant.
pub fn is_no_nodes(err: &anyhow::Error) -> bool {
    err.chain()
        .any(|cause| matches!(cause.downcast_ref::<Error>(), Some(Error::NoNodes)))
}

pub fn is_registry_not_found(err: &anyhow::Error) -> bool {
    err.chain().any(|cause| {
        matches!(cause.downcast_ref::<Error>(), Some(Error::RegistryNotFound))
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::Context;

    #[test]
    fn test_exit_codes() {
        assert_eq!(Error::config("bad yaml").exit_code(), 2);
        assert_eq!(Error::NoNodes.exit_code(), 1);
        assert_eq!(
            Error::preflight("docker unreachable", "start docker").exit_code(),
            1
        );
    }

    #[test]
    fn test_exit_code_through_chain() {
        let err = anyhow::Error::from(Error::config("invalid distribution"))
            .context("loading ksail.yaml");
        assert_eq!(exit_code(&err), 2);

        let err = anyhow::anyhow!("something else");
        assert_eq!(exit_code(&err), 1);
    }

    #[test]
    fn test_sentinel_detection() {
        let err = anyhow::Error::from(Error::NoNodes).context("starting nodes");
        assert!(is_no_nodes(&err));
        assert!(!is_registry_not_found(&err));

        let err = anyhow::Error::from(Error::RegistryNotFound);
        assert!(is_registry_not_found(&err));
    }
}
