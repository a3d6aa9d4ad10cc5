//! Kubeconfig lifecycle
//!
//! `create` merges the new cluster's context into the user's kubeconfig and
//! makes it current; `destroy` removes the entries and repoints
//! current-context. Writes are whole-file replacements with 0600
//! permissions.

use std::path::Path;

use anyhow::{Context, Result};
use kube::config::Kubeconfig;

/// Merge `new_config` (a distribution-generated kubeconfig) into the file
/// at `path`, replacing same-named entries, and switch current-context to
/// the merged config's context.
pub async fn merge_into(path: &Path, new_config: &str) -> Result<()> {
    let new: Kubeconfig =
        serde_yml::from_str(new_config).context("failed to parse generated kubeconfig")?;

    let mut existing = if path.exists() {
        Kubeconfig::read_from(path)
            .with_context(|| format!("failed to read {}", path.display()))?
    } else {
        Kubeconfig::default()
    };

    let cluster_names: Vec<_> = new.clusters.iter().map(|c| c.name.clone()).collect();
    let context_names: Vec<_> = new.contexts.iter().map(|c| c.name.clone()).collect();
    let user_names: Vec<_> = new.auth_infos.iter().map(|a| a.name.clone()).collect();

    existing.clusters.retain(|c| !cluster_names.contains(&c.name));
    existing.contexts.retain(|c| !context_names.contains(&c.name));
    existing.auth_infos.retain(|a| !user_names.contains(&a.name));

    existing.clusters.extend(new.clusters);
    existing.contexts.extend(new.contexts);
    existing.auth_infos.extend(new.auth_infos);
    if let Some(current) = new.current_context {
        existing.current_context = Some(current);
    }

    write_kubeconfig(path, &existing).await
}

/// Remove a cluster's entries; current-context falls back to the first
/// remaining context.
pub async fn remove_entries(
    path: &Path,
    cluster_name: &str,
    context_name: &str,
    user_name: &str,
) -> Result<()> {
    if !path.exists() {
        return Ok(());
    }

    let mut kubeconfig = Kubeconfig::read_from(path)
        .with_context(|| format!("failed to read {}", path.display()))?;

    kubeconfig.clusters.retain(|c| c.name != cluster_name);
    kubeconfig.contexts.retain(|c| c.name != context_name);
    kubeconfig.auth_infos.retain(|a| a.name != user_name);

    if kubeconfig.current_context.as_deref() == Some(context_name) {
        kubeconfig.current_context = kubeconfig.contexts.first().map(|c| c.name.clone());
    }

    write_kubeconfig(path, &kubeconfig).await
}

async fn write_kubeconfig(path: &Path, kubeconfig: &Kubeconfig) -> Result<()> {
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }
    let content = serde_yml::to_string(kubeconfig)?;
    tokio::fs::write(path, content)
        .await
        .with_context(|| format!("failed to write {}", path.display()))?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        let perms = std::fs::Permissions::from_mode(0o600);
        std::fs::set_permissions(path, perms)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample(name: &str, context: &str) -> String {
        format!(
            r#"apiVersion: v1
kind: Config
clusters:
- name: {name}
  cluster:
    server: https://127.0.0.1:6443
contexts:
- name: {context}
  context:
    cluster: {name}
    user: {name}-admin
users:
- name: {name}-admin
  user: {{}}
current-context: {context}
"#
        )
    }

    #[tokio::test]
    async fn test_merge_then_remove_round_trip() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("config");

        merge_into(&path, &sample("kind-kind", "kind-kind")).await.expect("merge");
        merge_into(&path, &sample("k3d-dev", "k3d-dev")).await.expect("merge");

        let merged = Kubeconfig::read_from(&path).expect("read");
        assert_eq!(merged.clusters.len(), 2);
        assert_eq!(merged.current_context.as_deref(), Some("k3d-dev"));

        remove_entries(&path, "k3d-dev", "k3d-dev", "k3d-dev-admin")
            .await
            .expect("remove");
        let remaining = Kubeconfig::read_from(&path).expect("read");
        assert_eq!(remaining.clusters.len(), 1);
        assert_eq!(remaining.current_context.as_deref(), Some("kind-kind"));
    }

    #[tokio::test]
    async fn test_merge_replaces_same_named_entries() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("config");

        merge_into(&path, &sample("kind-kind", "kind-kind")).await.expect("merge");
        merge_into(&path, &sample("kind-kind", "kind-kind")).await.expect("merge");

        let merged = Kubeconfig::read_from(&path).expect("read");
        assert_eq!(merged.clusters.len(), 1);
        assert_eq!(merged.contexts.len(), 1);
    }

    #[tokio::test]
    async fn test_remove_on_missing_file_is_noop() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("config");
        remove_entries(&path, "x", "x", "x").await.expect("noop");
        assert!(!path.exists());
    }
}
