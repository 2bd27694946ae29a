//! Reconciliation between object keys and indexed paths.
//!
//! A directory move or removal interrupted between its object-store phase
//! and its index rewrite leaves the two stores describing different trees.
//! Reconciliation treats the object store as authoritative: every path its
//! keys imply (files, marker directories and their implicit ancestors) gets a
//! record, and every record with no backing object is pruned together with
//! the grants at exactly that path.

use super::error::{Scope, ServiceResult};
use super::registry::{RepositoryRegistry, require_admin};
use crate::metrics::{self, timed};
use depot_core::{LogicalPath, ObjectKey, Role};
use serde::Serialize;
use std::collections::BTreeSet;
use tracing::{info, instrument, warn};

/// Differences found, and repaired unless `dry_run` was set.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct ReconcileReport {
    pub repository: String,
    pub dry_run: bool,
    /// Paths present in the object store but missing from the index.
    pub indexed: Vec<String>,
    /// Indexed paths with no backing object.
    pub pruned: Vec<String>,
}

impl RepositoryRegistry {
    pub async fn reconcile(
        &self,
        role: &Role,
        name: &str,
        dry_run: bool,
    ) -> ServiceResult<ReconcileReport> {
        timed("reconcile", self.reconcile_repository(role, name, dry_run)).await
    }

    #[instrument(skip_all, fields(role = %role.title, repository = name, dry_run))]
    async fn reconcile_repository(
        &self,
        role: &Role,
        name: &str,
        dry_run: bool,
    ) -> ServiceResult<ReconcileReport> {
        let scope = Scope::new("reconcile", name, "");
        require_admin(role, scope)?;
        let repo = self.lookup(scope).await?;

        let keys = self
            .gateway
            .list_keys(&self.gateway.dir_key(name, &LogicalPath::root()))
            .await
            .map_err(|e| scope.storage(e))?;
        let stored = implied_paths(self.gateway.namespace(), name, keys.iter().map(ObjectKey::as_str));

        let indexed: BTreeSet<String> = self
            .metadata
            .list_paths(repo.repository_id)
            .await
            .map_err(|e| scope.index(e))?
            .into_iter()
            .map(|row| row.path)
            .filter(|path| path != name)
            .collect();

        let report = ReconcileReport {
            repository: name.to_string(),
            dry_run,
            indexed: stored.difference(&indexed).cloned().collect(),
            pruned: indexed.difference(&stored).cloned().collect(),
        };

        if !dry_run {
            for path in &report.indexed {
                self.metadata
                    .ensure_path(repo.repository_id, path)
                    .await
                    .map_err(|e| Scope::new("reconcile", name, path).index(e))?;
            }
            for path in &report.pruned {
                self.metadata
                    .delete_file_records(repo.repository_id, path)
                    .await
                    .map_err(|e| Scope::new("reconcile", name, path).index(e))?;
            }
            metrics::RECONCILE_CHANGES
                .with_label_values(&["indexed"])
                .inc_by(report.indexed.len() as u64);
            metrics::RECONCILE_CHANGES
                .with_label_values(&["pruned"])
                .inc_by(report.pruned.len() as u64);
        }

        info!(
            indexed = report.indexed.len(),
            pruned = report.pruned.len(),
            "Reconciliation finished"
        );
        Ok(report)
    }
}

/// Logical paths implied by a repository's object keys.
fn implied_paths<'a>(
    namespace: &str,
    repository: &str,
    keys: impl Iterator<Item = &'a str>,
) -> BTreeSet<String> {
    let mut paths = BTreeSet::new();
    for key in keys {
        let Some((repo, rest)) = ObjectKey::split(namespace, key) else {
            continue;
        };
        if repo != repository || rest.is_empty() {
            continue;
        }
        match LogicalPath::parse(rest) {
            Ok(path) => paths.extend(path.ancestors().map(str::to_string)),
            Err(e) => warn!(key, error = %e, "Skipping key that is not a valid logical path"),
        }
    }
    paths
}
