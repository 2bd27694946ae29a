//! Path mutation coordinator.
//!
//! Every operation resolves the caller's capability first and runs all
//! existence checks before touching either store. The object-store phase
//! runs next, one bounded call at a time; the path index is rewritten only
//! after that phase fully succeeded, inside a single local transaction.
//!
//! There is no transaction spanning both stores. A failure after some objects
//! were moved or deleted leaves the index describing the old layout; the
//! reconciliation pass recomputes the difference.

use super::error::{Scope, ServiceError, ServiceResult};
use super::resolver::PermissionResolver;
use crate::metrics::{self, timed};
use bytes::Bytes;
use depot_core::{
    Access, DirNode, LogicalPath, MAX_TREE_DEPTH, ObjectKey, RepoPath, Role, build_tree,
};
use depot_metadata::{MetadataStore, RecordChanges, RepositoryRow};
use depot_storage::{ByteStream, ObjectGateway, ObjectMeta};
use futures::StreamExt;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info, instrument, warn};

/// Result of a directory rename, move or removal.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
pub struct DirectoryChanges {
    /// Objects moved or deleted in the object store.
    pub objects: u64,
    /// Path records rewritten or deleted.
    pub paths: u64,
    /// Grants rewritten or deleted.
    pub grants: u64,
}

impl DirectoryChanges {
    fn new(objects: u64, records: RecordChanges) -> Self {
        Self {
            objects,
            paths: records.paths,
            grants: records.grants,
        }
    }
}

/// Replace spaces with `_` and reject names that could escape their
/// directory.
pub fn sanitize_file_name(name: &str) -> ServiceResult<String> {
    if name.is_empty()
        || name.contains('/')
        || name.contains("..")
        || name.chars().any(char::is_control)
    {
        return Err(ServiceError::BadRequest(format!(
            "invalid file name {name:?}"
        )));
    }
    Ok(name.replace(' ', "_"))
}

/// Coordinates file and directory operations across the object store and the
/// path index.
#[derive(Clone)]
pub struct FileService {
    gateway: ObjectGateway,
    metadata: Arc<dyn MetadataStore>,
    resolver: PermissionResolver<dyn MetadataStore>,
}

impl FileService {
    pub fn new(gateway: ObjectGateway, metadata: Arc<dyn MetadataStore>) -> Self {
        Self {
            resolver: PermissionResolver::new(Arc::clone(&metadata)),
            gateway,
            metadata,
        }
    }

    pub fn resolver(&self) -> &PermissionResolver<dyn MetadataStore> {
        &self.resolver
    }

    // =========================================================================
    // Files
    // =========================================================================

    /// Store a file under `dir`, replacing any file already at that path.
    ///
    /// The whole upload, lookups included, runs under the operation timeout.
    pub async fn upload_file(
        &self,
        role: &Role,
        dir: &RepoPath,
        file_name: &str,
        data: Bytes,
    ) -> ServiceResult<RepoPath> {
        let deadline = self.gateway.timeout();
        let bounded = async {
            tokio::time::timeout(deadline, self.put_file(role, dir, file_name, data))
                .await
                .map_err(|_| ServiceError::Timeout {
                    operation: "upload_file",
                    secs: deadline.as_secs(),
                })?
        };
        timed("upload_file", bounded).await
    }

    /// Check that `role` may write `file_name` into `dir`, without storing
    /// anything. Lets callers refuse a part before reading its body.
    pub async fn authorize_upload(
        &self,
        role: &Role,
        dir: &RepoPath,
        file_name: &str,
    ) -> ServiceResult<()> {
        timed("authorize_upload", async {
            self.upload_target(role, dir, file_name).await.map(|_| ())
        })
        .await
    }

    /// Target path of an upload, after the repository lookup and the write
    /// check.
    async fn upload_target(
        &self,
        role: &Role,
        dir: &RepoPath,
        file_name: &str,
    ) -> ServiceResult<(RepositoryRow, RepoPath)> {
        let name = sanitize_file_name(file_name)?;
        let target = RepoPath::new(dir.repository(), dir.path().join(&name)?)?;
        let repo_name = target.repository();
        let path = target.path();
        let scope = Scope::new("upload_file", repo_name, path.as_str());

        if path.top_segment() == Some(repo_name) {
            return Err(ServiceError::BadRequest(format!(
                "top-level entry may not reuse the repository name {repo_name:?}"
            )));
        }

        let repo = self.repository(role, scope).await?;
        self.authorize(role, &repo, path, Access::Write, scope)
            .await?;
        Ok((repo, target))
    }

    #[instrument(skip_all, fields(role = %role.title, dir = %dir, size = data.len()))]
    async fn put_file(
        &self,
        role: &Role,
        dir: &RepoPath,
        file_name: &str,
        data: Bytes,
    ) -> ServiceResult<RepoPath> {
        let (repo, target) = self.upload_target(role, dir, file_name).await?;
        let repo_name = target.repository();
        let path = target.path();
        let scope = Scope::new("upload_file", repo_name, path.as_str());

        self.require_parent_directory(&repo, dir.path(), &target, scope)
            .await?;
        let marker = self.gateway.dir_key(repo_name, path);
        if self
            .gateway
            .exists(&marker)
            .await
            .map_err(|e| scope.storage(e))?
        {
            return Err(ServiceError::Conflict(format!("{target} is a directory")));
        }

        let size = data.len() as u64;
        self.gateway
            .put(&self.gateway.file_key(repo_name, path), data)
            .await
            .map_err(|e| scope.storage(e))?;
        self.metadata
            .ensure_path(repo.repository_id, path.as_str())
            .await
            .map_err(|e| scope.index(e))?;

        metrics::BYTES_UPLOADED.inc_by(size);
        info!(path = %target, size, "File uploaded");
        Ok(target)
    }

    /// Delete a file and its path record, along with grants at that path.
    pub async fn remove_file(&self, role: &Role, target: &RepoPath) -> ServiceResult<RecordChanges> {
        timed("remove_file", self.delete_file(role, target)).await
    }

    #[instrument(skip_all, fields(role = %role.title, path = %target))]
    async fn delete_file(&self, role: &Role, target: &RepoPath) -> ServiceResult<RecordChanges> {
        let (repo_name, path) = (target.repository(), target.path());
        let scope = Scope::new("remove_file", repo_name, path.as_str());
        require_inner_path(path, scope)?;

        let repo = self.repository(role, scope).await?;
        self.authorize(role, &repo, path, Access::Write, scope)
            .await?;

        let key = self.gateway.file_key(repo_name, path);
        if !self
            .gateway
            .exists(&key)
            .await
            .map_err(|e| scope.storage(e))?
        {
            return Err(ServiceError::NotFound(format!("file {target}")));
        }

        self.gateway
            .delete(&key)
            .await
            .map_err(|e| scope.storage(e))?;
        metrics::OBJECTS_DELETED.inc();

        let changes = self
            .metadata
            .delete_file_records(repo.repository_id, path.as_str())
            .await
            .map_err(|e| scope.index(e))?;

        info!(
            paths = changes.paths,
            grants = changes.grants,
            "File removed"
        );
        Ok(changes)
    }

    pub async fn rename_file(
        &self,
        role: &Role,
        old: &RepoPath,
        new: &RepoPath,
    ) -> ServiceResult<RecordChanges> {
        timed("rename_file", self.relocate_file("rename_file", role, old, new)).await
    }

    pub async fn move_file(
        &self,
        role: &Role,
        src: &RepoPath,
        dst: &RepoPath,
    ) -> ServiceResult<RecordChanges> {
        timed("move_file", self.relocate_file("move_file", role, src, dst)).await
    }

    #[instrument(skip_all, fields(operation = operation, role = %role.title, src = %src, dst = %dst))]
    async fn relocate_file(
        &self,
        operation: &'static str,
        role: &Role,
        src: &RepoPath,
        dst: &RepoPath,
    ) -> ServiceResult<RecordChanges> {
        let repo_name = same_repository(src, dst)?;
        let src_scope = Scope::new(operation, repo_name, src.path().as_str());
        let dst_scope = Scope::new(operation, repo_name, dst.path().as_str());
        require_inner_path(src.path(), src_scope)?;
        require_inner_path(dst.path(), dst_scope)?;

        let repo = self.repository(role, src_scope).await?;
        self.authorize(role, &repo, src.path(), Access::Write, src_scope)
            .await?;
        self.authorize(role, &repo, dst.path(), Access::Write, dst_scope)
            .await?;

        let src_key = self.gateway.file_key(repo_name, src.path());
        let indexed = self
            .metadata
            .get_path(repo.repository_id, src.path().as_str())
            .await
            .map_err(|e| src_scope.index(e))?
            .is_some();
        if !indexed
            || !self
                .gateway
                .exists(&src_key)
                .await
                .map_err(|e| src_scope.storage(e))?
        {
            return Err(ServiceError::NotFound(format!("file {src}")));
        }
        self.require_free_destination(&repo, dst, dst_scope).await?;

        let dst_key = self.gateway.file_key(repo_name, dst.path());
        self.gateway
            .move_object(&src_key, &dst_key)
            .await
            .map_err(|e| src_scope.storage(e))?;
        metrics::OBJECTS_MOVED.inc();

        let changes = self
            .metadata
            .rename_file_records(repo.repository_id, src.path().as_str(), dst.path().as_str())
            .await
            .map_err(|e| src_scope.index(e))?;

        info!(grants = changes.grants, "File relocated");
        Ok(changes)
    }

    /// Stream a file's contents. Requires the download capability.
    pub async fn get_file(
        &self,
        role: &Role,
        target: &RepoPath,
    ) -> ServiceResult<(ObjectMeta, ByteStream)> {
        timed("get_file", self.open_file(role, target)).await
    }

    #[instrument(skip_all, fields(role = %role.title, path = %target))]
    async fn open_file(
        &self,
        role: &Role,
        target: &RepoPath,
    ) -> ServiceResult<(ObjectMeta, ByteStream)> {
        let (repo_name, path) = (target.repository(), target.path());
        let scope = Scope::new("get_file", repo_name, path.as_str());
        require_inner_path(path, scope)?;

        let repo = self.repository(role, scope).await?;
        self.authorize(role, &repo, path, Access::Download, scope)
            .await?;

        self.gateway
            .open(&self.gateway.file_key(repo_name, path))
            .await
            .map_err(|e| scope.storage(e))
    }

    // =========================================================================
    // Directories
    // =========================================================================

    /// Create an empty directory: a marker object and a path record.
    pub async fn create_directory(&self, role: &Role, dir: &RepoPath) -> ServiceResult<()> {
        timed("create_directory", self.make_directory(role, dir)).await
    }

    #[instrument(skip_all, fields(role = %role.title, dir = %dir))]
    async fn make_directory(&self, role: &Role, dir: &RepoPath) -> ServiceResult<()> {
        let (repo_name, path) = (dir.repository(), dir.path());
        let scope = Scope::new("create_directory", repo_name, path.as_str());
        require_inner_path(path, scope)?;

        let repo = self.repository(role, scope).await?;
        self.authorize(role, &repo, path, Access::List, scope)
            .await?;
        self.require_free_destination(&repo, dir, scope).await?;

        self.gateway
            .put_marker(&self.gateway.dir_key(repo_name, path))
            .await
            .map_err(|e| scope.storage(e))?;
        self.metadata
            .insert_path(repo.repository_id, path.as_str())
            .await
            .map_err(|e| scope.index(e))?;

        info!("Directory created");
        Ok(())
    }

    pub async fn rename_directory(
        &self,
        role: &Role,
        old: &RepoPath,
        new: &RepoPath,
    ) -> ServiceResult<DirectoryChanges> {
        timed(
            "rename_directory",
            self.relocate_directory("rename_directory", role, old, new),
        )
        .await
    }

    pub async fn move_directory(
        &self,
        role: &Role,
        src: &RepoPath,
        dst: &RepoPath,
    ) -> ServiceResult<DirectoryChanges> {
        timed(
            "move_directory",
            self.relocate_directory("move_directory", role, src, dst),
        )
        .await
    }

    /// Move every object under the source directory one by one, then rewrite
    /// every path record and grant under it with one anchored prefix update.
    #[instrument(skip_all, fields(operation = operation, role = %role.title, src = %src, dst = %dst))]
    async fn relocate_directory(
        &self,
        operation: &'static str,
        role: &Role,
        src: &RepoPath,
        dst: &RepoPath,
    ) -> ServiceResult<DirectoryChanges> {
        let repo_name = same_repository(src, dst)?;
        let src_scope = Scope::new(operation, repo_name, src.path().as_str());
        let dst_scope = Scope::new(operation, repo_name, dst.path().as_str());
        require_inner_path(src.path(), src_scope)?;
        require_inner_path(dst.path(), dst_scope)?;

        let repo = self.repository(role, src_scope).await?;
        self.authorize(role, &repo, src.path(), Access::Write, src_scope)
            .await?;
        self.authorize(role, &repo, dst.path(), Access::Write, dst_scope)
            .await?;

        self.require_directory(&repo, src, src_scope).await?;
        if dst.path().is_within(src.path()) {
            return Err(ServiceError::BadRequest(format!(
                "cannot move {src} into itself"
            )));
        }
        self.require_free_destination(&repo, dst, dst_scope).await?;

        let moved = self
            .gateway
            .move_prefix(
                &self.gateway.dir_key(repo_name, src.path()),
                &self.gateway.dir_key(repo_name, dst.path()),
            )
            .await
            .map_err(|e| {
                warn!(error = %e, "Directory move interrupted; index left unchanged");
                src_scope.storage(e)
            })?;
        metrics::OBJECTS_MOVED.inc_by(moved);

        let records = self
            .metadata
            .rewrite_prefix(repo.repository_id, src.path().as_str(), dst.path().as_str())
            .await
            .map_err(|e| src_scope.index(e))?;

        let changes = DirectoryChanges::new(moved, records);
        info!(
            objects = changes.objects,
            paths = changes.paths,
            grants = changes.grants,
            "Directory relocated"
        );
        Ok(changes)
    }

    /// Delete every object under a directory through the batch-delete
    /// pipeline, then every path record and grant under it.
    ///
    /// A failed batch stops the pipeline and leaves the index untouched.
    pub async fn remove_directory(
        &self,
        role: &Role,
        dir: &RepoPath,
    ) -> ServiceResult<DirectoryChanges> {
        timed("remove_directory", self.delete_directory(role, dir)).await
    }

    #[instrument(skip_all, fields(role = %role.title, dir = %dir))]
    async fn delete_directory(
        &self,
        role: &Role,
        dir: &RepoPath,
    ) -> ServiceResult<DirectoryChanges> {
        let (repo_name, path) = (dir.repository(), dir.path());
        let scope = Scope::new("remove_directory", repo_name, path.as_str());
        require_inner_path(path, scope)?;

        let repo = self.repository(role, scope).await?;
        self.authorize(role, &repo, path, Access::Write, scope)
            .await?;
        self.require_directory(&repo, dir, scope).await?;

        let summary = self
            .gateway
            .delete_prefix(&self.gateway.dir_key(repo_name, path))
            .await
            .map_err(|e| {
                warn!(error = %e, "Directory removal interrupted; index left unchanged");
                scope.storage(e)
            })?;
        metrics::OBJECTS_DELETED.inc_by(summary.deleted);
        metrics::DELETE_BATCHES.inc_by(summary.batches);

        let records = self
            .metadata
            .delete_prefix(repo.repository_id, path.as_str())
            .await
            .map_err(|e| scope.index(e))?;

        let changes = DirectoryChanges::new(summary.deleted, records);
        info!(
            objects = changes.objects,
            batches = summary.batches,
            paths = changes.paths,
            grants = changes.grants,
            "Directory removed"
        );
        Ok(changes)
    }

    // =========================================================================
    // Listing
    // =========================================================================

    /// Tree of every entry in the namespace the role may list.
    ///
    /// Each key is checked with its full path; the privileged role sees
    /// every key. The repository table is loaded once per listing.
    pub async fn list_files(&self, role: &Role) -> ServiceResult<Vec<DirNode>> {
        timed("list_files", self.scan_files(role)).await
    }

    #[instrument(skip_all, fields(role = %role.title))]
    async fn scan_files(&self, role: &Role) -> ServiceResult<Vec<DirNode>> {
        let scope = Scope::new("list_files", "*", "");
        let repositories: HashMap<String, RepositoryRow> = self
            .metadata
            .list_repositories()
            .await
            .map_err(|e| scope.index(e))?
            .into_iter()
            .map(|repo| (repo.name.clone(), repo))
            .collect();

        let mut visible = Vec::new();
        let mut scanned = 0u64;
        let mut keys = self.gateway.list_namespace();
        while let Some(key) = self
            .gateway
            .bounded("list", async { keys.next().await.transpose() })
            .await
            .map_err(|e| scope.storage(e))?
        {
            scanned += 1;
            if let Some(entry) = self.visible_entry(role, &repositories, &key).await? {
                visible.push(entry);
            }
        }

        debug!(scanned, visible = visible.len(), "Listing filtered");
        Ok(build_tree(visible)?)
    }

    async fn visible_entry(
        &self,
        role: &Role,
        repositories: &HashMap<String, RepositoryRow>,
        key: &str,
    ) -> ServiceResult<Option<String>> {
        let Some((repo_name, rest)) = ObjectKey::split(self.gateway.namespace(), key) else {
            return Ok(None);
        };
        let entry = if rest.is_empty() {
            repo_name.to_string()
        } else {
            format!("{repo_name}/{rest}")
        };
        if entry.split('/').filter(|s| !s.is_empty()).count() > MAX_TREE_DEPTH {
            warn!(key, "Skipping key nested too deep to list");
            return Ok(None);
        }
        if role.is_privileged() {
            return Ok(Some(entry));
        }

        let Some(repo) = repositories.get(repo_name) else {
            return Ok(None);
        };
        let Ok(path) = LogicalPath::parse(rest) else {
            warn!(key, "Skipping key that is not a valid logical path");
            return Ok(None);
        };

        let scope = Scope::new("list_files", repo_name, rest);
        let allowed = self
            .resolver
            .resolve(role, repo, &path, Access::List)
            .await
            .map_err(|e| scope.index(e))?;
        Ok(allowed.then_some(entry))
    }

    // =========================================================================
    // Checks
    // =========================================================================

    /// Look up the repository a request targets.
    ///
    /// An unknown repository is `NotFound` for the privileged role. Any other
    /// role cannot hold a grant in it and is denied.
    async fn repository(&self, role: &Role, scope: Scope<'_>) -> ServiceResult<RepositoryRow> {
        match self
            .metadata
            .get_repository_by_name(scope.repository)
            .await
            .map_err(|e| scope.index(e))?
        {
            Some(repo) => Ok(repo),
            None if role.is_privileged() => Err(ServiceError::NotFound(format!(
                "repository {}",
                scope.repository
            ))),
            None => Err(scope.denied()),
        }
    }

    async fn authorize(
        &self,
        role: &Role,
        repo: &RepositoryRow,
        path: &LogicalPath,
        access: Access,
        scope: Scope<'_>,
    ) -> ServiceResult<()> {
        let resolution = self
            .resolver
            .resolve_detailed(role, repo, path, access)
            .await
            .map_err(|e| scope.index(e))?;
        if resolution.allowed {
            return Ok(());
        }
        warn!(
            role = %role.title,
            operation = scope.operation,
            repository = %repo.name,
            path = %path,
            access = access.as_str(),
            matched = resolution.matched.as_deref().unwrap_or("-"),
            "Permission denied"
        );
        Err(scope.denied())
    }

    async fn is_indexed(
        &self,
        repo: &RepositoryRow,
        path: &LogicalPath,
        scope: Scope<'_>,
    ) -> ServiceResult<bool> {
        if path.is_root() {
            return Ok(true);
        }
        Ok(self
            .metadata
            .get_path(repo.repository_id, path.as_str())
            .await
            .map_err(|e| scope.index(e))?
            .is_some())
    }

    /// The destination must be unused and its parent must exist.
    async fn require_free_destination(
        &self,
        repo: &RepositoryRow,
        dst: &RepoPath,
        scope: Scope<'_>,
    ) -> ServiceResult<()> {
        let path = dst.path();
        let taken = self.is_indexed(repo, path, scope).await?
            || self
                .gateway
                .exists(&self.gateway.file_key(&repo.name, path))
                .await
                .map_err(|e| scope.storage(e))?
            || self
                .gateway
                .exists(&self.gateway.dir_key(&repo.name, path))
                .await
                .map_err(|e| scope.storage(e))?;
        if taken {
            return Err(ServiceError::Conflict(format!("{dst} already exists")));
        }

        let parent = path.parent().unwrap_or_default();
        self.require_parent_directory(repo, &parent, dst, scope)
            .await
    }

    /// `parent` must be indexed and must not be a file.
    async fn require_parent_directory(
        &self,
        repo: &RepositoryRow,
        parent: &LogicalPath,
        child: &RepoPath,
        scope: Scope<'_>,
    ) -> ServiceResult<()> {
        if !self.is_indexed(repo, parent, scope).await? {
            return Err(ServiceError::Conflict(format!(
                "parent directory of {child} does not exist"
            )));
        }
        if !parent.is_root()
            && self
                .gateway
                .exists(&self.gateway.file_key(&repo.name, parent))
                .await
                .map_err(|e| scope.storage(e))?
        {
            return Err(ServiceError::Conflict(format!(
                "parent of {child} is a file"
            )));
        }
        Ok(())
    }

    /// The path must be indexed and must not be a file.
    async fn require_directory(
        &self,
        repo: &RepositoryRow,
        dir: &RepoPath,
        scope: Scope<'_>,
    ) -> ServiceResult<()> {
        if !self.is_indexed(repo, dir.path(), scope).await? {
            return Err(ServiceError::NotFound(format!("directory {dir}")));
        }
        if self
            .gateway
            .exists(&self.gateway.file_key(&repo.name, dir.path()))
            .await
            .map_err(|e| scope.storage(e))?
        {
            return Err(ServiceError::BadRequest(format!("{dir} is a file")));
        }
        Ok(())
    }
}

fn require_inner_path(path: &LogicalPath, scope: Scope<'_>) -> ServiceResult<()> {
    if path.is_root() {
        return Err(ServiceError::BadRequest(format!(
            "{} needs a path inside repository {}",
            scope.operation, scope.repository
        )));
    }
    Ok(())
}

fn same_repository<'a>(src: &'a RepoPath, dst: &RepoPath) -> ServiceResult<&'a str> {
    if src.repository() != dst.repository() {
        return Err(ServiceError::BadRequest(format!(
            "cannot move {src} to another repository"
        )));
    }
    Ok(src.repository())
}
