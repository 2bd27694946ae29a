//! Metadata store trait and the SQLite implementation.

use crate::error::{MetadataError, MetadataResult};
use crate::repos::{BootstrapRepo, GrantRepo, PathRepo, RepositoryRepo, RoleRepo, TokenRepo};
use async_trait::async_trait;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::{Pool, Sqlite};
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

/// Combined metadata store trait.
#[async_trait]
pub trait MetadataStore:
    RepositoryRepo + PathRepo + GrantRepo + RoleRepo + TokenRepo + BootstrapRepo + Send + Sync
{
    /// Run database migrations.
    async fn migrate(&self) -> MetadataResult<()>;

    /// Check database connectivity and health.
    async fn health_check(&self) -> MetadataResult<()>;
}

/// SQLite-based metadata store.
pub struct SqliteStore {
    pool: Pool<Sqlite>,
}

impl SqliteStore {
    /// Open (creating if needed) a database file and apply the schema.
    ///
    /// `busy_timeout_secs` bounds how long a statement waits on a locked
    /// database.
    pub async fn new(path: impl AsRef<Path>, busy_timeout_secs: Option<u64>) -> MetadataResult<Self> {
        let path = path.as_ref();
        let busy_timeout_secs = busy_timeout_secs.unwrap_or(30);

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let opts = SqliteConnectOptions::from_str(&format!("sqlite:{}?mode=rwc", path.display()))?
            .create_if_missing(true)
            .journal_mode(sqlx::sqlite::SqliteJournalMode::Wal)
            .synchronous(sqlx::sqlite::SqliteSynchronous::Normal)
            .foreign_keys(true)
            .busy_timeout(Duration::from_secs(busy_timeout_secs));

        // One connection: transactions hold it for their whole duration, so
        // nothing inside a transaction may go back to the pool.
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(opts)
            .await?;

        let store = Self { pool };
        store.migrate().await?;

        tracing::debug!(path = %path.display(), "SQLite metadata store ready");
        Ok(store)
    }

    /// Get a reference to the connection pool.
    pub fn pool(&self) -> &Pool<Sqlite> {
        &self.pool
    }
}

#[async_trait]
impl MetadataStore for SqliteStore {
    async fn migrate(&self) -> MetadataResult<()> {
        sqlx::query(SCHEMA_SQL).execute(&self.pool).await?;
        Ok(())
    }

    async fn health_check(&self) -> MetadataResult<()> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }
}

mod sqlite_impl {
    use super::*;
    use crate::models::*;
    use time::OffsetDateTime;
    use uuid::Uuid;

    #[async_trait]
    impl RepositoryRepo for SqliteStore {
        async fn create_repository(&self, repository: &RepositoryRow) -> MetadataResult<()> {
            let mut tx = self.pool.begin().await?;

            sqlx::query("INSERT INTO repositories (repository_id, name, created_at) VALUES (?, ?, ?)")
                .bind(repository.repository_id)
                .bind(&repository.name)
                .bind(repository.created_at)
                .execute(&mut *tx)
                .await
                .map_err(|e| {
                    MetadataError::on_write(e, || {
                        format!("repository '{}' already exists", repository.name)
                    })
                })?;

            sqlx::query(
                "INSERT INTO repository_paths (repository_id, path, created_at) VALUES (?, ?, ?)",
            )
            .bind(repository.repository_id)
            .bind(&repository.name)
            .bind(repository.created_at)
            .execute(&mut *tx)
            .await?;

            tx.commit().await?;
            Ok(())
        }

        async fn get_repository(
            &self,
            repository_id: Uuid,
        ) -> MetadataResult<Option<RepositoryRow>> {
            let row = sqlx::query_as::<_, RepositoryRow>(
                "SELECT * FROM repositories WHERE repository_id = ?",
            )
            .bind(repository_id)
            .fetch_optional(&self.pool)
            .await?;
            Ok(row)
        }

        async fn get_repository_by_name(&self, name: &str) -> MetadataResult<Option<RepositoryRow>> {
            let row = sqlx::query_as::<_, RepositoryRow>("SELECT * FROM repositories WHERE name = ?")
                .bind(name)
                .fetch_optional(&self.pool)
                .await?;
            Ok(row)
        }

        async fn list_repositories(&self) -> MetadataResult<Vec<RepositoryRow>> {
            let rows = sqlx::query_as::<_, RepositoryRow>("SELECT * FROM repositories ORDER BY name")
                .fetch_all(&self.pool)
                .await?;
            Ok(rows)
        }
    }

    #[async_trait]
    impl PathRepo for SqliteStore {
        async fn insert_path(&self, repository_id: Uuid, path: &str) -> MetadataResult<PathRow> {
            let row = sqlx::query_as::<_, PathRow>(
                r#"
                INSERT INTO repository_paths (repository_id, path, created_at)
                VALUES (?, ?, ?)
                RETURNING *
                "#,
            )
            .bind(repository_id)
            .bind(path)
            .bind(OffsetDateTime::now_utc())
            .fetch_one(&self.pool)
            .await
            .map_err(|e| MetadataError::on_write(e, || format!("path '{path}' already indexed")))?;
            Ok(row)
        }

        async fn ensure_path(&self, repository_id: Uuid, path: &str) -> MetadataResult<bool> {
            let result = sqlx::query(
                r#"
                INSERT INTO repository_paths (repository_id, path, created_at)
                VALUES (?, ?, ?)
                ON CONFLICT(repository_id, path) DO NOTHING
                "#,
            )
            .bind(repository_id)
            .bind(path)
            .bind(OffsetDateTime::now_utc())
            .execute(&self.pool)
            .await?;
            Ok(result.rows_affected() > 0)
        }

        async fn get_path(&self, repository_id: Uuid, path: &str) -> MetadataResult<Option<PathRow>> {
            let row = sqlx::query_as::<_, PathRow>(
                "SELECT * FROM repository_paths WHERE repository_id = ? AND path = ?",
            )
            .bind(repository_id)
            .bind(path)
            .fetch_optional(&self.pool)
            .await?;
            Ok(row)
        }

        async fn list_paths(&self, repository_id: Uuid) -> MetadataResult<Vec<PathRow>> {
            let rows = sqlx::query_as::<_, PathRow>(
                "SELECT * FROM repository_paths WHERE repository_id = ? ORDER BY path",
            )
            .bind(repository_id)
            .fetch_all(&self.pool)
            .await?;
            Ok(rows)
        }

        async fn delete_file_records(
            &self,
            repository_id: Uuid,
            path: &str,
        ) -> MetadataResult<RecordChanges> {
            let mut tx = self.pool.begin().await?;

            let paths = sqlx::query("DELETE FROM repository_paths WHERE repository_id = ? AND path = ?")
                .bind(repository_id)
                .bind(path)
                .execute(&mut *tx)
                .await?
                .rows_affected();
            let grants =
                sqlx::query("DELETE FROM permission_grants WHERE repository_id = ? AND path = ?")
                    .bind(repository_id)
                    .bind(path)
                    .execute(&mut *tx)
                    .await?
                    .rows_affected();

            tx.commit().await?;
            Ok(RecordChanges { paths, grants })
        }

        async fn rename_file_records(
            &self,
            repository_id: Uuid,
            old_path: &str,
            new_path: &str,
        ) -> MetadataResult<RecordChanges> {
            let mut tx = self.pool.begin().await?;

            let path_id: Option<i64> = sqlx::query_scalar(
                "SELECT path_id FROM repository_paths WHERE repository_id = ? AND path = ?",
            )
            .bind(repository_id)
            .bind(old_path)
            .fetch_optional(&mut *tx)
            .await?;
            let Some(path_id) = path_id else {
                return Err(MetadataError::NotFound(format!("path '{old_path}' not indexed")));
            };

            let conflict = || format!("path '{new_path}' already indexed");
            sqlx::query("UPDATE repository_paths SET path = ? WHERE path_id = ?")
                .bind(new_path)
                .bind(path_id)
                .execute(&mut *tx)
                .await
                .map_err(|e| MetadataError::on_write(e, conflict))?;
            let grants = sqlx::query(
                "UPDATE permission_grants SET path = ?, updated_at = ? WHERE repository_id = ? AND path = ?",
            )
            .bind(new_path)
            .bind(OffsetDateTime::now_utc())
            .bind(repository_id)
            .bind(old_path)
            .execute(&mut *tx)
            .await
            .map_err(|e| MetadataError::on_write(e, conflict))?
            .rows_affected();

            tx.commit().await?;
            Ok(RecordChanges { paths: 1, grants })
        }

        async fn rewrite_prefix(
            &self,
            repository_id: Uuid,
            old_prefix: &str,
            new_prefix: &str,
        ) -> MetadataResult<RecordChanges> {
            let mut tx = self.pool.begin().await?;
            let conflict = || format!("paths under '{new_prefix}' already indexed");

            let paths = sqlx::query(
                r#"
                UPDATE repository_paths
                SET path = ?3 || substr(path, length(?2) + 1)
                WHERE repository_id = ?1
                  AND (path = ?2 OR substr(path, 1, length(?2) + 1) = ?2 || '/')
                "#,
            )
            .bind(repository_id)
            .bind(old_prefix)
            .bind(new_prefix)
            .execute(&mut *tx)
            .await
            .map_err(|e| MetadataError::on_write(e, conflict))?
            .rows_affected();

            let grants = sqlx::query(
                r#"
                UPDATE permission_grants
                SET path = ?3 || substr(path, length(?2) + 1), updated_at = ?4
                WHERE repository_id = ?1
                  AND (path = ?2 OR substr(path, 1, length(?2) + 1) = ?2 || '/')
                "#,
            )
            .bind(repository_id)
            .bind(old_prefix)
            .bind(new_prefix)
            .bind(OffsetDateTime::now_utc())
            .execute(&mut *tx)
            .await
            .map_err(|e| MetadataError::on_write(e, conflict))?
            .rows_affected();

            tx.commit().await?;
            Ok(RecordChanges { paths, grants })
        }

        async fn delete_prefix(
            &self,
            repository_id: Uuid,
            prefix: &str,
        ) -> MetadataResult<RecordChanges> {
            let mut tx = self.pool.begin().await?;

            let paths = sqlx::query(
                r#"
                DELETE FROM repository_paths
                WHERE repository_id = ?1
                  AND (path = ?2 OR substr(path, 1, length(?2) + 1) = ?2 || '/')
                "#,
            )
            .bind(repository_id)
            .bind(prefix)
            .execute(&mut *tx)
            .await?
            .rows_affected();

            let grants = sqlx::query(
                r#"
                DELETE FROM permission_grants
                WHERE repository_id = ?1
                  AND (path = ?2 OR substr(path, 1, length(?2) + 1) = ?2 || '/')
                "#,
            )
            .bind(repository_id)
            .bind(prefix)
            .execute(&mut *tx)
            .await?
            .rows_affected();

            tx.commit().await?;
            Ok(RecordChanges { paths, grants })
        }
    }

    #[async_trait]
    impl GrantRepo for SqliteStore {
        async fn find_grant(
            &self,
            repository_id: Uuid,
            role_title: &str,
            path: &str,
        ) -> MetadataResult<Option<GrantRow>> {
            let row = sqlx::query_as::<_, GrantRow>(
                "SELECT * FROM permission_grants WHERE repository_id = ? AND role_title = ? AND path = ?",
            )
            .bind(repository_id)
            .bind(role_title)
            .bind(path)
            .fetch_optional(&self.pool)
            .await?;
            Ok(row)
        }

        async fn list_grants(&self, repository_id: Uuid) -> MetadataResult<Vec<GrantRow>> {
            let rows = sqlx::query_as::<_, GrantRow>(
                "SELECT * FROM permission_grants WHERE repository_id = ? ORDER BY path, role_title",
            )
            .bind(repository_id)
            .fetch_all(&self.pool)
            .await?;
            Ok(rows)
        }

        async fn create_grant(&self, grant: &NewGrant) -> MetadataResult<GrantRow> {
            let now = OffsetDateTime::now_utc();
            let row = sqlx::query_as::<_, GrantRow>(
                r#"
                INSERT INTO permission_grants
                    (repository_id, role_title, path, permission, created_at, updated_at)
                VALUES (?, ?, ?, ?, ?, ?)
                RETURNING *
                "#,
            )
            .bind(grant.repository_id)
            .bind(&grant.role_title)
            .bind(&grant.path)
            .bind(grant.capability.encode())
            .bind(now)
            .bind(now)
            .fetch_one(&self.pool)
            .await
            .map_err(|e| {
                MetadataError::on_write(e, || {
                    format!(
                        "role '{}' already has a grant at '{}'",
                        grant.role_title, grant.path
                    )
                })
            })?;
            Ok(row)
        }

        async fn update_grant(&self, grant_id: i64, grant: &NewGrant) -> MetadataResult<GrantRow> {
            let row = sqlx::query_as::<_, GrantRow>(
                r#"
                UPDATE permission_grants
                SET role_title = ?, path = ?, permission = ?, updated_at = ?
                WHERE grant_id = ? AND repository_id = ?
                RETURNING *
                "#,
            )
            .bind(&grant.role_title)
            .bind(&grant.path)
            .bind(grant.capability.encode())
            .bind(OffsetDateTime::now_utc())
            .bind(grant_id)
            .bind(grant.repository_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| {
                MetadataError::on_write(e, || {
                    format!(
                        "role '{}' already has a grant at '{}'",
                        grant.role_title, grant.path
                    )
                })
            })?;
            row.ok_or_else(|| MetadataError::NotFound(format!("grant {grant_id} not found")))
        }

        async fn delete_grant(&self, repository_id: Uuid, grant_id: i64) -> MetadataResult<()> {
            let result =
                sqlx::query("DELETE FROM permission_grants WHERE grant_id = ? AND repository_id = ?")
                    .bind(grant_id)
                    .bind(repository_id)
                    .execute(&self.pool)
                    .await?;
            if result.rows_affected() == 0 {
                return Err(MetadataError::NotFound(format!("grant {grant_id} not found")));
            }
            Ok(())
        }
    }

    #[async_trait]
    impl RoleRepo for SqliteStore {
        async fn create_role(&self, role: &RoleRow) -> MetadataResult<()> {
            sqlx::query("INSERT INTO roles (role_id, title, created_at) VALUES (?, ?, ?)")
                .bind(role.role_id)
                .bind(&role.title)
                .bind(role.created_at)
                .execute(&self.pool)
                .await
                .map_err(|e| {
                    MetadataError::on_write(e, || format!("role '{}' already exists", role.title))
                })?;
            Ok(())
        }

        async fn get_role(&self, role_id: Uuid) -> MetadataResult<Option<RoleRow>> {
            let row = sqlx::query_as::<_, RoleRow>("SELECT * FROM roles WHERE role_id = ?")
                .bind(role_id)
                .fetch_optional(&self.pool)
                .await?;
            Ok(row)
        }

        async fn get_role_by_title(&self, title: &str) -> MetadataResult<Option<RoleRow>> {
            let row = sqlx::query_as::<_, RoleRow>("SELECT * FROM roles WHERE title = ?")
                .bind(title)
                .fetch_optional(&self.pool)
                .await?;
            Ok(row)
        }

        async fn list_roles(&self) -> MetadataResult<Vec<RoleRow>> {
            let rows = sqlx::query_as::<_, RoleRow>("SELECT * FROM roles ORDER BY title")
                .fetch_all(&self.pool)
                .await?;
            Ok(rows)
        }
    }

    #[async_trait]
    impl TokenRepo for SqliteStore {
        async fn create_token(&self, token: &TokenRow) -> MetadataResult<()> {
            sqlx::query(
                r#"
                INSERT INTO tokens (
                    token_id, role_id, token_hash, description,
                    created_at, revoked_at, last_used_at
                ) VALUES (?, ?, ?, ?, ?, ?, ?)
                "#,
            )
            .bind(token.token_id)
            .bind(token.role_id)
            .bind(&token.token_hash)
            .bind(&token.description)
            .bind(token.created_at)
            .bind(token.revoked_at)
            .bind(token.last_used_at)
            .execute(&self.pool)
            .await
            .map_err(|e| MetadataError::on_write(e, || "token hash already registered".to_string()))?;
            Ok(())
        }

        async fn get_token_by_hash(&self, token_hash: &str) -> MetadataResult<Option<TokenRow>> {
            let row = sqlx::query_as::<_, TokenRow>("SELECT * FROM tokens WHERE token_hash = ?")
                .bind(token_hash)
                .fetch_optional(&self.pool)
                .await?;
            Ok(row)
        }

        async fn get_token(&self, token_id: Uuid) -> MetadataResult<Option<TokenRow>> {
            let row = sqlx::query_as::<_, TokenRow>("SELECT * FROM tokens WHERE token_id = ?")
                .bind(token_id)
                .fetch_optional(&self.pool)
                .await?;
            Ok(row)
        }

        async fn touch_token(&self, token_id: Uuid, used_at: OffsetDateTime) -> MetadataResult<()> {
            sqlx::query("UPDATE tokens SET last_used_at = ? WHERE token_id = ?")
                .bind(used_at)
                .bind(token_id)
                .execute(&self.pool)
                .await?;
            Ok(())
        }

        async fn revoke_token(
            &self,
            token_id: Uuid,
            revoked_at: OffsetDateTime,
        ) -> MetadataResult<()> {
            let result = sqlx::query(
                "UPDATE tokens SET revoked_at = COALESCE(revoked_at, ?) WHERE token_id = ?",
            )
            .bind(revoked_at)
            .bind(token_id)
            .execute(&self.pool)
            .await?;
            if result.rows_affected() == 0 {
                return Err(MetadataError::NotFound(format!("token {token_id} not found")));
            }
            Ok(())
        }

        async fn list_tokens(&self, role_id: Option<Uuid>) -> MetadataResult<Vec<TokenRow>> {
            let rows = match role_id {
                Some(id) => {
                    sqlx::query_as::<_, TokenRow>(
                        "SELECT * FROM tokens WHERE role_id = ? ORDER BY created_at DESC",
                    )
                    .bind(id)
                    .fetch_all(&self.pool)
                    .await?
                }
                None => {
                    sqlx::query_as::<_, TokenRow>("SELECT * FROM tokens ORDER BY created_at DESC")
                        .fetch_all(&self.pool)
                        .await?
                }
            };
            Ok(rows)
        }
    }

    #[async_trait]
    impl BootstrapRepo for SqliteStore {
        async fn get_state(&self, key: &str) -> MetadataResult<Option<String>> {
            let value: Option<Option<String>> =
                sqlx::query_scalar("SELECT value FROM bootstrap_state WHERE key = ?")
                    .bind(key)
                    .fetch_optional(&self.pool)
                    .await?;
            Ok(value.flatten())
        }

        async fn set_state(&self, key: &str, value: &str) -> MetadataResult<()> {
            sqlx::query(
                r#"
                INSERT INTO bootstrap_state (key, value)
                VALUES (?, ?)
                ON CONFLICT(key) DO UPDATE
                SET value = excluded.value
                "#,
            )
            .bind(key)
            .bind(value)
            .execute(&self.pool)
            .await?;
            Ok(())
        }

        async fn clear_state(&self, key: &str) -> MetadataResult<()> {
            sqlx::query("DELETE FROM bootstrap_state WHERE key = ?")
                .bind(key)
                .execute(&self.pool)
                .await?;
            Ok(())
        }
    }
}

/// SQLite schema.
const SCHEMA_SQL: &str = r#"
-- Repositories share one physical schema, partitioned by repository_id.
CREATE TABLE IF NOT EXISTS repositories (
    repository_id BLOB PRIMARY KEY,
    name TEXT NOT NULL UNIQUE,
    created_at TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS repository_paths (
    path_id INTEGER PRIMARY KEY AUTOINCREMENT,
    repository_id BLOB NOT NULL REFERENCES repositories(repository_id) ON DELETE CASCADE,
    path TEXT NOT NULL,
    created_at TEXT NOT NULL,
    UNIQUE (repository_id, path)
);

CREATE TABLE IF NOT EXISTS permission_grants (
    grant_id INTEGER PRIMARY KEY AUTOINCREMENT,
    repository_id BLOB NOT NULL REFERENCES repositories(repository_id) ON DELETE CASCADE,
    role_title TEXT NOT NULL,
    path TEXT NOT NULL,
    permission TEXT NOT NULL CHECK (length(permission) = 3),
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL,
    UNIQUE (repository_id, role_title, path)
);
CREATE INDEX IF NOT EXISTS idx_permission_grants_role
    ON permission_grants(repository_id, role_title);

CREATE TABLE IF NOT EXISTS roles (
    role_id BLOB PRIMARY KEY,
    title TEXT NOT NULL UNIQUE,
    created_at TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS tokens (
    token_id BLOB PRIMARY KEY,
    role_id BLOB NOT NULL REFERENCES roles(role_id) ON DELETE CASCADE,
    token_hash TEXT NOT NULL UNIQUE,
    description TEXT,
    created_at TEXT NOT NULL,
    revoked_at TEXT,
    last_used_at TEXT
);
CREATE INDEX IF NOT EXISTS idx_tokens_role ON tokens(role_id);

CREATE TABLE IF NOT EXISTS bootstrap_state (
    key TEXT PRIMARY KEY,
    value TEXT
);
"#;
