//! PostgreSQL-based metadata store implementation.

use crate::error::{MetadataError, MetadataResult};
use crate::models::*;
use crate::repos::{BootstrapRepo, GrantRepo, PathRepo, RepositoryRepo, RoleRepo, TokenRepo};
use crate::store::MetadataStore;
use async_trait::async_trait;
use depot_core::config::PgSslMode;
use sqlx::postgres::{PgConnectOptions, PgPoolOptions, PgSslMode as SqlxPgSslMode};
use sqlx::{Pool, Postgres};
use std::str::FromStr;
use time::OffsetDateTime;
use uuid::Uuid;

/// PostgreSQL schema (embedded).
const POSTGRES_SCHEMA: &str = include_str!("postgres_schema.sql");

/// Split the schema into single statements; comment-only fragments are dropped.
fn postgres_schema_statements(schema: &str) -> Vec<&str> {
    schema
        .split(';')
        .filter_map(|statement| {
            let trimmed = statement.trim();
            let has_sql = trimmed.lines().any(|line| {
                let line = line.trim();
                !line.is_empty() && !line.starts_with("--")
            });
            has_sql.then_some(trimmed)
        })
        .collect()
}

/// PostgreSQL-based metadata store.
pub struct PostgresStore {
    pool: Pool<Postgres>,
}

impl PostgresStore {
    /// Connect using a full connection URL.
    pub async fn from_url(
        url: &str,
        max_connections: u32,
        statement_timeout_ms: Option<u64>,
    ) -> MetadataResult<Self> {
        let opts = PgConnectOptions::from_str(url)?;
        Self::connect(opts, max_connections, statement_timeout_ms).await
    }

    /// Connect using individual parameters, so the password can come from
    /// its own environment variable.
    #[allow(clippy::too_many_arguments)]
    pub async fn from_params(
        host: &str,
        port: u16,
        username: Option<&str>,
        password: Option<&str>,
        database: &str,
        ssl_mode: Option<PgSslMode>,
        max_connections: u32,
        statement_timeout_ms: Option<u64>,
    ) -> MetadataResult<Self> {
        let mut opts = PgConnectOptions::new()
            .host(host)
            .port(port)
            .database(database);

        if let Some(user) = username {
            opts = opts.username(user);
        }
        if let Some(pass) = password {
            opts = opts.password(pass);
        }
        if let Some(mode) = ssl_mode {
            opts = opts.ssl_mode(match mode {
                PgSslMode::Disable => SqlxPgSslMode::Disable,
                PgSslMode::Prefer => SqlxPgSslMode::Prefer,
                PgSslMode::Require => SqlxPgSslMode::Require,
            });
        }

        tracing::info!(
            host = host,
            port = port,
            database = database,
            username = username.unwrap_or("<none>"),
            ssl_mode = ?ssl_mode,
            "Connecting to PostgreSQL"
        );

        Self::connect(opts, max_connections, statement_timeout_ms).await
    }

    async fn connect(
        mut opts: PgConnectOptions,
        max_connections: u32,
        statement_timeout_ms: Option<u64>,
    ) -> MetadataResult<Self> {
        if let Some(timeout_ms) = statement_timeout_ms {
            opts = opts.options([("statement_timeout", format!("{timeout_ms}ms"))]);
            tracing::info!(timeout_ms, "PostgreSQL statement_timeout set");
        }

        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .connect_with(opts)
            .await?;

        let store = Self { pool };
        store.migrate().await?;
        Ok(store)
    }

    /// Get a reference to the connection pool.
    pub fn pool(&self) -> &Pool<Postgres> {
        &self.pool
    }
}

#[async_trait]
impl MetadataStore for PostgresStore {
    async fn migrate(&self) -> MetadataResult<()> {
        // Prepared statements hold one statement each.
        for statement in postgres_schema_statements(POSTGRES_SCHEMA) {
            sqlx::query(statement).execute(&self.pool).await?;
        }
        Ok(())
    }

    async fn health_check(&self) -> MetadataResult<()> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }
}

#[async_trait]
impl RepositoryRepo for PostgresStore {
    async fn create_repository(&self, repository: &RepositoryRow) -> MetadataResult<()> {
        let mut tx = self.pool.begin().await?;

        sqlx::query("INSERT INTO repositories (repository_id, name, created_at) VALUES ($1, $2, $3)")
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
            "INSERT INTO repository_paths (repository_id, path, created_at) VALUES ($1, $2, $3)",
        )
        .bind(repository.repository_id)
        .bind(&repository.name)
        .bind(repository.created_at)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(())
    }

    async fn get_repository(&self, repository_id: Uuid) -> MetadataResult<Option<RepositoryRow>> {
        let row =
            sqlx::query_as::<_, RepositoryRow>("SELECT * FROM repositories WHERE repository_id = $1")
                .bind(repository_id)
                .fetch_optional(&self.pool)
                .await?;
        Ok(row)
    }

    async fn get_repository_by_name(&self, name: &str) -> MetadataResult<Option<RepositoryRow>> {
        let row = sqlx::query_as::<_, RepositoryRow>("SELECT * FROM repositories WHERE name = $1")
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
impl PathRepo for PostgresStore {
    async fn insert_path(&self, repository_id: Uuid, path: &str) -> MetadataResult<PathRow> {
        let row = sqlx::query_as::<_, PathRow>(
            r#"
            INSERT INTO repository_paths (repository_id, path, created_at)
            VALUES ($1, $2, $3)
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
            VALUES ($1, $2, $3)
            ON CONFLICT (repository_id, path) DO NOTHING
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
            "SELECT * FROM repository_paths WHERE repository_id = $1 AND path = $2",
        )
        .bind(repository_id)
        .bind(path)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row)
    }

    async fn list_paths(&self, repository_id: Uuid) -> MetadataResult<Vec<PathRow>> {
        let rows = sqlx::query_as::<_, PathRow>(
            "SELECT * FROM repository_paths WHERE repository_id = $1 ORDER BY path COLLATE \"C\"",
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

        let paths = sqlx::query("DELETE FROM repository_paths WHERE repository_id = $1 AND path = $2")
            .bind(repository_id)
            .bind(path)
            .execute(&mut *tx)
            .await?
            .rows_affected();
        let grants = sqlx::query("DELETE FROM permission_grants WHERE repository_id = $1 AND path = $2")
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
            "SELECT path_id FROM repository_paths WHERE repository_id = $1 AND path = $2 FOR UPDATE",
        )
        .bind(repository_id)
        .bind(old_path)
        .fetch_optional(&mut *tx)
        .await?;
        let Some(path_id) = path_id else {
            return Err(MetadataError::NotFound(format!("path '{old_path}' not indexed")));
        };

        let conflict = || format!("path '{new_path}' already indexed");
        sqlx::query("UPDATE repository_paths SET path = $1 WHERE path_id = $2")
            .bind(new_path)
            .bind(path_id)
            .execute(&mut *tx)
            .await
            .map_err(|e| MetadataError::on_write(e, conflict))?;
        let grants = sqlx::query(
            "UPDATE permission_grants SET path = $1, updated_at = $2 WHERE repository_id = $3 AND path = $4",
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
            SET path = $3 || substr(path, length($2) + 1)
            WHERE repository_id = $1
              AND (path = $2 OR substr(path, 1, length($2) + 1) = $2 || '/')
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
            SET path = $3 || substr(path, length($2) + 1), updated_at = $4
            WHERE repository_id = $1
              AND (path = $2 OR substr(path, 1, length($2) + 1) = $2 || '/')
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

    async fn delete_prefix(&self, repository_id: Uuid, prefix: &str) -> MetadataResult<RecordChanges> {
        let mut tx = self.pool.begin().await?;

        let paths = sqlx::query(
            r#"
            DELETE FROM repository_paths
            WHERE repository_id = $1
              AND (path = $2 OR substr(path, 1, length($2) + 1) = $2 || '/')
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
            WHERE repository_id = $1
              AND (path = $2 OR substr(path, 1, length($2) + 1) = $2 || '/')
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
impl GrantRepo for PostgresStore {
    async fn find_grant(
        &self,
        repository_id: Uuid,
        role_title: &str,
        path: &str,
    ) -> MetadataResult<Option<GrantRow>> {
        let row = sqlx::query_as::<_, GrantRow>(
            "SELECT * FROM permission_grants WHERE repository_id = $1 AND role_title = $2 AND path = $3",
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
            r#"
            SELECT * FROM permission_grants
            WHERE repository_id = $1
            ORDER BY path COLLATE "C", role_title COLLATE "C"
            "#,
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
            VALUES ($1, $2, $3, $4, $5, $5)
            RETURNING *
            "#,
        )
        .bind(grant.repository_id)
        .bind(&grant.role_title)
        .bind(&grant.path)
        .bind(grant.capability.encode())
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
            SET role_title = $1, path = $2, permission = $3, updated_at = $4
            WHERE grant_id = $5 AND repository_id = $6
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
            sqlx::query("DELETE FROM permission_grants WHERE grant_id = $1 AND repository_id = $2")
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
impl RoleRepo for PostgresStore {
    async fn create_role(&self, role: &RoleRow) -> MetadataResult<()> {
        sqlx::query("INSERT INTO roles (role_id, title, created_at) VALUES ($1, $2, $3)")
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
        let row = sqlx::query_as::<_, RoleRow>("SELECT * FROM roles WHERE role_id = $1")
            .bind(role_id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row)
    }

    async fn get_role_by_title(&self, title: &str) -> MetadataResult<Option<RoleRow>> {
        let row = sqlx::query_as::<_, RoleRow>("SELECT * FROM roles WHERE title = $1")
            .bind(title)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row)
    }

    async fn list_roles(&self) -> MetadataResult<Vec<RoleRow>> {
        let rows = sqlx::query_as::<_, RoleRow>("SELECT * FROM roles ORDER BY title COLLATE \"C\"")
            .fetch_all(&self.pool)
            .await?;
        Ok(rows)
    }
}

#[async_trait]
impl TokenRepo for PostgresStore {
    async fn create_token(&self, token: &TokenRow) -> MetadataResult<()> {
        sqlx::query(
            r#"
            INSERT INTO tokens (
                token_id, role_id, token_hash, description,
                created_at, revoked_at, last_used_at
            ) VALUES ($1, $2, $3, $4, $5, $6, $7)
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
        let row = sqlx::query_as::<_, TokenRow>("SELECT * FROM tokens WHERE token_hash = $1")
            .bind(token_hash)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row)
    }

    async fn get_token(&self, token_id: Uuid) -> MetadataResult<Option<TokenRow>> {
        let row = sqlx::query_as::<_, TokenRow>("SELECT * FROM tokens WHERE token_id = $1")
            .bind(token_id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row)
    }

    async fn touch_token(&self, token_id: Uuid, used_at: OffsetDateTime) -> MetadataResult<()> {
        sqlx::query("UPDATE tokens SET last_used_at = $1 WHERE token_id = $2")
            .bind(used_at)
            .bind(token_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn revoke_token(&self, token_id: Uuid, revoked_at: OffsetDateTime) -> MetadataResult<()> {
        let result =
            sqlx::query("UPDATE tokens SET revoked_at = COALESCE(revoked_at, $1) WHERE token_id = $2")
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
                    "SELECT * FROM tokens WHERE role_id = $1 ORDER BY created_at DESC",
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
impl BootstrapRepo for PostgresStore {
    async fn get_state(&self, key: &str) -> MetadataResult<Option<String>> {
        // Outer None: no row. Inner None: row with a NULL value.
        let value: Option<Option<String>> =
            sqlx::query_scalar("SELECT value FROM bootstrap_state WHERE key = $1")
                .bind(key)
                .fetch_optional(&self.pool)
                .await?;
        Ok(value.flatten())
    }

    async fn set_state(&self, key: &str, value: &str) -> MetadataResult<()> {
        sqlx::query(
            r#"
            INSERT INTO bootstrap_state (key, value)
            VALUES ($1, $2)
            ON CONFLICT (key) DO UPDATE
            SET value = EXCLUDED.value
            "#,
        )
        .bind(key)
        .bind(value)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn clear_state(&self, key: &str) -> MetadataResult<()> {
        sqlx::query("DELETE FROM bootstrap_state WHERE key = $1")
            .bind(key)
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}
