//! Path index fixtures over SQLite files and a PostgreSQL container.

use depot_metadata::{MetadataError, MetadataResult, MetadataStore, PostgresStore, SqliteStore};
use sqlx::{Pool, Postgres as PgDriver, Sqlite};
use std::sync::Arc;
use tempfile::TempDir;
use testcontainers::{ContainerAsync, ImageExt, runners::AsyncRunner};
use testcontainers_modules::postgres::Postgres;

/// Prefix on errors raised when the container itself cannot start.
pub const POSTGRES_CONTAINER_START_ERR_PREFIX: &str = "postgres-container-start:";

/// SQLite index in a temporary directory, removed on drop.
#[allow(dead_code)]
pub struct TestMetadata {
    sqlite: Arc<SqliteStore>,
    _dir: TempDir,
}

#[allow(dead_code)]
impl TestMetadata {
    pub async fn new() -> MetadataResult<Self> {
        let dir = tempfile::tempdir().map_err(|e| MetadataError::Internal(e.to_string()))?;
        let sqlite = SqliteStore::new(dir.path().join("index.db"), None).await?;
        Ok(Self {
            sqlite: Arc::new(sqlite),
            _dir: dir,
        })
    }

    pub fn store(&self) -> Arc<dyn MetadataStore> {
        self.sqlite.clone()
    }

    pub fn pool(&self) -> &Pool<Sqlite> {
        self.sqlite.pool()
    }
}

/// PostgreSQL index inside a throwaway container.
#[allow(dead_code)]
pub struct PostgresTestMetadata {
    postgres: Arc<PostgresStore>,
    _container: ContainerAsync<Postgres>,
}

#[allow(dead_code)]
impl PostgresTestMetadata {
    pub async fn new() -> MetadataResult<Self> {
        let start_failed = |e: testcontainers::TestcontainersError| {
            MetadataError::Internal(format!("{POSTGRES_CONTAINER_START_ERR_PREFIX} {e}"))
        };
        let container = Postgres::default()
            .with_tag("15-alpine")
            .start()
            .await
            .map_err(start_failed)?;
        let host = container.get_host().await.map_err(start_failed)?;
        let port = container
            .get_host_port_ipv4(5432)
            .await
            .map_err(start_failed)?;

        let url = format!("postgres://postgres:postgres@{host}:{port}/postgres");
        let postgres = PostgresStore::from_url(&url, 5, None).await?;
        Ok(Self {
            postgres: Arc::new(postgres),
            _container: container,
        })
    }

    /// Start a container, or `None` when Docker is unavailable or
    /// `SKIP_POSTGRES_TESTS` is set. Any other setup failure panics.
    pub async fn start_or_skip() -> Option<Self> {
        if std::env::var_os("SKIP_POSTGRES_TESTS").is_some() {
            return None;
        }
        match Self::new().await {
            Ok(metadata) => Some(metadata),
            Err(err) if err.to_string().contains(POSTGRES_CONTAINER_START_ERR_PREFIX) => {
                eprintln!("Skipping PostgreSQL test: {err}");
                None
            }
            Err(err) => panic!("PostgreSQL test setup failed: {err}"),
        }
    }

    pub fn store(&self) -> Arc<dyn MetadataStore> {
        self.postgres.clone()
    }

    pub fn pool(&self) -> &Pool<PgDriver> {
        self.postgres.pool()
    }
}

/// Run `test_fn` against SQLite, then against PostgreSQL when available.
#[allow(dead_code)]
pub async fn run_metadata_test_both<F, Fut>(test_fn: F)
where
    F: Fn(Arc<dyn MetadataStore>) -> Fut,
    Fut: std::future::Future<Output = ()>,
{
    let sqlite = TestMetadata::new()
        .await
        .expect("Failed to create SQLite test metadata");
    test_fn(sqlite.store()).await;

    if let Some(postgres) = PostgresTestMetadata::start_or_skip().await {
        test_fn(postgres.store()).await;
    }
}
