//! Server test utilities.

use super::fixtures::{ADMIN_TOKEN, multipart_body, sha256_hash};
use super::storage::FaultyStore;
use axum::body::Body;
use axum::http::{Request, Response, StatusCode};
use bytes::Bytes;
use depot_core::config::{AdminConfig, AppConfig, MetadataConfig, StorageConfig};
use depot_metadata::models::{RoleRow, TokenRow};
use depot_metadata::{MetadataStore, SqliteStore};
use depot_server::bootstrap::ensure_admin_token;
use depot_server::{AppState, create_router};
use depot_storage::{FilesystemBackend, ObjectStore};
use serde_json::{Value, json};
use std::sync::Arc;
use tempfile::TempDir;
use time::OffsetDateTime;
use tower::ServiceExt;
use uuid::Uuid;

/// A test server wrapper with all dependencies.
/// Note: #[allow(dead_code)] because each test file compiles common/ separately.
#[allow(dead_code)]
pub struct TestServer {
    pub router: axum::Router,
    pub state: AppState,
    pub storage: Arc<dyn ObjectStore>,
    _temp_dir: TempDir,
}

#[allow(dead_code)]
impl TestServer {
    /// Create a new test server with temporary storage.
    pub async fn new() -> Self {
        Self::with_config(|_| {}).await
    }

    /// Create a test server with custom config modifications.
    pub async fn with_config<F>(modifier: F) -> Self
    where
        F: FnOnce(&mut AppConfig),
    {
        Self::build(modifier, |store| store).await
    }

    /// Create a test server whose storage can be slowed down or made to fail.
    pub async fn with_faults<F>(modifier: F) -> (Self, Arc<FaultyStore>)
    where
        F: FnOnce(&mut AppConfig),
    {
        let mut faults = None;
        let server = Self::build(modifier, |store| {
            let faulty = FaultyStore::new(store);
            faults = Some(Arc::clone(&faulty));
            faulty as Arc<dyn ObjectStore>
        })
        .await;
        let faults = faults.expect("storage wrapper installed");
        (server, faults)
    }

    async fn build<F, W>(modifier: F, wrap: W) -> Self
    where
        F: FnOnce(&mut AppConfig),
        W: FnOnce(Arc<dyn ObjectStore>) -> Arc<dyn ObjectStore>,
    {
        let temp_dir = tempfile::tempdir().expect("Failed to create temp directory");

        let storage_path = temp_dir.path().join("storage");
        std::fs::create_dir_all(&storage_path).expect("Failed to create storage directory");
        let storage: Arc<dyn ObjectStore> = wrap(Arc::new(
            FilesystemBackend::new(&storage_path)
                .await
                .expect("Failed to create storage backend"),
        ));

        let db_path = temp_dir.path().join("metadata.db");
        let metadata: Arc<dyn MetadataStore> = Arc::new(
            SqliteStore::new(&db_path, None)
                .await
                .expect("Failed to create metadata store"),
        );

        let mut config = AppConfig {
            storage: StorageConfig::Filesystem {
                path: storage_path.clone(),
            },
            metadata: MetadataConfig::Sqlite {
                path: db_path,
                query_timeout_secs: None,
            },
            admin: AdminConfig::for_testing(),
            ..AppConfig::for_testing()
        };
        modifier(&mut config);

        ensure_admin_token(metadata.as_ref(), &config.admin)
            .await
            .expect("Failed to bootstrap admin token");

        let state = AppState::new(config, storage.clone(), metadata);
        let router = create_router(state.clone());

        Self {
            router,
            state,
            storage,
            _temp_dir: temp_dir,
        }
    }

    /// Get access to the underlying metadata.
    pub fn metadata(&self) -> Arc<dyn MetadataStore> {
        self.state.metadata.clone()
    }

    /// Send a request with an optional JSON body and bearer token.
    pub async fn json(
        &self,
        method: &str,
        uri: &str,
        body: Option<Value>,
        token: Option<&str>,
    ) -> (StatusCode, Value) {
        let mut builder = Request::builder().method(method).uri(uri);
        if let Some(token) = token {
            builder = builder.header("Authorization", format!("Bearer {token}"));
        }
        let body = match body {
            Some(v) => {
                builder = builder.header("Content-Type", "application/json");
                Body::from(serde_json::to_vec(&v).unwrap())
            }
            None => Body::empty(),
        };
        let (status, bytes) = self.send(builder.body(body).unwrap()).await;
        let json = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap_or(Value::Null)
        };
        (status, json)
    }

    /// Send a raw request, keeping the full response.
    pub async fn respond(&self, request: Request<Body>) -> Response<Body> {
        self.router.clone().oneshot(request).await.unwrap()
    }

    /// Send a raw request and collect the response body.
    pub async fn send(&self, request: Request<Body>) -> (StatusCode, Bytes) {
        let response = self.respond(request).await;
        let status = response.status();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        (status, bytes)
    }

    /// Multipart upload of `files` into `dir`.
    pub async fn upload(
        &self,
        token: &str,
        dir: &str,
        files: &[(&str, &[u8])],
    ) -> (StatusCode, Value) {
        let boundary = "depot-test-boundary";
        let request = Request::builder()
            .method("POST")
            .uri("/v1/file/upload")
            .header("Authorization", format!("Bearer {token}"))
            .header(
                "Content-Type",
                format!("multipart/form-data; boundary={boundary}"),
            )
            .body(Body::from(multipart_body(boundary, dir, files)))
            .unwrap();
        let (status, bytes) = self.send(request).await;
        (status, serde_json::from_slice(&bytes).unwrap_or(Value::Null))
    }

    /// Download a file, returning the raw body.
    pub async fn download(&self, token: &str, path: &str) -> (StatusCode, Bytes) {
        let request = Request::builder()
            .uri(format!("/v1/static/{path}"))
            .header("Authorization", format!("Bearer {token}"))
            .body(Body::empty())
            .unwrap();
        self.send(request).await
    }

    /// Create a role with a fresh token directly in the metadata store and
    /// return the raw token.
    pub async fn role_token(&self, title: &str) -> String {
        let metadata = self.metadata();
        let role = match metadata.get_role_by_title(title).await.unwrap() {
            Some(role) => role,
            None => {
                let role = RoleRow {
                    role_id: Uuid::new_v4(),
                    title: title.to_string(),
                    created_at: OffsetDateTime::now_utc(),
                };
                metadata.create_role(&role).await.expect("Failed to create role");
                role
            }
        };

        let raw_token = format!("test-token-{}", Uuid::new_v4());
        let token = TokenRow {
            token_id: Uuid::new_v4(),
            role_id: role.role_id,
            token_hash: sha256_hash(raw_token.as_bytes()),
            description: Some(format!("{title} test token")),
            created_at: OffsetDateTime::now_utc(),
            revoked_at: None,
            last_used_at: None,
        };
        metadata.create_token(&token).await.expect("Failed to create token");
        raw_token
    }

    /// Create a repository as the admin.
    pub async fn create_repository(&self, name: &str) {
        let (status, body) = self
            .json(
                "POST",
                "/v1/rep/create",
                Some(json!({ "dir": name })),
                Some(ADMIN_TOKEN),
            )
            .await;
        assert_eq!(status, StatusCode::CREATED, "create repository: {body}");
    }

    /// Create a directory as the admin.
    pub async fn create_directory(&self, dir: &str) {
        let (status, body) = self
            .json(
                "POST",
                "/v1/dir/create",
                Some(json!({ "dir": dir })),
                Some(ADMIN_TOKEN),
            )
            .await;
        assert_eq!(status, StatusCode::CREATED, "create directory {dir}: {body}");
    }

    /// Grant `permission` on `path` to a role, as the admin.
    pub async fn grant(&self, repo: &str, role_title: &str, path: &str, permission: &str) -> i64 {
        let (status, body) = self
            .json(
                "POST",
                &format!("/v1/rep/addperms/{repo}"),
                Some(json!({
                    "role_title": role_title,
                    "path": path,
                    "permission": permission,
                })),
                Some(ADMIN_TOKEN),
            )
            .await;
        assert_eq!(status, StatusCode::CREATED, "add grant: {body}");
        body["id"].as_i64().expect("grant id")
    }

    /// Whether an object exists under the configured namespace.
    pub async fn object_exists(&self, relative_key: &str) -> bool {
        let key = format!(
            "{}/{relative_key}",
            self.state.config.files.namespace_prefix
        );
        self.storage.exists(&key).await.unwrap()
    }

    /// Indexed paths of a repository, sorted.
    pub async fn indexed_paths(&self, repo: &str) -> Vec<String> {
        let metadata = self.metadata();
        let repo = metadata
            .get_repository_by_name(repo)
            .await
            .unwrap()
            .expect("repository exists");
        let mut paths: Vec<String> = metadata
            .list_paths(repo.repository_id)
            .await
            .unwrap()
            .into_iter()
            .map(|p| p.path)
            .collect();
        paths.sort();
        paths
    }
}
