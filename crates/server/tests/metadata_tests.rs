//! Integration tests for MetadataStore implementations.

mod common;

use common::fixtures::sha256_hash;
use common::{TestMetadata, run_metadata_test_both};
use depot_core::Capability;
use depot_metadata::models::*;
use depot_metadata::{MetadataError, MetadataStore};
use std::sync::Arc;
use time::OffsetDateTime;
use uuid::Uuid;

async fn repository(store: &Arc<dyn MetadataStore>, name: &str) -> RepositoryRow {
    let row = RepositoryRow {
        repository_id: Uuid::new_v4(),
        name: name.to_string(),
        created_at: OffsetDateTime::now_utc(),
    };
    store
        .create_repository(&row)
        .await
        .expect("Failed to create repository");
    row
}

fn grant(repo: &RepositoryRow, role_title: &str, path: &str, capability: &str) -> NewGrant {
    NewGrant {
        repository_id: repo.repository_id,
        role_title: role_title.to_string(),
        path: path.to_string(),
        capability: capability.parse::<Capability>().unwrap(),
    }
}

async fn paths(store: &Arc<dyn MetadataStore>, repo: &RepositoryRow) -> Vec<String> {
    store
        .list_paths(repo.repository_id)
        .await
        .unwrap()
        .into_iter()
        .map(|p| p.path)
        .collect()
}

async fn grant_paths(store: &Arc<dyn MetadataStore>, repo: &RepositoryRow) -> Vec<String> {
    store
        .list_grants(repo.repository_id)
        .await
        .unwrap()
        .into_iter()
        .map(|g| g.path)
        .collect()
}

async fn seed_docs(store: &Arc<dyn MetadataStore>, repo: &RepositoryRow) {
    for path in [
        "docs",
        "docs/a.txt",
        "docs/sub",
        "docs/sub/b.txt",
        "docs-old",
        "docs-old/c.txt",
    ] {
        store.insert_path(repo.repository_id, path).await.unwrap();
    }
    for path in ["docs", "docs/sub", "docs-old"] {
        store
            .create_grant(&grant(repo, "viewer", path, "r--"))
            .await
            .unwrap();
    }
}

// =============================================================================
// Repositories
// =============================================================================

#[tokio::test]
async fn test_repository_create_inserts_root_record() {
    run_metadata_test_both(|store| async move {
        let repo = repository(&store, "projects").await;

        let fetched = store
            .get_repository_by_name("projects")
            .await
            .unwrap()
            .expect("repository exists");
        assert_eq!(fetched.repository_id, repo.repository_id);
        assert!(
            store
                .get_repository(repo.repository_id)
                .await
                .unwrap()
                .is_some()
        );
        assert_eq!(paths(&store, &repo).await, vec!["projects"]);

        let duplicate = RepositoryRow {
            repository_id: Uuid::new_v4(),
            ..repo.clone()
        };
        let err = store.create_repository(&duplicate).await.unwrap_err();
        assert!(err.is_conflict(), "{err}");

        repository(&store, "archive").await;
        let names: Vec<String> = store
            .list_repositories()
            .await
            .unwrap()
            .into_iter()
            .map(|r| r.name)
            .collect();
        assert_eq!(names, vec!["archive", "projects"]);
    })
    .await;
}

// =============================================================================
// Paths
// =============================================================================

#[tokio::test]
async fn test_insert_and_ensure_path() {
    run_metadata_test_both(|store| async move {
        let repo = repository(&store, "projects").await;

        let row = store.insert_path(repo.repository_id, "docs").await.unwrap();
        assert_eq!(row.path, "docs");
        let err = store
            .insert_path(repo.repository_id, "docs")
            .await
            .unwrap_err();
        assert!(matches!(err, MetadataError::AlreadyExists(_)), "{err}");

        assert!(store.ensure_path(repo.repository_id, "docs/a.txt").await.unwrap());
        assert!(!store.ensure_path(repo.repository_id, "docs/a.txt").await.unwrap());

        assert!(
            store
                .get_path(repo.repository_id, "docs/a.txt")
                .await
                .unwrap()
                .is_some()
        );
        assert!(
            store
                .get_path(repo.repository_id, "docs/b.txt")
                .await
                .unwrap()
                .is_none()
        );
    })
    .await;
}

#[tokio::test]
async fn test_paths_are_scoped_per_repository() {
    run_metadata_test_both(|store| async move {
        let first = repository(&store, "first").await;
        let second = repository(&store, "second").await;
        store.insert_path(first.repository_id, "docs").await.unwrap();
        store.insert_path(second.repository_id, "docs").await.unwrap();

        let changes = store
            .delete_prefix(first.repository_id, "docs")
            .await
            .unwrap();
        assert_eq!(changes.paths, 1);
        assert_eq!(paths(&store, &second).await, vec!["docs", "second"]);
    })
    .await;
}

#[tokio::test]
async fn test_delete_file_records_drops_exact_grants() {
    run_metadata_test_both(|store| async move {
        let repo = repository(&store, "projects").await;
        seed_docs(&store, &repo).await;
        store
            .create_grant(&grant(&repo, "viewer", "docs/a.txt", "r-d"))
            .await
            .unwrap();

        let changes = store
            .delete_file_records(repo.repository_id, "docs/a.txt")
            .await
            .unwrap();
        assert_eq!(changes, RecordChanges { paths: 1, grants: 1 });
        assert!(
            store
                .get_path(repo.repository_id, "docs/a.txt")
                .await
                .unwrap()
                .is_none()
        );
        assert_eq!(
            grant_paths(&store, &repo).await,
            vec!["docs", "docs-old", "docs/sub"]
        );
    })
    .await;
}

#[tokio::test]
async fn test_rename_file_records() {
    run_metadata_test_both(|store| async move {
        let repo = repository(&store, "projects").await;
        seed_docs(&store, &repo).await;
        store
            .create_grant(&grant(&repo, "viewer", "docs/a.txt", "r-d"))
            .await
            .unwrap();

        let changes = store
            .rename_file_records(repo.repository_id, "docs/a.txt", "docs/renamed.txt")
            .await
            .unwrap();
        assert_eq!(changes, RecordChanges { paths: 1, grants: 1 });
        assert!(
            store
                .get_path(repo.repository_id, "docs/renamed.txt")
                .await
                .unwrap()
                .is_some()
        );
        assert!(
            store
                .find_grant(repo.repository_id, "viewer", "docs/renamed.txt")
                .await
                .unwrap()
                .is_some()
        );

        let err = store
            .rename_file_records(repo.repository_id, "docs/none.txt", "docs/x.txt")
            .await
            .unwrap_err();
        assert!(err.is_not_found(), "{err}");
    })
    .await;
}

#[tokio::test]
async fn test_rewrite_prefix_is_anchored() {
    run_metadata_test_both(|store| async move {
        let repo = repository(&store, "projects").await;
        seed_docs(&store, &repo).await;

        let changes = store
            .rewrite_prefix(repo.repository_id, "docs", "manuals")
            .await
            .unwrap();
        assert_eq!(changes, RecordChanges { paths: 4, grants: 2 });

        assert_eq!(
            paths(&store, &repo).await,
            vec![
                "docs-old",
                "docs-old/c.txt",
                "manuals",
                "manuals/a.txt",
                "manuals/sub",
                "manuals/sub/b.txt",
                "projects",
            ]
        );
        assert_eq!(
            grant_paths(&store, &repo).await,
            vec!["docs-old", "manuals", "manuals/sub"]
        );
    })
    .await;
}

#[tokio::test]
async fn test_rewrite_prefix_into_nested_destination() {
    run_metadata_test_both(|store| async move {
        let repo = repository(&store, "projects").await;
        seed_docs(&store, &repo).await;
        store.insert_path(repo.repository_id, "archive").await.unwrap();

        store
            .rewrite_prefix(repo.repository_id, "docs/sub", "archive/sub")
            .await
            .unwrap();
        let all = paths(&store, &repo).await;
        assert!(all.contains(&"archive/sub/b.txt".to_string()), "{all:?}");
        assert!(all.contains(&"docs/a.txt".to_string()), "{all:?}");
        assert!(!all.contains(&"docs/sub".to_string()), "{all:?}");
    })
    .await;
}

#[tokio::test]
async fn test_delete_prefix_is_anchored() {
    run_metadata_test_both(|store| async move {
        let repo = repository(&store, "projects").await;
        seed_docs(&store, &repo).await;

        let changes = store
            .delete_prefix(repo.repository_id, "docs")
            .await
            .unwrap();
        assert_eq!(changes, RecordChanges { paths: 4, grants: 2 });
        assert_eq!(
            paths(&store, &repo).await,
            vec!["docs-old", "docs-old/c.txt", "projects"]
        );
        assert_eq!(grant_paths(&store, &repo).await, vec!["docs-old"]);

        let changes = store
            .delete_prefix(repo.repository_id, "docs")
            .await
            .unwrap();
        assert_eq!(changes, RecordChanges::default());
    })
    .await;
}

// =============================================================================
// Grants
// =============================================================================

#[tokio::test]
async fn test_grant_lifecycle() {
    run_metadata_test_both(|store| async move {
        let repo = repository(&store, "projects").await;

        let created = store
            .create_grant(&grant(&repo, "viewer", "docs", "r--"))
            .await
            .unwrap();
        assert_eq!(created.permission, "r--");

        let err = store
            .create_grant(&grant(&repo, "viewer", "docs", "rwd"))
            .await
            .unwrap_err();
        assert!(err.is_conflict(), "{err}");

        store
            .create_grant(&grant(&repo, "editor", "docs", "rwd"))
            .await
            .unwrap();
        let roles: Vec<String> = store
            .list_grants(repo.repository_id)
            .await
            .unwrap()
            .into_iter()
            .map(|g| g.role_title)
            .collect();
        assert_eq!(roles, vec!["editor", "viewer"]);

        let updated = store
            .update_grant(created.grant_id, &grant(&repo, "viewer", "docs/sub", "r-d"))
            .await
            .unwrap();
        assert_eq!(updated.path, "docs/sub");
        assert_eq!(updated.capability().unwrap(), Capability::new(true, false, true));
        assert!(
            store
                .find_grant(repo.repository_id, "viewer", "docs")
                .await
                .unwrap()
                .is_none()
        );

        store
            .delete_grant(repo.repository_id, created.grant_id)
            .await
            .unwrap();
        let err = store
            .delete_grant(repo.repository_id, created.grant_id)
            .await
            .unwrap_err();
        assert!(err.is_not_found(), "{err}");
    })
    .await;
}

#[tokio::test]
async fn test_grant_ids_are_scoped_to_their_repository() {
    run_metadata_test_both(|store| async move {
        let first = repository(&store, "first").await;
        let second = repository(&store, "second").await;
        let created = store
            .create_grant(&grant(&first, "viewer", "docs", "r--"))
            .await
            .unwrap();

        let err = store
            .delete_grant(second.repository_id, created.grant_id)
            .await
            .unwrap_err();
        assert!(err.is_not_found(), "{err}");

        let err = store
            .update_grant(created.grant_id, &grant(&second, "viewer", "docs", "rwd"))
            .await
            .unwrap_err();
        assert!(err.is_not_found(), "{err}");
    })
    .await;
}

// =============================================================================
// Roles, tokens and bootstrap state
// =============================================================================

#[tokio::test]
async fn test_roles_and_tokens() {
    run_metadata_test_both(|store| async move {
        let now = OffsetDateTime::now_utc();
        let role = RoleRow {
            role_id: Uuid::new_v4(),
            title: "editor".to_string(),
            created_at: now,
        };
        store.create_role(&role).await.unwrap();
        let err = store
            .create_role(&RoleRow {
                role_id: Uuid::new_v4(),
                ..role.clone()
            })
            .await
            .unwrap_err();
        assert!(err.is_conflict(), "{err}");
        assert_eq!(
            store
                .get_role_by_title("editor")
                .await
                .unwrap()
                .unwrap()
                .role_id,
            role.role_id
        );

        let token = TokenRow {
            token_id: Uuid::new_v4(),
            role_id: role.role_id,
            token_hash: sha256_hash(b"editor-secret"),
            description: Some("ci".to_string()),
            created_at: now,
            revoked_at: None,
            last_used_at: None,
        };
        store.create_token(&token).await.unwrap();

        let found = store
            .get_token_by_hash(&token.token_hash)
            .await
            .unwrap()
            .expect("token exists");
        assert_eq!(found.token_id, token.token_id);
        assert!(!found.is_revoked());

        store.touch_token(token.token_id, now).await.unwrap();
        let touched = store.get_token(token.token_id).await.unwrap().unwrap();
        assert!(touched.last_used_at.is_some());

        store.revoke_token(token.token_id, now).await.unwrap();
        assert!(
            store
                .get_token(token.token_id)
                .await
                .unwrap()
                .unwrap()
                .is_revoked()
        );

        assert_eq!(store.list_tokens(Some(role.role_id)).await.unwrap().len(), 1);
        assert!(
            store
                .list_tokens(Some(Uuid::new_v4()))
                .await
                .unwrap()
                .is_empty()
        );
    })
    .await;
}

#[tokio::test]
async fn test_bootstrap_token_id_roundtrip() {
    let metadata = TestMetadata::new()
        .await
        .expect("Failed to create metadata");
    let store = metadata.store();

    assert!(store.get_bootstrap_token_id().await.unwrap().is_none());
    let first = Uuid::new_v4();
    store.set_bootstrap_token_id(first).await.unwrap();
    assert_eq!(store.get_bootstrap_token_id().await.unwrap(), Some(first));

    let second = Uuid::new_v4();
    store.set_bootstrap_token_id(second).await.unwrap();
    assert_eq!(store.get_bootstrap_token_id().await.unwrap(), Some(second));
}

#[tokio::test]
async fn test_health_check_sqlite() {
    let metadata = TestMetadata::new()
        .await
        .expect("Failed to create metadata");
    metadata.store().health_check().await.unwrap();

    let (count,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM repositories")
        .fetch_one(metadata.pool())
        .await
        .unwrap();
    assert_eq!(count, 0);
}
