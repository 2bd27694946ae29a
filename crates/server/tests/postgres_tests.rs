//! PostgreSQL-specific behaviour of the path index.
//!
//! Needs Docker; skipped when it is unavailable or SKIP_POSTGRES_TESTS is set.

mod common;

use common::fixtures::sha256_hash;
use common::PostgresTestMetadata;
use depot_core::Capability;
use depot_metadata::models::*;
use std::collections::HashSet;
use time::OffsetDateTime;
use uuid::Uuid;

fn repository(name: &str) -> RepositoryRow {
    RepositoryRow {
        repository_id: Uuid::new_v4(),
        name: name.to_string(),
        created_at: OffsetDateTime::now_utc(),
    }
}

#[tokio::test]
async fn test_postgres_schema_is_idempotent() {
    let Some(metadata) = PostgresTestMetadata::start_or_skip().await else {
        return;
    };
    let store = metadata.store();

    store.migrate().await.expect("Second migration failed");
    store.health_check().await.expect("Health check failed");

    let (count,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM repository_paths")
        .fetch_one(metadata.pool())
        .await
        .unwrap();
    assert_eq!(count, 0);
}

#[tokio::test]
async fn test_postgres_paths_sort_bytewise() {
    let Some(metadata) = PostgresTestMetadata::start_or_skip().await else {
        return;
    };
    let store = metadata.store();
    let repo = repository("projects");
    store.create_repository(&repo).await.unwrap();

    for path in ["docs/a.txt", "docs-old", "docs", "Docs"] {
        store.insert_path(repo.repository_id, path).await.unwrap();
    }
    let paths: Vec<String> = store
        .list_paths(repo.repository_id)
        .await
        .unwrap()
        .into_iter()
        .map(|p| p.path)
        .collect();
    assert_eq!(paths, vec!["Docs", "docs", "docs-old", "docs/a.txt", "projects"]);
}

#[tokio::test]
async fn test_postgres_prefix_operations_ignore_pattern_characters() {
    let Some(metadata) = PostgresTestMetadata::start_or_skip().await else {
        return;
    };
    let store = metadata.store();
    let repo = repository("projects");
    store.create_repository(&repo).await.unwrap();

    for path in ["a_b", "a_b/x.txt", "axb", "axb/y.txt", "a%", "a%/z.txt"] {
        store.insert_path(repo.repository_id, path).await.unwrap();
    }

    let changes = store
        .rewrite_prefix(repo.repository_id, "a_b", "renamed")
        .await
        .unwrap();
    assert_eq!(changes.paths, 2);

    let changes = store
        .delete_prefix(repo.repository_id, "a%")
        .await
        .unwrap();
    assert_eq!(changes.paths, 2);

    let remaining: HashSet<String> = store
        .list_paths(repo.repository_id)
        .await
        .unwrap()
        .into_iter()
        .map(|p| p.path)
        .collect();
    let expected: HashSet<String> = ["axb", "axb/y.txt", "renamed", "renamed/x.txt", "projects"]
        .into_iter()
        .map(String::from)
        .collect();
    assert_eq!(remaining, expected);
}

#[tokio::test]
async fn test_postgres_rewrite_rolls_back_on_conflict() {
    let Some(metadata) = PostgresTestMetadata::start_or_skip().await else {
        return;
    };
    let store = metadata.store();
    let repo = repository("projects");
    store.create_repository(&repo).await.unwrap();

    for path in ["docs", "docs/a.txt", "manuals", "manuals/a.txt"] {
        store.insert_path(repo.repository_id, path).await.unwrap();
    }
    store
        .create_grant(&NewGrant {
            repository_id: repo.repository_id,
            role_title: "viewer".to_string(),
            path: "docs".to_string(),
            capability: Capability::FULL,
        })
        .await
        .unwrap();

    let err = store
        .rewrite_prefix(repo.repository_id, "docs", "manuals")
        .await
        .unwrap_err();
    assert!(err.is_conflict(), "{err}");

    assert!(
        store
            .get_path(repo.repository_id, "docs/a.txt")
            .await
            .unwrap()
            .is_some()
    );
    assert!(
        store
            .find_grant(repo.repository_id, "viewer", "docs")
            .await
            .unwrap()
            .is_some()
    );
}

#[tokio::test]
async fn test_postgres_token_lookup() {
    let Some(metadata) = PostgresTestMetadata::start_or_skip().await else {
        return;
    };
    let store = metadata.store();
    let now = OffsetDateTime::now_utc();

    let role = RoleRow {
        role_id: Uuid::new_v4(),
        title: "editor".to_string(),
        created_at: now,
    };
    store.create_role(&role).await.unwrap();

    let token = TokenRow {
        token_id: Uuid::new_v4(),
        role_id: role.role_id,
        token_hash: sha256_hash(b"pg-secret"),
        description: None,
        created_at: now,
        revoked_at: None,
        last_used_at: None,
    };
    store.create_token(&token).await.unwrap();

    let duplicate = TokenRow {
        token_id: Uuid::new_v4(),
        ..token.clone()
    };
    let err = store.create_token(&duplicate).await.unwrap_err();
    assert!(err.is_conflict(), "{err}");

    let found = store
        .get_token_by_hash(&token.token_hash)
        .await
        .unwrap()
        .expect("token exists");
    assert_eq!(found.role_id, role.role_id);

    store.revoke_token(token.token_id, now).await.unwrap();
    let err = store.revoke_token(Uuid::new_v4(), now).await.unwrap_err();
    assert!(err.is_not_found(), "{err}");
}
