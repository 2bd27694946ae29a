//! Paged listing against the filesystem backend.

mod common;

use bytes::Bytes;
use common::MemoryBackend;
use depot_storage::FilesystemBackend;
use depot_storage::traits::{ListingOptions, ObjectStore, ObjectStoreListStreamExt};
use futures::{StreamExt, TryStreamExt};
use std::collections::HashSet;
use std::sync::atomic::Ordering;
use tempfile::TempDir;

async fn filesystem_with(count: usize) -> (TempDir, FilesystemBackend) {
    let temp_dir = TempDir::new().unwrap();
    let backend = FilesystemBackend::new(temp_dir.path()).await.unwrap();
    backend
        .put("backend/docs/", Bytes::new())
        .await
        .unwrap();
    for i in 0..count {
        backend
            .put(&format!("backend/docs/{:05}", i), Bytes::from(vec![i as u8]))
            .await
            .unwrap();
    }
    (temp_dir, backend)
}

#[tokio::test]
async fn pages_respect_requested_size() {
    let (_temp, backend) = filesystem_with(250).await;

    for page_size in [1, 40, 100, 1000] {
        let mut stream = backend.list_pages("backend/docs/", ListingOptions::new(page_size));
        let mut seen = HashSet::new();
        while let Some(page) = stream.next().await {
            let page = page.unwrap();
            assert!(
                page.keys.len() <= page_size,
                "page of {} keys exceeds page_size {}",
                page.keys.len(),
                page_size
            );
            seen.extend(page.keys);
        }
        // 250 files plus the directory marker
        assert_eq!(seen.len(), 251, "page_size={page_size}");
        assert!(seen.contains("backend/docs/"));
    }
}

#[tokio::test]
async fn flat_stream_matches_materialized_list() {
    let (_temp, backend) = filesystem_with(30).await;

    let streamed: Vec<String> = backend
        .list_stream_ext("backend/", Some(ListingOptions::new(7)))
        .try_collect()
        .await
        .unwrap();
    let mut listed = backend.list("backend/").await.unwrap();

    let mut streamed_sorted = streamed.clone();
    streamed_sorted.sort();
    listed.sort();
    assert_eq!(streamed_sorted, listed);
}

#[tokio::test]
async fn dropping_the_stream_stops_paging() {
    let keys: Vec<String> = (0..500).map(|i| format!("backend/docs/{i:04}")).collect();
    let backend = MemoryBackend::with_keys(keys);

    {
        let mut stream = backend.list_stream_ext("backend/", Some(ListingOptions::new(10)));
        for _ in 0..25 {
            stream.next().await.unwrap().unwrap();
        }
    }

    let pages = backend.pages_fetched.load(Ordering::SeqCst);
    assert!(pages <= 3, "fetched {pages} pages for 25 keys");
}
