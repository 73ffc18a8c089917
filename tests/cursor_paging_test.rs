//! Paged find across stateless requests, driven through the service.

use std::sync::Arc;

use mwshell::cursor::Page;
use mwshell::error::{MwsError, Result};
use mwshell::service::FindRequest;
use mwshell::{Config, MemoryStore, ShellService};
use serde_json::json;

const SESSION: &str = "sess-cursor";

fn test_config(batch: usize) -> Config {
    Config {
        quota_num_collections: None,
        ratelimit_quota: 100_000,
        default_batch_size: batch,
        ..Config::default()
    }
}

async fn seeded_service(batch: usize, docs: usize) -> (ShellService, String, Arc<MemoryStore>) {
    let store = Arc::new(MemoryStore::new());
    let service = ShellService::new(store.clone(), test_config(batch));
    let res_id = service
        .create_resource(SESSION)
        .await
        .expect("resource creation failed")
        .res_id;
    let batch_docs: Vec<serde_json::Value> =
        (0..docs).map(|i| json!({"i": i as i64})).collect();
    service
        .insert(SESSION, &res_id, "seq", json!(batch_docs))
        .await
        .expect("seed insert failed");
    (service, res_id, store)
}

fn sorted_request() -> FindRequest {
    FindRequest {
        sort: json!({"i": 1}).as_object().cloned(),
        ..FindRequest::default()
    }
}

fn resume_request(page: &Page, retrieved: u64) -> FindRequest {
    FindRequest {
        cursor_id: page.cursor_id,
        retrieved,
        total_count: Some(page.count),
        ..FindRequest::default()
    }
}

/// Walks a paged query to exhaustion, returning every document seen.
async fn drain_pages(
    service: &ShellService,
    res_id: &str,
    first: Page,
) -> Result<Vec<serde_json::Map<String, serde_json::Value>>> {
    let mut seen = first.result.clone();
    let mut page = first;
    while page.cursor_id != 0 {
        let request = resume_request(&page, seen.len() as u64);
        page = service.find(SESSION, res_id, "seq", request).await?;
        seen.extend(page.result.clone());
    }
    Ok(seen)
}

#[tokio::test]
async fn test_unbounded_find_pages_through_everything() -> Result<()> {
    let (service, res_id, store) = seeded_service(3, 10).await;

    let page = service
        .find(SESSION, &res_id, "seq", sorted_request())
        .await?;
    assert_eq!(page.count, 10);
    assert_eq!(page.result.len(), 3);
    assert_ne!(page.cursor_id, 0);

    let seen = drain_pages(&service, &res_id, page).await?;
    let indices: Vec<i64> = seen
        .iter()
        .map(|d| d.get("i").and_then(|v| v.as_i64()).unwrap())
        .collect();
    assert_eq!(indices, (0..10).collect::<Vec<i64>>());

    // Exhaustion released the server-side cursor.
    assert_eq!(store.open_cursor_count(), 0);
    Ok(())
}

#[tokio::test]
async fn test_result_smaller_than_batch_needs_no_cursor() -> Result<()> {
    let (service, res_id, store) = seeded_service(100, 5).await;

    let page = service
        .find(SESSION, &res_id, "seq", sorted_request())
        .await?;
    assert_eq!(page.cursor_id, 0);
    assert_eq!(page.count, 5);
    assert_eq!(page.result.len(), 5);
    assert_eq!(store.open_cursor_count(), 0);
    Ok(())
}

#[tokio::test]
async fn test_drain_respects_original_limit() -> Result<()> {
    let (service, res_id, _) = seeded_service(2, 10).await;

    let request = FindRequest {
        limit: 7,
        ..sorted_request()
    };
    let page = service.find(SESSION, &res_id, "seq", request).await?;
    assert_eq!(page.count, 7);
    assert_eq!(page.result.len(), 2);

    let request = FindRequest {
        batch_size: Some(0),
        ..resume_request(&page, 2)
    };
    let rest = service.find(SESSION, &res_id, "seq", request).await?;
    assert_eq!(rest.result.len(), 5);
    assert_eq!(rest.cursor_id, 0);
    Ok(())
}

#[tokio::test]
async fn test_skip_and_limit_shape_the_total() -> Result<()> {
    let (service, res_id, _) = seeded_service(100, 10).await;

    let request = FindRequest {
        skip: 4,
        limit: 3,
        ..sorted_request()
    };
    let page = service.find(SESSION, &res_id, "seq", request).await?;
    assert_eq!(page.count, 3);
    let indices: Vec<i64> = page
        .result
        .iter()
        .map(|d| d.get("i").and_then(|v| v.as_i64()).unwrap())
        .collect();
    assert_eq!(indices, vec![4, 5, 6]);
    Ok(())
}

#[tokio::test]
async fn test_explicit_batch_size_wins_over_default() -> Result<()> {
    let (service, res_id, _) = seeded_service(3, 10).await;

    let request = FindRequest {
        batch_size: Some(5),
        ..sorted_request()
    };
    let page = service.find(SESSION, &res_id, "seq", request).await?;
    assert_eq!(page.result.len(), 5);
    Ok(())
}

#[tokio::test]
async fn test_resume_with_unknown_cursor_is_cursor_not_found() {
    let (service, res_id, _) = seeded_service(3, 10).await;

    let request = FindRequest {
        cursor_id: 424242,
        retrieved: 3,
        total_count: Some(10),
        ..FindRequest::default()
    };
    let err = service
        .find(SESSION, &res_id, "seq", request)
        .await
        .unwrap_err();
    assert!(matches!(err, MwsError::CursorNotFound { .. }));
    assert_eq!(err.status(), 400);
}

#[tokio::test]
async fn test_resume_without_total_count_is_bad_request() -> Result<()> {
    let (service, res_id, _) = seeded_service(3, 10).await;

    let page = service
        .find(SESSION, &res_id, "seq", sorted_request())
        .await?;
    let request = FindRequest {
        cursor_id: page.cursor_id,
        retrieved: 3,
        total_count: None,
        ..FindRequest::default()
    };
    let err = service
        .find(SESSION, &res_id, "seq", request)
        .await
        .unwrap_err();
    assert_eq!(err.status(), 400);
    Ok(())
}

#[tokio::test]
async fn test_exhausted_cursor_cannot_be_resumed() -> Result<()> {
    let (service, res_id, _) = seeded_service(6, 10).await;

    let first = service
        .find(SESSION, &res_id, "seq", sorted_request())
        .await?;
    let cursor_id = first.cursor_id;
    assert_ne!(cursor_id, 0);

    let last = service
        .find(SESSION, &res_id, "seq", resume_request(&first, 6))
        .await?;
    assert_eq!(last.cursor_id, 0);

    // The id the server killed is gone for good.
    let request = FindRequest {
        cursor_id,
        retrieved: 10,
        total_count: Some(10),
        ..FindRequest::default()
    };
    let err = service
        .find(SESSION, &res_id, "seq", request)
        .await
        .unwrap_err();
    assert!(matches!(err, MwsError::CursorNotFound { .. }));
    Ok(())
}

#[tokio::test]
async fn test_projection_applies_to_every_page() -> Result<()> {
    let (service, res_id, _) = seeded_service(4, 8).await;

    let request = FindRequest {
        projection: json!({"i": 1, "_id": 0}).as_object().cloned(),
        ..sorted_request()
    };
    let page = service.find(SESSION, &res_id, "seq", request).await?;
    let seen = drain_pages(&service, &res_id, page).await?;
    assert_eq!(seen.len(), 8);
    for doc in &seen {
        assert!(doc.contains_key("i"));
        assert!(!doc.contains_key("_id"));
    }
    Ok(())
}
