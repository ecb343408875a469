//! HTTP surface tests, driven through the router without a socket.

use std::sync::Arc;

use axum::body::Body;
use axum::http::{Method, Request, StatusCode};
use axum::Router;
use serde_json::{json, Value};
use tempfile::TempDir;
use tower::ServiceExt;
use vectorindex_server::config::IndexConfig;
use vectorindex_server::server::routes::create_router;
use vectorindex_server::server::AppState;
use vectorindex_server::{DistanceMetric, FlatIndex, IndexService};

struct Harness {
    _dir: TempDir,
    state: Arc<AppState<FlatIndex>>,
}

impl Harness {
    fn new(dimension: usize, keys: Option<&str>) -> Self {
        let dir = TempDir::new().unwrap();
        let keys_path = keys.map(|contents| {
            let path = dir.path().join("test.key");
            std::fs::write(&path, contents).unwrap();
            path.display().to_string()
        });
        let config = IndexConfig {
            dimension,
            keys_path,
            save_path: dir.path().join("test.index").display().to_string(),
            scratch_dir: dir.path().join("scratch"),
            ..IndexConfig::default()
        };
        let service =
            IndexService::open(&config, FlatIndex::new(dimension, DistanceMetric::L2)).unwrap();
        let state = Arc::new(AppState::new(Arc::new(service), 2));
        state.health.set_serving();
        Self { _dir: dir, state }
    }

    fn router(&self) -> Router {
        create_router(self.state.clone())
    }

    async fn get(&self, uri: &str) -> (StatusCode, Value) {
        let request = Request::builder()
            .method(Method::GET)
            .uri(uri)
            .body(Body::empty())
            .unwrap();
        send(self.router(), request).await
    }

    async fn post(&self, uri: &str, body: Value) -> (StatusCode, Value) {
        let request = Request::builder()
            .method(Method::POST)
            .uri(uri)
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap();
        send(self.router(), request).await
    }
}

async fn send(router: Router, request: Request<Body>) -> (StatusCode, Value) {
    let response = router.oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let value = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
    (status, value)
}

#[tokio::test]
async fn test_add_search_remove_flow() {
    let h = Harness::new(4, None);

    let (status, body) = h
        .post("/add", json!({"id": 1, "embedding": [0.0, 0.0, 0.0, 1.0]}))
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["message"], "Added, 1!");
    h.post("/add", json!({"id": 2, "embedding": [0.0, 0.0, 1.0, 0.0]}))
        .await;

    let (_, body) = h.get("/total").await;
    assert_eq!(body["count"], 2);
    let (_, body) = h.get("/dimension").await;
    assert_eq!(body["dim"], 4);

    let (status, body) = h.post("/search", json!({"id": 1, "count": 1})).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["ids"], json!([1]));
    assert_eq!(body["scores"], json!([0.0]));
    assert!(body.get("keys").is_none());

    let (_, body) = h.post("/remove", json!({"id": 1})).await;
    assert_eq!(body["message"], "Removed, 1!");
    let (_, body) = h.post("/remove", json!({"id": 1})).await;
    assert_eq!(body["message"], "Not existed, 1!");

    let (_, body) = h.post("/search", json!({"id": 1, "count": 1})).await;
    assert_eq!(body["ids"], json!([]));
}

#[tokio::test]
async fn test_dimension_mismatch_is_bad_request() {
    let h = Harness::new(4, None);
    let (status, body) = h
        .post("/add", json!({"id": 1, "embedding": [1.0, 2.0]}))
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body["error"].as_str().unwrap().contains("Dimension mismatch"));

    let (status, _) = h
        .post("/search_by_embedding", json!({"embedding": [1.0], "count": 3}))
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_search_by_embedding_default_count() {
    let h = Harness::new(1, None);
    for id in 0..15 {
        h.post("/add", json!({"id": id, "embedding": [id as f32]}))
            .await;
    }
    let (status, body) = h
        .post("/search_by_embedding", json!({"embedding": [0.0]}))
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["ids"].as_array().unwrap().len(), 10);
    assert_eq!(body["ids"][0], 0);
}

#[tokio::test]
async fn test_search_by_key() {
    let h = Harness::new(2, Some("a\nb\n"));
    h.post("/add", json!({"id": 0, "embedding": [0.0, 0.0]})).await;
    h.post("/add", json!({"id": 1, "embedding": [1.0, 0.0]})).await;

    let (status, body) = h
        .post("/search", json!({"key": "b", "id": 0, "count": 2}))
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["ids"], json!([1, 0]));
    assert_eq!(body["keys"], json!(["b", "a"]));

    let (status, body) = h.post("/search", json!({"key": "zzz", "count": 2})).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["ids"], json!([]));
}

#[tokio::test]
async fn test_search_by_key_without_table() {
    let h = Harness::new(2, None);
    let (status, body) = h.post("/search", json!({"key": "a", "count": 1})).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body["error"].as_str().unwrap().contains("key table"));
}

#[tokio::test]
async fn test_import_and_restore_messages() {
    let h = Harness::new(2, None);
    let dir = TempDir::new().unwrap();
    let embs = dir.path().join("embs.tsv");
    let ids = dir.path().join("ids.txt");
    std::fs::write(&embs, "1\t1\n2\t2\n").unwrap();
    std::fs::write(&ids, "5\n6\n").unwrap();
    let embs = embs.display().to_string();
    let ids = ids.display().to_string();

    let (status, body) = h
        .post("/import", json!({"embs_path": embs, "ids_path": ids}))
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["message"], format!("Imported, {}, {}!", embs, ids));

    let saved = h.state.service.save().unwrap().display().to_string();
    h.post("/add", json!({"id": 9, "embedding": [9.0, 9.0]})).await;

    let (status, body) = h.post("/restore", json!({"save_path": saved})).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["message"], format!("Restored, {}!", saved));
    let (_, body) = h.get("/total").await;
    assert_eq!(body["count"], 2);
}

#[tokio::test]
async fn test_storage_fetch_is_bad_gateway() {
    let h = Harness::new(2, None);
    let (status, body) = h.post("/restore", json!({"save_path": "s3://"})).await;
    assert_eq!(status, StatusCode::BAD_GATEWAY);
    assert!(body["error"].as_str().unwrap().contains("s3://"));
}

#[tokio::test]
async fn test_health_and_metrics() {
    let h = Harness::new(2, None);
    let (status, body) = h.get("/health").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "SERVING");

    h.post("/add", json!({"id": 1, "embedding": [1.0, 1.0]})).await;
    h.post("/add", json!({"id": 2, "embedding": [1.0]})).await;
    h.post("/search", json!({"id": 1, "count": 1})).await;

    let (_, body) = h.get("/metrics").await;
    assert_eq!(body["total_adds"], 1);
    assert_eq!(body["total_failures"], 1);
    assert_eq!(body["total_searches"], 1);

    h.state.health.set_not_serving();
    let (status, body) = h.get("/health").await;
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(body["status"], "NOT_SERVING");
}
