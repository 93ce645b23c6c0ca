#![allow(dead_code)]

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use axum::body::Body;
use axum::http::{Request, StatusCode};
use axum::Router;
use http_body_util::BodyExt;
use image::{DynamicImage, Rgb, RgbImage};
use inpaint_cloud::{MemoryObjectStore, StoreGateway};
use inpaint_core::naming::FileNameNaming;
use inpaint_pipeline::{
    Executor, InferenceEngine, InferenceError, InferenceRequest, JobContext, TaskRegistry,
};
use tempfile::TempDir;
use tokio_util::sync::CancellationToken;
use tower::ServiceExt;

use inpaint_api::config::ServerConfig;
use inpaint_api::router::build_app_router;
use inpaint_api::state::AppState;

/// Public URL base of the in-memory store used by tests.
pub const STORE_BASE: &str = "https://bucket.s3.us-east-1.amazonaws.com";

/// Build a test `ServerConfig` with safe defaults.
pub fn test_config(work_root: &Path) -> ServerConfig {
    ServerConfig {
        host: "127.0.0.1".to_string(),
        port: 0,
        cors_origins: vec!["http://localhost:3000".to_string()],
        request_timeout_secs: 30,
        worker_pool_size: 2,
        task_ttl_secs: None,
        work_root: work_root.to_path_buf(),
        canonical_size: 512,
        output_naming: "file-name".to_string(),
    }
}

/// Engine that writes the expected result file and succeeds.
pub struct CannedEngine;

#[async_trait]
impl InferenceEngine for CannedEngine {
    async fn run(&self, request: &InferenceRequest) -> Result<Vec<PathBuf>, InferenceError> {
        let output = request.expected_output();
        if let Some(parent) = output.parent() {
            std::fs::create_dir_all(parent).expect("mkdir results");
        }
        std::fs::write(&output, b"png").expect("write result");
        Ok(vec![output])
    }
}

/// A running app plus handles on its collaborators.
pub struct TestApp {
    pub router: Router,
    pub store: Arc<MemoryObjectStore>,
    pub work: TempDir,
    pub inputs: TempDir,
}

impl TestApp {
    pub fn input(&self, name: &str, image: RgbImage) -> String {
        let path = self.inputs.path().join(name);
        DynamicImage::ImageRgb8(image).save(&path).expect("save input");
        path.display().to_string()
    }

    pub async fn send(&self, request: Request<Body>) -> (StatusCode, serde_json::Value) {
        let response = self.router.clone().oneshot(request).await.expect("response");
        let status = response.status();
        let bytes = response.into_body().collect().await.expect("body").to_bytes();
        let json = serde_json::from_slice(&bytes).unwrap_or(serde_json::Value::Null);
        (status, json)
    }

    /// Poll `uri` until the task reaches a terminal status.
    pub async fn wait_for_terminal(&self, uri: &str) -> serde_json::Value {
        let deadline = tokio::time::Instant::now() + Duration::from_secs(20);
        loop {
            let (status, json) = self.send(get(uri)).await;
            assert_eq!(status, StatusCode::OK, "polling {uri}: {json}");
            if json["status"] == "completed" || json["status"] == "failed" {
                return json;
            }
            assert!(tokio::time::Instant::now() < deadline, "task never finished: {json}");
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    }
}

/// Build the full application router with all middleware layers, backed by
/// an in-memory object store and the given inference engine.
pub fn build_test_app_with(engine: Arc<dyn InferenceEngine>) -> TestApp {
    let work = tempfile::tempdir().expect("work dir");
    let inputs = tempfile::tempdir().expect("inputs dir");
    let config = test_config(work.path());

    let store = Arc::new(MemoryObjectStore::with_base_url(STORE_BASE));
    let registry = TaskRegistry::start(CancellationToken::new());
    let executor = Executor::start(config.worker_pool_size, registry).expect("executor");

    let jobs = JobContext::new(
        StoreGateway::new(store.clone()),
        engine,
        Arc::new(FileNameNaming),
        work.path(),
    );

    let state = AppState {
        executor: Arc::new(executor),
        jobs,
    };

    TestApp {
        router: build_app_router(state, &config),
        store,
        work,
        inputs,
    }
}

pub fn build_test_app() -> TestApp {
    build_test_app_with(Arc::new(CannedEngine))
}

pub fn get(uri: &str) -> Request<Body> {
    Request::builder()
        .uri(uri)
        .body(Body::empty())
        .expect("request")
}

pub fn post_json(uri: &str, body: serde_json::Value) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(uri)
        .header("content-type", "application/json")
        .body(Body::from(body.to_string()))
        .expect("request")
}

/// Bright texture with every pixel in `210..=240`.
pub fn textured(side: u32) -> RgbImage {
    RgbImage::from_fn(side, side, |x, y| {
        let v = 210 + ((x * 7 + y * 13) % 31) as u8;
        Rgb([v, v, v])
    })
}

/// [`textured`] with a white `side`-pixel square centred in it.
pub fn textured_with_square(size: u32, side: u32) -> RgbImage {
    let mut image = textured(size);
    let start = (size - side) / 2;
    for y in start..start + side {
        for x in start..start + side {
            image.put_pixel(x, y, Rgb([255, 255, 255]));
        }
    }
    image
}
