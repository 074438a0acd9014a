//! Shared fixtures for the integration tests.

use std::sync::Arc;

use axum::body::Body;
use axum::http::{HeaderMap, Request, StatusCode};
use bytes::Bytes;
use tower::ServiceExt;
use undertow_core::FolderId;
use undertow_core::config::UndertowConfig;
use undertow_sim::SimulatedSwarm;
use undertow_web::{AppState, UrlSigner, build_router};

pub const SIGNING_SEED: [u8; 32] = [7; 32];

pub fn media_folder() -> FolderId {
    FolderId::new("media")
}

/// Deterministic content that differs between neighbouring blocks.
pub fn pattern(len: usize) -> Vec<u8> {
    (0..len).map(|i| (i % 251) as u8).collect()
}

/// Two reliable peers holding one seeded file.
pub fn swarm_with_file(path: &str, len: usize, block_size: u32) -> Arc<SimulatedSwarm> {
    let swarm = Arc::new(SimulatedSwarm::from_config(
        &UndertowConfig::for_testing().simulation,
    ));
    swarm.seed_bytes(&media_folder(), path, pattern(len), block_size);
    swarm
}

pub fn app_state(swarm: &Arc<SimulatedSwarm>, config: UndertowConfig) -> AppState {
    AppState::new(swarm.clone(), swarm.clone(), swarm.clone(), config)
        .with_signer(UrlSigner::from_seed(SIGNING_SEED))
}

pub fn signed_url(path: &str) -> String {
    UrlSigner::from_seed(SIGNING_SEED).issue_url(&media_folder(), path)
}

pub struct Reply {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: Bytes,
}

impl Reply {
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).and_then(|v| v.to_str().ok())
    }
}

/// Runs one request through a fresh router and collects the whole body.
pub async fn send(state: AppState, request: Request<Body>) -> Reply {
    let response = build_router(state).oneshot(request).await.unwrap();
    let status = response.status();
    let headers = response.headers().clone();
    let body = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    Reply {
        status,
        headers,
        body,
    }
}

pub fn get(uri: &str) -> Request<Body> {
    Request::get(uri).body(Body::empty()).unwrap()
}

pub fn get_range(uri: &str, range: &str) -> Request<Body> {
    Request::get(uri)
        .header("range", range)
        .body(Body::empty())
        .unwrap()
}
