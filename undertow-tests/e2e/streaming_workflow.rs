//! A player seeking through a file over a live listener.

use std::sync::Arc;

use reqwest::StatusCode;
use reqwest::header::{CONTENT_RANGE, RANGE};
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use undertow_core::FolderId;
use undertow_core::config::UndertowConfig;
use undertow_sim::SimulatedSwarm;
use undertow_web::{AppState, UrlSigner, serve_on};

const SEED: [u8; 32] = [3; 32];

fn content(len: usize) -> Vec<u8> {
    (0..len).map(|i| (i % 251) as u8).collect()
}

struct LiveServer {
    base_url: String,
    swarm: Arc<SimulatedSwarm>,
    shutdown: CancellationToken,
    handle: JoinHandle<std::io::Result<()>>,
}

impl LiveServer {
    async fn start(len: usize) -> Self {
        let mut config = UndertowConfig::for_testing();
        config.server.stream_chunk_size = 4096;

        let swarm = Arc::new(SimulatedSwarm::from_config(&config.simulation));
        swarm.seed_bytes(&FolderId::new("library"), "films/trailer.webm", content(len), 1024);

        let state = AppState::new(swarm.clone(), swarm.clone(), swarm.clone(), config)
            .with_signer(UrlSigner::from_seed(SEED));
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let base_url = format!("http://{}", listener.local_addr().unwrap());

        let shutdown = CancellationToken::new();
        let handle = tokio::spawn(serve_on(listener, state, shutdown.clone()));

        Self {
            base_url,
            swarm,
            shutdown,
            handle,
        }
    }

    fn url(&self) -> String {
        let path = UrlSigner::from_seed(SEED)
            .issue_url(&FolderId::new("library"), "films/trailer.webm");
        format!("{}{}", self.base_url, path)
    }

    async fn stop(self) {
        self.shutdown.cancel();
        self.handle.await.unwrap().unwrap();
    }
}

#[tokio::test]
async fn test_player_probes_then_seeks() {
    let server = LiveServer::start(20_000).await;
    let client = reqwest::Client::new();
    let expected = content(20_000);

    let probe = client.head(server.url()).send().await.unwrap();
    assert_eq!(probe.status(), StatusCode::OK);
    assert_eq!(probe.content_length(), Some(20_000));
    assert_eq!(server.swarm.block_requests(), 0);

    let seek = client
        .get(server.url())
        .header(RANGE, "bytes=15000-")
        .send()
        .await
        .unwrap();
    assert_eq!(seek.status(), StatusCode::PARTIAL_CONTENT);
    assert_eq!(
        seek.headers().get(CONTENT_RANGE).unwrap(),
        "bytes 15000-19999/20000"
    );
    let body = seek.bytes().await.unwrap();
    assert_eq!(body.as_ref(), &expected[15000..]);

    let full = client.get(server.url()).send().await.unwrap();
    assert_eq!(full.status(), StatusCode::OK);
    assert_eq!(full.bytes().await.unwrap().as_ref(), expected.as_slice());

    server.stop().await;
}

#[tokio::test]
async fn test_forged_url_is_refused() {
    let server = LiveServer::start(1000).await;

    let forged = server.url().replace("trailer", "teaser");
    let response = reqwest::get(forged).await.unwrap();

    assert_eq!(response.status(), StatusCode::FORBIDDEN);
    assert_eq!(server.swarm.block_requests(), 0);

    server.stop().await;
}

#[tokio::test]
async fn test_cache_clear_over_http() {
    let server = LiveServer::start(3000).await;
    let client = reqwest::Client::new();

    client.get(server.url()).send().await.unwrap().bytes().await.unwrap();
    let stats: serde_json::Value = client
        .get(format!("{}/cache/stats", server.base_url))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(stats["entries"], 3);

    let cleared = client
        .post(format!("{}/cache/clear", server.base_url))
        .send()
        .await
        .unwrap();
    assert_eq!(cleared.status(), StatusCode::NO_CONTENT);

    server.stop().await;
}
