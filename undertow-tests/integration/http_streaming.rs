//! HTTP range streaming against a simulated swarm.

use std::time::Duration;

use axum::body::Body;
use axum::http::{Method, Request, StatusCode};
use tokio::time::Instant;
use undertow_core::config::UndertowConfig;
use undertow_sim::SimulatedSwarm;

use crate::support::{
    Reply, app_state, get, get_range, media_folder, pattern, send, signed_url, swarm_with_file,
};

const MOVIE: &str = "movie.mp4";

fn tampered_url(path: &str) -> String {
    let mut url = signed_url(path);
    let last = url.pop().unwrap();
    url.push(if last == '0' { '1' } else { '0' });
    url
}

#[tokio::test]
async fn test_full_get_streams_whole_file() {
    let swarm = swarm_with_file(MOVIE, 5000, 512);
    let state = app_state(&swarm, UndertowConfig::for_testing());

    let reply = send(state, get(&signed_url(MOVIE))).await;

    assert_eq!(reply.status, StatusCode::OK);
    assert_eq!(reply.header("content-length"), Some("5000"));
    assert_eq!(reply.header("content-type"), Some("video/mp4"));
    assert_eq!(reply.header("accept-ranges"), Some("bytes"));
    assert_eq!(
        reply.header("cache-control"),
        Some("no-cache, no-store, must-revalidate")
    );
    assert!(reply.header("content-range").is_none());
    assert_eq!(reply.body.as_ref(), pattern(5000).as_slice());
    assert_eq!(swarm.block_requests(), 10);
}

#[tokio::test]
async fn test_single_byte_range_fetches_one_block() {
    let swarm = swarm_with_file(MOVIE, 1000, 256);
    let state = app_state(&swarm, UndertowConfig::for_testing());

    let reply = send(state, get_range(&signed_url(MOVIE), "bytes=0-0")).await;

    assert_eq!(reply.status, StatusCode::PARTIAL_CONTENT);
    assert_eq!(reply.header("content-range"), Some("bytes 0-0/1000"));
    assert_eq!(reply.header("content-length"), Some("1"));
    assert_eq!(reply.body.as_ref(), &[0u8]);
    assert_eq!(swarm.block_requests(), 1);
}

#[tokio::test]
async fn test_range_spanning_blocks() {
    let swarm = swarm_with_file(MOVIE, 1000, 256);
    let state = app_state(&swarm, UndertowConfig::for_testing());

    let reply = send(state, get_range(&signed_url(MOVIE), "bytes=200-599")).await;

    assert_eq!(reply.status, StatusCode::PARTIAL_CONTENT);
    assert_eq!(reply.header("content-range"), Some("bytes 200-599/1000"));
    assert_eq!(reply.body.as_ref(), &pattern(1000)[200..600]);
    // Blocks 0, 1 and 2 cover bytes 0..768.
    assert_eq!(swarm.block_requests(), 3);
}

#[tokio::test]
async fn test_suffix_and_open_ranges() {
    let swarm = swarm_with_file(MOVIE, 1000, 256);
    let content = pattern(1000);

    let suffix = send(
        app_state(&swarm, UndertowConfig::for_testing()),
        get_range(&signed_url(MOVIE), "bytes=-100"),
    )
    .await;
    assert_eq!(suffix.status, StatusCode::PARTIAL_CONTENT);
    assert_eq!(suffix.header("content-range"), Some("bytes 900-999/1000"));
    assert_eq!(suffix.body.as_ref(), &content[900..]);

    let open = send(
        app_state(&swarm, UndertowConfig::for_testing()),
        get_range(&signed_url(MOVIE), "bytes=990-"),
    )
    .await;
    assert_eq!(open.header("content-range"), Some("bytes 990-999/1000"));
    assert_eq!(open.body.as_ref(), &content[990..]);
}

#[tokio::test]
async fn test_end_past_size_is_clamped() {
    let swarm = swarm_with_file(MOVIE, 1000, 256);
    let state = app_state(&swarm, UndertowConfig::for_testing());

    let reply = send(state, get_range(&signed_url(MOVIE), "bytes=950-5000")).await;

    assert_eq!(reply.status, StatusCode::PARTIAL_CONTENT);
    assert_eq!(reply.header("content-range"), Some("bytes 950-999/1000"));
    assert_eq!(reply.body.len(), 50);
}

#[tokio::test]
async fn test_unsatisfiable_range_is_416() {
    let swarm = swarm_with_file(MOVIE, 1000, 256);
    let state = app_state(&swarm, UndertowConfig::for_testing());

    let reply = send(state, get_range(&signed_url(MOVIE), "bytes=5000-")).await;

    assert_eq!(reply.status, StatusCode::RANGE_NOT_SATISFIABLE);
    assert_eq!(reply.header("content-range"), Some("bytes */1000"));
    assert_eq!(swarm.block_requests(), 0);
}

#[tokio::test]
async fn test_multiple_range_headers_are_rejected() {
    let swarm = swarm_with_file(MOVIE, 1000, 256);
    let state = app_state(&swarm, UndertowConfig::for_testing());

    let request = Request::get(signed_url(MOVIE))
        .header("range", "bytes=0-9")
        .header("range", "bytes=20-29")
        .body(Body::empty())
        .unwrap();
    let reply = send(state, request).await;

    assert_eq!(reply.status, StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(swarm.block_requests(), 0);
}

#[tokio::test]
async fn test_multi_range_value_is_rejected() {
    let swarm = swarm_with_file(MOVIE, 1000, 256);
    let state = app_state(&swarm, UndertowConfig::for_testing());

    let reply = send(state, get_range(&signed_url(MOVIE), "bytes=0-9,20-29")).await;

    assert_eq!(reply.status, StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(swarm.block_requests(), 0);
}

#[tokio::test]
async fn test_malformed_range_serves_whole_file() {
    let swarm = swarm_with_file(MOVIE, 1000, 256);
    let state = app_state(&swarm, UndertowConfig::for_testing());

    let reply = send(state, get_range(&signed_url(MOVIE), "bytes=abc")).await;

    assert_eq!(reply.status, StatusCode::OK);
    assert_eq!(reply.body.len(), 1000);
}

#[tokio::test]
async fn test_bad_signature_is_403() {
    let swarm = swarm_with_file(MOVIE, 1000, 256);

    let tampered = send(
        app_state(&swarm, UndertowConfig::for_testing()),
        get(&tampered_url(MOVIE)),
    )
    .await;
    assert_eq!(tampered.status, StatusCode::FORBIDDEN);

    let unsigned = send(
        app_state(&swarm, UndertowConfig::for_testing()),
        get("/file?folder=media&path=movie.mp4"),
    )
    .await;
    assert_eq!(unsigned.status, StatusCode::FORBIDDEN);

    assert_eq!(swarm.block_requests(), 0);
}

#[tokio::test]
async fn test_signature_does_not_transfer_between_paths() {
    let swarm = swarm_with_file(MOVIE, 1000, 256);
    swarm.seed_bytes(&media_folder(), "secret.mp4", pattern(10), 256);

    let signed = signed_url(MOVIE);
    let swapped = signed.replace("movie.mp4", "secret.mp4");
    let reply = send(app_state(&swarm, UndertowConfig::for_testing()), get(&swapped)).await;

    assert_eq!(reply.status, StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn test_unknown_file_is_404() {
    let swarm = swarm_with_file(MOVIE, 1000, 256);
    let state = app_state(&swarm, UndertowConfig::for_testing());

    let reply = send(state, get(&signed_url("missing.mp4"))).await;

    assert_eq!(reply.status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_local_copy_skips_transport() {
    let swarm = swarm_with_file(MOVIE, 3000, 256);
    swarm.mark_local(&media_folder(), MOVIE);
    let state = app_state(&swarm, UndertowConfig::for_testing());

    let reply = send(state, get_range(&signed_url(MOVIE), "bytes=100-2099")).await;

    assert_eq!(reply.status, StatusCode::PARTIAL_CONTENT);
    assert_eq!(reply.body.as_ref(), &pattern(3000)[100..2100]);
    assert_eq!(swarm.block_requests(), 0);
    assert!(swarm.local_reads() > 0);
}

#[tokio::test]
async fn test_head_fetches_nothing() {
    let swarm = swarm_with_file(MOVIE, 1000, 256);
    let state = app_state(&swarm, UndertowConfig::for_testing());

    let request = Request::builder()
        .method(Method::HEAD)
        .uri(signed_url(MOVIE))
        .body(Body::empty())
        .unwrap();
    let reply = send(state, request).await;

    assert_eq!(reply.status, StatusCode::OK);
    assert_eq!(reply.header("content-length"), Some("1000"));
    assert!(reply.body.is_empty());
    assert_eq!(swarm.block_requests(), 0);
    assert_eq!(swarm.local_reads(), 0);
}

#[tokio::test]
async fn test_empty_file_has_empty_body() {
    let swarm = swarm_with_file("empty.bin", 0, 256);
    let state = app_state(&swarm, UndertowConfig::for_testing());

    let reply = send(state, get(&signed_url("empty.bin"))).await;

    assert_eq!(reply.status, StatusCode::OK);
    assert_eq!(reply.header("content-length"), Some("0"));
    assert!(reply.body.is_empty());
}

#[tokio::test]
async fn test_no_holder_fails_before_headers() {
    let swarm = std::sync::Arc::new(SimulatedSwarm::new(1));
    swarm.seed_bytes(&media_folder(), MOVIE, pattern(1000), 256);
    let state = app_state(&swarm, UndertowConfig::for_testing());

    let reply = send(state, get(&signed_url(MOVIE))).await;

    assert_eq!(reply.status, StatusCode::INTERNAL_SERVER_ERROR);
}

#[tokio::test]
async fn test_cache_stats_and_clear() {
    let swarm = swarm_with_file(MOVIE, 1000, 256);
    let state = app_state(&swarm, UndertowConfig::for_testing());

    let first = send(state.clone(), get(&signed_url(MOVIE))).await;
    assert_eq!(first.status, StatusCode::OK);
    assert_eq!(swarm.block_requests(), 4);

    // Served from the shared cache the second time.
    let second = send(state.clone(), get(&signed_url(MOVIE))).await;
    assert_eq!(second.body, first.body);
    assert_eq!(swarm.block_requests(), 4);

    let stats = send(state.clone(), get("/cache/stats")).await;
    let stats: serde_json::Value = serde_json::from_slice(&stats.body).unwrap();
    assert_eq!(stats["entries"], 4);
    assert_eq!(stats["hit_count"], 4);

    let cleared = send(
        state.clone(),
        Request::post("/cache/clear").body(Body::empty()).unwrap(),
    )
    .await;
    assert_eq!(cleared.status, StatusCode::NO_CONTENT);

    let stats = send(state, get("/cache/stats")).await;
    let stats: serde_json::Value = serde_json::from_slice(&stats.body).unwrap();
    assert_eq!(stats["entries"], 0);
}

#[tokio::test]
async fn test_sign_route_issues_usable_urls() {
    let swarm = swarm_with_file(MOVIE, 1000, 256);
    let state = app_state(&swarm, UndertowConfig::for_testing());

    let signed = send(state.clone(), get("/sign?folder=media&path=movie.mp4")).await;
    assert_eq!(signed.status, StatusCode::OK);
    let signed: serde_json::Value = serde_json::from_slice(&signed.body).unwrap();
    assert_eq!(signed["size"], 1000);
    assert_eq!(signed["content_type"], "video/mp4");

    let url = signed["url"].as_str().unwrap();
    let Reply { status, body, .. } = send(state, get(url)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body.len(), 1000);
}

#[tokio::test]
async fn test_sign_route_hidden_unless_exposed() {
    let swarm = swarm_with_file(MOVIE, 1000, 256);
    let mut config = UndertowConfig::for_testing();
    config.server.expose_signing = false;

    let reply = send(
        app_state(&swarm, config),
        get("/sign?folder=media&path=movie.mp4"),
    )
    .await;

    assert_eq!(reply.status, StatusCode::NOT_FOUND);
}

#[tokio::test(start_paused = true)]
async fn test_throttle_paces_every_chunk_including_first() {
    let swarm = swarm_with_file(MOVIE, 2048, 512);
    let mut config = UndertowConfig::for_testing();
    config.server.throttle_bytes_per_second = Some(1024);
    config.server.stream_chunk_size = 1024;
    let state = app_state(&swarm, config);

    let started = Instant::now();
    let reply = send(state, get(&signed_url(MOVIE))).await;

    assert_eq!(reply.status, StatusCode::OK);
    assert_eq!(reply.body.len(), 2048);
    assert!(started.elapsed() >= Duration::from_secs(2));
}

#[tokio::test(start_paused = true)]
async fn test_unthrottled_stream_does_not_wait() {
    let swarm = swarm_with_file(MOVIE, 2048, 512);
    let state = app_state(&swarm, UndertowConfig::for_testing());

    let started = Instant::now();
    let reply = send(state, get(&signed_url(MOVIE))).await;

    assert_eq!(reply.body.len(), 2048);
    assert!(started.elapsed() < Duration::from_secs(1));
}

#[tokio::test]
async fn test_file_route_allows_cross_origin_reads() {
    let swarm = swarm_with_file(MOVIE, 1000, 256);
    let state = app_state(&swarm, UndertowConfig::for_testing());

    let request = Request::get(signed_url(MOVIE))
        .header("origin", "https://player.example")
        .body(Body::empty())
        .unwrap();
    let reply = send(state, request).await;

    assert_eq!(reply.status, StatusCode::OK);
    assert_eq!(reply.header("access-control-allow-origin"), Some("*"));
}

#[tokio::test]
async fn test_management_routes_stay_same_origin() {
    let swarm = swarm_with_file(MOVIE, 1000, 256);
    let state = app_state(&swarm, UndertowConfig::for_testing());

    let clear = Request::post("/cache/clear")
        .header("origin", "https://elsewhere.example")
        .body(Body::empty())
        .unwrap();
    let reply = send(state.clone(), clear).await;
    assert!(reply.header("access-control-allow-origin").is_none());

    let preflight = Request::builder()
        .method(Method::OPTIONS)
        .uri("/cache/clear")
        .header("origin", "https://elsewhere.example")
        .header("access-control-request-method", "POST")
        .body(Body::empty())
        .unwrap();
    let reply = send(state, preflight).await;
    assert!(reply.header("access-control-allow-origin").is_none());
    assert!(reply.header("access-control-allow-methods").is_none());
}
