//! Integration tests for Undertow
//!
//! These tests run the retrieval layer and the HTTP surface against a
//! simulated swarm, asserting on the bytes delivered and on the block
//! requests the swarm observed.

#[path = "integration/support.rs"]
mod support;

#[path = "integration/http_streaming.rs"]
mod http_streaming;
#[path = "integration/parallel_download.rs"]
mod parallel_download;
#[path = "integration/pulling.rs"]
mod pulling;
