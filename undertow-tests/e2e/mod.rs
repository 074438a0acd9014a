//! End-to-end tests for Undertow
//!
//! These tests start the real HTTP listener on a loopback port and drive it
//! with an HTTP client, covering the path a media player takes.

mod streaming_workflow;
