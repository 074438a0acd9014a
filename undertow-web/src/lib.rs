//! Undertow Web - Signed-URL streaming server
//!
//! Serves remote files as seekable HTTP resources behind capability URLs,
//! with single-range support, optional playback throttling and a small
//! management surface for the block cache.

pub mod error;
pub mod handlers;
pub mod server;
pub mod signing;

pub use error::WebError;
pub use server::{AppState, build_router, run_server, serve_on};
pub use signing::{SigningError, UrlSigner};
