//! Streaming server wiring: shared state, router and listener loop.

use std::sync::Arc;

use axum::Router;
use axum::routing::{get, post};
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tower::ServiceBuilder;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::info;
use undertow_core::config::UndertowConfig;
use undertow_core::streaming::ProgressCallback;
use undertow_core::{BlockCache, IndexService, LocalStorage, PeerTransport};

use crate::handlers::{cache_stats, clear_cache, serve_file, sign_url};
use crate::signing::{FILE_ROUTE, UrlSigner};

/// State shared by every request.
///
/// Collaborators and the block cache live for the whole process; each
/// request builds its own `Puller` on top of them.
#[derive(Clone)]
pub struct AppState {
    pub index: Arc<dyn IndexService>,
    pub transport: Arc<dyn PeerTransport>,
    pub local: Arc<dyn LocalStorage>,
    pub cache: Arc<BlockCache>,
    pub signer: Arc<UrlSigner>,
    pub config: Arc<UndertowConfig>,
    pub progress: Option<ProgressCallback>,
}

impl AppState {
    /// Creates state with a fresh cache sized from `config` and a new signing key.
    pub fn new(
        index: Arc<dyn IndexService>,
        transport: Arc<dyn PeerTransport>,
        local: Arc<dyn LocalStorage>,
        config: UndertowConfig,
    ) -> Self {
        Self {
            index,
            transport,
            local,
            cache: Arc::new(BlockCache::new(&config.cache)),
            signer: Arc::new(UrlSigner::generate()),
            config: Arc::new(config),
            progress: None,
        }
    }

    pub fn with_signer(mut self, signer: UrlSigner) -> Self {
        self.signer = Arc::new(signer);
        self
    }

    /// Shares an existing cache instead of the one built from config.
    pub fn with_cache(mut self, cache: Arc<BlockCache>) -> Self {
        self.cache = cache;
        self
    }

    /// Reports read progress of every streamed request.
    pub fn with_progress(mut self, progress: ProgressCallback) -> Self {
        self.progress = Some(progress);
        self
    }
}

/// Builds the application router.
///
/// `/sign` is only routed when `expose_signing` is set; otherwise URLs are
/// issued out of band through `UrlSigner::issue_url`. Only `/file` answers
/// cross-origin requests; management routes stay same-origin.
pub fn build_router(state: AppState) -> Router {
    let mut router = Router::new()
        .route(FILE_ROUTE, get(serve_file).layer(CorsLayer::permissive()))
        .route("/cache/stats", get(cache_stats))
        .route("/cache/clear", post(clear_cache));

    if state.config.server.expose_signing {
        router = router.route("/sign", get(sign_url));
    }

    router
        .layer(ServiceBuilder::new().layer(TraceLayer::new_for_http()))
        .with_state(state)
}

/// Serves on an already bound listener until `shutdown` is cancelled.
///
/// # Errors
///
/// - `std::io::Error` - If the listener address cannot be read or accepting fails
pub async fn serve_on(
    listener: TcpListener,
    state: AppState,
    shutdown: CancellationToken,
) -> std::io::Result<()> {
    let address = listener.local_addr()?;
    info!("Undertow streaming server listening on http://{}", address);

    axum::serve(listener, build_router(state))
        .with_graceful_shutdown(shutdown.cancelled_owned())
        .await?;

    info!("Undertow streaming server on {} stopped", address);
    Ok(())
}

/// Binds the configured address and serves until `shutdown` is cancelled.
///
/// # Errors
///
/// - `std::io::Error` - If binding or serving fails
pub async fn run_server(state: AppState, shutdown: CancellationToken) -> std::io::Result<()> {
    let listener = TcpListener::bind(state.config.server.bind_address).await?;
    serve_on(listener, state, shutdown).await
}
