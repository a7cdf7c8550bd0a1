//! Route configuration.

use crate::handlers;
use crate::metrics::metrics_handler;
use crate::state::AppState;
use axum::Router;
use axum::handler::Handler;
use axum::routing::{MethodRouter, get};
use tower_http::trace::TraceLayer;

/// Create the application router.
///
/// Anything that is not a GET on a known route is answered with 400.
pub fn create_router(state: AppState) -> Router {
    let mut router = Router::new()
        .route("/images/{origin}/{size}/{file}", get_only(handlers::get_image))
        .route("/health", get_only(handlers::health_check));

    // Should be reachable only from the scraper's network
    if state.config.server.metrics_enabled {
        router = router.route("/metrics", get_only(metrics_handler));
    }

    router
        .fallback(handlers::unsupported_request)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// GET only. axum answers HEAD from the GET handler unless HEAD has its own.
fn get_only<H, T>(handler: H) -> MethodRouter<AppState>
where
    H: Handler<T, AppState>,
    T: 'static,
{
    get(handler)
        .head(handlers::unsupported_request)
        .fallback(handlers::unsupported_request)
}
