//! Image read path.
//!
//! A hit is served from the store. A miss schedules a background populate for
//! the key and proxies the origin directly, so a cold key is served as long as
//! the origin has it.

use crate::error::{ApiError, ApiResult};
use crate::metrics;
use crate::state::AppState;
use axum::body::Body;
use axum::extract::{Path, State};
use axum::http::header::{CONTENT_LENGTH, CONTENT_TYPE};
use axum::http::{HeaderName, StatusCode};
use axum::response::{IntoResponse, Response};
use tessera_core::{IMAGE_CONTENT_TYPE, OriginKind, ResolvedImage, SizeClass};
use tessera_origin::OriginError;

/// Cache result header.
pub const X_CACHE: HeaderName = HeaderName::from_static("x-cache");

/// Suffix every image path carries.
const IMAGE_SUFFIX: &str = ".jpg";

/// Map the three path segments onto a cache key and origin URL.
fn resolve_request(
    state: &AppState,
    origin: &str,
    size: &str,
    file: &str,
) -> ApiResult<ResolvedImage> {
    let origin: OriginKind = origin.parse()?;
    let size: SizeClass = size.parse()?;
    let identifier = file.strip_suffix(IMAGE_SUFFIX).ok_or_else(|| {
        ApiError::BadRequest(format!("expected a {IMAGE_SUFFIX} file, got {file}"))
    })?;

    Ok(state.resolver.resolve(origin, size, identifier)?)
}

/// GET /images/{origin}/{size}/{file}
pub async fn get_image(
    State(state): State<AppState>,
    Path((origin, size, file)): Path<(String, String, String)>,
) -> ApiResult<Response> {
    let image = resolve_request(&state, &origin, &size, &file)?;
    let key = image.key.to_string();

    match state.storage.get(&key).await {
        Ok(object) => {
            metrics::READ_REQUESTS.with_label_values(&["hit"]).inc();
            tracing::debug!(key = %key, size = object.meta.size, "Cache hit");

            let content_type = object
                .meta
                .content_type
                .unwrap_or_else(|| IMAGE_CONTENT_TYPE.to_string());
            return Ok((
                StatusCode::OK,
                [
                    (CONTENT_TYPE, content_type),
                    (CONTENT_LENGTH, object.data.len().to_string()),
                    (X_CACHE, "HIT".to_string()),
                ],
                Body::from(object.data),
            )
                .into_response());
        }
        Err(e) if e.is_not_found() => {}
        Err(e) => {
            // The store is never the source of truth
            metrics::STORE_READ_ERRORS.inc();
            tracing::warn!(key = %key, error = %e, "Store read failed, serving from origin");
        }
    }

    metrics::READ_REQUESTS.with_label_values(&["miss"]).inc();
    tracing::debug!(key = %key, "Cache miss");
    state
        .background
        .spawn_populate(state.populator.clone(), image.clone());

    match state.origin.fetcher.fetch(&image.origin_url).await {
        Ok(fetched) => {
            let content_type = fetched
                .content_type
                .unwrap_or_else(|| IMAGE_CONTENT_TYPE.to_string());
            Ok((
                StatusCode::OK,
                [
                    (CONTENT_TYPE, content_type),
                    (CONTENT_LENGTH, fetched.data.len().to_string()),
                    (X_CACHE, "MISS".to_string()),
                ],
                Body::from(fetched.data),
            )
                .into_response())
        }
        Err(OriginError::Status { status, .. }) => {
            metrics::ORIGIN_PROXY_FAILURES
                .with_label_values(&["status"])
                .inc();
            tracing::info!(key = %key, status, "Origin refused cold read");
            let status = StatusCode::from_u16(status).unwrap_or(StatusCode::BAD_GATEWAY);
            Ok((status, [(X_CACHE, "MISS")], Body::empty()).into_response())
        }
        Err(e) => {
            metrics::ORIGIN_PROXY_FAILURES
                .with_label_values(&["transport"])
                .inc();
            tracing::warn!(key = %key, error = %e, "Origin fetch failed on cold read");
            Err(ApiError::BadGateway(format!("origin unavailable for {key}")))
        }
    }
}

/// Fallback for every other path or method.
pub async fn unsupported_request() -> ApiError {
    ApiError::BadRequest("unsupported request".to_string())
}
