//! HTTP server for the Tessera image cache.
//!
//! This crate provides:
//! - The image read path (hit from the store, miss proxied from the origin)
//! - Bounded background populates scheduled on every miss
//! - The sweep runtime: interval scheduler and continuation queue consumer
//! - Health and Prometheus endpoints

pub mod error;
pub mod handlers;
pub mod metrics;
pub mod routes;
pub mod state;
pub mod sweeper;

pub use error::ApiError;
pub use routes::create_router;
pub use state::{AppState, BackgroundTasks};
