//! 路由组装。

use axum::extract::{DefaultBodyLimit, Extension};
use axum::routing::{delete, get, post};
use axum::{Router, middleware};
use std::sync::Arc;

use crate::storage::Storage;
use crate::{files, health, http};

/// Builds the API router; tracing and CORS layers are added by the caller.
pub fn build_router(storage: Arc<Storage>) -> Router {
    let upload = post(files::upload_file).layer(DefaultBodyLimit::disable());

    Router::new()
        .route("/health", get(health::liveness))
        .route("/api/version", get(health::get_version_info))
        .route("/uploads", upload.clone())
        .route("/uploads/", upload)
        .route("/uploads/delete", delete(files::delete_file))
        .route("/uploads/{*path}", get(files::download_file))
        .layer(middleware::from_fn(http::add_security_headers))
        .layer(Extension(storage))
}
