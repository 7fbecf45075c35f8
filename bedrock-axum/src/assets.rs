//! Static files under `/assets/*` and `/favicon.ico`.
//!
//! Files are looked up in the configured asset directory first, then in
//! each feature's `assets` directory, in feature order.

use std::path::{Component, Path, PathBuf};
use std::sync::Arc;

use axum::body::Body;
use axum::extract::{Path as UrlPath, Request};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::Router;
use bedrock_core::AppError;
use tower::ServiceExt;
use tower_http::services::ServeFile;

use crate::error::ApiError;

#[derive(Debug, Clone, Default)]
pub struct AssetDirs {
    dirs: Arc<Vec<PathBuf>>,
}

impl AssetDirs {
    pub fn new(dirs: Vec<PathBuf>) -> Self {
        Self { dirs: Arc::new(dirs) }
    }

    pub fn dirs(&self) -> &[PathBuf] {
        &self.dirs
    }

    /// The first existing file for `relative`, or `None`.
    pub fn find(&self, relative: &Path) -> Option<PathBuf> {
        self.dirs
            .iter()
            .map(|dir| dir.join(relative))
            .find(|candidate| candidate.is_file())
    }
}

/// A request path as a relative file path. Anything that could leave the
/// asset directory (`..`, roots, drive prefixes) yields `None`.
pub fn sanitize(raw: &str) -> Option<PathBuf> {
    let mut out = PathBuf::new();
    for component in Path::new(raw.trim_start_matches('/')).components() {
        match component {
            Component::Normal(part) => out.push(part),
            Component::CurDir => {}
            Component::ParentDir | Component::RootDir | Component::Prefix(_) => return None,
        }
    }
    (!out.as_os_str().is_empty()).then_some(out)
}

async fn serve(dirs: &AssetDirs, raw: &str, req: Request) -> Response {
    let Some(relative) = sanitize(raw) else {
        tracing::warn!(path = raw, "asset path rejected");
        return ApiError::from(AppError::bad_request("invalid asset path")).into_response();
    };
    let Some(file) = dirs.find(&relative) else {
        return ApiError::from(AppError::not_found("asset not found")).into_response();
    };
    match ServeFile::new(file).oneshot(req).await {
        Ok(res) => res.map(Body::new),
        Err(never) => match never {},
    }
}

pub fn router<S>(dirs: AssetDirs) -> Router<S>
where
    S: Clone + Send + Sync + 'static,
{
    let favicon_dirs = dirs.clone();
    Router::new()
        .route(
            "/assets/{*path}",
            get(move |UrlPath(path): UrlPath<String>, req: Request| {
                let dirs = dirs.clone();
                async move { serve(&dirs, &path, req).await }
            }),
        )
        .route(
            "/favicon.ico",
            get(move |req: Request| {
                let dirs = favicon_dirs.clone();
                async move { serve(&dirs, "favicon.ico", req).await }
            }),
        )
}
