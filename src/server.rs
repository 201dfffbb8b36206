//! The HTTP front of the service.
//!
//! A single route, `POST /{volume}?cookie=<secret>`, accepts an
//! `application/x-tar` body and unpacks it into the named volume. The body is
//! streamed into the extraction engine on a blocking thread; the response is
//! only sent once extraction has finished.

use std::io;
use std::sync::Arc;

use axum::body::{Body, HttpBody};
use axum::extract::{Path, Query, State};
use axum::http::header::CONTENT_TYPE;
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::post;
use axum::Router;
use futures::TryStreamExt;
use serde::Deserialize;
use thiserror::Error;
use tokio::task::JoinError;
use tokio_util::io::{StreamReader, SyncIoBridge};
use tracing::{info, warn};

use crate::config::Config;
use crate::error::ExtractError;
use crate::extract::populate_volume;

const TAR_CONTENT_TYPE: &str = "application/x-tar";

/// Why an upload was refused or failed.
///
/// The message of the error is sent back as the body of the response.
#[derive(Debug, Error)]
pub enum GateError {
    /// The shared secret was missing or wrong.
    #[error("invalid cookie")]
    Auth,

    /// The request cannot be processed as sent.
    #[error("{0}")]
    BadRequest(&'static str),

    /// The body is not declared as a tar archive.
    #[error("unsupported content type `{0}`, expected `application/x-tar`")]
    UnsupportedMediaType(String),

    /// The volume does not exist or its name is not acceptable.
    #[error("volume `{0}` not found")]
    NotFound(String),

    /// Unpacking the archive failed part way through.
    #[error(transparent)]
    Extract(#[from] ExtractError),

    /// The extraction task was cancelled before it completed.
    #[error("extraction was cancelled")]
    Cancelled,
}

impl GateError {
    /// The HTTP status reported for this error.
    pub fn status(&self) -> StatusCode {
        match self {
            GateError::Auth => StatusCode::UNAUTHORIZED,
            GateError::BadRequest(_) => StatusCode::BAD_REQUEST,
            GateError::UnsupportedMediaType(_) => StatusCode::UNSUPPORTED_MEDIA_TYPE,
            GateError::NotFound(_) => StatusCode::NOT_FOUND,
            GateError::Extract(_) => StatusCode::NOT_ACCEPTABLE,
            GateError::Cancelled => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for GateError {
    fn into_response(self) -> Response {
        (self.status(), format!("{self}\n")).into_response()
    }
}

#[derive(Debug, Deserialize)]
struct UploadParams {
    cookie: Option<String>,
}

/// Builds the router serving uploads for `config`.
pub fn router(config: Arc<Config>) -> Router {
    Router::new()
        .route("/{volume}", post(upload))
        .with_state(config)
}

async fn upload(
    State(config): State<Arc<Config>>,
    Path(volume): Path<String>,
    Query(params): Query<UploadParams>,
    headers: HeaderMap,
    body: Body,
) -> Result<&'static str, GateError> {
    let res = populate(&config, &volume, params, &headers, body).await;
    match &res {
        Ok(()) => info!(volume = %volume, "volume populated"),
        Err(e) => warn!(volume = %volume, status = %e.status(), error = %e, "upload rejected"),
    }
    res.map(|()| "success\n")
}

async fn populate(
    config: &Config,
    volume: &str,
    params: UploadParams,
    headers: &HeaderMap,
    body: Body,
) -> Result<(), GateError> {
    // Nothing is read or touched before the caller is authenticated.
    let cookie = params.cookie.unwrap_or_default();
    if !constant_time_eq(cookie.as_bytes(), config.cookie.as_bytes()) {
        return Err(GateError::Auth);
    }

    let content_type = headers
        .get(CONTENT_TYPE)
        .map(|v| String::from_utf8_lossy(v.as_bytes()).into_owned())
        .unwrap_or_default();
    let essence = content_type.split(';').next().unwrap_or_default().trim();
    if !essence.eq_ignore_ascii_case(TAR_CONTENT_TYPE) {
        return Err(GateError::UnsupportedMediaType(content_type));
    }

    let dir = config
        .volume_dir(volume)
        .ok_or_else(|| GateError::NotFound(volume.to_string()))?;
    match tokio::fs::metadata(&dir).await {
        Ok(m) if m.is_dir() => {}
        _ => return Err(GateError::NotFound(volume.to_string())),
    }

    if body.is_end_stream() {
        return Err(GateError::BadRequest("no data sent"));
    }

    info!(volume = %volume, path = %dir.display(), "unpacking upload");
    let stream = body.into_data_stream().map_err(io::Error::other);
    let reader = SyncIoBridge::new(StreamReader::new(stream));
    let options = config.extract_options();

    let summary = match tokio::task::spawn_blocking(move || {
        populate_volume(reader, &dir, &options)
    })
    .await
    .map_err(JoinError::try_into_panic)
    {
        Ok(result) => result?,
        Err(Err(_err)) => return Err(GateError::Cancelled),
        Err(Ok(payload)) => std::panic::resume_unwind(payload),
    };

    info!(
        volume = %volume,
        entries = summary.entries,
        root_marker = summary.root_marker,
        normalized = summary.normalized,
        "upload unpacked"
    );
    Ok(())
}

/// Compares two secrets without short-circuiting on the first difference.
fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    a.iter().zip(b).fold(0u8, |acc, (x, y)| acc | (x ^ y)) == 0
}
