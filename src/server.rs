use std::sync::Arc;
use std::time::Instant;

use axum::{
    extract::{
        multipart::{MultipartError, MultipartRejection},
        DefaultBodyLimit, Multipart, State,
    },
    http::{header, HeaderValue, Method, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use futures::TryStreamExt;
use serde_json::json;
use tower_http::{
    cors::{AllowHeaders, AllowOrigin, CorsLayer},
    trace::TraceLayer,
};

use crate::config::Limits;
use crate::errors::{RembgError, Result};
use crate::image_processor;
use crate::traits::ImageSegmentationModel;
use crate::upload::BoundedReader;

/// Name of the multipart field carrying the image.
pub const FILE_FIELD: &str = "file";

#[derive(Clone)]
pub struct AppState {
    pub model: Arc<dyn ImageSegmentationModel>,
    pub limits: Limits,
}

impl AppState {
    pub fn new(model: Arc<dyn ImageSegmentationModel>, limits: Limits) -> Self {
        Self { model, limits }
    }
}

pub fn create_app(state: AppState, cors_origins: &[String]) -> Router {
    let body_limit = state.limits.body_limit();

    Router::new()
        .route("/health", get(health_handler))
        .route("/remove-bg", post(remove_bg_handler))
        .layer(DefaultBodyLimit::max(body_limit))
        .layer(cors_layer(cors_origins))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Credentialed CORS cannot use a wildcard header list, so request headers are mirrored.
pub fn cors_layer(origins: &[String]) -> CorsLayer {
    let origins: Vec<HeaderValue> = origins
        .iter()
        .filter_map(|origin| match HeaderValue::from_str(origin) {
            Ok(value) => Some(value),
            Err(_) => {
                tracing::warn!(%origin, "skipping invalid CORS origin");
                None
            }
        })
        .collect();

    CorsLayer::new()
        .allow_origin(AllowOrigin::list(origins))
        .allow_credentials(true)
        .allow_methods([Method::GET, Method::POST])
        .allow_headers(AllowHeaders::mirror_request())
}

async fn health_handler() -> impl IntoResponse {
    Json(json!({ "ok": true }))
}

async fn remove_bg_handler(
    State(state): State<AppState>,
    multipart: std::result::Result<Multipart, MultipartRejection>,
) -> Result<Response> {
    let started = Instant::now();
    let limits = state.limits;
    let mut multipart = multipart.map_err(|rejection| RembgError::MalformedRequest {
        message: rejection.body_text(),
    })?;

    let bytes = read_file_field(&mut multipart, limits).await?;
    tracing::debug!(bytes = bytes.len(), "upload received");

    let model = Arc::clone(&state.model);
    let png = tokio::task::spawn_blocking(move || {
        image_processor::remove_background(&bytes, model.as_ref(), limits.max_dimension)
    })
    .await
    .map_err(|e| RembgError::Worker {
        message: e.to_string(),
    })??;

    tracing::info!(
        bytes = png.as_bytes().len(),
        elapsed_ms = started.elapsed().as_millis() as u64,
        "background removed"
    );

    Ok((
        StatusCode::OK,
        [(header::CONTENT_TYPE, "image/png")],
        png.into_inner(),
    )
        .into_response())
}

/// Finds the file field, validates its declared type and buffers it under the
/// upload limit. Other form fields are skipped.
async fn read_file_field(multipart: &mut Multipart, limits: Limits) -> Result<Vec<u8>> {
    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| multipart_error(e, limits))?
    {
        if field.name() != Some(FILE_FIELD) {
            continue;
        }

        // raw header, the parsed mime is case-folded
        let content_type = field
            .headers()
            .get(header::CONTENT_TYPE)
            .and_then(|value| value.to_str().ok());
        image_processor::check_content_type(content_type)?;

        return BoundedReader::new(
            field.map_err(move |e| multipart_error(e, limits)),
            limits.max_upload_bytes(),
            limits.max_upload_mb,
        )
        .read_to_end()
        .await;
    }

    Err(RembgError::MalformedRequest {
        message: format!("Missing `{FILE_FIELD}` field."),
    })
}

fn multipart_error(err: MultipartError, limits: Limits) -> RembgError {
    if err.status() == StatusCode::PAYLOAD_TOO_LARGE {
        RembgError::PayloadTooLarge {
            max_mb: limits.max_upload_mb,
        }
    } else {
        err.into()
    }
}
