use axum::{
    extract::multipart::MultipartError,
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;

type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Structured error types for the background removal service.
///
/// # Why structured errors
///
/// Each variant maps to exactly one HTTP status class, so the handler never has to
/// inspect error strings to decide what the client sees. Client errors carry the
/// message that is returned verbatim; server errors carry their source for the log
/// and are answered with a generic message.
#[derive(Error, Debug)]
pub enum RembgError {
    #[error("Unsupported content type: {content_type:?}")]
    UnsupportedMediaType { content_type: Option<String> },

    #[error("Invalid image")]
    InvalidImage {
        #[source]
        source: image::ImageError,
    },

    #[error("Malformed request: {message}")]
    MalformedRequest { message: String },

    #[error("Payload exceeds {max_mb}MB")]
    PayloadTooLarge { max_mb: u64 },

    #[error("Segmentation failed")]
    Segmentation {
        #[source]
        source: BoxError,
    },

    #[error("Image processing error: {operation} failed")]
    ImageProcessing {
        operation: String,
        #[source]
        source: BoxError,
    },

    #[error("Model error: {operation} failed")]
    Model {
        operation: String,
        #[source]
        source: BoxError,
    },

    #[error("Worker error: {message}")]
    Worker { message: String },
}

pub type Result<T> = std::result::Result<T, RembgError>;

impl RembgError {
    pub fn model(operation: impl Into<String>, source: impl Into<BoxError>) -> Self {
        Self::Model {
            operation: operation.into(),
            source: source.into(),
        }
    }

    pub fn image_processing(operation: impl Into<String>, source: impl Into<BoxError>) -> Self {
        Self::ImageProcessing {
            operation: operation.into(),
            source: source.into(),
        }
    }

    pub fn segmentation(source: impl Into<BoxError>) -> Self {
        Self::Segmentation {
            source: source.into(),
        }
    }

    pub const fn status_code(&self) -> StatusCode {
        match self {
            Self::UnsupportedMediaType { .. }
            | Self::InvalidImage { .. }
            | Self::MalformedRequest { .. } => StatusCode::BAD_REQUEST,
            Self::PayloadTooLarge { .. } => StatusCode::PAYLOAD_TOO_LARGE,
            Self::Segmentation { .. }
            | Self::ImageProcessing { .. }
            | Self::Model { .. }
            | Self::Worker { .. } => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Message returned to the client. Server-side failures never expose their cause.
    pub fn detail(&self) -> String {
        match self {
            Self::UnsupportedMediaType { .. } => {
                "Unsupported file type. Use PNG, JPG, or WEBP.".to_string()
            }
            Self::InvalidImage { .. } => "Could not read image file.".to_string(),
            Self::MalformedRequest { message } => message.clone(),
            Self::PayloadTooLarge { max_mb } => format!("File too large. Max {max_mb}MB."),
            _ => "Internal server error.".to_string(),
        }
    }
}

impl IntoResponse for RembgError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        if status.is_server_error() {
            tracing::error!(error = ?self, "request failed");
        } else {
            tracing::warn!(%status, error = %self, "request rejected");
        }

        (status, Json(json!({ "detail": self.detail() }))).into_response()
    }
}

/// Image crate errors that escape without context are encoding failures;
/// decoding wraps its errors in `InvalidImage` explicitly.
impl From<image::ImageError> for RembgError {
    fn from(err: image::ImageError) -> Self {
        Self::image_processing("image encoding", err)
    }
}

/// Convert ONNX Runtime errors to model errors.
impl From<ort::Error> for RembgError {
    fn from(err: ort::Error) -> Self {
        Self::model("ort operation", err.to_string())
    }
}

/// Shape errors happen while reshaping inference output, so they belong to the model.
impl From<ndarray::ShapeError> for RembgError {
    fn from(err: ndarray::ShapeError) -> Self {
        Self::model("tensor shape conversion", err)
    }
}

/// Multipart framing errors are the client's fault. The transport body limit is
/// mapped to `PayloadTooLarge` by the handler, which knows the configured limit.
impl From<MultipartError> for RembgError {
    fn from(err: MultipartError) -> Self {
        Self::MalformedRequest {
            message: err.body_text(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_client_errors_map_to_400() {
        let unsupported = RembgError::UnsupportedMediaType {
            content_type: Some("text/plain".to_string()),
        };
        assert_eq!(unsupported.status_code(), StatusCode::BAD_REQUEST);
        assert_eq!(
            unsupported.detail(),
            "Unsupported file type. Use PNG, JPG, or WEBP."
        );

        let malformed = RembgError::MalformedRequest {
            message: "Missing file field.".to_string(),
        };
        assert_eq!(malformed.status_code(), StatusCode::BAD_REQUEST);
        assert_eq!(malformed.detail(), "Missing file field.");
    }

    #[test]
    fn test_payload_too_large_mentions_limit() {
        let err = RembgError::PayloadTooLarge { max_mb: 16 };
        assert_eq!(err.status_code(), StatusCode::PAYLOAD_TOO_LARGE);
        assert_eq!(err.detail(), "File too large. Max 16MB.");
    }

    #[test]
    fn test_server_errors_hide_cause() {
        let err = RembgError::segmentation("session exploded");
        assert_eq!(err.status_code(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(err.detail(), "Internal server error.");
        assert!(!err.detail().contains("exploded"));
    }
}
