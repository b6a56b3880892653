//! Common error type and alias.
//!
//! Every variant maps to a stable machine-readable kind (see [`AppError::kind`])
//! and an HTTP status, so API responses always carry `{"error", "message"}`.
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::{json, Value};
use thiserror::Error;

pub type AppResult<T> = Result<T, AppError>;

#[derive(Debug, Error)]
pub enum AppError {
    #[error("{0}")]
    NotFound(String),

    #[error("malformed workflow template: {0}")]
    Parse(String),

    #[error("override references unknown node '{0}'")]
    UnknownNode(String),

    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("execution engine unavailable: {0}")]
    EngineUnavailable(String),

    #[error("engine rejected graph: {message}")]
    GraphRejected { message: String, node_errors: Value },

    #[error("engine error: {0}")]
    Engine(String),

    #[error("HTTP client error: {0}")]
    HttpClient(#[source] reqwest::Error),

    #[error("output conversion failed: {0}")]
    Conversion(String),

    #[error("object storage upload failed: {0}")]
    Upload(String),

    #[error("{0}")]
    Timeout(String),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl AppError {
    /// Machine-readable error kind used in API responses.
    pub fn kind(&self) -> &'static str {
        match self {
            AppError::NotFound(_) => "not_found",
            AppError::Parse(_) => "parse_error",
            AppError::UnknownNode(_) => "unknown_node",
            AppError::InvalidInput(_) => "invalid_input",
            AppError::EngineUnavailable(_) => "engine_unavailable",
            AppError::GraphRejected { .. } => "graph_rejected",
            AppError::Engine(_) => "engine_error",
            AppError::HttpClient(_) => "http_client_error",
            AppError::Conversion(_) => "conversion_error",
            AppError::Upload(_) => "upload_error",
            AppError::Timeout(_) => "timeout",
            AppError::Config(_) => "config_error",
            AppError::Io(_) => "io_error",
        }
    }

    pub fn status_code(&self) -> StatusCode {
        match self {
            AppError::NotFound(_) => StatusCode::NOT_FOUND,
            AppError::UnknownNode(_) | AppError::InvalidInput(_) => StatusCode::BAD_REQUEST,
            AppError::GraphRejected { .. } => StatusCode::UNPROCESSABLE_ENTITY,
            AppError::EngineUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            AppError::Engine(_) | AppError::HttpClient(_) | AppError::Upload(_) => {
                StatusCode::BAD_GATEWAY
            }
            AppError::Timeout(_) => StatusCode::GATEWAY_TIMEOUT,
            AppError::Parse(_) | AppError::Conversion(_) | AppError::Config(_) | AppError::Io(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }

    /// Failures talking to the engine that a later poll may not repeat.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            AppError::EngineUnavailable(_) | AppError::Engine(_) | AppError::HttpClient(_)
        )
    }

    /// JSON body shared by the REST and serverless front-ends.
    pub fn to_body(&self) -> Value {
        let mut body = json!({
            "error": self.kind(),
            "message": self.to_string(),
        });
        if let AppError::GraphRejected { node_errors, .. } = self {
            body["details"] = node_errors.clone();
        }
        body
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        if status.is_server_error() {
            tracing::error!(kind = self.kind(), "request failed: {}", self);
        } else {
            tracing::debug!(kind = self.kind(), "request rejected: {}", self);
        }
        (status, Json(self.to_body())).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn graph_rejected_body_carries_node_details() {
        let err = AppError::GraphRejected {
            message: "Prompt outputs failed validation".into(),
            node_errors: json!({"3": {"errors": [{"type": "value_not_in_list"}]}}),
        };
        let body = err.to_body();
        assert_eq!(body["error"], "graph_rejected");
        assert_eq!(body["details"]["3"]["errors"][0]["type"], "value_not_in_list");
        assert_eq!(err.status_code(), StatusCode::UNPROCESSABLE_ENTITY);
    }

    #[test]
    fn unknown_node_names_the_offending_id() {
        let err = AppError::UnknownNode("99".into());
        assert_eq!(err.kind(), "unknown_node");
        assert!(err.to_string().contains("'99'"));
        assert!(err.to_body().get("details").is_none());
    }
}
