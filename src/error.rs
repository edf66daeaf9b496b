//! Error types
//!
//! [`KubeError`] is the taxonomy of the cluster-facing core. [`AppError`] is
//! what HTTP handlers return; it renders as the standard JSON envelope.

use std::time::Duration;

use axum::{
    extract::rejection::JsonRejection,
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use thiserror::Error;

use crate::api::response::ApiResponse;

/// Failures of a single interaction with the cluster API.
#[derive(Debug, Error)]
pub enum KubeError {
    /// The addressed object does not exist.
    #[error("{kind} {namespace}/{name} not found")]
    NotFound {
        kind: &'static str,
        namespace: String,
        name: String,
    },

    /// A write carried a stale resourceVersion.
    #[error("conflict while updating {namespace}/{name}: {message}")]
    Conflict {
        namespace: String,
        name: String,
        message: String,
    },

    /// Every attempt of a retry-on-conflict loop hit a conflict.
    #[error("{operation} {namespace}/{name} still conflicting after {attempts} attempts")]
    RetriesExhausted {
        operation: &'static str,
        namespace: String,
        name: String,
        attempts: u32,
    },

    /// The credentials in use may not perform the operation.
    #[error("permission denied for {}: {message}", context(.operation, .namespace, .name))]
    PermissionDenied {
        operation: &'static str,
        namespace: String,
        name: String,
        message: String,
    },

    /// Network or API-server failure.
    #[error("{operation} failed: {message}")]
    Transport {
        operation: String,
        message: String,
    },

    /// A mutation did not finish before its deadline.
    #[error("{operation} {namespace}/{name} timed out after {limit:?}")]
    Timeout {
        operation: &'static str,
        namespace: String,
        name: String,
        limit: Duration,
    },

    /// The object is not in a shape the operation can work with.
    #[error("{namespace}/{name}: {message}")]
    Precondition {
        namespace: String,
        name: String,
        message: String,
    },
}

impl KubeError {
    /// Classify a `kube` client error for the given operation.
    ///
    /// `namespace` and `name` describe the addressed object, if any, and are
    /// only used to build error context.
    pub fn from_kube(
        err: kube::Error,
        kind: &'static str,
        operation: &'static str,
        namespace: &str,
        name: &str,
    ) -> Self {
        match err {
            kube::Error::Api(resp) => match resp.code {
                404 => KubeError::NotFound {
                    kind,
                    namespace: namespace.to_string(),
                    name: name.to_string(),
                },
                409 => KubeError::Conflict {
                    namespace: namespace.to_string(),
                    name: name.to_string(),
                    message: resp.message,
                },
                401 | 403 => KubeError::PermissionDenied {
                    operation,
                    namespace: namespace.to_string(),
                    name: name.to_string(),
                    message: resp.message,
                },
                _ => KubeError::Transport {
                    operation: context(operation, namespace, name),
                    message: format!("{} ({})", resp.message, resp.code),
                },
            },
            other => KubeError::Transport {
                operation: context(operation, namespace, name),
                message: other.to_string(),
            },
        }
    }

    pub fn is_conflict(&self) -> bool {
        matches!(self, KubeError::Conflict { .. })
    }

    pub fn is_permission_denied(&self) -> bool {
        matches!(self, KubeError::PermissionDenied { .. })
    }

    /// Transport-class failures: the caller may retry the whole call.
    pub fn is_transport(&self) -> bool {
        matches!(self, KubeError::Transport { .. } | KubeError::Timeout { .. })
    }
}

fn context(operation: &str, namespace: &str, name: &str) -> String {
    match (namespace.is_empty(), name.is_empty()) {
        (true, true) => operation.to_string(),
        (false, true) => format!("{} in namespace {}", operation, namespace),
        _ => format!("{} {}/{}", operation, namespace, name),
    }
}

/// Errors returned by HTTP handlers.
#[derive(Debug, Error)]
pub enum AppError {
    #[error("{0}")]
    BadRequest(String),

    #[error(transparent)]
    Kubernetes(#[from] KubeError),
}

impl AppError {
    pub fn bad_request(msg: &str) -> Self {
        AppError::BadRequest(msg.to_string())
    }

    /// Status code and machine-readable code for this error.
    pub fn status_and_code(&self) -> (StatusCode, &'static str) {
        match self {
            AppError::BadRequest(_) => (StatusCode::BAD_REQUEST, "BAD_REQUEST"),
            AppError::Kubernetes(e) => match e {
                KubeError::NotFound { .. } => (StatusCode::NOT_FOUND, "NOT_FOUND"),
                KubeError::Conflict { .. } => (StatusCode::CONFLICT, "CONFLICT"),
                KubeError::RetriesExhausted { .. } => (StatusCode::CONFLICT, "RETRIES_EXHAUSTED"),
                KubeError::PermissionDenied { .. } => (StatusCode::FORBIDDEN, "FORBIDDEN"),
                KubeError::Precondition { .. } => {
                    (StatusCode::UNPROCESSABLE_ENTITY, "PRECONDITION_FAILED")
                }
                KubeError::Timeout { .. } => (StatusCode::GATEWAY_TIMEOUT, "TIMEOUT"),
                KubeError::Transport { .. } => (StatusCode::BAD_GATEWAY, "KUBERNETES_ERROR"),
            },
        }
    }
}

impl From<JsonRejection> for AppError {
    fn from(rejection: JsonRejection) -> Self {
        AppError::BadRequest(rejection.body_text())
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, code) = self.status_and_code();
        let body = ApiResponse::error(code, self.to_string());
        (status, Json(body)).into_response()
    }
}

pub type AppResult<T> = Result<T, AppError>;
