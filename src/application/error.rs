use std::error::Error as StdError;

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
};
use thiserror::Error;

use crate::{
    application::repos::{CdnError, QueueError},
    infra::error::InfraError,
    media::LifecycleError,
};

#[derive(Debug, Clone)]
pub struct ErrorReport {
    pub source: &'static str,
    pub status: StatusCode,
    pub messages: Vec<String>,
}

impl ErrorReport {
    pub fn from_error(source: &'static str, status: StatusCode, error: &dyn StdError) -> Self {
        let mut messages = vec![error.to_string()];
        let mut current = error.source();
        while let Some(inner) = current {
            messages.push(inner.to_string());
            current = inner.source();
        }
        Self {
            source,
            status,
            messages,
        }
    }

    pub fn attach(self, response: &mut Response) {
        response.extensions_mut().insert(self);
    }
}

/// An admin-facing failure: a fixed public message, with the full error chain
/// kept in a response extension for logging.
#[derive(Debug)]
pub struct HttpError {
    status: StatusCode,
    public_message: &'static str,
    report: ErrorReport,
}

impl HttpError {
    pub fn from_error(
        source: &'static str,
        status: StatusCode,
        public_message: &'static str,
        error: &dyn StdError,
    ) -> Self {
        let report = ErrorReport::from_error(source, status, error);
        Self {
            status,
            public_message,
            report,
        }
    }

    pub fn status(&self) -> StatusCode {
        self.status
    }
}

impl IntoResponse for HttpError {
    fn into_response(self) -> Response {
        let mut response = (self.status, self.public_message).into_response();
        self.report.attach(&mut response);
        response
    }
}

impl From<QueueError> for HttpError {
    fn from(error: QueueError) -> Self {
        HttpError::from_error(
            "infra::http::queue_error_to_http_error",
            StatusCode::SERVICE_UNAVAILABLE,
            "Job queue unavailable",
            &error,
        )
    }
}

impl From<CdnError> for HttpError {
    fn from(error: CdnError) -> Self {
        HttpError::from_error(
            "infra::http::cdn_error_to_http_error",
            StatusCode::CONFLICT,
            "CDN purge is not configured",
            &error,
        )
    }
}

impl From<LifecycleError> for HttpError {
    fn from(error: LifecycleError) -> Self {
        let (status, message) = match &error {
            LifecycleError::Queue(_) => (StatusCode::SERVICE_UNAVAILABLE, "Job queue unavailable"),
            LifecycleError::Transform(inner) if inner.is_configuration() => {
                (StatusCode::CONFLICT, "Media transforms are not configured")
            }
            _ => (StatusCode::INTERNAL_SERVER_ERROR, "Internal server error"),
        };
        HttpError::from_error(
            "infra::http::lifecycle_error_to_http_error",
            status,
            message,
            &error,
        )
    }
}

#[derive(Debug, Error)]
pub enum AppError {
    #[error(transparent)]
    Infra(#[from] InfraError),
    #[error(transparent)]
    Queue(#[from] QueueError),
    #[error(transparent)]
    Cdn(#[from] CdnError),
    #[error(transparent)]
    Lifecycle(#[from] LifecycleError),
    #[error("validation failed: {0}")]
    Validation(String),
    #[error("unexpected error: {0}")]
    Unexpected(String),
}

impl AppError {
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation(message.into())
    }

    pub fn unexpected(message: impl Into<String>) -> Self {
        Self::Unexpected(message.into())
    }

    fn status_code(&self) -> StatusCode {
        match self {
            AppError::Validation(_) => StatusCode::BAD_REQUEST,
            AppError::Cdn(_) => StatusCode::CONFLICT,
            AppError::Queue(_) | AppError::Lifecycle(LifecycleError::Queue(_)) => {
                StatusCode::SERVICE_UNAVAILABLE
            }
            AppError::Infra(_) | AppError::Lifecycle(_) | AppError::Unexpected(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }

    fn presentation_message(&self) -> &'static str {
        match self {
            AppError::Validation(_) => "Request could not be processed",
            AppError::Cdn(_) => "CDN purge is not configured",
            AppError::Queue(_) | AppError::Lifecycle(LifecycleError::Queue(_)) => {
                "Job queue unavailable"
            }
            AppError::Infra(InfraError::Configuration { .. }) => "Service misconfigured",
            AppError::Infra(InfraError::Telemetry(_)) => "Logging subsystem could not start",
            AppError::Infra(_) | AppError::Lifecycle(_) | AppError::Unexpected(_) => {
                "Unexpected error occurred"
            }
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let message = self.presentation_message();
        let report = ErrorReport::from_error("application::error::AppError", status, &self);
        let mut response = (status, message).into_response();
        report.attach(&mut response);
        response
    }
}
