//! Error kinds for the streaming ticket query service.
//!
//! Every failure surfaced to a client funnels through `ServiceError` so
//! the envelope middleware described in the specification has one
//! uniform shape to render, regardless of which component raised it.
//! Per the error-handling policy: validation and body-parse failures are
//! always a clean 400/500 envelope, because nothing has been written to
//! the response yet. Once streaming has started, a mapper or driver
//! failure can only truncate the body — there is no way back to an
//! envelope (see `streaming::engine`).

use crate::models::response::ResponseBody;
use actix_web::{
    error,
    http::{header::ContentType, StatusCode},
    HttpResponse,
};
use chrono::{DateTime, Utc};
use derive_more::{Display, Error};
use log::{error as log_error, info as log_info, warn as log_warn, Level};
use serde::Serialize;
use serde_json::to_string as to_json_string;
use std::collections::BTreeMap;

pub type ServiceResult<T> = Result<T, ServiceError>;

#[derive(Debug, Clone, Default, Serialize, PartialEq, Eq)]
pub struct ErrorContext {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub correlation_id: Option<String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub metadata: BTreeMap<String, String>,
}

impl ErrorContext {
    #[must_use]
    pub fn with_detail(mut self, detail: impl Into<String>) -> Self {
        self.detail = Some(detail.into());
        self
    }

    #[must_use]
    pub fn with_correlation_id(mut self, id: impl Into<String>) -> Self {
        self.correlation_id = Some(id.into());
        self
    }

    #[must_use]
    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct ErrorEnvelope {
    pub request_id: String,
    pub message: String,
    pub data: Option<String>,
    #[serde(with = "chrono::serde::ts_seconds")]
    pub timestamp: DateTime<Utc>,
    pub status: u16,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub metadata: BTreeMap<String, String>,
}

impl ErrorEnvelope {
    pub fn from_error(error: &ServiceError) -> Self {
        let context = error.context();
        Self {
            request_id: context
                .correlation_id
                .clone()
                .unwrap_or_else(|| "-".to_string()),
            message: error.to_string(),
            data: None,
            timestamp: Utc::now(),
            status: error.http_status().as_u16(),
            detail: context.detail.clone(),
            metadata: context.metadata.clone(),
        }
    }
}

/// The two outcomes the specification's error table actually needs:
/// `BadRequest` for validation/body-parse failures (nothing executed
/// yet) and `InternalServerError` for driver/mapping/serialization
/// failures discovered before the status line has been written.
#[derive(Debug, Display, Error, Clone, PartialEq)]
pub enum ServiceError {
    #[display(fmt = "{error_message}")]
    BadRequest {
        error_message: String,
        #[error(ignore)]
        context: ErrorContext,
    },
    #[display(fmt = "{error_message}")]
    InternalServerError {
        error_message: String,
        #[error(ignore)]
        context: ErrorContext,
    },
}

impl ServiceError {
    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::BadRequest {
            error_message: message.into(),
            context: ErrorContext::default(),
        }
    }

    pub fn internal_server_error(message: impl Into<String>) -> Self {
        Self::InternalServerError {
            error_message: message.into(),
            context: ErrorContext::default(),
        }
    }

    pub fn with_context(mut self, updater: impl FnOnce(ErrorContext) -> ErrorContext) -> Self {
        match &mut self {
            ServiceError::BadRequest { context, .. }
            | ServiceError::InternalServerError { context, .. } => {
                let current = std::mem::take(context);
                *context = updater(current);
            }
        }
        self
    }

    pub fn with_detail(self, detail: impl Into<String>) -> Self {
        self.with_context(|ctx| ctx.with_detail(detail))
    }

    pub fn context(&self) -> &ErrorContext {
        match self {
            ServiceError::BadRequest { context, .. }
            | ServiceError::InternalServerError { context, .. } => context,
        }
    }

    pub fn http_status(&self) -> StatusCode {
        match self {
            ServiceError::BadRequest { .. } => StatusCode::BAD_REQUEST,
            ServiceError::InternalServerError { .. } => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn default_log_level(&self) -> Level {
        match self {
            ServiceError::InternalServerError { .. } => Level::Error,
            ServiceError::BadRequest { .. } => Level::Info,
        }
    }

    pub fn log(&self) {
        self.log_with_level(self.default_log_level());
    }

    pub fn log_with_level(&self, level: Level) {
        let envelope = ErrorEnvelope::from_error(self);
        let payload = to_json_string(&envelope).unwrap_or_else(|_| envelope.message.clone());
        match level {
            Level::Error => log_error!(target: "service_error", "{}", payload),
            Level::Warn => log_warn!(target: "service_error", "{}", payload),
            _ => log_info!(target: "service_error", "{}", payload),
        }
    }
}

impl error::ResponseError for ServiceError {
    fn status_code(&self) -> StatusCode {
        self.http_status()
    }

    fn error_response(&self) -> HttpResponse {
        let envelope = ErrorEnvelope::from_error(self);
        self.log();
        HttpResponse::build(self.http_status())
            .insert_header(ContentType::json())
            .json(ResponseBody::new(&envelope.message.clone(), envelope))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bad_request_maps_to_400() {
        let err = ServiceError::bad_request("tableName is not allowed");
        assert_eq!(err.http_status(), StatusCode::BAD_REQUEST);
    }

    #[test]
    fn internal_error_maps_to_500() {
        let err = ServiceError::internal_server_error("driver error");
        assert_eq!(err.http_status(), StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[test]
    fn envelope_carries_message_and_detail() {
        let err = ServiceError::bad_request("invalid tableName").with_detail("users");
        let envelope = ErrorEnvelope::from_error(&err);
        assert_eq!(envelope.message, "invalid tableName");
        assert_eq!(envelope.detail.as_deref(), Some("users"));
        assert_eq!(envelope.status, 400);
    }
}
