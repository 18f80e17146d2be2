//! Typed errors and HTTP mapping.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("missing connection template (set TENANT_DATABASE_URL_TEMPLATE)")]
    MissingTemplate,
    #[error("malformed connection template: {0}")]
    MalformedTemplate(String),
    #[error("missing setting: {0}")]
    MissingSetting(&'static str),
    #[error("invalid setting {name}: {reason}")]
    InvalidSetting { name: &'static str, reason: String },
}

/// Every failure of the routing and provisioning layer. Cloneable so that one
/// in-flight outcome can be handed to all of its waiters.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TenancyError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("invalid tenant id '{value}': {reason}")]
    InvalidTenantId { value: String, reason: String },
    #[error("connection to tenant '{tenant}' failed: {reason}")]
    Connection { tenant: String, reason: String },
    #[error("tenant '{tenant}' has no provisioned database: {reason}")]
    NotProvisioned { tenant: String, reason: String },
    #[error("provisioning conflict for tenant '{tenant}': {reason}")]
    ProvisioningConflict { tenant: String, reason: String },
    #[error("provisioning failed for tenant '{tenant}': {reason}")]
    ProvisioningFailure { tenant: String, reason: String },
    #[error("tenant registry is closed")]
    RegistryClosed,
}

impl TenancyError {
    pub fn code(&self) -> &'static str {
        match self {
            TenancyError::Config(_) => "config_error",
            TenancyError::InvalidTenantId { .. } => "invalid_tenant_id",
            TenancyError::Connection { .. } => "connection_error",
            TenancyError::NotProvisioned { .. } => "tenant_not_provisioned",
            TenancyError::ProvisioningConflict { .. } => "provisioning_conflict",
            TenancyError::ProvisioningFailure { .. } => "provisioning_failed",
            TenancyError::RegistryClosed => "registry_closed",
        }
    }

    pub fn status(&self) -> StatusCode {
        match self {
            TenancyError::Config(_) => StatusCode::INTERNAL_SERVER_ERROR,
            TenancyError::InvalidTenantId { .. } => StatusCode::BAD_REQUEST,
            TenancyError::Connection { .. } => StatusCode::SERVICE_UNAVAILABLE,
            TenancyError::NotProvisioned { .. } => StatusCode::NOT_FOUND,
            TenancyError::ProvisioningConflict { .. } => StatusCode::CONFLICT,
            TenancyError::ProvisioningFailure { .. } => StatusCode::BAD_GATEWAY,
            TenancyError::RegistryClosed => StatusCode::SERVICE_UNAVAILABLE,
        }
    }
}

/// Errors raised by connector and control-plane backends, before they are
/// attributed to a tenant.
#[derive(Error, Debug)]
pub enum BackendError {
    #[error("database: {0}")]
    Db(#[from] sqlx::Error),
    #[error("database already exists: {0}")]
    DatabaseExists(String),
    #[error("{0}")]
    Other(String),
}

#[derive(Serialize)]
pub struct ErrorBody {
    pub error: ErrorDetail,
}

#[derive(Serialize)]
pub struct ErrorDetail {
    pub code: String,
    pub message: String,
}

impl IntoResponse for TenancyError {
    fn into_response(self) -> Response {
        let status = self.status();
        let body = ErrorBody {
            error: ErrorDetail {
                code: self.code().to_string(),
                message: self.to_string(),
            },
        };
        (status, Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn invalid_tenant_maps_to_bad_request() {
        let err = TenancyError::InvalidTenantId {
            value: "a;b".into(),
            reason: "bad char".into(),
        };
        assert_eq!(err.status(), StatusCode::BAD_REQUEST);
        assert_eq!(err.code(), "invalid_tenant_id");
    }

    #[test]
    fn config_error_is_transparent() {
        let err: TenancyError = ConfigError::MissingTemplate.into();
        assert_eq!(err.to_string(), ConfigError::MissingTemplate.to_string());
        assert_eq!(err.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[test]
    fn conflict_and_not_provisioned_statuses() {
        let conflict = TenancyError::ProvisioningConflict {
            tenant: "acme".into(),
            reason: "exists".into(),
        };
        let missing = TenancyError::NotProvisioned {
            tenant: "acme".into(),
            reason: "dropped".into(),
        };
        assert_eq!(conflict.status(), StatusCode::CONFLICT);
        assert_eq!(missing.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn error_envelope_has_code_and_message_only() {
        let err = TenancyError::RegistryClosed;
        let response = err.clone().into_response();
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let body: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(
            body,
            serde_json::json!({
                "error": { "code": "registry_closed", "message": err.to_string() }
            })
        );
    }
}
