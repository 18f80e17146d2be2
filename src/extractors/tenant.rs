//! Extract a validated tenant id from the `X-Tenant-ID` header.

use crate::error::TenancyError;
use crate::tenant::TenantId;
use async_trait::async_trait;
use axum::{extract::FromRequestParts, http::request::Parts};

pub const TENANT_ID_HEADER: &str = "X-Tenant-ID";

/// Rejects the request with 400 when the header is missing or not a valid tenant id.
#[derive(Clone, Debug)]
pub struct TenantHeader(pub TenantId);

#[async_trait]
impl<S> FromRequestParts<S> for TenantHeader
where
    S: Send + Sync,
{
    type Rejection = TenancyError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let value = parts
            .headers
            .get(TENANT_ID_HEADER)
            .and_then(|v| v.to_str().ok())
            .map(str::trim)
            .unwrap_or_default();
        if value.is_empty() {
            return Err(TenancyError::InvalidTenantId {
                value: String::new(),
                reason: format!("missing {} header", TENANT_ID_HEADER),
            });
        }
        TenantId::parse(value).map(TenantHeader)
    }
}
