//! Tenant router: maps tenant ids to isolated, lazily opened PostgreSQL
//! databases and provisions or drops those databases on tenant lifecycle events.

pub mod backend;
pub mod config;
pub mod error;
pub mod extractors;
pub mod handlers;
pub mod provisioning;
pub mod registry;
pub mod response;
pub mod router;
pub mod routes;
pub mod slot;
pub mod state;
pub mod target;
pub mod tenant;

pub use backend::{ControlPlane, NoopControlPlane, PgConnector, PgControlPlane, TenantConnector};
pub use config::{ProvisioningMode, RouterConfig, Timeouts};
pub use error::{BackendError, ConfigError, TenancyError};
pub use provisioning::ProvisioningService;
pub use registry::{TenantHandle, TenantRegistry};
pub use response::{success_one, success_one_ok};
pub use router::TenantRouter;
pub use routes::{app_routes, common_routes, tenant_routes};
pub use slot::{DatabaseState, ProvisionKind, TenantStatus};
pub use state::AppState;
pub use target::{redact_url, resolve, ConnectionTarget, ConnectionTemplate, DatabaseName};
pub use tenant::TenantId;
