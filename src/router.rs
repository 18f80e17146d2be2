//! Tenant data-plane router: the registry and the provisioning service wired
//! around one set of tenant slots.

use crate::backend::{ControlPlane, NoopControlPlane, PgConnector, PgControlPlane, TenantConnector};
use crate::config::{ProvisioningMode, RouterConfig, Timeouts, CONTROL_PLANE_URL_VAR};
use crate::error::{ConfigError, TenancyError};
use crate::provisioning::ProvisioningService;
use crate::registry::{TenantHandle, TenantRegistry};
use crate::slot::TenantStatus;
use crate::target::{redact_url, ConnectionTemplate};
use crate::tenant::TenantId;
use std::sync::Arc;

pub struct TenantRouter<C: TenantConnector> {
    registry: TenantRegistry<C>,
    provisioning: ProvisioningService<C>,
    control_plane: Arc<dyn ControlPlane>,
}

impl<C: TenantConnector> TenantRouter<C> {
    pub fn new(
        template: ConnectionTemplate,
        connector: C,
        control_plane: Arc<dyn ControlPlane>,
        timeouts: Timeouts,
    ) -> Self {
        let registry = TenantRegistry::new(
            template.clone(),
            connector,
            Arc::clone(&control_plane),
            timeouts,
        );
        let provisioning = ProvisioningService::new(
            registry.clone(),
            Arc::clone(&control_plane),
            template,
            timeouts.ddl,
        );
        TenantRouter {
            registry,
            provisioning,
            control_plane,
        }
    }

    pub fn registry(&self) -> &TenantRegistry<C> {
        &self.registry
    }

    pub fn provisioning(&self) -> &ProvisioningService<C> {
        &self.provisioning
    }

    pub async fn get_or_create(&self, tenant: &TenantId) -> Result<TenantHandle<C::Handle>, TenancyError> {
        self.registry.get_or_create(tenant).await
    }

    pub async fn create_database(&self, tenant: &TenantId) -> Result<(), TenancyError> {
        self.provisioning.create_database(tenant).await
    }

    pub async fn drop_database(&self, tenant: &TenantId) -> Result<(), TenancyError> {
        self.provisioning.drop_database(tenant).await
    }

    pub async fn close_all(&self) -> Result<(), TenancyError> {
        self.registry.close_all().await
    }

    pub async fn preload(&self, tenants: &[TenantId]) -> Vec<(TenantId, TenancyError)> {
        self.registry.preload(tenants).await
    }

    pub fn status(&self, tenant: &TenantId) -> TenantStatus {
        self.registry.status(tenant)
    }

    /// Liveness of one tenant's handle.
    pub async fn ping(&self, handle: &TenantHandle<C::Handle>) -> Result<(), TenancyError> {
        self.registry
            .connector()
            .ping(handle)
            .await
            .map_err(|e| TenancyError::Connection {
                tenant: handle.tenant().to_string(),
                reason: e.to_string(),
            })
    }

    /// Readiness of the control plane.
    pub async fn ping_control_plane(&self) -> bool {
        if self.registry.is_closed() {
            return false;
        }
        match self.control_plane.ping().await {
            Ok(()) => true,
            Err(e) => {
                tracing::warn!("control plane unavailable: {}", e);
                false
            }
        }
    }
}

impl TenantRouter<PgConnector> {
    /// Postgres-backed router. Connects the control plane eagerly so a bad
    /// control-plane URL fails startup.
    pub async fn connect(config: &RouterConfig) -> Result<Self, TenancyError> {
        let control_plane: Arc<dyn ControlPlane> = match config.provisioning {
            ProvisioningMode::Postgres => {
                let pg = PgControlPlane::connect(&config.control_plane_url, config.control_plane_max_connections)
                    .await
                    .map_err(|e| {
                        let url = &config.control_plane_url;
                        ConfigError::InvalidSetting {
                            name: CONTROL_PLANE_URL_VAR,
                            reason: format!(
                                "cannot connect to {}: {}",
                                redact_url(url),
                                e.to_string().replace(url.as_str(), &redact_url(url))
                            ),
                        }
                    })?;
                Arc::new(pg)
            }
            ProvisioningMode::Noop => {
                tracing::warn!("tenant provisioning is disabled (noop control plane)");
                Arc::new(NoopControlPlane)
            }
        };
        let connector = PgConnector::new(config.pool_max_connections, config.timeouts.connect);
        Ok(TenantRouter::new(
            config.template.clone(),
            connector,
            control_plane,
            config.timeouts,
        ))
    }
}
