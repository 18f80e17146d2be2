//! Tenant provisioning: CREATE / DROP DATABASE over the control plane,
//! coordinated with the registry through the shared tenant slots.

use crate::backend::{ControlPlane, TenantConnector};
use crate::error::{BackendError, TenancyError};
use crate::registry::TenantRegistry;
use crate::slot::{DatabaseState, Flight, FlightLeader, ProvisionKind};
use crate::target::{ConnectionTarget, ConnectionTemplate};
use crate::tenant::TenantId;
use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::timeout;

enum Step<H> {
    /// Same operation already running; share its outcome.
    Join(Flight<()>),
    /// The opposite provisioning operation is running; wait, then re-check.
    AwaitProvisioning(Flight<()>),
    /// A handle open is running; wait, then re-check.
    AwaitOpen(Flight<Arc<H>>),
    /// An evicted handle is still closing; wait, then re-check.
    AwaitClose(Flight<()>),
    Lead(FlightLeader<()>, Flight<()>),
    AlreadyProvisioned,
}

struct Shared<C: TenantConnector> {
    registry: TenantRegistry<C>,
    control_plane: Arc<dyn ControlPlane>,
    template: ConnectionTemplate,
    ddl_timeout: Duration,
}

pub struct ProvisioningService<C: TenantConnector> {
    shared: Arc<Shared<C>>,
}

impl<C: TenantConnector> Clone for ProvisioningService<C> {
    fn clone(&self) -> Self {
        ProvisioningService {
            shared: Arc::clone(&self.shared),
        }
    }
}

impl<C: TenantConnector> ProvisioningService<C> {
    pub fn new(
        registry: TenantRegistry<C>,
        control_plane: Arc<dyn ControlPlane>,
        template: ConnectionTemplate,
        ddl_timeout: Duration,
    ) -> Self {
        ProvisioningService {
            shared: Arc::new(Shared {
                registry,
                control_plane,
                template,
                ddl_timeout,
            }),
        }
    }

    /// Create the tenant's database. Registry lookups for the tenant wait until
    /// this settles; a concurrent create for the same tenant shares this one.
    pub async fn create_database(&self, tenant: &TenantId) -> Result<(), TenancyError> {
        let target = self.shared.template.resolve(tenant)?;
        self.run(tenant, ProvisionKind::Create, target).await
    }

    /// Evict and close the tenant's handle, then drop its database if it exists.
    pub async fn drop_database(&self, tenant: &TenantId) -> Result<(), TenancyError> {
        let target = self.shared.template.resolve(tenant)?;
        self.run(tenant, ProvisionKind::Drop, target).await
    }

    async fn run(&self, tenant: &TenantId, kind: ProvisionKind, target: ConnectionTarget) -> Result<(), TenancyError> {
        loop {
            let step = self.shared.registry.slots().with(tenant, |slot, _| {
                if let Some((running, flight)) = &slot.provisioning {
                    return if *running == kind {
                        Step::Join(flight.clone())
                    } else {
                        Step::AwaitProvisioning(flight.clone())
                    };
                }
                if let Some(flight) = &slot.opening {
                    return Step::AwaitOpen(flight.clone());
                }
                if let Some(flight) = &slot.closing {
                    return Step::AwaitClose(flight.clone());
                }
                if kind == ProvisionKind::Create
                    && (slot.database == DatabaseState::Provisioned || slot.handle.is_some())
                {
                    return Step::AlreadyProvisioned;
                }
                let (leader, flight) = Flight::start();
                slot.provisioning = Some((kind, flight.clone()));
                Step::Lead(leader, flight)
            });

            let flight = match step {
                Step::AlreadyProvisioned => {
                    return Err(TenancyError::ProvisioningConflict {
                        tenant: tenant.to_string(),
                        reason: format!("database {} is already provisioned", target.database),
                    })
                }
                Step::AwaitProvisioning(flight) => {
                    let _ = flight.outcome().await;
                    continue;
                }
                Step::AwaitOpen(flight) => {
                    let _ = flight.outcome().await;
                    continue;
                }
                Step::AwaitClose(flight) => {
                    if timeout(self.shared.ddl_timeout, flight.outcome()).await.is_err() {
                        return Err(self.shared.failure(tenant, "previous handle is still closing".into()));
                    }
                    continue;
                }
                Step::Join(flight) => flight,
                Step::Lead(leader, flight) => {
                    // Runs detached so a caller giving up cannot strand the marker.
                    let shared = Arc::clone(&self.shared);
                    let flight_id = flight.id();
                    let tenant = tenant.clone();
                    let target = target.clone();
                    tokio::spawn(async move {
                        let outcome = match kind {
                            ProvisionKind::Create => shared.create_now(&tenant, &target).await,
                            ProvisionKind::Drop => shared.drop_now(&tenant, &target).await,
                        };
                        shared.settle(&tenant, kind, flight_id, leader, outcome);
                    });
                    flight
                }
            };

            if let Some(outcome) = flight.outcome().await {
                return outcome;
            }
        }
    }
}

impl<C: TenantConnector> Shared<C> {
    async fn create_now(&self, tenant: &TenantId, target: &ConnectionTarget) -> Result<(), TenancyError> {
        tracing::info!("tenant {}: creating database {}", tenant, target.database);
        match timeout(self.ddl_timeout, self.control_plane.create_database(&target.database)).await {
            Ok(Ok(())) => {
                tracing::info!("tenant {}: database {} created", tenant, target.database);
                Ok(())
            }
            Ok(Err(BackendError::DatabaseExists(name))) => {
                tracing::warn!("tenant {}: database {} already exists", tenant, name);
                Err(TenancyError::ProvisioningConflict {
                    tenant: tenant.to_string(),
                    reason: format!("database {} already exists", name),
                })
            }
            Ok(Err(e)) => Err(self.failure(tenant, format!("create database {}: {}", target.database, e))),
            Err(_) => Err(self.failure(
                tenant,
                format!("create database {} timed out after {:?}", target.database, self.ddl_timeout),
            )),
        }
    }

    async fn drop_now(&self, tenant: &TenantId, target: &ConnectionTarget) -> Result<(), TenancyError> {
        tracing::info!("tenant {}: dropping database {}", tenant, target.database);
        self.registry
            .evict(tenant)
            .await
            .map_err(|e| self.failure(tenant, format!("handle not closed, drop skipped: {}", e)))?;
        match timeout(self.ddl_timeout, self.control_plane.drop_database(&target.database)).await {
            Ok(Ok(())) => {
                tracing::info!("tenant {}: database {} dropped", tenant, target.database);
                Ok(())
            }
            Ok(Err(e)) => Err(self.failure(tenant, format!("drop database {}: {}", target.database, e))),
            Err(_) => Err(self.failure(
                tenant,
                format!("drop database {} timed out after {:?}", target.database, self.ddl_timeout),
            )),
        }
    }

    fn failure(&self, tenant: &TenantId, reason: String) -> TenancyError {
        tracing::warn!("tenant {}: provisioning failed: {}", tenant, reason);
        TenancyError::ProvisioningFailure {
            tenant: tenant.to_string(),
            reason,
        }
    }

    /// Record the outcome in the slot and release the marker, then wake waiters.
    fn settle(
        &self,
        tenant: &TenantId,
        kind: ProvisionKind,
        flight_id: u64,
        leader: FlightLeader<()>,
        outcome: Result<(), TenancyError>,
    ) {
        self.registry.slots().with(tenant, |slot, _| {
            slot.finish_provisioning(flight_id);
            match (kind, &outcome) {
                (ProvisionKind::Create, Ok(())) => {
                    slot.database = DatabaseState::Provisioned;
                    slot.provisioned_at = Some(Utc::now());
                }
                (ProvisionKind::Drop, Ok(())) => {
                    slot.database = DatabaseState::Absent;
                    slot.provisioned_at = None;
                }
                // Whatever happened on the server, the next lookup re-checks it.
                (_, Err(_)) => slot.database = DatabaseState::Unknown,
            }
        });
        leader.finish(outcome);
    }
}
