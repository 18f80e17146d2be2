//! Tenant connection registry: one live handle per tenant, opened on first use.

use crate::backend::{ControlPlane, TenantConnector};
use crate::config::Timeouts;
use crate::error::TenancyError;
use crate::slot::{DatabaseState, Flight, FlightLeader, SlotTable, TenantStatus};
use crate::target::ConnectionTemplate;
use crate::tenant::TenantId;
use std::fmt;
use std::ops::Deref;
use std::sync::Arc;
use tokio::task::JoinSet;
use tokio::time::timeout;

/// Shared reference to a registry-owned handle. Cloning is cheap; closing is
/// the registry's job.
pub struct TenantHandle<H> {
    tenant: TenantId,
    inner: Arc<H>,
}

impl<H> TenantHandle<H> {
    fn new(tenant: TenantId, inner: Arc<H>) -> Self {
        TenantHandle { tenant, inner }
    }

    pub fn tenant(&self) -> &TenantId {
        &self.tenant
    }

    /// True when both refer to the same underlying handle.
    pub fn ptr_eq(a: &Self, b: &Self) -> bool {
        Arc::ptr_eq(&a.inner, &b.inner)
    }
}

impl<H> Clone for TenantHandle<H> {
    fn clone(&self) -> Self {
        TenantHandle {
            tenant: self.tenant.clone(),
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<H> Deref for TenantHandle<H> {
    type Target = H;

    fn deref(&self) -> &H {
        &self.inner
    }
}

impl<H> fmt::Debug for TenantHandle<H> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TenantHandle")
            .field("tenant", &self.tenant)
            .finish_non_exhaustive()
    }
}

enum Lookup<H> {
    Cached(Arc<H>),
    Opening(Flight<Arc<H>>),
    Closing(Flight<()>),
    Provisioning(Flight<()>),
    Lead(FlightLeader<Arc<H>>, Flight<Arc<H>>, bool),
    Absent,
    Closed,
}

enum Evict<H> {
    AwaitOpen(Flight<Arc<H>>),
    AwaitClose(Flight<()>),
    Close(Arc<H>, FlightLeader<()>, Flight<()>),
    Done,
}

struct Shared<C: TenantConnector> {
    connector: C,
    control_plane: Arc<dyn ControlPlane>,
    template: ConnectionTemplate,
    timeouts: Timeouts,
    slots: SlotTable<C::Handle>,
}

/// Cheap to clone; clones share the same slots.
pub struct TenantRegistry<C: TenantConnector> {
    shared: Arc<Shared<C>>,
}

impl<C: TenantConnector> Clone for TenantRegistry<C> {
    fn clone(&self) -> Self {
        TenantRegistry {
            shared: Arc::clone(&self.shared),
        }
    }
}

impl<C: TenantConnector> TenantRegistry<C> {
    pub fn new(
        template: ConnectionTemplate,
        connector: C,
        control_plane: Arc<dyn ControlPlane>,
        timeouts: Timeouts,
    ) -> Self {
        TenantRegistry {
            shared: Arc::new(Shared {
                connector,
                control_plane,
                template,
                timeouts,
                slots: SlotTable::new(),
            }),
        }
    }

    pub(crate) fn slots(&self) -> &SlotTable<C::Handle> {
        &self.shared.slots
    }

    pub fn connector(&self) -> &C {
        &self.shared.connector
    }

    /// Cached handle for `tenant`, or a freshly opened one. Concurrent callers
    /// for the same tenant share a single open attempt and its outcome.
    pub async fn get_or_create(&self, tenant: &TenantId) -> Result<TenantHandle<C::Handle>, TenancyError> {
        loop {
            let lookup = self.shared.slots.with(tenant, |slot, closed| {
                if closed {
                    return Lookup::Closed;
                }
                if let Some((_, flight)) = &slot.provisioning {
                    return Lookup::Provisioning(flight.clone());
                }
                if let Some(flight) = &slot.closing {
                    return Lookup::Closing(flight.clone());
                }
                if let Some(handle) = &slot.handle {
                    return Lookup::Cached(Arc::clone(handle));
                }
                if let Some(flight) = &slot.opening {
                    return Lookup::Opening(flight.clone());
                }
                if slot.database == DatabaseState::Absent {
                    return Lookup::Absent;
                }
                let (leader, flight) = Flight::start();
                slot.opening = Some(flight.clone());
                Lookup::Lead(leader, flight, slot.database == DatabaseState::Unknown)
            });

            let flight = match lookup {
                Lookup::Cached(handle) => return Ok(TenantHandle::new(tenant.clone(), handle)),
                Lookup::Closed => return Err(TenancyError::RegistryClosed),
                Lookup::Absent => {
                    return Err(TenancyError::NotProvisioned {
                        tenant: tenant.to_string(),
                        reason: "database does not exist".into(),
                    })
                }
                Lookup::Provisioning(flight) => {
                    if let Some(Err(e)) = flight.outcome().await {
                        return Err(TenancyError::NotProvisioned {
                            tenant: tenant.to_string(),
                            reason: e.to_string(),
                        });
                    }
                    continue;
                }
                Lookup::Closing(flight) => {
                    self.shared.await_close(tenant, flight).await?;
                    continue;
                }
                Lookup::Opening(flight) => flight,
                Lookup::Lead(leader, flight, verify) => {
                    let shared = Arc::clone(&self.shared);
                    let flight_id = flight.id();
                    let tenant = tenant.clone();
                    tokio::spawn(async move { shared.open(tenant, leader, flight_id, verify).await });
                    flight
                }
            };

            if let Some(outcome) = flight.outcome().await {
                return outcome.map(|handle| TenantHandle::new(tenant.clone(), handle));
            }
        }
    }

    /// Close and forget the tenant's handle, after any in-flight open settles.
    /// Calling it for a tenant without a handle is a no-op.
    ///
    /// The slot stays marked as closing until the connector has really closed
    /// the handle, even when this call gives up after the close timeout, so no
    /// second handle is opened next to one that is still live.
    pub async fn evict(&self, tenant: &TenantId) -> Result<(), TenancyError> {
        loop {
            let step = self.shared.slots.with(tenant, |slot, _| {
                if let Some(flight) = &slot.opening {
                    return Evict::AwaitOpen(flight.clone());
                }
                if let Some(flight) = &slot.closing {
                    return Evict::AwaitClose(flight.clone());
                }
                match slot.handle.take() {
                    Some(handle) => {
                        let (leader, flight) = Flight::start();
                        slot.closing = Some(flight.clone());
                        Evict::Close(handle, leader, flight)
                    }
                    None => Evict::Done,
                }
            });
            match step {
                Evict::AwaitOpen(flight) => {
                    let _ = flight.outcome().await;
                }
                Evict::AwaitClose(flight) => self.shared.await_close(tenant, flight).await?,
                Evict::Done => return Ok(()),
                Evict::Close(handle, leader, flight) => {
                    let shared = Arc::clone(&self.shared);
                    let flight_id = flight.id();
                    let owner = tenant.clone();
                    tokio::spawn(async move { shared.close_evicted(owner, handle, leader, flight_id).await });
                    return self.shared.await_close(tenant, flight).await;
                }
            }
        }
    }

    /// Close every cached handle. The registry refuses lookups from then on.
    pub async fn close_all(&self) -> Result<(), TenancyError> {
        let handles = self.shared.slots.close();
        tracing::info!("closing {} tenant handle(s)", handles.len());
        let mut closing = JoinSet::new();
        for (tenant, handle) in handles {
            let shared = Arc::clone(&self.shared);
            closing.spawn(async move { shared.close_handle(&tenant, &handle).await });
        }
        let mut first_error = None;
        while let Some(joined) = closing.join_next().await {
            let result = joined.map_err(|e| TenancyError::Connection {
                tenant: "*".into(),
                reason: format!("close task failed: {}", e),
            });
            if let Err(e) = result.and_then(|r| r) {
                first_error.get_or_insert(e);
            }
        }
        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    /// Open handles for known tenants ahead of traffic. Returns the tenants
    /// that failed, with their errors.
    pub async fn preload(&self, tenants: &[TenantId]) -> Vec<(TenantId, TenancyError)> {
        let mut opening = JoinSet::new();
        for tenant in tenants {
            let registry = self.clone();
            let tenant = tenant.clone();
            opening.spawn(async move {
                let result = registry.get_or_create(&tenant).await.map(|_| ());
                (tenant, result)
            });
        }
        let mut failures = Vec::new();
        while let Some(joined) = opening.join_next().await {
            match joined {
                Ok((_, Ok(()))) => {}
                Ok((tenant, Err(e))) => failures.push((tenant, e)),
                Err(e) => tracing::warn!("preload task failed: {}", e),
            }
        }
        failures.sort_by(|a, b| a.0.cmp(&b.0));
        failures
    }

    pub fn status(&self, tenant: &TenantId) -> TenantStatus {
        self.shared.slots.status(tenant)
    }

    pub fn is_closed(&self) -> bool {
        self.shared.slots.is_closed()
    }

    /// Tenants the registry currently holds state for: a handle, work in
    /// flight, or a database state it observed itself.
    pub fn tracked_tenants(&self) -> usize {
        self.shared.slots.len()
    }
}

impl<C: TenantConnector> Shared<C> {
    /// Leader side of an open: connect, record the outcome in the slot, then
    /// publish it to every waiter.
    async fn open(self: Arc<Self>, tenant: TenantId, leader: FlightLeader<Arc<C::Handle>>, flight_id: u64, verify: bool) {
        let connected = self.connect(&tenant, verify).await;
        let mut orphan = None;
        let outcome = self.slots.with(&tenant, |slot, closed| {
            slot.finish_opening(flight_id);
            match connected {
                Ok(handle) if closed => {
                    orphan = Some(handle);
                    Err(TenancyError::RegistryClosed)
                }
                Ok(handle) => {
                    slot.handle = Some(Arc::clone(&handle));
                    slot.database = DatabaseState::Provisioned;
                    Ok(handle)
                }
                // A missing database is not remembered; the next lookup asks again.
                Err(e) => Err(e),
            }
        });
        if let Some(handle) = orphan {
            let _ = self.close_handle(&tenant, &handle).await;
        }
        leader.finish(outcome);
    }

    async fn connect(&self, tenant: &TenantId, verify: bool) -> Result<Arc<C::Handle>, TenancyError> {
        let target = self.template.resolve(tenant)?;
        let connection_error = |reason: String| TenancyError::Connection {
            tenant: tenant.to_string(),
            reason,
        };

        if verify {
            let exists = timeout(self.timeouts.connect, self.control_plane.database_exists(&target.database))
                .await
                .map_err(|_| connection_error(format!("timed out checking database {}", target.database)))?
                .map_err(|e| connection_error(e.to_string()))?;
            if !exists {
                tracing::warn!("tenant {}: database {} does not exist", tenant, target.database);
                return Err(TenancyError::NotProvisioned {
                    tenant: tenant.to_string(),
                    reason: format!("database {} does not exist", target.database),
                });
            }
        }

        match timeout(self.timeouts.connect, self.connector.open(&target)).await {
            Ok(Ok(handle)) => {
                tracing::info!("tenant {}: opened handle to database {}", tenant, target.database);
                Ok(Arc::new(handle))
            }
            Ok(Err(e)) => {
                tracing::warn!("tenant {}: open failed: {}", tenant, e);
                Err(connection_error(e.to_string()))
            }
            Err(_) => {
                tracing::warn!("tenant {}: open timed out after {:?}", tenant, self.timeouts.connect);
                Err(connection_error(format!("timed out after {:?}", self.timeouts.connect)))
            }
        }
    }

    /// Leader side of an eviction: close without a deadline, then release the
    /// closing marker.
    async fn close_evicted(
        self: Arc<Self>,
        tenant: TenantId,
        handle: Arc<C::Handle>,
        leader: FlightLeader<()>,
        flight_id: u64,
    ) {
        self.connector.close(&handle).await;
        tracing::info!("tenant {}: handle closed", tenant);
        self.slots.with(&tenant, |slot, _| slot.finish_closing(flight_id));
        leader.finish(Ok(()));
    }

    /// Wait, up to the close timeout, for an eviction to finish.
    async fn await_close(&self, tenant: &TenantId, flight: Flight<()>) -> Result<(), TenancyError> {
        match timeout(self.timeouts.close, flight.outcome()).await {
            Ok(Some(outcome)) => outcome,
            // Close task vanished; its marker is cleared on the next slot access.
            Ok(None) => Ok(()),
            Err(_) => {
                tracing::warn!(
                    "tenant {}: closing handle still running after {:?}",
                    tenant,
                    self.timeouts.close
                );
                Err(TenancyError::Connection {
                    tenant: tenant.to_string(),
                    reason: format!("closing handle timed out after {:?}", self.timeouts.close),
                })
            }
        }
    }

    async fn close_handle(&self, tenant: &TenantId, handle: &C::Handle) -> Result<(), TenancyError> {
        match timeout(self.timeouts.close, self.connector.close(handle)).await {
            Ok(()) => {
                tracing::info!("tenant {}: handle closed", tenant);
                Ok(())
            }
            Err(_) => {
                tracing::warn!("tenant {}: closing handle timed out after {:?}", tenant, self.timeouts.close);
                Err(TenancyError::Connection {
                    tenant: tenant.to_string(),
                    reason: format!("closing handle timed out after {:?}", self.timeouts.close),
                })
            }
        }
    }
}
