//! Per-tenant coordination shared by the registry and the provisioning service.
//!
//! Each tenant id owns one [`Slot`]: the cached handle, the known database
//! state, and the markers of in-flight work (an open, a close, a provisioning
//! step). The table lock is only held for synchronous bookkeeping; all I/O
//! happens outside it, so unrelated tenants never wait on each other.
//!
//! Slots with nothing worth remembering are removed as soon as they settle, so
//! the table only holds tenants that have a handle, work in flight, or a
//! database state observed by this process.

use crate::error::TenancyError;
use crate::tenant::TenantId;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use tokio::sync::watch;

type Outcome<T> = Option<Result<T, TenancyError>>;

static NEXT_FLIGHT: AtomicU64 = AtomicU64::new(1);

/// Waiting side of an in-flight operation. Every clone observes the same outcome.
#[derive(Clone)]
pub(crate) struct Flight<T> {
    id: u64,
    rx: watch::Receiver<Outcome<T>>,
}

/// Publishing side, owned by the task doing the work.
pub(crate) struct FlightLeader<T> {
    tx: watch::Sender<Outcome<T>>,
}

impl<T: Clone> Flight<T> {
    pub(crate) fn start() -> (FlightLeader<T>, Flight<T>) {
        let (tx, rx) = watch::channel(None);
        let id = NEXT_FLIGHT.fetch_add(1, Ordering::Relaxed);
        (FlightLeader { tx }, Flight { id, rx })
    }

    pub(crate) fn id(&self) -> u64 {
        self.id
    }

    /// The leader went away (panicked) without publishing an outcome.
    fn abandoned(&self) -> bool {
        let pending = self.rx.borrow().is_none();
        pending && self.rx.has_changed().is_err()
    }

    /// Wait for the shared outcome. `None` means the leader vanished and the
    /// caller should look at the slot again.
    pub(crate) async fn outcome(mut self) -> Option<Result<T, TenancyError>> {
        let outcome = match self.rx.wait_for(Option::is_some).await {
            Ok(outcome) => outcome.clone(),
            Err(_) => None,
        };
        outcome
    }
}

impl<T> FlightLeader<T> {
    pub(crate) fn finish(self, outcome: Result<T, TenancyError>) {
        self.tx.send_replace(Some(outcome));
    }
}

/// What this process knows about a tenant's physical database.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DatabaseState {
    /// Not observed yet; confirmed against the control plane before first use.
    Unknown,
    Provisioned,
    /// Dropped by this process. A failed existence check leaves the state `Unknown`.
    Absent,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ProvisionKind {
    Create,
    Drop,
}

pub(crate) struct Slot<H> {
    pub(crate) database: DatabaseState,
    pub(crate) handle: Option<Arc<H>>,
    pub(crate) opening: Option<Flight<Arc<H>>>,
    /// Set while a handle taken out of the slot is still being closed.
    pub(crate) closing: Option<Flight<()>>,
    pub(crate) provisioning: Option<(ProvisionKind, Flight<()>)>,
    pub(crate) provisioned_at: Option<DateTime<Utc>>,
}

impl<H> Default for Slot<H> {
    fn default() -> Self {
        Slot {
            database: DatabaseState::Unknown,
            handle: None,
            opening: None,
            closing: None,
            provisioning: None,
            provisioned_at: None,
        }
    }
}

impl<H> Slot<H> {
    fn clear_abandoned(&mut self) {
        if self.opening.as_ref().is_some_and(Flight::abandoned) {
            self.opening = None;
        }
        if self.closing.as_ref().is_some_and(Flight::abandoned) {
            self.closing = None;
        }
        if self
            .provisioning
            .as_ref()
            .is_some_and(|(_, flight)| flight.abandoned())
        {
            self.provisioning = None;
            self.database = DatabaseState::Unknown;
        }
    }

    /// Release the open marker if it still belongs to `flight_id`.
    pub(crate) fn finish_opening(&mut self, flight_id: u64) {
        if self.opening.as_ref().is_some_and(|f| f.id() == flight_id) {
            self.opening = None;
        }
    }

    /// Release the close marker if it still belongs to `flight_id`.
    pub(crate) fn finish_closing(&mut self, flight_id: u64) {
        if self.closing.as_ref().is_some_and(|f| f.id() == flight_id) {
            self.closing = None;
        }
    }

    fn is_idle(&self) -> bool {
        self.handle.is_none()
            && self.opening.is_none()
            && self.closing.is_none()
            && self.provisioning.is_none()
            && self.database == DatabaseState::Unknown
    }

    /// Release the provisioning marker if it still belongs to `flight_id`.
    pub(crate) fn finish_provisioning(&mut self, flight_id: u64) {
        if self
            .provisioning
            .as_ref()
            .is_some_and(|(_, f)| f.id() == flight_id)
        {
            self.provisioning = None;
        }
    }
}

/// Read-only view of one tenant's slot.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct TenantStatus {
    pub tenant_id: TenantId,
    pub database: DatabaseState,
    pub handle_open: bool,
    pub opening: bool,
    pub closing: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub provisioning: Option<ProvisionKind>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub provisioned_at: Option<DateTime<Utc>>,
}

struct Table<H> {
    slots: HashMap<TenantId, Slot<H>>,
    closed: bool,
}

pub(crate) struct SlotTable<H> {
    table: Mutex<Table<H>>,
}

impl<H> SlotTable<H> {
    pub(crate) fn new() -> Self {
        SlotTable {
            table: Mutex::new(Table {
                slots: HashMap::new(),
                closed: false,
            }),
        }
    }

    /// Run `f` on the tenant's slot under the table lock. `f` also sees whether
    /// the registry has been closed. Never hold this across an await.
    pub(crate) fn with<R>(&self, tenant: &TenantId, f: impl FnOnce(&mut Slot<H>, bool) -> R) -> R {
        let mut table = self.table.lock().unwrap_or_else(PoisonError::into_inner);
        let closed = table.closed;
        let slot = table.slots.entry(tenant.clone()).or_default();
        slot.clear_abandoned();
        let result = f(slot, closed);
        if slot.is_idle() {
            table.slots.remove(tenant);
        }
        result
    }

    /// Number of tenants currently tracked.
    pub(crate) fn len(&self) -> usize {
        self.table
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .slots
            .len()
    }

    pub(crate) fn status(&self, tenant: &TenantId) -> TenantStatus {
        let table = self.table.lock().unwrap_or_else(PoisonError::into_inner);
        let slot = table.slots.get(tenant);
        TenantStatus {
            tenant_id: tenant.clone(),
            database: slot.map_or(DatabaseState::Unknown, |s| s.database),
            handle_open: slot.is_some_and(|s| s.handle.is_some()),
            opening: slot.is_some_and(|s| s.opening.is_some()),
            closing: slot.is_some_and(|s| s.closing.is_some()),
            provisioning: slot.and_then(|s| s.provisioning.as_ref().map(|(kind, _)| *kind)),
            provisioned_at: slot.and_then(|s| s.provisioned_at),
        }
    }

    pub(crate) fn is_closed(&self) -> bool {
        self.table
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .closed
    }

    /// Mark the table closed and take every cached handle out of it.
    pub(crate) fn close(&self) -> Vec<(TenantId, Arc<H>)> {
        let mut table = self.table.lock().unwrap_or_else(PoisonError::into_inner);
        table.closed = true;
        table
            .slots
            .iter_mut()
            .filter_map(|(tenant, slot)| slot.handle.take().map(|h| (tenant.clone(), h)))
            .collect()
    }
}
