//! In-memory connector and control plane that record what they were asked to do.
#![allow(dead_code)]

use async_trait::async_trait;
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tenant_router::{
    BackendError, ConnectionTarget, ConnectionTemplate, ControlPlane, DatabaseName, TenantConnector, TenantId,
    TenantRouter, Timeouts,
};
use tokio::sync::Semaphore;

pub const TEMPLATE: &str = "postgres://db.test:5432/tenant_{tenant}";

pub fn tenant(id: &str) -> TenantId {
    TenantId::parse(id).unwrap()
}

pub fn db(id: &str) -> String {
    format!("tenant_{}", id)
}

/// Ordered log shared by the connector and the control plane.
#[derive(Clone, Default)]
pub struct Events(Arc<Mutex<Vec<String>>>);

impl Events {
    pub fn push(&self, event: String) {
        self.0.lock().unwrap().push(event);
    }

    pub fn all(&self) -> Vec<String> {
        self.0.lock().unwrap().clone()
    }

    pub fn position(&self, event: &str) -> Option<usize> {
        self.all().iter().position(|e| e == event)
    }

    pub fn count(&self, prefix: &str) -> usize {
        self.all().iter().filter(|e| e.starts_with(prefix)).count()
    }
}

/// Blocks callers until released.
#[derive(Clone)]
pub struct Gate(Arc<Semaphore>);

impl Gate {
    pub fn closed() -> Self {
        Gate(Arc::new(Semaphore::new(0)))
    }

    pub fn release(&self) {
        self.0.add_permits(Semaphore::MAX_PERMITS / 2);
    }

    async fn pass(&self) {
        self.0.acquire().await.unwrap().forget();
    }
}

/// Gates keyed by database name.
#[derive(Clone, Default)]
pub struct Gates(Arc<Mutex<Vec<(String, Gate)>>>);

impl Gates {
    pub fn block(&self, database: &str) -> Gate {
        let gate = Gate::closed();
        self.0.lock().unwrap().push((database.to_string(), gate.clone()));
        gate
    }

    async fn pass(&self, database: &str) {
        let gate = self
            .0
            .lock()
            .unwrap()
            .iter()
            .find(|(name, _)| name == database)
            .map(|(_, gate)| gate.clone());
        if let Some(gate) = gate {
            gate.pass().await;
        }
    }
}

#[derive(Debug)]
pub struct FakeHandle {
    pub database: String,
    pub closed: AtomicBool,
}

impl FakeHandle {
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

#[derive(Clone, Default)]
pub struct FakeConnector {
    pub events: Events,
    pub gates: Gates,
    pub close_gates: Gates,
    pub opens: Arc<AtomicUsize>,
    /// Number of upcoming opens that fail.
    pub fail_opens: Arc<AtomicUsize>,
    /// Number of upcoming opens that panic.
    pub panic_opens: Arc<AtomicUsize>,
    /// Handles opened and not yet closed, and the highest that count reached.
    pub live: Arc<AtomicUsize>,
    pub max_live: Arc<AtomicUsize>,
}

fn take_one(counter: &AtomicUsize) -> bool {
    counter
        .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
        .is_ok()
}

#[async_trait]
impl TenantConnector for FakeConnector {
    type Handle = FakeHandle;

    async fn open(&self, target: &ConnectionTarget) -> Result<FakeHandle, BackendError> {
        self.opens.fetch_add(1, Ordering::SeqCst);
        let database = target.database.to_string();
        self.gates.pass(&database).await;
        if take_one(&self.panic_opens) {
            panic!("connector blew up opening {}", database);
        }
        if take_one(&self.fail_opens) {
            self.events.push(format!("open-failed:{}", database));
            return Err(BackendError::Other("connection refused".into()));
        }
        self.events.push(format!("open:{}", database));
        let live = self.live.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_live.fetch_max(live, Ordering::SeqCst);
        Ok(FakeHandle {
            database,
            closed: AtomicBool::new(false),
        })
    }

    async fn close(&self, handle: &FakeHandle) {
        self.close_gates.pass(&handle.database).await;
        handle.closed.store(true, Ordering::SeqCst);
        self.live.fetch_sub(1, Ordering::SeqCst);
        self.events.push(format!("close:{}", handle.database));
    }

    async fn ping(&self, handle: &FakeHandle) -> Result<(), BackendError> {
        if handle.is_closed() {
            return Err(BackendError::Other("pool closed".into()));
        }
        Ok(())
    }
}

#[derive(Clone, Default)]
pub struct FakeControlPlane {
    pub events: Events,
    pub create_gates: Gates,
    pub drop_gates: Gates,
    pub databases: Arc<Mutex<HashSet<String>>>,
    pub creates: Arc<AtomicUsize>,
    pub drops: Arc<AtomicUsize>,
    pub fail_creates: Arc<AtomicBool>,
}

impl FakeControlPlane {
    pub fn with_databases(self, names: &[&str]) -> Self {
        self.databases
            .lock()
            .unwrap()
            .extend(names.iter().map(|n| n.to_string()));
        self
    }

    pub fn has(&self, name: &str) -> bool {
        self.databases.lock().unwrap().contains(name)
    }
}

#[async_trait]
impl ControlPlane for FakeControlPlane {
    async fn create_database(&self, name: &DatabaseName) -> Result<(), BackendError> {
        self.creates.fetch_add(1, Ordering::SeqCst);
        self.create_gates.pass(name.as_str()).await;
        if self.fail_creates.load(Ordering::SeqCst) {
            return Err(BackendError::Other("control plane unreachable".into()));
        }
        if !self.databases.lock().unwrap().insert(name.to_string()) {
            return Err(BackendError::DatabaseExists(name.to_string()));
        }
        self.events.push(format!("create:{}", name));
        Ok(())
    }

    async fn drop_database(&self, name: &DatabaseName) -> Result<(), BackendError> {
        self.drops.fetch_add(1, Ordering::SeqCst);
        self.drop_gates.pass(name.as_str()).await;
        self.databases.lock().unwrap().remove(name.as_str());
        self.events.push(format!("drop:{}", name));
        Ok(())
    }

    async fn database_exists(&self, name: &DatabaseName) -> Result<bool, BackendError> {
        Ok(self.has(name.as_str()))
    }
}

pub struct Harness {
    pub router: Arc<TenantRouter<FakeConnector>>,
    pub connector: FakeConnector,
    pub control: FakeControlPlane,
    pub events: Events,
}

pub fn timeouts() -> Timeouts {
    Timeouts {
        connect: Duration::from_millis(2_000),
        ddl: Duration::from_millis(2_000),
        close: Duration::from_millis(2_000),
    }
}

pub fn harness(existing: &[&str]) -> Harness {
    harness_with(existing, timeouts())
}

pub fn harness_with(existing: &[&str], timeouts: Timeouts) -> Harness {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::new("tenant_router=debug"))
        .with_test_writer()
        .try_init();

    let events = Events::default();
    let connector = FakeConnector {
        events: events.clone(),
        ..FakeConnector::default()
    };
    let control = FakeControlPlane {
        events: events.clone(),
        ..FakeControlPlane::default()
    }
    .with_databases(existing);
    let router = TenantRouter::new(
        ConnectionTemplate::parse(TEMPLATE).unwrap(),
        connector.clone(),
        Arc::new(control.clone()),
        timeouts,
    );
    Harness {
        router: Arc::new(router),
        connector,
        control,
        events,
    }
}

/// Poll until `cond` holds, failing the test after a second.
pub async fn eventually(mut cond: impl FnMut() -> bool) {
    for _ in 0..200 {
        if cond() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    panic!("condition not reached");
}

/// Give spawned tasks time to reach their wait point.
pub async fn settle() {
    tokio::time::sleep(Duration::from_millis(50)).await;
}
