//! Storage backends: how tenant handles are opened and closed, and how tenant
//! databases are created and dropped on the control plane.

use crate::error::BackendError;
use crate::target::{ConnectionTarget, DatabaseName};
use async_trait::async_trait;
use sqlx::postgres::{PgPool, PgPoolOptions};
use std::time::Duration;

/// PostgreSQL `duplicate_database` SQLSTATE.
const DUPLICATE_DATABASE: &str = "42P04";

/// Opens and closes per-tenant handles.
#[async_trait]
pub trait TenantConnector: Send + Sync + 'static {
    /// The open client bound to one tenant database (e.g. `sqlx::PgPool`).
    type Handle: Send + Sync + 'static;

    async fn open(&self, target: &ConnectionTarget) -> Result<Self::Handle, BackendError>;

    /// Close a handle. Called exactly once per handle, by the registry.
    async fn close(&self, handle: &Self::Handle);

    /// Cheap liveness probe.
    async fn ping(&self, handle: &Self::Handle) -> Result<(), BackendError> {
        let _ = handle;
        Ok(())
    }
}

/// Privileged connection that creates and drops tenant databases.
#[async_trait]
pub trait ControlPlane: Send + Sync + 'static {
    /// Fails with [`BackendError::DatabaseExists`] when the database is already there.
    async fn create_database(&self, name: &DatabaseName) -> Result<(), BackendError>;

    /// Drops the database if it exists. Dropping a missing database succeeds.
    async fn drop_database(&self, name: &DatabaseName) -> Result<(), BackendError>;

    async fn database_exists(&self, name: &DatabaseName) -> Result<bool, BackendError>;

    async fn ping(&self) -> Result<(), BackendError> {
        Ok(())
    }
}

/// One `PgPool` per tenant.
#[derive(Clone, Debug)]
pub struct PgConnector {
    max_connections: u32,
    acquire_timeout: Duration,
}

impl PgConnector {
    pub fn new(max_connections: u32, acquire_timeout: Duration) -> Self {
        PgConnector {
            max_connections,
            acquire_timeout,
        }
    }
}

#[async_trait]
impl TenantConnector for PgConnector {
    type Handle = PgPool;

    async fn open(&self, target: &ConnectionTarget) -> Result<PgPool, BackendError> {
        let pool = PgPoolOptions::new()
            .max_connections(self.max_connections)
            .acquire_timeout(self.acquire_timeout)
            .connect(&target.url)
            .await?;
        Ok(pool)
    }

    async fn close(&self, handle: &PgPool) {
        handle.close().await;
    }

    async fn ping(&self, handle: &PgPool) -> Result<(), BackendError> {
        sqlx::query("SELECT 1").execute(handle).await?;
        Ok(())
    }
}

/// Control plane over a maintenance database connection (usually `postgres`).
#[derive(Clone, Debug)]
pub struct PgControlPlane {
    pool: PgPool,
}

impl PgControlPlane {
    pub async fn connect(url: &str, max_connections: u32) -> Result<Self, BackendError> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .connect(url)
            .await?;
        Ok(PgControlPlane { pool })
    }

    pub fn from_pool(pool: PgPool) -> Self {
        PgControlPlane { pool }
    }
}

#[async_trait]
impl ControlPlane for PgControlPlane {
    async fn create_database(&self, name: &DatabaseName) -> Result<(), BackendError> {
        // CREATE DATABASE cannot take bind parameters; the name is allow-listed and quoted.
        let sql = format!("CREATE DATABASE {}", name.quoted());
        match sqlx::query(&sql).execute(&self.pool).await {
            Ok(_) => Ok(()),
            Err(sqlx::Error::Database(e)) if e.code().as_deref() == Some(DUPLICATE_DATABASE) => {
                Err(BackendError::DatabaseExists(name.to_string()))
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn drop_database(&self, name: &DatabaseName) -> Result<(), BackendError> {
        let sql = format!("DROP DATABASE IF EXISTS {}", name.quoted());
        sqlx::query(&sql).execute(&self.pool).await?;
        Ok(())
    }

    async fn database_exists(&self, name: &DatabaseName) -> Result<bool, BackendError> {
        let exists: (bool,) =
            sqlx::query_as("SELECT EXISTS(SELECT 1 FROM pg_database WHERE datname = $1)")
                .bind(name.as_str())
                .fetch_one(&self.pool)
                .await?;
        Ok(exists.0)
    }

    async fn ping(&self) -> Result<(), BackendError> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }
}

/// Development backend: every database is assumed to exist and provisioning
/// is a no-op. Tenants then share whatever databases the template points at.
#[derive(Clone, Copy, Debug, Default)]
pub struct NoopControlPlane;

#[async_trait]
impl ControlPlane for NoopControlPlane {
    async fn create_database(&self, name: &DatabaseName) -> Result<(), BackendError> {
        tracing::debug!("noop control plane: skipping CREATE DATABASE {}", name);
        Ok(())
    }

    async fn drop_database(&self, name: &DatabaseName) -> Result<(), BackendError> {
        tracing::debug!("noop control plane: skipping DROP DATABASE {}", name);
        Ok(())
    }

    async fn database_exists(&self, _name: &DatabaseName) -> Result<bool, BackendError> {
        Ok(true)
    }
}
