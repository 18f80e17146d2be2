//! Router settings loaded from environment variables.

use crate::error::ConfigError;
use crate::target::{redact_url, ConnectionTemplate, DEFAULT_ADMIN_DATABASE};
use std::fmt;
use crate::tenant::TenantId;
use std::time::Duration;

pub const TEMPLATE_VAR: &str = "TENANT_DATABASE_URL_TEMPLATE";
pub const CONTROL_PLANE_URL_VAR: &str = "CONTROL_PLANE_DATABASE_URL";
pub const PROVISIONING_VAR: &str = "TENANT_PROVISIONING";
pub const CONNECT_TIMEOUT_VAR: &str = "TENANT_CONNECT_TIMEOUT_MS";
pub const DDL_TIMEOUT_VAR: &str = "TENANT_DDL_TIMEOUT_MS";
pub const CLOSE_TIMEOUT_VAR: &str = "TENANT_CLOSE_TIMEOUT_MS";
pub const POOL_MAX_CONNECTIONS_VAR: &str = "TENANT_POOL_MAX_CONNECTIONS";
pub const CONTROL_PLANE_MAX_CONNECTIONS_VAR: &str = "CONTROL_PLANE_MAX_CONNECTIONS";
pub const PRELOAD_VAR: &str = "TENANT_PRELOAD";

/// Which control plane executes CREATE/DROP DATABASE.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ProvisioningMode {
    /// Real per-tenant databases on PostgreSQL.
    Postgres,
    /// Provisioning always succeeds without touching a server.
    Noop,
}

impl std::str::FromStr for ProvisioningMode {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "postgres" => Ok(ProvisioningMode::Postgres),
            "noop" => Ok(ProvisioningMode::Noop),
            other => Err(ConfigError::InvalidSetting {
                name: PROVISIONING_VAR,
                reason: format!("{} (expected postgres or noop)", other),
            }),
        }
    }
}

/// Upper bounds for the blocking operations of the router.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Timeouts {
    /// Opening a tenant handle, including the existence check.
    pub connect: Duration,
    /// One CREATE or DROP DATABASE statement.
    pub ddl: Duration,
    /// Closing a tenant handle on eviction.
    pub close: Duration,
}

impl Default for Timeouts {
    fn default() -> Self {
        Timeouts {
            connect: Duration::from_millis(5_000),
            ddl: Duration::from_millis(30_000),
            close: Duration::from_millis(10_000),
        }
    }
}

#[derive(Clone)]
pub struct RouterConfig {
    pub template: ConnectionTemplate,
    pub control_plane_url: String,
    pub provisioning: ProvisioningMode,
    pub timeouts: Timeouts,
    pub pool_max_connections: u32,
    pub control_plane_max_connections: u32,
    /// Tenants whose handles are opened at startup.
    pub preload: Vec<TenantId>,
}

impl RouterConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Build from any key lookup. Empty values count as unset.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |name: &str| lookup(name).filter(|v| !v.trim().is_empty());

        let template = get(TEMPLATE_VAR).ok_or(ConfigError::MissingTemplate)?;
        let template = ConnectionTemplate::parse(&template)?;

        let control_plane_url = get(CONTROL_PLANE_URL_VAR)
            .unwrap_or_else(|| template.control_plane_url(DEFAULT_ADMIN_DATABASE));

        let provisioning = match get(PROVISIONING_VAR) {
            Some(v) => v.parse()?,
            None => ProvisioningMode::Postgres,
        };

        let defaults = Timeouts::default();
        let timeouts = Timeouts {
            connect: millis(CONNECT_TIMEOUT_VAR, get(CONNECT_TIMEOUT_VAR), defaults.connect)?,
            ddl: millis(DDL_TIMEOUT_VAR, get(DDL_TIMEOUT_VAR), defaults.ddl)?,
            close: millis(CLOSE_TIMEOUT_VAR, get(CLOSE_TIMEOUT_VAR), defaults.close)?,
        };

        let pool_max_connections =
            positive(POOL_MAX_CONNECTIONS_VAR, get(POOL_MAX_CONNECTIONS_VAR), 5)?;
        let control_plane_max_connections = positive(
            CONTROL_PLANE_MAX_CONNECTIONS_VAR,
            get(CONTROL_PLANE_MAX_CONNECTIONS_VAR),
            2,
        )?;

        let preload = match get(PRELOAD_VAR) {
            Some(list) => parse_preload(&list)?,
            None => Vec::new(),
        };

        Ok(RouterConfig {
            template,
            control_plane_url,
            provisioning,
            timeouts,
            pool_max_connections,
            control_plane_max_connections,
            preload,
        })
    }
}

impl fmt::Debug for RouterConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RouterConfig")
            .field("template", &self.template)
            .field("control_plane_url", &redact_url(&self.control_plane_url))
            .field("provisioning", &self.provisioning)
            .field("timeouts", &self.timeouts)
            .field("pool_max_connections", &self.pool_max_connections)
            .field("control_plane_max_connections", &self.control_plane_max_connections)
            .field("preload", &self.preload)
            .finish()
    }
}

fn positive(name: &'static str, value: Option<String>, default: u32) -> Result<u32, ConfigError> {
    let Some(value) = value else {
        return Ok(default);
    };
    match value.trim().parse::<u32>() {
        Ok(n) if n > 0 => Ok(n),
        _ => Err(ConfigError::InvalidSetting {
            name,
            reason: format!("expected a positive integer, got '{}'", value),
        }),
    }
}

fn millis(name: &'static str, value: Option<String>, default: Duration) -> Result<Duration, ConfigError> {
    let default_ms = u32::try_from(default.as_millis()).unwrap_or(u32::MAX);
    positive(name, value, default_ms).map(|ms| Duration::from_millis(u64::from(ms)))
}

fn parse_preload(list: &str) -> Result<Vec<TenantId>, ConfigError> {
    let mut ids: Vec<TenantId> = Vec::new();
    for raw in list.split(',').map(str::trim).filter(|s| !s.is_empty()) {
        let id = TenantId::parse(raw).map_err(|e| ConfigError::InvalidSetting {
            name: PRELOAD_VAR,
            reason: e.to_string(),
        })?;
        if !ids.contains(&id) {
            ids.push(id);
        }
    }
    Ok(ids)
}
