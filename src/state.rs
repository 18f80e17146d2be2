//! Shared application state for all routes.

use crate::backend::{PgConnector, TenantConnector};
use crate::router::TenantRouter;
use std::sync::Arc;

pub struct AppState<C: TenantConnector = PgConnector> {
    pub router: Arc<TenantRouter<C>>,
}

impl<C: TenantConnector> AppState<C> {
    pub fn new(router: TenantRouter<C>) -> Self {
        AppState {
            router: Arc::new(router),
        }
    }
}

impl<C: TenantConnector> Clone for AppState<C> {
    fn clone(&self) -> Self {
        AppState {
            router: Arc::clone(&self.router),
        }
    }
}
