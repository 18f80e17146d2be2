//! HTTP handlers for the tenant lifecycle.

pub mod tenant;
pub use tenant::*;
