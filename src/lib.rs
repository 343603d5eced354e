//! Client-side resilience for a storefront backend: health probing, request
//! throttling and caching, session renewal, an offline fallback cache and a
//! single connectivity status for the UI.

pub mod cache;
pub mod coalesce;
pub mod config;
pub mod connectivity;
pub mod context;
pub mod error;
pub mod health;
pub mod logging;
pub mod offline;
pub mod scheduler;
pub mod service;
pub mod session;
pub mod throttle;

pub use context::ClientContext;
pub use error::ClientError;
