//! Shared application state passed to HTTP handlers.

use netrate::{Config, NetMonitor};
use prometheus::{Gauge, Registry};
use std::sync::Arc;

use crate::metrics::RateMetrics;

/// Type alias for shared application state.
pub type SharedState = Arc<AppState>;

pub struct AppState {
    pub registry: Registry,
    pub metrics: RateMetrics,
    pub scrape_duration: Gauge,
    pub monitor: Arc<NetMonitor>,
    pub config: Arc<Config>,
}
