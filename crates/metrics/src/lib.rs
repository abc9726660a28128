//! quorumnet Prometheus metrics infrastructure.
//!
//! This crate provides centralized metric definitions for the masternode
//! quorum subsystem. Metrics are organized by subsystem; today that is the
//! DKG session handling pipeline.

pub mod dkg;
pub mod server;

pub use server::{spawn_metrics_server, start_metrics_server};

use once_cell::sync::Lazy;
use prometheus::Registry;

/// Global Prometheus registry for all quorumnet metrics.
pub static REGISTRY: Lazy<Registry> = Lazy::new(|| {
    let registry = Registry::new();

    // Register all metric collectors
    dkg::register_metrics(&registry);

    registry
});

/// Initialize all metrics. Call once at startup.
pub fn init() {
    Lazy::force(&REGISTRY);
    tracing::info!("quorumnet metrics initialized");
}
