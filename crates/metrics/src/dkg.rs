//! DKG session handling metrics.

use once_cell::sync::Lazy;
use prometheus::{CounterVec, HistogramVec, IntGaugeVec, Registry};

// Session lifecycle

pub static DKG_SESSIONS_STARTED: Lazy<CounterVec> = Lazy::new(|| {
    CounterVec::new(
        prometheus::opts!(
            "quorumnet_dkg_sessions_started_total",
            "Total DKG sessions initialized"
        ),
        &["quorum_type"],
    )
    .expect("metric can be created")
});

pub static DKG_SESSIONS_ABORTED: Lazy<CounterVec> = Lazy::new(|| {
    CounterVec::new(
        prometheus::opts!(
            "quorumnet_dkg_sessions_aborted_total",
            "DKG sessions aborted before finalization (reorg, shutdown, phase miss)"
        ),
        &["quorum_type"],
    )
    .expect("metric can be created")
});

pub static DKG_COMMITMENTS_FINALIZED: Lazy<CounterVec> = Lazy::new(|| {
    CounterVec::new(
        prometheus::opts!(
            "quorumnet_dkg_commitments_finalized_total",
            "Final quorum commitments produced"
        ),
        &["quorum_type"],
    )
    .expect("metric can be created")
});

pub static DKG_CURRENT_PHASE: Lazy<IntGaugeVec> = Lazy::new(|| {
    IntGaugeVec::new(
        prometheus::opts!(
            "quorumnet_dkg_current_phase",
            "Current phase of the DKG state machine (0 = idle)"
        ),
        &["quorum_type"],
    )
    .expect("metric can be created")
});

// Pending message buffers

pub static DKG_MESSAGES_ADMITTED: Lazy<CounterVec> = Lazy::new(|| {
    CounterVec::new(
        prometheus::opts!(
            "quorumnet_dkg_messages_admitted_total",
            "DKG messages admitted into pending buffers"
        ),
        &["quorum_type", "kind"],
    )
    .expect("metric can be created")
});

pub static DKG_MESSAGES_DROPPED: Lazy<CounterVec> = Lazy::new(|| {
    CounterVec::new(
        prometheus::opts!(
            "quorumnet_dkg_messages_dropped_total",
            "DKG messages dropped at admission"
        ),
        &["quorum_type", "kind", "reason"],
    )
    .expect("metric can be created")
});

// Phase processing

pub static DKG_PHASE_DURATION: Lazy<HistogramVec> = Lazy::new(|| {
    HistogramVec::new(
        prometheus::histogram_opts!(
            "quorumnet_dkg_phase_duration_seconds",
            "Wall-clock time spent inside each DKG phase",
            vec![0.1, 0.5, 1.0, 5.0, 15.0, 60.0, 300.0, 900.0]
        ),
        &["quorum_type", "phase"],
    )
    .expect("metric can be created")
});

pub static DKG_PEERS_PUNISHED: Lazy<CounterVec> = Lazy::new(|| {
    CounterVec::new(
        prometheus::opts!(
            "quorumnet_dkg_peers_punished_total",
            "Peer misbehavior reports emitted by the DKG pipeline"
        ),
        &["quorum_type"],
    )
    .expect("metric can be created")
});

pub fn register_metrics(registry: &Registry) {
    registry
        .register(Box::new(DKG_SESSIONS_STARTED.clone()))
        .ok();
    registry
        .register(Box::new(DKG_SESSIONS_ABORTED.clone()))
        .ok();
    registry
        .register(Box::new(DKG_COMMITMENTS_FINALIZED.clone()))
        .ok();
    registry.register(Box::new(DKG_CURRENT_PHASE.clone())).ok();
    registry
        .register(Box::new(DKG_MESSAGES_ADMITTED.clone()))
        .ok();
    registry
        .register(Box::new(DKG_MESSAGES_DROPPED.clone()))
        .ok();
    registry.register(Box::new(DKG_PHASE_DURATION.clone())).ok();
    registry
        .register(Box::new(DKG_PEERS_PUNISHED.clone()))
        .ok();
}
