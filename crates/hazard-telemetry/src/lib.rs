//! # Hazard Telemetry - Metrics
//!
//! Prometheus registry for the coordinator:
//! - Detection throughput and first sightings
//! - Persistence queue health
//! - Calibration outcomes
//! - Channel connections and protocol errors
//! - Runway status and bird risk

use hazard_core::{BirdRiskLevel, EventKind, RunwayId, RunwayStatus};
use prometheus::{
    Histogram, HistogramOpts, IntCounter, IntCounterVec, IntGauge, IntGaugeVec, Opts, Registry,
};
use tracing::info;

/// Metrics collector for the coordinator
pub struct MetricsCollector {
    registry: Registry,

    // Detection metrics
    batches_total: IntCounter,
    detections_total: IntCounter,
    batch_duration: Histogram,
    frames_received: IntCounter,
    first_sightings: IntCounterVec,
    first_sightings_failed: IntCounter,

    // Persistence metrics
    persist_queue_depth: IntGauge,
    persist_jobs_dropped: IntGauge,
    db_connected: IntGauge,

    // Calibration metrics
    calibrations: IntCounterVec,

    // Channel metrics
    connections: IntGaugeVec,
    messages_received: IntCounterVec,
    protocol_errors: IntCounterVec,

    // Airfield state
    runway_status: IntGaugeVec,
    bird_risk: IntGauge,
}

impl MetricsCollector {
    pub fn new() -> prometheus::Result<Self> {
        let registry = Registry::new();

        // Detection metrics
        let batches_total = IntCounter::new(
            "airfield_hazard_batches_total",
            "Detection batches processed",
        )?;
        registry.register(Box::new(batches_total.clone()))?;

        let detections_total = IntCounter::new(
            "airfield_hazard_detections_total",
            "Detection records processed",
        )?;
        registry.register(Box::new(detections_total.clone()))?;

        let batch_duration = Histogram::with_opts(
            HistogramOpts::new(
                "airfield_hazard_batch_seconds",
                "Time to process one detection batch",
            )
            .buckets(vec![0.0005, 0.001, 0.0025, 0.005, 0.01, 0.025, 0.05, 0.1]),
        )?;
        registry.register(Box::new(batch_duration.clone()))?;

        let frames_received = IntCounter::new(
            "airfield_hazard_frames_received_total",
            "Camera frames received on the intake channel",
        )?;
        registry.register(Box::new(frames_received.clone()))?;

        let first_sightings = IntCounterVec::new(
            Opts::new("airfield_hazard_first_sightings_total", "First sightings stored"),
            &["kind"],
        )?;
        registry.register(Box::new(first_sightings.clone()))?;

        let first_sightings_failed = IntCounter::new(
            "airfield_hazard_first_sightings_failed_total",
            "First sightings that could not be stored and stay eligible",
        )?;
        registry.register(Box::new(first_sightings_failed.clone()))?;

        // Persistence metrics
        let persist_queue_depth = IntGauge::new(
            "airfield_hazard_persist_queue_depth",
            "Jobs waiting in the persistence queue",
        )?;
        registry.register(Box::new(persist_queue_depth.clone()))?;

        let persist_jobs_dropped = IntGauge::new(
            "airfield_hazard_persist_jobs_dropped",
            "Persistence jobs dropped because the queue was full",
        )?;
        registry.register(Box::new(persist_jobs_dropped.clone()))?;

        let db_connected = IntGauge::new(
            "airfield_hazard_db_connected",
            "Persistence gateway readiness",
        )?;
        registry.register(Box::new(db_connected.clone()))?;

        // Calibration metrics
        let calibrations = IntCounterVec::new(
            Opts::new("airfield_hazard_calibrations_total", "Calibration requests by outcome"),
            &["outcome"],
        )?;
        registry.register(Box::new(calibrations.clone()))?;

        // Channel metrics
        let connections = IntGaugeVec::new(
            Opts::new("airfield_hazard_connections", "Open connections per channel"),
            &["channel"],
        )?;
        registry.register(Box::new(connections.clone()))?;

        let messages_received = IntCounterVec::new(
            Opts::new("airfield_hazard_messages_received_total", "Inbound messages per channel"),
            &["channel"],
        )?;
        registry.register(Box::new(messages_received.clone()))?;

        let protocol_errors = IntCounterVec::new(
            Opts::new("airfield_hazard_protocol_errors_total", "Rejected inbound messages per channel"),
            &["channel"],
        )?;
        registry.register(Box::new(protocol_errors.clone()))?;

        // Airfield state
        let runway_status = IntGaugeVec::new(
            Opts::new("airfield_hazard_runway_status", "Runway status (0 clear, 1 warning)"),
            &["runway"],
        )?;
        registry.register(Box::new(runway_status.clone()))?;

        let bird_risk = IntGauge::new(
            "airfield_hazard_bird_risk",
            "Bird risk level (0 low, 1 medium, 2 high)",
        )?;
        registry.register(Box::new(bird_risk.clone()))?;

        info!("Metrics collector initialized");

        Ok(Self {
            registry,
            batches_total,
            detections_total,
            batch_duration,
            frames_received,
            first_sightings,
            first_sightings_failed,
            persist_queue_depth,
            persist_jobs_dropped,
            db_connected,
            calibrations,
            connections,
            messages_received,
            protocol_errors,
            runway_status,
            bird_risk,
        })
    }

    /// Export metrics in Prometheus text format
    pub fn export(&self) -> prometheus::Result<String> {
        use prometheus::Encoder;

        let encoder = prometheus::TextEncoder::new();
        let metric_families = self.registry.gather();
        let mut buffer = Vec::new();
        encoder.encode(&metric_families, &mut buffer)?;
        String::from_utf8(buffer).map_err(|e| prometheus::Error::Msg(e.to_string()))
    }

    // ========================================================================
    // DETECTION METRICS
    // ========================================================================

    pub fn record_batch(&self, records: usize, duration_secs: f64) {
        self.batches_total.inc();
        self.detections_total.inc_by(records as u64);
        self.batch_duration.observe(duration_secs);
    }

    pub fn record_frame(&self) {
        self.frames_received.inc();
    }

    pub fn record_first_sighting(&self, kind: EventKind) {
        let label = match kind {
            EventKind::Hazard => "hazard",
            EventKind::Unauthorized => "unauthorized",
            EventKind::Rescue => "rescue",
        };
        self.first_sightings.with_label_values(&[label]).inc();
    }

    pub fn record_first_sightings_failed(&self, count: usize) {
        self.first_sightings_failed.inc_by(count as u64);
    }

    // ========================================================================
    // PERSISTENCE METRICS
    // ========================================================================

    pub fn set_persist_queue(&self, depth: usize, dropped: u64) {
        self.persist_queue_depth.set(depth as i64);
        self.persist_jobs_dropped.set(dropped as i64);
    }

    pub fn set_db_connected(&self, connected: bool) {
        self.db_connected.set(if connected { 1 } else { 0 });
    }

    // ========================================================================
    // CALIBRATION METRICS
    // ========================================================================

    pub fn record_calibration(&self, committed: bool) {
        let outcome = if committed { "committed" } else { "rejected" };
        self.calibrations.with_label_values(&[outcome]).inc();
    }

    // ========================================================================
    // CHANNEL METRICS
    // ========================================================================

    pub fn connection_opened(&self, channel: &str) {
        self.connections.with_label_values(&[channel]).inc();
    }

    pub fn connection_closed(&self, channel: &str) {
        self.connections.with_label_values(&[channel]).dec();
    }

    pub fn record_message(&self, channel: &str) {
        self.messages_received.with_label_values(&[channel]).inc();
    }

    pub fn record_protocol_error(&self, channel: &str) {
        self.protocol_errors.with_label_values(&[channel]).inc();
    }

    // ========================================================================
    // AIRFIELD STATE
    // ========================================================================

    pub fn set_runway_status(&self, runway: RunwayId, status: RunwayStatus) {
        self.runway_status
            .with_label_values(&[&runway.to_string()])
            .set(status.code() as i64);
    }

    pub fn set_bird_risk(&self, level: BirdRiskLevel) {
        self.bird_risk.set(level.code() as i64);
    }
}

// ============================================================================
// TESTS
// ============================================================================
