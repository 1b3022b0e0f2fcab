use prometheus::{
    Encoder, HistogramVec, IntCounter, IntCounterVec, IntGauge, Opts, Registry, TextEncoder,
};

#[derive(Clone)]
pub struct Metrics {
    registry: Registry,
    pub assignments_total: IntCounterVec,
    pub assignment_latency_seconds: HistogramVec,
    pub claim_conflicts_total: IntCounter,
    pub notification_publish_total: IntCounterVec,
    pub notifications_pending: IntGauge,
}

impl Metrics {
    pub fn new() -> Self {
        let registry = Registry::new();

        let assignments_total = IntCounterVec::new(
            Opts::new("assignments_total", "Total assign calls by outcome"),
            &["outcome"],
        )
        .expect("valid assignments_total metric");

        let assignment_latency_seconds = HistogramVec::new(
            prometheus::HistogramOpts::new(
                "assignment_latency_seconds",
                "Latency of assign calls in seconds",
            ),
            &["outcome"],
        )
        .expect("valid assignment_latency_seconds metric");

        let claim_conflicts_total = IntCounter::new(
            "claim_conflicts_total",
            "Claims lost because the courier was no longer FREE",
        )
        .expect("valid claim_conflicts_total metric");

        let notification_publish_total = IntCounterVec::new(
            Opts::new(
                "notification_publish_total",
                "Notification publish attempts by outcome",
            ),
            &["outcome"],
        )
        .expect("valid notification_publish_total metric");

        let notifications_pending = IntGauge::new(
            "notifications_pending",
            "Assignments whose notification is not yet published",
        )
        .expect("valid notifications_pending metric");

        registry
            .register(Box::new(assignments_total.clone()))
            .expect("register assignments_total");
        registry
            .register(Box::new(assignment_latency_seconds.clone()))
            .expect("register assignment_latency_seconds");
        registry
            .register(Box::new(claim_conflicts_total.clone()))
            .expect("register claim_conflicts_total");
        registry
            .register(Box::new(notification_publish_total.clone()))
            .expect("register notification_publish_total");
        registry
            .register(Box::new(notifications_pending.clone()))
            .expect("register notifications_pending");

        Self {
            registry,
            assignments_total,
            assignment_latency_seconds,
            claim_conflicts_total,
            notification_publish_total,
            notifications_pending,
        }
    }

    pub fn encode(&self) -> Result<String, String> {
        let metric_families = self.registry.gather();
        let mut buffer = Vec::new();

        TextEncoder::new()
            .encode(&metric_families, &mut buffer)
            .map_err(|err| format!("failed to encode metrics: {err}"))?;

        String::from_utf8(buffer).map_err(|err| format!("metrics are not valid utf8: {err}"))
    }
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}
