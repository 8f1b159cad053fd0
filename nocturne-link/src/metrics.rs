//! Prometheus metrics for the link.
//!
//! Metrics are collected in a private registry and exported as text with
//! [`Metrics::encode`]; serving them is left to the embedding application.

use prometheus::{
    CounterVec, Encoder, Gauge, GaugeVec, HistogramOpts, HistogramVec, IntCounter, Opts, Registry,
    TextEncoder,
};

/// Transfer duration histogram buckets (in seconds).
const TRANSFER_BUCKETS: &[f64] = &[0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0];

/// Prometheus metrics for the link.
#[derive(Clone)]
pub struct Metrics {
    registry: Registry,
    /// Frames accepted by the transport, by lane.
    pub frames_sent_total: CounterVec,
    /// Failed send attempts, by lane.
    pub frames_failed_total: CounterVec,
    /// Messages dropped without being sent, by reason.
    pub frames_dropped_total: CounterVec,
    /// Inbound frames rejected by the codec.
    pub inbound_errors_total: IntCounter,
    /// Finished transfers by class and outcome.
    pub transfers_total: CounterVec,
    /// Transfer duration by class.
    pub transfer_duration: HistogramVec,
    /// Queued messages, by lane.
    pub lane_depth: GaugeVec,
    /// Connected peers.
    pub peers_connected: Gauge,
}

impl Metrics {
    /// Creates a new Metrics instance with all metrics registered.
    pub fn new() -> Result<Self, prometheus::Error> {
        let registry = Registry::new();

        let frames_sent_total = CounterVec::new(
            Opts::new("nocturne_frames_sent_total", "Frames sent by lane"),
            &["lane"],
        )?;
        registry.register(Box::new(frames_sent_total.clone()))?;

        let frames_failed_total = CounterVec::new(
            Opts::new("nocturne_frames_failed_total", "Failed send attempts by lane"),
            &["lane"],
        )?;
        registry.register(Box::new(frames_failed_total.clone()))?;

        let frames_dropped_total = CounterVec::new(
            Opts::new(
                "nocturne_frames_dropped_total",
                "Messages dropped without being sent, by reason",
            ),
            &["reason"],
        )?;
        registry.register(Box::new(frames_dropped_total.clone()))?;

        let inbound_errors_total = IntCounter::with_opts(Opts::new(
            "nocturne_inbound_errors_total",
            "Inbound frames rejected by the codec",
        ))?;
        registry.register(Box::new(inbound_errors_total.clone()))?;

        let transfers_total = CounterVec::new(
            Opts::new(
                "nocturne_transfers_total",
                "Finished transfers by asset class and outcome",
            ),
            &["class", "outcome"],
        )?;
        registry.register(Box::new(transfers_total.clone()))?;

        let transfer_duration = HistogramVec::new(
            HistogramOpts::new(
                "nocturne_transfer_duration_seconds",
                "Transfer duration in seconds by asset class",
            )
            .buckets(TRANSFER_BUCKETS.to_vec()),
            &["class"],
        )?;
        registry.register(Box::new(transfer_duration.clone()))?;

        let lane_depth = GaugeVec::new(
            Opts::new("nocturne_lane_depth", "Queued messages by lane"),
            &["lane"],
        )?;
        registry.register(Box::new(lane_depth.clone()))?;

        let peers_connected = Gauge::with_opts(Opts::new(
            "nocturne_peers_connected",
            "Number of connected peers",
        ))?;
        registry.register(Box::new(peers_connected.clone()))?;

        Ok(Self {
            registry,
            frames_sent_total,
            frames_failed_total,
            frames_dropped_total,
            inbound_errors_total,
            transfers_total,
            transfer_duration,
            lane_depth,
            peers_connected,
        })
    }

    /// Encodes all metrics in Prometheus text format.
    pub fn encode(&self) -> Result<String, prometheus::Error> {
        let mut buffer = Vec::new();
        TextEncoder::new().encode(&self.registry.gather(), &mut buffer)?;
        String::from_utf8(buffer).map_err(|e| prometheus::Error::Msg(e.to_string()))
    }

    /// Returns a reference to the registry.
    pub fn registry(&self) -> &Registry {
        &self.registry
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metrics_creation() {
        let metrics = Metrics::new().unwrap();
        metrics.frames_sent_total.with_label_values(&["bulk"]).inc();
        metrics.peers_connected.set(2.0);
        metrics
            .transfers_total
            .with_label_values(&["album_art", "success"])
            .inc();

        let text = metrics.encode().unwrap();
        assert!(text.contains("nocturne_frames_sent_total"));
        assert!(text.contains("nocturne_peers_connected 2"));
        assert!(text.contains("outcome=\"success\""));
    }

    #[test]
    fn test_independent_registries() {
        let a = Metrics::new().unwrap();
        let b = Metrics::new().unwrap();
        a.inbound_errors_total.inc();
        assert_eq!(a.inbound_errors_total.get(), 1);
        assert_eq!(b.inbound_errors_total.get(), 0);
    }
}
