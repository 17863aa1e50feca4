use serde_json::json;
use std::time::{Duration, Instant};
use tracing::info;

use super::metrics::Metrics;

/// Push-based metrics reporter: one structured JSON line per interval on
/// stdout, prefixed `METRICS_JSON:` for log collectors. No HTTP listener,
/// no incoming connections.
pub struct MetricsReporter {
    metrics: Metrics,
    interval_secs: u64,
    started: Instant,
}

impl MetricsReporter {
    pub fn new(metrics: Metrics, interval_secs: u64) -> Self {
        Self {
            metrics,
            interval_secs,
            started: Instant::now(),
        }
    }

    pub async fn run(self) {
        let mut ticker = tokio::time::interval(Duration::from_secs(self.interval_secs));
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        loop {
            ticker.tick().await;
            self.metrics
                .uptime_seconds
                .set(self.started.elapsed().as_secs_f64());
            self.emit();
        }
    }

    fn emit(&self) {
        let m = &self.metrics;
        let payload = json!({
            "timestamp": chrono::Utc::now().to_rfc3339(),
            "uptime_seconds": m.uptime_seconds.get(),
            "equity_usd": m.equity_usd.get(),
            "cycles": {
                "ok": m.cycles_total.with_label_values(&["OK"]).get(),
                "failed": m.cycles_total.with_label_values(&["FAILED"]).get(),
                "data_unavailable": m.cycles_total.with_label_values(&["DATA_UNAVAILABLE"]).get(),
                "exchange_down": m.cycles_total.with_label_values(&["EXCHANGE_DOWN"]).get(),
                "ticks_skipped": m.ticks_skipped_total.get(),
            },
            "decisions": {
                "ok": m.decisions_total.with_label_values(&["OK"]).get(),
                "malformed": m.decisions_total.with_label_values(&["MALFORMED"]).get(),
                "empty": m.decisions_total.with_label_values(&["EMPTY"]).get(),
                "model_fallbacks": m.model_fallbacks_total.get(),
            },
            "orders": {
                "filled": m.orders_total.with_label_values(&["FILLED"]).get(),
                "rejected": m.orders_total.with_label_values(&["REJECTED"]).get(),
                "failed": m.orders_total.with_label_values(&["FAILED"]).get(),
            },
            "execution_drift": m.execution_drift_total.get(),
        });

        info!("METRICS_JSON:{}", payload);
    }
}
