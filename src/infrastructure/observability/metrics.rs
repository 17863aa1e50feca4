//! Prometheus metrics definitions.
//!
//! All metrics use the `hypermind_` prefix and are read-only for consumers.

use prometheus::{
    CounterVec, Gauge, Opts, Registry,
    core::{AtomicF64, GenericGauge},
};
use std::sync::Arc;

#[derive(Clone)]
pub struct Metrics {
    #[allow(dead_code)]
    registry: Arc<Registry>,
    /// Cycles finished, by terminal status
    pub cycles_total: CounterVec,
    /// Ticks dropped because the previous cycle was still running
    pub ticks_skipped_total: prometheus::Counter,
    /// Decisions recorded, by parse status
    pub decisions_total: CounterVec,
    /// Fallback-model activations
    pub model_fallbacks_total: prometheus::Counter,
    /// Model attempts that failed, by kind
    pub model_failures_total: CounterVec,
    /// Orders recorded, by terminal status
    pub orders_total: CounterVec,
    /// Intents refused by the risk gate, by reason code
    pub risk_rejections_total: CounterVec,
    /// Post-execution position mismatches
    pub execution_drift_total: prometheus::Counter,
    /// Account equity in USD
    pub equity_usd: GenericGauge<AtomicF64>,
    /// Uptime in seconds
    pub uptime_seconds: GenericGauge<AtomicF64>,
}

impl Metrics {
    pub fn new() -> anyhow::Result<Self> {
        let registry = Registry::new();

        let cycles_total = CounterVec::new(
            Opts::new("hypermind_cycles_total", "Cycles finished by status"),
            &["status"],
        )?;
        registry.register(Box::new(cycles_total.clone()))?;

        let ticks_skipped_total = prometheus::Counter::with_opts(Opts::new(
            "hypermind_ticks_skipped_total",
            "Scheduler ticks dropped due to a running cycle",
        ))?;
        registry.register(Box::new(ticks_skipped_total.clone()))?;

        let decisions_total = CounterVec::new(
            Opts::new("hypermind_decisions_total", "Agent decisions by parse status"),
            &["parse_status"],
        )?;
        registry.register(Box::new(decisions_total.clone()))?;

        let model_fallbacks_total = prometheus::Counter::with_opts(Opts::new(
            "hypermind_model_fallbacks_total",
            "Fallback model activations",
        ))?;
        registry.register(Box::new(model_fallbacks_total.clone()))?;

        let model_failures_total = CounterVec::new(
            Opts::new("hypermind_model_failures_total", "Failed model attempts by kind"),
            &["kind"],
        )?;
        registry.register(Box::new(model_failures_total.clone()))?;

        let orders_total = CounterVec::new(
            Opts::new("hypermind_orders_total", "Orders by terminal status"),
            &["status"],
        )?;
        registry.register(Box::new(orders_total.clone()))?;

        let risk_rejections_total = CounterVec::new(
            Opts::new("hypermind_risk_rejections_total", "Risk-gate rejections by reason"),
            &["reason"],
        )?;
        registry.register(Box::new(risk_rejections_total.clone()))?;

        let execution_drift_total = prometheus::Counter::with_opts(Opts::new(
            "hypermind_execution_drift_total",
            "Post-execution position mismatches",
        ))?;
        registry.register(Box::new(execution_drift_total.clone()))?;

        let equity_usd = Gauge::with_opts(Opts::new("hypermind_equity_usd", "Account equity in USD"))?;
        registry.register(Box::new(equity_usd.clone()))?;

        let uptime_seconds =
            Gauge::with_opts(Opts::new("hypermind_uptime_seconds", "Uptime in seconds"))?;
        registry.register(Box::new(uptime_seconds.clone()))?;

        Ok(Self {
            registry: Arc::new(registry),
            cycles_total,
            ticks_skipped_total,
            decisions_total,
            model_fallbacks_total,
            model_failures_total,
            orders_total,
            risk_rejections_total,
            execution_drift_total,
            equity_usd,
            uptime_seconds,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn metrics_register_without_collision() {
        let metrics = Metrics::new().unwrap();
        metrics.cycles_total.with_label_values(&["OK"]).inc();
        metrics.ticks_skipped_total.inc();
        assert_eq!(metrics.cycles_total.with_label_values(&["OK"]).get(), 1.0);
    }
}
