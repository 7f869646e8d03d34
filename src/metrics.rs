use metrics::{counter, gauge};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};

/// Install the Prometheus exporter and register all application metrics.
/// Returns a `PrometheusHandle` whose `render()` method produces the
/// text/plain Prometheus scrape payload.
pub fn init_metrics() -> PrometheusHandle {
    let builder = PrometheusBuilder::new();
    let handle = builder
        .install_recorder()
        .expect("failed to install Prometheus recorder");

    // Pre-register counters so they appear even before the first increment.
    counter!("trade_events_total").absolute(0);
    counter!("signals_rejected_total").absolute(0);
    counter!("risk_vetoes_total").absolute(0);
    counter!("orders_confirmed_total").absolute(0);
    counter!("orders_dead_letter_total").absolute(0);
    counter!("positions_opened_total").absolute(0);
    counter!("positions_closed_total").absolute(0);
    counter!("book_fetch_failures_total").absolute(0);

    // Pre-register gauges at zero.
    gauge!("open_positions").set(0.0);
    gauge!("open_exposure_usd").set(0.0);

    handle
}
