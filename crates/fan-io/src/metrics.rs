//! Prometheus metrics for the fan control loop.

use fan_core::{tags, TelemetrySink, TickRecord};
use prometheus::{Encoder, Gauge, Histogram, HistogramOpts, IntCounter, IntGauge, Registry, TextEncoder};
use std::sync::LazyLock;
use std::thread;
use tiny_http::{Response, Server};

pub static REGISTRY: LazyLock<Registry> = LazyLock::new(Registry::new);

// ============================================================================
// Loop Metrics
// ============================================================================

pub static TICKS_EXECUTED: LazyLock<IntCounter> = LazyLock::new(|| {
    let counter = IntCounter::new("fand_ticks_executed_total", "Control ticks executed")
        .expect("valid metric");
    REGISTRY.register(Box::new(counter.clone())).expect("metric registered once");
    counter
});

/// Tick boundaries skipped because a tick overran its period.
pub static TICKS_MISSED: LazyLock<IntGauge> = LazyLock::new(|| {
    let gauge = IntGauge::new(
        "fand_ticks_missed",
        "Tick boundaries skipped due to overruns since start",
    )
    .expect("valid metric");
    REGISTRY.register(Box::new(gauge.clone())).expect("metric registered once");
    gauge
});

pub static TICK_DURATION_US: LazyLock<Histogram> = LazyLock::new(|| {
    let histogram = Histogram::with_opts(
        HistogramOpts::new(
            tags::TICK_DURATION_US.metric,
            "Time spent inside one tick in microseconds",
        )
        .buckets(vec![
            100.0, 500.0, 1_000.0, 5_000.0, 25_000.0, 100_000.0, 250_000.0, 500_000.0, 1_000_000.0,
        ]),
    )
    .expect("valid metric");
    REGISTRY.register(Box::new(histogram.clone())).expect("metric registered once");
    histogram
});

pub static ACTUATOR_FAILURES: LazyLock<IntCounter> = LazyLock::new(|| {
    let counter = IntCounter::new(
        "fand_actuator_failures_total",
        "Ticks whose duty write failed or timed out",
    )
    .expect("valid metric");
    REGISTRY.register(Box::new(counter.clone())).expect("metric registered once");
    counter
});

// ============================================================================
// Thermal State Metrics
// ============================================================================

pub static CONTROL_TEMP_C: LazyLock<Gauge> = LazyLock::new(|| {
    let gauge = Gauge::new(
        tags::CONTROL_TEMP_C.metric,
        "Aggregated control temperature in Celsius",
    )
    .expect("valid metric");
    REGISTRY.register(Box::new(gauge.clone())).expect("metric registered once");
    gauge
});

pub static TARGET_DUTY: LazyLock<Gauge> = LazyLock::new(|| {
    let gauge = Gauge::new(tags::TARGET_DUTY.metric, "Duty requested by the curve")
        .expect("valid metric");
    REGISTRY.register(Box::new(gauge.clone())).expect("metric registered once");
    gauge
});

pub static APPLIED_DUTY: LazyLock<Gauge> = LazyLock::new(|| {
    let gauge = Gauge::new(tags::APPLIED_DUTY.metric, "Duty last confirmed by the fan")
        .expect("valid metric");
    REGISTRY.register(Box::new(gauge.clone())).expect("metric registered once");
    gauge
});

pub static CONTRIBUTING_SOURCES: LazyLock<IntGauge> = LazyLock::new(|| {
    let gauge = IntGauge::new(
        tags::CONTRIBUTING_SOURCES.metric,
        "Sensors that contributed to the last tick",
    )
    .expect("valid metric");
    REGISTRY.register(Box::new(gauge.clone())).expect("metric registered once");
    gauge
});

/// 1 while fewer sources than required contributed.
pub static DEGRADED: LazyLock<IntGauge> = LazyLock::new(|| {
    let gauge = IntGauge::new(tags::DEGRADED.metric, "Aggregation degraded (1) or healthy (0)")
        .expect("valid metric");
    REGISTRY.register(Box::new(gauge.clone())).expect("metric registered once");
    gauge
});

pub static FAIL_SAFE: LazyLock<IntGauge> = LazyLock::new(|| {
    let gauge = IntGauge::new(tags::FAIL_SAFE.metric, "Fail-safe duty forced (1) or not (0)")
        .expect("valid metric");
    REGISTRY.register(Box::new(gauge.clone())).expect("metric registered once");
    gauge
});

// ============================================================================
// Sink
// ============================================================================

/// Publishes every tick into the global registry.
#[derive(Debug, Default)]
pub struct PrometheusSink;

impl TelemetrySink for PrometheusSink {
    fn record(&mut self, t: &TickRecord) {
        TICKS_EXECUTED.inc();
        TICKS_MISSED.set(t.ticks_missed as i64);
        TICK_DURATION_US.observe(t.tick_duration_us as f64);
        if !t.actuator_ok {
            ACTUATOR_FAILURES.inc();
        }
        CONTROL_TEMP_C.set(t.control_celsius);
        TARGET_DUTY.set(t.target_duty);
        APPLIED_DUTY.set(t.applied_duty);
        CONTRIBUTING_SOURCES.set(t.contributing.len() as i64);
        DEGRADED.set(i64::from(t.degraded));
        FAIL_SAFE.set(i64::from(t.fail_safe));
    }
}

// ============================================================================
// Metrics HTTP Server
// ============================================================================

/// Serves `/metrics`, `/health` and `/ready` on a background thread.
pub fn serve_metrics(bind_addr: String) -> thread::JoinHandle<()> {
    thread::spawn(move || {
        let server = match Server::http(&bind_addr) {
            Ok(s) => s,
            Err(e) => {
                tracing::error!("Failed to start metrics server on {}: {}", bind_addr, e);
                return;
            }
        };

        tracing::info!("Metrics server listening on http://{}/metrics", bind_addr);

        for request in server.incoming_requests() {
            let response = match request.url() {
                "/metrics" => match encode() {
                    Ok(body) => {
                        let mut response = Response::from_data(body);
                        if let Ok(header) = tiny_http::Header::from_bytes(
                            &b"Content-Type"[..],
                            &b"text/plain; version=0.0.4"[..],
                        ) {
                            response = response.with_header(header);
                        }
                        response
                    }
                    Err(e) => {
                        tracing::warn!("Failed to encode metrics: {}", e);
                        Response::from_string("Internal Server Error").with_status_code(500)
                    }
                },
                "/health" => Response::from_string("OK"),
                "/ready" if TICKS_EXECUTED.get() > 0 => Response::from_string("Ready"),
                "/ready" => Response::from_string("Not Ready").with_status_code(503),
                _ => Response::from_string("Not Found").with_status_code(404),
            };
            let _ = request.respond(response);
        }
    })
}

/// Text exposition of everything in [`REGISTRY`].
pub fn encode() -> prometheus::Result<Vec<u8>> {
    let mut buffer = Vec::new();
    TextEncoder::new().encode(&REGISTRY.gather(), &mut buffer)?;
    Ok(buffer)
}

/// Forces registration so every series is exported from the first scrape.
pub fn init_metrics() {
    let _ = TICKS_EXECUTED.get();
    let _ = TICKS_MISSED.get();
    let _ = TICK_DURATION_US.get_sample_count();
    let _ = ACTUATOR_FAILURES.get();
    let _ = CONTROL_TEMP_C.get();
    let _ = TARGET_DUTY.get();
    let _ = APPLIED_DUTY.get();
    let _ = CONTRIBUTING_SOURCES.get();
    let _ = DEGRADED.get();
    let _ = FAIL_SAFE.get();
}

#[cfg(test)]
mod tests {
    use super::*;
    use fan_core::SupervisorState;

    fn record(fail_safe: bool, actuator_ok: bool) -> TickRecord {
        TickRecord {
            tick: 1,
            timestamp_us: 1_000,
            unix_us: 0,
            control_celsius: 58.5,
            degraded: fail_safe,
            fail_safe,
            supervisor: if fail_safe {
                SupervisorState::FailSafe
            } else {
                SupervisorState::Normal
            },
            contributing: vec!["cpu".into(), "gpu".into()],
            target_duty: 47.0,
            applied_duty: 45.0,
            actuator_ok,
            tick_duration_us: 800,
            ticks_missed: 2,
        }
    }

    #[test]
    fn sink_publishes_tick_state() {
        init_metrics();
        let failures_before = ACTUATOR_FAILURES.get();
        let ticks_before = TICKS_EXECUTED.get();

        let mut sink = PrometheusSink;
        sink.record(&record(false, true));
        sink.record(&record(true, false));

        assert!(TICKS_EXECUTED.get() >= ticks_before + 2);
        assert!(ACTUATOR_FAILURES.get() > failures_before);
        assert_eq!(FAIL_SAFE.get(), 1);
        assert_eq!(CONTRIBUTING_SOURCES.get(), 2);
        assert_eq!(TICKS_MISSED.get(), 2);

        let text = String::from_utf8(encode().unwrap()).unwrap();
        assert!(text.contains(tags::APPLIED_DUTY.metric));
        assert!(text.contains("fand_ticks_executed_total"));
    }
}
