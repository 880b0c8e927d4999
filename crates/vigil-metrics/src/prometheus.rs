//! Prometheus text exposition format.
//!
//! Renders service health metrics into the Prometheus text exposition
//! format for scraping by a Prometheus server or compatible agent.

use std::fmt::Write;

use crate::collector::ServiceMetrics;

/// Render per-service metrics plus process-wide gauges.
///
/// Per-service series carry `service` (slug) and `name` labels.
pub fn render_prometheus(services: &[ServiceMetrics], worker_running: bool) -> String {
    let mut out = String::new();

    family(
        &mut out,
        "ecosystem_service_up",
        "Whether the service's latest health check succeeded (1) or not (0).",
        "gauge",
        services,
        |m| m.status.to_string(),
    );
    family(
        &mut out,
        "ecosystem_service_response_time_ms",
        "Response time of the latest health check in milliseconds.",
        "gauge",
        services,
        |m| m.response_time_ms.to_string(),
    );
    family(
        &mut out,
        "ecosystem_service_uptime_percent",
        "Percentage of successful health checks since process start.",
        "gauge",
        services,
        |m| format!("{:.2}", m.uptime_percent),
    );
    family(
        &mut out,
        "ecosystem_service_checks_total",
        "Total health checks performed.",
        "counter",
        services,
        |m| m.checks_total.to_string(),
    );
    family(
        &mut out,
        "ecosystem_service_checks_successful_total",
        "Health checks that returned a 2xx status.",
        "counter",
        services,
        |m| m.checks_successful.to_string(),
    );
    family(
        &mut out,
        "ecosystem_service_checks_failed_total",
        "Health checks that failed, timed out, or returned non-2xx.",
        "counter",
        services,
        |m| m.checks_failed.to_string(),
    );

    let healthy = services.iter().filter(|m| m.is_up()).count();
    scalar(
        &mut out,
        "ecosystem_health_worker_running",
        "Whether the health check worker is running (1) or stopped (0).",
        u8::from(worker_running).to_string(),
    );
    scalar(
        &mut out,
        "ecosystem_services_total",
        "Number of services with health metrics.",
        services.len().to_string(),
    );
    scalar(
        &mut out,
        "ecosystem_services_healthy",
        "Number of services whose latest health check succeeded.",
        healthy.to_string(),
    );

    out
}

fn family(
    out: &mut String,
    name: &str,
    help: &str,
    kind: &str,
    services: &[ServiceMetrics],
    value: impl Fn(&ServiceMetrics) -> String,
) {
    let _ = writeln!(out, "# HELP {name} {help}");
    let _ = writeln!(out, "# TYPE {name} {kind}");
    for m in services {
        let _ = writeln!(
            out,
            "{name}{{service=\"{}\",name=\"{}\"}} {}",
            escape_label(&m.slug),
            escape_label(&m.name),
            value(m)
        );
    }
}

fn scalar(out: &mut String, name: &str, help: &str, value: String) {
    let _ = writeln!(out, "# HELP {name} {help}");
    let _ = writeln!(out, "# TYPE {name} gauge");
    let _ = writeln!(out, "{name} {value}");
}

/// Escape a label value: backslash, double quote, and newline.
fn escape_label(value: &str) -> String {
    let mut escaped = String::with_capacity(value.len());
    for c in value.chars() {
        match c {
            '\\' => escaped.push_str("\\\\"),
            '"' => escaped.push_str("\\\""),
            '\n' => escaped.push_str("\\n"),
            c => escaped.push(c),
        }
    }
    escaped
}
