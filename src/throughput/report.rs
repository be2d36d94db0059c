//! Test result formatting.

use super::sample::TestResult;

fn format_speed(mbps: f64) -> String {
    if mbps >= 1000.0 {
        format!("{:.2} Gbps", mbps / 1000.0)
    } else {
        format!("{:.1} Mbps", mbps)
    }
}

/// Format a test result as a human-readable summary.
pub fn format_summary(result: &TestResult) -> String {
    let speed = match result.median_mbps() {
        Some(mbps) => format_speed(mbps),
        None => "unavailable".to_string(),
    };

    let mut summary = format!(
        "{} test: {} median ({} of {} round{}, {} ok, {} failed)",
        result.direction,
        speed,
        result.samples.len(),
        result.round_count,
        if result.round_count == 1 { "" } else { "s" },
        result.success_count,
        result.failure_count,
    );

    if let Some(latency) = result.latency_ms {
        summary.push_str(&format!(
            ", latency: {:.2}ms median, {:.2}ms mean",
            latency.median, latency.mean
        ));
    }
    if result.cancelled {
        summary.push_str(" [cancelled]");
    }

    summary
}
