//! Results reporting and formatting.

use crate::metrics::TestResults;
use comfy_table::{modifiers::UTF8_ROUND_CORNERS, presets::UTF8_FULL, Table};

/// Formats test results for output.
pub struct ResultsReport;

impl ResultsReport {
    /// Format results as a console table.
    pub fn format_table(results: &TestResults) -> String {
        let mut table = Table::new();
        table
            .load_preset(UTF8_FULL)
            .apply_modifier(UTF8_ROUND_CORNERS)
            .set_header(vec![format!("Load Test Results: {}", results.scenario_name)]);

        table.add_row(vec!["Host:", results.host.as_str()]);
        table.add_row(vec!["Users:", &format!("{}", results.users)]);
        table.add_row(vec!["Duration:", &format!("{:.1}s", results.duration_secs)]);
        table.add_row(vec![
            "Total Requests:",
            &format!("{}", results.total_requests),
        ]);
        table.add_row(vec![
            "Failed Requests:",
            &format!("{}", results.failed_requests),
        ]);
        table.add_row(vec![
            "Success Rate:",
            &format!("{:.1}%", results.success_rate()),
        ]);
        table.add_row(vec![
            "Requests/sec:",
            &format!("{:.1}", results.requests_per_second),
        ]);

        table.add_row(vec!["", ""]);
        table.add_row(vec!["Latency (ms)", "p50 / p90 / p95 / p99 / max"]);
        table.add_row(vec![
            "",
            &format!(
                "{:.1} / {:.1} / {:.1} / {:.1} / {:.1}",
                results.latency_p50,
                results.latency_p90,
                results.latency_p95,
                results.latency_p99,
                results.latency_max
            ),
        ]);

        table.add_row(vec!["", ""]);
        table.add_row(vec![
            "Throughput:",
            &format!("{:.3} MB/s", results.bytes_per_second / 1_000_000.0),
        ]);

        let mut out = table.to_string();

        if !results.endpoints.is_empty() {
            let mut endpoints = Table::new();
            endpoints
                .load_preset(UTF8_FULL)
                .apply_modifier(UTF8_ROUND_CORNERS)
                .set_header(vec!["Endpoint", "Requests", "Failures", "Avg (ms)", "Req/s"]);
            for e in &results.endpoints {
                endpoints.add_row(vec![
                    e.name.clone(),
                    e.requests.to_string(),
                    e.failures.to_string(),
                    format!("{:.1}", e.avg_latency_ms),
                    format!("{:.1}", e.requests_per_second),
                ]);
            }
            out.push('\n');
            out.push_str(&endpoints.to_string());
        }

        if !results.failures.is_empty() {
            let mut failures = Table::new();
            failures
                .load_preset(UTF8_FULL)
                .apply_modifier(UTF8_ROUND_CORNERS)
                .set_header(vec!["Endpoint", "Error", "Occurrences"]);
            for f in &results.failures {
                failures.add_row(vec![
                    f.endpoint.clone(),
                    f.error.clone(),
                    f.occurrences.to_string(),
                ]);
            }
            out.push('\n');
            out.push_str(&failures.to_string());
        }

        out
    }

    /// Format results as JSON.
    pub fn format_json(results: &TestResults) -> anyhow::Result<String> {
        Ok(serde_json::to_string_pretty(results)?)
    }

    /// Format results as CSV row.
    pub fn format_csv(results: &TestResults) -> String {
        format!(
            "{},{},{},{},{:.1},{},{},{:.1},{:.1},{:.1},{:.1}",
            results.timestamp,
            results.scenario_name,
            results.host,
            results.users,
            results.duration_secs,
            results.total_requests,
            results.failed_requests,
            results.requests_per_second,
            results.latency_p50,
            results.latency_p90,
            results.latency_p99
        )
    }

    /// CSV header row.
    pub fn csv_header() -> &'static str {
        "timestamp,scenario,host,users,duration,requests,failures,rps,p50,p90,p99"
    }
}
