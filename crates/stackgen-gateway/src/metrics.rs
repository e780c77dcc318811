//! Request counters exposed at `/metrics`

use dashmap::DashMap;
use std::fmt::Write;
use std::sync::atomic::{AtomicU64, Ordering};

/// Sizes of the per-caller state the gateway keeps in memory
#[derive(Clone, Copy, Debug, Default)]
pub struct TrackedState {
    pub rate_windows: usize,
    pub entitlement_records: usize,
}

#[derive(Default)]
pub struct GatewayMetrics {
    requests_total: AtomicU64,
    upstream_errors: AtomicU64,
    admitted: DashMap<String, u64>,
    denied: DashMap<&'static str, u64>,
}

impl GatewayMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_request(&self) {
        self.requests_total.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_admission(&self, route: &str) {
        *self.admitted.entry(route.to_string()).or_insert(0) += 1;
    }

    pub fn record_denial(&self, reason: &'static str) {
        *self.denied.entry(reason).or_insert(0) += 1;
    }

    pub fn record_upstream_error(&self) {
        self.upstream_errors.fetch_add(1, Ordering::Relaxed);
    }

    pub fn requests_total(&self) -> u64 {
        self.requests_total.load(Ordering::Relaxed)
    }

    pub fn denials(&self, reason: &str) -> u64 {
        self.denied.get(reason).map(|v| *v).unwrap_or(0)
    }

    /// Text exposition format
    pub fn render(&self, tracked: TrackedState) -> String {
        let mut out = String::new();

        let _ = writeln!(out, "# HELP stackgen_requests_total Requests received by the gateway");
        let _ = writeln!(out, "# TYPE stackgen_requests_total counter");
        let _ = writeln!(out, "stackgen_requests_total {}", self.requests_total());

        let _ = writeln!(out, "\n# HELP stackgen_admitted_total Requests admitted per route");
        let _ = writeln!(out, "# TYPE stackgen_admitted_total counter");
        let mut admitted: Vec<_> = self.admitted.iter().map(|e| (e.key().clone(), *e.value())).collect();
        admitted.sort();
        for (route, count) in admitted {
            let _ = writeln!(out, "stackgen_admitted_total{{route=\"{route}\"}} {count}");
        }

        let _ = writeln!(out, "\n# HELP stackgen_denied_total Requests denied per reason");
        let _ = writeln!(out, "# TYPE stackgen_denied_total counter");
        let mut denied: Vec<_> = self.denied.iter().map(|e| (*e.key(), *e.value())).collect();
        denied.sort();
        for (reason, count) in denied {
            let _ = writeln!(out, "stackgen_denied_total{{reason=\"{reason}\"}} {count}");
        }

        let _ = writeln!(out, "\n# HELP stackgen_upstream_errors_total Failed upstream calls");
        let _ = writeln!(out, "# TYPE stackgen_upstream_errors_total counter");
        let _ = writeln!(
            out,
            "stackgen_upstream_errors_total {}",
            self.upstream_errors.load(Ordering::Relaxed)
        );

        let _ = writeln!(out, "\n# HELP stackgen_tracked_callers Per-caller state held in memory");
        let _ = writeln!(out, "# TYPE stackgen_tracked_callers gauge");
        let _ = writeln!(out, "stackgen_tracked_callers{{kind=\"rate_window\"}} {}", tracked.rate_windows);
        let _ = writeln!(
            out,
            "stackgen_tracked_callers{{kind=\"entitlement\"}} {}",
            tracked.entitlement_records
        );

        out
    }
}
