//! Gateway metrics registry.
//!
//! Plain atomic counters plus one latency histogram, rendered as Prometheus
//! text on demand. Constructed once at startup and threaded through the
//! gateway and workers as an explicit dependency.

use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};

/// Rejection reason labels. Kept lowercase to match the exposition format.
pub mod reason {
    pub const OPERATOR: &str = "operator";
    pub const SLIPPAGE: &str = "slippage";
    pub const MARKET_DATA: &str = "market_data";
    pub const TIMEOUT: &str = "timeout";
    pub const GUARDIAN_LOCK: &str = "guardian_lock";
    pub const HASH_MISMATCH: &str = "hash_mismatch";
}

/// Histogram over decision latency (seconds between request and decision).
#[derive(Debug)]
pub struct LatencyHistogram {
    bounds: &'static [f64],
    buckets: Vec<AtomicU64>,
    sum_micros: AtomicU64,
    count: AtomicU64,
}

const LATENCY_BOUNDS_SECONDS: &[f64] = &[1.0, 5.0, 15.0, 30.0, 60.0, 120.0, 300.0, 600.0];

impl LatencyHistogram {
    fn new() -> Self {
        Self {
            bounds: LATENCY_BOUNDS_SECONDS,
            buckets: (0..=LATENCY_BOUNDS_SECONDS.len())
                .map(|_| AtomicU64::new(0))
                .collect(),
            sum_micros: AtomicU64::new(0),
            count: AtomicU64::new(0),
        }
    }

    pub fn observe(&self, seconds: f64) {
        let idx = self
            .bounds
            .iter()
            .position(|&b| seconds <= b)
            .unwrap_or(self.bounds.len());
        self.buckets[idx].fetch_add(1, Ordering::Relaxed);
        self.sum_micros
            .fetch_add((seconds * 1_000_000.0).max(0.0) as u64, Ordering::Relaxed);
        self.count.fetch_add(1, Ordering::Relaxed);
    }

    pub fn count(&self) -> u64 {
        self.count.load(Ordering::Relaxed)
    }

    fn render(&self, name: &str, out: &mut String) {
        let mut cumulative = 0u64;
        for (i, bound) in self.bounds.iter().enumerate() {
            cumulative += self.buckets[i].load(Ordering::Relaxed);
            out.push_str(&format!("{name}_bucket{{le=\"{bound}\"}} {cumulative}\n"));
        }
        cumulative += self.buckets[self.bounds.len()].load(Ordering::Relaxed);
        out.push_str(&format!("{name}_bucket{{le=\"+Inf\"}} {cumulative}\n"));
        out.push_str(&format!(
            "{name}_sum {}\n",
            self.sum_micros.load(Ordering::Relaxed) as f64 / 1_000_000.0
        ));
        out.push_str(&format!("{name}_count {}\n", self.count()));
    }
}

#[derive(Debug)]
pub struct HitlMetrics {
    /// Approvals created (includes disabled-mode auto-accepts).
    pub requests_total: AtomicU64,
    /// Creates refused because the Guardian was locked.
    pub blocked_by_guardian_total: AtomicU64,
    pub approvals_total: AtomicU64,
    /// Rejections by reason label.
    rejections_total: RwLock<HashMap<&'static str, AtomicU64>>,
    /// Timeout rejections, also counted under `rejections_total{timeout}`.
    pub rejections_timeout_total: AtomicU64,
    pub response_latency_seconds: LatencyHistogram,
}

impl HitlMetrics {
    pub fn new() -> Self {
        Self {
            requests_total: AtomicU64::new(0),
            blocked_by_guardian_total: AtomicU64::new(0),
            approvals_total: AtomicU64::new(0),
            rejections_total: RwLock::new(HashMap::new()),
            rejections_timeout_total: AtomicU64::new(0),
            response_latency_seconds: LatencyHistogram::new(),
        }
    }

    pub fn incr_request(&self) {
        self.requests_total.fetch_add(1, Ordering::Relaxed);
    }

    pub fn incr_blocked_by_guardian(&self) {
        self.blocked_by_guardian_total.fetch_add(1, Ordering::Relaxed);
    }

    pub fn incr_approval(&self) {
        self.approvals_total.fetch_add(1, Ordering::Relaxed);
    }

    pub fn incr_rejection(&self, reason: &'static str) {
        {
            let map = self.rejections_total.read();
            if let Some(counter) = map.get(reason) {
                counter.fetch_add(1, Ordering::Relaxed);
                if reason == reason::TIMEOUT {
                    self.rejections_timeout_total.fetch_add(1, Ordering::Relaxed);
                }
                return;
            }
        }
        self.rejections_total
            .write()
            .entry(reason)
            .or_insert_with(|| AtomicU64::new(0))
            .fetch_add(1, Ordering::Relaxed);
        if reason == reason::TIMEOUT {
            self.rejections_timeout_total.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn observe_response_latency(&self, seconds: f64) {
        self.response_latency_seconds.observe(seconds);
    }

    pub fn rejections(&self, reason: &str) -> u64 {
        self.rejections_total
            .read()
            .get(reason)
            .map(|c| c.load(Ordering::Relaxed))
            .unwrap_or(0)
    }

    /// Prometheus text exposition.
    pub fn render_prometheus(&self) -> String {
        let mut out = String::with_capacity(1024);

        out.push_str("# TYPE hitl_requests_total counter\n");
        out.push_str(&format!(
            "hitl_requests_total {}\n",
            self.requests_total.load(Ordering::Relaxed)
        ));

        out.push_str("# TYPE blocked_by_guardian_total counter\n");
        out.push_str(&format!(
            "blocked_by_guardian_total {}\n",
            self.blocked_by_guardian_total.load(Ordering::Relaxed)
        ));

        out.push_str("# TYPE hitl_approvals_total counter\n");
        out.push_str(&format!(
            "hitl_approvals_total {}\n",
            self.approvals_total.load(Ordering::Relaxed)
        ));

        out.push_str("# TYPE hitl_rejections_total counter\n");
        {
            let map = self.rejections_total.read();
            let mut reasons: Vec<_> = map.keys().collect();
            reasons.sort();
            for r in reasons {
                out.push_str(&format!(
                    "hitl_rejections_total{{reason=\"{r}\"}} {}\n",
                    map[r].load(Ordering::Relaxed)
                ));
            }
        }

        out.push_str("# TYPE hitl_rejections_timeout_total counter\n");
        out.push_str(&format!(
            "hitl_rejections_timeout_total {}\n",
            self.rejections_timeout_total.load(Ordering::Relaxed)
        ));

        out.push_str("# TYPE hitl_response_latency_seconds histogram\n");
        self.response_latency_seconds
            .render("hitl_response_latency_seconds", &mut out);

        out
    }
}

impl Default for HitlMetrics {
    fn default() -> Self {
        Self::new()
    }
}
