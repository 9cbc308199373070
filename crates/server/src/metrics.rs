use std::{
    collections::HashMap,
    fmt::Write as _,
    sync::{
        atomic::{AtomicI64, AtomicU64, Ordering},
        Arc, Mutex, OnceLock,
    },
};

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct EndpointMetricKey {
    endpoint: String,
    method: String,
}

/// Process-local counters for the HTTP surface and the fan-out engine.
#[derive(Default)]
pub struct ServerMetrics {
    request_total: Mutex<HashMap<EndpointMetricKey, u64>>,
    request_errors_total: Mutex<HashMap<EndpointMetricKey, u64>>,
    request_duration_sum_ms: Mutex<HashMap<EndpointMetricKey, u64>>,
    sse_subscribers: AtomicI64,
    broadcast_events_total: AtomicU64,
    broadcast_drops_total: AtomicU64,
}

static GLOBAL_METRICS: OnceLock<Arc<ServerMetrics>> = OnceLock::new();

pub fn set_global_metrics(metrics: Arc<ServerMetrics>) {
    let _ = GLOBAL_METRICS.set(metrics);
}

fn global_metrics() -> Option<&'static Arc<ServerMetrics>> {
    GLOBAL_METRICS.get()
}

pub fn record_http_request(method: &str, path: &str, status_code: u16, latency_ms: u64) {
    if let Some(metrics) = global_metrics() {
        metrics.record_http_request(method, path, status_code, latency_ms);
    }
}

pub fn subscriber_connected() {
    if let Some(metrics) = global_metrics() {
        metrics.sse_subscribers.fetch_add(1, Ordering::Relaxed);
    }
}

pub fn subscriber_disconnected() {
    if let Some(metrics) = global_metrics() {
        metrics.sse_subscribers.fetch_sub(1, Ordering::Relaxed);
    }
}

pub fn record_broadcast(dropped_subscribers: u64) {
    if let Some(metrics) = global_metrics() {
        metrics.broadcast_events_total.fetch_add(1, Ordering::Relaxed);
        metrics.broadcast_drops_total.fetch_add(dropped_subscribers, Ordering::Relaxed);
    }
}

impl ServerMetrics {
    pub fn record_http_request(&self, method: &str, path: &str, status_code: u16, latency_ms: u64) {
        let key = EndpointMetricKey {
            endpoint: normalize_endpoint(path),
            method: method.to_ascii_uppercase(),
        };

        increment_counter(&self.request_total, &key, 1);
        increment_counter(&self.request_duration_sum_ms, &key, latency_ms);
        if status_code >= 400 {
            increment_counter(&self.request_errors_total, &key, 1);
        }
    }

    pub fn sse_subscriber_count(&self) -> i64 {
        self.sse_subscribers.load(Ordering::Relaxed)
    }

    /// Render all counters as a plain-text dump for `GET /metrics`.
    pub fn render(&self) -> String {
        let mut out = String::new();
        let _ = writeln!(
            out,
            "sse_subscribers {}",
            self.sse_subscribers.load(Ordering::Relaxed)
        );
        let _ = writeln!(
            out,
            "broadcast_events_total {}",
            self.broadcast_events_total.load(Ordering::Relaxed)
        );
        let _ = writeln!(
            out,
            "broadcast_drops_total {}",
            self.broadcast_drops_total.load(Ordering::Relaxed)
        );

        let totals = self.request_total.lock().expect("metrics map lock poisoned");
        let errors = self.request_errors_total.lock().expect("metrics map lock poisoned");
        let mut keys: Vec<&EndpointMetricKey> = totals.keys().collect();
        keys.sort_by(|a, b| (&a.endpoint, &a.method).cmp(&(&b.endpoint, &b.method)));
        for key in keys {
            let total = totals.get(key).copied().unwrap_or(0);
            let error = errors.get(key).copied().unwrap_or(0);
            let _ = writeln!(
                out,
                "http_requests_total{{method=\"{}\",endpoint=\"{}\"}} {}",
                key.method, key.endpoint, total
            );
            if error > 0 {
                let _ = writeln!(
                    out,
                    "http_request_errors_total{{method=\"{}\",endpoint=\"{}\"}} {}",
                    key.method, key.endpoint, error
                );
            }
        }
        out
    }
}

fn increment_counter(
    map: &Mutex<HashMap<EndpointMetricKey, u64>>,
    key: &EndpointMetricKey,
    amount: u64,
) {
    let mut guard = map.lock().expect("metrics map lock poisoned");
    *guard.entry(key.clone()).or_insert(0) += amount;
}

/// Collapse UUID path segments so each route is one metric label.
fn normalize_endpoint(path: &str) -> String {
    path.split('/')
        .map(|segment| {
            if uuid::Uuid::parse_str(segment).is_ok() {
                "{id}"
            } else {
                segment
            }
        })
        .collect::<Vec<_>>()
        .join("/")
}
