//! Metrics collection and exposition.
//!
//! # Responsibilities
//! - Count HTTP requests by method, status class and normalized route
//! - Count DB operations and keep duration samples for both families
//! - Build Prometheus metric families on demand and encode them as text
//!
//! # Metrics
//! - `http_requests_total` (counter): by method, status class, route
//! - `http_request_duration_ms` (histogram): trailing-window latency
//! - `http_active_connections` (gauge), `http_active_connections_peak` (gauge)
//! - `db_queries_total` (counter): by operation
//! - `db_query_duration_ms` (histogram): trailing-window latency
//! - `errors_total` (counter): by type
//! - `cache_*`, `db_pool_*`, `circuit_breaker_state`, `process_*` (gauges)
//!
//! # Design Decisions
//! - Routes are normalized before they become labels so cardinality stays bounded
//! - Samples are capped by count and by age; histograms are computed when scraped
//! - Counter updates take one short mutex; nothing is held across awaits

use std::collections::{BTreeMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use prometheus::proto::{Bucket, Counter, Gauge, Histogram, LabelPair, Metric, MetricFamily, MetricType};
use prometheus::{Encoder, TextEncoder};
use tokio::time::Instant;

use crate::auth::cache::CacheStats;
use crate::db::PoolStats;
use crate::resilience::circuit_breaker::BreakerSnapshot;

/// Histogram upper bounds in milliseconds (`+Inf` is implicit).
pub const DURATION_BUCKETS_MS: [f64; 11] = [
    5.0, 10.0, 25.0, 50.0, 100.0, 250.0, 500.0, 1000.0, 2500.0, 5000.0, 10000.0,
];

/// Longest route label kept.
const MAX_ROUTE_LEN: usize = 100;

/// Prometheus text format content type.
pub const CONTENT_TYPE: &str = prometheus::TEXT_FORMAT;

/// Collapse a request path into a bounded-cardinality route label.
///
/// Numeric segments become `:id`, UUID segments become `:uuid`, and the
/// query string is dropped.
pub fn normalize_route(path: &str) -> String {
    let path = path.split(['?', '#']).next().unwrap_or_default();

    let normalized = path
        .split('/')
        .map(|segment| {
            if !segment.is_empty() && segment.bytes().all(|b| b.is_ascii_digit()) {
                ":id"
            } else if segment.len() == 36 && uuid::Uuid::parse_str(segment).is_ok() {
                ":uuid"
            } else {
                segment
            }
        })
        .collect::<Vec<_>>()
        .join("/");

    normalized.chars().take(MAX_ROUTE_LEN).collect()
}

/// Route label for an axum route template.
///
/// `{name}` captures become `:name` and `{*rest}` becomes `*rest`, so matched
/// and unmatched requests share one placeholder syntax.
pub fn template_route(template: &str) -> String {
    let label = template
        .split('/')
        .map(|segment| match segment.strip_prefix('{').and_then(|s| s.strip_suffix('}')) {
            Some(capture) => match capture.strip_prefix('*') {
                Some(rest) => format!("*{rest}"),
                None => format!(":{capture}"),
            },
            None => segment.to_string(),
        })
        .collect::<Vec<_>>()
        .join("/");

    label.chars().take(MAX_ROUTE_LEN).collect()
}

/// "2xx", "4xx", ...
pub fn status_class(status: u16) -> String {
    format!("{}xx", status / 100)
}

#[derive(Debug, Clone, Copy)]
struct Sample {
    duration_ms: f64,
    recorded_at: Instant,
}

/// Duration samples bounded by count and age.
#[derive(Debug)]
struct SampleWindow {
    samples: VecDeque<Sample>,
    window: Duration,
    max_samples: usize,
}

/// Cumulative histogram over the live window.
#[derive(Debug, Clone, PartialEq)]
pub struct HistogramSnapshot {
    /// Cumulative count per bucket in [`DURATION_BUCKETS_MS`] order, then `+Inf`.
    pub cumulative: Vec<u64>,
    pub sum: f64,
    pub count: u64,
}

impl SampleWindow {
    fn new(window: Duration, max_samples: usize) -> Self {
        Self {
            samples: VecDeque::new(),
            window,
            max_samples,
        }
    }

    fn push(&mut self, duration: Duration) {
        self.samples.push_back(Sample {
            duration_ms: duration.as_secs_f64() * 1000.0,
            recorded_at: Instant::now(),
        });
        while self.samples.len() > self.max_samples {
            self.samples.pop_front();
        }
    }

    fn prune(&mut self) {
        let now = Instant::now();
        while let Some(front) = self.samples.front() {
            if now.duration_since(front.recorded_at) >= self.window {
                self.samples.pop_front();
            } else {
                break;
            }
        }
    }

    fn histogram(&mut self) -> HistogramSnapshot {
        self.prune();

        let mut cumulative = vec![0u64; DURATION_BUCKETS_MS.len() + 1];
        let mut sum = 0.0;
        for sample in &self.samples {
            sum += sample.duration_ms;
            for (i, bound) in DURATION_BUCKETS_MS.iter().enumerate() {
                if sample.duration_ms <= *bound {
                    cumulative[i] += 1;
                }
            }
            cumulative[DURATION_BUCKETS_MS.len()] += 1;
        }

        HistogramSnapshot {
            cumulative,
            sum,
            count: self.samples.len() as u64,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
struct HttpKey {
    method: String,
    status_class: String,
    route: String,
}

#[derive(Debug)]
struct Inner {
    http_requests: BTreeMap<HttpKey, u64>,
    http_durations: SampleWindow,
    db_queries: BTreeMap<String, u64>,
    db_durations: SampleWindow,
    errors: BTreeMap<String, u64>,
}

/// Runtime values read at scrape time from other subsystems.
#[derive(Debug, Clone, Default)]
pub struct RuntimeSnapshot {
    pub uptime: Duration,
    pub resident_memory_bytes: Option<u64>,
    pub cache: Option<CacheStats>,
    pub pool: Option<PoolStats>,
    pub breakers: Vec<BreakerSnapshot>,
}

/// Process-wide metrics accumulator, constructed once at startup.
#[derive(Debug)]
pub struct MetricsRegistry {
    inner: Mutex<Inner>,
    active_connections: AtomicU64,
    peak_connections: AtomicU64,
}

impl MetricsRegistry {
    pub fn new(window: Duration, max_samples: usize) -> Self {
        Self {
            inner: Mutex::new(Inner {
                http_requests: BTreeMap::new(),
                http_durations: SampleWindow::new(window, max_samples),
                db_queries: BTreeMap::new(),
                db_durations: SampleWindow::new(window, max_samples),
                errors: BTreeMap::new(),
            }),
            active_connections: AtomicU64::new(0),
            peak_connections: AtomicU64::new(0),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Record a finished HTTP request. `route` must already be normalized.
    pub fn record_http(&self, method: &str, status: u16, route: &str, duration: Duration) {
        let key = HttpKey {
            method: method.to_string(),
            status_class: status_class(status),
            route: route.to_string(),
        };

        let mut inner = self.lock();
        *inner.http_requests.entry(key).or_insert(0) += 1;
        inner.http_durations.push(duration);

        if status >= 500 {
            *inner.errors.entry("server_error".to_string()).or_insert(0) += 1;
        } else if status >= 400 {
            *inner.errors.entry("client_error".to_string()).or_insert(0) += 1;
        }
    }

    pub fn record_db_query(&self, operation: &str, duration: Duration) {
        let mut inner = self.lock();
        *inner.db_queries.entry(operation.to_string()).or_insert(0) += 1;
        inner.db_durations.push(duration);
    }

    pub fn record_error(&self, kind: &str) {
        *self.lock().errors.entry(kind.to_string()).or_insert(0) += 1;
    }

    pub fn connection_opened(&self) {
        let current = self.active_connections.fetch_add(1, Ordering::Relaxed) + 1;
        self.peak_connections.fetch_max(current, Ordering::Relaxed);
    }

    pub fn connection_closed(&self) {
        self.active_connections.fetch_sub(1, Ordering::Relaxed);
    }

    pub fn active_connections(&self) -> u64 {
        self.active_connections.load(Ordering::Relaxed)
    }

    /// Request count for one series, mostly useful in tests.
    pub fn http_count(&self, method: &str, status: u16, route: &str) -> u64 {
        let key = HttpKey {
            method: method.to_string(),
            status_class: status_class(status),
            route: route.to_string(),
        };
        self.lock().http_requests.get(&key).copied().unwrap_or(0)
    }

    pub fn db_query_count(&self, operation: &str) -> u64 {
        self.lock().db_queries.get(operation).copied().unwrap_or(0)
    }

    pub fn error_count(&self, kind: &str) -> u64 {
        self.lock().errors.get(kind).copied().unwrap_or(0)
    }

    pub fn http_histogram(&self) -> HistogramSnapshot {
        self.lock().http_durations.histogram()
    }

    pub fn db_histogram(&self) -> HistogramSnapshot {
        self.lock().db_durations.histogram()
    }

    /// Assemble every family for one scrape. Each sample carries the scrape
    /// time as its timestamp; families without samples are left out.
    pub fn families(&self, runtime: &RuntimeSnapshot) -> Vec<MetricFamily> {
        let timestamp_ms = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_millis() as i64;
        let mut scrape = Scrape::new(timestamp_ms);

        // Process
        if let Some(rss) = runtime.resident_memory_bytes {
            let sample = scrape.gauge(&[], rss as f64);
            scrape.family("process_resident_memory_bytes", "Resident memory size in bytes.", MetricType::GAUGE, vec![sample]);
        }
        let sample = scrape.gauge(&[], runtime.uptime.as_secs() as f64);
        scrape.family("process_uptime_seconds", "Process uptime in seconds.", MetricType::GAUGE, vec![sample]);

        let mut inner = self.lock();

        // HTTP
        let requests = inner
            .http_requests
            .iter()
            .map(|(key, count)| {
                scrape.counter(
                    &[
                        ("method", &key.method),
                        ("status", &key.status_class),
                        ("route", &key.route),
                    ],
                    *count as f64,
                )
            })
            .collect();
        scrape.family("http_requests_total", "Total HTTP requests.", MetricType::COUNTER, requests);

        let http = scrape.histogram(&inner.http_durations.histogram());
        scrape.family("http_request_duration_ms", "HTTP request duration histogram.", MetricType::HISTOGRAM, vec![http]);

        let active = scrape.gauge(&[], self.active_connections.load(Ordering::Relaxed) as f64);
        scrape.family("http_active_connections", "Current active HTTP connections.", MetricType::GAUGE, vec![active]);
        let peak = scrape.gauge(&[], self.peak_connections.load(Ordering::Relaxed) as f64);
        scrape.family("http_active_connections_peak", "Peak active HTTP connections.", MetricType::GAUGE, vec![peak]);

        // DB
        if let Some(pool) = runtime.pool {
            let total = scrape.gauge(&[], pool.total as f64);
            scrape.family("db_pool_total", "Open DB connections.", MetricType::GAUGE, vec![total]);
            let idle = scrape.gauge(&[], pool.free as f64);
            scrape.family("db_pool_idle", "Idle DB connections.", MetricType::GAUGE, vec![idle]);
            let queued = scrape.gauge(&[], pool.queued as f64);
            scrape.family("db_pool_queue", "Queued DB connection requests.", MetricType::GAUGE, vec![queued]);
        }

        let queries = inner
            .db_queries
            .iter()
            .map(|(operation, count)| scrape.counter(&[("operation", operation)], *count as f64))
            .collect();
        scrape.family("db_queries_total", "Total DB operations.", MetricType::COUNTER, queries);

        let db = scrape.histogram(&inner.db_durations.histogram());
        scrape.family("db_query_duration_ms", "DB query duration histogram.", MetricType::HISTOGRAM, vec![db]);

        // Cache
        if let Some(cache) = &runtime.cache {
            let hits = scrape.counter(&[], cache.hits as f64);
            scrape.family("cache_hits_total", "Permission cache hits total.", MetricType::COUNTER, vec![hits]);
            let misses = scrape.counter(&[], cache.misses as f64);
            scrape.family("cache_misses_total", "Permission cache misses total.", MetricType::COUNTER, vec![misses]);
            let rate = scrape.gauge(&[], cache.hit_rate());
            scrape.family("cache_hit_rate", "Permission cache hit rate (0-1).", MetricType::GAUGE, vec![rate]);
            let size = scrape.gauge(&[], cache.entries as f64);
            scrape.family("cache_local_size", "Permission cache entries.", MetricType::GAUGE, vec![size]);
        }

        // Breakers
        let breakers = runtime
            .breakers
            .iter()
            .map(|breaker| scrape.gauge(&[("name", &breaker.name)], breaker.state.as_gauge() as f64))
            .collect();
        scrape.family(
            "circuit_breaker_state",
            "Circuit breaker state (0=closed, 1=half-open, 2=open).",
            MetricType::GAUGE,
            breakers,
        );

        // Errors
        let errors = inner
            .errors
            .iter()
            .map(|(kind, count)| scrape.counter(&[("type", kind)], *count as f64))
            .collect();
        scrape.family("errors_total", "Total errors by type.", MetricType::COUNTER, errors);

        scrape.families
    }

    /// Render the text exposition.
    pub fn render(&self, runtime: &RuntimeSnapshot) -> Result<String, prometheus::Error> {
        let mut buffer = Vec::new();
        TextEncoder::new().encode(&self.families(runtime), &mut buffer)?;
        String::from_utf8(buffer).map_err(|e| prometheus::Error::Msg(e.to_string()))
    }
}

/// Families collected for one scrape, all stamped with the same time.
struct Scrape {
    families: Vec<MetricFamily>,
    timestamp_ms: i64,
}

impl Scrape {
    fn new(timestamp_ms: i64) -> Self {
        Self {
            families: Vec::new(),
            timestamp_ms,
        }
    }

    fn family(&mut self, name: &str, help: &str, kind: MetricType, metrics: Vec<Metric>) {
        if metrics.is_empty() {
            return;
        }
        let mut family = MetricFamily::default();
        family.set_name(name.to_string());
        family.set_help(help.to_string());
        family.set_field_type(kind);
        family.set_metric(metrics.into());
        self.families.push(family);
    }

    fn metric(&self, labels: &[(&str, &str)]) -> Metric {
        let pairs: Vec<LabelPair> = labels
            .iter()
            .map(|(name, value)| {
                let mut pair = LabelPair::default();
                pair.set_name(name.to_string());
                pair.set_value(value.to_string());
                pair
            })
            .collect();

        let mut metric = Metric::default();
        metric.set_label(pairs.into());
        metric.set_timestamp_ms(self.timestamp_ms);
        metric
    }

    fn counter(&self, labels: &[(&str, &str)], value: f64) -> Metric {
        let mut counter = Counter::default();
        counter.set_value(value);
        let mut metric = self.metric(labels);
        metric.set_counter(counter);
        metric
    }

    fn gauge(&self, labels: &[(&str, &str)], value: f64) -> Metric {
        let mut gauge = Gauge::default();
        gauge.set_value(value);
        let mut metric = self.metric(labels);
        metric.set_gauge(gauge);
        metric
    }

    /// `+Inf` is added by the encoder from the sample count.
    fn histogram(&self, snapshot: &HistogramSnapshot) -> Metric {
        let buckets: Vec<Bucket> = DURATION_BUCKETS_MS
            .iter()
            .zip(&snapshot.cumulative)
            .map(|(bound, count)| {
                let mut bucket = Bucket::default();
                bucket.set_upper_bound(*bound);
                bucket.set_cumulative_count(*count);
                bucket
            })
            .collect();

        let mut histogram = Histogram::default();
        histogram.set_sample_count(snapshot.count);
        histogram.set_sample_sum(snapshot.sum);
        histogram.set_bucket(buckets.into());

        let mut metric = self.metric(&[]);
        metric.set_histogram(histogram);
        metric
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn registry() -> MetricsRegistry {
        MetricsRegistry::new(Duration::from_secs(300), 10_000)
    }

    #[test]
    fn test_numeric_segments_collapse() {
        assert_eq!(normalize_route("/api/pedidos/123"), "/api/pedidos/:id");
        assert_eq!(normalize_route("/api/pedidos/456"), "/api/pedidos/:id");
        assert_eq!(
            normalize_route("/api/vendas/pedidos/42/itens/7"),
            "/api/vendas/pedidos/:id/itens/:id"
        );
        // Mixed segments are left alone.
        assert_eq!(normalize_route("/api/v2/relatorios"), "/api/v2/relatorios");
    }

    #[test]
    fn test_uuid_segments_collapse() {
        assert_eq!(
            normalize_route("/api/anexos/3f2b8c1e-9d4a-4e7b-8a6f-1c2d3e4f5a6b"),
            "/api/anexos/:uuid"
        );
        assert_eq!(
            normalize_route("/api/anexos/3F2B8C1E-9D4A-4E7B-8A6F-1C2D3E4F5A6B/download"),
            "/api/anexos/:uuid/download"
        );
    }

    #[test]
    fn test_query_string_stripped() {
        assert_eq!(normalize_route("/api/pedidos?page=2&status=aberto"), "/api/pedidos");
        assert_eq!(normalize_route("/api/pedidos/9?x=1"), "/api/pedidos/:id");
    }

    #[test]
    fn test_template_placeholders() {
        assert_eq!(template_route("/api/pedidos/{id}"), "/api/pedidos/:id");
        assert_eq!(
            template_route("/api/clientes/{cliente_id}/contatos"),
            "/api/clientes/:cliente_id/contatos"
        );
        assert_eq!(template_route("/arquivos/{*path}"), "/arquivos/*path");
        assert_eq!(template_route("/health"), "/health");
    }

    #[test]
    fn test_route_truncated() {
        let long = format!("/{}", "a".repeat(300));
        assert_eq!(normalize_route(&long).len(), 100);
    }

    #[test]
    fn test_http_counter_keys() {
        let metrics = registry();
        metrics.record_http("GET", 200, "/api/pedidos/:id", Duration::from_millis(12));
        metrics.record_http("GET", 204, "/api/pedidos/:id", Duration::from_millis(3));
        metrics.record_http("GET", 404, "/api/pedidos/:id", Duration::from_millis(3));

        assert_eq!(metrics.http_count("GET", 200, "/api/pedidos/:id"), 2);
        assert_eq!(metrics.http_count("GET", 404, "/api/pedidos/:id"), 1);
        assert_eq!(metrics.http_count("POST", 200, "/api/pedidos/:id"), 0);
    }

    #[test]
    fn test_histogram_buckets_cumulative() {
        let metrics = registry();
        for ms in [3, 7, 40, 900, 20_000] {
            metrics.record_db_query("select", Duration::from_millis(ms));
        }

        let hist = metrics.db_histogram();
        assert_eq!(hist.count, 5);
        // le=5, le=10, le=25, le=50 ... le=1000 ... le=10000, +Inf
        assert_eq!(hist.cumulative[0], 1);
        assert_eq!(hist.cumulative[1], 2);
        assert_eq!(hist.cumulative[2], 2);
        assert_eq!(hist.cumulative[3], 3);
        assert_eq!(hist.cumulative[7], 4);
        assert_eq!(hist.cumulative[10], 4);
        assert_eq!(hist.cumulative[11], 5);
        assert!((hist.sum - 20_950.0).abs() < 0.001);
    }

    #[tokio::test(start_paused = true)]
    async fn test_samples_outside_window_ignored() {
        let metrics = registry();
        metrics.record_http("GET", 200, "/a", Duration::from_millis(10));

        tokio::time::advance(Duration::from_secs(301)).await;
        metrics.record_http("GET", 200, "/a", Duration::from_millis(20));

        let hist = metrics.http_histogram();
        assert_eq!(hist.count, 1);
        assert!((hist.sum - 20.0).abs() < 0.001);
        // Counters are not windowed.
        assert_eq!(metrics.http_count("GET", 200, "/a"), 2);
    }

    #[test]
    fn test_sample_cap() {
        let metrics = MetricsRegistry::new(Duration::from_secs(300), 3);
        for _ in 0..10 {
            metrics.record_db_query("select", Duration::from_millis(1));
        }
        assert_eq!(metrics.db_histogram().count, 3);
    }

    #[test]
    fn test_connection_peak() {
        let metrics = registry();
        metrics.connection_opened();
        metrics.connection_opened();
        metrics.connection_closed();
        metrics.connection_opened();
        metrics.connection_closed();

        assert_eq!(metrics.active_connections(), 1);
        let text = metrics.render(&RuntimeSnapshot::default()).unwrap();
        assert!(text.contains("\nhttp_active_connections_peak 2 "));
    }

    #[test]
    fn test_render_format() {
        let metrics = registry();
        metrics.record_http("GET", 200, "/api/pedidos/:id", Duration::from_millis(30));
        metrics.record_http("POST", 503, "/api/pedidos", Duration::from_millis(700));
        metrics.record_db_query("rbac_grants", Duration::from_millis(4));

        let text = metrics
            .render(&RuntimeSnapshot {
                uptime: Duration::from_secs(42),
                ..Default::default()
            })
            .unwrap();

        assert!(text.contains("# HELP http_requests_total Total HTTP requests.\n"));
        assert!(text.contains("# TYPE http_requests_total counter\n"));
        assert!(text.contains("# TYPE http_request_duration_ms histogram\n"));
        assert!(text.contains(
            "http_requests_total{method=\"GET\",status=\"2xx\",route=\"/api/pedidos/:id\"} 1 "
        ));
        assert!(text.contains("http_request_duration_ms_bucket{le=\"50\"} 1 "));
        assert!(text.contains("http_request_duration_ms_bucket{le=\"+Inf\"} 2 "));
        assert!(text.contains("db_queries_total{operation=\"rbac_grants\"} 1 "));
        assert!(text.contains("errors_total{type=\"server_error\"} 1 "));
        assert!(text.contains("process_uptime_seconds 42 "));

        // Every sample line ends with a timestamp.
        for line in text.lines().filter(|l| !l.starts_with('#')) {
            let parts: Vec<_> = line.rsplitn(3, ' ').collect();
            assert_eq!(parts.len(), 3, "line without value and timestamp: {line}");
            assert!(parts[0].parse::<u128>().is_ok(), "bad timestamp: {line}");
        }
    }

    #[test]
    fn test_label_escaping() {
        let metrics = registry();
        metrics.record_http("GET", 200, r#"/a"b\c"#, Duration::from_millis(1));
        let text = metrics.render(&RuntimeSnapshot::default()).unwrap();
        assert!(text.contains(r#"route="/a\"b\\c"} 1 "#));
    }

    #[test]
    fn test_empty_families_omitted() {
        let text = registry().render(&RuntimeSnapshot::default()).unwrap();
        assert!(!text.contains("http_requests_total"));
        assert!(!text.contains("circuit_breaker_state"));
        assert!(text.contains("# TYPE http_request_duration_ms histogram"));
        assert!(text.contains("http_request_duration_ms_count 0 "));
    }

    #[test]
    fn test_runtime_gauges() {
        let text = registry()
            .render(&RuntimeSnapshot {
                pool: Some(PoolStats {
                    total: 10,
                    free: 0,
                    queued: 3,
                    acquiring: 3,
                }),
                breakers: vec![BreakerSnapshot {
                    name: "mysql".to_string(),
                    state: crate::resilience::circuit_breaker::CircuitState::Open,
                    failure_count: 5,
                    success_count: 0,
                    last_failure_ms_ago: Some(10),
                }],
                ..Default::default()
            })
            .unwrap();
        assert!(text.contains("db_pool_total 10 "));
        assert!(text.contains("db_pool_queue 3 "));
        assert!(text.contains("circuit_breaker_state{name=\"mysql\"} 2 "));
    }

    #[test]
    fn test_poisoned_lock_recovered() {
        let metrics = registry();
        let _ = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            let _held = metrics.inner.lock().unwrap();
            panic!("poison the metrics lock");
        }));
        metrics.record_error("db_error");
        assert_eq!(metrics.error_count("db_error"), 1);
    }
}
