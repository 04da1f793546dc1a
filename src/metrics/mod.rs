use std::sync::Once;

use autometrics::prometheus_exporter::{self};
use lazy_static::lazy_static;
use prometheus::exponential_buckets;
use prometheus::HistogramOpts;
use prometheus::HistogramVec;
use prometheus::IntCounter;
use prometheus::IntCounterVec;
use prometheus::IntGauge;
use prometheus::Opts;
use prometheus::Registry;
use tokio::sync::watch;
use tracing::error;
use tracing::info;
use warp::Filter;
use warp::Rejection;
use warp::Reply;


lazy_static! {
    pub static ref CONFIG_FETCH_TOTAL: IntCounterVec = IntCounterVec::new(
        Opts::new("config_fetch_total", "Config fetch attempts by namespace and outcome"),
        &["namespace", "outcome"]
    )
    .expect("metric can not be created");

    pub static ref CONFIG_FETCH_DURATION_MS: HistogramVec = HistogramVec::new(
        HistogramOpts::new("config_fetch_duration_ms", "Histogram of config fetch latency in ms")
            .buckets(exponential_buckets(1.0, 2.0, 14).expect("valid buckets")),
        &["namespace"]
    )
    .expect("metric can not be created");

    pub static ref CONFIG_CHANGE_EVENTS: IntCounterVec = IntCounterVec::new(
        Opts::new("config_change_events", "Non-empty change events delivered to listeners"),
        &["namespace"]
    )
    .expect("metric can not be created");

    pub static ref LONG_POLL_TOTAL: IntCounterVec = IntCounterVec::new(
        Opts::new("long_poll_total", "Client long-poll round trips by outcome"),
        &["outcome"]
    )
    .expect("metric can not be created");

    pub static ref NOTIFICATION_HOLDS_RESOLVED: IntCounterVec = IntCounterVec::new(
        Opts::new("notification_holds_resolved", "Server long-poll holds resolved, by cause"),
        &["cause"]
    )
    .expect("metric can not be created");

    pub static ref ACTIVE_HOLDS: IntGauge =
        IntGauge::new("notification_holds_active", "Long-poll holds currently parked")
            .expect("metric can not be created");

    pub static ref RELEASE_PUBLISHED: IntCounterVec = IntCounterVec::new(
        Opts::new("release_published", "Release messages persisted, by topic"),
        &["topic"]
    )
    .expect("metric can not be created");

    pub static ref RELEASE_MESSAGES_CLEANED: IntCounterVec = IntCounterVec::new(
        Opts::new("release_messages_cleaned", "Superseded release messages deleted, by topic"),
        &["topic"]
    )
    .expect("metric can not be created");

    pub static ref CLEANUP_QUEUE_DROPPED: IntCounter = IntCounter::new(
        "cleanup_queue_dropped",
        "Cleanup requests dropped because the queue was full"
    )
    .expect("metric can not be created");

    pub static ref CLEANUP_FAILURES: IntCounter = IntCounter::new(
        "cleanup_failures",
        "Cleanup passes that failed and were skipped"
    )
    .expect("metric can not be created");

    pub static ref REGISTRY: Registry = Registry::new();
}

static REGISTER: Once = Once::new();

pub fn register_custom_metrics() {
    REGISTER.call_once(|| {
        let collectors: Vec<Box<dyn prometheus::core::Collector>> = vec![
            Box::new(CONFIG_FETCH_TOTAL.clone()),
            Box::new(CONFIG_FETCH_DURATION_MS.clone()),
            Box::new(CONFIG_CHANGE_EVENTS.clone()),
            Box::new(LONG_POLL_TOTAL.clone()),
            Box::new(NOTIFICATION_HOLDS_RESOLVED.clone()),
            Box::new(ACTIVE_HOLDS.clone()),
            Box::new(RELEASE_PUBLISHED.clone()),
            Box::new(RELEASE_MESSAGES_CLEANED.clone()),
            Box::new(CLEANUP_QUEUE_DROPPED.clone()),
            Box::new(CLEANUP_FAILURES.clone()),
        ];
        for c in collectors {
            if let Err(e) = REGISTRY.register(c) {
                error!("collector can not be registered: {}", e);
            }
        }
    });
}

pub(crate) fn metrics_route() -> impl Filter<Extract = (impl Reply,), Error = Rejection> + Clone {
    warp::path!("metrics").and(warp::get()).and_then(metrics_handler)
}

pub async fn start_server(
    port: u16,
    mut shutdown_signal: watch::Receiver<()>,
) {
    register_custom_metrics();
    info!("metrics server listening on port {}", port);

    let (_, server) =
        warp::serve(metrics_route()).bind_with_graceful_shutdown(([0, 0, 0, 0], port), async move {
            let _ = shutdown_signal.changed().await;
        });
    server.await;
}

async fn metrics_handler() -> Result<impl Reply, Rejection> {
    Ok(render_metrics())
}

/// Custom registry, default registry and autometrics output concatenated.
pub fn render_metrics() -> String {
    let encoder = prometheus::TextEncoder::new();

    let mut res = encode(&encoder, &REGISTRY.gather());
    res.push_str(&encode(&encoder, &prometheus::gather()));
    res.push_str(&get_metrics_body());
    res
}

fn encode(
    encoder: &prometheus::TextEncoder,
    families: &[prometheus::proto::MetricFamily],
) -> String {
    use prometheus::Encoder;

    let mut buffer = Vec::new();
    if let Err(e) = encoder.encode(families, &mut buffer) {
        error!("could not encode metrics: {}", e);
        return String::default();
    }
    String::from_utf8(buffer).unwrap_or_else(|e| {
        error!("metrics could not be from_utf8'd: {}", e);
        String::default()
    })
}

/// Export metrics for Prometheus to scrape
pub fn get_metrics_body() -> String {
    let autometrics_response = prometheus_exporter::encode_http_response();
    autometrics_response.into_body()
}
