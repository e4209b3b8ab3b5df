//! Prometheus collectors of the delivery hub, registered in the default registry.

use std::rc::Rc;
use std::time::{Duration, Instant};

use actix_web::{
    dev::{forward_ready, Service, ServiceRequest, ServiceResponse, Transform},
    Error, HttpResponse,
};
use futures::future::{ready, LocalBoxFuture, Ready};
use once_cell::sync::Lazy;
use prometheus::{
    Encoder, Histogram, HistogramOpts, HistogramVec, IntCounter, IntCounterVec, IntGauge, Opts,
    TextEncoder,
};

static HTTP_REQUESTS_TOTAL: Lazy<IntCounterVec> = Lazy::new(|| {
    let counter = IntCounterVec::new(
        Opts::new(
            "delivery_hub_http_requests_total",
            "Total HTTP requests handled by delivery-hub",
        ),
        &["method", "route", "status"],
    )
    .expect("failed to create delivery_hub_http_requests_total");
    prometheus::default_registry()
        .register(Box::new(counter.clone()))
        .expect("failed to register delivery_hub_http_requests_total");
    counter
});

static HTTP_REQUEST_DURATION_SECONDS: Lazy<HistogramVec> = Lazy::new(|| {
    let histogram = HistogramVec::new(
        HistogramOpts::new(
            "delivery_hub_http_request_duration_seconds",
            "HTTP request latency for delivery-hub",
        )
        .buckets(vec![0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5]),
        &["method", "route", "status"],
    )
    .expect("failed to create delivery_hub_http_request_duration_seconds");
    prometheus::default_registry()
        .register(Box::new(histogram.clone()))
        .expect("failed to register delivery_hub_http_request_duration_seconds");
    histogram
});

static LIVE_CONNECTIONS: Lazy<IntGauge> = Lazy::new(|| {
    let gauge = IntGauge::new(
        "delivery_hub_live_connections",
        "Websocket connections currently in the registry",
    )
    .expect("failed to create delivery_hub_live_connections");
    prometheus::default_registry()
        .register(Box::new(gauge.clone()))
        .expect("failed to register delivery_hub_live_connections");
    gauge
});

static DELIVERIES_TOTAL: Lazy<IntCounterVec> = Lazy::new(|| {
    let counter = IntCounterVec::new(
        Opts::new(
            "delivery_hub_deliveries_total",
            "Routed events by kind and outcome",
        ),
        &["kind", "outcome"],
    )
    .expect("failed to create delivery_hub_deliveries_total");
    prometheus::default_registry()
        .register(Box::new(counter.clone()))
        .expect("failed to register delivery_hub_deliveries_total");
    counter
});

static RECONCILE_PUSHES_TOTAL: Lazy<IntCounterVec> = Lazy::new(|| {
    let counter = IntCounterVec::new(
        Opts::new(
            "delivery_hub_reconcile_pushes_total",
            "Messages re-pushed by the reconciler",
        ),
        &["result"],
    )
    .expect("failed to create delivery_hub_reconcile_pushes_total");
    prometheus::default_registry()
        .register(Box::new(counter.clone()))
        .expect("failed to register delivery_hub_reconcile_pushes_total");
    counter
});

static RECONCILE_PASSES_TOTAL: Lazy<IntCounter> = Lazy::new(|| {
    let counter = IntCounter::new(
        "delivery_hub_reconcile_passes_total",
        "Completed reconciliation passes",
    )
    .expect("failed to create delivery_hub_reconcile_passes_total");
    prometheus::default_registry()
        .register(Box::new(counter.clone()))
        .expect("failed to register delivery_hub_reconcile_passes_total");
    counter
});

static RECONCILE_PASS_DURATION_SECONDS: Lazy<Histogram> = Lazy::new(|| {
    let histogram = Histogram::with_opts(
        HistogramOpts::new(
            "delivery_hub_reconcile_pass_duration_seconds",
            "Duration of one reconciliation pass",
        )
        .buckets(vec![0.005, 0.01, 0.05, 0.1, 0.5, 1.0, 2.5, 5.0, 10.0]),
    )
    .expect("failed to create delivery_hub_reconcile_pass_duration_seconds");
    prometheus::default_registry()
        .register(Box::new(histogram.clone()))
        .expect("failed to register delivery_hub_reconcile_pass_duration_seconds");
    histogram
});

pub fn set_live_connections(count: usize) {
    LIVE_CONNECTIONS.set(count as i64);
}

/// `kind` is `message` or `notification`; `outcome` is one of
/// `delivered`, `offline`, `failed`, `persistence_failure`.
pub fn record_delivery(kind: &str, outcome: &str) {
    DELIVERIES_TOTAL.with_label_values(&[kind, outcome]).inc();
}

pub fn observe_reconcile_pass(elapsed: Duration, pushed: usize, failed: usize) {
    RECONCILE_PASSES_TOTAL.inc();
    RECONCILE_PASS_DURATION_SECONDS.observe(elapsed.as_secs_f64());
    RECONCILE_PUSHES_TOTAL
        .with_label_values(&["ok"])
        .inc_by(pushed as u64);
    RECONCILE_PUSHES_TOTAL
        .with_label_values(&["failed"])
        .inc_by(failed as u64);
}

fn observe_http_request(method: &str, route: &str, status: u16, elapsed: Duration) {
    let status_label = status.to_string();
    HTTP_REQUESTS_TOTAL
        .with_label_values(&[method, route, &status_label])
        .inc();
    HTTP_REQUEST_DURATION_SECONDS
        .with_label_values(&[method, route, &status_label])
        .observe(elapsed.as_secs_f64());
}

pub async fn serve_metrics() -> HttpResponse {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();

    let mut buffer = Vec::new();
    if let Err(err) = encoder.encode(&metric_families, &mut buffer) {
        return HttpResponse::InternalServerError().body(err.to_string());
    }

    HttpResponse::Ok()
        .content_type(encoder.format_type())
        .body(buffer)
}

/// Paths kept out of the HTTP collectors: scrapes and health checks.
const UNTRACKED_PATHS: &[&str] = &["/metrics", "/health"];

/// Label for a request's route: its pattern (`/api/v1/ws/status/{username}`),
/// never the raw path, so per-user URLs do not grow the label set.
fn route_label(pattern: Option<String>) -> String {
    pattern.unwrap_or_else(|| "unmatched".to_string())
}

/// Records count and latency of every routed HTTP request.
///
/// Handler errors are labelled with the status their `ResponseError` maps to.
pub struct HttpMetrics;

impl<S, B> Transform<S, ServiceRequest> for HttpMetrics
where
    S: Service<ServiceRequest, Response = ServiceResponse<B>, Error = Error> + 'static,
    S::Future: 'static,
    B: 'static,
{
    type Response = ServiceResponse<B>;
    type Error = Error;
    type InitError = ();
    type Transform = HttpMetricsService<S>;
    type Future = Ready<Result<Self::Transform, Self::InitError>>;

    fn new_transform(&self, service: S) -> Self::Future {
        ready(Ok(HttpMetricsService {
            service: Rc::new(service),
        }))
    }
}

pub struct HttpMetricsService<S> {
    service: Rc<S>,
}

impl<S, B> Service<ServiceRequest> for HttpMetricsService<S>
where
    S: Service<ServiceRequest, Response = ServiceResponse<B>, Error = Error> + 'static,
    S::Future: 'static,
    B: 'static,
{
    type Response = ServiceResponse<B>;
    type Error = Error;
    type Future = LocalBoxFuture<'static, Result<Self::Response, Self::Error>>;

    forward_ready!(service);

    fn call(&self, req: ServiceRequest) -> Self::Future {
        let service = self.service.clone();
        if UNTRACKED_PATHS.contains(&req.path()) {
            return Box::pin(service.call(req));
        }

        let route = route_label(req.match_pattern());
        let method = req.method().to_string();
        let start = Instant::now();

        Box::pin(async move {
            let result = service.call(req).await;
            let status = match &result {
                Ok(response) => response.status(),
                Err(e) => e.as_response_error().status_code(),
            };
            observe_http_request(&method, &route, status.as_u16(), start.elapsed());
            result
        })
    }
}
