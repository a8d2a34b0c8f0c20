use actix_web::HttpResponse;
use once_cell::sync::Lazy;
use prometheus::{Encoder, IntCounter, IntCounterVec, Opts, TextEncoder};

static DELIVERIES_TOTAL: Lazy<IntCounterVec> = Lazy::new(|| {
    let counter = IntCounterVec::new(
        Opts::new(
            "messages_service_deliveries_total",
            "Broker deliveries processed by messages-service",
        ),
        &["queue", "outcome"],
    )
    .expect("failed to create messages_service_deliveries_total");
    prometheus::default_registry()
        .register(Box::new(counter.clone()))
        .expect("failed to register messages_service_deliveries_total");
    counter
});

static DEAD_LETTERS_TOTAL: Lazy<IntCounterVec> = Lazy::new(|| {
    let counter = IntCounterVec::new(
        Opts::new(
            "messages_service_dead_letters_total",
            "Deliveries routed to the dead-letter destination",
        ),
        &["queue", "reason"],
    )
    .expect("failed to create messages_service_dead_letters_total");
    prometheus::default_registry()
        .register(Box::new(counter.clone()))
        .expect("failed to register messages_service_dead_letters_total");
    counter
});

static VERSION_CONFLICTS_TOTAL: Lazy<IntCounter> = Lazy::new(|| {
    let counter = IntCounter::new(
        "messages_service_version_conflicts_total",
        "Versioned message updates rejected because the stored version moved",
    )
    .expect("failed to create messages_service_version_conflicts_total");
    prometheus::default_registry()
        .register(Box::new(counter.clone()))
        .expect("failed to register messages_service_version_conflicts_total");
    counter
});

static CACHE_LOOKUPS_TOTAL: Lazy<IntCounterVec> = Lazy::new(|| {
    let counter = IntCounterVec::new(
        Opts::new(
            "messages_service_cache_lookups_total",
            "Conversation page cache lookups by result",
        ),
        &["result"],
    )
    .expect("failed to create messages_service_cache_lookups_total");
    prometheus::default_registry()
        .register(Box::new(counter.clone()))
        .expect("failed to register messages_service_cache_lookups_total");
    counter
});

pub fn record_delivery(queue: &str, outcome: &str) {
    DELIVERIES_TOTAL.with_label_values(&[queue, outcome]).inc();
}

pub fn record_dead_letter(queue: &str, reason: &str) {
    DEAD_LETTERS_TOTAL.with_label_values(&[queue, reason]).inc();
}

pub fn record_version_conflict() {
    VERSION_CONFLICTS_TOTAL.inc();
}

/// `result` is one of `hit`, `miss` or `error`
pub fn record_cache_lookup(result: &str) {
    CACHE_LOOKUPS_TOTAL.with_label_values(&[result]).inc();
}

pub async fn metrics_handler() -> HttpResponse {
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
