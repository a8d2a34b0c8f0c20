pub mod messages;

use crate::metrics;
use actix_web::web;

/// Registers every HTTP route served by messages-service
pub fn configure(cfg: &mut web::ServiceConfig) {
    cfg.service(messages::get_messages)
        .route("/health", web::get().to(|| async { "OK" }))
        .route("/metrics", web::get().to(metrics::metrics_handler));
}
