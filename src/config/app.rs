use actix_web::error::JsonPayloadError;
use actix_web::{web, HttpRequest, ResponseError};
use log::info;
use std::sync::Once;

use crate::api::*;
use crate::error::ServiceError;

static LOG_ONCE: Once = Once::new();

/// Registers the streaming endpoints and the health probe.
///
/// Route configuration is logged once at startup so operators can see
/// the live route table without cross-referencing source.
pub fn config_services(cfg: &mut web::ServiceConfig) {
    LOG_ONCE.call_once(|| {
        info!("Route Configuration:");
        info!("  - GET  /health                  -> health_controller::health");
        info!("  - POST /v1/tickets/stream        -> ticket_stream_controller::stream_tickets");
        info!("  - POST /v1/tickets-real/stream    -> ticket_stream_controller::stream_tickets_real");
    });

    cfg.app_data(json_config());

    cfg.service(health_controller::health);

    cfg.service(
        web::resource("/v1/tickets/stream")
            .route(web::post().to(ticket_stream_controller::stream_tickets)),
    );
    cfg.service(
        web::resource("/v1/tickets-real/stream")
            .route(web::post().to(ticket_stream_controller::stream_tickets_real)),
    );
}

/// Routes a malformed request body through the same `ServiceError`
/// envelope every other failure uses, instead of actix-web's default
/// plain-text JSON extractor rejection.
fn json_config() -> web::JsonConfig {
    web::JsonConfig::default().error_handler(json_error_handler)
}

fn json_error_handler(err: JsonPayloadError, _req: &HttpRequest) -> actix_web::Error {
    let service_err =
        ServiceError::bad_request("malformed request body").with_detail(err.to_string());
    let response = service_err.error_response();
    actix_web::error::InternalError::from_response(err, response).into()
}
