//! Streaming ticket query endpoints.
//!
//! `/v1/tickets/stream` and `/v1/tickets-real/stream` share the same
//! handler logic end to end; the only difference is which pool in
//! `Databases` backs the query. The route is the entire tenancy model
//! this service has — there is no per-request tenant resolution.

use actix_web::{web, HttpResponse};

use crate::config::db::Databases;
use crate::error::ServiceResult;
use crate::query::payload::QueryPayload;
use crate::streaming::StreamingEngine;

pub async fn stream_tickets(
    databases: web::Data<Databases>,
    payload: web::Json<QueryPayload>,
) -> ServiceResult<HttpResponse> {
    stream_against(&databases.tickets, payload.into_inner()).await
}

pub async fn stream_tickets_real(
    databases: web::Data<Databases>,
    payload: web::Json<QueryPayload>,
) -> ServiceResult<HttpResponse> {
    stream_against(&databases.tickets_real, payload.into_inner()).await
}

async fn stream_against(
    pool: &crate::config::db::Pool,
    payload: QueryPayload,
) -> ServiceResult<HttpResponse> {
    let outcome = StreamingEngine::stream(pool, payload).await?;

    Ok(HttpResponse::Ok()
        .content_type("application/json")
        .insert_header(("X-Total-Count", outcome.total_count.to_string()))
        .streaming(outcome.body))
}
