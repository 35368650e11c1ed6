//! Liveness/readiness probe.

use actix_web::{get, web, HttpResponse, Responder};
use log::warn;
use serde_json::json;

use crate::config::db::Databases;

/// Runs `SELECT 1` against both pools and reports `ok` only if both
/// succeed. A degraded database still returns `200` with `"status":
/// "degraded"` — the probe is meant for operators, not for taking the
/// whole service out of rotation over one pool hiccup.
#[get("/health")]
pub async fn health(databases: web::Data<Databases>) -> impl Responder {
    let tickets_ok = probe(&databases.tickets, "tickets").await;
    let tickets_real_ok = probe(&databases.tickets_real, "tickets_real").await;

    let status = if tickets_ok && tickets_real_ok {
        "ok"
    } else {
        "degraded"
    };

    HttpResponse::Ok().json(json!({
        "status": status,
        "databases": {
            "tickets": tickets_ok,
            "ticketsReal": tickets_real_ok,
        },
    }))
}

async fn probe(pool: &crate::config::db::Pool, label: &str) -> bool {
    let Ok(client) = pool.get().await else {
        warn!("health probe: failed to acquire {label} connection");
        return false;
    };
    match client.query_one("SELECT 1", &[]).await {
        Ok(_) => true,
        Err(e) => {
            warn!("health probe: {label} query failed: {e}");
            false
        }
    }
}
