//! Database pool configuration.
//!
//! The streaming engine needs an async, natively-cursoring driver (see
//! `streaming::engine`), so the pool here is `tokio-postgres` behind
//! `deadpool-postgres` rather than the Diesel/r2d2 pairing used
//! elsewhere in this crate's lineage — Diesel's statically-typed query
//! DSL cannot express a SELECT list assembled at request time. Two
//! independent pools back the two stream routes (`tickets`,
//! `tickets-real`); neither is multi-tenant, each is just one more
//! Postgres database.

use std::time::Duration;

use deadpool_postgres::{Config, ManagerConfig, Pool as DeadpoolPool, RecyclingMethod, Runtime};
use log::info;
use tokio_postgres::NoTls;

pub type Pool = DeadpoolPool;

#[derive(Debug, thiserror::Error)]
pub enum PoolError {
    #[error("failed to build connection pool: {0}")]
    Build(#[from] deadpool_postgres::CreatePoolError),
}

/// Builds a connection pool from a `postgres://` URL.
///
/// `pool_size` caps the number of live connections; the reference
/// deployment runs on a single CPU, so the default is small (see
/// `DEFAULT_POOL_SIZE`).
pub fn init_pool(database_url: &str, pool_size: usize) -> Result<Pool, PoolError> {
    info!("configuring database pool (max_size={pool_size})");

    let mut cfg = Config::new();
    cfg.url = Some(database_url.to_string());
    cfg.manager = Some(ManagerConfig {
        recycling_method: RecyclingMethod::Fast,
    });
    cfg.pool = Some(deadpool_postgres::PoolConfig {
        max_size: pool_size,
        timeouts: deadpool_postgres::Timeouts {
            wait: Some(Duration::from_secs(5)),
            create: Some(Duration::from_secs(10)),
            recycle: Some(Duration::from_secs(10)),
        },
        queue_mode: deadpool_postgres::QueueMode::Fifo,
    });

    let pool = cfg.create_pool(Some(Runtime::Tokio1), NoTls)?;
    Ok(pool)
}

/// Default connection cap, chosen to stay well within the reference
/// deployment's one-CPU/128MiB footprint: each request holds at most
/// one connection at a time (COUNT then SELECT, sequentially).
pub const DEFAULT_POOL_SIZE: usize = 8;

/// The pair of pools the two stream routes are bound to.
#[derive(Clone)]
pub struct Databases {
    pub tickets: Pool,
    pub tickets_real: Pool,
}

impl Databases {
    pub fn new(tickets: Pool, tickets_real: Pool) -> Self {
        Self {
            tickets,
            tickets_real,
        }
    }
}
