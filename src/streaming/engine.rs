//! Drives one streaming request end to end: validate, build SQL, run
//! the cursor, map and serialize rows, and hand a chunked body back to
//! the handler.
//!
//! A producer task owns the slow I/O (the driver cursor) and feeds a
//! bounded `mpsc` channel whose receiving end becomes a
//! `ReceiverStream` body, the same shape an SSE log tailer would use
//! for a long-lived response. That shape is split here into two
//! cooperating tasks — a cursor reader and a row mapper/serializer —
//! connected by a second bounded channel, so a stalled HTTP write
//! backs all the way up to pausing cursor reads.

use std::pin::Pin;
use std::task::{Context, Poll};

use bytes::Bytes;
use futures::{Stream, StreamExt};
use log::{error, warn};
use tokio::sync::mpsc;
use tokio_postgres::Row;
use tokio_stream::wrappers::ReceiverStream;

use crate::config::db::Pool;
use crate::constants::{
    CHUNK_CHANNEL_CAPACITY, CHUNK_FLUSH_THRESHOLD, MAX_BATCH_SIZE, ROW_BATCH_CHANNEL_CAPACITY,
};
use crate::error::ServiceError;
use crate::query::builder;
use crate::query::payload::{normalize_formulas, NormalizedFormula, QueryPayload};
use crate::query::row_mapper;
use crate::query::value::DynValue;
use crate::query::validator;
use crate::streaming::buffer_pool::BUFFER_POOL;

pub struct StreamOutcome {
    pub total_count: i64,
    pub body: PooledChunkStream,
}

/// Wraps the producer's `ReceiverStream` so the HTTP-writer side
/// actually returns buffers to [`BUFFER_POOL`]. A chunk handed out by
/// one `poll_next` is reclaimed at the start of the next: `Bytes`
/// holds the allocation open until both the stream's own clone and
/// whatever actix did with the previous item are dropped, so
/// `try_into_mut` only succeeds once actix is done with it — at that
/// point it converts back into the original `BytesMut` with no copy
/// and goes back on the free list.
pub struct PooledChunkStream {
    inner: ReceiverStream<Result<Bytes, std::io::Error>>,
    pending_release: Option<Bytes>,
}

impl PooledChunkStream {
    fn new(rx: mpsc::Receiver<Result<Bytes, std::io::Error>>) -> Self {
        Self {
            inner: ReceiverStream::new(rx),
            pending_release: None,
        }
    }
}

impl Stream for PooledChunkStream {
    type Item = Result<Bytes, std::io::Error>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        if let Some(chunk) = self.pending_release.take() {
            if let Ok(buf) = chunk.try_into_mut() {
                BUFFER_POOL.release(buf);
            }
        }

        let poll = Pin::new(&mut self.inner).poll_next(cx);
        if let Poll::Ready(Some(Ok(ref bytes))) = poll {
            self.pending_release = Some(bytes.clone());
        }
        poll
    }
}

pub struct StreamingEngine;

impl StreamingEngine {
    /// Runs the full §4.5 sequence and returns the row count (or `-1`
    /// when `isDisableCount` is set) plus a chunked body stream. The
    /// caller need not poll the body for the pipeline to start; both
    /// background tasks are already running when this returns.
    pub async fn stream(pool: &Pool, payload: QueryPayload) -> Result<StreamOutcome, ServiceError> {
        validator::validate(&payload)?;

        let normalized = normalize_formulas(&payload.formulas);
        let columns = builder::select_columns(&normalized);

        let client = pool.get().await.map_err(|e| {
            ServiceError::internal_server_error("failed to acquire database connection")
                .with_detail(e.to_string())
        })?;

        let total_count = if payload.is_disable_count {
            -1
        } else {
            let count_query = builder::build_count(&payload);
            let params = as_sql_params(&count_query.args);
            let row = client
                .query_one(&count_query.sql, &params)
                .await
                .map_err(|e| {
                    ServiceError::internal_server_error("count query failed")
                        .with_detail(e.to_string())
                })?;
            row.try_get::<_, i64>(0).unwrap_or(0)
        };

        let select_query = builder::build_select(&payload, &columns);
        let batch_size = payload
            .limit
            .filter(|&l| l > 0)
            .map(|l| (l as usize).min(MAX_BATCH_SIZE))
            .unwrap_or(MAX_BATCH_SIZE);

        let row_stream = client
            .query_raw(&select_query.sql, select_query.args.iter())
            .await
            .map_err(|e| {
                ServiceError::internal_server_error("select query failed")
                    .with_detail(e.to_string())
            })?;

        let (row_batch_tx, row_batch_rx) =
            mpsc::channel::<Result<Vec<Row>, tokio_postgres::Error>>(ROW_BATCH_CHANNEL_CAPACITY);
        let (chunk_tx, chunk_rx) = mpsc::channel::<Result<Bytes, std::io::Error>>(
            CHUNK_CHANNEL_CAPACITY,
        );

        tokio::spawn(run_cursor_reader(client, row_stream, batch_size, row_batch_tx));
        tokio::spawn(run_producer(
            row_batch_rx,
            normalized,
            payload.is_format_date,
            chunk_tx,
        ));

        Ok(StreamOutcome {
            total_count,
            body: PooledChunkStream::new(chunk_rx),
        })
    }
}

fn as_sql_params(args: &[DynValue]) -> Vec<&(dyn tokio_postgres::types::ToSql + Sync)> {
    args.iter()
        .map(|v| v as &(dyn tokio_postgres::types::ToSql + Sync))
        .collect()
}

/// Owns the live connection and the driver cursor. Batches rows up to
/// `batch_size` and forwards them; a send failure means the producer
/// has abandoned the request (client disconnect or a downstream
/// error), so the cursor is dropped without draining further — this is
/// what makes cancellation close the connection deterministically.
async fn run_cursor_reader(
    _client: deadpool_postgres::Object,
    mut row_stream: tokio_postgres::RowStream,
    batch_size: usize,
    row_batch_tx: mpsc::Sender<Result<Vec<Row>, tokio_postgres::Error>>,
) {
    let mut batch = Vec::with_capacity(batch_size);
    loop {
        match row_stream.next().await {
            Some(Ok(row)) => {
                batch.push(row);
                if batch.len() >= batch_size {
                    let to_send = std::mem::replace(&mut batch, Vec::with_capacity(batch_size));
                    if row_batch_tx.send(Ok(to_send)).await.is_err() {
                        return;
                    }
                }
            }
            Some(Err(e)) => {
                let _ = row_batch_tx.send(Err(e)).await;
                return;
            }
            None => {
                if !batch.is_empty() {
                    let _ = row_batch_tx.send(Ok(batch)).await;
                }
                return;
            }
        }
    }
}

/// Maps and serializes each row batch, accumulating JSON text into a
/// pooled buffer. Once the buffer exceeds `CHUNK_FLUSH_THRESHOLD`, it
/// is handed to the chunk channel and a fresh buffer is acquired. On
/// driver error or a fatal per-row mapping error, the body is
/// truncated rather than closed with `]` — per the error-handling
/// policy, nothing downstream of the first byte can still produce a
/// clean envelope.
async fn run_producer(
    mut row_batch_rx: mpsc::Receiver<Result<Vec<Row>, tokio_postgres::Error>>,
    formulas: Vec<NormalizedFormula>,
    is_format_date: bool,
    chunk_tx: mpsc::Sender<Result<Bytes, std::io::Error>>,
) {
    let mut buffer = BUFFER_POOL.acquire();
    buffer.extend_from_slice(b"[");
    let mut is_first_record = true;

    while let Some(batch_result) = row_batch_rx.recv().await {
        let batch = match batch_result {
            Ok(batch) => batch,
            Err(e) => {
                error!("cursor read failed mid-stream: {e}");
                BUFFER_POOL.release(buffer);
                return;
            }
        };

        for row in &batch {
            let (column_order, scanned) = match row_mapper::scan_row(row) {
                Ok(scanned) => scanned,
                Err(e) => {
                    error!("row scan failed mid-stream: {e}");
                    BUFFER_POOL.release(buffer);
                    return;
                }
            };
            let record =
                match row_mapper::map_row(&column_order, &scanned, &formulas, is_format_date) {
                    Ok(record) => record,
                    Err(e) => {
                        error!(
                            "row mapping failed mid-stream: {}",
                            e.context().detail.clone().unwrap_or_default()
                        );
                        BUFFER_POOL.release(buffer);
                        return;
                    }
                };

            if !is_first_record {
                buffer.extend_from_slice(b",");
            }
            is_first_record = false;

            match serialize_record(record) {
                Ok(text) => buffer.extend_from_slice(text.as_bytes()),
                Err(e) => {
                    error!("row serialization failed mid-stream: {e}");
                    BUFFER_POOL.release(buffer);
                    return;
                }
            }
        }

        if buffer.len() > CHUNK_FLUSH_THRESHOLD {
            let to_send = std::mem::replace(&mut buffer, BUFFER_POOL.acquire());
            if chunk_tx.send(Ok(to_send.freeze())).await.is_err() {
                warn!("chunk receiver dropped; abandoning stream");
                return;
            }
        }
    }

    buffer.extend_from_slice(b"]");
    let _ = chunk_tx.send(Ok(buffer.freeze())).await;
}

fn serialize_record(record: crate::query::payload::OutputRecord) -> Result<String, serde_json::Error> {
    let mut map = serde_json::Map::with_capacity(record.len());
    for (key, value) in record {
        map.insert(key, value.into_json());
    }
    serde_json::to_string(&serde_json::Value::Object(map))
}
