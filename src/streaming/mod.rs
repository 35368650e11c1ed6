//! The streaming query engine: validates a request, builds SQL,
//! drives the driver cursor, and serializes the formula-mapped rows
//! back to the client as a single chunked JSON array.

pub mod buffer_pool;
pub mod engine;

pub use engine::{StreamingEngine, StreamOutcome};
