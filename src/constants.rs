//! Compile-time allow-lists enforced by the validator and query builder.
//!
//! Every list here is consulted before a byte of user input reaches SQL
//! text. Keep them in one place so a security review only has one file
//! to read.

use std::collections::HashSet;

use once_cell::sync::Lazy;

/// Tables the streaming endpoint is permitted to read.
pub static ALLOWED_TABLES: Lazy<HashSet<&'static str>> =
    Lazy::new(|| ["tickets"].into_iter().collect());

/// `WhereClause.operator` values accepted on the wire (case-insensitive).
pub static ALLOWED_WHERE_OPERATORS: Lazy<HashSet<&'static str>> = Lazy::new(|| {
    [
        "=", "!=", ">", ">=", "<", "<=", "LIKE", "NOT LIKE", "IN", "NOT IN",
    ]
    .into_iter()
    .collect()
});

/// `orderBy` direction values (case-insensitive).
pub static ALLOWED_ORDER_DIRECTIONS: Lazy<HashSet<&'static str>> =
    Lazy::new(|| ["ASC", "DESC"].into_iter().collect());

/// Reserved words that may not appear as a standalone token inside an
/// identifier-safe column/table name (case-insensitive).
pub static RESERVED_IDENTIFIER_WORDS: Lazy<HashSet<&'static str>> = Lazy::new(|| {
    [
        "exec", "execute", "drop", "alter", "insert", "update", "delete", "union", "select",
        "from", "where",
    ]
    .into_iter()
    .collect()
});

/// SQL function names that make a formula `param` "expression-like" rather
/// than a plain column reference, per §6 of the specification. Matched
/// case-insensitively against the substring `"<NAME>("`.
pub const ALLOWED_SQL_FUNCTIONS: &[&str] = &[
    "COALESCE",
    "CONCAT",
    "UPPER",
    "LOWER",
    "TRIM",
    "SUBSTR",
    "SUBSTRING",
    "LENGTH",
    "ABS",
    "ROUND",
    "FLOOR",
    "CEIL",
    "SEC_TO_TIME",
    "TIME_TO_SEC",
    "DATE",
    "TIME",
    "DATETIME",
    "STRFTIME",
    "IFNULL",
    "NULLIF",
    "CAST",
    "CASE",
];

/// Arithmetic operator characters that also mark a param as expression-like.
pub const ARITHMETIC_OPERATOR_CHARS: &[char] = &['+', '-', '*', '/'];

/// Batch size cap used by the streaming engine's cursor reader.
pub const MAX_BATCH_SIZE: usize = 100;

/// Flush threshold for the producer's accumulation buffer, in bytes.
pub const CHUNK_FLUSH_THRESHOLD: usize = 32 * 1024;

/// Initial capacity of a pooled output buffer, in bytes.
pub const BUFFER_POOL_INITIAL_CAPACITY: usize = 50 * 1024;

/// Capacity of the row-batch channel between the cursor reader and the
/// mapping producer.
pub const ROW_BATCH_CHANNEL_CAPACITY: usize = 2;

/// Capacity of the outbound chunk channel between the producer and the
/// HTTP writer.
pub const CHUNK_CHANNEL_CAPACITY: usize = 4;

/// Default prefix used by the `additionalData` operator.
pub const DEFAULT_ADDITIONAL_DATA_PREFIX: &str = "additional";

/// Default output format used by the `ticketDate` operator.
pub const DEFAULT_TICKET_DATE_FORMAT: &str = "%Y-%m-%dT%H:%M:%S%:z";

/// Default output layout used by the `formatDate` operator.
pub const DEFAULT_FORMAT_DATE_LAYOUT: &str = "%Y-%m-%d";
