//! Query construction and row transformation.
//!
//! `payload` is the wire shape, `validator` rejects malformed or unsafe
//! requests before any SQL is built, `builder` turns a validated
//! payload into parameterized SQL, `operators` and `row_mapper` apply
//! the per-row formula pipeline, and `crypto` backs the `decrypt`
//! operator family.

pub mod builder;
pub mod crypto;
pub mod operators;
pub mod payload;
pub mod row_mapper;
pub mod validator;
pub mod value;

pub use payload::{Formula, NormalizedFormula, QueryPayload, WhereClause};
pub use value::DynValue;
