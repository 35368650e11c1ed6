//! Wire-level response envelopes shared by the handler adapter.

pub mod response;
