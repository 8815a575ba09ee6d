//! Transport layer for the Cascade SDK.

pub mod http;

pub use http::{HttpTransport, Idempotency};
