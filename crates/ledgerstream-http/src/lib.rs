//! ledgerstream-http — request/response channel over HTTP.
//!
//! Each call POSTs one `{method, params}` body and awaits exactly one reply.

pub mod client;

pub use client::{HttpClientConfig, HttpRpcClient};
