//! TensorVault client library
//!
//! HTTP transport implementing the core transport traits against a
//! `tv-server` instance.

pub mod remote;

pub use remote::HttpTransport;
