#![forbid(unsafe_code)]

//! `tool-conduit`: call operations on a long-lived child server over
//! line-delimited JSON-RPC on stdio.

pub mod config;
pub mod errors;
pub mod rpc;

pub use config::GlobalConfig;
pub use errors::{AppError, Result};
