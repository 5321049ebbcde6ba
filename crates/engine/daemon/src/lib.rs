//! Engine Daemon library
//!
//! Components of the `workspace-engine` binary:
//! - layered configuration
//! - tracing bootstrap with optional OTLP export
//! - read-only REST API over the workspace registry
//! - server lifecycle tying the consumer, reconcilers and API together

#![deny(unsafe_code)]
#![cfg_attr(feature = "strict-docs", warn(missing_docs))]
#![cfg_attr(not(feature = "strict-docs"), allow(missing_docs))]

pub mod api;
pub mod config;
pub mod error;
pub mod server;
pub mod telemetry;

pub use config::DaemonConfig;
pub use error::{ApiError, DaemonError, DaemonResult};
pub use server::Server;
