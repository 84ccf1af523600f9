// Library root module for deferred-prom
// This file defines the public API and module structure of the deferred
// metrics pipeline: capture on the hot path, normalize and flush later
//
// Numan Thabit 2025 Nov

pub mod buffer;
pub mod caller;
pub mod client;
pub mod config;
pub mod db;
pub mod errors;
pub mod event;
pub mod flusher;
pub mod instruments;
pub mod labels;
pub mod metrics;
pub mod middleware;
pub mod normalize;
pub mod pipeline;
pub mod route;
pub mod server;
pub mod sink;

pub use crate::config::AppConfig;
pub use crate::errors::MetricsError;
pub use crate::flusher::FlushReport;
pub use crate::pipeline::{Instrumentation, RequestTicket};
pub use crate::route::RouteTable;
