//! Gatehouse server: configuration loading, tracing setup, router assembly
//! and the `gatehouse` command line.

pub mod cli;
pub mod config;
pub mod observability;
pub mod server;

pub use config::AppConfig;
pub use server::{GatehouseServer, ServerBuilder, build_app};
