//! Vigil server wiring and command-line client.

pub mod client;
pub mod commands;
pub mod config;
pub mod handlers;
pub mod producer;
pub mod server;
pub mod telemetry;

pub use producer::HttpAggregationProducer;
