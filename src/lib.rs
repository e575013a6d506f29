//! Metrics export and HTTP load generation for microservice RCA
//! fault-injection experiments.
//!
//! The export side queries a Prometheus-compatible backend once per
//! (entity, metric kind) pair over a bounded wall-clock window, aligns every
//! returned series on an integer epoch-second index, and materializes one
//! wide CSV with a fixed column contract. The load side replays a weighted
//! mix of storefront user behavior to drive the services being measured.

pub mod collect;
pub mod config;
pub mod error;
pub mod export;
pub mod load;
pub mod prom;
pub mod schema;
pub mod series;
pub mod table;
