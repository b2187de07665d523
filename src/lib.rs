// ===============================
// src/lib.rs
// ===============================
pub mod config;
pub mod domain;
pub mod metrics;
pub mod recorder;

pub mod ingest;
pub mod forecast;
pub mod trend;     // external interest signal + boost
pub mod deficit;
pub mod sourcing;  // nearest-surplus matcher
pub mod estimate;  // cost & carbon
pub mod pipeline;
pub mod export;
