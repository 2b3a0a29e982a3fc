//! Conversion services: preprocessing, exporter configuration, orchestration
//! and the worker pool.

pub mod convert;
pub mod engine;
pub mod error;
pub mod export;
pub mod extract;
pub mod pool;
pub mod templates;
