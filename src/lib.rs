//! HTTP front end for notebook conversion.
//!
//! Layers, inside out: `domain` (notebook model, format registry),
//! `application` (tag extraction, exporter configuration, orchestration,
//! the worker pool), `infra` (engine adapter, HTTP surface, telemetry) and
//! `config` (layered settings).

pub mod application;
pub mod config;
pub mod domain;
pub mod infra;
