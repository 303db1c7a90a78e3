//! Wattflow Core
//!
//! Core types, errors, and constants for the wattflow power pipeline.
//!
//! # Overview
//!
//! Wattflow turns raw hardware measurements into power estimations through a
//! pipeline of actors: pullers read reports from a source, dispatchers route
//! them to per-key formulas, and pushers write the results out. This crate
//! holds what every stage shares: the report model, database interfaces,
//! configuration, and the prefix tree used for routing.
//!
//! # TigerStyle
//!
//! This crate follows [TigerStyle](https://github.com/tigerbeetle/tigerbeetle/blob/main/docs/TIGER_STYLE.md)
//! engineering principles:
//! - Safety > Performance > Developer Experience
//! - Explicit limits with big-endian naming (e.g., `SEQUENCE_ID_MAX`)
//! - No recursion (bounded iteration only)

pub mod config;
pub mod constants;
pub mod database;
pub mod error;
pub mod report;
pub mod telemetry;
pub mod tree;

pub use config::{
    ActorConfig, DispatcherConfig, PullerConfig, PusherConfig, SupervisorConfig, WattflowConfig,
};
pub use constants::*;
pub use database::{MemorySink, MemorySource, ReadableDatabase, WritableDatabase};
pub use error::{Error, Result, INIT_NO_REPLY_REASON};
pub use report::{EventCounters, HwpcGroups, Report, ReportKind};
pub use telemetry::{init_telemetry, TelemetryConfig, TelemetryGuard};
pub use tree::PrefixTree;
