//! Core primitives of the test-observability telemetry pipeline.
//!
//! This crate holds the pieces that every integration shares: the outbound event data model, the
//! usage counters that track delivery outcomes across worker processes, the buffered event queue,
//! and the dispatcher that framework adapters call into.
#![deny(warnings)]
#![deny(missing_docs)]

pub mod context;
pub mod data_model;
pub mod dispatcher;
pub mod queue;
pub mod sender;
pub mod usage;
