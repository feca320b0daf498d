//! Workflow engine core: graph loading, step dispatch, and durable execution.
//!
//! - `definition` -- graph indexing, validation, YAML bundles
//! - `graph` -- petgraph reachability and cycle analysis
//! - `data_source` -- database and static graph sources
//! - `context` -- variable scope, template resolution, execution context
//! - `expression` -- JEXL evaluator for condition steps
//! - `action` -- parameter validation, approval gating, connector calls
//! - `retry` -- transient-failure retry policy and backoff
//! - `step_runner` -- handlers for the six step types, loop controller
//! - `checkpoint` -- durable state transitions per step
//! - `executor` -- leased single-writer dispatcher and worker pool
//! - `trigger` -- trigger ingestion pipeline and rate limiting
//! - `scheduler` -- cron driver for schedule triggers

pub mod action;
pub mod checkpoint;
pub mod context;
pub mod data_source;
pub mod definition;
pub mod executor;
pub mod expression;
pub mod graph;
pub mod retry;
pub mod scheduler;
pub mod step_runner;
pub mod trigger;

#[cfg(test)]
pub(crate) mod testing;
