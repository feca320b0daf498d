//! Shared domain types for Opsflow.
//!
//! Workflow definitions, executions, approvals, triggers, secure values and
//! the engine configuration, plus their associated error types.
//!
//! Zero infrastructure dependencies -- only serde, uuid, chrono, thiserror.

pub mod approval;
pub mod config;
pub mod connector;
pub mod error;
pub mod event;
pub mod execution;
pub mod secure;
pub mod trigger;
pub mod workflow;
