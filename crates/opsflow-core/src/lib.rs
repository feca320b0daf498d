//! Workflow engine and repository trait definitions for Opsflow.
//!
//! This crate defines the "ports" (repository traits, connector, LLM client,
//! crypto services) that the infrastructure layer implements, plus the
//! engine that drives executions through them. It depends only on
//! `opsflow-types` -- never on `opsflow-infra` or any database/IO crate.

pub mod connector;
pub mod event;
pub mod llm;
pub mod repository;
pub mod service;
pub mod workflow;
