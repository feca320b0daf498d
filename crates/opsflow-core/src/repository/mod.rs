//! Repository trait definitions (ports).
//!
//! These traits define the storage interface that the infrastructure layer
//! (opsflow-infra) implements. The core crate never depends on any specific
//! storage technology. `memory::InMemoryStore` implements all three traits
//! for tests and static bundles.

pub mod execution;
pub mod memory;
pub mod trigger;
pub mod workflow;

pub use execution::ExecutionRepository;
pub use memory::InMemoryStore;
pub use trigger::TriggerRepository;
pub use workflow::WorkflowRepository;
