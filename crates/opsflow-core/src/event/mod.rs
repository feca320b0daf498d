//! Event bus for execution and trigger notifications.
//!
//! `EventBus` fans `ExecutionEvent`s out to every subscriber; `EventStream`
//! narrows that to one organization or one execution.

pub mod bus;

pub use bus::{EventBus, EventFilter, EventStream, DEFAULT_EVENT_CAPACITY};
