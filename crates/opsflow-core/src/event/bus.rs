//! Execution event bus.
//!
//! One `tokio::sync::broadcast` channel carries every organization's
//! `ExecutionEvent`s. Consumers narrow it with an `EventFilter`: the server's
//! approval notifier listens to everything, a caller waiting on one run
//! listens to that execution only. Organizations never see each other's
//! events through a filtered stream.

use opsflow_types::event::ExecutionEvent;
use tokio::sync::broadcast;
use tokio::sync::broadcast::error::{RecvError, TryRecvError};
use uuid::Uuid;

/// Events buffered per subscriber before the slowest one starts lagging.
pub const DEFAULT_EVENT_CAPACITY: usize = 1024;

/// Multi-producer, multi-consumer bus for execution lifecycle events.
#[derive(Clone)]
pub struct EventBus {
    sender: broadcast::Sender<ExecutionEvent>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    /// Raw receiver for every future event of every organization.
    pub fn subscribe(&self) -> broadcast::Receiver<ExecutionEvent> {
        self.sender.subscribe()
    }

    /// Stream of future events matching `filter`.
    pub fn stream(&self, filter: EventFilter) -> EventStream {
        EventStream {
            rx: self.sender.subscribe(),
            filter,
            lagged: 0,
        }
    }

    /// Publish to current subscribers. Dropped when nobody listens.
    pub fn publish(&self, event: ExecutionEvent) {
        if self.sender.send(event).is_err() {
            tracing::trace!("execution event published without subscribers");
        }
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(DEFAULT_EVENT_CAPACITY)
    }
}

impl std::fmt::Debug for EventBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventBus")
            .field("subscribers", &self.sender.receiver_count())
            .finish()
    }
}

// ---------------------------------------------------------------------------
// Filtering
// ---------------------------------------------------------------------------

/// Which events an `EventStream` yields.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EventFilter {
    organization_id: Option<String>,
    execution_id: Option<Uuid>,
}

impl EventFilter {
    /// Every event of every organization.
    pub fn all() -> Self {
        Self::default()
    }

    pub fn organization(organization_id: impl Into<String>) -> Self {
        Self {
            organization_id: Some(organization_id.into()),
            execution_id: None,
        }
    }

    /// Events of one execution, including the trigger record that
    /// started it.
    pub fn execution(organization_id: impl Into<String>, execution_id: Uuid) -> Self {
        Self {
            organization_id: Some(organization_id.into()),
            execution_id: Some(execution_id),
        }
    }

    pub fn matches(&self, event: &ExecutionEvent) -> bool {
        if self
            .organization_id
            .as_deref()
            .is_some_and(|org| org != event.organization_id())
        {
            return false;
        }
        match self.execution_id {
            Some(wanted) => event_execution_id(event) == Some(wanted),
            None => true,
        }
    }
}

fn event_execution_id(event: &ExecutionEvent) -> Option<Uuid> {
    match event {
        ExecutionEvent::ExecutionStarted { execution_id, .. }
        | ExecutionEvent::StepCompleted { execution_id, .. }
        | ExecutionEvent::StepRetrying { execution_id, .. }
        | ExecutionEvent::ApprovalRequested { execution_id, .. }
        | ExecutionEvent::ExecutionFinished { execution_id, .. } => Some(*execution_id),
        ExecutionEvent::TriggerRecorded { execution_id, .. } => *execution_id,
    }
}

// ---------------------------------------------------------------------------
// EventStream
// ---------------------------------------------------------------------------

/// Filtered view of the bus.
///
/// A subscriber that falls behind skips the overwritten events, logs the
/// gap, and carries on; the count is kept in `lagged()`.
#[derive(Debug)]
pub struct EventStream {
    rx: broadcast::Receiver<ExecutionEvent>,
    filter: EventFilter,
    lagged: u64,
}

impl EventStream {
    /// Next matching event, or `None` once the bus is gone.
    pub async fn recv(&mut self) -> Option<ExecutionEvent> {
        loop {
            match self.rx.recv().await {
                Ok(event) if self.filter.matches(&event) => return Some(event),
                Ok(_) => {}
                Err(RecvError::Lagged(skipped)) => self.record_lag(skipped),
                Err(RecvError::Closed) => return None,
            }
        }
    }

    /// Next matching event already buffered, without waiting.
    pub fn try_recv(&mut self) -> Option<ExecutionEvent> {
        loop {
            match self.rx.try_recv() {
                Ok(event) if self.filter.matches(&event) => return Some(event),
                Ok(_) => {}
                Err(TryRecvError::Lagged(skipped)) => self.record_lag(skipped),
                Err(TryRecvError::Empty | TryRecvError::Closed) => return None,
            }
        }
    }

    /// Events this stream lost to lag so far, matching or not.
    pub fn lagged(&self) -> u64 {
        self.lagged
    }

    fn record_lag(&mut self, skipped: u64) {
        self.lagged += skipped;
        tracing::warn!(skipped, filter = ?self.filter, "event stream lagged behind the bus");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use opsflow_types::execution::ExecutionStatus;
    use opsflow_types::trigger::{TriggerLogStatus, TriggerType};

    fn finished(org: &str, execution_id: Uuid) -> ExecutionEvent {
        ExecutionEvent::ExecutionFinished {
            organization_id: org.to_string(),
            execution_id,
            status: ExecutionStatus::Succeeded,
            error_kind: None,
        }
    }

    #[tokio::test]
    async fn organization_stream_hides_other_tenants() {
        let bus = EventBus::new(16);
        let mut mine = bus.stream(EventFilter::organization("org-1"));
        let mut all = bus.stream(EventFilter::all());

        bus.publish(finished("org-2", Uuid::now_v7()));
        let own = Uuid::now_v7();
        bus.publish(finished("org-1", own));

        match mine.recv().await {
            Some(ExecutionEvent::ExecutionFinished { execution_id, .. }) => {
                assert_eq!(execution_id, own);
            }
            other => panic!("unexpected {other:?}"),
        }
        assert!(mine.try_recv().is_none());
        assert!(all.try_recv().is_some());
        assert!(all.try_recv().is_some());
    }

    #[tokio::test]
    async fn execution_stream_matches_one_run() {
        let bus = EventBus::new(16);
        let wanted = Uuid::now_v7();
        let mut stream = bus.stream(EventFilter::execution("org-1", wanted));

        bus.publish(finished("org-1", Uuid::now_v7()));
        bus.publish(ExecutionEvent::TriggerRecorded {
            organization_id: "org-1".to_string(),
            trigger_type: TriggerType::Webhook,
            status: TriggerLogStatus::Duplicate,
            execution_id: None,
        });
        bus.publish(finished("org-2", wanted));
        bus.publish(finished("org-1", wanted));

        assert!(matches!(
            stream.try_recv(),
            Some(ExecutionEvent::ExecutionFinished { execution_id, .. }) if execution_id == wanted
        ));
        assert!(stream.try_recv().is_none());
    }

    #[tokio::test]
    async fn lagging_stream_skips_gap_and_counts_it() {
        let bus = EventBus::new(2);
        let mut stream = bus.stream(EventFilter::all());
        for _ in 0..5 {
            bus.publish(finished("org-1", Uuid::now_v7()));
        }

        assert!(stream.try_recv().is_some());
        assert_eq!(stream.lagged(), 3);
    }

    #[tokio::test]
    async fn stream_ends_when_bus_dropped() {
        let bus = EventBus::new(4);
        let mut stream = bus.stream(EventFilter::all());
        drop(bus);
        assert!(stream.recv().await.is_none());
    }
}
