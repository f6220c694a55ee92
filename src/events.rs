use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tracing::trace;

use crate::catalog::ErrorClass;
use crate::rollback::RollbackStatus;
use crate::run::RunStatus;

/// Progress notifications published while workflows move through their lifecycle
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum WorkflowEvent {
    StatusChanged {
        workflow_id: String,
        from: RunStatus,
        to: RunStatus,
    },
    ConfirmationRequested {
        workflow_id: String,
        title: String,
    },
    StepStarted {
        workflow_id: String,
        step_id: String,
        attempt: u32,
    },
    StepRetrying {
        workflow_id: String,
        step_id: String,
        error: String,
    },
    StepSucceeded {
        workflow_id: String,
        step_id: String,
    },
    StepFailed {
        workflow_id: String,
        step_id: String,
        class: ErrorClass,
        error: String,
    },
    StepSkipped {
        workflow_id: String,
        step_id: String,
    },
    RollbackStep {
        workflow_id: String,
        step_id: String,
        status: RollbackStatus,
    },
}

impl WorkflowEvent {
    pub fn workflow_id(&self) -> &str {
        match self {
            WorkflowEvent::StatusChanged { workflow_id, .. }
            | WorkflowEvent::ConfirmationRequested { workflow_id, .. }
            | WorkflowEvent::StepStarted { workflow_id, .. }
            | WorkflowEvent::StepRetrying { workflow_id, .. }
            | WorkflowEvent::StepSucceeded { workflow_id, .. }
            | WorkflowEvent::StepFailed { workflow_id, .. }
            | WorkflowEvent::StepSkipped { workflow_id, .. }
            | WorkflowEvent::RollbackStep { workflow_id, .. } => workflow_id,
        }
    }

    pub fn event_type(&self) -> &'static str {
        match self {
            WorkflowEvent::StatusChanged { .. } => "status_changed",
            WorkflowEvent::ConfirmationRequested { .. } => "confirmation_requested",
            WorkflowEvent::StepStarted { .. } => "step_started",
            WorkflowEvent::StepRetrying { .. } => "step_retrying",
            WorkflowEvent::StepSucceeded { .. } => "step_succeeded",
            WorkflowEvent::StepFailed { .. } => "step_failed",
            WorkflowEvent::StepSkipped { .. } => "step_skipped",
            WorkflowEvent::RollbackStep { .. } => "rollback_step",
        }
    }
}

#[derive(Debug, Clone)]
pub struct EventBus {
    sender: broadcast::Sender<WorkflowEvent>,
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

impl EventBus {
    pub fn new() -> Self {
        Self::with_capacity(1000)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    /// Publish an event. Having no subscribers is normal and not an error.
    pub fn emit(&self, event: WorkflowEvent) {
        trace!(event = event.event_type(), workflow_id = event.workflow_id(), "Emitting event");
        let _ = self.sender.send(event);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<WorkflowEvent> {
        self.sender.subscribe()
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_emit_without_subscribers_is_silent() {
        let bus = EventBus::new();
        bus.emit(WorkflowEvent::StepSucceeded {
            workflow_id: "wf".into(),
            step_id: "a".into(),
        });
        assert_eq!(bus.subscriber_count(), 0);
    }

    #[tokio::test]
    async fn test_subscribers_receive_events_in_order() {
        let bus = EventBus::new();
        let mut rx = bus.subscribe();

        bus.emit(WorkflowEvent::StepStarted {
            workflow_id: "wf".into(),
            step_id: "a".into(),
            attempt: 1,
        });
        bus.emit(WorkflowEvent::StepSucceeded {
            workflow_id: "wf".into(),
            step_id: "a".into(),
        });

        assert_eq!(rx.recv().await.unwrap().event_type(), "step_started");
        let second = rx.recv().await.unwrap();
        assert_eq!(second.event_type(), "step_succeeded");
        assert_eq!(second.workflow_id(), "wf");
    }

    #[test]
    fn test_event_serializes_with_type_tag() {
        let event = WorkflowEvent::StatusChanged {
            workflow_id: "wf".into(),
            from: RunStatus::Running,
            to: RunStatus::Succeeded,
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "status_changed");
        assert_eq!(json["to"], "succeeded");
    }
}
