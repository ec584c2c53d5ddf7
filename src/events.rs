use serde::{Deserialize, Serialize};

use crate::types::{BatchId, FailureKind, Metrics};

/// Lifecycle notifications published by the orchestrator.
///
/// Every event is sent while the store lock is held, so subscribers see them
/// in the same order the state changed. Within one attempt (one `Started`),
/// no `Progress` event follows that attempt's `Succeeded` or `Failed`, nor a
/// `Reset` or a `Selected` that replaced the batch. A retry of the same batch
/// opens a new attempt with its own `Started` and `Progress` events.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum BatchEvent {
    /// A new batch replaced whatever was selected before.
    #[serde(rename_all = "camelCase")]
    Selected { batch_id: BatchId, inputs: usize },

    /// A request for the batch was sent.
    #[serde(rename_all = "camelCase")]
    Started { batch_id: BatchId, attempt: u32 },

    /// Estimated completion, 0..100.
    #[serde(rename_all = "camelCase")]
    Progress { batch_id: BatchId, percent: f64 },

    #[serde(rename_all = "camelCase")]
    Succeeded {
        batch_id: BatchId,
        outputs: usize,
        unpaired: usize,
        metrics: Metrics,
    },

    #[serde(rename_all = "camelCase")]
    Failed {
        batch_id: BatchId,
        kind: FailureKind,
        notice: String,
    },

    /// The store was cleared. `batch_id` is the batch that was discarded.
    #[serde(rename_all = "camelCase")]
    Reset { batch_id: Option<BatchId> },
}

impl BatchEvent {
    /// The batch this event concerns, if any.
    pub fn batch_id(&self) -> Option<BatchId> {
        match self {
            BatchEvent::Selected { batch_id, .. }
            | BatchEvent::Started { batch_id, .. }
            | BatchEvent::Progress { batch_id, .. }
            | BatchEvent::Succeeded { batch_id, .. }
            | BatchEvent::Failed { batch_id, .. } => Some(*batch_id),
            BatchEvent::Reset { batch_id } => *batch_id,
        }
    }

    /// Whether this event ends a request.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            BatchEvent::Succeeded { .. } | BatchEvent::Failed { .. } | BatchEvent::Reset { .. }
        )
    }
}
