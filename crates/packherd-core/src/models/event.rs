//! Push-event contracts for the external transport layer.
//!
//! The engine emits these on a broadcast channel and never blocks on
//! delivery; turning them into WebSocket/HTTP pushes is the transport's
//! job.

use serde::{Deserialize, Serialize};

use super::endpoint::{EndpointId, SyncStatus};
use super::operation::{OperationId, OperationStatus};
use super::pool::PoolId;
use super::snapshot::SnapshotId;

/// One endpoint's status transition, produced by target-state fan-out
/// and offline sweeps
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusChange {
    pub endpoint_id: EndpointId,
    pub status: SyncStatus,
}

/// Events pushed from the core to endpoints via the external transport
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum CoreEvent {
    /// A sync operation changed state
    OperationChanged {
        operation_id: OperationId,
        endpoint_id: EndpointId,
        status: OperationStatus,
    },
    /// A pool's target state changed; members should reconcile
    TargetChanged {
        pool_id: PoolId,
        target_state_id: SnapshotId,
        /// Sibling status transitions caused by the change
        changes: Vec<StatusChange>,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn events_tag_with_snake_case() {
        let event = CoreEvent::OperationChanged {
            operation_id: OperationId::new(),
            endpoint_id: EndpointId::new(),
            status: OperationStatus::InProgress,
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["event"], "operation_changed");
        assert_eq!(json["status"], "in_progress");
    }

    #[test]
    fn target_changed_carries_fanout() {
        let change = StatusChange {
            endpoint_id: EndpointId::new(),
            status: SyncStatus::Behind,
        };
        let event = CoreEvent::TargetChanged {
            pool_id: PoolId::new(),
            target_state_id: SnapshotId::new(),
            changes: vec![change],
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["event"], "target_changed");
        assert_eq!(json["changes"][0]["status"], "behind");
    }
}
