//! Sync coordination: operation lifecycle, per-endpoint exclusion,
//! offline queueing, and executor callbacks.
//!
//! The coordinator never mutates snapshots or membership directly; it
//! plans, tracks operation state, and requests mutations through the
//! state and pool managers. Package changes themselves happen in an
//! external executor that picks up the action plan and reports back.

mod planner;

pub use planner::{plan_transition, Plan};

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::sync::{broadcast, Mutex as AsyncMutex, RwLock};

use crate::analyzer::RepositoryAnalyzer;
use crate::db::{Database, OperationStore};
use crate::error::{Error, Result};
use crate::models::{
    CoreEvent, EndpointId, OperationId, OperationKind, OperationStatus, PackageEntry, Pool,
    SyncOperation, SyncStatus, SystemState,
};
use crate::pool::PoolManager;
use crate::state::StateManager;
use crate::util::unix_timestamp_ms;

/// An endpoint's self-reported system state, as submitted with a
/// status report
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StateReport {
    pub architecture: String,
    pub pacman_version: String,
    pub packages: Vec<PackageEntry>,
}

/// Orchestrates sync operations across endpoints.
///
/// Cloning shares the underlying live state; all clones observe the
/// same operation slots and queues.
#[derive(Clone)]
pub struct SyncCoordinator {
    db: Arc<AsyncMutex<Database>>,
    state: StateManager,
    pools: PoolManager,
    analyzer: Arc<RepositoryAnalyzer>,
    /// Exclusive operation slot per endpoint: holds the active
    /// (pending or in-progress) operation id
    slots: Arc<RwLock<HashMap<EndpointId, OperationId>>>,
    /// Operations accepted while their endpoint was offline, FIFO
    queues: Arc<AsyncMutex<HashMap<EndpointId, VecDeque<OperationId>>>>,
    /// Latest self-reported state per endpoint (bookkeeping only;
    /// updated without touching operation slots)
    reported: Arc<RwLock<HashMap<EndpointId, StateReport>>>,
    events: broadcast::Sender<CoreEvent>,
    executor_timeout: Duration,
}

impl SyncCoordinator {
    pub fn new(
        db: Arc<AsyncMutex<Database>>,
        state: StateManager,
        pools: PoolManager,
        analyzer: Arc<RepositoryAnalyzer>,
        events: broadcast::Sender<CoreEvent>,
        executor_timeout: Duration,
    ) -> Self {
        Self {
            db,
            state,
            pools,
            analyzer,
            slots: Arc::new(RwLock::new(HashMap::new())),
            queues: Arc::new(AsyncMutex::new(HashMap::new())),
            reported: Arc::new(RwLock::new(HashMap::new())),
            events,
            executor_timeout,
        }
    }

    /// Rebuild live state (operation slots, queues, watchdogs) from
    /// persisted operations after a restart
    pub async fn recover(&self) -> Result<()> {
        let active = {
            let db = self.db.lock().await;
            OperationStore::new(db.connection()).list_active().await?
        };

        for operation in active {
            self.slots
                .write()
                .await
                .insert(operation.endpoint_id, operation.id);
            match operation.status {
                OperationStatus::Pending => {
                    // Replays on the endpoint's next status report
                    self.queues
                        .lock()
                        .await
                        .entry(operation.endpoint_id)
                        .or_default()
                        .push_back(operation.id);
                }
                OperationStatus::InProgress => self.arm_watchdog(operation.id),
                _ => {}
            }
        }
        Ok(())
    }

    /// Latest self-reported state for an endpoint, if any
    pub async fn reported_state(&self, endpoint_id: &EndpointId) -> Option<StateReport> {
        self.reported.read().await.get(endpoint_id).cloned()
    }

    /// Ingest a status report: update bookkeeping, bring the endpoint
    /// back online, and replay any queued operations in submission
    /// order. Returns the operations the replay advanced.
    pub async fn record_report(
        &self,
        endpoint_id: &EndpointId,
        report: StateReport,
    ) -> Result<Vec<SyncOperation>> {
        let endpoint = self.pools.get_endpoint(endpoint_id).await?;

        let status = match endpoint.pool_id {
            None => SyncStatus::Unknown,
            Some(pool_id) => {
                let pool = self.pools.get_pool(&pool_id).await?;
                match pool.target_state_id {
                    None => SyncStatus::Unknown,
                    Some(target_id) => {
                        let target = self.state.get_snapshot(&target_id).await?;
                        status_against_target(&report.packages, &target.packages)
                    }
                }
            }
        };

        self.reported
            .write()
            .await
            .insert(*endpoint_id, report);
        self.pools.record_heartbeat(endpoint_id, status).await?;

        // Endpoint is reachable again; drain its queue FIFO
        let queued: Vec<OperationId> = {
            let mut queues = self.queues.lock().await;
            queues.remove(endpoint_id).map(Vec::from).unwrap_or_default()
        };

        let mut advanced = Vec::new();
        for operation_id in queued {
            let operation = {
                let db = self.db.lock().await;
                OperationStore::new(db.connection())
                    .get_required(&operation_id)
                    .await?
            };
            if operation.status != OperationStatus::Pending {
                continue;
            }
            tracing::info!(operation = %operation_id, endpoint = %endpoint_id,
                "replaying queued operation");
            advanced.push(self.dispatch(operation).await?);
        }
        Ok(advanced)
    }

    /// Accept a sync operation for an endpoint.
    ///
    /// Fails with `Conflict("operation_in_progress")` when the endpoint
    /// already has a pending or in-progress operation. Requests against
    /// offline endpoints are accepted and queued.
    pub async fn request_operation(
        &self,
        endpoint_id: &EndpointId,
        kind: OperationKind,
    ) -> Result<SyncOperation> {
        let endpoint = self.pools.get_endpoint(endpoint_id).await?;
        let pool_id = endpoint.pool_id.ok_or_else(|| {
            Error::Validation(format!("endpoint {endpoint_id} is not assigned to a pool"))
        })?;

        // First step of every operation-initiating call: take the
        // endpoint's exclusive slot
        let mut operation = {
            let mut slots = self.slots.write().await;
            if slots.contains_key(endpoint_id) {
                return Err(Error::conflict("operation_in_progress"));
            }
            let operation = SyncOperation::new(pool_id, *endpoint_id, kind);
            slots.insert(*endpoint_id, operation.id);
            operation
        };

        if endpoint.sync_status == SyncStatus::Offline {
            operation.detail.queued = true;
        }

        let inserted = {
            let db = self.db.lock().await;
            OperationStore::new(db.connection()).insert(&operation).await
        };
        if let Err(error) = inserted {
            self.release_slot(endpoint_id, &operation.id).await;
            return Err(error);
        }

        if operation.detail.queued {
            self.queues
                .lock()
                .await
                .entry(*endpoint_id)
                .or_default()
                .push_back(operation.id);
            tracing::info!(operation = %operation.id, endpoint = %endpoint_id,
                "endpoint offline, operation queued");
            self.emit_operation(&operation);
            return Ok(operation);
        }

        self.dispatch(operation).await
    }

    /// Current view of an operation
    pub async fn poll(&self, operation_id: &OperationId) -> Result<SyncOperation> {
        let db = self.db.lock().await;
        OperationStore::new(db.connection()).get_required(operation_id).await
    }

    /// List an endpoint's operations, newest first
    pub async fn list_operations(
        &self,
        endpoint_id: &EndpointId,
        limit: usize,
    ) -> Result<Vec<SyncOperation>> {
        let db = self.db.lock().await;
        OperationStore::new(db.connection())
            .list_for_endpoint(endpoint_id, limit)
            .await
    }

    /// Cancel a pending operation.
    ///
    /// In-progress operations cannot be cancelled from here
    /// (cancellation of running package work is cooperative and happens
    /// executor-side); terminal operations are returned unchanged.
    pub async fn cancel(&self, operation_id: &OperationId) -> Result<SyncOperation> {
        let mut operation = self.poll(operation_id).await?;

        match operation.status {
            OperationStatus::Pending => {
                operation.status = OperationStatus::Cancelled;
                operation.completed_at = Some(unix_timestamp_ms());
                {
                    let db = self.db.lock().await;
                    OperationStore::new(db.connection()).update(&operation).await?;
                }
                if let Some(queue) = self.queues.lock().await.get_mut(&operation.endpoint_id) {
                    queue.retain(|queued| queued != operation_id);
                }
                self.release_slot(&operation.endpoint_id, operation_id).await;
                tracing::info!(operation = %operation_id, "operation cancelled");
                self.emit_operation(&operation);
                Ok(operation)
            }
            OperationStatus::InProgress => Err(Error::conflict("cannot_cancel_active_operation")),
            _ => Ok(operation),
        }
    }

    /// Executor completion callback: persist the resulting state and
    /// finalize the operation
    pub async fn complete_operation(
        &self,
        operation_id: &OperationId,
        resulting_packages: Vec<PackageEntry>,
        success: bool,
    ) -> Result<SyncOperation> {
        let mut operation = self.poll(operation_id).await?;
        if operation.status != OperationStatus::InProgress {
            return Err(Error::conflict("operation_not_active"));
        }

        if success {
            let (architecture, pacman_version) = self
                .reported_state(&operation.endpoint_id)
                .await
                .map_or(("unknown".to_string(), "unknown".to_string()), |report| {
                    (report.architecture, report.pacman_version)
                });

            let snapshot = self
                .state
                .create_snapshot(
                    operation.endpoint_id,
                    operation.pool_id,
                    architecture.clone(),
                    pacman_version.clone(),
                    resulting_packages.clone(),
                )
                .await?;
            operation.detail.snapshot_id = Some(snapshot.id);

            self.reported.write().await.insert(
                operation.endpoint_id,
                StateReport {
                    architecture,
                    pacman_version,
                    packages: resulting_packages.clone(),
                },
            );

            let pool = self.pools.get_pool(&operation.pool_id).await?;
            let status = match pool.target_state_id {
                None => SyncStatus::Unknown,
                Some(target_id) => {
                    let target = self.state.get_snapshot(&target_id).await?;
                    status_against_target(&resulting_packages, &target.packages)
                }
            };
            self.pools
                .set_endpoint_status(&operation.endpoint_id, status)
                .await?;

            operation.status = OperationStatus::Completed;
            tracing::info!(operation = %operation_id, snapshot = %snapshot.id,
                "operation completed");
        } else {
            operation.status = OperationStatus::Failed;
            operation.detail.failure_reason = Some("executor_reported_failure".to_string());
            tracing::warn!(operation = %operation_id, "executor reported failure");
        }

        operation.completed_at = Some(unix_timestamp_ms());
        {
            let db = self.db.lock().await;
            OperationStore::new(db.connection()).update(&operation).await?;
        }
        self.release_slot(&operation.endpoint_id, operation_id).await;
        self.emit_operation(&operation);
        Ok(operation)
    }

    /// Fail an operation whose executor never called back. Returns
    /// whether the operation was actually expired.
    pub async fn expire_operation(&self, operation_id: &OperationId) -> Result<bool> {
        let mut operation = self.poll(operation_id).await?;
        if operation.status != OperationStatus::InProgress {
            return Ok(false);
        }

        operation.status = OperationStatus::Failed;
        operation.detail.failure_reason = Some("executor_timeout".to_string());
        operation.completed_at = Some(unix_timestamp_ms());
        {
            let db = self.db.lock().await;
            OperationStore::new(db.connection()).update(&operation).await?;
        }
        self.release_slot(&operation.endpoint_id, operation_id).await;
        tracing::warn!(operation = %operation_id, "executor timed out, operation failed");
        self.emit_operation(&operation);
        Ok(true)
    }

    // ------------------------------------------------------------------
    // Internals
    // ------------------------------------------------------------------

    /// Plan and advance an accepted operation whose slot is already
    /// held. On planning errors the operation is failed and the slot
    /// released before the error propagates.
    async fn dispatch(&self, operation: SyncOperation) -> Result<SyncOperation> {
        match self.dispatch_inner(operation.clone()).await {
            Ok(operation) => Ok(operation),
            Err(error) => {
                let mut failed = operation;
                failed.status = OperationStatus::Failed;
                failed.detail.failure_reason = Some(error.to_string());
                failed.completed_at = Some(unix_timestamp_ms());
                {
                    let db = self.db.lock().await;
                    OperationStore::new(db.connection()).update(&failed).await.ok();
                }
                self.release_slot(&failed.endpoint_id, &failed.id).await;
                self.emit_operation(&failed);
                Err(error)
            }
        }
    }

    async fn dispatch_inner(&self, mut operation: SyncOperation) -> Result<SyncOperation> {
        operation.detail.queued = false;
        let pool = self.pools.get_pool(&operation.pool_id).await?;

        match operation.kind {
            OperationKind::SetAsLatest => self.dispatch_set_as_latest(operation, &pool).await,
            OperationKind::SyncToLatest => {
                let target_id = pool.target_state_id.ok_or_else(|| {
                    Error::NotFound(format!("pool {} has no target state", pool.id))
                })?;
                let target = self.state.get_snapshot(&target_id).await?;
                self.dispatch_transition(operation, &pool, target).await
            }
            OperationKind::RevertToPrevious => {
                let previous = self.state.get_previous_state(&operation.endpoint_id).await?;
                self.dispatch_transition(operation, &pool, previous).await
            }
        }
    }

    /// `set_as_latest`: snapshot the endpoint's reported state, make it
    /// the pool target, fan out sibling status changes
    async fn dispatch_set_as_latest(
        &self,
        mut operation: SyncOperation,
        pool: &Pool,
    ) -> Result<SyncOperation> {
        let report = self
            .reported_state(&operation.endpoint_id)
            .await
            .ok_or_else(|| {
                Error::Validation(format!(
                    "endpoint {} has not reported its state yet",
                    operation.endpoint_id
                ))
            })?;

        let (snapshot, changes) = self
            .state
            .snapshot_as_target(
                operation.endpoint_id,
                pool.id,
                report.architecture,
                report.pacman_version,
                report.packages,
            )
            .await?;

        operation.detail.snapshot_id = Some(snapshot.id);
        operation.detail.target_snapshot_id = Some(snapshot.id);
        operation.status = OperationStatus::Completed;
        operation.completed_at = Some(unix_timestamp_ms());
        {
            let db = self.db.lock().await;
            OperationStore::new(db.connection()).update(&operation).await?;
        }
        self.release_slot(&operation.endpoint_id, &operation.id).await;

        self.emit_operation(&operation);
        self.emit(CoreEvent::TargetChanged {
            pool_id: pool.id,
            target_state_id: snapshot.id,
            changes,
        });
        Ok(operation)
    }

    /// `sync_to_latest` / `revert_to_previous`: diff the endpoint
    /// against the desired snapshot and hand the plan to the executor
    async fn dispatch_transition(
        &self,
        mut operation: SyncOperation,
        pool: &Pool,
        desired: SystemState,
    ) -> Result<SyncOperation> {
        let current = match self.reported_state(&operation.endpoint_id).await {
            Some(report) => report.packages,
            None => self
                .state
                .latest_snapshot(&operation.endpoint_id)
                .await?
                .map(|snapshot| snapshot.packages)
                .ok_or_else(|| {
                    Error::Validation(format!(
                        "endpoint {} has no reported state or snapshot history",
                        operation.endpoint_id
                    ))
                })?,
        };

        // The latest compatibility analysis gates what may be scheduled
        let members = self.pools.list_members(&pool.id).await?;
        let member_ids: Vec<EndpointId> = members.iter().map(|member| member.id).collect();
        let analysis = self
            .analyzer
            .analyze(pool.id, &member_ids, pool.policy.include_aur)
            .await;

        let mut excluded: HashSet<String> = analysis.excluded_packages.iter().cloned().collect();
        excluded.extend(pool.policy.exclude_packages.iter().cloned());

        let plan = plan_transition(
            &current,
            &desired.packages,
            &excluded,
            &analysis.conflicts,
            pool.policy.conflict_resolution,
        );

        operation.detail.target_snapshot_id = Some(desired.id);
        operation.detail.plan = plan.actions;
        operation.detail.conflicts = plan.conflicts;

        if !operation.detail.conflicts.is_empty() {
            operation.status = OperationStatus::Failed;
            operation.detail.failure_reason = Some("unresolved_conflicts".to_string());
            operation.completed_at = Some(unix_timestamp_ms());
            tracing::warn!(operation = %operation.id, conflicts = operation.detail.conflicts.len(),
                "operation failed with conflicts");
        } else if operation.detail.plan.is_empty() {
            // Already converged: complete without involving the executor
            operation.status = OperationStatus::Completed;
            operation.completed_at = Some(unix_timestamp_ms());
        } else {
            operation.status = OperationStatus::InProgress;
        }

        {
            let db = self.db.lock().await;
            OperationStore::new(db.connection()).update(&operation).await?;
        }

        if operation.status == OperationStatus::InProgress {
            self.arm_watchdog(operation.id);
        } else {
            self.release_slot(&operation.endpoint_id, &operation.id).await;
        }
        self.emit_operation(&operation);
        Ok(operation)
    }

    /// Release an endpoint's slot if it is still held by this operation
    async fn release_slot(&self, endpoint_id: &EndpointId, operation_id: &OperationId) {
        let mut slots = self.slots.write().await;
        if slots.get(endpoint_id) == Some(operation_id) {
            slots.remove(endpoint_id);
        }
    }

    /// Fail the operation after the executor timeout unless it
    /// completed first
    fn arm_watchdog(&self, operation_id: OperationId) {
        let coordinator = self.clone();
        let timeout = self.executor_timeout;
        tokio::spawn(async move {
            tokio::time::sleep(timeout).await;
            if let Err(error) = coordinator.expire_operation(&operation_id).await {
                tracing::error!(operation = %operation_id, %error, "watchdog expiry failed");
            }
        });
    }

    fn emit_operation(&self, operation: &SyncOperation) {
        self.emit(CoreEvent::OperationChanged {
            operation_id: operation.id,
            endpoint_id: operation.endpoint_id,
            status: operation.status,
        });
    }

    /// Fire-and-forget: the transport layer consumes events; delivery
    /// never blocks the core
    fn emit(&self, event: CoreEvent) {
        let _ = self.events.send(event);
    }
}

/// Standing of a reported package list against a target list
fn status_against_target(current: &[PackageEntry], target: &[PackageEntry]) -> SyncStatus {
    if SystemState::packages_equal(current, target) {
        return SyncStatus::InSync;
    }

    // Ahead: everything the target wants is present at the same or a
    // newer version, plus possible extras
    let current_map: HashMap<&str, &PackageEntry> = current
        .iter()
        .map(|entry| (entry.name.as_str(), entry))
        .collect();
    let covers_target = target.iter().all(|want| {
        current_map.get(want.name.as_str()).is_some_and(|have| {
            crate::util::compare_versions(&have.version, &want.version) != std::cmp::Ordering::Less
        })
    });

    if covers_target {
        SyncStatus::Ahead
    } else {
        SyncStatus::Behind
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pkg(name: &str, version: &str) -> PackageEntry {
        PackageEntry {
            name: name.to_string(),
            version: version.to_string(),
            repository: "core".to_string(),
            installed_size: 1024,
            dependencies: Vec::new(),
        }
    }

    #[test]
    fn equal_lists_are_in_sync() {
        let list = vec![pkg("foo", "1.0")];
        assert_eq!(status_against_target(&list, &list), SyncStatus::InSync);
    }

    #[test]
    fn newer_or_extra_packages_are_ahead() {
        let target = vec![pkg("foo", "1.0")];
        let newer = vec![pkg("foo", "1.1")];
        let extra = vec![pkg("foo", "1.0"), pkg("bar", "2.0")];
        assert_eq!(status_against_target(&newer, &target), SyncStatus::Ahead);
        assert_eq!(status_against_target(&extra, &target), SyncStatus::Ahead);
    }

    #[test]
    fn missing_or_older_packages_are_behind() {
        let target = vec![pkg("foo", "1.0"), pkg("bar", "2.0")];
        let older = vec![pkg("foo", "0.9"), pkg("bar", "2.0")];
        let missing = vec![pkg("foo", "1.0")];
        assert_eq!(status_against_target(&older, &target), SyncStatus::Behind);
        assert_eq!(status_against_target(&missing, &target), SyncStatus::Behind);
    }
}
