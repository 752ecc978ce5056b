//! The long-lived engine instance.
//!
//! Owns the database, the live coordination state, and the event
//! channel; every external surface (endpoint transport, admin API, CLI)
//! talks to one of these instead of ambient globals. Shutdown is
//! drop-based: the only background tasks are per-operation watchdogs,
//! which hold their own handle and self-terminate after one firing.

use std::path::Path;
use std::sync::Arc;

use tokio::sync::{broadcast, Mutex};

use crate::analyzer::RepositoryAnalyzer;
use crate::auth::TokenIssuer;
use crate::config::CoreConfig;
use crate::db::Database;
use crate::error::Result;
use crate::models::{
    CompatibilityAnalysis, CoreEvent, Endpoint, EndpointId, OperationId, OperationKind,
    PackageEntry, Pool, PoolId, PoolStatus, RepositoryPackage, SnapshotId, StatusChange,
    SyncOperation, SyncPolicy, SystemState,
};
use crate::pool::{PoolManager, PoolUpdate};
use crate::state::StateManager;
use crate::sync::SyncCoordinator;

pub use crate::sync::StateReport;

/// Capacity of the push-event channel; slow transports drop old events
/// rather than blocking the core
const EVENT_CHANNEL_CAPACITY: usize = 256;

/// Result of endpoint registration: identity plus bearer token
#[derive(Debug, Clone)]
pub struct Registration {
    pub endpoint: Endpoint,
    pub token: String,
}

/// The package-state synchronization engine
pub struct Engine {
    config: CoreConfig,
    pools: PoolManager,
    state: StateManager,
    analyzer: Arc<RepositoryAnalyzer>,
    coordinator: SyncCoordinator,
    tokens: TokenIssuer,
    events: broadcast::Sender<CoreEvent>,
}

impl Engine {
    /// Open an engine backed by a database file, creating it if needed
    pub async fn open(path: impl AsRef<Path>, config: CoreConfig) -> Result<Self> {
        Self::from_database(Database::open(path).await?, config).await
    }

    /// Open an engine backed by an in-memory database (testing)
    pub async fn open_in_memory(config: CoreConfig) -> Result<Self> {
        Self::from_database(Database::open_in_memory().await?, config).await
    }

    async fn from_database(database: Database, config: CoreConfig) -> Result<Self> {
        if config.uses_dev_secret() {
            tracing::warn!("engine running with the development token secret");
        }

        let db = Arc::new(Mutex::new(database));
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);

        let pools = PoolManager::new(db.clone(), config.offline_after_ms());
        let state = StateManager::new(db.clone(), config.snapshot_retention);
        let analyzer = Arc::new(RepositoryAnalyzer::new());
        let coordinator = SyncCoordinator::new(
            db,
            state.clone(),
            pools.clone(),
            analyzer.clone(),
            events.clone(),
            config.executor_timeout,
        );
        coordinator.recover().await?;

        let tokens = TokenIssuer::new(&config.token_secret, config.token_ttl);

        Ok(Self {
            config,
            pools,
            state,
            analyzer,
            coordinator,
            tokens,
            events,
        })
    }

    /// The configuration this engine was built with
    #[must_use]
    pub const fn config(&self) -> &CoreConfig {
        &self.config
    }

    /// Subscribe to push events (operation transitions, target changes)
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<CoreEvent> {
        self.events.subscribe()
    }

    // ------------------------------------------------------------------
    // Endpoint-facing contract (token-checked where mutating)
    // ------------------------------------------------------------------

    /// Register a new endpoint and issue its bearer token
    pub async fn register(
        &self,
        name: impl Into<String>,
        hostname: impl Into<String>,
    ) -> Result<Registration> {
        let endpoint = self.pools.register_endpoint(name, hostname).await?;
        let token = self.tokens.issue(&endpoint.id)?;
        Ok(Registration { endpoint, token })
    }

    /// Ingest an endpoint's periodic status report. Brings offline
    /// endpoints back and replays their queued operations in submission
    /// order; the replayed operations are returned.
    pub async fn report_status(
        &self,
        token: &str,
        endpoint_id: &EndpointId,
        report: StateReport,
    ) -> Result<Vec<SyncOperation>> {
        self.tokens.verify(token, endpoint_id)?;
        self.coordinator.record_report(endpoint_id, report).await
    }

    /// Replace an endpoint's listing for one repository and recompute
    /// its pool's compatibility analysis
    pub async fn submit_repositories(
        &self,
        token: &str,
        endpoint_id: &EndpointId,
        repo_name: impl Into<String>,
        packages: Vec<RepositoryPackage>,
    ) -> Result<Option<CompatibilityAnalysis>> {
        self.tokens.verify(token, endpoint_id)?;
        let endpoint = self.pools.get_endpoint(endpoint_id).await?;
        self.analyzer.submit(*endpoint_id, repo_name, packages).await;

        match endpoint.pool_id {
            None => Ok(None),
            Some(pool_id) => Ok(Some(self.analyze_pool(&pool_id).await?)),
        }
    }

    /// Request a sync operation for an endpoint
    pub async fn request_operation(
        &self,
        token: &str,
        endpoint_id: &EndpointId,
        kind: OperationKind,
    ) -> Result<SyncOperation> {
        self.tokens.verify(token, endpoint_id)?;
        self.coordinator.request_operation(endpoint_id, kind).await
    }

    /// Current view of an operation (status, plan, conflicts)
    pub async fn poll_operation(&self, operation_id: &OperationId) -> Result<SyncOperation> {
        self.coordinator.poll(operation_id).await
    }

    /// Executor completion callback for an in-progress operation
    pub async fn complete_operation(
        &self,
        token: &str,
        operation_id: &OperationId,
        resulting_packages: Vec<PackageEntry>,
        success: bool,
    ) -> Result<SyncOperation> {
        let operation = self.coordinator.poll(operation_id).await?;
        self.tokens.verify(token, &operation.endpoint_id)?;
        self.coordinator
            .complete_operation(operation_id, resulting_packages, success)
            .await
    }

    // ------------------------------------------------------------------
    // Administrative boundary (synchronous request/response)
    // ------------------------------------------------------------------

    /// Create a pool
    pub async fn create_pool(
        &self,
        name: impl Into<String>,
        description: impl Into<String>,
        policy: SyncPolicy,
    ) -> Result<Pool> {
        self.pools.create_pool(name, description, policy).await
    }

    /// Apply a partial update to a pool
    pub async fn update_pool(&self, id: &PoolId, update: PoolUpdate) -> Result<Pool> {
        self.pools.update_pool(id, update).await
    }

    /// Delete a pool, unassigning (not deleting) its members
    pub async fn delete_pool(&self, id: &PoolId) -> Result<()> {
        self.pools.delete_pool(id).await
    }

    /// Fetch a pool by id
    pub async fn get_pool(&self, id: &PoolId) -> Result<Pool> {
        self.pools.get_pool(id).await
    }

    /// Fetch a pool by name
    pub async fn get_pool_by_name(&self, name: &str) -> Result<Pool> {
        self.pools.get_pool_by_name(name).await
    }

    /// List pools
    pub async fn list_pools(&self) -> Result<Vec<Pool>> {
        self.pools.list_pools().await
    }

    /// Assign an unassigned endpoint to a pool
    pub async fn assign_endpoint(&self, endpoint_id: &EndpointId, pool_id: &PoolId) -> Result<()> {
        self.pools.assign_endpoint(endpoint_id, pool_id).await
    }

    /// Move an endpoint between pools atomically
    pub async fn move_endpoint(
        &self,
        endpoint_id: &EndpointId,
        from_pool: &PoolId,
        to_pool: &PoolId,
    ) -> Result<()> {
        self.pools.move_endpoint(endpoint_id, from_pool, to_pool).await
    }

    /// Soft-remove an endpoint and drop its repository listings
    pub async fn remove_endpoint(&self, endpoint_id: &EndpointId) -> Result<()> {
        self.pools.remove_endpoint(endpoint_id).await?;
        self.analyzer.forget_endpoint(endpoint_id).await;
        Ok(())
    }

    /// Fetch an endpoint by id
    pub async fn get_endpoint(&self, endpoint_id: &EndpointId) -> Result<Endpoint> {
        self.pools.get_endpoint(endpoint_id).await
    }

    /// List active endpoints
    pub async fn list_endpoints(&self) -> Result<Vec<Endpoint>> {
        self.pools.list_endpoints().await
    }

    /// Aggregate status of a pool
    pub async fn pool_status(&self, pool_id: &PoolId) -> Result<PoolStatus> {
        self.pools.pool_status(pool_id).await
    }

    /// Recompute (or fetch the still-valid) compatibility analysis for
    /// a pool
    pub async fn analyze_pool(&self, pool_id: &PoolId) -> Result<CompatibilityAnalysis> {
        let pool = self.pools.get_pool(pool_id).await?;
        let members = self.pools.list_members(pool_id).await?;
        let member_ids: Vec<EndpointId> = members.iter().map(|member| member.id).collect();
        Ok(self
            .analyzer
            .analyze(pool.id, &member_ids, pool.policy.include_aur)
            .await)
    }

    /// Latest cached compatibility analysis for a pool, if any
    pub async fn compatibility(&self, pool_id: &PoolId) -> Option<CompatibilityAnalysis> {
        self.analyzer.latest(pool_id).await
    }

    /// Make an existing snapshot the pool's target state
    pub async fn set_target_state(
        &self,
        pool_id: &PoolId,
        snapshot_id: &SnapshotId,
    ) -> Result<Vec<StatusChange>> {
        let changes = self.state.set_target_state(pool_id, snapshot_id).await?;
        let _ = self.events.send(CoreEvent::TargetChanged {
            pool_id: *pool_id,
            target_state_id: *snapshot_id,
            changes: changes.clone(),
        });
        Ok(changes)
    }

    /// Fetch a snapshot by id
    pub async fn get_snapshot(&self, id: &SnapshotId) -> Result<SystemState> {
        self.state.get_snapshot(id).await
    }

    /// List an endpoint's snapshots, newest first
    pub async fn list_snapshots(
        &self,
        endpoint_id: &EndpointId,
        limit: usize,
    ) -> Result<Vec<SystemState>> {
        self.state.list_snapshots(endpoint_id, limit).await
    }

    /// List an endpoint's operations, newest first
    pub async fn list_operations(
        &self,
        endpoint_id: &EndpointId,
        limit: usize,
    ) -> Result<Vec<SyncOperation>> {
        self.coordinator.list_operations(endpoint_id, limit).await
    }

    /// Cancel a pending operation
    pub async fn cancel_operation(&self, operation_id: &OperationId) -> Result<SyncOperation> {
        self.coordinator.cancel(operation_id).await
    }

    /// Sweep endpoints past the heartbeat window into `offline`.
    ///
    /// The host is expected to call this on a timer; queries do not
    /// sweep implicitly.
    pub async fn sweep_offline(&self) -> Result<Vec<StatusChange>> {
        self.pools.mark_stale_endpoints().await
    }
}
