//! Data model for packherd
//!
//! Value types are immutable by convention: mutation happens by writing
//! new rows/snapshots through the stores, never by editing in place.
//! Pool/endpoint relations are id-based; there are no back-pointers.

mod conflict;
mod endpoint;
mod event;
mod operation;
mod pool;
mod snapshot;

pub use conflict::{ConflictKind, SyncConflict};
pub use endpoint::{Endpoint, EndpointId, SyncStatus};
pub use event::{CoreEvent, StatusChange};
pub use operation::{
    ActionKind, OperationDetail, OperationId, OperationKind, OperationStatus, PackageAction,
    SyncOperation,
};
pub use pool::{
    ConflictResolution, OverallStatus, Pool, PoolId, PoolStatus, SyncPolicy,
};
pub use snapshot::{CompatibilityAnalysis, PackageEntry, RepositoryPackage, SnapshotId, SystemState};
