//! packherd-core - Core library for packherd
//!
//! This crate contains the shared models, persistence layer, and the
//! synchronization engine that keeps pools of endpoints converged on an
//! agreed-upon package set. Transport, UI, and the package-operation
//! executor live outside this crate and talk to it through [`Engine`].

pub mod analyzer;
pub mod auth;
pub mod config;
pub mod db;
pub mod engine;
pub mod error;
pub mod models;
pub mod pool;
pub mod state;
pub mod sync;
pub mod util;

pub use config::CoreConfig;
pub use engine::{Engine, Registration, StateReport};
pub use error::{Error, Result};
pub use models::{Endpoint, EndpointId, Pool, PoolId, SnapshotId, SystemState};
