//! The refresh pipeline
//!
//! - [`reconcile`] turns fetched rows into upsert operations
//! - [`coordinator`] runs fetch, commit and summary under a single-flight guard
//! - [`error`] holds the failure taxonomy of a refresh attempt

pub mod coordinator;
pub mod error;
pub mod reconcile;

pub use coordinator::{RefreshCoordinator, RefreshOutcome, RefreshPhase};
pub use error::{RefreshError, RefreshResult};
pub use reconcile::{reconcile, ExistingIndex, ReconcilePlan, UpsertOp};
