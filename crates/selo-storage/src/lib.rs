//! Storage abstraction for selo.
//!
//! Backend crates (e.g., selo-store-sqlite) implement this trait so the
//! service layer doesn't depend on any specific database engine or schema
//! details.

use thiserror::Error;

pub mod store;
pub mod types;

// Re-export the Store trait from the store module
pub use store::Store;

// Re-export all types from the types module
pub use types::*;

/// Uniform error type for all storage backends.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("not found")]
    NotFound,
    #[error("already exists")]
    AlreadyExists,
    #[error("conflict")]
    Conflict,
    #[error("entity is in a terminal state")]
    Terminal,
    #[error("backend error: {0}")]
    Backend(String),
}
