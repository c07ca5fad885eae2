//! Error types for the pool

use thiserror::Error;

/// Boxed error produced by user-supplied allocators and handlers.
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

#[derive(Error, Debug)]
pub enum PoolError {
    #[error("pool has been shut down")]
    Shutdown,

    #[error("resource allocation failed")]
    Allocation(#[source] BoxError),

    #[error("release handler failed")]
    ReleaseHandler(#[source] BoxError),
}

pub type PoolResult<T> = Result<T, PoolError>;
