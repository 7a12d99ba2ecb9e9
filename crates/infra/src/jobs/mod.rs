//! Durable job records and their lifecycle operations.

pub mod store;

#[cfg(feature = "redis")]
pub mod redis_store;

pub use store::{InMemoryJobStore, JobStats, JobStore, JobStoreError};

#[cfg(feature = "redis")]
pub use redis_store::RedisJobStore;
