//! Storage backends implementing `StorageGateway`.

#[cfg(feature = "sqlite")]
pub mod sqlite;

#[cfg(feature = "postgres")]
pub mod postgres;

pub mod trigram;
pub mod vector_math;
