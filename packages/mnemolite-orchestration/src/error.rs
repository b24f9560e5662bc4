//! This crate converges on the one engine-wide error taxonomy (spec §7)
//! instead of defining its own; re-exported so call sites can write
//! `crate::error::Result` as they would for any other error type.

pub use mnemolite_storage::error::{EngineError, Result};
