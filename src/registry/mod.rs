//! Ad Registry
//!
//! Write-once mapping from subject to owner and targeting criteria. A second
//! registration for the same subject is rejected, never applied, so ownership
//! cannot be taken over after the fact.

pub mod sqlite;

pub use sqlite::SqliteAdRegistry;

use crate::error::Result;
use crate::types::{AdMetadata, SubjectId};
use async_trait::async_trait;

#[async_trait]
pub trait AdRegistry: Send + Sync {
    /// Register metadata for a subject
    ///
    /// # Returns
    /// * `Ok(())` - Stored
    /// * `Err(EngineError::AlreadyExists)` - Subject already registered (record untouched)
    /// * `Err(EngineError::Validation(..))` - Empty owner or inconsistent targeting
    async fn register(&self, metadata: AdMetadata) -> Result<()>;

    /// `Ok(None)` when the subject was never registered
    async fn lookup(&self, subject: SubjectId) -> Result<Option<AdMetadata>>;
}
