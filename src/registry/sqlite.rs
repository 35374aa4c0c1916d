//! SQLite ad registry

use super::AdRegistry;
use crate::error::{EngineError, Result};
use crate::sqlite_pragma::open_tuned;
use crate::types::{AdMetadata, SubjectId, Targeting};
use async_trait::async_trait;
use rusqlite::{params, Connection, OptionalExtension};
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Duration;

pub struct SqliteAdRegistry {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteAdRegistry {
    pub fn open(db_path: impl AsRef<Path>, busy_timeout: Duration) -> Result<Self> {
        Self::with_connection(open_tuned(db_path, busy_timeout)?)
    }

    pub fn open_in_memory() -> Result<Self> {
        Self::with_connection(Connection::open_in_memory()?)
    }

    fn with_connection(conn: Connection) -> Result<Self> {
        conn.execute(
            "CREATE TABLE IF NOT EXISTS ad_metadata (
                subject_id      TEXT PRIMARY KEY,
                owner           TEXT NOT NULL,
                targeting_json  TEXT NOT NULL,
                created_at      INTEGER NOT NULL
            )",
            [],
        )?;
        log::info!("✅ Ad registry initialized");
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }
}

#[async_trait]
impl AdRegistry for SqliteAdRegistry {
    async fn register(&self, metadata: AdMetadata) -> Result<()> {
        if metadata.owner.trim().is_empty() {
            return Err(EngineError::Validation("owner must not be empty".to_string()));
        }
        metadata.targeting.validate()?;

        let targeting_json = serde_json::to_string(&metadata.targeting)?;

        let conn = self.conn.lock()?;
        let inserted = conn.execute(
            "INSERT OR IGNORE INTO ad_metadata (subject_id, owner, targeting_json, created_at)
             VALUES (?1, ?2, ?3, ?4)",
            params![
                metadata.subject.to_string(),
                metadata.owner,
                targeting_json,
                chrono::Utc::now().timestamp_millis(),
            ],
        )?;

        if inserted == 0 {
            log::warn!("Rejected re-registration of {}", metadata.subject);
            return Err(EngineError::AlreadyExists);
        }

        log::info!("📝 Registered ad {} for {}", metadata.subject, metadata.owner);
        Ok(())
    }

    async fn lookup(&self, subject: SubjectId) -> Result<Option<AdMetadata>> {
        let row: Option<(String, String)> = {
            let conn = self.conn.lock()?;
            let row = conn
                .query_row(
                    "SELECT owner, targeting_json FROM ad_metadata WHERE subject_id = ?1",
                    params![subject.to_string()],
                    |row| Ok((row.get(0)?, row.get(1)?)),
                )
                .optional()?;
            row
        };

        match row {
            Some((owner, targeting_json)) => {
                let targeting: Targeting = serde_json::from_str(&targeting_json)?;
                Ok(Some(AdMetadata { subject, owner, targeting }))
            }
            None => Ok(None),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn metadata(subject: SubjectId, owner: &str) -> AdMetadata {
        AdMetadata {
            subject,
            owner: owner.to_string(),
            targeting: Targeting {
                town: Some("Novi Sad".to_string()),
                min_age: Some(18),
                max_age: Some(35),
                gender: Some("F".to_string()),
            },
        }
    }

    #[tokio::test]
    async fn test_register_then_lookup() {
        let registry = SqliteAdRegistry::open_in_memory().unwrap();
        let subject = SubjectId::new_random();

        registry.register(metadata(subject, "alice")).await.unwrap();

        let found = registry.lookup(subject).await.unwrap().unwrap();
        assert_eq!(found, metadata(subject, "alice"));
    }

    #[tokio::test]
    async fn test_second_registration_cannot_change_owner() {
        let registry = SqliteAdRegistry::open_in_memory().unwrap();
        let subject = SubjectId::new_random();

        registry.register(metadata(subject, "alice")).await.unwrap();
        let result = registry.register(metadata(subject, "mallory")).await;

        assert!(matches!(result, Err(EngineError::AlreadyExists)));
        assert_eq!(registry.lookup(subject).await.unwrap().unwrap().owner, "alice");
    }

    #[tokio::test]
    async fn test_lookup_unknown_subject() {
        let registry = SqliteAdRegistry::open_in_memory().unwrap();
        assert!(registry.lookup(SubjectId::new_random()).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_register_validates_input() {
        let registry = SqliteAdRegistry::open_in_memory().unwrap();
        let subject = SubjectId::new_random();

        let mut blank_owner = metadata(subject, "  ");
        assert!(matches!(
            registry.register(blank_owner.clone()).await,
            Err(EngineError::Validation(_))
        ));

        blank_owner.owner = "alice".to_string();
        blank_owner.targeting.min_age = Some(50);
        assert!(matches!(
            registry.register(blank_owner).await,
            Err(EngineError::Validation(_))
        ));

        // nothing was stored by the rejected calls
        assert!(registry.lookup(subject).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_registration_persists_on_disk() {
        let dir = tempdir().unwrap();
        let db_path = dir.path().join("ads.db");
        let subject = SubjectId::new_random();

        {
            let registry = SqliteAdRegistry::open(&db_path, Duration::from_secs(1)).unwrap();
            registry.register(metadata(subject, "alice")).await.unwrap();
        }

        let registry = SqliteAdRegistry::open(&db_path, Duration::from_secs(1)).unwrap();
        assert_eq!(registry.lookup(subject).await.unwrap().unwrap().owner, "alice");
    }
}
