//! Artifact repository implementations.
//!
//! The engine only ever talks to [`ArtifactRepository`]; these are the two
//! bundled implementations. `SqliteArtifactRepository` is the durable one
//! (WAL mode, indexed by kind and session). `MemoryArtifactRepository` backs
//! tests and embedded hosts that do not need durability.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Mutex;

use chrono::Local;
use rusqlite::{params, Connection, OptionalExtension};
use serde_json::Value;
use story_engine_sdk::{
    async_trait, ArtifactKind, ArtifactRepository, Fields, RepositoryError,
};
use uuid::Uuid;

fn storage_err(e: impl std::fmt::Display) -> RepositoryError {
    RepositoryError::Storage(e.to_string())
}

// ============================================================================
// SQLite
// ============================================================================

/// SQLite-backed artifact store.
///
/// All access goes through one connection behind a mutex; every operation
/// is a single short statement, so lock hold times stay negligible next to
/// the capability calls around them.
pub struct SqliteArtifactRepository {
    conn: Mutex<Connection>,
}

impl SqliteArtifactRepository {
    pub fn new(path: PathBuf) -> Result<Self, RepositoryError> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent).map_err(storage_err)?;
            }
        }
        let conn = Connection::open(path).map_err(storage_err)?;
        conn.pragma_update(None, "journal_mode", "WAL")
            .map_err(storage_err)?;
        let repo = Self {
            conn: Mutex::new(conn),
        };
        repo.initialize_schema()?;
        Ok(repo)
    }

    /// In-memory SQLite database, useful for tests.
    pub fn open_in_memory() -> Result<Self, RepositoryError> {
        let conn = Connection::open_in_memory().map_err(storage_err)?;
        let repo = Self {
            conn: Mutex::new(conn),
        };
        repo.initialize_schema()?;
        Ok(repo)
    }

    fn initialize_schema(&self) -> Result<(), RepositoryError> {
        let conn = self.conn.lock().expect("repository lock poisoned");
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS artifacts (
                id          TEXT PRIMARY KEY,
                kind        TEXT NOT NULL,
                session_id  TEXT NOT NULL,
                user_id     TEXT NOT NULL,
                fields      TEXT NOT NULL,
                parent_refs TEXT NOT NULL,
                created_at  TEXT NOT NULL,
                updated_at  TEXT NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_artifacts_kind ON artifacts(kind);
            CREATE INDEX IF NOT EXISTS idx_artifacts_session ON artifacts(session_id);",
        )
        .map_err(storage_err)
    }
}

#[async_trait]
impl ArtifactRepository for SqliteArtifactRepository {
    async fn save(
        &self,
        kind: ArtifactKind,
        fields: &Fields,
        session_id: &str,
        user_id: &str,
        parent_refs: &HashMap<String, Value>,
    ) -> Result<Uuid, RepositoryError> {
        let id = Uuid::new_v4();
        let now = Local::now().to_rfc3339();
        let fields_json = serde_json::to_string(fields).map_err(storage_err)?;
        let refs_json = serde_json::to_string(parent_refs).map_err(storage_err)?;

        let conn = self.conn.lock().expect("repository lock poisoned");
        conn.execute(
            "INSERT INTO artifacts (id, kind, session_id, user_id, fields, parent_refs, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?7)",
            params![
                id.to_string(),
                kind.as_str(),
                session_id,
                user_id,
                fields_json,
                refs_json,
                now
            ],
        )
        .map_err(storage_err)?;
        Ok(id)
    }

    async fn get_by_id(
        &self,
        kind: ArtifactKind,
        id: &str,
    ) -> Result<Option<Fields>, RepositoryError> {
        let conn = self.conn.lock().expect("repository lock poisoned");
        let fields_json: Option<String> = conn
            .query_row(
                "SELECT fields FROM artifacts WHERE id = ?1 AND kind = ?2",
                params![id, kind.as_str()],
                |row| row.get(0),
            )
            .optional()
            .map_err(storage_err)?;

        match fields_json {
            Some(json) => serde_json::from_str(&json).map(Some).map_err(storage_err),
            None => Ok(None),
        }
    }

    async fn update(
        &self,
        kind: ArtifactKind,
        id: &str,
        fields: &Fields,
    ) -> Result<(), RepositoryError> {
        let fields_json = serde_json::to_string(fields).map_err(storage_err)?;
        let now = Local::now().to_rfc3339();

        let conn = self.conn.lock().expect("repository lock poisoned");
        let updated = conn
            .execute(
                "UPDATE artifacts SET fields = ?1, updated_at = ?2 WHERE id = ?3 AND kind = ?4",
                params![fields_json, now, id, kind.as_str()],
            )
            .map_err(storage_err)?;
        if updated == 0 {
            return Err(RepositoryError::NotFound {
                kind,
                id: id.to_string(),
            });
        }
        Ok(())
    }
}

// ============================================================================
// In-memory
// ============================================================================

#[derive(Debug, Clone)]
struct StoredArtifact {
    fields: Fields,
    parent_refs: HashMap<String, Value>,
}

/// In-memory artifact store for tests and embedded hosts.
#[derive(Default)]
pub struct MemoryArtifactRepository {
    artifacts: Mutex<HashMap<(ArtifactKind, String), StoredArtifact>>,
}

impl MemoryArtifactRepository {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed an artifact under a known id (test setup).
    pub fn insert(&self, kind: ArtifactKind, id: impl Into<String>, fields: Fields) {
        self.artifacts.lock().unwrap().insert(
            (kind, id.into()),
            StoredArtifact {
                fields,
                parent_refs: HashMap::new(),
            },
        );
    }

    /// Parent refs recorded at save time (test inspection).
    pub fn parent_refs(&self, kind: ArtifactKind, id: &str) -> Option<HashMap<String, Value>> {
        self.artifacts
            .lock()
            .unwrap()
            .get(&(kind, id.to_string()))
            .map(|a| a.parent_refs.clone())
    }

    /// Ids currently stored for a kind (test inspection).
    pub fn ids_of_kind(&self, kind: ArtifactKind) -> Vec<String> {
        self.artifacts
            .lock()
            .unwrap()
            .keys()
            .filter(|(k, _)| *k == kind)
            .map(|(_, id)| id.clone())
            .collect()
    }
}

#[async_trait]
impl ArtifactRepository for MemoryArtifactRepository {
    async fn save(
        &self,
        kind: ArtifactKind,
        fields: &Fields,
        _session_id: &str,
        _user_id: &str,
        parent_refs: &HashMap<String, Value>,
    ) -> Result<Uuid, RepositoryError> {
        let id = Uuid::new_v4();
        self.artifacts.lock().unwrap().insert(
            (kind, id.to_string()),
            StoredArtifact {
                fields: fields.clone(),
                parent_refs: parent_refs.clone(),
            },
        );
        Ok(id)
    }

    async fn get_by_id(
        &self,
        kind: ArtifactKind,
        id: &str,
    ) -> Result<Option<Fields>, RepositoryError> {
        Ok(self
            .artifacts
            .lock()
            .unwrap()
            .get(&(kind, id.to_string()))
            .map(|a| a.fields.clone()))
    }

    async fn update(
        &self,
        kind: ArtifactKind,
        id: &str,
        fields: &Fields,
    ) -> Result<(), RepositoryError> {
        let mut artifacts = self.artifacts.lock().unwrap();
        match artifacts.get_mut(&(kind, id.to_string())) {
            Some(stored) => {
                stored.fields = fields.clone();
                Ok(())
            }
            None => Err(RepositoryError::NotFound {
                kind,
                id: id.to_string(),
            }),
        }
    }
}
