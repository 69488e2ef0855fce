//! SQLite document store

use async_trait::async_trait;
use chrono::Utc;
use docsign_core::{
    store::created_details, ArtifactPointer, AuditAction, AuditLogEntry, CommitReceipt, Document,
    DocumentStore, DocumentVersion, SignedCommit, StoreError,
};
use sqlx::sqlite::{SqliteConnection, SqlitePool};

use crate::models::{DbAuditEntry, DbDocument, DbPendingCommit, DbVersion};

pub async fn run_migrations(pool: &SqlitePool) -> Result<(), sqlx::Error> {
    tracing::info!("Running database migrations...");

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS documents (
            id TEXT PRIMARY KEY,
            owner TEXT NOT NULL,
            title TEXT NOT NULL,
            status TEXT NOT NULL DEFAULT 'draft'
                CHECK (status IN ('draft', 'completed', 'rejected')),
            created_at TEXT NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE INDEX IF NOT EXISTS idx_documents_owner ON documents(owner, created_at)
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS document_versions (
            document_id TEXT NOT NULL REFERENCES documents(id),
            version_number INTEGER NOT NULL CHECK (version_number >= 1),
            artifact_pointer TEXT NOT NULL UNIQUE,
            created_by TEXT NOT NULL,
            created_at TEXT NOT NULL,
            PRIMARY KEY (document_id, version_number)
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS audit_log (
            id TEXT PRIMARY KEY,
            document_id TEXT NOT NULL REFERENCES documents(id),
            sequence INTEGER NOT NULL,
            action TEXT NOT NULL,
            version_number INTEGER,
            details TEXT NOT NULL,
            created_at TEXT NOT NULL,
            previous_hash TEXT,
            entry_hash TEXT NOT NULL,
            UNIQUE (document_id, sequence)
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS pending_commits (
            artifact_pointer TEXT PRIMARY KEY,
            document_id TEXT NOT NULL REFERENCES documents(id),
            expected_previous INTEGER NOT NULL,
            created_by TEXT NOT NULL,
            audit_details TEXT NOT NULL,
            created_at TEXT NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    tracing::info!("Migrations complete");
    Ok(())
}

fn backend(err: sqlx::Error) -> StoreError {
    StoreError::Backend(err.to_string())
}

fn is_unique_violation(err: &sqlx::Error) -> bool {
    matches!(err, sqlx::Error::Database(db) if db.is_unique_violation())
}

pub struct SqliteDocumentStore {
    pool: SqlitePool,
}

impl SqliteDocumentStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}

async fn fetch_document(
    conn: &mut SqliteConnection,
    document_id: &str,
) -> Result<Option<Document>, StoreError> {
    let row: Option<DbDocument> = sqlx::query_as(
        "SELECT id, owner, title, status, created_at FROM documents WHERE id = ?",
    )
    .bind(document_id)
    .fetch_optional(&mut *conn)
    .await
    .map_err(backend)?;
    row.map(Document::try_from)
        .transpose()
        .map_err(StoreError::Backend)
}

async fn fetch_latest_version(
    conn: &mut SqliteConnection,
    document_id: &str,
) -> Result<Option<DocumentVersion>, StoreError> {
    let row: Option<DbVersion> = sqlx::query_as(
        r#"
        SELECT document_id, version_number, artifact_pointer, created_by, created_at
        FROM document_versions
        WHERE document_id = ?
        ORDER BY version_number DESC
        LIMIT 1
        "#,
    )
    .bind(document_id)
    .fetch_optional(&mut *conn)
    .await
    .map_err(backend)?;
    row.map(DocumentVersion::try_from)
        .transpose()
        .map_err(StoreError::Backend)
}

async fn fetch_version_by_pointer(
    conn: &mut SqliteConnection,
    pointer: &ArtifactPointer,
) -> Result<Option<DocumentVersion>, StoreError> {
    let row: Option<DbVersion> = sqlx::query_as(
        r#"
        SELECT document_id, version_number, artifact_pointer, created_by, created_at
        FROM document_versions
        WHERE artifact_pointer = ?
        "#,
    )
    .bind(pointer.as_str())
    .fetch_optional(&mut *conn)
    .await
    .map_err(backend)?;
    row.map(DocumentVersion::try_from)
        .transpose()
        .map_err(StoreError::Backend)
}

async fn fetch_last_audit_entry(
    conn: &mut SqliteConnection,
    document_id: &str,
) -> Result<Option<AuditLogEntry>, StoreError> {
    let row: Option<DbAuditEntry> = sqlx::query_as(
        r#"
        SELECT id, document_id, sequence, action, version_number, details, created_at,
               previous_hash, entry_hash
        FROM audit_log
        WHERE document_id = ?
        ORDER BY sequence DESC
        LIMIT 1
        "#,
    )
    .bind(document_id)
    .fetch_optional(&mut *conn)
    .await
    .map_err(backend)?;
    row.map(AuditLogEntry::try_from)
        .transpose()
        .map_err(StoreError::Backend)
}

async fn fetch_signed_entry(
    conn: &mut SqliteConnection,
    document_id: &str,
    version_number: u32,
) -> Result<Option<AuditLogEntry>, StoreError> {
    let row: Option<DbAuditEntry> = sqlx::query_as(
        r#"
        SELECT id, document_id, sequence, action, version_number, details, created_at,
               previous_hash, entry_hash
        FROM audit_log
        WHERE document_id = ? AND action = ? AND version_number = ?
        "#,
    )
    .bind(document_id)
    .bind(AuditAction::Signed.as_str())
    .bind(version_number as i64)
    .fetch_optional(&mut *conn)
    .await
    .map_err(backend)?;
    row.map(AuditLogEntry::try_from)
        .transpose()
        .map_err(StoreError::Backend)
}

async fn insert_version(
    conn: &mut SqliteConnection,
    version: &DocumentVersion,
) -> Result<(), sqlx::Error> {
    sqlx::query(
        r#"
        INSERT INTO document_versions (document_id, version_number, artifact_pointer, created_by, created_at)
        VALUES (?, ?, ?, ?, ?)
        "#,
    )
    .bind(&version.document_id)
    .bind(version.version_number as i64)
    .bind(version.artifact_pointer.as_str())
    .bind(&version.created_by)
    .bind(version.created_at)
    .execute(&mut *conn)
    .await?;
    Ok(())
}

async fn insert_audit_entry(
    conn: &mut SqliteConnection,
    entry: &AuditLogEntry,
) -> Result<(), sqlx::Error> {
    sqlx::query(
        r#"
        INSERT INTO audit_log (id, document_id, sequence, action, version_number, details,
                               created_at, previous_hash, entry_hash)
        VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(&entry.id)
    .bind(&entry.document_id)
    .bind(entry.sequence as i64)
    .bind(entry.action.as_str())
    .bind(entry.version_number.map(i64::from))
    .bind(&entry.details)
    .bind(entry.created_at)
    .bind(&entry.previous_hash)
    .bind(&entry.entry_hash)
    .execute(&mut *conn)
    .await?;
    Ok(())
}

/// Body of a signed commit, run inside an open write transaction
async fn apply_signed_commit(
    conn: &mut SqliteConnection,
    commit: &SignedCommit,
) -> Result<CommitReceipt, StoreError> {
    let document = fetch_document(conn, &commit.document_id)
        .await?
        .ok_or_else(|| StoreError::DocumentNotFound(commit.document_id.clone()))?;

    if let Some(existing) = fetch_version_by_pointer(conn, &commit.artifact_pointer).await? {
        if existing.document_id != commit.document_id {
            return Err(StoreError::PointerInUse(commit.artifact_pointer.clone()));
        }
        let audit_entry = fetch_signed_entry(conn, &commit.document_id, existing.version_number)
            .await?
            .ok_or_else(|| StoreError::PointerInUse(commit.artifact_pointer.clone()))?;
        return Ok(CommitReceipt {
            version: existing,
            status: document.status,
            audit_entry,
            replayed: true,
        });
    }

    let previous = fetch_latest_version(conn, &commit.document_id)
        .await?
        .ok_or_else(|| {
            StoreError::Backend(format!("document {} has no versions", commit.document_id))
        })?;
    if previous.version_number != commit.expected_previous {
        return Err(StoreError::VersionConflict {
            document_id: commit.document_id.clone(),
            expected: commit.expected_previous,
            actual: previous.version_number,
        });
    }
    let status = document.status.after_signing()?;

    let version = previous.successor(commit.artifact_pointer.clone(), &commit.created_by);
    if let Err(err) = insert_version(conn, &version).await {
        return Err(if is_unique_violation(&err) {
            match fetch_latest_version(conn, &commit.document_id).await? {
                Some(latest) if latest.version_number != commit.expected_previous => {
                    StoreError::VersionConflict {
                        document_id: commit.document_id.clone(),
                        expected: commit.expected_previous,
                        actual: latest.version_number,
                    }
                }
                _ => StoreError::PointerInUse(commit.artifact_pointer.clone()),
            }
        } else {
            backend(err)
        });
    }

    let last_entry = fetch_last_audit_entry(conn, &commit.document_id).await?;
    let audit_entry = AuditLogEntry::next(
        last_entry.as_ref(),
        &commit.document_id,
        AuditAction::Signed,
        Some(version.version_number),
        commit.audit_details.clone(),
    );
    insert_audit_entry(conn, &audit_entry)
        .await
        .map_err(backend)?;

    sqlx::query("UPDATE documents SET status = ? WHERE id = ?")
        .bind(status.as_str())
        .bind(&commit.document_id)
        .execute(&mut *conn)
        .await
        .map_err(backend)?;

    Ok(CommitReceipt {
        version,
        status,
        audit_entry,
        replayed: false,
    })
}

#[async_trait]
impl DocumentStore for SqliteDocumentStore {
    async fn create_document(
        &self,
        document: &Document,
        first_version: &DocumentVersion,
    ) -> Result<AuditLogEntry, StoreError> {
        let mut tx = self.pool.begin().await.map_err(backend)?;

        sqlx::query(
            r#"
            INSERT INTO documents (id, owner, title, status, created_at)
            VALUES (?, ?, ?, ?, ?)
            "#,
        )
        .bind(&document.id)
        .bind(&document.owner)
        .bind(&document.title)
        .bind(document.status.as_str())
        .bind(document.created_at)
        .execute(&mut *tx)
        .await
        .map_err(backend)?;

        insert_version(&mut tx, first_version)
            .await
            .map_err(|err| {
                if is_unique_violation(&err) {
                    StoreError::PointerInUse(first_version.artifact_pointer.clone())
                } else {
                    backend(err)
                }
            })?;

        let entry = AuditLogEntry::next(
            None,
            &document.id,
            AuditAction::Created,
            Some(first_version.version_number),
            created_details(&document.title),
        );
        insert_audit_entry(&mut tx, &entry).await.map_err(backend)?;

        tx.commit().await.map_err(backend)?;
        Ok(entry)
    }

    async fn get_document(&self, document_id: &str) -> Result<Option<Document>, StoreError> {
        let mut conn = self.pool.acquire().await.map_err(backend)?;
        fetch_document(&mut conn, document_id).await
    }

    async fn list_documents(&self, owner: &str) -> Result<Vec<Document>, StoreError> {
        let rows: Vec<DbDocument> = sqlx::query_as(
            r#"
            SELECT id, owner, title, status, created_at
            FROM documents
            WHERE owner = ?
            ORDER BY created_at DESC, id DESC
            "#,
        )
        .bind(owner)
        .fetch_all(&self.pool)
        .await
        .map_err(backend)?;
        rows.into_iter()
            .map(|row| Document::try_from(row).map_err(StoreError::Backend))
            .collect()
    }

    async fn latest_version(
        &self,
        document_id: &str,
    ) -> Result<Option<DocumentVersion>, StoreError> {
        let mut conn = self.pool.acquire().await.map_err(backend)?;
        fetch_latest_version(&mut conn, document_id).await
    }

    async fn versions(&self, document_id: &str) -> Result<Vec<DocumentVersion>, StoreError> {
        let rows: Vec<DbVersion> = sqlx::query_as(
            r#"
            SELECT document_id, version_number, artifact_pointer, created_by, created_at
            FROM document_versions
            WHERE document_id = ?
            ORDER BY version_number ASC
            "#,
        )
        .bind(document_id)
        .fetch_all(&self.pool)
        .await
        .map_err(backend)?;
        rows.into_iter()
            .map(|row| DocumentVersion::try_from(row).map_err(StoreError::Backend))
            .collect()
    }

    async fn version_by_pointer(
        &self,
        pointer: &ArtifactPointer,
    ) -> Result<Option<DocumentVersion>, StoreError> {
        let mut conn = self.pool.acquire().await.map_err(backend)?;
        fetch_version_by_pointer(&mut conn, pointer).await
    }

    async fn audit_log(&self, document_id: &str) -> Result<Vec<AuditLogEntry>, StoreError> {
        let rows: Vec<DbAuditEntry> = sqlx::query_as(
            r#"
            SELECT id, document_id, sequence, action, version_number, details, created_at,
                   previous_hash, entry_hash
            FROM audit_log
            WHERE document_id = ?
            ORDER BY sequence ASC
            "#,
        )
        .bind(document_id)
        .fetch_all(&self.pool)
        .await
        .map_err(backend)?;
        rows.into_iter()
            .map(|row| AuditLogEntry::try_from(row).map_err(StoreError::Backend))
            .collect()
    }

    async fn record_pending(&self, commit: &SignedCommit) -> Result<(), StoreError> {
        let mut conn = self.pool.acquire().await.map_err(backend)?;
        if fetch_document(&mut conn, &commit.document_id).await?.is_none() {
            return Err(StoreError::DocumentNotFound(commit.document_id.clone()));
        }

        sqlx::query(
            r#"
            INSERT INTO pending_commits (artifact_pointer, document_id, expected_previous,
                                         created_by, audit_details, created_at)
            VALUES (?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(commit.artifact_pointer.as_str())
        .bind(&commit.document_id)
        .bind(commit.expected_previous as i64)
        .bind(&commit.created_by)
        .bind(&commit.audit_details)
        .bind(Utc::now())
        .execute(&mut *conn)
        .await
        .map_err(|err| {
            if is_unique_violation(&err) {
                StoreError::PointerInUse(commit.artifact_pointer.clone())
            } else {
                backend(err)
            }
        })?;
        Ok(())
    }

    async fn pending_commit(
        &self,
        pointer: &ArtifactPointer,
    ) -> Result<Option<SignedCommit>, StoreError> {
        let row: Option<DbPendingCommit> = sqlx::query_as(
            r#"
            SELECT artifact_pointer, document_id, expected_previous, created_by, audit_details
            FROM pending_commits
            WHERE artifact_pointer = ?
            "#,
        )
        .bind(pointer.as_str())
        .fetch_optional(&self.pool)
        .await
        .map_err(backend)?;
        row.map(SignedCommit::try_from)
            .transpose()
            .map_err(StoreError::Backend)
    }

    async fn commit_signed_version(
        &self,
        commit: &SignedCommit,
    ) -> Result<CommitReceipt, StoreError> {
        // Take the write lock up front so the version check and the insert
        // see the same chain. Dropping the transaction rolls it back.
        let mut tx = self
            .pool
            .begin_with("BEGIN IMMEDIATE")
            .await
            .map_err(backend)?;

        let receipt = apply_signed_commit(&mut tx, commit).await?;
        if receipt.replayed {
            tx.rollback().await.map_err(backend)?;
            return Ok(receipt);
        }

        tx.commit().await.map_err(backend)?;
        tracing::debug!(
            document_id = %commit.document_id,
            version = receipt.version.version_number,
            "Signed version persisted"
        );
        Ok(receipt)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use docsign_core::DocumentStatus;
    use pretty_assertions::assert_eq;
    use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions};
    use std::sync::Arc;
    use std::time::Duration;

    async fn store() -> SqliteDocumentStore {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .unwrap();
        run_migrations(&pool).await.unwrap();
        SqliteDocumentStore::new(pool)
    }

    async fn seeded() -> (SqliteDocumentStore, Document) {
        let store = store().await;
        let document = Document::new_draft("alice", "lease.pdf");
        let first = DocumentVersion::first(
            &document.id,
            ArtifactPointer::for_upload("alice"),
            "alice",
        );
        store.create_document(&document, &first).await.unwrap();
        (store, document)
    }

    fn signed(document_id: &str, expected_previous: u32) -> SignedCommit {
        SignedCommit {
            document_id: document_id.to_string(),
            expected_previous,
            artifact_pointer: ArtifactPointer::for_signed("alice", document_id),
            created_by: "alice".to_string(),
            audit_details: format!("Signed version {}", expected_previous + 1),
        }
    }

    #[tokio::test]
    async fn test_create_document_round_trips() {
        let (store, document) = seeded().await;

        let stored = store.get_document(&document.id).await.unwrap().unwrap();
        assert_eq!(stored.title, "lease.pdf");
        assert_eq!(stored.status, DocumentStatus::Draft);
        assert_eq!(stored.created_at, document.created_at);

        let log = store.audit_log(&document.id).await.unwrap();
        assert_eq!(log.len(), 1);
        assert_eq!(log[0].action, AuditAction::Created);
        assert_eq!(log[0].version_number, Some(1));
        assert_eq!(log[0].entry_hash, log[0].compute_hash());
    }

    #[tokio::test]
    async fn test_signed_commit_is_atomic_and_chained() {
        let (store, document) = seeded().await;

        let receipt = store
            .commit_signed_version(&signed(&document.id, 1))
            .await
            .unwrap();

        assert_eq!(receipt.version.version_number, 2);
        assert_eq!(receipt.status, DocumentStatus::Completed);
        let log = store.audit_log(&document.id).await.unwrap();
        assert_eq!(log.len(), 2);
        assert_eq!(log[1].previous_hash.as_deref(), Some(log[0].entry_hash.as_str()));
        assert_eq!(log[1], receipt.audit_entry);
        let trail = docsign_core::AuditTrail::from_entries(&document.id, log);
        assert!(trail.verify().is_ok());
    }

    #[tokio::test]
    async fn test_conflict_leaves_no_partial_write() {
        let (store, document) = seeded().await;
        store
            .commit_signed_version(&signed(&document.id, 1))
            .await
            .unwrap();

        let err = store
            .commit_signed_version(&signed(&document.id, 1))
            .await
            .unwrap_err();

        assert_eq!(
            err,
            StoreError::VersionConflict {
                document_id: document.id.clone(),
                expected: 1,
                actual: 2,
            }
        );
        assert_eq!(store.versions(&document.id).await.unwrap().len(), 2);
        assert_eq!(store.audit_log(&document.id).await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_replayed_commit_returns_original_receipt() {
        let (store, document) = seeded().await;
        let commit = signed(&document.id, 1);
        let first = store.commit_signed_version(&commit).await.unwrap();

        let again = store.commit_signed_version(&commit).await.unwrap();

        assert!(again.replayed);
        assert_eq!(again.version.artifact_pointer, first.version.artifact_pointer);
        assert_eq!(again.audit_entry.id, first.audit_entry.id);
        assert_eq!(store.versions(&document.id).await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_rejected_document_is_not_signed() {
        let (store, document) = seeded().await;
        sqlx::query("UPDATE documents SET status = 'rejected' WHERE id = ?")
            .bind(&document.id)
            .execute(store.pool())
            .await
            .unwrap();

        let err = store
            .commit_signed_version(&signed(&document.id, 1))
            .await
            .unwrap_err();

        assert!(matches!(err, StoreError::Status(_)));
        assert_eq!(store.versions(&document.id).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_unknown_document() {
        let store = store().await;
        assert_eq!(store.get_document("nope").await.unwrap(), None);
        assert_eq!(
            store
                .commit_signed_version(&signed("nope", 1))
                .await
                .unwrap_err(),
            StoreError::DocumentNotFound("nope".to_string())
        );
    }

    #[tokio::test]
    async fn test_pending_commit_round_trips() {
        let (store, document) = seeded().await;
        let commit = signed(&document.id, 1);

        store.record_pending(&commit).await.unwrap();

        assert_eq!(
            store.pending_commit(&commit.artifact_pointer).await.unwrap(),
            Some(commit.clone())
        );
        assert_eq!(
            store.record_pending(&commit).await.unwrap_err(),
            StoreError::PointerInUse(commit.artifact_pointer.clone())
        );
        assert_eq!(
            store.record_pending(&signed("nope", 1)).await.unwrap_err(),
            StoreError::DocumentNotFound("nope".to_string())
        );
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_commits_on_shared_file_yield_one_version() {
        let path = std::env::temp_dir().join(format!("docsign-race-{}.db", uuid::Uuid::new_v4()));
        let options = SqliteConnectOptions::new()
            .filename(&path)
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .busy_timeout(Duration::from_secs(10));
        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(options)
            .await
            .unwrap();
        run_migrations(&pool).await.unwrap();
        let store = Arc::new(SqliteDocumentStore::new(pool.clone()));
        let document = Document::new_draft("alice", "lease.pdf");
        let first = DocumentVersion::first(
            &document.id,
            ArtifactPointer::for_upload("alice"),
            "alice",
        );
        store.create_document(&document, &first).await.unwrap();

        let racers: Vec<_> = (0..8)
            .map(|_| {
                let store = store.clone();
                let commit = signed(&document.id, 1);
                tokio::spawn(async move { store.commit_signed_version(&commit).await })
            })
            .collect();
        let mut results = Vec::new();
        for racer in racers {
            results.push(racer.await.unwrap());
        }

        assert_eq!(results.iter().filter(|r| r.is_ok()).count(), 1);
        for err in results.iter().filter_map(|r| r.as_ref().err()) {
            assert_eq!(
                err,
                &StoreError::VersionConflict {
                    document_id: document.id.clone(),
                    expected: 1,
                    actual: 2,
                }
            );
        }
        let numbers: Vec<u32> = store
            .versions(&document.id)
            .await
            .unwrap()
            .iter()
            .map(|v| v.version_number)
            .collect();
        assert_eq!(numbers, vec![1, 2]);
        let log = store.audit_log(&document.id).await.unwrap();
        assert_eq!(log.len(), 2);
        let trail = docsign_core::AuditTrail::from_entries(&document.id, log);
        assert!(trail.verify().is_ok());

        pool.close().await;
        for suffix in ["", "-wal", "-shm"] {
            let _ = std::fs::remove_file(format!("{}{}", path.display(), suffix));
        }
    }

    #[tokio::test]
    async fn test_list_documents_by_owner() {
        let (store, document) = seeded().await;
        let listed = store.list_documents("alice").await.unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].id, document.id);
        assert!(store.list_documents("bob").await.unwrap().is_empty());
    }
}
