//! SQLite persistence for documents, analyses, and their outputs.
//!
//! [`AnalysisDb`] wraps a single rusqlite connection with the schema and
//! CRUD operations. [`DbHandle`] is the cloneable async wrapper the rest
//! of the crate uses: it serializes access through a mutex and runs each
//! operation on the blocking thread pool.

use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};

use anyhow::{Context, Result};
use rusqlite::{params, Connection, OptionalExtension};
use serde::Serialize;

use crate::models::{AnalysisStatus, ExtractedClaim, VerificationResult};

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS documents (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    title TEXT NOT NULL,
    file_path TEXT NOT NULL,
    content_hash TEXT NOT NULL,
    created_at TEXT NOT NULL DEFAULT (datetime('now'))
);

CREATE TABLE IF NOT EXISTS analyses (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    document_id INTEGER NOT NULL REFERENCES documents(id),
    analysis_type TEXT NOT NULL,
    status TEXT NOT NULL,
    created_at TEXT NOT NULL DEFAULT (datetime('now')),
    completed_at TEXT
);

CREATE TABLE IF NOT EXISTS claims (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    analysis_id INTEGER NOT NULL REFERENCES analyses(id),
    claim_uuid TEXT NOT NULL UNIQUE,
    claim_text TEXT NOT NULL,
    claim_type TEXT NOT NULL,
    confidence REAL NOT NULL,
    location TEXT,
    created_at TEXT NOT NULL DEFAULT (datetime('now'))
);

CREATE TABLE IF NOT EXISTS verifications (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    claim_id INTEGER NOT NULL REFERENCES claims(id),
    verification_status TEXT NOT NULL,
    confidence REAL NOT NULL,
    supporting_sources TEXT NOT NULL DEFAULT '[]',
    contradicting_sources TEXT NOT NULL DEFAULT '[]',
    notes TEXT,
    created_at TEXT NOT NULL DEFAULT (datetime('now'))
);

CREATE TABLE IF NOT EXISTS reports (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    analysis_id INTEGER NOT NULL REFERENCES analyses(id),
    report_content TEXT NOT NULL,
    overall_quality TEXT NOT NULL,
    created_at TEXT NOT NULL DEFAULT (datetime('now'))
);
";

#[derive(Debug, Clone, Serialize)]
pub struct DocumentRow {
    pub id: i64,
    pub title: String,
    pub file_path: String,
    pub content_hash: String,
    pub created_at: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct AnalysisRow {
    pub id: i64,
    pub document_id: i64,
    pub analysis_type: String,
    pub status: String,
    pub created_at: String,
    pub completed_at: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ClaimRow {
    pub id: i64,
    pub analysis_id: i64,
    pub claim_uuid: String,
    pub claim_text: String,
    pub claim_type: String,
    pub confidence: f64,
    pub location: Option<String>,
    pub created_at: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct ReportRow {
    pub id: i64,
    pub analysis_id: i64,
    pub report_content: String,
    pub overall_quality: String,
    pub created_at: String,
}

/// Synchronous SQLite store. Use through [`DbHandle`] from async code.
pub struct AnalysisDb {
    conn: Connection,
}

impl AnalysisDb {
    pub fn new(path: &Path) -> Result<Self> {
        let conn = Connection::open(path)
            .with_context(|| format!("Failed to open database at {}", path.display()))?;
        let db = AnalysisDb { conn };
        db.init()?;
        Ok(db)
    }

    pub fn new_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory().context("Failed to open in-memory database")?;
        let db = AnalysisDb { conn };
        db.init()?;
        Ok(db)
    }

    /// Idempotent schema creation.
    fn init(&self) -> Result<()> {
        self.conn
            .execute_batch(SCHEMA)
            .context("Failed to initialize database schema")
    }

    /// Cheap liveness probe.
    pub fn health_check(&self) -> Result<()> {
        self.conn
            .query_row("SELECT 1", [], |row| row.get::<_, i64>(0))
            .context("Database health check failed")?;
        Ok(())
    }

    // Documents

    pub fn insert_document(
        &self,
        title: &str,
        file_path: &str,
        content_hash: &str,
    ) -> Result<i64> {
        self.conn
            .execute(
                "INSERT INTO documents (title, file_path, content_hash) VALUES (?1, ?2, ?3)",
                params![title, file_path, content_hash],
            )
            .context("Failed to insert document")?;
        Ok(self.conn.last_insert_rowid())
    }

    pub fn get_document(&self, id: i64) -> Result<Option<DocumentRow>> {
        self.conn
            .query_row(
                "SELECT id, title, file_path, content_hash, created_at
                 FROM documents WHERE id = ?1",
                params![id],
                Self::document_from_row,
            )
            .optional()
            .context("Failed to get document")
    }

    // Analyses

    pub fn insert_analysis(
        &self,
        document_id: i64,
        analysis_type: &str,
        status: AnalysisStatus,
    ) -> Result<i64> {
        self.conn
            .execute(
                "INSERT INTO analyses (document_id, analysis_type, status) VALUES (?1, ?2, ?3)",
                params![document_id, analysis_type, status.as_str()],
            )
            .context("Failed to insert analysis")?;
        Ok(self.conn.last_insert_rowid())
    }

    pub fn get_analysis(&self, id: i64) -> Result<Option<AnalysisRow>> {
        self.conn
            .query_row(
                "SELECT id, document_id, analysis_type, status, created_at, completed_at
                 FROM analyses WHERE id = ?1",
                params![id],
                Self::analysis_from_row,
            )
            .optional()
            .context("Failed to get analysis")
    }

    /// Most recent analyses first.
    pub fn list_analyses(&self, limit: i64) -> Result<Vec<AnalysisRow>> {
        let mut stmt = self
            .conn
            .prepare(
                "SELECT id, document_id, analysis_type, status, created_at, completed_at
                 FROM analyses ORDER BY id DESC LIMIT ?1",
            )
            .context("Failed to prepare analysis listing")?;
        let rows = stmt
            .query_map(params![limit], Self::analysis_from_row)
            .context("Failed to list analyses")?;
        let mut analyses = Vec::new();
        for row in rows {
            analyses.push(row.context("Failed to read analysis row")?);
        }
        Ok(analyses)
    }

    /// Update the stored status. The completion timestamp is written when
    /// the status first turns terminal and never overwritten after that.
    pub fn update_analysis_status(&self, id: i64, status: AnalysisStatus) -> Result<()> {
        if status.is_terminal() {
            self.conn
                .execute(
                    "UPDATE analyses
                     SET status = ?1,
                         completed_at = COALESCE(completed_at, datetime('now'))
                     WHERE id = ?2",
                    params![status.as_str(), id],
                )
                .context("Failed to update analysis status")?;
        } else {
            self.conn
                .execute(
                    "UPDATE analyses SET status = ?1 WHERE id = ?2",
                    params![status.as_str(), id],
                )
                .context("Failed to update analysis status")?;
        }
        Ok(())
    }

    // Claims

    pub fn insert_claim(&self, analysis_id: i64, claim: &ExtractedClaim) -> Result<i64> {
        self.conn
            .execute(
                "INSERT INTO claims (analysis_id, claim_uuid, claim_text, claim_type, confidence, location)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                params![
                    analysis_id,
                    claim.id,
                    claim.text,
                    claim.claim_type,
                    claim.confidence,
                    claim.location
                ],
            )
            .context("Failed to insert claim")?;
        Ok(self.conn.last_insert_rowid())
    }

    pub fn get_claims(&self, analysis_id: i64) -> Result<Vec<ClaimRow>> {
        let mut stmt = self
            .conn
            .prepare(
                "SELECT id, analysis_id, claim_uuid, claim_text, claim_type, confidence, location, created_at
                 FROM claims WHERE analysis_id = ?1 ORDER BY id",
            )
            .context("Failed to prepare claim listing")?;
        let rows = stmt
            .query_map(params![analysis_id], Self::claim_from_row)
            .context("Failed to list claims")?;
        let mut claims = Vec::new();
        for row in rows {
            claims.push(row.context("Failed to read claim row")?);
        }
        Ok(claims)
    }

    /// Database row id for a claim by its stable identifier.
    pub fn claim_row_id(&self, analysis_id: i64, claim_uuid: &str) -> Result<Option<i64>> {
        self.conn
            .query_row(
                "SELECT id FROM claims WHERE analysis_id = ?1 AND claim_uuid = ?2",
                params![analysis_id, claim_uuid],
                |row| row.get(0),
            )
            .optional()
            .context("Failed to look up claim")
    }

    pub fn count_claims(&self, analysis_id: i64) -> Result<i64> {
        self.conn
            .query_row(
                "SELECT COUNT(*) FROM claims WHERE analysis_id = ?1",
                params![analysis_id],
                |row| row.get(0),
            )
            .context("Failed to count claims")
    }

    // Verifications

    pub fn insert_verification(
        &self,
        claim_row_id: i64,
        verification: &VerificationResult,
    ) -> Result<i64> {
        let supporting = serde_json::to_string(&verification.supporting_sources)
            .context("Failed to encode supporting sources")?;
        let contradicting = serde_json::to_string(&verification.contradicting_sources)
            .context("Failed to encode contradicting sources")?;
        self.conn
            .execute(
                "INSERT INTO verifications
                 (claim_id, verification_status, confidence, supporting_sources, contradicting_sources, notes)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                params![
                    claim_row_id,
                    verification.verification_status,
                    verification.confidence,
                    supporting,
                    contradicting,
                    verification.notes
                ],
            )
            .context("Failed to insert verification")?;
        Ok(self.conn.last_insert_rowid())
    }

    pub fn count_verifications(&self, analysis_id: i64) -> Result<i64> {
        self.conn
            .query_row(
                "SELECT COUNT(*) FROM verifications v
                 JOIN claims c ON v.claim_id = c.id
                 WHERE c.analysis_id = ?1",
                params![analysis_id],
                |row| row.get(0),
            )
            .context("Failed to count verifications")
    }

    // Reports

    pub fn insert_report(
        &self,
        analysis_id: i64,
        report_content: &str,
        overall_quality: &str,
    ) -> Result<i64> {
        self.conn
            .execute(
                "INSERT INTO reports (analysis_id, report_content, overall_quality) VALUES (?1, ?2, ?3)",
                params![analysis_id, report_content, overall_quality],
            )
            .context("Failed to insert report")?;
        Ok(self.conn.last_insert_rowid())
    }

    /// Latest report for an analysis.
    pub fn get_report(&self, analysis_id: i64) -> Result<Option<ReportRow>> {
        self.conn
            .query_row(
                "SELECT id, analysis_id, report_content, overall_quality, created_at
                 FROM reports WHERE analysis_id = ?1 ORDER BY id DESC LIMIT 1",
                params![analysis_id],
                Self::report_from_row,
            )
            .optional()
            .context("Failed to get report")
    }

    // Row mapping

    fn document_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<DocumentRow> {
        Ok(DocumentRow {
            id: row.get(0)?,
            title: row.get(1)?,
            file_path: row.get(2)?,
            content_hash: row.get(3)?,
            created_at: row.get(4)?,
        })
    }

    fn analysis_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<AnalysisRow> {
        Ok(AnalysisRow {
            id: row.get(0)?,
            document_id: row.get(1)?,
            analysis_type: row.get(2)?,
            status: row.get(3)?,
            created_at: row.get(4)?,
            completed_at: row.get(5)?,
        })
    }

    fn claim_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<ClaimRow> {
        Ok(ClaimRow {
            id: row.get(0)?,
            analysis_id: row.get(1)?,
            claim_uuid: row.get(2)?,
            claim_text: row.get(3)?,
            claim_type: row.get(4)?,
            confidence: row.get(5)?,
            location: row.get(6)?,
            created_at: row.get(7)?,
        })
    }

    fn report_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<ReportRow> {
        Ok(ReportRow {
            id: row.get(0)?,
            analysis_id: row.get(1)?,
            report_content: row.get(2)?,
            overall_quality: row.get(3)?,
            created_at: row.get(4)?,
        })
    }
}

/// Cloneable async handle around [`AnalysisDb`].
///
/// All database work funnels through `call`, which takes the mutex on a
/// blocking thread so async tasks never block an executor thread on
/// SQLite.
#[derive(Clone)]
pub struct DbHandle {
    inner: Arc<Mutex<AnalysisDb>>,
}

impl DbHandle {
    pub fn new(db: AnalysisDb) -> Self {
        DbHandle {
            inner: Arc::new(Mutex::new(db)),
        }
    }

    /// Run one database operation on the blocking pool.
    pub async fn call<F, T>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&mut AnalysisDb) -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let inner = self.inner.clone();
        tokio::task::spawn_blocking(move || {
            let mut db = inner.lock().expect("analysis db mutex poisoned");
            f(&mut db)
        })
        .await
        .context("Database task panicked")?
    }

    /// Synchronous access for non-async callers.
    pub fn lock_sync(&self) -> MutexGuard<'_, AnalysisDb> {
        self.inner.lock().expect("analysis db mutex poisoned")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::AnalysisStatus;

    fn sample_claim(text: &str) -> ExtractedClaim {
        ExtractedClaim {
            id: uuid::Uuid::new_v4().to_string(),
            text: text.to_string(),
            claim_type: "quantitative".to_string(),
            location: Some("p. 2".to_string()),
            confidence: 0.7,
            supporting_text: None,
        }
    }

    fn sample_verification(claim: &ExtractedClaim) -> VerificationResult {
        VerificationResult {
            claim_id: claim.id.clone(),
            claim_text: claim.text.clone(),
            verification_status: "supported".to_string(),
            confidence: 90.0,
            supporting_sources: vec!["source-1".to_string()],
            contradicting_sources: Vec::new(),
            notes: None,
        }
    }

    #[test]
    fn test_schema_contains_all_tables() {
        let db = AnalysisDb::new_in_memory().unwrap();
        let mut stmt = db
            .conn
            .prepare("SELECT name FROM sqlite_master WHERE type = 'table' ORDER BY name")
            .unwrap();
        let names: Vec<String> = stmt
            .query_map([], |row| row.get(0))
            .unwrap()
            .map(|r| r.unwrap())
            .collect();
        for table in ["documents", "analyses", "claims", "verifications", "reports"] {
            assert!(names.iter().any(|n| n == table), "missing table {table}");
        }
    }

    #[test]
    fn test_document_roundtrip() {
        let db = AnalysisDb::new_in_memory().unwrap();
        let id = db
            .insert_document("study.txt", "/data/documents/abc_study.txt", "abc123def456")
            .unwrap();
        let doc = db.get_document(id).unwrap().unwrap();
        assert_eq!(doc.title, "study.txt");
        assert_eq!(doc.content_hash, "abc123def456");
        assert!(db.get_document(id + 1).unwrap().is_none());
    }

    #[test]
    fn test_status_update_stamps_completion_once() {
        let db = AnalysisDb::new_in_memory().unwrap();
        let doc = db.insert_document("d", "/d", "h").unwrap();
        let id = db
            .insert_analysis(doc, "full_assessment", AnalysisStatus::Queued)
            .unwrap();

        db.update_analysis_status(id, AnalysisStatus::Processing).unwrap();
        let row = db.get_analysis(id).unwrap().unwrap();
        assert_eq!(row.status, "processing");
        assert!(row.completed_at.is_none());

        db.update_analysis_status(id, AnalysisStatus::Completed).unwrap();
        let row = db.get_analysis(id).unwrap().unwrap();
        assert_eq!(row.status, "completed");
        assert!(row.completed_at.is_some());

        // A later terminal write must not move the stamp.
        db.conn
            .execute(
                "UPDATE analyses SET completed_at = '2000-01-01 00:00:00' WHERE id = ?1",
                params![id],
            )
            .unwrap();
        db.update_analysis_status(id, AnalysisStatus::Completed).unwrap();
        let row = db.get_analysis(id).unwrap().unwrap();
        assert_eq!(row.completed_at.as_deref(), Some("2000-01-01 00:00:00"));
    }

    #[test]
    fn test_claims_and_verifications_link_by_stable_id() {
        let db = AnalysisDb::new_in_memory().unwrap();
        let doc = db.insert_document("d", "/d", "h").unwrap();
        let analysis = db
            .insert_analysis(doc, "full_assessment", AnalysisStatus::Queued)
            .unwrap();

        let first = sample_claim("Coverage rose 4%.");
        let second = sample_claim("The rise was caused by outreach.");
        db.insert_claim(analysis, &first).unwrap();
        db.insert_claim(analysis, &second).unwrap();

        let row_id = db.claim_row_id(analysis, &first.id).unwrap().unwrap();
        db.insert_verification(row_id, &sample_verification(&first)).unwrap();

        assert_eq!(db.count_claims(analysis).unwrap(), 2);
        assert_eq!(db.count_verifications(analysis).unwrap(), 1);
        assert!(db.claim_row_id(analysis, "no-such-uuid").unwrap().is_none());

        let claims = db.get_claims(analysis).unwrap();
        assert_eq!(claims.len(), 2);
        assert_eq!(claims[0].claim_uuid, first.id);
        assert_eq!(claims[1].claim_text, "The rise was caused by outreach.");
    }

    #[test]
    fn test_latest_report_wins() {
        let db = AnalysisDb::new_in_memory().unwrap();
        let doc = db.insert_document("d", "/d", "h").unwrap();
        let analysis = db
            .insert_analysis(doc, "full_assessment", AnalysisStatus::Queued)
            .unwrap();
        db.insert_report(analysis, "first draft", "draft").unwrap();
        db.insert_report(analysis, "second draft", "draft").unwrap();
        let report = db.get_report(analysis).unwrap().unwrap();
        assert_eq!(report.report_content, "second draft");
        assert!(db.get_report(analysis + 1).unwrap().is_none());
    }

    #[test]
    fn test_list_analyses_recent_first_with_limit() {
        let db = AnalysisDb::new_in_memory().unwrap();
        let doc = db.insert_document("d", "/d", "h").unwrap();
        for _ in 0..3 {
            db.insert_analysis(doc, "full_assessment", AnalysisStatus::Queued)
                .unwrap();
        }
        let rows = db.list_analyses(2).unwrap();
        assert_eq!(rows.len(), 2);
        assert!(rows[0].id > rows[1].id);
    }

    #[tokio::test]
    async fn test_handle_call_runs_operation() {
        let handle = DbHandle::new(AnalysisDb::new_in_memory().unwrap());
        let id = handle
            .call(|db| db.insert_document("d", "/d", "h"))
            .await
            .unwrap();
        let doc = handle.call(move |db| db.get_document(id)).await.unwrap();
        assert_eq!(doc.unwrap().title, "d");
        handle.lock_sync().health_check().unwrap();
    }
}
