//! Document Registry - 문서 상태 레코드 저장소
//!
//! 대기 폴더의 상대 경로를 키로 문서의 수명주기 상태를 SQLite에 저장합니다.
//! 상태 전이는 Scanner만 수행합니다.
//!
//! ```text
//! (없음) --claim--> Indexing --mark_indexed--> Indexed
//!                      |  \--mark_failed--> Failed
//!                      \--release--> Pending
//! Pending / Failed / Indexed --claim--> Indexing
//! ```

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row};
use serde::{Deserialize, Serialize};

use super::fingerprint::{format_datetime, open_connection, parse_datetime};
use crate::collector::{CollectedFile, DocumentFormat};
use crate::error::RegistryError;

// ============================================================================
// Types
// ============================================================================

/// 문서 수명주기 상태
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DocumentState {
    Pending,
    Indexing,
    Indexed,
    Failed,
}

impl DocumentState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Indexing => "indexing",
            Self::Indexed => "indexed",
            Self::Failed => "failed",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "pending" => Some(Self::Pending),
            "indexing" => Some(Self::Indexing),
            "indexed" => Some(Self::Indexed),
            "failed" => Some(Self::Failed),
            _ => None,
        }
    }
}

impl std::fmt::Display for DocumentState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 문서 레코드
#[derive(Debug, Clone, Serialize)]
pub struct DocumentRecord {
    /// 대기 폴더 기준 상대 경로 (키)
    pub relative_path: String,
    pub absolute_path: PathBuf,
    pub format: Option<DocumentFormat>,
    /// 마지막으로 인덱싱된 콘텐츠 지문
    pub fingerprint: Option<String>,
    pub modified_at: DateTime<Utc>,
    pub size: u64,
    pub state: DocumentState,
    pub error: Option<String>,
    /// 다음 스캔에서 다시 시도할 실패인지
    pub retryable: bool,
    pub chunk_count: usize,
    pub indexed_path: Option<PathBuf>,
    pub scan_id: Option<String>,
    pub updated_at: DateTime<Utc>,
}

impl DocumentRecord {
    /// 파일 메타데이터(mtime, 크기)가 레코드와 같은지
    pub fn same_stat(&self, file: &CollectedFile) -> bool {
        self.size == file.size
            && self.modified_at.timestamp_micros() == file.modified_at.timestamp_micros()
    }
}

/// 상태별 문서 수
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RegistryStats {
    pub pending: usize,
    pub indexing: usize,
    pub indexed: usize,
    pub failed: usize,
}

impl RegistryStats {
    pub fn total(&self) -> usize {
        self.pending + self.indexing + self.indexed + self.failed
    }
}

// ============================================================================
// DocumentRegistry
// ============================================================================

const SELECT_COLUMNS: &str = "relative_path, absolute_path, format, fingerprint, modified_at, \
     size, state, error, retryable, chunk_count, indexed_path, scan_id, updated_at";

/// 문서 레코드 저장소
pub struct DocumentRegistry {
    conn: Arc<Mutex<Connection>>,
    db_path: PathBuf,
}

impl DocumentRegistry {
    /// 저장소 열기 (없으면 생성)
    pub fn open(path: &Path) -> Result<Self, RegistryError> {
        let conn = open_connection(path)?;

        conn.execute(
            "CREATE TABLE IF NOT EXISTS documents (
                relative_path TEXT PRIMARY KEY,
                absolute_path TEXT NOT NULL,
                format TEXT,
                fingerprint TEXT,
                modified_at TEXT NOT NULL,
                size INTEGER NOT NULL,
                state TEXT NOT NULL,
                error TEXT,
                retryable INTEGER NOT NULL DEFAULT 0,
                chunk_count INTEGER NOT NULL DEFAULT 0,
                indexed_path TEXT,
                scan_id TEXT,
                updated_at TEXT NOT NULL
            )",
            [],
        )?;

        conn.execute(
            "CREATE INDEX IF NOT EXISTS idx_documents_state ON documents(state)",
            [],
        )?;

        tracing::debug!("Document registry opened at {:?}", path);

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
            db_path: path.to_path_buf(),
        })
    }

    pub fn db_path(&self) -> &Path {
        &self.db_path
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, Connection>, RegistryError> {
        self.conn.lock().map_err(|_| RegistryError::LockPoisoned)
    }

    /// 상대 경로로 레코드 조회
    pub fn get(&self, relative_path: &str) -> Result<Option<DocumentRecord>, RegistryError> {
        let conn = self.lock()?;
        let sql = format!(
            "SELECT {} FROM documents WHERE relative_path = ?1",
            SELECT_COLUMNS
        );

        let record = conn
            .query_row(&sql, params![relative_path], row_to_record)
            .optional()?;
        Ok(record)
    }

    /// 레코드를 Indexing 상태로 점유 (원자적 UPSERT)
    ///
    /// 다른 스캐너가 `claim_ttl`보다 최근에 점유한 레코드는 건드리지 않고 false를 반환합니다.
    /// 그보다 오래된 점유는 중단된 스캔으로 보고 다시 점유합니다.
    pub fn claim(
        &self,
        file: &CollectedFile,
        scan_id: &str,
        claim_ttl: Duration,
    ) -> Result<bool, RegistryError> {
        let now = Utc::now();
        let ttl = chrono::Duration::from_std(claim_ttl)
            .unwrap_or_else(|_| chrono::Duration::days(36_500));
        let stale_before = now
            .checked_sub_signed(ttl)
            .unwrap_or(DateTime::<Utc>::MIN_UTC);

        let conn = self.lock()?;
        let rows = conn.execute(
            "INSERT INTO documents
             (relative_path, absolute_path, format, fingerprint, modified_at, size,
              state, error, retryable, chunk_count, indexed_path, scan_id, updated_at)
             VALUES (?1, ?2, ?3, NULL, ?4, ?5, 'indexing', NULL, 0, 0, NULL, ?6, ?7)
             ON CONFLICT(relative_path) DO UPDATE SET
                absolute_path = excluded.absolute_path,
                format = excluded.format,
                modified_at = excluded.modified_at,
                size = excluded.size,
                state = 'indexing',
                error = NULL,
                retryable = 0,
                scan_id = excluded.scan_id,
                updated_at = excluded.updated_at
             WHERE documents.state != 'indexing' OR documents.updated_at < ?8",
            params![
                file.relative_path,
                file.path.to_string_lossy(),
                file.format.map(|f| f.as_str()),
                format_datetime(file.modified_at),
                file.size as i64,
                scan_id,
                format_datetime(now),
                format_datetime(stale_before),
            ],
        )?;

        Ok(rows > 0)
    }

    /// 인덱싱 완료 기록
    pub fn mark_indexed(
        &self,
        relative_path: &str,
        fingerprint: &str,
        chunk_count: usize,
        indexed_path: &Path,
    ) -> Result<(), RegistryError> {
        let conn = self.lock()?;
        conn.execute(
            "UPDATE documents SET state = 'indexed', fingerprint = ?2, chunk_count = ?3,
                indexed_path = ?4, error = NULL, retryable = 0, updated_at = ?5
             WHERE relative_path = ?1",
            params![
                relative_path,
                fingerprint,
                chunk_count as i64,
                indexed_path.to_string_lossy(),
                format_datetime(Utc::now()),
            ],
        )?;
        Ok(())
    }

    /// 실패 기록 (에러 메시지는 운영자 로그로 남음)
    pub fn mark_failed(
        &self,
        relative_path: &str,
        error: &str,
        retryable: bool,
    ) -> Result<(), RegistryError> {
        let conn = self.lock()?;
        conn.execute(
            "UPDATE documents SET state = 'failed', error = ?2, retryable = ?3, updated_at = ?4
             WHERE relative_path = ?1",
            params![
                relative_path,
                error,
                retryable as i64,
                format_datetime(Utc::now()),
            ],
        )?;
        Ok(())
    }

    /// 점유 해제 (Pending으로 되돌림)
    pub fn release(&self, relative_path: &str) -> Result<(), RegistryError> {
        let conn = self.lock()?;
        conn.execute(
            "UPDATE documents SET state = 'pending', updated_at = ?2
             WHERE relative_path = ?1 AND state = 'indexing'",
            params![relative_path, format_datetime(Utc::now())],
        )?;
        Ok(())
    }

    /// 레코드 삭제
    pub fn remove(&self, relative_path: &str) -> Result<bool, RegistryError> {
        let conn = self.lock()?;
        let rows = conn.execute(
            "DELETE FROM documents WHERE relative_path = ?1",
            params![relative_path],
        )?;
        Ok(rows > 0)
    }

    /// 레코드 목록 (상대 경로 순)
    pub fn list(&self, state: Option<DocumentState>) -> Result<Vec<DocumentRecord>, RegistryError> {
        let conn = self.lock()?;

        let records = match state {
            Some(state) => {
                let sql = format!(
                    "SELECT {} FROM documents WHERE state = ?1 ORDER BY relative_path",
                    SELECT_COLUMNS
                );
                let mut stmt = conn.prepare(&sql)?;
                let rows = stmt.query_map(params![state.as_str()], row_to_record)?;
                rows.collect::<Result<Vec<_>, _>>()?
            }
            None => {
                let sql = format!(
                    "SELECT {} FROM documents ORDER BY relative_path",
                    SELECT_COLUMNS
                );
                let mut stmt = conn.prepare(&sql)?;
                let rows = stmt.query_map([], row_to_record)?;
                rows.collect::<Result<Vec<_>, _>>()?
            }
        };

        Ok(records)
    }

    /// 전체 레코드
    pub fn all(&self) -> Result<Vec<DocumentRecord>, RegistryError> {
        self.list(None)
    }

    /// 상태별 통계
    pub fn stats(&self) -> Result<RegistryStats, RegistryError> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare("SELECT state, COUNT(*) FROM documents GROUP BY state")?;
        let rows = stmt.query_map([], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)? as usize))
        })?;

        let mut stats = RegistryStats::default();
        for row in rows {
            let (state, count) = row?;
            match DocumentState::parse(&state) {
                Some(DocumentState::Pending) => stats.pending = count,
                Some(DocumentState::Indexing) => stats.indexing = count,
                Some(DocumentState::Indexed) => stats.indexed = count,
                Some(DocumentState::Failed) => stats.failed = count,
                None => tracing::warn!("Unknown document state in registry: {}", state),
            }
        }

        Ok(stats)
    }
}

// ============================================================================
// Helper Functions
// ============================================================================

fn row_to_record(row: &Row<'_>) -> rusqlite::Result<DocumentRecord> {
    let state: String = row.get(6)?;
    let state = DocumentState::parse(&state).ok_or_else(|| {
        rusqlite::Error::FromSqlConversionFailure(
            6,
            rusqlite::types::Type::Text,
            format!("unknown document state: {}", state).into(),
        )
    })?;

    Ok(DocumentRecord {
        relative_path: row.get(0)?,
        absolute_path: PathBuf::from(row.get::<_, String>(1)?),
        format: row
            .get::<_, Option<String>>(2)?
            .and_then(|f| DocumentFormat::parse(&f)),
        fingerprint: row.get(3)?,
        modified_at: parse_datetime(row.get::<_, String>(4)?),
        size: row.get::<_, i64>(5)? as u64,
        state,
        error: row.get(7)?,
        retryable: row.get::<_, i64>(8)? != 0,
        chunk_count: row.get::<_, i64>(9)? as usize,
        indexed_path: row.get::<_, Option<String>>(10)?.map(PathBuf::from),
        scan_id: row.get(11)?,
        updated_at: parse_datetime(row.get::<_, String>(12)?),
    })
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn create_test_registry() -> (TempDir, DocumentRegistry) {
        let dir = TempDir::new().unwrap();
        let registry = DocumentRegistry::open(&dir.path().join("registry.db")).unwrap();
        (dir, registry)
    }

    fn collected(dir: &TempDir, name: &str, body: &str) -> CollectedFile {
        let path = dir.path().join(name);
        std::fs::write(&path, body).unwrap();
        CollectedFile::from_path(dir.path(), path).unwrap().unwrap()
    }

    const TTL: Duration = Duration::from_secs(3600);

    #[test]
    fn test_claim_creates_indexing_record() {
        let (dir, registry) = create_test_registry();
        let file = collected(&dir, "a.txt", "hello");

        assert!(registry.claim(&file, "scan-1", TTL).unwrap());

        let record = registry.get("a.txt").unwrap().unwrap();
        assert_eq!(record.state, DocumentState::Indexing);
        assert_eq!(record.format, Some(DocumentFormat::Text));
        assert_eq!(record.size, 5);
        assert_eq!(record.scan_id.as_deref(), Some("scan-1"));
        assert!(record.same_stat(&file));
    }

    #[test]
    fn test_claim_is_exclusive() {
        let (dir, registry) = create_test_registry();
        let file = collected(&dir, "a.txt", "hello");

        assert!(registry.claim(&file, "scan-1", TTL).unwrap());
        assert!(!registry.claim(&file, "scan-2", TTL).unwrap());

        let record = registry.get("a.txt").unwrap().unwrap();
        assert_eq!(record.scan_id.as_deref(), Some("scan-1"));
    }

    #[test]
    fn test_stale_claim_can_be_taken_over() {
        let (dir, registry) = create_test_registry();
        let file = collected(&dir, "a.txt", "hello");

        assert!(registry.claim(&file, "scan-1", TTL).unwrap());
        std::thread::sleep(Duration::from_millis(5));
        assert!(registry.claim(&file, "scan-2", Duration::ZERO).unwrap());
    }

    #[test]
    fn test_lifecycle_transitions() {
        let (dir, registry) = create_test_registry();
        let file = collected(&dir, "a.txt", "hello");

        registry.claim(&file, "scan-1", TTL).unwrap();
        registry
            .mark_indexed("a.txt", "fp1", 2, Path::new("/indexed/a.txt"))
            .unwrap();

        let record = registry.get("a.txt").unwrap().unwrap();
        assert_eq!(record.state, DocumentState::Indexed);
        assert_eq!(record.fingerprint.as_deref(), Some("fp1"));
        assert_eq!(record.chunk_count, 2);
        assert_eq!(record.indexed_path, Some(PathBuf::from("/indexed/a.txt")));

        // 재인덱싱 점유는 이전 지문을 유지
        assert!(registry.claim(&file, "scan-2", TTL).unwrap());
        registry.mark_failed("a.txt", "boom", true).unwrap();

        let record = registry.get("a.txt").unwrap().unwrap();
        assert_eq!(record.state, DocumentState::Failed);
        assert_eq!(record.fingerprint.as_deref(), Some("fp1"));
        assert_eq!(record.error.as_deref(), Some("boom"));
        assert!(record.retryable);
    }

    #[test]
    fn test_release_returns_to_pending() {
        let (dir, registry) = create_test_registry();
        let file = collected(&dir, "a.txt", "hello");

        registry.claim(&file, "scan-1", TTL).unwrap();
        registry.release("a.txt").unwrap();

        let record = registry.get("a.txt").unwrap().unwrap();
        assert_eq!(record.state, DocumentState::Pending);
        assert!(registry.claim(&file, "scan-2", TTL).unwrap());
    }

    #[test]
    fn test_list_stats_and_remove() {
        let (dir, registry) = create_test_registry();
        let a = collected(&dir, "a.txt", "a");
        let b = collected(&dir, "b.md", "b");

        registry.claim(&a, "s", TTL).unwrap();
        registry.claim(&b, "s", TTL).unwrap();
        registry.mark_failed("b.md", "bad", false).unwrap();

        assert_eq!(registry.all().unwrap().len(), 2);
        let failed = registry.list(Some(DocumentState::Failed)).unwrap();
        assert_eq!(failed.len(), 1);
        assert_eq!(failed[0].relative_path, "b.md");

        let stats = registry.stats().unwrap();
        assert_eq!(stats.indexing, 1);
        assert_eq!(stats.failed, 1);
        assert_eq!(stats.total(), 2);

        assert!(registry.remove("a.txt").unwrap());
        assert!(!registry.remove("a.txt").unwrap());
        assert!(registry.get("a.txt").unwrap().is_none());
    }

    #[test]
    fn test_document_state_parse() {
        for state in [
            DocumentState::Pending,
            DocumentState::Indexing,
            DocumentState::Indexed,
            DocumentState::Failed,
        ] {
            assert_eq!(DocumentState::parse(state.as_str()), Some(state));
        }
        assert_eq!(DocumentState::parse("FAILED"), Some(DocumentState::Failed));
        assert_eq!(DocumentState::parse("done"), None);
    }
}
