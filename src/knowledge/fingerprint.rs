//! Fingerprint Store - 인덱싱된 콘텐츠 지문 저장소
//!
//! 지문은 파일 바이트의 SHA-256 hex 입니다.
//! SQLite `fingerprints` 테이블이 원본이고, 조회는 메모리 HashSet 미러로 처리합니다.
//! 미러는 SQLite 커밋이 끝난 뒤에만 갱신됩니다.

use std::collections::HashSet;
use std::fs::File;
use std::io::{BufReader, Read};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, RwLock};
use std::time::Duration;

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OpenFlags, OptionalExtension};
use serde::Serialize;
use sha2::{Digest, Sha256};

use crate::error::RegistryError;

/// 파일 해시 버퍼 크기
const HASH_BUFFER_SIZE: usize = 64 * 1024;

// ============================================================================
// Fingerprint
// ============================================================================

/// 파일 콘텐츠 지문 계산 (스트리밍 SHA-256, 소문자 hex)
pub fn fingerprint_file(path: &Path) -> std::io::Result<String> {
    let mut reader = BufReader::with_capacity(HASH_BUFFER_SIZE, File::open(path)?);
    let mut hasher = Sha256::new();
    let mut buf = vec![0u8; HASH_BUFFER_SIZE];

    loop {
        let n = reader.read(&mut buf)?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }

    Ok(format!("{:x}", hasher.finalize()))
}

/// 바이트 지문 계산
pub fn fingerprint_bytes(bytes: &[u8]) -> String {
    format!("{:x}", Sha256::digest(bytes))
}

// ============================================================================
// Types
// ============================================================================

/// 지문 기록 시 함께 저장하는 정보
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FingerprintMeta {
    pub relative_path: String,
    pub source: String,
    pub chunk_count: usize,
}

/// 저장된 지문
#[derive(Debug, Clone, Serialize)]
pub struct FingerprintRecord {
    pub fingerprint: String,
    pub meta: FingerprintMeta,
    pub recorded_at: DateTime<Utc>,
}

// ============================================================================
// FingerprintStore
// ============================================================================

/// 지문 저장소
pub struct FingerprintStore {
    conn: Arc<Mutex<Connection>>,
    known: RwLock<HashSet<String>>,
    db_path: PathBuf,
}

impl FingerprintStore {
    /// 저장소 열기 (없으면 생성) 후 미러 적재
    pub fn open(path: &Path) -> Result<Self, RegistryError> {
        let conn = open_connection(path)?;

        conn.execute(
            "CREATE TABLE IF NOT EXISTS fingerprints (
                fingerprint TEXT PRIMARY KEY,
                relative_path TEXT NOT NULL,
                source TEXT NOT NULL,
                chunk_count INTEGER NOT NULL,
                recorded_at TEXT NOT NULL
            )",
            [],
        )?;

        let known = {
            let mut stmt = conn.prepare("SELECT fingerprint FROM fingerprints")?;
            let rows = stmt.query_map([], |row| row.get::<_, String>(0))?;
            rows.collect::<Result<HashSet<_>, _>>()?
        };

        tracing::debug!(
            "Fingerprint store opened at {:?} ({} known)",
            path,
            known.len()
        );

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
            known: RwLock::new(known),
            db_path: path.to_path_buf(),
        })
    }

    pub fn db_path(&self) -> &Path {
        &self.db_path
    }

    /// 이미 인덱싱된 지문인지 (O(1))
    pub fn has_been_indexed(&self, fingerprint: &str) -> bool {
        self.known
            .read()
            .map(|known| known.contains(fingerprint))
            .unwrap_or(false)
    }

    /// 지문 기록 (벡터가 저장된 뒤에 호출)
    pub fn record(&self, fingerprint: &str, meta: &FingerprintMeta) -> Result<(), RegistryError> {
        {
            let conn = self.conn.lock().map_err(|_| RegistryError::LockPoisoned)?;
            conn.execute(
                "INSERT OR REPLACE INTO fingerprints
                 (fingerprint, relative_path, source, chunk_count, recorded_at)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                params![
                    fingerprint,
                    meta.relative_path,
                    meta.source,
                    meta.chunk_count as i64,
                    format_datetime(Utc::now()),
                ],
            )?;
        }

        self.known
            .write()
            .map_err(|_| RegistryError::LockPoisoned)?
            .insert(fingerprint.to_string());
        Ok(())
    }

    /// 지문 삭제 (재인덱싱 또는 원본 삭제 시)
    pub fn forget(&self, fingerprint: &str) -> Result<bool, RegistryError> {
        let rows = {
            let conn = self.conn.lock().map_err(|_| RegistryError::LockPoisoned)?;
            conn.execute(
                "DELETE FROM fingerprints WHERE fingerprint = ?1",
                params![fingerprint],
            )?
        };

        self.known
            .write()
            .map_err(|_| RegistryError::LockPoisoned)?
            .remove(fingerprint);
        Ok(rows > 0)
    }

    /// 지문 조회
    pub fn get(&self, fingerprint: &str) -> Result<Option<FingerprintRecord>, RegistryError> {
        let conn = self.conn.lock().map_err(|_| RegistryError::LockPoisoned)?;

        let record = conn
            .query_row(
                "SELECT fingerprint, relative_path, source, chunk_count, recorded_at
                 FROM fingerprints WHERE fingerprint = ?1",
                params![fingerprint],
                |row| {
                    Ok(FingerprintRecord {
                        fingerprint: row.get(0)?,
                        meta: FingerprintMeta {
                            relative_path: row.get(1)?,
                            source: row.get(2)?,
                            chunk_count: row.get::<_, i64>(3)? as usize,
                        },
                        recorded_at: parse_datetime(row.get::<_, String>(4)?),
                    })
                },
            )
            .optional()?;

        Ok(record)
    }

    /// 기록된 지문 목록 (정렬됨)
    pub fn fingerprints(&self) -> Vec<String> {
        let mut all: Vec<String> = self
            .known
            .read()
            .map(|known| known.iter().cloned().collect())
            .unwrap_or_default();
        all.sort();
        all
    }

    /// 기록된 지문 수
    pub fn len(&self) -> usize {
        self.known.read().map(|known| known.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

// ============================================================================
// Helper Functions
// ============================================================================

/// SQLite 연결 열기 (부모 디렉토리 생성, busy timeout 설정)
pub(crate) fn open_connection(path: &Path) -> Result<Connection, RegistryError> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() && !parent.exists() {
            std::fs::create_dir_all(parent)?;
        }
    }

    let conn = Connection::open_with_flags(
        path,
        OpenFlags::SQLITE_OPEN_READ_WRITE
            | OpenFlags::SQLITE_OPEN_CREATE
            | OpenFlags::SQLITE_OPEN_NO_MUTEX,
    )?;
    // 여러 스캐너가 같은 DB 파일을 공유
    conn.busy_timeout(Duration::from_secs(5))?;

    Ok(conn)
}

/// 고정 폭 RFC3339 (문자열 비교로 시간 순서 비교 가능)
pub(crate) fn format_datetime(dt: DateTime<Utc>) -> String {
    dt.to_rfc3339_opts(chrono::SecondsFormat::Micros, true)
}

/// RFC3339 문자열을 DateTime<Utc>로 파싱
pub(crate) fn parse_datetime(s: String) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(&s)
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or_else(|_| Utc::now())
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn meta(path: &str) -> FingerprintMeta {
        FingerprintMeta {
            relative_path: path.to_string(),
            source: path.to_string(),
            chunk_count: 3,
        }
    }

    #[test]
    fn test_fingerprint_file_matches_known_digest() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("abc.txt");
        std::fs::write(&path, "abc").unwrap();

        assert_eq!(
            fingerprint_file(&path).unwrap(),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
        assert_eq!(fingerprint_bytes(b"abc"), fingerprint_file(&path).unwrap());
    }

    #[test]
    fn test_fingerprint_depends_on_content_only() {
        let dir = TempDir::new().unwrap();
        let a = dir.path().join("a.txt");
        let b = dir.path().join("b.md");
        std::fs::write(&a, "same body").unwrap();
        std::fs::write(&b, "same body").unwrap();

        assert_eq!(fingerprint_file(&a).unwrap(), fingerprint_file(&b).unwrap());

        std::fs::write(&b, "other body").unwrap();
        assert_ne!(fingerprint_file(&a).unwrap(), fingerprint_file(&b).unwrap());
    }

    #[test]
    fn test_record_and_forget() {
        let dir = TempDir::new().unwrap();
        let store = FingerprintStore::open(&dir.path().join("registry.db")).unwrap();

        assert!(!store.has_been_indexed("fp1"));
        store.record("fp1", &meta("a.txt")).unwrap();
        assert!(store.has_been_indexed("fp1"));
        assert_eq!(store.len(), 1);

        let record = store.get("fp1").unwrap().unwrap();
        assert_eq!(record.meta, meta("a.txt"));

        assert!(store.forget("fp1").unwrap());
        assert!(!store.has_been_indexed("fp1"));
        assert!(store.get("fp1").unwrap().is_none());
        assert!(!store.forget("fp1").unwrap());
    }

    #[test]
    fn test_mirror_reloaded_on_open() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("registry.db");

        {
            let store = FingerprintStore::open(&path).unwrap();
            store.record("fp1", &meta("a.txt")).unwrap();
            store.record("fp2", &meta("b.txt")).unwrap();
        }

        let reopened = FingerprintStore::open(&path).unwrap();
        assert!(reopened.has_been_indexed("fp1"));
        assert!(reopened.has_been_indexed("fp2"));
        assert_eq!(reopened.len(), 2);
        assert_eq!(reopened.fingerprints(), vec!["fp1".to_string(), "fp2".to_string()]);
    }

    #[test]
    fn test_format_datetime_fixed_width() {
        let a = format_datetime(DateTime::parse_from_rfc3339("2024-01-01T00:00:00Z").unwrap().with_timezone(&Utc));
        let b = format_datetime(DateTime::parse_from_rfc3339("2024-01-01T00:00:00.5Z").unwrap().with_timezone(&Utc));
        assert_eq!(a.len(), b.len());
        assert!(a < b);
        assert_eq!(parse_datetime(b.clone()), parse_datetime(b));
    }
}
