//! 파일 수집 모듈
//!
//! 대기(pending) 폴더를 재귀 탐색하여 인덱싱 후보 파일을 수집합니다.
//! 지원 확장자가 아닌 파일도 수집하여 추출 단계에서 실패로 기록되게 합니다.

use std::path::{Path, PathBuf};
use std::time::SystemTime;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use ignore::WalkBuilder;
use serde::{Deserialize, Serialize};

// ============================================================================
// Document Formats
// ============================================================================

/// 지원하는 문서 형식
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DocumentFormat {
    /// 일반 텍스트
    Text,
    /// 마크다운
    Markdown,
    /// PDF
    Pdf,
    /// Word 문서 (.docx)
    Docx,
}

/// 지원 확장자 목록 (`add` 명령어 안내용)
pub const SUPPORTED_EXTENSIONS: &[&str] = &["txt", "md", "markdown", "pdf", "docx"];

impl DocumentFormat {
    /// 확장자로 형식 결정
    pub fn from_extension(ext: &str) -> Option<Self> {
        match ext.to_lowercase().as_str() {
            "txt" | "text" => Some(Self::Text),
            "md" | "markdown" => Some(Self::Markdown),
            "pdf" => Some(Self::Pdf),
            "docx" => Some(Self::Docx),
            _ => None,
        }
    }

    /// 파일 경로에서 형식 결정
    pub fn from_path(path: &Path) -> Option<Self> {
        path.extension()
            .and_then(|ext| ext.to_str())
            .and_then(Self::from_extension)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Text => "text",
            Self::Markdown => "markdown",
            Self::Pdf => "pdf",
            Self::Docx => "docx",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "text" => Some(Self::Text),
            "markdown" => Some(Self::Markdown),
            "pdf" => Some(Self::Pdf),
            "docx" => Some(Self::Docx),
            _ => None,
        }
    }
}

impl std::fmt::Display for DocumentFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// ============================================================================
// Collected File
// ============================================================================

/// 수집된 파일 정보
#[derive(Debug, Clone)]
pub struct CollectedFile {
    /// 파일 절대 경로
    pub path: PathBuf,
    /// 대기 폴더 기준 상대 경로 (레지스트리 키)
    pub relative_path: String,
    /// 문서 형식 (지원하지 않으면 None)
    pub format: Option<DocumentFormat>,
    /// 파일 크기 (바이트)
    pub size: u64,
    /// 수정 시간
    pub modified_at: DateTime<Utc>,
}

impl CollectedFile {
    /// 파일에서 CollectedFile 생성
    pub fn from_path(root: &Path, path: PathBuf) -> Result<Option<Self>> {
        let metadata = std::fs::metadata(&path)
            .with_context(|| format!("Failed to read metadata: {:?}", path))?;

        if !metadata.is_file() {
            return Ok(None);
        }

        let relative_path = relative_key(root, &path);
        let modified_at = metadata
            .modified()
            .map(DateTime::<Utc>::from)
            .unwrap_or_else(|_| DateTime::<Utc>::from(SystemTime::UNIX_EPOCH));

        Ok(Some(Self {
            format: DocumentFormat::from_path(&path),
            path,
            relative_path,
            size: metadata.len(),
            modified_at,
        }))
    }

    /// 파일 이름 (메타데이터의 source)
    pub fn file_name(&self) -> String {
        self.path
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or("unknown")
            .to_string()
    }
}

/// 루트 기준 상대 경로를 '/' 구분자로 정규화
pub fn relative_key(root: &Path, path: &Path) -> String {
    let rel = path.strip_prefix(root).unwrap_or(path);
    rel.components()
        .map(|c| c.as_os_str().to_string_lossy())
        .collect::<Vec<_>>()
        .join("/")
}

// ============================================================================
// File Collector
// ============================================================================

/// 파일 수집기
///
/// 숨김 파일과 임시 파일(`.part`, `~$` 접두사)은 건너뜁니다.
/// .gitignore는 적용하지 않습니다 (대기 폴더는 저장소가 아님).
pub struct FileCollector {
    include_hidden: bool,
}

impl Default for FileCollector {
    fn default() -> Self {
        Self {
            include_hidden: false,
        }
    }
}

impl FileCollector {
    pub fn new(include_hidden: bool) -> Self {
        Self { include_hidden }
    }

    /// 폴더 재귀 수집 (상대 경로 순으로 정렬)
    pub fn collect_directory(&self, root: &Path) -> std::io::Result<Vec<CollectedFile>> {
        if !root.is_dir() {
            return Err(std::io::Error::new(
                std::io::ErrorKind::NotFound,
                format!("Not a directory: {:?}", root),
            ));
        }

        let walker = WalkBuilder::new(root)
            .hidden(!self.include_hidden)
            .git_ignore(false)
            .git_global(false)
            .git_exclude(false)
            .ignore(false)
            .parents(false)
            .build();

        let mut files = Vec::new();

        for entry in walker {
            let entry = match entry {
                Ok(e) => e,
                Err(e) => {
                    tracing::warn!("Failed to read entry: {}", e);
                    continue;
                }
            };

            if !entry.file_type().map(|ft| ft.is_file()).unwrap_or(false) {
                continue;
            }

            if is_temporary(entry.path()) {
                continue;
            }

            match CollectedFile::from_path(root, entry.path().to_path_buf()) {
                Ok(Some(file)) => files.push(file),
                Ok(None) => {}
                Err(e) => tracing::warn!("Failed to collect file: {}", e),
            }
        }

        files.sort_by(|a, b| a.relative_path.cmp(&b.relative_path));
        tracing::debug!("Collected {} files from {:?}", files.len(), root);
        Ok(files)
    }
}

/// 다른 프로그램이 아직 쓰는 중인 파일
fn is_temporary(path: &Path) -> bool {
    let name = path.file_name().and_then(|n| n.to_str()).unwrap_or("");
    name.starts_with("~$") || name.ends_with(".part") || name.ends_with(".tmp")
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_format_from_extension() {
        assert_eq!(DocumentFormat::from_extension("md"), Some(DocumentFormat::Markdown));
        assert_eq!(DocumentFormat::from_extension("TXT"), Some(DocumentFormat::Text));
        assert_eq!(DocumentFormat::from_extension("PDF"), Some(DocumentFormat::Pdf));
        assert_eq!(DocumentFormat::from_extension("docx"), Some(DocumentFormat::Docx));
        assert_eq!(DocumentFormat::from_extension("doc"), None);
        assert_eq!(DocumentFormat::from_extension("exe"), None);
    }

    #[test]
    fn test_format_roundtrip_str() {
        for fmt in [
            DocumentFormat::Text,
            DocumentFormat::Markdown,
            DocumentFormat::Pdf,
            DocumentFormat::Docx,
        ] {
            assert_eq!(DocumentFormat::parse(fmt.as_str()), Some(fmt));
        }
    }

    #[test]
    fn test_collect_directory_sorted_and_nested() {
        let dir = TempDir::new().unwrap();
        std::fs::create_dir_all(dir.path().join("sub")).unwrap();
        std::fs::write(dir.path().join("b.txt"), "b").unwrap();
        std::fs::write(dir.path().join("sub/a.md"), "a").unwrap();
        std::fs::write(dir.path().join("c.xyz"), "c").unwrap();
        std::fs::write(dir.path().join(".hidden.txt"), "h").unwrap();
        std::fs::write(dir.path().join("d.txt.part"), "partial").unwrap();

        let files = FileCollector::default().collect_directory(dir.path()).unwrap();
        let keys: Vec<&str> = files.iter().map(|f| f.relative_path.as_str()).collect();

        assert_eq!(keys, vec!["b.txt", "c.xyz", "sub/a.md"]);
        assert_eq!(files[1].format, None);
        assert_eq!(files[2].format, Some(DocumentFormat::Markdown));
    }

    #[test]
    fn test_collect_missing_directory() {
        let dir = TempDir::new().unwrap();
        let result = FileCollector::default().collect_directory(&dir.path().join("nope"));
        assert!(result.is_err());
    }
}
