//! 콘텐츠 추출 모듈
//!
//! 문서 형식별로 평문 텍스트를 추출합니다.
//! - 텍스트/마크다운: 직접 읽기 (UTF-8)
//! - PDF: pdf-extract로 텍스트 추출
//! - DOCX: word/document.xml 파싱
//!
//! 출력은 공백 정규화만 적용된 하나의 문자열입니다.

pub mod docx;
pub mod pdf;

use std::path::Path;
use std::sync::OnceLock;
use std::time::Duration;

use regex::Regex;

use crate::collector::DocumentFormat;
use crate::error::ExtractError;

// ============================================================================
// Content Extractor
// ============================================================================

/// 콘텐츠 추출기
#[derive(Debug, Clone)]
pub struct ContentExtractor {
    /// PDF/DOCX 파싱 타임아웃
    timeout: Duration,
}

impl Default for ContentExtractor {
    fn default() -> Self {
        Self::new(Duration::from_secs(120))
    }
}

impl ContentExtractor {
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }

    /// 파일에서 텍스트 추출 (확장자로 형식 판별)
    pub async fn extract(&self, path: &Path) -> Result<String, ExtractError> {
        let format = DocumentFormat::from_path(path).ok_or_else(|| {
            let ext = path
                .extension()
                .and_then(|e| e.to_str())
                .unwrap_or("<none>");
            ExtractError::UnsupportedFormat(ext.to_string())
        })?;

        self.extract_as(path, format).await
    }

    /// 형식을 지정하여 추출
    pub async fn extract_as(
        &self,
        path: &Path,
        format: DocumentFormat,
    ) -> Result<String, ExtractError> {
        let raw = match format {
            DocumentFormat::Text | DocumentFormat::Markdown => self.extract_text(path).await?,
            DocumentFormat::Pdf => self.extract_blocking(path, pdf::extract_text_from_pdf).await?,
            DocumentFormat::Docx => {
                self.extract_blocking(path, docx::extract_text_from_docx).await?
            }
        };

        let text = normalize_whitespace(&raw);
        if text.is_empty() {
            return Err(ExtractError::malformed(path, "no text content"));
        }

        Ok(text)
    }

    /// 텍스트 파일에서 추출
    async fn extract_text(&self, path: &Path) -> Result<String, ExtractError> {
        let bytes = tokio::fs::read(path).await?;
        let bytes = bytes.strip_prefix(b"\xEF\xBB\xBF").unwrap_or(&bytes);
        String::from_utf8(bytes.to_vec())
            .map_err(|e| ExtractError::malformed(path, format!("invalid UTF-8: {}", e)))
    }

    /// CPU 바운드 파서를 spawn_blocking으로 실행
    ///
    /// 파서 패닉도 Malformed로 변환합니다.
    async fn extract_blocking<F>(&self, path: &Path, parse: F) -> Result<String, ExtractError>
    where
        F: FnOnce(&Path) -> Result<String, ExtractError> + Send + 'static,
    {
        let owned = path.to_path_buf();
        let task = tokio::task::spawn_blocking(move || parse(&owned));

        match tokio::time::timeout(self.timeout, task).await {
            Ok(Ok(result)) => result,
            Ok(Err(join_err)) => Err(ExtractError::malformed(
                path,
                format!("parser crashed: {}", join_err),
            )),
            Err(_) => Err(ExtractError::Timeout {
                path: path.to_path_buf(),
                secs: self.timeout.as_secs(),
            }),
        }
    }
}

// ============================================================================
// Whitespace Normalization
// ============================================================================

fn inline_ws_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"[ \t\x0b\x0c\x{a0}]+").expect("Invalid regex"))
}

fn blank_lines_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\n{3,}").expect("Invalid regex"))
}

/// 공백 정규화
///
/// CRLF -> LF, 연속 공백/탭 축약, 줄 앞뒤 공백 제거,
/// 3줄 이상 빈 줄은 한 줄로, 전체 trim.
pub fn normalize_whitespace(text: &str) -> String {
    let text = text.replace("\r\n", "\n").replace('\r', "\n");

    let lines: Vec<String> = text
        .lines()
        .map(|line| inline_ws_re().replace_all(line, " ").trim().to_string())
        .collect();

    let joined = lines.join("\n");
    blank_lines_re()
        .replace_all(&joined, "\n\n")
        .trim()
        .to_string()
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_normalize_whitespace() {
        assert_eq!(normalize_whitespace("  a   b\t\tc  "), "a b c");
        assert_eq!(normalize_whitespace("a\r\nb"), "a\nb");
        assert_eq!(normalize_whitespace("a\n\n\n\n\nb"), "a\n\nb");
        assert_eq!(normalize_whitespace("\n\n  \n"), "");
    }

    #[tokio::test]
    async fn test_extract_text_and_markdown() {
        let dir = TempDir::new().unwrap();
        let txt = dir.path().join("note.txt");
        let md = dir.path().join("README.md");
        std::fs::write(&txt, "\u{feff}Hello   world\r\n").unwrap();
        std::fs::write(&md, "# Title\n\n\n\nBody  text").unwrap();

        let extractor = ContentExtractor::default();
        assert_eq!(extractor.extract(&txt).await.unwrap(), "Hello world");
        assert_eq!(extractor.extract(&md).await.unwrap(), "# Title\n\nBody text");
    }

    #[tokio::test]
    async fn test_unsupported_format() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("binary.exe");
        std::fs::write(&path, [0u8, 1, 2]).unwrap();

        let err = ContentExtractor::default().extract(&path).await.unwrap_err();
        assert!(matches!(err, ExtractError::UnsupportedFormat(ext) if ext == "exe"));
    }

    #[tokio::test]
    async fn test_invalid_utf8_is_malformed() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("latin1.txt");
        std::fs::write(&path, [0x66, 0x6f, 0xff, 0xfe, 0x6f]).unwrap();

        let err = ContentExtractor::default().extract(&path).await.unwrap_err();
        assert!(matches!(err, ExtractError::Malformed { .. }));
    }

    #[tokio::test]
    async fn test_empty_text_is_malformed() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("empty.md");
        std::fs::write(&path, "   \n\n").unwrap();

        let err = ContentExtractor::default().extract(&path).await.unwrap_err();
        assert!(matches!(err, ExtractError::Malformed { .. }));
    }

    #[tokio::test]
    async fn test_corrupt_pdf_is_malformed() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("broken.pdf");
        std::fs::write(&path, b"%PDF-1.4\nthis is not really a pdf").unwrap();

        let err = ContentExtractor::default().extract(&path).await.unwrap_err();
        assert!(matches!(err, ExtractError::Malformed { .. }));
    }
}
