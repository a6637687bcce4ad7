//! PDF 텍스트 추출 모듈
//!
//! pdf-extract 크레이트를 사용하여 PDF에서 텍스트를 추출합니다.
//! 동기 함수이므로 호출 측에서 spawn_blocking으로 감쌉니다.

use std::path::Path;
use std::sync::OnceLock;

use regex::Regex;

use crate::error::ExtractError;

/// PDF에서 텍스트 추출
///
/// 페이지는 빈 줄 하나로 이어 붙입니다.
pub fn extract_text_from_pdf(path: &Path) -> Result<String, ExtractError> {
    let bytes = std::fs::read(path)?;

    if !bytes.starts_with(b"%PDF") {
        return Err(ExtractError::malformed(path, "missing %PDF header"));
    }

    let text = pdf_extract::extract_text_from_mem(&bytes)
        .map_err(|e| ExtractError::malformed(path, e))?;

    if text.trim().is_empty() {
        tracing::warn!(
            "No text extracted from PDF: {:?}. It might be a scanned document.",
            path
        );
        return Err(ExtractError::malformed(path, "no extractable text (scanned PDF?)"));
    }

    Ok(split_pdf_pages(&text).join("\n\n"))
}

fn page_marker_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?m)^[\s]*[-=]+[\s]*(?:Page[\s]*)?(\d+)[\s]*[-=]+[\s]*$")
            .expect("Invalid regex")
    })
}

/// PDF 텍스트를 페이지별로 분리
fn split_pdf_pages(text: &str) -> Vec<String> {
    // 폼피드 문자 (\x0c)로 페이지 분리 시도
    let pages: Vec<String> = text
        .split('\x0c')
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect();

    if pages.len() > 1 {
        return pages;
    }

    // 페이지 구분자 패턴 (예: "--- Page 1 ---")
    let page_pattern = page_marker_re();
    if page_pattern.is_match(text) {
        let pages: Vec<String> = page_pattern
            .split(text)
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect();

        if pages.len() > 1 {
            return pages;
        }
    }

    vec![text.trim().to_string()]
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_split_pdf_pages_with_formfeed() {
        let text = "Page 1 content\x0cPage 2 content\x0cPage 3 content";
        let pages = split_pdf_pages(text);
        assert_eq!(pages.len(), 3);
        assert_eq!(pages[0], "Page 1 content");
        assert_eq!(pages[1], "Page 2 content");
    }

    #[test]
    fn test_split_pdf_pages_with_markers() {
        let text = "intro\n--- Page 2 ---\nsecond";
        let pages = split_pdf_pages(text);
        assert_eq!(pages, vec!["intro".to_string(), "second".to_string()]);
    }

    #[test]
    fn test_split_pdf_pages_no_separator() {
        let text = "Just some text without page breaks";
        let pages = split_pdf_pages(text);
        assert_eq!(pages.len(), 1);
    }

    #[test]
    fn test_not_a_pdf() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("fake.pdf");
        std::fs::write(&path, "plain text pretending").unwrap();

        let err = extract_text_from_pdf(&path).unwrap_err();
        assert!(err.to_string().contains("%PDF"));
    }
}
