//! DOCX 텍스트 추출 모듈
//!
//! DOCX는 zip 컨테이너이며 본문은 `word/document.xml`에 있습니다.
//! `w:t` 텍스트 런을 모으고 `w:p` 끝에서 줄바꿈합니다.

use std::io::{Cursor, Read};
use std::path::Path;

use quick_xml::events::Event;
use quick_xml::Reader;

use crate::error::ExtractError;

const DOCUMENT_XML: &str = "word/document.xml";

/// DOCX 파일에서 텍스트 추출
pub fn extract_text_from_docx(path: &Path) -> Result<String, ExtractError> {
    let bytes = std::fs::read(path)?;

    let mut archive = zip::ZipArchive::new(Cursor::new(bytes))
        .map_err(|e| ExtractError::malformed(path, format!("invalid zip container: {}", e)))?;

    let mut xml = String::new();
    archive
        .by_name(DOCUMENT_XML)
        .map_err(|e| ExtractError::malformed(path, format!("missing {}: {}", DOCUMENT_XML, e)))?
        .read_to_string(&mut xml)
        .map_err(|e| ExtractError::malformed(path, format!("unreadable {}: {}", DOCUMENT_XML, e)))?;

    document_xml_to_text(&xml).map_err(|reason| ExtractError::malformed(path, reason))
}

/// word/document.xml -> 평문
fn document_xml_to_text(xml: &str) -> Result<String, String> {
    let mut reader = Reader::from_str(xml);
    let mut out = String::new();
    let mut in_text = false;

    loop {
        match reader.read_event() {
            Ok(Event::Start(e)) => {
                if e.name().as_ref() == b"w:t" {
                    in_text = true;
                }
            }
            Ok(Event::Text(t)) if in_text => {
                let text = t.unescape().map_err(|e| e.to_string())?;
                out.push_str(&text);
            }
            Ok(Event::End(e)) => match e.name().as_ref() {
                b"w:t" => in_text = false,
                b"w:p" => out.push('\n'),
                _ => {}
            },
            Ok(Event::Empty(e)) => match e.name().as_ref() {
                b"w:tab" => out.push('\t'),
                b"w:br" | b"w:cr" => out.push('\n'),
                b"w:p" => out.push('\n'),
                _ => {}
            },
            Ok(Event::Eof) => break,
            Ok(_) => {}
            Err(e) => {
                return Err(format!(
                    "xml error at position {}: {}",
                    reader.buffer_position(),
                    e
                ))
            }
        }
    }

    Ok(out)
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::TempDir;

    const SAMPLE_XML: &str = r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?>
<w:document xmlns:w="http://schemas.openxmlformats.org/wordprocessingml/2006/main">
  <w:body>
    <w:p><w:r><w:t>Quarterly</w:t></w:r><w:r><w:t xml:space="preserve"> report</w:t></w:r></w:p>
    <w:p><w:r><w:t>A&amp;B</w:t><w:tab/><w:t>total</w:t></w:r></w:p>
  </w:body>
</w:document>"#;

    fn write_docx(path: &Path, xml: &str) {
        let file = std::fs::File::create(path).unwrap();
        let mut zip = zip::ZipWriter::new(file);
        let options = zip::write::FileOptions::default();
        zip.start_file(DOCUMENT_XML, options).unwrap();
        zip.write_all(xml.as_bytes()).unwrap();
        zip.finish().unwrap();
    }

    #[test]
    fn test_document_xml_to_text() {
        let text = document_xml_to_text(SAMPLE_XML).unwrap();
        assert_eq!(text, "Quarterly report\nA&B\ttotal\n");
    }

    #[test]
    fn test_extract_docx_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("report.docx");
        write_docx(&path, SAMPLE_XML);

        let text = extract_text_from_docx(&path).unwrap();
        assert!(text.contains("Quarterly report"));
    }

    #[test]
    fn test_docx_not_a_zip() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("broken.docx");
        std::fs::write(&path, "definitely not a zip").unwrap();

        let err = extract_text_from_docx(&path).unwrap_err();
        assert!(matches!(err, ExtractError::Malformed { .. }));
    }

    #[test]
    fn test_docx_missing_document_xml() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("empty.docx");
        let file = std::fs::File::create(&path).unwrap();
        let mut zip = zip::ZipWriter::new(file);
        zip.start_file("other.txt", zip::write::FileOptions::default())
            .unwrap();
        zip.write_all(b"x").unwrap();
        zip.finish().unwrap();

        let err = extract_text_from_docx(&path).unwrap_err();
        assert!(err.to_string().contains(DOCUMENT_XML));
    }
}
