//! DOCX 텍스트 추출 모듈
//!
//! docx는 zip 컨테이너이며 본문은 `word/document.xml`에 있습니다.
//! `<w:t>` 텍스트 런을 이어 붙이고, 문단(`<w:p>`)마다 빈 줄로 구분합니다.

use std::io::{Cursor, Read};
use std::path::Path;

use quick_xml::events::Event;
use quick_xml::Reader;

use crate::error::ExtractError;

/// 본문 XML 엔트리 이름
const DOCUMENT_XML: &str = "word/document.xml";

/// 압축 해제 후 본문 XML 최대 크기 (zip bomb 방지)
const MAX_DOCUMENT_XML_BYTES: u64 = 50 * 1024 * 1024;

/// DOCX에서 텍스트 추출
pub fn extract_text_from_docx(path: &Path, bytes: &[u8]) -> Result<String, ExtractError> {
    let xml = read_document_xml(bytes)?;
    let text = paragraphs_from_xml(&xml)?.join("\n\n");

    if text.trim().is_empty() {
        tracing::warn!("No text extracted from DOCX: {:?}", path);
        return Err(ExtractError::Empty);
    }
    Ok(text)
}

/// zip 컨테이너에서 본문 XML 읽기
fn read_document_xml(bytes: &[u8]) -> Result<Vec<u8>, ExtractError> {
    let mut archive = zip::ZipArchive::new(Cursor::new(bytes))
        .map_err(|e| ExtractError::Docx(format!("not a docx archive: {}", e)))?;
    let entry = archive
        .by_name(DOCUMENT_XML)
        .map_err(|e| ExtractError::Docx(format!("{}: {}", DOCUMENT_XML, e)))?;

    let mut xml = Vec::new();
    entry
        .take(MAX_DOCUMENT_XML_BYTES)
        .read_to_end(&mut xml)
        .map_err(|e| ExtractError::Docx(e.to_string()))?;
    if xml.len() as u64 >= MAX_DOCUMENT_XML_BYTES {
        return Err(ExtractError::Docx(format!(
            "{} exceeds {} bytes",
            DOCUMENT_XML, MAX_DOCUMENT_XML_BYTES
        )));
    }
    Ok(xml)
}

/// 본문 XML -> 문단 목록 (빈 문단 제외)
fn paragraphs_from_xml(xml: &[u8]) -> Result<Vec<String>, ExtractError> {
    let mut reader = Reader::from_reader(xml);
    let mut buf = Vec::new();
    let mut paragraphs = Vec::new();
    let mut current = String::new();
    let mut in_text = false;

    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(e)) if e.local_name().as_ref() == b"t" => in_text = true,
            Ok(Event::End(e)) => match e.local_name().as_ref() {
                b"t" => in_text = false,
                b"p" => {
                    let paragraph = current.trim();
                    if !paragraph.is_empty() {
                        paragraphs.push(paragraph.to_string());
                    }
                    current.clear();
                }
                _ => {}
            },
            Ok(Event::Empty(e)) => match e.local_name().as_ref() {
                b"tab" => current.push('\t'),
                b"br" | b"cr" => current.push('\n'),
                _ => {}
            },
            Ok(Event::Text(t)) if in_text => {
                let text = t
                    .unescape()
                    .map_err(|e| ExtractError::Docx(format!("bad text run: {}", e)))?;
                current.push_str(&text);
            }
            Ok(Event::Eof) => break,
            Err(e) => {
                return Err(ExtractError::Docx(format!(
                    "malformed xml at byte {}: {}",
                    reader.buffer_position(),
                    e
                )))
            }
            _ => {}
        }
        buf.clear();
    }

    // 마지막 문단이 닫히지 않은 경우
    let tail = current.trim();
    if !tail.is_empty() {
        paragraphs.push(tail.to_string());
    }
    Ok(paragraphs)
}

// ============================================================================
// Tests
// ============================================================================
