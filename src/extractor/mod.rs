//! 콘텐츠 추출 모듈
//!
//! 파일 원본 바이트에서 텍스트를 추출하고 정규화합니다.
//! - 텍스트/마크다운/코드: UTF-8 디코딩
//! - PDF: pdf-extract로 텍스트 추출
//! - DOCX: zip + quick-xml로 본문 문단 추출

pub mod docx;
pub mod pdf;

use std::path::Path;
use std::sync::OnceLock;

use regex::Regex;

use crate::collector::DocumentKind;
use crate::error::ExtractError;

// ============================================================================
// TextExtractor Trait
// ============================================================================

/// 텍스트 추출 트레이트 (`extract_text(file) -> text`)
pub trait TextExtractor: Send + Sync {
    /// 파일 원본 바이트에서 텍스트 추출
    fn extract_text(
        &self,
        path: &Path,
        kind: DocumentKind,
        bytes: &[u8],
    ) -> Result<String, ExtractError>;
}

// ============================================================================
// File Extractor
// ============================================================================

/// 바이너리 판별 시 검사할 앞부분 크기
const BINARY_SNIFF_BYTES: usize = 8192;

/// 기본 파일 추출기
#[derive(Debug, Clone, Copy, Default)]
pub struct FileExtractor;

impl TextExtractor for FileExtractor {
    fn extract_text(
        &self,
        path: &Path,
        kind: DocumentKind,
        bytes: &[u8],
    ) -> Result<String, ExtractError> {
        match kind {
            DocumentKind::Pdf => pdf::extract_text_from_pdf(path, bytes),
            DocumentKind::Docx => docx::extract_text_from_docx(path, bytes),
            DocumentKind::Text | DocumentKind::Markdown | DocumentKind::Code => {
                decode_utf8(bytes)
            }
        }
    }
}

/// UTF-8 텍스트 디코딩 (바이너리/잘못된 인코딩은 실패)
fn decode_utf8(bytes: &[u8]) -> Result<String, ExtractError> {
    let sniff = &bytes[..bytes.len().min(BINARY_SNIFF_BYTES)];
    if sniff.contains(&0) {
        return Err(ExtractError::Binary);
    }

    String::from_utf8(bytes.to_vec()).map_err(|e| ExtractError::Encoding(e.utf8_error().to_string()))
}

// ============================================================================
// Normalization
// ============================================================================

fn blank_lines_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\n[ \t]*\n(?:[ \t]*\n)*").expect("blank line regex is valid"))
}

/// 추출 텍스트 정규화
///
/// BOM 제거, 줄바꿈 통일(LF), NUL 제거, 연속 빈 줄을 문단 경계 하나로 축약,
/// 앞뒤 공백 제거.
pub fn normalize_text(raw: &str) -> String {
    let text = raw.strip_prefix('\u{feff}').unwrap_or(raw);
    let text = text.replace("\r\n", "\n").replace(['\r', '\u{c}'], "\n").replace('\0', "");
    let text = blank_lines_regex().replace_all(&text, "\n\n");
    text.trim().to_string()
}

// ============================================================================
// Tests
// ============================================================================
