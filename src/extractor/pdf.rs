//! PDF 텍스트 추출 모듈
//!
//! pdf-extract 크레이트를 사용하여 PDF에서 텍스트를 추출합니다.

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::path::Path;

use crate::error::ExtractError;

/// PDF에서 텍스트 추출
///
/// 페이지(폼피드로 구분)를 빈 줄로 이어 하나의 텍스트로 반환합니다.
/// 손상된 PDF에서 파서가 패닉하는 경우도 추출 실패로 처리합니다.
pub fn extract_text_from_pdf(path: &Path, bytes: &[u8]) -> Result<String, ExtractError> {
    let text = catch_unwind(AssertUnwindSafe(|| pdf_extract::extract_text_from_mem(bytes)))
        .map_err(|_| ExtractError::Pdf(format!("parser panicked on {:?}", path)))?
        .map_err(|e| ExtractError::Pdf(e.to_string()))?;

    if text.trim().is_empty() {
        tracing::warn!(
            "No text extracted from PDF: {:?}. It might be a scanned document.",
            path
        );
        return Err(ExtractError::Pdf(
            "no extractable text (scanned document?)".to_string(),
        ));
    }

    Ok(split_pdf_pages(&text).join("\n\n"))
}

/// PDF 텍스트를 페이지별로 분리
fn split_pdf_pages(text: &str) -> Vec<String> {
    // 폼피드 문자 (\x0c)로 페이지 분리
    let pages: Vec<String> = text
        .split('\x0c')
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect();

    if pages.is_empty() {
        vec![text.trim().to_string()]
    } else {
        pages
    }
}

// ============================================================================
// Tests
// ============================================================================
