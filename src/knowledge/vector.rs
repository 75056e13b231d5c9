//! Vector Store - 벡터 저장소 트레이트 및 유틸리티
//!
//! 저장소는 네임스페이스(폴더별 인덱스) 단위로 임베딩 레코드를 보관합니다.
//! 레코드 ID는 청크 ID이며, 같은 ID로 upsert하면 덮어씁니다.

use std::path::PathBuf;

use async_trait::async_trait;

use crate::collector::DocumentKind;
use crate::error::StoreError;

/// 인용 표시용 미리보기 길이 (문자)
pub const PREVIEW_CHARS: usize = 160;

// ============================================================================
// Types
// ============================================================================

/// 레코드 메타데이터 (출처 표시 + 프롬프트 조립)
#[derive(Debug, Clone, PartialEq)]
pub struct RecordMetadata {
    pub path: PathBuf,
    pub kind: DocumentKind,
    pub ordinal: usize,
    pub start: usize,
    pub end: usize,
    /// 한 줄 미리보기
    pub preview: String,
    /// 청크 전체 텍스트
    pub text: String,
}

/// 임베딩 레코드 (저장용)
#[derive(Debug, Clone, PartialEq)]
pub struct EmbeddingRecord {
    /// 청크 ID
    pub id: String,
    pub vector: Vec<f32>,
    pub metadata: RecordMetadata,
}

/// 검색 결과
#[derive(Debug, Clone, PartialEq)]
pub struct VectorMatch {
    pub id: String,
    /// 코사인 유사도 (클수록 가까움)
    pub score: f32,
    pub metadata: RecordMetadata,
}

// ============================================================================
// VectorStore Trait
// ============================================================================

/// VectorStore 트레이트 (async)
///
/// 벡터 저장소의 공통 인터페이스입니다.
#[async_trait]
pub trait VectorStore: Send + Sync {
    /// 레코드 삽입/갱신 (ID 기준)
    async fn upsert(&self, namespace: &str, records: &[EmbeddingRecord])
        -> Result<usize, StoreError>;

    /// ID로 레코드 삭제 (없는 ID는 무시)
    async fn delete(&self, namespace: &str, ids: &[String]) -> Result<usize, StoreError>;

    /// ID로 레코드 조회 (없는 ID는 건너뜀)
    async fn fetch(&self, namespace: &str, ids: &[String])
        -> Result<Vec<EmbeddingRecord>, StoreError>;

    /// 유사도 내림차순 상위 `k`개
    async fn query(
        &self,
        namespace: &str,
        vector: &[f32],
        k: usize,
    ) -> Result<Vec<VectorMatch>, StoreError>;

    /// 레코드 개수
    async fn count(&self, namespace: &str) -> Result<usize, StoreError>;

    /// 네임스페이스 전체 삭제
    async fn drop_namespace(&self, namespace: &str) -> Result<(), StoreError>;
}

// ============================================================================
// Utility Functions
// ============================================================================

/// 코사인 유사도 계산
///
/// 두 벡터 간의 코사인 유사도를 계산합니다.
/// 결과는 -1.0 ~ 1.0 범위입니다.
///
/// # Arguments
/// * `a` - 첫 번째 벡터
/// * `b` - 두 번째 벡터
///
/// # Returns
/// 코사인 유사도 (-1.0 ~ 1.0)
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }

    let dot_product: f32 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
    let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();

    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }

    dot_product / (norm_a * norm_b)
}

/// 청크 텍스트의 한 줄 미리보기
pub fn preview(text: &str) -> String {
    let flat: String = text.split_whitespace().collect::<Vec<_>>().join(" ");
    if flat.chars().count() <= PREVIEW_CHARS {
        return flat;
    }
    let cut: String = flat.chars().take(PREVIEW_CHARS).collect();
    format!("{}...", cut.trim_end())
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cosine_similarity_same() {
        let a = vec![1.0, 0.0, 0.0];
        let b = vec![1.0, 0.0, 0.0];
        assert!((cosine_similarity(&a, &b) - 1.0).abs() < 0.0001);
    }

    #[test]
    fn test_cosine_similarity_orthogonal() {
        let a = vec![1.0, 0.0, 0.0];
        let c = vec![0.0, 1.0, 0.0];
        assert!((cosine_similarity(&a, &c) - 0.0).abs() < 0.0001);
    }

    #[test]
    fn test_cosine_similarity_opposite() {
        let a = vec![1.0, 0.0, 0.0];
        let d = vec![-1.0, 0.0, 0.0];
        assert!((cosine_similarity(&a, &d) - -1.0).abs() < 0.0001);
    }

    #[test]
    fn test_cosine_similarity_mismatched_lengths() {
        assert_eq!(cosine_similarity(&[1.0, 0.0], &[1.0, 0.0, 0.0]), 0.0);
        assert_eq!(cosine_similarity(&[], &[]), 0.0);
    }

    #[test]
    fn test_preview_flattens_and_truncates() {
        assert_eq!(preview("line one\n\nline   two"), "line one line two");

        let long = "word ".repeat(100);
        let p = preview(&long);
        assert!(p.ends_with("..."));
        assert!(p.chars().count() <= PREVIEW_CHARS + 3);
    }
}
