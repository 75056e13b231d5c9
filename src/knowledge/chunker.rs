//! Text Chunking Module
//!
//! 문서 경계를 존중하는 오버랩 청킹을 제공합니다.
//! 청크는 정규화된 문서 텍스트의 바이트 구간(span)이며,
//! 구간들을 이어 붙이면 (오버랩 제외) 원문이 빠짐없이 복원됩니다.

use std::path::PathBuf;
use std::str::FromStr;
use std::sync::OnceLock;

use regex::Regex;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::collector::{Document, DocumentKind};
use crate::error::ConfigError;

// ============================================================================
// Chunk Configuration
// ============================================================================

/// 청킹 설정 (단위: UTF-8 바이트)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChunkConfig {
    /// 청크 최대 크기
    pub chunk_size: usize,
    /// 연속된 청크가 공유하는 최대 크기
    pub overlap: usize,
}

impl Default for ChunkConfig {
    fn default() -> Self {
        Self {
            chunk_size: 1200,
            overlap: 150,
        }
    }
}

impl ChunkConfig {
    pub fn new(chunk_size: usize, overlap: usize) -> Result<Self, ConfigError> {
        let config = Self {
            chunk_size,
            overlap,
        };
        config.validate()?;
        Ok(config)
    }

    /// 소스 코드 위주 폴더용 설정
    pub fn for_code() -> Self {
        Self {
            chunk_size: 1500,
            overlap: 200,
        }
    }

    /// 빠른 인덱싱용 설정 (오버랩 없음)
    pub fn for_fast() -> Self {
        Self {
            chunk_size: 1000,
            overlap: 0,
        }
    }

    /// overlap < chunk_size 검증 (청킹 전진 보장)
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.chunk_size == 0 {
            return Err(ConfigError::InvalidValue {
                field: "chunk_size",
                reason: "must be greater than zero".to_string(),
            });
        }
        if self.overlap >= self.chunk_size {
            return Err(ConfigError::InvalidChunking {
                chunk_size: self.chunk_size,
                overlap: self.overlap,
            });
        }
        Ok(())
    }
}

/// 청킹 프리셋 (`index --preset`)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChunkPreset {
    Default,
    Code,
    Fast,
}

impl ChunkPreset {
    pub fn config(self) -> ChunkConfig {
        match self {
            ChunkPreset::Default => ChunkConfig::default(),
            ChunkPreset::Code => ChunkConfig::for_code(),
            ChunkPreset::Fast => ChunkConfig::for_fast(),
        }
    }
}

impl FromStr for ChunkPreset {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "default" => Ok(ChunkPreset::Default),
            "code" => Ok(ChunkPreset::Code),
            "fast" => Ok(ChunkPreset::Fast),
            other => Err(ConfigError::InvalidValue {
                field: "preset",
                reason: format!("expected 'default', 'code' or 'fast', got '{}'", other),
            }),
        }
    }
}

// ============================================================================
// Types
// ============================================================================

/// 문서 텍스트 내 청크 구간
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Span {
    pub start: usize,
    pub end: usize,
    /// 이전 청크와 공유하는 앞부분 길이
    pub overlap_prev: usize,
}

/// 검색 단위 청크
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Chunk {
    /// (문서 지문, 순번)에서 유도한 결정적 ID
    pub id: String,
    /// 원본 문서 경로 (소유가 아닌 경로 참조)
    pub path: PathBuf,
    pub kind: DocumentKind,
    /// 문서 내 순번 (0-based)
    pub ordinal: usize,
    pub start: usize,
    pub end: usize,
    pub overlap_prev: usize,
    pub text: String,
}

/// 청크 ID 생성
///
/// 같은 지문과 순번은 항상 같은 ID를 만듭니다 (재인덱싱 멱등성).
pub fn chunk_id(fingerprint: &str, ordinal: usize) -> String {
    let digest = Sha256::digest(format!("{}:{}", fingerprint, ordinal).as_bytes());
    let hex = format!("{:x}", digest);
    hex[..32].to_string()
}

// ============================================================================
// Chunker Trait
// ============================================================================

/// 텍스트 청킹 전략 트레이트
pub trait Chunker: Send + Sync {
    /// 텍스트를 구간으로 분할
    fn split(&self, text: &str, kind: DocumentKind) -> Vec<Span>;

    /// 청커 설정
    fn config(&self) -> ChunkConfig;

    /// 청커 이름
    fn name(&self) -> &'static str;
}

/// 문서를 청크로 분할하고 ID/메타데이터 부여
pub fn chunk_document(chunker: &dyn Chunker, doc: &Document) -> Vec<Chunk> {
    chunker
        .split(&doc.text, doc.kind)
        .into_iter()
        .enumerate()
        .map(|(ordinal, span)| Chunk {
            id: chunk_id(&doc.fingerprint, ordinal),
            path: doc.path.clone(),
            kind: doc.kind,
            ordinal,
            start: span.start,
            end: span.end,
            overlap_prev: span.overlap_prev,
            text: doc.text[span.start..span.end].to_string(),
        })
        .collect()
}

// ============================================================================
// BoundaryChunker
// ============================================================================

/// 자연 경계 우선 청커
///
/// 청크 끝은 다음 순서로 고릅니다:
/// - 코드: 함수/클래스 정의 줄 시작
/// - 문단 경계 (`\n\n`)
/// - 줄바꿈
/// - 문장 끝
/// - 공백
/// - 위 경계가 없으면 UTF-8 경계에서 강제 절단
///
/// 청크가 너무 짧아지지 않도록 경계는 청크 크기의 절반 이후에서만 찾습니다.
pub struct BoundaryChunker {
    config: ChunkConfig,
}

impl BoundaryChunker {
    /// 설정으로 생성 (검증 포함)
    pub fn new(config: ChunkConfig) -> Result<Self, ConfigError> {
        config.validate()?;
        Ok(Self { config })
    }

    /// 기본 설정으로 생성
    pub fn with_defaults() -> Self {
        Self {
            config: ChunkConfig::default(),
        }
    }

    /// 청크 끝 위치 선택
    fn find_end(&self, text: &str, start: usize, kind: DocumentKind) -> usize {
        let mut hard_end = floor_char_boundary(text, start + self.config.chunk_size);
        if hard_end <= start {
            // chunk_size가 문자 하나보다 작은 경우
            hard_end = ceil_char_boundary(text, start + 1);
        }

        let min_end = floor_char_boundary(text, start + self.config.chunk_size / 2).max(start);
        let window = &text[min_end..hard_end];

        let relative = (if kind == DocumentKind::Code {
            last_definition_start(window, min_end, text)
        } else {
            None
        })
        .or_else(|| window.rfind("\n\n").map(|p| p + 2))
        .or_else(|| window.rfind('\n').map(|p| p + 1))
        .or_else(|| last_sentence_end(window))
        .or_else(|| window.rfind([' ', '\t']).map(|p| p + 1));

        match relative {
            Some(rel) if rel > 0 => min_end + rel,
            _ => hard_end,
        }
    }

    /// 다음 청크 시작 위치 선택 (오버랩 창 안의 문장/단어 시작)
    fn next_start(&self, text: &str, start: usize, end: usize) -> usize {
        if self.config.overlap == 0 {
            return end;
        }

        let window_start = ceil_char_boundary(text, end.saturating_sub(self.config.overlap).max(start + 1));
        if window_start >= end {
            return end;
        }

        let bytes = text.as_bytes();
        let sentence = (window_start..end).find(|&p| is_sentence_start(bytes, p));
        let word = || (window_start..end).find(|&p| is_word_start(bytes, p));

        sentence.or_else(word).unwrap_or(window_start)
    }
}

impl Chunker for BoundaryChunker {
    fn split(&self, text: &str, kind: DocumentKind) -> Vec<Span> {
        if text.trim().is_empty() {
            return vec![];
        }

        let mut spans = Vec::new();
        let mut start = 0;
        let mut overlap_prev = 0;

        loop {
            if text.len() - start <= self.config.chunk_size {
                spans.push(Span {
                    start,
                    end: text.len(),
                    overlap_prev,
                });
                break;
            }

            let end = self.find_end(text, start, kind);
            spans.push(Span {
                start,
                end,
                overlap_prev,
            });

            let next = self.next_start(text, start, end);
            overlap_prev = end - next;
            start = next;
        }

        spans
    }

    fn config(&self) -> ChunkConfig {
        self.config
    }

    fn name(&self) -> &'static str {
        "BoundaryChunker"
    }
}

// ============================================================================
// Helper Functions
// ============================================================================

fn definition_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(
            r"(?m)^[ \t]*(?:(?:pub(?:\([^)]*\))?|export|public|private|protected|static|async|default|abstract|final|unsafe)\s+)*(?:fn|def|class|impl|struct|enum|trait|interface|function|func|mod|module)\b",
        )
        .expect("definition regex is valid")
    })
}

/// 창 안에서 마지막 정의 줄의 시작 위치 (창 기준 상대 위치)
fn last_definition_start(window: &str, offset: usize, text: &str) -> Option<usize> {
    let bytes = text.as_bytes();
    definition_regex()
        .find_iter(window)
        .map(|m| m.start())
        .filter(|&rel| {
            let abs = offset + rel;
            rel > 0 && abs > 0 && bytes[abs - 1] == b'\n'
        })
        .last()
}

/// 창 안에서 마지막 문장 끝 (종결 부호 뒤 공백 다음 위치)
fn last_sentence_end(window: &str) -> Option<usize> {
    let bytes = window.as_bytes();
    (1..bytes.len())
        .rev()
        .find(|&i| is_space(bytes[i]) && matches!(bytes[i - 1], b'.' | b'!' | b'?'))
        .map(|i| i + 1)
}

#[inline]
fn is_space(b: u8) -> bool {
    matches!(b, b' ' | b'\t' | b'\n')
}

/// 문장 시작: 줄 시작 또는 종결 부호 + 공백 뒤
fn is_sentence_start(bytes: &[u8], p: usize) -> bool {
    if p == 0 || is_space(bytes[p]) || !is_space(bytes[p - 1]) {
        return false;
    }
    bytes[p - 1] == b'\n' || (p >= 2 && matches!(bytes[p - 2], b'.' | b'!' | b'?'))
}

/// 단어 시작: 공백 뒤 첫 비공백
fn is_word_start(bytes: &[u8], p: usize) -> bool {
    p > 0 && !is_space(bytes[p]) && is_space(bytes[p - 1])
}

/// UTF-8 경계 조정 (인덱스 이하로)
#[inline]
fn floor_char_boundary(s: &str, index: usize) -> usize {
    if index >= s.len() {
        s.len()
    } else {
        let mut i = index;
        while i > 0 && !s.is_char_boundary(i) {
            i -= 1;
        }
        i
    }
}

/// UTF-8 경계 조정 (인덱스 이상으로)
#[inline]
fn ceil_char_boundary(s: &str, index: usize) -> usize {
    if index >= s.len() {
        s.len()
    } else {
        let mut i = index;
        while i < s.len() && !s.is_char_boundary(i) {
            i += 1;
        }
        i
    }
}

// ============================================================================
// Factory Functions
// ============================================================================

/// 설정을 지정하여 청커 생성
pub fn boundary_chunker(config: ChunkConfig) -> Result<Box<dyn Chunker>, ConfigError> {
    Ok(Box::new(BoundaryChunker::new(config)?))
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    const THREE_PARAGRAPHS: &str = "Alpha one is first. Alpha two is second. Alpha three ends here.\n\n\
Bravo one is first. Bravo two is second. Bravo three ends here.\n\n\
Charlie one is first. Charlie two is second. Charlie ends.";

    fn chunker(chunk_size: usize, overlap: usize) -> BoundaryChunker {
        BoundaryChunker::new(ChunkConfig {
            chunk_size,
            overlap,
        })
        .unwrap()
    }

    fn doc(text: &str, kind: DocumentKind) -> Document {
        Document {
            path: PathBuf::from("/docs/sample"),
            kind,
            fingerprint: "f00d".to_string(),
            text: text.to_string(),
        }
    }

    /// 오버랩을 제외하고 청크를 이어 붙임
    fn stitch(chunks: &[Chunk]) -> String {
        let mut out = String::new();
        for (i, chunk) in chunks.iter().enumerate() {
            if i > 0 {
                assert_eq!(chunk.start, chunks[i - 1].end - chunk.overlap_prev);
            }
            out.push_str(&chunk.text[chunk.overlap_prev..]);
        }
        out
    }

    #[test]
    fn test_overlap_must_be_smaller_than_chunk_size() {
        assert!(matches!(
            ChunkConfig::new(100, 100),
            Err(ConfigError::InvalidChunking { .. })
        ));
        assert!(BoundaryChunker::new(ChunkConfig {
            chunk_size: 50,
            overlap: 80
        })
        .is_err());
        assert!(ChunkConfig::new(0, 0).is_err());
        assert!(ChunkConfig::new(100, 99).is_ok());
    }

    #[test]
    fn test_config_presets_are_valid() {
        assert!(ChunkConfig::default().validate().is_ok());
        assert!(ChunkConfig::for_code().validate().is_ok());
        assert_eq!(ChunkConfig::for_fast().overlap, 0);

        assert_eq!("code".parse::<ChunkPreset>().unwrap().config(), ChunkConfig::for_code());
        assert_eq!(" FAST ".parse::<ChunkPreset>().unwrap(), ChunkPreset::Fast);
        assert!("tiny".parse::<ChunkPreset>().is_err());
    }

    #[test]
    fn test_empty_text_yields_no_chunks() {
        let chunker = BoundaryChunker::with_defaults();
        assert!(chunker.split("", DocumentKind::Text).is_empty());
        assert!(chunker.split("  \n\n ", DocumentKind::Text).is_empty());
    }

    #[test]
    fn test_short_document_is_single_chunk() {
        let chunks = chunk_document(&chunker(500, 100), &doc("Short note.", DocumentKind::Text));
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].text, "Short note.");
        assert_eq!(chunks[0].overlap_prev, 0);
        assert_eq!(chunks[0].ordinal, 0);
    }

    #[test]
    fn test_three_paragraphs_share_one_sentence() {
        let chunks = chunk_document(&chunker(100, 30), &doc(THREE_PARAGRAPHS, DocumentKind::Text));

        assert_eq!(chunks.len(), 3);
        assert!(chunks[0].text.starts_with("Alpha one"));
        assert!(chunks[1].text.starts_with("Alpha three ends here."));
        assert!(chunks[1].text.contains("Bravo three ends here."));
        assert!(chunks[2].text.starts_with("Bravo three ends here."));
        assert!(chunks[2].text.ends_with("Charlie ends."));

        assert_eq!(&chunks[1].text[..chunks[1].overlap_prev], "Alpha three ends here.\n\n");
        assert_eq!(&chunks[2].text[..chunks[2].overlap_prev], "Bravo three ends here.\n\n");
        assert_eq!(stitch(&chunks), THREE_PARAGRAPHS);
    }

    #[test]
    fn test_chunks_respect_max_size_and_cover_text() {
        let text = "lorem ipsum dolor sit amet, consectetur adipiscing elit. ".repeat(40)
            + "끝부분에는 한국어 문장도 있습니다. 멀티바이트 경계를 확인합니다.";

        for (size, overlap) in [(64, 0), (64, 16), (200, 50), (333, 100)] {
            let chunks = chunk_document(&chunker(size, overlap), &doc(&text, DocumentKind::Text));
            assert!(chunks.len() > 1);
            for chunk in &chunks {
                assert!(chunk.text.len() <= size, "chunk of {} > {}", chunk.text.len(), size);
                assert!(chunk.overlap_prev <= overlap);
            }
            assert_eq!(stitch(&chunks), text);
        }
    }

    #[test]
    fn test_hard_cut_without_boundaries() {
        let text = "x".repeat(250);
        let chunks = chunk_document(&chunker(100, 10), &doc(&text, DocumentKind::Text));
        assert!(chunks.iter().all(|c| c.text.len() <= 100));
        assert_eq!(chunks[1].overlap_prev, 10);
        assert_eq!(stitch(&chunks), text);
    }

    #[test]
    fn test_code_splits_before_definitions() {
        let body = "    let value = compute();\n".repeat(3);
        let text = format!(
            "fn first() {{\n{body}}}\nfn second() {{\n{body}}}\nfn third() {{\n{body}}}\n"
        );
        let chunks = chunk_document(&chunker(120, 0), &doc(&text, DocumentKind::Code));

        assert!(chunks.len() >= 2);
        assert!(chunks[0].text.starts_with("fn first()"));
        assert!(chunks[1].text.starts_with("fn second()"));
        assert_eq!(stitch(&chunks), text);
    }

    #[test]
    fn test_chunking_is_deterministic() {
        let a = chunk_document(&chunker(100, 30), &doc(THREE_PARAGRAPHS, DocumentKind::Markdown));
        let b = chunk_document(&chunker(100, 30), &doc(THREE_PARAGRAPHS, DocumentKind::Markdown));
        assert_eq!(a, b);
    }

    #[test]
    fn test_chunk_id_depends_on_fingerprint_and_ordinal() {
        assert_eq!(chunk_id("abc", 0), chunk_id("abc", 0));
        assert_ne!(chunk_id("abc", 0), chunk_id("abc", 1));
        assert_ne!(chunk_id("abc", 0), chunk_id("abd", 0));
        assert_eq!(chunk_id("abc", 0).len(), 32);
    }

    #[test]
    fn test_char_boundaries() {
        let s = "Hello, 세계!";
        assert_eq!(floor_char_boundary(s, 5), 5);
        assert_eq!(floor_char_boundary(s, 8), 7);
        assert_eq!(ceil_char_boundary(s, 8), 10);
        assert_eq!(floor_char_boundary(s, 100), s.len());
        assert_eq!(floor_char_boundary("", 0), 0);
    }
}
