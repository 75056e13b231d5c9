//! 에러 타입
//!
//! 컴포넌트별 에러와 파이프라인 최상위 에러([`RagError`])를 정의합니다.
//! 로더/인덱서 단계의 파일 단위 실패는 에러가 아니라 요약([`FileFailure`])으로 모입니다.

use std::path::PathBuf;

use serde::Serialize;
use thiserror::Error;

// ============================================================================
// Pipeline Error
// ============================================================================

/// 파이프라인 최상위 에러
#[derive(Error, Debug)]
pub enum RagError {
    /// 설정 검증 실패
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    /// 폴더 로드 실패
    #[error("load error: {0}")]
    Load(#[from] LoadError),

    /// 인덱스가 없음 (사용자가 먼저 인덱싱해야 함)
    #[error("no index available for {folder}: index this folder first")]
    NoIndex { folder: String },

    /// 인덱싱 때와 다른 임베딩 모델로 질의
    #[error("embedding model mismatch: index was built with '{indexed}', but '{configured}' is configured")]
    ModelMismatch { indexed: String, configured: String },

    /// 임베딩 서비스 사용 불가
    #[error("embedding service unavailable: {0}")]
    EmbeddingUnavailable(String),

    /// 벡터 저장소 사용 불가
    #[error("vector store unavailable: {0}")]
    VectorStoreUnavailable(String),

    /// 생성 서비스 사용 불가
    #[error("generation service unavailable: {0}")]
    GenerationUnavailable(String),

    /// 인덱스 상태 저장소 에러
    #[error("index state error: {0}")]
    IndexState(#[from] StateError),

    /// 같은 폴더에 대한 인덱싱이 이미 진행 중
    #[error("an indexing run is already in progress for {folder}")]
    IndexBusy { folder: String },

    /// 빈 질문
    #[error("query is empty")]
    EmptyQuery,
}

pub type Result<T> = std::result::Result<T, RagError>;

// ============================================================================
// Component Errors
// ============================================================================

/// 설정 에러
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("invalid chunking: overlap ({overlap}) must be smaller than chunk_size ({chunk_size})")]
    InvalidChunking { chunk_size: usize, overlap: usize },

    #[error("invalid value for {field}: {reason}")]
    InvalidValue { field: &'static str, reason: String },
}

/// 폴더 단위 로드 에러
#[derive(Error, Debug)]
pub enum LoadError {
    #[error("folder not found or not a directory: {0}")]
    FolderNotFound(PathBuf),

    #[error("no documents could be loaded ({} file(s) failed)", failures.len())]
    NoDocuments { failures: Vec<FileFailure> },

    #[error("scan task failed: {0}")]
    ScanTask(String),
}

/// 텍스트 추출 에러
#[derive(Error, Debug)]
pub enum ExtractError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("pdf extraction failed: {0}")]
    Pdf(String),

    #[error("docx extraction failed: {0}")]
    Docx(String),

    #[error("unreadable encoding: {0}")]
    Encoding(String),

    #[error("binary content")]
    Binary,

    #[error("no extractable text")]
    Empty,
}

/// 임베딩 프로바이더 에러
#[derive(Error, Debug)]
pub enum EmbeddingError {
    #[error("request failed: {0}")]
    Request(String),

    #[error("provider returned {status}: {body}")]
    Status { status: u16, body: String },

    #[error("invalid response: {0}")]
    InvalidResponse(String),

    #[error("dimension mismatch: expected {expected}, got {actual}")]
    Dimension { expected: usize, actual: usize },
}

/// 생성 프로바이더 에러
#[derive(Error, Debug)]
pub enum GenerationError {
    #[error("request failed: {0}")]
    Request(String),

    #[error("provider returned {status}: {body}")]
    Status { status: u16, body: String },

    #[error("invalid stream frame: {0}")]
    InvalidFrame(String),
}

/// 벡터 저장소 에러
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("connection failed: {0}")]
    Connection(String),

    #[error("upsert failed: {0}")]
    Upsert(String),

    #[error("delete failed: {0}")]
    Delete(String),

    #[error("query failed: {0}")]
    Query(String),

    #[error("schema error: {0}")]
    Schema(String),
}

/// 인덱스 상태 저장소 에러
#[derive(Error, Debug)]
pub enum StateError {
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("corrupt index state: {0}")]
    Corrupt(String),
}

// ============================================================================
// Diagnostics
// ============================================================================

/// 파일 단위 비치명적 실패 (요약에 집계)
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FileFailure {
    pub path: PathBuf,
    pub reason: String,
}

impl FileFailure {
    pub fn new(path: impl Into<PathBuf>, reason: impl ToString) -> Self {
        Self {
            path: path.into(),
            reason: reason.to_string(),
        }
    }
}

// ============================================================================
// Tests
// ============================================================================
