//! 설정 모듈
//!
//! 기본값 → 환경변수 → CLI 플래그 순으로 덮어씁니다.
//! 모든 컴포넌트는 [`RagConfig::validate`]를 통과한 설정으로만 생성됩니다.

use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;
use crate::knowledge::ChunkConfig;
use crate::retry::RetryPolicy;

/// 질의 결과 수 기본값
pub const DEFAULT_TOP_K: usize = 5;
/// 질의 결과 수 상한
pub const MAX_TOP_K: usize = 8;

// ============================================================================
// Data Directory
// ============================================================================

/// 데이터 디렉토리 경로 (~/.local/share/.devdocs-rag/)
pub fn get_data_dir() -> PathBuf {
    dirs::data_local_dir()
        .or_else(dirs::home_dir)
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".devdocs-rag")
}

// ============================================================================
// Index Scope
// ============================================================================

/// 인덱스 범위
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum IndexScope {
    /// 폴더마다 독립된 인덱스 (동시에 질의 가능)
    #[default]
    PerFolder,
    /// 활성 인덱스 하나 (새 폴더 인덱싱 시 기존 인덱스 교체)
    Single,
}

impl FromStr for IndexScope {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "per-folder" | "folder" => Ok(IndexScope::PerFolder),
            "single" => Ok(IndexScope::Single),
            other => Err(ConfigError::InvalidValue {
                field: "scope",
                reason: format!("expected 'per-folder' or 'single', got '{}'", other),
            }),
        }
    }
}

// ============================================================================
// Retry / Timeouts
// ============================================================================

/// 재시도 설정
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetrySettings {
    pub max_retries: u32,
    pub initial_backoff_ms: u64,
}

impl Default for RetrySettings {
    fn default() -> Self {
        Self {
            max_retries: 3,
            initial_backoff_ms: 500,
        }
    }
}

/// 외부 호출 타임아웃 (초)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Timeouts {
    pub embed_secs: u64,
    pub store_secs: u64,
    /// 생성 스트림 조각 간 최대 대기
    pub generation_secs: u64,
}

impl Default for Timeouts {
    fn default() -> Self {
        Self {
            embed_secs: 30,
            store_secs: 30,
            generation_secs: 120,
        }
    }
}

impl Timeouts {
    pub fn embed(&self) -> Duration {
        Duration::from_secs(self.embed_secs)
    }

    pub fn store(&self) -> Duration {
        Duration::from_secs(self.store_secs)
    }

    pub fn generation(&self) -> Duration {
        Duration::from_secs(self.generation_secs)
    }
}

// ============================================================================
// RagConfig
// ============================================================================

/// 파이프라인 전체 설정
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RagConfig {
    /// 인덱스 상태/벡터 저장 위치
    pub data_dir: PathBuf,
    /// Ollama 서버 주소
    pub ollama_url: String,
    /// 임베딩 모델 (인덱싱/질의 공통)
    pub embed_model: String,
    /// 생성 모델
    pub generation_model: String,
    pub temperature: f32,
    pub num_ctx: u32,
    pub chunking: ChunkConfig,
    pub scope: IndexScope,
    /// 질의 기본 결과 수
    pub top_k: usize,
    /// 프롬프트에 넣을 컨텍스트 최대 문자 수
    pub context_budget: usize,
    /// 로드할 최대 파일 크기
    pub max_file_bytes: u64,
    /// 대화 세션에 유지할 턴 수
    pub history_turns: usize,
    /// 동시 임베딩 호출 수
    pub embed_concurrency: usize,
    /// 벡터 저장소 upsert 배치 크기
    pub upsert_batch_size: usize,
    pub retry: RetrySettings,
    pub timeouts: Timeouts,
}

impl Default for RagConfig {
    fn default() -> Self {
        Self {
            data_dir: get_data_dir(),
            ollama_url: crate::embedding::DEFAULT_OLLAMA_URL.to_string(),
            embed_model: "all-minilm".to_string(),
            generation_model: "qwen2.5:0.5b".to_string(),
            temperature: 0.1,
            num_ctx: 4096,
            chunking: ChunkConfig::default(),
            scope: IndexScope::PerFolder,
            top_k: DEFAULT_TOP_K,
            context_budget: 6000,
            max_file_bytes: 10 * 1024 * 1024,
            history_turns: 4,
            embed_concurrency: 4,
            upsert_batch_size: 64,
            retry: RetrySettings::default(),
            timeouts: Timeouts::default(),
        }
    }
}

impl RagConfig {
    /// 기본값에 환경변수를 적용하여 생성
    ///
    /// - `DEVDOCS_RAG_DATA_DIR`
    /// - `OLLAMA_HOST`
    /// - `DEVDOCS_RAG_EMBED_MODEL`, `DEVDOCS_RAG_GENERATION_MODEL`
    /// - `DEVDOCS_RAG_CHUNK_SIZE`, `DEVDOCS_RAG_OVERLAP`
    /// - `DEVDOCS_RAG_SCOPE` (`per-folder` | `single`)
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::default().with_env_overrides(|key| std::env::var(key).ok())
    }

    /// 조회 함수로 환경변수 덮어쓰기 (테스트에서 프로세스 환경과 분리)
    pub fn with_env_overrides<F>(mut self, lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        if let Some(dir) = var("DEVDOCS_RAG_DATA_DIR") {
            self.data_dir = PathBuf::from(dir);
        }
        if let Some(host) = var("OLLAMA_HOST") {
            self.ollama_url = host;
        }
        if let Some(model) = var("DEVDOCS_RAG_EMBED_MODEL") {
            self.embed_model = model;
        }
        if let Some(model) = var("DEVDOCS_RAG_GENERATION_MODEL") {
            self.generation_model = model;
        }
        if let Some(size) = var("DEVDOCS_RAG_CHUNK_SIZE") {
            self.chunking.chunk_size = parse_number("chunk_size", &size)?;
        }
        if let Some(overlap) = var("DEVDOCS_RAG_OVERLAP") {
            self.chunking.overlap = parse_number("overlap", &overlap)?;
        }
        if let Some(scope) = var("DEVDOCS_RAG_SCOPE") {
            self.scope = scope.parse()?;
        }

        Ok(self)
    }

    /// 설정 검증 (컴포넌트 생성 전에 호출)
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.chunking.validate()?;

        if !(1..=MAX_TOP_K).contains(&self.top_k) {
            return Err(ConfigError::InvalidValue {
                field: "top_k",
                reason: format!("must be between 1 and {}", MAX_TOP_K),
            });
        }
        if self.context_budget == 0 {
            return Err(invalid("context_budget", "must be greater than zero"));
        }
        if self.embed_concurrency == 0 {
            return Err(invalid("embed_concurrency", "must be greater than zero"));
        }
        if self.upsert_batch_size == 0 {
            return Err(invalid("upsert_batch_size", "must be greater than zero"));
        }
        if self.embed_model.trim().is_empty() {
            return Err(invalid("embed_model", "must not be empty"));
        }
        if self.ollama_url.trim().is_empty() {
            return Err(invalid("ollama_url", "must not be empty"));
        }
        Ok(())
    }

    /// 질의 결과 수 보정 (기본값 적용 후 1..=MAX_TOP_K)
    pub fn resolve_k(&self, k: Option<usize>) -> usize {
        k.unwrap_or(self.top_k).clamp(1, MAX_TOP_K)
    }

    /// 임베딩 호출 재시도 정책
    pub fn embed_policy(&self) -> RetryPolicy {
        RetryPolicy::new(
            self.retry.max_retries,
            Duration::from_millis(self.retry.initial_backoff_ms),
            self.timeouts.embed(),
        )
    }

    /// 벡터 저장소 호출 재시도 정책
    pub fn store_policy(&self) -> RetryPolicy {
        RetryPolicy::new(
            self.retry.max_retries,
            Duration::from_millis(self.retry.initial_backoff_ms),
            self.timeouts.store(),
        )
    }

    /// 생성 요청 시작 재시도 정책 (스트림 도중에는 재시도하지 않음)
    pub fn generation_policy(&self) -> RetryPolicy {
        RetryPolicy::new(
            self.retry.max_retries,
            Duration::from_millis(self.retry.initial_backoff_ms),
            self.timeouts.generation(),
        )
    }

    pub fn state_db_path(&self) -> PathBuf {
        self.data_dir.join("index_state.db")
    }

    pub fn vectors_path(&self) -> PathBuf {
        self.data_dir.join("vectors.lance")
    }
}

fn invalid(field: &'static str, reason: &str) -> ConfigError {
    ConfigError::InvalidValue {
        field,
        reason: reason.to_string(),
    }
}

fn parse_number<T: FromStr>(field: &'static str, value: &str) -> Result<T, ConfigError> {
    value.trim().parse().map_err(|_| ConfigError::InvalidValue {
        field,
        reason: format!("'{}' is not a valid number", value),
    })
}

// ============================================================================
// Tests
// ============================================================================
