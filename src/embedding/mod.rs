//! 임베딩 모듈 - Ollama API를 통한 텍스트 벡터화
//!
//! 텍스트를 벡터로 변환하는 임베딩 프로바이더입니다.
//! 인덱싱과 질의에 반드시 같은 모델을 사용해야 하므로,
//! 프로바이더는 인덱스 상태에 기록될 모델 식별자를 노출합니다.
//!
//! ## 사용법
//! ```rust,ignore
//! let embedder = OllamaEmbedding::new("http://localhost:11434", "all-minilm", timeout)?;
//! let embedding = embedder.embed("Hello, world!").await?;
//! ```

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::config::RagConfig;
use crate::error::EmbeddingError;

// ============================================================================
// EmbeddingProvider Trait
// ============================================================================

/// 임베딩 프로바이더 트레이트 (`embed(text) -> vector`)
#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    /// 단일 텍스트 임베딩
    async fn embed(&self, text: &str) -> Result<Vec<f32>, EmbeddingError>;

    /// 모델 식별자 (인덱스 상태에 기록되어 질의 시 비교됨)
    fn model_id(&self) -> &str;

    /// 벡터 차원 (첫 호출 전에는 알 수 없으면 None)
    fn dimension(&self) -> Option<usize> {
        None
    }
}

// ============================================================================
// Ollama Embedding
// ============================================================================

/// 기본 Ollama 주소
pub const DEFAULT_OLLAMA_URL: &str = "http://localhost:11434";

/// Ollama 임베딩 구현체
///
/// ref: https://github.com/ollama/ollama/blob/main/docs/api.md#generate-embeddings
#[derive(Debug, Clone)]
pub struct OllamaEmbedding {
    client: reqwest::Client,
    endpoint: String,
    model: String,
    model_id: String,
    /// 응답에서 관측한 차원 (0 = 미확인)
    observed_dimension: Arc<AtomicUsize>,
}

impl OllamaEmbedding {
    /// 새 Ollama 임베딩 인스턴스 생성
    ///
    /// # Arguments
    /// * `base_url` - Ollama 서버 주소 (스킴 생략 가능)
    /// * `model` - 임베딩 모델 이름 (예: all-minilm)
    /// * `timeout` - HTTP 요청 타임아웃
    pub fn new(base_url: &str, model: &str, timeout: Duration) -> Result<Self, EmbeddingError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| EmbeddingError::Request(format!("failed to create HTTP client: {}", e)))?;

        Ok(Self {
            client,
            endpoint: format!("{}/api/embeddings", normalize_base_url(base_url)),
            model: model.to_string(),
            model_id: format!("ollama:{}", model),
            observed_dimension: Arc::new(AtomicUsize::new(0)),
        })
    }

    /// 설정에서 생성
    pub fn from_config(config: &RagConfig) -> Result<Self, EmbeddingError> {
        Self::new(
            &config.ollama_url,
            &config.embed_model,
            config.timeouts.embed(),
        )
    }
}

/// Ollama 임베딩 요청 본문
#[derive(Debug, Serialize)]
struct EmbedRequest<'a> {
    model: &'a str,
    prompt: &'a str,
}

/// Ollama 임베딩 응답
#[derive(Debug, Deserialize)]
struct EmbedResponse {
    #[serde(default)]
    embedding: Vec<f32>,
}

/// Ollama 에러 응답
#[derive(Debug, Deserialize)]
pub(crate) struct OllamaError {
    pub(crate) error: String,
}

#[async_trait]
impl EmbeddingProvider for OllamaEmbedding {
    async fn embed(&self, text: &str) -> Result<Vec<f32>, EmbeddingError> {
        if text.trim().is_empty() {
            return Err(EmbeddingError::Request("cannot embed empty text".to_string()));
        }

        let request = EmbedRequest {
            model: &self.model,
            prompt: text,
        };

        let response = self
            .client
            .post(&self.endpoint)
            .json(&request)
            .send()
            .await
            .map_err(|e| EmbeddingError::Request(e.to_string()))?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| EmbeddingError::Request(format!("failed to read response body: {}", e)))?;

        if !status.is_success() {
            let body = serde_json::from_str::<OllamaError>(&body)
                .map(|e| e.error)
                .unwrap_or(body);
            return Err(EmbeddingError::Status {
                status: status.as_u16(),
                body,
            });
        }

        let embedding = parse_embedding(&body)?;

        let expected = self.observed_dimension.load(Ordering::Relaxed);
        if expected == 0 {
            self.observed_dimension.store(embedding.len(), Ordering::Relaxed);
        } else if expected != embedding.len() {
            return Err(EmbeddingError::Dimension {
                expected,
                actual: embedding.len(),
            });
        }

        Ok(embedding)
    }

    fn model_id(&self) -> &str {
        &self.model_id
    }

    fn dimension(&self) -> Option<usize> {
        match self.observed_dimension.load(Ordering::Relaxed) {
            0 => None,
            dim => Some(dim),
        }
    }
}

/// 응답 본문에서 임베딩 벡터 추출
fn parse_embedding(body: &str) -> Result<Vec<f32>, EmbeddingError> {
    let response: EmbedResponse = serde_json::from_str(body)
        .map_err(|e| EmbeddingError::InvalidResponse(e.to_string()))?;

    if response.embedding.is_empty() {
        return Err(EmbeddingError::InvalidResponse(
            "empty embedding (is the model pulled?)".to_string(),
        ));
    }

    Ok(response.embedding)
}

/// Ollama 주소 정규화 (`OLLAMA_HOST`는 스킴 없이 지정되기도 함)
pub fn normalize_base_url(base_url: &str) -> String {
    let trimmed = base_url.trim().trim_end_matches('/');
    if trimmed.starts_with("http://") || trimmed.starts_with("https://") {
        trimmed.to_string()
    } else {
        format!("http://{}", trimmed)
    }
}

// ============================================================================
// Factory Function
// ============================================================================

/// 설정에 따라 임베딩 프로바이더 생성
pub fn create_embedder(config: &RagConfig) -> Result<OllamaEmbedding, EmbeddingError> {
    let embedder = OllamaEmbedding::from_config(config)?;
    tracing::info!("Using Ollama embedding model: {}", config.embed_model);
    Ok(embedder)
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_base_url() {
        assert_eq!(normalize_base_url("localhost:11434"), "http://localhost:11434");
        assert_eq!(
            normalize_base_url("http://127.0.0.1:11434/"),
            "http://127.0.0.1:11434"
        );
        assert_eq!(normalize_base_url("https://ollama.lan"), "https://ollama.lan");
    }

    #[test]
    fn test_model_id_includes_provider() {
        let embedder =
            OllamaEmbedding::new("localhost:11434", "all-minilm", Duration::from_secs(5)).unwrap();
        assert_eq!(embedder.model_id(), "ollama:all-minilm");
        assert_eq!(embedder.endpoint, "http://localhost:11434/api/embeddings");
        assert_eq!(embedder.dimension(), None);
    }

    #[test]
    fn test_parse_embedding() {
        assert_eq!(
            parse_embedding(r#"{"embedding":[0.5,-1.0,2.0]}"#).unwrap(),
            vec![0.5, -1.0, 2.0]
        );
        assert!(matches!(
            parse_embedding(r#"{"embedding":[]}"#),
            Err(EmbeddingError::InvalidResponse(_))
        ));
        assert!(parse_embedding("not json").is_err());
    }

    #[test]
    fn test_request_body_shape() {
        let body = serde_json::to_value(EmbedRequest {
            model: "all-minilm",
            prompt: "hello",
        })
        .unwrap();
        assert_eq!(body["model"], "all-minilm");
        assert_eq!(body["prompt"], "hello");
    }

    #[tokio::test]
    async fn test_empty_text_is_rejected_without_request() {
        let embedder =
            OllamaEmbedding::new("localhost:1", "all-minilm", Duration::from_millis(50)).unwrap();
        assert!(matches!(
            embedder.embed("   ").await,
            Err(EmbeddingError::Request(_))
        ));
    }
}
