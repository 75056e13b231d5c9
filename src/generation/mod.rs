//! 생성 모듈 - Ollama API를 통한 스트리밍 답변 생성
//!
//! 생성 결과는 한 번에 받는 대신 텍스트 조각의 지연 스트림으로 전달됩니다.
//! 소비자가 속도를 조절하며, 스트림을 drop하면 HTTP 응답 본문도 닫혀 생성이 중단됩니다.
//!
//! ref: https://github.com/ollama/ollama/blob/main/docs/api.md#generate-a-completion

use std::fmt;
use std::time::Duration;

use async_trait::async_trait;
use futures::stream::{self, BoxStream, Stream, StreamExt};
use serde::{Deserialize, Serialize};

use crate::config::RagConfig;
use crate::embedding::{normalize_base_url, OllamaError};
use crate::error::GenerationError;

/// 생성 텍스트 조각 스트림 (종료 표식 수신 시 끝남)
pub type TextStream = BoxStream<'static, Result<String, GenerationError>>;

// ============================================================================
// GenerationProvider Trait
// ============================================================================

/// 생성 요청
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GenerationRequest {
    /// 시스템 지시문
    pub system: String,
    /// 컨텍스트 + 질문이 포함된 프롬프트
    pub prompt: String,
}

/// 생성 프로바이더 트레이트 (`generate(prompt) -> text stream`)
#[async_trait]
pub trait GenerationProvider: Send + Sync {
    /// 생성 시작, 텍스트 조각 스트림 반환
    async fn generate(&self, request: &GenerationRequest) -> Result<TextStream, GenerationError>;

    /// 모델 식별자
    fn model_id(&self) -> &str;
}

// ============================================================================
// Ollama Generation
// ============================================================================

/// 생성 옵션
#[derive(Debug, Clone, Copy, Serialize)]
pub struct GenerationOptions {
    /// 사실 기반 RAG 답변을 위해 낮게 유지
    pub temperature: f32,
    /// 컨텍스트 윈도우 크기
    pub num_ctx: u32,
}

impl Default for GenerationOptions {
    fn default() -> Self {
        Self {
            temperature: 0.1,
            num_ctx: 4096,
        }
    }
}

/// Ollama 생성 구현체
#[derive(Debug, Clone)]
pub struct OllamaGeneration {
    client: reqwest::Client,
    endpoint: String,
    model: String,
    model_id: String,
    options: GenerationOptions,
}

impl OllamaGeneration {
    /// 새 Ollama 생성 인스턴스
    ///
    /// `connect_timeout`은 연결 수립에만 적용됩니다.
    /// 스트림 조각 간 대기 시간은 호출자가 제한합니다.
    pub fn new(
        base_url: &str,
        model: &str,
        options: GenerationOptions,
        connect_timeout: Duration,
    ) -> Result<Self, GenerationError> {
        let client = reqwest::Client::builder()
            .connect_timeout(connect_timeout)
            .build()
            .map_err(|e| GenerationError::Request(format!("failed to create HTTP client: {}", e)))?;

        Ok(Self {
            client,
            endpoint: format!("{}/api/generate", normalize_base_url(base_url)),
            model: model.to_string(),
            model_id: format!("ollama:{}", model),
            options,
        })
    }

    /// 설정에서 생성
    pub fn from_config(config: &RagConfig) -> Result<Self, GenerationError> {
        Self::new(
            &config.ollama_url,
            &config.generation_model,
            GenerationOptions {
                temperature: config.temperature,
                num_ctx: config.num_ctx,
            },
            config.timeouts.generation(),
        )
    }
}

/// Ollama 생성 요청 본문
#[derive(Debug, Serialize)]
struct GenerateBody<'a> {
    model: &'a str,
    system: &'a str,
    prompt: &'a str,
    stream: bool,
    options: GenerationOptions,
}

#[async_trait]
impl GenerationProvider for OllamaGeneration {
    async fn generate(&self, request: &GenerationRequest) -> Result<TextStream, GenerationError> {
        let body = GenerateBody {
            model: &self.model,
            system: &request.system,
            prompt: &request.prompt,
            stream: true,
            options: self.options,
        };

        let response = self
            .client
            .post(&self.endpoint)
            .json(&body)
            .send()
            .await
            .map_err(|e| GenerationError::Request(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            let body = serde_json::from_str::<OllamaError>(&body)
                .map(|e| e.error)
                .unwrap_or(body);
            return Err(GenerationError::Status {
                status: status.as_u16(),
                body,
            });
        }

        tracing::debug!("Streaming generation from {}", self.model_id);
        Ok(ndjson_increments(Box::pin(response.bytes_stream())))
    }

    fn model_id(&self) -> &str {
        &self.model_id
    }
}

// ============================================================================
// NDJSON Stream Decoding
// ============================================================================

/// 스트림 한 줄 (Ollama 생성 프레임)
#[derive(Debug, Deserialize)]
struct GenerateFrame {
    #[serde(default)]
    response: String,
    #[serde(default)]
    done: bool,
    #[serde(default)]
    error: Option<String>,
}

/// 줄 단위 프레임 디코더 (네트워크 조각 경계와 무관)
#[derive(Debug, Default)]
struct FrameDecoder {
    buf: Vec<u8>,
}

impl FrameDecoder {
    fn push(&mut self, bytes: &[u8]) {
        self.buf.extend_from_slice(bytes);
    }

    /// 완성된 다음 프레임
    fn next_frame(&mut self) -> Option<Result<GenerateFrame, GenerationError>> {
        loop {
            let pos = self.buf.iter().position(|&b| b == b'\n')?;
            let line: Vec<u8> = self.buf.drain(..=pos).collect();
            if line.iter().all(|b| b.is_ascii_whitespace()) {
                continue;
            }
            return Some(parse_frame(&line));
        }
    }

    /// 입력이 끝난 뒤 줄바꿈 없이 남은 프레임
    fn finish(&mut self) -> Option<Result<GenerateFrame, GenerationError>> {
        let rest = std::mem::take(&mut self.buf);
        if rest.iter().all(|b| b.is_ascii_whitespace()) {
            None
        } else {
            Some(parse_frame(&rest))
        }
    }
}

fn parse_frame(line: &[u8]) -> Result<GenerateFrame, GenerationError> {
    serde_json::from_slice(line).map_err(|e| GenerationError::InvalidFrame(e.to_string()))
}

struct DecodeState<S> {
    inner: S,
    decoder: FrameDecoder,
    exhausted: bool,
    finished: bool,
}

/// 바이트 스트림을 텍스트 조각 스트림으로 변환
///
/// `done: true` 프레임에서 끝나며, 표식 없이 끊기면 에러 한 번을 내고 끝납니다.
pub(crate) fn ndjson_increments<S, B, E>(inner: S) -> TextStream
where
    S: Stream<Item = Result<B, E>> + Unpin + Send + 'static,
    B: AsRef<[u8]> + Send + 'static,
    E: fmt::Display + Send + 'static,
{
    let state = DecodeState {
        inner,
        decoder: FrameDecoder::default(),
        exhausted: false,
        finished: false,
    };

    stream::unfold(state, |mut state| async move {
        next_increment(&mut state).await.map(|item| (item, state))
    })
    .boxed()
}

async fn next_increment<S, B, E>(
    state: &mut DecodeState<S>,
) -> Option<Result<String, GenerationError>>
where
    S: Stream<Item = Result<B, E>> + Unpin,
    B: AsRef<[u8]>,
    E: fmt::Display,
{
    loop {
        if state.finished {
            return None;
        }

        let frame = match state.decoder.next_frame() {
            Some(frame) => frame,
            None if state.exhausted => {
                state.finished = true;
                return Some(Err(GenerationError::InvalidFrame(
                    "stream ended without completion marker".to_string(),
                )));
            }
            None => match state.inner.next().await {
                Some(Ok(bytes)) => {
                    state.decoder.push(bytes.as_ref());
                    continue;
                }
                Some(Err(e)) => {
                    state.finished = true;
                    return Some(Err(GenerationError::Request(e.to_string())));
                }
                None => {
                    state.exhausted = true;
                    match state.decoder.finish() {
                        Some(frame) => frame,
                        None => continue,
                    }
                }
            },
        };

        let frame = match frame {
            Ok(frame) => frame,
            Err(e) => {
                state.finished = true;
                return Some(Err(e));
            }
        };

        if let Some(error) = frame.error {
            state.finished = true;
            return Some(Err(GenerationError::Request(error)));
        }
        if frame.done {
            state.finished = true;
        }
        if !frame.response.is_empty() {
            return Some(Ok(frame.response));
        }
    }
}

// ============================================================================
// Factory Function
// ============================================================================

/// 설정에 따라 생성 프로바이더 생성
pub fn create_generator(config: &RagConfig) -> Result<OllamaGeneration, GenerationError> {
    let generator = OllamaGeneration::from_config(config)?;
    tracing::info!("Using Ollama generation model: {}", config.generation_model);
    Ok(generator)
}

// ============================================================================
// Tests
// ============================================================================
