//! 답변 오케스트레이터
//!
//! 검색된 청크로 근거 프롬프트를 만들고, 생성 스트림을 그대로 흘려보낸 뒤
//! 마지막에 실제로 프롬프트에 들어간 청크 기준의 출처를 붙입니다.
//!
//! 스트림은 소비자가 당길 때만 진행되며, drop하면 생성도 중단됩니다.
//! 중단된 턴은 세션에 기록되지 않습니다.

use std::collections::VecDeque;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use futures::stream::{self, BoxStream, StreamExt};
use serde::Serialize;

use crate::collector::DocumentKind;
use crate::config::RagConfig;
use crate::error::{RagError, Result};
use crate::generation::{GenerationProvider, GenerationRequest, TextStream};
use crate::knowledge::{RetrievedChunk, RetrievedContext};
use crate::retry::RetryPolicy;

/// 근거 기반 답변 지시문
pub const SYSTEM_PROMPT: &str = "You are a precise assistant. Answer the Question using ONLY the \
documents in the Context. If the Context does not contain the answer, say 'I don't know'. \
Do not use outside knowledge and do not invent sources.";

/// 프롬프트에 들어간 문서가 없을 때의 지시문
pub const UNGROUNDED_SYSTEM_PROMPT: &str = "You are a precise assistant. No documents from the \
indexed folder matched the Question. Say so first, then answer briefly only if you are confident. \
Do not cite or invent sources.";

// ============================================================================
// Types
// ============================================================================

/// 답변 출처 (문서 단위)
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SourceRef {
    pub path: PathBuf,
    pub kind: DocumentKind,
    /// 프롬프트에 사용된 청크 순번 (오름차순)
    pub ordinals: Vec<usize>,
    /// 가장 높은 유사도
    pub score: f32,
    pub preview: String,
}

/// 최종 답변
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Answer {
    pub text: String,
    pub sources: Vec<SourceRef>,
    /// 검색된 컨텍스트에 근거했는지 (사용된 청크가 0개면 false)
    pub grounded: bool,
}

/// 답변 스트림 이벤트
#[derive(Debug, Clone, PartialEq)]
pub enum AnswerEvent {
    /// 생성 텍스트 조각
    Delta(String),
    /// 마지막 이벤트 (정확히 한 번)
    Done(Answer),
}

/// 답변 스트림
pub type AnswerStream = BoxStream<'static, Result<AnswerEvent>>;

/// 대화 한 턴
#[derive(Debug, Clone, Serialize)]
pub struct ConversationTurn {
    pub query: String,
    /// 프롬프트에 사용된 청크 (순위순)
    pub chunks: Vec<RetrievedChunk>,
    pub answer: Answer,
}

impl ConversationTurn {
    /// 완료된 답변으로 턴 생성 (출처에 포함된 청크만 유지)
    pub fn new(query: impl Into<String>, context: &RetrievedContext, answer: Answer) -> Self {
        let chunks = context
            .chunks
            .iter()
            .filter(|chunk| {
                answer
                    .sources
                    .iter()
                    .any(|s| s.path == chunk.path && s.ordinals.contains(&chunk.ordinal))
            })
            .cloned()
            .collect();

        Self {
            query: query.into(),
            chunks,
            answer,
        }
    }
}

// ============================================================================
// Session
// ============================================================================

/// 최근 대화 기록 (최대 `max_turns`)
#[derive(Debug, Clone)]
pub struct Session {
    turns: VecDeque<ConversationTurn>,
    max_turns: usize,
}

impl Session {
    pub fn new(max_turns: usize) -> Self {
        Self {
            turns: VecDeque::with_capacity(max_turns),
            max_turns,
        }
    }

    /// 턴 기록 (넘치면 가장 오래된 턴 제거)
    pub fn record(&mut self, turn: ConversationTurn) {
        if self.max_turns == 0 {
            return;
        }
        while self.turns.len() >= self.max_turns {
            self.turns.pop_front();
        }
        self.turns.push_back(turn);
    }

    pub fn turns(&self) -> impl Iterator<Item = &ConversationTurn> {
        self.turns.iter()
    }

    pub fn len(&self) -> usize {
        self.turns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.turns.is_empty()
    }

    pub fn clear(&mut self) {
        self.turns.clear();
    }
}

// ============================================================================
// Prompt
// ============================================================================

/// 생성 모델에 보낼 프롬프트
#[derive(Debug, Clone)]
pub struct Prompt {
    pub system: String,
    pub user: String,
    /// 실제로 들어간 청크 (순위순)
    pub used: Vec<RetrievedChunk>,
}

/// 근거 프롬프트 생성
///
/// 청크는 순위순으로 `context_budget`(문자 수)까지 넣습니다.
/// 첫 청크가 예산보다 크면 문자 경계에서 자르고, 이후 들어가지 않는 청크는 버립니다.
pub fn build_prompt(
    query: &str,
    context: &RetrievedContext,
    history: &[ConversationTurn],
    context_budget: usize,
) -> Prompt {
    let mut blocks = Vec::new();
    let mut used = Vec::new();
    let mut spent = 0;

    for chunk in &context.chunks {
        let open = format!(
            "<doc id='{}' source='{}#{}'>\n",
            chunk.rank,
            chunk.path.display(),
            chunk.ordinal
        );
        let close = "\n</doc>";
        let overhead = open.chars().count() + close.len();
        let size = overhead + chunk.text.chars().count();

        if spent + size <= context_budget {
            blocks.push(format!("{}{}{}", open, chunk.text, close));
            spent += size;
            used.push(chunk.clone());
            continue;
        }

        if used.is_empty() && context_budget > overhead {
            let cut: String = chunk.text.chars().take(context_budget - overhead).collect();
            tracing::debug!(
                "Truncated top chunk {} to {} chars to fit the context budget",
                chunk.id,
                cut.chars().count()
            );
            blocks.push(format!("{}{}{}", open, cut, close));
            used.push(chunk.clone());
        }
        break;
    }

    let mut user = String::new();
    user.push_str("Context:\n");
    if blocks.is_empty() {
        user.push_str("(no matching documents)");
    } else {
        user.push_str(&blocks.join("\n\n"));
    }
    user.push_str("\n\n");

    if !history.is_empty() {
        user.push_str("Conversation so far:\n");
        for turn in history {
            user.push_str(&format!(
                "User: {}\nAssistant: {}\n",
                turn.query, turn.answer.text
            ));
        }
        user.push('\n');
    }

    user.push_str("Question:\n");
    user.push_str(query);
    user.push('\n');

    let system = if used.is_empty() {
        UNGROUNDED_SYSTEM_PROMPT
    } else {
        SYSTEM_PROMPT
    };

    Prompt {
        system: system.to_string(),
        user,
        used,
    }
}

/// 사용된 청크에서 문서별 출처 목록 (순위순)
pub fn collect_sources(used: &[RetrievedChunk]) -> Vec<SourceRef> {
    let mut sources: Vec<SourceRef> = Vec::new();
    for chunk in used {
        match sources.iter_mut().find(|s| s.path == chunk.path) {
            Some(source) => {
                source.ordinals.push(chunk.ordinal);
                source.score = source.score.max(chunk.score);
            }
            None => sources.push(SourceRef {
                path: chunk.path.clone(),
                kind: chunk.kind,
                ordinals: vec![chunk.ordinal],
                score: chunk.score,
                preview: chunk.preview.clone(),
            }),
        }
    }
    for source in &mut sources {
        source.ordinals.sort_unstable();
        source.ordinals.dedup();
    }
    sources
}

// ============================================================================
// AnswerOrchestrator
// ============================================================================

/// 답변 생성기
#[derive(Clone)]
pub struct AnswerOrchestrator {
    generator: Arc<dyn GenerationProvider>,
    context_budget: usize,
    /// 조각 간 최대 대기
    increment_timeout: Duration,
    start_policy: RetryPolicy,
}

impl AnswerOrchestrator {
    pub fn new(generator: Arc<dyn GenerationProvider>, config: &RagConfig) -> Self {
        Self {
            generator,
            context_budget: config.context_budget,
            increment_timeout: config.timeouts.generation(),
            start_policy: config.generation_policy(),
        }
    }

    /// 조각 간 타임아웃 변경
    pub fn with_increment_timeout(mut self, timeout: Duration) -> Self {
        self.increment_timeout = timeout;
        self
    }

    /// 답변 스트림 시작
    ///
    /// `Delta` 조각들 뒤에 `Done`이 정확히 한 번 옵니다.
    /// 스트림 도중의 실패는 `GenerationUnavailable` 항목 하나로 끝납니다.
    pub async fn answer(
        &self,
        query: &str,
        context: &RetrievedContext,
        session: Option<&Session>,
    ) -> Result<AnswerStream> {
        let history: Vec<ConversationTurn> = session
            .map(|s| s.turns().cloned().collect())
            .unwrap_or_default();
        let prompt = build_prompt(query, context, &history, self.context_budget);
        if prompt.used.is_empty() {
            tracing::warn!("No retrieved chunk fits the prompt, answer will be ungrounded");
        }

        let request = GenerationRequest {
            system: prompt.system,
            prompt: prompt.user,
        };
        let inner = self
            .start_policy
            .run("generation", || self.generator.generate(&request))
            .await
            .map_err(|e| RagError::GenerationUnavailable(e.to_string()))?;

        tracing::debug!(
            "Generating answer from {} chunk(s) with {}",
            prompt.used.len(),
            self.generator.model_id()
        );

        Ok(answer_events(
            inner,
            collect_sources(&prompt.used),
            !prompt.used.is_empty(),
            self.increment_timeout,
        ))
    }
}

struct EventState {
    inner: TextStream,
    text: String,
    sources: Vec<SourceRef>,
    grounded: bool,
    timeout: Duration,
    finished: bool,
}

/// 생성 조각 스트림 -> 답변 이벤트 스트림
fn answer_events(
    inner: TextStream,
    sources: Vec<SourceRef>,
    grounded: bool,
    timeout: Duration,
) -> AnswerStream {
    let state = EventState {
        inner,
        text: String::new(),
        sources,
        grounded,
        timeout,
        finished: false,
    };

    stream::unfold(state, |mut state| async move {
        if state.finished {
            return None;
        }

        let event = match tokio::time::timeout(state.timeout, state.inner.next()).await {
            Ok(Some(Ok(piece))) => {
                state.text.push_str(&piece);
                Ok(AnswerEvent::Delta(piece))
            }
            Ok(Some(Err(e))) => {
                state.finished = true;
                Err(RagError::GenerationUnavailable(e.to_string()))
            }
            Ok(None) => {
                state.finished = true;
                Ok(AnswerEvent::Done(Answer {
                    text: state.text.trim().to_string(),
                    sources: std::mem::take(&mut state.sources),
                    grounded: state.grounded,
                }))
            }
            Err(_) => {
                state.finished = true;
                Err(RagError::GenerationUnavailable(format!(
                    "no output for {:?}",
                    state.timeout
                )))
            }
        };

        Some((event, state))
    })
    .boxed()
}

// ============================================================================
// Tests
// ============================================================================
