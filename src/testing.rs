//! 테스트용 가짜 컴포넌트

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use futures::stream::{self, StreamExt};

use crate::error::{EmbeddingError, GenerationError, StoreError};
use crate::embedding::EmbeddingProvider;
use crate::generation::{GenerationProvider, GenerationRequest, TextStream};
use crate::knowledge::{EmbeddingRecord, MemoryVectorStore, VectorMatch, VectorStore};

// ============================================================================
// Embedders
// ============================================================================

/// 어휘 단어 출현 횟수를 벡터로 쓰는 임베더
///
/// 마지막 차원은 상수라서 어휘가 없는 텍스트도 0 벡터가 되지 않습니다.
pub struct KeywordEmbedder {
    vocabulary: Vec<String>,
    model_id: String,
}

impl KeywordEmbedder {
    pub fn new(vocabulary: &[&str]) -> Self {
        Self {
            vocabulary: vocabulary.iter().map(|w| w.to_lowercase()).collect(),
            model_id: "test:keywords".to_string(),
        }
    }

    pub fn vectorize(&self, text: &str) -> Vec<f32> {
        let lower = text.to_lowercase();
        let words: Vec<&str> = lower
            .split(|c: char| !c.is_alphanumeric())
            .filter(|w| !w.is_empty())
            .collect();

        let mut vector: Vec<f32> = self
            .vocabulary
            .iter()
            .map(|term| words.iter().filter(|w| *w == term).count() as f32)
            .collect();
        vector.push(0.1);
        vector
    }
}

#[async_trait]
impl EmbeddingProvider for KeywordEmbedder {
    async fn embed(&self, text: &str) -> Result<Vec<f32>, EmbeddingError> {
        Ok(self.vectorize(text))
    }

    fn model_id(&self) -> &str {
        &self.model_id
    }

    fn dimension(&self) -> Option<usize> {
        Some(self.vocabulary.len() + 1)
    }
}

/// 호출 횟수를 세고 실패를 주입할 수 있는 임베더
pub struct CountingEmbedder {
    inner: KeywordEmbedder,
    calls: AtomicUsize,
    /// 이 문자열을 포함한 텍스트는 실패
    fail_marker: Mutex<Option<String>>,
    /// 모든 호출 실패
    unavailable: AtomicBool,
}

impl CountingEmbedder {
    pub fn new(vocabulary: &[&str]) -> Self {
        Self {
            inner: KeywordEmbedder::new(vocabulary),
            calls: AtomicUsize::new(0),
            fail_marker: Mutex::new(None),
            unavailable: AtomicBool::new(false),
        }
    }

    /// 다른 모델 식별자 사용
    pub fn with_model_id(mut self, model_id: &str) -> Self {
        self.inner.model_id = model_id.to_string();
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn reset_calls(&self) {
        self.calls.store(0, Ordering::SeqCst);
    }

    pub fn fail_on(&self, marker: Option<&str>) {
        *self.fail_marker.lock().unwrap() = marker.map(str::to_string);
    }

    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }
}

#[async_trait]
impl EmbeddingProvider for CountingEmbedder {
    async fn embed(&self, text: &str) -> Result<Vec<f32>, EmbeddingError> {
        self.calls.fetch_add(1, Ordering::SeqCst);

        if self.unavailable.load(Ordering::SeqCst) {
            return Err(EmbeddingError::Request("connection refused".to_string()));
        }
        let marker = self.fail_marker.lock().unwrap().clone();
        if let Some(marker) = marker {
            if text.contains(&marker) {
                return Err(EmbeddingError::Status {
                    status: 500,
                    body: "scripted failure".to_string(),
                });
            }
        }
        self.inner.embed(text).await
    }

    fn model_id(&self) -> &str {
        self.inner.model_id()
    }

    fn dimension(&self) -> Option<usize> {
        self.inner.dimension()
    }
}

// ============================================================================
// Generator
// ============================================================================

/// 정해진 조각을 순서대로 내보내는 생성기
pub struct ScriptedGenerator {
    pieces: Vec<String>,
    /// 마지막 조각 뒤에 멈춤 (타임아웃 테스트용)
    stall: bool,
    pulled: Arc<AtomicUsize>,
    requests: Mutex<Vec<GenerationRequest>>,
}

impl ScriptedGenerator {
    pub fn new(pieces: &[&str]) -> Self {
        Self {
            pieces: pieces.iter().map(|p| p.to_string()).collect(),
            stall: false,
            pulled: Arc::new(AtomicUsize::new(0)),
            requests: Mutex::new(Vec::new()),
        }
    }

    pub fn stalling(mut self) -> Self {
        self.stall = true;
        self
    }

    /// 소비자가 당겨간 조각 수
    pub fn pulled(&self) -> usize {
        self.pulled.load(Ordering::SeqCst)
    }

    pub fn last_request(&self) -> Option<GenerationRequest> {
        self.requests.lock().unwrap().last().cloned()
    }
}

#[async_trait]
impl GenerationProvider for ScriptedGenerator {
    async fn generate(&self, request: &GenerationRequest) -> Result<TextStream, GenerationError> {
        self.requests.lock().unwrap().push(request.clone());

        let pulled = Arc::clone(&self.pulled);
        let pieces = stream::iter(self.pieces.clone()).map(move |piece| {
            pulled.fetch_add(1, Ordering::SeqCst);
            Ok(piece)
        });

        if self.stall {
            Ok(pieces.chain(stream::pending()).boxed())
        } else {
            Ok(pieces.boxed())
        }
    }

    fn model_id(&self) -> &str {
        "test:scripted"
    }
}

// ============================================================================
// Recording Store
// ============================================================================

/// 저장소 쓰기 기록
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreOp {
    Upsert(Vec<String>),
    Delete(Vec<String>),
}

/// 쓰기 로그를 남기는 메모리 저장소
#[derive(Default)]
pub struct RecordingStore {
    pub inner: MemoryVectorStore,
    log: Mutex<Vec<StoreOp>>,
    fail_writes: AtomicBool,
    fail_deletes: AtomicBool,
    /// 성공할 수 있는 남은 upsert 호출 수 (None이면 제한 없음)
    upsert_budget: Mutex<Option<usize>>,
}

impl RecordingStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// 로그를 비우고 반환
    pub fn take_log(&self) -> Vec<StoreOp> {
        std::mem::take(&mut *self.log.lock().unwrap())
    }

    /// 기록된 upsert ID 전체
    pub fn upserted_ids(log: &[StoreOp]) -> Vec<String> {
        log.iter()
            .filter_map(|op| match op {
                StoreOp::Upsert(ids) => Some(ids.clone()),
                StoreOp::Delete(_) => None,
            })
            .flatten()
            .collect()
    }

    pub fn deleted_ids(log: &[StoreOp]) -> Vec<String> {
        log.iter()
            .filter_map(|op| match op {
                StoreOp::Delete(ids) => Some(ids.clone()),
                StoreOp::Upsert(_) => None,
            })
            .flatten()
            .collect()
    }

    pub fn set_fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    /// 삭제만 실패
    pub fn set_fail_deletes(&self, fail: bool) {
        self.fail_deletes.store(fail, Ordering::SeqCst);
    }

    /// `calls`번 upsert가 성공한 뒤부터 실패
    pub fn set_upsert_budget(&self, calls: Option<usize>) {
        *self.upsert_budget.lock().unwrap() = calls;
    }
}

#[async_trait]
impl VectorStore for RecordingStore {
    async fn upsert(
        &self,
        namespace: &str,
        records: &[EmbeddingRecord],
    ) -> Result<usize, StoreError> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(StoreError::Upsert("disk full".to_string()));
        }
        if let Some(remaining) = self.upsert_budget.lock().unwrap().as_mut() {
            if *remaining == 0 {
                return Err(StoreError::Upsert("disk full".to_string()));
            }
            *remaining -= 1;
        }
        self.log
            .lock()
            .unwrap()
            .push(StoreOp::Upsert(records.iter().map(|r| r.id.clone()).collect()));
        self.inner.upsert(namespace, records).await
    }

    async fn delete(&self, namespace: &str, ids: &[String]) -> Result<usize, StoreError> {
        if self.fail_writes.load(Ordering::SeqCst) || self.fail_deletes.load(Ordering::SeqCst) {
            return Err(StoreError::Delete("disk full".to_string()));
        }
        self.log.lock().unwrap().push(StoreOp::Delete(ids.to_vec()));
        self.inner.delete(namespace, ids).await
    }

    async fn fetch(
        &self,
        namespace: &str,
        ids: &[String],
    ) -> Result<Vec<EmbeddingRecord>, StoreError> {
        self.inner.fetch(namespace, ids).await
    }

    async fn query(
        &self,
        namespace: &str,
        vector: &[f32],
        k: usize,
    ) -> Result<Vec<VectorMatch>, StoreError> {
        self.inner.query(namespace, vector, k).await
    }

    async fn count(&self, namespace: &str) -> Result<usize, StoreError> {
        self.inner.count(namespace).await
    }

    async fn drop_namespace(&self, namespace: &str) -> Result<(), StoreError> {
        self.inner.drop_namespace(namespace).await
    }
}

// ============================================================================
// Fixtures
// ============================================================================

/// 테스트 폴더에 파일 작성
pub fn write_file(dir: &std::path::Path, name: &str, content: &str) -> std::path::PathBuf {
    let path = dir.join(name);
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).unwrap();
    }
    std::fs::write(&path, content).unwrap();
    path
}
