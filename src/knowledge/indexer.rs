//! Indexer - 폴더를 청크 벡터로 인덱싱
//!
//! 1. 네임스페이스 잠금 (같은 폴더 동시 인덱싱 거부, 프로세스 간 잠금 파일 포함)
//! 2. 이전 실행이 남긴 커밋되지 않은 쓰기 정리
//! 3. 모델/청킹 설정이 바뀌었으면 새 컬렉션에 전체 재구축 (이전 인덱스는 커밋 전까지 유지)
//! 4. 폴더 탐색 + 청킹 (blocking 스레드)
//! 5. 청크 ID 비교: 새 ID만 임베딩/upsert, 사라진 ID는 커밋 후 삭제
//! 6. 모든 쓰기가 끝난 뒤 매니페스트를 트랜잭션 하나로 커밋

use std::collections::{HashMap, HashSet};
use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use chrono::Utc;
use fs2::FileExt;
use futures::stream::{self, StreamExt};
use serde::Serialize;

use super::chunker::{chunk_document, Chunk, ChunkConfig, Chunker};
use super::store::{namespace_for, DocumentEntry, IndexManifest, IndexStateStore};
use super::vector::{preview, EmbeddingRecord, RecordMetadata, VectorStore};
use crate::collector::{resolve_folder, DocumentKind, Loaded, Loader};
use crate::config::{IndexScope, RagConfig};
use crate::embedding::EmbeddingProvider;
use crate::error::{FileFailure, LoadError, RagError, Result, StateError};
use crate::retry::RetryPolicy;

// ============================================================================
// Types
// ============================================================================

/// 인덱싱 결과 상태
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum IndexStatus {
    /// 새로 임베딩했거나 삭제/갱신한 청크, 또는 추가/삭제된 문서가 있음
    Indexed,
    /// 바뀐 것이 없음 (임베딩 호출 0회)
    Unchanged,
    /// 인덱싱할 문서가 없음
    NothingToIndex,
}

/// 임베딩에 실패해 건너뛴 청크
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ChunkFailure {
    pub chunk_id: String,
    pub path: PathBuf,
    pub ordinal: usize,
    pub reason: String,
}

/// 인덱싱 요약
#[derive(Debug, Clone, Serialize)]
pub struct IndexSummary {
    pub folder: PathBuf,
    pub namespace: String,
    pub status: IndexStatus,
    /// 새로 읽고 청킹한 문서 수
    pub documents_processed: usize,
    /// 지문이 같아 건너뛴 문서 수
    pub documents_unchanged: usize,
    pub chunks_indexed: usize,
    pub chunks_unchanged: usize,
    pub chunks_purged: usize,
    /// 대표 문서가 바뀌어 메타데이터를 갱신한 공유 청크 수
    pub chunks_relabeled: usize,
    pub load_failures: Vec<FileFailure>,
    pub chunk_failures: Vec<ChunkFailure>,
    pub elapsed: Duration,
}

/// 인덱서 옵션
#[derive(Debug, Clone, Copy)]
pub struct IndexerOptions {
    pub scope: IndexScope,
    pub embed_concurrency: usize,
    pub upsert_batch_size: usize,
    pub embed_policy: RetryPolicy,
    pub store_policy: RetryPolicy,
}

impl IndexerOptions {
    pub fn from_config(config: &RagConfig) -> Self {
        Self {
            scope: config.scope,
            embed_concurrency: config.embed_concurrency.max(1),
            upsert_batch_size: config.upsert_batch_size.max(1),
            embed_policy: config.embed_policy(),
            store_policy: config.store_policy(),
        }
    }
}

/// 탐색 + 청킹 결과
struct ScanOutcome {
    /// 새로 읽은 문서와 청크 (경로 순)
    documents: Vec<(PathBuf, DocumentKind, String, Vec<Chunk>)>,
    unchanged: Vec<PathBuf>,
    failures: Vec<FileFailure>,
}

// ============================================================================
// Namespace Lock
// ============================================================================

/// 진행 중인 인덱싱 네임스페이스 (drop 시 해제)
pub(crate) struct NamespaceGuard {
    active: Arc<Mutex<HashSet<String>>>,
    namespace: String,
    /// 다른 프로세스와 공유하는 잠금 파일
    lock_file: Option<File>,
}

impl Drop for NamespaceGuard {
    fn drop(&mut self) {
        if let Some(file) = self.lock_file.take() {
            let _ = file.unlock();
        }
        if let Ok(mut active) = self.active.lock() {
            active.remove(&self.namespace);
        }
    }
}

/// 잠금 파일 획득 (다른 프로세스가 잡고 있으면 None)
fn try_lock_file(dir: &Path, namespace: &str) -> std::io::Result<Option<File>> {
    std::fs::create_dir_all(dir)?;
    let file = OpenOptions::new()
        .read(true)
        .write(true)
        .create(true)
        .truncate(false)
        .open(dir.join(format!("{}.lock", namespace)))?;

    match file.try_lock_exclusive() {
        Ok(()) => Ok(Some(file)),
        Err(e) if e.raw_os_error() == fs2::lock_contended_error().raw_os_error() => Ok(None),
        Err(e) => Err(e),
    }
}

// ============================================================================
// Indexer
// ============================================================================

/// 폴더 인덱서
#[derive(Clone)]
pub struct Indexer {
    loader: Loader,
    chunker: Arc<dyn Chunker>,
    embedder: Arc<dyn EmbeddingProvider>,
    store: Arc<dyn VectorStore>,
    state: IndexStateStore,
    options: IndexerOptions,
    active: Arc<Mutex<HashSet<String>>>,
}

impl Indexer {
    pub fn new(
        loader: Loader,
        chunker: Arc<dyn Chunker>,
        embedder: Arc<dyn EmbeddingProvider>,
        store: Arc<dyn VectorStore>,
        state: IndexStateStore,
        options: IndexerOptions,
    ) -> Self {
        Self {
            loader,
            chunker,
            embedder,
            store,
            state,
            options,
            active: Arc::new(Mutex::new(HashSet::new())),
        }
    }

    /// 네임스페이스 잠금 획득 (이미 진행 중이면 IndexBusy)
    ///
    /// 같은 프로세스 안에서는 `active` 집합으로, 프로세스 사이에서는
    /// 상태 DB 옆의 잠금 파일로 막습니다. 잠금 파일은 프로세스가 죽으면 OS가 풉니다.
    pub(crate) fn acquire(&self, namespace: &str, folder: &Path) -> Result<NamespaceGuard> {
        let busy = || RagError::IndexBusy {
            folder: folder.display().to_string(),
        };

        {
            let mut active = self.active.lock().map_err(|_| busy())?;
            if !active.insert(namespace.to_string()) {
                return Err(busy());
            }
        }

        let mut guard = NamespaceGuard {
            active: Arc::clone(&self.active),
            namespace: namespace.to_string(),
            lock_file: None,
        };

        if let Some(dir) = self.state.lock_dir() {
            match try_lock_file(&dir, namespace).map_err(StateError::from)? {
                Some(file) => guard.lock_file = Some(file),
                None => {
                    tracing::warn!("Namespace {} is being indexed by another process", namespace);
                    return Err(busy());
                }
            }
        }

        Ok(guard)
    }

    /// 폴더 인덱싱
    pub async fn index_folder(&self, folder: &Path) -> Result<IndexSummary> {
        let started = Instant::now();
        let root = resolve_folder(folder)?;
        let namespace = namespace_for(&root);
        let _guard = self.acquire(&namespace, &root)?;

        tracing::info!("Indexing {:?} (namespace {})", root, namespace);

        let previous = self.state.load(&namespace)?;
        self.recover(&namespace, previous.as_ref()).await?;

        let chunking = self.chunker.config();
        let rebuild = previous
            .as_ref()
            .is_some_and(|prev| self.settings_changed(prev, chunking));

        // 재구축은 새 컬렉션에 쓰고, 이전 컬렉션은 새 매니페스트 커밋 후에 버림
        let (collection, base) = match &previous {
            Some(_) if rebuild => (staging_collection(&namespace), None),
            Some(prev) => (prev.collection.clone(), Some(prev)),
            None => (namespace.clone(), None),
        };
        let retired: Vec<String> = match &previous {
            Some(prev) if rebuild => vec![prev.collection.clone()],
            _ => Vec::new(),
        };

        let known = base.map(IndexManifest::fingerprints).unwrap_or_default();
        let outcome = self.scan(&root, known).await?;

        // 인덱싱할 문서가 없으면 이전 인덱스 정리
        if outcome.documents.is_empty() && outcome.unchanged.is_empty() {
            let mut purged = 0;
            if let Some(prev) = &previous {
                let collections = vec![prev.collection.clone()];
                self.state.remove_retiring(&namespace, &collections)?;
                if self.finish_cleanup(&namespace, &prev.collection, &[], &collections).await {
                    purged = prev.chunk_count();
                }
            }
            tracing::warn!(
                "Nothing to index in {:?} ({} file(s) failed to load)",
                root,
                outcome.failures.len()
            );
            return Ok(IndexSummary {
                folder: root,
                namespace,
                status: IndexStatus::NothingToIndex,
                documents_processed: 0,
                documents_unchanged: 0,
                chunks_indexed: 0,
                chunks_unchanged: 0,
                chunks_purged: purged,
                chunks_relabeled: 0,
                load_failures: outcome.failures,
                chunk_failures: Vec::new(),
                elapsed: started.elapsed(),
            });
        }

        let base_ids = base.map(IndexManifest::chunk_ids).unwrap_or_default();

        // 새 ID만 임베딩 (같은 내용의 파일은 ID를 공유, 경로가 가장 앞선 문서가 대표)
        let mut seen = HashSet::new();
        let to_embed: Vec<Chunk> = outcome
            .documents
            .iter()
            .flat_map(|(_, _, _, chunks)| chunks.iter())
            .filter(|chunk| !base_ids.contains(&chunk.id) && seen.insert(chunk.id.clone()))
            .cloned()
            .collect();

        let expected_dim = base.map(|p| p.dimension);
        let (embedded, chunk_failures, dimension) = self
            .embed_and_upsert(&namespace, &collection, to_embed, expected_dim)
            .await?;

        // 현재 살아있는 ID (실패한 청크 포함) 밖의 이전 ID는 삭제 대상
        let mut current_ids: HashSet<&str> = HashSet::new();
        for (_, _, _, chunks) in &outcome.documents {
            current_ids.extend(chunks.iter().map(|c| c.id.as_str()));
        }
        if let Some(base) = base {
            for path in &outcome.unchanged {
                if let Some(entry) = base.document(path) {
                    current_ids.extend(entry.chunk_ids.iter().map(String::as_str));
                }
            }
        }
        let mut stale: Vec<String> = base_ids
            .iter()
            .filter(|id| !current_ids.contains(id.as_str()))
            .cloned()
            .collect();
        stale.sort();

        // 매니페스트 구성
        let failed: HashSet<&str> = chunk_failures.iter().map(|f| f.chunk_id.as_str()).collect();
        let mut documents = Vec::new();
        let mut chunks_unchanged = 0;

        for (path, kind, fingerprint, chunks) in &outcome.documents {
            let chunk_ids: Vec<String> = chunks
                .iter()
                .filter(|c| !failed.contains(c.id.as_str()))
                .map(|c| c.id.clone())
                .collect();
            chunks_unchanged += chunks.iter().filter(|c| base_ids.contains(&c.id)).count();
            documents.push(DocumentEntry {
                path: path.clone(),
                kind: *kind,
                fingerprint: fingerprint.clone(),
                complete: chunk_ids.len() == chunks.len(),
                chunk_ids,
            });
        }
        if let Some(base) = base {
            for path in &outcome.unchanged {
                if let Some(entry) = base.document(path) {
                    chunks_unchanged += entry.chunk_ids.len();
                    documents.push(entry.clone());
                }
            }
        }
        documents.sort_by(|a, b| a.path.cmp(&b.path));

        let relabeled = self.relabel_shared(&collection, base, &documents).await?;

        let documents_changed = base.map_or(true, |base| {
            !base
                .documents
                .iter()
                .map(|d| &d.path)
                .eq(documents.iter().map(|d| &d.path))
        });
        let status = if embedded == 0
            && stale.is_empty()
            && relabeled == 0
            && outcome.documents.is_empty()
            && !documents_changed
        {
            IndexStatus::Unchanged
        } else {
            IndexStatus::Indexed
        };

        let manifest = IndexManifest {
            namespace: namespace.clone(),
            collection: collection.clone(),
            folder: root.clone(),
            embed_model: self.embedder.model_id().to_string(),
            dimension: dimension.unwrap_or(0),
            chunking,
            indexed_at: Utc::now(),
            documents,
        };
        self.state.commit_with_cleanup(&manifest, &stale, &retired)?;

        let retired_chunks = match &previous {
            Some(prev) if rebuild => prev.chunk_count(),
            _ => 0,
        };
        let cleaned = self
            .finish_cleanup(&namespace, &collection, &stale, &retired)
            .await;

        if self.options.scope == IndexScope::Single {
            self.drop_other_namespaces(&namespace).await?;
        }

        let summary = IndexSummary {
            folder: root,
            namespace,
            status,
            documents_processed: outcome.documents.len(),
            documents_unchanged: outcome.unchanged.len(),
            chunks_indexed: embedded,
            chunks_unchanged,
            chunks_purged: if cleaned { stale.len() + retired_chunks } else { 0 },
            chunks_relabeled: relabeled,
            load_failures: outcome.failures,
            chunk_failures,
            elapsed: started.elapsed(),
        };

        tracing::info!(
            "Indexed {:?}: {} new chunk(s), {} unchanged, {} purged, {} failed in {:?}",
            summary.folder,
            summary.chunks_indexed,
            summary.chunks_unchanged,
            summary.chunks_purged,
            summary.chunk_failures.len(),
            summary.elapsed
        );
        Ok(summary)
    }

    /// 폴더 인덱스 삭제 (잠금 획득 후)
    ///
    /// 매니페스트가 있었는지 반환합니다.
    pub async fn remove_index(&self, namespace: &str, folder: &Path) -> Result<bool> {
        let _guard = self.acquire(namespace, folder)?;
        self.discard(namespace).await
    }

    /// 모델 또는 청킹 설정 변경 여부
    fn settings_changed(&self, prev: &IndexManifest, chunking: ChunkConfig) -> bool {
        let model_changed = prev.embed_model != self.embedder.model_id()
            || self
                .embedder
                .dimension()
                .is_some_and(|dim| dim != prev.dimension);
        if !model_changed && prev.chunking == chunking {
            return false;
        }
        tracing::warn!(
            "Index settings changed (model {} -> {}, chunking {:?} -> {:?}), rebuilding",
            prev.embed_model,
            self.embedder.model_id(),
            prev.chunking,
            chunking
        );
        true
    }

    /// 이전 실행이 남긴 쓰기 정리
    ///
    /// 커밋된 컬렉션에 남은 staged ID 중 매니페스트에 없는 것은 지우고,
    /// 다른 컬렉션(중단된 재구축, 버리기로 한 컬렉션)은 통째로 지웁니다.
    async fn recover(&self, namespace: &str, manifest: Option<&IndexManifest>) -> Result<()> {
        let staged = self.state.staged(namespace)?;
        let retired = self.state.retired(namespace)?;
        if staged.is_empty() && retired.is_empty() {
            return Ok(());
        }

        let committed = manifest.map(|m| (m.collection.as_str(), m.chunk_ids()));
        let mut orphans = 0;
        let mut dropped = HashSet::new();

        for writes in &staged {
            match &committed {
                Some((collection, live)) if *collection == writes.collection => {
                    let ids: Vec<String> = writes
                        .chunk_ids
                        .iter()
                        .filter(|id| !live.contains(*id))
                        .cloned()
                        .collect();
                    orphans += ids.len();
                    self.purge(&writes.collection, &ids).await?;
                }
                _ => {
                    if dropped.insert(writes.collection.clone()) {
                        self.drop_collection(&writes.collection).await?;
                    }
                }
            }
        }
        for collection in &retired {
            let in_use = committed.as_ref().is_some_and(|(c, _)| *c == collection.as_str());
            if !in_use && dropped.insert(collection.clone()) {
                self.drop_collection(collection).await?;
            }
        }

        self.state.clear_staged(namespace)?;
        tracing::info!(
            "Recovered interrupted writes for namespace {}: {} orphaned chunk(s), {} collection(s) dropped",
            namespace,
            orphans,
            dropped.len()
        );
        Ok(())
    }

    /// 폴더 탐색 + 청킹 (blocking 스레드)
    async fn scan(&self, root: &Path, known: HashMap<PathBuf, String>) -> Result<ScanOutcome> {
        let loader = self.loader.clone();
        let chunker = Arc::clone(&self.chunker);
        let root = root.to_path_buf();

        tokio::task::spawn_blocking(move || -> std::result::Result<ScanOutcome, LoadError> {
            let mut outcome = ScanOutcome {
                documents: Vec::new(),
                unchanged: Vec::new(),
                failures: Vec::new(),
            };

            for item in loader.scan_with_known(&root, known)? {
                match item {
                    Ok(Loaded::Document(doc)) => {
                        let chunks = chunk_document(chunker.as_ref(), &doc);
                        tracing::debug!("{:?}: {} chunk(s)", doc.path, chunks.len());
                        outcome
                            .documents
                            .push((doc.path, doc.kind, doc.fingerprint, chunks));
                    }
                    Ok(Loaded::Unchanged(file)) => outcome.unchanged.push(file.path),
                    Err(failure) => outcome.failures.push(failure),
                }
            }
            outcome.documents.sort_by(|a, b| a.0.cmp(&b.0));
            Ok(outcome)
        })
        .await
        .map_err(|e| LoadError::ScanTask(e.to_string()))?
        .map_err(RagError::from)
    }

    /// 새 청크 임베딩 + 배치 upsert
    ///
    /// 반환: (upsert한 청크 수, 실패한 청크, 벡터 차원)
    async fn embed_and_upsert(
        &self,
        namespace: &str,
        collection: &str,
        chunks: Vec<Chunk>,
        expected_dim: Option<usize>,
    ) -> Result<(usize, Vec<ChunkFailure>, Option<usize>)> {
        let total = chunks.len();
        let mut dimension = expected_dim;
        let mut failures = Vec::new();
        let mut embedded = 0;

        if total == 0 {
            return Ok((0, failures, dimension));
        }
        tracing::info!("Embedding {} chunk(s)", total);

        let embedder = Arc::clone(&self.embedder);
        let policy = self.options.embed_policy;
        let mut batches = stream::iter(chunks.into_iter().map(move |chunk| {
            let embedder = Arc::clone(&embedder);
            async move {
                let result = policy.run("embedding", || embedder.embed(&chunk.text)).await;
                (chunk, result)
            }
        }))
        .buffer_unordered(self.options.embed_concurrency)
        .chunks(self.options.upsert_batch_size);

        let mut last_error = String::new();
        while let Some(batch) = batches.next().await {
            let mut records = Vec::with_capacity(batch.len());

            for (chunk, result) in batch {
                let vector = match result {
                    Ok(vector) => vector,
                    Err(e) => {
                        last_error = e.to_string();
                        tracing::warn!(
                            "Skipping chunk {} of {:?}: {}",
                            chunk.ordinal,
                            chunk.path,
                            last_error
                        );
                        failures.push(chunk_failure(&chunk, &last_error));
                        continue;
                    }
                };

                match dimension {
                    Some(dim) if dim != vector.len() => {
                        last_error =
                            format!("dimension mismatch: expected {}, got {}", dim, vector.len());
                        failures.push(chunk_failure(&chunk, &last_error));
                        continue;
                    }
                    None => dimension = Some(vector.len()),
                    _ => {}
                }

                records.push(EmbeddingRecord {
                    id: chunk.id.clone(),
                    vector,
                    metadata: RecordMetadata {
                        preview: preview(&chunk.text),
                        path: chunk.path,
                        kind: chunk.kind,
                        ordinal: chunk.ordinal,
                        start: chunk.start,
                        end: chunk.end,
                        text: chunk.text,
                    },
                });
            }

            if records.is_empty() {
                continue;
            }
            let ids: Vec<String> = records.iter().map(|r| r.id.clone()).collect();
            self.state.stage_chunks(namespace, collection, &ids)?;
            self.store_call("vector upsert", || self.store.upsert(collection, &records))
                .await?;
            embedded += records.len();
            tracing::debug!("Upserted {}/{} chunk(s)", embedded, total);
        }

        if embedded == 0 {
            return Err(RagError::EmbeddingUnavailable(format!(
                "all {} chunk(s) failed to embed: {}",
                total, last_error
            )));
        }

        Ok((embedded, failures, dimension))
    }

    /// 오래된 레코드 삭제
    async fn purge(&self, collection: &str, ids: &[String]) -> Result<()> {
        if ids.is_empty() {
            return Ok(());
        }
        for batch in ids.chunks(self.options.upsert_batch_size) {
            self.store_call("vector delete", || self.store.delete(collection, batch))
                .await?;
        }
        tracing::info!("Purged {} stale chunk(s)", ids.len());
        Ok(())
    }

    async fn drop_collection(&self, collection: &str) -> Result<()> {
        self.store_call("vector drop", || self.store.drop_namespace(collection))
            .await
    }

    /// 커밋 후 정리 (실패하면 기록이 남아 다음 실행이 이어서 정리)
    async fn finish_cleanup(
        &self,
        namespace: &str,
        collection: &str,
        stale: &[String],
        retired: &[String],
    ) -> bool {
        let result = async {
            self.purge(collection, stale).await?;
            for old in retired {
                self.drop_collection(old).await?;
            }
            self.state.clear_staged(namespace)?;
            Ok::<(), RagError>(())
        }
        .await;

        match result {
            Ok(()) => true,
            Err(e) => {
                tracing::warn!(
                    "Cleanup for namespace {} deferred to the next run: {}",
                    namespace,
                    e
                );
                false
            }
        }
    }

    /// 공유 청크의 대표 문서가 바뀌었으면 레코드 메타데이터 갱신
    ///
    /// 같은 내용의 문서는 청크 ID를 공유하고, 레코드는 경로가 가장 앞선 문서를 가리킵니다.
    /// 그 문서가 사라지거나 바뀌면 남은 문서로 경로/종류를 옮깁니다.
    async fn relabel_shared(
        &self,
        collection: &str,
        base: Option<&IndexManifest>,
        documents: &[DocumentEntry],
    ) -> Result<usize> {
        let Some(base) = base else {
            return Ok(0);
        };
        let before = chunk_owners(&base.documents);
        let moved: HashMap<&str, &DocumentEntry> = chunk_owners(documents)
            .into_iter()
            .filter(|(id, owner)| before.get(id).is_some_and(|prev| prev.path != owner.path))
            .collect();
        if moved.is_empty() {
            return Ok(0);
        }

        let ids: Vec<String> = moved.keys().map(|id| id.to_string()).collect();
        let mut records = self
            .store_call("vector fetch", || self.store.fetch(collection, &ids))
            .await?;
        for record in &mut records {
            if let Some(owner) = moved.get(record.id.as_str()) {
                record.metadata.path = owner.path.clone();
                record.metadata.kind = owner.kind;
            }
        }
        for batch in records.chunks(self.options.upsert_batch_size) {
            self.store_call("vector upsert", || self.store.upsert(collection, batch))
                .await?;
        }

        tracing::info!("Relabeled {} shared chunk(s)", records.len());
        Ok(records.len())
    }

    /// 네임스페이스의 매니페스트와 모든 컬렉션 삭제
    async fn discard(&self, namespace: &str) -> Result<bool> {
        let manifest = self.state.load(namespace)?;
        let mut collections: Vec<String> = self
            .state
            .staged(namespace)?
            .into_iter()
            .map(|w| w.collection)
            .collect();
        collections.extend(self.state.retired(namespace)?);
        if let Some(manifest) = &manifest {
            collections.push(manifest.collection.clone());
        }
        collections.sort();
        collections.dedup();

        let existed = self.state.remove_retiring(namespace, &collections)?;
        for collection in &collections {
            self.drop_collection(collection).await?;
        }
        self.state.clear_staged(namespace)?;
        Ok(existed)
    }

    /// 단일 인덱스 모드: 다른 네임스페이스 제거
    async fn drop_other_namespaces(&self, keep: &str) -> Result<()> {
        for summary in self.state.list()? {
            if summary.namespace == keep {
                continue;
            }
            self.discard(&summary.namespace).await?;
            tracing::info!("Dropped previous index for {:?}", summary.folder);
        }
        Ok(())
    }

    /// 재시도 정책을 적용한 저장소 호출
    async fn store_call<T, F, Fut>(&self, label: &str, op: F) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: std::future::Future<Output = std::result::Result<T, crate::error::StoreError>>,
    {
        self.options
            .store_policy
            .run(label, op)
            .await
            .map_err(|e| RagError::VectorStoreUnavailable(format!("{}: {}", label, e)))
    }
}

/// 재구축용 새 컬렉션 이름
fn staging_collection(namespace: &str) -> String {
    format!("{}_{}", namespace, Utc::now().timestamp_millis())
}

/// 청크 ID -> 대표 문서 (입력은 경로 순)
fn chunk_owners(documents: &[DocumentEntry]) -> HashMap<&str, &DocumentEntry> {
    let mut owners = HashMap::new();
    for doc in documents {
        for id in &doc.chunk_ids {
            owners.entry(id.as_str()).or_insert(doc);
        }
    }
    owners
}

fn chunk_failure(chunk: &Chunk, reason: &str) -> ChunkFailure {
    ChunkFailure {
        chunk_id: chunk.id.clone(),
        path: chunk.path.clone(),
        ordinal: chunk.ordinal,
        reason: reason.to_string(),
    }
}

// ============================================================================
// Tests
// ============================================================================
