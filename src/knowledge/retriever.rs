//! Retriever - 질의 임베딩 + 벡터 검색 + 컨텍스트 조립
//!
//! 커밋된 매니페스트에 있는 청크만 결과로 내보내며,
//! 같은 문서에서 구간이 겹치는 청크는 순위가 높은 쪽만 남깁니다.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::Serialize;

use super::store::{namespace_for, IndexManifest, IndexStateStore};
use super::vector::{VectorMatch, VectorStore};
use crate::collector::DocumentKind;
use crate::config::RagConfig;
use crate::embedding::EmbeddingProvider;
use crate::error::{RagError, Result};
use crate::retry::RetryPolicy;

// ============================================================================
// Types
// ============================================================================

/// 검색된 청크
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RetrievedChunk {
    pub id: String,
    pub path: PathBuf,
    pub kind: DocumentKind,
    pub ordinal: usize,
    pub start: usize,
    pub end: usize,
    /// 코사인 유사도
    pub score: f32,
    /// 순위 (1부터)
    pub rank: usize,
    pub preview: String,
    pub text: String,
}

impl RetrievedChunk {
    /// 같은 문서에서 구간이 겹치는지
    pub fn overlaps(&self, other: &RetrievedChunk) -> bool {
        self.path == other.path && self.start < other.end && other.start < self.end
    }

    fn from_match(m: VectorMatch) -> Self {
        Self {
            id: m.id,
            path: m.metadata.path,
            kind: m.metadata.kind,
            ordinal: m.metadata.ordinal,
            start: m.metadata.start,
            end: m.metadata.end,
            score: m.score,
            rank: 0,
            preview: m.metadata.preview,
            text: m.metadata.text,
        }
    }
}

/// 질의 컨텍스트 (순위순)
#[derive(Debug, Clone, Serialize)]
pub struct RetrievedContext {
    pub query: String,
    pub namespace: String,
    pub folder: PathBuf,
    pub chunks: Vec<RetrievedChunk>,
}

impl RetrievedContext {
    pub fn is_empty(&self) -> bool {
        self.chunks.is_empty()
    }
}

// ============================================================================
// Retriever
// ============================================================================

/// 벡터 검색기
#[derive(Clone)]
pub struct Retriever {
    embedder: Arc<dyn EmbeddingProvider>,
    store: Arc<dyn VectorStore>,
    state: IndexStateStore,
    embed_policy: RetryPolicy,
    store_policy: RetryPolicy,
    config: RagConfig,
}

impl Retriever {
    pub fn new(
        embedder: Arc<dyn EmbeddingProvider>,
        store: Arc<dyn VectorStore>,
        state: IndexStateStore,
        config: &RagConfig,
    ) -> Self {
        Self {
            embedder,
            store,
            state,
            embed_policy: config.embed_policy(),
            store_policy: config.store_policy(),
            config: config.clone(),
        }
    }

    /// 질의에 대한 상위 k개 청크 검색
    ///
    /// # Arguments
    /// * `folder` - 검색할 인덱스 폴더 (None이면 가장 최근 인덱스)
    /// * `query` - 질문
    /// * `k` - 결과 수 (None이면 기본값, 1..=8로 보정)
    pub async fn retrieve(
        &self,
        folder: Option<&Path>,
        query: &str,
        k: Option<usize>,
    ) -> Result<RetrievedContext> {
        let query = query.trim();
        if query.is_empty() {
            return Err(RagError::EmptyQuery);
        }

        let manifest = self.manifest_for(folder)?;
        let no_index = || RagError::NoIndex {
            folder: manifest.folder.display().to_string(),
        };

        if manifest.embed_model != self.embedder.model_id() {
            return Err(RagError::ModelMismatch {
                indexed: manifest.embed_model.clone(),
                configured: self.embedder.model_id().to_string(),
            });
        }

        let vector = self
            .embed_policy
            .run("query embedding", || self.embedder.embed(query))
            .await
            .map_err(|e| RagError::EmbeddingUnavailable(e.to_string()))?;

        if vector.len() != manifest.dimension {
            return Err(RagError::ModelMismatch {
                indexed: format!("{} ({} dims)", manifest.embed_model, manifest.dimension),
                configured: format!("{} ({} dims)", self.embedder.model_id(), vector.len()),
            });
        }

        let k = self.config.resolve_k(k);
        let matches = self
            .store_policy
            .run("vector query", || {
                self.store.query(&manifest.collection, &vector, k * 2)
            })
            .await
            .map_err(|e| RagError::VectorStoreUnavailable(e.to_string()))?;

        if matches.is_empty() {
            return Err(no_index());
        }

        let live = manifest.chunk_ids();
        let candidates: Vec<RetrievedChunk> = matches
            .into_iter()
            .filter(|m| live.contains(&m.id))
            .map(RetrievedChunk::from_match)
            .collect();

        let chunks = dedupe_overlapping(candidates, k);
        if chunks.is_empty() {
            return Err(no_index());
        }

        tracing::debug!(
            "Retrieved {} chunk(s) for {:?} from {}",
            chunks.len(),
            query,
            manifest.namespace
        );

        Ok(RetrievedContext {
            query: query.to_string(),
            namespace: manifest.namespace.clone(),
            folder: manifest.folder.clone(),
            chunks,
        })
    }

    /// 질의 대상 매니페스트 (없으면 NoIndex)
    fn manifest_for(&self, folder: Option<&Path>) -> Result<IndexManifest> {
        match folder {
            Some(folder) => {
                let root = std::fs::canonicalize(folder).unwrap_or_else(|_| folder.to_path_buf());
                self.state
                    .load(&namespace_for(&root))?
                    .ok_or_else(|| RagError::NoIndex {
                        folder: folder.display().to_string(),
                    })
            }
            None => self.state.latest()?.ok_or_else(|| RagError::NoIndex {
                folder: "(no folder indexed yet)".to_string(),
            }),
        }
    }
}

/// 겹치는 청크 제거 후 순위 부여 (입력은 유사도 내림차순)
fn dedupe_overlapping(candidates: Vec<RetrievedChunk>, k: usize) -> Vec<RetrievedChunk> {
    let mut kept: Vec<RetrievedChunk> = Vec::with_capacity(k);
    for chunk in candidates {
        if kept.len() == k {
            break;
        }
        if kept.iter().any(|c| c.id == chunk.id || c.overlaps(&chunk)) {
            continue;
        }
        kept.push(chunk);
    }
    for (i, chunk) in kept.iter_mut().enumerate() {
        chunk.rank = i + 1;
    }
    kept
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collector::Loader;
    use crate::knowledge::indexer::{Indexer, IndexerOptions};
    use crate::knowledge::{
        boundary_chunker, ChunkConfig, DocumentEntry, EmbeddingRecord, MemoryVectorStore,
        RecordMetadata,
    };
    use crate::testing::{write_file, CountingEmbedder, KeywordEmbedder};
    use chrono::Utc;
    use tempfile::TempDir;

    const VOCAB: &[&str] = &["rust", "python", "borrow", "checker", "garbage", "collector"];

    fn chunk(id: &str, path: &str, start: usize, end: usize, score: f32) -> RetrievedChunk {
        RetrievedChunk {
            id: id.to_string(),
            path: PathBuf::from(path),
            kind: DocumentKind::Text,
            ordinal: 0,
            start,
            end,
            score,
            rank: 0,
            preview: String::new(),
            text: String::new(),
        }
    }

    async fn indexed(
        dir: &TempDir,
        embedder: Arc<dyn EmbeddingProvider>,
    ) -> (Retriever, Arc<MemoryVectorStore>, IndexStateStore) {
        let store = Arc::new(MemoryVectorStore::new());
        let state = IndexStateStore::open_in_memory().unwrap();
        let config = RagConfig::default();

        let indexer = Indexer::new(
            Loader::with_defaults(),
            Arc::from(boundary_chunker(ChunkConfig::new(400, 50).unwrap()).unwrap()),
            embedder.clone(),
            store.clone(),
            state.clone(),
            IndexerOptions::from_config(&config),
        );
        indexer.index_folder(dir.path()).await.unwrap();

        let retriever = Retriever::new(embedder, store.clone(), state.clone(), &config);
        (retriever, store, state)
    }

    #[test]
    fn test_dedupe_keeps_higher_ranked_overlap() {
        let candidates = vec![
            chunk("a1", "/a.md", 100, 300, 0.9),
            chunk("a0", "/a.md", 0, 150, 0.8),
            chunk("b0", "/b.md", 0, 150, 0.7),
            chunk("a2", "/a.md", 300, 450, 0.6),
        ];
        let kept = dedupe_overlapping(candidates, 5);
        let ids: Vec<&str> = kept.iter().map(|c| c.id.as_str()).collect();
        assert_eq!(ids, vec!["a1", "b0", "a2"]);
        assert_eq!(kept.iter().map(|c| c.rank).collect::<Vec<_>>(), vec![1, 2, 3]);
    }

    #[test]
    fn test_dedupe_truncates_to_k() {
        let candidates = (0..6)
            .map(|i| chunk(&format!("c{}", i), &format!("/{}.md", i), 0, 10, 1.0))
            .collect();
        assert_eq!(dedupe_overlapping(candidates, 2).len(), 2);
    }

    #[tokio::test]
    async fn test_answer_document_is_top_ranked() {
        let dir = TempDir::new().unwrap();
        write_file(dir.path(), "rust.md", "Rust uses a borrow checker to enforce ownership.");
        write_file(dir.path(), "python.md", "Python relies on a garbage collector for memory.");
        write_file(dir.path(), "misc.txt", "Nothing relevant lives in this note.");

        let embedder: Arc<dyn EmbeddingProvider> = Arc::new(KeywordEmbedder::new(VOCAB));
        let (retriever, _, _) = indexed(&dir, embedder).await;

        let context = retriever
            .retrieve(Some(dir.path()), "What does the borrow checker do?", Some(2))
            .await
            .unwrap();
        assert!(!context.is_empty());
        assert!(context.chunks[0].path.ends_with("rust.md"));
        assert_eq!(context.chunks[0].rank, 1);
        assert!(context.chunks.len() <= 2);
    }

    #[tokio::test]
    async fn test_never_indexed_folder_is_no_index() {
        let dir = TempDir::new().unwrap();
        let retriever = Retriever::new(
            Arc::new(KeywordEmbedder::new(VOCAB)),
            Arc::new(MemoryVectorStore::new()),
            IndexStateStore::open_in_memory().unwrap(),
            &RagConfig::default(),
        );

        let result = retriever.retrieve(Some(dir.path()), "rust", None).await;
        assert!(matches!(result, Err(RagError::NoIndex { .. })));

        let result = retriever.retrieve(None, "rust", None).await;
        assert!(matches!(result, Err(RagError::NoIndex { .. })));
    }

    #[tokio::test]
    async fn test_empty_query_is_rejected() {
        let dir = TempDir::new().unwrap();
        write_file(dir.path(), "rust.md", "Rust borrow checker");
        let (retriever, _, _) = indexed(&dir, Arc::new(KeywordEmbedder::new(VOCAB))).await;

        let result = retriever.retrieve(Some(dir.path()), "   ", None).await;
        assert!(matches!(result, Err(RagError::EmptyQuery)));
    }

    #[tokio::test]
    async fn test_model_mismatch_is_detected() {
        let dir = TempDir::new().unwrap();
        write_file(dir.path(), "rust.md", "Rust borrow checker");
        let (_, store, state) = indexed(&dir, Arc::new(KeywordEmbedder::new(VOCAB))).await;

        let other = Arc::new(CountingEmbedder::new(VOCAB).with_model_id("test:other"));
        let retriever = Retriever::new(other.clone(), store, state, &RagConfig::default());

        let result = retriever.retrieve(Some(dir.path()), "rust", None).await;
        assert!(matches!(result, Err(RagError::ModelMismatch { .. })));
        assert_eq!(other.calls(), 0);
    }

    #[tokio::test]
    async fn test_uncommitted_records_are_invisible() {
        let dir = TempDir::new().unwrap();
        write_file(dir.path(), "rust.md", "Rust borrow checker");
        let embedder = Arc::new(KeywordEmbedder::new(VOCAB));
        let (retriever, store, state) = indexed(&dir, embedder.clone()).await;

        let manifest = state.latest().unwrap().unwrap();
        let orphan = "Rust rust rust borrow borrow checker checker";
        store
            .upsert(
                &manifest.collection,
                &[EmbeddingRecord {
                    id: "orphan".to_string(),
                    vector: embedder.vectorize(orphan),
                    metadata: RecordMetadata {
                        path: dir.path().join("ghost.md"),
                        kind: DocumentKind::Markdown,
                        ordinal: 0,
                        start: 0,
                        end: orphan.len(),
                        preview: orphan.to_string(),
                        text: orphan.to_string(),
                    },
                }],
            )
            .await
            .unwrap();

        let context = retriever.retrieve(None, "rust borrow checker", None).await.unwrap();
        assert!(context.chunks.iter().all(|c| c.id != "orphan"));
        assert_eq!(context.chunks.len(), 1);
    }

    #[tokio::test]
    async fn test_overlapping_chunks_never_both_returned() {
        let store = Arc::new(MemoryVectorStore::new());
        let state = IndexStateStore::open_in_memory().unwrap();
        let embedder = Arc::new(KeywordEmbedder::new(VOCAB));
        let path = PathBuf::from("/docs/rust.md");

        let texts = [(0, 60, "Rust borrow checker rules"), (40, 120, "checker rules rust borrow")];
        let records: Vec<EmbeddingRecord> = texts
            .iter()
            .enumerate()
            .map(|(i, (start, end, text))| EmbeddingRecord {
                id: format!("c{}", i),
                vector: embedder.vectorize(text),
                metadata: RecordMetadata {
                    path: path.clone(),
                    kind: DocumentKind::Markdown,
                    ordinal: i,
                    start: *start,
                    end: *end,
                    preview: text.to_string(),
                    text: text.to_string(),
                },
            })
            .collect();
        store.upsert("ns", &records).await.unwrap();
        state
            .commit(&IndexManifest {
                namespace: "ns".to_string(),
                collection: "ns".to_string(),
                folder: PathBuf::from("/docs"),
                embed_model: embedder.model_id().to_string(),
                dimension: VOCAB.len() + 1,
                chunking: ChunkConfig::default(),
                indexed_at: Utc::now(),
                documents: vec![DocumentEntry {
                    path: path.clone(),
                    kind: DocumentKind::Markdown,
                    fingerprint: "fp".to_string(),
                    chunk_ids: vec!["c0".to_string(), "c1".to_string()],
                    complete: true,
                }],
            })
            .unwrap();

        let retriever = Retriever::new(embedder, store, state, &RagConfig::default());
        let context = retriever.retrieve(None, "rust borrow", Some(5)).await.unwrap();
        assert_eq!(context.chunks.len(), 1);
    }

    #[tokio::test]
    async fn test_k_is_resolved_through_config() {
        let dir = TempDir::new().unwrap();
        for i in 0..12 {
            write_file(
                dir.path(),
                &format!("note{}.md", i),
                &format!("Rust borrow checker note number {}", i),
            );
        }
        let embedder: Arc<dyn EmbeddingProvider> = Arc::new(KeywordEmbedder::new(VOCAB));
        let (_, store, state) = indexed(&dir, embedder.clone()).await;

        let mut config = RagConfig::default();
        config.top_k = 3;
        let retriever = Retriever::new(embedder, store, state, &config);

        let default_k = retriever.retrieve(None, "rust borrow", None).await.unwrap();
        assert_eq!(default_k.chunks.len(), config.resolve_k(None));

        let clamped = retriever.retrieve(None, "rust borrow", Some(50)).await.unwrap();
        assert_eq!(clamped.chunks.len(), config.resolve_k(Some(50)));
    }
}
