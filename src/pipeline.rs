//! 파이프라인 - 설정/프로바이더/저장소 연결
//!
//! 인덱싱 트리거와 질의 인터페이스를 제공합니다.
//! 내부 컴포넌트는 모두 Arc로 공유되므로 `Pipeline`은 싸게 복제되며,
//! 동시 질의는 서로 상태를 공유하지 않습니다.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::Serialize;

use crate::answer::{AnswerOrchestrator, AnswerStream, Session};
use crate::collector::{Loader, LoaderConfig};
use crate::config::{IndexScope, RagConfig};
use crate::embedding::{create_embedder, EmbeddingProvider};
use crate::error::{RagError, Result, StateError};
use crate::extractor::FileExtractor;
use crate::generation::{create_generator, GenerationProvider};
use crate::knowledge::{
    boundary_chunker, namespace_for, ChunkConfig, Chunker, IndexStateStore, IndexSummary, Indexer,
    IndexerOptions, LanceVectorStore, ManifestSummary, RetrievedContext, Retriever, StateStats,
    VectorStore,
};
use crate::retry::RetryPolicy;

/// 상태 점검 결과
#[derive(Debug, Clone, Serialize)]
pub struct PipelineStatus {
    pub data_dir: PathBuf,
    pub ollama_url: String,
    pub embed_model: String,
    pub generation_model: String,
    pub scope: IndexScope,
    pub stats: StateStats,
    /// 임베딩 서비스 응답 (성공 시 벡터 차원)
    pub embedding: std::result::Result<usize, String>,
}

/// RAG 파이프라인
#[derive(Clone)]
pub struct Pipeline {
    config: RagConfig,
    embedder: Arc<dyn EmbeddingProvider>,
    state: IndexStateStore,
    indexer: Indexer,
    retriever: Retriever,
    orchestrator: AnswerOrchestrator,
}

impl Pipeline {
    /// 기본 구성으로 열기 (Ollama + LanceDB + SQLite)
    pub async fn open(config: RagConfig) -> Result<Self> {
        config.validate()?;

        std::fs::create_dir_all(&config.data_dir).map_err(StateError::from)?;

        let state = IndexStateStore::open(&config.state_db_path())?;
        let store = LanceVectorStore::open(&config.vectors_path())
            .await
            .map_err(|e| RagError::VectorStoreUnavailable(e.to_string()))?;
        let embedder = create_embedder(&config)
            .map_err(|e| RagError::EmbeddingUnavailable(e.to_string()))?;
        let generator = create_generator(&config)
            .map_err(|e| RagError::GenerationUnavailable(e.to_string()))?;

        Self::with_components(
            config,
            Arc::new(embedder),
            Arc::new(generator),
            Arc::new(store),
            state,
        )
    }

    /// 컴포넌트를 직접 지정하여 구성
    pub fn with_components(
        config: RagConfig,
        embedder: Arc<dyn EmbeddingProvider>,
        generator: Arc<dyn GenerationProvider>,
        store: Arc<dyn VectorStore>,
        state: IndexStateStore,
    ) -> Result<Self> {
        config.validate()?;

        let loader = Loader::new(
            LoaderConfig {
                max_file_bytes: config.max_file_bytes,
                ..LoaderConfig::default()
            },
            Arc::new(FileExtractor),
        );
        let chunker: Arc<dyn Chunker> = Arc::from(boundary_chunker(config.chunking)?);

        let indexer = Indexer::new(
            loader,
            chunker,
            Arc::clone(&embedder),
            Arc::clone(&store),
            state.clone(),
            IndexerOptions::from_config(&config),
        );
        let retriever = Retriever::new(
            Arc::clone(&embedder),
            Arc::clone(&store),
            state.clone(),
            &config,
        );
        let orchestrator = AnswerOrchestrator::new(generator, &config);

        Ok(Self {
            config,
            embedder,
            state,
            indexer,
            retriever,
            orchestrator,
        })
    }

    /// 폴더에 저장된 인덱스의 청킹 설정 (인덱스가 없으면 None)
    pub fn indexed_chunking(config: &RagConfig, folder: &Path) -> Result<Option<ChunkConfig>> {
        let path = config.state_db_path();
        if !path.exists() {
            return Ok(None);
        }
        let root = std::fs::canonicalize(folder).unwrap_or_else(|_| folder.to_path_buf());
        let state = IndexStateStore::open(&path)?;
        Ok(state.load(&namespace_for(&root))?.map(|m| m.chunking))
    }

    pub fn config(&self) -> &RagConfig {
        &self.config
    }

    /// 새 대화 세션
    pub fn session(&self) -> Session {
        Session::new(self.config.history_turns)
    }

    /// 폴더 인덱싱
    pub async fn index_folder(&self, folder: &Path) -> Result<IndexSummary> {
        self.indexer.index_folder(folder).await
    }

    /// 질의 컨텍스트 검색
    pub async fn retrieve(
        &self,
        folder: Option<&Path>,
        query: &str,
        k: Option<usize>,
    ) -> Result<RetrievedContext> {
        self.retriever.retrieve(folder, query, k).await
    }

    /// 검색된 컨텍스트로 답변 스트림 시작
    pub async fn answer(
        &self,
        query: &str,
        context: &RetrievedContext,
        session: Option<&Session>,
    ) -> Result<AnswerStream> {
        self.orchestrator.answer(query, context, session).await
    }

    /// 질의: 검색 후 답변 스트림
    pub async fn ask(
        &self,
        folder: Option<&Path>,
        query: &str,
        k: Option<usize>,
        session: Option<&Session>,
    ) -> Result<AnswerStream> {
        let context = self.retrieve(folder, query, k).await?;
        self.answer(query, &context, session).await
    }

    /// 인덱스 목록
    pub fn list(&self) -> Result<Vec<ManifestSummary>> {
        Ok(self.state.list()?)
    }

    /// 인덱스 삭제 (폴더 미지정 시 전체)
    ///
    /// 삭제한 인덱스 수를 반환합니다.
    pub async fn reset(&self, folder: Option<&Path>) -> Result<usize> {
        let targets: Vec<(String, PathBuf)> = match folder {
            Some(folder) => {
                let root = std::fs::canonicalize(folder).unwrap_or_else(|_| folder.to_path_buf());
                vec![(namespace_for(&root), root)]
            }
            None => self
                .state
                .list()?
                .into_iter()
                .map(|s| (s.namespace, s.folder))
                .collect(),
        };

        let mut removed = 0;
        for (namespace, root) in targets {
            if self.indexer.remove_index(&namespace, &root).await? {
                removed += 1;
            }
        }

        tracing::info!("Reset {} index(es)", removed);
        Ok(removed)
    }

    /// 상태 점검 (임베딩 서비스 응답 확인 포함)
    pub async fn status(&self) -> Result<PipelineStatus> {
        let health = RetryPolicy::no_retry(self.config.timeouts.embed());
        let embedding = health
            .run("embedding health check", || self.embedder.embed("health check"))
            .await
            .map(|v| v.len())
            .map_err(|e| e.to_string());

        Ok(PipelineStatus {
            data_dir: self.config.data_dir.clone(),
            ollama_url: self.config.ollama_url.clone(),
            embed_model: self.config.embed_model.clone(),
            generation_model: self.config.generation_model.clone(),
            scope: self.config.scope,
            stats: self.state.stats()?,
            embedding,
        })
    }
}

// ============================================================================
// Tests
// ============================================================================
