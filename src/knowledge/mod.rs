//! Knowledge 모듈 - 인덱싱과 검색
//!
//! - Chunker: 자연 경계 기반 오버랩 청킹
//! - Indexer: 청크 임베딩 + 벡터 저장소 동기화
//! - Retriever: 질의 벡터 검색 + 중복 제거
//! - SQLite: 폴더별 인덱스 상태 (매니페스트)
//! - LanceDB / Memory: 벡터 저장소 구현

mod chunker;
pub mod indexer;
mod lance;
mod memory;
pub mod retriever;
mod store;
mod vector;

// Re-exports
pub use chunker::{
    boundary_chunker, chunk_document, chunk_id, BoundaryChunker, Chunk, ChunkConfig, ChunkPreset,
    Chunker, Span,
};
pub use indexer::{ChunkFailure, IndexStatus, IndexSummary, Indexer, IndexerOptions};
pub use lance::LanceVectorStore;
pub use memory::MemoryVectorStore;
pub use retriever::{RetrievedChunk, RetrievedContext, Retriever};
pub use store::{
    namespace_for, DocumentEntry, IndexManifest, IndexStateStore, ManifestSummary, StagedWrites,
    StateStats,
};
pub use vector::{
    cosine_similarity, preview, EmbeddingRecord, RecordMetadata, VectorMatch, VectorStore,
    PREVIEW_CHARS,
};
