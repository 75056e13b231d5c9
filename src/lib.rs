//! devdocs-rag - 로컬 문서 폴더 RAG 질의응답
//!
//! 폴더의 문서를 청크로 나눠 Ollama 임베딩과 함께 LanceDB에 저장하고,
//! 질문에 대해 관련 청크를 찾아 근거 기반 답변을 스트리밍합니다.
//! 인덱스 상태(문서 지문, 청크 ID)는 SQLite에 보관하여
//! 바뀐 문서만 다시 임베딩합니다.

pub mod answer;
pub mod cli;
pub mod collector;
pub mod config;
pub mod embedding;
pub mod error;
pub mod extractor;
pub mod generation;
pub mod knowledge;
pub mod pipeline;
pub mod retry;

#[cfg(test)]
mod testing;

// Re-exports
pub use answer::{Answer, AnswerEvent, AnswerStream, ConversationTurn, Session, SourceRef};
pub use collector::{Document, DocumentKind, Loader, LoaderConfig};
pub use config::{get_data_dir, IndexScope, RagConfig};
pub use embedding::{EmbeddingProvider, OllamaEmbedding};
pub use error::{RagError, Result};
pub use generation::{GenerationProvider, OllamaGeneration};
pub use knowledge::{
    ChunkConfig, Chunker, IndexStatus, IndexSummary, LanceVectorStore, RetrievedChunk,
    RetrievedContext, VectorStore,
};
pub use pipeline::{Pipeline, PipelineStatus};
