//! In-memory Vector Store
//!
//! 브루트포스 코사인 유사도 검색. 테스트와 오프라인 실행에 사용합니다.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::RwLock;

use super::vector::{cosine_similarity, EmbeddingRecord, VectorMatch, VectorStore};
use crate::error::StoreError;

type Namespaces = HashMap<String, HashMap<String, EmbeddingRecord>>;

/// 메모리 벡터 저장소
#[derive(Debug, Clone, Default)]
pub struct MemoryVectorStore {
    namespaces: Arc<RwLock<Namespaces>>,
}

impl MemoryVectorStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// 네임스페이스에 있는 ID 목록 (정렬됨)
    pub async fn ids(&self, namespace: &str) -> Vec<String> {
        let namespaces = self.namespaces.read().await;
        let mut ids: Vec<String> = namespaces
            .get(namespace)
            .map(|records| records.keys().cloned().collect())
            .unwrap_or_default();
        ids.sort();
        ids
    }

    /// 저장된 레코드 조회
    pub async fn get(&self, namespace: &str, id: &str) -> Option<EmbeddingRecord> {
        let namespaces = self.namespaces.read().await;
        namespaces.get(namespace).and_then(|r| r.get(id)).cloned()
    }
}

#[async_trait]
impl VectorStore for MemoryVectorStore {
    async fn upsert(
        &self,
        namespace: &str,
        records: &[EmbeddingRecord],
    ) -> Result<usize, StoreError> {
        let mut namespaces = self.namespaces.write().await;
        let table = namespaces.entry(namespace.to_string()).or_default();

        let dimension = table.values().next().map(|r| r.vector.len());
        for record in records {
            let expected = dimension.unwrap_or_else(|| records[0].vector.len());
            if record.vector.len() != expected {
                return Err(StoreError::Schema(format!(
                    "vector dimension {} does not match table dimension {}",
                    record.vector.len(),
                    expected
                )));
            }
        }

        for record in records {
            table.insert(record.id.clone(), record.clone());
        }
        Ok(records.len())
    }

    async fn delete(&self, namespace: &str, ids: &[String]) -> Result<usize, StoreError> {
        let mut namespaces = self.namespaces.write().await;
        let Some(table) = namespaces.get_mut(namespace) else {
            return Ok(0);
        };
        Ok(ids.iter().filter(|id| table.remove(*id).is_some()).count())
    }

    async fn fetch(
        &self,
        namespace: &str,
        ids: &[String],
    ) -> Result<Vec<EmbeddingRecord>, StoreError> {
        let namespaces = self.namespaces.read().await;
        let Some(table) = namespaces.get(namespace) else {
            return Ok(vec![]);
        };
        Ok(ids.iter().filter_map(|id| table.get(id).cloned()).collect())
    }

    async fn query(
        &self,
        namespace: &str,
        vector: &[f32],
        k: usize,
    ) -> Result<Vec<VectorMatch>, StoreError> {
        let namespaces = self.namespaces.read().await;
        let Some(table) = namespaces.get(namespace) else {
            return Ok(vec![]);
        };

        let mut matches: Vec<VectorMatch> = table
            .values()
            .map(|record| VectorMatch {
                id: record.id.clone(),
                score: cosine_similarity(vector, &record.vector),
                metadata: record.metadata.clone(),
            })
            .collect();

        // 동점은 ID 순으로 고정
        matches.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.id.cmp(&b.id))
        });
        matches.truncate(k);
        Ok(matches)
    }

    async fn count(&self, namespace: &str) -> Result<usize, StoreError> {
        let namespaces = self.namespaces.read().await;
        Ok(namespaces.get(namespace).map(|t| t.len()).unwrap_or(0))
    }

    async fn drop_namespace(&self, namespace: &str) -> Result<(), StoreError> {
        self.namespaces.write().await.remove(namespace);
        Ok(())
    }
}

// ============================================================================
// Tests
// ============================================================================
