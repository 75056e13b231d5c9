//! LanceDB Vector Store - 디스크 기반 벡터 검색
//!
//! 네임스페이스마다 테이블 하나를 사용합니다.
//! 벡터 차원은 첫 upsert에서 정해지며, 검색은 코사인 거리로 수행합니다.
//! ref: https://lancedb.github.io/lancedb/

use std::path::{Path, PathBuf};
use std::sync::Arc;

use arrow_array::{
    Array, FixedSizeListArray, Float32Array, Int64Array, RecordBatch, RecordBatchIterator,
    StringArray,
};
use arrow_schema::{DataType, Field, Schema};
use async_trait::async_trait;
use futures::TryStreamExt;
use lancedb::connection::Connection;
use lancedb::query::{ExecutableQuery, QueryBase};
use lancedb::DistanceType;

use super::vector::{EmbeddingRecord, RecordMetadata, VectorMatch, VectorStore};
use crate::collector::DocumentKind;
use crate::error::StoreError;

// ============================================================================
// LanceVectorStore
// ============================================================================

/// LanceDB 벡터 저장소 구현
///
/// LanceDB는 Apache Arrow 기반 columnar 데이터베이스입니다.
pub struct LanceVectorStore {
    db: Connection,
    path: PathBuf,
}

impl LanceVectorStore {
    /// LanceDB 저장소 열기
    ///
    /// # Arguments
    /// * `path` - .lance 디렉토리 경로
    pub async fn open(path: &Path) -> Result<Self, StoreError> {
        if let Some(parent) = path.parent() {
            if !parent.exists() {
                tokio::fs::create_dir_all(parent).await.map_err(|e| {
                    StoreError::Connection(format!("failed to create LanceDB directory: {}", e))
                })?;
            }
        }

        let path_str = path
            .to_str()
            .ok_or_else(|| StoreError::Connection("invalid path encoding".to_string()))?;

        let db = lancedb::connect(path_str)
            .execute()
            .await
            .map_err(|e| StoreError::Connection(format!("failed to connect to LanceDB: {}", e)))?;

        Ok(Self {
            db,
            path: path.to_path_buf(),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// 벡터 테이블 스키마 생성
    fn create_schema(dimension: i32) -> Schema {
        Schema::new(vec![
            Field::new("id", DataType::Utf8, false),
            Field::new("path", DataType::Utf8, false),
            Field::new("kind", DataType::Utf8, false),
            Field::new("ordinal", DataType::Int64, false),
            Field::new("start", DataType::Int64, false),
            Field::new("end", DataType::Int64, false),
            Field::new("preview", DataType::Utf8, false),
            Field::new("text", DataType::Utf8, false),
            Field::new(
                "vector",
                DataType::FixedSizeList(
                    Arc::new(Field::new("item", DataType::Float32, true)),
                    dimension,
                ),
                false,
            ),
        ])
    }

    /// 레코드들을 Arrow RecordBatch로 변환
    fn records_to_batch(records: &[EmbeddingRecord]) -> Result<RecordBatch, StoreError> {
        let first = records
            .first()
            .ok_or_else(|| StoreError::Schema("cannot create batch from empty records".to_string()))?;
        let dimension = first.vector.len();
        if dimension == 0 {
            return Err(StoreError::Schema("empty vector".to_string()));
        }
        if let Some(bad) = records.iter().find(|r| r.vector.len() != dimension) {
            return Err(StoreError::Schema(format!(
                "record {} has dimension {}, expected {}",
                bad.id,
                bad.vector.len(),
                dimension
            )));
        }
        let dimension = i32::try_from(dimension)
            .map_err(|_| StoreError::Schema(format!("dimension {} too large", dimension)))?;

        let ids: Vec<&str> = records.iter().map(|r| r.id.as_str()).collect();
        let paths: Vec<String> = records
            .iter()
            .map(|r| r.metadata.path.to_string_lossy().into_owned())
            .collect();
        let kinds: Vec<&str> = records.iter().map(|r| r.metadata.kind.as_str()).collect();
        let ordinals: Vec<i64> = records.iter().map(|r| r.metadata.ordinal as i64).collect();
        let starts: Vec<i64> = records.iter().map(|r| r.metadata.start as i64).collect();
        let ends: Vec<i64> = records.iter().map(|r| r.metadata.end as i64).collect();
        let previews: Vec<&str> = records.iter().map(|r| r.metadata.preview.as_str()).collect();
        let texts: Vec<&str> = records.iter().map(|r| r.metadata.text.as_str()).collect();

        // 벡터를 FixedSizeList로 변환
        let flat: Vec<f32> = records
            .iter()
            .flat_map(|r| r.vector.iter().copied())
            .collect();
        let field = Arc::new(Field::new("item", DataType::Float32, true));
        let vectors = FixedSizeListArray::try_new(
            field,
            dimension,
            Arc::new(Float32Array::from(flat)) as Arc<dyn Array>,
            None,
        )
        .map_err(|e| StoreError::Schema(format!("failed to create vector array: {}", e)))?;

        RecordBatch::try_new(
            Arc::new(Self::create_schema(dimension)),
            vec![
                Arc::new(StringArray::from(ids)),
                Arc::new(StringArray::from(paths)),
                Arc::new(StringArray::from(kinds)),
                Arc::new(Int64Array::from(ordinals)),
                Arc::new(Int64Array::from(starts)),
                Arc::new(Int64Array::from(ends)),
                Arc::new(StringArray::from(previews)),
                Arc::new(StringArray::from(texts)),
                Arc::new(vectors),
            ],
        )
        .map_err(|e| StoreError::Schema(format!("failed to create RecordBatch: {}", e)))
    }

    /// 검색 결과 배치를 매치로 변환
    fn batch_to_matches(batch: &RecordBatch) -> Result<Vec<VectorMatch>, StoreError> {
        let columns = MetadataColumns::read(batch)?;

        // _distance 컬럼 (LanceDB가 자동 추가)
        let distances = batch
            .column_by_name("_distance")
            .and_then(|c| c.as_any().downcast_ref::<Float32Array>())
            .ok_or_else(|| StoreError::Query("missing _distance column".to_string()))?;

        let mut matches = Vec::with_capacity(batch.num_rows());
        for i in 0..batch.num_rows() {
            matches.push(VectorMatch {
                id: columns.ids.value(i).to_string(),
                // 코사인 거리 -> 유사도
                score: 1.0 - distances.value(i),
                metadata: columns.metadata(i)?,
            });
        }
        Ok(matches)
    }

    /// 조회 결과 배치를 레코드로 변환 (벡터 포함)
    fn batch_to_records(batch: &RecordBatch) -> Result<Vec<EmbeddingRecord>, StoreError> {
        let columns = MetadataColumns::read(batch)?;
        let vectors = batch
            .column_by_name("vector")
            .and_then(|c| c.as_any().downcast_ref::<FixedSizeListArray>())
            .ok_or_else(|| StoreError::Query("missing vector column".to_string()))?;

        let mut records = Vec::with_capacity(batch.num_rows());
        for i in 0..batch.num_rows() {
            let values = vectors.value(i);
            let floats = values
                .as_any()
                .downcast_ref::<Float32Array>()
                .ok_or_else(|| StoreError::Schema("vector items are not f32".to_string()))?;
            records.push(EmbeddingRecord {
                id: columns.ids.value(i).to_string(),
                vector: floats.values().to_vec(),
                metadata: columns.metadata(i)?,
            });
        }
        Ok(records)
    }

    /// 테이블 존재 여부 확인
    async fn table_exists(&self, table: &str) -> Result<bool, StoreError> {
        let names = self
            .db
            .table_names()
            .execute()
            .await
            .map_err(|e| StoreError::Connection(format!("failed to list tables: {}", e)))?;
        Ok(names.iter().any(|n| n == table))
    }

    /// 테이블 열기 (없으면 None)
    async fn open_table(&self, table: &str) -> Result<Option<lancedb::table::Table>, StoreError> {
        if !self.table_exists(table).await? {
            return Ok(None);
        }
        self.db
            .open_table(table)
            .execute()
            .await
            .map(Some)
            .map_err(|e| StoreError::Connection(format!("failed to open table {}: {}", table, e)))
    }
}

#[async_trait]
impl VectorStore for LanceVectorStore {
    async fn upsert(
        &self,
        namespace: &str,
        records: &[EmbeddingRecord],
    ) -> Result<usize, StoreError> {
        if records.is_empty() {
            return Ok(0);
        }

        let name = table_name(namespace);
        let batch = Self::records_to_batch(records)?;
        let schema = batch.schema();
        let batches = RecordBatchIterator::new(vec![Ok(batch)], schema);

        match self.open_table(&name).await? {
            Some(table) => {
                // 같은 ID는 갱신, 새 ID는 삽입
                let mut merge = table.merge_insert(&["id"]);
                merge
                    .when_matched_update_all(None)
                    .when_not_matched_insert_all();
                merge
                    .execute(Box::new(batches))
                    .await
                    .map_err(|e| StoreError::Upsert(e.to_string()))?;
            }
            None => {
                self.db
                    .create_table(&name, batches)
                    .execute()
                    .await
                    .map_err(|e| StoreError::Upsert(format!("failed to create table: {}", e)))?;
                tracing::debug!("Created vector table {}", name);
            }
        }

        Ok(records.len())
    }

    async fn delete(&self, namespace: &str, ids: &[String]) -> Result<usize, StoreError> {
        if ids.is_empty() {
            return Ok(0);
        }
        let Some(table) = self.open_table(&table_name(namespace)).await? else {
            return Ok(0);
        };

        let before = table
            .count_rows(None)
            .await
            .map_err(|e| StoreError::Delete(e.to_string()))?;

        table
            .delete(&id_filter(ids))
            .await
            .map_err(|e| StoreError::Delete(e.to_string()))?;

        let after = table
            .count_rows(None)
            .await
            .map_err(|e| StoreError::Delete(e.to_string()))?;
        Ok(before.saturating_sub(after))
    }

    async fn fetch(
        &self,
        namespace: &str,
        ids: &[String],
    ) -> Result<Vec<EmbeddingRecord>, StoreError> {
        if ids.is_empty() {
            return Ok(vec![]);
        }
        let Some(table) = self.open_table(&table_name(namespace)).await? else {
            return Ok(vec![]);
        };

        let results = table
            .query()
            .only_if(id_filter(ids))
            .limit(ids.len())
            .execute()
            .await
            .map_err(|e| StoreError::Query(e.to_string()))?;

        let batches: Vec<RecordBatch> = results
            .try_collect()
            .await
            .map_err(|e| StoreError::Query(e.to_string()))?;

        let mut records = Vec::new();
        for batch in &batches {
            records.extend(Self::batch_to_records(batch)?);
        }
        Ok(records)
    }

    async fn query(
        &self,
        namespace: &str,
        vector: &[f32],
        k: usize,
    ) -> Result<Vec<VectorMatch>, StoreError> {
        let Some(table) = self.open_table(&table_name(namespace)).await? else {
            return Ok(vec![]);
        };

        let results = table
            .vector_search(vector.to_vec())
            .map_err(|e| StoreError::Query(format!("failed to create vector search: {}", e)))?
            .distance_type(DistanceType::Cosine)
            .limit(k)
            .execute()
            .await
            .map_err(|e| StoreError::Query(e.to_string()))?;

        let batches: Vec<RecordBatch> = results
            .try_collect()
            .await
            .map_err(|e| StoreError::Query(e.to_string()))?;

        let mut matches = Vec::new();
        for batch in &batches {
            matches.extend(Self::batch_to_matches(batch)?);
        }
        matches.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        Ok(matches)
    }

    async fn count(&self, namespace: &str) -> Result<usize, StoreError> {
        let Some(table) = self.open_table(&table_name(namespace)).await? else {
            return Ok(0);
        };
        table
            .count_rows(None)
            .await
            .map_err(|e| StoreError::Query(format!("failed to count rows: {}", e)))
    }

    async fn drop_namespace(&self, namespace: &str) -> Result<(), StoreError> {
        let name = table_name(namespace);
        if !self.table_exists(&name).await? {
            return Ok(());
        }
        self.db
            .drop_table(&name)
            .await
            .map_err(|e| StoreError::Delete(format!("failed to drop table {}: {}", name, e)))?;
        tracing::info!("Dropped vector table {}", name);
        Ok(())
    }
}

// ============================================================================
// Helper Functions
// ============================================================================

/// 메타데이터 컬럼 묶음
struct MetadataColumns<'a> {
    ids: &'a StringArray,
    paths: &'a StringArray,
    kinds: &'a StringArray,
    ordinals: &'a Int64Array,
    starts: &'a Int64Array,
    ends: &'a Int64Array,
    previews: &'a StringArray,
    texts: &'a StringArray,
}

impl<'a> MetadataColumns<'a> {
    fn read(batch: &'a RecordBatch) -> Result<Self, StoreError> {
        Ok(Self {
            ids: string_column(batch, "id")?,
            paths: string_column(batch, "path")?,
            kinds: string_column(batch, "kind")?,
            ordinals: int_column(batch, "ordinal")?,
            starts: int_column(batch, "start")?,
            ends: int_column(batch, "end")?,
            previews: string_column(batch, "preview")?,
            texts: string_column(batch, "text")?,
        })
    }

    fn metadata(&self, i: usize) -> Result<RecordMetadata, StoreError> {
        let kind: DocumentKind = self.kinds.value(i).parse().map_err(StoreError::Schema)?;
        Ok(RecordMetadata {
            path: PathBuf::from(self.paths.value(i)),
            kind,
            ordinal: self.ordinals.value(i) as usize,
            start: self.starts.value(i) as usize,
            end: self.ends.value(i) as usize,
            preview: self.previews.value(i).to_string(),
            text: self.texts.value(i).to_string(),
        })
    }
}

/// 네임스페이스 -> 테이블 이름 (영숫자/밑줄만 허용)
fn table_name(namespace: &str) -> String {
    let safe: String = namespace
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() { c } else { '_' })
        .collect();
    format!("chunks_{}", safe)
}

/// `id IN (...)` 필터 (작은따옴표 이스케이프)
fn id_filter(ids: &[String]) -> String {
    let quoted: Vec<String> = ids
        .iter()
        .map(|id| format!("'{}'", id.replace('\'', "''")))
        .collect();
    format!("id IN ({})", quoted.join(", "))
}

fn string_column<'a>(batch: &'a RecordBatch, name: &str) -> Result<&'a StringArray, StoreError> {
    batch
        .column_by_name(name)
        .and_then(|c| c.as_any().downcast_ref::<StringArray>())
        .ok_or_else(|| StoreError::Query(format!("missing {} column", name)))
}

fn int_column<'a>(batch: &'a RecordBatch, name: &str) -> Result<&'a Int64Array, StoreError> {
    batch
        .column_by_name(name)
        .and_then(|c| c.as_any().downcast_ref::<Int64Array>())
        .ok_or_else(|| StoreError::Query(format!("missing {} column", name)))
}

// ============================================================================
// Tests
// ============================================================================
