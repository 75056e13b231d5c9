//! Index State Store - rusqlite 기반 인덱스 상태 저장소
//!
//! 폴더(네임스페이스)별로 무엇이 어떤 모델/청킹 설정으로 인덱싱되었는지 기록합니다.
//! 매니페스트는 트랜잭션 하나로 통째로 교체되므로, 읽는 쪽은 항상
//! 커밋이 끝난 상태만 봅니다.
//!
//! 벡터 저장소 쓰기는 매니페스트 커밋과 원자적으로 묶을 수 없으므로,
//! 커밋 전에 쓴 청크 ID(staged)와 커밋 후 버릴 컬렉션(retired)을 먼저 기록해 두고
//! 다음 실행이 시작될 때 남은 것을 정리합니다.
//!
//! 저장 위치: <data_dir>/index_state.db

use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};

use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::{params, Connection, OpenFlags, OptionalExtension, Row, Transaction};
use serde::Serialize;
use sha2::{Digest, Sha256};

use crate::collector::DocumentKind;
use crate::error::StateError;
use crate::knowledge::ChunkConfig;

// ============================================================================
// Types
// ============================================================================

/// 인덱싱된 문서 엔트리
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DocumentEntry {
    pub path: PathBuf,
    pub kind: DocumentKind,
    pub fingerprint: String,
    /// 이 문서의 살아있는 청크 ID (순번 순)
    pub chunk_ids: Vec<String>,
    /// 모든 청크가 임베딩되었는지 (아니면 다음 실행에서 다시 처리)
    pub complete: bool,
}

/// 폴더 인덱스 매니페스트
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct IndexManifest {
    pub namespace: String,
    /// 레코드가 들어있는 벡터 컬렉션 (재구축하면 바뀜)
    pub collection: String,
    pub folder: PathBuf,
    /// 임베딩 모델 식별자
    pub embed_model: String,
    pub dimension: usize,
    pub chunking: ChunkConfig,
    pub indexed_at: DateTime<Utc>,
    pub documents: Vec<DocumentEntry>,
}

impl IndexManifest {
    /// 커밋된 청크 ID 전체
    pub fn chunk_ids(&self) -> HashSet<String> {
        self.documents
            .iter()
            .flat_map(|d| d.chunk_ids.iter().cloned())
            .collect()
    }

    pub fn chunk_count(&self) -> usize {
        self.documents.iter().map(|d| d.chunk_ids.len()).sum()
    }

    /// 경로 -> 지문 (완전히 인덱싱된 문서만)
    pub fn fingerprints(&self) -> HashMap<PathBuf, String> {
        self.documents
            .iter()
            .filter(|d| d.complete)
            .map(|d| (d.path.clone(), d.fingerprint.clone()))
            .collect()
    }

    pub fn document(&self, path: &Path) -> Option<&DocumentEntry> {
        self.documents.iter().find(|d| d.path == path)
    }
}

/// 목록 표시용 요약
#[derive(Debug, Clone, Serialize)]
pub struct ManifestSummary {
    pub namespace: String,
    pub collection: String,
    pub folder: PathBuf,
    pub embed_model: String,
    pub documents: usize,
    pub chunks: usize,
    pub indexed_at: DateTime<Utc>,
}

/// 커밋되지 않은 벡터 쓰기 (컬렉션별)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StagedWrites {
    pub collection: String,
    pub chunk_ids: Vec<String>,
}

/// 저장소 통계
#[derive(Debug, Clone, Serialize)]
pub struct StateStats {
    pub index_count: usize,
    pub document_count: usize,
    pub chunk_count: usize,
    pub db_path: PathBuf,
}

/// 폴더 경로에서 네임스페이스 유도 (정규 경로 기준)
pub fn namespace_for(folder: &Path) -> String {
    let digest = Sha256::digest(folder.to_string_lossy().as_bytes());
    format!("{:x}", digest)[..16].to_string()
}

// ============================================================================
// IndexStateStore
// ============================================================================

/// 인덱스 상태 저장소
#[derive(Clone)]
pub struct IndexStateStore {
    conn: Arc<Mutex<Connection>>,
    db_path: PathBuf,
}

impl IndexStateStore {
    /// 저장소 열기 (없으면 생성)
    ///
    /// # Arguments
    /// * `path` - DB 파일 경로 (없으면 생성)
    pub fn open(path: &Path) -> Result<Self, StateError> {
        // 부모 디렉토리 생성
        if let Some(parent) = path.parent() {
            if !parent.exists() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let conn = Connection::open_with_flags(
            path,
            OpenFlags::SQLITE_OPEN_READ_WRITE
                | OpenFlags::SQLITE_OPEN_CREATE
                | OpenFlags::SQLITE_OPEN_NO_MUTEX,
        )?;

        let store = Self {
            conn: Arc::new(Mutex::new(conn)),
            db_path: path.to_path_buf(),
        };

        store.initialize()?;
        Ok(store)
    }

    /// 메모리 DB (테스트/일회성 실행)
    pub fn open_in_memory() -> Result<Self, StateError> {
        let store = Self {
            conn: Arc::new(Mutex::new(Connection::open_in_memory()?)),
            db_path: PathBuf::from(":memory:"),
        };
        store.initialize()?;
        Ok(store)
    }

    /// DB 경로 반환
    pub fn db_path(&self) -> &Path {
        &self.db_path
    }

    /// 인덱싱 잠금 파일 디렉토리 (메모리 DB는 프로세스 밖과 공유하지 않으므로 없음)
    pub fn lock_dir(&self) -> Option<PathBuf> {
        if self.db_path == Path::new(":memory:") {
            return None;
        }
        let parent = self.db_path.parent().unwrap_or_else(|| Path::new("."));
        Some(parent.join("locks"))
    }

    fn lock(&self) -> Result<MutexGuard<'_, Connection>, StateError> {
        self.conn
            .lock()
            .map_err(|e| StateError::Corrupt(format!("lock poisoned: {}", e)))
    }

    /// 스키마 초기화
    fn initialize(&self) -> Result<(), StateError> {
        let conn = self.lock()?;

        conn.execute_batch(
            r#"
            PRAGMA foreign_keys = ON;

            CREATE TABLE IF NOT EXISTS indexes (
                namespace TEXT PRIMARY KEY,
                collection TEXT NOT NULL,
                folder TEXT NOT NULL,
                embed_model TEXT NOT NULL,
                dimension INTEGER NOT NULL,
                chunk_size INTEGER NOT NULL,
                overlap INTEGER NOT NULL,
                indexed_at TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS documents (
                namespace TEXT NOT NULL REFERENCES indexes(namespace) ON DELETE CASCADE,
                path TEXT NOT NULL,
                kind TEXT NOT NULL,
                fingerprint TEXT NOT NULL,
                chunk_ids TEXT NOT NULL,
                complete INTEGER NOT NULL DEFAULT 1,
                PRIMARY KEY (namespace, path)
            );

            CREATE TABLE IF NOT EXISTS staged_chunks (
                namespace TEXT NOT NULL,
                collection TEXT NOT NULL,
                chunk_id TEXT NOT NULL,
                PRIMARY KEY (namespace, collection, chunk_id)
            );

            CREATE TABLE IF NOT EXISTS retired_collections (
                namespace TEXT NOT NULL,
                collection TEXT NOT NULL,
                PRIMARY KEY (namespace, collection)
            );

            CREATE INDEX IF NOT EXISTS idx_indexes_indexed_at ON indexes(indexed_at);
            "#,
        )?;

        tracing::debug!("Index state store initialized at {:?}", self.db_path);
        Ok(())
    }

    /// 매니페스트 조회
    pub fn load(&self, namespace: &str) -> Result<Option<IndexManifest>, StateError> {
        let conn = self.lock()?;
        let header = conn
            .query_row(
                "SELECT namespace, collection, folder, embed_model, dimension, chunk_size, overlap, indexed_at
                 FROM indexes WHERE namespace = ?1",
                params![namespace],
                read_header,
            )
            .optional()?;

        match header {
            Some(header) => Ok(Some(load_documents(&conn, header)?)),
            None => Ok(None),
        }
    }

    /// 가장 최근에 인덱싱된 매니페스트
    pub fn latest(&self) -> Result<Option<IndexManifest>, StateError> {
        let conn = self.lock()?;
        let header = conn
            .query_row(
                "SELECT namespace, collection, folder, embed_model, dimension, chunk_size, overlap, indexed_at
                 FROM indexes ORDER BY indexed_at DESC LIMIT 1",
                [],
                read_header,
            )
            .optional()?;

        match header {
            Some(header) => Ok(Some(load_documents(&conn, header)?)),
            None => Ok(None),
        }
    }

    /// 매니페스트 원자적 교체 (단일 트랜잭션)
    pub fn commit(&self, manifest: &IndexManifest) -> Result<(), StateError> {
        self.commit_with_cleanup(manifest, &[], &[])
    }

    /// 매니페스트 교체 + 커밋 후 정리할 벡터 쓰기 기록 (단일 트랜잭션)
    ///
    /// 이번 실행의 staged 기록은 지워지고, `stale_ids`(커밋된 컬렉션에서 지울 ID)와
    /// `retired`(통째로 버릴 컬렉션)가 남습니다. 정리가 끝나면 `clear_staged`로 비웁니다.
    pub fn commit_with_cleanup(
        &self,
        manifest: &IndexManifest,
        stale_ids: &[String],
        retired: &[String],
    ) -> Result<(), StateError> {
        let mut conn = self.lock()?;
        let tx = conn.transaction()?;

        tx.execute(
            "DELETE FROM documents WHERE namespace = ?1",
            params![manifest.namespace],
        )?;
        tx.execute(
            "INSERT OR REPLACE INTO indexes
                (namespace, collection, folder, embed_model, dimension, chunk_size, overlap, indexed_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            params![
                manifest.namespace,
                manifest.collection,
                manifest.folder.to_string_lossy(),
                manifest.embed_model,
                manifest.dimension as i64,
                manifest.chunking.chunk_size as i64,
                manifest.chunking.overlap as i64,
                format_datetime(&manifest.indexed_at),
            ],
        )?;

        {
            let mut stmt = tx.prepare(
                "INSERT INTO documents (namespace, path, kind, fingerprint, chunk_ids, complete)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            )?;
            for doc in &manifest.documents {
                let chunk_ids = serde_json::to_string(&doc.chunk_ids)
                    .map_err(|e| StateError::Corrupt(e.to_string()))?;
                stmt.execute(params![
                    manifest.namespace,
                    doc.path.to_string_lossy(),
                    doc.kind.as_str(),
                    doc.fingerprint,
                    chunk_ids,
                    doc.complete,
                ])?;
            }
        }

        clear_staged_rows(&tx, &manifest.namespace)?;
        insert_staged_rows(&tx, &manifest.namespace, &manifest.collection, stale_ids)?;
        insert_retired_rows(&tx, &manifest.namespace, retired)?;

        tx.commit()?;
        tracing::debug!(
            "Committed manifest {} ({} documents, {} chunks)",
            manifest.namespace,
            manifest.documents.len(),
            manifest.chunk_count()
        );
        Ok(())
    }

    /// 인덱스 목록 (최근 순)
    pub fn list(&self) -> Result<Vec<ManifestSummary>, StateError> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(
            "SELECT namespace, collection, folder, embed_model, dimension, chunk_size, overlap, indexed_at
             FROM indexes ORDER BY indexed_at DESC",
        )?;
        let headers = stmt
            .query_map([], read_header)?
            .collect::<Result<Vec<_>, _>>()?;

        let mut summaries = Vec::with_capacity(headers.len());
        for header in headers {
            let manifest = load_documents(&conn, header)?;
            summaries.push(ManifestSummary {
                documents: manifest.documents.len(),
                chunks: manifest.chunk_count(),
                namespace: manifest.namespace,
                collection: manifest.collection,
                folder: manifest.folder,
                embed_model: manifest.embed_model,
                indexed_at: manifest.indexed_at,
            });
        }
        Ok(summaries)
    }

    /// 매니페스트 삭제 + 버릴 컬렉션 기록 (단일 트랜잭션)
    pub fn remove_retiring(&self, namespace: &str, retired: &[String]) -> Result<bool, StateError> {
        let mut conn = self.lock()?;
        let tx = conn.transaction()?;
        let rows = tx.execute("DELETE FROM indexes WHERE namespace = ?1", params![namespace])?;
        clear_staged_rows(&tx, namespace)?;
        insert_retired_rows(&tx, namespace, retired)?;
        tx.commit()?;
        Ok(rows > 0)
    }

    /// 벡터 저장소에 쓰기 직전의 청크 ID 기록
    pub fn stage_chunks(
        &self,
        namespace: &str,
        collection: &str,
        chunk_ids: &[String],
    ) -> Result<(), StateError> {
        let mut conn = self.lock()?;
        let tx = conn.transaction()?;
        insert_staged_rows(&tx, namespace, collection, chunk_ids)?;
        tx.commit()?;
        Ok(())
    }

    /// 커밋되지 않은 쓰기 (컬렉션 순)
    pub fn staged(&self, namespace: &str) -> Result<Vec<StagedWrites>, StateError> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(
            "SELECT collection, chunk_id FROM staged_chunks
             WHERE namespace = ?1 ORDER BY collection, chunk_id",
        )?;
        let rows = stmt
            .query_map(params![namespace], |row| {
                Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
            })?
            .collect::<Result<Vec<_>, _>>()?;

        let mut staged: Vec<StagedWrites> = Vec::new();
        for (collection, chunk_id) in rows {
            match staged.last_mut() {
                Some(last) if last.collection == collection => last.chunk_ids.push(chunk_id),
                _ => staged.push(StagedWrites {
                    collection,
                    chunk_ids: vec![chunk_id],
                }),
            }
        }
        Ok(staged)
    }

    /// 버려야 하는 컬렉션
    pub fn retired(&self, namespace: &str) -> Result<Vec<String>, StateError> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(
            "SELECT collection FROM retired_collections WHERE namespace = ?1 ORDER BY collection",
        )?;
        let rows = stmt
            .query_map(params![namespace], |row| row.get::<_, String>(0))?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    /// staged/retired 기록 비우기 (정리 완료)
    pub fn clear_staged(&self, namespace: &str) -> Result<(), StateError> {
        let mut conn = self.lock()?;
        let tx = conn.transaction()?;
        clear_staged_rows(&tx, namespace)?;
        tx.commit()?;
        Ok(())
    }

    /// 저장소 통계
    pub fn stats(&self) -> Result<StateStats, StateError> {
        let summaries = self.list()?;
        Ok(StateStats {
            index_count: summaries.len(),
            document_count: summaries.iter().map(|s| s.documents).sum(),
            chunk_count: summaries.iter().map(|s| s.chunks).sum(),
            db_path: self.db_path.clone(),
        })
    }
}

// ============================================================================
// Helper Functions
// ============================================================================

fn read_header(row: &Row<'_>) -> rusqlite::Result<IndexManifest> {
    Ok(IndexManifest {
        namespace: row.get(0)?,
        collection: row.get(1)?,
        folder: PathBuf::from(row.get::<_, String>(2)?),
        embed_model: row.get(3)?,
        dimension: row.get::<_, i64>(4)? as usize,
        chunking: ChunkConfig {
            chunk_size: row.get::<_, i64>(5)? as usize,
            overlap: row.get::<_, i64>(6)? as usize,
        },
        indexed_at: parse_datetime(row.get::<_, String>(7)?),
        documents: Vec::new(),
    })
}

fn load_documents(
    conn: &Connection,
    mut manifest: IndexManifest,
) -> Result<IndexManifest, StateError> {
    let mut stmt = conn.prepare(
        "SELECT path, kind, fingerprint, chunk_ids, complete FROM documents
         WHERE namespace = ?1 ORDER BY path",
    )?;
    let rows = stmt
        .query_map(params![manifest.namespace], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, String>(2)?,
                row.get::<_, String>(3)?,
                row.get::<_, bool>(4)?,
            ))
        })?
        .collect::<Result<Vec<_>, _>>()?;

    for (path, kind, fingerprint, chunk_ids, complete) in rows {
        let kind: DocumentKind = kind.parse().map_err(StateError::Corrupt)?;
        let chunk_ids: Vec<String> = serde_json::from_str(&chunk_ids)
            .map_err(|e| StateError::Corrupt(format!("chunk ids for {}: {}", path, e)))?;
        manifest.documents.push(DocumentEntry {
            path: PathBuf::from(path),
            kind,
            fingerprint,
            chunk_ids,
            complete,
        });
    }
    Ok(manifest)
}

fn clear_staged_rows(tx: &Transaction<'_>, namespace: &str) -> Result<(), StateError> {
    tx.execute(
        "DELETE FROM staged_chunks WHERE namespace = ?1",
        params![namespace],
    )?;
    tx.execute(
        "DELETE FROM retired_collections WHERE namespace = ?1",
        params![namespace],
    )?;
    Ok(())
}

fn insert_staged_rows(
    tx: &Transaction<'_>,
    namespace: &str,
    collection: &str,
    chunk_ids: &[String],
) -> Result<(), StateError> {
    let mut stmt = tx.prepare(
        "INSERT OR IGNORE INTO staged_chunks (namespace, collection, chunk_id)
         VALUES (?1, ?2, ?3)",
    )?;
    for id in chunk_ids {
        stmt.execute(params![namespace, collection, id])?;
    }
    Ok(())
}

fn insert_retired_rows(
    tx: &Transaction<'_>,
    namespace: &str,
    collections: &[String],
) -> Result<(), StateError> {
    let mut stmt = tx.prepare(
        "INSERT OR IGNORE INTO retired_collections (namespace, collection) VALUES (?1, ?2)",
    )?;
    for collection in collections {
        stmt.execute(params![namespace, collection])?;
    }
    Ok(())
}

/// 고정 길이 RFC3339 (문자열 정렬 = 시간 정렬)
fn format_datetime(dt: &DateTime<Utc>) -> String {
    dt.to_rfc3339_opts(SecondsFormat::Micros, true)
}

/// RFC3339 문자열을 DateTime<Utc>로 파싱
fn parse_datetime(s: String) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(&s)
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or_else(|_| Utc::now())
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use tempfile::TempDir;

    fn create_test_store() -> (TempDir, IndexStateStore) {
        let dir = TempDir::new().unwrap();
        let store = IndexStateStore::open(&dir.path().join("state.db")).unwrap();
        (dir, store)
    }

    fn manifest(namespace: &str, docs: &[(&str, &[&str])]) -> IndexManifest {
        IndexManifest {
            namespace: namespace.to_string(),
            collection: namespace.to_string(),
            folder: PathBuf::from(format!("/docs/{}", namespace)),
            embed_model: "ollama:all-minilm".to_string(),
            dimension: 384,
            chunking: ChunkConfig::default(),
            indexed_at: Utc::now(),
            documents: docs
                .iter()
                .map(|(path, ids)| DocumentEntry {
                    path: PathBuf::from(path),
                    kind: DocumentKind::Markdown,
                    fingerprint: format!("fp-{}", path),
                    chunk_ids: ids.iter().map(|s| s.to_string()).collect(),
                    complete: true,
                })
                .collect(),
        }
    }

    #[test]
    fn test_commit_and_load() {
        let (_dir, store) = create_test_store();
        assert!(store.load("ns").unwrap().is_none());

        let m = manifest("ns", &[("/docs/a.md", &["a0", "a1"]), ("/docs/b.md", &["b0"])]);
        store.commit(&m).unwrap();

        let loaded = store.load("ns").unwrap().unwrap();
        assert_eq!(loaded.documents, m.documents);
        assert_eq!(loaded.embed_model, "ollama:all-minilm");
        assert_eq!(loaded.chunking, ChunkConfig::default());
        assert_eq!(loaded.chunk_count(), 3);
        assert!(loaded.chunk_ids().contains("b0"));
        assert_eq!(
            loaded.fingerprints().get(Path::new("/docs/a.md")),
            Some(&"fp-/docs/a.md".to_string())
        );
    }

    #[test]
    fn test_commit_replaces_previous_manifest() {
        let (_dir, store) = create_test_store();
        store
            .commit(&manifest("ns", &[("/docs/a.md", &["a0"]), ("/docs/b.md", &["b0"])]))
            .unwrap();
        store.commit(&manifest("ns", &[("/docs/c.md", &["c0"])])).unwrap();

        let loaded = store.load("ns").unwrap().unwrap();
        assert_eq!(loaded.documents.len(), 1);
        assert_eq!(loaded.documents[0].path, PathBuf::from("/docs/c.md"));
    }

    #[test]
    fn test_latest_list_and_remove() {
        let (_dir, store) = create_test_store();
        let mut older = manifest("old", &[("/docs/a.md", &["a0"])]);
        older.indexed_at = Utc::now() - Duration::hours(1);
        store.commit(&older).unwrap();
        store
            .commit(&manifest("new", &[("/docs/b.md", &["b0", "b1"])]))
            .unwrap();

        assert_eq!(store.latest().unwrap().unwrap().namespace, "new");

        let list = store.list().unwrap();
        assert_eq!(list.len(), 2);
        assert_eq!(list[0].namespace, "new");
        assert_eq!(list[0].chunks, 2);

        let stats = store.stats().unwrap();
        assert_eq!(stats.index_count, 2);
        assert_eq!(stats.document_count, 2);
        assert_eq!(stats.chunk_count, 3);

        assert!(store.remove_retiring("new", &[]).unwrap());
        assert!(!store.remove_retiring("new", &[]).unwrap());
        assert!(store.load("new").unwrap().is_none());
        assert_eq!(store.latest().unwrap().unwrap().namespace, "old");
    }

    #[test]
    fn test_incomplete_documents_are_not_known() {
        let (_dir, store) = create_test_store();
        let mut m = manifest("ns", &[("/docs/a.md", &["a0"]), ("/docs/b.md", &["b0"])]);
        m.documents[1].complete = false;
        store.commit(&m).unwrap();

        let loaded = store.load("ns").unwrap().unwrap();
        assert!(!loaded.documents[1].complete);
        let known = loaded.fingerprints();
        assert_eq!(known.len(), 1);
        assert!(known.contains_key(Path::new("/docs/a.md")));
    }

    #[test]
    fn test_state_survives_reopen() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("state.db");
        {
            let store = IndexStateStore::open(&path).unwrap();
            store.commit(&manifest("ns", &[("/docs/a.md", &["a0"])])).unwrap();
        }
        let store = IndexStateStore::open(&path).unwrap();
        assert!(store.load("ns").unwrap().is_some());
    }

    #[test]
    fn test_staged_writes_are_replaced_by_commit_cleanup() {
        let (_dir, store) = create_test_store();
        let ids = |v: &[&str]| v.iter().map(|s| s.to_string()).collect::<Vec<_>>();

        store.stage_chunks("ns", "ns", &ids(&["a0", "a1"])).unwrap();
        store.stage_chunks("ns", "ns_2", &ids(&["b0"])).unwrap();
        store.stage_chunks("other", "other", &ids(&["c0"])).unwrap();

        let staged = store.staged("ns").unwrap();
        assert_eq!(
            staged,
            vec![
                StagedWrites {
                    collection: "ns".to_string(),
                    chunk_ids: ids(&["a0", "a1"]),
                },
                StagedWrites {
                    collection: "ns_2".to_string(),
                    chunk_ids: ids(&["b0"]),
                },
            ]
        );

        let mut m = manifest("ns", &[("/docs/b.md", &["b0"])]);
        m.collection = "ns_2".to_string();
        store
            .commit_with_cleanup(&m, &ids(&["old0"]), &ids(&["ns"]))
            .unwrap();

        assert_eq!(store.load("ns").unwrap().unwrap().collection, "ns_2");
        assert_eq!(
            store.staged("ns").unwrap(),
            vec![StagedWrites {
                collection: "ns_2".to_string(),
                chunk_ids: ids(&["old0"]),
            }]
        );
        assert_eq!(store.retired("ns").unwrap(), ids(&["ns"]));

        store.clear_staged("ns").unwrap();
        assert!(store.staged("ns").unwrap().is_empty());
        assert!(store.retired("ns").unwrap().is_empty());
        assert_eq!(store.staged("other").unwrap().len(), 1);
    }

    #[test]
    fn test_remove_retiring_records_collections() {
        let (_dir, store) = create_test_store();
        store.commit(&manifest("ns", &[("/docs/a.md", &["a0"])])).unwrap();
        store.stage_chunks("ns", "ns_9", &["x".to_string()]).unwrap();

        assert!(store
            .remove_retiring("ns", &["ns".to_string(), "ns_9".to_string()])
            .unwrap());
        assert!(store.load("ns").unwrap().is_none());
        assert!(store.staged("ns").unwrap().is_empty());
        assert_eq!(
            store.retired("ns").unwrap(),
            vec!["ns".to_string(), "ns_9".to_string()]
        );
    }

    #[test]
    fn test_namespace_is_stable_per_folder() {
        let a = namespace_for(Path::new("/home/me/docs"));
        assert_eq!(a, namespace_for(Path::new("/home/me/docs")));
        assert_ne!(a, namespace_for(Path::new("/home/me/other")));
        assert_eq!(a.len(), 16);
    }
}
