//! 문서 로더 모듈
//!
//! 로컬 폴더를 재귀적으로 탐색하여 지원하는 파일을 문서로 읽어들입니다.
//! .gitignore 패턴과 빌드/가상환경 디렉토리를 제외하고, 지원하는 확장자만 수집합니다.
//!
//! - 추출 전에 원본 바이트의 지문(SHA-256)을 계산합니다.
//! - 읽기/추출 실패는 파일 단위 진단으로 기록되고 탐색은 계속됩니다.

use std::collections::HashMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::Arc;

use ignore::WalkBuilder;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::error::{ExtractError, FileFailure, LoadError};
use crate::extractor::{normalize_text, FileExtractor, TextExtractor};

// ============================================================================
// Document Kinds
// ============================================================================

/// 지원하는 문서 종류
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DocumentKind {
    Pdf,
    Docx,
    Text,
    Markdown,
    Code,
}

impl DocumentKind {
    /// 확장자로 문서 종류 결정
    pub fn from_extension(ext: &str) -> Option<Self> {
        let ext = ext.to_lowercase();
        match ext.as_str() {
            "pdf" => Some(DocumentKind::Pdf),
            "docx" => Some(DocumentKind::Docx),

            "md" | "markdown" | "mdx" => Some(DocumentKind::Markdown),

            "txt" | "rst" | "log" | "csv" => Some(DocumentKind::Text),

            "rs" | "py" | "js" | "jsx" | "ts" | "tsx" | "java" | "c" | "h" | "cpp" | "hpp"
            | "cc" | "go" | "rb" | "cs" | "kt" | "swift" | "sh" | "toml" | "yaml" | "yml"
            | "json" | "sql" | "html" | "css" => Some(DocumentKind::Code),

            _ => None,
        }
    }

    /// 파일 경로에서 종류 결정
    pub fn from_path(path: &Path) -> Option<Self> {
        path.extension()
            .and_then(|ext| ext.to_str())
            .and_then(Self::from_extension)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            DocumentKind::Pdf => "pdf",
            DocumentKind::Docx => "docx",
            DocumentKind::Text => "text",
            DocumentKind::Markdown => "markdown",
            DocumentKind::Code => "code",
        }
    }
}

impl fmt::Display for DocumentKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DocumentKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pdf" => Ok(DocumentKind::Pdf),
            "docx" => Ok(DocumentKind::Docx),
            "text" => Ok(DocumentKind::Text),
            "markdown" => Ok(DocumentKind::Markdown),
            "code" => Ok(DocumentKind::Code),
            other => Err(format!("unknown document kind: {}", other)),
        }
    }
}

// ============================================================================
// Documents
// ============================================================================

/// 로드된 문서 (읽은 뒤 불변)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Document {
    /// 파일 절대 경로
    pub path: PathBuf,
    pub kind: DocumentKind,
    /// 원본 바이트의 SHA-256 (hex)
    pub fingerprint: String,
    /// 정규화된 추출 텍스트
    pub text: String,
}

/// 지문이 이미 알려진 그대로인 파일 (추출 생략)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnchangedFile {
    pub path: PathBuf,
    pub kind: DocumentKind,
    pub fingerprint: String,
}

/// 탐색 항목
#[derive(Debug, Clone)]
pub enum Loaded {
    Document(Document),
    Unchanged(UnchangedFile),
}

/// 원본 바이트 지문
pub fn fingerprint(bytes: &[u8]) -> String {
    format!("{:x}", Sha256::digest(bytes))
}

// ============================================================================
// Loader
// ============================================================================

/// 기본 제외 디렉토리
pub const EXCLUDED_DIRS: &[&str] = &[
    ".git",
    "node_modules",
    "__pycache__",
    "venv",
    ".venv",
    "dist",
    "build",
    "target",
    ".idea",
    ".vscode",
];

/// 로더 설정
#[derive(Debug, Clone)]
pub struct LoaderConfig {
    /// .gitignore 패턴 존중 여부
    pub respect_gitignore: bool,
    /// 숨김 파일 포함 여부
    pub include_hidden: bool,
    /// 최대 파일 크기 (바이트, 0이면 제한 없음)
    pub max_file_bytes: u64,
    /// 탐색하지 않을 디렉토리 이름
    pub excluded_dirs: Vec<String>,
}

impl Default for LoaderConfig {
    fn default() -> Self {
        Self {
            respect_gitignore: true,
            include_hidden: false,
            max_file_bytes: 10 * 1024 * 1024, // 10MB
            excluded_dirs: EXCLUDED_DIRS.iter().map(|d| d.to_string()).collect(),
        }
    }
}

/// 문서 로더
#[derive(Clone)]
pub struct Loader {
    config: LoaderConfig,
    extractor: Arc<dyn TextExtractor>,
}

impl Loader {
    pub fn new(config: LoaderConfig, extractor: Arc<dyn TextExtractor>) -> Self {
        Self { config, extractor }
    }

    /// 기본 설정 + 파일 추출기
    pub fn with_defaults() -> Self {
        Self::new(LoaderConfig::default(), Arc::new(FileExtractor))
    }

    /// 폴더 탐색 시작
    ///
    /// 반환된 [`Scan`]은 지연 평가되며, 다시 호출하면 처음부터 탐색합니다.
    pub fn scan(&self, folder: &Path) -> Result<Scan, LoadError> {
        self.scan_with_known(folder, HashMap::new())
    }

    /// 이미 알려진 (경로 → 지문) 목록과 함께 탐색
    ///
    /// 지문이 같은 파일은 추출 없이 [`Loaded::Unchanged`]로 반환됩니다.
    pub fn scan_with_known(
        &self,
        folder: &Path,
        known: HashMap<PathBuf, String>,
    ) -> Result<Scan, LoadError> {
        let root = resolve_folder(folder)?;

        let excluded = self.config.excluded_dirs.clone();
        let walker = WalkBuilder::new(&root)
            .hidden(!self.config.include_hidden)
            .git_ignore(self.config.respect_gitignore)
            .git_global(self.config.respect_gitignore)
            .git_exclude(self.config.respect_gitignore)
            .require_git(false)
            .sort_by_file_name(|a, b| a.cmp(b))
            .filter_entry(move |entry| {
                let is_dir = entry.file_type().map(|ft| ft.is_dir()).unwrap_or(false);
                !(is_dir
                    && entry
                        .file_name()
                        .to_str()
                        .map(|name| excluded.iter().any(|d| d == name))
                        .unwrap_or(false))
            })
            .build();

        Ok(Scan {
            root,
            walker,
            extractor: Arc::clone(&self.extractor),
            max_file_bytes: self.config.max_file_bytes,
            known,
        })
    }

    /// 폴더 전체 로드
    ///
    /// 문서가 하나도 로드되지 않으면 [`LoadError::NoDocuments`]를 반환합니다.
    pub fn load_all(&self, folder: &Path) -> Result<LoadReport, LoadError> {
        let report = self.scan(folder)?.into_report();
        if report.is_empty() {
            return Err(LoadError::NoDocuments {
                failures: report.failures,
            });
        }
        Ok(report)
    }
}

/// 폴더 경로를 정규 절대 경로로 변환
pub fn resolve_folder(folder: &Path) -> Result<PathBuf, LoadError> {
    let root = std::fs::canonicalize(folder)
        .map_err(|_| LoadError::FolderNotFound(folder.to_path_buf()))?;
    if !root.is_dir() {
        return Err(LoadError::FolderNotFound(folder.to_path_buf()));
    }
    Ok(root)
}

// ============================================================================
// Scan
// ============================================================================

/// 지연 폴더 탐색 (유한, 파일 단위로 읽기/추출)
pub struct Scan {
    root: PathBuf,
    walker: ignore::Walk,
    extractor: Arc<dyn TextExtractor>,
    max_file_bytes: u64,
    known: HashMap<PathBuf, String>,
}

impl Scan {
    /// 끝까지 탐색하여 보고서로 수집
    pub fn into_report(self) -> LoadReport {
        let root = self.root.clone();
        let mut report = LoadReport {
            root,
            ..Default::default()
        };

        for item in self {
            match item {
                Ok(Loaded::Document(doc)) => report.documents.push(doc),
                Ok(Loaded::Unchanged(file)) => report.unchanged.push(file),
                Err(failure) => report.failures.push(failure),
            }
        }

        tracing::info!(
            "Scanned {:?}: {} loaded, {} unchanged, {} failed",
            report.root,
            report.documents.len(),
            report.unchanged.len(),
            report.failures.len()
        );
        report
    }

    fn load(&self, path: PathBuf, kind: DocumentKind) -> Result<Loaded, FileFailure> {
        let metadata = std::fs::metadata(&path).map_err(|e| FileFailure::new(&path, e))?;
        if self.max_file_bytes > 0 && metadata.len() > self.max_file_bytes {
            tracing::debug!("Skipping large file: {:?} ({} bytes)", path, metadata.len());
            return Err(FileFailure::new(
                &path,
                format!("file too large ({} bytes)", metadata.len()),
            ));
        }

        let bytes = std::fs::read(&path).map_err(|e| FileFailure::new(&path, e))?;
        let fingerprint = fingerprint(&bytes);

        if self.known.get(&path) == Some(&fingerprint) {
            return Ok(Loaded::Unchanged(UnchangedFile {
                path,
                kind,
                fingerprint,
            }));
        }

        let raw = self
            .extractor
            .extract_text(&path, kind, &bytes)
            .map_err(|e| FileFailure::new(&path, e))?;

        let text = normalize_text(&raw);
        if text.is_empty() {
            return Err(FileFailure::new(&path, ExtractError::Empty));
        }

        Ok(Loaded::Document(Document {
            path,
            kind,
            fingerprint,
            text,
        }))
    }
}

impl Iterator for Scan {
    type Item = Result<Loaded, FileFailure>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            let entry = match self.walker.next()? {
                Ok(entry) => entry,
                Err(e) => {
                    tracing::warn!("Failed to read entry: {}", e);
                    return Some(Err(FileFailure::new(&self.root, e)));
                }
            };

            // 파일만 처리
            if !entry.file_type().map(|ft| ft.is_file()).unwrap_or(false) {
                continue;
            }

            let path = entry.into_path();
            let kind = match DocumentKind::from_path(&path) {
                Some(kind) => kind,
                None => continue, // 지원하지 않는 확장자
            };

            let result = self.load(path, kind);
            if let Err(ref failure) = result {
                tracing::warn!("Skipping {:?}: {}", failure.path, failure.reason);
            }
            return Some(result);
        }
    }
}

// ============================================================================
// Load Report
// ============================================================================

/// 폴더 로드 결과
#[derive(Debug, Default)]
pub struct LoadReport {
    pub root: PathBuf,
    pub documents: Vec<Document>,
    pub unchanged: Vec<UnchangedFile>,
    pub failures: Vec<FileFailure>,
}

impl LoadReport {
    /// 사용할 수 있는 문서가 없는지
    pub fn is_empty(&self) -> bool {
        self.documents.is_empty() && self.unchanged.is_empty()
    }
}

// ============================================================================
// Tests
// ============================================================================
