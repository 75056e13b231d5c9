//! CLI 모듈
//!
//! devdocs-rag CLI 명령어 정의 및 구현

use std::io::Write;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use futures::StreamExt;
use tokio::io::{AsyncBufReadExt, BufReader};

use crate::answer::{Answer, AnswerEvent, ConversationTurn, Session, SourceRef};
use crate::config::{IndexScope, RagConfig};
use crate::error::RagError;
use crate::knowledge::{ChunkConfig, ChunkPreset, IndexStatus, IndexSummary};
use crate::pipeline::Pipeline;

// ============================================================================
// CLI Definition
// ============================================================================

#[derive(Parser)]
#[command(name = "devdocs-rag")]
#[command(version, about = "로컬 문서 폴더 RAG 질의응답", long_about = None)]
pub struct Cli {
    /// 데이터 디렉토리 (기본: 로컬 데이터 폴더/.devdocs-rag)
    #[arg(long, global = true)]
    pub data_dir: Option<PathBuf>,

    /// 인덱스 범위 (per-folder | single)
    #[arg(long, global = true)]
    pub scope: Option<IndexScope>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// 폴더를 인덱싱 (변경된 문서만 다시 임베딩)
    Index {
        /// 인덱싱할 폴더
        folder: PathBuf,

        /// 청킹 프리셋 (default | code | fast)
        #[arg(long)]
        preset: Option<ChunkPreset>,

        /// 청크 크기 (바이트)
        #[arg(long)]
        chunk_size: Option<usize>,

        /// 청크 오버랩 (바이트)
        #[arg(long)]
        overlap: Option<usize>,
    },

    /// 질문하기 (답변 스트리밍 후 출처 표시)
    Ask {
        /// 질문
        question: String,

        /// 질의할 폴더 (기본: 가장 최근 인덱스)
        #[arg(short, long)]
        folder: Option<PathBuf>,

        /// 검색할 청크 수
        #[arg(short)]
        k: Option<usize>,
    },

    /// 대화형 질의응답
    Chat {
        /// 질의할 폴더 (기본: 가장 최근 인덱스)
        #[arg(short, long)]
        folder: Option<PathBuf>,

        /// 검색할 청크 수
        #[arg(short)]
        k: Option<usize>,
    },

    /// 인덱스 목록
    List,

    /// 인덱스 삭제
    Reset {
        /// 삭제할 폴더 (미지정 시 전체)
        #[arg(short, long)]
        folder: Option<PathBuf>,
    },

    /// 상태 확인
    Status,
}

// ============================================================================
// CLI Runner
// ============================================================================

/// CLI 명령어 실행
pub async fn run(cli: Cli) -> Result<()> {
    let mut config = RagConfig::from_env().context("설정 로드 실패")?;
    if let Some(data_dir) = cli.data_dir {
        config.data_dir = data_dir;
    }
    if let Some(scope) = cli.scope {
        config.scope = scope;
    }

    match cli.command {
        Commands::Index {
            folder,
            preset,
            chunk_size,
            overlap,
        } => cmd_index(config, &folder, preset, chunk_size, overlap).await,
        Commands::Ask { question, folder, k } => {
            cmd_ask(config, &question, folder.as_deref(), k).await
        }
        Commands::Chat { folder, k } => cmd_chat(config, folder.as_deref(), k).await,
        Commands::List => cmd_list(config).await,
        Commands::Reset { folder } => cmd_reset(config, folder.as_deref()).await,
        Commands::Status => cmd_status(config).await,
    }
}

async fn open_pipeline(config: RagConfig) -> Result<Pipeline> {
    Pipeline::open(config)
        .await
        .context("파이프라인 초기화 실패")
}

// ============================================================================
// Command Implementations
// ============================================================================

/// 인덱싱 명령어 (index)
async fn cmd_index(
    mut config: RagConfig,
    folder: &Path,
    preset: Option<ChunkPreset>,
    chunk_size: Option<usize>,
    overlap: Option<usize>,
) -> Result<()> {
    let indexed = Pipeline::indexed_chunking(&config, folder).context("인덱스 상태 조회 실패")?;
    config.chunking = resolve_chunking(config.chunking, indexed, preset, chunk_size, overlap)?;

    let pipeline = open_pipeline(config).await?;

    println!("[*] 인덱싱 중: {}", folder.display());
    let summary = pipeline
        .index_folder(folder)
        .await
        .context("인덱싱 실패")?;

    print_summary(&summary);
    Ok(())
}

/// 인덱싱에 쓸 청킹 설정
///
/// 옵션을 주지 않으면 기존 인덱스의 설정을 그대로 써서 재구축을 피합니다.
/// 옵션은 프리셋(없으면 기존 인덱스, 그다음 환경 설정) 위에 덮어씁니다.
fn resolve_chunking(
    configured: ChunkConfig,
    indexed: Option<ChunkConfig>,
    preset: Option<ChunkPreset>,
    chunk_size: Option<usize>,
    overlap: Option<usize>,
) -> Result<ChunkConfig> {
    let base = indexed.unwrap_or(configured);
    if preset.is_none() && chunk_size.is_none() && overlap.is_none() {
        return Ok(base);
    }

    let base = preset.map(ChunkPreset::config).unwrap_or(base);
    ChunkConfig::new(
        chunk_size.unwrap_or(base.chunk_size),
        overlap.unwrap_or(base.overlap),
    )
    .context("청크 설정 오류")
}

fn print_summary(summary: &IndexSummary) {
    match summary.status {
        IndexStatus::Indexed => println!("[OK] 인덱싱 완료: {}", summary.folder.display()),
        IndexStatus::Unchanged => println!("[OK] 변경 사항 없음: {}", summary.folder.display()),
        IndexStatus::NothingToIndex => {
            println!("[!] 인덱싱할 문서가 없습니다: {}", summary.folder.display())
        }
    }

    println!(
        "     문서: 처리 {}, 변경 없음 {}",
        summary.documents_processed, summary.documents_unchanged
    );
    println!(
        "     청크: 임베딩 {}, 유지 {}, 삭제 {}, 출처 갱신 {}",
        summary.chunks_indexed,
        summary.chunks_unchanged,
        summary.chunks_purged,
        summary.chunks_relabeled
    );
    println!("     소요 시간: {:.2}s", summary.elapsed.as_secs_f64());

    if !summary.load_failures.is_empty() {
        println!();
        println!("[!] 읽기 실패 {} 건:", summary.load_failures.len());
        for failure in &summary.load_failures {
            println!("    {}: {}", failure.path.display(), failure.reason);
        }
    }

    if !summary.chunk_failures.is_empty() {
        println!();
        println!(
            "[!] 임베딩 실패 {} 건 (다음 실행에서 재시도):",
            summary.chunk_failures.len()
        );
        for failure in &summary.chunk_failures {
            println!(
                "    {}#{}: {}",
                failure.path.display(),
                failure.ordinal,
                truncate_text(&failure.reason, 120)
            );
        }
    }
}

/// 질문 명령어 (ask)
async fn cmd_ask(
    config: RagConfig,
    question: &str,
    folder: Option<&Path>,
    k: Option<usize>,
) -> Result<()> {
    let pipeline = open_pipeline(config).await?;

    let context = match pipeline.retrieve(folder, question, k).await {
        Ok(context) => context,
        Err(RagError::NoIndex { folder }) => {
            println!("[!] 인덱스가 없습니다: {}", folder);
            println!("    먼저 실행: devdocs-rag index <FOLDER>");
            return Ok(());
        }
        Err(e) => return Err(e).context("검색 실패"),
    };

    let stream = pipeline
        .answer(question, &context, None)
        .await
        .context("답변 생성 실패")?;

    let answer = stream_to_stdout(stream).await?;
    print_sources(&answer.sources);
    Ok(())
}

/// 대화 명령어 (chat)
async fn cmd_chat(config: RagConfig, folder: Option<&Path>, k: Option<usize>) -> Result<()> {
    let pipeline = open_pipeline(config).await?;
    let mut session = pipeline.session();

    println!("[*] 대화 모드 (/clear: 기록 삭제, /exit: 종료)");

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        print!("\n> ");
        std::io::stdout().flush()?;

        let Some(line) = lines.next_line().await? else {
            break;
        };
        let query = line.trim();

        match query {
            "" => continue,
            "/exit" | "/quit" => break,
            "/clear" => {
                session.clear();
                println!("[OK] 대화 기록을 지웠습니다.");
                continue;
            }
            _ => {}
        }

        match chat_turn(&pipeline, &session, folder, query, k).await {
            Ok(turn) => session.record(turn),
            Err(e) => println!("[!] {:#}", e),
        }
    }

    Ok(())
}

async fn chat_turn(
    pipeline: &Pipeline,
    session: &Session,
    folder: Option<&Path>,
    query: &str,
    k: Option<usize>,
) -> Result<ConversationTurn> {
    let context = pipeline
        .retrieve(folder, query, k)
        .await
        .context("검색 실패")?;
    let stream = pipeline
        .answer(query, &context, Some(session))
        .await
        .context("답변 생성 실패")?;

    let answer = stream_to_stdout(stream).await?;
    print_sources(&answer.sources);
    Ok(ConversationTurn::new(query, &context, answer))
}

/// 답변 조각을 바로 출력하고 최종 답변 반환
async fn stream_to_stdout(mut stream: crate::answer::AnswerStream) -> Result<Answer> {
    let mut stdout = std::io::stdout();

    while let Some(event) = stream.next().await {
        match event {
            Ok(AnswerEvent::Delta(piece)) => {
                print!("{}", piece);
                stdout.flush()?;
            }
            Ok(AnswerEvent::Done(answer)) => {
                println!();
                return Ok(answer);
            }
            Err(e) => {
                println!();
                return Err(e).context("답변 스트림 중단");
            }
        }
    }

    anyhow::bail!("답변 스트림이 완료 없이 종료되었습니다")
}

fn print_sources(sources: &[SourceRef]) {
    if sources.is_empty() {
        return;
    }

    println!();
    println!("[OK] 출처 ({} 건):", sources.len());
    for (i, source) in sources.iter().enumerate() {
        let ordinals: Vec<String> = source.ordinals.iter().map(|o| o.to_string()).collect();
        println!(
            "{}. [{}] [점수: {:.4}] {} #{}",
            i + 1,
            source.kind.as_str(),
            source.score,
            source.path.display(),
            ordinals.join(",")
        );
        println!("   {}", truncate_text(&source.preview, 120));
    }
}

/// 목록 명령어 (list)
async fn cmd_list(config: RagConfig) -> Result<()> {
    let pipeline = open_pipeline(config).await?;
    let indexes = pipeline.list().context("인덱스 목록 조회 실패")?;

    if indexes.is_empty() {
        println!("[!] 인덱스가 없습니다.");
        return Ok(());
    }

    println!("[OK] 인덱스 ({} 건):\n", indexes.len());
    for index in indexes {
        println!("  {} [{}]", index.folder.display(), index.namespace);
        println!(
            "        {} | 문서 {} | 청크 {} | {}",
            index.indexed_at.format("%Y-%m-%d %H:%M"),
            index.documents,
            index.chunks,
            index.embed_model
        );
        println!();
    }

    Ok(())
}

/// 삭제 명령어 (reset)
async fn cmd_reset(config: RagConfig, folder: Option<&Path>) -> Result<()> {
    let pipeline = open_pipeline(config).await?;
    let removed = pipeline.reset(folder).await.context("인덱스 삭제 실패")?;

    match (folder, removed) {
        (Some(folder), 0) => println!("[!] 인덱스를 찾을 수 없습니다: {}", folder.display()),
        (Some(folder), _) => println!("[OK] 인덱스 삭제됨: {}", folder.display()),
        (None, n) => println!("[OK] 인덱스 {} 건 삭제됨", n),
    }

    Ok(())
}

/// 상태 명령어 (status)
async fn cmd_status(config: RagConfig) -> Result<()> {
    println!("devdocs-rag v{}", env!("CARGO_PKG_VERSION"));
    println!();

    let pipeline = open_pipeline(config).await?;
    let status = pipeline.status().await.context("상태 조회 실패")?;

    println!("[*] 데이터 디렉토리: {}", status.data_dir.display());
    println!("[*] Ollama: {}", status.ollama_url);
    println!(
        "[*] 모델: 임베딩 {}, 생성 {}",
        status.embed_model, status.generation_model
    );

    match status.embedding {
        Ok(dimension) => println!("[OK] 임베딩 서비스: 응답 ({} 차원)", dimension),
        Err(e) => println!("[!] 임베딩 서비스: {}", e),
    }

    println!(
        "[OK] 인덱스: {} 건, 문서 {} 건, 청크 {} 건",
        status.stats.index_count, status.stats.document_count, status.stats.chunk_count
    );
    if let Ok(meta) = std::fs::metadata(&status.stats.db_path) {
        println!("     상태 DB: {}", format_bytes(meta.len() as usize));
    }

    Ok(())
}

// ============================================================================
// Helper Functions
// ============================================================================

/// 텍스트 자르기 (UTF-8 안전)
fn truncate_text(text: &str, max_chars: usize) -> String {
    let cleaned = text.replace('\n', " ").replace('\r', "");
    let cleaned = cleaned.trim();

    if cleaned.chars().count() <= max_chars {
        cleaned.to_string()
    } else {
        let truncated: String = cleaned.chars().take(max_chars).collect();
        format!("{}...", truncated)
    }
}

/// 바이트 크기 포맷팅
fn format_bytes(bytes: usize) -> String {
    const KB: usize = 1024;
    const MB: usize = KB * 1024;

    if bytes >= MB {
        format!("{:.2} MB", bytes as f64 / MB as f64)
    } else if bytes >= KB {
        format!("{:.2} KB", bytes as f64 / KB as f64)
    } else {
        format!("{} B", bytes)
    }
}

// ============================================================================
// Tests
// ============================================================================
