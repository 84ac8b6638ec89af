//! CLI 모듈
//!
//! portfolio-retrieval 명령어 정의 및 구현

use std::sync::Arc;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};

use crate::config::Settings;
use crate::content::{Collection, NewArticle, NewLink, NewProject, PublishStatus, SqliteStore};
use crate::embedding::{CachedEmbedding, EmbeddingProvider, GeminiEmbedding};
use crate::indexing::{backfill, EmbeddingQueue, EmbeddingWorker};
use crate::opengraph::MetadataFetcher;
use crate::search::{RetrievalEngine, SearchRequest};

// ============================================================================
// CLI Definition
// ============================================================================

#[derive(Parser)]
#[command(name = "portfolio-retrieval")]
#[command(version, about = "포트폴리오 콘텐츠 하이브리드 검색", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// 글, 프로젝트, 링크 검색 (JSON 출력)
    Search {
        /// 검색 쿼리
        query: String,

        /// 검색 대상 (all, article, project, link)
        #[arg(short, long = "type")]
        type_name: Option<String>,
    },

    /// URL 메타데이터 조회 (JSON 출력)
    Fetch {
        /// 조회할 URL
        url: String,
    },

    /// 콘텐츠 추가
    Add {
        #[command(subcommand)]
        item: AddCommand,
    },

    /// 저장된 링크의 메타데이터 재수집
    Refresh {
        /// 링크 ID
        id: i64,
    },

    /// 임베딩이 없는 레코드의 임베딩 생성
    Embeddings {
        /// 대상 컬렉션 (article, project, link)
        #[arg(short, long)]
        collection: Option<String>,

        /// 이미 임베딩이 있는 레코드도 재생성
        #[arg(long)]
        force: bool,
    },

    /// 상태 확인
    Status,
}

#[derive(Subcommand)]
pub enum AddCommand {
    /// 블로그 글
    Article {
        /// 제목
        title: String,

        /// 본문 (HTML)
        #[arg(short, long)]
        content: String,

        /// 요약
        #[arg(short, long)]
        excerpt: Option<String>,

        /// 대표 이미지 URL
        #[arg(long)]
        featured_image: Option<String>,

        /// 바로 공개
        #[arg(long)]
        publish: bool,
    },

    /// 프로젝트
    Project {
        /// 제목
        title: String,

        /// 짧은 설명
        #[arg(short, long)]
        description: Option<String>,

        /// 상세 설명
        #[arg(long)]
        long_description: Option<String>,

        /// 서비스 URL
        #[arg(long)]
        project_url: Option<String>,

        /// GitHub URL
        #[arg(long)]
        github_url: Option<String>,

        /// 사용 기술 (쉼표 구분)
        #[arg(short, long = "tech", value_delimiter = ',')]
        technologies: Vec<String>,

        /// 추천 프로젝트로 표시
        #[arg(long)]
        featured: bool,

        /// 바로 공개
        #[arg(long)]
        publish: bool,
    },

    /// 큐레이션 링크 (메타데이터 자동 수집)
    Link {
        /// 링크 URL
        url: String,

        /// 코멘트
        #[arg(short, long)]
        commentary: Option<String>,

        /// 메타데이터 수집 건너뛰기
        #[arg(long)]
        no_fetch: bool,
    },
}

// ============================================================================
// Context
// ============================================================================

/// 명령어 실행에 필요한 공유 상태
struct App {
    settings: Settings,
    store: SqliteStore,
    embedder: Option<Arc<dyn EmbeddingProvider>>,
}

impl App {
    fn open() -> Result<Self> {
        let settings = Settings::from_env()?;
        let store = SqliteStore::open(&settings.database_path()).context("SqliteStore 열기 실패")?;
        let embedder = GeminiEmbedding::from_settings(&settings)
            .context("임베딩 프로바이더 생성 실패")?
            .map(|g| Arc::new(g) as Arc<dyn EmbeddingProvider>);

        Ok(Self {
            settings,
            store,
            embedder,
        })
    }

    /// 검색 엔진 (쿼리 임베딩 캐시 적용)
    fn engine(&self) -> RetrievalEngine {
        let embedder = self.embedder.as_ref().map(|inner| {
            if self.settings.query_cache_ttl.is_zero() {
                Arc::clone(inner)
            } else {
                Arc::new(CachedEmbedding::new(
                    Arc::clone(inner),
                    self.settings.query_cache_ttl,
                )) as Arc<dyn EmbeddingProvider>
            }
        });

        RetrievalEngine::new(Arc::new(self.store.clone()), embedder)
    }

    /// 임베딩 큐 (프로바이더가 없으면 비활성)
    fn queue(&self) -> EmbeddingQueue {
        match self.embedder {
            Some(ref embedder) => EmbeddingQueue::spawn(EmbeddingWorker::new(
                Arc::new(self.store.clone()),
                Arc::clone(embedder),
            )),
            None => EmbeddingQueue::disabled(),
        }
    }
}

// ============================================================================
// CLI Runner
// ============================================================================

/// CLI 명령어 실행
pub async fn run(cli: Cli) -> Result<()> {
    match cli.command {
        Commands::Search { query, type_name } => cmd_search(&query, type_name.as_deref()).await,
        Commands::Fetch { url } => cmd_fetch(&url).await,
        Commands::Add { item } => cmd_add(item).await,
        Commands::Refresh { id } => cmd_refresh(id).await,
        Commands::Embeddings { collection, force } => {
            cmd_embeddings(collection.as_deref(), force).await
        }
        Commands::Status => cmd_status().await,
    }
}

// ============================================================================
// Command Implementations
// ============================================================================

/// 검색 명령어 (search)
async fn cmd_search(query: &str, type_name: Option<&str>) -> Result<()> {
    let request = SearchRequest::new(query, type_name)?;
    let app = App::open()?;

    if app.embedder.is_none() {
        tracing::info!("No embedding API key, vector search disabled");
    }

    let results = app.engine().execute(&request).await;
    println!("{}", serde_json::to_string_pretty(&results)?);

    Ok(())
}

/// 메타데이터 조회 명령어 (fetch)
async fn cmd_fetch(url: &str) -> Result<()> {
    let settings = Settings::from_env()?;
    let fetcher = MetadataFetcher::from_settings(&settings)?;

    let metadata = fetcher.fetch(url).await;
    println!("{}", serde_json::to_string_pretty(&metadata)?);

    Ok(())
}

/// 콘텐츠 추가 명령어 (add)
async fn cmd_add(item: AddCommand) -> Result<()> {
    let app = App::open()?;
    let queue = app.queue();

    let (collection, id, title) = match item {
        AddCommand::Article {
            title,
            content,
            excerpt,
            featured_image,
            publish,
        } => {
            let article = app
                .store
                .create_article(NewArticle {
                    title,
                    excerpt,
                    content,
                    featured_image,
                    status: Some(status_for(publish)),
                    published_at: None,
                })
                .context("글 저장 실패")?
                .dispatch(&queue);
            (Collection::Articles, article.id, Some(article.title))
        }
        AddCommand::Project {
            title,
            description,
            long_description,
            project_url,
            github_url,
            technologies,
            featured,
            publish,
        } => {
            let project = app
                .store
                .create_project(NewProject {
                    title,
                    description,
                    long_description,
                    project_url,
                    github_url,
                    is_featured: featured,
                    status: Some(status_for(publish)),
                    technologies,
                    ..Default::default()
                })
                .context("프로젝트 저장 실패")?
                .dispatch(&queue);
            (Collection::Projects, project.id, Some(project.title))
        }
        AddCommand::Link {
            url,
            commentary,
            no_fetch,
        } => {
            let input = if no_fetch {
                NewLink {
                    commentary,
                    ..NewLink::new(&url)
                }
            } else {
                println!("[*] 메타데이터 수집 중: {}", url);
                let fetcher = MetadataFetcher::from_settings(&app.settings)?;
                NewLink::from_metadata(fetcher.fetch(&url).await, commentary)
            };

            let link = app
                .store
                .create_link(input)
                .context("링크 저장 실패")?
                .dispatch(&queue);
            (Collection::Links, link.id, link.title)
        }
    };

    println!(
        "[OK] {} #{} 추가됨: {}",
        collection,
        id,
        title.as_deref().unwrap_or("-")
    );

    if queue.is_enabled() {
        println!("[*] 임베딩 생성 중...");
    }
    queue.shutdown().await;

    Ok(())
}

/// 링크 메타데이터 재수집 명령어 (refresh)
async fn cmd_refresh(id: i64) -> Result<()> {
    let app = App::open()?;
    let fetcher = MetadataFetcher::from_settings(&app.settings)?;
    let queue = app.queue();

    let link = fetcher
        .refresh(&app.store, id)
        .await
        .context("메타데이터 재수집 실패")?
        .dispatch(&queue);

    println!("[OK] 링크 #{} 갱신됨", link.id);
    println!("     제목: {}", link.title.as_deref().unwrap_or("-"));
    println!("     유형: {}", link.source_type);

    queue.shutdown().await;

    Ok(())
}

/// 임베딩 백필 명령어 (embeddings)
async fn cmd_embeddings(collection: Option<&str>, force: bool) -> Result<()> {
    let collections = parse_collections(collection)?;
    let app = App::open()?;

    if app.embedder.is_none() {
        bail!(
            "API 키가 설정되지 않았습니다.\n\n\
             설정 방법:\n  \
             export GEMINI_API_KEY=your-api-key\n  \
             또는\n  \
             export GOOGLE_AI_API_KEY=your-api-key"
        );
    }

    let queue = app.queue();
    let counts = backfill(&app.store, &queue, &collections, force).await?;

    for (collection, count) in &counts {
        println!("[*] {}: {} 건", collection, count);
    }

    let total: usize = counts.iter().map(|(_, n)| n).sum();
    if total > 0 {
        println!("[*] 임베딩 생성 중...");
    }
    queue.shutdown().await;

    println!("[OK] 완료: {} 건 처리", total);

    Ok(())
}

/// 상태 명령어 (status)
async fn cmd_status() -> Result<()> {
    println!("portfolio-retrieval v{}", env!("CARGO_PKG_VERSION"));
    println!();

    let app = App::open()?;
    println!("[*] 데이터 디렉토리: {}", app.settings.data_dir.display());

    if app.embedder.is_some() {
        println!(
            "[OK] 임베딩 API 키: 설정됨 ({} 차원)",
            app.settings.embedding_dimensions
        );
    } else {
        println!("[!] 임베딩 API 키: 미설정 (부분 문자열 검색만 사용)");
        println!("    설정: export GEMINI_API_KEY=your-key");
    }

    if app.settings.youtube_api_key.is_some() {
        println!("[OK] YouTube API 키: 설정됨");
    } else {
        println!("[!] YouTube API 키: 미설정 (HTML 스크래핑만 사용)");
    }

    println!("[*] 검색 전략: {}", app.engine().strategy_name());

    match app.store.stats() {
        Ok(stats) => {
            for s in stats {
                println!(
                    "[OK] {}: {} 건 (공개 {}, 임베딩 {})",
                    s.collection, s.total, s.visible, s.embedded
                );
            }
        }
        Err(e) => println!("[!] 통계 조회 실패: {}", e),
    }

    Ok(())
}

// ============================================================================
// Helper Functions
// ============================================================================

fn status_for(publish: bool) -> PublishStatus {
    if publish {
        PublishStatus::Published
    } else {
        PublishStatus::Draft
    }
}

/// 컬렉션 인자 파싱 (없으면 전체)
fn parse_collections(name: Option<&str>) -> Result<Vec<Collection>> {
    match name {
        None => Ok(Collection::ALL.to_vec()),
        Some(name) => match Collection::from_model_name(name) {
            Some(collection) => Ok(vec![collection]),
            None => bail!("알 수 없는 컬렉션: {} (article, project, link)", name),
        },
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_collections() {
        assert_eq!(parse_collections(None).unwrap(), Collection::ALL.to_vec());
        assert_eq!(parse_collections(Some("blog")).unwrap(), vec![Collection::Articles]);
        assert_eq!(parse_collections(Some("share")).unwrap(), vec![Collection::Links]);
        assert!(parse_collections(Some("podcast")).is_err());
    }

    #[test]
    fn test_parse_search_command() {
        let cli = Cli::try_parse_from(["portfolio-retrieval", "search", "rust async", "--type", "blog"])
            .unwrap();
        match cli.command {
            Commands::Search { query, type_name } => {
                assert_eq!(query, "rust async");
                assert_eq!(type_name.as_deref(), Some("blog"));
            }
            _ => panic!("expected search"),
        }
    }

    #[test]
    fn test_parse_add_project_technologies() {
        let cli = Cli::try_parse_from([
            "portfolio-retrieval",
            "add",
            "project",
            "Portfolio",
            "--tech",
            "Rust,Laravel",
            "--publish",
        ])
        .unwrap();
        match cli.command {
            Commands::Add {
                item: AddCommand::Project {
                    technologies,
                    publish,
                    featured,
                    ..
                },
            } => {
                assert_eq!(technologies, vec!["Rust", "Laravel"]);
                assert!(publish);
                assert!(!featured);
            }
            _ => panic!("expected add project"),
        }
    }

    #[test]
    fn test_parse_embeddings_flags() {
        let cli = Cli::try_parse_from(["portfolio-retrieval", "embeddings", "-c", "link", "--force"])
            .unwrap();
        assert!(matches!(
            cli.command,
            Commands::Embeddings { force: true, collection: Some(ref c) } if c == "link"
        ));
    }

    #[test]
    fn test_status_for() {
        assert_eq!(status_for(true), PublishStatus::Published);
        assert_eq!(status_for(false), PublishStatus::Draft);
    }
}
