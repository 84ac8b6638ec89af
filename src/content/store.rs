//! Content Store - rusqlite 기반 콘텐츠 저장소
//!
//! 글/프로젝트/링크를 저장하고, 임베딩 벡터를 같은 행의 BLOB 컬럼에 보관합니다.
//! 벡터와 생성 시각은 한 번의 UPDATE로 함께 기록되며, CHECK 제약으로
//! 둘 중 하나만 존재하는 상태를 막습니다.
//!
//! 파일 DB는 검색 시 컬렉션마다 별도 읽기 연결을 열어 병렬 조회를 허용합니다.
//! 인메모리 DB는 공유 연결 하나만 사용합니다.

use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rusqlite::functions::FunctionFlags;
use rusqlite::{params, params_from_iter, Connection, OpenFlags, OptionalExtension, Row};
use serde::Serialize;

use crate::indexing::{EmbeddingJob, EmbeddingStore};
use crate::opengraph::{EmbedData, LinkMetadata, LinkRepository, SourceType};
use crate::search::{blob_to_embedding, cosine_similarity, embedding_to_blob};
use crate::search::{IndexCapabilities, SearchIndex};

use super::{
    normalize_technologies, resolve_published_at, slugify, Article, ArticleSummary, Collection,
    ContentSummary, Link, LinkSummary, NewArticle, NewLink, NewProject, Project, ProjectSummary,
    PublishStatus, StoredEmbedding, Written,
};

const ARTICLE_COLUMNS: &str = "id, title, slug, excerpt, content, featured_image, status, \
     published_at, embedding, embedding_generated_at, created_at, updated_at";

const PROJECT_COLUMNS: &str = "id, title, slug, description, long_description, featured_image, \
     project_url, github_url, is_featured, status, published_at, embedding, \
     embedding_generated_at, created_at, updated_at";

const LINK_COLUMNS: &str = "id, url, source_type, title, slug, description, image_url, site_name, \
     author, commentary, embed_data, og_raw, embedding, embedding_generated_at, created_at, \
     updated_at";

const ARTICLE_SUMMARY_COLUMNS: &str =
    "id, title, slug, excerpt, featured_image, published_at, content";

const PROJECT_SUMMARY_COLUMNS: &str = "id, title, slug, description, featured_image, project_url, \
     github_url, is_featured, published_at";

const LINK_SUMMARY_COLUMNS: &str =
    "id, url, source_type, title, slug, description, image_url, site_name, created_at";

// ============================================================================
// Types
// ============================================================================

/// 컬렉션별 통계
#[derive(Debug, Clone, Serialize)]
pub struct CollectionStats {
    pub collection: Collection,
    pub total: usize,
    /// 검색 결과에 노출 가능한 레코드 수
    pub visible: usize,
    /// 임베딩이 생성된 레코드 수
    pub embedded: usize,
}

// ============================================================================
// SqliteStore
// ============================================================================

/// SQLite 콘텐츠 저장소
///
/// 벡터 검색(Rust 측 코사인 유사도)과 키워드 검색(LIKE)을 모두 지원합니다.
#[derive(Clone)]
pub struct SqliteStore {
    conn: Arc<Mutex<Connection>>,
    /// 파일 DB 경로 (인메모리면 `None`)
    db_path: Option<PathBuf>,
}

impl SqliteStore {
    /// 저장소 열기 (없으면 생성)
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() && !parent.exists() {
                std::fs::create_dir_all(parent).context("Failed to create database directory")?;
            }
        }

        let conn = Connection::open_with_flags(
            path,
            OpenFlags::SQLITE_OPEN_READ_WRITE
                | OpenFlags::SQLITE_OPEN_CREATE
                | OpenFlags::SQLITE_OPEN_NO_MUTEX,
        )
        .context("Failed to open SQLite database")?;

        // 읽기 연결과 쓰기 연결이 동시에 동작하도록 WAL 사용
        conn.query_row("PRAGMA journal_mode=WAL", [], |_| Ok(()))
            .context("Failed to enable WAL mode")?;
        register_functions(&conn)?;

        let store = Self {
            conn: Arc::new(Mutex::new(conn)),
            db_path: Some(path.to_path_buf()),
        };
        store.initialize()?;
        Ok(store)
    }

    /// 인메모리 저장소 (테스트, 임시 사용)
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory().context("Failed to open in-memory database")?;
        register_functions(&conn)?;
        let store = Self {
            conn: Arc::new(Mutex::new(conn)),
            db_path: None,
        };
        store.initialize()?;
        Ok(store)
    }

    /// DB 경로 반환
    pub fn db_path(&self) -> Option<&Path> {
        self.db_path.as_deref()
    }

    /// 스키마 초기화
    fn initialize(&self) -> Result<()> {
        self.with_conn(|conn| {
            conn.execute_batch(
                r#"
                PRAGMA foreign_keys = ON;

                CREATE TABLE IF NOT EXISTS articles (
                    id INTEGER PRIMARY KEY AUTOINCREMENT,
                    title TEXT NOT NULL,
                    slug TEXT NOT NULL,
                    excerpt TEXT,
                    content TEXT NOT NULL DEFAULT '',
                    featured_image TEXT,
                    status TEXT NOT NULL DEFAULT 'draft',
                    published_at TEXT,
                    embedding BLOB,
                    embedding_generated_at TEXT,
                    created_at TEXT NOT NULL,
                    updated_at TEXT NOT NULL,
                    CHECK ((embedding IS NULL) = (embedding_generated_at IS NULL))
                );

                CREATE TABLE IF NOT EXISTS projects (
                    id INTEGER PRIMARY KEY AUTOINCREMENT,
                    title TEXT NOT NULL,
                    slug TEXT NOT NULL,
                    description TEXT,
                    long_description TEXT,
                    featured_image TEXT,
                    project_url TEXT,
                    github_url TEXT,
                    is_featured INTEGER NOT NULL DEFAULT 0,
                    status TEXT NOT NULL DEFAULT 'draft',
                    published_at TEXT,
                    embedding BLOB,
                    embedding_generated_at TEXT,
                    created_at TEXT NOT NULL,
                    updated_at TEXT NOT NULL,
                    CHECK ((embedding IS NULL) = (embedding_generated_at IS NULL))
                );

                CREATE TABLE IF NOT EXISTS technologies (
                    id INTEGER PRIMARY KEY AUTOINCREMENT,
                    name TEXT NOT NULL UNIQUE COLLATE NOCASE
                );

                CREATE TABLE IF NOT EXISTS project_technology (
                    project_id INTEGER NOT NULL REFERENCES projects(id) ON DELETE CASCADE,
                    technology_id INTEGER NOT NULL REFERENCES technologies(id) ON DELETE CASCADE,
                    PRIMARY KEY (project_id, technology_id)
                );

                CREATE TABLE IF NOT EXISTS links (
                    id INTEGER PRIMARY KEY AUTOINCREMENT,
                    url TEXT NOT NULL,
                    source_type TEXT NOT NULL DEFAULT 'webpage',
                    title TEXT,
                    slug TEXT NOT NULL,
                    description TEXT,
                    image_url TEXT,
                    site_name TEXT,
                    author TEXT,
                    commentary TEXT,
                    embed_data TEXT,
                    og_raw TEXT,
                    embedding BLOB,
                    embedding_generated_at TEXT,
                    created_at TEXT NOT NULL,
                    updated_at TEXT NOT NULL,
                    CHECK ((embedding IS NULL) = (embedding_generated_at IS NULL))
                );

                CREATE INDEX IF NOT EXISTS idx_articles_status ON articles(status);
                CREATE INDEX IF NOT EXISTS idx_projects_status ON projects(status);
                CREATE INDEX IF NOT EXISTS idx_project_technology_tech
                    ON project_technology(technology_id);
                "#,
            )
            .context("Failed to create content schema")?;
            Ok(())
        })?;

        tracing::debug!("Content store initialized at {:?}", self.db_path);
        Ok(())
    }

    /// 공유 연결로 실행
    fn with_conn<T>(&self, f: impl FnOnce(&Connection) -> Result<T>) -> Result<T> {
        let conn = self
            .conn
            .lock()
            .map_err(|e| anyhow::anyhow!("Lock error: {}", e))?;
        f(&conn)
    }

    /// 읽기 전용 실행 (파일 DB는 독립 연결 사용)
    fn with_reader<T>(&self, f: impl FnOnce(&Connection) -> Result<T>) -> Result<T> {
        match self.db_path {
            Some(ref path) => {
                let conn = Connection::open_with_flags(
                    path,
                    OpenFlags::SQLITE_OPEN_READ_ONLY | OpenFlags::SQLITE_OPEN_NO_MUTEX,
                )
                .context("Failed to open read connection")?;
                register_functions(&conn)?;
                f(&conn)
            }
            None => self.with_conn(f),
        }
    }

    /// 블로킹 작업을 별도 스레드에서 실행
    async fn blocking<T, F>(&self, f: F) -> Result<T>
    where
        T: Send + 'static,
        F: FnOnce(&SqliteStore) -> Result<T> + Send + 'static,
    {
        let store = self.clone();
        tokio::task::spawn_blocking(move || f(&store))
            .await
            .context("Store task panicked")?
    }

    // ------------------------------------------------------------------------
    // Articles
    // ------------------------------------------------------------------------

    /// 글 생성 (항상 임베딩 대상)
    pub fn create_article(&self, input: NewArticle) -> Result<Written<Article>> {
        let now = Utc::now();
        let status = input.status.unwrap_or(PublishStatus::Draft);
        let published_at = resolve_published_at(None, status, input.published_at, now);

        let id = self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO articles (title, slug, excerpt, content, featured_image, status,
                                       published_at, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?8)",
                params![
                    input.title,
                    slugify(&input.title),
                    input.excerpt,
                    input.content,
                    input.featured_image,
                    status.as_str(),
                    published_at.map(|d| d.to_rfc3339()),
                    now.to_rfc3339(),
                ],
            )
            .context("Failed to insert article")?;
            Ok(conn.last_insert_rowid())
        })?;

        let article = self
            .get_article(id)?
            .ok_or_else(|| anyhow::anyhow!("Article {} vanished after insert", id))?;
        tracing::info!("Created article: {} (id={})", article.title, id);

        Ok(Written::new(
            article,
            Some(EmbeddingJob::new(Collection::Articles, id)),
        ))
    }

    /// 글 수정 (추적 필드가 바뀐 경우에만 임베딩 대상)
    pub fn update_article(&self, id: i64, input: NewArticle) -> Result<Written<Article>> {
        let existing = self
            .get_article(id)?
            .ok_or_else(|| anyhow::anyhow!("Article {} not found", id))?;

        let now = Utc::now();
        let status = input.status.unwrap_or(existing.status);
        let published_at = resolve_published_at(
            Some(existing.status),
            status,
            input.published_at.or(existing.published_at),
            now,
        );
        let slug = if existing.title == input.title {
            existing.slug.clone()
        } else {
            slugify(&input.title)
        };
        let dirty = existing.tracked_fields_differ(&input);

        self.with_conn(|conn| {
            conn.execute(
                "UPDATE articles SET title = ?1, slug = ?2, excerpt = ?3, content = ?4,
                        featured_image = ?5, status = ?6, published_at = ?7, updated_at = ?8
                 WHERE id = ?9",
                params![
                    input.title,
                    slug,
                    input.excerpt,
                    input.content,
                    input.featured_image,
                    status.as_str(),
                    published_at.map(|d| d.to_rfc3339()),
                    now.to_rfc3339(),
                    id,
                ],
            )
            .context("Failed to update article")?;
            Ok(())
        })?;

        let article = self
            .get_article(id)?
            .ok_or_else(|| anyhow::anyhow!("Article {} vanished after update", id))?;

        Ok(Written::new(
            article,
            dirty.then(|| EmbeddingJob::new(Collection::Articles, id)),
        ))
    }

    /// ID로 글 조회
    pub fn get_article(&self, id: i64) -> Result<Option<Article>> {
        self.with_conn(|conn| {
            let sql = format!("SELECT {} FROM articles WHERE id = ?1", ARTICLE_COLUMNS);
            conn.query_row(&sql, params![id], article_from_row)
                .optional()
                .context("Failed to load article")
        })
    }

    // ------------------------------------------------------------------------
    // Projects
    // ------------------------------------------------------------------------

    /// 프로젝트 생성
    pub fn create_project(&self, input: NewProject) -> Result<Written<Project>> {
        let now = Utc::now();
        let status = input.status.unwrap_or(PublishStatus::Draft);
        let published_at = resolve_published_at(None, status, input.published_at, now);

        let id = self.with_conn(|conn| {
            let tx = conn
                .unchecked_transaction()
                .context("Failed to begin transaction")?;
            tx.execute(
                "INSERT INTO projects (title, slug, description, long_description, featured_image,
                                       project_url, github_url, is_featured, status, published_at,
                                       created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?11)",
                params![
                    input.title,
                    slugify(&input.title),
                    input.description,
                    input.long_description,
                    input.featured_image,
                    input.project_url,
                    input.github_url,
                    input.is_featured,
                    status.as_str(),
                    published_at.map(|d| d.to_rfc3339()),
                    now.to_rfc3339(),
                ],
            )
            .context("Failed to insert project")?;
            let id = tx.last_insert_rowid();
            sync_technologies(&tx, id, &input.technologies)?;
            tx.commit().context("Failed to commit project")?;
            Ok(id)
        })?;

        let project = self
            .get_project(id)?
            .ok_or_else(|| anyhow::anyhow!("Project {} vanished after insert", id))?;
        tracing::info!("Created project: {} (id={})", project.title, id);

        Ok(Written::new(
            project,
            Some(EmbeddingJob::new(Collection::Projects, id)),
        ))
    }

    /// 프로젝트 수정 (기술 스택 변경도 임베딩 대상)
    pub fn update_project(&self, id: i64, input: NewProject) -> Result<Written<Project>> {
        let existing = self
            .get_project(id)?
            .ok_or_else(|| anyhow::anyhow!("Project {} not found", id))?;

        let now = Utc::now();
        let status = input.status.unwrap_or(existing.status);
        let published_at = resolve_published_at(
            Some(existing.status),
            status,
            input.published_at.or(existing.published_at),
            now,
        );
        let slug = if existing.title == input.title {
            existing.slug.clone()
        } else {
            slugify(&input.title)
        };
        let dirty = existing.tracked_fields_differ(&input);

        self.with_conn(|conn| {
            let tx = conn
                .unchecked_transaction()
                .context("Failed to begin transaction")?;
            tx.execute(
                "UPDATE projects SET title = ?1, slug = ?2, description = ?3,
                        long_description = ?4, featured_image = ?5, project_url = ?6,
                        github_url = ?7, is_featured = ?8, status = ?9, published_at = ?10,
                        updated_at = ?11
                 WHERE id = ?12",
                params![
                    input.title,
                    slug,
                    input.description,
                    input.long_description,
                    input.featured_image,
                    input.project_url,
                    input.github_url,
                    input.is_featured,
                    status.as_str(),
                    published_at.map(|d| d.to_rfc3339()),
                    now.to_rfc3339(),
                    id,
                ],
            )
            .context("Failed to update project")?;
            sync_technologies(&tx, id, &input.technologies)?;
            tx.commit().context("Failed to commit project")?;
            Ok(())
        })?;

        let project = self
            .get_project(id)?
            .ok_or_else(|| anyhow::anyhow!("Project {} vanished after update", id))?;

        Ok(Written::new(
            project,
            dirty.then(|| EmbeddingJob::new(Collection::Projects, id)),
        ))
    }

    /// ID로 프로젝트 조회 (기술 스택 포함)
    pub fn get_project(&self, id: i64) -> Result<Option<Project>> {
        self.with_conn(|conn| {
            let sql = format!("SELECT {} FROM projects WHERE id = ?1", PROJECT_COLUMNS);
            let project = conn
                .query_row(&sql, params![id], project_from_row)
                .optional()
                .context("Failed to load project")?;

            match project {
                Some(mut p) => {
                    p.technologies = load_technologies(conn, p.id)?;
                    Ok(Some(p))
                }
                None => Ok(None),
            }
        })
    }

    // ------------------------------------------------------------------------
    // Links
    // ------------------------------------------------------------------------

    /// 링크 생성
    pub fn create_link(&self, input: NewLink) -> Result<Written<Link>> {
        let now = Utc::now();
        let slug = link_slug(&input, now);

        let id = self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO links (url, source_type, title, slug, description, image_url,
                                    site_name, author, commentary, embed_data, og_raw,
                                    created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?12)",
                params![
                    input.url,
                    input.source_type.as_str(),
                    input.title,
                    slug,
                    input.description,
                    input.image_url,
                    input.site_name,
                    input.author,
                    input.commentary,
                    to_json(&input.embed_data)?,
                    to_json(&input.og_raw)?,
                    now.to_rfc3339(),
                ],
            )
            .context("Failed to insert link")?;
            Ok(conn.last_insert_rowid())
        })?;

        let link = self
            .get_link(id)?
            .ok_or_else(|| anyhow::anyhow!("Link {} vanished after insert", id))?;
        tracing::info!("Created link: {} (id={})", link.url, id);

        Ok(Written::new(link, Some(EmbeddingJob::new(Collection::Links, id))))
    }

    /// 링크 수정
    pub fn update_link(&self, id: i64, input: NewLink) -> Result<Written<Link>> {
        let existing = self
            .get_link(id)?
            .ok_or_else(|| anyhow::anyhow!("Link {} not found", id))?;
        let dirty = existing.tracked_fields_differ(&input);

        let updated = Link {
            url: input.url,
            source_type: input.source_type,
            title: input.title,
            description: input.description,
            image_url: input.image_url,
            site_name: input.site_name,
            author: input.author,
            commentary: input.commentary,
            embed_data: input.embed_data,
            og_raw: input.og_raw,
            ..existing
        };
        self.save_link(&updated)?;

        let link = self
            .get_link(id)?
            .ok_or_else(|| anyhow::anyhow!("Link {} vanished after update", id))?;

        Ok(Written::new(link, dirty.then(|| EmbeddingJob::new(Collection::Links, id))))
    }

    /// ID로 링크 조회
    pub fn get_link(&self, id: i64) -> Result<Option<Link>> {
        self.with_conn(|conn| {
            let sql = format!("SELECT {} FROM links WHERE id = ?1", LINK_COLUMNS);
            conn.query_row(&sql, params![id], link_from_row)
                .optional()
                .context("Failed to load link")
        })
    }

    fn save_link(&self, link: &Link) -> Result<()> {
        self.with_conn(|conn| {
            conn.execute(
                "UPDATE links SET url = ?1, source_type = ?2, title = ?3, description = ?4,
                        image_url = ?5, site_name = ?6, author = ?7, commentary = ?8,
                        embed_data = ?9, og_raw = ?10, updated_at = ?11
                 WHERE id = ?12",
                params![
                    link.url,
                    link.source_type.as_str(),
                    link.title,
                    link.description,
                    link.image_url,
                    link.site_name,
                    link.author,
                    link.commentary,
                    to_json(&link.embed_data)?,
                    to_json(&link.og_raw)?,
                    Utc::now().to_rfc3339(),
                    link.id,
                ],
            )
            .context("Failed to update link")?;
            Ok(())
        })
    }

    // ------------------------------------------------------------------------
    // Common
    // ------------------------------------------------------------------------

    /// 레코드 삭제
    pub fn delete(&self, collection: Collection, id: i64) -> Result<bool> {
        self.with_conn(|conn| {
            let sql = format!("DELETE FROM {} WHERE id = ?1", collection.as_str());
            let rows = conn.execute(&sql, params![id])?;
            Ok(rows > 0)
        })
    }

    /// 컬렉션별 통계
    pub fn stats(&self) -> Result<Vec<CollectionStats>> {
        self.with_conn(|conn| {
            Collection::ALL
                .iter()
                .map(|&collection| -> Result<CollectionStats> {
                    let table = collection.as_str();
                    let count = |filter: &str| -> Result<usize> {
                        let sql = format!("SELECT COUNT(*) FROM {} WHERE {}", table, filter);
                        let n: i64 = conn.query_row(&sql, [], |row| row.get(0))?;
                        Ok(n as usize)
                    };
                    Ok(CollectionStats {
                        collection,
                        total: count("1 = 1")?,
                        visible: count(visibility_clause(collection))?,
                        embedded: count("embedding IS NOT NULL")?,
                    })
                })
                .collect()
        })
    }

    fn load_embeddable_text(&self, job: EmbeddingJob) -> Result<Option<String>> {
        Ok(match job.collection {
            Collection::Articles => self.get_article(job.id)?.map(|a| a.embeddable_text()),
            Collection::Projects => self.get_project(job.id)?.map(|p| p.embeddable_text()),
            Collection::Links => self.get_link(job.id)?.map(|l| l.embeddable_text()),
        })
    }

    fn write_embedding(
        &self,
        job: EmbeddingJob,
        vector: &[f32],
        generated_at: DateTime<Utc>,
    ) -> Result<()> {
        if vector.is_empty() {
            anyhow::bail!("Refusing to store an empty embedding");
        }

        let rows = self.with_conn(|conn| {
            let sql = format!(
                "UPDATE {} SET embedding = ?1, embedding_generated_at = ?2 WHERE id = ?3",
                job.collection.as_str()
            );
            conn.execute(
                &sql,
                params![embedding_to_blob(vector), generated_at.to_rfc3339(), job.id],
            )
            .context("Failed to store embedding")
        })?;

        if rows == 0 {
            anyhow::bail!("{} {} not found", job.collection, job.id);
        }
        Ok(())
    }

    fn ids_missing_embeddings(&self, collection: Collection, force: bool) -> Result<Vec<i64>> {
        self.with_conn(|conn| {
            let filter = if force {
                ""
            } else {
                " WHERE embedding_generated_at IS NULL"
            };
            let sql = format!("SELECT id FROM {}{} ORDER BY id", collection.as_str(), filter);
            let mut stmt = conn.prepare(&sql)?;
            let ids = stmt
                .query_map([], |row| row.get::<_, i64>(0))?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            Ok(ids)
        })
    }

    fn merge_link_metadata(&self, id: i64, metadata: &LinkMetadata) -> Result<Written<Link>> {
        let mut link = self
            .get_link(id)?
            .ok_or_else(|| anyhow::anyhow!("Link {} not found", id))?;
        let before = link.clone();

        let updated_fields = metadata.merge_into(&mut link);
        self.save_link(&link)?;

        tracing::info!(
            "Link metadata refreshed: id={} url={} fields={:?}",
            id,
            link.url,
            updated_fields
        );

        let dirty = before.title != link.title || before.description != link.description;
        let link = self
            .get_link(id)?
            .ok_or_else(|| anyhow::anyhow!("Link {} vanished after update", id))?;

        Ok(Written::new(link, dirty.then(|| EmbeddingJob::new(Collection::Links, id))))
    }
}

// ============================================================================
// Trait Implementations
// ============================================================================

#[async_trait]
impl SearchIndex for SqliteStore {
    fn capabilities(&self) -> IndexCapabilities {
        IndexCapabilities {
            vector_search: true,
            concurrent_queries: self.db_path.is_some(),
        }
    }

    async fn nearest(
        &self,
        collection: Collection,
        query_vector: &[f32],
        min_similarity: f32,
        limit: usize,
    ) -> Result<Vec<ContentSummary>> {
        let query = query_vector.to_vec();
        self.blocking(move |store| {
            store.with_reader(|conn| vector_search(conn, collection, &query, min_similarity, limit))
        })
        .await
    }

    async fn matching(
        &self,
        collection: Collection,
        terms: &[String],
        limit: usize,
    ) -> Result<Vec<ContentSummary>> {
        let terms = terms.to_vec();
        self.blocking(move |store| {
            store.with_reader(|conn| keyword_search(conn, collection, &terms, limit))
        })
        .await
    }
}

#[async_trait]
impl EmbeddingStore for SqliteStore {
    async fn embeddable_text(&self, job: EmbeddingJob) -> Result<Option<String>> {
        self.blocking(move |store| store.load_embeddable_text(job)).await
    }

    async fn save_embedding(
        &self,
        job: EmbeddingJob,
        vector: &[f32],
        generated_at: DateTime<Utc>,
    ) -> Result<()> {
        let vector = vector.to_vec();
        self.blocking(move |store| store.write_embedding(job, &vector, generated_at))
            .await
    }

    async fn missing_embeddings(&self, collection: Collection, force: bool) -> Result<Vec<i64>> {
        self.blocking(move |store| store.ids_missing_embeddings(collection, force))
            .await
    }
}

#[async_trait]
impl LinkRepository for SqliteStore {
    async fn find_link(&self, id: i64) -> Result<Option<Link>> {
        self.blocking(move |store| store.get_link(id)).await
    }

    async fn apply_link_metadata(&self, id: i64, metadata: &LinkMetadata) -> Result<Written<Link>> {
        let metadata = metadata.clone();
        self.blocking(move |store| store.merge_link_metadata(id, &metadata))
            .await
    }
}

// ============================================================================
// Search Queries
// ============================================================================

/// 검색용 SQL 함수 등록
///
/// `ulower(text)`: 유니코드 소문자 변환. SQLite 내장 `LOWER`는 ASCII만 변환합니다.
fn register_functions(conn: &Connection) -> Result<()> {
    conn.create_scalar_function(
        "ulower",
        1,
        FunctionFlags::SQLITE_UTF8 | FunctionFlags::SQLITE_DETERMINISTIC,
        |ctx| {
            let value = ctx.get::<Option<String>>(0)?;
            Ok(value.map(|v| v.to_lowercase()))
        },
    )
    .context("Failed to register ulower function")
}

/// 컬렉션 공개 조건 (링크는 조건 없음)
fn visibility_clause(collection: Collection) -> &'static str {
    match collection {
        Collection::Articles => "status = 'published' AND published_at IS NOT NULL",
        Collection::Projects => "status = 'published'",
        Collection::Links => "1 = 1",
    }
}

/// LIKE 패턴 이스케이프 (`\` 기준)
fn escape_like(term: &str) -> String {
    let mut escaped = String::with_capacity(term.len());
    for ch in term.chars() {
        if matches!(ch, '\\' | '%' | '_') {
            escaped.push('\\');
        }
        escaped.push(ch);
    }
    escaped
}

/// 키워드 검색 (검색어 AND, 필드 OR, 대소문자 무시)
fn keyword_search(
    conn: &Connection,
    collection: Collection,
    terms: &[String],
    limit: usize,
) -> Result<Vec<ContentSummary>> {
    if terms.is_empty() || limit == 0 {
        return Ok(vec![]);
    }

    let patterns: Vec<String> = terms
        .iter()
        .map(|t| format!("%{}%", escape_like(&t.to_lowercase())))
        .collect();

    let term_clauses: Vec<String> = (1..=patterns.len())
        .map(|n| {
            let mut alternatives: Vec<String> = collection
                .keyword_fields()
                .iter()
                .map(|f| format!("ulower(COALESCE({}, '')) LIKE ?{} ESCAPE '\\'", f.column(), n))
                .collect();

            if collection.matches_technologies() {
                alternatives.push(format!(
                    "EXISTS (SELECT 1 FROM project_technology pt
                             JOIN technologies t ON t.id = pt.technology_id
                             WHERE pt.project_id = projects.id
                               AND ulower(t.name) LIKE ?{} ESCAPE '\\')",
                    n
                ));
            }

            format!("({})", alternatives.join(" OR "))
        })
        .collect();

    let sql = format!(
        "SELECT {} FROM {} WHERE {} AND {} ORDER BY id LIMIT {}",
        summary_columns(collection),
        collection.as_str(),
        visibility_clause(collection),
        term_clauses.join(" AND "),
        limit
    );

    let mut stmt = conn.prepare(&sql).context("Failed to prepare keyword query")?;
    let mut summaries = stmt
        .query_map(params_from_iter(patterns.iter()), |row| {
            summary_from_row(collection, row)
        })?
        .collect::<rusqlite::Result<Vec<_>>>()
        .context("Keyword query failed")?;

    attach_technologies(conn, &mut summaries)?;
    Ok(summaries)
}

/// 벡터 검색 (코사인 유사도 임계값 이상, 유사도 내림차순)
fn vector_search(
    conn: &Connection,
    collection: Collection,
    query: &[f32],
    min_similarity: f32,
    limit: usize,
) -> Result<Vec<ContentSummary>> {
    if query.is_empty() || limit == 0 {
        return Ok(vec![]);
    }

    let sql = format!(
        "SELECT id, embedding FROM {} WHERE embedding IS NOT NULL AND {}",
        collection.as_str(),
        visibility_clause(collection)
    );

    let mut stmt = conn.prepare(&sql).context("Failed to prepare vector query")?;
    let candidates = stmt
        .query_map([], |row| {
            Ok((row.get::<_, i64>(0)?, row.get::<_, Vec<u8>>(1)?))
        })?
        .collect::<rusqlite::Result<Vec<_>>>()
        .context("Vector query failed")?;

    let mut scored: Vec<(i64, f32)> = candidates
        .into_iter()
        .map(|(id, blob)| (id, cosine_similarity(query, &blob_to_embedding(&blob))))
        .filter(|(_, similarity)| *similarity >= min_similarity)
        .collect();

    scored.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));
    scored.truncate(limit);

    let ids: Vec<i64> = scored.into_iter().map(|(id, _)| id).collect();
    summaries_by_ids(conn, collection, &ids)
}

/// ID 순서를 유지하며 요약 로드
fn summaries_by_ids(
    conn: &Connection,
    collection: Collection,
    ids: &[i64],
) -> Result<Vec<ContentSummary>> {
    if ids.is_empty() {
        return Ok(vec![]);
    }

    let placeholders = vec!["?"; ids.len()].join(", ");
    let sql = format!(
        "SELECT {} FROM {} WHERE id IN ({})",
        summary_columns(collection),
        collection.as_str(),
        placeholders
    );

    let mut stmt = conn.prepare(&sql)?;
    let mut by_id: HashMap<i64, ContentSummary> = stmt
        .query_map(params_from_iter(ids.iter()), |row| {
            summary_from_row(collection, row)
        })?
        .collect::<rusqlite::Result<Vec<_>>>()?
        .into_iter()
        .map(|s| (s.id(), s))
        .collect();

    let mut ordered: Vec<ContentSummary> = ids.iter().filter_map(|id| by_id.remove(id)).collect();
    attach_technologies(conn, &mut ordered)?;
    Ok(ordered)
}

fn summary_columns(collection: Collection) -> &'static str {
    match collection {
        Collection::Articles => ARTICLE_SUMMARY_COLUMNS,
        Collection::Projects => PROJECT_SUMMARY_COLUMNS,
        Collection::Links => LINK_SUMMARY_COLUMNS,
    }
}

fn summary_from_row(collection: Collection, row: &Row<'_>) -> rusqlite::Result<ContentSummary> {
    Ok(match collection {
        Collection::Articles => {
            let content: String = row.get(6)?;
            ContentSummary::Article(ArticleSummary {
                id: row.get(0)?,
                title: row.get(1)?,
                slug: row.get(2)?,
                excerpt: row.get(3)?,
                featured_image: row.get(4)?,
                published_at: parse_opt_datetime(row.get(5)?),
                read_time: super::read_time(&content),
            })
        }
        Collection::Projects => ContentSummary::Project(ProjectSummary {
            id: row.get(0)?,
            title: row.get(1)?,
            slug: row.get(2)?,
            description: row.get(3)?,
            featured_image: row.get(4)?,
            project_url: row.get(5)?,
            github_url: row.get(6)?,
            is_featured: row.get(7)?,
            published_at: parse_opt_datetime(row.get(8)?),
            technologies: vec![],
        }),
        Collection::Links => ContentSummary::Link(LinkSummary {
            id: row.get(0)?,
            url: row.get(1)?,
            source_type: SourceType::parse(&row.get::<_, String>(2)?),
            title: row.get(3)?,
            slug: row.get(4)?,
            description: row.get(5)?,
            image_url: row.get(6)?,
            site_name: row.get(7)?,
            created_at: parse_datetime(row.get(8)?),
        }),
    })
}

/// 프로젝트 요약에 기술 스택 채우기
fn attach_technologies(conn: &Connection, summaries: &mut [ContentSummary]) -> Result<()> {
    for summary in summaries.iter_mut() {
        if let ContentSummary::Project(project) = summary {
            project.technologies = load_technologies(conn, project.id)?;
        }
    }
    Ok(())
}

// ============================================================================
// Technologies
// ============================================================================

fn load_technologies(conn: &Connection, project_id: i64) -> Result<Vec<String>> {
    let mut stmt = conn.prepare(
        "SELECT t.name FROM technologies t
         JOIN project_technology pt ON pt.technology_id = t.id
         WHERE pt.project_id = ?1
         ORDER BY t.name COLLATE NOCASE",
    )?;
    let names = stmt
        .query_map(params![project_id], |row| row.get::<_, String>(0))?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(names)
}

fn sync_technologies(conn: &Connection, project_id: i64, names: &[String]) -> Result<()> {
    conn.execute(
        "DELETE FROM project_technology WHERE project_id = ?1",
        params![project_id],
    )?;

    for name in normalize_technologies(names) {
        conn.execute(
            "INSERT OR IGNORE INTO technologies (name) VALUES (?1)",
            params![name],
        )?;
        let tech_id: i64 = conn.query_row(
            "SELECT id FROM technologies WHERE name = ?1",
            params![name],
            |row| row.get(0),
        )?;
        conn.execute(
            "INSERT OR IGNORE INTO project_technology (project_id, technology_id) VALUES (?1, ?2)",
            params![project_id, tech_id],
        )?;
    }

    Ok(())
}

// ============================================================================
// Row Mapping
// ============================================================================

fn article_from_row(row: &Row<'_>) -> rusqlite::Result<Article> {
    Ok(Article {
        id: row.get(0)?,
        title: row.get(1)?,
        slug: row.get(2)?,
        excerpt: row.get(3)?,
        content: row.get(4)?,
        featured_image: row.get(5)?,
        status: PublishStatus::parse(&row.get::<_, String>(6)?),
        published_at: parse_opt_datetime(row.get(7)?),
        embedding: stored_embedding(row.get(8)?, row.get(9)?),
        created_at: parse_datetime(row.get(10)?),
        updated_at: parse_datetime(row.get(11)?),
    })
}

fn project_from_row(row: &Row<'_>) -> rusqlite::Result<Project> {
    Ok(Project {
        id: row.get(0)?,
        title: row.get(1)?,
        slug: row.get(2)?,
        description: row.get(3)?,
        long_description: row.get(4)?,
        featured_image: row.get(5)?,
        project_url: row.get(6)?,
        github_url: row.get(7)?,
        is_featured: row.get(8)?,
        status: PublishStatus::parse(&row.get::<_, String>(9)?),
        published_at: parse_opt_datetime(row.get(10)?),
        technologies: vec![],
        embedding: stored_embedding(row.get(11)?, row.get(12)?),
        created_at: parse_datetime(row.get(13)?),
        updated_at: parse_datetime(row.get(14)?),
    })
}

fn link_from_row(row: &Row<'_>) -> rusqlite::Result<Link> {
    let embed_data: Option<String> = row.get(10)?;
    let og_raw: Option<String> = row.get(11)?;

    Ok(Link {
        id: row.get(0)?,
        url: row.get(1)?,
        source_type: SourceType::parse(&row.get::<_, String>(2)?),
        title: row.get(3)?,
        slug: row.get(4)?,
        description: row.get(5)?,
        image_url: row.get(6)?,
        site_name: row.get(7)?,
        author: row.get(8)?,
        commentary: row.get(9)?,
        embed_data: embed_data.and_then(|s| serde_json::from_str::<EmbedData>(&s).ok()),
        og_raw: og_raw.and_then(|s| serde_json::from_str::<BTreeMap<String, String>>(&s).ok()),
        embedding: stored_embedding(row.get(12)?, row.get(13)?),
        created_at: parse_datetime(row.get(14)?),
        updated_at: parse_datetime(row.get(15)?),
    })
}

fn stored_embedding(blob: Option<Vec<u8>>, generated_at: Option<String>) -> Option<StoredEmbedding> {
    match (blob, generated_at) {
        (Some(blob), Some(at)) => Some(StoredEmbedding {
            vector: blob_to_embedding(&blob),
            generated_at: parse_datetime(at),
        }),
        _ => None,
    }
}

/// 제목이 없는 링크는 `호스트-타임스탬프` slug
fn link_slug(input: &NewLink, now: DateTime<Utc>) -> String {
    if let Some(title) = input.title.as_deref().filter(|t| !t.trim().is_empty()) {
        let slug = slugify(title);
        if !slug.is_empty() {
            return slug;
        }
    }

    let host = url::Url::parse(&input.url)
        .ok()
        .and_then(|u| u.host_str().map(|h| h.trim_start_matches("www.").to_string()))
        .unwrap_or_else(|| "share".to_string());
    slugify(&format!("{}-{}", host, now.timestamp()))
}

fn to_json<T: Serialize>(value: &Option<T>) -> Result<Option<String>> {
    value
        .as_ref()
        .map(|v| serde_json::to_string(v).context("Failed to encode JSON column"))
        .transpose()
}

/// RFC3339 문자열을 DateTime<Utc>로 파싱
fn parse_datetime(s: String) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(&s)
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or_else(|_| Utc::now())
}

fn parse_opt_datetime(s: Option<String>) -> Option<DateTime<Utc>> {
    s.and_then(|s| DateTime::parse_from_rfc3339(&s).ok())
        .map(|dt| dt.with_timezone(&Utc))
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn create_test_store() -> (TempDir, SqliteStore) {
        let dir = TempDir::new().unwrap();
        let db_path = dir.path().join("test.db");
        let store = SqliteStore::open(&db_path).unwrap();
        (dir, store)
    }

    fn published_article(title: &str, content: &str) -> NewArticle {
        NewArticle {
            title: title.to_string(),
            content: content.to_string(),
            status: Some(PublishStatus::Published),
            ..Default::default()
        }
    }

    fn terms(q: &str) -> Vec<String> {
        super::super::split_terms(q)
    }

    #[test]
    fn test_create_article_always_needs_embedding() {
        let store = SqliteStore::open_in_memory().unwrap();
        let written = store
            .create_article(published_article("Rust Guide", "<p>ownership</p>"))
            .unwrap();
        assert!(written.needs_reindex());

        let article = written.record();
        assert_eq!(article.slug, "rust-guide");
        assert!(article.published_at.is_some());
        assert!(article.embedding.is_none());
    }

    #[test]
    fn test_update_untracked_field_does_not_reindex() {
        let store = SqliteStore::open_in_memory().unwrap();
        let id = store
            .create_article(published_article("Rust Guide", "body"))
            .unwrap()
            .record()
            .id;

        let mut input = published_article("Rust Guide", "body");
        input.featured_image = Some("cover.png".to_string());
        let written = store.update_article(id, input).unwrap();
        assert!(!written.needs_reindex());

        let written = store
            .update_article(id, published_article("Rust Guide", "new body"))
            .unwrap();
        assert!(written.needs_reindex());
    }

    #[test]
    fn test_draft_transition_clears_published_at() {
        let store = SqliteStore::open_in_memory().unwrap();
        let id = store
            .create_article(published_article("Title", "body"))
            .unwrap()
            .record()
            .id;

        let mut input = published_article("Title", "body");
        input.status = Some(PublishStatus::Draft);
        let article = store.update_article(id, input).unwrap();
        assert_eq!(article.record().status, PublishStatus::Draft);
        assert!(article.record().published_at.is_none());
    }

    #[test]
    fn test_project_technologies_roundtrip() {
        let store = SqliteStore::open_in_memory().unwrap();
        let written = store
            .create_project(NewProject {
                title: "Dashboard".to_string(),
                technologies: vec!["React".to_string(), "rust".to_string(), "react".to_string()],
                status: Some(PublishStatus::Published),
                ..Default::default()
            })
            .unwrap();

        assert_eq!(written.record().technologies, vec!["React", "rust"]);
    }

    #[tokio::test]
    async fn test_keyword_search_matches_technology() {
        let store = SqliteStore::open_in_memory().unwrap();
        let _ = store
            .create_project(NewProject {
                title: "Dashboard".to_string(),
                description: Some("Admin panel".to_string()),
                technologies: vec!["React".to_string()],
                status: Some(PublishStatus::Published),
                ..Default::default()
            })
            .unwrap();

        let results = store
            .matching(Collection::Projects, &terms("React"), 5)
            .await
            .unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].title(), Some("Dashboard"));
        match &results[0] {
            ContentSummary::Project(p) => assert_eq!(p.technologies, vec!["React"]),
            other => panic!("unexpected summary: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_keyword_search_excludes_drafts() {
        let store = SqliteStore::open_in_memory().unwrap();
        let _ = store
            .create_article(NewArticle {
                title: "Secret Rust".to_string(),
                content: "draft".to_string(),
                status: Some(PublishStatus::Draft),
                ..Default::default()
            })
            .unwrap();
        let _ = store
            .create_article(published_article("Public Rust", "published"))
            .unwrap();

        let results = store
            .matching(Collection::Articles, &terms("rust"), 5)
            .await
            .unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].title(), Some("Public Rust"));
    }

    #[tokio::test]
    async fn test_keyword_search_folds_unicode_case() {
        let (_dir, file_store) = create_test_store();
        let memory_db = SqliteStore::open_in_memory().unwrap();

        for store in [&file_store, &memory_db] {
            let _ = store
                .create_article(published_article("Über Rust", "body"))
                .unwrap();
            let _ = store
                .create_project(NewProject {
                    title: "Chat".to_string(),
                    technologies: vec!["Élixir".to_string()],
                    status: Some(PublishStatus::Published),
                    ..Default::default()
                })
                .unwrap();

            for query in ["über", "ÜBER rust"] {
                let results = store
                    .matching(Collection::Articles, &terms(query), 5)
                    .await
                    .unwrap();
                assert_eq!(results.len(), 1, "{}", query);
                assert_eq!(results[0].title(), Some("Über Rust"));
            }

            let results = store
                .matching(Collection::Projects, &terms("élixir"), 5)
                .await
                .unwrap();
            assert_eq!(results.len(), 1);
        }
    }

    #[tokio::test]
    async fn test_keyword_search_escapes_wildcards() {
        let store = SqliteStore::open_in_memory().unwrap();
        let _ = store
            .create_article(published_article("100% Rust", "body"))
            .unwrap();
        let _ = store
            .create_article(published_article("Plain Title", "body"))
            .unwrap();

        let results = store
            .matching(Collection::Articles, &terms("%"), 5)
            .await
            .unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].title(), Some("100% Rust"));
    }

    #[tokio::test]
    async fn test_vector_search_threshold_and_order() {
        let (_dir, store) = create_test_store();
        let near = store
            .create_article(published_article("Near", "a"))
            .unwrap()
            .record()
            .id;
        let nearer = store
            .create_article(published_article("Nearer", "b"))
            .unwrap()
            .record()
            .id;
        let far = store
            .create_article(published_article("Far", "c"))
            .unwrap()
            .record()
            .id;
        let _unembedded = store
            .create_article(published_article("No vector", "d"))
            .unwrap();

        let now = Utc::now();
        store
            .save_embedding(EmbeddingJob::new(Collection::Articles, near), &[1.0, 1.0, 0.0], now)
            .await
            .unwrap();
        store
            .save_embedding(EmbeddingJob::new(Collection::Articles, nearer), &[1.0, 0.1, 0.0], now)
            .await
            .unwrap();
        store
            .save_embedding(EmbeddingJob::new(Collection::Articles, far), &[0.0, 0.0, 1.0], now)
            .await
            .unwrap();

        let results = store
            .nearest(Collection::Articles, &[1.0, 0.0, 0.0], 0.3, 5)
            .await
            .unwrap();
        let titles: Vec<_> = results.iter().filter_map(|r| r.title()).collect();
        assert_eq!(titles, vec!["Nearer", "Near"]);
    }

    #[tokio::test]
    async fn test_embedding_written_with_timestamp() {
        let store = SqliteStore::open_in_memory().unwrap();
        let id = store
            .create_link(NewLink::new("https://example.com/post"))
            .unwrap()
            .record()
            .id;

        let job = EmbeddingJob::new(Collection::Links, id);
        assert_eq!(store.missing_embeddings(Collection::Links, false).await.unwrap(), vec![id]);

        store.save_embedding(job, &[0.5, 0.5], Utc::now()).await.unwrap();

        let link = store.get_link(id).unwrap().unwrap();
        let embedding = link.embedding.unwrap();
        assert_eq!(embedding.vector, vec![0.5, 0.5]);
        assert!(store.missing_embeddings(Collection::Links, false).await.unwrap().is_empty());
        assert_eq!(store.missing_embeddings(Collection::Links, true).await.unwrap(), vec![id]);
    }

    #[test]
    fn test_partial_embedding_rejected_by_schema() {
        let store = SqliteStore::open_in_memory().unwrap();
        let id = store
            .create_article(published_article("Title", "body"))
            .unwrap()
            .record()
            .id;

        let result = store.with_conn(|conn| {
            conn.execute(
                "UPDATE articles SET embedding = ?1 WHERE id = ?2",
                params![embedding_to_blob(&[1.0]), id],
            )
            .map_err(anyhow::Error::from)
        });
        assert!(result.is_err());
    }

    #[test]
    fn test_link_slug_without_title_uses_host() {
        let store = SqliteStore::open_in_memory().unwrap();
        let link = store
            .create_link(NewLink::new("https://www.example.com/a"))
            .unwrap()
            .record()
            .clone();
        assert!(link.slug.starts_with("example-com-"));
    }

    #[test]
    fn test_link_embed_data_roundtrip() {
        let store = SqliteStore::open_in_memory().unwrap();
        let link = store
            .create_link(NewLink::new("https://youtu.be/dQw4w9WgXcQ"))
            .unwrap()
            .record()
            .clone();
        assert_eq!(link.source_type, SourceType::Youtube);
        assert_eq!(
            link.embed_data.as_ref().and_then(|d| d.video_id()),
            Some("dQw4w9WgXcQ")
        );
    }

    #[test]
    fn test_stats_counts_visibility_and_embeddings() {
        let store = SqliteStore::open_in_memory().unwrap();
        let _ = store.create_article(published_article("A", "a")).unwrap();
        let _ = store
            .create_article(NewArticle {
                title: "B".to_string(),
                ..Default::default()
            })
            .unwrap();

        let stats = store.stats().unwrap();
        let articles = stats
            .iter()
            .find(|s| s.collection == Collection::Articles)
            .unwrap();
        assert_eq!(articles.total, 2);
        assert_eq!(articles.visible, 1);
        assert_eq!(articles.embedded, 0);
    }

    #[test]
    fn test_escape_like() {
        assert_eq!(escape_like("a%b_c\\d"), "a\\%b\\_c\\\\d");
        assert_eq!(escape_like("plain"), "plain");
    }

    #[test]
    fn test_delete() {
        let store = SqliteStore::open_in_memory().unwrap();
        let id = store
            .create_article(published_article("Gone", "x"))
            .unwrap()
            .record()
            .id;
        assert!(store.delete(Collection::Articles, id).unwrap());
        assert!(store.get_article(id).unwrap().is_none());
        assert!(!store.delete(Collection::Articles, id).unwrap());
    }
}
