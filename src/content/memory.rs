//! 인메모리 콘텐츠 저장소
//!
//! 벡터 검색을 지원하지 않는 저장소입니다. 검색 엔진은 이 저장소에 대해
//! 부분 문자열 매칭으로 대체하며, 임베딩 API도 호출하지 않습니다.

use std::sync::RwLock;

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::indexing::{EmbeddingJob, EmbeddingStore};
use crate::opengraph::{LinkMetadata, LinkRepository};
use crate::search::{IndexCapabilities, SearchIndex};

use super::{
    matches_all_terms, normalize_technologies, resolve_published_at, slugify, Article, Collection,
    ContentSummary, Link, NewArticle, NewLink, NewProject, Project, PublishStatus,
    StoredEmbedding, Written,
};

#[derive(Default)]
struct Tables {
    articles: Vec<Article>,
    projects: Vec<Project>,
    links: Vec<Link>,
    next_id: i64,
}

impl Tables {
    fn allocate_id(&mut self) -> i64 {
        self.next_id += 1;
        self.next_id
    }
}

/// 인메모리 저장소 (동시 조회 미지원으로 취급)
#[derive(Default)]
pub struct MemoryStore {
    tables: RwLock<Tables>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn read<T>(&self, f: impl FnOnce(&Tables) -> T) -> Result<T> {
        let tables = self
            .tables
            .read()
            .map_err(|e| anyhow::anyhow!("Lock error: {}", e))?;
        Ok(f(&tables))
    }

    fn write<T>(&self, f: impl FnOnce(&mut Tables) -> T) -> Result<T> {
        let mut tables = self
            .tables
            .write()
            .map_err(|e| anyhow::anyhow!("Lock error: {}", e))?;
        Ok(f(&mut tables))
    }

    /// 글 추가
    pub fn insert_article(&self, input: NewArticle) -> Result<Written<Article>> {
        let now = Utc::now();
        let status = input.status.unwrap_or(PublishStatus::Draft);

        let article = self.write(|t| {
            let article = Article {
                id: t.allocate_id(),
                slug: slugify(&input.title),
                title: input.title,
                excerpt: input.excerpt,
                content: input.content,
                featured_image: input.featured_image,
                status,
                published_at: resolve_published_at(None, status, input.published_at, now),
                embedding: None,
                created_at: now,
                updated_at: now,
            };
            t.articles.push(article.clone());
            article
        })?;

        let job = EmbeddingJob::new(Collection::Articles, article.id);
        Ok(Written::new(article, Some(job)))
    }

    /// 프로젝트 추가
    pub fn insert_project(&self, input: NewProject) -> Result<Written<Project>> {
        let now = Utc::now();
        let status = input.status.unwrap_or(PublishStatus::Draft);

        let project = self.write(|t| {
            let project = Project {
                id: t.allocate_id(),
                slug: slugify(&input.title),
                title: input.title,
                description: input.description,
                long_description: input.long_description,
                featured_image: input.featured_image,
                project_url: input.project_url,
                github_url: input.github_url,
                is_featured: input.is_featured,
                status,
                published_at: resolve_published_at(None, status, input.published_at, now),
                technologies: normalize_technologies(&input.technologies),
                embedding: None,
                created_at: now,
                updated_at: now,
            };
            t.projects.push(project.clone());
            project
        })?;

        let job = EmbeddingJob::new(Collection::Projects, project.id);
        Ok(Written::new(project, Some(job)))
    }

    /// 링크 추가
    pub fn insert_link(&self, input: NewLink) -> Result<Written<Link>> {
        let now = Utc::now();

        let link = self.write(|t| {
            let id = t.allocate_id();
            let slug = input
                .title
                .as_deref()
                .map(slugify)
                .filter(|s| !s.is_empty())
                .unwrap_or_else(|| format!("share-{}", id));
            let link = Link {
                id,
                url: input.url,
                source_type: input.source_type,
                title: input.title,
                slug,
                description: input.description,
                image_url: input.image_url,
                site_name: input.site_name,
                author: input.author,
                commentary: input.commentary,
                embed_data: input.embed_data,
                og_raw: input.og_raw,
                embedding: None,
                created_at: now,
                updated_at: now,
            };
            t.links.push(link.clone());
            link
        })?;

        let job = EmbeddingJob::new(Collection::Links, link.id);
        Ok(Written::new(link, Some(job)))
    }

    pub fn get_link(&self, id: i64) -> Result<Option<Link>> {
        self.read(|t| t.links.iter().find(|l| l.id == id).cloned())
    }

    pub fn get_article(&self, id: i64) -> Result<Option<Article>> {
        self.read(|t| t.articles.iter().find(|a| a.id == id).cloned())
    }

    pub fn get_project(&self, id: i64) -> Result<Option<Project>> {
        self.read(|t| t.projects.iter().find(|p| p.id == id).cloned())
    }
}

#[async_trait]
impl SearchIndex for MemoryStore {
    fn capabilities(&self) -> IndexCapabilities {
        IndexCapabilities {
            vector_search: false,
            concurrent_queries: false,
        }
    }

    async fn matching(
        &self,
        collection: Collection,
        terms: &[String],
        limit: usize,
    ) -> Result<Vec<ContentSummary>> {
        let fields = collection.keyword_fields();

        self.read(|t| match collection {
            Collection::Articles => t
                .articles
                .iter()
                .filter(|a| a.is_visible() && matches_all_terms(*a, fields, terms))
                .take(limit)
                .map(|a| ContentSummary::Article(a.summary()))
                .collect(),
            Collection::Projects => t
                .projects
                .iter()
                .filter(|p| p.is_visible() && matches_all_terms(*p, fields, terms))
                .take(limit)
                .map(|p| ContentSummary::Project(p.summary()))
                .collect(),
            Collection::Links => t
                .links
                .iter()
                .filter(|l| matches_all_terms(*l, fields, terms))
                .take(limit)
                .map(|l| ContentSummary::Link(l.summary()))
                .collect(),
        })
    }
}

#[async_trait]
impl EmbeddingStore for MemoryStore {
    async fn embeddable_text(&self, job: EmbeddingJob) -> Result<Option<String>> {
        self.read(|t| match job.collection {
            Collection::Articles => t
                .articles
                .iter()
                .find(|a| a.id == job.id)
                .map(Article::embeddable_text),
            Collection::Projects => t
                .projects
                .iter()
                .find(|p| p.id == job.id)
                .map(Project::embeddable_text),
            Collection::Links => t
                .links
                .iter()
                .find(|l| l.id == job.id)
                .map(Link::embeddable_text),
        })
    }

    async fn save_embedding(
        &self,
        job: EmbeddingJob,
        vector: &[f32],
        generated_at: DateTime<Utc>,
    ) -> Result<()> {
        if vector.is_empty() {
            anyhow::bail!("Refusing to store an empty embedding");
        }

        let embedding = StoredEmbedding {
            vector: vector.to_vec(),
            generated_at,
        };

        let slot = self.write(|t| match job.collection {
            Collection::Articles => t
                .articles
                .iter_mut()
                .find(|a| a.id == job.id)
                .map(|a| a.embedding = Some(embedding)),
            Collection::Projects => t
                .projects
                .iter_mut()
                .find(|p| p.id == job.id)
                .map(|p| p.embedding = Some(embedding)),
            Collection::Links => t
                .links
                .iter_mut()
                .find(|l| l.id == job.id)
                .map(|l| l.embedding = Some(embedding)),
        })?;

        slot.ok_or_else(|| anyhow::anyhow!("{} {} not found", job.collection, job.id))
    }

    async fn missing_embeddings(&self, collection: Collection, force: bool) -> Result<Vec<i64>> {
        self.read(|t| {
            let ids: Vec<(i64, bool)> = match collection {
                Collection::Articles => t
                    .articles
                    .iter()
                    .map(|a| (a.id, a.embedding.is_some()))
                    .collect(),
                Collection::Projects => t
                    .projects
                    .iter()
                    .map(|p| (p.id, p.embedding.is_some()))
                    .collect(),
                Collection::Links => t
                    .links
                    .iter()
                    .map(|l| (l.id, l.embedding.is_some()))
                    .collect(),
            };
            ids.into_iter()
                .filter(|(_, embedded)| force || !embedded)
                .map(|(id, _)| id)
                .collect()
        })
    }
}

#[async_trait]
impl LinkRepository for MemoryStore {
    async fn find_link(&self, id: i64) -> Result<Option<Link>> {
        self.get_link(id)
    }

    async fn apply_link_metadata(&self, id: i64, metadata: &LinkMetadata) -> Result<Written<Link>> {
        let (link, dirty) = self.write(|t| {
            let link = t.links.iter_mut().find(|l| l.id == id)?;
            let before = (link.title.clone(), link.description.clone());
            metadata.merge_into(link);
            link.updated_at = Utc::now();
            let dirty = before != (link.title.clone(), link.description.clone());
            Some((link.clone(), dirty))
        })?
        .ok_or_else(|| anyhow::anyhow!("Link {} not found", id))?;

        Ok(Written::new(
            link,
            dirty.then(|| EmbeddingJob::new(Collection::Links, id)),
        ))
    }
}
