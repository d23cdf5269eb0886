//! Durable project storage + HTTP fetch utilities for parc.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use async_trait::async_trait;
use chrono::Utc;
use parc_core::{ProgramProject, ScrapedProject};
use reqwest::StatusCode;
use sqlx::postgres::{PgPool, PgPoolOptions, PgRow};
use sqlx::Row;
use thiserror::Error;
use tokio::sync::{Mutex, Semaphore};
use tracing::info_span;
use uuid::Uuid;

pub const CRATE_NAME: &str = "parc-storage";

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),
}

/// Optional filter for project reads. An absent dimension means
/// "no filter on that dimension".
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProjectFilter {
    pub program: Option<String>,
    pub year: Option<i32>,
}

impl ProjectFilter {
    pub fn new(program: Option<&str>, year: Option<i32>) -> Self {
        Self {
            program: program.map(str::to_string),
            year,
        }
    }

    /// A filter is syncable only when both identity dimensions are present.
    pub fn is_fully_specified(&self) -> bool {
        self.program.is_some() && self.year.is_some()
    }
}

/// Storage capability consumed by the sync orchestrators.
///
/// `find_many` returns rows ordered by organization name ascending, ties
/// broken by insertion order. `upsert` is a single atomic insert-or-update
/// keyed on `(project_url, year)`; on conflict only the descriptive fields
/// and `updated_at` change.
#[async_trait]
pub trait ProjectStore: Send + Sync {
    async fn find_many(&self, filter: &ProjectFilter) -> Result<Vec<ProgramProject>, StorageError>;
    async fn upsert(&self, project: &ScrapedProject) -> Result<ProgramProject, StorageError>;
}

#[derive(Debug, Clone)]
pub struct PgProjectStore {
    pool: PgPool,
}

impl PgProjectStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn connect(database_url: &str) -> Result<Self, StorageError> {
        let pool = PgPoolOptions::new()
            .max_connections(8)
            .connect(database_url)
            .await?;
        Ok(Self::new(pool))
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    pub async fn run_migrations(&self) -> Result<(), StorageError> {
        sqlx::migrate!("../../migrations").run(&self.pool).await?;
        Ok(())
    }
}

fn project_from_row(row: &PgRow) -> Result<ProgramProject, sqlx::Error> {
    Ok(ProgramProject {
        id: row.try_get("id")?,
        year: row.try_get("year")?,
        program: row.try_get("program")?,
        organization_name: row.try_get("organization_name")?,
        project_name: row.try_get("project_name")?,
        project_url: row.try_get("project_url")?,
        topics: row.try_get("topics")?,
        description: row.try_get("description")?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}

#[async_trait]
impl ProjectStore for PgProjectStore {
    async fn find_many(&self, filter: &ProjectFilter) -> Result<Vec<ProgramProject>, StorageError> {
        let rows = sqlx::query(
            r#"
            SELECT id, year, program, organization_name, project_name,
                   project_url, topics, description, created_at, updated_at
              FROM program_projects
             WHERE ($1::text IS NULL OR program = $1)
               AND ($2::int IS NULL OR year = $2)
             ORDER BY organization_name ASC, created_at ASC
            "#,
        )
        .bind(filter.program.as_deref())
        .bind(filter.year)
        .fetch_all(&self.pool)
        .await?;

        let mut out = Vec::with_capacity(rows.len());
        for row in &rows {
            out.push(project_from_row(row)?);
        }
        Ok(out)
    }

    async fn upsert(&self, project: &ScrapedProject) -> Result<ProgramProject, StorageError> {
        let row = sqlx::query(
            r#"
            INSERT INTO program_projects
                   (id, year, program, organization_name, project_name,
                    project_url, topics, description)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            ON CONFLICT (project_url, year) DO UPDATE
               SET program = EXCLUDED.program,
                   organization_name = EXCLUDED.organization_name,
                   project_name = EXCLUDED.project_name,
                   topics = EXCLUDED.topics,
                   description = EXCLUDED.description,
                   updated_at = now()
            RETURNING id, year, program, organization_name, project_name,
                      project_url, topics, description, created_at, updated_at
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(project.year)
        .bind(&project.program)
        .bind(&project.organization_name)
        .bind(&project.project_name)
        .bind(&project.project_url)
        .bind(&project.topics)
        .bind(&project.description)
        .fetch_one(&self.pool)
        .await?;

        Ok(project_from_row(&row)?)
    }
}

/// In-process store with the same conflict semantics as the Postgres
/// implementation. Backs orchestrator and handler tests.
#[derive(Debug, Default)]
pub struct MemoryProjectStore {
    rows: Mutex<Vec<ProgramProject>>,
}

impl MemoryProjectStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        self.rows.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.rows.lock().await.is_empty()
    }
}

#[async_trait]
impl ProjectStore for MemoryProjectStore {
    async fn find_many(&self, filter: &ProjectFilter) -> Result<Vec<ProgramProject>, StorageError> {
        let rows = self.rows.lock().await;
        let mut out: Vec<ProgramProject> = rows
            .iter()
            .filter(|p| {
                filter.program.as_deref().is_none_or(|wanted| p.program == wanted)
                    && filter.year.is_none_or(|wanted| p.year == wanted)
            })
            .cloned()
            .collect();
        // Stable sort keeps insertion order within equal organization names.
        out.sort_by(|a, b| a.organization_name.cmp(&b.organization_name));
        Ok(out)
    }

    async fn upsert(&self, project: &ScrapedProject) -> Result<ProgramProject, StorageError> {
        let mut rows = self.rows.lock().await;
        let now = Utc::now();

        if let Some(existing) = rows
            .iter_mut()
            .find(|p| (p.project_url.as_str(), p.year) == project.natural_key())
        {
            existing.program = project.program.clone();
            existing.organization_name = project.organization_name.clone();
            existing.project_name = project.project_name.clone();
            existing.topics = project.topics.clone();
            existing.description = project.description.clone();
            existing.updated_at = now;
            return Ok(existing.clone());
        }

        let created = ProgramProject {
            id: Uuid::new_v4(),
            year: project.year,
            program: project.program.clone(),
            organization_name: project.organization_name.clone(),
            project_name: project.project_name.clone(),
            project_url: project.project_url.clone(),
            topics: project.topics.clone(),
            description: project.description.clone(),
            created_at: now,
            updated_at: now,
        };
        rows.push(created.clone());
        Ok(created)
    }
}

#[derive(Debug, Clone)]
pub struct HttpClientConfig {
    pub timeout: Duration,
    pub user_agent: Option<String>,
    pub global_concurrency: usize,
    pub per_program_concurrency: usize,
}

impl Default for HttpClientConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(20),
            user_agent: None,
            global_concurrency: 16,
            per_program_concurrency: 4,
        }
    }
}

#[derive(Debug)]
pub struct HttpFetcher {
    client: reqwest::Client,
    global_limit: Arc<Semaphore>,
    per_program_limit: usize,
    per_program: Mutex<HashMap<String, Arc<Semaphore>>>,
}

#[derive(Debug, Clone)]
pub struct FetchedResponse {
    pub status: StatusCode,
    pub final_url: String,
    pub body: Vec<u8>,
}

#[derive(Debug, Error)]
pub enum HttpError {
    #[error("request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("http status {status} for {url}")]
    HttpStatus { status: u16, url: String },
}

impl HttpFetcher {
    pub fn new(config: HttpClientConfig) -> anyhow::Result<Self> {
        let mut builder = reqwest::Client::builder()
            .gzip(true)
            .brotli(true)
            .timeout(config.timeout);

        if let Some(user_agent) = &config.user_agent {
            builder = builder.user_agent(user_agent.clone());
        }

        let client = builder.build().context("building reqwest client")?;

        Ok(Self {
            client,
            global_limit: Arc::new(Semaphore::new(config.global_concurrency.max(1))),
            per_program_limit: config.per_program_concurrency.max(1),
            per_program: Mutex::new(HashMap::new()),
        })
    }

    async fn per_program_semaphore(&self, program: &str) -> Arc<Semaphore> {
        let mut map = self.per_program.lock().await;
        map.entry(program.to_string())
            .or_insert_with(|| Arc::new(Semaphore::new(self.per_program_limit)))
            .clone()
    }

    /// Issue a single GET. One attempt per call; retry policy is the
    /// caller's concern, and the sync cycle deliberately has none.
    pub async fn fetch_bytes(&self, program: &str, url: &str) -> Result<FetchedResponse, HttpError> {
        let _global = self.global_limit.acquire().await.expect("semaphore not closed");
        let per_program = self.per_program_semaphore(program).await;
        let _program = per_program.acquire().await.expect("semaphore not closed");

        let span = info_span!("archive_fetch", program, url);
        let _guard = span.enter();

        let resp = self.client.get(url).send().await?;
        let status = resp.status();
        let final_url = resp.url().to_string();

        if !status.is_success() {
            return Err(HttpError::HttpStatus {
                status: status.as_u16(),
                url: final_url,
            });
        }

        let body = resp.bytes().await?.to_vec();
        Ok(FetchedResponse {
            status,
            final_url,
            body,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scraped(org: &str, name: &str, url: &str, year: i32) -> ScrapedProject {
        ScrapedProject {
            year,
            program: "GSoC".to_string(),
            organization_name: org.to_string(),
            project_name: name.to_string(),
            project_url: url.to_string(),
            topics: vec!["tooling".to_string()],
            description: format!("{name} description"),
        }
    }

    #[tokio::test]
    async fn upsert_inserts_then_updates_on_same_key() {
        let store = MemoryProjectStore::new();
        let first = scraped("Alpha Org", "First Title", "https://example.org/p/1", 2024);
        let mut second = first.clone();
        second.project_name = "Second Title".to_string();
        second.description = "rewritten".to_string();

        let inserted = store.upsert(&first).await.unwrap();
        let updated = store.upsert(&second).await.unwrap();

        assert_eq!(store.len().await, 1);
        assert_eq!(inserted.id, updated.id);
        assert_eq!(inserted.created_at, updated.created_at);
        assert_eq!(updated.project_name, "Second Title");
        assert_eq!(updated.description, "rewritten");
    }

    #[tokio::test]
    async fn same_url_in_different_years_is_two_rows() {
        let store = MemoryProjectStore::new();
        let url = "https://example.org/p/recurring";
        store.upsert(&scraped("Org", "2023 edition", url, 2023)).await.unwrap();
        store.upsert(&scraped("Org", "2024 edition", url, 2024)).await.unwrap();

        assert_eq!(store.len().await, 2);
    }

    #[tokio::test]
    async fn find_many_orders_by_organization_name() {
        let store = MemoryProjectStore::new();
        for (org, i) in [("Zeta", 1), ("Alpha", 2), ("Mid", 3)] {
            store
                .upsert(&scraped(org, "p", &format!("https://example.org/p/{i}"), 2024))
                .await
                .unwrap();
        }

        let rows = store.find_many(&ProjectFilter::default()).await.unwrap();
        let orgs: Vec<&str> = rows.iter().map(|p| p.organization_name.as_str()).collect();
        assert_eq!(orgs, vec!["Alpha", "Mid", "Zeta"]);
    }

    #[tokio::test]
    async fn find_many_filters_on_each_dimension_independently() {
        let store = MemoryProjectStore::new();
        store.upsert(&scraped("A", "p1", "https://example.org/1", 2023)).await.unwrap();
        store.upsert(&scraped("B", "p2", "https://example.org/2", 2024)).await.unwrap();

        let by_year = store
            .find_many(&ProjectFilter::new(None, Some(2024)))
            .await
            .unwrap();
        assert_eq!(by_year.len(), 1);
        assert_eq!(by_year[0].year, 2024);

        let by_program = store
            .find_many(&ProjectFilter::new(Some("GSoC"), None))
            .await
            .unwrap();
        assert_eq!(by_program.len(), 2);

        let none = store
            .find_many(&ProjectFilter::new(Some("Outreachy"), None))
            .await
            .unwrap();
        assert!(none.is_empty());
    }

    #[test]
    fn fully_specified_filter_requires_both_dimensions() {
        assert!(ProjectFilter::new(Some("GSoC"), Some(2024)).is_fully_specified());
        assert!(!ProjectFilter::new(Some("GSoC"), None).is_fully_specified());
        assert!(!ProjectFilter::new(None, Some(2024)).is_fully_specified());
    }
}
