//! Archive source strategies + shared normalization for parc.

use std::fs;
use std::path::Path;

use anyhow::{Context, Result};
use async_trait::async_trait;
use parc_core::ScrapedProject;
use parc_storage::{HttpError, HttpFetcher};
use scraper::{ElementRef, Html, Selector};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use thiserror::Error;

pub const CRATE_NAME: &str = "parc-adapters";

#[derive(Debug, Error)]
pub enum FetchError {
    #[error("no program named {0} in the registry")]
    UnknownProgram(String),
    #[error("program {0} is disabled in the registry")]
    ProgramDisabled(String),
    #[error("fetching archive data for {program} {year}: {source}")]
    Transport {
        program: String,
        year: i32,
        #[source]
        source: HttpError,
    },
    #[error("malformed archive payload for {program} {year}: {message}")]
    Payload {
        program: String,
        year: i32,
        message: String,
    },
}

/// Raw response for one (program, year) fetch, before strategy parsing.
#[derive(Debug, Clone)]
pub struct RawPayload {
    pub program: String,
    pub year: i32,
    pub url: String,
    pub body: String,
}

impl RawPayload {
    fn payload_error(&self, message: impl Into<String>) -> FetchError {
        FetchError::Payload {
            program: self.program.clone(),
            year: self.year,
            message: message.into(),
        }
    }
}

/// One organization grouping as a strategy extracted it. Field-level gaps
/// are permitted here; the normalizer decides what survives.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RawOrganization {
    pub name: Option<String>,
    pub topics: Vec<String>,
    pub entries: Vec<RawProjectEntry>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RawProjectEntry {
    pub title: Option<String>,
    pub url: Option<String>,
    pub description: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceStrategy {
    StructuredFeed,
    ArchivePage,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProgramConfig {
    pub program: String,
    pub display_name: String,
    pub enabled: bool,
    pub strategy: SourceStrategy,
    pub url_template: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProgramRegistry {
    pub programs: Vec<ProgramConfig>,
}

impl ProgramRegistry {
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text =
            fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))?;
        serde_yaml::from_str(&text).with_context(|| format!("parsing {}", path.display()))
    }

    pub fn config_for(&self, program: &str) -> Option<&ProgramConfig> {
        self.programs.iter().find(|c| c.program == program)
    }

    pub fn enabled_programs(&self) -> impl Iterator<Item = &ProgramConfig> {
        self.programs.iter().filter(|c| c.enabled)
    }
}

/// Source capability: retrieve the raw archive payload for one
/// (program, year) pair and parse it into organization groupings.
#[async_trait]
pub trait ArchiveSource: Send + Sync {
    fn strategy(&self) -> SourceStrategy;

    async fn fetch_raw(
        &self,
        http: &HttpFetcher,
        program: &str,
        year: i32,
    ) -> Result<RawPayload, FetchError>;

    fn parse(&self, payload: &RawPayload) -> Result<Vec<RawOrganization>, FetchError>;
}

pub fn source_for_config(config: &ProgramConfig) -> Box<dyn ArchiveSource> {
    match config.strategy {
        SourceStrategy::StructuredFeed => Box::new(StructuredFeedSource {
            url_template: config.url_template.clone(),
        }),
        SourceStrategy::ArchivePage => Box::new(ArchivePageSource {
            url_template: config.url_template.clone(),
        }),
    }
}

fn expand_url_template(template: &str, year: i32) -> String {
    template.replace("{year}", &year.to_string())
}

async fn fetch_payload(
    http: &HttpFetcher,
    url_template: &str,
    program: &str,
    year: i32,
) -> Result<RawPayload, FetchError> {
    let url = expand_url_template(url_template, year);
    let response = http
        .fetch_bytes(program, &url)
        .await
        .map_err(|source| FetchError::Transport {
            program: program.to_string(),
            year,
            source,
        })?;
    Ok(RawPayload {
        program: program.to_string(),
        year,
        url: response.final_url,
        body: String::from_utf8_lossy(&response.body).into_owned(),
    })
}

fn text_or_none(value: String) -> Option<String> {
    let trimmed = value.trim().to_string();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed)
    }
}

/// Turn organization groupings into persisted-shape records: trim every
/// string field, drop entries missing a required field, inherit the
/// organization name and topics, keep encounter order. No dedup happens
/// here; the storage uniqueness constraint owns that.
pub fn normalize_organizations(
    program: &str,
    year: i32,
    organizations: Vec<RawOrganization>,
) -> Vec<ScrapedProject> {
    let mut out = Vec::new();

    for organization in organizations {
        let Some(organization_name) = organization.name.and_then(text_or_none) else {
            continue;
        };
        let topics: Vec<String> = organization
            .topics
            .into_iter()
            .filter_map(text_or_none)
            .collect();

        for entry in organization.entries {
            let Some(project_name) = entry.title.and_then(text_or_none) else {
                continue;
            };
            let Some(project_url) = entry.url.and_then(text_or_none) else {
                continue;
            };
            let Some(description) = entry.description.and_then(text_or_none) else {
                continue;
            };

            out.push(ScrapedProject {
                year,
                program: program.to_string(),
                organization_name: organization_name.clone(),
                project_name,
                project_url,
                topics: topics.clone(),
                description,
            });
        }
    }

    out
}

/// Per-year JSON feed: `{ "organizations": [ { "name", "topics",
/// "projects": [ { "title", "description", "project_url" } ] } ] }`.
#[derive(Debug, Clone)]
pub struct StructuredFeedSource {
    url_template: String,
}

impl StructuredFeedSource {
    pub fn new(url_template: impl Into<String>) -> Self {
        Self {
            url_template: url_template.into(),
        }
    }
}

fn json_str(value: &JsonValue, key: &str) -> Option<String> {
    value.get(key).and_then(JsonValue::as_str).map(ToString::to_string)
}

fn json_string_vec(value: &JsonValue, key: &str) -> Vec<String> {
    value
        .get(key)
        .and_then(JsonValue::as_array)
        .map(|arr| {
            arr.iter()
                .filter_map(|v| v.as_str().map(ToString::to_string))
                .collect()
        })
        .unwrap_or_default()
}

#[async_trait]
impl ArchiveSource for StructuredFeedSource {
    fn strategy(&self) -> SourceStrategy {
        SourceStrategy::StructuredFeed
    }

    async fn fetch_raw(
        &self,
        http: &HttpFetcher,
        program: &str,
        year: i32,
    ) -> Result<RawPayload, FetchError> {
        fetch_payload(http, &self.url_template, program, year).await
    }

    fn parse(&self, payload: &RawPayload) -> Result<Vec<RawOrganization>, FetchError> {
        let document: JsonValue = serde_json::from_str(&payload.body)
            .map_err(|e| payload.payload_error(format!("invalid JSON feed: {e}")))?;

        // A year the feed has not published yet comes back without the
        // organizations collection; that is an empty result, not an error.
        let organizations = match document.get("organizations") {
            None | Some(JsonValue::Null) => return Ok(Vec::new()),
            Some(JsonValue::Array(items)) => items,
            Some(_) => {
                return Err(payload.payload_error("top-level organizations is not an array"))
            }
        };

        Ok(organizations
            .iter()
            .map(|org| RawOrganization {
                name: json_str(org, "name"),
                topics: json_string_vec(org, "topics"),
                entries: org
                    .get("projects")
                    .and_then(JsonValue::as_array)
                    .map(|projects| {
                        projects
                            .iter()
                            .map(|project| RawProjectEntry {
                                title: json_str(project, "title"),
                                url: json_str(project, "project_url"),
                                description: json_str(project, "description"),
                            })
                            .collect()
                    })
                    .unwrap_or_default(),
            })
            .collect())
    }
}

/// HTML archive page with a fixed repeating card structure: organization
/// sections carrying name and topics, project cards carrying title,
/// description, and link.
#[derive(Debug, Clone)]
pub struct ArchivePageSource {
    url_template: String,
}

impl ArchivePageSource {
    pub fn new(url_template: impl Into<String>) -> Self {
        Self {
            url_template: url_template.into(),
        }
    }
}

fn parse_selector(payload: &RawPayload, selector: &str) -> Result<Selector, FetchError> {
    Selector::parse(selector).map_err(|e| payload.payload_error(format!("selector {selector}: {e}")))
}

fn select_first_text(scope: ElementRef<'_>, selector: &Selector) -> Option<String> {
    scope
        .select(selector)
        .next()
        .and_then(|n| text_or_none(n.text().collect::<String>()))
}

fn select_all_texts(scope: ElementRef<'_>, selector: &Selector) -> Vec<String> {
    scope
        .select(selector)
        .filter_map(|n| text_or_none(n.text().collect::<String>()))
        .collect()
}

fn select_first_attr(scope: ElementRef<'_>, selector: &Selector, attr: &str) -> Option<String> {
    scope
        .select(selector)
        .next()
        .and_then(|n| n.value().attr(attr))
        .and_then(|s| text_or_none(s.to_string()))
}

#[async_trait]
impl ArchiveSource for ArchivePageSource {
    fn strategy(&self) -> SourceStrategy {
        SourceStrategy::ArchivePage
    }

    async fn fetch_raw(
        &self,
        http: &HttpFetcher,
        program: &str,
        year: i32,
    ) -> Result<RawPayload, FetchError> {
        fetch_payload(http, &self.url_template, program, year).await
    }

    fn parse(&self, payload: &RawPayload) -> Result<Vec<RawOrganization>, FetchError> {
        let document = Html::parse_document(&payload.body);

        let organization_sel = parse_selector(payload, "section.organization")?;
        let org_name_sel = parse_selector(payload, ".org-name")?;
        let org_topics_sel = parse_selector(payload, ".org-topics li")?;
        let card_sel = parse_selector(payload, "div.project-card")?;
        let title_sel = parse_selector(payload, ".project-title")?;
        let description_sel = parse_selector(payload, ".project-description")?;
        let link_sel = parse_selector(payload, "a.project-link")?;

        Ok(document
            .select(&organization_sel)
            .map(|section| RawOrganization {
                name: select_first_text(section, &org_name_sel),
                topics: select_all_texts(section, &org_topics_sel),
                entries: section
                    .select(&card_sel)
                    .map(|card| RawProjectEntry {
                        title: select_first_text(card, &title_sel),
                        url: select_first_attr(card, &link_sel, "href"),
                        description: select_first_text(card, &description_sel),
                    })
                    .collect(),
            })
            .collect())
    }
}

/// Fetch + parse + normalize for one (program, year) pair, with the
/// strategy chosen by the registry entry for the program.
pub struct ArchiveFetcher {
    http: HttpFetcher,
    registry: ProgramRegistry,
}

impl ArchiveFetcher {
    pub fn new(http: HttpFetcher, registry: ProgramRegistry) -> Self {
        Self { http, registry }
    }

    pub fn registry(&self) -> &ProgramRegistry {
        &self.registry
    }

    pub async fn fetch(&self, program: &str, year: i32) -> Result<Vec<ScrapedProject>, FetchError> {
        let config = self
            .registry
            .config_for(program)
            .ok_or_else(|| FetchError::UnknownProgram(program.to_string()))?;
        if !config.enabled {
            return Err(FetchError::ProgramDisabled(program.to_string()));
        }

        let source = source_for_config(config);
        let payload = source.fetch_raw(&self.http, program, year).await?;
        let organizations = source.parse(&payload)?;
        Ok(normalize_organizations(program, year, organizations))
    }
}
