//! Core domain model for parc.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

pub const CRATE_NAME: &str = "parc-core";

/// Canonical persisted project record. Identity is `(project_url, year)`;
/// `id` and the timestamps are assigned and maintained by storage.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProgramProject {
    pub id: Uuid,
    pub year: i32,
    pub program: String,
    pub organization_name: String,
    pub project_name: String,
    pub project_url: String,
    pub topics: Vec<String>,
    pub description: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Normalized handoff contract from the archive fetcher into the upserter.
/// Exists only for the duration of one sync cycle.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScrapedProject {
    pub year: i32,
    pub program: String,
    pub organization_name: String,
    pub project_name: String,
    pub project_url: String,
    pub topics: Vec<String>,
    pub description: String,
}

impl ScrapedProject {
    /// The natural key the upserter resolves conflicts on.
    pub fn natural_key(&self) -> (&str, i32) {
        (self.project_url.as_str(), self.year)
    }
}
