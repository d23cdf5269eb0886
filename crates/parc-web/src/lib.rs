//! Axum JSON API over the sync pipeline.

use std::sync::Arc;

use axum::{
    extract::{Query, State},
    http::{header, HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use parc_adapters::ProgramRegistry;
use parc_sync::{backfill_window, current_year, SyncConfig, SyncService};
use serde::Deserialize;
use serde_json::json;
use tokio::net::TcpListener;
use tracing::error;

pub const CRATE_NAME: &str = "parc-web";

#[derive(Clone)]
pub struct AppState {
    pub sync: Arc<SyncService>,
    pub registry: ProgramRegistry,
    pub cron_secret: Option<String>,
    pub dev_endpoints_enabled: bool,
    pub default_program: String,
    pub backfill_window_years: usize,
}

impl AppState {
    pub fn new(sync: Arc<SyncService>, registry: ProgramRegistry, config: &SyncConfig) -> Self {
        Self {
            sync,
            registry,
            cron_secret: config.cron_secret.clone(),
            dev_endpoints_enabled: config.dev_endpoints_enabled,
            default_program: config.default_program.clone(),
            backfill_window_years: config.backfill_window_years,
        }
    }
}

#[derive(Debug, Deserialize, Default)]
struct ProjectsQuery {
    program: Option<String>,
    year: Option<i32>,
}

pub fn app(state: AppState) -> Router {
    Router::new()
        .route("/program-projects", get(program_projects_handler))
        .route("/programs", get(programs_handler))
        .route("/sync-projects", post(sync_projects_handler))
        .route("/sync-all-years", post(sync_all_years_handler))
        .with_state(Arc::new(state))
}

pub async fn serve(state: AppState, port: u16) -> anyhow::Result<()> {
    let listener = TcpListener::bind(("0.0.0.0", port)).await?;
    axum::serve(listener, app(state)).await?;
    Ok(())
}

async fn program_projects_handler(
    State(state): State<Arc<AppState>>,
    Query(query): Query<ProjectsQuery>,
) -> Response {
    match state
        .sync
        .read_or_sync(query.program.as_deref(), query.year)
        .await
    {
        Ok(projects) => Json(projects).into_response(),
        Err(err) => {
            error!(error = %err, "project query failed");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({"error": "failed to load program projects"})),
            )
                .into_response()
        }
    }
}

async fn programs_handler(State(state): State<Arc<AppState>>) -> Response {
    Json(state.registry.programs.clone()).into_response()
}

fn bearer_authorized(headers: &HeaderMap, secret: Option<&str>) -> bool {
    let Some(secret) = secret else {
        return false;
    };
    headers
        .get(header::AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .is_some_and(|value| value == format!("Bearer {secret}"))
}

/// Bearer-protected single-year sync for the configured default program,
/// intended to be hit by an external cron trigger.
async fn sync_projects_handler(State(state): State<Arc<AppState>>, headers: HeaderMap) -> Response {
    if !bearer_authorized(&headers, state.cron_secret.as_deref()) {
        return (
            StatusCode::UNAUTHORIZED,
            Json(json!({"success": false, "error": "unauthorized"})),
        )
            .into_response();
    }

    let year = current_year();
    match state.sync.backfill_years(&state.default_program, &[year]).await {
        Ok(outcomes) => {
            let outcome = &outcomes[0];
            if let Some(error) = &outcome.error {
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    Json(json!({"success": false, "error": error})),
                )
                    .into_response()
            } else {
                Json(json!({
                    "success": true,
                    "message": format!("Sync complete. {} projects processed.", outcome.count),
                }))
                .into_response()
            }
        }
        Err(err) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(json!({"success": false, "error": err.to_string()})),
        )
            .into_response(),
    }
}

/// Development-only backfill across the configured year window. The gate
/// is decided at startup and injected into the state, not read from the
/// process environment here.
async fn sync_all_years_handler(State(state): State<Arc<AppState>>) -> Response {
    if !state.dev_endpoints_enabled {
        return (
            StatusCode::FORBIDDEN,
            Json(json!({"error": "not available outside development"})),
        )
            .into_response();
    }

    let years = backfill_window(current_year(), state.backfill_window_years);
    match state.sync.backfill_years(&state.default_program, &years).await {
        Ok(results) => {
            let total: usize = results.iter().map(|r| r.count).sum();
            Json(json!({
                "success": true,
                "message": format!("Sync complete. {total} total projects processed."),
                "results": results,
            }))
            .into_response()
        }
        Err(err) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(json!({"success": false, "error": err.to_string()})),
        )
            .into_response(),
    }
}
