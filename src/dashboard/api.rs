use std::collections::BTreeSet;
use std::sync::{Arc, Mutex};

use axum::{
    Json, Router,
    extract::{Path, Query, State, rejection::JsonRejection},
    http::StatusCode,
    response::{Html, IntoResponse, Response},
    routing::{get, post},
};
use base64::{Engine, engine::general_purpose::STANDARD};
use maud::Render;
use serde::Deserialize;
use serde_json::{Map, Value, json};
use tokio::sync::watch;

use crate::config::ShopfloorToml;
use crate::errors::{DashboardError, RenderError};
use crate::render::chart::{ChartSection, counter_chart, defect_rate_chart};
use crate::render::fields::FieldCatalog;
use crate::render::sort::{SortDirection, SortState};
use crate::render::table::{TableOutcome, build_table, is_sortable};
use crate::theme::{SettingsStore, StyleEnhancer, Theme, ThemeController, ThemeStatus};

use super::db::DbHandle;
#[cfg(test)]
use super::db::DashboardDb;
use super::models::{AggregationRow, IMAGES_FIELD, ImageAttachment, STATUS_FIELD};
use super::query::{
    AccessPolicy, AccessScope, AggregationQuery, DateRange, MeasureSet, Stage,
    factory_list_pipeline,
};

// ── Shared application state ──────────────────────────────────────────

pub struct AppState {
    pub db: DbHandle,
    pub config: Arc<ShopfloorToml>,
    pub policy: AccessPolicy,
    pub theme: Mutex<ThemeController<SettingsStore>>,
    /// Theme published by the controller; renderers style from this.
    pub styling: watch::Receiver<Theme>,
    pub enhancer: StyleEnhancer,
    pub catalog: Mutex<FieldCatalog>,
}

pub type SharedState = Arc<AppState>;

impl AppState {
    pub fn new(db: DbHandle, config: ShopfloorToml) -> anyhow::Result<Self> {
        let store = SettingsStore::new(db.clone(), config.theme.storage_key.clone());
        let theme = ThemeController::init(store, None)?;
        let styling = theme.subscribe();

        let mut catalog = FieldCatalog::new();
        for (tab, section) in &config.tabs {
            catalog.set_descriptions(tab, section.descriptions.clone());
        }

        Ok(Self {
            db,
            policy: AccessPolicy::from_config(&config.access),
            config: Arc::new(config),
            theme: Mutex::new(theme),
            styling,
            enhancer: StyleEnhancer::default(),
            catalog: Mutex::new(catalog),
        })
    }

    fn database<'a>(&'a self, requested: Option<&'a str>) -> &'a str {
        requested
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .unwrap_or(&self.config.database.name)
    }

    fn current_theme(&self) -> Theme {
        *self.styling.borrow()
    }
}

// ── Request payload types ─────────────────────────────────────────────

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueryRequest {
    pub db_name: Option<String>,
    pub collection_name: Option<String>,
    pub pipeline: Option<Value>,
    pub query: Option<Map<String, Value>>,
    pub projection: Option<Map<String, Value>>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FactoriesRequest {
    pub collection_name: Option<String>,
    pub user_role: Option<String>,
    #[serde(default)]
    pub factory_access: Vec<String>,
    pub db_name: Option<String>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AnalyticsRequest {
    pub collection_name: Option<String>,
    pub user_role: Option<String>,
    #[serde(default)]
    pub factory_access: Vec<String>,
    pub db_name: Option<String>,
    pub from: Option<String>,
    pub to: Option<String>,
    pub group_by: Option<String>,
}

#[derive(Deserialize)]
pub struct AnalyticsPanelQuery {
    pub collection: Option<String>,
    pub role: Option<String>,
    /// Comma-separated factory names.
    pub access: Option<String>,
    pub db: Option<String>,
    pub from: Option<String>,
    pub to: Option<String>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AttachImageRequest {
    pub base64: Option<String>,
    pub label: Option<String>,
    pub record_id: Option<String>,
    pub username: Option<String>,
    pub collection_name: Option<String>,
    pub db_name: Option<String>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DetachImageRequest {
    pub label: Option<String>,
    pub record_id: Option<String>,
    pub username: Option<String>,
    pub collection_name: Option<String>,
    pub db_name: Option<String>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusUpdateRequest {
    pub collection_name: Option<String>,
    pub record_ids: Option<Vec<String>>,
    pub status: Option<String>,
    pub username: Option<String>,
    pub db_name: Option<String>,
}

#[derive(Deserialize)]
pub struct TableQuery {
    pub db: Option<String>,
    pub sort: Option<String>,
    pub dir: Option<String>,
}

#[derive(Deserialize)]
pub struct ThemeRequest {
    pub theme: Option<String>,
    pub toggle: Option<bool>,
    pub system: Option<String>,
    pub reset: Option<bool>,
}

// ── Error handling ────────────────────────────────────────────────────

#[derive(Debug)]
pub enum ApiError {
    Validation {
        message: String,
        missing_fields: Vec<String>,
    },
    NotFound(String),
    Upstream {
        message: String,
        detail: String,
    },
}

impl ApiError {
    fn bad_request(message: impl Into<String>) -> Self {
        Self::Validation {
            message: message.into(),
            missing_fields: Vec::new(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, body) = match self {
            ApiError::Validation {
                message,
                missing_fields,
            } => {
                let mut body = json!({"error": message, "success": false});
                if !missing_fields.is_empty() {
                    body["missingFields"] = json!(missing_fields);
                }
                (StatusCode::BAD_REQUEST, body)
            }
            ApiError::NotFound(message) => (
                StatusCode::NOT_FOUND,
                json!({"error": message, "success": false}),
            ),
            ApiError::Upstream { message, detail } => (
                StatusCode::INTERNAL_SERVER_ERROR,
                json!({"error": message, "success": false, "detail": detail}),
            ),
        };
        (status, Json(body)).into_response()
    }
}

impl From<DashboardError> for ApiError {
    fn from(err: DashboardError) -> Self {
        match err {
            DashboardError::MissingFields(fields) => ApiError::Validation {
                message: DashboardError::MissingFields(fields.clone()).to_string(),
                missing_fields: fields,
            },
            e @ (DashboardError::InvalidField { .. } | DashboardError::Pipeline(_)) => {
                ApiError::bad_request(e.to_string())
            }
            e @ DashboardError::DocumentNotFound { .. } => ApiError::NotFound(e.to_string()),
            e => {
                tracing::error!("request failed: {:#}", e);
                ApiError::Upstream {
                    message: "Internal server error".to_string(),
                    detail: format!("{:#}", e),
                }
            }
        }
    }
}

impl From<anyhow::Error> for ApiError {
    fn from(err: anyhow::Error) -> Self {
        match err.downcast::<DashboardError>() {
            Ok(e) => e.into(),
            Err(e) => DashboardError::Database(e).into(),
        }
    }
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        ApiError::bad_request(format!("Invalid request body: {}", rejection.body_text()))
    }
}

// ── Router ────────────────────────────────────────────────────────────

pub fn api_router() -> Router<SharedState> {
    Router::new()
        .route("/api/query", post(query_documents))
        .route("/api/factories", post(list_factories))
        .route("/api/analytics", post(analytics))
        .route("/dashboard/analytics", get(analytics_panel))
        .route("/api/images/attach", post(attach_image))
        .route("/api/images/detach", post(detach_image))
        .route("/api/records/status", post(update_status))
        .route("/api/tables/{tab}", get(render_table))
        .route("/api/theme", get(get_theme).post(set_theme))
        .route("/health", get(health_check))
}

// ── Helpers ───────────────────────────────────────────────────────────

/// Names of required fields that are absent or blank, in the given order.
fn missing_fields(fields: &[(&str, Option<&str>)]) -> Vec<String> {
    fields
        .iter()
        .filter(|(_, v)| v.is_none_or(|s| s.trim().is_empty()))
        .map(|(name, _)| name.to_string())
        .collect()
}

fn require(fields: &[(&str, Option<&str>)]) -> Result<(), DashboardError> {
    let missing = missing_fields(fields);
    if missing.is_empty() {
        Ok(())
    } else {
        Err(DashboardError::MissingFields(missing))
    }
}

/// Accept plain base64 or a `data:<mime>;base64,` URL; always store a data URL.
fn normalize_image(input: &str) -> Result<String, DashboardError> {
    let input = input.trim();
    let (mime, payload) = match input.strip_prefix("data:") {
        Some(rest) => {
            let (header, payload) = rest
                .split_once(',')
                .ok_or_else(|| DashboardError::invalid("base64", "malformed data URL"))?;
            let mime = header
                .strip_suffix(";base64")
                .ok_or_else(|| DashboardError::invalid("base64", "data URL is not base64-encoded"))?;
            (Some(mime.to_string()), payload)
        }
        None => (None, input),
    };
    let bytes = STANDARD
        .decode(payload)
        .map_err(|e| DashboardError::invalid("base64", e.to_string()))?;
    if bytes.is_empty() {
        return Err(DashboardError::invalid("base64", "image is empty"));
    }
    let mime = mime
        .filter(|m| !m.is_empty())
        .unwrap_or_else(|| sniff_mime(&bytes).to_string());
    Ok(format!("data:{};base64,{}", mime, payload))
}

fn sniff_mime(bytes: &[u8]) -> &'static str {
    match bytes {
        [0x89, b'P', b'N', b'G', ..] => "image/png",
        [0xFF, 0xD8, 0xFF, ..] => "image/jpeg",
        [b'G', b'I', b'F', b'8', ..] => "image/gif",
        [b'R', b'I', b'F', b'F', _, _, _, _, b'W', b'E', b'B', b'P', ..] => "image/webp",
        _ => "application/octet-stream",
    }
}

fn split_access(access: Option<&str>) -> Vec<String> {
    access
        .map(|a| a.split(',').map(|s| s.trim().to_string()).collect())
        .unwrap_or_default()
}

fn chart_json(chart: Option<charming::Chart>) -> Result<Value, ApiError> {
    match chart {
        Some(chart) => serde_json::to_value(&chart)
            .map_err(|e| DashboardError::Other(anyhow::anyhow!("Failed to serialize chart: {}", e)).into()),
        None => Ok(Value::Null),
    }
}

struct AnalyticsParams {
    database: String,
    collection: String,
    scope: AccessScope,
    from: Option<String>,
    to: Option<String>,
    group_by: Option<String>,
}

async fn run_analytics(
    state: &SharedState,
    params: AnalyticsParams,
) -> Result<Vec<AggregationRow>, ApiError> {
    let analytics = &state.config.analytics;
    let date_range = DateRange::parse(params.from.as_deref(), params.to.as_deref())?;
    let query = AggregationQuery {
        collection: params.collection,
        group_by: params
            .group_by
            .filter(|g| !g.trim().is_empty())
            .unwrap_or_else(|| analytics.group_by.clone()),
        access_field: state.config.access.field.clone(),
        date_field: analytics.date_field.clone(),
        date_range,
        restriction: state.policy.restriction(&params.scope),
        measures: MeasureSet::from_config(analytics),
    };
    let stages = query.pipeline();
    let counters = query.measures.counters.clone();
    let database = params.database;
    let collection = query.collection.clone();

    let docs = state
        .db
        .call(move |db| db.aggregate(&database, &collection, &stages))
        .await?;
    let rows: Vec<AggregationRow> = docs
        .iter()
        .filter_map(|doc| AggregationRow::from_document(doc, &counters))
        .collect();
    tracing::debug!(collection = %query.collection, rows = rows.len(), "analytics aggregated");
    Ok(rows)
}

// ── Handlers ──────────────────────────────────────────────────────────

async fn health_check() -> &'static str {
    "ok"
}

async fn query_documents(
    State(state): State<SharedState>,
    payload: Result<Json<QueryRequest>, JsonRejection>,
) -> Result<impl IntoResponse, ApiError> {
    let Json(req) = payload?;
    require(&[("collectionName", req.collection_name.as_deref())])?;

    let database = state.database(req.db_name.as_deref()).to_string();
    let collection = req.collection_name.unwrap_or_default();

    let docs = match req.pipeline {
        Some(pipeline) => {
            let stages: Vec<Stage> = serde_json::from_value(pipeline)
                .map_err(|e| DashboardError::Pipeline(e.to_string()))?;
            state
                .db
                .call(move |db| db.aggregate(&database, &collection, &stages))
                .await?
        }
        None => {
            let filter = req.query.unwrap_or_default();
            let projection = req.projection;
            state
                .db
                .call(move |db| db.find(&database, &collection, &filter, projection.as_ref()))
                .await?
        }
    };
    Ok(Json(docs))
}

async fn list_factories(
    State(state): State<SharedState>,
    payload: Result<Json<FactoriesRequest>, JsonRejection>,
) -> Result<impl IntoResponse, ApiError> {
    let Json(req) = payload?;
    require(&[
        ("collectionName", req.collection_name.as_deref()),
        ("userRole", req.user_role.as_deref()),
    ])?;

    let scope = AccessScope::new(req.user_role.unwrap_or_default(), req.factory_access);
    let stages = factory_list_pipeline(
        &state.config.access.field,
        &state.policy.restriction(&scope),
    );
    let database = state.database(req.db_name.as_deref()).to_string();
    let collection = req.collection_name.unwrap_or_default();

    let docs = state
        .db
        .call(move |db| db.aggregate(&database, &collection, &stages))
        .await?;
    let factories: BTreeSet<String> = docs
        .iter()
        .filter_map(|doc| doc.get("_id").and_then(Value::as_str))
        .map(str::trim)
        .filter(|name| !name.is_empty())
        .map(str::to_string)
        .collect();

    Ok(Json(json!({"factories": factories, "success": true})))
}

async fn analytics(
    State(state): State<SharedState>,
    payload: Result<Json<AnalyticsRequest>, JsonRejection>,
) -> Result<impl IntoResponse, ApiError> {
    let Json(req) = payload?;
    require(&[
        ("collectionName", req.collection_name.as_deref()),
        ("userRole", req.user_role.as_deref()),
    ])?;

    let params = AnalyticsParams {
        database: state.database(req.db_name.as_deref()).to_string(),
        collection: req.collection_name.unwrap_or_default(),
        scope: AccessScope::new(req.user_role.unwrap_or_default(), req.factory_access),
        from: req.from,
        to: req.to,
        group_by: req.group_by,
    };
    let rows = run_analytics(&state, params).await?;
    let counters = &state.config.analytics.counters;

    Ok(Json(json!({
        "rows": rows,
        "charts": {
            "defectRate": chart_json(defect_rate_chart(&rows))?,
            "counters": chart_json(counter_chart(&rows, counters))?,
        },
        "success": true,
    })))
}

async fn analytics_panel(
    State(state): State<SharedState>,
    Query(query): Query<AnalyticsPanelQuery>,
) -> Result<impl IntoResponse, ApiError> {
    require(&[
        ("collection", query.collection.as_deref()),
        ("role", query.role.as_deref()),
    ])?;

    let params = AnalyticsParams {
        database: state.database(query.db.as_deref()).to_string(),
        collection: query.collection.unwrap_or_default(),
        scope: AccessScope::new(
            query.role.unwrap_or_default(),
            split_access(query.access.as_deref()),
        ),
        from: query.from,
        to: query.to,
        group_by: None,
    };
    let rows = run_analytics(&state, params).await?;

    let mut section = ChartSection::from_rows(&rows, &state.config.analytics.counters);
    state.enhancer.enhance(&mut section, state.current_theme());
    Ok(Html(section.render().into_string()))
}

async fn attach_image(
    State(state): State<SharedState>,
    payload: Result<Json<AttachImageRequest>, JsonRejection>,
) -> Result<impl IntoResponse, ApiError> {
    let Json(req) = payload?;
    require(&[
        ("base64", req.base64.as_deref()),
        ("label", req.label.as_deref()),
        ("recordId", req.record_id.as_deref()),
        ("username", req.username.as_deref()),
        ("collectionName", req.collection_name.as_deref()),
    ])?;

    let data = normalize_image(req.base64.as_deref().unwrap_or_default())?;
    let label = req.label.unwrap_or_default().trim().to_string();
    let record_id = req.record_id.unwrap_or_default();
    let collection = req.collection_name.unwrap_or_default();
    let database = state.database(req.db_name.as_deref()).to_string();
    let attachment = ImageAttachment {
        data,
        uploaded_by: req.username.unwrap_or_default(),
        uploaded_at: chrono::Utc::now().to_rfc3339(),
    };

    let (coll, id, lbl) = (collection.clone(), record_id.clone(), label.clone());
    let updated = state
        .db
        .call(move |db| {
            db.modify_document(&database, &coll, &id, |record| {
                let entry = serde_json::to_value(&attachment)?;
                let images = record
                    .fields_mut()
                    .entry(IMAGES_FIELD)
                    .or_insert_with(|| Value::Object(Map::new()));
                if !images.is_object() {
                    *images = Value::Object(Map::new());
                }
                if let Value::Object(images) = images {
                    images.insert(lbl, entry);
                }
                Ok(())
            })
        })
        .await?;

    let record = updated.ok_or(DashboardError::DocumentNotFound {
        collection,
        id: record_id.clone(),
    })?;
    tracing::info!(record = %record_id, label = %label, "image attached");
    Ok(Json(json!({"record": record, "success": true})))
}

async fn detach_image(
    State(state): State<SharedState>,
    payload: Result<Json<DetachImageRequest>, JsonRejection>,
) -> Result<impl IntoResponse, ApiError> {
    let Json(req) = payload?;
    require(&[
        ("label", req.label.as_deref()),
        ("recordId", req.record_id.as_deref()),
        ("username", req.username.as_deref()),
        ("collectionName", req.collection_name.as_deref()),
    ])?;

    let label = req.label.unwrap_or_default().trim().to_string();
    let record_id = req.record_id.unwrap_or_default();
    let collection = req.collection_name.unwrap_or_default();
    let database = state.database(req.db_name.as_deref()).to_string();

    let (coll, id, lbl) = (collection.clone(), record_id.clone(), label.clone());
    let updated = state
        .db
        .call(move |db| {
            db.modify_document(&database, &coll, &id, |record| {
                if let Some(Value::Object(images)) = record.fields_mut().get_mut(IMAGES_FIELD) {
                    images.remove(&lbl);
                }
                Ok(())
            })
        })
        .await?;

    let record = updated.ok_or(DashboardError::DocumentNotFound {
        collection,
        id: record_id.clone(),
    })?;
    tracing::info!(
        record = %record_id,
        label = %label,
        by = req.username.as_deref().unwrap_or_default(),
        "image detached"
    );
    Ok(Json(json!({"record": record, "success": true})))
}

async fn update_status(
    State(state): State<SharedState>,
    payload: Result<Json<StatusUpdateRequest>, JsonRejection>,
) -> Result<impl IntoResponse, ApiError> {
    let Json(req) = payload?;
    let mut missing = missing_fields(&[
        ("collectionName", req.collection_name.as_deref()),
        ("status", req.status.as_deref()),
        ("username", req.username.as_deref()),
    ]);
    let ids: Vec<String> = req
        .record_ids
        .unwrap_or_default()
        .into_iter()
        .filter(|id| !id.trim().is_empty())
        .collect();
    if ids.is_empty() {
        missing.push("recordIds".to_string());
    }
    if !missing.is_empty() {
        return Err(DashboardError::MissingFields(missing).into());
    }

    let mut fields = Map::new();
    fields.insert(STATUS_FIELD.to_string(), json!(req.status.unwrap_or_default().trim()));
    fields.insert("statusUpdatedBy".to_string(), json!(req.username));
    fields.insert("statusUpdatedAt".to_string(), json!(chrono::Utc::now().to_rfc3339()));

    let database = state.database(req.db_name.as_deref()).to_string();
    let collection = req.collection_name.unwrap_or_default();
    let requested = ids.len();
    let updated = state
        .db
        .call(move |db| db.update_many(&database, &collection, &ids, &fields))
        .await?;

    tracing::info!(requested, updated, "batch status update");
    Ok(Json(json!({"updated": updated, "success": true})))
}

async fn render_table(
    State(state): State<SharedState>,
    Path(tab): Path<String>,
    Query(query): Query<TableQuery>,
) -> Result<Response, ApiError> {
    let direction = match query.dir.as_deref() {
        Some(dir) => dir.parse::<SortDirection>().map_err(ApiError::bad_request)?,
        None => SortDirection::Asc,
    };
    let column = query.sort.filter(|c| is_sortable(c));
    let sort = SortState::new(column, direction);
    let theme = state.current_theme();

    let database = state.database(query.db.as_deref()).to_string();
    let collection = tab.clone();
    let fetched = state
        .db
        .call(move |db| db.list_documents(&database, &collection))
        .await;

    let (status, mut outcome) = match fetched {
        Ok(mut records) => {
            let fields = state
                .catalog
                .lock()
                .map_err(|_| DashboardError::LockPoisoned)?
                .fields_for(&tab, &records);
            let outcome = build_table(
                &tab,
                &mut records,
                &fields,
                &sort,
                &state.config.table.default_sort_field,
            );
            (StatusCode::OK, outcome)
        }
        Err(e) => {
            tracing::error!(tab = %tab, "table fetch failed: {:#}", e);
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                TableOutcome::from_error(&RenderError::Fetch(e.to_string())),
            )
        }
    };
    state.enhancer.enhance(&mut outcome, theme);
    Ok((status, Html(outcome.render().into_string())).into_response())
}

async fn get_theme(State(state): State<SharedState>) -> Result<Json<ThemeStatus>, ApiError> {
    let theme = state.theme.lock().map_err(|_| DashboardError::LockPoisoned)?;
    Ok(Json(theme.status()))
}

async fn set_theme(
    State(state): State<SharedState>,
    payload: Result<Json<ThemeRequest>, JsonRejection>,
) -> Result<Json<ThemeStatus>, ApiError> {
    let Json(req) = payload?;

    let status = tokio::task::spawn_blocking(move || -> Result<ThemeStatus, ApiError> {
        let mut ctl = state.theme.lock().map_err(|_| DashboardError::LockPoisoned)?;
        if req.reset == Some(true) {
            ctl.reset()?;
        } else if req.toggle == Some(true) {
            ctl.toggle()?;
        } else if let Some(theme) = req.theme.as_deref() {
            ctl.set(theme.parse::<Theme>().map_err(ApiError::bad_request)?)?;
        } else if let Some(system) = req.system.as_deref() {
            ctl.system_preference_changed(system.parse::<Theme>().map_err(ApiError::bad_request)?);
        } else {
            return Err(DashboardError::MissingFields(vec!["theme".to_string()]).into());
        }
        Ok(ctl.status())
    })
    .await
    .map_err(|e| DashboardError::Other(anyhow::anyhow!("theme task panicked: {}", e)))??;

    Ok(Json(status))
}
