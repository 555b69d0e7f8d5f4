use axum::{
    Json, Router,
    body::Bytes,
    extract::{FromRequestParts, Multipart, Path, Query, State},
    http::{HeaderMap, StatusCode, header, request::Parts},
    response::{IntoResponse, Response},
    routing::{delete, get, post},
};
use serde::Deserialize;
use serde_json::{Value, json};
use std::sync::Arc;
use tokio::net::TcpListener;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crate::backend::{Backend, MemoryBackend, UserContext};
use crate::cell::Row;
use crate::chart;
use crate::config::Config;
use crate::downloader;
use crate::error::ApiError;
use crate::importer::{self, ImportOptions};
use crate::loader::{self, ImportFormat};
use crate::payments::{self, PayMongoGateway, PaymentGateway, PaymentIntentRequest};
use crate::pipeline::{self, ViewConfig};
use crate::rules::{CellColorRule, ColorRule, DateRangeFilter, FilterRule, SortRule};
use crate::saving;
use crate::spreadsheet::{Dataset, SharePermission, TableShare, View, ViewType};

pub const USER_ID_HEADER: &str = "x-user-id";
pub const USER_EMAIL_HEADER: &str = "x-user-email";

pub struct AppState {
    pub backend: MemoryBackend,
    pub gateway: Arc<dyn PaymentGateway>,
    pub import: ImportOptions,
}

type ApiResult = Result<Json<Value>, ApiError>;

/// The signed-in user, as forwarded by the auth proxy in front of this server.
#[axum::async_trait]
impl<S: Send + Sync> FromRequestParts<S> for UserContext {
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let header_value = |name: &str| {
            parts
                .headers
                .get(name)
                .and_then(|v| v.to_str().ok())
                .map(str::trim)
                .filter(|v| !v.is_empty())
                .map(str::to_string)
        };
        match header_value(USER_ID_HEADER) {
            Some(id) => Ok(UserContext {
                id,
                email: header_value(USER_EMAIL_HEADER).unwrap_or_default(),
            }),
            None => Err(ApiError::Unauthorized("Not signed in".to_string())),
        }
    }
}

pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route(
            "/api/paymongo/create-payment-intent",
            post(create_payment_intent),
        )
        .route("/api/paymongo/webhook", post(paymongo_webhook))
        .route("/api/subscription/cancel", post(cancel_subscription))
        .route("/api/subscription/reactivate", post(reactivate_subscription))
        .route("/api/tables", get(list_tables).post(create_table))
        .route("/api/tables/:table_id/views", get(list_views))
        .route("/api/tables/:table_id/shares", post(share_table))
        .route(
            "/api/tables/:table_id/columns/:column_id",
            delete(delete_column),
        )
        .route(
            "/api/tables/:table_id/views/:view_id/import",
            post(import_file),
        )
        .route("/api/views/:view_id/query", post(query_view))
        .route("/api/views/:view_id/chart", get(chart_view))
        .route("/api/views/:view_id/export", get(export_view))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

pub async fn run(config: Config) -> Result<(), Box<dyn std::error::Error>> {
    let store = match &config.snapshot {
        Some(path) => saving::load_or_default(path)?,
        None => Default::default(),
    };
    let mut backend = MemoryBackend::from_store(store);
    if let Some(limit) = config.max_rows_per_view {
        backend = backend.with_row_limit(limit);
    }
    if config.paymongo_secret_key.is_none() {
        log::warn!("PAYMONGO_SECRET_KEY is not set; payment intents will fail");
    }

    let app_state = Arc::new(AppState {
        backend: backend.clone(),
        gateway: Arc::new(PayMongoGateway::new(
            config.paymongo_base_url.clone(),
            config.paymongo_secret_key.clone(),
        )),
        import: config.import_options(),
    });

    let listener = TcpListener::bind(config.bind).await?;
    log::info!("Listening on http://{}", config.bind);
    axum::serve(listener, router(app_state))
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    if let Some(path) = &config.snapshot {
        saving::save_snapshot(&backend.snapshot(), path)?;
        log::info!("saved snapshot to {}", path.display());
    }
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        log::error!("failed to listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
    log::info!("shutting down");
}

fn parse_body<T: for<'de> Deserialize<'de> + Default>(body: &Bytes) -> Result<T, ApiError> {
    if body.iter().all(u8::is_ascii_whitespace) {
        return Ok(T::default());
    }
    serde_json::from_slice(body).map_err(|e| ApiError::Validation(format!("Invalid request body: {}", e)))
}

fn optional_user(headers: &HeaderMap) -> Option<String> {
    headers
        .get(USER_ID_HEADER)
        .and_then(|v| v.to_str().ok())
        .filter(|v| !v.is_empty())
        .map(str::to_string)
}

async fn create_payment_intent(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    body: Bytes,
) -> ApiResult {
    let request: PaymentIntentRequest = serde_json::from_slice(&body)
        .map_err(|_| ApiError::Validation("Invalid amount".to_string()))?;
    let intent = request.validate(optional_user(&headers))?;
    let response = state.gateway.create_payment_intent(&intent).await?;
    Ok(Json(response))
}

/// Always acknowledges a readable event, even when applying it fails, so the gateway does
/// not redeliver.
async fn paymongo_webhook(State(state): State<Arc<AppState>>, body: Bytes) -> ApiResult {
    let event = payments::parse_webhook(&body)?;
    if let Err(e) = payments::handle_webhook(&state.backend, &event).await {
        log::error!("webhook {:?} not applied: {}", event.kind, e);
    }
    Ok(Json(json!({ "received": true })))
}

#[derive(Deserialize, Default)]
#[serde(rename_all = "camelCase")]
struct SubscriptionRequest {
    #[serde(default, alias = "user_id")]
    user_id: Option<String>,
}

async fn cancel_subscription(State(state): State<Arc<AppState>>, body: Bytes) -> ApiResult {
    let request: SubscriptionRequest = parse_body(&body)?;
    let subscription =
        payments::cancel_subscription(&state.backend, request.user_id.as_deref()).await?;
    Ok(Json(json!({ "success": true, "subscription": subscription })))
}

async fn reactivate_subscription(State(state): State<Arc<AppState>>, body: Bytes) -> ApiResult {
    let request: SubscriptionRequest = parse_body(&body)?;
    let subscription =
        payments::reactivate_subscription(&state.backend, request.user_id.as_deref()).await?;
    Ok(Json(json!({ "success": true, "subscription": subscription })))
}

async fn list_tables(State(state): State<Arc<AppState>>, user: UserContext) -> ApiResult {
    let tables = state.backend.list_tables(&user).await?;
    Ok(Json(json!({ "tables": tables })))
}

#[derive(Deserialize, Default)]
struct CreateTable {
    #[serde(default)]
    name: String,
}

/// Creates a dataset together with its first grid view.
async fn create_table(
    State(state): State<Arc<AppState>>,
    user: UserContext,
    body: Bytes,
) -> ApiResult {
    let request: CreateTable = parse_body(&body)?;
    let name = request.name.trim();
    if name.is_empty() {
        return Err(ApiError::Validation("Table name is required".to_string()));
    }
    let table = state
        .backend
        .insert_table(&user, Dataset::new(name, &user.id))
        .await?;
    let view = state
        .backend
        .insert_view(&user, View::new(&table.id, "Sheet 1", ViewType::Grid))
        .await?;
    Ok(Json(json!({ "table": table, "view": view })))
}

async fn list_views(
    State(state): State<Arc<AppState>>,
    user: UserContext,
    Path(table_id): Path<String>,
) -> ApiResult {
    let views = state.backend.list_views(&user, &table_id).await?;
    Ok(Json(json!({ "views": views })))
}

#[derive(Deserialize, Default)]
#[serde(rename_all = "camelCase")]
struct ShareRequest {
    #[serde(default)]
    email: String,
    #[serde(default)]
    permission: SharePermission,
}

async fn share_table(
    State(state): State<Arc<AppState>>,
    user: UserContext,
    Path(table_id): Path<String>,
    body: Bytes,
) -> ApiResult {
    let request: ShareRequest = parse_body(&body)?;
    let email = request.email.trim().to_lowercase();
    if !email.contains('@') {
        return Err(ApiError::Validation("A valid email is required".to_string()));
    }
    let share = TableShare {
        table_id,
        shared_with_email: email,
        permission: request.permission,
    };
    state.backend.share_table(&user, share.clone()).await?;
    Ok(Json(json!({ "share": share })))
}

/// Deletes a column and purges it from every view of the dataset.
async fn delete_column(
    State(state): State<Arc<AppState>>,
    user: UserContext,
    Path((table_id, column_id)): Path<(String, String)>,
) -> ApiResult {
    let mut dataset = state.backend.get_table(&user, &table_id).await?;
    let mut views = state.backend.list_views(&user, &table_id).await?;
    let column = dataset.delete_column(&mut views, &column_id)?;

    state
        .backend
        .update_columns(&user, &table_id, dataset.columns.clone())
        .await?;
    for view in views {
        state.backend.update_view(&user, view).await?;
    }
    log::info!("deleted column {} from table {}", column_id, table_id);
    Ok(Json(json!({ "deleted": column, "columns": dataset.columns })))
}

async fn import_file(
    State(state): State<Arc<AppState>>,
    user: UserContext,
    Path((table_id, view_id)): Path<(String, String)>,
    mut multipart: Multipart,
) -> ApiResult {
    let mut upload: Option<(String, Bytes)> = None;
    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| ApiError::Validation(e.to_string()))?
    {
        if field.name() == Some("file") {
            let file_name = field.file_name().unwrap_or_default().to_string();
            let data = field
                .bytes()
                .await
                .map_err(|e| ApiError::Validation(e.to_string()))?;
            upload = Some((file_name, data));
        }
    }
    let (file_name, data) =
        upload.ok_or_else(|| ApiError::Validation("No file received".to_string()))?;

    let format = ImportFormat::from_filename(&file_name)?;
    let parsed = loader::parse(&data, format)?;
    let report =
        importer::import_into_view(&state.backend, &user, &table_id, &view_id, parsed, state.import)
            .await?;
    Ok(Json(json!({ "import": report })))
}

#[derive(Deserialize, Default)]
#[serde(rename_all = "camelCase", default)]
struct QueryRequest {
    search: String,
    page: usize,
    page_size: usize,
    date_range: Option<DateRangeFilter>,
    filters: Option<Vec<FilterRule>>,
    sorts: Option<Vec<SortRule>>,
    group_by: Option<String>,
    color_rules: Option<Vec<ColorRule>>,
    cell_color_rules: Option<Vec<CellColorRule>>,
}

/// Loads a view, its dataset, and the rows the view presents.
async fn load_view(
    backend: &MemoryBackend,
    user: &UserContext,
    view_id: &str,
) -> Result<(View, Dataset, Vec<Row>), ApiError> {
    let view = backend.get_view(user, view_id).await?;
    let dataset = backend.get_table(user, &view.table_id).await?;
    let rows = if view.view_type.owns_rows() && view.view_type != ViewType::Dashboard {
        view.effective_rows(&dataset).to_vec()
    } else {
        let views = backend.list_views(user, &view.table_id).await?;
        chart::source_rows(&dataset, &views, &view).to_vec()
    };
    Ok((view, dataset, rows))
}

/// Runs the view pipeline. Toolbar settings in the body override the saved ones.
async fn query_view(
    State(state): State<Arc<AppState>>,
    user: UserContext,
    Path(view_id): Path<String>,
    body: Bytes,
) -> ApiResult {
    let request: QueryRequest = parse_body(&body)?;
    let (view, dataset, rows) = load_view(&state.backend, &user, &view_id).await?;

    let mut config = view.config();
    config.search = request.search;
    config.page = request.page;
    config.page_size = request.page_size;
    config.date_range = request.date_range;
    if let Some(filters) = request.filters {
        config.filters = filters;
    }
    if let Some(sorts) = request.sorts {
        config.sorts = sorts;
    }
    if request.group_by.is_some() {
        config.group_by = request.group_by.filter(|g| !g.is_empty());
    }
    if let Some(color_rules) = request.color_rules {
        config.color_rules = color_rules;
    }
    if let Some(cell_color_rules) = request.cell_color_rules {
        config.cell_color_rules = cell_color_rules;
    }

    let output = pipeline::run(&rows, &dataset.columns, &config);
    Ok(Json(json!({
        "columns": dataset.columns,
        "visibleColumns": view.visible_columns,
        "columnHighlights": view.column_highlights,
        "result": output,
    })))
}

async fn chart_view(
    State(state): State<Arc<AppState>>,
    user: UserContext,
    Path(view_id): Path<String>,
) -> ApiResult {
    let (view, _, rows) = load_view(&state.backend, &user, &view_id).await?;
    if view.view_type == ViewType::Dashboard {
        let widgets: Vec<_> = view
            .dashboard_widgets
            .iter()
            .map(|w| chart::evaluate_widget(&rows, w))
            .collect();
        return Ok(Json(json!({ "widgets": widgets })));
    }
    let config = view.chart_config.clone().unwrap_or_default();
    Ok(Json(json!({ "series": chart::build_series(&rows, &config) })))
}

#[derive(Deserialize)]
struct ExportQuery {
    format: Option<String>,
}

async fn export_view(
    State(state): State<Arc<AppState>>,
    user: UserContext,
    Path(view_id): Path<String>,
    Query(params): Query<ExportQuery>,
) -> Result<Response, ApiError> {
    let (view, dataset, rows) = load_view(&state.backend, &user, &view_id).await?;
    // Everything the saved filters and sorts keep, on one page.
    let config = ViewConfig {
        page_size: usize::MAX,
        ..view.config()
    };
    let rows: Vec<Row> = pipeline::run(&rows, &dataset.columns, &config)
        .visible_rows()
        .cloned()
        .collect();
    let columns: Vec<_> = if view.visible_columns.is_empty() {
        dataset.columns.clone()
    } else {
        view.visible_columns
            .iter()
            .filter_map(|id| dataset.column(id).cloned())
            .collect()
    };

    let base_name = format!("{}-{}", dataset.name, view.name).replace(['"', '/', '\\'], "_");
    let (content_type, extension, bytes) = match params.format.as_deref().unwrap_or("csv") {
        "csv" => (
            "text/csv",
            "csv",
            downloader::to_csv(&rows, &columns).into_bytes(),
        ),
        "xlsx" => (
            "application/vnd.openxmlformats-officedocument.spreadsheetml.sheet",
            "xlsx",
            downloader::to_xlsx(&rows, &columns)
                .map_err(|e| ApiError::upstream("Export failed", e))?,
        ),
        "json" => (
            "application/json",
            "json",
            downloader::to_json(&rows)
                .map_err(|e| ApiError::upstream("Export failed", e))?
                .into_bytes(),
        ),
        other => {
            return Err(ApiError::Validation(format!(
                "Unsupported export format: {}",
                other
            )));
        }
    };

    let disposition = format!("attachment; filename=\"{}.{}\"", base_name, extension);
    Ok((
        StatusCode::OK,
        [
            (header::CONTENT_TYPE, content_type.to_string()),
            (header::CONTENT_DISPOSITION, disposition),
        ],
        bytes,
    )
        .into_response())
}
