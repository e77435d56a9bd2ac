#![forbid(unsafe_code)]

pub mod auth;
pub mod error;

use std::env;
use std::sync::Arc;

use axum::extract::rejection::{JsonRejection, QueryRejection};
use axum::extract::{DefaultBodyLimit, Multipart, Path, Query, State};
use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::{middleware, Extension, Json, Router};
use bazaar_engines::arbitration::{ArbitrationConfig, ArbitrationEngine};
use bazaar_engines::extraction::{
    ExtractionSource, GeminiConfig, GeminiSource, OpenAiChatConfig, OpenAiChatSource,
    IMAGE_MAX_BYTES, SOURCE_TIMEOUT_MS_DEFAULT,
};
use bazaar_engines::simulation::{scenario_catalog, ScenarioInfo};
use bazaar_kernel_contracts::arbitration::ArbitratedRecord;
use bazaar_kernel_contracts::candidate::{ConfidenceScore, SourceId};
use bazaar_kernel_contracts::records::{
    ListQuery, OwnerId, Page, PersistedSimulation, PersistedTransaction, RecordId,
    LIST_LIMIT_DEFAULT,
};
use bazaar_kernel_contracts::simulation::SimulationOutcome;
use bazaar_kernel_contracts::{TimestampMs, Validate};
use bazaar_os::{
    AppIngressRuntime, IngressConfig, ReceiptIngressRequest, SimulationIngressRequest,
};
use bazaar_storage::{
    InMemoryRecordStore, OwnerStats, PostgrestConfig, PostgrestRecordStore, RecordGateway,
    StoreError,
};
use serde::{Deserialize, Serialize};

pub use auth::{JwtVerifier, JWT_AUDIENCE_DEFAULT};
pub use error::{ApiError, ApiErrorResponse};

pub const HTTP_BIND_DEFAULT: &str = "127.0.0.1:8080";
const SOURCE_LABEL_DEFAULT: &str = "image";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AdapterConfig {
    pub bind: String,
    pub jwt_secret: String,
    pub jwt_audience: String,
    pub source_timeout_ms: u32,
    pub arbitration: ArbitrationConfig,
}

impl AdapterConfig {
    pub fn from_env() -> Result<Self, String> {
        let jwt_secret = env::var("BAZAAR_JWT_SECRET")
            .ok()
            .filter(|v| !v.trim().is_empty())
            .ok_or_else(|| "BAZAAR_JWT_SECRET must be set".to_string())?;
        let mut arbitration = ArbitrationConfig::mvp_v1();
        if let Some(bps) = parse_env_u32("BAZAAR_ARB_TOLERANCE_BPS")? {
            arbitration.numeric_tolerance_bps = bps;
        }
        if let Some(penalty) = parse_env_u32("BAZAAR_ARB_PENALTY")? {
            arbitration.disagreement_penalty = u8::try_from(penalty)
                .map_err(|_| "BAZAAR_ARB_PENALTY must be <= 100".to_string())?;
        }
        if let Ok(raw) = env::var("BAZAAR_ARB_PRIMARY") {
            arbitration.primary_source = parse_primary_source(&raw)?;
        }
        if let Some(conf) = parse_env_u32("BAZAAR_ARB_FALLBACK_CONFIDENCE")? {
            arbitration.fallback_confidence = u8::try_from(conf)
                .ok()
                .and_then(|c| ConfidenceScore::new(c).ok())
                .ok_or_else(|| "BAZAAR_ARB_FALLBACK_CONFIDENCE must be <= 100".to_string())?;
        }
        arbitration.validate().map_err(|v| v.to_string())?;
        let cfg = Self {
            bind: env::var("BAZAAR_HTTP_BIND")
                .ok()
                .filter(|v| !v.trim().is_empty())
                .unwrap_or_else(|| HTTP_BIND_DEFAULT.to_string()),
            jwt_secret,
            jwt_audience: env::var("BAZAAR_JWT_AUDIENCE")
                .ok()
                .filter(|v| !v.trim().is_empty())
                .unwrap_or_else(|| JWT_AUDIENCE_DEFAULT.to_string()),
            source_timeout_ms: parse_env_u32("BAZAAR_SOURCE_TIMEOUT_MS")?
                .unwrap_or(SOURCE_TIMEOUT_MS_DEFAULT),
            arbitration,
        };
        IngressConfig {
            source_timeout_ms: cfg.source_timeout_ms,
        }
        .validate()
        .map_err(|v| v.to_string())?;
        Ok(cfg)
    }
}

fn parse_env_u32(key: &str) -> Result<Option<u32>, String> {
    match env::var(key) {
        Ok(v) if !v.trim().is_empty() => v
            .trim()
            .parse::<u32>()
            .map(Some)
            .map_err(|_| format!("{key} must be a non-negative integer")),
        _ => Ok(None),
    }
}

fn parse_primary_source(raw: &str) -> Result<SourceId, String> {
    match raw.trim().to_ascii_uppercase().as_str() {
        "A" | "SOURCE_A" | "OPENAI" => Ok(SourceId::SourceA),
        "B" | "SOURCE_B" | "GEMINI" => Ok(SourceId::SourceB),
        other => Err(format!("BAZAAR_ARB_PRIMARY must be A or B, got {other}")),
    }
}

#[derive(Clone)]
pub struct AppState {
    pub ingress: Arc<AppIngressRuntime>,
    pub verifier: Arc<JwtVerifier>,
}

impl AppState {
    pub fn new(ingress: AppIngressRuntime, verifier: JwtVerifier) -> Self {
        Self {
            ingress: Arc::new(ingress),
            verifier: Arc::new(verifier),
        }
    }

    /// Production wiring: OpenAI as source A, Gemini as source B, Supabase
    /// when configured and the in-memory store otherwise.
    pub fn from_config(config: &AdapterConfig) -> Result<Self, String> {
        let sources: Vec<Arc<dyn ExtractionSource>> = vec![
            Arc::new(OpenAiChatSource::new(OpenAiChatConfig::from_env(
                SourceId::SourceA,
                config.source_timeout_ms,
            ))),
            Arc::new(GeminiSource::new(GeminiConfig::from_env(
                SourceId::SourceB,
                config.source_timeout_ms,
            ))),
        ];
        let gateway: Arc<dyn RecordGateway> = match PostgrestConfig::from_env() {
            Some(pg) => {
                tracing::info!(base_url = %pg.base_url, "using PostgREST record store");
                Arc::new(PostgrestRecordStore::new(pg))
            }
            None => {
                tracing::warn!("SUPABASE_URL not set; records are kept in memory only");
                Arc::new(InMemoryRecordStore::new_in_memory())
            }
        };
        let engine = ArbitrationEngine::new(config.arbitration).map_err(|v| v.to_string())?;
        let ingress = AppIngressRuntime::new(
            sources,
            engine,
            gateway,
            IngressConfig {
                source_timeout_ms: config.source_timeout_ms,
            },
        )
        .map_err(|v| v.to_string())?;
        Ok(Self::new(
            ingress,
            JwtVerifier::hs256(&config.jwt_secret, &config.jwt_audience),
        ))
    }
}

pub fn router(state: AppState) -> Router {
    let v1 = Router::new()
        .route("/receipts", post(upload_receipt))
        .route("/simulations", post(run_simulation).get(list_simulations))
        .route(
            "/simulations/:id",
            get(get_simulation).delete(delete_simulation),
        )
        .route("/transactions", get(list_transactions))
        .route(
            "/transactions/:id",
            get(get_transaction).delete(delete_transaction),
        )
        .route("/stats", get(owner_stats))
        .route("/scenarios", get(list_scenarios))
        .layer(DefaultBodyLimit::max(IMAGE_MAX_BYTES + 64 * 1024))
        .route_layer(middleware::from_fn_with_state(
            state.clone(),
            auth::require_bearer,
        ));
    Router::new()
        .route("/healthz", get(healthz))
        .route("/readyz", get(readyz))
        .nest("/v1", v1)
        .with_state(state)
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
}

async fn healthz() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
    })
}

async fn readyz(State(state): State<AppState>) -> Result<Json<HealthResponse>, ApiError> {
    on_gateway(&state, |g| g.ping()).await?;
    Ok(Json(HealthResponse {
        status: "ready".to_string(),
    }))
}

/// Runs a blocking gateway call off the async workers.
async fn on_gateway<T, F>(state: &AppState, f: F) -> Result<T, ApiError>
where
    T: Send + 'static,
    F: FnOnce(&dyn RecordGateway) -> Result<T, StoreError> + Send + 'static,
{
    let gateway = state.ingress.gateway();
    tokio::task::spawn_blocking(move || f(gateway.as_ref()))
        .await
        .map_err(|e| ApiError::Internal(format!("store task failed: {e}")))?
        .map_err(ApiError::from)
}

#[derive(Debug, Clone, Serialize)]
pub struct ReceiptUploadResponse {
    pub success: bool,
    pub synced: bool,
    pub record_id: Option<RecordId>,
    pub result: ArbitratedRecord,
}

async fn upload_receipt(
    State(state): State<AppState>,
    Extension(owner): Extension<OwnerId>,
    mut multipart: Multipart,
) -> Result<Json<ReceiptUploadResponse>, ApiError> {
    let mut file: Option<(Vec<u8>, String, String)> = None;
    let mut source_label: Option<String> = None;
    let mut hint: Option<String> = None;
    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| ApiError::BadRequest(format!("malformed multipart body: {e}")))?
    {
        let name = field.name().unwrap_or_default().to_string();
        match name.as_str() {
            "file" => {
                let mime = field
                    .content_type()
                    .unwrap_or("application/octet-stream")
                    .to_string();
                let file_name = field.file_name().unwrap_or("upload").to_string();
                let bytes = field
                    .bytes()
                    .await
                    .map_err(|e| ApiError::BadRequest(format!("could not read file: {e}")))?;
                file = Some((bytes.to_vec(), mime, file_name));
            }
            "source" => source_label = Some(read_text_field(field).await?),
            "hint" => hint = Some(read_text_field(field).await?),
            _ => {}
        }
    }
    let Some((bytes, mime, name)) = file else {
        return Err(ApiError::BadRequest("multipart field 'file' is required".to_string()));
    };
    let source_label = source_label
        .map(|s| s.trim().to_ascii_lowercase())
        .filter(|s| !s.is_empty())
        .unwrap_or_else(|| SOURCE_LABEL_DEFAULT.to_string());

    let req = ReceiptIngressRequest::v1(owner, bytes, mime, hint, source_label, name)?;
    let out = state.ingress.ingest_receipt(req).await?;
    Ok(Json(ReceiptUploadResponse {
        success: true,
        synced: out.synced,
        record_id: out.record_id,
        result: out.record,
    }))
}

async fn read_text_field(field: axum::extract::multipart::Field<'_>) -> Result<String, ApiError> {
    field
        .text()
        .await
        .map_err(|e| ApiError::BadRequest(format!("could not read text field: {e}")))
}

#[derive(Debug, Clone, Deserialize)]
pub struct SimulationRequestBody {
    pub query: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct SimulationResult {
    pub arbitrated: ArbitratedRecord,
    pub outcome: SimulationOutcome,
}

#[derive(Debug, Clone, Serialize)]
pub struct SimulationResponse {
    pub success: bool,
    pub synced: bool,
    pub record_id: Option<RecordId>,
    pub result: SimulationResult,
}

async fn run_simulation(
    State(state): State<AppState>,
    Extension(owner): Extension<OwnerId>,
    body: Result<Json<SimulationRequestBody>, JsonRejection>,
) -> Result<Json<SimulationResponse>, ApiError> {
    let Json(body) = body.map_err(|e| ApiError::BadRequest(e.body_text()))?;
    let req = SimulationIngressRequest::v1(owner, body.query)?;
    let out = state.ingress.ingest_simulation(req).await?;
    Ok(Json(SimulationResponse {
        success: true,
        synced: out.synced,
        record_id: out.record_id,
        result: SimulationResult {
            arbitrated: out.record,
            outcome: out.outcome,
        },
    }))
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ListParams {
    pub limit: Option<u32>,
    pub offset: Option<u32>,
    pub created_after: Option<u64>,
    pub created_before: Option<u64>,
    pub source: Option<String>,
}

impl ListParams {
    fn into_query(self) -> Result<ListQuery, ApiError> {
        let q = ListQuery {
            limit: self.limit.unwrap_or(LIST_LIMIT_DEFAULT),
            offset: self.offset.unwrap_or(0),
            created_after: self.created_after.map(TimestampMs),
            created_before: self.created_before.map(TimestampMs),
            source: self.source.filter(|s| !s.trim().is_empty()),
        };
        q.validate().map_err(|v| ApiError::BadRequest(v.to_string()))?;
        Ok(q)
    }
}

fn list_query(params: Result<Query<ListParams>, QueryRejection>) -> Result<ListQuery, ApiError> {
    let Query(params) = params.map_err(|e| ApiError::BadRequest(e.body_text()))?;
    params.into_query()
}

fn record_id(raw: String) -> Result<RecordId, ApiError> {
    RecordId::new(raw).map_err(|v| ApiError::BadRequest(v.to_string()))
}

async fn list_transactions(
    State(state): State<AppState>,
    Extension(owner): Extension<OwnerId>,
    params: Result<Query<ListParams>, QueryRejection>,
) -> Result<Json<Page<PersistedTransaction>>, ApiError> {
    let query = list_query(params)?;
    let page = on_gateway(&state, move |g| g.list_transactions(&owner, &query)).await?;
    Ok(Json(page))
}

async fn list_simulations(
    State(state): State<AppState>,
    Extension(owner): Extension<OwnerId>,
    params: Result<Query<ListParams>, QueryRejection>,
) -> Result<Json<Page<PersistedSimulation>>, ApiError> {
    let query = list_query(params)?;
    let page = on_gateway(&state, move |g| g.list_simulations(&owner, &query)).await?;
    Ok(Json(page))
}

async fn get_transaction(
    State(state): State<AppState>,
    Extension(owner): Extension<OwnerId>,
    Path(id): Path<String>,
) -> Result<Json<PersistedTransaction>, ApiError> {
    let id = record_id(id)?;
    let row = on_gateway(&state, move |g| g.get_transaction(&owner, &id)).await?;
    Ok(Json(row))
}

async fn get_simulation(
    State(state): State<AppState>,
    Extension(owner): Extension<OwnerId>,
    Path(id): Path<String>,
) -> Result<Json<PersistedSimulation>, ApiError> {
    let id = record_id(id)?;
    let row = on_gateway(&state, move |g| g.get_simulation(&owner, &id)).await?;
    Ok(Json(row))
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeleteResponse {
    pub success: bool,
    pub id: String,
}

async fn delete_transaction(
    State(state): State<AppState>,
    Extension(owner): Extension<OwnerId>,
    Path(id): Path<String>,
) -> Result<Json<DeleteResponse>, ApiError> {
    let id = record_id(id)?;
    let target = id.clone();
    on_gateway(&state, move |g| g.delete_transaction(&owner, &target)).await?;
    tracing::info!(record_id = id.as_str(), "transaction deleted");
    Ok(Json(DeleteResponse {
        success: true,
        id: id.as_str().to_string(),
    }))
}

async fn delete_simulation(
    State(state): State<AppState>,
    Extension(owner): Extension<OwnerId>,
    Path(id): Path<String>,
) -> Result<Json<DeleteResponse>, ApiError> {
    let id = record_id(id)?;
    let target = id.clone();
    on_gateway(&state, move |g| g.delete_simulation(&owner, &target)).await?;
    tracing::info!(record_id = id.as_str(), "simulation deleted");
    Ok(Json(DeleteResponse {
        success: true,
        id: id.as_str().to_string(),
    }))
}

async fn owner_stats(
    State(state): State<AppState>,
    Extension(owner): Extension<OwnerId>,
) -> Result<Json<OwnerStats>, ApiError> {
    let stats = on_gateway(&state, move |g| g.stats(&owner)).await?;
    Ok(Json(stats))
}

#[derive(Debug, Clone, Serialize)]
pub struct ScenarioCatalogResponse {
    pub scenarios: Vec<ScenarioInfo>,
}

async fn list_scenarios() -> (StatusCode, Json<ScenarioCatalogResponse>) {
    (
        StatusCode::OK,
        Json(ScenarioCatalogResponse {
            scenarios: scenario_catalog(),
        }),
    )
}
