use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use rusqlite::Connection;
use serde_json::json;
use tower_http::cors::{Any, CorsLayer};
use tracing::{error, info};

use crate::api::types::{ChartDto, ForecastQuery, PlanDetailResponse, RunResponse};
use crate::collectors::forecast_cache;
use crate::collectors::open_meteo::{self, FetchError, OpenMeteoClient};
use crate::predictors::planner::{self, PlanError};
use crate::utils::db::{self, DbError};

/// How many top-scoring hours the plan detail lists.
pub const HOURS_BEST_LIMIT: usize = 10;

#[derive(Clone)]
pub struct AppState {
    pub db_path: Arc<PathBuf>,
    pub client: OpenMeteoClient,
}

impl AppState {
    fn open(&self) -> Result<Connection, PlanError> {
        Ok(db::open_or_init(&self.db_path)?)
    }
}

/// Error body shared by every handler.
pub struct ApiError(PlanError);

impl From<PlanError> for ApiError {
    fn from(err: PlanError) -> Self {
        ApiError(err)
    }
}

impl From<DbError> for ApiError {
    fn from(err: DbError) -> Self {
        ApiError(err.into())
    }
}

impl From<FetchError> for ApiError {
    fn from(err: FetchError) -> Self {
        ApiError(err.into())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self.0 {
            PlanError::Validation(_) => StatusCode::UNPROCESSABLE_ENTITY,
            PlanError::Fetch(_) => StatusCode::BAD_GATEWAY,
            PlanError::Persistence(DbError::NotFound { .. }) => StatusCode::NOT_FOUND,
            PlanError::Persistence(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };
        if status.is_server_error() {
            error!(error = %self.0, "Request failed");
        }
        (status, Json(json!({ "error": self.0.to_string() }))).into_response()
    }
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/plans/:id", get(plan_detail))
        .route("/plans/:id/run", post(run_plan))
        .route("/plans/:id/windows", get(list_windows))
        .route("/locations/:id/forecast", get(cached_forecast).post(refresh_forecast))
        .with_state(state)
        .layer(CorsLayer::new().allow_origin(Any).allow_methods(Any).allow_headers(Any))
}

pub async fn run_server(state: AppState, addr: SocketAddr) -> std::io::Result<()> {
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!(%addr, "API server listening");
    axum::serve(listener, router(state)).await
}

async fn health(State(state): State<AppState>) -> impl IntoResponse {
    let db_ok = state.open().is_ok();
    Json(json!({ "status": "ok", "db": db_ok }))
}

async fn run_plan(State(state): State<AppState>, Path(id): Path<i64>) -> Result<Json<RunResponse>, ApiError> {
    let mut conn = state.open()?;
    let run = planner::run_plan(&mut conn, &state.client, id).await?;
    Ok(Json(run.into()))
}

async fn plan_detail(State(state): State<AppState>, Path(id): Path<i64>) -> Result<Json<PlanDetailResponse>, ApiError> {
    let conn = state.open()?;
    db::get_plan(&conn, id)?;
    let hours = db::list_hour_scores(&conn, id)?;
    Ok(Json(PlanDetailResponse {
        plan_id: id,
        windows: db::list_windows(&conn, id)?,
        chart: ChartDto::from_hours(&hours),
        hours_best: db::best_hour_scores(&conn, id, HOURS_BEST_LIMIT)?,
    }))
}

async fn list_windows(State(state): State<AppState>, Path(id): Path<i64>) -> Result<impl IntoResponse, ApiError> {
    let conn = state.open()?;
    db::get_plan(&conn, id)?;
    Ok(Json(db::list_windows(&conn, id)?))
}

async fn cached_forecast(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    Query(q): Query<ForecastQuery>,
) -> Result<impl IntoResponse, ApiError> {
    open_meteo::validate_range(q.from, q.to)?;
    let conn = state.open()?;
    db::get_location(&conn, id)?;
    Ok(Json(forecast_cache::cached_range(&conn, id, q.from, q.to)?))
}

async fn refresh_forecast(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    Query(q): Query<ForecastQuery>,
) -> Result<impl IntoResponse, ApiError> {
    let mut conn = state.open()?;
    let location = db::get_location(&conn, id)?;
    let hours = forecast_cache::fetch_hours(&mut conn, &state.client, &location, q.from, q.to)
        .await
        .map_err(PlanError::from)?;
    Ok(Json(hours))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::model::{PlanThresholds, TargetType};
    use crate::testutil::{provider_config, spawn_provider, ProviderScript};
    use chrono::NaiveDate;
    use serde_json::Value;
    use tempfile::TempDir;

    struct Api {
        base: String,
        http: reqwest::Client,
        _dir: TempDir,
    }

    async fn spawn_api(provider_url: &str) -> (Api, i64) {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("planner.sqlite");
        let conn = db::open_or_init(&path).unwrap();
        let loc = db::insert_location(&conn, "Tromso", 60.0, 0.0, "UTC").unwrap();
        let tgt = db::insert_target(&conn, "Polaris field", TargetType::Dso, Some(37.95), Some(89.26)).unwrap();
        let day = NaiveDate::from_ymd_opt(2024, 12, 21).unwrap();
        let thresholds = PlanThresholds { min_target_altitude: 20.0, max_cloud_cover: 40, avoid_moon: false };
        let plan = db::insert_plan(&conn, loc, tgt, day, day, &thresholds).unwrap();
        drop(conn);

        let state = AppState {
            db_path: Arc::new(path),
            client: OpenMeteoClient::new(provider_config(provider_url)).unwrap(),
        };
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, router(state)).await.unwrap();
        });

        let api = Api { base: format!("http://{addr}"), http: reqwest::Client::new(), _dir: dir };
        (api, plan)
    }

    fn night_script() -> ProviderScript {
        ProviderScript::json(json!({
            "hourly": {
                "time": ["2024-12-21T00:00", "2024-12-21T01:00", "2024-12-21T02:00"],
                "cloud_cover": [10, 90, 5],
                "precipitation": [0.0, 0.0, 0.0],
                "visibility": [24000, 24000, 24000]
            }
        }))
    }

    #[tokio::test]
    async fn run_then_list_windows() {
        let provider = spawn_provider(night_script()).await;
        let (api, plan) = spawn_api(&provider.url).await;

        let resp = api.http.post(format!("{}/plans/{plan}/run", api.base)).send().await.unwrap();
        assert_eq!(resp.status(), reqwest::StatusCode::OK);
        let body: Value = resp.json().await.unwrap();
        assert_eq!(body["hours"].as_array().map(Vec::len), Some(3));
        assert_eq!(body["chart"]["labels"][0], "2024-12-21 00:00");
        assert_eq!(body["windows"].as_array().map(Vec::len), Some(2));

        let stored: Value = api
            .http
            .get(format!("{}/plans/{plan}/windows", api.base))
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        assert_eq!(stored.as_array().map(Vec::len), Some(2));
    }

    #[tokio::test]
    async fn plan_detail_is_served_from_stored_results() {
        let provider = spawn_provider(night_script()).await;
        let (api, plan) = spawn_api(&provider.url).await;
        let detail_url = format!("{}/plans/{plan}", api.base);

        let before: Value = api.http.get(&detail_url).send().await.unwrap().json().await.unwrap();
        assert_eq!(before["chart"]["labels"].as_array().map(Vec::len), Some(0));
        assert_eq!(before["hours_best"].as_array().map(Vec::len), Some(0));

        let run: Value = api
            .http
            .post(format!("{}/plans/{plan}/run", api.base))
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();

        let first: Value = api.http.get(&detail_url).send().await.unwrap().json().await.unwrap();
        let second: Value = api.http.get(&detail_url).send().await.unwrap().json().await.unwrap();
        assert_eq!(provider.hits(), 1);
        assert_eq!(first, second);
        assert_eq!(first["chart"], run["chart"]);
        assert_eq!(first["chart"]["clouds"], json!([10, 90, 5]));
        assert_eq!(first["windows"].as_array().map(Vec::len), Some(2));

        // ties at 100 fall back to time order; the cloudy hour ranks last
        let best = first["hours_best"].as_array().unwrap();
        assert_eq!(best.len(), 3);
        assert_eq!(best[0]["cloud_cover"], 10);
        assert_eq!(best[1]["cloud_cover"], 5);
        assert_eq!(best[2]["cloud_cover"], 90);

        let missing = api.http.get(format!("{}/plans/999", api.base)).send().await.unwrap();
        assert_eq!(missing.status(), reqwest::StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn provider_outage_is_bad_gateway() {
        let provider = spawn_provider(ProviderScript::failing(reqwest::StatusCode::INTERNAL_SERVER_ERROR)).await;
        let (api, plan) = spawn_api(&provider.url).await;

        let resp = api.http.post(format!("{}/plans/{plan}/run", api.base)).send().await.unwrap();
        assert_eq!(resp.status(), reqwest::StatusCode::BAD_GATEWAY);
        let body: Value = resp.json().await.unwrap();
        assert!(body["error"].is_string());
    }

    #[tokio::test]
    async fn missing_plan_is_not_found() {
        let provider = spawn_provider(night_script()).await;
        let (api, _) = spawn_api(&provider.url).await;

        let run = api.http.post(format!("{}/plans/999/run", api.base)).send().await.unwrap();
        assert_eq!(run.status(), reqwest::StatusCode::NOT_FOUND);
        let list = api.http.get(format!("{}/plans/999/windows", api.base)).send().await.unwrap();
        assert_eq!(list.status(), reqwest::StatusCode::NOT_FOUND);
        assert_eq!(provider.hits(), 0);
    }

    #[tokio::test]
    async fn forecast_reads_cache_only() {
        let provider = spawn_provider(night_script()).await;
        let (api, plan) = spawn_api(&provider.url).await;
        let url = format!("{}/locations/1/forecast?from=2024-12-21&to=2024-12-21", api.base);

        let empty: Value = api.http.get(&url).send().await.unwrap().json().await.unwrap();
        assert_eq!(empty.as_array().map(Vec::len), Some(0));
        assert_eq!(provider.hits(), 0);

        api.http.post(format!("{}/plans/{plan}/run", api.base)).send().await.unwrap();
        let cached: Value = api.http.get(&url).send().await.unwrap().json().await.unwrap();
        assert_eq!(cached.as_array().map(Vec::len), Some(3));
        assert_eq!(cached[1]["cloud_cover"], 90);

        let reversed = format!("{}/locations/1/forecast?from=2024-12-22&to=2024-12-21", api.base);
        let resp = api.http.get(&reversed).send().await.unwrap();
        assert_eq!(resp.status(), reqwest::StatusCode::UNPROCESSABLE_ENTITY);
    }

    #[tokio::test]
    async fn refresh_fetches_then_returns_cached_rows() {
        let provider = spawn_provider(night_script()).await;
        let (api, _) = spawn_api(&provider.url).await;
        let url = format!("{}/locations/1/forecast?from=2024-12-21&to=2024-12-21", api.base);

        let fetched: Value = api.http.post(&url).send().await.unwrap().json().await.unwrap();
        assert_eq!(fetched.as_array().map(Vec::len), Some(3));
        assert_eq!(fetched[0]["source"], "open-meteo");
        assert_eq!(provider.hits(), 1);

        let missing = format!("{}/locations/42/forecast?from=2024-12-21&to=2024-12-21", api.base);
        let resp = api.http.post(&missing).send().await.unwrap();
        assert_eq!(resp.status(), reqwest::StatusCode::NOT_FOUND);
        assert_eq!(provider.hits(), 1);
    }

    #[tokio::test]
    async fn health_reports_database() {
        let provider = spawn_provider(night_script()).await;
        let (api, _) = spawn_api(&provider.url).await;
        let body: Value = api.http.get(format!("{}/health", api.base)).send().await.unwrap().json().await.unwrap();
        assert_eq!(body, json!({ "status": "ok", "db": true }));
    }
}
