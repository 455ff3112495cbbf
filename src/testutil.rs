//! In-process stand-in for the forecast provider.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::routing::get;
use axum::{Json, Router};
use serde_json::{json, Value};

use crate::utils::config::{ForecastConfig, TimestampMode};

#[derive(Debug, Clone)]
pub struct ProviderScript {
    status: StatusCode,
    body: Value,
    fail_first: usize,
}

impl ProviderScript {
    /// Clear, dry hours at the given provider-local times.
    pub fn hours(times: &[&str]) -> Self {
        let n = times.len();
        Self::json(json!({
            "utc_offset_seconds": 0,
            "hourly": {
                "time": times,
                "cloud_cover": vec![0; n],
                "precipitation": vec![0.0; n],
                "visibility": vec![24_000; n],
            }
        }))
    }

    pub fn json(body: Value) -> Self {
        Self { status: StatusCode::OK, body, fail_first: 0 }
    }

    pub fn failing(status: StatusCode) -> Self {
        Self { status, body: json!({"error": true, "reason": "scripted"}), fail_first: 0 }
    }

    /// Answer the first `n` requests with 503 before following the script.
    pub fn fail_first(mut self, n: usize) -> Self {
        self.fail_first = n;
        self
    }
}

struct ProviderState {
    script: ProviderScript,
    hits: AtomicUsize,
    last_query: Mutex<Option<HashMap<String, String>>>,
}

pub struct MockProvider {
    pub url: String,
    state: Arc<ProviderState>,
}

impl MockProvider {
    pub fn hits(&self) -> usize {
        self.state.hits.load(Ordering::SeqCst)
    }

    pub fn last_query(&self) -> Option<HashMap<String, String>> {
        self.state.last_query.lock().unwrap().clone()
    }
}

async fn forecast(
    State(state): State<Arc<ProviderState>>,
    Query(query): Query<HashMap<String, String>>,
) -> (StatusCode, Json<Value>) {
    let seen = state.hits.fetch_add(1, Ordering::SeqCst);
    *state.last_query.lock().unwrap() = Some(query);
    if seen < state.script.fail_first {
        return (StatusCode::SERVICE_UNAVAILABLE, Json(json!({"error": true})));
    }
    (state.script.status, Json(state.script.body.clone()))
}

pub async fn spawn_provider(script: ProviderScript) -> MockProvider {
    let state = Arc::new(ProviderState {
        script,
        hits: AtomicUsize::new(0),
        last_query: Mutex::new(None),
    });
    let app = Router::new()
        .route("/v1/forecast", get(forecast))
        .with_state(state.clone());

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    MockProvider { url: format!("http://{addr}/v1/forecast"), state }
}

pub fn provider_config(url: &str) -> ForecastConfig {
    ForecastConfig {
        base_url: url.to_string(),
        timeout: Duration::from_secs(5),
        max_retries: 2,
        retry_delay: Duration::from_millis(1),
        timestamp_mode: TimestampMode::Relabel,
    }
}
