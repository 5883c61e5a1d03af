use crate::errors::{AppError, AppResult};
use crate::identity::{bearer_token, VerifiedIdentity};
use crate::models::RawPricingRequest;
use crate::store::{CalculationPatch, CalculationRecord};
use crate::state::AppState;
use axum::body::Bytes;
use axum::extract::{Path, State};
use axum::http::{header, HeaderMap, StatusCode};
use axum::response::Json;
use portable_atomic::Ordering::Relaxed;
use std::sync::Arc;

#[derive(Debug, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CalculateResponse {
    pub option_price: f64,
}

#[derive(Debug, serde::Serialize, serde::Deserialize)]
pub struct TokensResponse {
    pub tokens: i64,
}

#[derive(Debug, serde::Serialize, serde::Deserialize)]
pub struct CalculationsResponse {
    pub calculations: Vec<CalculationRecord>,
}

/// Bearer check shared by every user endpoint. Runs before the body is read.
fn authenticate(state: &AppState, headers: &HeaderMap) -> AppResult<VerifiedIdentity> {
    let value = headers.get(header::AUTHORIZATION).and_then(|v| v.to_str().ok());
    let token = bearer_token(value)?;
    state.verifier.verify(token).map_err(|e| {
        tracing::warn!(error = %e, "identity verification failed");
        AppError::Unauthorized("User not authenticated".into())
    })
}

/// Decode a body that must be a JSON object. Derived struct deserializers
/// also accept arrays positionally, so the shape is checked first.
fn json_object<T: serde::de::DeserializeOwned>(body: &[u8]) -> Result<T, serde_json::Error> {
    match serde_json::from_slice::<serde_json::Value>(body)? {
        obj @ serde_json::Value::Object(_) => serde_json::from_value(obj),
        other => Err(serde::de::Error::custom(format!("expected a JSON object, got {other}"))),
    }
}

/// POST /calculate -- price a call and persist it against one token
pub async fn calculate(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    body: Bytes,
) -> AppResult<Json<CalculateResponse>> {
    let result = async {
        let identity = authenticate(&state, &headers)?;

        let raw: RawPricingRequest = json_object(&body)
            .map_err(|_| AppError::InvalidInput("Invalid input: request body must be a JSON object".into()))?;
        let inputs = raw.into_inputs()?;

        let option_price = inputs.price();
        if !option_price.is_finite() {
            return Err(AppError::InvalidInput(
                "Invalid input: inputs do not produce a finite price".into(),
            ));
        }
        state.counters.calculations_priced.fetch_add(1, Relaxed);

        state.recorder.save(&identity.uid, &inputs, option_price).await?;
        state.counters.calculations_saved.fetch_add(1, Relaxed);

        Ok::<_, AppError>(CalculateResponse { option_price })
    }
    .await;

    state.counters.observe(result).map(Json)
}

/// POST /api/profile -- first sign-in creates the user document
pub async fn ensure_profile(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
) -> AppResult<Json<TokensResponse>> {
    let result = async {
        let identity = authenticate(&state, &headers)?;
        let tokens = state
            .ledger
            .ensure_profile(&identity.uid, identity.email.as_deref())
            .await?;
        Ok::<_, AppError>(TokensResponse { tokens })
    }
    .await;

    state.counters.observe(result).map(Json)
}

/// GET /api/tokens -- current balance (initializes unseen users)
pub async fn get_tokens(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
) -> AppResult<Json<TokensResponse>> {
    let result = async {
        let identity = authenticate(&state, &headers)?;
        let tokens = state.ledger.get_balance(&identity.uid).await?;
        Ok::<_, AppError>(TokensResponse { tokens })
    }
    .await;

    state.counters.observe(result).map(Json)
}

/// GET /api/calculations -- the caller's calculations, newest first
pub async fn list_calculations(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
) -> AppResult<Json<CalculationsResponse>> {
    let result = async {
        let identity = authenticate(&state, &headers)?;
        let calculations = state.recorder.list(&identity.uid).await?;
        Ok::<_, AppError>(CalculationsResponse { calculations })
    }
    .await;

    state.counters.observe(result).map(Json)
}

/// GET /api/calculations/{id}
pub async fn get_calculation(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    headers: HeaderMap,
) -> AppResult<Json<CalculationRecord>> {
    let result = async {
        let identity = authenticate(&state, &headers)?;
        state.recorder.get(&identity.uid, &id).await
    }
    .await;

    state.counters.observe(result).map(Json)
}

/// PATCH /api/calculations/{id} -- partial update, ledger untouched
pub async fn update_calculation(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    headers: HeaderMap,
    body: Bytes,
) -> AppResult<Json<CalculationRecord>> {
    let result = async {
        let identity = authenticate(&state, &headers)?;
        let patch: CalculationPatch = json_object(&body)
            .map_err(|e| AppError::InvalidInput(format!("Invalid update: {e}")))?;
        state.recorder.update(&identity.uid, &id, patch).await
    }
    .await;

    state.counters.observe(result).map(Json)
}

/// DELETE /api/calculations/{id} -- no refund
pub async fn delete_calculation(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    headers: HeaderMap,
) -> AppResult<StatusCode> {
    let result = async {
        let identity = authenticate(&state, &headers)?;
        state.recorder.delete(&identity.uid, &id).await
    }
    .await;

    state.counters.observe(result).map(|_| StatusCode::NO_CONTENT)
}

/// GET /api/counters -- request counters (lock-free reads)
pub async fn get_counters(State(state): State<Arc<AppState>>) -> Json<serde_json::Value> {
    Json(state.counters.snapshot())
}

/// GET /health
pub async fn health() -> Json<serde_json::Value> {
    Json(serde_json::json!({ "status": "ok" }))
}
