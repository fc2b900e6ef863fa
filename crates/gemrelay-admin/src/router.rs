use std::sync::Arc;

use axum::extract::{Path, State};
use axum::http::{HeaderMap, StatusCode, header};
use axum::middleware::{self, Next};
use axum::response::{IntoResponse, Response};
use axum::routing::{delete, get, post};
use axum::{Json, Router};
use serde::Deserialize;
use serde_json::json;
use time::OffsetDateTime;
use tracing::info;
use uuid::Uuid;

use gemrelay_core::upstream::GenerativeClient;
use gemrelay_pool::day::usage_day;
use gemrelay_store::kv::StoreError;
use gemrelay_store::records::{AccessKey, CategoryQuotas, CredentialRecord, ModelConfig};
use gemrelay_store::{ConfigStore, CredentialStore};

use crate::token;

#[derive(Clone)]
pub struct AdminState {
    pub credentials: CredentialStore,
    pub config: ConfigStore,
    pub client: Arc<dyn GenerativeClient>,
    pub admin_password: String,
}

pub fn router(state: AdminState) -> Router {
    let protected = Router::new()
        .route("/keys", get(list_keys).post(add_key))
        .route("/keys/{id}", delete(delete_key))
        .route("/models", get(list_models).post(upsert_model))
        .route("/models/{id}", delete(delete_model))
        .route("/quotas", get(get_quotas).post(set_quotas))
        .route("/access-keys", get(list_access_keys).post(add_access_key))
        .route("/access-keys/{key}", delete(delete_access_key))
        .layer(middleware::from_fn_with_state(state.clone(), session_auth))
        .with_state(state.clone());

    Router::new()
        .route("/login", post(login))
        .with_state(state)
        .merge(protected)
}

async fn session_auth(
    State(state): State<AdminState>,
    headers: HeaderMap,
    req: axum::http::Request<axum::body::Body>,
    next: Next,
) -> Result<Response, StatusCode> {
    let token = extract_bearer(&headers).ok_or(StatusCode::UNAUTHORIZED)?;
    let secret = state
        .config
        .session_secret()
        .await
        .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?
        .ok_or(StatusCode::UNAUTHORIZED)?;
    if !token::verify(&secret, &token, OffsetDateTime::now_utc()) {
        return Err(StatusCode::UNAUTHORIZED);
    }
    Ok(next.run(req).await)
}

fn extract_bearer(headers: &HeaderMap) -> Option<String> {
    let value = headers.get(header::AUTHORIZATION)?.to_str().ok()?;
    let token = value.strip_prefix("Bearer ")?.trim();
    (!token.is_empty()).then(|| token.to_owned())
}

#[derive(Deserialize)]
struct LoginRequest {
    password: String,
}

async fn login(
    State(state): State<AdminState>,
    Json(body): Json<LoginRequest>,
) -> Response {
    // Hash both sides so the comparison is constant-time.
    if blake3::hash(body.password.as_bytes()) != blake3::hash(state.admin_password.as_bytes()) {
        return StatusCode::UNAUTHORIZED.into_response();
    }
    let secret = match state.config.session_secret().await {
        Ok(Some(secret)) => secret,
        Ok(None) => {
            return store_error_response("session secret not initialized");
        }
        Err(err) => return store_error(err),
    };
    let (token, expires_at) = token::issue(&secret, OffsetDateTime::now_utc());
    info!(event = "admin_login");
    Json(json!({ "token": token, "expires_at": expires_at })).into_response()
}

async fn list_keys(State(state): State<AdminState>) -> Response {
    let records = match state.credentials.list().await {
        Ok(records) => records,
        Err(err) => return store_error(err),
    };
    let today = usage_day();
    let keys: Vec<_> = records
        .into_iter()
        .map(|(id, record)| {
            let usage_today = if record.usage_date == today {
                record.usage
            } else {
                0
            };
            json!({
                "id": id,
                "name": record.name,
                "secret": mask_secret(&record.secret),
                "usage_today": usage_today,
                "error_status": record.error_status,
            })
        })
        .collect();
    Json(json!({ "keys": keys })).into_response()
}

#[derive(Deserialize)]
struct AddKeyRequest {
    secret: String,
    #[serde(default)]
    name: Option<String>,
    /// When set, the secret is probed against the upstream before saving.
    #[serde(default)]
    test: bool,
}

async fn add_key(State(state): State<AdminState>, Json(body): Json<AddKeyRequest>) -> Response {
    if body.secret.trim().is_empty() {
        return (
            StatusCode::BAD_REQUEST,
            Json(json!({ "error": "secret must not be empty" })),
        )
            .into_response();
    }
    if body.test
        && let Err(err) = state.client.probe(&body.secret).await
    {
        return (
            StatusCode::BAD_REQUEST,
            Json(json!({ "error": format!("connectivity test failed: {err}") })),
        )
            .into_response();
    }

    let id = Uuid::new_v4().simple().to_string();
    let name = body.name.unwrap_or_else(|| format!("key-{}", &id[..8]));
    let record = CredentialRecord::new(body.secret, name);
    if let Err(err) = state.credentials.add(&id, &record).await {
        return store_error(err);
    }
    info!(event = "credential_added", id = %id);
    (StatusCode::CREATED, Json(json!({ "id": id }))).into_response()
}

async fn delete_key(State(state): State<AdminState>, Path(id): Path<String>) -> Response {
    match state.credentials.remove(&id).await {
        Ok(()) => {
            info!(event = "credential_deleted", id = %id);
            StatusCode::NO_CONTENT.into_response()
        }
        Err(err) => store_error(err),
    }
}

async fn list_models(State(state): State<AdminState>) -> Response {
    match state.config.models().await {
        Ok(models) => Json(json!({ "models": models })).into_response(),
        Err(err) => store_error(err),
    }
}

#[derive(Deserialize)]
struct UpsertModelRequest {
    id: String,
    #[serde(flatten)]
    config: ModelConfig,
}

async fn upsert_model(
    State(state): State<AdminState>,
    Json(body): Json<UpsertModelRequest>,
) -> Response {
    let mut models = match state.config.models().await {
        Ok(models) => models,
        Err(err) => return store_error(err),
    };
    models.insert(body.id.clone(), body.config);
    match state.config.set_models(&models).await {
        Ok(()) => {
            info!(event = "model_upserted", model = %body.id);
            StatusCode::NO_CONTENT.into_response()
        }
        Err(err) => store_error(err),
    }
}

async fn delete_model(State(state): State<AdminState>, Path(id): Path<String>) -> Response {
    let mut models = match state.config.models().await {
        Ok(models) => models,
        Err(err) => return store_error(err),
    };
    if models.remove(&id).is_none() {
        return StatusCode::NOT_FOUND.into_response();
    }
    match state.config.set_models(&models).await {
        Ok(()) => StatusCode::NO_CONTENT.into_response(),
        Err(err) => store_error(err),
    }
}

async fn get_quotas(State(state): State<AdminState>) -> Response {
    match state.config.category_quotas().await {
        Ok(quotas) => Json(quotas).into_response(),
        Err(err) => store_error(err),
    }
}

async fn set_quotas(
    State(state): State<AdminState>,
    Json(quotas): Json<CategoryQuotas>,
) -> Response {
    match state.config.set_category_quotas(&quotas).await {
        Ok(()) => StatusCode::NO_CONTENT.into_response(),
        Err(err) => store_error(err),
    }
}

async fn list_access_keys(State(state): State<AdminState>) -> Response {
    match state.config.access_keys().await {
        Ok(keys) => Json(json!({ "access_keys": keys })).into_response(),
        Err(err) => store_error(err),
    }
}

#[derive(Deserialize)]
struct AddAccessKeyRequest {
    #[serde(default)]
    key: Option<String>,
    #[serde(default)]
    name: Option<String>,
    #[serde(default = "default_true")]
    safety_enabled: bool,
}

fn default_true() -> bool {
    true
}

async fn add_access_key(
    State(state): State<AdminState>,
    Json(body): Json<AddAccessKeyRequest>,
) -> Response {
    let mut keys = match state.config.access_keys().await {
        Ok(keys) => keys,
        Err(err) => return store_error(err),
    };
    let key = body
        .key
        .filter(|key| !key.trim().is_empty())
        .unwrap_or_else(|| format!("sk-{}", Uuid::new_v4().simple()));
    keys.insert(
        key.clone(),
        AccessKey {
            name: body.name,
            safety_enabled: body.safety_enabled,
        },
    );
    match state.config.set_access_keys(&keys).await {
        Ok(()) => (StatusCode::CREATED, Json(json!({ "key": key }))).into_response(),
        Err(err) => store_error(err),
    }
}

async fn delete_access_key(State(state): State<AdminState>, Path(key): Path<String>) -> Response {
    let mut keys = match state.config.access_keys().await {
        Ok(keys) => keys,
        Err(err) => return store_error(err),
    };
    if keys.remove(&key).is_none() {
        return StatusCode::NOT_FOUND.into_response();
    }
    match state.config.set_access_keys(&keys).await {
        Ok(()) => StatusCode::NO_CONTENT.into_response(),
        Err(err) => store_error(err),
    }
}

fn mask_secret(secret: &str) -> String {
    if secret.len() <= 8 {
        return "****".to_owned();
    }
    format!("{}****{}", &secret[..4], &secret[secret.len() - 4..])
}

fn store_error(err: StoreError) -> Response {
    store_error_response(&err.to_string())
}

fn store_error_response(message: &str) -> Response {
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        Json(json!({ "error": message })),
    )
        .into_response()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn secrets_are_masked_in_listings() {
        assert_eq!(mask_secret("AIzaSyExampleExampleKey"), "AIza****eKey");
        assert_eq!(mask_secret("short"), "****");
    }
}
