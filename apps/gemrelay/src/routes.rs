use axum::Router;
use axum::body::Body;
use axum::extract::State;
use axum::http::{HeaderMap, HeaderValue, StatusCode, header};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use bytes::Bytes;
use time::OffsetDateTime;
use tokio_stream::StreamExt;
use tokio_stream::wrappers::ReceiverStream;
use tracing::warn;

use gemrelay_admin::AdminState;
use gemrelay_core::{Orchestrator, ProxyError, Reply};
use gemrelay_protocol::openai::models::{
    ModelList, ModelListObjectType, ModelObject, ModelObjectType,
};
use gemrelay_protocol::openai::request::ChatCompletionRequest;
use gemrelay_store::ConfigStore;

#[derive(Clone)]
struct ApiState {
    orchestrator: Orchestrator,
    config: ConfigStore,
}

pub(crate) fn router(orchestrator: Orchestrator, config: ConfigStore, admin: AdminState) -> Router {
    let state = ApiState {
        orchestrator,
        config,
    };
    Router::new()
        .route(
            "/v1/chat/completions",
            post(chat_completions).options(preflight),
        )
        .route("/v1/models", get(list_models).options(preflight))
        .with_state(state)
        .nest("/admin", gemrelay_admin::router(admin))
}

async fn chat_completions(
    State(state): State<ApiState>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let request = match serde_json::from_slice::<ChatCompletionRequest>(&body) {
        Ok(request) => request,
        Err(err) => {
            return error_response(&ProxyError::Validation(format!("invalid request: {err}")));
        }
    };
    match state.orchestrator.complete(&headers, request).await {
        Ok(Reply::Json(completion)) => with_cors(axum::Json(completion).into_response()),
        Ok(Reply::Stream(frames)) => {
            let stream = ReceiverStream::new(frames).map(Ok::<_, std::convert::Infallible>);
            let response = Response::builder()
                .status(StatusCode::OK)
                .header(header::CONTENT_TYPE, "text/event-stream")
                .header(header::CACHE_CONTROL, "no-cache")
                .body(Body::from_stream(stream));
            match response {
                Ok(response) => with_cors(response),
                Err(err) => {
                    warn!(error = %err, "failed to build stream response");
                    error_response(&ProxyError::Internal(err.to_string()))
                }
            }
        }
        Err(error) => error_response(&error),
    }
}

async fn list_models(State(state): State<ApiState>) -> Response {
    let models = match state.config.models().await {
        Ok(models) => models,
        Err(err) => return error_response(&ProxyError::from(err)),
    };
    let created = OffsetDateTime::now_utc().unix_timestamp();
    let data = models
        .into_keys()
        .map(|id| ModelObject {
            id,
            object: ModelObjectType::Model,
            created,
            owned_by: "google".to_owned(),
        })
        .collect();
    with_cors(
        axum::Json(ModelList {
            object: ModelListObjectType::List,
            data,
        })
        .into_response(),
    )
}

async fn preflight() -> Response {
    let mut response = StatusCode::NO_CONTENT.into_response();
    let headers = response.headers_mut();
    headers.insert(
        header::ACCESS_CONTROL_ALLOW_ORIGIN,
        HeaderValue::from_static("*"),
    );
    headers.insert(
        header::ACCESS_CONTROL_ALLOW_METHODS,
        HeaderValue::from_static("GET, POST, OPTIONS"),
    );
    headers.insert(
        header::ACCESS_CONTROL_ALLOW_HEADERS,
        HeaderValue::from_static("*"),
    );
    response
}

fn with_cors(mut response: Response) -> Response {
    response.headers_mut().insert(
        header::ACCESS_CONTROL_ALLOW_ORIGIN,
        HeaderValue::from_static("*"),
    );
    response
}

fn error_response(error: &ProxyError) -> Response {
    let response = Response::builder()
        .status(error.status())
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(error.to_body()));
    match response {
        Ok(response) => with_cors(response),
        Err(_) => StatusCode::INTERNAL_SERVER_ERROR.into_response(),
    }
}
