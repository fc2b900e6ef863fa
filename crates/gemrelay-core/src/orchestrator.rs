use std::sync::Arc;

use bytes::Bytes;
use gemrelay_pool::{Bookkeeper, KeyPool, PoolError, QuotaScope, ResolvedQuota};
use gemrelay_protocol::gemini::response::GenerateContentResponse;
use gemrelay_protocol::openai::request::ChatCompletionRequest;
use gemrelay_protocol::openai::response::ChatCompletionResponse;
use gemrelay_store::records::{ModelCategory, PermanentError};
use gemrelay_store::{ConfigStore, CredentialStore};
use gemrelay_transform::request::{TranslateOptions, to_gemini};
use gemrelay_transform::response::{is_empty_retryable, to_chat_completion};
use http::HeaderMap;
use time::OffsetDateTime;
use tokio::sync::mpsc;
use tracing::{info, warn};
use uuid::Uuid;

use crate::auth;
use crate::error::ProxyError;
use crate::stream;
use crate::upstream::{GenerativeClient, UpstreamBody, UpstreamCall};

/// Upstream attempts per request; each attempt selects a fresh credential.
pub const MAX_RETRIES: u32 = 3;

/// Substring marking a 429 as genuine quota exhaustion. Fragile by nature,
/// the upstream error text is the only signal available.
const QUOTA_MARKER: &str = "quota";

#[derive(Debug)]
pub enum Reply {
    Json(ChatCompletionResponse),
    Stream(mpsc::Receiver<Bytes>),
}

/// Per-request state shared by the retry loop and the stream shaping.
#[derive(Clone)]
pub(crate) struct RequestContext {
    pub model: String,
    pub body: Bytes,
    pub category: ModelCategory,
    pub quota: Option<ResolvedQuota>,
    pub scope: QuotaScope,
}

pub(crate) enum CallMode {
    Buffered { retry_empty: bool },
    Streaming,
}

pub(crate) enum CallSuccess {
    Buffered(GenerateContentResponse),
    Streaming(mpsc::Receiver<Bytes>),
}

/// Top-level control loop: credential selection, bounded retries, and
/// deferred usage/error bookkeeping around one upstream call per attempt.
#[derive(Clone)]
pub struct Orchestrator {
    config: ConfigStore,
    pool: KeyPool,
    bookkeeper: Bookkeeper,
    client: Arc<dyn GenerativeClient>,
}

impl Orchestrator {
    pub fn new(
        credentials: CredentialStore,
        config: ConfigStore,
        client: Arc<dyn GenerativeClient>,
    ) -> Self {
        Self {
            pool: KeyPool::new(credentials.clone(), config.clone()),
            bookkeeper: Bookkeeper::new(credentials),
            config,
            client,
        }
    }

    pub async fn complete(
        &self,
        headers: &HeaderMap,
        request: ChatCompletionRequest,
    ) -> Result<Reply, ProxyError> {
        let access = auth::authenticate(headers, &self.config).await?;
        let models = self.config.models().await?;
        let Some(model_config) = models.get(&request.model) else {
            return Err(ProxyError::NotConfigured(request.model.clone()));
        };
        let category = model_config.category;
        let quota = self.pool.resolve_quota(&request.model).await?;
        let scope = quota
            .as_ref()
            .map(|quota| quota.scope.clone())
            .unwrap_or_else(|| QuotaScope::Model(request.model.clone()));

        // Translated once; stable across retries.
        let options = TranslateOptions {
            safety_enabled: access.safety_enabled,
        };
        let upstream_request = to_gemini(&request, &options)?;
        let body = Bytes::from(serde_json::to_vec(&upstream_request.body)?);
        let ctx = RequestContext {
            model: request.model.clone(),
            body,
            category,
            quota,
            scope,
        };

        let wants_stream = request.wants_stream();
        info!(
            event = "request_accepted",
            model = %ctx.model,
            stream = wants_stream,
            safety_enabled = access.safety_enabled,
        );

        if wants_stream && !access.safety_enabled {
            return Ok(Reply::Stream(stream::keepalive(self.clone(), ctx)));
        }
        if wants_stream {
            match self.call_with_retries(&ctx, CallMode::Streaming).await? {
                CallSuccess::Streaming(upstream) => {
                    let state = new_stream_state(&ctx.model);
                    Ok(Reply::Stream(stream::pump(upstream, state)))
                }
                CallSuccess::Buffered(_) => {
                    Err(ProxyError::Internal("unexpected buffered reply".to_owned()))
                }
            }
        } else {
            match self
                .call_with_retries(&ctx, CallMode::Buffered { retry_empty: false })
                .await?
            {
                CallSuccess::Buffered(response) => Ok(Reply::Json(to_chat_completion(
                    &response,
                    completion_id(),
                    &ctx.model,
                    now_unix(),
                ))),
                CallSuccess::Streaming(_) => {
                    Err(ProxyError::Internal("unexpected stream reply".to_owned()))
                }
            }
        }
    }

    pub(crate) async fn call_with_retries(
        &self,
        ctx: &RequestContext,
        mode: CallMode,
    ) -> Result<CallSuccess, ProxyError> {
        let mut last_error: Option<ProxyError> = None;
        for attempt in 0..MAX_RETRIES {
            let selected = match self.pool.select(Some(&ctx.model)).await {
                Ok(selected) => selected,
                Err(PoolError::NoKeyAvailable) => {
                    return Err(last_error.unwrap_or(ProxyError::NoKeyAvailable));
                }
                Err(PoolError::Store(err)) => return Err(err.into()),
            };
            let want_stream = matches!(mode, CallMode::Streaming);
            let response = self
                .client
                .generate(UpstreamCall {
                    model: ctx.model.clone(),
                    secret: selected.record.secret.clone(),
                    body: ctx.body.clone(),
                    stream: want_stream,
                })
                .await?;

            match response.status {
                status if (200..300).contains(&status) => match response.body {
                    UpstreamBody::Bytes(payload) => {
                        let parsed: GenerateContentResponse = serde_json::from_slice(&payload)
                            .map_err(|err| {
                                ProxyError::Internal(format!("upstream answer unparsable: {err}"))
                            })?;
                        if let CallMode::Buffered { retry_empty: true } = mode
                            && is_empty_retryable(&parsed)
                            && attempt + 1 < MAX_RETRIES
                        {
                            warn!(
                                event = "empty_answer_retried",
                                credential = %selected.id,
                                attempt,
                            );
                            continue;
                        }
                        self.spawn_success(&selected.id, ctx);
                        return Ok(CallSuccess::Buffered(parsed));
                    }
                    UpstreamBody::Stream(receiver) => {
                        self.spawn_success(&selected.id, ctx);
                        return Ok(CallSuccess::Streaming(receiver));
                    }
                },
                429 => {
                    let payload = buffered_payload(response.body);
                    let quota_flavored = is_quota_exhausted(&payload);
                    warn!(
                        event = "upstream_rate_limited",
                        credential = %selected.id,
                        quota_flavored,
                        attempt,
                    );
                    if quota_flavored {
                        self.spawn_rate_limit(&selected.id, ctx);
                    }
                    last_error = Some(ProxyError::RateLimited { body: payload });
                }
                status @ (401 | 403) => {
                    let payload = buffered_payload(response.body);
                    warn!(
                        event = "upstream_rejected_credential",
                        credential = %selected.id,
                        status,
                    );
                    self.spawn_permanent_error(&selected.id, status);
                    return Err(ProxyError::AuthRejected {
                        status,
                        body: payload,
                    });
                }
                status => {
                    return Err(ProxyError::Upstream {
                        status,
                        body: buffered_payload(response.body),
                    });
                }
            }
        }
        Err(last_error.unwrap_or(ProxyError::NoKeyAvailable))
    }

    fn spawn_success(&self, id: &str, ctx: &RequestContext) {
        let bookkeeper = self.bookkeeper.clone();
        let id = id.to_owned();
        let model = ctx.model.clone();
        let category = ctx.category;
        let scope = ctx.scope.clone();
        tokio::spawn(async move {
            if let Err(err) = bookkeeper
                .record_success(&id, &model, Some(category), &scope)
                .await
            {
                warn!(event = "bookkeeping_failed", credential = %id, error = %err);
            }
        });
    }

    fn spawn_rate_limit(&self, id: &str, ctx: &RequestContext) {
        let bookkeeper = self.bookkeeper.clone();
        let id = id.to_owned();
        let scope = ctx.scope.clone();
        let quota = ctx.quota.clone();
        tokio::spawn(async move {
            match bookkeeper
                .record_rate_limit(&id, &scope, quota.as_ref())
                .await
            {
                Ok(escalated) if escalated => {
                    warn!(event = "quota_escalated", credential = %id, scope = %scope.key());
                }
                Ok(_) => {}
                Err(err) => {
                    warn!(event = "bookkeeping_failed", credential = %id, error = %err);
                }
            }
        });
    }

    fn spawn_permanent_error(&self, id: &str, status: u16) {
        let error = if status == 401 {
            PermanentError::Unauthorized
        } else {
            PermanentError::Forbidden
        };
        let bookkeeper = self.bookkeeper.clone();
        let id = id.to_owned();
        tokio::spawn(async move {
            if let Err(err) = bookkeeper.record_permanent_error(&id, error).await {
                warn!(event = "bookkeeping_failed", credential = %id, error = %err);
            }
        });
    }
}

fn buffered_payload(body: UpstreamBody) -> Bytes {
    match body {
        UpstreamBody::Bytes(payload) => payload,
        // Error bodies are always buffered by the client.
        UpstreamBody::Stream(_) => Bytes::new(),
    }
}

fn is_quota_exhausted(payload: &Bytes) -> bool {
    String::from_utf8_lossy(payload)
        .to_ascii_lowercase()
        .contains(QUOTA_MARKER)
}

pub(crate) fn completion_id() -> String {
    format!("chatcmpl-{}", Uuid::new_v4().simple())
}

pub(crate) fn now_unix() -> i64 {
    OffsetDateTime::now_utc().unix_timestamp()
}

pub(crate) fn new_stream_state(model: &str) -> gemrelay_transform::stream::StreamState {
    gemrelay_transform::stream::StreamState::new(completion_id(), model.to_owned(), now_unix())
}
