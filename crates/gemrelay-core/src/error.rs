use bytes::Bytes;
use gemrelay_pool::PoolError;
use gemrelay_store::StoreError;
use gemrelay_transform::TranslateError;
use http::StatusCode;
use serde_json::json;

#[derive(Debug, thiserror::Error)]
pub enum ProxyError {
    #[error("invalid request: {0}")]
    Validation(String),
    #[error("missing or unrecognized access key")]
    Auth,
    #[error("model `{0}` is not configured")]
    NotConfigured(String),
    #[error("no upstream key available")]
    NoKeyAvailable,
    /// Upstream 429, surfaced only after retries are exhausted.
    #[error("upstream rate limited")]
    RateLimited { body: Bytes },
    /// Upstream 401/403; the credential has been permanently disabled.
    #[error("upstream rejected credential")]
    AuthRejected { status: u16, body: Bytes },
    /// Any other upstream non-2xx, surfaced verbatim.
    #[error("upstream error")]
    Upstream { status: u16, body: Bytes },
    #[error("upstream transport failure: {0}")]
    Transport(String),
    #[error("internal error: {0}")]
    Internal(String),
}

impl ProxyError {
    pub fn status(&self) -> StatusCode {
        match self {
            Self::Validation(_) | Self::NotConfigured(_) => StatusCode::BAD_REQUEST,
            Self::Auth => StatusCode::UNAUTHORIZED,
            Self::NoKeyAvailable => StatusCode::SERVICE_UNAVAILABLE,
            Self::RateLimited { .. } => StatusCode::TOO_MANY_REQUESTS,
            Self::AuthRejected { status, .. } | Self::Upstream { status, .. } => {
                StatusCode::from_u16(*status).unwrap_or(StatusCode::BAD_GATEWAY)
            }
            Self::Transport(_) => StatusCode::BAD_GATEWAY,
            Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    pub fn error_type(&self) -> &'static str {
        match self {
            Self::Validation(_) | Self::NotConfigured(_) => "invalid_request_error",
            Self::Auth => "authentication_error",
            Self::NoKeyAvailable => "service_unavailable",
            Self::RateLimited { .. } => "rate_limit_error",
            Self::AuthRejected { .. } | Self::Upstream { .. } | Self::Transport(_) => {
                "upstream_error"
            }
            Self::Internal(_) => "internal_error",
        }
    }

    /// Upstream failures pass the upstream body through verbatim; everything
    /// else gets the OpenAI-style error envelope.
    pub fn to_body(&self) -> Bytes {
        match self {
            Self::RateLimited { body }
            | Self::AuthRejected { body, .. }
            | Self::Upstream { body, .. } => body.clone(),
            _ => Bytes::from(
                json!({
                    "error": {
                        "message": self.to_string(),
                        "type": self.error_type(),
                        "code": self.status().as_u16(),
                    }
                })
                .to_string(),
            ),
        }
    }
}

impl From<StoreError> for ProxyError {
    fn from(err: StoreError) -> Self {
        Self::Internal(err.to_string())
    }
}

impl From<PoolError> for ProxyError {
    fn from(err: PoolError) -> Self {
        match err {
            PoolError::NoKeyAvailable => Self::NoKeyAvailable,
            PoolError::Store(err) => Self::Internal(err.to_string()),
        }
    }
}

impl From<TranslateError> for ProxyError {
    fn from(err: TranslateError) -> Self {
        Self::Validation(err.to_string())
    }
}

impl From<serde_json::Error> for ProxyError {
    fn from(err: serde_json::Error) -> Self {
        Self::Internal(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn upstream_body_passes_through_verbatim() {
        let error = ProxyError::Upstream {
            status: 418,
            body: Bytes::from_static(b"{\"upstream\":true}"),
        };
        assert_eq!(error.status().as_u16(), 418);
        assert_eq!(&error.to_body()[..], b"{\"upstream\":true}");
    }

    #[test]
    fn gateway_errors_use_error_envelope() {
        let error = ProxyError::NotConfigured("nope".to_owned());
        let body: serde_json::Value = serde_json::from_slice(&error.to_body()).unwrap();
        assert_eq!(body["error"]["type"], "invalid_request_error");
        assert_eq!(body["error"]["code"], 400);
    }
}
