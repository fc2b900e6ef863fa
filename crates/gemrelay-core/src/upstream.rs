use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

use bytes::Bytes;
use futures_util::StreamExt;
use tokio::sync::mpsc;
use wreq::{Client, Method};

use crate::error::ProxyError;

pub const GEMINI_BASE_URL: &str = "https://generativelanguage.googleapis.com";

/// One generation attempt against the upstream API.
#[derive(Debug, Clone)]
pub struct UpstreamCall {
    pub model: String,
    pub secret: String,
    pub body: Bytes,
    pub stream: bool,
}

#[derive(Debug)]
pub enum UpstreamBody {
    Bytes(Bytes),
    Stream(mpsc::Receiver<Bytes>),
}

#[derive(Debug)]
pub struct UpstreamResponse {
    pub status: u16,
    pub body: UpstreamBody,
}

pub trait GenerativeClient: Send + Sync {
    fn generate<'a>(
        &'a self,
        call: UpstreamCall,
    ) -> Pin<Box<dyn Future<Output = Result<UpstreamResponse, ProxyError>> + Send + 'a>>;

    /// Lightweight connectivity check for a credential secret.
    fn probe<'a>(
        &'a self,
        secret: &'a str,
    ) -> Pin<Box<dyn Future<Output = Result<(), ProxyError>> + Send + 'a>>;
}

#[derive(Debug, Clone)]
pub struct UpstreamClientConfig {
    pub base_url: String,
    pub connect_timeout: Duration,
    pub request_timeout: Duration,
    pub stream_idle_timeout: Duration,
}

impl Default for UpstreamClientConfig {
    fn default() -> Self {
        Self {
            base_url: GEMINI_BASE_URL.to_owned(),
            connect_timeout: Duration::from_secs(5),
            request_timeout: Duration::from_secs(600),
            stream_idle_timeout: Duration::from_secs(30),
        }
    }
}

#[derive(Clone)]
pub struct WreqGenerativeClient {
    client: Client,
    config: UpstreamClientConfig,
}

impl WreqGenerativeClient {
    pub fn new(config: UpstreamClientConfig) -> Result<Self, wreq::Error> {
        let client = Client::builder()
            .connect_timeout(config.connect_timeout)
            .timeout(config.request_timeout)
            .read_timeout(config.stream_idle_timeout)
            .build()?;
        Ok(Self { client, config })
    }

    fn generate_url(&self, model: &str, stream: bool) -> String {
        if stream {
            format!(
                "{}/v1beta/models/{}:streamGenerateContent?alt=sse",
                self.config.base_url, model
            )
        } else {
            format!(
                "{}/v1beta/models/{}:generateContent",
                self.config.base_url, model
            )
        }
    }
}

impl GenerativeClient for WreqGenerativeClient {
    fn generate<'a>(
        &'a self,
        call: UpstreamCall,
    ) -> Pin<Box<dyn Future<Output = Result<UpstreamResponse, ProxyError>> + Send + 'a>> {
        Box::pin(async move {
            let url = self.generate_url(&call.model, call.stream);
            let resp = self
                .client
                .request(Method::POST, &url)
                .header("x-goog-api-key", &call.secret)
                .header("content-type", "application/json")
                .body(call.body)
                .send()
                .await
                .map_err(map_transport_error)?;
            convert_response(resp, call.stream, self.config.stream_idle_timeout).await
        })
    }

    fn probe<'a>(
        &'a self,
        secret: &'a str,
    ) -> Pin<Box<dyn Future<Output = Result<(), ProxyError>> + Send + 'a>> {
        Box::pin(async move {
            let url = format!("{}/v1beta/models", self.config.base_url);
            let resp = self
                .client
                .request(Method::GET, &url)
                .header("x-goog-api-key", secret)
                .send()
                .await
                .map_err(map_transport_error)?;
            let status = resp.status().as_u16();
            if (200..300).contains(&status) {
                return Ok(());
            }
            let body = resp.bytes().await.map_err(map_transport_error)?;
            match status {
                401 | 403 => Err(ProxyError::AuthRejected { status, body }),
                _ => Err(ProxyError::Upstream { status, body }),
            }
        })
    }
}

/// Error bodies are always buffered so they can be classified; 2xx stream
/// responses are bridged chunk-by-chunk with an idle timeout.
async fn convert_response(
    resp: wreq::Response,
    want_stream: bool,
    stream_idle_timeout: Duration,
) -> Result<UpstreamResponse, ProxyError> {
    let status = resp.status().as_u16();
    let is_success = (200..300).contains(&status);
    if !is_success || !want_stream {
        let body = resp.bytes().await.map_err(map_transport_error)?;
        return Ok(UpstreamResponse {
            status,
            body: UpstreamBody::Bytes(body),
        });
    }

    let (tx, rx) = mpsc::channel::<Bytes>(16);
    tokio::spawn(async move {
        let mut stream = resp.bytes_stream();
        loop {
            let next = tokio::time::timeout(stream_idle_timeout, stream.next()).await;
            let Ok(item) = next else {
                break;
            };
            let Some(item) = item else {
                break;
            };
            let Ok(chunk) = item else {
                break;
            };
            if tx.send(chunk).await.is_err() {
                break;
            }
        }
    });

    Ok(UpstreamResponse {
        status,
        body: UpstreamBody::Stream(rx),
    })
}

fn map_transport_error(err: wreq::Error) -> ProxyError {
    ProxyError::Transport(err.to_string())
}
