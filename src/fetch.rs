use std::time::Duration;

use base64::{Engine, engine::general_purpose};
use futures_util::StreamExt;
use reqwest::header::{ACCEPT, CONTENT_TYPE, HeaderMap, HeaderValue};
use serde::Serialize;
use thiserror::Error;
use url::Url;

/// Fallback when the upstream response carries no usable Content-Type.
pub const DEFAULT_CONTENT_TYPE: &str = "image/jpeg";
/// Wall-clock budget for a whole fetch, connection through body.
pub const FETCH_TIMEOUT: Duration = Duration::from_secs(30);
/// Hard cap on the response body (50 MiB), enforced while streaming.
pub const MAX_RESPONSE_BYTES: u64 = 50 * 1024 * 1024;

const USER_AGENT: &str = concat!(
    "Mozilla/5.0 (compatible; ",
    env!("CARGO_PKG_NAME"),
    "/",
    env!("CARGO_PKG_VERSION"),
    ")"
);

#[derive(Error, Debug)]
pub enum FetchError {
    #[error("request timed out")]
    Timeout,
    #[error("request failed: {0}")]
    Request(String),
    #[error("upstream returned HTTP {0}")]
    UpstreamStatus(u16),
    #[error("response too large: {size} bytes (max {max})")]
    TooLarge { size: u64, max: u64 },
    #[error("failed to read response body: {0}")]
    Read(String),
}

impl FetchError {
    /// Stable code carried in the error envelope. `UNKNOWN_ERROR` is the
    /// catch-all for transport failures with no finer classification.
    pub fn code(&self) -> &'static str {
        match self {
            FetchError::Timeout => "TIMEOUT",
            FetchError::Request(_) => "UNKNOWN_ERROR",
            FetchError::UpstreamStatus(_) => "UPSTREAM_STATUS",
            FetchError::TooLarge { .. } => "RESPONSE_TOO_LARGE",
            FetchError::Read(_) => "STREAM_READ",
        }
    }

    /// HTTP status received from the upstream, when one was.
    pub fn upstream_status(&self) -> Option<u16> {
        match self {
            FetchError::UpstreamStatus(status) => Some(*status),
            _ => None,
        }
    }
}

impl From<reqwest::Error> for FetchError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            FetchError::Timeout
        } else {
            FetchError::Request(err.to_string())
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct InlineData {
    pub mime_type: String,
    pub data: String,
}

/// Payload shaped the way the Vertex AI vision API expects inline media.
/// Pure re-shaping of the base64 string, no transformation.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct VertexPayload {
    pub inline_data: InlineData,
}

/// Upstream bytes re-encoded for model ingestion. The raw buffer is consumed
/// by the encoding step and not retained; `size` is its byte length, not the
/// base64 length.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EncodedImage {
    pub base64_image: String,
    pub mime_type: String,
    pub data_uri: String,
    pub size: usize,
    #[serde(rename = "vertexAI")]
    pub vertex_ai: VertexPayload,
}

impl EncodedImage {
    fn from_bytes(bytes: Vec<u8>, mime_type: String) -> Self {
        let size = bytes.len();
        let encoded = general_purpose::STANDARD.encode(bytes);
        EncodedImage {
            data_uri: format!("data:{};base64,{}", mime_type, encoded),
            vertex_ai: VertexPayload {
                inline_data: InlineData {
                    mime_type: mime_type.clone(),
                    data: encoded.clone(),
                },
            },
            base64_image: encoded,
            mime_type,
            size,
        }
    }
}

/// Retrieves remote images under a fixed timeout and size cap and re-encodes
/// them as base64/data-URI payloads.
///
/// Stateless per request; the inner client is reference-counted, so cloning
/// is cheap. Dropping the future (client disconnect) cancels the in-flight
/// transfer.
#[derive(Clone)]
pub struct Fetcher {
    client: reqwest::Client,
    max_bytes: u64,
}

impl Fetcher {
    pub fn new() -> Result<Self, reqwest::Error> {
        Self::with_limits(FETCH_TIMEOUT, MAX_RESPONSE_BYTES)
    }

    /// Custom limits; tests shrink these to exercise the bounds.
    pub fn with_limits(timeout: Duration, max_bytes: u64) -> Result<Self, reqwest::Error> {
        let mut headers = HeaderMap::new();
        headers.insert(ACCEPT, HeaderValue::from_static("image/*"));

        let client = reqwest::Client::builder()
            .timeout(timeout)
            .user_agent(USER_AGENT)
            .default_headers(headers)
            .build()?;

        Ok(Fetcher { client, max_bytes })
    }

    /// Issues a single GET and encodes the body. One attempt only: transient
    /// failures are surfaced to the caller, never retried.
    pub async fn fetch_and_encode(&self, url: &Url) -> Result<EncodedImage, FetchError> {
        let response = self.client.get(url.clone()).send().await?;

        let status = response.status();
        if !status.is_success() {
            return Err(FetchError::UpstreamStatus(status.as_u16()));
        }

        // A declared length over the cap fails fast; the streaming check
        // below still guards undeclared/chunked bodies.
        if let Some(length) = response.content_length() {
            if length > self.max_bytes {
                return Err(FetchError::TooLarge {
                    size: length,
                    max: self.max_bytes,
                });
            }
        }

        let mime_type = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|value| value.to_str().ok())
            .filter(|value| !value.is_empty())
            .unwrap_or(DEFAULT_CONTENT_TYPE)
            .to_string();

        let bytes = self.read_with_limit(response).await?;
        Ok(EncodedImage::from_bytes(bytes, mime_type))
    }

    /// Reads the body incrementally, aborting the transfer as soon as the
    /// running total would exceed the cap.
    async fn read_with_limit(&self, response: reqwest::Response) -> Result<Vec<u8>, FetchError> {
        let mut body = Vec::new();
        let mut stream = response.bytes_stream();

        while let Some(chunk) = stream.next().await {
            let chunk = chunk.map_err(|err| {
                if err.is_timeout() {
                    FetchError::Timeout
                } else {
                    FetchError::Read(err.to_string())
                }
            })?;

            let total = body.len() as u64 + chunk.len() as u64;
            if total > self.max_bytes {
                return Err(FetchError::TooLarge {
                    size: total,
                    max: self.max_bytes,
                });
            }
            body.extend_from_slice(&chunk);
        }

        Ok(body)
    }
}
