use axum::extract::{DefaultBodyLimit, Multipart, Query, State};
use axum::http::{StatusCode, header};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::warn;
use url::Url;

use crate::app_state::AppState;
use crate::crypto::{self, MediaKey};
use crate::error::ApiError;
use crate::fetch::EncodedImage;
use crate::metrics::observe_stage;

/// Request body ceiling, aligned with the fetch size cap.
const MAX_BODY_BYTES: usize = 50 * 1024 * 1024;

pub fn router(state: AppState) -> Router {
    Router::new()
        .route(
            "/convert-image",
            post(convert_image_post).get(convert_image_get),
        )
        .route("/decrypt-media", post(decrypt_media))
        .route("/health", get(health))
        .route("/", get(service_info))
        .fallback(not_found)
        .layer(DefaultBodyLimit::max(MAX_BODY_BYTES))
        .with_state(state)
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConvertImageRequest {
    image_url: Option<String>,
    url: Option<String>,
}

#[derive(Deserialize)]
pub struct ConvertImageQuery {
    url: Option<String>,
}

#[derive(Serialize)]
struct ApiSuccess<T> {
    success: bool,
    data: T,
}

impl<T> ApiSuccess<T> {
    fn new(data: T) -> Self {
        Self {
            success: true,
            data,
        }
    }
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct ConvertedImage {
    #[serde(flatten)]
    image: EncodedImage,
    original_url: String,
}

pub async fn convert_image_post(
    State(state): State<AppState>,
    Json(request): Json<ConvertImageRequest>,
) -> Result<Response, ApiError> {
    let target = request
        .image_url
        .or(request.url)
        .filter(|url| !url.is_empty())
        .ok_or(ApiError::MissingUrl)?;
    convert_image(&state, target).await
}

pub async fn convert_image_get(
    State(state): State<AppState>,
    Query(query): Query<ConvertImageQuery>,
) -> Result<Response, ApiError> {
    let target = query
        .url
        .filter(|url| !url.is_empty())
        .ok_or(ApiError::MissingUrl)?;
    convert_image(&state, target).await
}

async fn convert_image(state: &AppState, target: String) -> Result<Response, ApiError> {
    let url = parse_target_url(&target)?;

    let image = observe_stage("fetch", state.fetcher.fetch_and_encode(&url)).await?;

    let body = ApiSuccess::new(ConvertedImage {
        image,
        original_url: target,
    });
    Ok((StatusCode::OK, Json(body)).into_response())
}

/// URL well-formedness is a boundary concern: the fetcher only ever sees a
/// parsed absolute http(s) URL with a host.
fn parse_target_url(raw: &str) -> Result<Url, ApiError> {
    let url = Url::parse(raw).map_err(|_| ApiError::InvalidUrl)?;
    if !matches!(url.scheme(), "http" | "https") || url.host_str().is_none() {
        return Err(ApiError::InvalidUrl);
    }
    Ok(url)
}

pub async fn decrypt_media(
    State(state): State<AppState>,
    mut multipart: Multipart,
) -> Result<Response, ApiError> {
    let mut media_key: Option<String> = None;
    let mut encrypted: Option<Vec<u8>> = None;

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|_| ApiError::Internal)?
    {
        let name = field.name().map(str::to_owned);
        match name.as_deref() {
            Some("mediaKey") => {
                media_key = Some(field.text().await.map_err(|_| ApiError::Internal)?);
            }
            Some("file") => {
                encrypted = Some(
                    field
                        .bytes()
                        .await
                        .map_err(|_| ApiError::Internal)?
                        .to_vec(),
                );
            }
            _ => {}
        }
    }

    let media_key = media_key
        .filter(|key| !key.is_empty())
        .ok_or(ApiError::MissingKey)?;
    let encrypted = encrypted.ok_or(ApiError::MissingFile)?;

    // CPU-bound, so keep it off the async workers. The internal cause is
    // logged; the response carries only the generic code.
    let plaintext = observe_stage("decrypt", async move {
        let outcome = tokio::task::spawn_blocking(move || {
            let key = MediaKey::from_base64(&media_key)?;
            crypto::decrypt(&key, &encrypted)
        })
        .await
        .map_err(|_| ApiError::Internal)?;

        outcome.map_err(|err| {
            warn!(error = %err, "media decryption failed");
            ApiError::DecryptionFailed
        })
    })
    .await?;

    let content_type = state.decrypt_content_type.clone();
    Ok(([(header::CONTENT_TYPE, content_type)], plaintext).into_response())
}

#[derive(Serialize)]
struct HealthStatus {
    status: &'static str,
    timestamp: DateTime<Utc>,
    uptime: f64,
}

pub async fn health(State(state): State<AppState>) -> Json<HealthStatus> {
    Json(HealthStatus {
        status: "OK",
        timestamp: Utc::now(),
        uptime: state.started_at.elapsed().as_secs_f64(),
    })
}

pub async fn service_info() -> Json<serde_json::Value> {
    Json(json!({
        "name": env!("CARGO_PKG_NAME"),
        "version": env!("CARGO_PKG_VERSION"),
        "endpoints": {
            "POST /convert-image": "Convert an image URL to base64",
            "GET /convert-image?url=": "Convert an image URL via GET",
            "POST /decrypt-media": "Decrypt an uploaded media file with a base64 media key",
            "GET /health": "Health check",
        },
        "usage": {
            "post": "POST /convert-image { \"imageUrl\": \"https://example.com/image.jpg\" }",
            "get": "GET /convert-image?url=https://example.com/image.jpg",
            "decrypt": "POST /decrypt-media multipart form with `file` and `mediaKey` fields",
        },
    }))
}

pub async fn not_found() -> ApiError {
    ApiError::NotFound
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::{IV_LEN, MEDIA_KEY_LEN};
    use crate::fetch::Fetcher;
    use aes::cipher::{BlockEncryptMut, KeyIvInit, block_padding::Pkcs7};
    use axum::body::{Body, to_bytes};
    use axum::http::Request;
    use base64::{Engine, engine::general_purpose};
    use tower::ServiceExt;

    type Aes256CbcEnc = cbc::Encryptor<aes::Aes256>;

    fn test_state() -> AppState {
        AppState::new(Fetcher::new().unwrap(), "image/jpeg".to_string())
    }

    fn app() -> Router {
        router(test_state())
    }

    async fn json_response(request: Request<Body>) -> (StatusCode, serde_json::Value) {
        let response = app().oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let value = serde_json::from_slice(&bytes).unwrap();
        (status, value)
    }

    fn encrypt_fixture(key: &[u8; MEDIA_KEY_LEN], plaintext: &[u8]) -> Vec<u8> {
        let iv = [0u8; IV_LEN];
        let ciphertext = Aes256CbcEnc::new_from_slices(key, &iv)
            .unwrap()
            .encrypt_padded_vec_mut::<Pkcs7>(plaintext);
        let mut buf = iv.to_vec();
        buf.extend_from_slice(&ciphertext);
        buf
    }

    fn multipart_body(boundary: &str, media_key: Option<&str>, file: Option<&[u8]>) -> Vec<u8> {
        let mut body = Vec::new();
        if let Some(key) = media_key {
            body.extend_from_slice(
                format!(
                    "--{boundary}\r\nContent-Disposition: form-data; name=\"mediaKey\"\r\n\r\n{key}\r\n"
                )
                .as_bytes(),
            );
        }
        if let Some(bytes) = file {
            body.extend_from_slice(
                format!(
                    "--{boundary}\r\nContent-Disposition: form-data; name=\"file\"; filename=\"media.enc\"\r\nContent-Type: application/octet-stream\r\n\r\n"
                )
                .as_bytes(),
            );
            body.extend_from_slice(bytes);
            body.extend_from_slice(b"\r\n");
        }
        body.extend_from_slice(format!("--{boundary}--\r\n").as_bytes());
        body
    }

    fn decrypt_request(media_key: Option<&str>, file: Option<&[u8]>) -> Request<Body> {
        let boundary = "x-imagery-test-boundary";
        Request::builder()
            .method("POST")
            .uri("/decrypt-media")
            .header(
                header::CONTENT_TYPE,
                format!("multipart/form-data; boundary={boundary}"),
            )
            .body(Body::from(multipart_body(boundary, media_key, file)))
            .unwrap()
    }

    #[tokio::test]
    async fn convert_image_post_requires_a_url() {
        let request = Request::builder()
            .method("POST")
            .uri("/convert-image")
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from("{}"))
            .unwrap();

        let (status, value) = json_response(request).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(value["success"], false);
        assert_eq!(value["error"]["code"], "MISSING_URL");
    }

    #[tokio::test]
    async fn convert_image_post_rejects_malformed_url() {
        let request = Request::builder()
            .method("POST")
            .uri("/convert-image")
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(r#"{"imageUrl": "not a url"}"#))
            .unwrap();

        let (status, value) = json_response(request).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(value["error"]["code"], "INVALID_URL");
    }

    #[tokio::test]
    async fn convert_image_post_rejects_non_http_scheme() {
        let request = Request::builder()
            .method("POST")
            .uri("/convert-image")
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(r#"{"url": "file:///etc/passwd"}"#))
            .unwrap();

        let (status, value) = json_response(request).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(value["error"]["code"], "INVALID_URL");
    }

    #[tokio::test]
    async fn convert_image_get_requires_a_url() {
        let request = Request::builder()
            .uri("/convert-image")
            .body(Body::empty())
            .unwrap();

        let (status, value) = json_response(request).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(value["error"]["code"], "MISSING_URL");
    }

    #[tokio::test]
    async fn convert_image_get_returns_the_full_envelope() {
        let upstream = Router::new().route(
            "/pic.png",
            get(|| async { ([(header::CONTENT_TYPE, "image/png")], vec![9u8; 10]) }),
        );
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let _ = axum::serve(listener, upstream).await;
        });

        let target = format!("http://{addr}/pic.png");
        let request = Request::builder()
            .uri(format!("/convert-image?url={target}"))
            .body(Body::empty())
            .unwrap();

        let (status, value) = json_response(request).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(value["success"], true);

        let data = &value["data"];
        assert_eq!(data["mimeType"], "image/png");
        assert_eq!(data["size"], 10);
        assert_eq!(data["originalUrl"], target.as_str());

        let encoded = data["base64Image"].as_str().unwrap();
        let decoded = general_purpose::STANDARD.decode(encoded).unwrap();
        assert_eq!(decoded, vec![9u8; 10]);

        assert_eq!(
            data["dataUri"].as_str().unwrap(),
            format!("data:image/png;base64,{encoded}")
        );
        assert_eq!(data["vertexAI"]["inlineData"]["data"], encoded);
        assert_eq!(data["vertexAI"]["inlineData"]["mimeType"], "image/png");
    }

    #[tokio::test]
    async fn convert_image_surfaces_fetch_failures_as_400() {
        let upstream =
            Router::new().route("/gone", get(|| async { StatusCode::INTERNAL_SERVER_ERROR }));
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let _ = axum::serve(listener, upstream).await;
        });

        let request = Request::builder()
            .uri(format!("/convert-image?url=http://{addr}/gone"))
            .body(Body::empty())
            .unwrap();

        let (status, value) = json_response(request).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(value["error"]["code"], "UPSTREAM_STATUS");
        assert_eq!(value["error"]["status"], 500);
    }

    #[tokio::test]
    async fn decrypt_media_round_trips() {
        let key = [b'0'; MEDIA_KEY_LEN];
        let payload = encrypt_fixture(&key, b"hello");
        let key_b64 = general_purpose::STANDARD.encode(key);

        let response = app()
            .oneshot(decrypt_request(Some(&key_b64), Some(&payload)))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response.headers()[header::CONTENT_TYPE], "image/jpeg");
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        assert_eq!(&bytes[..], b"hello");
    }

    #[tokio::test]
    async fn decrypt_media_requires_a_key() {
        let (status, value) =
            json_response(decrypt_request(None, Some(b"some encrypted bytes"))).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(value["error"]["code"], "MISSING_KEY");
    }

    #[tokio::test]
    async fn decrypt_media_requires_a_file() {
        let key_b64 = general_purpose::STANDARD.encode([0u8; MEDIA_KEY_LEN]);
        let (status, value) = json_response(decrypt_request(Some(&key_b64), None)).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(value["error"]["code"], "MISSING_FILE");
    }

    #[tokio::test]
    async fn decrypt_media_collapses_failures_to_one_code() {
        let valid_key = general_purpose::STANDARD.encode([0u8; MEDIA_KEY_LEN]);
        let short_key = general_purpose::STANDARD.encode([0u8; 8]);

        // Wrong key length, truncated payload, partial ciphertext block:
        // same status, same code, same message.
        for (key, file) in [
            (short_key.as_str(), &b"0123456789abcdef0123456789abcdef"[..]),
            (valid_key.as_str(), &b"short"[..]),
            (valid_key.as_str(), &b"0123456789abcdef0123456789abcdef!"[..]),
        ] {
            let (status, value) = json_response(decrypt_request(Some(key), Some(file))).await;
            assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
            assert_eq!(value["error"]["code"], "DECRYPTION_FAILED");
            assert_eq!(value["error"]["message"], "Failed to decrypt media");
        }
    }

    #[tokio::test]
    async fn health_reports_status_and_uptime() {
        let request = Request::builder()
            .uri("/health")
            .body(Body::empty())
            .unwrap();

        let (status, value) = json_response(request).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(value["status"], "OK");
        assert!(value["uptime"].as_f64().unwrap() >= 0.0);
        assert!(value["timestamp"].is_string());
    }

    #[tokio::test]
    async fn service_info_describes_the_endpoints() {
        let request = Request::builder().uri("/").body(Body::empty()).unwrap();

        let (status, value) = json_response(request).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(value["name"], env!("CARGO_PKG_NAME"));
        assert!(value["endpoints"]["POST /convert-image"].is_string());
    }

    #[tokio::test]
    async fn unknown_routes_get_the_not_found_envelope() {
        let request = Request::builder()
            .uri("/no-such-endpoint")
            .body(Body::empty())
            .unwrap();

        let (status, value) = json_response(request).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(value["success"], false);
        assert_eq!(value["error"]["code"], "NOT_FOUND");
    }
}
