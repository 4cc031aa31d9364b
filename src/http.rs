use crate::directory::{DirectoryError, DirectorySession, Identity};
use crate::state::AppState;
use crate::webp;
use axum::body::Bytes;
use axum::extract::{FromRequest, Multipart, Request, State};
use axum::http::{HeaderMap, HeaderValue, StatusCode, header};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use bytes::BytesMut;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;
use tracing::{debug, warn};

const REQUIRED_PFP_DIM: u32 = 256;
const PFP_CACHE_CONTROL: &str = "public, max-age=31536000, immutable";

pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/healthz", get(healthz))
        .route("/api/profile-picture", post(upload_profile_picture))
        .with_state(state)
}

async fn healthz() -> impl IntoResponse {
    (StatusCode::OK, "ok")
}

#[derive(Debug, Serialize)]
pub struct UploadResponse {
    #[serde(rename = "accountId")]
    pub account_id: String,
    pub version: u8,
    pub url: Option<String>,
}

#[derive(Debug, Deserialize)]
struct UploadByUrlRequest {
    #[serde(rename = "imageUrl")]
    image_url: String,
    identity: String,
}

enum ImageSource {
    File {
        bytes: Bytes,
        declared_type: Option<String>,
    },
    Url(String),
}

struct UploadInput {
    identity: String,
    image: ImageSource,
}

async fn upload_profile_picture(
    State(state): State<Arc<AppState>>,
    request: Request,
) -> Result<Json<UploadResponse>, ApiError> {
    let Some(token) = extract_bearer_token(request.headers()) else {
        return Err(ApiError::unauthorized("missing or malformed bearer token"));
    };
    debug!(token_len = token.len(), "profile picture upload requested");

    let input = read_upload_input(&state, request).await?;
    let identity: Identity = input
        .identity
        .parse()
        .map_err(|_| ApiError::bad_request("invalid identity"))?;

    let bytes = match input.image {
        ImageSource::File {
            bytes,
            declared_type,
        } => {
            validate_webp_file(&state, &bytes, declared_type.as_deref())?;
            bytes
        }
        // The URL path sniffs the container only to pick the stored
        // extension; it runs no dimension check.
        ImageSource::Url(url) => fetch_remote_image(&state, &url).await?,
    };

    let session = state
        .directory
        .open_session()
        .await
        .map_err(map_directory_error)?;
    let outcome = store_and_register(&state, session.as_ref(), &identity, &bytes).await;
    session.close().await;
    Ok(Json(outcome?))
}

async fn read_upload_input(state: &AppState, request: Request) -> Result<UploadInput, ApiError> {
    let content_type = request
        .headers()
        .get(header::CONTENT_TYPE)
        .and_then(|value| value.to_str().ok())
        .unwrap_or("")
        .to_string();
    if content_type.starts_with("multipart/form-data") {
        let mut multipart = Multipart::from_request(request, &()).await.map_err(|err| {
            ApiError::bad_request("invalid multipart body").with_log_detail(err.to_string())
        })?;
        let mut identity: Option<String> = None;
        let mut image: Option<ImageSource> = None;
        while let Some(field) = multipart.next_field().await.map_err(|err| {
            ApiError::bad_request("invalid multipart body").with_log_detail(err.to_string())
        })? {
            match field.name().unwrap_or_default() {
                "identity" => {
                    identity = Some(field.text().await.map_err(|err| {
                        ApiError::bad_request("unreadable identity field")
                            .with_log_detail(err.to_string())
                    })?);
                }
                "image" => {
                    let declared_type = field.content_type().map(|value| value.to_string());
                    let bytes = field.bytes().await.map_err(|err| {
                        ApiError::bad_request("unreadable image field")
                            .with_log_detail(err.to_string())
                    })?;
                    image = Some(ImageSource::File {
                        bytes,
                        declared_type,
                    });
                }
                _ => {}
            }
        }
        let identity = identity.ok_or_else(|| ApiError::bad_request("missing identity field"))?;
        let image = image.ok_or_else(|| ApiError::bad_request("missing image file"))?;
        Ok(UploadInput { identity, image })
    } else if content_type.starts_with("application/json") {
        let bytes = axum::body::to_bytes(request.into_body(), state.config.max_body_bytes)
            .await
            .map_err(|err| {
                ApiError::bad_request("unreadable request body").with_log_detail(err.to_string())
            })?;
        let payload: UploadByUrlRequest = serde_json::from_slice(&bytes).map_err(|err| {
            ApiError::bad_request("invalid json body").with_log_detail(err.to_string())
        })?;
        Ok(UploadInput {
            identity: payload.identity,
            image: ImageSource::Url(payload.image_url),
        })
    } else {
        Err(ApiError::bad_request("unsupported content type"))
    }
}

fn validate_webp_file(
    state: &AppState,
    bytes: &[u8],
    declared_type: Option<&str>,
) -> Result<(), ApiError> {
    let is_webp_mime = declared_type
        .and_then(|value| value.parse::<mime::Mime>().ok())
        .map(|value| value.essence_str() == "image/webp")
        .unwrap_or(false);
    if !is_webp_mime {
        return Err(ApiError::bad_request("image must be uploaded as image/webp"));
    }
    if bytes.len() > state.config.max_image_bytes {
        return Err(ApiError::bad_request("image file is too large").with_log_detail(format!(
            "{} bytes exceeds limit of {}",
            bytes.len(),
            state.config.max_image_bytes
        )));
    }
    match webp::parse_dimensions(bytes) {
        Some(dims) if dims.width == REQUIRED_PFP_DIM && dims.height == REQUIRED_PFP_DIM => Ok(()),
        Some(dims) => Err(
            ApiError::bad_request("Profile pictures must be exactly 256×256 pixels")
                .with_log_detail(format!("got {}×{}", dims.width, dims.height)),
        ),
        None => Err(
            ApiError::bad_request("Profile pictures must be exactly 256×256 pixels")
                .with_log_detail("not a parsable webp container".to_string()),
        ),
    }
}

/// Shared client for user-supplied `imageUrl` fetches. Redirects are not
/// followed; a redirecting upstream is treated like any other fetch failure.
pub fn outbound_client(timeout_seconds: u64) -> reqwest::Result<reqwest::Client> {
    reqwest::Client::builder()
        .timeout(std::time::Duration::from_secs(timeout_seconds))
        .redirect(reqwest::redirect::Policy::none())
        .user_agent("pfp-service/0.1")
        .build()
}

async fn fetch_remote_image(state: &AppState, url: &str) -> Result<Bytes, ApiError> {
    let mut response = state.http_client.get(url).send().await.map_err(|err| {
        ApiError::bad_request("image fetch failed").with_log_detail(err.to_string())
    })?;
    let status = response.status();
    if !status.is_success() {
        return Err(ApiError::bad_request("image fetch failed")
            .with_log_detail(format!("upstream returned {status}")));
    }
    let mut buffer = BytesMut::new();
    while let Some(chunk) = response.chunk().await.map_err(|err| {
        ApiError::bad_request("image fetch failed").with_log_detail(err.to_string())
    })? {
        if buffer.len() + chunk.len() > state.config.fetch_max_bytes {
            return Err(ApiError::bad_request("remote image is too large"));
        }
        buffer.extend_from_slice(&chunk);
    }
    Ok(buffer.freeze())
}

async fn store_and_register(
    state: &AppState,
    session: &dyn DirectorySession,
    identity: &Identity,
    bytes: &[u8],
) -> Result<UploadResponse, ApiError> {
    let account = session
        .find_account(identity)
        .await
        .map_err(map_directory_error)?
        .ok_or_else(ApiError::no_account)?;
    // A missing customization row just means no picture was ever set.
    let current_version = session
        .find_customization(account.id)
        .await
        .map_err(map_directory_error)?
        .map(|row| row.pfp_version)
        .unwrap_or(0);

    let store = state
        .store
        .as_ref()
        .ok_or_else(|| ApiError::config("object storage is not configured"))?;
    let extension = if webp::is_webp_container(bytes) {
        "webp"
    } else {
        "jpg"
    };
    let content_type = if extension == "webp" {
        "image/webp"
    } else {
        "image/jpeg"
    };
    let key = format!("pfp/{}.{}", account.id, extension);
    store
        .put(&key, bytes, content_type, PFP_CACHE_CONTROL)
        .await
        .map_err(|err| {
            warn!(error = ?err, key = %key, "object upload failed");
            ApiError::internal("upload failed").with_log_detail(err.to_string())
        })?;

    session.increment_pfp_version().await.map_err(|err| {
        warn!(error = %err, account_id = account.id, "version bump failed");
        ApiError::internal("upload failed").with_log_detail(err.to_string())
    })?;

    // Advisory only; the reducer owns the authoritative counter and the two
    // may race.
    let next_version = current_version.saturating_add(1);
    let url = build_public_url(
        state.config.cdn_base_url.as_deref(),
        account.id,
        next_version,
        extension,
    );
    debug!(
        account_id = account.id,
        version = next_version,
        key = %key,
        "profile picture updated"
    );
    Ok(UploadResponse {
        account_id: account.id.to_string(),
        version: next_version,
        url,
    })
}

fn build_public_url(
    cdn_base: Option<&str>,
    account_id: u64,
    version: u8,
    extension: &str,
) -> Option<String> {
    let base = cdn_base?;
    if version == 0 {
        return None;
    }
    Some(format!(
        "{}/pfp/{account_id}.{extension}?v={version}",
        base.trim_end_matches('/')
    ))
}

fn map_directory_error(error: DirectoryError) -> ApiError {
    match error {
        DirectoryError::NotConfigured => {
            ApiError::config("backend connection is not configured")
        }
        DirectoryError::Connect(detail) | DirectoryError::Lookup(detail) => {
            warn!(detail = %detail, "account resolution failed");
            ApiError::unauthorized("account resolution failed").with_log_detail(detail)
        }
        DirectoryError::Procedure(detail) => {
            warn!(detail = %detail, "reducer call failed");
            ApiError::internal("upload failed").with_log_detail(detail)
        }
    }
}

fn extract_bearer_token(headers: &HeaderMap) -> Option<&str> {
    let value = headers.get(header::AUTHORIZATION)?.to_str().ok()?;
    let mut parts = value.split_whitespace();
    let scheme = parts.next()?;
    let token = parts.next()?;
    if scheme.eq_ignore_ascii_case("bearer") {
        Some(token)
    } else {
        None
    }
}

#[derive(Debug)]
pub struct ApiError {
    pub status: StatusCode,
    pub body: Value,
    pub log_detail: Option<String>,
}

impl ApiError {
    pub fn new(status: StatusCode, message: &str) -> Self {
        Self {
            status,
            body: serde_json::json!({ "error": message }),
            log_detail: None,
        }
    }

    pub fn bad_request(message: &str) -> Self {
        Self::new(StatusCode::BAD_REQUEST, message)
    }

    pub fn unauthorized(message: &str) -> Self {
        Self::new(StatusCode::UNAUTHORIZED, message)
    }

    pub fn internal(message: &str) -> Self {
        Self::new(StatusCode::INTERNAL_SERVER_ERROR, message)
    }

    pub fn config(message: &str) -> Self {
        Self::new(StatusCode::INTERNAL_SERVER_ERROR, message)
    }

    /// Domain-specific status distinct from the standard 4xx set.
    pub fn no_account() -> Self {
        let status = StatusCode::from_u16(469).unwrap_or(StatusCode::NOT_FOUND);
        Self::new(status, "No account is associated with this identity")
    }

    pub fn with_log_detail(mut self, detail: String) -> Self {
        if !detail.is_empty() {
            self.log_detail = Some(detail);
        }
        self
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        if let Some(detail) = self.log_detail.as_ref() {
            debug!(status = %self.status, detail = %detail, "request failed");
        }
        let error_message = extract_error_message(&self.body);
        let mut response = (self.status, Json(self.body)).into_response();
        if let Some(message) = error_message {
            let sanitized = sanitize_error_header(&message);
            if let Ok(value) = HeaderValue::from_str(&sanitized) {
                response.headers_mut().insert("X-Upload-Error", value);
            }
        }
        response
    }
}

fn extract_error_message(body: &Value) -> Option<String> {
    let Value::Object(map) = body else {
        return None;
    };
    map.get("error")
        .and_then(|value| value.as_str())
        .map(|value| value.to_string())
}

fn sanitize_error_header(value: &str) -> String {
    let mut sanitized: String = value
        .chars()
        .filter(|ch| ch.is_ascii() && !ch.is_control())
        .collect();
    sanitized.truncate(200);
    sanitized
}
