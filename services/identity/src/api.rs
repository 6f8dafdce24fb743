use crate::config::ApiConfig;
use crate::image_storage::ValidationError;
use crate::registration::{
    IdentityError, IdentityResponse, IdentityService, ImageInput, RegistrationRequest,
};
use crate::s3_uploader::StorageError;
use anyhow::{Context, Result};
use axum::{
    extract::{rejection::JsonRejection, DefaultBodyLimit, Multipart, Path, State},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{error, info, instrument};

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    pub identity_service: Arc<IdentityService>,
}

/// JSON registration body; the image travels as a base64 data URL
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegisterRequest {
    pub vcard_type: Option<String>,
    pub data: Option<serde_json::Value>,
    pub image_base64: Option<String>,
    /// Required with `imageBase64`
    pub image_name: Option<String>,
    /// Required with `imageBase64`
    pub image_type: Option<String>,
}

impl TryFrom<RegisterRequest> for RegistrationRequest {
    type Error = ValidationError;

    fn try_from(body: RegisterRequest) -> Result<Self, Self::Error> {
        let vcard_type = body
            .vcard_type
            .ok_or(ValidationError::MissingField("vcardType"))?;
        let data = body.data.ok_or(ValidationError::MissingField("data"))?;

        let image = body
            .image_base64
            .filter(|payload| !payload.is_empty())
            .map(|payload| ImageInput::Base64 {
                payload,
                file_name: body.image_name.unwrap_or_default(),
                mime_type: body.image_type.unwrap_or_default(),
            });

        Ok(RegistrationRequest {
            vcard_type,
            data,
            image,
        })
    }
}

/// Error response
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
    pub code: String,
}

type ApiError = (StatusCode, Json<ErrorResponse>);

fn api_error(status: StatusCode, error: impl Into<String>, code: &str) -> ApiError {
    (
        status,
        Json(ErrorResponse {
            error: error.into(),
            code: code.to_string(),
        }),
    )
}

/// Map workflow errors onto HTTP responses
///
/// Storage and database internals are logged, never returned.
fn error_response(e: IdentityError) -> ApiError {
    match e {
        IdentityError::Validation(e) => {
            api_error(StatusCode::BAD_REQUEST, e.to_string(), "VALIDATION_ERROR")
        }
        IdentityError::MissingRequiredField => api_error(
            StatusCode::BAD_REQUEST,
            "Required data missing",
            "MISSING_REQUIRED_FIELD",
        ),
        IdentityError::NotFound(nano_id) => api_error(
            StatusCode::NOT_FOUND,
            format!("Identity not found: {nano_id}"),
            "NOT_FOUND",
        ),
        IdentityError::DuplicateIdentifier(nano_id) => {
            error!(nano_id = %nano_id, "Identifier collision persisted after retry");
            api_error(
                StatusCode::INTERNAL_SERVER_ERROR,
                "Generated identifier already exists, try again",
                "DUPLICATE_IDENTIFIER",
            )
        }
        IdentityError::Storage(StorageError::Backend(detail)) => {
            error!(error = %detail, "Object storage failure");
            api_error(
                StatusCode::BAD_GATEWAY,
                "Object storage request failed",
                "STORAGE_ERROR",
            )
        }
        IdentityError::Storage(e) => {
            api_error(StatusCode::BAD_GATEWAY, e.to_string(), "STORAGE_ERROR")
        }
        IdentityError::Internal(detail) => {
            error!(error = %detail, "Unclassified failure");
            api_error(
                StatusCode::INTERNAL_SERVER_ERROR,
                "Internal server error",
                "INTERNAL_ERROR",
            )
        }
    }
}

/// Map an extractor rejection; an oversized body is a validation failure
fn rejected_body(status: StatusCode, message: String) -> ApiError {
    let code = if status == StatusCode::PAYLOAD_TOO_LARGE {
        "VALIDATION_ERROR"
    } else {
        "INVALID_REQUEST"
    };
    api_error(status, message, code)
}

/// Create the API router
pub fn create_router(state: AppState, config: &ApiConfig) -> Router {
    let cors = if config.cors_enabled {
        if config.cors_origins.is_empty() {
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any)
        } else {
            let origins: Vec<_> = config
                .cors_origins
                .iter()
                .filter_map(|o| o.parse().ok())
                .collect();
            CorsLayer::new()
                .allow_origin(origins)
                .allow_methods(Any)
                .allow_headers(Any)
        }
    } else {
        CorsLayer::new()
    };

    Router::new()
        .route("/health", get(health_check))
        .route("/ready", get(readiness_check))
        .route("/api/v1/identities", post(register))
        .route("/api/v1/identities/upload", post(register_multipart))
        .route("/api/v1/identities/:nano_id", get(lookup))
        .layer(DefaultBodyLimit::max(config.max_body_bytes))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}

/// Health check endpoint
async fn health_check() -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "healthy",
        "service": "identity-service"
    }))
}

/// Readiness check endpoint
async fn readiness_check(State(state): State<AppState>) -> impl IntoResponse {
    match state.identity_service.repository().ping().await {
        Ok(()) => (
            StatusCode::OK,
            Json(serde_json::json!({
                "status": "ready",
                "database": "connected"
            })),
        ),
        Err(e) => {
            error!(error = %e, "Readiness check failed");
            (
                StatusCode::SERVICE_UNAVAILABLE,
                Json(serde_json::json!({
                    "status": "not_ready",
                    "database": "disconnected"
                })),
            )
        }
    }
}

/// Register with a JSON body
#[instrument(skip_all)]
async fn register(
    State(state): State<AppState>,
    body: Result<Json<RegisterRequest>, JsonRejection>,
) -> Result<Json<IdentityResponse>, ApiError> {
    let Json(body) =
        body.map_err(|rejection| rejected_body(rejection.status(), rejection.body_text()))?;

    let request = RegistrationRequest::try_from(body)
        .map_err(|e| error_response(IdentityError::Validation(e)))?;

    state
        .identity_service
        .register(request)
        .await
        .map(Json)
        .map_err(error_response)
}

/// Register with a multipart form: `vcardType`, `data` (JSON text), optional `image` file
#[instrument(skip_all)]
async fn register_multipart(
    State(state): State<AppState>,
    mut multipart: Multipart,
) -> Result<Json<IdentityResponse>, ApiError> {
    let invalid_form = |e: axum::extract::multipart::MultipartError| {
        rejected_body(e.status(), e.body_text())
    };

    let mut vcard_type = None;
    let mut data = None;
    let mut image = None;

    while let Some(field) = multipart.next_field().await.map_err(invalid_form)? {
        let name = field.name().unwrap_or_default().to_string();

        match name.as_str() {
            "vcardType" => vcard_type = Some(field.text().await.map_err(invalid_form)?),
            "data" => {
                let text = field.text().await.map_err(invalid_form)?;
                let value = serde_json::from_str(&text).map_err(|e| {
                    error_response(IdentityError::Validation(ValidationError::InvalidField {
                        field: "data",
                        message: e.to_string(),
                    }))
                })?;
                data = Some(value);
            }
            "image" => {
                let file_name = field.file_name().unwrap_or_default().to_string();
                let content_type = field
                    .content_type()
                    .unwrap_or("application/octet-stream")
                    .to_string();
                let bytes = field.bytes().await.map_err(invalid_form)?;

                // An empty file part means no image
                if !bytes.is_empty() {
                    image = Some(ImageInput::Binary {
                        bytes: bytes.to_vec(),
                        file_name,
                        content_type,
                    });
                }
            }
            _ => {}
        }
    }

    let request = RegistrationRequest {
        vcard_type: vcard_type.ok_or_else(|| {
            error_response(ValidationError::MissingField("vcardType").into())
        })?,
        data: data.ok_or_else(|| error_response(ValidationError::MissingField("data").into()))?,
        image,
    };

    state
        .identity_service
        .register(request)
        .await
        .map(Json)
        .map_err(error_response)
}

/// Look up a record by short identifier
#[instrument(skip(state))]
async fn lookup(
    State(state): State<AppState>,
    Path(nano_id): Path<String>,
) -> Result<Json<IdentityResponse>, ApiError> {
    state
        .identity_service
        .lookup(&nano_id)
        .await
        .map(Json)
        .map_err(error_response)
}

/// Start the API server, returning once `shutdown` resolves
pub async fn start_api_server(
    state: AppState,
    config: &ApiConfig,
    shutdown: impl Future<Output = ()> + Send + 'static,
) -> Result<()> {
    let router = create_router(state, config);
    let addr = format!("{}:{}", config.host, config.port);

    info!(address = %addr, "Starting identity API server");

    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .context("Failed to bind to address")?;

    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown)
        .await
        .context("API server error")?;

    Ok(())
}
