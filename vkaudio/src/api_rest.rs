//! Endpoints API REST du proxy
//!
//! Ce module définit les handlers HTTP de la recherche, du téléchargement,
//! de l'écoute et de l'amorçage de l'authentification.

use crate::download::Downloader;
use crate::error::VkError;
use crate::media::CHUNK_SIZE;
use crate::models::CaptchaAnswer;
use crate::search::VkClient;
use crate::session::{AuthFailure, AuthOutcome};
use axum::{
    Json, Router,
    body::Body,
    extract::{Path, Query, State},
    http::{HeaderMap, StatusCode, header::HOST},
    response::{IntoResponse, Response},
    routing::{get, post},
};
use serde::Deserialize;
use serde_json::json;
use std::collections::HashMap;
use std::sync::Arc;
use tokio_util::io::ReaderStream;
use tracing::{debug, error};

/// État partagé de l'application
#[derive(Clone)]
pub struct VkState {
    pub client: Arc<VkClient>,
    pub downloader: Arc<Downloader>,
    /// URL publique des liens ; sinon déduite de l'en-tête `Host`
    pub public_base_url: Option<String>,
}

/// Paramètres de recherche
///
/// `page` est lu comme texte pour renvoyer une erreur 400 explicite.
#[derive(Debug, Deserialize)]
pub struct SearchParams {
    #[serde(default)]
    pub q: String,
    pub page: Option<String>,
    pub captcha_sid: Option<String>,
    pub captcha_key: Option<String>,
}

/// Crée le router Axum avec tous les endpoints du proxy
pub fn create_router(state: VkState) -> Router {
    Router::new()
        .route("/search", get(search))
        .route("/dl/{key}/{id}", get(download))
        .route("/stream/{key}/{id}", get(stream))
        .route("/_auth", post(auth))
        .route("/_auth_second_factor", post(auth_second_factor))
        .with_state(state)
}

fn base_url(state: &VkState, headers: &HeaderMap) -> String {
    if let Some(url) = &state.public_base_url {
        return url.clone();
    }

    let host = headers
        .get(HOST)
        .and_then(|h| h.to_str().ok())
        .unwrap_or("localhost");
    let scheme = headers
        .get("x-forwarded-proto")
        .and_then(|h| h.to_str().ok())
        .unwrap_or("http");
    format!("{}://{}", scheme, host)
}

fn error_body(status: StatusCode, message: &str) -> Response {
    let body = json!({
        "success": false,
        "error": message,
        "error_code": status.as_u16(),
    });
    (status, Json(body)).into_response()
}

/// Recherche de morceaux
async fn search(
    State(state): State<VkState>,
    Query(params): Query<SearchParams>,
    headers: HeaderMap,
) -> Result<Response, AppError> {
    let page = match params.page.as_deref().map(str::trim) {
        None | Some("") => 0,
        Some(raw) => match raw.parse::<u32>() {
            Ok(page) => page,
            Err(_) => {
                return Ok(error_body(
                    StatusCode::BAD_REQUEST,
                    "'page' must be a non-negative integer",
                ));
            }
        },
    };

    let captcha = match (params.captcha_sid, params.captcha_key) {
        (Some(captcha_sid), Some(captcha_key)) => Some(CaptchaAnswer {
            captcha_sid,
            captcha_key,
        }),
        _ => None,
    };

    let base = base_url(&state, &headers);
    let items = state
        .client
        .search(&params.q, page, captcha.as_ref(), &base)
        .await?;

    Ok(Json(json!({ "success": true, "items": items })).into_response())
}

/// Téléchargement complet, `Content-Length` connu
async fn download(
    State(state): State<VkState>,
    Path((key, id)): Path<(String, String)>,
) -> Result<Response, AppError> {
    serve(&state, &key, &id, false).await
}

/// Écoute progressive, transfert par blocs
async fn stream(
    State(state): State<VkState>,
    Path((key, id)): Path<(String, String)>,
) -> Result<Response, AppError> {
    serve(&state, &key, &id, true).await
}

async fn serve(state: &VkState, key: &str, id: &str, streaming: bool) -> Result<Response, AppError> {
    let file = state.downloader.resolve(key, id, streaming).await?;
    debug!(
        "Sending {} [streaming={}]: {}",
        file.path.display(),
        streaming,
        file.file_name
    );

    let body = if streaming {
        let reader = tokio::fs::File::open(&file.path).await?;
        Body::from_stream(ReaderStream::with_capacity(reader, CHUNK_SIZE))
    } else {
        Body::from(tokio::fs::read(&file.path).await?)
    };

    Ok((file.headers(streaming), body).into_response())
}

fn outcome_response(outcome: AuthOutcome) -> Result<Response, AppError> {
    match outcome {
        AuthOutcome::Authenticated => {
            Ok(Json(json!({ "success": true, "status": "authenticated" })).into_response())
        }
        AuthOutcome::ChallengeNeeded { fields } => Ok(Json(json!({
            "success": false,
            "status": "challenge_required",
            "fields": fields,
        }))
        .into_response()),
        AuthOutcome::Failed(AuthFailure::UnableToAuthorize) => Err(VkError::UnableToAuthorize.into()),
        AuthOutcome::Failed(AuthFailure::AuthRequired) => Err(VkError::AuthRequired.into()),
    }
}

/// Première étape de l'authentification
async fn auth(State(state): State<VkState>) -> Result<Response, AppError> {
    let outcome = state.client.session().authenticate().await?;
    outcome_response(outcome)
}

/// Seconde étape : valeurs des champs de la vérification en attente
async fn auth_second_factor(
    State(state): State<VkState>,
    Json(fields): Json<HashMap<String, String>>,
) -> Result<Response, AppError> {
    let outcome = state.client.session().complete_challenge(fields).await?;
    outcome_response(outcome)
}

// ============ Gestion des erreurs ============

struct AppError(VkError);

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let code = self.0.error_code();
        let status = StatusCode::from_u16(code).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        if status.is_server_error() {
            error!("Request failed: {}", self.0);
        }

        let mut body = json!({
            "success": false,
            "error": self.0.public_message(),
            "error_code": code,
        });
        match &self.0 {
            VkError::UpstreamRejected {
                captcha: Some(captcha),
                ..
            } => {
                body["captcha_sid"] = json!(captcha.captcha_sid);
                body["captcha_img"] = json!(captcha.captcha_img);
            }
            VkError::ChallengeRequired { fields } => {
                body["fields"] = json!(fields);
            }
            _ => {}
        }

        (status, Json(body)).into_response()
    }
}

impl<E> From<E> for AppError
where
    E: Into<VkError>,
{
    fn from(err: E) -> Self {
        Self(err.into())
    }
}
