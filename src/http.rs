//! HTTP API surface: status polling, check-in trigger, roster admin,
//! template editing, and broadcast control.

use crate::channel::{Connection, StatusReport};
use crate::db::{self, Pool};
use crate::dispatch::{self, BroadcastConfig, BroadcastControl};
use crate::media::{MediaFetcher, MediaPayload};
use crate::model::{BroadcastRow, BulkReport, GuestRecord, ImportRow};
use crate::recognize::Recognizer;
use crate::{config, phone};
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::routing::{delete, get, post};
use axum::{Json, Router};
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::error;
use uuid::Uuid;

/// Shared application context passed to all handlers.
#[derive(Clone)]
pub struct AppContext {
    pub pool: Pool,
    pub conn: Arc<Connection>,
    pub fetcher: Arc<dyn MediaFetcher>,
    pub recognizer: Arc<dyn Recognizer>,
    pub broadcast: Arc<BroadcastControl>,
    pub cfg: Arc<config::Config>,
}

pub fn router(ctx: AppContext) -> Router {
    Router::new()
        .route("/status", get(status))
        .route("/checkin", post(checkin))
        .route("/guests", get(list_guests))
        .route("/guests/import", post(import_guests))
        .route("/guests/:name", delete(delete_guest))
        .route("/guests/:name/toggle", post(toggle_guest))
        .route("/template", get(get_template).put(set_template))
        .route("/broadcast", post(start_broadcast))
        .route("/broadcast/report", get(broadcast_report))
        .route("/broadcast/cancel", post(cancel_broadcast))
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(ctx)
}

#[derive(Debug, Serialize)]
pub struct ErrorBody {
    pub error: String,
}

type ApiError = (StatusCode, Json<ErrorBody>);

fn internal(err: anyhow::Error) -> ApiError {
    error!(?err, "request failed");
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        Json(ErrorBody {
            error: err.to_string(),
        }),
    )
}

fn bad_request(message: &str) -> ApiError {
    (
        StatusCode::BAD_REQUEST,
        Json(ErrorBody {
            error: message.to_string(),
        }),
    )
}

fn not_found(message: &str) -> ApiError {
    (
        StatusCode::NOT_FOUND,
        Json(ErrorBody {
            error: message.to_string(),
        }),
    )
}

// ---------------------------------------------------------------------------
// Status

async fn status(State(ctx): State<AppContext>) -> Json<StatusReport> {
    Json(ctx.conn.report())
}

// ---------------------------------------------------------------------------
// Check-in

#[derive(Debug, Deserialize)]
pub struct CheckinRequest {
    /// Captured photo, base64-encoded JPEG.
    pub image_b64: String,
    /// Manual-entry fallback: look the guest up by phone instead of calling
    /// the recognizer.
    #[serde(default)]
    pub phone: Option<String>,
}

/// Match status and notification outcome are reported separately so the
/// operator can tell "recognized but message failed" from "recognized and
/// notified" from "not recognized".
#[derive(Debug, Serialize)]
pub struct CheckinResponse {
    pub matched: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub seat: Option<String>,
    pub notified: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl CheckinResponse {
    fn unmatched() -> Self {
        Self {
            matched: false,
            name: None,
            seat: None,
            notified: false,
            error: None,
        }
    }
}

async fn checkin(
    State(ctx): State<AppContext>,
    Json(req): Json<CheckinRequest>,
) -> Result<Json<CheckinResponse>, ApiError> {
    let image = BASE64
        .decode(req.image_b64.as_bytes())
        .map_err(|_| bad_request("image_b64 is not valid base64"))?;

    let identity = match &req.phone {
        Some(raw) => {
            let suffix = phone::suffix10(raw);
            if suffix.is_empty() {
                return Err(bad_request("phone has no digits"));
            }
            match db::find_by_phone_suffix(&ctx.pool, &suffix)
                .await
                .map_err(internal)?
            {
                Some(guest) => guest.name,
                None => return Ok(Json(CheckinResponse::unmatched())),
            }
        }
        None => {
            let recognition = ctx
                .recognizer
                .recognize(&image)
                .await
                .map_err(internal)?;
            match (recognition.matched, recognition.name) {
                (true, Some(name)) => name,
                _ => return Ok(Json(CheckinResponse::unmatched())),
            }
        }
    };

    let template = db::caption_template(&ctx.pool, &ctx.cfg.messages.checkin_caption)
        .await
        .map_err(internal)?;
    let capture = MediaPayload::jpeg(image);

    let outcome = dispatch::dispatch_checkin(
        &ctx.pool,
        &ctx.conn,
        &template,
        &identity,
        Some(&capture),
    )
    .await;

    let response = match outcome {
        Ok(notified) => CheckinResponse {
            matched: true,
            name: Some(notified.guest.name),
            seat: Some(notified.guest.seat),
            notified: true,
            error: None,
        },
        // The identity was recognized either way; the error string tells the
        // operator whether the registry or the channel was at fault.
        Err(err) => CheckinResponse {
            matched: true,
            name: Some(identity),
            seat: None,
            notified: false,
            error: Some(err.to_string()),
        },
    };
    Ok(Json(response))
}

// ---------------------------------------------------------------------------
// Roster admin

#[derive(Debug, Serialize)]
pub struct ImportResponse {
    pub enrolled: u32,
}

async fn import_guests(
    State(ctx): State<AppContext>,
    Json(rows): Json<Vec<ImportRow>>,
) -> Result<Json<ImportResponse>, ApiError> {
    let enrolled = db::upsert_guests(&ctx.pool, &rows, &ctx.cfg.channel.country_code)
        .await
        .map_err(internal)?;
    Ok(Json(ImportResponse { enrolled }))
}

async fn list_guests(
    State(ctx): State<AppContext>,
) -> Result<Json<Vec<GuestRecord>>, ApiError> {
    let guests = db::list_guests(&ctx.pool).await.map_err(internal)?;
    Ok(Json(guests))
}

#[derive(Debug, Serialize)]
pub struct StatusBody {
    pub status: &'static str,
}

async fn delete_guest(
    State(ctx): State<AppContext>,
    Path(name): Path<String>,
) -> Result<Json<StatusBody>, ApiError> {
    if db::delete_guest(&ctx.pool, &name).await.map_err(internal)? {
        Ok(Json(StatusBody { status: "success" }))
    } else {
        Err(not_found("no such guest"))
    }
}

#[derive(Debug, Serialize)]
pub struct ToggleResponse {
    pub checked_in: bool,
}

async fn toggle_guest(
    State(ctx): State<AppContext>,
    Path(name): Path<String>,
) -> Result<Json<ToggleResponse>, ApiError> {
    match db::toggle_checked_in(&ctx.pool, &name)
        .await
        .map_err(internal)?
    {
        Some(checked_in) => Ok(Json(ToggleResponse { checked_in })),
        None => Err(not_found("no such guest")),
    }
}

// ---------------------------------------------------------------------------
// Caption template

#[derive(Debug, Serialize, Deserialize)]
pub struct TemplateBody {
    pub caption_template: String,
}

async fn get_template(
    State(ctx): State<AppContext>,
) -> Result<Json<TemplateBody>, ApiError> {
    let caption_template = db::caption_template(&ctx.pool, &ctx.cfg.messages.checkin_caption)
        .await
        .map_err(internal)?;
    Ok(Json(TemplateBody { caption_template }))
}

async fn set_template(
    State(ctx): State<AppContext>,
    Json(body): Json<TemplateBody>,
) -> Result<Json<TemplateBody>, ApiError> {
    if body.caption_template.trim().is_empty() {
        return Err(bad_request("caption_template must be non-empty"));
    }
    db::set_setting(&ctx.pool, db::CAPTION_TEMPLATE_KEY, &body.caption_template)
        .await
        .map_err(internal)?;
    Ok(Json(body))
}

// ---------------------------------------------------------------------------
// Bulk broadcast

#[derive(Debug, Deserialize)]
pub struct BroadcastRequest {
    /// Template override for this run; falls back to the configured text.
    #[serde(default)]
    pub message: Option<String>,
    pub rows: Vec<BroadcastRow>,
}

#[derive(Debug, Serialize)]
pub struct BroadcastStarted {
    pub status: &'static str,
    pub id: Uuid,
}

async fn start_broadcast(
    State(ctx): State<AppContext>,
    Json(req): Json<BroadcastRequest>,
) -> Result<Json<BroadcastStarted>, ApiError> {
    let Some(report) = ctx.broadcast.begin(req.rows.len()) else {
        return Err((
            StatusCode::CONFLICT,
            Json(ErrorBody {
                error: "a broadcast is already running".into(),
            }),
        ));
    };
    let id = report.id;

    let cfg = BroadcastConfig {
        template: req
            .message
            .filter(|m| !m.trim().is_empty())
            .unwrap_or_else(|| ctx.cfg.messages.broadcast_text.clone()),
        country_code: ctx.cfg.channel.country_code.clone(),
        pause: Duration::from_millis(ctx.cfg.channel.send_interval_ms),
    };

    // Detached: the caller gets an immediate ack and polls the report.
    tokio::spawn(dispatch::run_broadcast(
        req.rows,
        Arc::clone(&ctx.conn),
        Arc::clone(&ctx.fetcher),
        cfg,
        Arc::clone(&ctx.broadcast),
        report,
    ));

    Ok(Json(BroadcastStarted {
        status: "started",
        id,
    }))
}

async fn broadcast_report(
    State(ctx): State<AppContext>,
) -> Result<Json<BulkReport>, ApiError> {
    match ctx.broadcast.latest_report() {
        Some(report) => Ok(Json(report)),
        None => Err(not_found("no broadcast has run yet")),
    }
}

async fn cancel_broadcast(
    State(ctx): State<AppContext>,
) -> Result<Json<StatusBody>, ApiError> {
    if ctx.broadcast.request_stop() {
        Ok(Json(StatusBody {
            status: "cancelling",
        }))
    } else {
        Err((
            StatusCode::CONFLICT,
            Json(ErrorBody {
                error: "no broadcast is running".into(),
            }),
        ))
    }
}
