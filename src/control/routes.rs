//! Route handlers (spec §6 endpoint table). Every response is either
//! `{ok:true, ...}` or `{ok:false, error:string}` with a matching HTTP status;
//! sync-operation partial failures additionally carry a `{slotIndex,error}[]`
//! list under `errors` (spec §7 propagation policy).

use crate::config::{ConfigPatch, ResyncMode};
use crate::engine::Engine;
use crate::error::SlotError;
use crate::slot::Mode;
use crate::status;
use crate::sync_ops;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Deserialize;
use serde_json::{json, Value};
use std::collections::HashSet;
use std::sync::Arc;

/// A client- or server-facing failure, rendered as `{ok:false, error}`.
pub struct ApiError {
    status: StatusCode,
    message: String,
}

impl ApiError {
    fn bad_request(message: impl Into<String>) -> Self {
        Self { status: StatusCode::BAD_REQUEST, message: message.into() }
    }

    fn internal(message: impl Into<String>) -> Self {
        Self { status: StatusCode::INTERNAL_SERVER_ERROR, message: message.into() }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status, Json(json!({ "ok": false, "error": self.message }))).into_response()
    }
}

impl From<crate::error::ConfigError> for ApiError {
    fn from(e: crate::error::ConfigError) -> Self {
        match e {
            crate::error::ConfigError::InvalidField { .. } => ApiError::bad_request(e.to_string()),
            other => ApiError::internal(other.to_string()),
        }
    }
}

/// Renders a sync operation's aggregated result: `{ok:true}` on full success,
/// `{ok:false, errors:[{slotIndex,error}]}` with `502` when any connection's
/// work failed (spec §7: one slot's failure never aborts the others, but the
/// operation as a whole is reported as failed).
fn sync_result(errors: Vec<SlotError>) -> Response {
    if errors.is_empty() {
        (StatusCode::OK, Json(json!({ "ok": true }))).into_response()
    } else {
        (StatusCode::BAD_GATEWAY, Json(json!({ "ok": false, "errors": errors }))).into_response()
    }
}

pub async fn get_status(State(engine): State<Arc<Engine>>) -> Json<Value> {
    let cached = engine.last_status.read().await.clone();
    let snapshot = match cached {
        Some(s) => s,
        None => {
            let cfg = engine.config.snapshot().await;
            status::build_idle_snapshot(&engine, &cfg).await
        }
    };
    Json(serde_json::to_value(snapshot).unwrap_or(Value::Null))
}

pub async fn get_config(State(engine): State<Arc<Engine>>) -> Json<Value> {
    let cfg = engine.config.snapshot().await;
    Json(serde_json::to_value(cfg).unwrap_or(Value::Null))
}

pub async fn update_config(
    State(engine): State<Arc<Engine>>,
    Json(patch): Json<ConfigPatch>,
) -> Result<Json<Value>, ApiError> {
    if let Some(new_slots) = &patch.slots {
        let previous = engine.config.snapshot().await;
        for slot in new_slots {
            let prev_base_layer = previous.slots.iter().find(|s| s.id == slot.id).map(|s| s.base_layer);
            if prev_base_layer != Some(slot.base_layer) {
                engine.reset_slot_pair(slot.id, slot.base_layer).await;
            }
        }
    }

    let cfg = engine.config.update(patch).await?;

    let still_referenced: HashSet<(String, u16)> =
        cfg.effective_slots().map(|s| (s.host.clone(), s.port)).collect();
    engine.connections.reconcile(&still_referenced).await;

    Ok(Json(json!({ "ok": true, "config": cfg })))
}

#[derive(Deserialize)]
pub struct ModeBody {
    mode: String,
}

pub async fn set_mode(
    State(engine): State<Arc<Engine>>,
    Json(body): Json<ModeBody>,
) -> Result<Json<Value>, ApiError> {
    let mode = Mode::parse(&body.mode)
        .ok_or_else(|| ApiError::bad_request(format!("invalid mode: {:?}", body.mode)))?;
    *engine.mode.write().await = mode;
    Ok(Json(json!({ "ok": true, "mode": body.mode })))
}

pub async fn preload(State(engine): State<Arc<Engine>>) -> Response {
    sync_result(sync_ops::preload_all(&engine).await)
}

pub async fn start(State(engine): State<Arc<Engine>>) -> Response {
    sync_result(sync_ops::start_all(&engine).await)
}

pub async fn pause(State(engine): State<Arc<Engine>>) -> Response {
    sync_result(sync_ops::pause_all(&engine).await)
}

#[derive(Deserialize, Default)]
pub struct ResyncBody {
    mode: Option<String>,
    frame: Option<i64>,
}

pub async fn resync(
    State(engine): State<Arc<Engine>>,
    body: Option<axum::Json<serde_json::Value>>,
) -> Result<Response, ApiError> {
    let body: ResyncBody = match body {
        Some(axum::Json(v)) => serde_json::from_value(v).unwrap_or_default(),
        None => ResyncBody::default(),
    };
    let cfg = engine.config.snapshot().await;

    let mode = match body.mode.as_deref() {
        Some("cut") => ResyncMode::Cut,
        Some("fade") => ResyncMode::Fade,
        Some(other) => return Err(ApiError::bad_request(format!("invalid resync mode: {other:?}"))),
        None => cfg.resync_mode,
    };

    let tf = match body.frame {
        Some(f) => f,
        None => {
            let clock = engine.clock.read().await;
            clock.target_frame(std::time::Instant::now(), 0)
        }
    };

    Ok(sync_result(sync_ops::resync_all(&engine, mode, tf).await))
}

pub async fn reset_clock(State(engine): State<Arc<Engine>>) -> Json<Value> {
    let mut clock = engine.clock.write().await;
    clock.set_start(std::time::Instant::now(), chrono::Utc::now());
    Json(json!({ "ok": true }))
}
