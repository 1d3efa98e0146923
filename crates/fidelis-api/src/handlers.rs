use axum::extract::{Multipart, Path, Query, State};
use axum::http::{header, StatusCode};
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::response::{IntoResponse, Response};
use axum::Json;
use futures::stream::{self, Stream, StreamExt};
use serde::Deserialize;
use serde_json::json;
use std::convert::Infallible;
use tokio_stream::wrappers::BroadcastStream;
use tracing::warn;

use fidelis_core::{
    check_compatibility, FidelisError, PriorityBand, SessionStatus, TechnologyCatalog,
    ValidationScope,
};

use crate::error::{ApiError, ApiResult};
use crate::intake::{
    build_behavioral_session, build_session, parse_validate_request, BehavioralRequest,
    ValidateConfig,
};
use crate::reports::{render, ReportFormat};
use crate::state::AppState;

fn accepted(request_id: &str) -> Response {
    (
        StatusCode::ACCEPTED,
        Json(json!({ "request_id": request_id, "status": "accepted" })),
    )
        .into_response()
}

/// POST /api/validate — multipart intake, static (or full) validation.
pub async fn submit_validation(
    State(state): State<AppState>,
    multipart: Multipart,
) -> ApiResult<Response> {
    let session = parse_validate_request(multipart, &state.config.upload).await?;
    let request_id = state
        .scheduler
        .admit(session, PriorityBand::Interactive)
        .await?;
    Ok(accepted(&request_id))
}

/// POST /api/validate/hybrid — multipart static config plus behavioral
/// config; same intake, hybrid scope enforced.
pub async fn submit_hybrid(
    State(state): State<AppState>,
    multipart: Multipart,
) -> ApiResult<Response> {
    let session = parse_validate_request(multipart, &state.config.upload).await?;
    if !session.scope.requires_behavioral() {
        return Err(ApiError::BadRequest(
            "hybrid validation requires a behavioral-capable scope".into(),
        ));
    }
    let request_id = state
        .scheduler
        .admit(session, PriorityBand::Interactive)
        .await?;
    Ok(accepted(&request_id))
}

/// POST /api/behavioral/validate — JSON body, behavioral-only session.
pub async fn submit_behavioral(
    State(state): State<AppState>,
    Json(request): Json<BehavioralRequest>,
) -> ApiResult<Response> {
    let session = build_behavioral_session(request)?;
    let request_id = state
        .scheduler
        .admit(session, PriorityBand::Interactive)
        .await?;
    Ok(accepted(&request_id))
}

fn progress_for(status: SessionStatus) -> u8 {
    match status {
        SessionStatus::Pending => 0,
        SessionStatus::Queued => 10,
        SessionStatus::Processing => 50,
        _ => 100,
    }
}

/// GET /api/validate/{request_id}/status
pub async fn get_status(
    State(state): State<AppState>,
    Path(request_id): Path<String>,
) -> ApiResult<Json<serde_json::Value>> {
    let session = state
        .manager
        .store()
        .load(&request_id)
        .await?
        .ok_or_else(|| FidelisError::NotFound(format!("session {}", request_id)))?;
    Ok(Json(json!({
        "request_id": session.request_id,
        "status": session.status,
        "progress": progress_for(session.status),
        "result_available": session.result.is_some(),
    })))
}

/// GET /api/validate/{request_id}/result — 200 with the unified result,
/// or 202 while the session is still running.
pub async fn get_result(
    State(state): State<AppState>,
    Path(request_id): Path<String>,
) -> ApiResult<Response> {
    let session = state
        .manager
        .store()
        .load(&request_id)
        .await?
        .ok_or_else(|| FidelisError::NotFound(format!("session {}", request_id)))?;
    match &session.result {
        Some(result) => Ok((
            StatusCode::OK,
            Json(json!({ "request_id": session.request_id, "result": result })),
        )
            .into_response()),
        None => Ok((
            StatusCode::ACCEPTED,
            Json(json!({
                "request_id": session.request_id,
                "status": session.status,
                "message": "validation still running",
            })),
        )
            .into_response()),
    }
}

#[derive(Deserialize)]
pub struct ReportQuery {
    #[serde(default)]
    format: Option<String>,
}

/// GET /api/validate/{request_id}/report?format=json|html|md
pub async fn get_report(
    State(state): State<AppState>,
    Path(request_id): Path<String>,
    Query(query): Query<ReportQuery>,
) -> ApiResult<Response> {
    let format = query
        .format
        .as_deref()
        .map(|raw| {
            ReportFormat::parse(raw)
                .ok_or_else(|| ApiError::BadRequest(format!("unknown report format: {}", raw)))
        })
        .transpose()?
        .unwrap_or(ReportFormat::Json);

    let session = state
        .manager
        .store()
        .load(&request_id)
        .await?
        .ok_or_else(|| FidelisError::NotFound(format!("session {}", request_id)))?;
    let result = session
        .result
        .as_ref()
        .ok_or_else(|| FidelisError::NotFound("result not yet available".into()))?;

    let body = render(&session, result, format)?;
    Ok((
        StatusCode::OK,
        [(header::CONTENT_TYPE, format.content_type())],
        body,
    )
        .into_response())
}

/// DELETE /api/validate/{request_id} — cancels a running session, or
/// soft-deletes a terminal one.
pub async fn cancel_or_delete(
    State(state): State<AppState>,
    Path(request_id): Path<String>,
) -> ApiResult<Json<serde_json::Value>> {
    let session = state
        .manager
        .store()
        .load(&request_id)
        .await?
        .ok_or_else(|| FidelisError::NotFound(format!("session {}", request_id)))?;

    if session.status.is_terminal() {
        state.manager.store().soft_delete(&request_id, "api").await?;
        Ok(Json(json!({ "request_id": request_id, "deleted": true })))
    } else {
        state.scheduler.cancel(&request_id).await?;
        Ok(Json(json!({ "request_id": request_id, "status": "cancelled" })))
    }
}

/// GET /api/validate — list non-deleted sessions.
pub async fn list_sessions(
    State(state): State<AppState>,
) -> ApiResult<Json<serde_json::Value>> {
    let sessions = state.manager.store().list().await?;
    let total = sessions.len();
    Ok(Json(json!({ "sessions": sessions, "total": total })))
}

/// GET /api/validate/{request_id}/logs
pub async fn get_logs(
    State(state): State<AppState>,
    Path(request_id): Path<String>,
) -> ApiResult<Json<serde_json::Value>> {
    if state.manager.store().load(&request_id).await?.is_none() {
        return Err(FidelisError::NotFound(format!("session {}", request_id)).into());
    }
    let logs = state.manager.store().logs(&request_id).await?;
    Ok(Json(json!({ "request_id": request_id, "logs": logs })))
}

/// GET /api/validate/{request_id}/events — SSE progress stream with
/// replay-from-start; terminal sessions past the hold window get the
/// stored snapshot instead.
pub async fn progress_events(
    State(state): State<AppState>,
    Path(request_id): Path<String>,
) -> ApiResult<Response> {
    match state.manager.broker().subscribe(&request_id) {
        Some(subscription) => {
            let replay = stream::iter(
                subscription
                    .replay
                    .into_iter()
                    .map(|event| Event::default().json_data(&event).map_err(|_| ())),
            );
            let live = BroadcastStream::new(subscription.live).map(|item| match item {
                Ok(event) => Event::default().json_data(&event).map_err(|_| ()),
                // Lagged: the subscriber was too slow; end the stream.
                Err(err) => {
                    warn!(error = %err, "dropping slow progress subscriber");
                    Err(())
                }
            });
            let stream: std::pin::Pin<
                Box<dyn Stream<Item = std::result::Result<Event, Infallible>> + Send>,
            > = Box::pin(
                replay
                    .chain(live)
                    .take_while(|item| futures::future::ready(item.is_ok()))
                    .map(|item| Ok(item.unwrap_or_else(|_| Event::default()))),
            );
            Ok(Sse::new(stream)
                .keep_alive(KeepAlive::default())
                .into_response())
        }
        None => {
            let session = state
                .manager
                .store()
                .load(&request_id)
                .await?
                .ok_or_else(|| FidelisError::NotFound(format!("session {}", request_id)))?;
            Ok(Json(json!({
                "request_id": session.request_id,
                "status": session.status,
                "terminal_snapshot": true,
                "result_available": session.result.is_some(),
            }))
            .into_response())
        }
    }
}

/// GET /api/technologies
pub async fn technologies() -> Json<TechnologyCatalog> {
    Json(TechnologyCatalog::current())
}

#[derive(Deserialize)]
pub struct CompatibilityRequest {
    source_technology: String,
    target_technology: String,
    scope: ValidationScope,
}

/// POST /api/compatibility
pub async fn compatibility(
    Json(request): Json<CompatibilityRequest>,
) -> Json<serde_json::Value> {
    let report = check_compatibility(
        &request.source_technology,
        &request.target_technology,
        request.scope,
    );
    Json(json!(report))
}

/// GET /api/queue/stats
pub async fn queue_stats(State(state): State<AppState>) -> Json<serde_json::Value> {
    let stats = state.scheduler.stats();
    Json(json!(stats))
}

/// GET /health — aggregate subsystem probes.
pub async fn health(State(state): State<AppState>) -> Json<serde_json::Value> {
    let store_healthy = state.manager.store().healthy().await;
    let cache_stats = state.cache.stats().await;
    let providers = state
        .dispatcher
        .as_ref()
        .map(|d| d.provider_count())
        .unwrap_or(0);
    let stats = state.scheduler.stats();

    let degraded = !store_healthy || (providers == 0) || stats.refusing;
    Json(json!({
        "status": if degraded { "degraded" } else { "healthy" },
        "subsystems": {
            "store": { "healthy": store_healthy },
            "cache": {
                "entries": cache_stats.entries,
                "hit_rate": cache_stats.hit_rate(),
            },
            "llm": { "providers": providers },
            "scheduler": {
                "queue_depth": stats.depth,
                "active_workers": stats.active_workers,
                "refusing": stats.refusing,
            },
        },
    }))
}

/// Used by the CLI's one-shot mode to run a validation without HTTP.
pub async fn admit_config(
    state: &AppState,
    config: ValidateConfig,
    source: fidelis_core::InputBundle,
    target: fidelis_core::InputBundle,
    band: PriorityBand,
) -> ApiResult<String> {
    let session = build_session(config, source, target)?;
    Ok(state.scheduler.admit(session, band).await?)
}
