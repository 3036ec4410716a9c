use std::time::Instant;

use actix_web::{
    http::StatusCode,
    web::{self, Data, Json, Path},
    HttpRequest, HttpResponse, Responder,
};

use crate::response::{json_error_with_code, rejection};
use crate::validate::IncomingFrame;
use crate::{
    now_unix_s, AppState, CatalogCounts, ClientOrigin, ConfigResponse, FlushResponse,
    HealthResponse, IngestOutcome, IngestResponse, LatestFrameResponse, SessionDetails,
    SessionListResponse, SessionStatsResponse, SessionStatus,
};

const SERVER_VERSION: &str = env!("CARGO_PKG_VERSION");

/// First `X-Forwarded-For` hop, then `X-Real-IP`, then the socket peer.
pub(crate) fn client_ip(req: &HttpRequest) -> String {
    let header = |name: &str| {
        req.headers()
            .get(name)
            .and_then(|value| value.to_str().ok())
            .map(str::trim)
            .filter(|value| !value.is_empty())
    };

    if let Some(forwarded) = header("x-forwarded-for") {
        if let Some(first) = forwarded.split(',').next().map(str::trim) {
            if !first.is_empty() {
                return first.to_string();
            }
        }
    }
    if let Some(real_ip) = header("x-real-ip") {
        return real_ip.to_string();
    }
    req.peer_addr()
        .map(|addr| addr.ip().to_string())
        .unwrap_or_else(|| "unknown".to_string())
}

fn internal_error(message: &str) -> HttpResponse {
    json_error_with_code(
        StatusCode::INTERNAL_SERVER_ERROR,
        message,
        Some("internal_error"),
    )
}

pub(crate) async fn ingest_frame(
    state: Data<AppState>,
    req: HttpRequest,
    body: Json<IncomingFrame>,
) -> HttpResponse {
    let origin = ClientOrigin {
        ip: client_ip(&req),
    };
    let buffer = state.buffer.clone();
    let incoming = body.into_inner();

    // A threshold flush writes chunk files; keep it off the async workers.
    let outcome = match web::block(move || buffer.ingest(incoming, &origin)).await {
        Ok(outcome) => outcome,
        Err(e) => {
            tracing::error!("ingest task failed: {e}");
            return internal_error("ingest task failed");
        }
    };

    match outcome {
        IngestOutcome::Accepted {
            session_id,
            buffered,
            flushed,
        } => HttpResponse::Ok().json(IngestResponse {
            success: true,
            status: "ok",
            session: session_id,
            buffered,
            flushed,
        }),
        IngestOutcome::Rejected(reason) => rejection(&reason),
    }
}

pub(crate) async fn get_config(state: Data<AppState>) -> impl Responder {
    HttpResponse::Ok().json(ConfigResponse {
        success: true,
        status: "ok",
        config: state.collection,
        server_version: SERVER_VERSION,
        timestamp: now_unix_s(),
    })
}

pub(crate) async fn list_sessions(state: Data<AppState>) -> impl Responder {
    let sessions = state.buffer.list(Instant::now());
    HttpResponse::Ok().json(SessionListResponse {
        success: true,
        active_sessions: sessions.len(),
        sessions,
    })
}

pub(crate) async fn session_stats(state: Data<AppState>, path: Path<String>) -> HttpResponse {
    let session_id = path.into_inner();

    if let Some(summary) = state.buffer.summary(&session_id, Instant::now()) {
        return HttpResponse::Ok().json(SessionStatsResponse {
            success: true,
            status: SessionStatus::Open,
            details: SessionDetails::Active(summary),
        });
    }

    match state.catalog.get(&session_id) {
        Ok(Some(entry)) => HttpResponse::Ok().json(SessionStatsResponse {
            success: true,
            status: entry.status,
            details: SessionDetails::Closed(entry),
        }),
        Ok(None) => json_error_with_code(
            StatusCode::NOT_FOUND,
            format!("session not found: {session_id}"),
            Some("session_not_found"),
        ),
        Err(e) => {
            tracing::error!(session_id = %session_id, "catalog lookup failed: {e}");
            internal_error("session catalog error")
        }
    }
}

pub(crate) async fn flush_session(state: Data<AppState>, path: Path<String>) -> HttpResponse {
    let session_id = path.into_inner();
    let buffer = state.buffer.clone();
    let lookup_id = session_id.clone();

    let result = match web::block(move || buffer.flush(&lookup_id)).await {
        Ok(result) => result,
        Err(e) => {
            tracing::error!(session_id = %session_id, "flush task failed: {e}");
            return internal_error("flush task failed");
        }
    };

    match result {
        Ok(Some(report)) => HttpResponse::Ok().json(FlushResponse {
            success: true,
            session: session_id,
            frames_flushed: report.frames_flushed,
            frames_written: report.frames_written,
        }),
        Ok(None) => json_error_with_code(
            StatusCode::NOT_FOUND,
            format!("session not active: {session_id}"),
            Some("session_not_found"),
        ),
        Err(e) => {
            tracing::error!(session_id = %session_id, "forced flush failed: {e}");
            json_error_with_code(
                StatusCode::INTERNAL_SERVER_ERROR,
                "flush failed; frames remain buffered",
                Some("flush_failed"),
            )
        }
    }
}

pub(crate) async fn health(state: Data<AppState>) -> impl Responder {
    let (open, closed, total) = match state.catalog.count_by_status() {
        Ok(counts) => counts,
        Err(e) => {
            tracing::error!("health check failed: {e}");
            return internal_error("session catalog error");
        }
    };

    HttpResponse::Ok().json(HealthResponse {
        success: true,
        status: "healthy",
        service: "polar-grid-ingest",
        version: SERVER_VERSION,
        active_sessions: state.buffer.active_sessions(),
        rejected_frames: state.buffer.rejected_frames(),
        catalog: CatalogCounts {
            open,
            closed,
            total,
        },
        data_dir: state.data_dir.display().to_string(),
        timestamp: now_unix_s(),
    })
}

pub(crate) async fn latest_frame(state: Data<AppState>) -> HttpResponse {
    match state.buffer.latest() {
        Some(frame) => HttpResponse::Ok().json(LatestFrameResponse {
            success: true,
            frame,
        }),
        None => json_error_with_code(
            StatusCode::NOT_FOUND,
            "no frames buffered",
            Some("no_frames"),
        ),
    }
}
