mod buffer;
mod config;
mod handlers;
mod response;
mod store;
mod sweeper;
mod types;
mod validate;

use std::{
    path::{Path, PathBuf},
    sync::Arc,
    time::{SystemTime, UNIX_EPOCH},
};

use actix_cors::Cors;
use actix_web::{middleware, web, App, HttpServer};
use grid_core::CollectionConfig;

pub(crate) use buffer::{ClientOrigin, IngestBuffer, IngestOutcome};
pub(crate) use config::{AppState, BufferSettings, IngestPolicy};
pub(crate) use store::{DatasetStore, SessionCatalog};
pub(crate) use types::{
    CatalogCounts, CatalogEntry, CloseReason, ConfigResponse, FlushResponse, HealthResponse,
    IngestResponse, LatestFrameResponse, SessionDetails, SessionListResponse, SessionStats,
    SessionStatsResponse, SessionStatus, SessionSummary,
};

use config::{
    collection_config_from_env, read_env_string, read_env_u64, read_env_usize,
    storage_sizes_from_env, DEFAULT_BIND_ADDR, DEFAULT_DATA_DIR, DEFAULT_JSON_LIMIT_BYTES,
    DEFAULT_SESSION_SWEEP_SECS, DEFAULT_SESSION_TIMEOUT_SECS,
};
use sweeper::spawn_session_sweep_task;

/// Seconds since the Unix epoch.
pub(crate) fn now_unix_s() -> f64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs_f64())
        .unwrap_or(0.0)
}

/// Open the catalog and dataset store under `data_dir` and wire the buffer.
pub(crate) fn build_state(
    data_dir: &Path,
    chunk_size: usize,
    collection: CollectionConfig,
    policy: IngestPolicy,
    settings: BufferSettings,
) -> Result<AppState, String> {
    let catalog = Arc::new(SessionCatalog::open(data_dir)?);
    let store = DatasetStore::open(data_dir, chunk_size, collection, Arc::clone(&catalog))?;
    let buffer = IngestBuffer::new(Arc::new(store), policy, settings);
    Ok(AppState {
        buffer: Arc::new(buffer),
        catalog,
        collection,
        data_dir: data_dir.to_path_buf(),
    })
}

pub(crate) fn configure_routes(cfg: &mut web::ServiceConfig) {
    cfg.route("/ingest", web::post().to(handlers::ingest_frame))
        .route("/config", web::get().to(handlers::get_config))
        .route("/sessions", web::get().to(handlers::list_sessions))
        .route(
            "/sessions/{session_id}/stats",
            web::get().to(handlers::session_stats),
        )
        .route(
            "/sessions/{session_id}/flush",
            web::post().to(handlers::flush_session),
        )
        .route("/health", web::get().to(handlers::health))
        .route("/latest", web::get().to(handlers::latest_frame));
}

#[actix_web::main]
async fn main() -> std::io::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::filter::EnvFilter::from_default_env()
                .add_directive(tracing::Level::INFO.into()),
        )
        .init();

    let bind_addr = read_env_string("API_BIND_ADDR", DEFAULT_BIND_ADDR);
    let data_dir = PathBuf::from(read_env_string("DATA_DIR", DEFAULT_DATA_DIR));
    let (chunk_size, buffer_size) = storage_sizes_from_env();
    let session_timeout_secs = read_env_u64("SESSION_TIMEOUT_SECS", DEFAULT_SESSION_TIMEOUT_SECS);
    let session_sweep_secs = read_env_u64("SESSION_SWEEP_SECS", DEFAULT_SESSION_SWEEP_SECS);
    let json_limit = read_env_usize("JSON_LIMIT_BYTES", DEFAULT_JSON_LIMIT_BYTES);
    let collection = collection_config_from_env();
    let policy = IngestPolicy::from_env(collection.grid);

    tracing::info!(
        "starting polar grid ingest: bind_addr={} data_dir={} grid={}x{}x{} chunk_size={} buffer_size={} session_timeout_secs={} max_velocity={} game_radius=[{}..={}]",
        bind_addr,
        data_dir.display(),
        collection.grid.angular_bins,
        collection.grid.radial_bins,
        collection.grid.channels,
        chunk_size,
        buffer_size,
        session_timeout_secs,
        policy.max_velocity,
        policy.min_game_radius,
        policy.max_game_radius
    );

    let state = build_state(
        &data_dir,
        chunk_size,
        collection,
        policy,
        BufferSettings {
            buffer_size,
            session_timeout_secs,
        },
    )
    .map_err(std::io::Error::other)?;
    spawn_session_sweep_task(Arc::clone(&state.buffer), session_sweep_secs);

    let app_state = state.clone();
    HttpServer::new(move || {
        let cors = Cors::default()
            .allow_any_origin()
            .allow_any_method()
            .allow_any_header()
            .expose_any_header()
            .max_age(3600);

        App::new()
            .app_data(web::Data::new(app_state.clone()))
            .app_data(
                web::JsonConfig::default()
                    .limit(json_limit)
                    .error_handler(response::json_error_handler),
            )
            .wrap(cors)
            .wrap(middleware::Logger::default())
            .configure(configure_routes)
    })
    .bind(bind_addr)?
    .run()
    .await?;

    let buffer = Arc::clone(&state.buffer);
    let closed = tokio::task::spawn_blocking(move || buffer.close_all(CloseReason::Shutdown))
        .await
        .map_err(std::io::Error::other)?;
    tracing::info!(closed, "flushed active sessions on shutdown");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::validate::fixtures::{frame_json, policy};
    use actix_web::{http::StatusCode, test as awtest, App};
    use serde_json::{json, Value};
    use tempfile::TempDir;

    fn test_state(buffer_size: usize) -> (AppState, TempDir) {
        let dir = TempDir::new().unwrap();
        let collection = CollectionConfig {
            grid: policy().expected_grid,
            ..CollectionConfig::default()
        };
        let state = build_state(
            dir.path(),
            8,
            collection,
            policy(),
            BufferSettings {
                buffer_size,
                session_timeout_secs: 30,
            },
        )
        .unwrap();
        (state, dir)
    }

    macro_rules! test_app {
        ($state:expr) => {
            awtest::init_service(
                App::new()
                    .app_data(web::Data::new($state.clone()))
                    .app_data(
                        web::JsonConfig::default().error_handler(response::json_error_handler),
                    )
                    .configure(configure_routes),
            )
            .await
        };
    }

    #[actix_web::test]
    async fn ingest_accepts_valid_frame() {
        let (state, _dir) = test_state(200);
        let app = test_app!(state);

        let req = awtest::TestRequest::post()
            .uri("/ingest")
            .insert_header(("x-forwarded-for", "203.0.113.9, 10.0.0.1"))
            .set_json(frame_json("1700000000000", 0))
            .to_request();
        let resp = awtest::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::OK);

        let body: Value = awtest::read_body_json(resp).await;
        assert_eq!(body["status"], "ok");
        assert_eq!(body["session"], "1700000000000");
        assert_eq!(body["buffered"], 1);

        let summary = state.buffer.summary("1700000000000", std::time::Instant::now());
        assert_eq!(summary.unwrap().client_ip, "203.0.113.9");
    }

    #[actix_web::test]
    async fn ingest_rejects_excess_velocity_with_code() {
        let (state, _dir) = test_state(200);
        let app = test_app!(state);

        let mut frame = frame_json("s1", 0);
        frame["metadata"]["velocity"] = json!(2500.0);
        let req = awtest::TestRequest::post()
            .uri("/ingest")
            .set_json(frame)
            .to_request();
        let resp = awtest::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);

        let body: Value = awtest::read_body_json(resp).await;
        assert_eq!(body["success"], Value::Bool(false));
        assert_eq!(body["error_code"], "velocity_too_high");
        assert_eq!(state.buffer.active_sessions(), 0);
    }

    #[actix_web::test]
    async fn malformed_json_is_invalid_json() {
        let (state, _dir) = test_state(200);
        let app = test_app!(state);

        let req = awtest::TestRequest::post()
            .uri("/ingest")
            .insert_header(("content-type", "application/json"))
            .set_payload("{not json")
            .to_request();
        let resp = awtest::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);

        let body: Value = awtest::read_body_json(resp).await;
        assert_eq!(body["error_code"], "invalid_json");
    }

    #[actix_web::test]
    async fn session_routes_report_and_flush() {
        let (state, dir) = test_state(200);
        let app = test_app!(state);

        for index in 0..3 {
            let req = awtest::TestRequest::post()
                .uri("/ingest")
                .set_json(frame_json("s1", index))
                .to_request();
            assert!(awtest::call_service(&app, req).await.status().is_success());
        }

        let req = awtest::TestRequest::get().uri("/sessions").to_request();
        let body: Value = awtest::call_and_read_body_json(&app, req).await;
        assert_eq!(body["active_sessions"], 1);
        assert_eq!(body["sessions"][0]["buffer_size"], 3);

        let req = awtest::TestRequest::post()
            .uri("/sessions/s1/flush")
            .to_request();
        let body: Value = awtest::call_and_read_body_json(&app, req).await;
        assert_eq!(body["frames_flushed"], 3);
        assert_eq!(body["frames_written"], 3);
        assert!(dir.path().join("alice/session_s1/grids/.zarray").exists());

        let req = awtest::TestRequest::get()
            .uri("/sessions/s1/stats")
            .to_request();
        let body: Value = awtest::call_and_read_body_json(&app, req).await;
        assert_eq!(body["status"], "open");
        assert_eq!(body["valid_frames"], 3);
        assert_eq!(body["validity_rate"], 1.0);
    }

    #[actix_web::test]
    async fn unknown_session_is_not_found() {
        let (state, _dir) = test_state(200);
        let app = test_app!(state);

        let req = awtest::TestRequest::get()
            .uri("/sessions/nope/stats")
            .to_request();
        let resp = awtest::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);

        let req = awtest::TestRequest::post()
            .uri("/sessions/nope/flush")
            .to_request();
        let resp = awtest::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);
        let body: Value = awtest::read_body_json(resp).await;
        assert_eq!(body["error_code"], "session_not_found");
    }

    #[actix_web::test]
    async fn closed_session_stats_come_from_catalog() {
        let (state, _dir) = test_state(200);
        let app = test_app!(state);

        let req = awtest::TestRequest::post()
            .uri("/ingest")
            .set_json(frame_json("old", 0))
            .to_request();
        assert!(awtest::call_service(&app, req).await.status().is_success());
        assert_eq!(state.buffer.close_all(CloseReason::Expired), 1);

        let req = awtest::TestRequest::get()
            .uri("/sessions/old/stats")
            .to_request();
        let body: Value = awtest::call_and_read_body_json(&app, req).await;
        assert_eq!(body["status"], "closed");
        assert_eq!(body["frames_written"], 1);
        assert_eq!(body["close_reason"], "expired");
    }

    #[actix_web::test]
    async fn config_health_and_latest() {
        let (state, _dir) = test_state(200);
        let app = test_app!(state);

        let req = awtest::TestRequest::get().uri("/config").to_request();
        let body: Value = awtest::call_and_read_body_json(&app, req).await;
        assert_eq!(body["status"], "ok");
        assert_eq!(body["config"]["ANGULAR_BINS"], 2);
        assert_eq!(body["config"]["RADIAL_BINS"], 3);
        assert!(body["config"]["EMA_BETA"].is_number());

        let req = awtest::TestRequest::get().uri("/latest").to_request();
        let resp = awtest::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);

        let req = awtest::TestRequest::post()
            .uri("/ingest")
            .set_json(frame_json("s1", 4))
            .to_request();
        assert!(awtest::call_service(&app, req).await.status().is_success());

        let req = awtest::TestRequest::get().uri("/latest").to_request();
        let body: Value = awtest::call_and_read_body_json(&app, req).await;
        assert_eq!(body["frame"]["frameIndex"], 4);

        let req = awtest::TestRequest::get().uri("/health").to_request();
        let body: Value = awtest::call_and_read_body_json(&app, req).await;
        assert_eq!(body["status"], "healthy");
        assert_eq!(body["active_sessions"], 1);
        assert_eq!(body["catalog"]["total"], 0);
    }
}
