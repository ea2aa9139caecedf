use std::{sync::Arc, time::Duration};

use anyhow::anyhow;
use axum::{
    extract::DefaultBodyLimit,
    http::{HeaderName, StatusCode},
    response::IntoResponse,
    routing::get,
    Router,
};
use tower::ServiceBuilder;
use tower_governor::{
    governor::GovernorConfigBuilder, key_extractor::SmartIpKeyExtractor, GovernorLayer,
};
use tower_http::{
    request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer},
    timeout::TimeoutLayer,
    trace::TraceLayer,
};

use super::{
    core::{AppConfig, AppState},
    errors::ApiFailure,
    handlers::{create_room, metrics, ping},
    relay::relay_ws,
};

const CREATE_ROOM_WINDOW_SECS: u64 = 60 * 60;

/// Build the axum router with global security middleware.
///
/// # Errors
/// Returns an error if configured relay limits are invalid.
pub fn build_router(config: &AppConfig) -> anyhow::Result<Router> {
    if config.max_relay_event_bytes > ember_protocol::MAX_EVENT_BYTES {
        return Err(anyhow!(
            "relay event limit cannot exceed protocol max of {} bytes",
            ember_protocol::MAX_EVENT_BYTES
        ));
    }
    if config.chat_messages_per_window == 0 {
        return Err(anyhow!("chat rate limit must allow at least 1 message"));
    }
    if config.chat_window.is_zero() || config.file_chunk_window.is_zero() {
        return Err(anyhow!("rate-limit windows must be non-zero"));
    }
    if config.file_chunks_per_window == 0 {
        return Err(anyhow!("chunk rate limit must allow at least 1 chunk"));
    }
    if config.history_cap == 0 {
        return Err(anyhow!("history cap must hold at least 1 message"));
    }
    if config.relay_outbound_queue == 0 {
        return Err(anyhow!("relay outbound queue must hold at least 1 event"));
    }
    if config.create_room_requests_per_hour == 0 {
        return Err(anyhow!(
            "room creation rate limit must allow at least 1 request per hour"
        ));
    }

    let governor_config = Arc::new(
        GovernorConfigBuilder::default()
            .period(Duration::from_secs(60))
            .burst_size(config.rate_limit_requests_per_minute)
            .key_extractor(SmartIpKeyExtractor)
            .finish()
            .ok_or_else(|| anyhow!("invalid governor configuration"))?,
    );
    // Room creation is far rarer than general traffic and gets its own
    // hourly budget per client IP.
    let create_room_governor_config = Arc::new(
        GovernorConfigBuilder::default()
            .period(Duration::from_secs(
                CREATE_ROOM_WINDOW_SECS / u64::from(config.create_room_requests_per_hour),
            ))
            .burst_size(config.create_room_requests_per_hour)
            .key_extractor(SmartIpKeyExtractor)
            .finish()
            .ok_or_else(|| anyhow!("invalid room-creation governor configuration"))?,
    );
    let app_state = AppState::new(config);
    let request_id_header = HeaderName::from_static("x-request-id");
    let governor_layer = GovernorLayer::new(governor_config);

    let create_room_route = Router::new()
        .route("/create-room", get(create_room))
        .layer(
            GovernorLayer::new(create_room_governor_config)
                .error_handler(|_| ApiFailure::RateLimited.into_response()),
        );

    Ok(Router::new()
        .route("/ping", get(ping))
        .route("/metrics", get(metrics))
        .route("/ws", get(relay_ws))
        .merge(create_room_route)
        .fallback(not_found)
        .with_state(app_state)
        .layer(DefaultBodyLimit::max(config.max_body_bytes))
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(PropagateRequestIdLayer::new(request_id_header.clone()))
                .layer(SetRequestIdLayer::new(request_id_header, MakeRequestUuid))
                .layer(TimeoutLayer::with_status_code(
                    StatusCode::REQUEST_TIMEOUT,
                    config.request_timeout,
                ))
                .layer(governor_layer),
        ))
}

async fn not_found() -> ApiFailure {
    ApiFailure::NotFound
}
