#![forbid(unsafe_code)]

use std::net::SocketAddr;
use std::time::Duration;

use ember_relay::{build_router, init_tracing, AppConfig};
use tokio::net::TcpListener;

fn env_usize(name: &str, default: usize) -> anyhow::Result<usize> {
    std::env::var(name).map_or(Ok(default), |value| {
        value
            .parse::<usize>()
            .map_err(|e| anyhow::anyhow!("invalid {name} value {value:?}: {e}"))
    })
}

fn env_u32(name: &str, default: u32) -> anyhow::Result<u32> {
    std::env::var(name).map_or(Ok(default), |value| {
        value
            .parse::<u32>()
            .map_err(|e| anyhow::anyhow!("invalid {name} value {value:?}: {e}"))
    })
}

fn env_secs(name: &str, default: Duration) -> anyhow::Result<Duration> {
    std::env::var(name).map_or(Ok(default), |value| {
        value
            .parse::<u64>()
            .map(Duration::from_secs)
            .map_err(|e| anyhow::anyhow!("invalid {name} value {value:?}: {e}"))
    })
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing();

    let defaults = AppConfig::default();
    let app_config = AppConfig {
        max_body_bytes: env_usize("EMBER_MAX_BODY_BYTES", defaults.max_body_bytes)?,
        request_timeout: env_secs("EMBER_REQUEST_TIMEOUT_SECS", defaults.request_timeout)?,
        rate_limit_requests_per_minute: env_u32(
            "EMBER_RATE_LIMIT_REQUESTS_PER_MINUTE",
            defaults.rate_limit_requests_per_minute,
        )?,
        create_room_requests_per_hour: env_u32(
            "EMBER_CREATE_ROOM_REQUESTS_PER_HOUR",
            defaults.create_room_requests_per_hour,
        )?,
        chat_messages_per_window: env_u32(
            "EMBER_CHAT_MESSAGES_PER_WINDOW",
            defaults.chat_messages_per_window,
        )?,
        chat_window: env_secs("EMBER_CHAT_WINDOW_SECS", defaults.chat_window)?,
        file_chunks_per_window: env_u32(
            "EMBER_FILE_CHUNKS_PER_WINDOW",
            defaults.file_chunks_per_window,
        )?,
        file_chunk_window: env_secs("EMBER_FILE_CHUNK_WINDOW_SECS", defaults.file_chunk_window)?,
        history_cap: env_usize("EMBER_HISTORY_CAP", defaults.history_cap)?,
        max_text_chars: env_usize("EMBER_MAX_TEXT_CHARS", defaults.max_text_chars)?,
        max_file_bytes: env_usize("EMBER_MAX_FILE_BYTES", defaults.max_file_bytes)?,
        relay_outbound_queue: env_usize(
            "EMBER_RELAY_OUTBOUND_QUEUE",
            defaults.relay_outbound_queue,
        )?,
        max_relay_event_bytes: env_usize(
            "EMBER_MAX_RELAY_EVENT_BYTES",
            defaults.max_relay_event_bytes,
        )?,
    };
    let app = build_router(&app_config)?;
    let addr = std::env::var("EMBER_BIND_ADDR")
        .unwrap_or_else(|_| String::from("0.0.0.0:3000"))
        .parse::<SocketAddr>()
        .map_err(|e| anyhow::anyhow!("invalid EMBER_BIND_ADDR: {e}"))?;
    let listener = TcpListener::bind(addr).await?;
    tracing::info!(%addr, "ember-relay listening");

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .await?;
    Ok(())
}
