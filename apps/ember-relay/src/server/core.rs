use std::{
    collections::HashMap,
    sync::{Arc, Mutex, OnceLock},
    time::{Duration, SystemTime, UNIX_EPOCH},
};

use tokio::sync::{mpsc, watch, RwLock};
use uuid::Uuid;

use super::relay::history::HistoryBuffer;

pub const DEFAULT_JSON_BODY_LIMIT_BYTES: usize = 64 * 1024;
pub const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 10;
pub const DEFAULT_RATE_LIMIT_REQUESTS_PER_MINUTE: u32 = 60;
pub const DEFAULT_CREATE_ROOM_REQUESTS_PER_HOUR: u32 = 10;
pub const DEFAULT_CHAT_MESSAGES_PER_WINDOW: u32 = 12;
pub const DEFAULT_CHAT_WINDOW_SECS: u64 = 10;
pub const DEFAULT_FILE_CHUNKS_PER_WINDOW: u32 = 400;
pub const DEFAULT_FILE_CHUNK_WINDOW_SECS: u64 = 1;
pub const DEFAULT_HISTORY_CAP: usize = 100;
pub const DEFAULT_MAX_TEXT_CHARS: usize = 1000;
pub const DEFAULT_MAX_FILE_BYTES: usize = 50 * 1024 * 1024;
pub const DEFAULT_RELAY_OUTBOUND_QUEUE: usize = 256;
pub const DEFAULT_MAX_RELAY_EVENT_BYTES: usize = ember_protocol::MAX_EVENT_BYTES;

pub(crate) const ROOM_CODE_LEN: usize = 6;
pub(crate) const ROOM_CODE_ALPHABET: &[u8] = b"0123456789abcdefghijklmnopqrstuvwxyz";

pub(crate) const CHAT_THROTTLE_NOTICE: &str =
    "You are sending messages too quickly. Slow down.";
pub(crate) const CHUNK_THROTTLE_NOTICE: &str =
    "You are sending file chunks too quickly. Slow down.";
pub(crate) const FILE_TOO_LARGE_NOTICE: &str = "File too large to relay.";
pub(crate) const FILE_MISSING_ID_NOTICE: &str = "File transfer is missing an id.";

pub(crate) static METRICS_STATE: OnceLock<MetricsState> = OnceLock::new();

#[derive(Default)]
pub(crate) struct MetricsState {
    pub(crate) ws_disconnects: Mutex<HashMap<&'static str, u64>>,
    pub(crate) rate_limit_hits: Mutex<HashMap<(&'static str, &'static str), u64>>,
    pub(crate) relay_events_emitted: Mutex<HashMap<String, u64>>,
    pub(crate) relay_events_dropped: Mutex<HashMap<(String, String), u64>>,
    pub(crate) relay_events_parse_rejected: Mutex<HashMap<String, u64>>,
}

#[derive(Clone, Debug)]
pub struct AppConfig {
    pub max_body_bytes: usize,
    pub request_timeout: Duration,
    pub rate_limit_requests_per_minute: u32,
    pub create_room_requests_per_hour: u32,
    pub chat_messages_per_window: u32,
    pub chat_window: Duration,
    pub file_chunks_per_window: u32,
    pub file_chunk_window: Duration,
    pub history_cap: usize,
    pub max_text_chars: usize,
    pub max_file_bytes: usize,
    pub relay_outbound_queue: usize,
    pub max_relay_event_bytes: usize,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            max_body_bytes: DEFAULT_JSON_BODY_LIMIT_BYTES,
            request_timeout: Duration::from_secs(DEFAULT_REQUEST_TIMEOUT_SECS),
            rate_limit_requests_per_minute: DEFAULT_RATE_LIMIT_REQUESTS_PER_MINUTE,
            create_room_requests_per_hour: DEFAULT_CREATE_ROOM_REQUESTS_PER_HOUR,
            chat_messages_per_window: DEFAULT_CHAT_MESSAGES_PER_WINDOW,
            chat_window: Duration::from_secs(DEFAULT_CHAT_WINDOW_SECS),
            file_chunks_per_window: DEFAULT_FILE_CHUNKS_PER_WINDOW,
            file_chunk_window: Duration::from_secs(DEFAULT_FILE_CHUNK_WINDOW_SECS),
            history_cap: DEFAULT_HISTORY_CAP,
            max_text_chars: DEFAULT_MAX_TEXT_CHARS,
            max_file_bytes: DEFAULT_MAX_FILE_BYTES,
            relay_outbound_queue: DEFAULT_RELAY_OUTBOUND_QUEUE,
            max_relay_event_bytes: DEFAULT_MAX_RELAY_EVENT_BYTES,
        }
    }
}

/// Relay limits snapshotted from [`AppConfig`] at router build time.
#[derive(Clone, Debug)]
pub(crate) struct RuntimeConfig {
    pub(crate) chat_messages_per_window: u32,
    pub(crate) chat_window: Duration,
    pub(crate) file_chunks_per_window: u32,
    pub(crate) file_chunk_window: Duration,
    pub(crate) history_cap: usize,
    pub(crate) max_text_chars: usize,
    pub(crate) max_file_bytes: usize,
    pub(crate) relay_outbound_queue: usize,
    pub(crate) max_relay_event_bytes: usize,
}

#[derive(Clone)]
pub(crate) struct AppState {
    pub(crate) relay: Arc<RwLock<RelayState>>,
    pub(crate) runtime: Arc<RuntimeConfig>,
}

impl AppState {
    pub(crate) fn new(config: &AppConfig) -> Self {
        Self {
            relay: Arc::new(RwLock::new(RelayState::default())),
            runtime: Arc::new(RuntimeConfig {
                chat_messages_per_window: config.chat_messages_per_window,
                chat_window: config.chat_window,
                file_chunks_per_window: config.file_chunks_per_window,
                file_chunk_window: config.file_chunk_window,
                history_cap: config.history_cap,
                max_text_chars: config.max_text_chars,
                max_file_bytes: config.max_file_bytes,
                relay_outbound_queue: config.relay_outbound_queue,
                max_relay_event_bytes: config.max_relay_event_bytes,
            }),
        }
    }
}

/// All mutable relay state behind one lock, so every membership change
/// and the history/presence reads feeding its broadcasts are atomic.
#[derive(Default)]
pub(crate) struct RelayState {
    pub(crate) rooms: HashMap<String, RoomState>,
    pub(crate) sessions: HashMap<Uuid, SessionState>,
    pub(crate) controls: HashMap<Uuid, watch::Sender<ConnectionControl>>,
}

pub(crate) struct RoomState {
    pub(crate) members: HashMap<Uuid, mpsc::Sender<String>>,
    pub(crate) history: HistoryBuffer,
}

impl RoomState {
    pub(crate) fn new(history_cap: usize) -> Self {
        Self {
            members: HashMap::new(),
            history: HistoryBuffer::new(history_cap),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub(crate) struct SessionState {
    pub(crate) room: Option<String>,
    /// Nickname set on join; `None` until then.
    pub(crate) nick: Option<String>,
}

impl SessionState {
    pub(crate) fn display_nick(&self) -> &str {
        self.nick.as_deref().unwrap_or("anon")
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ConnectionControl {
    Open,
    Close,
}

pub(crate) fn now_unix_millis() -> i64 {
    let now = SystemTime::now();
    let millis = now
        .duration_since(UNIX_EPOCH)
        .unwrap_or_else(|_| Duration::from_secs(0))
        .as_millis();
    i64::try_from(millis).unwrap_or(i64::MAX)
}
