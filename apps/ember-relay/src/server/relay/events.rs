use ember_protocol::{ChatMessage, FileMetadata, PROTOCOL_VERSION};
use serde::Serialize;

pub(crate) const HISTORY_EVENT: &str = "history";
pub(crate) const MSG_EVENT: &str = "msg";
pub(crate) const MSG_ACK_EVENT: &str = "msg:ack";
pub(crate) const SYSTEM_EVENT: &str = "system";
pub(crate) const PRESENCE_EVENT: &str = "presence";
pub(crate) const TYPING_EVENT: &str = "typing";
pub(crate) const STOP_TYPING_EVENT: &str = "stop-typing";
pub(crate) const FILE_META_EVENT: &str = "file-meta";
pub(crate) const FILE_CHUNK_EVENT: &str = "file-chunk";
pub(crate) const FILE_DONE_EVENT: &str = "file-done";

pub(crate) struct RelayEvent {
    pub(crate) event_type: &'static str,
    pub(crate) payload: String,
}

#[derive(Serialize)]
struct OutboundEnvelope<'a, T: Serialize> {
    v: u16,
    t: &'a str,
    d: T,
}

fn build_event<T: Serialize>(event_type: &'static str, data: T) -> RelayEvent {
    let envelope = OutboundEnvelope {
        v: PROTOCOL_VERSION,
        t: event_type,
        d: data,
    };
    let payload = serde_json::to_string(&envelope)
        .unwrap_or_else(|_| format!(r#"{{"v":{PROTOCOL_VERSION},"t":"{event_type}","d":null}}"#));
    RelayEvent {
        event_type,
        payload,
    }
}

#[derive(Serialize)]
struct PresencePayload {
    count: usize,
}

#[derive(Serialize)]
struct TypingPayload<'a> {
    nick: &'a str,
}

#[derive(Serialize)]
struct FileMetaRelayPayload<'a> {
    from: &'a str,
    meta: &'a FileMetadata,
}

#[derive(Serialize)]
struct FileChunkRelayPayload<'a> {
    from: &'a str,
    #[serde(rename = "fileId")]
    file_id: &'a str,
    seq: u64,
    chunk: &'a str,
}

#[derive(Serialize)]
struct FileDoneRelayPayload<'a> {
    from: &'a str,
    #[serde(rename = "fileId")]
    file_id: &'a str,
}

pub(crate) fn history(messages: &[ChatMessage]) -> RelayEvent {
    build_event(HISTORY_EVENT, messages)
}

pub(crate) fn chat(message: &ChatMessage) -> RelayEvent {
    build_event(MSG_EVENT, message)
}

pub(crate) fn chat_ack(message: &ChatMessage) -> RelayEvent {
    build_event(MSG_ACK_EVENT, message)
}

pub(crate) fn system(text: &str) -> RelayEvent {
    build_event(SYSTEM_EVENT, text)
}

pub(crate) fn presence(count: usize) -> RelayEvent {
    build_event(PRESENCE_EVENT, PresencePayload { count })
}

pub(crate) fn typing(nick: &str) -> RelayEvent {
    build_event(TYPING_EVENT, TypingPayload { nick })
}

pub(crate) fn stop_typing(nick: &str) -> RelayEvent {
    build_event(STOP_TYPING_EVENT, TypingPayload { nick })
}

pub(crate) fn file_meta(from: &str, meta: &FileMetadata) -> RelayEvent {
    build_event(FILE_META_EVENT, FileMetaRelayPayload { from, meta })
}

pub(crate) fn file_chunk(from: &str, file_id: &str, seq: u64, chunk: &str) -> RelayEvent {
    build_event(
        FILE_CHUNK_EVENT,
        FileChunkRelayPayload {
            from,
            file_id,
            seq,
            chunk,
        },
    )
}

pub(crate) fn file_done(from: &str, file_id: &str) -> RelayEvent {
    build_event(FILE_DONE_EVENT, FileDoneRelayPayload { from, file_id })
}
