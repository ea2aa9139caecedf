use ember_protocol::FileMetadata;
use serde::Deserialize;

#[derive(Debug, Deserialize)]
pub(crate) struct JoinPayload {
    pub(crate) room: String,
    #[serde(default)]
    pub(crate) nick: Option<String>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct ChatPayload {
    #[serde(default)]
    pub(crate) room: Option<String>,
    #[serde(default)]
    pub(crate) text: Option<String>,
    #[serde(default)]
    pub(crate) nick: Option<String>,
    #[serde(rename = "clientId", default)]
    pub(crate) client_id: Option<String>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct RoomPayload {
    #[serde(default)]
    pub(crate) room: Option<String>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct FileMetaPayload {
    #[serde(default)]
    pub(crate) room: Option<String>,
    pub(crate) meta: FileMetadata,
}

#[derive(Debug, Deserialize)]
pub(crate) struct FileChunkPayload {
    #[serde(default)]
    pub(crate) room: Option<String>,
    #[serde(rename = "fileId")]
    pub(crate) file_id: String,
    pub(crate) seq: u64,
    pub(crate) chunk: String,
}

#[derive(Debug, Deserialize)]
pub(crate) struct FileDonePayload {
    #[serde(default)]
    pub(crate) room: Option<String>,
    #[serde(rename = "fileId")]
    pub(crate) file_id: String,
}

/// Inbound client event after shape validation. Field-level guards
/// (empty text, chunk payloads, size ceilings) stay with the handlers.
#[derive(Debug)]
pub(crate) enum ClientEvent {
    Join(JoinPayload),
    Chat(ChatPayload),
    Typing(RoomPayload),
    StopTyping(RoomPayload),
    FileMeta(FileMetaPayload),
    FileChunk(FileChunkPayload),
    FileDone(FileDonePayload),
}

#[derive(Debug, PartialEq, Eq)]
pub(crate) enum IngressParseError {
    UnknownEventType,
    InvalidJoinPayload,
    InvalidChatPayload,
    InvalidTypingPayload,
    InvalidFileMetaPayload,
    InvalidFileChunkPayload,
    InvalidFileDonePayload,
}

impl IngressParseError {
    pub(crate) fn reason(&self) -> &'static str {
        match self {
            Self::UnknownEventType => "unknown_event_type",
            Self::InvalidJoinPayload => "invalid_join_payload",
            Self::InvalidChatPayload => "invalid_chat_payload",
            Self::InvalidTypingPayload => "invalid_typing_payload",
            Self::InvalidFileMetaPayload => "invalid_file_meta_payload",
            Self::InvalidFileChunkPayload => "invalid_file_chunk_payload",
            Self::InvalidFileDonePayload => "invalid_file_done_payload",
        }
    }
}

pub(crate) fn parse_client_event(
    event_type: &str,
    data: serde_json::Value,
) -> Result<ClientEvent, IngressParseError> {
    match event_type {
        "join" => serde_json::from_value(data)
            .map(ClientEvent::Join)
            .map_err(|_| IngressParseError::InvalidJoinPayload),
        "msg" => serde_json::from_value(data)
            .map(ClientEvent::Chat)
            .map_err(|_| IngressParseError::InvalidChatPayload),
        "typing" => serde_json::from_value(data)
            .map(ClientEvent::Typing)
            .map_err(|_| IngressParseError::InvalidTypingPayload),
        "stop-typing" => serde_json::from_value(data)
            .map(ClientEvent::StopTyping)
            .map_err(|_| IngressParseError::InvalidTypingPayload),
        "file-meta" => serde_json::from_value(data)
            .map(ClientEvent::FileMeta)
            .map_err(|_| IngressParseError::InvalidFileMetaPayload),
        "file-chunk" => serde_json::from_value(data)
            .map(ClientEvent::FileChunk)
            .map_err(|_| IngressParseError::InvalidFileChunkPayload),
        "file-done" => serde_json::from_value(data)
            .map(ClientEvent::FileDone)
            .map_err(|_| IngressParseError::InvalidFileDonePayload),
        _ => Err(IngressParseError::UnknownEventType),
    }
}
