use serde::{Deserialize, Serialize};

/// A relayed chat message as it appears on the wire.
///
/// `id` is server-assigned; `client_id` echoes the sender's optional
/// correlation id so an optimistic local echo can be reconciled against
/// the `msg:ack` carrying the same value.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub id: String,
    #[serde(
        rename = "clientId",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub client_id: Option<String>,
    pub nick: String,
    pub text: String,
    /// Server timestamp, milliseconds since the unix epoch.
    pub ts: i64,
}

/// Declared file-transfer metadata. The relay forwards it verbatim and
/// only enforces the declared-size ceiling and the presence of `id`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileMetadata {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub size: u64,
    #[serde(rename = "type", default)]
    pub mime_type: String,
}
