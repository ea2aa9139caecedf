use serde::Serialize;

#[derive(Debug, Serialize)]
pub(crate) struct PingResponse {
    pub(crate) status: &'static str,
    #[serde(rename = "statusCode")]
    pub(crate) status_code: u16,
    pub(crate) message: &'static str,
}

#[derive(Debug, Serialize)]
pub(crate) struct CreateRoomResponse {
    pub(crate) room: String,
}

#[derive(Debug, Serialize)]
pub(crate) struct ApiError {
    pub(crate) error: &'static str,
}
