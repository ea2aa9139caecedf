use axum::{
    http::header::CONTENT_TYPE,
    response::{IntoResponse, Response},
    Json,
};
use rand::RngExt;

use super::{
    core::{ROOM_CODE_ALPHABET, ROOM_CODE_LEN},
    metrics::{render_metrics, METRICS_TEXT_CONTENT_TYPE},
    types::{CreateRoomResponse, PingResponse},
};

pub(crate) async fn ping() -> Json<PingResponse> {
    Json(PingResponse {
        status: "ok",
        status_code: 200,
        message: "pong",
    })
}

pub(crate) async fn create_room() -> Json<CreateRoomResponse> {
    Json(CreateRoomResponse { room: room_code() })
}

pub(crate) async fn metrics() -> Response {
    (
        [(CONTENT_TYPE, METRICS_TEXT_CONTENT_TYPE)],
        render_metrics(),
    )
        .into_response()
}

fn room_code() -> String {
    let mut rng = rand::rng();
    (0..ROOM_CODE_LEN)
        .map(|_| char::from(ROOM_CODE_ALPHABET[rng.random_range(0..ROOM_CODE_ALPHABET.len())]))
        .collect()
}
