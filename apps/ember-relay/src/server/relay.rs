use std::time::{Duration, Instant};

use axum::{
    extract::{
        ws::{CloseFrame, Message, WebSocket, WebSocketUpgrade},
        State,
    },
    response::IntoResponse,
};
use ember_protocol::{parse_envelope, ChatMessage};
use futures_util::{SinkExt, StreamExt};
use tokio::sync::{mpsc, watch};
use ulid::Ulid;
use uuid::Uuid;

use super::{
    core::{
        now_unix_millis, AppState, ConnectionControl, RelayState, SessionState,
        CHAT_THROTTLE_NOTICE, CHUNK_THROTTLE_NOTICE, FILE_MISSING_ID_NOTICE,
        FILE_TOO_LARGE_NOTICE,
    },
    metrics::{
        record_rate_limit_hit, record_relay_event_dropped, record_relay_event_emitted,
        record_relay_event_oversized_outbound, record_relay_event_parse_rejected,
        record_ws_disconnect,
    },
};

pub(crate) mod events;
pub(crate) mod fanout;
pub(crate) mod file_relay;
pub(crate) mod history;
pub(crate) mod ingress;
pub(crate) mod presence;
pub(crate) mod rate_limit;
pub(crate) mod session;

use events::RelayEvent;
use fanout::dispatch_room_payload;
use file_relay::{check_file_meta, chunk_is_well_formed, FileMetaGuard};
use ingress::{
    ChatPayload, ClientEvent, FileChunkPayload, FileDonePayload, FileMetaPayload, JoinPayload,
};
use rate_limit::{ChunkBudget, FixedWindow};

pub(crate) async fn relay_ws(
    State(state): State<AppState>,
    ws: WebSocketUpgrade,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_relay_connection(state, socket))
}

async fn handle_relay_connection(state: AppState, socket: WebSocket) {
    let connection_id = Uuid::new_v4();
    let (mut sink, mut stream) = socket.split();

    let (outbound_tx, mut outbound_rx) =
        mpsc::channel::<String>(state.runtime.relay_outbound_queue);
    let (control_tx, mut control_rx) = watch::channel(ConnectionControl::Open);
    {
        let mut relay = state.relay.write().await;
        relay.sessions.insert(connection_id, SessionState::default());
        relay.controls.insert(connection_id, control_tx);
    }
    tracing::debug!(%connection_id, "relay connection opened");

    let send_task = tokio::spawn(async move {
        let mut ping_interval = tokio::time::interval(Duration::from_secs(30));
        ping_interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = ping_interval.tick() => {
                    if sink.send(Message::Ping(vec![].into())).await.is_err() {
                        break;
                    }
                }
                control_change = control_rx.changed() => {
                    if control_change.is_ok() && *control_rx.borrow() == ConnectionControl::Close {
                        record_ws_disconnect("slow_consumer");
                        let _ = sink
                            .send(Message::Close(Some(CloseFrame {
                                code: 1008,
                                reason: "slow_consumer".into(),
                            })))
                            .await;
                        break;
                    }
                }
                maybe_payload = outbound_rx.recv() => {
                    match maybe_payload {
                        Some(payload) => {
                            if sink.send(Message::Text(payload.into())).await.is_err() {
                                break;
                            }
                        }
                        None => break,
                    }
                }
            }
        }
    });

    // Per-connection throttles live on this task's stack: they die with
    // the connection and never need cross-task coordination.
    let mut chat_window = FixedWindow::new(Instant::now());
    let mut chunk_budget = ChunkBudget::default();
    let mut chunk_reset = tokio::time::interval(state.runtime.file_chunk_window);
    chunk_reset.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
    let mut disconnect_reason = "connection_closed";

    loop {
        tokio::select! {
            _ = chunk_reset.tick() => {
                chunk_budget.reset();
            }
            incoming = stream.next() => {
                let Some(incoming) = incoming else {
                    break;
                };
                let Ok(message) = incoming else {
                    disconnect_reason = "socket_error";
                    break;
                };

                let payload: Vec<u8> = match message {
                    Message::Text(text) => text.as_bytes().to_vec(),
                    Message::Binary(bytes) => bytes.to_vec(),
                    Message::Close(_) => {
                        disconnect_reason = "client_close";
                        break;
                    }
                    Message::Ping(_) | Message::Pong(_) => continue,
                };

                // Malformed traffic is dropped, not disconnected: one bad
                // frame from a flaky client should not tear the room down.
                let Ok(envelope) = parse_envelope(&payload) else {
                    record_relay_event_parse_rejected("invalid_envelope");
                    tracing::debug!(%connection_id, "dropped malformed envelope");
                    continue;
                };

                match ingress::parse_client_event(envelope.t.as_str(), envelope.d) {
                    Ok(event) => {
                        handle_client_event(
                            &state,
                            connection_id,
                            &outbound_tx,
                            &mut chat_window,
                            &mut chunk_budget,
                            event,
                        )
                        .await;
                    }
                    Err(error) => {
                        record_relay_event_parse_rejected(error.reason());
                        tracing::debug!(%connection_id, reason = error.reason(), "dropped client event");
                    }
                }
            }
        }
    }

    record_ws_disconnect(disconnect_reason);
    disconnect_cleanup(&state, connection_id).await;
    send_task.abort();
}

async fn handle_client_event(
    state: &AppState,
    connection_id: Uuid,
    outbound: &mpsc::Sender<String>,
    chat_window: &mut FixedWindow,
    chunk_budget: &mut ChunkBudget,
    event: ClientEvent,
) {
    match event {
        ClientEvent::Join(payload) => handle_join(state, connection_id, outbound, payload).await,
        ClientEvent::Chat(payload) => {
            handle_chat(state, connection_id, outbound, chat_window, payload).await;
        }
        ClientEvent::Typing(payload) => {
            handle_typing(state, connection_id, payload.room, true).await;
        }
        ClientEvent::StopTyping(payload) => {
            handle_typing(state, connection_id, payload.room, false).await;
        }
        ClientEvent::FileMeta(payload) => {
            handle_file_meta(state, connection_id, outbound, payload).await;
        }
        ClientEvent::FileChunk(payload) => {
            handle_file_chunk(state, connection_id, outbound, chunk_budget, payload).await;
        }
        ClientEvent::FileDone(payload) => {
            handle_file_done(state, connection_id, payload).await;
        }
    }
}

async fn handle_join(
    state: &AppState,
    connection_id: Uuid,
    outbound: &mpsc::Sender<String>,
    payload: JoinPayload,
) {
    let room = payload.room;
    if room.trim().is_empty() {
        return;
    }

    let max_payload_bytes = state.runtime.max_relay_event_bytes;
    let mut slow_connections = Vec::new();
    {
        let mut relay = state.relay.write().await;
        let transition = session::join_room(
            &mut relay,
            connection_id,
            outbound,
            &room,
            payload.nick,
            state.runtime.history_cap,
        );

        if let Some(departed) = transition.departed {
            notify_departure(
                &mut relay,
                &departed,
                &transition.nick,
                max_payload_bytes,
                &mut slow_connections,
            );
        }

        if !transition.history.is_empty() {
            send_to_connection(
                outbound,
                &events::history(&transition.history),
                max_payload_bytes,
            );
        }

        let joined = events::system(&format!("{} joined", transition.nick));
        broadcast_to_room(
            &mut relay,
            &room,
            &joined,
            max_payload_bytes,
            Some(connection_id),
            &mut slow_connections,
        );
        broadcast_presence(&mut relay, &room, max_payload_bytes, &mut slow_connections);
    }
    close_slow_connections(state, slow_connections).await;
}

async fn handle_chat(
    state: &AppState,
    connection_id: Uuid,
    outbound: &mpsc::Sender<String>,
    chat_window: &mut FixedWindow,
    payload: ChatPayload,
) {
    let text: String = payload
        .text
        .unwrap_or_default()
        .chars()
        .take(state.runtime.max_text_chars)
        .collect();
    if text.is_empty() {
        return;
    }

    let max_payload_bytes = state.runtime.max_relay_event_bytes;
    let mut slow_connections = Vec::new();
    {
        let mut relay = state.relay.write().await;
        let Some(room) = resolve_room(&relay, connection_id, payload.room) else {
            return;
        };

        if !chat_window.allow(
            state.runtime.chat_messages_per_window,
            state.runtime.chat_window,
            Instant::now(),
        ) {
            record_rate_limit_hit("relay", "chat");
            send_to_connection(outbound, &events::system(CHAT_THROTTLE_NOTICE), max_payload_bytes);
            return;
        }

        let nick = relay
            .sessions
            .get(&connection_id)
            .and_then(|session| session.nick.clone())
            .or(payload.nick)
            .unwrap_or_else(|| String::from("anon"));
        let message = ChatMessage {
            id: Ulid::new().to_string(),
            client_id: payload.client_id,
            nick,
            text,
            ts: now_unix_millis(),
        };

        if let Some(room_state) = relay.rooms.get_mut(&room) {
            room_state.history.append(message.clone());
        }
        send_to_connection(outbound, &events::chat_ack(&message), max_payload_bytes);
        broadcast_to_room(
            &mut relay,
            &room,
            &events::chat(&message),
            max_payload_bytes,
            Some(connection_id),
            &mut slow_connections,
        );
    }
    close_slow_connections(state, slow_connections).await;
}

async fn handle_typing(
    state: &AppState,
    connection_id: Uuid,
    room: Option<String>,
    started: bool,
) {
    let max_payload_bytes = state.runtime.max_relay_event_bytes;
    let mut slow_connections = Vec::new();
    {
        let mut relay = state.relay.write().await;
        let Some(room) = resolve_room(&relay, connection_id, room) else {
            return;
        };
        let nick = session_nick(&relay, connection_id);
        let event = if started {
            events::typing(&nick)
        } else {
            events::stop_typing(&nick)
        };
        broadcast_to_room(
            &mut relay,
            &room,
            &event,
            max_payload_bytes,
            Some(connection_id),
            &mut slow_connections,
        );
    }
    close_slow_connections(state, slow_connections).await;
}

async fn handle_file_meta(
    state: &AppState,
    connection_id: Uuid,
    outbound: &mpsc::Sender<String>,
    payload: FileMetaPayload,
) {
    let max_payload_bytes = state.runtime.max_relay_event_bytes;
    let mut slow_connections = Vec::new();
    {
        let mut relay = state.relay.write().await;
        let Some(room) = resolve_room(&relay, connection_id, payload.room) else {
            return;
        };

        match check_file_meta(&payload.meta, state.runtime.max_file_bytes) {
            FileMetaGuard::RejectMissingId => {
                send_to_connection(
                    outbound,
                    &events::system(FILE_MISSING_ID_NOTICE),
                    max_payload_bytes,
                );
                return;
            }
            FileMetaGuard::RejectTooLarge => {
                send_to_connection(
                    outbound,
                    &events::system(FILE_TOO_LARGE_NOTICE),
                    max_payload_bytes,
                );
                return;
            }
            FileMetaGuard::Relay => {}
        }

        let nick = session_nick(&relay, connection_id);
        broadcast_to_room(
            &mut relay,
            &room,
            &events::file_meta(&nick, &payload.meta),
            max_payload_bytes,
            Some(connection_id),
            &mut slow_connections,
        );
    }
    close_slow_connections(state, slow_connections).await;
}

async fn handle_file_chunk(
    state: &AppState,
    connection_id: Uuid,
    outbound: &mpsc::Sender<String>,
    chunk_budget: &mut ChunkBudget,
    payload: FileChunkPayload,
) {
    if !chunk_is_well_formed(&payload.chunk) {
        return;
    }

    let max_payload_bytes = state.runtime.max_relay_event_bytes;
    let mut slow_connections = Vec::new();
    {
        let mut relay = state.relay.write().await;
        let Some(room) = resolve_room(&relay, connection_id, payload.room) else {
            return;
        };

        if !chunk_budget.allow(state.runtime.file_chunks_per_window) {
            record_rate_limit_hit("relay", "file_chunk");
            if chunk_budget.should_notify_throttle() {
                send_to_connection(
                    outbound,
                    &events::system(CHUNK_THROTTLE_NOTICE),
                    max_payload_bytes,
                );
            }
            return;
        }

        let nick = session_nick(&relay, connection_id);
        broadcast_to_room(
            &mut relay,
            &room,
            &events::file_chunk(&nick, &payload.file_id, payload.seq, &payload.chunk),
            max_payload_bytes,
            Some(connection_id),
            &mut slow_connections,
        );
    }
    close_slow_connections(state, slow_connections).await;
}

async fn handle_file_done(state: &AppState, connection_id: Uuid, payload: FileDonePayload) {
    let max_payload_bytes = state.runtime.max_relay_event_bytes;
    let mut slow_connections = Vec::new();
    {
        let mut relay = state.relay.write().await;
        let Some(room) = resolve_room(&relay, connection_id, payload.room) else {
            return;
        };
        let nick = session_nick(&relay, connection_id);
        broadcast_to_room(
            &mut relay,
            &room,
            &events::file_done(&nick, &payload.file_id),
            max_payload_bytes,
            Some(connection_id),
            &mut slow_connections,
        );
    }
    close_slow_connections(state, slow_connections).await;
}

async fn disconnect_cleanup(state: &AppState, connection_id: Uuid) {
    let max_payload_bytes = state.runtime.max_relay_event_bytes;
    let mut slow_connections = Vec::new();
    {
        let mut relay = state.relay.write().await;
        relay.controls.remove(&connection_id);
        if let Some(transition) = session::leave_room(&mut relay, connection_id) {
            notify_departure(
                &mut relay,
                &transition.room,
                &transition.nick,
                max_payload_bytes,
                &mut slow_connections,
            );
        }
    }
    close_slow_connections(state, slow_connections).await;
    tracing::debug!(%connection_id, "relay connection closed");
}

/// Explicit room from the payload, else the room the session joined.
fn resolve_room(
    relay: &RelayState,
    connection_id: Uuid,
    explicit: Option<String>,
) -> Option<String> {
    explicit.filter(|room| !room.trim().is_empty()).or_else(|| {
        relay
            .sessions
            .get(&connection_id)
            .and_then(|session| session.room.clone())
    })
}

fn session_nick(relay: &RelayState, connection_id: Uuid) -> String {
    relay
        .sessions
        .get(&connection_id)
        .map_or_else(|| String::from("anon"), |session| {
            session.display_nick().to_owned()
        })
}

/// Direct delivery to one connection's outbound queue (acks, history
/// replay, throttle notices). Enforces the same outbound size cap as
/// room fan-out.
fn send_to_connection(
    outbound: &mpsc::Sender<String>,
    event: &RelayEvent,
    max_payload_bytes: usize,
) {
    if event.payload.len() > max_payload_bytes {
        record_relay_event_oversized_outbound(event.event_type);
        return;
    }
    match outbound.try_send(event.payload.clone()) {
        Ok(()) => record_relay_event_emitted(event.event_type),
        Err(mpsc::error::TrySendError::Full(_)) => {
            record_relay_event_dropped(event.event_type, "full_queue");
        }
        Err(mpsc::error::TrySendError::Closed(_)) => {
            record_relay_event_dropped(event.event_type, "closed");
        }
    }
}

fn broadcast_to_room(
    relay: &mut RelayState,
    room: &str,
    event: &RelayEvent,
    max_payload_bytes: usize,
    exclude: Option<Uuid>,
    slow_connections: &mut Vec<Uuid>,
) {
    let Some(room_state) = relay.rooms.get_mut(room) else {
        return;
    };
    let delivered = dispatch_room_payload(
        &mut room_state.members,
        &event.payload,
        max_payload_bytes,
        event.event_type,
        exclude,
        slow_connections,
    );
    if delivered > 0 {
        record_relay_event_emitted(event.event_type);
    }
    // Fan-out prunes closed members; drop the room once nobody is left.
    if room_state.members.is_empty() {
        relay.rooms.remove(room);
    }
}

fn broadcast_presence(
    relay: &mut RelayState,
    room: &str,
    max_payload_bytes: usize,
    slow_connections: &mut Vec<Uuid>,
) {
    let count = presence::presence_count(&relay.rooms, room);
    broadcast_to_room(
        relay,
        room,
        &events::presence(count),
        max_payload_bytes,
        None,
        slow_connections,
    );
}

/// Departure notices go to the room the connection left, after its
/// membership is already gone, so the presence count excludes it.
fn notify_departure(
    relay: &mut RelayState,
    room: &str,
    nick: &str,
    max_payload_bytes: usize,
    slow_connections: &mut Vec<Uuid>,
) {
    let left = events::system(&format!("{nick} left"));
    broadcast_to_room(relay, room, &left, max_payload_bytes, None, slow_connections);
    broadcast_presence(relay, room, max_payload_bytes, slow_connections);
}

async fn close_slow_connections(state: &AppState, slow_connections: Vec<Uuid>) {
    if slow_connections.is_empty() {
        return;
    }
    let relay = state.relay.read().await;
    for connection_id in slow_connections {
        if let Some(control) = relay.controls.get(&connection_id) {
            let _ = control.send(ConnectionControl::Close);
        }
    }
}

#[cfg(test)]
mod tests {
    use ember_protocol::ChatMessage;
    use tokio::sync::mpsc;
    use uuid::Uuid;

    use super::{broadcast_presence, events, resolve_room, send_to_connection, session, session_nick};
    use crate::server::core::RelayState;

    #[test]
    fn resolve_room_prefers_explicit_payload_room() {
        let mut state = RelayState::default();
        let connection_id = Uuid::new_v4();
        let (outbound, _receiver) = mpsc::channel::<String>(8);
        let _ = session::join_room(&mut state, connection_id, &outbound, "joined", None, 100);

        let resolved = resolve_room(&state, connection_id, Some(String::from("explicit")));
        assert_eq!(resolved.as_deref(), Some("explicit"));
    }

    #[test]
    fn resolve_room_falls_back_to_session_room() {
        let mut state = RelayState::default();
        let connection_id = Uuid::new_v4();
        let (outbound, _receiver) = mpsc::channel::<String>(8);
        let _ = session::join_room(&mut state, connection_id, &outbound, "joined", None, 100);

        assert_eq!(
            resolve_room(&state, connection_id, None).as_deref(),
            Some("joined")
        );
        assert_eq!(
            resolve_room(&state, connection_id, Some(String::from("  "))).as_deref(),
            Some("joined")
        );
    }

    #[test]
    fn resolve_room_is_none_before_any_join() {
        let state = RelayState::default();
        assert!(resolve_room(&state, Uuid::new_v4(), None).is_none());
    }

    #[test]
    fn session_nick_defaults_to_anon() {
        let state = RelayState::default();
        assert_eq!(session_nick(&state, Uuid::new_v4()), "anon");
    }

    #[tokio::test]
    async fn oversized_direct_send_is_dropped_before_enqueue() {
        let (outbound, mut receiver) = mpsc::channel::<String>(8);
        let big_text: String = "안".repeat(1000);
        let messages: Vec<ChatMessage> = (0..100_i64)
            .map(|n| ChatMessage {
                id: format!("m{n}"),
                client_id: None,
                nick: String::from("anon"),
                text: big_text.clone(),
                ts: n,
            })
            .collect();
        let replay = events::history(&messages);
        assert!(replay.payload.len() > ember_protocol::MAX_EVENT_BYTES);

        send_to_connection(&outbound, &replay, ember_protocol::MAX_EVENT_BYTES);
        assert!(receiver.try_recv().is_err());

        send_to_connection(
            &outbound,
            &events::system("still open"),
            ember_protocol::MAX_EVENT_BYTES,
        );
        assert!(receiver.try_recv().is_ok());
    }

    #[tokio::test]
    async fn presence_broadcast_reaches_every_member() {
        let mut state = RelayState::default();
        let first = Uuid::new_v4();
        let second = Uuid::new_v4();
        let (first_tx, mut first_rx) = mpsc::channel::<String>(8);
        let (second_tx, mut second_rx) = mpsc::channel::<String>(8);
        let _ = session::join_room(&mut state, first, &first_tx, "abcxyz", None, 100);
        let _ = session::join_room(&mut state, second, &second_tx, "abcxyz", None, 100);

        let mut slow_connections = Vec::new();
        broadcast_presence(&mut state, "abcxyz", 1024, &mut slow_connections);

        let first_payload = first_rx.recv().await.unwrap();
        let second_payload = second_rx.recv().await.unwrap();
        assert!(first_payload.contains(r#""count":2"#));
        assert_eq!(first_payload, second_payload);
        assert!(slow_connections.is_empty());
    }
}
