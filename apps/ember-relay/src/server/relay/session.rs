use ember_protocol::ChatMessage;
use tokio::sync::mpsc;
use uuid::Uuid;

use crate::server::core::{RelayState, RoomState};

pub(crate) struct JoinTransition {
    /// Previous room when the join switched rooms; the caller owes it
    /// a departure notice and a presence broadcast.
    pub(crate) departed: Option<String>,
    pub(crate) history: Vec<ChatMessage>,
    pub(crate) nick: String,
}

pub(crate) struct LeaveTransition {
    pub(crate) room: String,
    pub(crate) nick: String,
}

/// Moves a connection into `room`, creating the room on first join and
/// pruning the previous room if the move left it empty. Re-entrant:
/// joining the current room again just refreshes the nickname.
pub(crate) fn join_room(
    state: &mut RelayState,
    connection_id: Uuid,
    outbound: &mpsc::Sender<String>,
    room: &str,
    nick: Option<String>,
    history_cap: usize,
) -> JoinTransition {
    let nick = nick
        .filter(|value| !value.trim().is_empty())
        .unwrap_or_else(|| String::from("anon"));

    let session = state.sessions.entry(connection_id).or_default();
    let previous = session.room.replace(String::from(room));
    session.nick = Some(nick.clone());

    let departed = match previous {
        Some(previous) if previous != room => {
            remove_member(state, &previous, connection_id);
            Some(previous)
        }
        _ => None,
    };

    let room_state = state
        .rooms
        .entry(String::from(room))
        .or_insert_with(|| RoomState::new(history_cap));
    room_state.members.insert(connection_id, outbound.clone());
    let history = room_state.history.snapshot();

    JoinTransition {
        departed,
        history,
        nick,
    }
}

/// Tears down a connection's session. Returns the room it occupied, if
/// any, so the caller can notify the remaining members.
pub(crate) fn leave_room(state: &mut RelayState, connection_id: Uuid) -> Option<LeaveTransition> {
    let session = state.sessions.remove(&connection_id)?;
    let nick = session.display_nick().to_owned();
    let room = session.room?;
    remove_member(state, &room, connection_id);
    Some(LeaveTransition { room, nick })
}

fn remove_member(state: &mut RelayState, room: &str, connection_id: Uuid) {
    if let Some(room_state) = state.rooms.get_mut(room) {
        room_state.members.remove(&connection_id);
        if room_state.members.is_empty() {
            state.rooms.remove(room);
        }
    }
}
