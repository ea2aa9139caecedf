use std::collections::HashMap;

use crate::server::core::RoomState;

/// Live member count for a room, derived from membership rather than
/// kept as a separately mutated counter that could drift.
pub(crate) fn presence_count(rooms: &HashMap<String, RoomState>, room: &str) -> usize {
    rooms.get(room).map_or(0, |state| state.members.len())
}
