use std::collections::HashMap;

use tokio::sync::mpsc;
use uuid::Uuid;

use crate::server::metrics::{record_relay_event_dropped, record_relay_event_oversized_outbound};

/// Non-blocking fan-out of one payload to a room's members, optionally
/// excluding the sender. Closed receivers are pruned; members whose
/// outbound queue is full are left for the caller to force-close.
pub(crate) fn dispatch_room_payload(
    members: &mut HashMap<Uuid, mpsc::Sender<String>>,
    payload: &str,
    max_payload_bytes: usize,
    event_type: &'static str,
    exclude: Option<Uuid>,
    slow_connections: &mut Vec<Uuid>,
) -> usize {
    if payload.len() > max_payload_bytes {
        record_relay_event_oversized_outbound(event_type);
        return 0;
    }

    let mut delivered = 0usize;
    members.retain(|connection_id, sender| {
        if exclude == Some(*connection_id) {
            return true;
        }
        match sender.try_send(payload.to_owned()) {
            Ok(()) => {
                delivered += 1;
                true
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                record_relay_event_dropped(event_type, "closed");
                false
            }
            Err(mpsc::error::TrySendError::Full(_)) => {
                record_relay_event_dropped(event_type, "full_queue");
                slow_connections.push(*connection_id);
                false
            }
        }
    });
    delivered
}
