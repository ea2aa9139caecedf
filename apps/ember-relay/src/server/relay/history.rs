use std::collections::VecDeque;

use ember_protocol::ChatMessage;

/// Bounded per-room chat history. Newest at the tail; strict FIFO
/// eviction from the head once the cap is reached.
pub(crate) struct HistoryBuffer {
    items: VecDeque<ChatMessage>,
    cap: usize,
}

impl HistoryBuffer {
    pub(crate) fn new(cap: usize) -> Self {
        Self {
            items: VecDeque::with_capacity(cap.min(64)),
            cap,
        }
    }

    pub(crate) fn append(&mut self, message: ChatMessage) {
        if self.items.len() == self.cap {
            let _ = self.items.pop_front();
        }
        self.items.push_back(message);
    }

    /// Copy of the current contents, oldest first. Callers never
    /// observe later mutation through the returned sequence.
    pub(crate) fn snapshot(&self) -> Vec<ChatMessage> {
        self.items.iter().cloned().collect()
    }
}

#[cfg(test)]
mod tests {
    use ember_protocol::ChatMessage;

    use super::HistoryBuffer;

    fn message(n: usize) -> ChatMessage {
        ChatMessage {
            id: format!("m{n}"),
            client_id: None,
            nick: String::from("anon"),
            text: format!("line {n}"),
            ts: i64::try_from(n).unwrap(),
        }
    }

    #[test]
    fn appends_in_order_below_cap() {
        let mut history = HistoryBuffer::new(100);
        for n in 0..3 {
            history.append(message(n));
        }

        let snapshot = history.snapshot();
        assert_eq!(snapshot.len(), 3);
        assert_eq!(snapshot[0].id, "m0");
        assert_eq!(snapshot[2].id, "m2");
    }

    #[test]
    fn evicts_oldest_first_at_cap() {
        let mut history = HistoryBuffer::new(100);
        for n in 0..150 {
            history.append(message(n));
            assert!(history.snapshot().len() <= 100);
        }

        let snapshot = history.snapshot();
        assert_eq!(snapshot.len(), 100);
        assert_eq!(snapshot.first().map(|m| m.id.as_str()), Some("m50"));
        assert_eq!(snapshot.last().map(|m| m.id.as_str()), Some("m149"));
    }

    #[test]
    fn snapshot_is_detached_from_later_appends() {
        let mut history = HistoryBuffer::new(10);
        history.append(message(0));
        let snapshot = history.snapshot();
        history.append(message(1));

        assert_eq!(snapshot.len(), 1);
        assert_eq!(history.snapshot().len(), 2);
    }

    #[test]
    fn empty_buffer_snapshots_empty() {
        let history = HistoryBuffer::new(10);
        assert!(history.snapshot().is_empty());
    }
}
