use std::{collections::HashMap, fmt::Write as _};

use super::core::{MetricsState, METRICS_STATE};

pub(crate) const METRICS_TEXT_CONTENT_TYPE: &str = "text/plain; version=0.0.4; charset=utf-8";

pub(crate) const RELAY_DROP_REASON_OVERSIZED_OUTBOUND: &str = "oversized_outbound";

pub(crate) fn metrics_state() -> &'static MetricsState {
    METRICS_STATE.get_or_init(MetricsState::default)
}

pub(crate) fn render_metrics() -> String {
    let ws_disconnects = metrics_state()
        .ws_disconnects
        .lock()
        .map_or_else(|_| HashMap::new(), |guard| guard.clone());
    let rate_limit_hits = metrics_state()
        .rate_limit_hits
        .lock()
        .map_or_else(|_| HashMap::new(), |guard| guard.clone());
    let relay_events_emitted = metrics_state()
        .relay_events_emitted
        .lock()
        .map_or_else(|_| HashMap::new(), |guard| guard.clone());
    let relay_events_dropped = metrics_state()
        .relay_events_dropped
        .lock()
        .map_or_else(|_| HashMap::new(), |guard| guard.clone());
    let relay_events_parse_rejected = metrics_state()
        .relay_events_parse_rejected
        .lock()
        .map_or_else(|_| HashMap::new(), |guard| guard.clone());

    let mut output = String::new();
    output.push_str(
        "# HELP ember_ws_disconnects_total Count of websocket disconnect events by reason\n",
    );
    output.push_str("# TYPE ember_ws_disconnects_total counter\n");
    let mut ws_entries: Vec<_> = ws_disconnects.into_iter().collect();
    ws_entries.sort_by_key(|(reason, _)| *reason);
    for (reason, value) in ws_entries {
        let _ = writeln!(
            output,
            "ember_ws_disconnects_total{{reason=\"{reason}\"}} {value}"
        );
    }

    output
        .push_str("# HELP ember_rate_limit_hits_total Count of rate-limit rejections by surface\n");
    output.push_str("# TYPE ember_rate_limit_hits_total counter\n");
    let mut rate_entries: Vec<_> = rate_limit_hits.into_iter().collect();
    rate_entries.sort_by_key(|((surface, reason), _)| (*surface, *reason));
    for ((surface, reason), value) in rate_entries {
        let _ = writeln!(
            output,
            "ember_rate_limit_hits_total{{surface=\"{surface}\",reason=\"{reason}\"}} {value}"
        );
    }

    output.push_str(
        "# HELP ember_relay_events_emitted_total Count of emitted relay events by type\n",
    );
    output.push_str("# TYPE ember_relay_events_emitted_total counter\n");
    let mut emitted_entries: Vec<_> = relay_events_emitted.into_iter().collect();
    emitted_entries.sort_by(|(a, _), (b, _)| a.cmp(b));
    for (event_type, value) in emitted_entries {
        let _ = writeln!(
            output,
            "ember_relay_events_emitted_total{{event_type=\"{event_type}\"}} {value}"
        );
    }

    output.push_str(
        "# HELP ember_relay_events_dropped_total Count of dropped relay events by type and reason\n",
    );
    output.push_str("# TYPE ember_relay_events_dropped_total counter\n");
    let mut dropped_entries: Vec<_> = relay_events_dropped.into_iter().collect();
    dropped_entries.sort_by(|((a_event, a_reason), _), ((b_event, b_reason), _)| {
        a_event.cmp(b_event).then(a_reason.cmp(b_reason))
    });
    for ((event_type, reason), value) in dropped_entries {
        let _ = writeln!(
            output,
            "ember_relay_events_dropped_total{{event_type=\"{event_type}\",reason=\"{reason}\"}} {value}"
        );
    }

    output.push_str(
        "# HELP ember_relay_events_parse_rejected_total Count of inbound events rejected during parsing by reason\n",
    );
    output.push_str("# TYPE ember_relay_events_parse_rejected_total counter\n");
    let mut parse_rejected_entries: Vec<_> = relay_events_parse_rejected.into_iter().collect();
    parse_rejected_entries.sort_by(|(a, _), (b, _)| a.cmp(b));
    for (reason, value) in parse_rejected_entries {
        let _ = writeln!(
            output,
            "ember_relay_events_parse_rejected_total{{reason=\"{reason}\"}} {value}"
        );
    }

    output
}

pub(crate) fn record_ws_disconnect(reason: &'static str) {
    if let Ok(mut counters) = metrics_state().ws_disconnects.lock() {
        let entry = counters.entry(reason).or_insert(0);
        *entry += 1;
    }
}

pub(crate) fn record_rate_limit_hit(surface: &'static str, reason: &'static str) {
    if let Ok(mut counters) = metrics_state().rate_limit_hits.lock() {
        let entry = counters.entry((surface, reason)).or_insert(0);
        *entry += 1;
    }
}

pub(crate) fn record_relay_event_emitted(event_type: &str) {
    if let Ok(mut counters) = metrics_state().relay_events_emitted.lock() {
        let entry = counters.entry(event_type.to_owned()).or_insert(0);
        *entry += 1;
    }
}

pub(crate) fn record_relay_event_dropped(event_type: &str, reason: &'static str) {
    if let Ok(mut counters) = metrics_state().relay_events_dropped.lock() {
        let entry = counters
            .entry((event_type.to_owned(), reason.to_owned()))
            .or_insert(0);
        *entry += 1;
    }
}

pub(crate) fn record_relay_event_oversized_outbound(event_type: &str) {
    record_relay_event_dropped(event_type, RELAY_DROP_REASON_OVERSIZED_OUTBOUND);
}

pub(crate) fn record_relay_event_parse_rejected(reason: &'static str) {
    if let Ok(mut counters) = metrics_state().relay_events_parse_rejected.lock() {
        let entry = counters.entry(reason.to_owned()).or_insert(0);
        *entry += 1;
    }
}
