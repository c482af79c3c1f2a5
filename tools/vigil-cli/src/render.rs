//! Plain-text rendering of daemon snapshot views

use serde_json::Value;
use std::fmt::Write;

/// Status line for a snapshot view, or `None` when there is nothing to flag.
fn status_line(view: &Value) -> Option<String> {
    if let Some(error) = view["error"].as_str() {
        let stale = if view["data"].is_null() { "" } else { " (showing last known data)" };
        return Some(format!("⚠️  {error}{stale}"));
    }
    if view["is_loading"].as_bool() == Some(true) {
        return Some("⏳ loading...".to_string());
    }
    None
}

fn text<'a>(value: &'a Value, field: &str) -> &'a str {
    value[field].as_str().unwrap_or("-")
}

fn rows(view: &Value) -> &[Value] {
    view["data"].as_array().map(Vec::as_slice).unwrap_or(&[])
}

pub fn logs(view: &Value) -> String {
    let mut out = String::new();
    if let Some(status) = status_line(view) {
        let _ = writeln!(out, "{status}");
    }
    let entries = rows(view);
    if entries.is_empty() && view["error"].is_null() {
        out.push_str("No log entries\n");
    }
    for entry in entries {
        let _ = write!(
            out,
            "{} [{:<7}] {}: {}",
            text(entry, "timestamp"),
            text(entry, "log_level").to_uppercase(),
            text(entry, "agent_name"),
            text(entry, "message"),
        );
        if let Some(ms) = entry["duration_ms"].as_i64() {
            let _ = write!(out, " ({ms} ms)");
        }
        out.push('\n');
    }
    out
}

pub fn messages(view: &Value) -> String {
    let mut out = String::new();
    if let Some(status) = status_line(view) {
        let _ = writeln!(out, "{status}");
    }
    let entries = rows(view);
    if entries.is_empty() && view["error"].is_null() {
        out.push_str("No messages\n");
    }
    for message in entries {
        let _ = writeln!(
            out,
            "{} {} -> {} [{}] {} (priority {})",
            text(message, "created_at"),
            text(message, "sender_agent"),
            text(message, "receiver_agent"),
            text(message, "message_type"),
            text(message, "status"),
            message["priority"].as_i64().unwrap_or(0),
        );
        if let Some(error) = message["payload"]["error"].as_str() {
            let _ = writeln!(out, "    error: {error}");
        }
    }
    out
}

pub fn states(view: &Value) -> String {
    let mut out = String::new();
    if let Some(status) = status_line(view) {
        let _ = writeln!(out, "{status}");
    }
    for state in rows(view) {
        let _ = write!(
            out,
            "🤖 {:<24} {:<10} updated {}",
            text(state, "agent_name"),
            text(state, "status"),
            text(state, "updated_at"),
        );
        if let Some(error) = state["last_error"].as_str() {
            let _ = write!(out, "  last error: {error}");
        }
        out.push('\n');
    }
    out
}

pub fn depth(view: &Value) -> String {
    let mut out = String::new();
    let symbol = view["symbol"].as_str().unwrap_or("-");
    let snapshot = &view["snapshot"];

    if let Some(status) = status_line(snapshot) {
        let _ = writeln!(out, "{status}");
    }
    let book = &snapshot["data"];
    if book.is_null() {
        if snapshot["error"].is_null() {
            let _ = writeln!(out, "No order book for {symbol}");
        }
        return out;
    }

    let _ = writeln!(
        out,
        "📈 {symbol}  spread {:.4} ({:.3}%)",
        book["spread"].as_f64().unwrap_or(0.0),
        book["spread_percentage"].as_f64().unwrap_or(0.0),
    );
    let _ = writeln!(out, "{:>14} {:>14} {:>14}", "price", "size", "total");

    let level = |out: &mut String, side: &str, level: &Value| {
        let _ = writeln!(
            out,
            "{side} {:>12.4} {:>14.4} {:>14.4}",
            level["price"].as_f64().unwrap_or(0.0),
            level["size"].as_f64().unwrap_or(0.0),
            level["total"].as_f64().unwrap_or(0.0),
        );
    };
    // Asks printed worst-first so the book reads top to bottom around the spread.
    for ask in book["asks"].as_array().into_iter().flatten().rev() {
        level(&mut out, "A", ask);
    }
    for bid in book["bids"].as_array().into_iter().flatten() {
        level(&mut out, "B", bid);
    }
    out
}

pub fn status(health: &Value, metrics: &Value) -> String {
    let mut out = String::new();
    let _ = writeln!(
        out,
        "📊 {} {} ({})",
        text(health, "service"),
        text(health, "version"),
        text(health, "status"),
    );
    let _ = writeln!(
        out,
        "uptime {}s, {} live timers, {} trigger call(s){}",
        metrics["uptime_seconds"].as_u64().unwrap_or(0),
        metrics["live_timers"].as_u64().unwrap_or(0),
        metrics["trigger_invocations"].as_u64().unwrap_or(0),
        if metrics["triggering"].as_bool() == Some(true) { ", job starting" } else { "" },
    );
    for sub in metrics["subscriptions"].as_array().into_iter().flatten() {
        let stats = &sub["stats"];
        let _ = writeln!(
            out,
            "  {:<40} {:<7} consumers={} fetches={} skipped={} discarded={}{}",
            text(sub, "key"),
            text(sub, "state"),
            sub["consumers"].as_u64().unwrap_or(0),
            stats["fetches_started"].as_u64().unwrap_or(0),
            stats["ticks_skipped"].as_u64().unwrap_or(0),
            stats["results_discarded"].as_u64().unwrap_or(0),
            if sub["in_flight"].as_bool() == Some(true) { " (fetching)" } else { "" },
        );
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn logs_render_level_agent_and_duration() {
        let view = json!({
            "data": [{
                "timestamp": "2025-03-01T10:00:00Z",
                "log_level": "warning",
                "agent_name": "QA.WATCHDOG",
                "message": "late batch",
                "duration_ms": 120
            }],
            "is_loading": false,
            "error": null
        });
        let out = logs(&view);
        assert!(out.contains("[WARNING]"));
        assert!(out.contains("QA.WATCHDOG: late batch (120 ms)"));
    }

    #[test]
    fn stale_data_is_flagged() {
        let view = json!({"data": [], "error": "Transient failure after 3 attempt(s): timeout"});
        assert!(states(&view).contains("showing last known data"));
    }

    #[test]
    fn absent_order_book_is_not_an_error() {
        let view = json!({"symbol": "FOOUSDT", "snapshot": {"data": null, "error": null, "is_loading": false}});
        assert_eq!(depth(&view), "No order book for FOOUSDT\n");
    }

    #[test]
    fn asks_print_above_bids() {
        let view = json!({"symbol": "BTCUSDT", "snapshot": {"data": {
            "spread": 1.0, "spread_percentage": 0.1,
            "bids": [{"price": 99.0, "size": 1.0, "total": 1.0}],
            "asks": [{"price": 100.0, "size": 2.0, "total": 2.0}, {"price": 101.0, "size": 1.0, "total": 3.0}]
        }, "error": null}});
        let out = depth(&view);
        let lines: Vec<&str> = out.lines().collect();
        assert!(lines[2].starts_with("A") && lines[2].contains("101.0000"));
        assert!(lines[3].contains("100.0000"));
        assert!(lines[4].starts_with("B"));
    }
}
