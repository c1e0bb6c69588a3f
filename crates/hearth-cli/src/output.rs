//! Incremental transcript printing.
//!
//! The terminal is append-only, so instead of redrawing the whole view on
//! every change we print what changed between two consecutive views.

use std::collections::HashSet;

use hearth_app::{MessageView, SessionView};
use hearth_client::{ConnectionState, DeliveryState, MessageId};

/// Lines describing how `next` differs from `prev`.
pub fn changes(prev: &SessionView, next: &SessionView) -> Vec<String> {
    let mut lines = Vec::new();

    if prev.connection != next.connection || prev.fatal_reason != next.fatal_reason {
        lines.push(status_line(next));
    }

    let seen: HashSet<MessageId> = prev.messages.iter().map(|m| m.id).collect();
    let oldest_seen = prev.messages.first().map(|m| m.created_at);
    let is_new = |m: &&MessageView| {
        !seen.contains(&m.id)
            && m.correlation.is_none_or(|token| prev.by_correlation(token).is_none())
    };

    let (earlier, fresh): (Vec<&MessageView>, Vec<&MessageView>) = next
        .messages
        .iter()
        .filter(is_new)
        .partition(|m| oldest_seen.is_some_and(|oldest| m.created_at < oldest));

    if !earlier.is_empty() {
        lines.push("-- earlier messages --".to_string());
        lines.extend(earlier.into_iter().map(message_line));
        lines.push("-- end of earlier messages --".to_string());
    }
    lines.extend(fresh.into_iter().map(message_line));

    for message in &next.messages {
        let Some(token) = message.correlation else { continue };
        let Some(before) = prev.by_correlation(token) else { continue };
        if before.delivery != message.delivery {
            match message.delivery {
                DeliveryState::Failed => {
                    lines.push(format!("! not sent: {} (/retry or /discard)", message.text));
                },
                DeliveryState::Delivered => lines.push(format!("  delivered: {}", message.text)),
                DeliveryState::Pending | DeliveryState::Sent => {},
            }
        }
    }

    if prev.typing_label != next.typing_label {
        if let Some(label) = &next.typing_label {
            lines.push(format!("  {label}"));
        }
    }

    if !prev.disposed && next.disposed {
        lines.push("[left the room]".to_string());
    }
    lines
}

/// Connection status as shown to the user.
pub fn status_line(view: &SessionView) -> String {
    let status = match view.connection {
        ConnectionState::Disconnected => "disconnected",
        ConnectionState::Connecting => "connecting…",
        ConnectionState::Connected => "connected",
        ConnectionState::Reconnecting => "connection lost, reconnecting…",
        ConnectionState::Unauthorized => "unauthorized, use /reconnect <token>",
    };
    match &view.fatal_reason {
        Some(reason) => format!("[{status}: {reason}]"),
        None => format!("[{status}]"),
    }
}

fn message_line(message: &MessageView) -> String {
    let marker = match message.delivery {
        DeliveryState::Pending => " (sending)",
        DeliveryState::Failed => " (failed)",
        DeliveryState::Sent | DeliveryState::Delivered => "",
    };
    format!("{}: {}{marker}", message.sender_name, message.text)
}

#[cfg(test)]
mod tests {
    use hearth_client::CorrelationId;

    use super::*;

    fn remote(id: u64, created_at: u64, name: &str, text: &str) -> MessageView {
        MessageView {
            id: MessageId::Server(id),
            correlation: None,
            sender_id: name.to_lowercase(),
            sender_name: name.to_string(),
            avatar_color: None,
            text: text.to_string(),
            created_at,
            delivery: DeliveryState::Sent,
        }
    }

    fn own(token: u64, id: Option<u64>, created_at: u64, delivery: DeliveryState) -> MessageView {
        let token = CorrelationId(token);
        MessageView {
            id: id.map_or(MessageId::Local(token), MessageId::Server),
            correlation: Some(token),
            sender_id: "ada".to_string(),
            sender_name: "Ada".to_string(),
            avatar_color: None,
            text: "hi all".to_string(),
            created_at,
            delivery,
        }
    }

    fn connected(messages: Vec<MessageView>) -> SessionView {
        SessionView { connection: ConnectionState::Connected, messages, ..SessionView::default() }
    }

    #[test]
    fn unchanged_view_prints_nothing() {
        let view = connected(vec![remote(1, 10, "Grace", "hello")]);
        assert!(changes(&view, &view).is_empty());
    }

    #[test]
    fn initial_connect_and_history() {
        let prev = SessionView::default();
        let next = connected(vec![remote(1, 10, "Grace", "hello"), remote(2, 20, "Alan", "hey")]);

        insta::assert_snapshot!(changes(&prev, &next).join("\n"), @r"
        [connected]
        Grace: hello
        Alan: hey
        ");
    }

    #[test]
    fn confirmation_is_not_printed_twice() {
        let prev = connected(vec![own(7, None, 30, DeliveryState::Pending)]);
        let next = connected(vec![own(7, Some(3), 31, DeliveryState::Sent)]);

        assert!(changes(&prev, &next).is_empty());
    }

    #[test]
    fn failure_and_delivery_are_reported() {
        let prev = connected(vec![own(7, None, 30, DeliveryState::Pending)]);
        let failed = connected(vec![own(7, None, 30, DeliveryState::Failed)]);
        assert_eq!(changes(&prev, &failed), vec!["! not sent: hi all (/retry or /discard)"]);

        let sent = connected(vec![own(7, Some(3), 30, DeliveryState::Sent)]);
        let delivered = connected(vec![own(7, Some(3), 30, DeliveryState::Delivered)]);
        assert_eq!(changes(&sent, &delivered), vec!["  delivered: hi all"]);
    }

    #[test]
    fn older_page_is_grouped() {
        let prev = connected(vec![remote(5, 50, "Grace", "latest")]);
        let next = connected(vec![
            remote(3, 30, "Alan", "first"),
            remote(4, 40, "Grace", "second"),
            remote(5, 50, "Grace", "latest"),
            remote(6, 60, "Alan", "newest"),
        ]);

        insta::assert_snapshot!(changes(&prev, &next).join("\n"), @r"
        -- earlier messages --
        Alan: first
        Grace: second
        -- end of earlier messages --
        Alan: newest
        ");
    }

    #[test]
    fn typing_and_status() {
        let prev = connected(Vec::new());
        let next = SessionView {
            connection: ConnectionState::Unauthorized,
            fatal_reason: Some("token expired".into()),
            typing_label: Some("Grace is typing…".into()),
            ..SessionView::default()
        };

        insta::assert_snapshot!(changes(&prev, &next).join("\n"), @r"
        [unauthorized, use /reconnect <token>: token expired]
          Grace is typing…
        ");
    }

    #[test]
    fn cleared_typing_label_prints_nothing() {
        let prev = SessionView { typing_label: Some("Grace is typing…".into()), ..connected(Vec::new()) };
        let next = connected(Vec::new());
        assert!(changes(&prev, &next).is_empty());
    }
}
