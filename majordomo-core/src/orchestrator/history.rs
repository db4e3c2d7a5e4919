//! Rolling conversation history between orders.
//!
//! Only completed user/assistant exchanges are kept; the tool traffic that
//! produced an answer stays in the story archive. The buffer is bounded and
//! evicts from the front, so the model always sees the most recent
//! exchanges.

use openai::Message;

/// Maximum number of stored messages (five user/assistant pairs).
const MAX_HISTORY_MESSAGES: usize = 10;

#[derive(Debug, Clone)]
struct StoredMessage {
    role: MessageRole,
    content: String,
}

#[derive(Debug, Clone, Copy)]
enum MessageRole {
    User,
    Assistant,
}

/// Bounded FIFO buffer of recent exchanges.
#[derive(Debug, Default)]
pub struct RollingHistory {
    messages: Vec<StoredMessage>,
}

impl RollingHistory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record one completed exchange, evicting the oldest messages when the
    /// buffer is full.
    pub fn push_exchange(&mut self, order: &str, answer: &str) {
        self.messages.push(StoredMessage {
            role: MessageRole::User,
            content: order.to_string(),
        });
        self.messages.push(StoredMessage {
            role: MessageRole::Assistant,
            content: answer.to_string(),
        });
        while self.messages.len() > MAX_HISTORY_MESSAGES {
            self.messages.remove(0);
        }
    }

    /// The history as API messages, oldest first.
    pub fn messages(&self) -> Vec<Message> {
        self.messages
            .iter()
            .map(|m| match m.role {
                MessageRole::User => Message::user(&m.content),
                MessageRole::Assistant => Message::assistant(&m.content),
            })
            .collect()
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_push_exchange_keeps_order() {
        let mut history = RollingHistory::new();
        history.push_exchange("Turn on the lights", "The lights are on");

        let messages = history.messages();
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[0], Message::user("Turn on the lights"));
        assert_eq!(messages[1], Message::assistant("The lights are on"));
    }

    #[test]
    fn test_history_is_bounded_fifo() {
        let mut history = RollingHistory::new();
        for i in 0..20 {
            history.push_exchange(&format!("order {i}"), &format!("answer {i}"));
        }

        assert_eq!(history.len(), MAX_HISTORY_MESSAGES);

        // The oldest exchanges are gone, the newest survive in order
        let messages = history.messages();
        assert_eq!(messages[0], Message::user("order 15"));
        assert_eq!(messages.last().unwrap(), &Message::assistant("answer 19"));
    }

    #[test]
    fn test_empty_history() {
        let history = RollingHistory::new();
        assert!(history.is_empty());
        assert!(history.messages().is_empty());
    }
}
