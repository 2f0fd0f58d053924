//! Conversation history, passed explicitly into every pipeline call.

use serde::{Deserialize, Serialize};

use crate::cite::Citation;
use crate::llm::ChatMessage;

/// Text used in prompts when there is no prior conversation.
pub const NO_HISTORY: &str = "No previous conversation.";

/// One answered question.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Turn {
    pub question: String,
    pub answer: String,
    #[serde(default)]
    pub citations: Vec<Citation>,
}

/// Ordered question/answer turns for one session.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Conversation {
    turns: Vec<Turn>,
}

impl Conversation {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, turn: Turn) {
        self.turns.push(turn);
    }

    pub fn clear(&mut self) {
        self.turns.clear();
    }

    pub fn is_empty(&self) -> bool {
        self.turns.is_empty()
    }

    pub fn len(&self) -> usize {
        self.turns.len()
    }

    pub fn turns(&self) -> &[Turn] {
        &self.turns
    }

    /// The last `window` turns, oldest first.
    pub fn recent(&self, window: usize) -> &[Turn] {
        let skip = self.turns.len().saturating_sub(window);
        &self.turns[skip..]
    }

    /// The last `window` turns as alternating user/assistant messages.
    pub fn to_messages(&self, window: usize) -> Vec<ChatMessage> {
        self.recent(window)
            .iter()
            .flat_map(|t| {
                [
                    ChatMessage::user(t.question.clone()),
                    ChatMessage::assistant(t.answer.clone()),
                ]
            })
            .collect()
    }

    /// The last `window` turns as numbered text for a system prompt.
    ///
    /// Turns keep their 1-based position in the whole conversation, and a
    /// leading `...` line marks that older turns were left out.
    pub fn format_for_prompt(&self, window: usize) -> String {
        if self.turns.is_empty() || window == 0 {
            return NO_HISTORY.to_string();
        }
        let skipped = self.turns.len().saturating_sub(window);
        let mut out = String::new();
        if skipped > 0 {
            out.push_str("...\n");
        }
        let lines: Vec<String> = self
            .recent(window)
            .iter()
            .enumerate()
            .map(|(i, t)| {
                let n = skipped + i + 1;
                format!("Question {}: {}\nAnswer {}: {}", n, t.question, n, t.answer)
            })
            .collect();
        out.push_str(&lines.join("\n\n"));
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn turn(i: usize) -> Turn {
        Turn {
            question: format!("q{}", i),
            answer: format!("a{}", i),
            citations: Vec::new(),
        }
    }

    #[test]
    fn test_empty_history_text() {
        assert_eq!(Conversation::new().format_for_prompt(3), NO_HISTORY);
    }

    #[test]
    fn test_window_keeps_original_numbers() {
        let mut c = Conversation::new();
        for i in 1..=5 {
            c.push(turn(i));
        }
        let text = c.format_for_prompt(3);
        assert!(text.starts_with("...\nQuestion 3: q3\nAnswer 3: a3"));
        assert!(text.ends_with("Question 5: q5\nAnswer 5: a5"));
        assert!(!text.contains("q2"));
    }

    #[test]
    fn test_short_history_has_no_ellipsis() {
        let mut c = Conversation::new();
        c.push(turn(1));
        assert_eq!(c.format_for_prompt(3), "Question 1: q1\nAnswer 1: a1");
    }

    #[test]
    fn test_to_messages_alternates() {
        let mut c = Conversation::new();
        for i in 1..=4 {
            c.push(turn(i));
        }
        let msgs = c.to_messages(2);
        assert_eq!(msgs.len(), 4);
        assert_eq!(msgs[0], ChatMessage::user("q3"));
        assert_eq!(msgs[3], ChatMessage::assistant("a4"));
        c.clear();
        assert!(c.to_messages(2).is_empty());
    }
}
