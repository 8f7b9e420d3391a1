use std::collections::VecDeque;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TurnRole {
    User,
    Assistant,
}

impl fmt::Display for TurnRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TurnRole::User => write!(f, "Human"),
            TurnRole::Assistant => write!(f, "Assistant"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatTurn {
    pub role: TurnRole,
    pub content: String,
    pub timestamp: DateTime<Utc>,
}

impl ChatTurn {
    pub fn new(role: TurnRole, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
            timestamp: Utc::now(),
        }
    }
}

impl fmt::Display for ChatTurn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.role, self.content)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MemorySummary {
    pub session_id: Option<String>,
    pub total_session_messages: usize,
    pub total_window_messages: usize,
    pub memory_limit: usize,
    pub window_size: usize,
    pub last_update: Option<DateTime<Utc>>,
    pub conversation_active: bool,
}

/// Bounded dialogue state with two independently sized views: the
/// model-facing window holds the last `limit - 1` exchanges, the display
/// log holds the last `limit` turns. The window is deliberately one
/// exchange smaller than the display cap; both evict oldest-first.
///
/// Every operation is infallible: this is plain in-memory state, and a lost
/// update here should degrade the conversation, never crash the session.
#[derive(Debug, Clone)]
pub struct ConversationMemory {
    window_exchanges: usize,
    display_cap: usize,
    window: VecDeque<ChatTurn>,
    session: VecDeque<ChatTurn>,
    session_id: Option<String>,
}

impl ConversationMemory {
    pub fn new(max_conversation_history: usize) -> Self {
        let window_exchanges = max_conversation_history.saturating_sub(1);
        debug!(
            window_exchanges,
            display_cap = max_conversation_history,
            "Initialized conversation memory"
        );

        Self {
            window_exchanges,
            display_cap: max_conversation_history,
            window: VecDeque::new(),
            session: VecDeque::new(),
            session_id: None,
        }
    }

    /// Appends one user turn and its assistant reply as a single commit,
    /// then evicts each log independently back to its cap.
    pub fn add_exchange(&mut self, user_text: &str, assistant_text: &str) {
        let user_turn = ChatTurn::new(TurnRole::User, user_text);
        let assistant_turn = ChatTurn::new(TurnRole::Assistant, assistant_text);

        self.window.push_back(user_turn.clone());
        self.window.push_back(assistant_turn.clone());
        self.session.push_back(user_turn);
        self.session.push_back(assistant_turn);

        self.evict();
        debug!(
            session_messages = self.session.len(),
            "Added message exchange"
        );
    }

    /// Records a user turn whose reply has not been generated yet.
    pub fn add_user_message(&mut self, text: &str) {
        let turn = ChatTurn::new(TurnRole::User, text);
        self.window.push_back(turn.clone());
        self.session.push_back(turn);
        self.evict();
    }

    pub fn add_assistant_message(&mut self, text: &str) {
        let turn = ChatTurn::new(TurnRole::Assistant, text);
        self.window.push_back(turn.clone());
        self.session.push_back(turn);
        self.evict();
    }

    /// Renders the window for the generation prompt, oldest turn first.
    pub fn window_as_text(&self) -> String {
        self.window
            .iter()
            .map(ToString::to_string)
            .collect::<Vec<_>>()
            .join("\n")
    }

    /// The display log, oldest turn first.
    pub fn session_turns(&self) -> Vec<ChatTurn> {
        self.session.iter().cloned().collect()
    }

    pub fn last_user_message(&self) -> Option<&str> {
        self.session
            .iter()
            .rev()
            .find(|turn| turn.role == TurnRole::User)
            .map(|turn| turn.content.as_str())
    }

    pub fn set_session_id(&mut self, session_id: impl Into<String>) {
        self.session_id = Some(session_id.into());
    }

    pub fn summary(&self) -> MemorySummary {
        MemorySummary {
            session_id: self.session_id.clone(),
            total_session_messages: self.session.len(),
            total_window_messages: self.window.len(),
            memory_limit: self.display_cap,
            window_size: self.window_exchanges,
            last_update: self.session.back().map(|turn| turn.timestamp),
            conversation_active: !self.session.is_empty(),
        }
    }

    pub fn clear(&mut self) {
        self.window.clear();
        self.session.clear();
        self.session_id = None;
        debug!("Cleared conversation history");
    }

    /// Replaces the current state by replaying turns as exchanges. A
    /// trailing user turn without a reply is preserved as a pending entry.
    pub fn load_history(&mut self, turns: &[ChatTurn]) {
        self.clear();

        let user_turns: Vec<&ChatTurn> = turns
            .iter()
            .filter(|turn| turn.role == TurnRole::User)
            .collect();
        let assistant_turns: Vec<&ChatTurn> = turns
            .iter()
            .filter(|turn| turn.role == TurnRole::Assistant)
            .collect();

        let pairs = user_turns.len().min(assistant_turns.len());
        for (user_turn, assistant_turn) in user_turns.iter().zip(&assistant_turns).take(pairs) {
            self.add_exchange(&user_turn.content, &assistant_turn.content);
        }

        if user_turns.len() > pairs {
            if let Some(pending) = user_turns.last() {
                self.add_user_message(&pending.content);
            }
        }

        debug!(loaded = turns.len(), "Loaded conversation history");
    }

    fn evict(&mut self) {
        let window_cap = self.window_exchanges.saturating_mul(2);
        while self.window.len() > window_cap {
            self.window.pop_front();
        }
        while self.session.len() > self.display_cap {
            self.session.pop_front();
        }
    }
}
