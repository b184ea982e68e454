use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SessionId(pub String);

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    System,
    User,
    Assistant,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::System => "system",
            Self::User => "user",
            Self::Assistant => "assistant",
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConversationTurn {
    pub role: Role,
    pub content: String,
}

impl ConversationTurn {
    pub fn system(content: impl Into<String>) -> Self {
        Self { role: Role::System, content: content.into() }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self { role: Role::User, content: content.into() }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self { role: Role::Assistant, content: content.into() }
    }
}

/// Bounded, ordered turn log for one session.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConversationHistory {
    turns: Vec<ConversationTurn>,
    max_turns: usize,
}

impl ConversationHistory {
    pub fn new(max_turns: usize) -> Self {
        Self { turns: Vec::new(), max_turns: max_turns.max(2) }
    }

    pub fn with_system(system_prompt: impl Into<String>, max_turns: usize) -> Self {
        let mut history = Self::new(max_turns);
        history.turns.push(ConversationTurn::system(system_prompt));
        history
    }

    pub fn turns(&self) -> &[ConversationTurn] {
        &self.turns
    }

    pub fn len(&self) -> usize {
        self.turns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.turns.is_empty()
    }

    /// Replaces the leading system turn, inserting one if the log has none.
    pub fn set_system(&mut self, content: impl Into<String>) {
        match self.turns.first_mut() {
            Some(turn) if turn.role == Role::System => turn.content = content.into(),
            _ => self.turns.insert(0, ConversationTurn::system(content)),
        }
    }

    pub fn push(&mut self, turn: ConversationTurn) {
        self.turns.push(turn);
        self.truncate();
    }

    /// User utterances from newest to oldest.
    pub fn user_messages_newest_first(&self) -> impl Iterator<Item = &str> {
        self.turns.iter().rev().filter(|turn| turn.role == Role::User).map(|turn| turn.content.as_str())
    }

    /// Drops the oldest non-system turns until the log fits `max_turns`.
    pub fn truncate(&mut self) {
        if self.turns.len() <= self.max_turns {
            return;
        }

        let keep_system = self.turns.first().map(|turn| turn.role == Role::System).unwrap_or(false);
        let overflow = self.turns.len() - self.max_turns;
        let start = usize::from(keep_system);
        self.turns.drain(start..start + overflow);
    }
}

#[cfg(test)]
mod tests {
    use super::{ConversationHistory, ConversationTurn, Role};

    #[test]
    fn truncation_keeps_leading_system_turn() {
        let mut history = ConversationHistory::with_system("persona", 4);
        for index in 0..5 {
            history.push(ConversationTurn::user(format!("u{index}")));
            history.push(ConversationTurn::assistant(format!("a{index}")));
        }

        let turns = history.turns();
        assert_eq!(turns.len(), 4);
        assert_eq!(turns[0].role, Role::System);
        assert_eq!(turns[1].content, "a3");
        assert_eq!(turns[2].content, "u4");
        assert_eq!(turns[3].content, "a4");
    }

    #[test]
    fn truncation_without_system_turn_drops_front() {
        let mut history = ConversationHistory::new(2);
        history.push(ConversationTurn::user("one"));
        history.push(ConversationTurn::assistant("two"));
        history.push(ConversationTurn::user("three"));

        let contents = history.turns().iter().map(|turn| turn.content.as_str()).collect::<Vec<_>>();
        assert_eq!(contents, vec!["two", "three"]);
    }

    #[test]
    fn set_system_replaces_existing_instruction() {
        let mut history = ConversationHistory::with_system("old", 10);
        history.push(ConversationTurn::user("hi"));
        history.set_system("new");

        assert_eq!(history.len(), 2);
        assert_eq!(history.turns()[0].content, "new");
    }

    #[test]
    fn user_messages_are_iterated_newest_first() {
        let mut history = ConversationHistory::with_system("persona", 10);
        history.push(ConversationTurn::user("first"));
        history.push(ConversationTurn::assistant("reply"));
        history.push(ConversationTurn::user("second"));

        let users = history.user_messages_newest_first().collect::<Vec<_>>();
        assert_eq!(users, vec!["second", "first"]);
    }
}
