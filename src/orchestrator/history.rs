use crate::config::HistorySection;
use crate::types::ConversationTurn;
use std::collections::{HashMap, VecDeque};
use std::sync::{Mutex, MutexGuard};

/// Bounded per-user conversation memory.
#[derive(Debug)]
pub struct ConversationHistory {
    max_turns: usize,
    users: Mutex<HashMap<String, VecDeque<ConversationTurn>>>,
}

impl ConversationHistory {
    pub fn new(max_turns: usize) -> Self {
        Self {
            max_turns,
            users: Mutex::new(HashMap::new()),
        }
    }

    pub fn from_section(section: &HistorySection) -> Self {
        Self::new(section.max_turns)
    }

    /// Append a turn, dropping the oldest beyond `max_turns`.
    pub fn record(&self, user: &str, turn: ConversationTurn) {
        if self.max_turns == 0 {
            return;
        }
        let mut users = self.lock();
        let turns = users.entry(user.to_string()).or_default();
        turns.push_back(turn);
        while turns.len() > self.max_turns {
            turns.pop_front();
        }
    }

    /// The last `count` turns, oldest first.
    pub fn recent(&self, user: &str, count: usize) -> Vec<ConversationTurn> {
        let users = self.lock();
        match users.get(user) {
            Some(turns) => turns
                .iter()
                .skip(turns.len().saturating_sub(count))
                .cloned()
                .collect(),
            None => Vec::new(),
        }
    }

    pub fn len(&self, user: &str) -> usize {
        self.lock().get(user).map(VecDeque::len).unwrap_or(0)
    }

    pub fn clear(&self, user: &str) {
        self.lock().remove(user);
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, VecDeque<ConversationTurn>>> {
        // History is advisory; a poisoned lock still holds usable turns
        self.users.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}
