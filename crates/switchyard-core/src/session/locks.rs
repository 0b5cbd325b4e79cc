//! Per-conversation message locks

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;

/// Serializes message execution within one conversation.
///
/// Hold the guard across `AgentSession::execute`. Other conversations are not
/// affected.
pub type ConversationLock = Arc<tokio::sync::Mutex<()>>;

/// One lock per conversation id, created on first access.
///
/// A lock outlives any number of session recreations for its conversation;
/// only [`ConversationLocks::clear`] drops it.
#[derive(Default)]
pub struct ConversationLocks {
    locks: Mutex<HashMap<String, ConversationLock>>,
}

impl ConversationLocks {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get_lock(&self, conversation_id: &str) -> ConversationLock {
        self.locks
            .lock()
            .entry(conversation_id.to_string())
            .or_insert_with(|| Arc::new(tokio::sync::Mutex::new(())))
            .clone()
    }

    pub fn contains(&self, conversation_id: &str) -> bool {
        self.locks.lock().contains_key(conversation_id)
    }

    pub fn len(&self) -> usize {
        self.locks.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.locks.lock().is_empty()
    }

    pub fn clear(&self) {
        self.locks.lock().clear();
    }
}
