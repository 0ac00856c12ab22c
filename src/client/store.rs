//! In-memory history store

use std::sync::{Mutex, PoisonError};

use super::{ChatMessage, HistoryStore};
use crate::Result;

#[derive(Default)]
struct State {
    messages: Vec<ChatMessage>,
    client_id: Option<String>,
}

/// History kept for the life of the process
#[derive(Default)]
pub struct MemoryHistory {
    state: Mutex<State>,
}

impl MemoryHistory {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Store preloaded with a client id
    #[must_use]
    pub fn with_client_id(client_id: &str) -> Self {
        Self {
            state: Mutex::new(State {
                messages: Vec::new(),
                client_id: Some(client_id.to_string()),
            }),
        }
    }
}

impl HistoryStore for MemoryHistory {
    fn load_messages(&self) -> Result<Vec<ChatMessage>> {
        let state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        Ok(state.messages.clone())
    }

    fn save_messages(&self, messages: &[ChatMessage]) -> Result<()> {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        state.messages = messages.to_vec();
        Ok(())
    }

    fn load_client_id(&self) -> Result<Option<String>> {
        let state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        Ok(state.client_id.clone())
    }

    fn save_client_id(&self, client_id: &str) -> Result<()> {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        state.client_id = Some(client_id.to_string());
        Ok(())
    }
}
