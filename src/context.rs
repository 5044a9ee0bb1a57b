//! Conversation context persisted through a [`MemoryStore`].

use crate::error::StepError;
use crate::memory::{MemoryStore, RememberOptions};
use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::sync::Arc;
use tracing::debug;

/// A sensible `count` for [`ContextManager::recent_messages`].
pub const DEFAULT_RECENT_MESSAGES: usize = 10;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContextMessage {
    pub role: String,
    pub content: String,
    pub timestamp: DateTime<Utc>,
}

/// Everything saved under a context id.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ContextData {
    #[serde(default)]
    pub messages: Vec<ContextMessage>,
    #[serde(default)]
    pub metadata: Map<String, Value>,
    #[serde(default)]
    pub state: Map<String, Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ContextSummary {
    pub message_count: usize,
    pub last_message_time: Option<DateTime<Utc>>,
    pub metadata: Map<String, Value>,
}

/// Keeps one context in memory and writes the whole of it back to the store
/// after every change, as kind `"context"` tagged `["context", id]`.
pub struct ContextManager {
    store: Arc<MemoryStore>,
    id: String,
    context: ContextData,
}

impl ContextManager {
    /// Starts empty; call [`initialize`](Self::initialize) to pick up a
    /// previously saved context.
    pub fn new(store: Arc<MemoryStore>, id: impl Into<String>) -> Self {
        Self {
            store,
            id: id.into(),
            context: ContextData::default(),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn context(&self) -> &ContextData {
        &self.context
    }

    /// Replaces the in-memory context with the saved one, if any.
    pub fn initialize(&mut self) -> Result<(), StepError> {
        if let Some(saved) = self.store.recall::<ContextData>(&self.id)? {
            debug!(context = %self.id, messages = saved.messages.len(), "context restored");
            self.context = saved;
        }
        Ok(())
    }

    pub fn add_message(&mut self, role: impl Into<String>, content: impl Into<String>) -> Result<(), StepError> {
        self.context.messages.push(ContextMessage {
            role: role.into(),
            content: content.into(),
            timestamp: Utc::now(),
        });
        self.save()
    }

    /// Shallow merge: top-level keys in `metadata` overwrite existing ones.
    pub fn update_metadata(&mut self, metadata: Map<String, Value>) -> Result<(), StepError> {
        self.context.metadata.extend(metadata);
        self.save()
    }

    pub fn set_state<T: Serialize>(&mut self, key: impl Into<String>, value: &T) -> Result<(), StepError> {
        let value = serde_json::to_value(value).map_err(|e| StepError::invalid(e.to_string()))?;
        self.context.state.insert(key.into(), value);
        self.save()
    }

    /// `Ok(None)` when the key was never set.
    pub fn get_state<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>, StepError> {
        let Some(value) = self.context.state.get(key) else {
            return Ok(None);
        };
        T::deserialize(value)
            .map(Some)
            .map_err(|e| StepError::invalid(format!("context state {key}: {e}")))
    }

    /// The last `count` messages, oldest first.
    pub fn recent_messages(&self, count: usize) -> &[ContextMessage] {
        let messages = &self.context.messages;
        &messages[messages.len().saturating_sub(count)..]
    }

    pub fn summarize(&self) -> ContextSummary {
        ContextSummary {
            message_count: self.context.messages.len(),
            last_message_time: self.context.messages.last().map(|m| m.timestamp),
            metadata: self.context.metadata.clone(),
        }
    }

    /// Empties the context and saves the empty value.
    pub fn clear(&mut self) -> Result<(), StepError> {
        self.context = ContextData::default();
        self.save()
    }

    fn save(&self) -> Result<(), StepError> {
        self.store.remember(
            &self.id,
            &self.context,
            RememberOptions::default().kind("context").tag("context").tag(&self.id),
        )
    }
}
