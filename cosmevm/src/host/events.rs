use std::{fmt::Display, sync::Arc};

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventAttribute {
    pub key: String,
    pub value: String,
}

/// A typed host event, as found in block results.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Event {
    #[serde(rename = "type")]
    pub ty: String,
    pub attributes: Vec<EventAttribute>,
}

impl Event {
    pub fn new(ty: impl Into<String>) -> Event {
        Event {
            ty: ty.into(),
            attributes: Vec::new(),
        }
    }

    pub fn with_attribute(mut self, key: impl Into<String>, value: impl Display) -> Event {
        self.attributes.push(EventAttribute {
            key: key.into(),
            value: value.to_string(),
        });
        self
    }

    pub fn attribute(&self, key: &str) -> Option<&str> {
        self.attributes
            .iter()
            .find(|a| a.key == key)
            .map(|a| a.value.as_str())
    }
}

/// An append-only list of events, shared by every clone.
#[derive(Debug, Clone, Default)]
pub struct EventManager(Arc<Mutex<Vec<Event>>>);

impl EventManager {
    pub fn new() -> EventManager {
        EventManager::default()
    }

    pub fn emit_event(&self, event: Event) {
        self.0.lock().push(event);
    }

    pub fn emit_events(&self, events: impl IntoIterator<Item = Event>) {
        self.0.lock().extend(events);
    }

    pub fn events(&self) -> Vec<Event> {
        self.0.lock().clone()
    }

    pub fn len(&self) -> usize {
        self.0.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.lock().is_empty()
    }

    /// Drops every event after the first `len`.
    pub fn truncate(&self, len: usize) {
        self.0.lock().truncate(len);
    }
}
