//! Change Events
//!
//! Shapes of the signals that can invalidate cached data.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EventKind {
    Insert,
    Update,
    Delete,
}

/// A change to a named remote resource, as delivered by the push transport.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChangeEvent {
    pub resource: String,
    pub kind: EventKind,
}

impl ChangeEvent {
    pub fn new(resource: impl Into<String>, kind: EventKind) -> Self {
        Self {
            resource: resource.into(),
            kind,
        }
    }
}

/// Anything that can cause a refresh. Push notifications and poll-detected
/// changes go through the same path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Trigger {
    /// Notification from the push transport
    Push(ChangeEvent),
    /// The poller fetched a value that differs from the previous one
    Polled { resource: String },
}

impl Trigger {
    pub fn resource(&self) -> &str {
        match self {
            Trigger::Push(event) => &event.resource,
            Trigger::Polled { resource } => resource,
        }
    }

    pub fn kind(&self) -> EventKind {
        match self {
            Trigger::Push(event) => event.kind,
            Trigger::Polled { .. } => EventKind::Update,
        }
    }
}

impl From<ChangeEvent> for Trigger {
    fn from(event: ChangeEvent) -> Self {
        Trigger::Push(event)
    }
}
