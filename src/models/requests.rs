//! Request DTOs for the cache layer API
//!
//! Defines the structure of incoming HTTP request bodies.

use serde::Deserialize;

use crate::feed::{ChangeEvent, EventKind};

/// Request body for POST /events
///
/// # Fields
/// - `resource`: Name of the remote resource that changed
/// - `event`: `insert`, `update` or `delete`
#[derive(Debug, Clone, Deserialize)]
pub struct EventRequest {
    pub resource: String,
    pub event: EventKind,
}

impl EventRequest {
    /// Validates the request data
    ///
    /// Returns an error message if validation fails, None if valid.
    pub fn validate(&self) -> Option<String> {
        if self.resource.trim().is_empty() {
            return Some("Resource cannot be empty".to_string());
        }
        if self.resource.len() > 256 {
            return Some("Resource exceeds maximum length of 256 characters".to_string());
        }
        None
    }

    pub fn into_event(self) -> ChangeEvent {
        ChangeEvent::new(self.resource, self.event)
    }
}
