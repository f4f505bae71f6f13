//! The envelope every pipeline component exchanges.
//!
//! A payload's `id` and `created_at` are fixed when it enters the pipeline.
//! Transformations replace `data` only, so the correlation id survives
//! end-to-end and a failed payload can be traced from source to DLQ.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// An immutable record flowing through the pipeline
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Payload<T> {
    /// Opaque correlation key (caller-assigned or generated)
    pub id: String,

    /// When the payload entered the pipeline
    pub created_at: DateTime<Utc>,

    /// The record itself
    pub data: T,
}

impl<T> Payload<T> {
    /// Create a payload with a generated id and the current timestamp
    pub fn new(data: T) -> Self {
        Self::with_id(Uuid::new_v4().to_string(), data)
    }

    /// Create a payload with a caller-assigned id
    pub fn with_id(id: impl Into<String>, data: T) -> Self {
        Self {
            id: id.into(),
            created_at: Utc::now(),
            data,
        }
    }

    /// Derive a new payload carrying `data`, keeping this payload's id and timestamp.
    ///
    /// Transformers should build their output through this (or [`Payload::map`])
    /// rather than constructing a fresh payload.
    pub fn with_data<U>(&self, data: U) -> Payload<U> {
        Payload {
            id: self.id.clone(),
            created_at: self.created_at,
            data,
        }
    }

    /// Consume the payload and transform its data
    pub fn map<U, F>(self, f: F) -> Payload<U>
    where
        F: FnOnce(T) -> U,
    {
        Payload {
            id: self.id,
            created_at: self.created_at,
            data: f(self.data),
        }
    }
}
