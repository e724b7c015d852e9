use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

/// The single room every message belongs to
pub const COLLECTION: &str = "messages";
pub const SENDER_FIELD: &str = "sender";
pub const BODY_FIELD: &str = "body";
/// Numeric sort key, seconds since the Unix epoch
pub const DATE_FIELD: &str = "date";

/// An authenticated user's email address
pub type Identity = String;

pub type DocumentId = String;

/// Raw fields of a stored document
pub type Fields = BTreeMap<String, Value>;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Document {
    pub id: DocumentId,
    pub fields: Fields,
}

impl Document {
    pub fn get_str(&self, field: &str) -> Option<&str> {
        self.fields.get(field).and_then(Value::as_str)
    }

    pub fn get_f64(&self, field: &str) -> Option<f64> {
        self.fields.get(field).and_then(Value::as_f64)
    }
}

/// A complete, ordered listing of a subscribed collection
pub type Snapshot = Vec<Document>;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum MessageError {
    #[error("message sender is empty")]
    EmptySender,
    #[error("message body is empty")]
    EmptyBody,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    sender: Identity,
    body: String,
}

impl Message {
    pub fn new(sender: impl Into<String>, body: impl Into<String>) -> Result<Self, MessageError> {
        let sender = sender.into();
        let body = body.into();
        if sender.is_empty() {
            return Err(MessageError::EmptySender);
        }
        if body.is_empty() {
            return Err(MessageError::EmptyBody);
        }
        Ok(Message { sender, body })
    }

    /// Decode a stored document. Documents missing `sender` or `body`, or
    /// holding non-string or empty values there, yield `None`.
    pub fn from_document(doc: &Document) -> Option<Self> {
        let sender = doc.get_str(SENDER_FIELD)?;
        let body = doc.get_str(BODY_FIELD)?;
        Message::new(sender, body).ok()
    }

    /// Fields written to the store when this message is sent at `date`
    pub fn to_fields(&self, date: f64) -> Fields {
        let mut fields = Fields::new();
        fields.insert(SENDER_FIELD.to_string(), Value::from(self.sender.clone()));
        fields.insert(BODY_FIELD.to_string(), Value::from(self.body.clone()));
        fields.insert(DATE_FIELD.to_string(), Value::from(date));
        fields
    }

    pub fn sender(&self) -> &str {
        &self.sender
    }

    pub fn body(&self) -> &str {
        &self.body
    }
}

/// Current time as fractional seconds since the Unix epoch
pub fn now_seconds() -> f64 {
    chrono::Utc::now().timestamp_micros() as f64 / 1_000_000.0
}
