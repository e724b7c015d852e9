// Common test utilities for integration tests
// This module contains shared code for all integration tests

#![allow(dead_code)]

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, Once};
use std::time::Duration;

use async_trait::async_trait;
use log::LevelFilter;
use serde_json::json;
use tokio::sync::mpsc;
use tokio::time::timeout;
use tokio_stream::wrappers::UnboundedReceiverStream;

use flashchat::backend::{IdentityProvider, MessageStore, SnapshotStream, StoreError};
use flashchat::feed::{FeedController, FeedEvent};
use flashchat::models::{Document, DocumentId, Fields, Snapshot};
use flashchat::LocalIdentityProvider;

// Initialize logging once
static INIT_LOGGER: Once = Once::new();

/// Set up the logger for the tests
pub fn setup_logging() {
    INIT_LOGGER.call_once(|| {
        let _ = env_logger::Builder::new()
            .filter_level(LevelFilter::Debug)
            .is_test(true)
            .try_init();
    });
}

/// Build a stored document; `None` leaves the field out
pub fn document(id: &str, sender: Option<&str>, body: Option<&str>, date: f64) -> Document {
    let mut fields = Fields::new();
    if let Some(sender) = sender {
        fields.insert("sender".to_string(), json!(sender));
    }
    if let Some(body) = body {
        fields.insert("body".to_string(), json!(body));
    }
    fields.insert("date".to_string(), json!(date));
    Document {
        id: id.to_string(),
        fields,
    }
}

/// Message fields as the feed writes them
pub fn message_fields(sender: &str, body: &str, date: f64) -> Fields {
    document("", Some(sender), Some(body), date).fields
}

/// Snapshot from `(sender, body, date)` triples, in the given order
pub fn snapshot(entries: &[(&str, &str, f64)]) -> Snapshot {
    entries
        .iter()
        .enumerate()
        .map(|(i, (sender, body, date))| document(&format!("doc{}", i), Some(*sender), Some(*body), *date))
        .collect()
}

pub fn bodies(feed: &FeedController) -> Vec<String> {
    feed.messages().iter().map(|m| m.body().to_string()).collect()
}

/// Wait for the next feed event, failing the test after five seconds
pub async fn next_event(feed: &mut FeedController) -> FeedEvent {
    timeout(Duration::from_secs(5), feed.next_event())
        .await
        .expect("Timed out waiting for a feed event")
        .expect("Feed subscription ended")
}

/// Wait until the feed holds `len` messages
pub async fn wait_for_len(feed: &mut FeedController, len: usize) {
    while feed.messages().len() != len {
        next_event(feed).await;
    }
}

pub async fn signed_in(email: &str) -> Arc<LocalIdentityProvider> {
    let identity = LocalIdentityProvider::in_memory();
    identity
        .create_account(email, "password1")
        .await
        .expect("Failed to create test account");
    Arc::new(identity)
}

/// A store whose subscription deliveries are pushed by the test and whose
/// appends can be made to fail
pub struct ScriptedStore {
    tx: mpsc::UnboundedSender<Result<Snapshot, StoreError>>,
    rx: Mutex<Option<mpsc::UnboundedReceiver<Result<Snapshot, StoreError>>>>,
    fail_appends: AtomicBool,
    appended: Mutex<Vec<Fields>>,
}

impl ScriptedStore {
    pub fn new() -> Arc<Self> {
        let (tx, rx) = mpsc::unbounded_channel();
        Arc::new(ScriptedStore {
            tx,
            rx: Mutex::new(Some(rx)),
            fail_appends: AtomicBool::new(false),
            appended: Mutex::new(Vec::new()),
        })
    }

    pub fn deliver(&self, item: Result<Snapshot, StoreError>) {
        self.tx.send(item).expect("Subscription receiver is gone");
    }

    pub fn fail_appends(&self, fail: bool) {
        self.fail_appends.store(fail, Ordering::SeqCst);
    }

    pub fn appended(&self) -> Vec<Fields> {
        self.appended.lock().unwrap().clone()
    }
}

#[async_trait]
impl MessageStore for ScriptedStore {
    async fn append(&self, _collection: &str, fields: Fields) -> Result<DocumentId, StoreError> {
        if self.fail_appends.load(Ordering::SeqCst) {
            return Err(StoreError::Io("write rejected".to_string()));
        }
        let mut appended = self.appended.lock().unwrap();
        appended.push(fields);
        Ok(format!("doc{}", appended.len()))
    }

    async fn subscribe_ordered(
        &self,
        _collection: &str,
        _order_field: &str,
    ) -> Result<SnapshotStream, StoreError> {
        let rx = self
            .rx
            .lock()
            .unwrap()
            .take()
            .ok_or_else(|| StoreError::Io("already subscribed".to_string()))?;
        Ok(Box::pin(UnboundedReceiverStream::new(rx)))
    }
}
