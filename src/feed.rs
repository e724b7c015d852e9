//! Realtime message feed
//!
//! `FeedController` owns the chat screen's list of messages. A pump task
//! forwards every snapshot delivered by the store subscription into a
//! channel; the owner of the controller (the UI loop) applies them on its own
//! task, so the message list is only ever touched from one place.

use std::sync::Arc;

use futures::StreamExt;
use log::{debug, error, info, warn};
use thiserror::Error;
use tokio::sync::mpsc::{self, error::TryRecvError};
use tokio::task::JoinHandle;

use crate::backend::{IdentityProvider, MessageStore, StoreError};
use crate::models::{now_seconds, Document, Message, Snapshot, COLLECTION, DATE_FIELD};

const FEED_CHANNEL_CAPACITY: usize = 100;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FeedError {
    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("The feed subscription has ended")]
    Closed,
}

/// What applying one subscription delivery did to the feed
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FeedEvent {
    /// The list was rebuilt from a snapshot. `scroll_to` is the newest row.
    Rebuilt { len: usize, scroll_to: Option<usize> },
    /// The subscription reported an error; the list was left as it was
    Failed(FeedError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SendOutcome {
    /// The store accepted the message; the input can be cleared
    Sent,
    /// Nobody is signed in, nothing was written
    NoIdentity,
    /// Blank input, nothing was written
    EmptyBody,
}

/// The ordered messages currently shown and the row to scroll to
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FeedState {
    messages: Vec<Message>,
    scroll_to: Option<usize>,
}

impl FeedState {
    /// Replace the whole list with the decodable documents of `snapshot`, in
    /// snapshot order. Returns the number of skipped documents.
    pub fn rebuild(&mut self, snapshot: &[Document]) -> usize {
        self.messages.clear();
        let mut skipped = 0;
        for doc in snapshot {
            match Message::from_document(doc) {
                Some(message) => self.messages.push(message),
                None => {
                    debug!("Skipping malformed message document {}", doc.id);
                    skipped += 1;
                }
            }
        }
        self.scroll_to = self.messages.len().checked_sub(1);
        skipped
    }

    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    pub fn scroll_target(&self) -> Option<usize> {
        self.scroll_to
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }
}

/// Cloneable handle for posting messages; sends run independently of each
/// other and of the feed
#[derive(Clone)]
pub struct FeedSender {
    store: Arc<dyn MessageStore>,
    identity: Arc<dyn IdentityProvider>,
}

impl FeedSender {
    pub fn new(store: Arc<dyn MessageStore>, identity: Arc<dyn IdentityProvider>) -> Self {
        FeedSender { store, identity }
    }

    /// Append `body` as the current identity. The message shows up in the
    /// feed only once the subscription delivers it back.
    pub async fn send(&self, body: &str) -> Result<SendOutcome, FeedError> {
        let Some(sender) = self.identity.current_identity() else {
            debug!("Not sending: no signed-in identity");
            return Ok(SendOutcome::NoIdentity);
        };
        if body.trim().is_empty() {
            return Ok(SendOutcome::EmptyBody);
        }

        let message = match Message::new(sender, body) {
            Ok(message) => message,
            Err(e) => {
                debug!("Not sending: {}", e);
                return Ok(SendOutcome::EmptyBody);
            }
        };

        match self.store.append(COLLECTION, message.to_fields(now_seconds())).await {
            Ok(id) => {
                info!("Saved message {} from {}", id, message.sender());
                Ok(SendOutcome::Sent)
            }
            Err(e) => {
                error!("There was an issue saving the message: {}", e);
                Err(e.into())
            }
        }
    }
}

pub struct FeedController {
    state: FeedState,
    sender: FeedSender,
    updates: mpsc::Receiver<Result<Snapshot, StoreError>>,
    pump: Option<JoinHandle<()>>,
}

impl FeedController {
    /// Subscribe to the room ordered by send time. Must be called within a
    /// tokio runtime.
    pub async fn subscribe(
        store: Arc<dyn MessageStore>,
        identity: Arc<dyn IdentityProvider>,
    ) -> Result<Self, FeedError> {
        let mut stream = store.subscribe_ordered(COLLECTION, DATE_FIELD).await?;
        let (tx, rx) = mpsc::channel(FEED_CHANNEL_CAPACITY);

        let pump = tokio::spawn(async move {
            while let Some(item) = stream.next().await {
                if tx.send(item).await.is_err() {
                    break;
                }
            }
            debug!("Feed subscription pump finished");
        });

        info!("Subscribed to {} ordered by {}", COLLECTION, DATE_FIELD);
        Ok(FeedController {
            state: FeedState::default(),
            sender: FeedSender::new(store, identity),
            updates: rx,
            pump: Some(pump),
        })
    }

    /// Apply one delivery from the subscription
    pub fn apply(&mut self, item: Result<Snapshot, StoreError>) -> FeedEvent {
        match item {
            Ok(snapshot) => {
                let skipped = self.state.rebuild(&snapshot);
                if skipped > 0 {
                    debug!("Skipped {} malformed documents", skipped);
                }
                FeedEvent::Rebuilt {
                    len: self.state.len(),
                    scroll_to: self.state.scroll_target(),
                }
            }
            Err(e) => {
                warn!("There was an issue retrieving messages: {}", e);
                FeedEvent::Failed(e.into())
            }
        }
    }

    /// Apply every delivery that is already waiting, without blocking
    pub fn poll(&mut self) -> Vec<FeedEvent> {
        let mut events = Vec::new();
        loop {
            match self.updates.try_recv() {
                Ok(item) => events.push(self.apply(item)),
                Err(TryRecvError::Empty) => break,
                Err(TryRecvError::Disconnected) => {
                    if self.pump.take().is_some() {
                        warn!("Feed subscription closed by the store");
                        events.push(FeedEvent::Failed(FeedError::Closed));
                    }
                    break;
                }
            }
        }
        events
    }

    /// Wait for the next delivery and apply it. `None` once the subscription
    /// has ended.
    pub async fn next_event(&mut self) -> Option<FeedEvent> {
        let item = self.updates.recv().await?;
        Some(self.apply(item))
    }

    pub async fn send(&self, body: &str) -> Result<SendOutcome, FeedError> {
        self.sender.send(body).await
    }

    pub fn sender(&self) -> FeedSender {
        self.sender.clone()
    }

    pub fn state(&self) -> &FeedState {
        &self.state
    }

    pub fn messages(&self) -> &[Message] {
        self.state.messages()
    }

    pub fn scroll_target(&self) -> Option<usize> {
        self.state.scroll_target()
    }

    /// Cancel the subscription and release the feed
    pub fn dispose(self) {
        info!("Disposing message feed with {} messages", self.state.len());
    }
}

impl Drop for FeedController {
    fn drop(&mut self) {
        if let Some(pump) = self.pump.take() {
            pump.abort();
        }
        self.updates.close();
    }
}
