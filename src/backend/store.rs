//! Local realtime document store
//!
//! Documents are grouped by collection in insertion order. Ordered
//! subscriptions receive a full snapshot on subscribe and after every change.
//! A file-backed store can also watch its file so that several clients
//! sharing a data directory see each other's messages.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, SystemTime};

use async_trait::async_trait;
use log::{debug, error, info};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_stream::wrappers::UnboundedReceiverStream;
use uuid::Uuid;

use super::{run_blocking, write_json_atomic, FileLock, MessageStore, SnapshotStream, StoreError};
use crate::models::{Document, DocumentId, Fields, Snapshot};

type Collections = BTreeMap<String, Vec<Document>>;

struct Subscriber {
    collection: String,
    order_field: String,
    tx: mpsc::UnboundedSender<Result<Snapshot, StoreError>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct FileStamp {
    modified: SystemTime,
    len: u64,
}

#[derive(Default)]
struct StoreInner {
    collections: Collections,
    subscribers: Vec<Subscriber>,
    stamp: Option<FileStamp>,
}

#[derive(Clone)]
pub struct LocalStore {
    path: Option<PathBuf>,
    inner: Arc<Mutex<StoreInner>>,
}

/// Documents of `docs` carrying a numeric `order_field`, sorted ascending.
/// Equal keys keep insertion order.
pub fn ordered_snapshot(docs: &[Document], order_field: &str) -> Snapshot {
    let mut keyed: Vec<(f64, &Document)> = docs
        .iter()
        .filter_map(|doc| doc.get_f64(order_field).map(|key| (key, doc)))
        .collect();
    keyed.sort_by(|a, b| a.0.total_cmp(&b.0));
    keyed.into_iter().map(|(_, doc)| doc.clone()).collect()
}

fn file_stamp(path: &Path) -> Option<FileStamp> {
    let meta = fs::metadata(path).ok()?;
    Some(FileStamp {
        modified: meta.modified().ok()?,
        len: meta.len(),
    })
}

fn read_collections(path: &Path) -> Result<Collections, StoreError> {
    if !path.exists() {
        return Ok(Collections::new());
    }
    let contents = fs::read_to_string(path)?;
    if contents.trim().is_empty() {
        return Ok(Collections::new());
    }
    Ok(serde_json::from_str(&contents)?)
}

fn validate_collection(collection: &str) -> Result<(), StoreError> {
    if collection.trim().is_empty() || collection.contains('/') {
        return Err(StoreError::InvalidCollection(collection.to_string()));
    }
    Ok(())
}

impl StoreInner {
    /// Send a fresh snapshot of `collection` to its subscribers, dropping
    /// any whose receiving side is gone
    fn broadcast(&mut self, collection: &str) {
        let docs = self.collections.get(collection).map(Vec::as_slice).unwrap_or(&[]);
        self.subscribers.retain(|sub| {
            if sub.collection != collection {
                return !sub.tx.is_closed();
            }
            sub.tx.send(Ok(ordered_snapshot(docs, &sub.order_field))).is_ok()
        });
    }

    fn broadcast_all(&mut self) {
        let mut collections: Vec<String> = self
            .subscribers
            .iter()
            .map(|sub| sub.collection.clone())
            .collect();
        collections.sort();
        collections.dedup();
        for collection in collections {
            self.broadcast(&collection);
        }
    }

    fn broadcast_error(&mut self, err: StoreError) {
        self.subscribers.retain(|sub| sub.tx.send(Err(err.clone())).is_ok());
    }

    fn subscriber_count(&self) -> usize {
        self.subscribers.iter().filter(|sub| !sub.tx.is_closed()).count()
    }
}

impl LocalStore {
    pub fn in_memory() -> Self {
        LocalStore {
            path: None,
            inner: Arc::new(Mutex::new(StoreInner::default())),
        }
    }

    /// Open a store persisted at `path`, which need not exist yet
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let path = path.into();
        let collections = read_collections(&path)?;
        let count: usize = collections.values().map(Vec::len).sum();
        info!("Opened message store {} with {} documents", path.display(), count);

        let inner = StoreInner {
            collections,
            subscribers: Vec::new(),
            stamp: file_stamp(&path),
        };
        Ok(LocalStore {
            path: Some(path),
            inner: Arc::new(Mutex::new(inner)),
        })
    }

    fn lock(&self) -> MutexGuard<'_, StoreInner> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Number of live subscriptions across all collections
    pub fn subscriber_count(&self) -> usize {
        self.lock().subscriber_count()
    }

    /// Reload the backing file if another writer changed it. Returns whether
    /// anything was reloaded. In-memory stores never reload.
    ///
    /// Writers rename complete files into place, so reading needs no file lock.
    pub fn sync_from_disk(&self) -> Result<bool, StoreError> {
        let Some(path) = &self.path else {
            return Ok(false);
        };
        let mut inner = self.lock();
        let stamp = file_stamp(path);
        if stamp.is_none() || stamp == inner.stamp {
            return Ok(false);
        }

        inner.collections = read_collections(path)?;
        inner.stamp = stamp;
        debug!("Reloaded message store from {}", path.display());
        inner.broadcast_all();
        Ok(true)
    }

    fn sync_or_report(&self) {
        if let Err(e) = self.sync_from_disk() {
            error!("Failed to reload message store: {}", e);
            let mut inner = self.lock();
            // Do not report the same broken file on every tick
            if let Some(path) = &self.path {
                inner.stamp = file_stamp(path);
            }
            inner.broadcast_error(e);
        }
    }

    /// Poll the backing file every `interval`. A failed reload is delivered
    /// to every subscriber as an error; the previous documents are kept.
    pub fn spawn_sync(&self, interval: Duration) -> JoinHandle<()> {
        let store = self.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            loop {
                ticker.tick().await;
                let tick_store = store.clone();
                if let Err(e) = run_blocking(move || tick_store.sync_or_report()).await {
                    error!("Message store sync tick failed: {}", e);
                }
            }
        })
    }

    /// Merge the file's current contents, push the document and write the
    /// result back, all under the file lock so that concurrent writers never
    /// drop each other's documents
    fn append_blocking(&self, collection: &str, fields: Fields) -> Result<DocumentId, StoreError> {
        let _file_lock = match &self.path {
            Some(path) => Some(FileLock::acquire(path)?),
            None => None,
        };
        let mut inner = self.lock();

        if let Some(path) = &self.path {
            inner.collections = read_collections(path)?;
        }

        let id = Uuid::new_v4().to_string();
        inner
            .collections
            .entry(collection.to_string())
            .or_default()
            .push(Document {
                id: id.clone(),
                fields,
            });

        if let Some(path) = &self.path {
            if let Err(e) = write_json_atomic(path, &inner.collections) {
                if let Some(docs) = inner.collections.get_mut(collection) {
                    docs.pop();
                }
                return Err(e.into());
            }
            inner.stamp = file_stamp(path);
            // Documents merged from other writers reach subscribers of every
            // collection, not only this one
            inner.broadcast_all();
        } else {
            inner.broadcast(collection);
        }

        debug!("Appended document {} to {}", id, collection);
        Ok(id)
    }
}

#[async_trait]
impl MessageStore for LocalStore {
    async fn append(&self, collection: &str, fields: Fields) -> Result<DocumentId, StoreError> {
        validate_collection(collection)?;
        let store = self.clone();
        let collection = collection.to_string();
        run_blocking(move || store.append_blocking(&collection, fields)).await?
    }

    async fn subscribe_ordered(
        &self,
        collection: &str,
        order_field: &str,
    ) -> Result<SnapshotStream, StoreError> {
        validate_collection(collection)?;
        let (tx, rx) = mpsc::unbounded_channel();
        let mut inner = self.lock();

        let docs = inner.collections.get(collection).map(Vec::as_slice).unwrap_or(&[]);
        // The receiver is still in scope, so the first send cannot fail
        let _ = tx.send(Ok(ordered_snapshot(docs, order_field)));

        inner.subscribers.push(Subscriber {
            collection: collection.to_string(),
            order_field: order_field.to_string(),
            tx,
        });
        debug!("New subscription to {} ordered by {}", collection, order_field);

        Ok(Box::pin(UnboundedReceiverStream::new(rx)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn doc(id: &str, date: Option<f64>) -> Document {
        let mut fields = Fields::new();
        fields.insert("body".to_string(), json!(id));
        if let Some(date) = date {
            fields.insert("date".to_string(), json!(date));
        }
        Document { id: id.to_string(), fields }
    }

    #[test]
    fn test_ordered_snapshot_sorts_and_filters() {
        let docs = vec![
            doc("c", Some(3.0)),
            doc("a", Some(1.0)),
            doc("none", None),
            doc("b1", Some(2.0)),
            doc("b2", Some(2.0)),
        ];
        let ids: Vec<String> = ordered_snapshot(&docs, "date")
            .into_iter()
            .map(|d| d.id)
            .collect();
        assert_eq!(ids, vec!["a", "b1", "b2", "c"]);
    }

    #[test]
    fn test_validate_collection() {
        assert!(validate_collection("messages").is_ok());
        assert!(validate_collection("").is_err());
        assert!(validate_collection("a/b").is_err());
    }
}
