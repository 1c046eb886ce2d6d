use crate::models::StateDocument;
use crate::state::write_document;
use crate::store::KeyValueStore;
use std::sync::{Arc, Mutex as StdMutex};
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio::time::Duration;

/// The in-memory document shared by everything on one surface. Holding the
/// lock is what makes a mutation atomic with respect to other commands.
pub type SharedDocument = Arc<Mutex<StateDocument>>;

pub const DEFAULT_DEBOUNCE: Duration = Duration::from_millis(150);

/// Writes the whole document to the store, either debounced or immediately.
#[derive(Clone)]
pub struct Persister {
    store: Arc<dyn KeyValueStore>,
    document: SharedDocument,
    debounce: Duration,
    pending: Arc<StdMutex<Option<JoinHandle<()>>>>,
}

impl Persister {
    pub fn new(store: Arc<dyn KeyValueStore>, document: SharedDocument, debounce: Duration) -> Self {
        Self {
            store,
            document,
            debounce,
            pending: Arc::new(StdMutex::new(None)),
        }
    }

    pub fn store(&self) -> &Arc<dyn KeyValueStore> {
        &self.store
    }

    fn take_pending(&self) -> Option<JoinHandle<()>> {
        match self.pending.lock() {
            Ok(mut pending) => pending.take(),
            Err(poisoned) => poisoned.into_inner().take(),
        }
    }

    /// Coalesces bursts: every call restarts the quiet window and only the
    /// last one writes, serializing the document as it is at that moment.
    pub fn schedule_persist(&self) {
        if let Some(previous) = self.take_pending() {
            previous.abort();
        }

        let persister = self.clone();
        let handle = tokio::spawn(async move {
            tokio::time::sleep(persister.debounce).await;
            persister.write_current().await;
        });

        match self.pending.lock() {
            Ok(mut pending) => *pending = Some(handle),
            Err(poisoned) => *poisoned.into_inner() = Some(handle),
        }
    }

    /// Writes right away. A pending debounced write is dropped since this one
    /// already covers it.
    pub async fn persist_now(&self) -> bool {
        if let Some(previous) = self.take_pending() {
            previous.abort();
        }
        self.write_current().await
    }

    pub fn has_pending(&self) -> bool {
        match self.pending.lock() {
            Ok(pending) => pending.as_ref().is_some_and(|handle| !handle.is_finished()),
            Err(_) => false,
        }
    }

    async fn write_current(&self) -> bool {
        let document = self.document.lock().await;
        let written = write_document(self.store.as_ref(), &document);
        if written {
            tracing::debug!(pages = document.pages.len(), "state persisted");
        }
        written
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::create_default;
    use crate::store::{MemoryStore, STATE_KEY};

    fn fixture() -> (Arc<MemoryStore>, SharedDocument, Persister) {
        let store = Arc::new(MemoryStore::new());
        let document: SharedDocument = Arc::new(Mutex::new(create_default()));
        let persister = Persister::new(store.clone(), document.clone(), DEFAULT_DEBOUNCE);
        (store, document, persister)
    }

    #[tokio::test(start_paused = true)]
    async fn rapid_mutations_coalesce_into_one_write() {
        let (store, document, persister) = fixture();

        for index in 0..5 {
            document.lock().await.pages[0].name = format!("Name {index}");
            persister.schedule_persist();
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
        assert_eq!(store.write_count(), 0);

        tokio::time::sleep(Duration::from_millis(200)).await;
        assert_eq!(store.write_count(), 1);
        let stored = store.get(STATE_KEY).expect("get").expect("state");
        assert_eq!(stored["pages"][0]["name"], "Name 4");
        assert!(!persister.has_pending());
    }

    #[tokio::test(start_paused = true)]
    async fn persist_now_supersedes_pending_write() {
        let (store, document, persister) = fixture();
        document.lock().await.pages[0].name = "Work".to_string();
        persister.schedule_persist();
        assert!(persister.persist_now().await);
        assert_eq!(store.write_count(), 1);

        tokio::time::sleep(Duration::from_millis(500)).await;
        assert_eq!(store.write_count(), 1);
    }

    #[tokio::test]
    async fn failed_writes_are_reported_not_raised() {
        let (store, _document, persister) = fixture();
        store.set_failing(true);
        assert!(!persister.persist_now().await);
    }
}
