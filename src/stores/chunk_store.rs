use crate::core::error::PeerError;
use std::sync::{PoisonError, RwLock};
use tokio::sync::watch;

/// Indexed buffer of one file's chunks
///
/// A slot is readable only once it has been put. Fill order is arbitrary
/// and re-putting an index overwrites it.
#[derive(Debug, Default)]
pub struct ChunkStore {
    slots: Vec<Option<Vec<u8>>>,
    present: usize,
}

impl ChunkStore {
    pub fn with_capacity(capacity: usize) -> Self {
        let mut store = Self::default();
        store.initialize(capacity);
        store
    }

    /// Drop all contents and size the store for `capacity` chunks
    pub fn initialize(&mut self, capacity: usize) {
        self.slots = vec![None; capacity];
        self.present = 0;
    }

    pub fn put(&mut self, index: usize, data: Vec<u8>) -> Result<(), PeerError> {
        let capacity = self.capacity();
        let slot = self
            .slots
            .get_mut(index)
            .ok_or(PeerError::ChunkOutOfRange { index, capacity })?;

        if slot.is_none() {
            self.present += 1;
        }
        *slot = Some(data);
        Ok(())
    }

    pub fn get(&self, index: usize) -> Option<&[u8]> {
        self.slots.get(index).and_then(|slot| slot.as_deref())
    }

    pub fn has(&self, index: usize) -> bool {
        self.get(index).is_some()
    }

    /// Absent indices in ascending order
    pub fn missing_indices(&self) -> Vec<usize> {
        self.slots
            .iter()
            .enumerate()
            .filter(|(_, slot)| slot.is_none())
            .map(|(index, _)| index)
            .collect()
    }

    pub fn is_complete(&self) -> bool {
        self.present == self.slots.len()
    }

    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    pub fn present_count(&self) -> usize {
        self.present
    }

    /// All chunks in order, only when every slot is filled
    pub fn chunks(&self) -> Option<Vec<Vec<u8>>> {
        if !self.is_complete() {
            return None;
        }
        self.slots.iter().cloned().collect()
    }
}

/// Chunk store shared between a peer's inbound server and its downloader
///
/// Completion is published on a watch channel so callers can await it
/// instead of polling.
#[derive(Debug)]
pub struct SharedChunkStore {
    inner: RwLock<ChunkStore>,
    complete: watch::Sender<bool>,
}

impl SharedChunkStore {
    pub fn new() -> Self {
        let (complete, _) = watch::channel(false);
        Self {
            inner: RwLock::new(ChunkStore::default()),
            complete,
        }
    }

    pub fn initialize(&self, capacity: usize) {
        let mut store = self.inner.write().unwrap_or_else(PoisonError::into_inner);
        store.initialize(capacity);
        self.complete.send_replace(capacity == 0);
    }

    /// Populate the whole store at once, as when sharing a local file
    pub fn fill(&self, chunks: Vec<Vec<u8>>) {
        let mut store = self.inner.write().unwrap_or_else(PoisonError::into_inner);
        store.initialize(chunks.len());
        for (index, data) in chunks.into_iter().enumerate() {
            // in range by construction
            let _ = store.put(index, data);
        }
        self.complete.send_replace(store.is_complete());
    }

    /// Release the buffer once a transfer is over
    pub fn clear(&self) {
        let mut store = self.inner.write().unwrap_or_else(PoisonError::into_inner);
        store.initialize(0);
        self.complete.send_replace(store.is_complete());
    }

    pub fn put(&self, index: usize, data: Vec<u8>) -> Result<(), PeerError> {
        let mut store = self.inner.write().unwrap_or_else(PoisonError::into_inner);
        store.put(index, data)?;
        if store.is_complete() {
            self.complete.send_replace(true);
        }
        Ok(())
    }

    pub fn get(&self, index: usize) -> Option<Vec<u8>> {
        let store = self.inner.read().unwrap_or_else(PoisonError::into_inner);
        store.get(index).map(|data| data.to_vec())
    }

    pub fn has(&self, index: usize) -> bool {
        self.inner.read().unwrap_or_else(PoisonError::into_inner).has(index)
    }

    pub fn missing_indices(&self) -> Vec<usize> {
        self.inner
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .missing_indices()
    }

    pub fn is_complete(&self) -> bool {
        self.inner.read().unwrap_or_else(PoisonError::into_inner).is_complete()
    }

    pub fn capacity(&self) -> usize {
        self.inner.read().unwrap_or_else(PoisonError::into_inner).capacity()
    }

    pub fn chunks(&self) -> Option<Vec<Vec<u8>>> {
        self.inner.read().unwrap_or_else(PoisonError::into_inner).chunks()
    }

    /// Resolve once every slot of the current transfer is filled
    pub async fn wait_complete(&self) {
        let mut rx = self.complete.subscribe();
        // the sender lives in self, so the channel cannot close here
        let _ = rx.wait_for(|done| *done).await;
    }
}

impl Default for SharedChunkStore {
    fn default() -> Self {
        Self::new()
    }
}
