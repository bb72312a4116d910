//! In-process region backend
//!
//! Segments live on the heap and are keyed the same way as OS segments.
//! Handles are cheap clones sharing one store, so a test harness can play
//! the external program and modify regions while a manager owns them.

use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;

use super::{KeyPolicy, RegionBackend, RegionId, RegionKey, ShmError};

/// First id handed out, mimicking kernel-assigned shmids
const FIRST_ID: i32 = 32768;

#[derive(Debug, Default)]
struct MemoryStore {
    segments: HashMap<RegionId, Segment>,
    next_id: i32,
    limit: Option<usize>,
    created: usize,
    destroyed: usize,
}

#[derive(Debug)]
struct Segment {
    ipc_key: i32,
    data: Vec<u8>,
}

/// Heap-backed [`RegionBackend`]
#[derive(Debug, Clone, Default)]
pub struct MemoryBackend {
    store: Rc<RefCell<MemoryStore>>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Backend that reports exhaustion once `limit` segments are live
    pub fn with_limit(limit: usize) -> Self {
        let backend = Self::default();
        backend.store.borrow_mut().limit = Some(limit);
        backend
    }

    /// Number of live segments
    pub fn live(&self) -> usize {
        self.store.borrow().segments.len()
    }

    pub fn created(&self) -> usize {
        self.store.borrow().created
    }

    pub fn destroyed(&self) -> usize {
        self.store.borrow().destroyed
    }

    /// IPC keys of the live segments, sorted
    pub fn keys(&self) -> Vec<i32> {
        let mut keys: Vec<i32> = self
            .store
            .borrow()
            .segments
            .values()
            .map(|s| s.ipc_key)
            .collect();
        keys.sort_unstable();
        keys
    }

    /// Ids of the live segments, sorted
    pub fn ids(&self) -> Vec<RegionId> {
        let mut ids: Vec<RegionId> = self.store.borrow().segments.keys().copied().collect();
        ids.sort_unstable_by_key(|id| id.0);
        ids
    }

    /// Snapshot of a segment's bytes
    pub fn contents(&self, id: RegionId) -> Option<Vec<u8>> {
        self.store.borrow().segments.get(&id).map(|s| s.data.clone())
    }

    /// Write into a segment the way the external program would
    pub fn overwrite(&self, id: RegionId, data: &[u8]) -> Result<(), ShmError> {
        let mut store = self.store.borrow_mut();
        let segment = store
            .segments
            .get_mut(&id)
            .ok_or(ShmError::UnknownRegion(id))?;
        copy_into(&mut segment.data, data)
    }
}

fn copy_into(dst: &mut [u8], src: &[u8]) -> Result<(), ShmError> {
    if src.len() > dst.len() {
        return Err(ShmError::SizeMismatch {
            expected: dst.len(),
            actual: src.len(),
        });
    }
    dst[..src.len()].copy_from_slice(src);
    Ok(())
}

impl RegionBackend for MemoryBackend {
    fn name(&self) -> &str {
        "memory"
    }

    fn create(&mut self, key: &RegionKey, byte_size: usize) -> Result<RegionId, ShmError> {
        let mut store = self.store.borrow_mut();
        let ipc_key = key.ipc_key();
        let existing = store
            .segments
            .iter()
            .find(|(_, s)| s.ipc_key == ipc_key)
            .map(|(id, s)| (*id, s.data.len()));
        if let Some((id, actual)) = existing {
            return match key.policy {
                KeyPolicy::Session => Err(ShmError::KeyInUse { key: ipc_key }),
                KeyPolicy::Positional if actual != byte_size => Err(ShmError::SegmentSize {
                    key: ipc_key,
                    expected: byte_size,
                    actual,
                }),
                // reopened, as shmget does for an existing key
                KeyPolicy::Positional => Ok(id),
            };
        }
        let live = store.segments.len();
        if store.limit.is_some_and(|limit| live >= limit) {
            return Err(ShmError::Exhausted { live });
        }
        let id = RegionId(FIRST_ID + store.next_id);
        store.next_id += 1;
        store.created += 1;
        store.segments.insert(
            id,
            Segment {
                ipc_key,
                data: vec![0; byte_size],
            },
        );
        Ok(id)
    }

    fn write(&mut self, id: RegionId, data: &[u8]) -> Result<(), ShmError> {
        self.overwrite(id, data)
    }

    fn read(&mut self, id: RegionId, out: &mut [u8]) -> Result<(), ShmError> {
        let store = self.store.borrow();
        let segment = store.segments.get(&id).ok_or(ShmError::UnknownRegion(id))?;
        if out.len() > segment.data.len() {
            return Err(ShmError::SizeMismatch {
                expected: segment.data.len(),
                actual: out.len(),
            });
        }
        out.copy_from_slice(&segment.data[..out.len()]);
        Ok(())
    }

    fn destroy(&mut self, id: RegionId) -> Result<(), ShmError> {
        let mut store = self.store.borrow_mut();
        store
            .segments
            .remove(&id)
            .ok_or(ShmError::UnknownRegion(id))?;
        store.destroyed += 1;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::shm::{KeyPolicy, SessionId};

    #[test]
    fn test_create_zeroed_segment() {
        let mut backend = MemoryBackend::new();
        let key = RegionKey::new(KeyPolicy::Positional, SessionId::from_token(0), 4).unwrap();
        let id = backend.create(&key, 3).unwrap();
        assert_eq!(backend.contents(id), Some(vec![0, 0, 0]));
        assert_eq!(backend.keys(), vec![5]);
    }

    #[test]
    fn test_oversized_write_rejected() {
        let mut backend = MemoryBackend::new();
        let key = RegionKey::new(KeyPolicy::Positional, SessionId::from_token(0), 0).unwrap();
        let id = backend.create(&key, 2).unwrap();
        assert!(matches!(
            backend.write(id, &[1, 2, 3]),
            Err(ShmError::SizeMismatch { expected: 2, actual: 3 })
        ));
    }

    #[test]
    fn test_live_session_key_rejected() {
        let mut backend = MemoryBackend::new();
        let key = RegionKey::new(KeyPolicy::Session, SessionId::from_token(0x5A5A5), 0).unwrap();
        let id = backend.create(&key, 64).unwrap();
        assert!(matches!(
            backend.create(&key, 16),
            Err(ShmError::KeyInUse { key: k }) if k == key.ipc_key()
        ));
        assert_eq!(backend.contents(id).map(|d| d.len()), Some(64));
        assert_eq!(backend.created(), 1);

        backend.destroy(id).unwrap();
        assert!(backend.create(&key, 16).is_ok());
    }

    #[test]
    fn test_positional_reopen_requires_same_size() {
        let mut backend = MemoryBackend::new();
        let key = RegionKey::new(KeyPolicy::Positional, SessionId::from_token(0), 1).unwrap();
        let id = backend.create(&key, 8).unwrap();
        assert_eq!(backend.create(&key, 8).unwrap(), id);
        assert!(matches!(
            backend.create(&key, 4),
            Err(ShmError::SegmentSize {
                expected: 4,
                actual: 8,
                ..
            })
        ));
        assert_eq!(backend.live(), 1);
    }

    #[test]
    fn test_destroy_unknown_region() {
        let mut backend = MemoryBackend::new();
        assert!(matches!(
            backend.destroy(RegionId(1)),
            Err(ShmError::UnknownRegion(RegionId(1)))
        ));
        assert_eq!(backend.destroyed(), 0);
    }
}
