//! Shared-memory regions for cross-process tensor transfer
//!
//! Every tensor argument gets exactly one OS segment whose size equals its
//! computed layout. Scalars keep an empty slot so per-argument vectors stay
//! aligned by position. [`SharedRegionManager`] owns the regions of one
//! marshaling session and releases all of them exactly once, on every exit
//! path (explicit [`SharedRegionManager::release_all`] or `Drop`).

mod memory;
#[cfg(unix)]
mod sysv;

pub use memory::MemoryBackend;
#[cfg(unix)]
pub use sysv::SysVBackend;

use std::fmt;
use std::str::FromStr;
use std::sync::atomic::{AtomicU32, Ordering};

use log::{debug, warn};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::args::ArgDescriptor;
use crate::error::MarshalError;

/// Project ids are eight bits wide; position `i` uses id `i + 1`
pub const MAX_REGIONS: usize = 255;

/// Errors raised by region backends
#[derive(Debug, Error)]
pub enum ShmError {
    #[error("argument position {index} exceeds the {MAX_REGIONS}-region key space")]
    TooManyRegions { index: usize },

    #[error("{op} failed: {source}")]
    Os {
        op: &'static str,
        #[source]
        source: std::io::Error,
    },

    #[error("shared memory exhausted after {live} live regions")]
    Exhausted { live: usize },

    #[error("copy of {actual} bytes does not fit region of {expected} bytes")]
    SizeMismatch { expected: usize, actual: usize },

    #[error("key {key:#x} already names a live segment")]
    KeyInUse { key: i32 },

    #[error("existing segment for key {key:#x} has {actual} bytes, expected {expected}")]
    SegmentSize {
        key: i32,
        expected: usize,
        actual: usize,
    },

    #[error("unknown region {0}")]
    UnknownRegion(RegionId),

    #[error("argument {index} has no shared region")]
    NoRegion { index: usize },
}

impl ShmError {
    pub(crate) fn os(op: &'static str) -> Self {
        ShmError::Os {
            op,
            source: std::io::Error::last_os_error(),
        }
    }
}

/// OS-assigned region identifier, embedded in the generated program
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RegionId(pub i32);

impl fmt::Display for RegionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// How backing keys are derived
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum KeyPolicy {
    /// Key from argument position only. Stable across builds of the same
    /// kernel signature, but two concurrent sessions alias each other.
    Positional,
    /// Key from `(session, position)`; sessions never share keys
    #[default]
    Session,
}

impl FromStr for KeyPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "positional" => Ok(KeyPolicy::Positional),
            "session" => Ok(KeyPolicy::Session),
            other => Err(format!("unknown key policy '{other}'")),
        }
    }
}

/// Process-wide unique marshaling session token
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SessionId(u32);

static NEXT_SESSION: AtomicU32 = AtomicU32::new(0);

impl SessionId {
    /// Token bits available above the 8-bit position field of a key
    const TOKEN_MASK: u32 = 0x007F_FFFF;

    /// Fresh session id, distinct from every other id handed out by this process
    pub fn next() -> Self {
        let counter = NEXT_SESSION.fetch_add(1, Ordering::Relaxed);
        let pid = std::process::id();
        Self((pid.wrapping_mul(0x9E37) ^ counter.wrapping_mul(0x2F1)) & Self::TOKEN_MASK)
    }

    pub fn from_token(token: u32) -> Self {
        Self(token & Self::TOKEN_MASK)
    }

    pub fn token(&self) -> u32 {
        self.0
    }
}

/// Backing key of one region
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RegionKey {
    pub policy: KeyPolicy,
    pub session: SessionId,
    pub arg_index: usize,
}

impl RegionKey {
    pub fn new(policy: KeyPolicy, session: SessionId, arg_index: usize) -> Result<Self, ShmError> {
        if arg_index >= MAX_REGIONS {
            return Err(ShmError::TooManyRegions { index: arg_index });
        }
        Ok(Self {
            policy,
            session,
            arg_index,
        })
    }

    /// 8-bit project id for this position (never zero)
    pub fn project_id(&self) -> i32 {
        self.arg_index as i32 + 1
    }

    /// Numeric IPC key: `project_id` alone for positional keys, the session
    /// token in the upper bits for session keys. Never zero (`IPC_PRIVATE`).
    pub fn ipc_key(&self) -> i32 {
        match self.policy {
            KeyPolicy::Positional => self.project_id(),
            KeyPolicy::Session => ((self.session.token() << 8) as i32) | self.project_id(),
        }
    }
}

/// One acquired segment
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SharedRegion {
    pub key: RegionKey,
    pub id: RegionId,
    pub byte_size: usize,
}

/// OS capability behind the manager
pub trait RegionBackend {
    /// Backend name for logging
    fn name(&self) -> &str;

    /// Create a segment of exactly `byte_size` bytes and keep it attached
    ///
    /// Session keys are always fresh: a live segment under the same key
    /// fails with [`ShmError::KeyInUse`]. Positional keys may reopen an
    /// existing segment, which must have exactly `byte_size` bytes.
    fn create(&mut self, key: &RegionKey, byte_size: usize) -> Result<RegionId, ShmError>;

    /// Copy `data` to the start of the segment
    fn write(&mut self, id: RegionId, data: &[u8]) -> Result<(), ShmError>;

    /// Copy the start of the segment into `out`
    fn read(&mut self, id: RegionId, out: &mut [u8]) -> Result<(), ShmError>;

    /// Detach and mark the segment for removal
    fn destroy(&mut self, id: RegionId) -> Result<(), ShmError>;
}

impl<B: RegionBackend + ?Sized> RegionBackend for &mut B {
    fn name(&self) -> &str {
        (**self).name()
    }

    fn create(&mut self, key: &RegionKey, byte_size: usize) -> Result<RegionId, ShmError> {
        (**self).create(key, byte_size)
    }

    fn write(&mut self, id: RegionId, data: &[u8]) -> Result<(), ShmError> {
        (**self).write(id, data)
    }

    fn read(&mut self, id: RegionId, out: &mut [u8]) -> Result<(), ShmError> {
        (**self).read(id, out)
    }

    fn destroy(&mut self, id: RegionId) -> Result<(), ShmError> {
        (**self).destroy(id)
    }
}

/// Acquire/release bookkeeping
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RegionStats {
    pub acquired: usize,
    pub released: usize,
}

impl RegionStats {
    pub fn live(&self) -> usize {
        self.acquired - self.released
    }
}

/// Owns the shared regions of one marshaling session
pub struct SharedRegionManager<B: RegionBackend> {
    backend: B,
    policy: KeyPolicy,
    session: SessionId,
    slots: Vec<Option<SharedRegion>>,
    stats: RegionStats,
}

impl<B: RegionBackend> SharedRegionManager<B> {
    pub fn new(backend: B, policy: KeyPolicy, session: SessionId) -> Self {
        Self {
            backend,
            policy,
            session,
            slots: Vec::new(),
            stats: RegionStats::default(),
        }
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    pub fn session(&self) -> SessionId {
        self.session
    }

    pub fn stats(&self) -> RegionStats {
        self.stats
    }

    /// Region of the argument at `arg_index`, `None` for scalars
    pub fn region(&self, arg_index: usize) -> Option<&SharedRegion> {
        self.slots.get(arg_index).and_then(Option::as_ref)
    }

    /// Region ids aligned by argument position
    pub fn region_ids(&self) -> Vec<Option<RegionId>> {
        self.slots
            .iter()
            .map(|slot| slot.as_ref().map(|r| r.id))
            .collect()
    }

    fn slot_mut(&mut self, arg_index: usize) -> &mut Option<SharedRegion> {
        if self.slots.len() <= arg_index {
            self.slots.resize(arg_index + 1, None);
        }
        &mut self.slots[arg_index]
    }

    /// Acquire the region for the tensor argument at `arg_index`
    pub fn acquire(&mut self, arg_index: usize, byte_size: usize) -> Result<&SharedRegion, ShmError> {
        if let Some(old) = self.slot_mut(arg_index).take() {
            // Re-acquiring a position must not leak the previous segment
            self.destroy_region(old);
        }
        let key = RegionKey::new(self.policy, self.session, arg_index)?;
        let id = self.backend.create(&key, byte_size)?;
        self.stats.acquired += 1;
        debug!(
            "{}: acquired region {} for argument {} (key {:#x}, {} bytes)",
            self.backend.name(),
            id,
            arg_index,
            key.ipc_key(),
            byte_size
        );
        let slot = self.slot_mut(arg_index);
        Ok(slot.insert(SharedRegion { key, id, byte_size }))
    }

    /// Acquire one region per tensor in the argument list
    ///
    /// Scalars get an empty slot. On failure every region acquired so far
    /// is released before the error is returned.
    pub fn acquire_all(&mut self, args: &[ArgDescriptor]) -> Result<(), MarshalError> {
        for arg in args {
            if arg.is_tensor() {
                let acquired = self.acquire(arg.index, arg.layout.byte_size()).map(|_| ());
                if let Err(source) = acquired {
                    self.release_all();
                    return Err(MarshalError::ResourceAcquisitionFailure {
                        index: arg.index,
                        source,
                    });
                }
            } else {
                *self.slot_mut(arg.index) = None;
            }
        }
        Ok(())
    }

    /// Raw copy of the caller buffer into the region
    pub fn populate(&mut self, arg_index: usize, src: &[u8]) -> Result<(), ShmError> {
        let (id, size) = self.live_region(arg_index)?;
        if src.len() < size {
            return Err(ShmError::SizeMismatch {
                expected: size,
                actual: src.len(),
            });
        }
        self.backend.write(id, &src[..size])
    }

    /// Raw copy of the region back into the caller buffer
    pub fn read_back(&mut self, arg_index: usize, dst: &mut [u8]) -> Result<(), ShmError> {
        let (id, size) = self.live_region(arg_index)?;
        if dst.len() < size {
            return Err(ShmError::SizeMismatch {
                expected: size,
                actual: dst.len(),
            });
        }
        self.backend.read(id, &mut dst[..size])
    }

    fn live_region(&self, arg_index: usize) -> Result<(RegionId, usize), ShmError> {
        self.region(arg_index)
            .map(|r| (r.id, r.byte_size))
            .ok_or(ShmError::NoRegion { index: arg_index })
    }

    /// Release the region at `arg_index`; releasing an empty slot is a no-op
    pub fn release(&mut self, arg_index: usize) -> Result<(), ShmError> {
        match self.slots.get_mut(arg_index).and_then(Option::take) {
            Some(region) => {
                self.stats.released += 1;
                self.backend.destroy(region.id)
            }
            None => Ok(()),
        }
    }

    fn destroy_region(&mut self, region: SharedRegion) {
        self.stats.released += 1;
        if let Err(e) = self.backend.destroy(region.id) {
            warn!(
                "{}: failed to release region {} of argument {}: {}",
                self.backend.name(),
                region.id,
                region.key.arg_index,
                e
            );
        }
    }

    /// Best-effort release of every live region; returns how many failed
    pub fn release_all(&mut self) -> usize {
        let regions: Vec<SharedRegion> = self.slots.iter_mut().filter_map(Option::take).collect();
        let mut failures = 0;
        for region in regions {
            let id = region.id;
            self.stats.released += 1;
            if let Err(e) = self.backend.destroy(id) {
                warn!("{}: failed to release region {}: {}", self.backend.name(), id, e);
                failures += 1;
            }
        }
        failures
    }
}

impl<B: RegionBackend> Drop for SharedRegionManager<B> {
    fn drop(&mut self) {
        if self.stats.live() > 0 {
            debug!(
                "{}: releasing {} region(s) on drop",
                self.backend.name(),
                self.stats.live()
            );
            self.release_all();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::args::{ArgumentSpec, ScalarValue};
    use crate::dtype::ElementType;

    fn tensor(index: usize, shape: Vec<usize>) -> ArgDescriptor {
        ArgumentSpec::Tensor {
            shape,
            dtype: ElementType::uint(8),
        }
        .describe(index)
        .unwrap()
    }

    fn scalar(index: usize) -> ArgDescriptor {
        ArgumentSpec::Scalar {
            dtype: ElementType::int(32),
            value: ScalarValue::Int(5),
        }
        .describe(index)
        .unwrap()
    }

    #[test]
    fn test_positional_keys_differ_by_position() {
        let session = SessionId::from_token(7);
        let keys: Vec<i32> = (0..3)
            .map(|i| RegionKey::new(KeyPolicy::Positional, session, i).unwrap().ipc_key())
            .collect();
        assert_eq!(keys, vec![1, 2, 3]);
    }

    #[test]
    fn test_session_keys_do_not_alias() {
        let a = RegionKey::new(KeyPolicy::Session, SessionId::from_token(1), 0).unwrap();
        let b = RegionKey::new(KeyPolicy::Session, SessionId::from_token(2), 0).unwrap();
        assert_ne!(a.ipc_key(), b.ipc_key());
        assert_ne!(a.ipc_key(), 0);
    }

    #[test]
    fn test_session_ids_are_unique() {
        let ids: Vec<SessionId> = (0..64).map(|_| SessionId::next()).collect();
        for (i, a) in ids.iter().enumerate() {
            for b in &ids[i + 1..] {
                assert_ne!(a, b);
            }
        }
    }

    #[test]
    fn test_too_many_regions() {
        let err = RegionKey::new(KeyPolicy::Positional, SessionId::from_token(0), MAX_REGIONS);
        assert!(matches!(err, Err(ShmError::TooManyRegions { .. })));
    }

    #[test]
    fn test_scalars_keep_empty_slots() {
        let backend = MemoryBackend::new();
        let mut mgr = SharedRegionManager::new(backend.clone(), KeyPolicy::Positional, SessionId::next());
        let args = vec![tensor(0, vec![4]), scalar(1), tensor(2, vec![2, 2])];
        mgr.acquire_all(&args).unwrap();

        let ids = mgr.region_ids();
        assert_eq!(ids.len(), 3);
        assert!(ids[0].is_some() && ids[1].is_none() && ids[2].is_some());
        assert_eq!(mgr.stats().acquired, 2);
        assert_eq!(backend.live(), 2);
    }

    #[test]
    fn test_populate_and_read_back_are_raw_copies() {
        let backend = MemoryBackend::new();
        let mut mgr = SharedRegionManager::new(backend.clone(), KeyPolicy::Session, SessionId::next());
        mgr.acquire(0, 4).unwrap();
        mgr.populate(0, &[1, 2, 3, 4, 99]).unwrap();

        let id = mgr.region(0).unwrap().id;
        assert_eq!(backend.contents(id).unwrap(), vec![1, 2, 3, 4]);

        backend.overwrite(id, &[9, 8, 7, 6]).unwrap();
        let mut out = [0u8; 4];
        mgr.read_back(0, &mut out).unwrap();
        assert_eq!(out, [9, 8, 7, 6]);
    }

    #[test]
    fn test_acquisition_failure_releases_earlier_regions() {
        let backend = MemoryBackend::with_limit(2);
        let mut mgr = SharedRegionManager::new(backend.clone(), KeyPolicy::Positional, SessionId::next());
        let args = vec![tensor(0, vec![4]), tensor(1, vec![4]), tensor(2, vec![4])];

        let err = mgr.acquire_all(&args).unwrap_err();
        assert!(matches!(
            err,
            MarshalError::ResourceAcquisitionFailure { index: 2, .. }
        ));
        assert_eq!(mgr.stats().acquired, mgr.stats().released);
        assert_eq!(backend.live(), 0);
    }

    #[test]
    fn test_drop_releases_everything() {
        let backend = MemoryBackend::new();
        {
            let mut mgr = SharedRegionManager::new(backend.clone(), KeyPolicy::Session, SessionId::next());
            mgr.acquire(0, 8).unwrap();
            mgr.acquire(1, 8).unwrap();
        }
        assert_eq!(backend.live(), 0);
        assert_eq!(backend.created(), backend.destroyed());
    }

    #[test]
    fn test_release_is_exactly_once() {
        let backend = MemoryBackend::new();
        let mut mgr = SharedRegionManager::new(backend.clone(), KeyPolicy::Session, SessionId::next());
        mgr.acquire(0, 8).unwrap();
        mgr.release(0).unwrap();
        mgr.release(0).unwrap();
        assert_eq!(mgr.release_all(), 0);
        drop(mgr);
        assert_eq!(backend.destroyed(), 1);
    }

    #[test]
    fn test_colliding_session_surfaces_as_acquisition_failure() {
        let backend = MemoryBackend::new();
        let session = SessionId::from_token(0x5A5A5);
        let args = vec![tensor(0, vec![8, 8])];
        let mut first = SharedRegionManager::new(backend.clone(), KeyPolicy::Session, session);
        first.acquire_all(&args).unwrap();

        let mut second = SharedRegionManager::new(backend.clone(), KeyPolicy::Session, session);
        let err = second.acquire_all(&[tensor(0, vec![16])]).unwrap_err();
        assert!(matches!(
            err,
            MarshalError::ResourceAcquisitionFailure {
                index: 0,
                source: ShmError::KeyInUse { .. }
            }
        ));
        assert_eq!(second.stats(), RegionStats::default());

        let id = first.region(0).unwrap().id;
        assert_eq!(backend.contents(id).map(|d| d.len()), Some(64));
        drop(second);
        assert_eq!(backend.live(), 1);
    }

    #[test]
    fn test_region_keys_hash_by_policy() {
        use std::collections::HashSet;
        let session = SessionId::from_token(3);
        let keys: HashSet<RegionKey> = [KeyPolicy::Positional, KeyPolicy::Session]
            .into_iter()
            .flat_map(|p| (0..2).map(move |i| RegionKey::new(p, session, i).unwrap()))
            .collect();
        assert_eq!(keys.len(), 4);
    }

    #[test]
    fn test_key_policy_parse() {
        assert_eq!("Positional".parse::<KeyPolicy>(), Ok(KeyPolicy::Positional));
        assert_eq!("session".parse::<KeyPolicy>(), Ok(KeyPolicy::Session));
        assert!("hashed".parse::<KeyPolicy>().is_err());
    }
}
