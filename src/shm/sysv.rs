//! System V shared memory backend
//!
//! Segments are created with `shmget`, attached once for the lifetime of
//! the region and removed with `shmctl(IPC_RMID)` on release. The external
//! program attaches by the returned id.

use std::collections::HashMap;
use std::ffi::CString;
use std::os::unix::ffi::OsStrExt;
use std::path::Path;
use std::ptr;

use log::{debug, warn};

use super::{KeyPolicy, RegionBackend, RegionId, RegionKey, ShmError};

const SEGMENT_MODE: libc::c_int = 0o666;

struct Attachment {
    addr: *mut libc::c_void,
    size: usize,
}

/// [`RegionBackend`] over `shmget`/`shmat`/`shmdt`/`shmctl`
pub struct SysVBackend {
    key_path: CString,
    attached: HashMap<RegionId, Attachment>,
}

impl Default for SysVBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl SysVBackend {
    /// Backend deriving positional keys from the filesystem root
    pub fn new() -> Self {
        Self {
            key_path: CString::from(c"/"),
            attached: HashMap::new(),
        }
    }

    /// Use another existing path for `ftok` key derivation
    pub fn with_key_path(path: &Path) -> Result<Self, ShmError> {
        let key_path = CString::new(path.as_os_str().as_bytes()).map_err(|e| ShmError::Os {
            op: "ftok",
            source: std::io::Error::new(std::io::ErrorKind::InvalidInput, e),
        })?;
        Ok(Self {
            key_path,
            attached: HashMap::new(),
        })
    }

    fn ipc_key(&self, key: &RegionKey) -> Result<libc::key_t, ShmError> {
        match key.policy {
            KeyPolicy::Positional => {
                // SAFETY: key_path is a valid NUL-terminated string
                let k = unsafe { libc::ftok(self.key_path.as_ptr(), key.project_id()) };
                if k == -1 {
                    return Err(ShmError::os("ftok"));
                }
                Ok(k)
            }
            KeyPolicy::Session => Ok(key.ipc_key() as libc::key_t),
        }
    }

    fn attachment(&self, id: RegionId, len: usize) -> Result<&Attachment, ShmError> {
        let att = self.attached.get(&id).ok_or(ShmError::UnknownRegion(id))?;
        if len > att.size {
            return Err(ShmError::SizeMismatch {
                expected: att.size,
                actual: len,
            });
        }
        Ok(att)
    }

    fn segment_size(shmid: libc::c_int) -> Result<usize, ShmError> {
        // SAFETY: shmid_ds is plain old data, filled in by IPC_STAT
        let mut ds: libc::shmid_ds = unsafe { std::mem::zeroed() };
        // SAFETY: ds is a valid, writable shmid_ds
        if unsafe { libc::shmctl(shmid, libc::IPC_STAT, &mut ds) } == -1 {
            return Err(ShmError::os("shmctl"));
        }
        Ok(ds.shm_segsz as usize)
    }

    fn detach_and_remove(id: RegionId, att: Attachment) -> Result<(), ShmError> {
        // SAFETY: addr came from a successful shmat and is detached once
        let detached = unsafe { libc::shmdt(att.addr) };
        let detach_err = (detached == -1).then(|| ShmError::os("shmdt"));
        // SAFETY: IPC_RMID takes no buffer
        let removed = unsafe { libc::shmctl(id.0, libc::IPC_RMID, ptr::null_mut()) };
        if removed == -1 {
            return Err(ShmError::os("shmctl"));
        }
        match detach_err {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}

impl RegionBackend for SysVBackend {
    fn name(&self) -> &str {
        "sysv"
    }

    fn create(&mut self, key: &RegionKey, byte_size: usize) -> Result<RegionId, ShmError> {
        let ipc_key = self.ipc_key(key)?;
        let flags = match key.policy {
            KeyPolicy::Session => libc::IPC_CREAT | libc::IPC_EXCL | SEGMENT_MODE,
            KeyPolicy::Positional => libc::IPC_CREAT | SEGMENT_MODE,
        };
        // SAFETY: plain syscall wrapper
        let shmid = unsafe { libc::shmget(ipc_key, byte_size, flags) };
        if shmid == -1 {
            let source = std::io::Error::last_os_error();
            if source.raw_os_error() == Some(libc::EEXIST) {
                return Err(ShmError::KeyInUse { key: ipc_key as i32 });
            }
            return Err(ShmError::Os { op: "shmget", source });
        }
        if key.policy == KeyPolicy::Positional {
            // shmget hands back larger segments as they are
            let actual = Self::segment_size(shmid)?;
            if actual != byte_size {
                return Err(ShmError::SegmentSize {
                    key: ipc_key as i32,
                    expected: byte_size,
                    actual,
                });
            }
        }
        // SAFETY: shmid refers to a segment we just opened
        let addr = unsafe { libc::shmat(shmid, ptr::null(), 0) };
        if addr as isize == -1 {
            let err = ShmError::os("shmat");
            // SAFETY: see detach_and_remove
            unsafe { libc::shmctl(shmid, libc::IPC_RMID, ptr::null_mut()) };
            return Err(err);
        }
        debug!("shmget key={ipc_key:#x} size={byte_size} -> shmid={shmid}");
        let id = RegionId(shmid);
        self.attached.insert(
            id,
            Attachment {
                addr,
                size: byte_size,
            },
        );
        Ok(id)
    }

    fn write(&mut self, id: RegionId, data: &[u8]) -> Result<(), ShmError> {
        let att = self.attachment(id, data.len())?;
        // SAFETY: the attachment spans at least data.len() bytes and cannot
        // overlap a Rust-owned slice
        unsafe { ptr::copy_nonoverlapping(data.as_ptr(), att.addr.cast::<u8>(), data.len()) };
        Ok(())
    }

    fn read(&mut self, id: RegionId, out: &mut [u8]) -> Result<(), ShmError> {
        let att = self.attachment(id, out.len())?;
        // SAFETY: as in write
        unsafe { ptr::copy_nonoverlapping(att.addr.cast::<u8>(), out.as_mut_ptr(), out.len()) };
        Ok(())
    }

    fn destroy(&mut self, id: RegionId) -> Result<(), ShmError> {
        let att = self.attached.remove(&id).ok_or(ShmError::UnknownRegion(id))?;
        Self::detach_and_remove(id, att)
    }
}

impl Drop for SysVBackend {
    fn drop(&mut self) {
        for (id, att) in self.attached.drain() {
            if let Err(e) = Self::detach_and_remove(id, att) {
                warn!("sysv: failed to remove segment {id} on drop: {e}");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::shm::SessionId;

    #[test]
    fn test_create_write_read_destroy() {
        let mut backend = SysVBackend::new();
        let key = RegionKey::new(KeyPolicy::Session, SessionId::next(), 0).unwrap();
        let id = match backend.create(&key, 16) {
            Ok(id) => id,
            Err(e) => {
                eprintln!("System V shared memory not available, skipping test: {e}");
                return;
            }
        };
        let data: Vec<u8> = (0..16).collect();
        backend.write(id, &data).unwrap();

        let mut out = vec![0u8; 16];
        backend.read(id, &mut out).unwrap();
        assert_eq!(out, data);

        backend.destroy(id).unwrap();
        assert!(matches!(
            backend.destroy(id),
            Err(ShmError::UnknownRegion(_))
        ));
    }

    #[test]
    fn test_session_key_is_never_reopened() {
        let key = RegionKey::new(KeyPolicy::Session, SessionId::next(), 2).unwrap();
        let mut first = SysVBackend::new();
        let Ok(id) = first.create(&key, 64) else {
            eprintln!("System V shared memory not available, skipping test");
            return;
        };

        let mut second = SysVBackend::new();
        let err = second.create(&key, 16).unwrap_err();
        assert!(matches!(err, ShmError::KeyInUse { key: k } if k == key.ipc_key()));

        // the first segment is untouched by the failed attempt
        first.write(id, &[7; 64]).unwrap();
        let mut out = [0u8; 64];
        first.read(id, &mut out).unwrap();
        assert_eq!(out, [7; 64]);
        first.destroy(id).unwrap();
    }

    #[test]
    fn test_positional_reopen_checks_size() {
        let dir = tempfile::tempdir().unwrap();
        let key = RegionKey::new(KeyPolicy::Positional, SessionId::from_token(0), 3).unwrap();
        let mut first = SysVBackend::with_key_path(dir.path()).unwrap();
        let Ok(id) = first.create(&key, 64) else {
            eprintln!("System V shared memory not available, skipping test");
            return;
        };

        let mut second = SysVBackend::with_key_path(dir.path()).unwrap();
        let err = second.create(&key, 16).unwrap_err();
        assert!(matches!(
            err,
            ShmError::SegmentSize {
                expected: 16,
                actual: 64,
                ..
            }
        ));
        first.destroy(id).unwrap();
    }

    #[test]
    fn test_oversized_copy_rejected() {
        let mut backend = SysVBackend::new();
        let key = RegionKey::new(KeyPolicy::Session, SessionId::next(), 1).unwrap();
        let Ok(id) = backend.create(&key, 4) else {
            eprintln!("System V shared memory not available, skipping test");
            return;
        };
        assert!(matches!(
            backend.write(id, &[0; 5]),
            Err(ShmError::SizeMismatch { expected: 4, actual: 5 })
        ));
        backend.destroy(id).unwrap();
    }
}
