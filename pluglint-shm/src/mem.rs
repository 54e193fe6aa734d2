// Copyright 2026-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use libc::off_t;
use nix::fcntl::OFlag;
use nix::sys::mman::{mmap, munmap, shm_open, shm_unlink, MapFlags, ProtFlags};
use nix::sys::stat::Mode;
use nix::unistd::ftruncate;
use std::ffi::CString;
use std::fs::File;
use std::io;
use std::num::NonZeroUsize;
use std::os::fd::{AsFd, OwnedFd};
use std::ptr::NonNull;
use std::sync::atomic::{AtomicU32, Ordering};

/// A file-backed shared memory segment of known size.
#[derive(Debug)]
pub struct ShmHandle {
    handle: OwnedFd,
    size: usize,
}

/// A shared memory segment with a name in the POSIX shm namespace.
///
/// The name survives this handle: dropping a `NamedShmHandle` (or a mapping
/// derived from it) closes the descriptor but leaves the segment linked, so
/// other processes can still open it. Call [`NamedShmHandle::unlink`] to
/// remove the name.
#[derive(Debug)]
pub struct NamedShmHandle {
    inner: ShmHandle,
    path: CString,
    created: bool,
}

/// A `MAP_SHARED` mapping of a segment. Unmapped on drop.
pub struct MappedMem<T>
where
    T: MemoryHandle,
{
    ptr: NonNull<libc::c_void>,
    mem: T,
}

pub fn page_aligned_size(size: usize) -> usize {
    let page_size = page_size::get();
    // round up to nearest page
    ((size - 1) & !(page_size - 1)) + page_size
}

pub trait MemoryHandle {
    fn get_size(&self) -> usize;
}

impl<T> MemoryHandle for T
where
    T: FileBackedHandle,
{
    fn get_size(&self) -> usize {
        self.get_shm().size
    }
}

pub trait FileBackedHandle
where
    Self: Sized,
{
    fn map(self) -> io::Result<MappedMem<Self>>;
    fn get_shm(&self) -> &ShmHandle;
}

fn mmap_handle<T: FileBackedHandle>(handle: T) -> io::Result<MappedMem<T>> {
    let length = NonZeroUsize::new(handle.get_shm().size)
        .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidInput, "cannot map an empty segment"))?;
    let ptr = unsafe {
        mmap(
            None,
            length,
            ProtFlags::PROT_READ | ProtFlags::PROT_WRITE,
            MapFlags::MAP_SHARED,
            handle.get_shm().handle.as_fd(),
            0,
        )?
    };
    Ok(MappedMem { ptr, mem: handle })
}

impl FileBackedHandle for ShmHandle {
    fn map(self) -> io::Result<MappedMem<ShmHandle>> {
        mmap_handle(self)
    }

    fn get_shm(&self) -> &ShmHandle {
        self
    }
}

impl FileBackedHandle for NamedShmHandle {
    fn map(self) -> io::Result<MappedMem<NamedShmHandle>> {
        mmap_handle(self)
    }

    fn get_shm(&self) -> &ShmHandle {
        &self.inner
    }
}

impl ShmHandle {
    /// Creates an anonymous shared memory segment of `size` bytes.
    ///
    /// The segment has no name (it is unlinked immediately after creation)
    /// and lives as long as a descriptor or mapping refers to it, which
    /// makes it inheritable across `fork` but not openable by path.
    pub fn new(size: usize) -> io::Result<ShmHandle> {
        static ANON_COUNTER: AtomicU32 = AtomicU32::new(0);
        let seq = ANON_COUNTER.fetch_add(1, Ordering::Relaxed);
        let path = format!("/pluglint-shm-anon-{}-{}", std::process::id(), seq);
        let fd = shm_open(
            path.as_bytes(),
            OFlag::O_CREAT | OFlag::O_EXCL | OFlag::O_RDWR,
            Mode::S_IRUSR | Mode::S_IWUSR,
        )?;
        let _ = shm_unlink(path.as_bytes());
        ftruncate(&fd, size as off_t)?;
        Ok(ShmHandle { handle: fd, size })
    }

    pub fn size(&self) -> usize {
        self.size
    }
}

impl NamedShmHandle {
    /// Creates the named segment, failing if it already exists.
    pub fn create(path: CString, size: usize) -> io::Result<NamedShmHandle> {
        let fd = shm_open(
            path.as_bytes(),
            OFlag::O_CREAT | OFlag::O_EXCL | OFlag::O_RDWR,
            Mode::S_IRUSR | Mode::S_IWUSR,
        )?;
        ftruncate(&fd, size as off_t)?;
        Self::new(fd, path, size, true)
    }

    /// Creates the named segment, or opens it if another attacher got there
    /// first. [`created`](Self::created) reports which happened, so the
    /// caller knows whether the contents are fresh zero pages.
    pub fn create_or_open(path: CString, size: usize) -> io::Result<NamedShmHandle> {
        match Self::create(path.clone(), size) {
            Ok(handle) => Ok(handle),
            Err(err) if err.kind() == io::ErrorKind::AlreadyExists => Self::open(path),
            Err(err) => Err(err),
        }
    }

    /// Opens an existing named segment, taking its current size.
    pub fn open(path: CString) -> io::Result<NamedShmHandle> {
        let fd = shm_open(path.as_bytes(), OFlag::O_RDWR, Mode::empty())?;
        let file: File = fd.into();
        let size = file.metadata()?.len() as usize;
        Self::new(file.into(), path, size, false)
    }

    /// Removes the name from the shm namespace. Idempotent: unlinking a
    /// name that does not exist succeeds.
    pub fn unlink(path: &CString) -> io::Result<()> {
        match shm_unlink(path.as_bytes()) {
            Ok(()) => Ok(()),
            Err(nix::errno::Errno::ENOENT) => Ok(()),
            Err(err) => Err(err.into()),
        }
    }

    fn new(fd: OwnedFd, path: CString, size: usize, created: bool) -> io::Result<NamedShmHandle> {
        Ok(NamedShmHandle {
            inner: ShmHandle { handle: fd, size },
            path,
            created,
        })
    }

    pub fn get_path(&self) -> &CString {
        &self.path
    }

    /// True if this handle's `shm_open` created the segment.
    pub fn created(&self) -> bool {
        self.created
    }
}

impl<T: MemoryHandle> MappedMem<T> {
    pub fn as_slice(&self) -> &[u8] {
        unsafe { std::slice::from_raw_parts(self.ptr.as_ptr() as *const u8, self.mem.get_size()) }
    }

    pub fn as_slice_mut(&mut self) -> &mut [u8] {
        unsafe { std::slice::from_raw_parts_mut(self.ptr.as_ptr() as *mut u8, self.mem.get_size()) }
    }

    pub fn as_ptr(&self) -> NonNull<u8> {
        self.ptr.cast()
    }

    pub fn get_size(&self) -> usize {
        self.mem.get_size()
    }
}

impl MappedMem<NamedShmHandle> {
    pub fn get_path(&self) -> &CString {
        self.mem.get_path()
    }

    pub fn created(&self) -> bool {
        self.mem.created()
    }
}

impl<T> Drop for MappedMem<T>
where
    T: MemoryHandle,
{
    fn drop(&mut self) {
        unsafe {
            _ = munmap(self.ptr, self.mem.get_size());
        }
    }
}

// SAFETY: the mapping stays valid until drop; synchronization of the mapped
// contents is the responsibility of whatever structure lives inside it
// (atomics, SPSC ownership), same as for any shared allocation.
unsafe impl<T> Sync for MappedMem<T> where T: FileBackedHandle {}
unsafe impl<T> Send for MappedMem<T> where T: FileBackedHandle {}

#[cfg(test)]
mod tests {
    use super::*;

    fn unique_name(tag: &str) -> CString {
        CString::new(format!("/pluglint-shm-test-{}-{}", tag, std::process::id())).unwrap()
    }

    #[test]
    fn page_aligned_size_rounds_up() {
        let page = page_size::get();
        assert_eq!(page_aligned_size(1), page);
        assert_eq!(page_aligned_size(page), page);
        assert_eq!(page_aligned_size(page + 1), 2 * page);
    }

    #[test]
    fn anon_segment_maps_and_holds_data() {
        let handle = ShmHandle::new(4096).unwrap();
        assert_eq!(handle.size(), 4096);
        let mut map = handle.map().unwrap();
        map.as_slice_mut()[..4].copy_from_slice(b"ping");
        assert_eq!(&map.as_slice()[..4], b"ping");
    }

    #[test]
    fn named_create_open_unlink() {
        let name = unique_name("roundtrip");
        let created = NamedShmHandle::create(name.clone(), 4096).unwrap();
        assert!(created.created());
        let mut map = created.map().unwrap();
        map.as_slice_mut()[0] = 0xa5;

        let opened = NamedShmHandle::open(name.clone()).unwrap();
        assert!(!opened.created());
        assert_eq!(opened.get_shm().size(), 4096);
        let view = opened.map().unwrap();
        assert_eq!(view.as_slice()[0], 0xa5);

        NamedShmHandle::unlink(&name).unwrap();
        // idempotent
        NamedShmHandle::unlink(&name).unwrap();
        assert!(NamedShmHandle::open(name).is_err());
    }

    #[test]
    fn create_or_open_reports_creation() {
        let name = unique_name("create-or-open");
        let first = NamedShmHandle::create_or_open(name.clone(), 4096).unwrap();
        assert!(first.created());
        let second = NamedShmHandle::create_or_open(name.clone(), 4096).unwrap();
        assert!(!second.created());
        NamedShmHandle::unlink(&name).unwrap();
    }

    #[test]
    fn exclusive_create_fails_on_existing() {
        let name = unique_name("exclusive");
        let _first = NamedShmHandle::create(name.clone(), 4096).unwrap();
        let err = NamedShmHandle::create(name.clone(), 4096).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::AlreadyExists);
        NamedShmHandle::unlink(&name).unwrap();
    }
}
