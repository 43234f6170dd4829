//! Shared memory regions backing a ring channel
//!
//! The ring protocol only needs a raw, writable byte range that stays at a
//! fixed address for its whole lifetime. `HeapRegion` provides one inside a
//! single process (tests, loopback setups). `MappedRegion` maps a named POSIX
//! shared memory object so that the device server and a client in another
//! process see the same bytes.

use std::alloc::{self, Layout};
use std::ptr::NonNull;

use crate::constants::{SC_MM_HEADER_SIZE, SC_MM_SLOT_SIZE};
use crate::error::{Result, SuperCanError};

/// Alignment of every region handed out by this module
pub const REGION_ALIGN: usize = 8;

/// Number of bytes a ring with `capacity` slots occupies
pub fn required_size(capacity: u32) -> usize {
    SC_MM_HEADER_SIZE + capacity as usize * SC_MM_SLOT_SIZE
}

/// A fixed block of memory shared between a ring producer and consumer
///
/// # Safety
///
/// Implementors must guarantee that `as_ptr()` points to `len()` bytes that
/// are valid for reads and writes, never move, and stay mapped until the value
/// is dropped. The memory may be written concurrently by another process, so
/// it must never be handed out as a Rust reference to non-atomic data.
pub unsafe trait SharedRegion: Send + Sync {
    /// Start of the region
    fn as_ptr(&self) -> *mut u8;

    /// Size of the region in bytes
    fn len(&self) -> usize;

    /// Whether the region has no bytes
    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Zero initialized in-process region
#[derive(Debug)]
pub struct HeapRegion {
    ptr: NonNull<u8>,
    layout: Layout,
}

// SAFETY: the allocation is owned and only accessed through raw pointers by the
// ring, which provides its own synchronization.
unsafe impl Send for HeapRegion {}
unsafe impl Sync for HeapRegion {}

impl HeapRegion {
    /// Allocate a zeroed region large enough for `capacity` slots
    pub fn new(capacity: u32) -> Result<Self> {
        Self::with_size(required_size(capacity))
    }

    /// Allocate a zeroed region of exactly `size` bytes
    pub fn with_size(size: usize) -> Result<Self> {
        let layout = Layout::from_size_align(size.max(1), REGION_ALIGN)
            .map_err(|_| SuperCanError::RegionTooSmall { required: size, actual: 0 })?;

        // SAFETY: layout has a non-zero size.
        let raw = unsafe { alloc::alloc_zeroed(layout) };
        let ptr = match NonNull::new(raw) {
            Some(ptr) => ptr,
            None => alloc::handle_alloc_error(layout),
        };

        Ok(Self { ptr, layout })
    }
}

unsafe impl SharedRegion for HeapRegion {
    fn as_ptr(&self) -> *mut u8 {
        self.ptr.as_ptr()
    }

    fn len(&self) -> usize {
        self.layout.size()
    }
}

impl Drop for HeapRegion {
    fn drop(&mut self) {
        // SAFETY: ptr was returned by alloc_zeroed with this layout.
        unsafe { alloc::dealloc(self.ptr.as_ptr(), self.layout) };
    }
}

#[cfg(unix)]
pub use self::mapped::MappedRegion;

#[cfg(unix)]
mod mapped {
    use std::ffi::CString;
    use std::io;
    use std::ptr::{self, NonNull};

    use log::{debug, warn};

    use super::{required_size, SharedRegion};
    use crate::error::{Result, SuperCanError};

    /// Named POSIX shared memory object mapped read/write
    ///
    /// The creating side owns the name and unlinks it on drop. Openers only
    /// unmap.
    #[derive(Debug)]
    pub struct MappedRegion {
        ptr: NonNull<u8>,
        size: usize,
        name: CString,
        owner: bool,
    }

    // SAFETY: the mapping is MAP_SHARED memory accessed only through raw
    // pointers by the ring.
    unsafe impl Send for MappedRegion {}
    unsafe impl Sync for MappedRegion {}

    impl MappedRegion {
        /// Create (or truncate) the shared memory object `name` for `capacity` slots
        ///
        /// `name` follows `shm_open` rules and should start with `/`.
        pub fn create(name: &str, capacity: u32) -> Result<Self> {
            let size = required_size(capacity);
            let c_name = shm_name(name)?;

            // SAFETY: c_name is a valid NUL terminated string.
            let fd = unsafe {
                libc::shm_open(
                    c_name.as_ptr(),
                    libc::O_CREAT | libc::O_RDWR | libc::O_TRUNC,
                    0o600 as libc::c_uint,
                )
            };
            if fd < 0 {
                return Err(io::Error::last_os_error().into());
            }

            // SAFETY: fd is an open shared memory descriptor.
            if unsafe { libc::ftruncate(fd, size as libc::off_t) } != 0 {
                let err = io::Error::last_os_error();
                unsafe {
                    libc::close(fd);
                    libc::shm_unlink(c_name.as_ptr());
                }
                return Err(err.into());
            }

            let region = map(fd, size, c_name, true);
            if region.is_ok() {
                debug!("Created shared memory {} ({} bytes)", name, size);
            }
            region
        }

        /// Open an existing shared memory object sized for `capacity` slots
        pub fn open(name: &str, capacity: u32) -> Result<Self> {
            let required = required_size(capacity);
            let c_name = shm_name(name)?;

            // SAFETY: c_name is a valid NUL terminated string.
            let fd = unsafe { libc::shm_open(c_name.as_ptr(), libc::O_RDWR, 0) };
            if fd < 0 {
                return Err(io::Error::last_os_error().into());
            }

            // SAFETY: fd is open, stat is plain data filled in by the kernel.
            let actual = unsafe {
                let mut stat: libc::stat = std::mem::zeroed();
                if libc::fstat(fd, &mut stat) != 0 {
                    let err = io::Error::last_os_error();
                    libc::close(fd);
                    return Err(err.into());
                }
                stat.st_size as usize
            };

            if actual < required {
                unsafe { libc::close(fd) };
                return Err(SuperCanError::RegionTooSmall { required, actual });
            }

            map(fd, required, c_name, false)
        }
    }

    fn shm_name(name: &str) -> Result<CString> {
        CString::new(name).map_err(|e| io::Error::new(io::ErrorKind::InvalidInput, e).into())
    }

    /// Map `size` bytes of `fd` and close the descriptor
    fn map(fd: libc::c_int, size: usize, name: CString, owner: bool) -> Result<MappedRegion> {
        // SAFETY: fd refers to an object of at least `size` bytes.
        let raw = unsafe {
            libc::mmap(
                ptr::null_mut(),
                size,
                libc::PROT_READ | libc::PROT_WRITE,
                libc::MAP_SHARED,
                fd,
                0,
            )
        };
        let err = io::Error::last_os_error();

        // The mapping keeps the object alive, the descriptor is not needed.
        unsafe { libc::close(fd) };

        if raw == libc::MAP_FAILED {
            if owner {
                unsafe { libc::shm_unlink(name.as_ptr()) };
            }
            return Err(err.into());
        }

        let ptr = NonNull::new(raw as *mut u8)
            .ok_or_else(|| io::Error::new(io::ErrorKind::Other, "mmap returned null"))?;

        Ok(MappedRegion { ptr, size, name, owner })
    }

    unsafe impl SharedRegion for MappedRegion {
        fn as_ptr(&self) -> *mut u8 {
            self.ptr.as_ptr()
        }

        fn len(&self) -> usize {
            self.size
        }
    }

    impl Drop for MappedRegion {
        fn drop(&mut self) {
            unsafe {
                if libc::munmap(self.ptr.as_ptr() as *mut libc::c_void, self.size) != 0 {
                    warn!("munmap failed: {}", io::Error::last_os_error());
                }
                if self.owner {
                    libc::shm_unlink(self.name.as_ptr());
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_required_size() {
        assert_eq!(required_size(0), 8);
        assert_eq!(required_size(4), 8 + 4 * 80);
        assert_eq!(required_size(256), 20488);
    }

    #[test]
    fn test_heap_region_is_zeroed_and_aligned() {
        let region = HeapRegion::new(4).unwrap();
        assert_eq!(region.len(), 328);
        assert_eq!(region.as_ptr() as usize % REGION_ALIGN, 0);

        let bytes = unsafe { std::slice::from_raw_parts(region.as_ptr(), region.len()) };
        assert!(bytes.iter().all(|&b| b == 0));
    }

    #[cfg(target_os = "linux")]
    #[test]
    fn test_mapped_region_shared_between_handles() {
        let name = format!("/supercan-test-{}", std::process::id());
        let created = MappedRegion::create(&name, 2).unwrap();
        let opened = MappedRegion::open(&name, 2).unwrap();
        assert_eq!(opened.len(), required_size(2));

        unsafe {
            *created.as_ptr().add(20) = 0x5A;
            assert_eq!(*opened.as_ptr().add(20), 0x5A);
        }

        assert!(matches!(
            MappedRegion::open(&name, 1000),
            Err(SuperCanError::RegionTooSmall { .. })
        ));
    }
}
