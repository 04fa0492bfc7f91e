// Shared memory backend for Linux
// Named regions live under /dev/shm so a monitor in another process can open them by key

use std::fmt::Debug;
use std::fs::OpenOptions;
use std::io;
use std::ptr::NonNull;

#[cfg(target_os = "linux")]
use std::os::fd::{AsRawFd, IntoRawFd};
#[cfg(target_os = "linux")]
use std::os::unix::fs::OpenOptionsExt;

/// Directory backing POSIX shared memory on Linux.
pub const SHM_DIR: &str = "/dev/shm";

/// Shared memory backend trait for memory mapping
pub trait SharedMemoryBackend: Send + Sync + Debug {
    /// Get a pointer to the mapped memory region
    fn as_ptr(&self) -> *mut u8;

    /// Get the size of the mapped region in bytes
    fn size(&self) -> usize;

    /// Get the underlying file descriptor
    fn raw_handle(&self) -> RawHandle;

    /// Name the region was created or opened with
    fn name(&self) -> &str;
}

/// Platform-specific handle type
#[derive(Debug, Clone, Copy)]
pub enum RawHandle {
    /// Unix file descriptor (Linux)
    Fd(i32),
}

/// Path of the file backing a named region.
pub fn shm_path(name: &str) -> String {
    format!("{}/{}", SHM_DIR, name)
}

/// A region name must be a single path component without NUL bytes.
pub fn is_valid_name(name: &str) -> bool {
    !name.is_empty()
        && name.len() <= crate::Schema::registry::MAX_NAME_LEN
        && name != "."
        && name != ".."
        && !name.contains('/')
        && !name.contains('\0')
}

/// Create a new named shared memory region of exactly `size` bytes.
///
/// Fails with `AlreadyExists` if a region with this name exists, and with
/// the raw OS error (`ENOSPC`, `ENOMEM`) if the shared memory quota cannot
/// back the whole region. The memory is zero-initialized.
#[cfg(target_os = "linux")]
pub fn create_shared_memory(size: usize, name: &str) -> io::Result<Box<dyn SharedMemoryBackend>> {
    Ok(Box::new(LinuxSharedMemory::create(size, name)?))
}

/// Open an existing named region created by another process.
///
/// # Arguments
/// * `name` - Name of the shared memory region to attach to
/// * `min_size` - Minimum size the region must have
#[cfg(target_os = "linux")]
pub fn attach_shared_memory(name: &str, min_size: usize) -> io::Result<Box<dyn SharedMemoryBackend>> {
    Ok(Box::new(LinuxSharedMemory::attach(name, min_size)?))
}

/// Remove the name of a region. Existing mappings stay valid until unmapped.
/// Removing a name that is already gone is not an error.
#[cfg(target_os = "linux")]
pub fn unlink_shared_memory(name: &str) -> io::Result<()> {
    match std::fs::remove_file(shm_path(name)) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e),
    }
}

#[cfg(not(target_os = "linux"))]
pub fn create_shared_memory(_size: usize, _name: &str) -> io::Result<Box<dyn SharedMemoryBackend>> {
    Err(io::Error::new(
        io::ErrorKind::Unsupported,
        "Shared memory only supported on Linux",
    ))
}

#[cfg(not(target_os = "linux"))]
pub fn attach_shared_memory(_name: &str, _min_size: usize) -> io::Result<Box<dyn SharedMemoryBackend>> {
    Err(io::Error::new(
        io::ErrorKind::Unsupported,
        "Shared memory only supported on Linux",
    ))
}

#[cfg(not(target_os = "linux"))]
pub fn unlink_shared_memory(_name: &str) -> io::Result<()> {
    Err(io::Error::new(
        io::ErrorKind::Unsupported,
        "Shared memory only supported on Linux",
    ))
}

#[cfg(target_os = "linux")]
#[derive(Debug)]
pub struct LinuxSharedMemory {
    ptr: NonNull<u8>,
    size: usize,
    fd: i32,
    name: String,
}

// The mapping is plain shared memory; synchronization is done by the
// atomics stored inside it.
#[cfg(target_os = "linux")]
unsafe impl Send for LinuxSharedMemory {}
#[cfg(target_os = "linux")]
unsafe impl Sync for LinuxSharedMemory {}

#[cfg(target_os = "linux")]
impl LinuxSharedMemory {
    pub fn create(size: usize, name: &str) -> io::Result<Self> {
        if size == 0 || !is_valid_name(name) {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("invalid shared memory request: name '{}', size {}", name, size),
            ));
        }
        let path = shm_path(name);

        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create_new(true)
            .mode(0o600)
            .open(&path)?;

        // From here on the name exists; remove it again on any failure.
        let cleanup = |err: io::Error| {
            let _ = std::fs::remove_file(&path);
            err
        };

        let fd = file.as_raw_fd();
        if unsafe { libc::ftruncate(fd, size as libc::off_t) } != 0 {
            return Err(cleanup(io::Error::last_os_error()));
        }

        // Back every page now so quota exhaustion is an error here instead
        // of a SIGBUS on first write.
        let rc = unsafe { libc::posix_fallocate(fd, 0, size as libc::off_t) };
        if rc != 0 && rc != libc::EOPNOTSUPP && rc != libc::EINVAL {
            return Err(cleanup(io::Error::from_raw_os_error(rc)));
        }

        let ptr = map_shared(fd, size).map_err(cleanup)?;
        Ok(Self {
            ptr,
            size,
            fd: file.into_raw_fd(),
            name: name.to_string(),
        })
    }

    pub fn attach(name: &str, min_size: usize) -> io::Result<Self> {
        if !is_valid_name(name) {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("invalid shared memory name '{}'", name),
            ));
        }
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .open(shm_path(name))?;

        let size = file.metadata()?.len() as usize;
        if size < min_size || size == 0 {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                format!(
                    "Shared memory size too small: expected at least {} bytes, got {}",
                    min_size, size
                ),
            ));
        }

        let ptr = map_shared(file.as_raw_fd(), size)?;
        Ok(Self {
            ptr,
            size,
            fd: file.into_raw_fd(),
            name: name.to_string(),
        })
    }
}

#[cfg(target_os = "linux")]
fn map_shared(fd: i32, size: usize) -> io::Result<NonNull<u8>> {
    let ptr = unsafe {
        libc::mmap(
            std::ptr::null_mut(),
            size,
            libc::PROT_READ | libc::PROT_WRITE,
            libc::MAP_SHARED,
            fd,
            0,
        )
    };
    if ptr == libc::MAP_FAILED {
        return Err(io::Error::last_os_error());
    }
    NonNull::new(ptr as *mut u8)
        .ok_or_else(|| io::Error::new(io::ErrorKind::Other, "mmap returned a null mapping"))
}

#[cfg(target_os = "linux")]
impl Drop for LinuxSharedMemory {
    fn drop(&mut self) {
        unsafe {
            libc::munmap(self.ptr.as_ptr() as *mut libc::c_void, self.size);
            libc::close(self.fd);
        }
    }
}

#[cfg(target_os = "linux")]
impl SharedMemoryBackend for LinuxSharedMemory {
    fn as_ptr(&self) -> *mut u8 {
        self.ptr.as_ptr()
    }

    fn size(&self) -> usize {
        self.size
    }

    fn raw_handle(&self) -> RawHandle {
        RawHandle::Fd(self.fd)
    }

    fn name(&self) -> &str {
        &self.name
    }
}
