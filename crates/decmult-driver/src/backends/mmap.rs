//! Memory-mapped register window
//!
//! Maps a device file (UIO map, PCIe resource file) with `rustix` and exposes
//! the action register file through bounds-checked volatile 32-bit accesses.
//! Unsafe code is confined to the mapping, the volatile accesses and `Drop`.

use crate::backend::{ActionBackend, BackendType};
use crate::error::{ActionError, Result};
use decmult_chip::regfile::REGISTER_FILE_SIZE;
use rustix::mm::{mmap, munmap, MapFlags, ProtFlags};
use std::fs::{File, OpenOptions};
use std::os::unix::io::AsFd;
use std::path::{Path, PathBuf};
use std::ptr::NonNull;

/// Register access width.
const REGISTER_BYTES: usize = 4;

/// Shared read/write mapping of a device file.
#[derive(Debug)]
pub struct MmapRegion {
    ptr: NonNull<u8>,
    size: usize,
    _file: File,
    path: PathBuf,
}

// SAFETY: Send - the region owns its mapping exclusively; moving it between
// threads does not invalidate the mapping (mmap'd memory is process-wide).
unsafe impl Send for MmapRegion {}

// SAFETY: Sync - reads take &self and are bounds-checked volatile loads;
// writes require &mut self.
unsafe impl Sync for MmapRegion {}

impl MmapRegion {
    /// Map the whole of `path`.
    ///
    /// # Errors
    ///
    /// Returns [`ActionError::DeviceNotFound`] if the file does not exist,
    /// and [`ActionError::TransferFailed`] if it is empty or cannot be mapped.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        tracing::debug!("Mapping register window: {}", path.display());

        if !path.exists() {
            return Err(ActionError::device_not_found(path));
        }
        let file = OpenOptions::new().read(true).write(true).open(path)?;

        let size = usize::try_from(file.metadata()?.len())
            .map_err(|_| ActionError::transfer_failed("window larger than the address space"))?;
        if size == 0 {
            return Err(ActionError::transfer_failed(format!(
                "{} is empty (device not enabled?)",
                path.display()
            )));
        }

        // SAFETY: mmap preconditions hold:
        // - the file descriptor is valid (just opened) and stays open for the
        //   lifetime of the mapping (stored in `_file`)
        // - size is non-zero (checked above)
        // - READ|WRITE with SHARED so writes reach the device
        // - offset 0 is page aligned
        // - the mapping is released exactly once, in Drop
        let addr = unsafe {
            mmap(
                std::ptr::null_mut(),
                size,
                ProtFlags::READ | ProtFlags::WRITE,
                MapFlags::SHARED,
                file.as_fd(),
                0,
            )
            .map_err(|e| ActionError::transfer_failed(format!("mmap {}: {e}", path.display())))?
        };
        let ptr = NonNull::new(addr.cast::<u8>())
            .ok_or_else(|| ActionError::transfer_failed("mmap returned a null mapping"))?;

        tracing::info!("Mapped {} ({size} B at {ptr:p})", path.display());
        Ok(Self {
            ptr,
            size,
            _file: file,
            path: path.to_path_buf(),
        })
    }

    /// Mapped size in bytes.
    pub const fn size(&self) -> usize {
        self.size
    }

    /// File backing the mapping.
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn check(&self, offset: usize, op: &str) -> Result<()> {
        if offset % REGISTER_BYTES != 0 {
            return Err(ActionError::transfer_failed(format!(
                "Unaligned {op}: offset={offset:#x}"
            )));
        }
        if offset.checked_add(REGISTER_BYTES).map_or(true, |end| end > self.size) {
            return Err(ActionError::transfer_failed(format!(
                "Out of bounds {op}: offset={offset:#x}, size=4, limit={:#x}",
                self.size
            )));
        }
        Ok(())
    }

    /// Read the 32-bit register at `offset`.
    ///
    /// # Errors
    ///
    /// Returns error if `offset` is unaligned or out of bounds.
    pub fn read_u32(&self, offset: usize) -> Result<u32> {
        self.check(offset, "read")?;

        // SAFETY: volatile load from the mapped window.
        // - offset + 4 <= size (checked above), so the access is in the mapping
        // - the mapping is page aligned and offset is 4-byte aligned
        // - volatile keeps the compiler from caching accelerator-owned values
        #[allow(clippy::cast_ptr_alignment)]
        let raw = unsafe { self.ptr.as_ptr().add(offset).cast::<u32>().read_volatile() };

        let value = u32::from_le(raw);
        tracing::trace!("Read u32 @ {offset:#x} = {value:#x}");
        Ok(value)
    }

    /// Write the 32-bit register at `offset`.
    ///
    /// # Errors
    ///
    /// Returns error if `offset` is unaligned or out of bounds.
    pub fn write_u32(&mut self, offset: usize, value: u32) -> Result<()> {
        self.check(offset, "write")?;
        tracing::trace!("Write u32 @ {offset:#x} = {value:#x}");

        // SAFETY: volatile store to the mapped window.
        // - offset + 4 <= size (checked above), so the access is in the mapping
        // - the mapping is page aligned and offset is 4-byte aligned
        // - &mut self gives exclusive access from this process
        #[allow(clippy::cast_ptr_alignment)]
        unsafe {
            self.ptr
                .as_ptr()
                .add(offset)
                .cast::<u32>()
                .write_volatile(value.to_le());
        }
        Ok(())
    }
}

impl Drop for MmapRegion {
    fn drop(&mut self) {
        // SAFETY: ptr/size describe the mapping created in open(); Drop runs
        // at most once and no references into the mapping outlive self.
        unsafe {
            // Nothing to propagate to from Drop
            let _ = munmap(self.ptr.as_ptr().cast(), self.size);
        }
        tracing::debug!("Unmapped {}", self.path.display());
    }
}

/// Register file reached through a mapped window.
///
/// The register file starts `base` bytes into the mapping. Window accesses
/// are split into 32-bit register accesses, so offsets and lengths must be
/// multiples of four.
#[derive(Debug)]
pub struct MmapBackend {
    region: MmapRegion,
    base: usize,
}

impl MmapBackend {
    /// Map `path` with the register file at byte `base`.
    ///
    /// # Errors
    ///
    /// Returns error if the file cannot be mapped, `base` is unaligned, or the
    /// mapping is too small to hold the register file.
    pub fn open_at(path: impl AsRef<Path>, base: usize) -> Result<Self> {
        let region = MmapRegion::open(path)?;
        if base % REGISTER_BYTES != 0 {
            return Err(ActionError::config_invalid(format!(
                "register file base {base:#x} is not 4-byte aligned"
            )));
        }
        if base.saturating_add(REGISTER_FILE_SIZE) > region.size() {
            return Err(ActionError::transfer_failed(format!(
                "{} holds {} B, register file needs {REGISTER_FILE_SIZE} B at {base:#x}",
                region.path().display(),
                region.size()
            )));
        }
        Ok(Self { region, base })
    }

    /// Underlying mapping.
    pub const fn region(&self) -> &MmapRegion {
        &self.region
    }

    fn check_window(offset: usize, len: usize) -> Result<()> {
        if offset % REGISTER_BYTES != 0 || len % REGISTER_BYTES != 0 {
            return Err(ActionError::transfer_failed(format!(
                "window access {len} B at {offset:#x} is not register aligned"
            )));
        }
        if offset.checked_add(len).map_or(true, |end| end > REGISTER_FILE_SIZE) {
            return Err(ActionError::transfer_failed(format!(
                "window access {len} B at {offset:#x} exceeds {REGISTER_FILE_SIZE} B register file"
            )));
        }
        Ok(())
    }
}

impl ActionBackend for MmapBackend {
    fn init(device: &str) -> Result<Self> {
        Self::open_at(device, 0)
    }

    fn read_window(&self, offset: usize, buf: &mut [u8]) -> Result<()> {
        Self::check_window(offset, buf.len())?;
        for (i, chunk) in buf.chunks_exact_mut(REGISTER_BYTES).enumerate() {
            let value = self.region.read_u32(self.base + offset + i * REGISTER_BYTES)?;
            chunk.copy_from_slice(&value.to_le_bytes());
        }
        Ok(())
    }

    fn write_window(&mut self, offset: usize, data: &[u8]) -> Result<()> {
        Self::check_window(offset, data.len())?;
        for (i, chunk) in data.chunks_exact(REGISTER_BYTES).enumerate() {
            let value = u32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]);
            self.region
                .write_u32(self.base + offset + i * REGISTER_BYTES, value)?;
        }
        Ok(())
    }

    fn backend_type(&self) -> BackendType {
        BackendType::Mmap
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn window_file(len: usize) -> tempfile::NamedTempFile {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(&vec![0u8; len]).unwrap();
        file.flush().unwrap();
        file
    }

    #[test]
    fn missing_device_not_found() {
        let err = MmapRegion::open("/nonexistent/decmult/window").unwrap_err();
        assert!(matches!(err, ActionError::DeviceNotFound { .. }));
    }

    #[test]
    fn empty_file_rejected() {
        let file = window_file(0);
        assert!(MmapRegion::open(file.path()).is_err());
    }

    #[test]
    fn register_access_bounds_and_alignment() {
        let file = window_file(16);
        let mut region = MmapRegion::open(file.path()).unwrap();
        region.write_u32(12, 0xDEAD_BEEF).unwrap();
        assert_eq!(region.read_u32(12).unwrap(), 0xDEAD_BEEF);
        assert!(region.read_u32(16).is_err());
        assert!(region.read_u32(2).is_err());
        assert!(region.write_u32(usize::MAX - 1, 0).is_err());
    }

    #[test]
    fn too_small_for_register_file() {
        let file = window_file(REGISTER_FILE_SIZE - 4);
        assert!(MmapBackend::open_at(file.path(), 0).is_err());
        let file = window_file(REGISTER_FILE_SIZE);
        assert!(MmapBackend::open_at(file.path(), 4).is_err());
        assert!(MmapBackend::open_at(file.path(), 0).is_ok());
    }

    #[test]
    fn window_is_offset_by_base() {
        let file = window_file(0x100 + REGISTER_FILE_SIZE);
        let mut backend = MmapBackend::open_at(file.path(), 0x100).unwrap();
        backend.write_register(0xC, 0x10).unwrap();
        assert_eq!(backend.region().read_u32(0x10C).unwrap(), 0x10);
        assert_eq!(backend.read_register(0xC).unwrap(), 0x10);
    }

    #[test]
    fn unaligned_window_access_rejected() {
        let file = window_file(REGISTER_FILE_SIZE);
        let mut backend = MmapBackend::open_at(file.path(), 0).unwrap();
        assert!(backend.write_window(2, &[0; 4]).is_err());
        assert!(backend.write_window(0, &[0; 3]).is_err());
        let mut buf = [0u8; 8];
        assert!(backend.read_window(REGISTER_FILE_SIZE - 4, &mut buf).is_err());
    }
}
