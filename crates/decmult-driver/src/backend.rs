//! Backend abstraction for the action register window
//!
//! A backend is whatever sits behind the register file: a mapped device
//! window, or the software model of the accelerator. The host driver only
//! reads and writes the window through this trait.

use crate::error::{ActionError, Result};
use std::fmt::Debug;

/// Access to one action register file.
pub trait ActionBackend: Debug + Send {
    /// Open the backend for `device` (a path for mapped windows).
    ///
    /// # Errors
    ///
    /// Returns error if the device cannot be found or initialised.
    fn init(device: &str) -> Result<Self>
    where
        Self: Sized;

    /// Read `buf.len()` bytes of the window starting at `offset`.
    ///
    /// # Errors
    ///
    /// Returns error if the range is outside the window or not accessible.
    fn read_window(&self, offset: usize, buf: &mut [u8]) -> Result<()>;

    /// Write `data` into the window starting at `offset`.
    ///
    /// # Errors
    ///
    /// Returns error if the range is outside the window or not accessible.
    fn write_window(&mut self, offset: usize, data: &[u8]) -> Result<()>;

    /// Let the accelerator make progress.
    ///
    /// Hardware runs on its own; the software model does its work here.
    ///
    /// # Errors
    ///
    /// Returns error if the backend cannot be serviced.
    fn advance(&mut self) -> Result<()> {
        Ok(())
    }

    /// Read one 32-bit register.
    ///
    /// # Errors
    ///
    /// See [`read_window`](Self::read_window).
    fn read_register(&self, offset: usize) -> Result<u32> {
        let mut raw = [0u8; 4];
        self.read_window(offset, &mut raw)?;
        Ok(u32::from_le_bytes(raw))
    }

    /// Write one 32-bit register.
    ///
    /// # Errors
    ///
    /// See [`write_window`](Self::write_window).
    fn write_register(&mut self, offset: usize, value: u32) -> Result<()> {
        self.write_window(offset, &value.to_le_bytes())
    }

    /// Backend type for debugging
    fn backend_type(&self) -> BackendType;
}

/// Backend type identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackendType {
    /// Memory-mapped register window (UIO map, PCIe resource file)
    Mmap,

    /// Software model of the accelerator, no hardware required
    Software,
}

impl std::fmt::Display for BackendType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Mmap => write!(f, "Mmap"),
            Self::Software => write!(f, "Software (model)"),
        }
    }
}

/// Backend selection strategy
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackendSelection {
    /// Mapped window if the device path exists, software model otherwise
    Auto,

    /// Force the mapped window
    Mmap,

    /// Force the software model
    Software,
}

/// Select a backend for `device`.
///
/// # Errors
///
/// Returns error if the selected backend cannot be initialised.
pub fn select_backend(selection: BackendSelection, device: &str) -> Result<Box<dyn ActionBackend>> {
    use crate::backends::mmap::MmapBackend;
    use crate::backends::software::SoftwareAction;

    match selection {
        BackendSelection::Auto => {
            if std::path::Path::new(device).exists() {
                match MmapBackend::init(device) {
                    Ok(backend) => {
                        tracing::info!("Using mapped window {device}");
                        return Ok(Box::new(backend));
                    }
                    Err(e) => tracing::warn!("Cannot map {device}: {e}"),
                }
            }
            tracing::info!("No mapped window at {device:?}, using software model");
            SoftwareAction::init(device).map(|b| Box::new(b) as Box<dyn ActionBackend>)
        }

        BackendSelection::Mmap => {
            if device.is_empty() {
                return Err(ActionError::device_not_found(device));
            }
            MmapBackend::init(device).map(|b| Box::new(b) as Box<dyn ActionBackend>)
        }

        BackendSelection::Software => {
            SoftwareAction::init(device).map(|b| Box::new(b) as Box<dyn ActionBackend>)
        }
    }
}
