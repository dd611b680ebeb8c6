//! Action backend implementations
//!
//! Two backends available:
//! - **Mmap**: register window mapped from a device file (UIO map, PCIe
//!   resource file, or any file carrying the window image)
//! - **Software**: CPU model of the accelerator, no hardware required

pub mod mmap;
pub mod software;

pub use mmap::{MmapBackend, MmapRegion};
pub use software::SoftwareAction;
