//! Host driver for the decimal-multiply accelerator action.
//!
//! Builds on the register model in `decmult-chip` to run jobs end to end:
//! pack operands into bus words, write the job descriptor, start the action,
//! wait for completion and read results back.
//!
//! # Backends
//!
//! ```text
//! MmapBackend     register window mapped from a device file (UIO, PCIe resource)
//! SoftwareAction  CPU model of the accelerator, same register semantics
//! ```
//!
//! # Quick start
//!
//! ```no_run
//! use decmult_driver::prelude::*;
//! use std::time::Duration;
//!
//! # fn main() -> Result<()> {
//! let action = SoftwareAction::new(ActionConfig::default())?;
//! let mut handle = ActionHandle::open(Box::new(action))?;
//!
//! let rule = handle.backend().packing();
//! let mem = handle.backend_mut().memory_mut();
//! let a = mem.alloc_elements(&[1.5f64, 2.0, 4.0], &rule)?;
//! let b = mem.alloc_elements(&[2.0f64, 0.5, 0.25], &rule)?;
//! let dst = mem.alloc_output(3, &rule)?;
//!
//! let job = JobDescriptor::elementwise(ElementWidth::Double, 3, a, b, dst);
//! handle.run(&job, Duration::from_millis(100))?;
//!
//! let out = handle.backend().memory().read_elements::<f64>(dst, 3, &rule)?;
//! assert_eq!(out, vec![3.0, 1.0, 1.0]);
//! # Ok(())
//! # }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all, clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::must_use_candidate)]
#![allow(clippy::doc_markdown)]

mod backend;
pub mod backends;
pub mod config;
mod error;
mod handle;
pub mod memory;
pub mod transfer;

pub use backend::{select_backend, ActionBackend, BackendSelection, BackendType};
pub use backends::{MmapBackend, MmapRegion, SoftwareAction};
pub use config::ActionConfig;
pub use error::{ActionError, Result};
pub use handle::{ActionHandle, Completion, DEFAULT_POLL_INTERVAL, DEFAULT_RESET_TIMEOUT};
pub use memory::HostMemory;
pub use transfer::{pack_words, unpack_words, Element};

/// Commonly used types.
pub mod prelude {
    pub use crate::{
        ActionBackend, ActionConfig, ActionError, ActionHandle, BackendSelection, Completion,
        Element, HostMemory, MmapBackend, Result, SoftwareAction,
    };
    pub use decmult_chip::{
        ActionState, BufferAddr, ElementWidth, JobDescriptor, JobErrorCode, Operation,
        PackingRule,
    };
}
