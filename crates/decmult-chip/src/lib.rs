//! Register-level model of the decimal-multiply accelerator action.
//!
//! This crate has **no hardware access**. It is a pure model of the contract
//! the host and the accelerator share: the control block registers, the job
//! descriptor layout, the padded action register file, and the rule that packs
//! fixed-width decimal elements into wide bus words.
//!
//! Host and accelerator are built independently and must agree byte for byte.
//! Every size in here is checked at compile time; see [`regfile`].
//!
//! # Crate organisation
//!
//! | Module | Contents |
//! |--------|----------|
//! | [`release`] | `RELEASE_LEVEL` and layout compatibility checks |
//! | [`packing`] | Bus word / element packing rule, default bus constants |
//! | [`control`] | Control block registers, bit definitions, state machine |
//! | [`job`] | Job descriptor format and operations |
//! | [`regfile`] | Action register file: control + job + padding |
//!
//! # Register file layout
//!
//! ```text
//! 0x00  ControlBlock     16 B   CONTROL / STATUS / ERROR_CODE / RELEASE
//! 0x10  JobDescriptor    80 B   operation, counts, shape, three buffers
//! 0x60  padding          28 B   always zero, never interpreted
//! 0x7C  end (124 B = 16 B control + 108 B job area)
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::all, clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod control;
mod error;
pub mod job;
pub mod packing;
pub mod regfile;
pub mod release;
mod wire;

pub use control::{ActionState, ControlBlock, ControlEvent, JobErrorCode};
pub use error::{LayoutError, Result};
pub use job::{BufferAddr, JobDescriptor, Operation};
pub use packing::{ElementWidth, PackingRule};
pub use regfile::ActionRegisterFile;
pub use release::RELEASE_LEVEL;
