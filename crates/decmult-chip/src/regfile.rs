//! Action register file: the memory-mapped window the host drives.
//!
//! ```text
//! Offset  Size   Contents
//! ─────── ────── ──────────────────────────────────────────────
//!  0x00    16 B  ControlBlock
//!  0x10    80 B  JobDescriptor
//!  0x60    28 B  zero padding (job area is 108 B)
//!  0x7C          end of window, REGISTER_FILE_SIZE = 124 B
//! ```
//!
//! The padding absorbs descriptor growth without moving the window size. The
//! window size itself is part of the release: changing it requires bumping
//! [`RELEASE_LEVEL`](crate::RELEASE_LEVEL).

use crate::control::{ControlBlock, CONTROL_BLOCK_SIZE};
use crate::error::{LayoutError, Result};
use crate::job::{JobDescriptor, JOB_AREA_SIZE, JOB_DESCRIPTOR_SIZE};

/// Offset of the control block.
pub const CONTROL_OFFSET: usize = 0;

/// Offset of the job descriptor.
pub const JOB_OFFSET: usize = CONTROL_OFFSET + CONTROL_BLOCK_SIZE;

/// Offset of the zero padding after the descriptor.
pub const PADDING_OFFSET: usize = JOB_OFFSET + JOB_DESCRIPTOR_SIZE;

/// Bytes of zero padding.
pub const PADDING_SIZE: usize = JOB_AREA_SIZE - JOB_DESCRIPTOR_SIZE;

/// Total size of the register window.
pub const REGISTER_FILE_SIZE: usize = CONTROL_BLOCK_SIZE + JOB_AREA_SIZE;

// Layout contract. A failure here is a layout change and needs a new release.
const _: () = assert!(CONTROL_BLOCK_SIZE == 16);
const _: () = assert!(JOB_DESCRIPTOR_SIZE <= 108);
const _: () = assert!(CONTROL_BLOCK_SIZE + JOB_DESCRIPTOR_SIZE + PADDING_SIZE == REGISTER_FILE_SIZE);
const _: () = assert!(PADDING_OFFSET + PADDING_SIZE == REGISTER_FILE_SIZE);
const _: () = assert!(REGISTER_FILE_SIZE == 124);
// Accessed as 32-bit registers.
const _: () = assert!(REGISTER_FILE_SIZE % 4 == 0 && JOB_OFFSET % 4 == 0);

/// Decoded register file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ActionRegisterFile {
    /// Control block.
    pub control: ControlBlock,
    /// Job descriptor.
    pub job: JobDescriptor,
}

impl ActionRegisterFile {
    /// Encode the full window; padding bytes are zero.
    #[must_use]
    pub fn encode(&self) -> [u8; REGISTER_FILE_SIZE] {
        let mut out = [0u8; REGISTER_FILE_SIZE];
        out[CONTROL_OFFSET..JOB_OFFSET].copy_from_slice(&self.control.encode());
        out[JOB_OFFSET..PADDING_OFFSET].copy_from_slice(&self.job.encode());
        out
    }

    /// Decode a full window. Padding bytes are ignored.
    ///
    /// # Errors
    ///
    /// Returns [`LayoutError::ShortImage`] if the image is smaller than the
    /// window, or any descriptor decode error.
    pub fn decode(bytes: &[u8]) -> Result<Self> {
        if bytes.len() < REGISTER_FILE_SIZE {
            return Err(LayoutError::ShortImage {
                got: bytes.len(),
                need: REGISTER_FILE_SIZE,
            });
        }
        Ok(Self {
            control: ControlBlock::decode(&bytes[CONTROL_OFFSET..JOB_OFFSET])?,
            job: JobDescriptor::decode(&bytes[JOB_OFFSET..PADDING_OFFSET])?,
        })
    }

    /// Job area image (descriptor followed by zero padding), as the host
    /// writes it at [`JOB_OFFSET`].
    #[must_use]
    pub fn job_area(job: &JobDescriptor) -> [u8; JOB_AREA_SIZE] {
        let mut out = [0u8; JOB_AREA_SIZE];
        out[..JOB_DESCRIPTOR_SIZE].copy_from_slice(&job.encode());
        out
    }
}

#[cfg(test)]
#[allow(clippy::assertions_on_constants)]
mod tests {
    use super::*;
    use crate::job::BufferAddr;
    use crate::packing::ElementWidth;

    #[test]
    fn sizes_add_up() {
        assert_eq!(CONTROL_BLOCK_SIZE + JOB_DESCRIPTOR_SIZE + PADDING_SIZE, REGISTER_FILE_SIZE);
        assert_eq!(JOB_OFFSET, 16);
        assert_eq!(PADDING_OFFSET, 96);
        assert_eq!(PADDING_SIZE, 28);
        assert!(JOB_DESCRIPTOR_SIZE <= REGISTER_FILE_SIZE - CONTROL_BLOCK_SIZE);
    }

    #[test]
    fn padding_is_zero_and_window_decodes() {
        let file = ActionRegisterFile {
            control: ControlBlock { control: 1, release: crate::RELEASE_LEVEL, ..ControlBlock::default() },
            job: JobDescriptor::elementwise(
                ElementWidth::Single,
                3,
                BufferAddr::new(0x40, 64),
                BufferAddr::new(0x80, 64),
                BufferAddr::new(0xC0, 64),
            ),
        };
        let image = file.encode();
        assert!(image[PADDING_OFFSET..].iter().all(|&b| b == 0));
        assert_eq!(ActionRegisterFile::decode(&image), Ok(file));
    }

    #[test]
    fn padding_contents_are_not_interpreted() {
        let file = ActionRegisterFile {
            control: ControlBlock::default(),
            job: JobDescriptor::scale(ElementWidth::Double, 1, 2.0f64.to_bits(), BufferAddr::none(), BufferAddr::none()),
        };
        let mut image = file.encode();
        image[PADDING_OFFSET..].fill(0xA5);
        assert_eq!(ActionRegisterFile::decode(&image), Ok(file));
    }

    #[test]
    fn job_area_matches_window_slice() {
        let job = JobDescriptor::scale(ElementWidth::Single, 4, 0, BufferAddr::new(0, 64), BufferAddr::new(64, 64));
        let file = ActionRegisterFile { control: ControlBlock::default(), job };
        let area = ActionRegisterFile::job_area(&job);
        assert_eq!(&file.encode()[JOB_OFFSET..], &area[..]);
    }
}
