//! Job descriptor: one decimal-multiply job as the host writes it.
//!
//! The descriptor follows the control block in the register file. The host
//! builds it once per submission; the accelerator decodes it when it observes
//! START and never writes it.
//!
//! ## Format
//!
//! ```text
//! 0x00  u16  operation        1 elementwise, 2 scale, 3 matrix product
//! 0x02  u16  element bytes    4 (single) or 8 (double)
//! 0x04  u32  element count    elements in operand A
//! 0x08  u32  rows             matrix product only
//! 0x0C  u32  cols             matrix product only
//! 0x10  u32  inner            matrix product only
//! 0x14  u32  reserved
//! 0x18  u64  scalar           element bits, zero-extended (scale only)
//! 0x20  BufferAddr  operand A
//! 0x30  BufferAddr  operand B
//! 0x40  BufferAddr  destination
//! 0x50  end (80 B)
//! ```
//!
//! `BufferAddr` is `{ u64 addr, u32 size, u32 reserved }`, 16 bytes.

use crate::error::{LayoutError, Result};
use crate::packing::ElementWidth;
use crate::wire::{get_u16, get_u32, get_u64, put_u16, put_u32, put_u64};

/// Size of an encoded descriptor in bytes.
pub const JOB_DESCRIPTOR_SIZE: usize = 0x50;

/// Bytes reserved for the descriptor in the register file (descriptor + padding).
pub const JOB_AREA_SIZE: usize = 108;

/// Size of an encoded [`BufferAddr`].
pub const BUFFER_ADDR_SIZE: usize = 16;

/// Field offsets inside the descriptor.
pub mod fields {
    /// Operation selector (u16).
    pub const OPERATION: usize = 0x00;
    /// Element size in bytes (u16).
    pub const ELEMENT_BYTES: usize = 0x02;
    /// Operand A element count (u32).
    pub const ELEMENT_COUNT: usize = 0x04;
    /// Matrix rows (u32).
    pub const ROWS: usize = 0x08;
    /// Matrix columns (u32).
    pub const COLS: usize = 0x0C;
    /// Matrix inner dimension (u32).
    pub const INNER: usize = 0x10;
    /// Scalar operand bits (u64).
    pub const SCALAR: usize = 0x18;
    /// Operand A buffer.
    pub const SRC_A: usize = 0x20;
    /// Operand B buffer.
    pub const SRC_B: usize = 0x30;
    /// Destination buffer.
    pub const DST: usize = 0x40;
}

const _: () = assert!(fields::DST + BUFFER_ADDR_SIZE == JOB_DESCRIPTOR_SIZE);
const _: () = assert!(JOB_DESCRIPTOR_SIZE <= JOB_AREA_SIZE);

/// Multiply operation selected by a job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u16)]
pub enum Operation {
    /// `dst[i] = a[i] × b[i]`.
    Elementwise = 1,
    /// `dst[i] = a[i] × scalar`.
    Scale = 2,
    /// `dst[rows × cols] = a[rows × inner] × b[inner × cols]`, row-major.
    MatrixProduct = 3,
}

impl Operation {
    /// Decode the selector field.
    ///
    /// # Errors
    ///
    /// Returns [`LayoutError::UnknownOperation`] for unassigned selectors.
    pub const fn from_raw(raw: u16) -> Result<Self> {
        match raw {
            1 => Ok(Self::Elementwise),
            2 => Ok(Self::Scale),
            3 => Ok(Self::MatrixProduct),
            _ => Err(LayoutError::UnknownOperation { raw }),
        }
    }

    /// True if the operation reads operand B.
    #[must_use]
    pub const fn uses_operand_b(self) -> bool {
        !matches!(self, Self::Scale)
    }
}

impl std::fmt::Display for Operation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Elementwise => write!(f, "elementwise"),
            Self::Scale => write!(f, "scale"),
            Self::MatrixProduct => write!(f, "matrix product"),
        }
    }
}

/// Device-visible buffer location.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct BufferAddr {
    /// Bus address of the first byte.
    pub addr: u64,
    /// Buffer size in bytes.
    pub size: u32,
}

impl BufferAddr {
    /// Buffer at `addr` spanning `size` bytes.
    #[must_use]
    pub const fn new(addr: u64, size: u32) -> Self {
        Self { addr, size }
    }

    /// Unused operand slot.
    #[must_use]
    pub const fn none() -> Self {
        Self { addr: 0, size: 0 }
    }

    fn encode_into(self, bytes: &mut [u8], off: usize) {
        put_u64(bytes, off, self.addr);
        put_u32(bytes, off + 8, self.size);
        put_u32(bytes, off + 12, 0);
    }

    fn decode_from(bytes: &[u8], off: usize) -> Self {
        Self {
            addr: get_u64(bytes, off),
            size: get_u32(bytes, off + 8),
        }
    }
}

/// Decoded job descriptor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct JobDescriptor {
    /// Operation to perform.
    pub operation: Operation,
    /// Element width the host packed the operands with.
    pub element_width: ElementWidth,
    /// Elements in operand A.
    pub element_count: u32,
    /// Matrix rows (matrix product only).
    pub rows: u32,
    /// Matrix columns (matrix product only).
    pub cols: u32,
    /// Matrix inner dimension (matrix product only).
    pub inner: u32,
    /// Scalar bits, zero-extended to 64 bits (scale only).
    pub scalar_bits: u64,
    /// Operand A buffer.
    pub src_a: BufferAddr,
    /// Operand B buffer.
    pub src_b: BufferAddr,
    /// Destination buffer.
    pub dst: BufferAddr,
}

impl JobDescriptor {
    /// Elementwise product of two `count`-element operands.
    #[must_use]
    pub const fn elementwise(
        element_width: ElementWidth,
        count: u32,
        src_a: BufferAddr,
        src_b: BufferAddr,
        dst: BufferAddr,
    ) -> Self {
        Self {
            operation: Operation::Elementwise,
            element_width,
            element_count: count,
            rows: 0,
            cols: 0,
            inner: 0,
            scalar_bits: 0,
            src_a,
            src_b,
            dst,
        }
    }

    /// Product of a `count`-element operand with a scalar.
    #[must_use]
    pub const fn scale(
        element_width: ElementWidth,
        count: u32,
        scalar_bits: u64,
        src_a: BufferAddr,
        dst: BufferAddr,
    ) -> Self {
        Self {
            operation: Operation::Scale,
            element_width,
            element_count: count,
            rows: 0,
            cols: 0,
            inner: 0,
            scalar_bits,
            src_a,
            src_b: BufferAddr::none(),
            dst,
        }
    }

    /// Row-major matrix product `a[rows × inner] × b[inner × cols]`.
    #[must_use]
    pub const fn matrix_product(
        element_width: ElementWidth,
        rows: u32,
        inner: u32,
        cols: u32,
        src_a: BufferAddr,
        src_b: BufferAddr,
        dst: BufferAddr,
    ) -> Self {
        Self {
            operation: Operation::MatrixProduct,
            element_width,
            element_count: rows.saturating_mul(inner),
            rows,
            cols,
            inner,
            scalar_bits: 0,
            src_a,
            src_b,
            dst,
        }
    }

    /// Elements read from operand A.
    #[must_use]
    pub const fn operand_a_count(&self) -> u64 {
        self.element_count as u64
    }

    /// Elements read from operand B (zero for scale).
    #[must_use]
    pub const fn operand_b_count(&self) -> u64 {
        match self.operation {
            Operation::Elementwise => self.element_count as u64,
            Operation::Scale => 0,
            Operation::MatrixProduct => self.inner as u64 * self.cols as u64,
        }
    }

    /// Elements written to the destination.
    #[must_use]
    pub const fn output_count(&self) -> u64 {
        match self.operation {
            Operation::Elementwise | Operation::Scale => self.element_count as u64,
            Operation::MatrixProduct => self.rows as u64 * self.cols as u64,
        }
    }

    /// Check shape fields against the element count.
    ///
    /// # Errors
    ///
    /// Returns [`LayoutError::InconsistentShape`] if a matrix product's
    /// `rows × inner` differs from the element count.
    pub const fn check_shape(&self) -> Result<()> {
        if let Operation::MatrixProduct = self.operation {
            if self.rows as u64 * self.inner as u64 != self.element_count as u64 {
                return Err(LayoutError::InconsistentShape {
                    element_count: self.element_count,
                    rows: self.rows,
                    inner: self.inner,
                });
            }
        }
        Ok(())
    }

    /// Encode to the descriptor image.
    #[must_use]
    pub fn encode(&self) -> [u8; JOB_DESCRIPTOR_SIZE] {
        let mut out = [0u8; JOB_DESCRIPTOR_SIZE];
        put_u16(&mut out, fields::OPERATION, self.operation as u16);
        put_u16(&mut out, fields::ELEMENT_BYTES, self.element_width as u16);
        put_u32(&mut out, fields::ELEMENT_COUNT, self.element_count);
        put_u32(&mut out, fields::ROWS, self.rows);
        put_u32(&mut out, fields::COLS, self.cols);
        put_u32(&mut out, fields::INNER, self.inner);
        put_u64(&mut out, fields::SCALAR, self.scalar_bits);
        self.src_a.encode_into(&mut out, fields::SRC_A);
        self.src_b.encode_into(&mut out, fields::SRC_B);
        self.dst.encode_into(&mut out, fields::DST);
        out
    }

    /// Decode and shape-check a descriptor image.
    ///
    /// # Errors
    ///
    /// Returns [`LayoutError::ShortImage`] for truncated input,
    /// [`LayoutError::UnknownOperation`] or
    /// [`LayoutError::UnsupportedElementSize`] for bad selectors, and
    /// [`LayoutError::InconsistentShape`] for a malformed matrix shape.
    pub fn decode(bytes: &[u8]) -> Result<Self> {
        if bytes.len() < JOB_DESCRIPTOR_SIZE {
            return Err(LayoutError::ShortImage {
                got: bytes.len(),
                need: JOB_DESCRIPTOR_SIZE,
            });
        }
        let job = Self {
            operation: Operation::from_raw(get_u16(bytes, fields::OPERATION))?,
            element_width: ElementWidth::from_bytes(get_u16(bytes, fields::ELEMENT_BYTES) as usize)?,
            element_count: get_u32(bytes, fields::ELEMENT_COUNT),
            rows: get_u32(bytes, fields::ROWS),
            cols: get_u32(bytes, fields::COLS),
            inner: get_u32(bytes, fields::INNER),
            scalar_bits: get_u64(bytes, fields::SCALAR),
            src_a: BufferAddr::decode_from(bytes, fields::SRC_A),
            src_b: BufferAddr::decode_from(bytes, fields::SRC_B),
            dst: BufferAddr::decode_from(bytes, fields::DST),
        };
        job.check_shape()?;
        Ok(job)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_matrix() -> JobDescriptor {
        JobDescriptor::matrix_product(
            ElementWidth::Double,
            2,
            3,
            4,
            BufferAddr::new(0x1000, 64),
            BufferAddr::new(0x2000, 128),
            BufferAddr::new(0x3000, 64),
        )
    }

    #[test]
    fn field_offsets_in_image() {
        let job = sample_matrix();
        let image = job.encode();
        assert_eq!(image[fields::OPERATION], 3);
        assert_eq!(image[fields::ELEMENT_BYTES], 8);
        assert_eq!(image[fields::ELEMENT_COUNT], 6);
        assert_eq!(image[fields::ROWS], 2);
        assert_eq!(image[fields::COLS], 4);
        assert_eq!(image[fields::INNER], 3);
        assert_eq!(&image[fields::SRC_B..fields::SRC_B + 8], &0x2000u64.to_le_bytes());
        assert_eq!(image[fields::SRC_B + 8], 128);
    }

    #[test]
    fn decode_restores_descriptor() {
        let job = sample_matrix();
        assert_eq!(JobDescriptor::decode(&job.encode()), Ok(job));
    }

    #[test]
    fn counts_per_operation() {
        let m = sample_matrix();
        assert_eq!(m.operand_a_count(), 6);
        assert_eq!(m.operand_b_count(), 12);
        assert_eq!(m.output_count(), 8);

        let s = JobDescriptor::scale(ElementWidth::Single, 5, 0, BufferAddr::none(), BufferAddr::none());
        assert_eq!(s.operand_b_count(), 0);
        assert_eq!(s.output_count(), 5);
        assert!(!s.operation.uses_operand_b());
    }

    #[test]
    fn unknown_operation_rejected() {
        let mut image = sample_matrix().encode();
        image[fields::OPERATION] = 9;
        assert_eq!(
            JobDescriptor::decode(&image),
            Err(LayoutError::UnknownOperation { raw: 9 })
        );
    }

    #[test]
    fn bad_element_size_rejected() {
        let mut image = sample_matrix().encode();
        image[fields::ELEMENT_BYTES] = 2;
        assert_eq!(
            JobDescriptor::decode(&image),
            Err(LayoutError::UnsupportedElementSize { bytes: 2 })
        );
    }

    #[test]
    fn inconsistent_matrix_shape_rejected() {
        let mut job = sample_matrix();
        job.element_count = 7;
        assert!(matches!(
            JobDescriptor::decode(&job.encode()),
            Err(LayoutError::InconsistentShape { element_count: 7, rows: 2, inner: 3 })
        ));
    }

    #[test]
    fn short_image_rejected() {
        assert_eq!(
            JobDescriptor::decode(&[0u8; 10]),
            Err(LayoutError::ShortImage { got: 10, need: JOB_DESCRIPTOR_SIZE })
        );
    }
}
