//! Error types for layout and packing checks

use thiserror::Error;

/// Result type alias for layout operations
pub type Result<T> = std::result::Result<T, LayoutError>;

/// Errors raised while validating a packing configuration or decoding a
/// register image.
///
/// Carries only plain integers so it can be produced from `const fn`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum LayoutError {
    /// Bus word or element size is zero
    #[error("Invalid packing: bus word {bus_word_bytes} B, element {element_bytes} B (sizes must be non-zero)")]
    ZeroSize {
        /// Configured bus word size in bytes
        bus_word_bytes: usize,
        /// Configured element size in bytes
        element_bytes: usize,
    },

    /// Bus word is not a whole multiple of the element size
    #[error("Invalid packing: bus word {bus_word_bytes} B is not a multiple of element {element_bytes} B")]
    Misaligned {
        /// Configured bus word size in bytes
        bus_word_bytes: usize,
        /// Configured element size in bytes
        element_bytes: usize,
    },

    /// Element size is neither single (4 B) nor double (8 B)
    #[error("Unsupported element size: {bytes} B (expected 4 or 8)")]
    UnsupportedElementSize {
        /// Element size found
        bytes: usize,
    },

    /// Operation selector does not name a known operation
    #[error("Unknown operation selector: {raw:#06x}")]
    UnknownOperation {
        /// Raw selector value
        raw: u16,
    },

    /// Shape fields disagree with the declared element count
    #[error("Inconsistent shape: {rows}x{inner} operand does not hold {element_count} elements")]
    InconsistentShape {
        /// Declared element count
        element_count: u32,
        /// Declared rows
        rows: u32,
        /// Declared inner dimension
        inner: u32,
    },

    /// Byte image shorter than the record it should hold
    #[error("Register image too short: got {got} B, need {need} B")]
    ShortImage {
        /// Bytes supplied
        got: usize,
        /// Bytes required
        need: usize,
    },
}
