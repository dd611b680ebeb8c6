//! Element packing rule: decimal elements in wide bus words.
//!
//! The memory bus moves data in fixed bus words (`BPERDW` bytes). Decimal
//! elements are narrower, so one word carries several elements:
//!
//! ```text
//! bus word (64 B)   | e0 | e1 | e2 | e3 | e4 | e5 | e6 | e7 |   8 × f64
//!                   | e0 | e1 | ...                  | e15 |   16 × f32
//! ```
//!
//! A buffer of `N` elements occupies `ceil(N × element / word)` words; when
//! `N` is not a multiple of the elements per word, the last word is only
//! partly populated and the remaining bytes are padding.
//!
//! Both sides use the same arithmetic: the host to size DMA transfers, the
//! accelerator to size its internal buffering.

use crate::error::{LayoutError, Result};

/// Bus width in bytes of the default platform (512-bit double-word bus).
pub const BUS_WORD_BYTES: usize = 64;

/// Maximum decimals a single job may read per operand on the default platform.
pub const MAX_ELEMENTS_PER_BATCH: usize = 16;

/// Packing of double-precision elements on the default bus.
pub const DOUBLE_ON_BUS: PackingRule = PackingRule::checked(BUS_WORD_BYTES, 8);

/// Packing of single-precision elements on the default bus.
pub const SINGLE_ON_BUS: PackingRule = PackingRule::checked(BUS_WORD_BYTES, 4);

// Default platform: 2 words per batch of doubles, 1 word per batch of singles.
const _: () = assert!(DOUBLE_ON_BUS.words_per_batch(MAX_ELEMENTS_PER_BATCH) == 2);
const _: () = assert!(SINGLE_ON_BUS.words_per_batch(MAX_ELEMENTS_PER_BATCH) == 1);

/// Width of one decimal element.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u16)]
pub enum ElementWidth {
    /// Single precision, 4 bytes.
    Single = 4,
    /// Double precision, 8 bytes.
    Double = 8,
}

impl ElementWidth {
    /// Size of one element in bytes.
    #[must_use]
    pub const fn bytes(self) -> usize {
        self as usize
    }

    /// Parse an element size in bytes.
    ///
    /// # Errors
    ///
    /// Returns [`LayoutError::UnsupportedElementSize`] for anything but 4 or 8.
    pub const fn from_bytes(bytes: usize) -> Result<Self> {
        match bytes {
            4 => Ok(Self::Single),
            8 => Ok(Self::Double),
            _ => Err(LayoutError::UnsupportedElementSize { bytes }),
        }
    }
}

impl std::fmt::Display for ElementWidth {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Single => write!(f, "single (4 B)"),
            Self::Double => write!(f, "double (8 B)"),
        }
    }
}

/// Validated bus word / element size pair.
///
/// Construction guarantees `bus_word_bytes % element_bytes == 0`, so every
/// derived quantity is exact.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PackingRule {
    bus_word_bytes: usize,
    element_bytes: usize,
}

impl PackingRule {
    /// Validate a bus word / element size pair.
    ///
    /// # Errors
    ///
    /// Returns [`LayoutError::ZeroSize`] if either size is zero, and
    /// [`LayoutError::Misaligned`] if the bus word is not a whole multiple of
    /// the element size.
    pub const fn new(bus_word_bytes: usize, element_bytes: usize) -> Result<Self> {
        if bus_word_bytes == 0 || element_bytes == 0 {
            return Err(LayoutError::ZeroSize {
                bus_word_bytes,
                element_bytes,
            });
        }
        if bus_word_bytes % element_bytes != 0 {
            return Err(LayoutError::Misaligned {
                bus_word_bytes,
                element_bytes,
            });
        }
        Ok(Self {
            bus_word_bytes,
            element_bytes,
        })
    }

    /// Build a rule from constants, failing compilation when used in a
    /// `const` item with a misaligned pair.
    ///
    /// # Panics
    ///
    /// Panics (a compile error in const context) if the pair is invalid.
    #[must_use]
    pub const fn checked(bus_word_bytes: usize, element_bytes: usize) -> Self {
        match Self::new(bus_word_bytes, element_bytes) {
            Ok(rule) => rule,
            Err(_) => panic!("bus word size must be a non-zero multiple of the element size"),
        }
    }

    /// Rule for a bus width and an element width.
    ///
    /// # Errors
    ///
    /// See [`PackingRule::new`].
    pub const fn for_width(bus_word_bytes: usize, width: ElementWidth) -> Result<Self> {
        Self::new(bus_word_bytes, width.bytes())
    }

    /// Bus word size in bytes.
    #[must_use]
    pub const fn bus_word_bytes(&self) -> usize {
        self.bus_word_bytes
    }

    /// Element size in bytes.
    #[must_use]
    pub const fn element_bytes(&self) -> usize {
        self.element_bytes
    }

    /// Elements carried by one bus word.
    #[must_use]
    pub const fn elements_per_word(&self) -> usize {
        self.bus_word_bytes / self.element_bytes
    }

    /// Bus words needed to carry `count` elements.
    #[must_use]
    pub const fn words_to_read(&self, count: usize) -> usize {
        (count * self.element_bytes).div_ceil(self.bus_word_bytes)
    }

    /// Bus words needed for the largest batch a job may declare.
    #[must_use]
    pub const fn words_per_batch(&self, max_elements: usize) -> usize {
        self.words_to_read(max_elements)
    }

    /// Valid elements in the final word of a `count`-element buffer.
    ///
    /// Zero for an empty buffer, otherwise between 1 and
    /// [`elements_per_word`](Self::elements_per_word).
    #[must_use]
    pub const fn valid_in_last_word(&self, count: usize) -> usize {
        if count == 0 {
            return 0;
        }
        match count % self.elements_per_word() {
            0 => self.elements_per_word(),
            rem => rem,
        }
    }

    /// Bytes occupied by `count` elements rounded up to whole bus words.
    #[must_use]
    pub const fn padded_bytes(&self, count: usize) -> usize {
        self.words_to_read(count) * self.bus_word_bytes
    }

    /// Bytes actually holding element data for `count` elements.
    #[must_use]
    pub const fn payload_bytes(&self, count: usize) -> usize {
        count * self.element_bytes
    }
}

impl std::fmt::Display for PackingRule {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} B word / {} B element = {} per word",
            self.bus_word_bytes,
            self.element_bytes,
            self.elements_per_word()
        )
    }
}
