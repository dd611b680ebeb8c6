//! Element packing into bus words
//!
//! Host and accelerator move operands as whole bus words. These helpers turn
//! typed element slices into padded word images and back, using `bytemuck`
//! for the byte view. The trailing bytes of a partial last word are zero on
//! the way in and ignored on the way out.

use crate::error::{ActionError, Result};
use decmult_chip::{ElementWidth, PackingRule};
use std::fmt::Debug;
use std::ops::{Add, Mul};

/// Fixed-width decimal element the action multiplies.
pub trait Element:
    bytemuck::Pod + Debug + Default + PartialEq + Send + Sync + Add<Output = Self> + Mul<Output = Self>
{
    /// Descriptor width tag for this element type.
    const WIDTH: ElementWidth;

    /// Bits as stored in the descriptor's scalar field.
    fn to_scalar_bits(self) -> u64;

    /// Element from the descriptor's scalar field.
    fn from_scalar_bits(bits: u64) -> Self;
}

impl Element for f32 {
    const WIDTH: ElementWidth = ElementWidth::Single;

    fn to_scalar_bits(self) -> u64 {
        u64::from(self.to_bits())
    }

    #[allow(clippy::cast_possible_truncation)] // upper half is zero by construction
    fn from_scalar_bits(bits: u64) -> Self {
        Self::from_bits(bits as u32)
    }
}

impl Element for f64 {
    const WIDTH: ElementWidth = ElementWidth::Double;

    fn to_scalar_bits(self) -> u64 {
        self.to_bits()
    }

    fn from_scalar_bits(bits: u64) -> Self {
        Self::from_bits(bits)
    }
}

fn check_rule<E: Element>(rule: &PackingRule) -> Result<()> {
    if rule.element_bytes() != E::WIDTH.bytes() {
        return Err(ActionError::config_invalid(format!(
            "packing rule is for {} B elements, got {}",
            rule.element_bytes(),
            E::WIDTH
        )));
    }
    Ok(())
}

/// Pack elements into whole bus words, zero-filling the last word.
///
/// # Errors
///
/// Returns [`ActionError::ConfigInvalid`] if `rule` is for another element size.
pub fn pack_words<E: Element>(elements: &[E], rule: &PackingRule) -> Result<Vec<u8>> {
    check_rule::<E>(rule)?;
    let payload: &[u8] = bytemuck::cast_slice(elements);
    let mut words = vec![0u8; rule.padded_bytes(elements.len())];
    words[..payload.len()].copy_from_slice(payload);
    Ok(words)
}

/// Unpack the first `count` elements from a word image.
///
/// # Errors
///
/// Returns [`ActionError::ConfigInvalid`] if `rule` is for another element
/// size, and [`ActionError::TransferFailed`] if `words` is too short.
pub fn unpack_words<E: Element>(words: &[u8], count: usize, rule: &PackingRule) -> Result<Vec<E>> {
    check_rule::<E>(rule)?;
    let payload = rule.payload_bytes(count);
    if words.len() < payload {
        return Err(ActionError::transfer_failed(format!(
            "word image holds {} B, {count} elements need {payload} B",
            words.len()
        )));
    }
    Ok(words[..payload]
        .chunks_exact(rule.element_bytes())
        .map(bytemuck::pod_read_unaligned)
        .collect())
}

/// Append the `valid` leading elements of one bus word to `out`.
pub(crate) fn unpack_word_into<E: Element>(word: &[u8], valid: usize, out: &mut Vec<E>) {
    let size = E::WIDTH.bytes();
    out.extend(
        word[..valid * size]
            .chunks_exact(size)
            .map(bytemuck::pod_read_unaligned::<E>),
    );
}
