//! Layout release level and compatibility.
//!
//! The accelerator reports its layout version in the RELEASE register
//! ([`crate::control::regs::RELEASE`]). Host and accelerator are compiled
//! separately; the host must refuse to drive a window whose release differs
//! from the one it was built against.

/// Layout version of the register file defined by this crate.
///
/// Bump whenever the control block, the descriptor, or the register file size
/// changes.
pub const RELEASE_LEVEL: u32 = 0x0000_0010;

/// Compatibility of a release level read back from hardware.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Release {
    /// Same layout as this build.
    Current,
    /// Register reads as zero: nothing has come out of reset yet, or the
    /// window is not backed by an action.
    Unprogrammed,
    /// A different layout version.
    Other(u32),
}

impl Release {
    /// Classify a raw RELEASE register value.
    #[must_use]
    pub const fn from_register(raw: u32) -> Self {
        match raw {
            RELEASE_LEVEL => Self::Current,
            0 => Self::Unprogrammed,
            other => Self::Other(other),
        }
    }

    /// True if the host may drive the window.
    #[must_use]
    pub const fn is_compatible(&self) -> bool {
        matches!(self, Self::Current)
    }
}
