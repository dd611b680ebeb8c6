//! Control block: the 16-byte header at the start of the register file.
//!
//! Four 32-bit little-endian registers. Host-owned and accelerator-owned bits
//! never share a register, so each side can write its own word without a
//! read-modify-write race.
//!
//! ```text
//! 0x00 CONTROL     host   bit0 START  bit1 RESET  bit2 IRQ_ENABLE  [31:16] SEQ
//! 0x04 STATUS      accel  bit0 RUNNING  bit1 DONE  bit2 IRQ_PENDING
//! 0x08 ERROR_CODE  accel  0 = success, see JobErrorCode
//! 0x0C RELEASE     accel  layout version (RELEASE_LEVEL)
//! ```
//!
//! START and RESET are self-clearing: the accelerator drops them once it has
//! acted on them.

use crate::error::{LayoutError, Result};
use crate::wire::{get_u32, put_u32};

/// Size of the control block in bytes.
pub const CONTROL_BLOCK_SIZE: usize = 16;

/// Register offsets inside the control block.
pub mod regs {
    /// Host command register.
    pub const CONTROL: usize = 0x00;
    /// Accelerator status register.
    pub const STATUS: usize = 0x04;
    /// Accelerator error code register.
    pub const ERROR_CODE: usize = 0x08;
    /// Layout release register.
    pub const RELEASE: usize = 0x0C;
}

// ── CONTROL register bit definitions ─────────────────────────────────────────

/// CONTROL register bits (host writes).
pub mod control {
    /// Start the job described in the register file.
    pub const START: u32 = 1 << 0;
    /// Return to idle after completion.
    pub const RESET: u32 = 1 << 1;
    /// Raise IRQ_PENDING on completion.
    pub const IRQ_ENABLE: u32 = 1 << 2;
    /// Job sequence number field shift.
    pub const SEQ_SHIFT: u32 = 16;
    /// Job sequence number field mask (after shifting).
    pub const SEQ_MASK: u32 = 0xFFFF;
}

// ── STATUS register bit definitions ──────────────────────────────────────────

/// STATUS register bits (accelerator writes).
pub mod status {
    /// Job latched and executing.
    pub const RUNNING: u32 = 1 << 0;
    /// Job finished; check ERROR_CODE.
    pub const DONE: u32 = 1 << 1;
    /// Completion interrupt raised.
    pub const IRQ_PENDING: u32 = 1 << 2;
}

/// Cause reported in the ERROR_CODE register.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum JobErrorCode {
    /// No error.
    None,
    /// Declared element count exceeds the maximum supported batch.
    JobOversized,
    /// Source or destination region invalid, misaligned, or unreachable.
    AddressFault,
    /// Datapath failure unrelated to packing.
    InternalFault,
    /// Descriptor undecodable or inconsistent.
    InvalidDescriptor,
    /// Code this build does not know.
    Unknown(u32),
}

impl JobErrorCode {
    /// Decode an ERROR_CODE register value.
    #[must_use]
    pub const fn from_register(raw: u32) -> Self {
        match raw {
            0 => Self::None,
            1 => Self::JobOversized,
            2 => Self::AddressFault,
            3 => Self::InternalFault,
            4 => Self::InvalidDescriptor,
            other => Self::Unknown(other),
        }
    }

    /// Register encoding.
    #[must_use]
    pub const fn code(self) -> u32 {
        match self {
            Self::None => 0,
            Self::JobOversized => 1,
            Self::AddressFault => 2,
            Self::InternalFault => 3,
            Self::InvalidDescriptor => 4,
            Self::Unknown(other) => other,
        }
    }

    /// True for any cause other than [`JobErrorCode::None`].
    #[must_use]
    pub const fn is_error(self) -> bool {
        !matches!(self, Self::None)
    }
}

impl std::fmt::Display for JobErrorCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::None => write!(f, "none"),
            Self::JobOversized => write!(f, "job oversized"),
            Self::AddressFault => write!(f, "address fault"),
            Self::InternalFault => write!(f, "internal fault"),
            Self::InvalidDescriptor => write!(f, "invalid descriptor"),
            Self::Unknown(code) => write!(f, "unknown error {code:#x}"),
        }
    }
}

/// Observable state of the action.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ActionState {
    /// Ready for a new job; host owns the register file.
    Idle,
    /// Job latched; accelerator owns the register file.
    Running,
    /// Job completed, error code zero.
    Done,
    /// Job failed with the given cause.
    Error(JobErrorCode),
}

/// Event driving the control state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlEvent {
    /// Host set START.
    Start,
    /// Accelerator wrote every declared element.
    Complete,
    /// Validation failure or datapath fault.
    Fault(JobErrorCode),
    /// Host set RESET.
    Reset,
}

impl ActionState {
    /// Next state after `event`, or `None` if the transition is not allowed.
    ///
    /// ```
    /// use decmult_chip::{ActionState, ControlEvent};
    ///
    /// assert_eq!(ActionState::Idle.apply(ControlEvent::Start), Some(ActionState::Running));
    /// assert_eq!(ActionState::Running.apply(ControlEvent::Start), None);
    /// ```
    #[must_use]
    pub const fn apply(self, event: ControlEvent) -> Option<Self> {
        match (self, event) {
            (Self::Idle, ControlEvent::Start) => Some(Self::Running),
            (Self::Running, ControlEvent::Complete) => Some(Self::Done),
            (Self::Running, ControlEvent::Fault(code)) if code.is_error() => {
                Some(Self::Error(code))
            }
            (Self::Done | Self::Error(_), ControlEvent::Reset) => Some(Self::Idle),
            _ => None,
        }
    }

    /// True once the job has finished, successfully or not.
    #[must_use]
    pub const fn is_complete(self) -> bool {
        matches!(self, Self::Done | Self::Error(_))
    }

    /// STATUS and ERROR_CODE register values reporting this state.
    #[must_use]
    pub const fn status_bits(self) -> (u32, u32) {
        match self {
            Self::Idle => (0, 0),
            Self::Running => (status::RUNNING, 0),
            Self::Done => (status::DONE, 0),
            Self::Error(code) => (status::DONE, code.code()),
        }
    }
}

impl std::fmt::Display for ActionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Idle => write!(f, "IDLE"),
            Self::Running => write!(f, "RUNNING"),
            Self::Done => write!(f, "DONE"),
            Self::Error(code) => write!(f, "ERROR ({code})"),
        }
    }
}

/// Decoded control block.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ControlBlock {
    /// CONTROL register.
    pub control: u32,
    /// STATUS register.
    pub status: u32,
    /// ERROR_CODE register.
    pub error_code: u32,
    /// RELEASE register.
    pub release: u32,
}

impl ControlBlock {
    /// CONTROL value starting job `seq`, optionally with the completion interrupt.
    #[must_use]
    pub const fn start_command(seq: u16, irq: bool) -> u32 {
        let mut value = control::START | ((seq as u32) << control::SEQ_SHIFT);
        if irq {
            value |= control::IRQ_ENABLE;
        }
        value
    }

    /// State reported by STATUS and ERROR_CODE.
    #[must_use]
    pub const fn state(&self) -> ActionState {
        if self.status & status::DONE != 0 {
            match JobErrorCode::from_register(self.error_code) {
                JobErrorCode::None => ActionState::Done,
                code => ActionState::Error(code),
            }
        } else if self.status & status::RUNNING != 0 {
            ActionState::Running
        } else {
            ActionState::Idle
        }
    }

    /// Job sequence number in CONTROL.
    #[must_use]
    pub const fn seq(&self) -> u16 {
        ((self.control >> control::SEQ_SHIFT) & control::SEQ_MASK) as u16
    }

    /// True if START is pending.
    #[must_use]
    pub const fn start_requested(&self) -> bool {
        self.control & control::START != 0
    }

    /// True if RESET is pending.
    #[must_use]
    pub const fn reset_requested(&self) -> bool {
        self.control & control::RESET != 0
    }

    /// True if the completion interrupt is enabled.
    #[must_use]
    pub const fn irq_enabled(&self) -> bool {
        self.control & control::IRQ_ENABLE != 0
    }

    /// True if a completion interrupt is pending.
    #[must_use]
    pub const fn irq_pending(&self) -> bool {
        self.status & status::IRQ_PENDING != 0
    }

    /// Encode to the register image.
    #[must_use]
    pub fn encode(&self) -> [u8; CONTROL_BLOCK_SIZE] {
        let mut out = [0u8; CONTROL_BLOCK_SIZE];
        put_u32(&mut out, regs::CONTROL, self.control);
        put_u32(&mut out, regs::STATUS, self.status);
        put_u32(&mut out, regs::ERROR_CODE, self.error_code);
        put_u32(&mut out, regs::RELEASE, self.release);
        out
    }

    /// Decode from the start of a register image.
    ///
    /// # Errors
    ///
    /// Returns [`LayoutError::ShortImage`] if fewer than 16 bytes are supplied.
    pub fn decode(bytes: &[u8]) -> Result<Self> {
        if bytes.len() < CONTROL_BLOCK_SIZE {
            return Err(LayoutError::ShortImage {
                got: bytes.len(),
                need: CONTROL_BLOCK_SIZE,
            });
        }
        Ok(Self {
            control: get_u32(bytes, regs::CONTROL),
            status: get_u32(bytes, regs::STATUS),
            error_code: get_u32(bytes, regs::ERROR_CODE),
            release: get_u32(bytes, regs::RELEASE),
        })
    }
}
