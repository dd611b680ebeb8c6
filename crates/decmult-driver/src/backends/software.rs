//! Software (model) accelerator backend
//!
//! Implements `ActionBackend` with a CPU model of the decimal-multiply action.
//! It keeps its own register window and reacts to host writes the way the
//! hardware does:
//!
//! 1. **START** latches the job descriptor and validates it. The state goes
//!    IDLE → RUNNING, and straight on to ERROR if validation fails.
//! 2. **advance()** streams the operands bus word by bus word out of
//!    [`HostMemory`], runs the reference multiply kernel, and streams the
//!    result back. The final partial word is masked to the declared element
//!    count. The state goes RUNNING → DONE, or ERROR on a fault.
//! 3. **RESET** after completion returns to IDLE and clears status.
//!
//! Writes to accelerator-owned registers (STATUS, ERROR_CODE, RELEASE) are
//! dropped, as are descriptor writes while a job is running.
//!
//! ## Validation order
//!
//! ```text
//! decode descriptor        → InvalidDescriptor
//! element width == config  → InvalidDescriptor
//! every count <= max batch → JobOversized
//! buffers aligned + sized  → AddressFault
//! ```

use crate::backend::{ActionBackend, BackendType};
use crate::config::ActionConfig;
use crate::error::{ActionError, Result};
use crate::memory::HostMemory;
use crate::transfer::{unpack_word_into, Element};
use decmult_chip::control::{control, regs, status};
use decmult_chip::regfile::{CONTROL_OFFSET, JOB_OFFSET, PADDING_OFFSET, REGISTER_FILE_SIZE};
use decmult_chip::{
    ActionState, BufferAddr, ControlEvent, ElementWidth, JobDescriptor, JobErrorCode, Operation,
    PackingRule, RELEASE_LEVEL,
};
use std::ops::Range;
use tracing::{debug, info, warn};

/// Accelerator-owned registers, read-only to the host.
const ACCEL_OWNED: Range<usize> = CONTROL_OFFSET + regs::STATUS..CONTROL_OFFSET + regs::RELEASE + 4;

/// Host command register.
const COMMAND: Range<usize> = CONTROL_OFFSET + regs::CONTROL..CONTROL_OFFSET + regs::CONTROL + 4;

/// Software model of the decimal-multiply action.
#[derive(Debug)]
pub struct SoftwareAction {
    config: ActionConfig,
    rule: PackingRule,
    window: [u8; REGISTER_FILE_SIZE],
    state: ActionState,
    /// Descriptor copied at START
    latched: Option<JobDescriptor>,
    /// IRQ_ENABLE as seen at START
    irq_armed: bool,
    memory: HostMemory,
    words_moved: u64,
    jobs_completed: u64,
}

impl SoftwareAction {
    /// Create a model for `config`, validated up front.
    ///
    /// # Errors
    ///
    /// Returns [`ActionError::ConfigInvalid`] if the configuration is unusable.
    pub fn new(config: ActionConfig) -> Result<Self> {
        let rule = config.validate()?;
        let mut action = Self {
            config,
            rule,
            window: [0u8; REGISTER_FILE_SIZE],
            state: ActionState::Idle,
            latched: None,
            irq_armed: false,
            memory: HostMemory::new(rule.bus_word_bytes()),
            words_moved: 0,
            jobs_completed: 0,
        };
        action.set_register(regs::RELEASE, RELEASE_LEVEL);
        info!(
            "SoftwareAction: {rule}, max {} elements/job ({} words)",
            config.max_elements,
            rule.words_per_batch(config.max_elements)
        );
        Ok(action)
    }

    /// Configuration the model was built with.
    pub const fn config(&self) -> &ActionConfig {
        &self.config
    }

    /// Packing rule derived from the configuration.
    pub const fn packing(&self) -> PackingRule {
        self.rule
    }

    /// Current control state.
    pub const fn state(&self) -> ActionState {
        self.state
    }

    /// Device-visible memory the model reads operands from.
    pub const fn memory(&self) -> &HostMemory {
        &self.memory
    }

    /// Mutable access to device-visible memory (host-side buffer setup).
    pub fn memory_mut(&mut self) -> &mut HostMemory {
        &mut self.memory
    }

    /// Bus words transferred since creation.
    pub const fn words_moved(&self) -> u64 {
        self.words_moved
    }

    /// Jobs finished with DONE since creation.
    pub const fn jobs_completed(&self) -> u64 {
        self.jobs_completed
    }

    fn register(&self, offset: usize) -> u32 {
        let at = CONTROL_OFFSET + offset;
        u32::from_le_bytes([
            self.window[at],
            self.window[at + 1],
            self.window[at + 2],
            self.window[at + 3],
        ])
    }

    fn set_register(&mut self, offset: usize, value: u32) {
        let at = CONTROL_OFFSET + offset;
        self.window[at..at + 4].copy_from_slice(&value.to_le_bytes());
    }

    /// Apply `event` to the state machine and publish the result.
    fn transition(&mut self, event: ControlEvent) -> bool {
        if let Some(next) = self.state.apply(event) {
            debug!("SoftwareAction: {} -> {next} on {event:?}", self.state);
            self.state = next;
            self.publish();
            true
        } else {
            warn!("SoftwareAction: {event:?} ignored in state {}", self.state);
            false
        }
    }

    fn publish(&mut self) {
        let (mut status_bits, error_code) = self.state.status_bits();
        if self.state.is_complete() && self.irq_armed {
            status_bits |= status::IRQ_PENDING;
        }
        self.set_register(regs::STATUS, status_bits);
        self.set_register(regs::ERROR_CODE, error_code);
    }

    fn on_command(&mut self) {
        let command = self.register(regs::CONTROL);

        if command & control::RESET != 0 {
            if self.transition(ControlEvent::Reset) {
                self.latched = None;
                self.irq_armed = false;
                self.set_register(regs::CONTROL, 0);
                self.publish();
                return;
            }
            self.set_register(regs::CONTROL, command & !control::RESET);
        }

        let command = self.register(regs::CONTROL);
        if command & control::START != 0 {
            self.set_register(regs::CONTROL, command & !control::START);
            if self.state == ActionState::Idle {
                self.irq_armed = command & control::IRQ_ENABLE != 0;
            }
            self.latch();
        }
    }

    fn latch(&mut self) {
        if !self.transition(ControlEvent::Start) {
            return;
        }
        match self.validate() {
            Ok(job) => {
                info!(
                    "SoftwareAction: latched {} job, {} elements ({})",
                    job.operation, job.element_count, job.element_width
                );
                self.latched = Some(job);
            }
            Err(code) => self.fail(code),
        }
    }

    fn fail(&mut self, code: JobErrorCode) {
        self.latched = None;
        self.transition(ControlEvent::Fault(code));
    }

    fn validate(&self) -> std::result::Result<JobDescriptor, JobErrorCode> {
        let job = JobDescriptor::decode(&self.window[JOB_OFFSET..PADDING_OFFSET]).map_err(|e| {
            warn!("SoftwareAction: rejecting descriptor: {e}");
            JobErrorCode::InvalidDescriptor
        })?;

        if job.element_width != self.config.element_width {
            warn!(
                "SoftwareAction: descriptor packs {} elements, action is configured for {}",
                job.element_width, self.config.element_width
            );
            return Err(JobErrorCode::InvalidDescriptor);
        }

        let max = self.config.max_elements as u64;
        let counts = [job.operand_a_count(), job.operand_b_count(), job.output_count()];
        if let Some(&count) = counts.iter().find(|&&count| count > max) {
            warn!("SoftwareAction: {count} elements exceed the {max}-element batch");
            return Err(JobErrorCode::JobOversized);
        }

        // Counts are bounded by max_elements, which fits in usize.
        let [a, b, out] = counts.map(|count| usize::try_from(count).unwrap_or(usize::MAX));
        self.check_buffer("operand A", job.src_a, self.rule.padded_bytes(a))?;
        if job.operation.uses_operand_b() {
            self.check_buffer("operand B", job.src_b, self.rule.padded_bytes(b))?;
        }
        self.check_buffer("destination", job.dst, self.rule.payload_bytes(out))?;
        Ok(job)
    }

    fn check_buffer(&self, name: &str, buf: BufferAddr, need: usize) -> std::result::Result<(), JobErrorCode> {
        if need == 0 {
            return Ok(());
        }
        let bus = self.rule.bus_word_bytes() as u64;
        if buf.addr % bus != 0 {
            warn!("SoftwareAction: {name} at {:#x} is not {bus}-byte aligned", buf.addr);
            return Err(JobErrorCode::AddressFault);
        }
        if (buf.size as usize) < need {
            warn!("SoftwareAction: {name} holds {} B, job needs {need} B", buf.size);
            return Err(JobErrorCode::AddressFault);
        }
        Ok(())
    }

    fn execute(&mut self, job: &JobDescriptor) -> std::result::Result<(), JobErrorCode> {
        match job.element_width {
            ElementWidth::Single => self.execute_typed::<f32>(job),
            ElementWidth::Double => self.execute_typed::<f64>(job),
        }
    }

    fn execute_typed<E: Element>(&mut self, job: &JobDescriptor) -> std::result::Result<(), JobErrorCode> {
        let count = |n: u64| usize::try_from(n).map_err(|_| JobErrorCode::InternalFault);

        let a = self.stream_in::<E>(job.src_a, count(job.operand_a_count())?)?;
        let b = if job.operation.uses_operand_b() {
            self.stream_in::<E>(job.src_b, count(job.operand_b_count())?)?
        } else {
            Vec::new()
        };

        let product = multiply(job, &a, &b, E::from_scalar_bits(job.scalar_bits))
            .filter(|out| out.len() as u64 == job.output_count())
            .ok_or_else(|| {
                warn!("SoftwareAction: kernel produced no result for {} job", job.operation);
                JobErrorCode::InternalFault
            })?;

        self.stream_out(job.dst, &product)
    }

    /// Read `count` elements from `buf` one bus word at a time.
    fn stream_in<E: Element>(&mut self, buf: BufferAddr, count: usize) -> std::result::Result<Vec<E>, JobErrorCode> {
        let bus = self.rule.bus_word_bytes();
        let words = self.rule.words_to_read(count);
        let mut word = vec![0u8; bus];
        let mut out = Vec::with_capacity(count);

        for w in 0..words {
            let addr = buf.addr + (w * bus) as u64;
            self.memory.read(addr, &mut word).map_err(|e| {
                warn!("SoftwareAction: read fault: {e}");
                JobErrorCode::AddressFault
            })?;
            let valid = if w + 1 == words {
                self.rule.valid_in_last_word(count)
            } else {
                self.rule.elements_per_word()
            };
            unpack_word_into(&word, valid, &mut out);
            self.words_moved += 1;
        }
        Ok(out)
    }

    /// Write `values` to `buf` one bus word at a time, never past the last element.
    fn stream_out<E: Element>(&mut self, buf: BufferAddr, values: &[E]) -> std::result::Result<(), JobErrorCode> {
        let bus = self.rule.bus_word_bytes();
        let payload: &[u8] = bytemuck::cast_slice(values);

        for (w, word) in payload.chunks(bus).enumerate() {
            let addr = buf.addr + (w * bus) as u64;
            self.memory.write(addr, word).map_err(|e| {
                warn!("SoftwareAction: write fault: {e}");
                JobErrorCode::AddressFault
            })?;
            self.words_moved += 1;
        }
        Ok(())
    }

    fn check_range(offset: usize, len: usize) -> Result<usize> {
        offset
            .checked_add(len)
            .filter(|&end| end <= REGISTER_FILE_SIZE)
            .ok_or_else(|| {
                ActionError::transfer_failed(format!(
                    "window access {len} B at {offset:#x} exceeds {REGISTER_FILE_SIZE} B register file"
                ))
            })
    }
}

/// Reference multiply kernel.
///
/// Returns `None` if the operand lengths do not fit the job's shape.
fn multiply<E: Element>(job: &JobDescriptor, a: &[E], b: &[E], scalar: E) -> Option<Vec<E>> {
    match job.operation {
        Operation::Elementwise => {
            (a.len() == b.len()).then(|| a.iter().zip(b).map(|(&x, &y)| x * y).collect())
        }
        Operation::Scale => Some(a.iter().map(|&x| x * scalar).collect()),
        Operation::MatrixProduct => {
            let rows = usize::try_from(job.rows).ok()?;
            let inner = usize::try_from(job.inner).ok()?;
            let cols = usize::try_from(job.cols).ok()?;
            if a.len() != rows * inner || b.len() != inner * cols {
                return None;
            }
            let mut out = vec![E::default(); rows * cols];
            for r in 0..rows {
                for c in 0..cols {
                    out[r * cols + c] = (0..inner)
                        .map(|k| a[r * inner + k] * b[k * cols + c])
                        .fold(E::default(), |acc, x| acc + x);
                }
            }
            Some(out)
        }
    }
}

impl ActionBackend for SoftwareAction {
    fn init(_device: &str) -> Result<Self> {
        // Sizing from DECMULT_* variables, defaults otherwise
        Self::new(ActionConfig::from_env()?)
    }

    fn read_window(&self, offset: usize, buf: &mut [u8]) -> Result<()> {
        let end = Self::check_range(offset, buf.len())?;
        buf.copy_from_slice(&self.window[offset..end]);
        Ok(())
    }

    fn write_window(&mut self, offset: usize, data: &[u8]) -> Result<()> {
        Self::check_range(offset, data.len())?;
        let running = self.state == ActionState::Running;
        let mut command_written = false;
        let mut dropped = 0usize;

        for (at, &byte) in (offset..).zip(data) {
            if ACCEL_OWNED.contains(&at) || (running && at >= JOB_OFFSET) {
                dropped += 1;
                continue;
            }
            command_written |= COMMAND.contains(&at);
            self.window[at] = byte;
        }
        if dropped > 0 {
            debug!("SoftwareAction: dropped {dropped} B written to accelerator-owned window bytes");
        }
        if command_written {
            self.on_command();
        }
        Ok(())
    }

    fn advance(&mut self) -> Result<()> {
        if self.state != ActionState::Running {
            return Ok(());
        }
        let Some(job) = self.latched.take() else {
            self.fail(JobErrorCode::InternalFault);
            return Ok(());
        };
        match self.execute(&job) {
            Ok(()) => {
                self.transition(ControlEvent::Complete);
                self.jobs_completed += 1;
                info!(
                    "SoftwareAction: {} job done, {} elements written",
                    job.operation,
                    job.output_count()
                );
            }
            Err(code) => self.fail(code),
        }
        Ok(())
    }

    fn backend_type(&self) -> BackendType {
        BackendType::Software
    }
}
