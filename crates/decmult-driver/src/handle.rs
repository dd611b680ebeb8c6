//! Host-side job protocol
//!
//! `ActionHandle` drives one action through its register window:
//!
//! ```text
//! submit:  check IDLE → write job area → release fence → CONTROL = START | seq
//! wait:    poll STATUS until DONE (acquire fence) or timeout
//! reset:   CONTROL = RESET → poll until IDLE or reset timeout
//! ```
//!
//! A job counts as in flight from the START write until reset, so a window
//! that still reads IDLE because the accelerator has not latched the
//! descriptor yet is waited on like a RUNNING one.
//!
//! The host never writes STATUS, ERROR_CODE or RELEASE, and never touches
//! the job area while the action is RUNNING.

use crate::backend::ActionBackend;
use crate::error::{ActionError, Result};
use decmult_chip::control::{control, regs, CONTROL_BLOCK_SIZE};
use decmult_chip::regfile::{ActionRegisterFile, JOB_OFFSET};
use decmult_chip::release::Release;
use decmult_chip::{ActionState, ControlBlock, JobDescriptor, RELEASE_LEVEL};
use std::sync::atomic::{fence, Ordering};
use std::time::{Duration, Instant};

/// Default pause between status polls.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_micros(50);

/// Default deadline for the action to acknowledge RESET.
pub const DEFAULT_RESET_TIMEOUT: Duration = Duration::from_millis(100);

/// Yield instead of sleeping for this many polls before backing off.
const SPIN_POLLS: u32 = 64;

/// Outcome of a finished job.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Completion {
    /// Sequence number the job was started with
    pub seq: u16,
    /// Final state (DONE or ERROR)
    pub state: ActionState,
    /// Time from wait start to completion
    pub elapsed: Duration,
    /// Status reads taken
    pub polls: u32,
    /// Completion interrupt was pending
    pub irq_raised: bool,
}

impl Completion {
    /// Convert to `Ok` for DONE and [`ActionError::JobFailed`] for ERROR.
    ///
    /// # Errors
    ///
    /// Returns [`ActionError::JobFailed`] carrying the reported error code.
    pub fn into_result(self) -> Result<Self> {
        match self.state {
            ActionState::Error(code) => Err(ActionError::JobFailed { code }),
            _ => Ok(self),
        }
    }
}

/// Host handle to one action register file.
#[derive(Debug)]
pub struct ActionHandle<B: ActionBackend + ?Sized> {
    backend: Box<B>,
    next_seq: u16,
    /// Sequence number of the job started and not yet reset
    in_flight: Option<u16>,
    jobs_completed: u64,
    irq: bool,
    poll_interval: Duration,
    reset_timeout: Duration,
}

impl<B: ActionBackend + ?Sized> ActionHandle<B> {
    /// Attach to `backend` after checking the layout release.
    ///
    /// # Errors
    ///
    /// Returns [`ActionError::ReleaseMismatch`] if the window reports another
    /// release, or a backend error if RELEASE cannot be read.
    pub fn open(backend: Box<B>) -> Result<Self> {
        let found = backend.read_register(regs::RELEASE)?;
        if !Release::from_register(found).is_compatible() {
            return Err(ActionError::ReleaseMismatch {
                expected: RELEASE_LEVEL,
                found,
            });
        }
        tracing::info!(
            "Attached to {} action, release {found:#x}",
            backend.backend_type()
        );
        Ok(Self {
            backend,
            next_seq: 1,
            in_flight: None,
            jobs_completed: 0,
            irq: false,
            poll_interval: DEFAULT_POLL_INTERVAL,
            reset_timeout: DEFAULT_RESET_TIMEOUT,
        })
    }

    /// Request the completion interrupt on submitted jobs.
    #[must_use]
    pub fn with_interrupts(mut self, enabled: bool) -> Self {
        self.irq = enabled;
        self
    }

    /// Set the pause between status polls once spinning backs off.
    #[must_use]
    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    /// Set how long [`reset`](Self::reset) waits for IDLE.
    #[must_use]
    pub fn with_reset_timeout(mut self, timeout: Duration) -> Self {
        self.reset_timeout = timeout;
        self
    }

    /// Jobs observed to finish (DONE or ERROR) through this handle.
    pub const fn jobs_completed(&self) -> u64 {
        self.jobs_completed
    }

    /// Underlying backend.
    pub fn backend(&self) -> &B {
        &self.backend
    }

    /// Mutable backend access (buffer setup on the software model).
    pub fn backend_mut(&mut self) -> &mut B {
        &mut self.backend
    }

    /// Read the control block.
    ///
    /// # Errors
    ///
    /// Returns a backend error if the window cannot be read.
    pub fn control_block(&self) -> Result<ControlBlock> {
        let mut raw = [0u8; CONTROL_BLOCK_SIZE];
        self.backend.read_window(0, &mut raw)?;
        Ok(ControlBlock::decode(&raw)?)
    }

    /// Current action state.
    ///
    /// # Errors
    ///
    /// See [`control_block`](Self::control_block).
    pub fn state(&self) -> Result<ActionState> {
        Ok(self.control_block()?.state())
    }

    /// Write `job` and start it. Returns the job's sequence number.
    ///
    /// # Errors
    ///
    /// Returns [`ActionError::InvalidState`] unless the action is IDLE with
    /// no unlatched START, and [`ActionError::Layout`] if the descriptor
    /// shape is inconsistent.
    pub fn submit(&mut self, job: &JobDescriptor) -> Result<u16> {
        let cb = self.control_block()?;
        let state = cb.state();
        if state != ActionState::Idle {
            return Err(ActionError::invalid_state(format!(
                "cannot submit while {state}"
            )));
        }
        if cb.start_requested() {
            return Err(ActionError::invalid_state("previous START not latched yet"));
        }
        job.check_shape()?;

        self.backend
            .write_window(JOB_OFFSET, &ActionRegisterFile::job_area(job))?;
        // Descriptor stores must be visible before START
        fence(Ordering::Release);

        let seq = self.next_seq;
        self.next_seq = self.next_seq.wrapping_add(1);
        self.backend
            .write_register(regs::CONTROL, ControlBlock::start_command(seq, self.irq))?;
        self.in_flight = Some(seq);

        tracing::debug!(
            "Submitted job {seq}: {} x{} ({})",
            job.operation,
            job.element_count,
            job.element_width
        );
        Ok(seq)
    }

    /// Let the backend progress once and read the state.
    ///
    /// # Errors
    ///
    /// Returns a backend error if the window cannot be serviced.
    pub fn poll(&mut self) -> Result<ActionState> {
        self.backend.advance()?;
        self.state()
    }

    /// Poll until the job completes or `timeout` passes.
    ///
    /// # Errors
    ///
    /// Returns [`ActionError::Timeout`] if the job has not finished at the
    /// deadline, and [`ActionError::InvalidState`] if nothing was submitted.
    pub fn wait(&mut self, timeout: Duration) -> Result<Completion> {
        let start = Instant::now();
        let mut polls = 0u32;

        loop {
            self.backend.advance()?;
            let cb = self.control_block()?;
            polls = polls.saturating_add(1);

            let state = cb.state();
            if state.is_complete() {
                // Result buffer reads must not move before the DONE observation
                fence(Ordering::Acquire);
                let completion = Completion {
                    seq: self.in_flight.unwrap_or_else(|| cb.seq()),
                    state,
                    elapsed: start.elapsed(),
                    polls,
                    irq_raised: cb.irq_pending(),
                };
                self.jobs_completed = self.jobs_completed.saturating_add(1);
                tracing::debug!(
                    "Job {} finished {state} after {polls} polls ({:?})",
                    completion.seq,
                    completion.elapsed
                );
                return Ok(completion);
            }
            // IDLE before the accelerator latches START is still in flight
            if state == ActionState::Idle && self.in_flight.is_none() && !cb.start_requested() {
                return Err(ActionError::invalid_state("no job submitted"));
            }

            if start.elapsed() >= timeout {
                tracing::warn!("Job {} not finished after {timeout:?} ({state})", cb.seq());
                return Err(timeout_error(timeout));
            }
            self.pause(polls);
        }
    }

    /// Interpret the finished state: DONE is success, ERROR its code.
    ///
    /// # Errors
    ///
    /// Returns [`ActionError::JobFailed`] for ERROR, and
    /// [`ActionError::InvalidState`] while IDLE or RUNNING.
    pub fn completion(&self) -> Result<ActionState> {
        match self.state()? {
            ActionState::Done => Ok(ActionState::Done),
            ActionState::Error(code) => Err(ActionError::JobFailed { code }),
            state => Err(ActionError::invalid_state(format!(
                "no completed job ({state})"
            ))),
        }
    }

    /// Return a finished action to IDLE.
    ///
    /// # Errors
    ///
    /// Returns [`ActionError::InvalidState`] unless the action is DONE or
    /// ERROR, and [`ActionError::Timeout`] if it does not report IDLE within
    /// the reset timeout.
    pub fn reset(&mut self) -> Result<()> {
        let state = self.state()?;
        if !state.is_complete() {
            return Err(ActionError::invalid_state(format!(
                "cannot reset while {state}"
            )));
        }
        self.backend.write_register(regs::CONTROL, control::RESET)?;

        let start = Instant::now();
        let mut polls = 0u32;
        loop {
            self.backend.advance()?;
            polls = polls.saturating_add(1);
            let after = self.state()?;
            if after == ActionState::Idle {
                break;
            }
            if start.elapsed() >= self.reset_timeout {
                tracing::warn!(
                    "Action still {after} {:?} after reset",
                    self.reset_timeout
                );
                return Err(timeout_error(self.reset_timeout));
            }
            self.pause(polls);
        }

        self.in_flight = None;
        tracing::debug!("Action reset from {state} after {polls} polls");
        Ok(())
    }

    /// Submit `job`, wait for it and reset the action.
    ///
    /// The returned completion is DONE; an ERROR outcome is returned as
    /// [`ActionError::JobFailed`] after the reset.
    ///
    /// # Errors
    ///
    /// Any error from [`submit`](Self::submit), [`wait`](Self::wait) or
    /// [`reset`](Self::reset), or the job's own failure.
    pub fn run(&mut self, job: &JobDescriptor, timeout: Duration) -> Result<Completion> {
        self.submit(job)?;
        let completion = self.wait(timeout)?;
        let outcome = self.completion();
        self.reset()?;
        outcome.map(|_| completion)
    }

    fn pause(&self, polls: u32) {
        if polls < SPIN_POLLS {
            std::thread::yield_now();
        } else {
            std::thread::sleep(self.poll_interval);
        }
    }
}

fn timeout_error(timeout: Duration) -> ActionError {
    ActionError::Timeout {
        duration_ms: u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX),
    }
}

impl<B: ActionBackend + ?Sized> Drop for ActionHandle<B> {
    fn drop(&mut self) {
        tracing::info!(
            "Released {} action after {} completed jobs",
            self.backend.backend_type(),
            self.jobs_completed
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backends::SoftwareAction;
    use crate::config::ActionConfig;
    use crate::transfer::Element;
    use decmult_chip::{ElementWidth, JobErrorCode};

    fn handle() -> ActionHandle<SoftwareAction> {
        let action = SoftwareAction::new(ActionConfig::default()).unwrap();
        ActionHandle::open(Box::new(action)).unwrap()
    }

    fn scale_job(handle: &mut ActionHandle<SoftwareAction>, values: &[f64], scalar: f64) -> JobDescriptor {
        let rule = handle.backend().packing();
        let mem = handle.backend_mut().memory_mut();
        let a = mem.alloc_elements(values, &rule).unwrap();
        let dst = mem.alloc_output(values.len(), &rule).unwrap();
        JobDescriptor::scale(
            ElementWidth::Double,
            u32::try_from(values.len()).unwrap(),
            scalar.to_scalar_bits(),
            a,
            dst,
        )
    }

    #[test]
    fn sequence_numbers_advance() {
        let mut handle = handle();
        let job = scale_job(&mut handle, &[1.0, 2.0], 3.0);
        let first = handle.run(&job, Duration::from_secs(1)).unwrap();
        let second = handle.run(&job, Duration::from_secs(1)).unwrap();
        assert_eq!(first.seq, 1);
        assert_eq!(second.seq, 2);
        assert_eq!(handle.state().unwrap(), ActionState::Idle);
    }

    #[test]
    fn submit_rejected_unless_idle() {
        let mut handle = handle();
        let job = scale_job(&mut handle, &[1.0], 1.0);
        handle.submit(&job).unwrap();
        assert!(matches!(
            handle.submit(&job),
            Err(ActionError::InvalidState { .. })
        ));
        handle.wait(Duration::from_secs(1)).unwrap();
        assert!(handle.submit(&job).is_err(), "DONE needs a reset first");
    }

    #[test]
    fn completion_only_after_finish() {
        let mut handle = handle();
        assert!(matches!(handle.completion(), Err(ActionError::InvalidState { .. })));
        let job = scale_job(&mut handle, &[1.0], 1.0);
        handle.submit(&job).unwrap();
        assert!(handle.completion().is_err());
        handle.wait(Duration::from_secs(1)).unwrap();
        assert_eq!(handle.completion().unwrap(), ActionState::Done);
    }

    #[test]
    fn reset_rejected_before_completion() {
        let mut handle = handle();
        assert!(matches!(handle.reset(), Err(ActionError::InvalidState { .. })));
    }

    #[test]
    fn wait_without_job_is_invalid() {
        let mut handle = handle();
        assert!(matches!(
            handle.wait(Duration::from_millis(10)),
            Err(ActionError::InvalidState { .. })
        ));
    }

    #[test]
    fn completed_jobs_counted_separately_from_submissions() {
        let mut handle = handle();
        let job = scale_job(&mut handle, &[1.0], 1.0);
        handle.run(&job, Duration::from_secs(1)).unwrap();

        let mut bad = job;
        bad.dst.size = 0;
        assert!(handle.run(&bad, Duration::from_secs(1)).is_err());
        assert_eq!(handle.jobs_completed(), 2);

        // Started but unfinished
        assert!(handle.submit(&job).is_ok());
        assert!(handle.submit(&job).is_err());
        assert_eq!(handle.jobs_completed(), 2);
    }

    #[test]
    fn failed_job_reports_code_and_resets() {
        let mut handle = handle();
        let mut job = scale_job(&mut handle, &[1.0], 1.0);
        job.dst.size = 0;
        let err = handle.run(&job, Duration::from_secs(1)).unwrap_err();
        assert_eq!(err.job_error_code(), Some(JobErrorCode::AddressFault));
        assert_eq!(handle.state().unwrap(), ActionState::Idle);
    }

    #[test]
    fn interrupt_reported_in_completion() {
        let mut handle = handle().with_interrupts(true);
        let job = scale_job(&mut handle, &[1.0], 1.0);
        handle.submit(&job).unwrap();
        let completion = handle.wait(Duration::from_secs(1)).unwrap();
        assert!(completion.irq_raised);
        assert_eq!(completion.state, ActionState::Done);
        assert!(completion.polls >= 1);
    }

    #[test]
    fn release_mismatch_refused() {
        #[derive(Debug)]
        struct Stale;
        impl ActionBackend for Stale {
            fn init(_: &str) -> Result<Self> {
                Ok(Self)
            }
            fn read_window(&self, _: usize, buf: &mut [u8]) -> Result<()> {
                buf.fill(0xFF);
                Ok(())
            }
            fn write_window(&mut self, _: usize, _: &[u8]) -> Result<()> {
                Ok(())
            }
            fn backend_type(&self) -> crate::backend::BackendType {
                crate::backend::BackendType::Mmap
            }
        }
        let err = ActionHandle::open(Box::new(Stale)).unwrap_err();
        assert!(matches!(err, ActionError::ReleaseMismatch { found: 0xFFFF_FFFF, .. }));
    }
}
