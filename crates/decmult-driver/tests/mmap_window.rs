//! Mapped-window protocol tests
//!
//! A temp file stands in for the device window. A second mapping of the same
//! file plays the accelerator side.

use decmult_chip::control::{control, regs, status};
use decmult_chip::regfile::{JOB_OFFSET, PADDING_OFFSET, REGISTER_FILE_SIZE};
use decmult_chip::{ControlBlock, JobDescriptor, RELEASE_LEVEL};
use decmult_driver::prelude::*;
use decmult_driver::{ActionBackend, MmapRegion};
use std::io::Write;
use std::path::Path;
use std::thread;
use std::time::{Duration, Instant};

fn window(release: u32) -> tempfile::NamedTempFile {
    let mut image = vec![0u8; REGISTER_FILE_SIZE];
    image[regs::RELEASE..regs::RELEASE + 4].copy_from_slice(&release.to_le_bytes());
    let mut file = tempfile::NamedTempFile::new().unwrap();
    file.write_all(&image).unwrap();
    file.flush().unwrap();
    file
}

fn sample_job() -> JobDescriptor {
    JobDescriptor::elementwise(
        ElementWidth::Double,
        9,
        BufferAddr::new(0x1_0000, 128),
        BufferAddr::new(0x1_0080, 128),
        BufferAddr::new(0x1_0100, 72),
    )
}

#[test]
fn unprogrammed_window_refused() {
    let file = window(0);
    let backend = MmapBackend::open_at(file.path(), 0).unwrap();
    let err = ActionHandle::open(Box::new(backend)).unwrap_err();
    assert!(matches!(err, ActionError::ReleaseMismatch { found: 0, .. }));
}

#[test]
fn submit_writes_descriptor_then_start() {
    let file = window(RELEASE_LEVEL);
    let backend = MmapBackend::open_at(file.path(), 0).unwrap();
    let mut handle = ActionHandle::open(Box::new(backend)).unwrap();

    let job = sample_job();
    let seq = handle.submit(&job).unwrap();

    let image = std::fs::read(file.path()).unwrap();
    assert_eq!(JobDescriptor::decode(&image[JOB_OFFSET..]).unwrap(), job);
    assert!(image[PADDING_OFFSET..].iter().all(|&b| b == 0));

    let cb = ControlBlock::decode(&image).unwrap();
    assert!(cb.start_requested());
    assert_eq!(cb.seq(), seq);
    assert_eq!(cb.control, ControlBlock::start_command(seq, false));
    assert_eq!(cb.release, RELEASE_LEVEL, "host never writes RELEASE");
}

#[test]
fn wait_observes_accelerator_done() {
    let file = window(RELEASE_LEVEL);
    let backend = MmapBackend::open_at(file.path(), 0).unwrap();
    let mut handle = ActionHandle::open(Box::new(backend)).unwrap();
    let mut accelerator = MmapRegion::open(file.path()).unwrap();

    handle.submit(&sample_job()).unwrap();
    accelerator.write_u32(regs::STATUS, status::DONE).unwrap();

    let completion = handle.wait(Duration::from_secs(1)).unwrap();
    assert_eq!(completion.state, ActionState::Done);
    assert_eq!(completion.seq, 1);
}

#[test]
fn wait_reports_error_code() {
    let file = window(RELEASE_LEVEL);
    let backend = MmapBackend::open_at(file.path(), 0).unwrap();
    let mut handle = ActionHandle::open(Box::new(backend)).unwrap();
    let mut accelerator = MmapRegion::open(file.path()).unwrap();

    handle.submit(&sample_job()).unwrap();
    accelerator
        .write_u32(regs::ERROR_CODE, JobErrorCode::AddressFault.code())
        .unwrap();
    accelerator.write_u32(regs::STATUS, status::DONE).unwrap();

    let completion = handle.wait(Duration::from_secs(1)).unwrap();
    assert_eq!(completion.state, ActionState::Error(JobErrorCode::AddressFault));
    assert!(completion.into_result().is_err());
}

#[test]
fn wait_times_out_while_running() {
    let file = window(RELEASE_LEVEL);
    let backend = MmapBackend::open_at(file.path(), 0).unwrap();
    let mut handle = ActionHandle::open(Box::new(backend))
        .unwrap()
        .with_poll_interval(Duration::from_millis(1));
    let mut accelerator = MmapRegion::open(file.path()).unwrap();

    handle.submit(&sample_job()).unwrap();
    accelerator.write_u32(regs::STATUS, status::RUNNING).unwrap();

    let err = handle.wait(Duration::from_millis(20)).unwrap_err();
    assert!(matches!(err, ActionError::Timeout { duration_ms: 20 }));
    assert!(matches!(
        handle.submit(&sample_job()),
        Err(ActionError::InvalidState { .. })
    ));
}

/// Play the accelerator from another thread: wait until CONTROL matches
/// `seen`, hold for `latency`, then apply `act`.
fn accelerator_after(
    path: &Path,
    seen: fn(u32) -> bool,
    latency: Duration,
    act: fn(&mut MmapRegion),
) -> thread::JoinHandle<()> {
    let path = path.to_path_buf();
    thread::spawn(move || {
        let mut region = MmapRegion::open(&path).unwrap();
        let deadline = Instant::now() + Duration::from_secs(5);
        while !seen(region.read_u32(regs::CONTROL).unwrap()) {
            assert!(Instant::now() < deadline, "host never wrote the command");
            thread::yield_now();
        }
        thread::sleep(latency);
        act(&mut region);
    })
}

fn starts(control_word: u32) -> bool {
    control_word & control::START != 0
}

fn resets(control_word: u32) -> bool {
    control_word & control::RESET != 0
}

fn latch_and_finish(region: &mut MmapRegion) {
    let command = region.read_u32(regs::CONTROL).unwrap();
    region.write_u32(regs::CONTROL, command & !control::START).unwrap();
    region.write_u32(regs::STATUS, status::DONE).unwrap();
}

fn acknowledge_reset(region: &mut MmapRegion) {
    region.write_u32(regs::STATUS, 0).unwrap();
    region.write_u32(regs::ERROR_CODE, 0).unwrap();
    region.write_u32(regs::CONTROL, 0).unwrap();
}

#[test]
fn wait_covers_start_latency() {
    let file = window(RELEASE_LEVEL);
    let backend = MmapBackend::open_at(file.path(), 0).unwrap();
    let mut handle = ActionHandle::open(Box::new(backend)).unwrap();

    let seq = handle.submit(&sample_job()).unwrap();
    let accelerator = accelerator_after(
        file.path(),
        starts,
        Duration::from_millis(5),
        latch_and_finish,
    );

    let completion = handle.wait(Duration::from_secs(1)).unwrap();
    accelerator.join().unwrap();
    assert_eq!(completion.state, ActionState::Done);
    assert_eq!(completion.seq, seq);
    assert_eq!(handle.jobs_completed(), 1);
}

#[test]
fn unlatched_start_times_out() {
    let file = window(RELEASE_LEVEL);
    let backend = MmapBackend::open_at(file.path(), 0).unwrap();
    let mut handle = ActionHandle::open(Box::new(backend))
        .unwrap()
        .with_poll_interval(Duration::from_millis(1));

    handle.submit(&sample_job()).unwrap();
    // Still IDLE with START pending: no second descriptor over the first
    assert!(matches!(
        handle.submit(&sample_job()),
        Err(ActionError::InvalidState { .. })
    ));
    let err = handle.wait(Duration::from_millis(20)).unwrap_err();
    assert!(matches!(err, ActionError::Timeout { duration_ms: 20 }));
}

#[test]
fn reset_waits_for_acknowledgement() {
    let file = window(RELEASE_LEVEL);
    let backend = MmapBackend::open_at(file.path(), 0).unwrap();
    let mut handle = ActionHandle::open(Box::new(backend)).unwrap();
    let mut accelerator = MmapRegion::open(file.path()).unwrap();

    handle.submit(&sample_job()).unwrap();
    accelerator.write_u32(regs::STATUS, status::DONE).unwrap();
    handle.wait(Duration::from_secs(1)).unwrap();

    let acknowledger = accelerator_after(
        file.path(),
        resets,
        Duration::from_millis(5),
        acknowledge_reset,
    );
    handle.reset().unwrap();
    acknowledger.join().unwrap();

    assert_eq!(handle.state().unwrap(), ActionState::Idle);
    handle.submit(&sample_job()).unwrap();
}

#[test]
fn unacknowledged_reset_times_out() {
    let file = window(RELEASE_LEVEL);
    let backend = MmapBackend::open_at(file.path(), 0).unwrap();
    let mut handle = ActionHandle::open(Box::new(backend))
        .unwrap()
        .with_poll_interval(Duration::from_millis(1))
        .with_reset_timeout(Duration::from_millis(10));
    let mut accelerator = MmapRegion::open(file.path()).unwrap();

    handle.submit(&sample_job()).unwrap();
    accelerator.write_u32(regs::STATUS, status::DONE).unwrap();
    handle.wait(Duration::from_secs(1)).unwrap();

    let err = handle.reset().unwrap_err();
    assert!(matches!(err, ActionError::Timeout { duration_ms: 10 }));
    assert!(handle.control_block().unwrap().reset_requested());
}

#[test]
fn run_against_slow_accelerator() {
    let file = window(RELEASE_LEVEL);
    let backend = MmapBackend::open_at(file.path(), 0).unwrap();
    let mut handle = ActionHandle::open(Box::new(backend)).unwrap();

    let finisher = accelerator_after(
        file.path(),
        starts,
        Duration::from_millis(5),
        latch_and_finish,
    );
    let acknowledger = accelerator_after(
        file.path(),
        resets,
        Duration::from_millis(5),
        acknowledge_reset,
    );

    let completion = handle.run(&sample_job(), Duration::from_secs(1)).unwrap();
    finisher.join().unwrap();
    acknowledger.join().unwrap();
    assert_eq!(completion.state, ActionState::Done);
    assert_eq!(handle.state().unwrap(), ActionState::Idle);
}

#[test]
#[ignore] // Requires hardware
fn hardware_window_release() {
    let device = std::env::var("DECMULT_DEVICE").unwrap_or_else(|_| "/dev/uio0".into());
    let backend = MmapBackend::init(&device).expect("map device window");
    let handle = ActionHandle::open(Box::new(backend)).expect("release matches");
    println!("Action state: {}", handle.state().unwrap());
}
