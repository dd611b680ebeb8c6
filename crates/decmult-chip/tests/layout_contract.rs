//! Byte-level layout contract
//!
//! Host and accelerator are built separately; these images are what both
//! sides must produce and accept. A change here needs a new RELEASE_LEVEL.

use decmult_chip::control::{regs, status, CONTROL_BLOCK_SIZE};
use decmult_chip::job::{fields, JOB_AREA_SIZE, JOB_DESCRIPTOR_SIZE};
use decmult_chip::packing::{BUS_WORD_BYTES, DOUBLE_ON_BUS, MAX_ELEMENTS_PER_BATCH, SINGLE_ON_BUS};
use decmult_chip::regfile::{JOB_OFFSET, PADDING_OFFSET, PADDING_SIZE, REGISTER_FILE_SIZE};
use decmult_chip::{
    ActionRegisterFile, ActionState, BufferAddr, ControlBlock, ElementWidth, JobDescriptor,
    JobErrorCode, LayoutError, PackingRule, RELEASE_LEVEL,
};

#[test]
fn register_file_geometry() {
    assert_eq!(CONTROL_BLOCK_SIZE, 16);
    assert_eq!(JOB_DESCRIPTOR_SIZE, 80);
    assert_eq!(JOB_AREA_SIZE, 108);
    assert_eq!(REGISTER_FILE_SIZE, 124);
    assert_eq!(JOB_OFFSET, 0x10);
    assert_eq!(PADDING_OFFSET, 0x60);
    assert_eq!(PADDING_SIZE, 28);
}

#[test]
fn golden_register_image() {
    let job = JobDescriptor::scale(
        ElementWidth::Double,
        9,
        2.5f64.to_bits(),
        BufferAddr::new(0x1_0000, 128),
        BufferAddr::new(0x1_0080, 128),
    );
    let regfile = ActionRegisterFile {
        control: ControlBlock {
            control: ControlBlock::start_command(0x0102, true),
            status: status::RUNNING,
            error_code: 0,
            release: RELEASE_LEVEL,
        },
        job,
    };
    let image = regfile.encode();

    let mut expected = [0u8; REGISTER_FILE_SIZE];
    // CONTROL: START | IRQ_ENABLE, seq 0x0102 in bits 16..31
    expected[0x00..0x04].copy_from_slice(&[0x05, 0x00, 0x02, 0x01]);
    expected[0x04..0x08].copy_from_slice(&[0x01, 0x00, 0x00, 0x00]);
    expected[0x0C..0x10].copy_from_slice(&[0x10, 0x00, 0x00, 0x00]);
    // operation = scale, element bytes = 8, count = 9
    expected[0x10..0x12].copy_from_slice(&[0x02, 0x00]);
    expected[0x12..0x14].copy_from_slice(&[0x08, 0x00]);
    expected[0x14..0x18].copy_from_slice(&[0x09, 0x00, 0x00, 0x00]);
    expected[0x28..0x30].copy_from_slice(&2.5f64.to_bits().to_le_bytes());
    // src_a
    expected[0x30..0x38].copy_from_slice(&0x1_0000u64.to_le_bytes());
    expected[0x38..0x3C].copy_from_slice(&128u32.to_le_bytes());
    // dst
    expected[0x50..0x58].copy_from_slice(&0x1_0080u64.to_le_bytes());
    expected[0x58..0x5C].copy_from_slice(&128u32.to_le_bytes());

    assert_eq!(image, expected);
    assert_eq!(ActionRegisterFile::decode(&expected).unwrap(), regfile);
}

#[test]
fn descriptor_fields_sit_inside_job_area() {
    let offsets = [
        fields::OPERATION,
        fields::ELEMENT_BYTES,
        fields::ELEMENT_COUNT,
        fields::ROWS,
        fields::COLS,
        fields::INNER,
        fields::SCALAR,
        fields::SRC_A,
        fields::SRC_B,
        fields::DST,
    ];
    assert!(offsets.windows(2).all(|w| w[0] < w[1]));
    assert!(JOB_OFFSET + fields::DST + 16 <= PADDING_OFFSET);
    assert_eq!(regs::RELEASE + 4, JOB_OFFSET);
}

#[test]
fn default_platform_packing() {
    assert_eq!(BUS_WORD_BYTES, 64);
    assert_eq!(DOUBLE_ON_BUS.elements_per_word(), 8);
    assert_eq!(SINGLE_ON_BUS.elements_per_word(), 16);
    assert_eq!(DOUBLE_ON_BUS.words_per_batch(MAX_ELEMENTS_PER_BATCH), 2);
    assert_eq!(SINGLE_ON_BUS.words_per_batch(MAX_ELEMENTS_PER_BATCH), 1);
}

#[test]
fn packing_rule_on_a_narrow_bus() {
    let rule = PackingRule::new(8, 4).unwrap();
    assert_eq!(rule.elements_per_word(), 2);
    assert_eq!(rule.words_to_read(3), 2);
    assert_eq!(rule.valid_in_last_word(3), 1);
    assert_eq!(rule.padded_bytes(3), 16);
    assert_eq!(rule.payload_bytes(3), 12);
    assert!(matches!(
        PackingRule::new(12, 8),
        Err(LayoutError::Misaligned { .. })
    ));
}

#[test]
fn completed_state_round_trips_through_registers() {
    for state in [
        ActionState::Idle,
        ActionState::Running,
        ActionState::Done,
        ActionState::Error(JobErrorCode::JobOversized),
        ActionState::Error(JobErrorCode::AddressFault),
        ActionState::Error(JobErrorCode::InternalFault),
        ActionState::Error(JobErrorCode::InvalidDescriptor),
    ] {
        let (status, error_code) = state.status_bits();
        let cb = ControlBlock {
            status,
            error_code,
            release: RELEASE_LEVEL,
            ..ControlBlock::default()
        };
        assert_eq!(ControlBlock::decode(&cb.encode()).unwrap().state(), state);
    }
}
