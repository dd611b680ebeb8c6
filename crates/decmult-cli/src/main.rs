//! `decmult`: command-line interface for the decimal-multiply action.
//!
//! ```text
//! USAGE:
//!   decmult layout                   Print the register file layout
//!   decmult packing --count <n>      Show how n elements pack into bus words
//!   decmult run --op <op>            Run a job on the software model
//!   decmult status <device>          Read the control block of a mapped window
//!   decmult reset <device>           Return a finished action to IDLE
//! ```

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use decmult_chip::control::{regs, CONTROL_BLOCK_SIZE};
use decmult_chip::job::{JOB_AREA_SIZE, JOB_DESCRIPTOR_SIZE};
use decmult_chip::regfile::{JOB_OFFSET, PADDING_OFFSET, PADDING_SIZE, REGISTER_FILE_SIZE};
use decmult_chip::release::Release;
use decmult_chip::{BufferAddr, ElementWidth, JobDescriptor, PackingRule, RELEASE_LEVEL};
use decmult_driver::config::{ENV_BUS_WORD_BYTES, ENV_ELEMENT_BYTES, ENV_MAX_ELEMENTS};
use decmult_driver::{ActionBackend, ActionConfig, ActionHandle, Element, MmapBackend, SoftwareAction};
use std::fmt::Display;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "decmult", about = "Decimal-multiply accelerator action CLI", version)]
struct Cli {
    #[command(subcommand)]
    command: Cmd,
}

#[derive(Subcommand)]
enum Cmd {
    /// Print the action register file layout.
    Layout,
    /// Show how a batch of elements packs into bus words.
    Packing {
        /// Bus word size in bytes.
        #[arg(long, env = ENV_BUS_WORD_BYTES, default_value_t = 64)]
        bus_word_bytes: usize,
        /// Element size in bytes (4 or 8).
        #[arg(long, env = ENV_ELEMENT_BYTES, default_value_t = 8)]
        element_bytes: usize,
        /// Number of elements.
        #[arg(long)]
        count: usize,
    },
    /// Run one job on the software model and check the result.
    Run {
        /// Multiply operation.
        #[arg(long, value_enum)]
        op: Op,
        /// Elements per operand (elementwise and scale).
        #[arg(long, default_value_t = 16)]
        count: u32,
        /// Scalar factor (scale).
        #[arg(long, default_value_t = 2.5)]
        scalar: f64,
        /// Matrix rows, inner dimension and columns (matmul).
        #[arg(long, num_args = 3, value_names = ["ROWS", "INNER", "COLS"], default_values_t = [2, 3, 2])]
        shape: Vec<u32>,
        /// Element size in bytes (4 or 8).
        #[arg(long, env = ENV_ELEMENT_BYTES, default_value_t = 8)]
        element_bytes: usize,
        /// Use single-precision elements (same as --element-bytes 4).
        #[arg(long)]
        single: bool,
        /// Bus word size in bytes.
        #[arg(long, env = ENV_BUS_WORD_BYTES, default_value_t = 64)]
        bus_word_bytes: usize,
        /// Largest element count a job may declare.
        #[arg(long, env = ENV_MAX_ELEMENTS, default_value_t = 16)]
        max_elements: usize,
        /// Completion timeout in milliseconds.
        #[arg(long, default_value_t = 1000)]
        timeout_ms: u64,
    },
    /// Read the control block of a mapped register window.
    Status {
        /// Device file holding the window (e.g. /dev/uio0).
        device: String,
        /// Byte offset of the register file inside the mapping.
        #[arg(long, default_value_t = 0)]
        base: usize,
    },
    /// Reset a finished action.
    Reset {
        /// Device file holding the window (e.g. /dev/uio0).
        device: String,
        /// Byte offset of the register file inside the mapping.
        #[arg(long, default_value_t = 0)]
        base: usize,
        /// How long to wait for IDLE, in milliseconds.
        #[arg(long, default_value_t = 100)]
        timeout_ms: u64,
    },
}

#[derive(Clone, Copy, ValueEnum)]
enum Op {
    /// dst[i] = a[i] × b[i]
    Elementwise,
    /// dst[i] = a[i] × scalar
    Scale,
    /// Row-major matrix product
    Matmul,
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| "warn".into()),
        )
        .init();

    let cli = Cli::parse();

    match cli.command {
        Cmd::Layout => cmd_layout(),
        Cmd::Packing {
            bus_word_bytes,
            element_bytes,
            count,
        } => cmd_packing(bus_word_bytes, element_bytes, count)?,
        Cmd::Run {
            op,
            count,
            scalar,
            shape,
            element_bytes,
            single,
            bus_word_bytes,
            max_elements,
            timeout_ms,
        } => {
            let config = ActionConfig::default()
                .with_bus_word_bytes(bus_word_bytes)
                .with_max_elements(max_elements);
            let timeout = Duration::from_millis(timeout_ms);
            match run_width(element_bytes, single)? {
                ElementWidth::Single => cmd_run::<f32>(config, op, count, scalar, &shape, timeout)?,
                ElementWidth::Double => cmd_run::<f64>(config, op, count, scalar, &shape, timeout)?,
            }
        }
        Cmd::Status { device, base } => cmd_status(&device, base)?,
        Cmd::Reset {
            device,
            base,
            timeout_ms,
        } => cmd_reset(&device, base, Duration::from_millis(timeout_ms))?,
    }

    Ok(())
}

fn cmd_layout() {
    println!("Action register file (release {RELEASE_LEVEL:#x}, {REGISTER_FILE_SIZE} B)");
    println!();
    println!("  {:#06x}  control block   {CONTROL_BLOCK_SIZE:>3} B", 0);
    println!("          {:#04x} CONTROL     host: START, RESET, IRQ_ENABLE, seq", regs::CONTROL);
    println!("          {:#04x} STATUS      action: RUNNING, DONE, IRQ_PENDING", regs::STATUS);
    println!("          {:#04x} ERROR_CODE  action", regs::ERROR_CODE);
    println!("          {:#04x} RELEASE     action", regs::RELEASE);
    println!("  {JOB_OFFSET:#06x}  job descriptor  {JOB_DESCRIPTOR_SIZE:>3} B");
    println!("  {PADDING_OFFSET:#06x}  padding         {PADDING_SIZE:>3} B");
    println!("  job area total          {JOB_AREA_SIZE:>3} B");
}

fn cmd_packing(bus_word_bytes: usize, element_bytes: usize, count: usize) -> Result<()> {
    let rule = PackingRule::new(bus_word_bytes, element_bytes)?;
    println!("Rule            : {rule}");
    println!("Elements        : {count}");
    println!("Words to read   : {}", rule.words_to_read(count));
    println!("Valid in last   : {}", rule.valid_in_last_word(count));
    println!("Padded bytes    : {}", rule.padded_bytes(count));
    println!("Payload bytes   : {}", rule.payload_bytes(count));
    Ok(())
}

/// `--single` wins over the configured element size.
fn run_width(element_bytes: usize, single: bool) -> Result<ElementWidth> {
    if single {
        return Ok(ElementWidth::Single);
    }
    ElementWidth::from_bytes(element_bytes).with_context(|| format!("--element-bytes {element_bytes}"))
}

fn cmd_run<E>(
    config: ActionConfig,
    op: Op,
    count: u32,
    scalar: f64,
    shape: &[u32],
    timeout: Duration,
) -> Result<()>
where
    E: Element + From<f32> + Display,
{
    let action = SoftwareAction::new(config.with_element_width(E::WIDTH))?;
    let mut handle = ActionHandle::open(Box::new(action))?;
    let rule = handle.backend().packing();

    let [rows, inner, cols] = <[u32; 3]>::try_from(shape).context("--shape takes three values")?;
    let (a_len, b_len, out_len) = match op {
        Op::Elementwise => (count, count, count),
        Op::Scale => (count, 0, count),
        Op::Matmul => (
            rows.saturating_mul(inner),
            inner.saturating_mul(cols),
            rows.saturating_mul(cols),
        ),
    };

    let a: Vec<E> = sample(a_len, 0.5, 1.0);
    let b: Vec<E> = sample(b_len, -0.25, 2.0);
    // Narrowing to the element width is the point of --single
    #[allow(clippy::cast_possible_truncation)]
    let factor = E::from(scalar as f32);

    let mem = handle.backend_mut().memory_mut();
    let src_a = mem.alloc_elements(&a, &rule)?;
    let src_b = if b.is_empty() {
        BufferAddr::none()
    } else {
        mem.alloc_elements(&b, &rule)?
    };
    let dst = mem.alloc_output(out_len as usize, &rule)?;

    let job = match op {
        Op::Elementwise => JobDescriptor::elementwise(E::WIDTH, count, src_a, src_b, dst),
        Op::Scale => JobDescriptor::scale(E::WIDTH, count, factor.to_scalar_bits(), src_a, dst),
        Op::Matmul => JobDescriptor::matrix_product(E::WIDTH, rows, inner, cols, src_a, src_b, dst),
    };

    let completion = handle.run(&job, timeout)?;
    let result: Vec<E> = handle
        .backend()
        .memory()
        .read_elements(dst, out_len as usize, &rule)?;

    println!(
        "Job {}: {} on {} ({rule})",
        completion.seq, job.operation, job.element_width
    );
    println!("  state    : {}", completion.state);
    println!("  polls    : {} ({:?})", completion.polls, completion.elapsed);
    println!("  words    : {}", handle.backend().words_moved());
    let preview: Vec<String> = result.iter().take(8).map(ToString::to_string).collect();
    println!("  result   : [{}{}]", preview.join(", "), if result.len() > 8 { ", ..." } else { "" });

    let expected = reference(op, &a, &b, factor, (rows, inner, cols));
    if result != expected {
        bail!("result differs from host reference");
    }
    println!("  matches host reference");
    Ok(())
}

fn sample<E: Element + From<f32>>(len: u32, step: f32, offset: f32) -> Vec<E> {
    (0..len)
        .map(|i| {
            #[allow(clippy::cast_precision_loss)]
            let i = i as f32;
            E::from(offset + step * i)
        })
        .collect()
}

fn reference<E: Element>(op: Op, a: &[E], b: &[E], scalar: E, (rows, inner, cols): (u32, u32, u32)) -> Vec<E> {
    match op {
        Op::Elementwise => a.iter().zip(b).map(|(&x, &y)| x * y).collect(),
        Op::Scale => a.iter().map(|&x| x * scalar).collect(),
        Op::Matmul => {
            let (rows, inner, cols) = (rows as usize, inner as usize, cols as usize);
            let mut out = Vec::with_capacity(rows * cols);
            for r in 0..rows {
                for c in 0..cols {
                    out.push(
                        (0..inner)
                            .map(|k| a[r * inner + k] * b[k * cols + c])
                            .fold(E::default(), |acc, x| acc + x),
                    );
                }
            }
            out
        }
    }
}

fn cmd_status(device: &str, base: usize) -> Result<()> {
    let backend = MmapBackend::open_at(device, base)?;
    let release = backend.read_register(regs::RELEASE)?;
    println!("Window       : {device} (+{base:#x})");
    println!("Release      : {release:#x} ({:?})", Release::from_register(release));

    let handle = ActionHandle::open(Box::new(backend))?;
    let cb = handle.control_block()?;
    println!("State        : {}", cb.state());
    println!("CONTROL      : {:#010x} (seq {})", cb.control, cb.seq());
    println!("STATUS       : {:#010x}", cb.status);
    println!("ERROR_CODE   : {:#x}", cb.error_code);
    println!("IRQ          : enabled={} pending={}", cb.irq_enabled(), cb.irq_pending());
    Ok(())
}

fn cmd_reset(device: &str, base: usize, timeout: Duration) -> Result<()> {
    let backend = MmapBackend::open_at(device, base)?;
    let mut handle = ActionHandle::open(Box::new(backend))?.with_reset_timeout(timeout);
    let before = handle.state()?;
    handle
        .reset()
        .with_context(|| format!("reset {device} from {before}"))?;
    println!("Reset {device}: {before} -> IDLE");
    Ok(())
}
