#![no_std]

/// Maximum number of CPUs.
pub const NCPU: usize = 8;

/// Number of netisr slots.
///
/// Equal to the bit width of the pending mask.
pub const NETISR_MAX: usize = u32::BITS as usize;

/// Size in bytes of each thread's static TLS block.
///
/// The thread control block sits at the end of the block, so a segment at
/// offset `n` starts `n` bytes below it.
pub const STATIC_TLS_SIZE: usize = 512;

/// Spin iterations after which a contended spin lock logs a warning.
pub const SPIN_WARN_LOOPS: usize = 1 << 26;
