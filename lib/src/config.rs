//! Bring-up configuration.
//!
//! Hard bounds are compile-time constants: this code runs before any
//! allocator exists, so every table is statically sized.  A handful of
//! policy knobs can be overridden from the kernel command line.

use crate::klog::KlogLevel;

/// Upper bound on processors tracked in the inventory (and, on the
/// firmware-call platform, on hart identifiers probed for startup).
pub const MAX_CPUS: usize = 16;

/// Private stack carved for each secondary processor.
pub const AP_STACK_SIZE: usize = 16 * 1024;

/// Physical load address of the startup trampoline.  Must be page aligned
/// and below 1 MiB; the STARTUP vector is `TRAMPOLINE_ADDR >> 12`.
pub const TRAMPOLINE_ADDR: u64 = 0x8000;

/// Offset of the parameter block inside the trampoline page.  The code
/// image occupies everything below it.
pub const TRAMPOLINE_PARAMS_OFFSET: u64 = 0x100;

/// Page-aligned physical address of the startup trampoline, expressed as
/// the STARTUP IPI vector.
pub const TRAMPOLINE_VECTOR: u8 = (TRAMPOLINE_ADDR >> 12) as u8;

pub const INIT_DELIVERY_DELAY_US: u64 = 10_000;
pub const SIPI_DELIVERY_DELAY_US: u64 = 200;
pub const HANDOFF_WAIT_MS: u64 = 50;
pub const REPORT_POLL_INTERVAL_MS: u64 = 10;
pub const DEFAULT_STARTUP_TIMEOUT_MS: u64 = 1_000;

/// Bochs/QEMU debug power-off port, written after the PM1a sweep.
pub const EMULATOR_SHUTDOWN_PORT: u16 = 0x604;
pub const EMULATOR_SHUTDOWN_VALUE: u16 = 0x2000;

const DEFAULT_SMP_ENABLED: bool = true;
const DEFAULT_FDT_DUMP: bool = true;
const DEFAULT_LOG_LEVEL: KlogLevel = KlogLevel::Info;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct BootConfig {
    pub log_level: KlogLevel,
    pub smp_enabled: bool,
    pub startup_timeout_ms: u64,
    pub fdt_dump: bool,
}

impl BootConfig {
    pub const fn new() -> Self {
        Self {
            log_level: DEFAULT_LOG_LEVEL,
            smp_enabled: DEFAULT_SMP_ENABLED,
            startup_timeout_ms: DEFAULT_STARTUP_TIMEOUT_MS,
            fdt_dump: DEFAULT_FDT_DUMP,
        }
    }

    /// Number of running-count polls for the configured timeout.
    pub fn report_polls(&self) -> u64 {
        (self.startup_timeout_ms / REPORT_POLL_INTERVAL_MS).max(1)
    }
}

impl Default for BootConfig {
    fn default() -> Self {
        Self::new()
    }
}

fn parse_bool(value: &str) -> Option<bool> {
    if value.eq_ignore_ascii_case("on")
        || value.eq_ignore_ascii_case("true")
        || value.eq_ignore_ascii_case("yes")
        || value == "1"
    {
        Some(true)
    } else if value.eq_ignore_ascii_case("off")
        || value.eq_ignore_ascii_case("false")
        || value.eq_ignore_ascii_case("no")
        || value == "0"
    {
        Some(false)
    } else {
        None
    }
}

pub fn config_from_cmdline(cmdline: Option<&str>) -> BootConfig {
    let mut cfg = BootConfig::default();
    let Some(cmdline) = cmdline else {
        return cfg;
    };
    for token in cmdline.split_whitespace() {
        if let Some(value) = token.strip_prefix("klog=") {
            if let Some(level) = KlogLevel::parse(value) {
                cfg.log_level = level;
            }
        } else if let Some(value) = token.strip_prefix("smp.timeout=") {
            if let Ok(ms) = value.trim_end_matches("ms").parse::<u64>() {
                cfg.startup_timeout_ms = ms;
            }
        } else if let Some(value) = token.strip_prefix("smp=") {
            if let Some(enabled) = parse_bool(value) {
                cfg.smp_enabled = enabled;
            }
        } else if let Some(value) = token.strip_prefix("fdt.dump=") {
            if let Some(dump) = parse_bool(value) {
                cfg.fdt_dump = dump;
            }
        }
    }
    cfg
}
