//! Boot orchestration.
//!
//! Each platform describes its boot as ordered phases of named steps over
//! a platform context.  A failing optional step is logged and skipped; a
//! failing required step ends the phase and is returned to the entry
//! point, which still tries to power off.

use kestrel_lib::{klog_debug, klog_info};

use crate::error::BootResult;

pub const BOOT_INIT_FLAG_OPTIONAL: u32 = 1 << 0;

#[repr(u8)]
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BootInitPhase {
    EarlyHw = 0,
    Discovery = 1,
    Smp = 2,
}

impl BootInitPhase {
    pub const fn name(self) -> &'static str {
        match self {
            Self::EarlyHw => "early_hw",
            Self::Discovery => "discovery",
            Self::Smp => "smp",
        }
    }
}

pub struct BootInitStep<C> {
    name: &'static str,
    func: fn(&mut C) -> BootResult,
    flags: u32,
}

impl<C> BootInitStep<C> {
    pub const fn new(name: &'static str, func: fn(&mut C) -> BootResult, flags: u32) -> Self {
        Self { name, func, flags }
    }

    pub const fn optional(name: &'static str, func: fn(&mut C) -> BootResult) -> Self {
        Self::new(name, func, BOOT_INIT_FLAG_OPTIONAL)
    }

    fn is_optional(&self) -> bool {
        self.flags & BOOT_INIT_FLAG_OPTIONAL != 0
    }
}

fn boot_run_step<C>(phase: BootInitPhase, step: &BootInitStep<C>, ctx: &mut C) -> BootResult {
    klog_debug!("    step: {}", step.name);
    let Err(err) = (step.func)(ctx) else {
        return Ok(());
    };
    klog_info!(
        "[boot:init] FAILURE in {} -> {}: {}",
        phase.name(),
        step.name,
        err
    );
    if step.is_optional() {
        klog_info!("Optional boot step failed, continuing...");
        Ok(())
    } else {
        Err(err)
    }
}

pub fn boot_init_run_phase<C>(
    phase: BootInitPhase,
    steps: &[BootInitStep<C>],
    ctx: &mut C,
) -> BootResult {
    klog_debug!("[boot:init] phase start -> {}", phase.name());
    for step in steps {
        boot_run_step(phase, step, ctx)?;
    }
    klog_info!("[boot:init] phase complete -> {}", phase.name());
    Ok(())
}

pub fn boot_init_run_all<C>(
    phases: &[(BootInitPhase, &[BootInitStep<C>])],
    ctx: &mut C,
) -> BootResult {
    for &(phase, steps) in phases {
        boot_init_run_phase(phase, steps, ctx)?;
    }
    Ok(())
}

// =============================================================================
// x86_64: ACPI discovery and INIT/SIPI bring-up
// =============================================================================

#[cfg(target_arch = "x86_64")]
pub mod x86 {
    use kestrel_acpi::{AcpiError, DirectMap};
    use kestrel_lib::config::TRAMPOLINE_VECTOR;
    use kestrel_lib::{
        BootConfig, CpuRole, HardwareInventory, SpinDelay, klog_info, klog_warn,
        register_cpu_id_fn,
    };
    use x86_64::registers::control::Cr3;

    use super::{BootInitPhase, BootInitStep};
    use crate::error::{BootError, BootResult};
    use crate::lapic::{self, ApicOps, LAPIC_DEFAULT_BASE, LocalApic};
    use crate::smp::BRINGUP;
    use crate::smp::apic::{ApicBringup, ap_entry_address};
    use crate::smp::mailbox::Mailbox;
    use crate::{console, trampoline};

    pub struct X86Boot {
        pub rsdp_phys: u64,
        /// Offset at which all physical memory is mapped.
        pub phys_offset: u64,
        pub config: BootConfig,
        pub boot_apic_id: u32,
        pub hardware: HardwareInventory,
        pub delay: SpinDelay,
    }

    impl X86Boot {
        pub fn new(rsdp_phys: u64, phys_offset: u64, config: BootConfig) -> Self {
            Self {
                rsdp_phys,
                phys_offset,
                config,
                boot_apic_id: 0,
                hardware: HardwareInventory::new(),
                delay: SpinDelay::default(),
            }
        }
    }

    /// Initial APIC id of the executing processor, from CPUID leaf 1.
    pub fn boot_apic_id() -> u32 {
        #[allow(unused_unsafe)]
        // SAFETY: CPUID leaf 1 exists on every x86_64 processor.
        let leaf = unsafe { core::arch::x86_64::__cpuid(1) };
        leaf.ebx >> 24
    }

    fn step_serial(_ctx: &mut X86Boot) -> BootResult {
        console::init_serial();
        klog_info!("Kestrel v{} booting on x86_64", env!("CARGO_PKG_VERSION"));
        Ok(())
    }

    fn step_acpi(ctx: &mut X86Boot) -> BootResult {
        ctx.boot_apic_id = boot_apic_id();
        // SAFETY: the loader maps all physical memory at `phys_offset`.
        let mem = unsafe { DirectMap::new(ctx.phys_offset) };
        match kestrel_acpi::discover(&mem, ctx.rsdp_phys, ctx.boot_apic_id) {
            Ok(hardware) => ctx.hardware = hardware,
            Err(err @ AcpiError::InvalidRoot(_)) => {
                klog_warn!("ACPI: {}, 0 CPUs found, continuing on the boot CPU", err);
                let mut hardware = HardwareInventory::new();
                hardware.cpus.push(ctx.boot_apic_id, CpuRole::Primary)?;
                ctx.hardware = hardware;
            }
            Err(err) => {
                klog_warn!("ACPI: {}", err);
                return Err(BootError::CapabilityUnavailable("ACPI tables"));
            }
        }
        Ok(())
    }

    fn step_lapic(ctx: &mut X86Boot) -> BootResult {
        let base = ctx
            .hardware
            .local_apic_base
            .map_or(LAPIC_DEFAULT_BASE, u64::from);
        // SAFETY: the register page is covered by the physical memory map.
        let apic = lapic::install(unsafe { LocalApic::new((base + ctx.phys_offset) as usize) });
        register_cpu_id_fn(lapic::current_id);
        klog_info!("APIC: Local APIC at {:#x}, BSP APIC ID {}", base, apic.id());
        Ok(())
    }

    fn step_smp(ctx: &mut X86Boot) -> BootResult {
        BRINGUP.load(ctx.hardware.cpus.clone());
        if !ctx.config.smp_enabled {
            klog_info!("SMP: disabled on the command line");
            return Ok(());
        }
        let apic = lapic::get().ok_or(BootError::CapabilityUnavailable("local APIC"))?;

        let (frame, _) = Cr3::read_raw();
        let root = frame.start_address().as_u64();
        // SAFETY: low memory is identity mapped and reserved for the
        // trampoline by the loader.
        let block = unsafe { trampoline::install(ctx.phys_offset, root)? };
        // SAFETY: the block lives in the reserved trampoline page and only
        // this controller writes it.
        let mailbox = unsafe { Mailbox::new(block) }
            .ok_or(BootError::CapabilityUnavailable("trampoline"))?;

        let mut bringup = ApicBringup::new(
            apic,
            &ctx.delay,
            &BRINGUP,
            mailbox,
            TRAMPOLINE_VECTOR,
            root,
            ap_entry_address(),
        );
        bringup.start_all(&ctx.config).map(|_| ())
    }

    static EARLY_HW: [BootInitStep<X86Boot>; 1] = [BootInitStep::new("serial", step_serial, 0)];
    static DISCOVERY: [BootInitStep<X86Boot>; 2] = [
        BootInitStep::new("acpi", step_acpi, 0),
        BootInitStep::new("lapic", step_lapic, 0),
    ];
    static SMP: [BootInitStep<X86Boot>; 1] = [BootInitStep::optional("apic bring-up", step_smp)];

    pub static PHASES: [(BootInitPhase, &[BootInitStep<X86Boot>]); 3] = [
        (BootInitPhase::EarlyHw, &EARLY_HW),
        (BootInitPhase::Discovery, &DISCOVERY),
        (BootInitPhase::Smp, &SMP),
    ];
}

// =============================================================================
// RISC-V: device tree dump and SBI hart start
// =============================================================================

#[cfg(target_arch = "riscv64")]
pub mod riscv {
    use kestrel_fdt::{Fdt, FdtError};
    use kestrel_lib::{
        BootConfig, CpuInventory, CpuRole, KlogLevel, LineWriter, klog_info, klog_warn,
        register_cpu_id_fn,
    };

    use super::{BootInitPhase, BootInitStep};
    use crate::console;
    use crate::error::BootResult;
    use crate::sbi::{self, Firmware};
    use crate::smp::BRINGUP;
    use crate::smp::sbi::{hart_entry_address, start_secondary_harts};

    pub struct RiscvBoot {
        pub hart_id: usize,
        pub fdt: *const u8,
        pub config: BootConfig,
    }

    fn current_hart() -> u32 {
        let hart: usize;
        // SAFETY: `tp` holds the hart id from entry onwards.
        unsafe { core::arch::asm!("mv {}, tp", out(reg) hart, options(nomem, nostack)) };
        hart as u32
    }

    fn step_console(ctx: &mut RiscvBoot) -> BootResult {
        console::init_sbi();
        register_cpu_id_fn(current_hart);
        klog_info!("Kestrel v{} booting on riscv64", env!("CARGO_PKG_VERSION"));
        sbi::print_base_info(&Firmware);
        sbi::cpu_identify(&Firmware, ctx.hart_id);
        klog_info!("cpu{}: Hello World!!!", ctx.hart_id);
        klog_info!("boot_hart_id: {}", ctx.hart_id);
        Ok(())
    }

    fn step_fdt(ctx: &mut RiscvBoot) -> BootResult {
        if !ctx.config.fdt_dump {
            return Ok(());
        }
        // SAFETY: the loader passes the firmware's blob, which is never
        // reclaimed.
        let blob = unsafe { Fdt::from_ptr(ctx.fdt) };
        let mut out = LineWriter::new(KlogLevel::Info);
        match kestrel_fdt::dump(blob, &mut out) {
            Ok(()) | Err(FdtError::NoDeviceTree) => {}
            Err(err) => klog_warn!("fdt: {}", err),
        }
        Ok(())
    }

    fn step_harts(ctx: &mut RiscvBoot) -> BootResult {
        let mut cpus = CpuInventory::new();
        cpus.push(ctx.hart_id as u32, CpuRole::Primary)?;
        BRINGUP.load(cpus);
        if !ctx.config.smp_enabled {
            klog_info!("SMP: disabled on the command line");
            return Ok(());
        }
        start_secondary_harts(&Firmware, &BRINGUP, ctx.hart_id, hart_entry_address()).map(|_| ())
    }

    static EARLY_HW: [BootInitStep<RiscvBoot>; 1] = [BootInitStep::new("console", step_console, 0)];
    static DISCOVERY: [BootInitStep<RiscvBoot>; 1] = [BootInitStep::optional("fdt", step_fdt)];
    static SMP: [BootInitStep<RiscvBoot>; 1] = [BootInitStep::optional("hart start", step_harts)];

    pub static PHASES: [(BootInitPhase, &[BootInitStep<RiscvBoot>]); 3] = [
        (BootInitPhase::EarlyHw, &EARLY_HW),
        (BootInitPhase::Discovery, &DISCOVERY),
        (BootInitPhase::Smp, &SMP),
    ];
}
