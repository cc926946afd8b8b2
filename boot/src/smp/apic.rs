//! INIT/SIPI/SIPI bring-up of application processors.
//!
//! Processors are started strictly one at a time because they share the
//! trampoline's single parameter block (see [`super::mailbox`]).  Each AP
//! moves `NotStarted -> Starting` when the controller publishes its
//! parameters and `Starting -> Running` when it reports in from
//! [`ap_entry`].

use kestrel_lib::config::{
    HANDOFF_WAIT_MS, INIT_DELIVERY_DELAY_US, SIPI_DELIVERY_DELAY_US,
};
use kestrel_lib::{BootConfig, BringupState, Delay, cpu, klog_debug, klog_info, klog_warn};

use super::mailbox::{Handoff, Mailbox, ParameterBlock};
use super::{AP_STACKS, BRINGUP, BringupContext};
use crate::error::{BootError, BootResult};
use crate::lapic::{self, ApicOps, IcrLow};

/// Release `dest` from reset and point it at the page `vector << 12`.
/// Stops at the first IPI the local APIC fails to deliver and returns
/// false.
pub fn send_init_sipi_sipi<A: ApicOps, D: Delay>(
    apic: &A,
    delay: &D,
    dest: u32,
    vector: u8,
) -> bool {
    if !apic.send_ipi(dest, IcrLow::init()) {
        return false;
    }
    delay.delay_us(INIT_DELIVERY_DELAY_US);

    if !apic.send_ipi(dest, IcrLow::startup(vector)) {
        return false;
    }
    delay.delay_us(SIPI_DELIVERY_DELAY_US);

    // Some processors miss the first STARTUP.
    if !apic.send_ipi(dest, IcrLow::startup(vector)) {
        return false;
    }
    delay.delay_us(SIPI_DELIVERY_DELAY_US);
    true
}

pub struct ApicBringup<'a, A: ApicOps, D: Delay> {
    apic: &'a A,
    delay: &'a D,
    ctx: &'a BringupContext,
    mailbox: Mailbox,
    vector: u8,
    page_table_root: u64,
    entry: u64,
}

impl<'a, A: ApicOps, D: Delay> ApicBringup<'a, A, D> {
    pub fn new(
        apic: &'a A,
        delay: &'a D,
        ctx: &'a BringupContext,
        mailbox: Mailbox,
        vector: u8,
        page_table_root: u64,
        entry: u64,
    ) -> Self {
        Self {
            apic,
            delay,
            ctx,
            mailbox,
            vector,
            page_table_root,
            entry,
        }
    }

    /// Start every secondary in the loaded inventory, then wait for them
    /// to report in.  A timeout still leaves the running subset in place.
    pub fn start_all(&mut self, config: &BootConfig) -> BootResult<usize> {
        let expected = self.ctx.expected();
        let secondaries = {
            let inventory = self.ctx.lock();
            inventory.secondaries().count()
        };
        if secondaries == 0 {
            klog_info!("SMP: Only one CPU, nothing to do");
            return Ok(self.ctx.running());
        }

        for index in 0..expected {
            let Some(record) = self.ctx.record(index) else {
                break;
            };
            if record.is_primary() || record.state != BringupState::NotStarted {
                continue;
            }
            if !self.start_one(index, record.id)? {
                break;
            }
        }

        klog_info!("SMP: Waiting for APs to start...");
        let result = self
            .ctx
            .wait_for_running(expected, config.report_polls(), self.delay);
        match result {
            Ok(running) => klog_info!("SMP: {} of {} CPUs running", running, expected),
            Err(err) => klog_warn!("SMP: {}", err),
        }
        result
    }

    /// Returns false if the IPIs failed or the AP never picked up its
    /// parameters; publishing again would hand its stack to the next
    /// processor.
    fn start_one(&mut self, index: usize, id: u32) -> BootResult<bool> {
        let stack_top = AP_STACKS.top(index).ok_or(BootError::InventoryFull)?;
        self.mailbox.publish(&Handoff {
            page_table_root: self.page_table_root,
            stack_top,
            entry: self.entry,
        });
        self.ctx.mark_starting(index);
        klog_debug!("SMP: starting CPU #{} (APIC ID {})", index, id);

        if !send_init_sipi_sipi(self.apic, self.delay, id, self.vector) {
            klog_warn!(
                "SMP: startup IPIs to CPU #{} (APIC ID {}) failed, not starting more",
                index,
                id
            );
            return Ok(false);
        }

        if self.mailbox.wait_consumed(HANDOFF_WAIT_MS, self.delay) {
            Ok(true)
        } else {
            klog_warn!(
                "SMP: CPU #{} (APIC ID {}) did not pick up its parameters, not starting more",
                index,
                id
            );
            Ok(false)
        }
    }
}

/// Report a freshly started AP in and announce it.
pub fn secondary_main_body(ctx: &BringupContext, apic_id: u32) -> Option<usize> {
    match ctx.report_in(apic_id) {
        Some(index) => {
            klog_info!("Hello from CPU #{} (APIC ID {})", index, apic_id);
            Some(index)
        }
        None => {
            klog_warn!("SMP: APIC ID {} has no CPU record", apic_id);
            None
        }
    }
}

/// Long-mode entry called by the trampoline with the parameter block in
/// `rdi`, on the stack published in it.
pub extern "C" fn ap_entry(block: &'static ParameterBlock) -> ! {
    block.acknowledge();
    secondary_main_body(&BRINGUP, lapic::current_id());
    cpu::halt_loop()
}

pub fn ap_entry_address() -> u64 {
    ap_entry as usize as u64
}
