//! Parameter hand-off between the bootstrap processor and a starting AP.
//!
//! The trampoline has exactly one [`ParameterBlock`], so it is a
//! single-slot mailbox with no lock around it.  The protocol:
//!
//! 1. The controller publishes the AP's parameters and clears `consumed`.
//! 2. The controller sends INIT/SIPI/SIPI; only then can the AP run.
//! 3. The AP loads its stack and entry from the block, calls into Rust and
//!    sets `consumed` before touching anything else.
//! 4. The controller must not publish again until it has seen `consumed`.
//!
//! Step 4 is what keeps two APs from sharing a stack.  It only holds while
//! startup is strictly one processor at a time; parallel startup would
//! need one block per AP.

use core::ptr::{self, NonNull};
use core::sync::atomic::{AtomicU32, Ordering};

use kestrel_lib::Delay;

/// Layout shared with the trampoline image.  Field offsets are baked into
/// its machine code; see `trampoline::PARAM_*`.
#[repr(C)]
pub struct ParameterBlock {
    pub page_table_root: u64,
    pub stack_top: u64,
    pub entry: u64,
    consumed: AtomicU32,
}

impl ParameterBlock {
    pub const fn new() -> Self {
        Self {
            page_table_root: 0,
            stack_top: 0,
            entry: 0,
            consumed: AtomicU32::new(1),
        }
    }

    /// Called by the AP once it no longer needs the block.
    pub fn acknowledge(&self) {
        self.consumed.store(1, Ordering::Release);
    }

    pub fn is_consumed(&self) -> bool {
        self.consumed.load(Ordering::Acquire) != 0
    }
}

impl Default for ParameterBlock {
    fn default() -> Self {
        Self::new()
    }
}

/// What one AP needs to leave the trampoline.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Handoff {
    pub page_table_root: u64,
    pub stack_top: u64,
    pub entry: u64,
}

/// Publisher side of the mailbox.  There is one per trampoline, held by
/// the controller; `publish` taking `&mut self` keeps it single-writer.
pub struct Mailbox {
    block: NonNull<ParameterBlock>,
}

impl Mailbox {
    /// # Safety
    ///
    /// `block` must point to a writable `ParameterBlock` that stays mapped
    /// while the mailbox exists, and nothing else may write its fields.
    pub unsafe fn new(block: *mut ParameterBlock) -> Option<Self> {
        NonNull::new(block).map(|block| Self { block })
    }

    /// Fill the block for the next AP.  The previous AP must already have
    /// acknowledged; see the module docs.
    pub fn publish(&mut self, handoff: &Handoff) {
        let block = self.block.as_ptr();
        // SAFETY: `new` guarantees the pointer is valid and that we are the
        // only writer.  Volatile because the reader is trampoline code the
        // compiler cannot see.
        unsafe {
            ptr::write_volatile(ptr::addr_of_mut!((*block).page_table_root), handoff.page_table_root);
            ptr::write_volatile(ptr::addr_of_mut!((*block).stack_top), handoff.stack_top);
            ptr::write_volatile(ptr::addr_of_mut!((*block).entry), handoff.entry);
        }
        // Release orders the field writes before the flag the AP clears.
        self.block().consumed.store(0, Ordering::Release);
    }

    pub fn block(&self) -> &ParameterBlock {
        // SAFETY: valid for the mailbox lifetime per `new`.
        unsafe { self.block.as_ref() }
    }

    /// Poll for the acknowledgement, once per millisecond, for at most
    /// `budget_ms`.
    pub fn wait_consumed<D: Delay>(&self, budget_ms: u64, delay: &D) -> bool {
        for _ in 0..budget_ms {
            if self.block().is_consumed() {
                return true;
            }
            delay.delay_ms(1);
        }
        self.block().is_consumed()
    }
}
