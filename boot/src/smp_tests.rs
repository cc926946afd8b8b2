//! On-target checks run on the bootstrap processor after bring-up.

use kestrel_lib::testing::{TestResult, TestSuiteDesc, run_suites};
use kestrel_lib::{
    BringupState, CpuInventory, CpuRole, SpinLock, assert_eq_test, assert_test, define_test_suite,
    pass,
};

use crate::smp::mailbox::{Handoff, Mailbox, ParameterBlock};
use crate::smp::{AP_STACKS, BRINGUP, BringupContext};

// =============================================================================
// Bring-up state
// =============================================================================

fn test_running_count_matches_records() -> TestResult {
    // `report_in` bumps the count under the lock, so both reads agree
    // only while it is held.
    let inventory = BRINGUP.lock();
    let running = BRINGUP.running();
    assert_eq_test!(inventory.count_in(BringupState::Running), running);
    pass!()
}

fn test_primary_is_running() -> TestResult {
    let inventory = BRINGUP.lock();
    let Some((_, primary)) = inventory.primary() else {
        return kestrel_lib::fail!("no primary record");
    };
    assert_eq_test!(primary.state, BringupState::Running);
    assert_eq_test!(inventory.iter().filter(|r| r.is_primary()).count(), 1);
    pass!()
}

fn test_report_in_counts_once() -> TestResult {
    let mut cpus = CpuInventory::new();
    assert_test!(cpus.push(0, CpuRole::Primary).is_ok());
    assert_test!(cpus.push(1, CpuRole::Secondary).is_ok());
    let ctx = BringupContext::new();
    ctx.load(cpus);
    assert_eq_test!(ctx.report_in(1), Some(1));
    assert_eq_test!(ctx.report_in(1), None);
    assert_eq_test!(ctx.report_in(7), None);
    assert_eq_test!(ctx.running(), 2);
    pass!()
}

define_test_suite!(
    bringup_state,
    BRINGUP_STATE_SUITE,
    [
        test_running_count_matches_records,
        test_primary_is_running,
        test_report_in_counts_once,
    ]
);

// =============================================================================
// Spinlock and mailbox
// =============================================================================

fn test_spinlock_excludes_second_acquire() -> TestResult {
    let lock = SpinLock::new(0u32);
    {
        let mut guard = lock.lock();
        *guard += 1;
        assert_test!(lock.try_lock().is_none(), "lock acquired twice");
    }
    assert_test!(!lock.is_locked());
    assert_eq_test!(*lock.lock(), 1);
    pass!()
}

fn test_mailbox_handshake() -> TestResult {
    let mut block = ParameterBlock::new();
    // SAFETY: `block` outlives the mailbox and nothing else writes it.
    let Some(mut mailbox) = (unsafe { Mailbox::new(&mut block) }) else {
        return kestrel_lib::fail!("null block");
    };
    let stack_top = AP_STACKS.top(1).unwrap_or(0);
    mailbox.publish(&Handoff {
        page_table_root: 0x1000,
        stack_top,
        entry: 0,
    });
    assert_test!(!mailbox.block().is_consumed());
    assert_eq_test!(mailbox.block().stack_top, stack_top);
    mailbox.block().acknowledge();
    assert_test!(mailbox.block().is_consumed());
    pass!()
}

define_test_suite!(
    handoff,
    HANDOFF_SUITE,
    [test_spinlock_excludes_second_acquire, test_mailbox_handshake]
);

#[cfg(target_arch = "x86_64")]
fn test_trampoline_image_layout() -> TestResult {
    let image = crate::trampoline::build_image();
    assert_eq_test!(image[0], 0xFA, "image starts with cli");
    assert_eq_test!(
        image.len() as u64,
        kestrel_lib::config::TRAMPOLINE_PARAMS_OFFSET
    );
    pass!()
}

#[cfg(target_arch = "x86_64")]
define_test_suite!(trampoline, TRAMPOLINE_SUITE, [test_trampoline_image_layout]);

#[cfg(target_arch = "x86_64")]
pub const BOOT_SUITES: [TestSuiteDesc; 3] = [BRINGUP_STATE_SUITE, HANDOFF_SUITE, TRAMPOLINE_SUITE];

#[cfg(not(target_arch = "x86_64"))]
pub const BOOT_SUITES: [TestSuiteDesc; 2] = [BRINGUP_STATE_SUITE, HANDOFF_SUITE];

pub fn run_boot_suites() -> bool {
    run_suites(&BOOT_SUITES).all_passed()
}
