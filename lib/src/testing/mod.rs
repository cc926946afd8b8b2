//! In-kernel test harness.
//!
//! Suites are plain `fn() -> TestSuiteResult` values collected into a
//! static table by the caller (see `define_test_suite!`).  They run on the
//! bootstrap processor after bring-up when the `itests` feature is on, and
//! report through klog so a serial log is the whole test transcript.

pub mod harness;

mod assertions;

pub use harness::{TestRunSummary, TestSuiteDesc, TestSuiteResult, run_suites};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TestResult {
    Pass,
    Fail,
    Skipped,
}

impl TestResult {
    #[inline]
    pub fn is_pass(&self) -> bool {
        matches!(self, Self::Pass)
    }

    #[inline]
    pub fn is_failure(&self) -> bool {
        matches!(self, Self::Fail)
    }
}

/// Run one test and log its outcome.
pub fn run_single_test<F>(name: &str, test: F) -> TestResult
where
    F: FnOnce() -> TestResult,
{
    let result = test();
    match result {
        TestResult::Pass => crate::klog_debug!("  PASS {}", name),
        TestResult::Skipped => crate::klog_info!("  SKIP {}", name),
        TestResult::Fail => crate::klog_error!("  FAIL {}", name),
    }
    result
}

#[macro_export]
macro_rules! pass {
    () => {
        $crate::testing::TestResult::Pass
    };
}

#[macro_export]
macro_rules! fail {
    () => {
        $crate::testing::TestResult::Fail
    };
    ($msg:expr) => {{
        $crate::klog_info!("TEST FAIL: {}", $msg);
        $crate::testing::TestResult::Fail
    }};
    ($fmt:expr, $($arg:tt)*) => {{
        $crate::klog_info!(concat!("TEST FAIL: ", $fmt), $($arg)*);
        $crate::testing::TestResult::Fail
    }};
}

#[macro_export]
macro_rules! run_test {
    ($passed:expr, $total:expr, $test_fn:expr) => {{
        $total += 1;
        let result = $crate::testing::run_single_test(stringify!($test_fn), || $test_fn());
        if result.is_pass() {
            $passed += 1;
        }
        result
    }};

    ($test_fn:expr) => {{ $crate::testing::run_single_test(stringify!($test_fn), || $test_fn()) }};
}

/// Define a suite function named `$suite_name` running the listed tests,
/// plus a `$desc` descriptor for the suite table.
#[macro_export]
macro_rules! define_test_suite {
    ($suite_name:ident, $desc:ident, [$($test_fn:path),* $(,)?]) => {
        fn $suite_name() -> $crate::testing::TestSuiteResult {
            let mut passed = 0u32;
            let mut total = 0u32;
            $(
                $crate::run_test!(passed, total, $test_fn);
            )*
            $crate::testing::TestSuiteResult::new(stringify!($suite_name)).filled(passed, total)
        }

        pub const $desc: $crate::testing::TestSuiteDesc = $crate::testing::TestSuiteDesc {
            name: stringify!($suite_name),
            run: $suite_name,
        };
    };
}
