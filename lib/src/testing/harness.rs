// Suite bookkeeping for the in-kernel harness.

use crate::{klog_error, klog_info};

/// Maximum number of suites recorded in one run summary.
pub const HARNESS_MAX_SUITES: usize = 16;

/// Result of executing a single test suite.
#[derive(Clone, Copy, Debug)]
pub struct TestSuiteResult {
    pub name: &'static str,
    pub total: u32,
    pub passed: u32,
    pub failed: u32,
}

impl TestSuiteResult {
    pub const fn new(name: &'static str) -> Self {
        Self {
            name,
            total: 0,
            passed: 0,
            failed: 0,
        }
    }

    /// Fill in results from a (passed, total) pair.
    pub fn filled(mut self, passed: u32, total: u32) -> Self {
        self.total = total;
        self.passed = passed;
        self.failed = total.saturating_sub(passed);
        self
    }

    pub fn all_passed(&self) -> bool {
        self.failed == 0
    }
}

pub type SuiteRunnerFn = fn() -> TestSuiteResult;

#[derive(Clone, Copy)]
pub struct TestSuiteDesc {
    pub name: &'static str,
    pub run: SuiteRunnerFn,
}

/// Aggregated results from running all test suites.
#[derive(Clone, Copy, Debug)]
pub struct TestRunSummary {
    pub suites: [Option<TestSuiteResult>; HARNESS_MAX_SUITES],
    pub suite_count: usize,
    pub total_tests: u32,
    pub passed: u32,
    pub failed: u32,
}

impl Default for TestRunSummary {
    fn default() -> Self {
        Self {
            suites: [None; HARNESS_MAX_SUITES],
            suite_count: 0,
            total_tests: 0,
            passed: 0,
            failed: 0,
        }
    }
}

impl TestRunSummary {
    /// Add results from a single suite to the summary.
    pub fn add_suite_result(&mut self, result: &TestSuiteResult) {
        if self.suite_count < HARNESS_MAX_SUITES {
            self.suites[self.suite_count] = Some(*result);
        }
        self.suite_count += 1;
        self.total_tests = self.total_tests.saturating_add(result.total);
        self.passed = self.passed.saturating_add(result.passed);
        self.failed = self.failed.saturating_add(result.failed);
    }

    pub fn all_passed(&self) -> bool {
        self.failed == 0
    }
}

/// Run every suite in order and log a per-suite and overall summary.
pub fn run_suites(suites: &[TestSuiteDesc]) -> TestRunSummary {
    let mut summary = TestRunSummary::default();
    for desc in suites {
        klog_info!("TESTS: running suite {}", desc.name);
        let result = (desc.run)();
        if result.all_passed() {
            klog_info!("TESTS: {} {}/{} passed", result.name, result.passed, result.total);
        } else {
            klog_error!(
                "TESTS: {} {}/{} passed, {} failed",
                result.name,
                result.passed,
                result.total,
                result.failed
            );
        }
        summary.add_suite_result(&result);
    }
    klog_info!(
        "TESTS: total {} passed {} failed {}",
        summary.total_tests,
        summary.passed,
        summary.failed
    );
    summary
}
