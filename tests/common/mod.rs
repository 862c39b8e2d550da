#![allow(dead_code)]

pub use fleetci_test_utils::builders;
pub use fleetci_test_utils::fake_vcs;
pub use fleetci_test_utils::{init_tracing, wait_until, with_timeout};

pub type TestResult = Result<(), Box<dyn std::error::Error>>;
